//! [`Config`] defines tuning options shared by [`Semaphore`](crate::Semaphore) and
//! [`Lock`](crate::Lock).

use std::fmt;
#[cfg(not(feature = "loom"))]
use std::thread::yield_now;

#[cfg(feature = "loom")]
use loom::thread::yield_now;

/// [`Config`] defines tuning options shared by [`Semaphore`](crate::Semaphore) and
/// [`Lock`](crate::Lock).
///
/// # Examples
///
/// ```
/// use semrw::config::Config;
/// use semrw::Semaphore;
///
/// #[derive(Debug, Default)]
/// struct NoSpin;
///
/// impl Config for NoSpin {
///     fn spin_count() -> usize {
///         0
///     }
/// }
///
/// let semaphore: Semaphore<NoSpin> = Semaphore::binary();
/// assert!(semaphore.try_acquire());
/// ```
pub trait Config: fmt::Debug + Default {
    /// Defines the number of times to retry before a [`Semaphore`](crate::Semaphore) waiter
    /// parks the thread.
    #[inline]
    #[must_use]
    fn spin_count() -> usize {
        if cfg!(feature = "loom") { 1 } else { 128 }
    }

    /// Defines the backoff function to use when spinning.
    #[inline]
    fn backoff(spin_count: usize) {
        if spin_count % 64 == 63 || cfg!(feature = "loom") {
            yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

/// Default configuration for synchronization primitives.
#[derive(Debug, Default)]
pub struct DefaultConfig;

impl Config for DefaultConfig {}
