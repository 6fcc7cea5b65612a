//! [`Lock`] is a low-level mutual exclusion primitive guarding [`AtomicCounter`](crate::AtomicCounter).

#![deny(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{self, Acquire, Relaxed, Release};

use crate::config::{Config, DefaultConfig};

/// [`Lock`] is a low-level mutual exclusion primitive guarding
/// [`AtomicCounter`](crate::AtomicCounter).
///
/// Waiting threads spin, backing off according to [`Config::backoff`]; critical sections under a
/// [`Lock`] are expected to be a handful of instructions long. [`Lock`] only provides low-level
/// locking and releasing methods; [`Mutex`](crate::Mutex) wraps it in a guard-based interface.
pub struct Lock<C: Config = DefaultConfig> {
    /// `true` if the lock is held.
    locked: AtomicBool,
    _config: PhantomData<fn() -> C>,
}

impl<C: Config> Lock<C> {
    /// Creates a new free [`Lock`].
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Lock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: Lock = Lock::new();
    /// assert!(!lock.is_locked(Relaxed));
    /// ```
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            _config: PhantomData,
        }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Lock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: Lock = Lock::new();
    ///
    /// lock.lock_sync();
    /// assert!(lock.is_locked(Relaxed));
    /// ```
    #[inline]
    pub fn is_locked(&self, mo: Ordering) -> bool {
        self.locked.load(mo)
    }

    /// Acquires the lock, spinning until it is free.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Lock;
    ///
    /// let lock: Lock = Lock::new();
    ///
    /// lock.lock_sync();
    /// assert!(!lock.try_lock());
    /// ```
    #[inline]
    pub fn lock_sync(&self) {
        let mut spin = 0;
        while !self.try_lock() {
            // Wait for the holder to leave before retrying the exchange.
            while self.locked.load(Relaxed) {
                C::backoff(spin);
                spin += 1;
            }
        }
    }

    /// Tries to acquire the lock.
    ///
    /// Returns `false` if the lock was held.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Lock;
    ///
    /// let lock: Lock = Lock::new();
    ///
    /// assert!(lock.try_lock());
    /// assert!(!lock.try_lock());
    /// ```
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Acquire, Relaxed)
            .is_ok()
    }

    /// Releases the lock.
    ///
    /// Returns `true` if the lock was held and is now released.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Lock;
    ///
    /// let lock: Lock = Lock::new();
    ///
    /// lock.lock_sync();
    /// assert!(lock.release_lock());
    /// assert!(!lock.release_lock());
    /// ```
    #[inline]
    pub fn release_lock(&self) -> bool {
        self.locked
            .compare_exchange(true, false, Release, Relaxed)
            .is_ok()
    }
}

impl<C: Config> Default for Lock<C> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> fmt::Debug for Lock<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("locked", &self.locked.load(Relaxed))
            .finish()
    }
}
