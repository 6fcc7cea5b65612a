//! [`Semaphore`] is a counting semaphore with a fixed capacity that can be destroyed and
//! re-initialized.
//!
//! [`RawSemaphore`] is the interface [`RwLock`](crate::RwLock) composes; [`Semaphore`] is the
//! implementation used by default.

#![deny(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::sync::PoisonError;
use std::sync::atomic::Ordering::{self, Relaxed, SeqCst};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::AtomicUsize;
#[cfg(not(feature = "loom"))]
use std::sync::{Condvar, Mutex};

#[cfg(feature = "loom")]
use loom::sync::atomic::AtomicUsize;
#[cfg(feature = "loom")]
use loom::sync::{Condvar, Mutex};

use crate::config::{Config, DefaultConfig};

/// Errors reported by a semaphore.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The semaphore has been destroyed.
    #[error("the semaphore has been destroyed")]
    Destroyed,
    /// The semaphore cannot hold more permits.
    #[error("the semaphore is already full")]
    Overflow,
}

/// Semaphore operations that [`RwLock`](crate::RwLock) is built on.
///
/// Every operation takes `&self`: the implementation owns its synchronization.
pub trait RawSemaphore {
    /// Resets the semaphore to hold `permits` permits, reviving it if it was destroyed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] if `permits` exceeds the capacity.
    fn init(&self, permits: usize) -> Result<(), Error>;

    /// Blocks until a permit is available, then takes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] if the semaphore is or becomes destroyed while waiting.
    fn wait(&self) -> Result<(), Error>;

    /// Returns a permit to the semaphore.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] if the semaphore was destroyed, or [`Error::Overflow`] if
    /// the semaphore is already full.
    fn post(&self) -> Result<(), Error>;

    /// Destroys the semaphore, failing every current and future waiter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] if the semaphore was already destroyed.
    fn destroy(&self) -> Result<(), Error>;
}

/// [`Semaphore`] is a counting semaphore with a fixed capacity that can be destroyed and
/// re-initialized.
///
/// Waiting threads retry [`Config::spin_count`] times before parking.
pub struct Semaphore<C: Config = DefaultConfig> {
    /// Available permits and the destroyed flag.
    state: AtomicUsize,
    /// Maximum number of permits.
    capacity: usize,
    /// Number of parked or parking threads.
    waiters: AtomicUsize,
    /// Parked threads wait on `unparked` while holding this.
    parking: Mutex<()>,
    /// Signals parked threads.
    unparked: Condvar,
    _config: PhantomData<fn() -> C>,
}

impl<C: Config> Semaphore<C> {
    /// Maximum capacity of a [`Semaphore`].
    pub const MAX_CAPACITY: usize = Self::PERMITS_MASK;

    /// Set when the semaphore is destroyed.
    const DESTROYED: usize = 1_usize << (usize::BITS - 1);

    /// Mask to extract the number of available permits.
    const PERMITS_MASK: usize = Self::DESTROYED - 1;

    /// Creates a new [`Semaphore`] holding `permits` out of `capacity` permits.
    ///
    /// `capacity` is clamped to [`MAX_CAPACITY`](Self::MAX_CAPACITY), and `permits` to
    /// `capacity`.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let semaphore: Semaphore = Semaphore::new(2, 3);
    /// assert_eq!(semaphore.available_permits(Relaxed), 2);
    /// assert_eq!(semaphore.capacity(), 3);
    /// ```
    #[inline]
    #[must_use]
    pub fn new(permits: usize, capacity: usize) -> Self {
        let capacity = capacity.min(Self::MAX_CAPACITY);
        Self {
            state: AtomicUsize::new(permits.min(capacity)),
            capacity,
            waiters: AtomicUsize::new(0),
            parking: Mutex::new(()),
            unparked: Condvar::new(),
            _config: PhantomData,
        }
    }

    /// Creates a binary [`Semaphore`] holding its only permit.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    ///
    /// let semaphore: Semaphore = Semaphore::binary();
    /// assert!(semaphore.try_acquire());
    /// assert!(!semaphore.try_acquire());
    /// ```
    #[inline]
    #[must_use]
    pub fn binary() -> Self {
        Self::new(1, 1)
    }

    /// Returns the maximum number of permits.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of available permits.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let semaphore: Semaphore = Semaphore::new(4, 4);
    /// assert!(semaphore.try_acquire());
    /// assert_eq!(semaphore.available_permits(Relaxed), 3);
    /// ```
    #[inline]
    pub fn available_permits(&self, mo: Ordering) -> usize {
        self.state.load(mo) & Self::PERMITS_MASK
    }

    /// Returns `true` if the semaphore has been destroyed.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let semaphore: Semaphore = Semaphore::binary();
    /// assert!(!semaphore.is_destroyed(Relaxed));
    ///
    /// assert!(semaphore.destroy().is_ok());
    /// assert!(semaphore.is_destroyed(Relaxed));
    /// ```
    #[inline]
    pub fn is_destroyed(&self, mo: Ordering) -> bool {
        self.state.load(mo) & Self::DESTROYED == Self::DESTROYED
    }

    /// Tries to take a permit without blocking.
    ///
    /// Returns `false` if no permits are available or the semaphore was destroyed.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    ///
    /// let semaphore: Semaphore = Semaphore::new(1, 2);
    /// assert!(semaphore.try_acquire());
    /// assert!(!semaphore.try_acquire());
    /// ```
    #[inline]
    pub fn try_acquire(&self) -> bool {
        matches!(self.try_acquire_internal(), Ok(true))
    }

    /// Takes a permit, blocking the current thread until one is available.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] if the semaphore is or becomes destroyed while waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let semaphore: Semaphore = Semaphore::binary();
    ///
    /// assert!(semaphore.acquire_sync().is_ok());
    /// assert_eq!(semaphore.available_permits(Relaxed), 0);
    /// ```
    pub fn acquire_sync(&self) -> Result<(), Error> {
        for spin in 0..C::spin_count() {
            if self.try_acquire_internal()? {
                return Ok(());
            }
            C::backoff(spin);
        }
        self.park()
    }

    /// Returns a permit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] if the semaphore was destroyed, or [`Error::Overflow`] if it
    /// already holds [`capacity`](Self::capacity) permits.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    /// use semrw::semaphore::Error;
    ///
    /// let semaphore: Semaphore = Semaphore::binary();
    /// assert_eq!(semaphore.release(), Err(Error::Overflow));
    ///
    /// assert!(semaphore.try_acquire());
    /// assert_eq!(semaphore.release(), Ok(()));
    /// ```
    pub fn release(&self) -> Result<(), Error> {
        let mut state = self.state.load(SeqCst);
        loop {
            if state & Self::DESTROYED == Self::DESTROYED {
                return Err(Error::Destroyed);
            }
            if state & Self::PERMITS_MASK >= self.capacity {
                return Err(Error::Overflow);
            }
            match self
                .state
                .compare_exchange(state, state + 1, SeqCst, Relaxed)
            {
                Ok(_) => break,
                Err(new_state) => state = new_state,
            }
        }

        // Pairs with the registration in `park`.
        if self.waiters.load(SeqCst) != 0 {
            let _parking = self.parking.lock().unwrap_or_else(PoisonError::into_inner);
            self.unparked.notify_one();
        }
        Ok(())
    }

    /// Destroys the semaphore, waking every parked thread with [`Error::Destroyed`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Destroyed`] if the semaphore was already destroyed.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    /// use semrw::semaphore::Error;
    ///
    /// let semaphore: Semaphore = Semaphore::binary();
    /// assert_eq!(semaphore.destroy(), Ok(()));
    /// assert_eq!(semaphore.destroy(), Err(Error::Destroyed));
    /// assert_eq!(semaphore.acquire_sync(), Err(Error::Destroyed));
    /// ```
    pub fn destroy(&self) -> Result<(), Error> {
        if self.state.fetch_or(Self::DESTROYED, SeqCst) & Self::DESTROYED == Self::DESTROYED {
            return Err(Error::Destroyed);
        }
        let _parking = self.parking.lock().unwrap_or_else(PoisonError::into_inner);
        self.unparked.notify_all();
        Ok(())
    }

    /// Resets the number of permits and clears the destroyed flag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overflow`] if `permits` exceeds the capacity.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::Semaphore;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let semaphore: Semaphore = Semaphore::new(0, 2);
    /// assert!(semaphore.destroy().is_ok());
    ///
    /// assert!(semaphore.reset(2).is_ok());
    /// assert!(!semaphore.is_destroyed(Relaxed));
    /// assert_eq!(semaphore.available_permits(Relaxed), 2);
    /// ```
    pub fn reset(&self, permits: usize) -> Result<(), Error> {
        if permits > self.capacity {
            return Err(Error::Overflow);
        }
        self.state.store(permits, SeqCst);
        if self.waiters.load(SeqCst) != 0 {
            let _parking = self.parking.lock().unwrap_or_else(PoisonError::into_inner);
            self.unparked.notify_all();
        }
        Ok(())
    }

    /// Tries to take a permit.
    fn try_acquire_internal(&self) -> Result<bool, Error> {
        let mut state = self.state.load(SeqCst);
        loop {
            if state & Self::DESTROYED == Self::DESTROYED {
                return Err(Error::Destroyed);
            }
            if state & Self::PERMITS_MASK == 0 {
                return Ok(false);
            }
            match self
                .state
                .compare_exchange(state, state - 1, SeqCst, Relaxed)
            {
                Ok(_) => return Ok(true),
                Err(new_state) => state = new_state,
            }
        }
    }

    /// Parks the current thread until a permit is taken or the semaphore is destroyed.
    fn park(&self) -> Result<(), Error> {
        let mut parking = self.parking.lock().unwrap_or_else(PoisonError::into_inner);
        self.waiters.fetch_add(1, SeqCst);
        let result = loop {
            match self.try_acquire_internal() {
                Ok(true) => break Ok(()),
                Ok(false) => (),
                Err(error) => break Err(error),
            }
            parking = self
                .unparked
                .wait(parking)
                .unwrap_or_else(PoisonError::into_inner);
        };
        self.waiters.fetch_sub(1, SeqCst);
        result
    }
}

impl<C: Config> Default for Semaphore<C> {
    /// Creates a binary [`Semaphore`] holding its only permit.
    #[inline]
    fn default() -> Self {
        Self::binary()
    }
}

impl<C: Config> fmt::Debug for Semaphore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Relaxed);
        let available_permits = state & Self::PERMITS_MASK;
        let destroyed = state & Self::DESTROYED == Self::DESTROYED;
        f.debug_struct("Semaphore")
            .field("state", &state)
            .field("available_permits", &available_permits)
            .field("capacity", &self.capacity)
            .field("destroyed", &destroyed)
            .field("waiters", &self.waiters.load(Relaxed))
            .finish()
    }
}

impl<C: Config> RawSemaphore for Semaphore<C> {
    #[inline]
    fn init(&self, permits: usize) -> Result<(), Error> {
        self.reset(permits)
    }

    #[inline]
    fn wait(&self) -> Result<(), Error> {
        self.acquire_sync()
    }

    #[inline]
    fn post(&self) -> Result<(), Error> {
        self.release()
    }

    #[inline]
    fn destroy(&self) -> Result<(), Error> {
        Semaphore::<C>::destroy(self)
    }
}
