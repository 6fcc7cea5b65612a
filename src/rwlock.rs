//! [`RwLock`] is a write-preferring reader-writer lock composed of three binary semaphores.
//!
//! * `gate`: held by a writer from the moment it starts acquiring the lock until it releases
//!   it. Readers pass through it, waiting and immediately signalling, so a pending writer bars
//!   new readers.
//! * `reader_count_guard`: serializes updates to the reader count.
//! * `writer_barrier`: held by the active writer, or by the first reader on behalf of every
//!   reader.
//!
//! The semaphores are never exposed, so they are always taken in the order `gate`,
//! `reader_count_guard`, `writer_barrier`.

#![deny(unsafe_code)]

use std::fmt;
use std::sync::atomic::Ordering::{self, Acquire, Relaxed, Release};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize};

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize};

use crate::Semaphore;
use crate::semaphore::{self, RawSemaphore};

/// Errors returned by [`RwLock`] operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    /// The operation does not apply to the current state of the lock.
    #[error("invalid argument")]
    InvalidArgument,
    /// The lock was never initialized or has been destroyed.
    #[error("the lock is not initialized")]
    NotInitialized,
    /// An underlying semaphore failed.
    #[error("semaphore failure: {0}")]
    PrimitiveFailure(#[from] semaphore::Error),
}

/// The mode in which the lock was last acquired.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Shared read access.
    Read,
    /// Exclusive write access.
    Write,
}

/// [`RwLock`] is a write-preferring reader-writer lock composed of three binary semaphores.
///
/// Like [`Lock`](crate::Lock), [`RwLock`] does not own the data it protects; the user manages the
/// scope of acquired locks. Acquiring the same lock twice from one thread in any combination of
/// modes deadlocks.
pub struct RwLock<S: RawSemaphore = Semaphore> {
    /// `true` between initialization and destruction.
    initialized: AtomicBool,
    /// Number of readers holding the lock; only modified while `reader_count_guard` is held.
    reader_count: AtomicUsize,
    /// Last acquired [`Mode`].
    mode: AtomicU8,
    /// Held by writers; probed by readers.
    gate: S,
    /// Guards `reader_count`.
    reader_count_guard: S,
    /// Held by the active writer or the reader cohort.
    writer_barrier: S,
}

/// Releases a read lock when dropped.
#[derive(Debug)]
#[must_use = "the read lock is released immediately if the guard is not used"]
pub struct ReadGuard<'l, S: RawSemaphore = Semaphore> {
    lock: &'l RwLock<S>,
}

/// Releases a write lock when dropped.
#[derive(Debug)]
#[must_use = "the write lock is released immediately if the guard is not used"]
pub struct WriteGuard<'l, S: RawSemaphore = Semaphore> {
    lock: &'l RwLock<S>,
}

impl Mode {
    const fn to_u8(self) -> u8 {
        match self {
            Mode::Read => 0,
            Mode::Write => 1,
        }
    }

    const fn from_u8(value: u8) -> Self {
        if value == 0 { Mode::Read } else { Mode::Write }
    }
}

impl<S: RawSemaphore + Default> RwLock<S> {
    /// Creates a new initialized [`RwLock`].
    ///
    /// `S::default()` must return a binary semaphore holding its permit.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    ///
    /// let lock: RwLock = RwLock::new();
    /// assert!(lock.is_initialized());
    /// assert!(lock.acquire_read().is_ok());
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_semaphores(S::default(), S::default(), S::default())
    }

    /// Creates a new [`RwLock`] that rejects every operation until [`init`](Self::init) is
    /// called.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use semrw::rwlock::Error;
    ///
    /// let lock: RwLock = RwLock::uninit();
    /// assert_eq!(lock.acquire_write(), Err(Error::NotInitialized));
    ///
    /// assert!(lock.init().is_ok());
    /// assert!(lock.acquire_write().is_ok());
    /// ```
    #[inline]
    #[must_use]
    pub fn uninit() -> Self {
        let lock = Self::new();
        lock.initialized.store(false, Relaxed);
        lock
    }
}

impl<S: RawSemaphore> RwLock<S> {
    /// Creates a new initialized [`RwLock`] composed of the supplied semaphores.
    ///
    /// Each semaphore must be binary and hold its permit.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::{RwLock, Semaphore};
    ///
    /// let lock: RwLock = RwLock::with_semaphores(
    ///     Semaphore::binary(),
    ///     Semaphore::binary(),
    ///     Semaphore::binary(),
    /// );
    /// assert!(lock.acquire_write().is_ok());
    /// ```
    #[inline]
    #[must_use]
    pub fn with_semaphores(gate: S, reader_count_guard: S, writer_barrier: S) -> Self {
        Self {
            initialized: AtomicBool::new(true),
            reader_count: AtomicUsize::new(0),
            mode: AtomicU8::new(Mode::Read.to_u8()),
            gate,
            reader_count_guard,
            writer_barrier,
        }
    }

    /// Returns `true` if the lock is initialized and not destroyed.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    ///
    /// let lock: RwLock = RwLock::new();
    /// assert!(lock.is_initialized());
    ///
    /// assert!(lock.destroy().is_ok());
    /// assert!(!lock.is_initialized());
    /// ```
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Acquire)
    }

    /// Returns the number of readers holding the lock.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// assert!(lock.acquire_read().is_ok());
    /// assert!(lock.acquire_read().is_ok());
    /// assert_eq!(lock.readers(Relaxed), 2);
    /// ```
    #[inline]
    pub fn readers(&self, mo: Ordering) -> usize {
        self.reader_count.load(mo)
    }

    /// Returns the mode in which the lock was last acquired or released.
    ///
    /// The value is informational; it does not tell whether the lock is held.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use semrw::rwlock::Mode;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// assert!(lock.acquire_write().is_ok());
    /// assert_eq!(lock.mode(), Mode::Write);
    /// ```
    #[inline]
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Relaxed))
    }

    /// Initializes a lock created by [`uninit`](RwLock::uninit) or destroyed by
    /// [`destroy`](Self::destroy).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the lock is already initialized, and
    /// [`Error::PrimitiveFailure`] if a semaphore cannot be reset.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use semrw::rwlock::Error;
    ///
    /// let lock: RwLock = RwLock::new();
    /// assert_eq!(lock.init(), Err(Error::InvalidArgument));
    ///
    /// assert!(lock.destroy().is_ok());
    /// assert!(lock.init().is_ok());
    /// assert!(lock.acquire_read().is_ok());
    /// ```
    pub fn init(&self) -> Result<(), Error> {
        if self.is_initialized() {
            return Err(Error::InvalidArgument);
        }
        self.gate.init(1)?;
        self.reader_count_guard.init(1)?;
        self.writer_barrier.init(1)?;
        self.reader_count.store(0, Relaxed);
        self.mode.store(Mode::Read.to_u8(), Relaxed);
        self.initialized.store(true, Release);
        tracing::debug!(lock = ?self, "reader-writer lock initialized");
        Ok(())
    }

    /// Destroys the lock after waiting for every current holder to release it.
    ///
    /// Threads blocked in [`acquire_read`](Self::acquire_read) or
    /// [`acquire_write`](Self::acquire_write) fail with [`Error::PrimitiveFailure`], and every
    /// later operation fails with [`Error::NotInitialized`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the lock is not initialized, and
    /// [`Error::PrimitiveFailure`] if a semaphore could not be acquired or destroyed.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use semrw::rwlock::Error;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// assert!(lock.destroy().is_ok());
    /// assert_eq!(lock.acquire_read(), Err(Error::NotInitialized));
    /// assert_eq!(lock.destroy(), Err(Error::NotInitialized));
    /// ```
    pub fn destroy(&self) -> Result<(), Error> {
        self.acquire_write()?;
        self.initialized.store(false, Release);
        let gate = self.gate.destroy();
        let reader_count_guard = self.reader_count_guard.destroy();
        let writer_barrier = self.writer_barrier.destroy();
        tracing::debug!(lock = ?self, "reader-writer lock destroyed");
        gate.and(reader_count_guard).and(writer_barrier)?;
        Ok(())
    }

    /// Acquires a read lock, blocking while a writer holds or waits for the lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the lock is not initialized, and
    /// [`Error::PrimitiveFailure`] if a semaphore fails, e.g., because the lock was destroyed
    /// while waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// assert!(lock.acquire_read().is_ok());
    /// assert_eq!(lock.readers(Relaxed), 1);
    /// assert!(lock.release_read().is_ok());
    /// ```
    pub fn acquire_read(&self) -> Result<(), Error> {
        self.check_initialized()?;

        // Passing through the gate only waits for the writer holding it, if any.
        self.gate.wait()?;
        self.gate.post()?;

        self.reader_count_guard.wait()?;
        let readers = self.reader_count.load(Relaxed) + 1;
        self.reader_count.store(readers, Relaxed);
        if readers == 1 {
            // The first reader locks writers out on behalf of every reader.
            if let Err(error) = self.writer_barrier.wait() {
                self.reader_count.store(readers - 1, Relaxed);
                self.release_reader_count_guard();
                return Err(error.into());
            }
        }
        self.mode.store(Mode::Read.to_u8(), Relaxed);
        self.reader_count_guard.post()?;
        Ok(())
    }

    /// Acquires the write lock, blocking until every reader and writer has released it.
    ///
    /// New readers are barred as soon as this call holds the gate, even while it is still
    /// waiting for existing readers to leave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the lock is not initialized, and
    /// [`Error::PrimitiveFailure`] if a semaphore fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use semrw::rwlock::Mode;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// assert!(lock.acquire_write().is_ok());
    /// assert_eq!(lock.mode(), Mode::Write);
    /// assert!(lock.release_write().is_ok());
    /// ```
    pub fn acquire_write(&self) -> Result<(), Error> {
        self.check_initialized()?;
        self.gate.wait()?;
        if let Err(error) = self.writer_barrier.wait() {
            if let Err(gate_error) = self.gate.post() {
                tracing::warn!(%gate_error, "failed to reopen the gate");
            }
            return Err(error.into());
        }
        self.mode.store(Mode::Write.to_u8(), Relaxed);
        Ok(())
    }

    /// Releases a read lock.
    ///
    /// The last reader to leave admits a waiting writer. If that fails, the reader count is
    /// restored so the lock is left as it was before the call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the lock is not initialized,
    /// [`Error::InvalidArgument`] if no read lock is held, and [`Error::PrimitiveFailure`] if a
    /// semaphore fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use semrw::rwlock::Error;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// assert!(lock.acquire_read().is_ok());
    /// assert!(lock.release_read().is_ok());
    /// assert_eq!(lock.release_read(), Err(Error::InvalidArgument));
    /// ```
    pub fn release_read(&self) -> Result<(), Error> {
        self.check_initialized()?;
        self.reader_count_guard.wait()?;
        let readers = self.reader_count.load(Relaxed);
        if readers == 0 {
            self.release_reader_count_guard();
            return Err(Error::InvalidArgument);
        }
        self.reader_count.store(readers - 1, Relaxed);
        if readers == 1 {
            if let Err(error) = self.writer_barrier.post() {
                self.reader_count.store(readers, Relaxed);
                self.release_reader_count_guard();
                tracing::warn!(%error, "failed to admit writers; reader count restored");
                return Err(error.into());
            }
        }
        self.mode.store(Mode::Read.to_u8(), Relaxed);
        self.reader_count_guard.post()?;
        Ok(())
    }

    /// Releases the write lock.
    ///
    /// The gate is only reopened if the writer barrier was released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the lock is not initialized, and
    /// [`Error::PrimitiveFailure`] if a semaphore fails, including when no write lock is held.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// assert!(lock.acquire_write().is_ok());
    /// assert!(lock.release_write().is_ok());
    /// assert!(lock.release_write().is_err());
    /// ```
    pub fn release_write(&self) -> Result<(), Error> {
        self.check_initialized()?;
        self.writer_barrier.post()?;
        self.gate.post()?;
        Ok(())
    }

    /// Acquires a read lock that is released when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`acquire_read`](Self::acquire_read).
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    /// use std::sync::atomic::Ordering::Relaxed;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// let guard = lock.read().unwrap();
    /// assert_eq!(lock.readers(Relaxed), 1);
    ///
    /// drop(guard);
    /// assert_eq!(lock.readers(Relaxed), 0);
    /// ```
    #[inline]
    pub fn read(&self) -> Result<ReadGuard<'_, S>, Error> {
        self.acquire_read()?;
        Ok(ReadGuard { lock: self })
    }

    /// Acquires the write lock that is released when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`acquire_write`](Self::acquire_write).
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::RwLock;
    ///
    /// let lock: RwLock = RwLock::new();
    ///
    /// let guard = lock.write().unwrap();
    /// drop(guard);
    ///
    /// assert!(lock.acquire_read().is_ok());
    /// ```
    #[inline]
    pub fn write(&self) -> Result<WriteGuard<'_, S>, Error> {
        self.acquire_write()?;
        Ok(WriteGuard { lock: self })
    }

    /// Returns [`Error::NotInitialized`] unless the lock is initialized.
    #[inline]
    fn check_initialized(&self) -> Result<(), Error> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Releases `reader_count_guard` on an error path.
    fn release_reader_count_guard(&self) {
        if let Err(error) = self.reader_count_guard.post() {
            tracing::warn!(%error, "failed to release the reader count guard");
        }
    }
}

impl<S: RawSemaphore + Default> Default for RwLock<S> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RawSemaphore> fmt::Debug for RwLock<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLock")
            .field("initialized", &self.initialized.load(Relaxed))
            .field("reader_count", &self.reader_count.load(Relaxed))
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl<S: RawSemaphore> Drop for ReadGuard<'_, S> {
    #[inline]
    fn drop(&mut self) {
        if let Err(error) = self.lock.release_read() {
            tracing::error!(%error, "failed to release a read lock");
        }
    }
}

impl<S: RawSemaphore> Drop for WriteGuard<'_, S> {
    #[inline]
    fn drop(&mut self) {
        if let Err(error) = self.lock.release_write() {
            tracing::error!(%error, "failed to release a write lock");
        }
    }
}
