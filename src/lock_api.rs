//! Implementations of locking traits from the [`lock_api`](https://crates.io/crates/lock_api) crate.

use std::sync::atomic::Ordering::Relaxed;

use crate::config::Config;

use super::Lock;

/// A mutual exclusion primitive for protecting shared data of type `T`.
///
/// # Examples
///
/// ```
/// use semrw::Mutex;
///
/// let mutex: Mutex<usize> = Mutex::new(0);
/// *mutex.lock() += 1;
/// assert_eq!(*mutex.lock(), 1);
/// ```
pub type Mutex<T> = lock_api::Mutex<Lock, T>;

/// An RAII implementation of a scoped mutex.
///
/// # Examples
///
/// ```
/// use semrw::{Mutex, MutexGuard};
///
/// let mutex: Mutex<usize> = Mutex::new(0);
/// let mut guard: MutexGuard<usize> = mutex.lock();
/// *guard += 1;
/// drop(guard);
///
/// assert_eq!(*mutex.try_lock().unwrap(), 1);
/// ```
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, Lock, T>;

unsafe impl<C: Config> lock_api::RawMutex for Lock<C> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        self.lock_sync();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        Lock::<C>::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.release_lock();
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Lock::<C>::is_locked(self, Relaxed)
    }
}

unsafe impl<C: Config> lock_api::RawMutexFair for Lock<C> {
    #[inline]
    unsafe fn unlock_fair(&self) {
        self.release_lock();
    }
}
