//! [`AtomicCounter`] is a machine-word counter whose every operation runs under a mutex.

#![deny(unsafe_code)]

use std::fmt;

use lock_api::RawMutex;

use crate::Lock;

/// [`AtomicCounter`] is a machine-word counter whose every operation runs under a mutex.
///
/// All operations are indivisible with respect to each other. Arithmetic wraps around as
/// unsigned machine arithmetic does; [`TracedCounter`](crate::TracedCounter) reports suspected
/// rollovers.
pub struct AtomicCounter<R: RawMutex = Lock> {
    value: lock_api::Mutex<R, usize>,
}

impl<R: RawMutex> AtomicCounter<R> {
    /// Creates a new [`AtomicCounter`] holding `value`.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::AtomicCounter;
    ///
    /// static COUNTER: AtomicCounter = AtomicCounter::new(7);
    /// assert_eq!(COUNTER.read(), 7);
    /// ```
    #[inline]
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self {
            value: lock_api::Mutex::const_new(R::INIT, value),
        }
    }

    /// Returns the current value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::AtomicCounter;
    ///
    /// let counter: AtomicCounter = AtomicCounter::new(3);
    /// assert_eq!(counter.read(), 3);
    /// ```
    #[inline]
    pub fn read(&self) -> usize {
        *self.value.lock()
    }

    /// Replaces the value, returning the previous one.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::AtomicCounter;
    ///
    /// let counter: AtomicCounter = AtomicCounter::new(0);
    /// assert_eq!(counter.write(5), 0);
    /// assert_eq!(counter.write(7), 5);
    /// ```
    #[inline]
    pub fn write(&self, value: usize) -> usize {
        std::mem::replace(&mut *self.value.lock(), value)
    }

    /// Adds `delta` to the value, returning the new value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::AtomicCounter;
    ///
    /// let counter: AtomicCounter = AtomicCounter::new(10);
    /// assert_eq!(counter.add(5), 15);
    /// assert_eq!(counter.add(usize::MAX), 14);
    /// ```
    #[inline]
    pub fn add(&self, delta: usize) -> usize {
        let mut value = self.value.lock();
        *value = value.wrapping_add(delta);
        *value
    }

    /// Applies a bitwise AND with `mask`, returning the previous value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::AtomicCounter;
    ///
    /// let counter: AtomicCounter = AtomicCounter::new(0b1110);
    /// assert_eq!(counter.and(0b0111), 0b1110);
    /// assert_eq!(counter.read(), 0b0110);
    /// ```
    #[inline]
    pub fn and(&self, mask: usize) -> usize {
        let mut value = self.value.lock();
        let previous = *value;
        *value &= mask;
        previous
    }

    /// Applies a bitwise OR with `mask`, returning the previous value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::AtomicCounter;
    ///
    /// let counter: AtomicCounter = AtomicCounter::new(0b0001);
    /// assert_eq!(counter.or(0b1000), 0b0001);
    /// assert_eq!(counter.read(), 0b1001);
    /// ```
    #[inline]
    pub fn or(&self, mask: usize) -> usize {
        let mut value = self.value.lock();
        let previous = *value;
        *value |= mask;
        previous
    }

    /// Consumes the counter, returning the value.
    #[inline]
    pub fn into_inner(self) -> usize {
        self.value.into_inner()
    }
}

impl<R: RawMutex> Default for AtomicCounter<R> {
    #[inline]
    fn default() -> Self {
        Self::new(0)
    }
}

impl<R: RawMutex> fmt::Debug for AtomicCounter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicCounter")
            .field("value", &self.value)
            .finish()
    }
}
