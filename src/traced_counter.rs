//! [`TracedCounter`] decorates [`AtomicCounter`] with misuse and rollover detection.

#![deny(unsafe_code)]

use std::fmt;
use std::panic::Location;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::Relaxed;

use lock_api::RawMutex;

use crate::diagnostic::{CounterFlags, Diagnostic, DiagnosticSink, Operation, TracingSink};
use crate::{AtomicCounter, Lock};

/// [`TracedCounter`] decorates [`AtomicCounter`] with misuse and rollover detection.
///
/// Every operation returns exactly what the [`AtomicCounter`] operation returns; detected
/// conditions are reported to the [`DiagnosticSink`] along with the caller location.
///
/// * Using the counter before [`init`](Self::init) reports [`Diagnostic::Uninitialized`].
/// * Initializing it twice with the same identity reports [`Diagnostic::DoubleInit`].
/// * Unless [`CounterFlags::IGNORE_HIGH_BIT`] is set, a write or an addition that flips the
///   high bit reports [`Diagnostic::SuspectedRollover`], and so does reading a value with the
///   high bit set if [`CounterFlags::WARN_ON_READ`] is set.
/// * Additions to a counter with an identity report [`Diagnostic::Trace`].
pub struct TracedCounter<R: RawMutex = Lock, D: DiagnosticSink = TracingSink> {
    counter: AtomicCounter<R>,
    /// [`Self::SIGNATURE`] once initialized.
    signature: u32,
    identity: Option<&'static str>,
    flags: AtomicU8,
    sink: D,
}

impl<R: RawMutex, D: DiagnosticSink> TracedCounter<R, D> {
    /// Mask of the bit that flips when a signed interpretation of the value rolls over.
    pub const HIGH_BIT: usize = 1_usize << (usize::BITS - 1);

    /// Marks an initialized counter.
    const SIGNATURE: u32 = u32::from_be_bytes(*b"ATOM");

    /// Creates an uninitialized [`TracedCounter`] reporting to `sink`.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::TracingSink;
    ///
    /// let counter: TracedCounter = TracedCounter::uninit(TracingSink);
    /// assert!(!counter.is_initialized());
    /// ```
    #[inline]
    #[must_use]
    pub fn uninit(sink: D) -> Self {
        Self {
            counter: AtomicCounter::new(0),
            signature: 0,
            identity: None,
            flags: AtomicU8::new(CounterFlags::NONE.bits()),
            sink,
        }
    }

    /// Creates a [`TracedCounter`] holding `value` reporting to `sink`.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::TracingSink;
    ///
    /// let counter: TracedCounter = TracedCounter::new(1, Some("connections"), TracingSink);
    /// assert!(counter.is_initialized());
    /// assert_eq!(counter.identity(), Some("connections"));
    /// assert_eq!(counter.read(), 1);
    /// ```
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn new(value: usize, identity: Option<&'static str>, sink: D) -> Self {
        let mut counter = Self::uninit(sink);
        counter.init(value, identity);
        counter
    }

    /// Initializes the counter with `value` and clears its flags.
    ///
    /// Reports [`Diagnostic::DoubleInit`] if it was already initialized with the same identity.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::{CounterFlags, TracingSink};
    ///
    /// let mut counter: TracedCounter = TracedCounter::uninit(TracingSink);
    ///
    /// counter.init(3, None);
    /// counter.set_flags(CounterFlags::IGNORE_HIGH_BIT);
    ///
    /// counter.init(4, None);
    /// assert_eq!(counter.flags(), CounterFlags::NONE);
    /// assert_eq!(counter.read(), 4);
    /// ```
    #[track_caller]
    pub fn init(&mut self, value: usize, identity: Option<&'static str>) {
        if self.is_initialized() {
            if let Some(identity) = identity.filter(|identity| self.identity == Some(*identity)) {
                self.sink.report(Diagnostic::DoubleInit {
                    identity,
                    location: Location::caller(),
                });
            }
        }
        self.flags = AtomicU8::new(CounterFlags::NONE.bits());
        self.signature = Self::SIGNATURE;
        self.identity = identity;
        self.counter = AtomicCounter::new(value);
    }

    /// Returns `true` if the counter has been initialized.
    #[inline]
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.signature == Self::SIGNATURE
    }

    /// Returns the identity given at initialization.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> Option<&'static str> {
        self.identity
    }

    /// Returns the current flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> CounterFlags {
        CounterFlags::from_bits_truncate(self.flags.load(Relaxed))
    }

    /// Replaces the flags.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::{CounterFlags, TracingSink};
    ///
    /// let counter: TracedCounter = TracedCounter::new(0, None, TracingSink);
    ///
    /// counter.set_flags(CounterFlags::IGNORE_HIGH_BIT);
    /// assert_eq!(counter.flags(), CounterFlags::IGNORE_HIGH_BIT);
    /// ```
    #[track_caller]
    pub fn set_flags(&self, flags: CounterFlags) {
        self.check_initialized(Operation::SetFlags, Location::caller());
        self.flags.store(flags.bits(), Relaxed);
    }

    /// Returns the current value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::TracingSink;
    ///
    /// let counter: TracedCounter = TracedCounter::new(9, None, TracingSink);
    /// assert_eq!(counter.read(), 9);
    /// ```
    #[track_caller]
    pub fn read(&self) -> usize {
        let location = Location::caller();
        self.check_initialized(Operation::Read, location);
        let value = self.counter.read();
        let flags = self.flags();
        if flags.contains(CounterFlags::WARN_ON_READ)
            && !flags.contains(CounterFlags::IGNORE_HIGH_BIT)
            && value & Self::HIGH_BIT != 0
        {
            self.sink.report(Diagnostic::SuspectedRollover {
                operation: Operation::Read,
                before: value,
                after: value,
                location,
            });
        }
        value
    }

    /// Replaces the value, returning the previous one.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::TracingSink;
    ///
    /// let counter: TracedCounter = TracedCounter::new(5, None, TracingSink);
    /// assert_eq!(counter.write(7), 5);
    /// ```
    #[track_caller]
    pub fn write(&self, value: usize) -> usize {
        let location = Location::caller();
        self.check_initialized(Operation::Write, location);
        let previous = self.counter.write(value);
        self.check_high_bit(Operation::Write, previous, value, location);
        previous
    }

    /// Adds `delta` to the value, returning the new value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::TracingSink;
    ///
    /// let counter: TracedCounter = TracedCounter::new(10, Some("hits"), TracingSink);
    /// assert_eq!(counter.add(5), 15);
    /// ```
    #[track_caller]
    pub fn add(&self, delta: usize) -> usize {
        let location = Location::caller();
        self.check_initialized(Operation::Add, location);
        let after = self.counter.add(delta);
        let before = after.wrapping_sub(delta);
        if let Some(identity) = self.identity {
            self.sink.report(Diagnostic::Trace {
                identity,
                before,
                delta,
                after,
                location,
            });
        }
        self.check_high_bit(Operation::Add, before, after, location);
        after
    }

    /// Applies a bitwise AND with `mask`, returning the previous value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::TracingSink;
    ///
    /// let counter: TracedCounter = TracedCounter::new(15, None, TracingSink);
    /// assert_eq!(counter.and(0x0F), 15);
    /// assert_eq!(counter.read(), 15);
    /// ```
    #[track_caller]
    pub fn and(&self, mask: usize) -> usize {
        self.check_initialized(Operation::And, Location::caller());
        self.counter.and(mask)
    }

    /// Applies a bitwise OR with `mask`, returning the previous value.
    ///
    /// # Examples
    ///
    /// ```
    /// use semrw::TracedCounter;
    /// use semrw::diagnostic::TracingSink;
    ///
    /// let counter: TracedCounter = TracedCounter::new(15, None, TracingSink);
    /// assert_eq!(counter.or(0x10), 15);
    /// assert_eq!(counter.read(), 31);
    /// ```
    #[track_caller]
    pub fn or(&self, mask: usize) -> usize {
        self.check_initialized(Operation::Or, Location::caller());
        self.counter.or(mask)
    }

    /// Returns a reference to the diagnostic sink.
    #[inline]
    pub fn sink(&self) -> &D {
        &self.sink
    }

    /// Consumes the counter, returning the value.
    #[inline]
    pub fn into_inner(self) -> usize {
        self.counter.into_inner()
    }

    /// Reports [`Diagnostic::Uninitialized`] if the counter is not initialized.
    fn check_initialized(&self, operation: Operation, location: &'static Location<'static>) {
        if !self.is_initialized() {
            self.sink.report(Diagnostic::Uninitialized {
                operation,
                location,
            });
        }
    }

    /// Reports [`Diagnostic::SuspectedRollover`] if the high bit flipped unexpectedly.
    fn check_high_bit(
        &self,
        operation: Operation,
        before: usize,
        after: usize,
        location: &'static Location<'static>,
    ) {
        if !self.flags().contains(CounterFlags::IGNORE_HIGH_BIT)
            && (before ^ after) & Self::HIGH_BIT != 0
        {
            self.sink.report(Diagnostic::SuspectedRollover {
                operation,
                before,
                after,
                location,
            });
        }
    }
}

impl<R: RawMutex, D: DiagnosticSink> fmt::Debug for TracedCounter<R, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedCounter")
            .field("counter", &self.counter)
            .field("initialized", &self.is_initialized())
            .field("identity", &self.identity)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}
