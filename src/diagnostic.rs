//! Diagnostics reported by [`TracedCounter`](crate::TracedCounter), and the sinks receiving them.
//!
//! Diagnostics are advisory: reporting one never changes the outcome of a counter operation.
//! A sink may escalate, e.g., panic in tests.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::panic::Location;
use std::sync::Arc;

/// Counter operations named in diagnostics.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// [`TracedCounter::init`](crate::TracedCounter::init).
    Init,
    /// [`TracedCounter::set_flags`](crate::TracedCounter::set_flags).
    SetFlags,
    /// [`TracedCounter::read`](crate::TracedCounter::read).
    Read,
    /// [`TracedCounter::write`](crate::TracedCounter::write).
    Write,
    /// [`TracedCounter::add`](crate::TracedCounter::add).
    Add,
    /// [`TracedCounter::and`](crate::TracedCounter::and).
    And,
    /// [`TracedCounter::or`](crate::TracedCounter::or).
    Or,
}

/// A condition detected by [`TracedCounter`](crate::TracedCounter).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Diagnostic {
    /// The counter was initialized twice with the same identity.
    DoubleInit {
        /// Identity of the counter.
        identity: &'static str,
        /// Caller of the second initialization.
        location: &'static Location<'static>,
    },
    /// The counter was used before it was initialized.
    Uninitialized {
        /// Offending operation.
        operation: Operation,
        /// Caller of the operation.
        location: &'static Location<'static>,
    },
    /// The high bit of the value changed, or is set, when it was not expected to be.
    SuspectedRollover {
        /// Operation that produced `after`.
        operation: Operation,
        /// Value before the operation.
        before: usize,
        /// Value after the operation.
        after: usize,
        /// Caller of the operation.
        location: &'static Location<'static>,
    },
    /// An addition to a counter with an identity.
    Trace {
        /// Identity of the counter.
        identity: &'static str,
        /// Value before the addition.
        before: usize,
        /// Added value.
        delta: usize,
        /// Value after the addition.
        after: usize,
        /// Caller of the addition.
        location: &'static Location<'static>,
    },
}

/// Receives diagnostics from a [`TracedCounter`](crate::TracedCounter).
pub trait DiagnosticSink {
    /// Reports a diagnostic.
    fn report(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to [`tracing`]: misuse and rollovers as warnings, additions as traces.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

/// Behavior flags of a [`TracedCounter`](crate::TracedCounter).
///
/// # Examples
///
/// ```
/// use semrw::diagnostic::CounterFlags;
///
/// let flags = CounterFlags::IGNORE_HIGH_BIT | CounterFlags::WARN_ON_READ;
/// assert!(flags.contains(CounterFlags::IGNORE_HIGH_BIT));
/// assert!(!CounterFlags::NONE.contains(CounterFlags::WARN_ON_READ));
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[repr(transparent)]
pub struct CounterFlags(u8);

impl Diagnostic {
    /// Returns the caller location that triggered the diagnostic.
    #[must_use]
    pub const fn location(&self) -> &'static Location<'static> {
        match *self {
            Diagnostic::DoubleInit { location, .. }
            | Diagnostic::Uninitialized { location, .. }
            | Diagnostic::SuspectedRollover { location, .. }
            | Diagnostic::Trace { location, .. } => location,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DoubleInit { identity, location } => {
                write!(f, "{location}: counter `{identity}` initialized twice")
            }
            Diagnostic::Uninitialized {
                operation,
                location,
            } => write!(f, "{location}: {operation:?} called before initialization"),
            Diagnostic::SuspectedRollover {
                operation,
                before,
                after,
                location,
            } => write!(
                f,
                "{location}: {operation:?} potentially rolled over ({before:#x} -> {after:#x})"
            ),
            Diagnostic::Trace {
                identity,
                before,
                delta,
                after,
                location,
            } => write!(f, "{location}: `{identity}` {before}+{delta}={after}"),
        }
    }
}

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::Trace { identity, .. } => {
                tracing::trace!(counter = identity, "{diagnostic}");
            }
            _ => tracing::warn!("{diagnostic}"),
        }
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &S {
    #[inline]
    fn report(&self, diagnostic: Diagnostic) {
        (**self).report(diagnostic);
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    #[inline]
    fn report(&self, diagnostic: Diagnostic) {
        (**self).report(diagnostic);
    }
}

impl CounterFlags {
    /// No flags.
    pub const NONE: Self = Self(0);

    /// Disables rollover detection.
    pub const IGNORE_HIGH_BIT: Self = Self(1 << 0);

    /// Reports values read with the high bit set.
    pub const WARN_ON_READ: Self = Self(1 << 1);

    /// Returns `true` if every flag in `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Creates flags from raw bits, dropping unknown bits.
    #[inline]
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & (Self::IGNORE_HIGH_BIT.0 | Self::WARN_ON_READ.0))
    }
}

impl BitOr for CounterFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CounterFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}
