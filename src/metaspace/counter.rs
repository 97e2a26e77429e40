//! Counter primitives.
//!
//! Two families share one contract:
//!
//! - **Atomic counters** ([`AtomicCounter`], [`IntAtomicCounter`],
//!   [`SizeAtomicCounter`]) take `&self` and may be hit from any number of
//!   threads. Writes use `Release`, reads use `Acquire`, so a reader that
//!   observes one counter's update also observes every update the writer
//!   made to sibling counters before it. `CounterSet` relies on this.
//! - **Plain counters** ([`IntCounter`], [`SizeCounter`], [`MemRangeCounter`])
//!   take `&mut self` and are meant for single-owner bookkeeping.
//!
//! # Underflow
//!
//! Decrementing below zero is a caller bug. In debug builds the decrement
//! panics before the stored value changes, so a wrapped value is never
//! observable. In release builds the counter saturates at zero and an
//! `error` event is emitted; this keeps the process alive but hides the
//! accounting error that caused it, so treat any such event as a defect.

use std::fmt;

use crate::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

macro_rules! atomic_counter {
    ($(#[$meta:meta])* $name:ident, $int:ty, $atomic:ident) => {
        $(#[$meta])*
        pub struct $name($atomic);

        impl $name {
            #[cfg(not(loom))]
            #[must_use]
            pub const fn new() -> Self {
                Self($atomic::new(0))
            }

            #[cfg(loom)]
            #[must_use]
            pub fn new() -> Self {
                Self($atomic::new(0))
            }

            #[must_use]
            pub fn with_value(value: $int) -> Self {
                Self($atomic::new(value))
            }

            #[inline]
            #[must_use]
            pub fn get(&self) -> $int {
                self.0.load(Ordering::Acquire)
            }

            #[inline]
            pub fn increment(&self) {
                self.increment_by(1);
            }

            #[inline]
            pub fn increment_by(&self, n: $int) {
                self.0.fetch_add(n, Ordering::Release);
            }

            /// Adds `n` and returns the resulting value.
            #[inline]
            pub fn increment_and_get(&self, n: $int) -> $int {
                self.0.fetch_add(n, Ordering::Release).wrapping_add(n)
            }

            #[inline]
            pub fn decrement(&self) {
                self.decrement_by(1);
            }

            /// Subtracts `n`.
            ///
            /// # Panics
            ///
            /// Panics in debug builds if `n` exceeds the current value. The
            /// stored value is left untouched in that case.
            pub fn decrement_by(&self, n: $int) {
                let Err(current) =
                    self.0
                        .fetch_update(Ordering::Release, Ordering::Acquire, |v| v.checked_sub(n))
                else {
                    return;
                };
                debug_assert!(
                    false,
                    "{} underflow: decrement by {} exceeds current value {}",
                    stringify!($name),
                    n,
                    current,
                );
                tracing::error!(
                    counter = stringify!($name),
                    decrement = n,
                    current,
                    "counter underflow, saturating at zero"
                );
                drop(
                    self.0
                        .fetch_update(Ordering::Release, Ordering::Acquire, |v| Some(v.saturating_sub(n))),
                );
            }

            /// Raises the value to at least `target` and returns by how much
            /// it grew (zero when it already was at or above `target`).
            #[inline]
            pub fn raise_to(&self, target: $int) -> $int {
                let prev = self.0.fetch_max(target, Ordering::AcqRel);
                target.saturating_sub(prev)
            }

            pub fn reset(&self) {
                self.0.store(0, Ordering::Release);
            }

            /// Debug-build assertion that the counter holds `expected`.
            #[inline]
            #[track_caller]
            pub fn check(&self, expected: $int) {
                debug_assert_eq!(self.get(), expected, "{} mismatch", stringify!($name));
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.get()).finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.get())
            }
        }
    };
}

macro_rules! plain_counter {
    ($(#[$meta:meta])* $name:ident, $int:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($int);

        impl $name {
            #[must_use]
            pub const fn new() -> Self {
                Self(0)
            }

            #[inline]
            #[must_use]
            pub const fn get(&self) -> $int {
                self.0
            }

            #[inline]
            pub fn increment(&mut self) {
                self.increment_by(1);
            }

            #[inline]
            pub fn increment_by(&mut self, n: $int) {
                self.0 = self.0.wrapping_add(n);
            }

            #[inline]
            pub fn decrement(&mut self) {
                self.decrement_by(1);
            }

            /// Subtracts `n`.
            ///
            /// # Panics
            ///
            /// Panics in debug builds if `n` exceeds the current value.
            pub fn decrement_by(&mut self, n: $int) {
                if let Some(v) = self.0.checked_sub(n) {
                    self.0 = v;
                    return;
                }
                debug_assert!(
                    false,
                    "{} underflow: decrement by {} exceeds current value {}",
                    stringify!($name),
                    n,
                    self.0,
                );
                tracing::error!(
                    counter = stringify!($name),
                    decrement = n,
                    current = self.0,
                    "counter underflow, saturating at zero"
                );
                self.0 = 0;
            }

            pub fn reset(&mut self) {
                self.0 = 0;
            }

            #[inline]
            #[track_caller]
            pub fn check(&self, expected: $int) {
                debug_assert_eq!(self.0, expected, "{} mismatch", stringify!($name));
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

atomic_counter! {
    /// Thread-safe 64-bit counter for byte quantities.
    AtomicCounter, u64, AtomicU64
}

atomic_counter! {
    /// Thread-safe 32-bit counter, typically for chunk or range counts.
    IntAtomicCounter, u32, AtomicU32
}

atomic_counter! {
    /// Thread-safe pointer-width counter.
    SizeAtomicCounter, usize, AtomicUsize
}

plain_counter! {
    /// Single-owner 32-bit counter.
    IntCounter, u32
}

plain_counter! {
    /// Single-owner pointer-width counter.
    SizeCounter, usize
}

/// Counts memory ranges and their combined size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemRangeCounter {
    count: IntCounter,
    total_size: SizeCounter,
}

impl MemRangeCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: IntCounter::new(),
            total_size: SizeCounter::new(),
        }
    }

    /// Records one range of `bytes`.
    pub fn add(&mut self, bytes: usize) {
        self.count.increment();
        self.total_size.increment_by(bytes);
    }

    /// Forgets one range of `bytes`.
    pub fn sub(&mut self, bytes: usize) {
        self.count.decrement();
        self.total_size.decrement_by(bytes);
    }

    /// Merges the ranges counted by `other` into `self`.
    pub fn add_from(&mut self, other: &MemRangeCounter) {
        self.count.increment_by(other.count());
        self.total_size.increment_by(other.total_size());
    }

    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count.get()
    }

    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.total_size.get()
    }

    pub fn reset(&mut self) {
        self.count.reset();
        self.total_size.reset();
    }

    #[track_caller]
    pub fn check(&self, expected_count: u32, expected_size: usize) {
        self.count.check(expected_count);
        self.total_size.check(expected_size);
    }
}

impl fmt::Display for MemRangeCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ranges, {} bytes", self.count, self.total_size)
    }
}
