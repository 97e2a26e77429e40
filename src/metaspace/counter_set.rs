use super::counter::AtomicCounter;
use super::reader::Usage;

/// One of the three externally visible quantities of a [`CounterSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Used,
    Committed,
    Reserved,
}

/// Internal addressing of every counter in a set, including `claimed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    Claimed,
    Used,
    Committed,
    Reserved,
}

impl From<Field> for Slot {
    fn from(field: Field) -> Self {
        match field {
            Field::Used => Slot::Used,
            Field::Committed => Slot::Committed,
            Field::Reserved => Slot::Reserved,
        }
    }
}

/// Signed change applied to one counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Delta {
    Grow(u64),
    Shrink(u64),
}

impl Delta {
    pub(crate) fn is_zero(self) -> bool {
        matches!(self, Delta::Grow(0) | Delta::Shrink(0))
    }
}

impl From<i64> for Delta {
    fn from(amount: i64) -> Self {
        if amount >= 0 {
            Delta::Grow(amount.unsigned_abs())
        } else {
            Delta::Shrink(amount.unsigned_abs())
        }
    }
}

/// How much an allocation had to grow the reserved and committed counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Growth {
    pub reserved: u64,
    pub committed: u64,
}

/// The used / committed / reserved triple for one scope.
///
/// The three quantities are independent atomics. Ordering between them is
/// kept by update order alone:
///
/// - growth touches `reserved`, then `committed`, then `used`;
/// - shrinkage touches `used`, then `committed`, then `reserved`;
/// - readers load `used`, then `committed`, then `reserved`.
///
/// With release writes and acquire reads this means a reader can never see
/// a grown `used` without the `committed` growth that preceded it. A reader
/// racing a shrinking `uncommit`/`unreserve` may briefly see the old `used`
/// next to the new `committed`; the window closes when that call returns.
///
/// `claimed` is the sum of `used` and the bytes of allocations still in
/// flight. Committed space is grown to cover `claimed`, not `used`, which
/// keeps concurrent allocations from each assuming the other's headroom.
#[derive(Debug, Default)]
pub struct CounterSet {
    claimed: AtomicCounter,
    used: AtomicCounter,
    committed: AtomicCounter,
    reserved: AtomicCounter,
}

impl CounterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accounts `bytes` of new live metadata, growing reserved and committed
    /// space first when the existing headroom does not cover it.
    pub fn allocate(&self, bytes: u64) -> Growth {
        let claimed = self.claim(bytes);
        let growth = self.cover(claimed);
        self.used.increment_by(bytes);
        growth
    }

    /// Drops `bytes` of live metadata. Committed space is kept as headroom
    /// until [`uncommit`](Self::uncommit) is called.
    pub fn release(&self, bytes: u64) {
        self.used.decrement_by(bytes);
        self.claimed.decrement_by(bytes);
    }

    pub fn reserve(&self, bytes: u64) {
        self.reserved.increment_by(bytes);
    }

    /// # Panics
    ///
    /// Panics in debug builds if the result would drop below `committed`.
    pub fn unreserve(&self, bytes: u64) {
        debug_assert!(
            self.reserved
                .get()
                .checked_sub(bytes)
                .is_some_and(|r| r >= self.committed.get()),
            "unreserve of {bytes} bytes would drop reserved below committed"
        );
        self.reserved.decrement_by(bytes);
    }

    /// # Panics
    ///
    /// Panics in debug builds if the new committed total exceeds `reserved`.
    pub fn commit(&self, bytes: u64) {
        debug_assert!(
            self.committed
                .get()
                .checked_add(bytes)
                .is_some_and(|c| c <= self.reserved.get()),
            "commit of {bytes} bytes exceeds reserved space"
        );
        self.committed.increment_by(bytes);
    }

    /// # Panics
    ///
    /// Panics in debug builds if the result would drop below `used`
    /// (including allocations in flight).
    pub fn uncommit(&self, bytes: u64) {
        debug_assert!(
            self.committed
                .get()
                .checked_sub(bytes)
                .is_some_and(|c| c >= self.claimed.get()),
            "uncommit of {bytes} bytes would drop committed below used"
        );
        self.committed.decrement_by(bytes);
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.used.get()
    }

    #[must_use]
    pub fn committed(&self) -> u64 {
        self.committed.get()
    }

    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.reserved.get()
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        let used = self.used.get();
        let committed = self.committed.get();
        let reserved = self.reserved.get();
        Usage {
            used,
            committed,
            reserved,
        }
    }

    #[must_use]
    pub fn is_invariant_satisfied(&self) -> bool {
        self.usage().is_invariant_satisfied()
    }

    /// Announces an allocation of `bytes` and returns the resulting claim.
    pub(crate) fn claim(&self, bytes: u64) -> u64 {
        self.claimed.increment_and_get(bytes)
    }

    pub(crate) fn claimed(&self) -> u64 {
        self.claimed.get()
    }

    /// Grows `reserved` and then `committed` to at least `claimed`.
    pub(crate) fn cover(&self, claimed: u64) -> Growth {
        let reserved = self.reserved.raise_to(claimed);
        let committed = self.committed.raise_to(claimed);
        Growth {
            reserved,
            committed,
        }
    }

    pub(crate) fn raise(&self, slot: Slot, target: u64) -> u64 {
        self.counter(slot).raise_to(target)
    }

    pub(crate) fn apply(&self, slot: Slot, delta: Delta) {
        let counter = self.counter(slot);
        match delta {
            Delta::Grow(n) => counter.increment_by(n),
            Delta::Shrink(n) => counter.decrement_by(n),
        }
    }

    fn counter(&self, slot: Slot) -> &AtomicCounter {
        match slot {
            Slot::Claimed => &self.claimed,
            Slot::Used => &self.used,
            Slot::Committed => &self.committed,
            Slot::Reserved => &self.reserved,
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::Arc;
    use crate::sync::barrier::Barrier;
    use crate::sync::thread;

    #[test]
    fn test_allocate_grows_headroom() {
        let set = CounterSet::new();
        let growth = set.allocate(100);
        assert_eq!(
            growth,
            Growth {
                reserved: 100,
                committed: 100
            }
        );
        assert_eq!(set.usage(), Usage::new(100, 100, 100));
        assert!(set.is_invariant_satisfied());
    }

    #[test]
    fn test_allocate_within_existing_headroom() {
        let set = CounterSet::new();
        set.reserve(4096);
        set.commit(1024);

        let growth = set.allocate(512);
        assert_eq!(growth, Growth::default());
        assert_eq!(set.usage(), Usage::new(512, 1024, 4096));

        // Crosses the committed boundary but stays inside the reservation.
        let growth = set.allocate(1024);
        assert_eq!(
            growth,
            Growth {
                reserved: 0,
                committed: 512
            }
        );
        assert_eq!(set.usage(), Usage::new(1536, 1536, 4096));
    }

    #[test]
    fn test_release_keeps_committed() {
        let set = CounterSet::new();
        set.allocate(300);
        set.release(200);
        assert_eq!(set.usage(), Usage::new(100, 300, 300));

        set.uncommit(200);
        assert_eq!(set.usage(), Usage::new(100, 100, 300));
        set.unreserve(200);
        assert_eq!(set.usage(), Usage::new(100, 100, 100));
        assert!(set.is_invariant_satisfied());
    }

    #[test]
    fn test_invariant_holds_between_calls() {
        let set = CounterSet::new();
        let mut live = Vec::new();
        for i in 1..=50u64 {
            set.allocate(i * 8);
            live.push(i * 8);
            assert!(set.is_invariant_satisfied());
            if i % 3 == 0 {
                let bytes = live.swap_remove(0);
                set.release(bytes);
                assert!(set.is_invariant_satisfied());
            }
        }
        assert_eq!(set.used(), live.iter().sum::<u64>());
    }

    #[test]
    fn test_apply_delta_to_slots() {
        let set = CounterSet::new();
        set.apply(Slot::Reserved, Delta::Grow(64));
        set.apply(Slot::Committed, Delta::from(32));
        set.apply(Slot::Committed, Delta::from(-16));
        assert_eq!(set.usage(), Usage::new(0, 16, 64));
        assert_eq!(Delta::from(-16), Delta::Shrink(16));
        assert!(Delta::from(0).is_zero());
    }

    #[test]
    fn test_concurrent_allocate_release_invariant() {
        let threads = 8;
        let set = Arc::new(CounterSet::new());
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let s = Arc::clone(&set);
                let b = Arc::clone(&barrier);
                thread::spawn(move || {
                    b.wait();
                    for i in 0..1_000u64 {
                        let bytes = 8 + (i + t as u64) % 64;
                        s.allocate(bytes);
                        // The allocating thread's own update is visible to it.
                        assert!(s.used() <= s.committed());
                        s.release(bytes);
                    }
                    s.allocate(100);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let usage = set.usage();
        assert_eq!(usage.used, 100 * threads as u64);
        assert!(usage.is_invariant_satisfied(), "{usage}");
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "would drop committed below used")]
    fn test_uncommit_below_used_panics() {
        let set = CounterSet::new();
        set.allocate(100);
        set.uncommit(1);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "exceeds reserved space")]
    fn test_commit_without_reservation_panics() {
        let set = CounterSet::new();
        set.commit(1);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_rejected_commit_leaves_committed_untouched() {
        let set = CounterSet::new();
        set.reserve(64);
        set.commit(32);
        let result = std::panic::catch_unwind(|| set.commit(64));
        assert!(result.is_err());
        assert_eq!(set.usage(), Usage::new(0, 32, 64));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "would drop reserved below committed")]
    fn test_unreserve_below_committed_panics() {
        let set = CounterSet::new();
        set.reserve(64);
        set.commit(64);
        set.unreserve(1);
    }
}
