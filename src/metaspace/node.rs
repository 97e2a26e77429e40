use std::fmt;

use super::counter_set::{CounterSet, Delta, Field, Growth, Slot};
use super::reader::{CounterReader, Usage};
use super::registry::NodeId;
use crate::sync::atomic::{AtomicU8, Ordering};
use crate::sync::{Arc, Weak};

/// Lifecycle of a counter node. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// Accepting mutations.
    Live = 0,
    /// Removal started; the node's contribution is being subtracted from
    /// its ancestors.
    Draining = 1,
    /// Detached from the registry. Counters keep their final values.
    Removed = 2,
}

impl NodeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => NodeState::Live,
            1 => NodeState::Draining,
            _ => NodeState::Removed,
        }
    }
}

/// A [`CounterSet`] placed in the arena tree.
///
/// Every node holds two sets. `own` counts what was allocated, reserved and
/// committed through this node itself; `counters` is the aggregate of `own`
/// and every live descendant. Headroom decisions are made against `own`
/// only, so a node never covers its allocation with space a child reserved.
///
/// Every mutation updates `own`, then the aggregate, then walks the parent
/// chain applying the same delta to each ancestor's aggregate with a plain
/// atomic add. Sibling updates therefore commute at shared ancestors without
/// any lock. Cost is O(depth), and depth is bounded by the registry
/// configuration.
///
/// A reader may see a leaf updated before its ancestors; ancestors converge
/// once the mutating call returns.
pub struct CounterNode {
    id: NodeId,
    parent: Option<Weak<CounterNode>>,
    parent_id: Option<NodeId>,
    depth: usize,
    state: AtomicU8,
    own: CounterSet,
    counters: CounterSet,
}

impl CounterNode {
    pub(crate) fn root(id: NodeId) -> Self {
        Self {
            id,
            parent: None,
            parent_id: None,
            depth: 0,
            state: AtomicU8::new(NodeState::Live as u8),
            own: CounterSet::new(),
            counters: CounterSet::new(),
        }
    }

    pub(crate) fn child(id: NodeId, parent: &Arc<CounterNode>) -> Self {
        Self {
            id,
            parent: Some(Arc::downgrade(parent)),
            parent_id: Some(parent.id),
            depth: parent.depth + 1,
            state: AtomicU8::new(NodeState::Live as u8),
            own: CounterSet::new(),
            counters: CounterSet::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.parent_id
    }

    /// Distance from the root; the root has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Aggregate usage of this node: its own allocations plus everything
    /// propagated up from its live descendants.
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.counters.usage()
    }

    /// Usage accounted through this node alone, excluding descendants.
    #[must_use]
    pub fn own_usage(&self) -> Usage {
        self.own.usage()
    }

    #[must_use]
    pub fn reader(self: &Arc<Self>) -> CounterReader {
        CounterReader::new(Arc::clone(self))
    }

    /// Applies a signed `amount` to `field` here and on every ancestor.
    ///
    /// Growth of `used` is preceded by growth of the in-flight claim and
    /// shrinkage of `used` is followed by shrinkage of the claim, at every
    /// level. The caller is responsible for keeping `used <= committed <=
    /// reserved`; [`allocate`](Self::allocate) does that automatically.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if a counter would drop below zero or the node
    /// is no longer live.
    pub fn apply_delta(&self, field: Field, amount: i64) {
        self.debug_assert_live();
        let delta = Delta::from(amount);
        match (field, delta) {
            (Field::Used, Delta::Grow(_)) => {
                self.apply_own(Slot::Claimed, delta);
                self.apply_own(Slot::Used, delta);
            }
            (Field::Used, Delta::Shrink(_)) => {
                self.apply_own(Slot::Used, delta);
                self.apply_own(Slot::Claimed, delta);
            }
            (field, delta) => self.apply_own(field.into(), delta),
        }
    }

    /// Accounts `bytes` of new metadata, growing reserved and committed space
    /// on this node when its own headroom does not cover the allocation.
    /// Space held by descendants is never counted as headroom.
    ///
    /// The aggregate chain receives the reserved growth, then the committed
    /// growth, then the used bytes, each propagated all the way to the root
    /// before the next starts.
    pub fn allocate(&self, bytes: u64) -> Growth {
        self.debug_assert_live();
        let claimed = self.own.claim(bytes);
        self.apply_chain(Slot::Claimed, Delta::Grow(bytes));

        let reserved = self.own.raise(Slot::Reserved, claimed);
        self.apply_chain(Slot::Reserved, Delta::Grow(reserved));

        let committed = self.own.raise(Slot::Committed, claimed);
        self.apply_chain(Slot::Committed, Delta::Grow(committed));

        self.apply_own(Slot::Used, Delta::Grow(bytes));

        Growth {
            reserved,
            committed,
        }
    }

    /// Drops `bytes` of metadata. Committed space stays with the node.
    pub fn release(&self, bytes: u64) {
        self.debug_assert_live();
        self.apply_own(Slot::Used, Delta::Shrink(bytes));
        self.apply_own(Slot::Claimed, Delta::Shrink(bytes));
    }

    pub fn reserve(&self, bytes: u64) {
        self.debug_assert_live();
        self.apply_own(Slot::Reserved, Delta::Grow(bytes));
    }

    /// # Panics
    ///
    /// Panics in debug builds if this node's own reservation would drop
    /// below its own committed space.
    pub fn unreserve(&self, bytes: u64) {
        self.debug_assert_live();
        self.own.unreserve(bytes);
        self.apply_chain(Slot::Reserved, Delta::Shrink(bytes));
    }

    /// # Panics
    ///
    /// Panics in debug builds if this node's own committed space would
    /// exceed its own reservation.
    pub fn commit(&self, bytes: u64) {
        self.debug_assert_live();
        self.own.commit(bytes);
        self.apply_chain(Slot::Committed, Delta::Grow(bytes));
    }

    /// # Panics
    ///
    /// Panics in debug builds if this node's own committed space would drop
    /// below its own used bytes.
    pub fn uncommit(&self, bytes: u64) {
        self.debug_assert_live();
        self.own.uncommit(bytes);
        self.apply_chain(Slot::Committed, Delta::Shrink(bytes));
    }

    pub(crate) fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// `Live -> Draining`. Returns false if removal already started.
    pub(crate) fn begin_draining(&self) -> bool {
        self.state
            .compare_exchange(
                NodeState::Live as u8,
                NodeState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Subtracts this node's residual contribution from every ancestor.
    ///
    /// Only leaves are drained, so the aggregate equals what this node put
    /// into every ancestor. Order is used, claim, committed, reserved, so
    /// each ancestor shrinks in the same order a release followed by an
    /// uncommit would produce. The node's own counters are left as they are.
    pub(crate) fn drain(&self) -> Usage {
        debug_assert_eq!(self.state(), NodeState::Draining);
        let residual = self.counters.usage();
        let claimed = self.counters.claimed();

        self.propagate(Slot::Used, Delta::Shrink(residual.used));
        self.propagate(Slot::Claimed, Delta::Shrink(claimed));
        self.propagate(Slot::Committed, Delta::Shrink(residual.committed));
        self.propagate(Slot::Reserved, Delta::Shrink(residual.reserved));

        tracing::trace!(node = %self.id, %residual, "drained counter node");
        residual
    }

    /// `Draining -> Removed`.
    pub(crate) fn finish_removal(&self) {
        let prev = self.state.swap(NodeState::Removed as u8, Ordering::AcqRel);
        debug_assert_eq!(NodeState::from_u8(prev), NodeState::Draining);
    }

    /// Applies `delta` to `own`, the aggregate and every ancestor.
    fn apply_own(&self, slot: Slot, delta: Delta) {
        if delta.is_zero() {
            return;
        }
        self.own.apply(slot, delta);
        self.apply_chain(slot, delta);
    }

    /// Applies `delta` to the aggregate and every ancestor.
    fn apply_chain(&self, slot: Slot, delta: Delta) {
        if delta.is_zero() {
            return;
        }
        self.counters.apply(slot, delta);
        self.propagate(slot, delta);
    }

    /// Applies `delta` to every ancestor, nearest first.
    fn propagate(&self, slot: Slot, delta: Delta) {
        if delta.is_zero() {
            return;
        }
        let mut next = self.parent.as_ref().and_then(Weak::upgrade);
        while let Some(node) = next {
            node.counters.apply(slot, delta);
            next = node.parent.as_ref().and_then(Weak::upgrade);
        }
    }

    #[inline]
    fn debug_assert_live(&self) {
        debug_assert_eq!(
            self.state(),
            NodeState::Live,
            "counter node {} mutated after removal started",
            self.id
        );
    }
}

impl fmt::Debug for CounterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterNode")
            .field("id", &self.id)
            .field("parent", &self.parent_id)
            .field("depth", &self.depth)
            .field("state", &self.state())
            .field("own", &self.own_usage())
            .field("usage", &self.usage())
            .finish()
    }
}
