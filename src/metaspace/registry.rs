use std::fmt;

use fixedbitset::FixedBitSet;

use super::error::RegistryError;
use super::node::{CounterNode, NodeState};
use super::reader::{CounterReader, Usage, UsageReport};
use crate::sync::{Arc, Mutex};

/// Opaque identifier of a counter node.
///
/// Identifiers are slot index plus generation: once a node is destroyed its
/// identifier stays invalid even after the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    fn slot(self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Registry limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Deepest level a node may sit at; the root is level 0. Default: 3
    /// (process total, loader group, arena, plus one spare level).
    pub max_depth: usize,

    /// Maximum number of live nodes, root included. Default: unbounded.
    pub max_nodes: usize,

    /// Slots to preallocate. Default: 64.
    pub initial_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_nodes: usize::MAX,
            initial_capacity: 64,
        }
    }
}

struct Entry {
    node: Arc<CounterNode>,
    children: usize,
}

/// Slot table. Only touched under the registry mutex.
struct Table {
    slots: Vec<Option<Entry>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    /// Tracks which slots hold a node.
    live_mask: FixedBitSet,
    len: usize,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            generations: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            live_mask: FixedBitSet::with_capacity(capacity),
            len: 0,
        }
    }

    fn get(&self, id: NodeId) -> Option<&Entry> {
        if self.generations.get(id.slot()) != Some(&id.generation) {
            return None;
        }
        self.slots[id.slot()].as_ref()
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Entry> {
        if self.generations.get(id.slot()) != Some(&id.generation) {
            return None;
        }
        self.slots[id.slot()].as_mut()
    }

    /// Picks the slot the next node will occupy. Reuses vacated slots LIFO.
    /// `None` once the slot index space is exhausted.
    fn vacant_id(&self) -> Option<NodeId> {
        if let Some(&index) = self.free_list.last() {
            return Some(NodeId::new(index, self.generations[index as usize]));
        }
        let index = u32::try_from(self.slots.len()).ok()?;
        Some(NodeId::new(index, 0))
    }

    fn occupy(&mut self, id: NodeId, node: Arc<CounterNode>) {
        let slot = id.slot();
        if slot == self.slots.len() {
            self.slots.push(None);
            self.generations.push(id.generation);
        } else {
            let popped = self.free_list.pop();
            debug_assert_eq!(popped, Some(id.index));
        }
        self.live_mask.grow(slot + 1);
        self.live_mask.insert(slot);
        self.slots[slot] = Some(Entry { node, children: 0 });
        self.len += 1;
    }

    /// Empties a slot. A slot whose generation is exhausted is retired
    /// instead of recycled, so no identifier is ever handed out twice.
    fn vacate(&mut self, id: NodeId) -> Option<Entry> {
        let slot = id.slot();
        let entry = self.slots[slot].take()?;
        self.live_mask.set(slot, false);
        self.len -= 1;
        match self.generations[slot].checked_add(1) {
            Some(generation) => {
                self.generations[slot] = generation;
                self.free_list.push(id.index);
            }
            None => tracing::debug!(slot, "retired counter slot after generation exhaustion"),
        }
        Some(entry)
    }

    fn live_nodes(&self) -> impl Iterator<Item = &Arc<CounterNode>> + '_ {
        self.live_mask
            .ones()
            .filter_map(|slot| self.slots[slot].as_ref())
            .map(|entry| &entry.node)
    }
}

/// Table of every counter node of one metaspace.
///
/// The registry owns its nodes: children hold only weak links to their
/// parent, and a node is kept alive by its registry slot (plus any
/// [`CounterReader`] or node handle a caller still holds).
///
/// A single mutex protects the identifier-to-node association. It is held
/// only for structural changes and never while counters are mutated;
/// [`destroy_node`](Self::destroy_node) drains the node's counters between
/// two short critical sections.
pub struct Registry {
    config: RegistryConfig,
    root: NodeId,
    table: Mutex<Table>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Creates a registry holding only the root node.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        let mut table = Table::with_capacity(config.initial_capacity.max(1));
        let root = NodeId::new(0, 0);
        table.occupy(root, Arc::new(CounterNode::root(root)));
        Self {
            config,
            root,
            table: Mutex::new(table),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Identifier of the process-wide total node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Creates a zeroed node below `parent`, or below the root when `None`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownNode`] if `parent` does not exist.
    /// - [`RegistryError::NotLive`] if `parent` is being removed.
    /// - [`RegistryError::DepthExceeded`] if the child would sit deeper
    ///   than [`RegistryConfig::max_depth`].
    /// - [`RegistryError::CapacityExceeded`] if the registry is full.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn create_node(&self, parent: Option<NodeId>) -> Result<NodeId, RegistryError> {
        let parent_id = parent.unwrap_or(self.root);
        let mut table = self.table.lock().unwrap();

        let parent_node = match table.get(parent_id) {
            Some(entry) => Arc::clone(&entry.node),
            None => return Err(RegistryError::UnknownNode(parent_id)),
        };
        if parent_node.state() != NodeState::Live {
            return Err(RegistryError::NotLive(parent_id));
        }
        if parent_node.depth() >= self.config.max_depth {
            return Err(RegistryError::DepthExceeded {
                max_depth: self.config.max_depth,
            });
        }
        let capacity_exceeded = RegistryError::CapacityExceeded {
            max_nodes: self.config.max_nodes,
        };
        if table.len >= self.config.max_nodes {
            return Err(capacity_exceeded);
        }

        let id = table.vacant_id().ok_or(capacity_exceeded)?;
        let node = Arc::new(CounterNode::child(id, &parent_node));
        let depth = node.depth();
        table.occupy(id, node);
        if let Some(entry) = table.get_mut(parent_id) {
            entry.children += 1;
        }
        drop(table);

        tracing::debug!(node = %id, parent = %parent_id, depth, "created counter node");
        Ok(id)
    }

    /// Removes a leaf node.
    ///
    /// The node is marked draining, its remaining usage is subtracted from
    /// every ancestor, and only then is it detached. Returns the residual
    /// usage the node still held; a non-zero residual is legal and means the
    /// arena was torn down while still holding memory.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::RootNode`] for the root.
    /// - [`RegistryError::UnknownNode`] if `id` does not exist.
    /// - [`RegistryError::HasChildren`] if the node still has live children.
    /// - [`RegistryError::NotLive`] if removal of `id` is already under way.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn destroy_node(&self, id: NodeId) -> Result<Usage, RegistryError> {
        if id == self.root {
            return Err(RegistryError::RootNode);
        }

        let node = {
            let table = self.table.lock().unwrap();
            let entry = table.get(id).ok_or(RegistryError::UnknownNode(id))?;
            if entry.children > 0 {
                return Err(RegistryError::HasChildren {
                    id,
                    children: entry.children,
                });
            }
            if !entry.node.begin_draining() {
                return Err(RegistryError::NotLive(id));
            }
            Arc::clone(&entry.node)
        };

        // The parent cannot be destroyed while this node is counted among
        // its children, so the whole ancestor chain stays reachable here.
        let residual = node.drain();

        {
            let mut table = self.table.lock().unwrap();
            let removed = table.vacate(id);
            debug_assert!(removed.is_some(), "draining node {id} vanished from the registry");
            if let Some(parent) = node.parent_id().and_then(|p| table.get_mut(p)) {
                parent.children -= 1;
            }
        }
        node.finish_removal();

        if residual.is_zero() {
            tracing::debug!(node = %id, "destroyed counter node");
        } else {
            tracing::debug!(node = %id, %residual, "destroyed counter node holding memory");
        }
        Ok(residual)
    }

    /// Handle used by the arena owner to account allocations.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownNode`] if `id` does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn node(&self, id: NodeId) -> Result<Arc<CounterNode>, RegistryError> {
        let table = self.table.lock().unwrap();
        table
            .get(id)
            .map(|entry| Arc::clone(&entry.node))
            .ok_or(RegistryError::UnknownNode(id))
    }

    /// Read-only handle for monitoring consumers.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownNode`] if `id` does not exist.
    pub fn reader(&self, id: NodeId) -> Result<CounterReader, RegistryError> {
        self.node(id).map(|node| node.reader())
    }

    /// Number of live children of `id`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownNode`] if `id` does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    pub fn child_count(&self, id: NodeId) -> Result<usize, RegistryError> {
        let table = self.table.lock().unwrap();
        table
            .get(id)
            .map(|entry| entry.children)
            .ok_or(RegistryError::UnknownNode(id))
    }

    /// Number of registered nodes, root included.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().unwrap().len
    }

    /// True when only the root is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Snapshot of all live nodes, in slot order (root first).
    ///
    /// The snapshot is taken under the registry lock and iterated without it.
    /// Nodes created afterwards are not included; nodes destroyed afterwards
    /// are still yielded with their final values.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn nodes(&self) -> NodeSnapshot {
        let table = self.table.lock().unwrap();
        let nodes: Vec<_> = table
            .live_nodes()
            .filter(|node| node.state() == NodeState::Live)
            .cloned()
            .collect();
        NodeSnapshot {
            nodes: nodes.into(),
            pos: 0,
        }
    }

    /// Calls `visitor` with a reader for every node of a fresh snapshot.
    pub fn for_each<F: FnMut(CounterReader)>(&self, visitor: F) {
        self.nodes().for_each(visitor);
    }

    /// Per-node usage table.
    #[must_use]
    pub fn report(&self) -> UsageReport {
        self.nodes().collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

/// Restartable iterator over a registry snapshot.
///
/// Cloning, or calling [`rewind`](Self::rewind), replays the same set of
/// nodes; counter values are read live at each step.
#[derive(Clone, Debug)]
pub struct NodeSnapshot {
    nodes: Arc<[Arc<CounterNode>]>,
    pos: usize,
}

impl NodeSnapshot {
    pub fn rewind(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for NodeSnapshot {
    type Item = CounterReader;

    fn next(&mut self) -> Option<CounterReader> {
        let node = self.nodes.get(self.pos)?;
        self.pos += 1;
        Some(node.reader())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.nodes.len() - self.pos;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for NodeSnapshot {}
