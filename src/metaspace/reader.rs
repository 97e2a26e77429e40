//! Read-only views for monitoring consumers.
//!
//! Nothing here mutates counters. Values are individually linearizable;
//! a [`Usage`] taken while writers are active is consistent per field and
//! may lag an ancestor behind its leaf by one in-flight propagation.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use super::node::{CounterNode, NodeState};
use super::registry::NodeId;
use crate::sync::Arc;

/// Point-in-time used / committed / reserved values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Usage {
    pub used: u64,
    pub committed: u64,
    pub reserved: u64,
}

impl Usage {
    #[must_use]
    pub const fn new(used: u64, committed: u64, reserved: u64) -> Self {
        Self {
            used,
            committed,
            reserved,
        }
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.used == 0 && self.committed == 0 && self.reserved == 0
    }

    /// `used <= committed <= reserved`.
    #[must_use]
    pub const fn is_invariant_satisfied(&self) -> bool {
        self.used <= self.committed && self.committed <= self.reserved
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            used: self.used + rhs.used,
            committed: self.committed + rhs.committed,
            reserved: self.reserved + rhs.reserved,
        }
    }
}

impl Sum for Usage {
    fn sum<I: Iterator<Item = Usage>>(iter: I) -> Usage {
        iter.fold(Usage::default(), Add::add)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "used: {}, committed: {}, reserved: {}",
            self.used, self.committed, self.reserved
        )
    }
}

/// Read-only handle on one counter node.
///
/// Holding a reader keeps the node's counters alive after the node has been
/// destroyed in the registry; the values are then frozen at whatever the
/// arena left behind.
#[derive(Clone, Debug)]
pub struct CounterReader {
    node: Arc<CounterNode>,
}

impl CounterReader {
    pub(crate) fn new(node: Arc<CounterNode>) -> Self {
        Self { node }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<NodeId> {
        self.node.parent_id()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.node.depth()
    }

    #[must_use]
    pub fn state(&self) -> NodeState {
        self.node.state()
    }

    #[must_use]
    pub fn used(&self) -> u64 {
        self.node.counters().used()
    }

    #[must_use]
    pub fn committed(&self) -> u64 {
        self.node.counters().committed()
    }

    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.node.counters().reserved()
    }

    #[must_use]
    pub fn usage(&self) -> Usage {
        self.node.usage()
    }

    #[must_use]
    pub fn is_invariant_satisfied(&self) -> bool {
        self.usage().is_invariant_satisfied()
    }
}

/// One line of a [`UsageReport`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportRow {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub depth: usize,
    pub usage: Usage,
}

impl From<&CounterReader> for ReportRow {
    fn from(reader: &CounterReader) -> Self {
        Self {
            id: reader.id(),
            parent: reader.parent_id(),
            depth: reader.depth(),
            usage: reader.usage(),
        }
    }
}

/// Per-node usage table as produced by [`Registry::report`](super::registry::Registry::report).
///
/// Rows are in registry slot order, so the root comes first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsageReport {
    pub rows: Vec<ReportRow>,
}

impl UsageReport {
    /// Usage of the root row, i.e. the process-wide totals.
    #[must_use]
    pub fn total(&self) -> Usage {
        self.rows
            .iter()
            .find(|row| row.parent.is_none())
            .map(|row| row.usage)
            .unwrap_or_default()
    }

    /// Sum over rows at `depth`. For a tree whose arenas all sit at the same
    /// depth this equals [`total`](Self::total) once writers are quiet.
    #[must_use]
    pub fn sum_at_depth(&self, depth: usize) -> Usage {
        self.rows
            .iter()
            .filter(|row| row.depth == depth)
            .map(|row| row.usage)
            .sum()
    }
}

impl FromIterator<CounterReader> for UsageReport {
    fn from_iter<I: IntoIterator<Item = CounterReader>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().map(|r| ReportRow::from(&r)).collect(),
        }
    }
}

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<12} {:<12} {:>5} {:>14} {:>14} {:>14}",
            "node", "parent", "depth", "used", "committed", "reserved"
        )?;
        for row in &self.rows {
            let parent = row.parent.map_or_else(|| "-".to_string(), |p| p.to_string());
            writeln!(
                f,
                "{:<12} {:<12} {:>5} {:>14} {:>14} {:>14}",
                row.id.to_string(),
                parent,
                row.depth,
                row.usage.used,
                row.usage.committed,
                row.usage.reserved
            )?;
        }
        write!(f, "total: {}", self.total())
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::metaspace::registry::Registry;

    #[test]
    fn test_usage_display_and_sum() {
        let a = Usage::new(10, 20, 30);
        let b = Usage::new(1, 2, 3);
        assert_eq!(a + b, Usage::new(11, 22, 33));
        assert_eq!([a, b].into_iter().sum::<Usage>(), Usage::new(11, 22, 33));
        assert_eq!(a.to_string(), "used: 10, committed: 20, reserved: 30");
        assert!(Usage::default().is_zero());
    }

    #[test]
    fn test_usage_invariant() {
        assert!(Usage::new(1, 1, 1).is_invariant_satisfied());
        assert!(!Usage::new(2, 1, 4).is_invariant_satisfied());
        assert!(!Usage::new(0, 5, 4).is_invariant_satisfied());
    }

    #[test]
    fn test_reader_tracks_node() {
        let registry = Registry::new();
        let id = registry.create_node(None).unwrap();
        let reader = registry.reader(id).unwrap();
        assert_eq!(reader.usage(), Usage::default());

        registry.node(id).unwrap().allocate(64);
        assert_eq!(reader.used(), 64);
        assert_eq!(reader.committed(), 64);
        assert_eq!(reader.reserved(), 64);
        assert_eq!(reader.depth(), 1);
        assert_eq!(reader.parent_id(), Some(registry.root()));
        assert!(reader.is_invariant_satisfied());
    }

    #[test]
    fn test_report_rows_and_total() {
        let registry = Registry::new();
        let a = registry.create_node(None).unwrap();
        let b = registry.create_node(None).unwrap();
        registry.node(a).unwrap().allocate(100);
        registry.node(b).unwrap().allocate(50);

        let report = registry.report();
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[0].id, registry.root());
        assert_eq!(report.total(), Usage::new(150, 150, 150));
        assert_eq!(report.sum_at_depth(1), report.total());

        let text = report.to_string();
        assert!(text.starts_with("node"));
        assert!(text.ends_with("total: used: 150, committed: 150, reserved: 150"));
    }
}
