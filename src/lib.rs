#[cfg(not(target_has_atomic = "64"))]
compile_error!("metaspace-counters requires 64-bit atomics.");

pub(crate) mod sync;

pub mod metaspace;

// counters
pub use metaspace::counter::{
    AtomicCounter, IntAtomicCounter, IntCounter, MemRangeCounter, SizeAtomicCounter, SizeCounter,
};
pub use metaspace::counter_set::{CounterSet, Field, Growth};

// tree/registry
pub use metaspace::node::{CounterNode, NodeState};
pub use metaspace::registry::{NodeId, NodeSnapshot, Registry, RegistryConfig};

// readers
pub use metaspace::reader::{CounterReader, ReportRow, Usage, UsageReport};

// errors
pub use metaspace::error::RegistryError;
