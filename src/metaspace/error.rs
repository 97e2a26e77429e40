use super::registry::NodeId;

/// Structural misuse of the counter [`Registry`](super::registry::Registry).
///
/// Counter underflow is not represented here: it is a contract violation
/// handled by the counters themselves (see [`counter`](super::counter)).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown counter node {0}")]
    UnknownNode(NodeId),
    #[error("counter node {id} still has {children} live children")]
    HasChildren { id: NodeId, children: usize },
    #[error("the root counter node cannot be destroyed")]
    RootNode,
    #[error("counter node {0} is being removed")]
    NotLive(NodeId),
    #[error("counter tree depth limit of {max_depth} exceeded")]
    DepthExceeded { max_depth: usize },
    #[error("counter registry is full ({max_nodes} nodes)")]
    CapacityExceeded { max_nodes: usize },
}
