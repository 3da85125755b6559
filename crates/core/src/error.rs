use thiserror::Error;

use crate::node::NodeId;

/// Errors raised while wiring or firing graph nodes.
///
/// Arity and edge-type mismatches have no variant here: the typed
/// [`Graph::add_node`](crate::graph::Graph::add_node) surface rejects them at
/// compile time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The node was fired while some input slot was still unset, or a leaf
    /// was fired before `set_input` gave it a value.
    #[error("node {node} has uninitialized inputs")]
    InputsNotReady { node: NodeId },

    /// `set_input` targeted an id that is not a leaf producing the requested
    /// type.
    #[error("node {node} is not an input node of the requested type")]
    BadInputNode { node: NodeId },
}
