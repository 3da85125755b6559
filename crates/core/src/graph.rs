use std::sync::Arc;

use crate::error::GraphError;
use crate::fold::{add_fold_node, FoldHandle, FoldMode};
use crate::node::{Dependencies, DynNode, InnerNode, NodeHandle, NodeId};

/// The computational graph: owns every node and hands out typed handles.
///
/// Plain nodes can only be connected to handles that already exist, so their
/// edges always point from a lower id to a higher one. Fold connections are
/// made after construction and may point anywhere; the session refuses to
/// run a graph where one of them closes a cycle.
#[derive(Default)]
pub struct Graph {
    /// Nodes indexed by id; ids are dense and equal insertion order.
    pub nodes: Vec<Arc<dyn DynNode>>,
    /// Ids of the leaf (input) nodes, in insertion order.
    pub inputs: Vec<NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a leaf node producing `T`. Its value is supplied later with
    /// [`set_input`](Self::set_input).
    pub fn add_input<T: Clone + Send + Sync + 'static>(&mut self) -> NodeHandle<T> {
        let id = self.nodes.len();
        let node: Arc<InnerNode<T, ()>> = Arc::new(InnerNode::new(id, None));
        self.nodes.push(node.clone());
        self.inputs.push(id);
        NodeHandle { id, node }
    }

    /// Sets (or replaces, until the run starts) the constant produced by the
    /// leaf `id`.
    pub fn set_input<T: Clone + Send + Sync + 'static>(
        &self,
        id: NodeId,
        value: T,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(id)
            .ok_or(GraphError::BadInputNode { node: id })?;
        // Only leaves have an empty slot tuple, so the downcast also proves
        // that `id` is an input node.
        let leaf = node
            .as_any()
            .downcast_ref::<InnerNode<T, ()>>()
            .ok_or(GraphError::BadInputNode { node: id })?;
        leaf.set_computation(Arc::new(move |_slots: &()| Ok(value.clone())));
        Ok(())
    }

    /// Appends a node computing `func` over the outputs of `deps`, a tuple of
    /// `&`-references to existing handles. Arity and edge types are checked
    /// at compile time.
    pub fn add_node<O, F, D>(&mut self, func: F, deps: D) -> NodeHandle<O>
    where
        D: Dependencies<O, F>,
    {
        deps.materialize(self, func)
    }

    /// Appends a fold node; producers are attached afterwards with
    /// [`FoldHandle::connect`] / [`FoldHandle::connect_vec`].
    pub fn add_fold<O, T, F>(&mut self, mode: FoldMode, fold: F, init: O) -> FoldHandle<O, T>
    where
        O: Clone + Send + Sync + 'static,
        T: Clone + Send + Sync + 'static,
        F: Fn(O, T) -> O + Send + Sync + 'static,
    {
        add_fold_node(self, mode, fold, init)
    }
}
