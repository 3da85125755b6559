//! Reduction over a variadic fan-in of producers.
//!
//! A fold node has one logical input (the accumulator) but any number of
//! connected producers of the element type. Readiness is counter-based:
//! every `connect` bumps the declared count, every delivery bumps the
//! arrived count, and the node is ready once the two are equal.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::node::{lock, Callback, DynNode, NodeId, Source};

/// When the fold function is applied to arriving values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldMode {
    /// Fold each value into the accumulator as it arrives. Arrival order is
    /// unspecified, so the fold must be commutative and associative.
    Eager,
    /// Buffer arrivals and fold them once, in arrival order, when the node
    /// fires.
    Buffered,
}

type FoldFn<O, T> = Arc<dyn Fn(O, T) -> O + Send + Sync>;

enum FoldState<O, T> {
    Eager(Mutex<O>),
    Buffered(Mutex<Vec<T>>),
}

pub(crate) struct FoldNode<O, T> {
    id: NodeId,
    fold: FoldFn<O, T>,
    init: O,
    state: FoldState<O, T>,
    /// Producers connected so far.
    declared: AtomicUsize,
    /// Producers that have delivered.
    arrived: AtomicUsize,
    result: OnceLock<O>,
    edges: Mutex<Vec<(NodeId, Callback<O>)>>,
}

impl<O, T> FoldNode<O, T>
where
    O: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(id: NodeId, mode: FoldMode, fold: FoldFn<O, T>, init: O) -> Self {
        let state = match mode {
            FoldMode::Eager => FoldState::Eager(Mutex::new(init.clone())),
            FoldMode::Buffered => FoldState::Buffered(Mutex::new(Vec::new())),
        };
        Self {
            id,
            fold,
            init,
            state,
            declared: AtomicUsize::new(0),
            arrived: AtomicUsize::new(0),
            result: OnceLock::new(),
            edges: Mutex::new(Vec::new()),
        }
    }

    /// Takes one arriving element into the accumulator or the buffer.
    fn absorb(&self, value: T) {
        match &self.state {
            FoldState::Eager(cell) => {
                let mut acc = lock(cell);
                let current = acc.clone();
                *acc = (self.fold)(current, value);
            }
            FoldState::Buffered(buffer) => lock(buffer).push(value),
        }
    }

    /// One increment per upstream firing, regardless of how many elements it
    /// carried.
    fn mark_arrival(&self) {
        self.arrived.fetch_add(1, Ordering::SeqCst);
    }

    fn subscribe(&self, consumer: NodeId, callback: Callback<O>) {
        lock(&self.edges).push((consumer, callback));
    }

    fn result(&self) -> Option<O> {
        self.result.get().cloned()
    }
}

impl<O, T> DynNode for FoldNode<O, T>
where
    O: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_ready(&self) -> bool {
        self.arrived.load(Ordering::SeqCst) == self.declared.load(Ordering::SeqCst)
    }

    fn fire(&self) -> Result<(), GraphError> {
        if !self.is_ready() {
            return Err(GraphError::InputsNotReady { node: self.id });
        }
        let value = match &self.state {
            FoldState::Eager(cell) => lock(cell).clone(),
            FoldState::Buffered(buffer) => {
                let elements = std::mem::take(&mut *lock(buffer));
                elements
                    .into_iter()
                    .fold(self.init.clone(), |acc, v| (self.fold)(acc, v))
            }
        };
        let result = self.result.get_or_init(|| value);
        for (_, callback) in lock(&self.edges).iter() {
            callback(result);
        }
        Ok(())
    }

    fn successors(&self) -> Vec<NodeId> {
        lock(&self.edges).iter().map(|(id, _)| *id).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Typed handle to a fold node reducing `T`s into an `O`.
pub struct FoldHandle<O, T> {
    pub(crate) id: NodeId,
    pub(crate) node: Arc<FoldNode<O, T>>,
}

impl<O, T> FoldHandle<O, T>
where
    O: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The folded value if the node has fired, `None` otherwise.
    pub fn result(&self) -> Option<O> {
        self.node.result()
    }

    /// Connects one producer of elements.
    pub fn connect<S: Source<Output = T>>(&self, src: &S) {
        self.node.declared.fetch_add(1, Ordering::SeqCst);
        let fold = Arc::clone(&self.node);
        src.subscribe(
            self.id,
            Box::new(move |value: &T| {
                fold.absorb(value.clone());
                fold.mark_arrival();
            }),
        );
    }

    /// Connects a producer of a whole vector of elements; each element is
    /// folded individually but the delivery counts as a single arrival.
    pub fn connect_vec<S: Source<Output = Vec<T>>>(&self, src: &S) {
        self.node.declared.fetch_add(1, Ordering::SeqCst);
        let fold = Arc::clone(&self.node);
        src.subscribe(
            self.id,
            Box::new(move |values: &Vec<T>| {
                for value in values {
                    fold.absorb(value.clone());
                }
                fold.mark_arrival();
            }),
        );
    }
}

impl<O, T> Clone for FoldHandle<O, T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: Arc::clone(&self.node),
        }
    }
}

impl<O, T> Source for FoldHandle<O, T>
where
    O: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    type Output = O;

    fn id(&self) -> NodeId {
        self.id
    }

    fn subscribe(&self, consumer: NodeId, callback: Callback<O>) {
        self.node.subscribe(consumer, callback);
    }
}

/// Appends a fold node to `graph`. Free-standing so `fold.rs` keeps the node
/// internals private to this module.
pub(crate) fn add_fold_node<O, T, F>(
    graph: &mut Graph,
    mode: FoldMode,
    fold: F,
    init: O,
) -> FoldHandle<O, T>
where
    O: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(O, T) -> O + Send + Sync + 'static,
{
    let id = graph.nodes.len();
    let node = Arc::new(FoldNode::new(id, mode, Arc::new(fold), init));
    graph.nodes.push(node.clone());
    FoldHandle { id, node }
}
