//! The node abstraction and the typed connection protocol.
//!
//! A node owns a fixed tuple of write-once input slots, a computation over
//! those slots and a list of outgoing edges. Firing a node evaluates the
//! computation, stores the result and pushes it through every edge callback
//! on the firing thread, which is how successor slots get populated before
//! the scheduler looks at their readiness.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::error::GraphError;
use crate::graph::Graph;

/// Dense node identifier: insertion order, also the index into
/// [`Graph::nodes`](crate::graph::Graph::nodes).
pub type NodeId = usize;

/// An edge handler: receives the produced value on the firing thread.
pub type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

pub(crate) type Computation<O, S> =
    Arc<dyn Fn(&S) -> Result<O, GraphError> + Send + Sync>;

/// Locks a mutex, recovering the guard if a panicking computation poisoned it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Type-erased view of a node: everything the scheduler needs.
pub trait DynNode: Send + Sync {
    fn id(&self) -> NodeId;

    /// True once every input slot has been written.
    fn is_ready(&self) -> bool;

    /// Evaluates the computation on the stored inputs, stores the result and
    /// invokes every edge callback in registration order, on the calling
    /// thread.
    fn fire(&self) -> Result<(), GraphError>;

    /// Ids of the nodes this node's edges feed into.
    fn successors(&self) -> Vec<NodeId>;

    fn as_any(&self) -> &dyn Any;
}

/// A producer of values. Implemented by every handle kind, so a node input
/// can come from a plain node, a leaf or a fold alike.
pub trait Source {
    /// The value type this node produces.
    type Output;

    fn id(&self) -> NodeId;

    /// Registers an edge: `callback` runs with the produced value on the
    /// thread that fired this node, and `consumer` is recorded as a
    /// successor.
    #[doc(hidden)]
    fn subscribe(&self, consumer: NodeId, callback: Callback<Self::Output>);
}

/// A write-once input slot.
pub(crate) struct Slot<T>(OnceLock<T>);

impl<T> Slot<T> {
    pub(crate) fn is_set(&self) -> bool {
        self.0.get().is_some()
    }

    pub(crate) fn get(&self) -> Option<&T> {
        self.0.get()
    }

    /// Each slot is written by exactly one edge per run; a second write
    /// indicates a wiring bug and is absorbed, keeping the first value.
    pub(crate) fn fill(&self, value: T) {
        if self.0.set(value).is_err() {
            log::warn!("input slot written twice; keeping the first value");
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self(OnceLock::new())
    }
}

/// A fixed tuple of input slots; one impl per supported arity.
pub(crate) trait SlotSet: Default + Send + Sync + 'static {
    fn ready(&self) -> bool;
}

impl SlotSet for () {
    fn ready(&self) -> bool {
        true
    }
}

macro_rules! impl_slot_set {
    ($($T:ident . $idx:tt),+) => {
        impl<$($T: Send + Sync + 'static),+> SlotSet for ($(Slot<$T>,)+) {
            fn ready(&self) -> bool {
                $(self.$idx.is_set())&&+
            }
        }
    };
}

impl_slot_set!(A.0);
impl_slot_set!(A.0, B.1);
impl_slot_set!(A.0, B.1, C.2);
impl_slot_set!(A.0, B.1, C.2, D.3);
impl_slot_set!(A.0, B.1, C.2, D.3, E.4);
impl_slot_set!(A.0, B.1, C.2, D.3, E.4, F.5);
impl_slot_set!(A.0, B.1, C.2, D.3, E.4, F.5, G.6);
impl_slot_set!(A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7);

/// The ordinary computation node: `k` typed input slots, one output.
///
/// Leaves are the `S = ()` case; they start without a computation and
/// `set_input` installs a constant.
pub(crate) struct InnerNode<O, S> {
    id: NodeId,
    computation: Mutex<Option<Computation<O, S>>>,
    pub(crate) slots: S,
    result: OnceLock<O>,
    edges: Mutex<Vec<(NodeId, Callback<O>)>>,
}

impl<O, S> InnerNode<O, S>
where
    O: Clone + Send + Sync + 'static,
    S: SlotSet,
{
    pub(crate) fn new(id: NodeId, computation: Option<Computation<O, S>>) -> Self {
        Self {
            id,
            computation: Mutex::new(computation),
            slots: S::default(),
            result: OnceLock::new(),
            edges: Mutex::new(Vec::new()),
        }
    }

    /// Replaces the stored computation. Allowed until the node fires.
    pub(crate) fn set_computation(&self, computation: Computation<O, S>) {
        *lock(&self.computation) = Some(computation);
    }

    pub(crate) fn subscribe(&self, consumer: NodeId, callback: Callback<O>) {
        lock(&self.edges).push((consumer, callback));
    }

    pub(crate) fn result(&self) -> Option<O> {
        self.result.get().cloned()
    }
}

impl<O, S> DynNode for InnerNode<O, S>
where
    O: Clone + Send + Sync + 'static,
    S: SlotSet,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn is_ready(&self) -> bool {
        self.slots.ready()
    }

    fn fire(&self) -> Result<(), GraphError> {
        if !self.slots.ready() {
            return Err(GraphError::InputsNotReady { node: self.id });
        }
        // A leaf that never received `set_input` has no computation yet.
        let computation = lock(&self.computation)
            .clone()
            .ok_or(GraphError::InputsNotReady { node: self.id })?;
        let value = computation(&self.slots)?;
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

pub(crate) trait ProducerNode<O>: DynNode {
    fn subscribe(&self, consumer: NodeId, callback: Callback<O>);
    fn result(&self) -> Option<O>;
}

impl<O, S> ProducerNode<O> for InnerNode<O, S>
where
    O: Clone + Send + Sync + 'static,
    S: SlotSet,
{
    fn subscribe(&self, consumer: NodeId, callback: Callback<O>) {
        InnerNode::subscribe(self, consumer, callback);
    }

    fn result(&self) -> Option<O> {
        InnerNode::result(self)
    }
}

/// Typed handle to a node producing `O`; input types are erased.
///
/// Handles stay valid after the graph has run, so results are read back
/// through them.
pub struct NodeHandle<O> {
    pub(crate) id: NodeId,
    pub(crate) node: Arc<dyn ProducerNode<O>>,
}

impl<O> NodeHandle<O> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's output if it has fired, `None` otherwise.
    pub fn result(&self) -> Option<O> {
        self.node.result()
    }
}

impl<O> Clone for NodeHandle<O> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            node: Arc::clone(&self.node),
        }
    }
}

impl<O> Source for NodeHandle<O> {
    type Output = O;

    fn id(&self) -> NodeId {
        self.id
    }

    fn subscribe(&self, consumer: NodeId, callback: Callback<O>) {
        self.node.subscribe(consumer, callback);
    }
}

/// A tuple of `&`-references to source handles, matched positionally against
/// the parameters of a node computation. Implemented for arities 1 through 8.
pub trait Dependencies<O, F> {
    #[doc(hidden)]
    fn materialize(self, graph: &mut Graph, func: F) -> NodeHandle<O>;
}

macro_rules! impl_dependencies {
    ($(($S:ident, $idx:tt)),+) => {
        impl<'a, Out, Fun, $($S,)+> Dependencies<Out, Fun> for ($(&'a $S,)+)
        where
            Out: Clone + Send + Sync + 'static,
            Fun: Fn($(&<$S as Source>::Output),+) -> Out + Send + Sync + 'static,
            $($S: Source,)+
            $(<$S as Source>::Output: Clone + Send + Sync + 'static,)+
        {
            fn materialize(self, graph: &mut Graph, func: Fun) -> NodeHandle<Out> {
                let id = graph.nodes.len();
                let computation: Computation<Out, ($(Slot<<$S as Source>::Output>,)+)> =
                    Arc::new(move |slots: &($(Slot<<$S as Source>::Output>,)+)| {
                        Ok(func($(
                            slots
                                .$idx
                                .get()
                                .ok_or(GraphError::InputsNotReady { node: id })?
                        ),+))
                    });
                let node = Arc::new(InnerNode::new(id, Some(computation)));
                $(
                    let target = Arc::clone(&node);
                    self.$idx.subscribe(
                        id,
                        Box::new(move |value: &<$S as Source>::Output| {
                            target.slots.$idx.fill(value.clone())
                        }),
                    );
                )+
                graph.nodes.push(node.clone());
                NodeHandle { id, node }
            }
        }
    };
}

impl_dependencies!((SA, 0));
impl_dependencies!((SA, 0), (SB, 1));
impl_dependencies!((SA, 0), (SB, 1), (SC, 2));
impl_dependencies!((SA, 0), (SB, 1), (SC, 2), (SD, 3));
impl_dependencies!((SA, 0), (SB, 1), (SC, 2), (SD, 3), (SE, 4));
impl_dependencies!((SA, 0), (SB, 1), (SC, 2), (SD, 3), (SE, 4), (SF, 5));
impl_dependencies!((SA, 0), (SB, 1), (SC, 2), (SD, 3), (SE, 4), (SF, 5), (SG, 6));
impl_dependencies!(
    (SA, 0),
    (SB, 1),
    (SC, 2),
    (SD, 3),
    (SE, 4),
    (SF, 5),
    (SG, 6),
    (SH, 7)
);
