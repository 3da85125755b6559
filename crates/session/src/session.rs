//! The dependency-driven scheduler.
//!
//! `Session::run` primes the leaves synchronously on the caller's thread,
//! then lets completions cascade: every finished node walks its successors
//! and submits the ones whose input set just became complete to the worker
//! pool. The caller blocks until every node has completed, or until a node
//! computation fails.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use fluxion_core::graph::Graph;
use fluxion_core::node::{DynNode, NodeId};

use crate::delay_queue::DelayQueue;
use crate::lock;
use crate::pool::{panic_message, Job, WorkerPool};
use crate::SessionError;

/// Builds a [`Session`] from a finished [`Graph`].
pub struct SessionBuilder {
    graph: Graph,
    num_threads: usize,
}

impl SessionBuilder {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph,
            num_threads: 1,
        }
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn build(self) -> Result<Session, SessionError> {
        if self.num_threads == 0 {
            return Err(SessionError::Message(
                "thread count must be at least one".into(),
            ));
        }
        let pool = WorkerPool::new(self.num_threads).map_err(|err| {
            SessionError::Message(format!("failed to spawn worker threads: {err}").into())
        })?;
        Ok(Session {
            graph: self.graph,
            pool,
            finished: AtomicBool::new(false),
        })
    }
}

/// Evaluates a graph on a worker pool: every node fires exactly once, after
/// all of its inputs.
pub struct Session {
    graph: Graph,
    pool: WorkerPool,
    finished: AtomicBool,
}

impl Session {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Runs the whole graph, blocking until every node has produced a value.
    ///
    /// Supported at most once per session. Results are observed through the
    /// handles obtained while the graph was built.
    pub fn run(&self) -> Result<(), SessionError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(SessionError::Message("session has already run".into()));
        }

        assert_acyclic(&self.graph.nodes)?;

        log::debug!(
            "running graph: {} nodes on {} workers",
            self.graph.len(),
            self.pool.threads()
        );

        let ctx = Arc::new(RunCtx::new(&self.graph, self.pool.queue()));

        // Prime the leaves synchronously; their edge callbacks fill successor
        // slots before any completion is counted.
        for &leaf in &self.graph.inputs {
            ctx.claim(leaf);
            ctx.nodes[leaf].fire()?;
        }

        // Nodes with no producers at all (e.g. a fold nobody connected to)
        // have no predecessor to discover them.
        for id in 0..ctx.nodes.len() {
            ctx.maybe_schedule(id);
        }

        for &leaf in &self.graph.inputs {
            ctx.on_complete(leaf);
        }

        ctx.wait()
    }
}

/// Kahn's algorithm over the successor lists. A node connected to a fold it
/// transitively depends on would deadlock the run; refuse it up front.
fn assert_acyclic(nodes: &[Arc<dyn DynNode>]) -> Result<(), SessionError> {
    let mut indegree = vec![0usize; nodes.len()];
    for node in nodes.iter() {
        for succ in node.successors() {
            if let Some(degree) = indegree.get_mut(succ) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<NodeId> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &degree)| degree == 0)
        .map(|(id, _)| id)
        .collect();
    let mut visited = 0;
    while let Some(id) = queue.pop_front() {
        visited += 1;
        for succ in nodes[id].successors() {
            if let Some(degree) = indegree.get_mut(succ) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(succ);
                }
            }
        }
    }

    if visited == nodes.len() {
        Ok(())
    } else {
        Err(SessionError::Cycle)
    }
}

/// Shared per-run scheduler state.
struct RunCtx {
    nodes: Vec<Arc<dyn DynNode>>,
    queue: Arc<DelayQueue<Job>>,
    scheduled: Vec<AtomicBool>,
    completed: AtomicUsize,
    failure: Mutex<Option<SessionError>>,
    done: Condvar,
    done_lock: Mutex<()>,
}

impl RunCtx {
    fn new(graph: &Graph, queue: &Arc<DelayQueue<Job>>) -> Self {
        Self {
            nodes: graph.nodes.clone(),
            queue: Arc::clone(queue),
            scheduled: graph.nodes.iter().map(|_| AtomicBool::new(false)).collect(),
            completed: AtomicUsize::new(0),
            failure: Mutex::new(None),
            done: Condvar::new(),
            done_lock: Mutex::new(()),
        }
    }

    /// Claims the right to fire `id`; true for exactly one caller, which
    /// absorbs duplicate readiness notifications from concurrent
    /// predecessors.
    fn claim(&self, id: NodeId) -> bool {
        !self.scheduled[id].swap(true, Ordering::SeqCst)
    }

    fn maybe_schedule(self: &Arc<Self>, id: NodeId) {
        if self.nodes[id].is_ready() && self.claim(id) {
            log::trace!("scheduling node {id}");
            let ctx = Arc::clone(self);
            self.queue
                .push(Box::new(move || ctx.fire_and_complete(id)), Duration::ZERO);
        }
    }

    fn fire_and_complete(self: &Arc<Self>, id: NodeId) {
        match catch_unwind(AssertUnwindSafe(|| self.nodes[id].fire())) {
            Ok(Ok(())) => self.on_complete(id),
            Ok(Err(err)) => self.fail(err.into()),
            Err(panic) => self.fail(SessionError::Computation {
                node: id,
                message: panic_message(&*panic),
            }),
        }
    }

    /// Walks `id`'s successors, scheduling any whose input set just became
    /// complete, then counts `id` as completed.
    fn on_complete(self: &Arc<Self>, id: NodeId) {
        for child in self.nodes[id].successors() {
            self.maybe_schedule(child);
        }
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if completed == self.nodes.len() {
            let _guard = lock(&self.done_lock);
            self.done.notify_all();
        }
    }

    fn fail(&self, err: SessionError) {
        log::debug!("aborting run: {err}");
        let mut failure = lock(&self.failure);
        if failure.is_none() {
            *failure = Some(err);
        }
        drop(failure);
        let _guard = lock(&self.done_lock);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<(), SessionError> {
        let mut guard = lock(&self.done_lock);
        loop {
            if let Some(err) = lock(&self.failure).take() {
                return Err(err);
            }
            if self.completed.load(Ordering::SeqCst) == self.nodes.len() {
                return Ok(());
            }
            guard = self
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
