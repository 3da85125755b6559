//! A fixed set of worker threads draining a [`DelayQueue`] of jobs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::delay_queue::DelayQueue;

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// How a repeatable job measures the gap between occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStrategy {
    /// `period` runs from the scheduled start of the previous occurrence.
    Periodic,
    /// `period` runs from the completion of the previous occurrence.
    Interval,
}

pub struct WorkerPool {
    queue: Arc<DelayQueue<Job>>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

/// Bound on a worker's blocking wait, so shutdown is observed promptly.
const WORKER_IDLE: Duration = Duration::from_millis(1);

impl WorkerPool {
    /// Spawns `threads` workers. Fails only if the OS refuses to spawn a
    /// thread; already-spawned workers are torn down again in that case.
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let queue = Arc::new(DelayQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let worker_queue = Arc::clone(&queue);
            let worker_running = Arc::clone(&running);
            let spawned = std::thread::Builder::new()
                .name(format!("fluxion-worker-{i}"))
                .spawn(move || worker_loop(&worker_queue, &worker_running));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    running.store(false, Ordering::Release);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(err);
                }
            }
        }
        Ok(Self {
            queue,
            running,
            workers,
        })
    }

    /// Enqueues a job for immediate execution.
    pub fn submit<J: FnOnce() + Send + 'static>(&self, job: J) {
        self.queue.push(Box::new(job), Duration::ZERO);
    }

    /// Enqueues a job that becomes eligible after `delay`.
    pub fn submit_delayed<J: FnOnce() + Send + 'static>(&self, job: J, delay: Duration) {
        self.queue.push(Box::new(job), delay);
    }

    /// Re-submits `job` forever with the given strategy. With
    /// `start_delayed == false` the first occurrence runs synchronously on
    /// the calling thread.
    pub fn submit_repeatable<J>(
        &self,
        job: J,
        period: Duration,
        strategy: RepeatStrategy,
        start_delayed: bool,
    ) where
        J: Fn() + Send + Sync + 'static,
    {
        repeat(&self.queue, Arc::new(job), period, strategy, start_delayed);
    }

    pub fn submit_periodic<J: Fn() + Send + Sync + 'static>(
        &self,
        job: J,
        period: Duration,
        start_delayed: bool,
    ) {
        self.submit_repeatable(job, period, RepeatStrategy::Periodic, start_delayed);
    }

    pub fn submit_interval<J: Fn() + Send + Sync + 'static>(
        &self,
        job: J,
        period: Duration,
        start_delayed: bool,
    ) {
        self.submit_repeatable(job, period, RepeatStrategy::Interval, start_delayed);
    }

    /// Jobs currently sitting in the queue; running jobs are not counted.
    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn queue(&self) -> &Arc<DelayQueue<Job>> {
        &self.queue
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread exited by panic");
            }
        }
    }
}

fn repeat(
    queue: &Arc<DelayQueue<Job>>,
    job: Arc<dyn Fn() + Send + Sync>,
    period: Duration,
    strategy: RepeatStrategy,
    delayed: bool,
) {
    let next: Job = {
        let queue = Arc::clone(queue);
        let job = Arc::clone(&job);
        Box::new(move || repeat(&queue, job, period, strategy, false))
    };
    match strategy {
        // The next occurrence is scheduled before the body runs, so the
        // period is measured from this occurrence's scheduled start.
        RepeatStrategy::Periodic => {
            queue.push(next, period);
            if !delayed {
                job();
            }
        }
        // The next occurrence is scheduled after the body returns.
        RepeatStrategy::Interval => {
            if !delayed {
                job();
            }
            queue.push(next, period);
        }
    }
}

fn worker_loop(queue: &DelayQueue<Job>, running: &AtomicBool) {
    while running.load(Ordering::Acquire) {
        if let Some(job) = queue.pop_wait(WORKER_IDLE) {
            // A crashing job must not take the worker down with it.
            if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                log::error!("worker job panicked: {}", panic_message(&*panic));
            }
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn runs_submitted_jobs() {
        let pool = WorkerPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        let deadline = Instant::now() + Duration::from_secs(2);
        while counter.load(Ordering::SeqCst) < 16 && Instant::now() < deadline {
            std::thread::sleep(MS);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn delayed_jobs_run_after_immediate_ones() {
        let pool = WorkerPool::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let slow = Arc::clone(&order);
        pool.submit_delayed(
            move || slow.lock().unwrap().push("delayed"),
            120 * MS,
        );
        std::thread::sleep(20 * MS);
        let fast = Arc::clone(&order);
        pool.submit(move || fast.lock().unwrap().push("immediate"));

        std::thread::sleep(200 * MS);
        assert_eq!(*order.lock().unwrap(), vec!["immediate", "delayed"]);
    }

    #[test]
    fn a_panicking_job_does_not_poison_the_pool() {
        let pool = WorkerPool::new(1).unwrap();
        pool.submit(|| panic!("boom"));
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        pool.submit(move || flag.store(true, Ordering::SeqCst));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !done.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(MS);
        }
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn undelayed_repeatable_runs_first_occurrence_synchronously() {
        let pool = WorkerPool::new(1).unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        pool.submit_periodic(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_secs(3600),
            false,
        );
        // The first occurrence ran on this thread, before submit returned.
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_jobs_keep_firing() {
        let pool = WorkerPool::new(1).unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        pool.submit_periodic(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            20 * MS,
            true,
        );
        std::thread::sleep(200 * MS);
        drop(pool);
        assert!(ticks.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn interval_gap_is_measured_from_completion() {
        let pool = WorkerPool::new(1).unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        // Body takes ~30ms, gap is 30ms: a full cycle is ~60ms.
        pool.submit_interval(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(30 * MS);
            },
            30 * MS,
            true,
        );
        std::thread::sleep(300 * MS);
        drop(pool);
        let observed = ticks.load(Ordering::SeqCst);
        assert!(observed >= 2, "expected at least 2 ticks, got {observed}");
        assert!(observed <= 6, "expected at most 6 ticks, got {observed}");
    }

    #[test]
    fn at_most_thread_count_jobs_run_concurrently() {
        let pool = WorkerPool::new(3).unwrap();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..24 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            pool.submit(move || {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(5 * MS);
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while pool.queued_jobs() > 0 {
            std::thread::sleep(MS);
        }
        std::thread::sleep(20 * MS);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn drop_joins_all_workers() {
        let pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.threads(), 4);
        drop(pool);
    }
}
