//! Executor contract used to run armed callbacks, plus the trivial
//! implementations the crate's own tests and benches rely on.
use std::collections::VecDeque;
use std::mem;

use spin::Mutex;

use crate::error::Rejected;

/// A move-only unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Lowest scheduling priority hint.
pub const LO_PRI: i8 = i8::MIN;
/// Default scheduling priority hint.
pub const MID_PRI: i8 = 0;
/// Highest scheduling priority hint.
pub const HI_PRI: i8 = i8::MAX;

/// Something capable of running tasks.
///
/// Dispatch uses [`add`] when the executor reports a single priority level
/// and [`add_with_priority`] otherwise. Returning `Err` signals that the
/// task was refused; the executor must have dropped it without running it,
/// now or later.
///
/// [`add`]: Executor::add
/// [`add_with_priority`]: Executor::add_with_priority
pub trait Executor: Send + Sync {
    /// Submit a task for execution.
    fn add(&self, task: Task) -> Result<(), Rejected>;

    /// Submit a task with a priority hint between [`LO_PRI`] and
    /// [`HI_PRI`]. Executors that do not distinguish priorities fall back
    /// to plain submission.
    fn add_with_priority(&self, task: Task, priority: i8) -> Result<(), Rejected> {
        let _ = priority;
        self.add(task)
    }

    /// Number of distinct priority levels this executor understands.
    fn num_priorities(&self) -> usize {
        1
    }
}

/// Runs each task immediately on the submitting thread.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn add(&self, task: Task) -> Result<(), Rejected> {
        task();
        Ok(())
    }
}

/// Queues tasks until [`run`] drains them on the calling thread. Intended
/// for tests that need to observe the window between submission and
/// execution.
///
/// [`run`]: ManualExecutor::run
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<VecDeque<Task>>,
}

impl ManualExecutor {
    pub fn new() -> ManualExecutor {
        ManualExecutor::default()
    }

    /// Run queued tasks until the queue is empty, including tasks enqueued
    /// by the tasks themselves. Returns how many ran.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: tasks may submit more
            // work.
            let task = self.queue.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Drop queued tasks without running them. Returns how many were
    /// discarded.
    pub fn clear(&self) -> usize {
        // Destructors run outside the lock.
        let discarded = mem::take(&mut *self.queue.lock());
        discarded.len()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Executor for ManualExecutor {
    fn add(&self, task: Task) -> Result<(), Rejected> {
        self.queue.lock().push_back(task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = Arc::clone(&hits);
        InlineExecutor
            .add(Box::new(move || {
                hits2.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_defers_until_run() {
        let executor = ManualExecutor::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            executor
                .add(Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        assert_eq!(executor.pending(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(executor.run(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(executor.pending(), 0);
    }

    #[test]
    fn test_manual_clear_discards() {
        let executor = ManualExecutor::new();
        executor.add(Box::new(|| panic!("must not run"))).unwrap();
        assert_eq!(executor.clear(), 1);
        assert_eq!(executor.run(), 0);
    }

    #[test]
    fn test_default_priority_submission_falls_back() {
        let executor = ManualExecutor::new();
        executor
            .add_with_priority(Box::new(|| {}), HI_PRI)
            .unwrap();
        assert_eq!(executor.run(), 1);
    }
}
