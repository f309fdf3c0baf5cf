use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::thread;
use thiserror::Error;

/// Error type carried out of worker tasks and fold steps.
pub type TaskFault = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared pending-task queue drained by the worker threads.
struct TaskQueue<T> {
    pending: Mutex<VecDeque<T>>,
}

impl<T> TaskQueue<T> {
    fn new(tasks: Vec<T>) -> Self {
        Self {
            pending: Mutex::new(tasks.into()),
        }
    }

    fn pop(&self) -> Option<T> {
        self.pending.lock().unwrap().pop_front()
    }

    fn clear(&self) {
        self.pending.lock().unwrap().clear();
    }
}

/// Completion-order result channel feeding the single-threaded fold.
struct ResultQueue<R> {
    state: Mutex<VecDeque<Result<R, TaskFault>>>,
    cv: Condvar,
}

impl<R> ResultQueue<R> {
    fn new() -> Self {
        Self {
            state: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        }
    }

    fn push(&self, outcome: Result<R, TaskFault>) {
        self.state.lock().unwrap().push_back(outcome);
        self.cv.notify_one();
    }

    fn pop_blocking(&self) -> Result<R, TaskFault> {
        let mut guard = self.state.lock().unwrap();
        loop {
            if let Some(outcome) = guard.pop_front() {
                return outcome;
            }
            guard = self.cv.wait(guard).unwrap();
        }
    }
}

/// Dispatches independent task blocks to a worker pool and streams results
/// back in completion order.
///
/// Workers are stateless: each invocation receives one self-contained task
/// and returns one self-contained result bundle. All cross-task state lives
/// in the fold, which runs only on the calling thread. With a concurrency
/// of zero or one the pool degrades to a sequential in-process loop.
#[derive(Debug, Clone, Copy)]
pub struct TaskOrchestrator {
    concurrency: usize,
}

impl TaskOrchestrator {
    pub fn new(concurrency: usize) -> Self {
        Self { concurrency }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs `worker` over every task and folds each result into `state` as
    /// it arrives. Completion order is unspecified; the fold must be
    /// order-independent in its observable effect. The first task or fold
    /// fault aborts the whole run.
    pub fn map_reduce<T, R, S, W, F>(
        &self,
        tasks: Vec<T>,
        worker: W,
        mut state: S,
        mut fold: F,
    ) -> Result<S, OrchestratorError>
    where
        T: Send,
        R: Send,
        W: Fn(T) -> Result<R, TaskFault> + Sync,
        F: FnMut(&mut S, R) -> Result<(), TaskFault>,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(state);
        }
        if self.concurrency <= 1 || total == 1 {
            for task in tasks {
                let result = worker(task).map_err(OrchestratorError::task)?;
                fold(&mut state, result).map_err(OrchestratorError::fold)?;
            }
            return Ok(state);
        }

        let queue = TaskQueue::new(tasks);
        let results = ResultQueue::new();
        let workers = self.concurrency.min(total);
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while let Some(task) = queue.pop() {
                        let outcome = worker(task);
                        let faulted = outcome.is_err();
                        results.push(outcome);
                        if faulted {
                            break;
                        }
                    }
                });
            }
            let mut received = 0;
            while received < total {
                match results.pop_blocking() {
                    Ok(result) => {
                        if let Err(fault) = fold(&mut state, result) {
                            queue.clear();
                            return Err(OrchestratorError::fold(fault));
                        }
                        received += 1;
                    }
                    Err(fault) => {
                        queue.clear();
                        return Err(OrchestratorError::task(fault));
                    }
                }
            }
            Ok(())
        })?;
        Ok(state)
    }
}

/// Errors surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("worker task failed: {source}")]
    TaskFailed { source: TaskFault },
    #[error("result aggregation failed: {source}")]
    FoldFailed { source: TaskFault },
}

impl OrchestratorError {
    fn task(source: TaskFault) -> Self {
        Self::TaskFailed { source }
    }

    fn fold(source: TaskFault) -> Self {
        Self::FoldFailed { source }
    }
}
