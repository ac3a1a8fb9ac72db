// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker pool and the global scheduler.
//!
//! A fixed pool of workers drives tasks from the ready queues. A task
//! that reports it must suspend goes into the waiting set; channel and
//! timer notifications hand it back to the queues. A panic escaping a
//! task is fatal: every queue is interrupted and the workers drain and
//! exit. `shutdown` (also run on drop) interrupts and joins.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::queue::TaskQueues;
use super::task::{RawTask, TaskState};

/// State shared between workers, wakers, and submitters.
pub(crate) struct Shared {
    queues: TaskQueues,
    /// Parked tasks, looked up by id on resume.
    waiting: Mutex<Vec<Arc<RawTask>>>,
    next_id: AtomicU64,
}

impl Shared {
    fn install_waiting(&self, task: Arc<RawTask>) {
        self.waiting.lock().push(task);
    }

    fn uninstall_waiting(&self, id: u64) -> Option<Arc<RawTask>> {
        let mut waiting = self.waiting.lock();
        let i = waiting.iter().position(|t| t.id == id)?;
        Some(waiting.swap_remove(i))
    }

    /// Move a notified task from the waiting set back to the queues.
    pub(crate) fn resume(&self, task: Arc<RawTask>) {
        if let Some(task) = self.uninstall_waiting(task.id) {
            self.queues.push(task);
        }
    }
}

/// A pool of worker threads executing tasks.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Scheduler {
    /// Start a scheduler with `n` workers; 0 means one per hardware
    /// thread.
    pub fn new(n: usize) -> Self {
        let count = if n == 0 {
            thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
        } else {
            n
        };
        let shared = Arc::new(Shared {
            queues: TaskQueues::new(count),
            waiting: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });
        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let shared = shared.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("weft-worker-{}", index))
                    .spawn(move || worker_loop(index, &shared))
                    .expect("failed to spawn worker thread"),
            );
        }
        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Submit a new task.
    pub fn submit<F>(&self, f: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let task = RawTask::new(Box::pin(f), Arc::downgrade(&self.shared), id);
        self.shared.queues.push(task);
    }

    /// Interrupt the queues and join every worker. Ready tasks are
    /// drained first; parked tasks are dropped.
    pub fn shutdown(&self) {
        self.shared.queues.interrupt();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, shared: &Arc<Shared>) {
    tracing::debug!(worker = index, "worker started");
    while let Some(task) = shared.queues.pop(index) {
        run_task(task, shared);
    }
    tracing::debug!(worker = index, "worker stopped");
}

fn run_task(task: Arc<RawTask>, shared: &Arc<Shared>) {
    if task.state() == TaskState::Complete {
        return;
    }
    task.store_state(TaskState::Running);
    match catch_unwind(AssertUnwindSafe(|| RawTask::poll(&task))) {
        Err(_) => {
            tracing::error!(task = task.id, "task panicked; interrupting the scheduler");
            shared.queues.interrupt();
        }
        Ok(true) => task.store_state(TaskState::Complete),
        Ok(false) => {
            // install into the waiting set before publishing Waiting,
            // so a notifier that races in always finds the task there
            shared.install_waiting(task.clone());
            if !task.transition(TaskState::Running, TaskState::Waiting) {
                // the waker fired during the poll; take the task back
                if let Some(task) = shared.uninstall_waiting(task.id) {
                    shared.queues.push(task);
                }
            }
        }
    }
}

static GLOBAL: Lazy<Scheduler> = Lazy::new(|| Scheduler::new(0));

/// The process-wide scheduler, built on first use and living for the
/// rest of the process.
pub fn scheduler() -> &'static Scheduler {
    &GLOBAL
}

/// Launch a task on the global scheduler.
pub fn go<F>(f: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    scheduler().submit(f);
}

/// Launch a plain closure as a task on the global scheduler.
pub fn start<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    scheduler().submit(async move { f() });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::make_channel;

    #[test]
    fn runs_submitted_tasks() {
        let sched = Scheduler::new(2);
        let results = make_channel(16);
        for i in 0..10 {
            let tx = results.clone();
            sched.submit(async move {
                tx.send(i).await;
            });
        }
        let mut sum = 0;
        for _ in 0..10 {
            sum += results.sync_receive();
        }
        assert_eq!(sum, 45);
        sched.shutdown();
    }

    #[test]
    fn parked_tasks_resume() {
        let sched = Scheduler::new(2);
        let pipe = make_channel(0);
        let out = make_channel(1);
        let rx = pipe.clone();
        let tx = out.clone();
        sched.submit(async move {
            let v: i32 = rx.receive().await;
            tx.send(v * 2).await;
        });
        let ptx = pipe.clone();
        sched.submit(async move {
            ptx.send(21).await;
        });
        assert_eq!(out.sync_receive(), 42);
        sched.shutdown();
    }

    #[test]
    fn task_panic_interrupts_the_scheduler() {
        let sched = Scheduler::new(1);
        sched.submit(async { panic!("fatal") });
        // the fault drains the pool; shutdown joins the exiting worker
        sched.shutdown();
    }

    #[test]
    fn default_worker_count_starts() {
        let sched = Scheduler::new(0);
        sched.shutdown();
    }

    #[test]
    fn go_uses_the_global_scheduler() {
        let out = make_channel(1);
        let tx = out.clone();
        go(async move {
            tx.send(1).await;
        });
        assert_eq!(out.sync_receive(), 1);
    }

    #[test]
    fn start_runs_a_closure() {
        let out = make_channel(1);
        let tx = out.clone();
        start(move || tx.sync_send(5));
        assert_eq!(out.sync_receive(), 5);
    }
}
