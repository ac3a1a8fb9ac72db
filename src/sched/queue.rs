// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Ready queues.
//!
//! One FIFO per worker, each a mutex + condvar supporting blocking pop,
//! try-pop, try-push, and interrupt. Dispatch round-robins a preferred
//! queue and sweeps the others with try-push before falling back to a
//! blocking push; workers sweep with try-pop before blocking on their
//! own queue. After an interrupt a queue keeps handing out its
//! remaining tasks and then reports empty.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::task::RawTask;

struct QueueState {
    tasks: VecDeque<Arc<RawTask>>,
    interrupted: bool,
}

/// One worker's ready queue.
pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl TaskQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                interrupted: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn push(&self, task: Arc<RawTask>) {
        let mut st = self.state.lock();
        st.tasks.push_back(task);
        self.ready.notify_one();
    }

    fn try_push(&self, task: Arc<RawTask>) -> Result<(), Arc<RawTask>> {
        match self.state.try_lock() {
            Some(mut st) => {
                st.tasks.push_back(task);
                self.ready.notify_one();
                Ok(())
            }
            None => Err(task),
        }
    }

    /// Blocking pop. `None` only after an interrupt drained the queue.
    fn pop(&self) -> Option<Arc<RawTask>> {
        let mut st = self.state.lock();
        while st.tasks.is_empty() && !st.interrupted {
            self.ready.wait(&mut st);
        }
        st.tasks.pop_front()
    }

    fn try_pop(&self) -> Option<Arc<RawTask>> {
        match self.state.try_lock() {
            Some(mut st) => st.tasks.pop_front(),
            None => None,
        }
    }

    fn interrupt(&self) {
        let mut st = self.state.lock();
        st.interrupted = true;
        self.ready.notify_all();
    }
}

/// The scheduler's array of ready queues.
pub(crate) struct TaskQueues {
    qs: Vec<TaskQueue>,
    next: AtomicUsize,
}

impl TaskQueues {
    pub(crate) fn new(n: usize) -> Self {
        Self {
            qs: (0..n).map(|_| TaskQueue::new()).collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Dispatch a runnable task: round-robin preferred queue, try-push
    /// sweep across all queues, blocking push as last resort.
    pub(crate) fn push(&self, task: Arc<RawTask>) {
        let n = self.qs.len();
        let pref = self.next.fetch_add(1, Ordering::Relaxed) % n;
        let mut task = task;
        for i in 0..n {
            match self.qs[(pref + i) % n].try_push(task) {
                Ok(()) => return,
                Err(back) => task = back,
            }
        }
        self.qs[pref].push(task);
    }

    /// Take a runnable task: try-pop sweep starting at the worker's own
    /// queue, then a blocking pop on it.
    pub(crate) fn pop(&self, pref: usize) -> Option<Arc<RawTask>> {
        let n = self.qs.len();
        for i in 0..n {
            if let Some(task) = self.qs[(pref + i) % n].try_pop() {
                return Some(task);
            }
        }
        self.qs[pref].pop()
    }

    /// Interrupt every queue; workers drain and exit.
    pub(crate) fn interrupt(&self) {
        for q in &self.qs {
            q.interrupt();
        }
    }
}
