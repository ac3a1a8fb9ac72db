// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task objects.
//!
//! A task is a boxed future driven by the worker pool, with an atomic
//! state tag. The waker moves Waiting tasks back to the ready queues;
//! a waker that fires while the task is still being polled flips
//! Running to Ready instead, which makes the worker's park transition
//! fail and the task re-run immediately.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use super::scheduler::Shared;

/// Task lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Queued, waiting to be polled.
    Ready = 0,
    /// Being polled by a worker.
    Running = 1,
    /// Parked on a channel or timer; in the waiting set.
    Waiting = 2,
    /// Finished.
    Complete = 3,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Waiting,
            _ => Self::Complete,
        }
    }
}

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The task object owned by the scheduler.
pub(crate) struct RawTask {
    pub(crate) id: u64,
    state: AtomicU8,
    future: Mutex<Option<BoxFuture>>,
    sched: Weak<Shared>,
}

impl RawTask {
    pub(crate) fn new(future: BoxFuture, sched: Weak<Shared>, id: u64) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(TaskState::Ready as u8),
            future: Mutex::new(Some(future)),
            sched,
        })
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn store_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Single-winner state transition.
    pub(crate) fn transition(&self, from: TaskState, to: TaskState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Run a task one step. Returns true when it completed.
    pub(crate) fn poll(task: &Arc<RawTask>) -> bool {
        let waker = task_waker(task.clone());
        let mut cx = Context::from_waker(&waker);

        let mut slot = task.future.lock();
        let Some(fut) = slot.as_mut() else {
            return true;
        };
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                *slot = None;
                true
            }
            Poll::Pending => false,
        }
    }
}

struct TaskWaker {
    task: Arc<RawTask>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        loop {
            match self.task.state() {
                TaskState::Waiting => {
                    if !self.task.transition(TaskState::Waiting, TaskState::Ready) {
                        continue;
                    }
                    if let Some(shared) = self.task.sched.upgrade() {
                        shared.resume(self.task.clone());
                    }
                    return;
                }
                TaskState::Running => {
                    // fired during poll(); the worker's Running→Waiting
                    // transition will fail and re-enqueue the task
                    if !self.task.transition(TaskState::Running, TaskState::Ready) {
                        continue;
                    }
                    return;
                }
                TaskState::Ready | TaskState::Complete => return,
            }
        }
    }
}

pub(crate) fn task_waker(task: Arc<RawTask>) -> Waker {
    Waker::from(Arc::new(TaskWaker { task }))
}
