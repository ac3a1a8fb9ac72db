// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Wait queues of parked channel peers.
//!
//! Each channel direction keeps one FIFO of waiters. A waiter is bound
//! either to a suspended task (through its selection state) or to a
//! blocked OS thread (through a condvar signal); both kinds share the
//! same queue in strict arrival order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Shared slot a value moves through exactly once: a parked sender keeps
/// its value here until the releaser takes it; a parked receiver keeps an
/// empty cell here for the releaser to fill.
pub(crate) type ValueCell<T> = Arc<Mutex<Option<T>>>;

pub(crate) fn value_cell<T>(value: Option<T>) -> ValueCell<T> {
    Arc::new(Mutex::new(value))
}

/// Target of selection-completion notifications — the waiting side's
/// selector state. Implementations decide whether a popped entry may
/// still complete and perform the post-delivery bookkeeping.
pub(crate) trait NotifyTarget: Send + Sync {
    /// A counterparty offers to complete the entry at `pos`. Called with
    /// the source channel lock held; the entry has already been popped.
    /// Returns whether the offer is accepted (value may be delivered).
    /// A rejected entry is simply discarded by the releaser.
    fn offer(&self, pos: usize) -> bool;

    /// Post-delivery bookkeeping for an accepted offer. Called after the
    /// source channel lock has been released; may take other channel
    /// locks one at a time to dequeue sibling entries.
    fn complete(&self, pos: usize);

    /// Whether entries of this target can still complete. Readiness
    /// checks skip targets that have already committed elsewhere.
    fn is_live(&self) -> bool;

    /// Timer expiry notification for targets armed with a deadline.
    fn timer_expired(&self);
}

/// Identity of a notify target, used to address entries in a queue.
pub(crate) fn target_addr(target: &Arc<dyn NotifyTarget>) -> usize {
    Arc::as_ptr(target) as *const () as usize
}

/// What a parked entry is bound to.
pub(crate) enum Binding {
    /// A suspended task, addressed through its selector at `pos`.
    Task {
        target: Arc<dyn NotifyTarget>,
        pos: usize,
    },
    /// A blocked OS thread.
    Thread(Arc<ThreadSignal>),
}

impl Binding {
    fn matches(&self, addr: usize, pos: usize) -> bool {
        match self {
            Binding::Task { target, pos: p } => *p == pos && target_addr(target) == addr,
            Binding::Thread(_) => false,
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Binding::Task { target, .. } => target.is_live(),
            Binding::Thread(_) => true,
        }
    }
}

/// One parked sender or receiver.
pub(crate) struct Waiter<T> {
    pub binding: Binding,
    pub cell: ValueCell<T>,
}

/// FIFO of parked peers for one channel direction.
pub(crate) struct WaitQueue<T> {
    ws: VecDeque<Waiter<T>>,
}

impl<T> WaitQueue<T> {
    pub fn new() -> Self {
        Self { ws: VecDeque::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ws.is_empty()
    }

    pub fn push(&mut self, w: Waiter<T>) {
        self.ws.push_back(w);
    }

    pub fn pop(&mut self) -> Option<Waiter<T>> {
        self.ws.pop_front()
    }

    /// Remove the entry addressed by (target, pos). Returns whether it
    /// was still queued; a miss means a releaser already popped it.
    pub fn remove(&mut self, addr: usize, pos: usize) -> bool {
        match self.ws.iter().position(|w| w.binding.matches(addr, pos)) {
            Some(i) => {
                self.ws.remove(i);
                true
            }
            None => false,
        }
    }

    /// Whether any queued waiter can still complete. Entries whose
    /// selection has already committed elsewhere are stale and do not
    /// count toward readiness.
    pub fn has_live(&self) -> bool {
        self.ws.iter().any(|w| w.binding.is_live())
    }
}

/// Condvar signal a blocking-thread operation waits on until released.
pub(crate) struct ThreadSignal {
    released: Mutex<bool>,
    cond: Condvar,
}

impl ThreadSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            released: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    /// Release the blocked thread. Called by the releaser after the
    /// value has moved through the waiter's cell.
    pub fn notify(&self) {
        let mut released = self.released.lock();
        *released = true;
        self.cond.notify_one();
    }

    /// Park the calling thread until released.
    pub fn wait(&self) {
        let mut released = self.released.lock();
        while !*released {
            self.cond.wait(&mut released);
        }
    }
}

/// Accepted offers whose `complete` calls are deferred until the channel
/// lock is released.
pub(crate) type Completions = Vec<(Arc<dyn NotifyTarget>, usize)>;

/// Run deferred completion notifications. Must be called with no channel
/// lock held.
pub(crate) fn run_completions(done: Completions) {
    for (target, pos) in done {
        target.complete(pos);
    }
}
