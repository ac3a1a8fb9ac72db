// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Multi-way selection over channel operations.
//!
//! `select` commits exactly one operation out of a set of candidate
//! sends/receives on distinct channels. All involved channels are locked
//! in one canonical (address) order, which precludes deadlock between
//! concurrent selections sharing channels. Among operations that are
//! ready at once the winner is picked uniformly at random; otherwise
//! every operation is parked and the first counterparty to fire one of
//! them wins.
//!
//! The completion handshake runs through [`Selection`]: a releaser that
//! pops a parked entry offers its position under the selection's own
//! mutex — first offer wins — and the winner's releaser then dequeues
//! the sibling entries with single-channel lock acquisitions. Every
//! entry removal decrements a pending count; whoever reaches zero
//! resumes the task, so all entries are off all queues before the task
//! runs again.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::channel::{chan_addr, ChanState, RawChannel};
use crate::timer::{self, AlarmId};
use crate::waitq::{run_completions, Binding, Completions, NotifyTarget, ValueCell};

/// Winner position reported when a selection's timer fires first.
pub(crate) const TIMEOUT_POS: usize = usize::MAX;
/// Winner position recorded when a parked operation future is dropped.
pub(crate) const CANCEL_POS: usize = usize::MAX - 1;

/// Direction of a channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Send,
    Receive,
}

/// One candidate operation in a selection: a direction, a channel, and
/// the cell its value moves through.
pub struct ChannelOp<T: Send + 'static> {
    pub(crate) core: Arc<RawChannel<T>>,
    pub(crate) kind: OpKind,
    pub(crate) cell: ValueCell<T>,
}

impl<T: Send + 'static> ChannelOp<T> {
    pub(crate) fn new(core: Arc<RawChannel<T>>, kind: OpKind, cell: ValueCell<T>) -> Self {
        Self { core, kind, cell }
    }

    /// Take the operation's value: the received value after a winning
    /// receive, or the unsent value after a losing send.
    pub fn take_value(&mut self) -> Option<T> {
        self.cell.lock().take()
    }

    pub(crate) fn chan_id(&self) -> usize {
        chan_addr(&self.core)
    }

    /// Would complete without parking, given the channel state.
    pub(crate) fn is_ready_in(&self, st: &ChanState<T>) -> bool {
        match self.kind {
            OpKind::Send => st.is_send_ready(),
            OpKind::Receive => st.is_receive_ready(),
        }
    }

    /// Perform the ready completion under the channel lock. Can fall
    /// through when readiness rested on a waiter that went stale.
    pub(crate) fn execute_in(&self, st: &mut ChanState<T>, done: &mut Completions) -> bool {
        match self.kind {
            OpKind::Send => {
                let value = self
                    .cell
                    .lock()
                    .take()
                    .expect("send operation without a value");
                match st.send_value(value, done) {
                    Ok(()) => true,
                    Err(value) => {
                        *self.cell.lock() = Some(value);
                        false
                    }
                }
            }
            OpKind::Receive => match st.receive_value(done) {
                Some(value) => {
                    *self.cell.lock() = Some(value);
                    true
                }
                None => false,
            },
        }
    }

    /// Park this operation on its channel, tagged with the selection
    /// and its position in the caller's array.
    pub(crate) fn enqueue_in(
        &self,
        st: &mut ChanState<T>,
        target: Arc<dyn NotifyTarget>,
        pos: usize,
    ) {
        match self.kind {
            OpKind::Send => st.enqueue_sender(Binding::Task { target, pos }, self.cell.clone()),
            OpKind::Receive => {
                st.enqueue_receiver(Binding::Task { target, pos }, self.cell.clone())
            }
        }
    }

    pub(crate) fn to_enqueued(&self, pos: usize) -> EnqueuedOp {
        EnqueuedOp {
            chan: self.core.clone(),
            kind: self.kind,
            pos,
        }
    }
}

/// Type-erased handle to a channel, good for dequeuing one entry under
/// that channel's own lock.
pub(crate) trait ChanCleanup: Send + Sync {
    fn dequeue(&self, kind: OpKind, addr: usize, pos: usize) -> bool;
}

impl<T: Send + 'static> ChanCleanup for RawChannel<T> {
    fn dequeue(&self, kind: OpKind, addr: usize, pos: usize) -> bool {
        let mut st = self.state.lock();
        match kind {
            OpKind::Send => st.dequeue_sender(addr, pos),
            OpKind::Receive => st.dequeue_receiver(addr, pos),
        }
    }
}

/// A still-parked operation of a selection.
pub(crate) struct EnqueuedOp {
    pub(crate) chan: Arc<dyn ChanCleanup>,
    pub(crate) kind: OpKind,
    pub(crate) pos: usize,
}

struct SelState {
    winner: Option<usize>,
    /// Entries still sitting on some channel's wait queue.
    pending: usize,
    enqueued: Vec<EnqueuedOp>,
    waker: Option<Waker>,
    alarm: Option<AlarmId>,
}

/// The per-selection substate of a waiting task. Its mutex is a leaf in
/// the lock order: it is taken while a channel lock is held (`offer`),
/// but no channel lock is ever taken while holding it.
pub(crate) struct Selection {
    state: Mutex<SelState>,
}

impl Selection {
    pub(crate) fn new(ops: Vec<EnqueuedOp>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SelState {
                winner: None,
                pending: ops.len(),
                enqueued: ops,
                waker: None,
                alarm: None,
            }),
        })
    }

    fn addr(&self) -> usize {
        self as *const Self as *const () as usize
    }

    pub(crate) fn set_waker(&self, waker: &Waker) {
        self.state.lock().waker = Some(waker.clone());
    }

    /// Attach a timer armed for this selection; cancels it right away
    /// when the selection already resolved in the meantime.
    pub(crate) fn set_alarm(&self, id: AlarmId) {
        let resolved = {
            let mut s = self.state.lock();
            if s.winner.is_some() {
                true
            } else {
                s.alarm = Some(id);
                false
            }
        };
        if resolved {
            timer::service().cancel(id);
        }
    }

    /// Resolution check for the owning future. Ready only once a winner
    /// is recorded and every entry is off its queue.
    pub(crate) fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<usize> {
        let (result, alarm) = {
            let mut s = self.state.lock();
            match s.winner {
                Some(winner) if s.pending == 0 => (Poll::Ready(winner), s.alarm.take()),
                _ => {
                    s.waker = Some(cx.waker().clone());
                    (Poll::Pending, None)
                }
            }
        };
        if let Some(id) = alarm {
            timer::service().cancel(id);
        }
        result
    }

    /// Withdraw a never-resolved selection: dropped operation futures
    /// must not leave entries behind on any queue.
    pub(crate) fn cancel(&self) {
        let (losers, alarm) = {
            let mut s = self.state.lock();
            let alarm = s.alarm.take();
            s.waker = None;
            if s.winner.is_some() {
                (Vec::new(), alarm)
            } else {
                s.winner = Some(CANCEL_POS);
                (std::mem::take(&mut s.enqueued), alarm)
            }
        };
        let mut removed = 0;
        for e in &losers {
            if e.chan.dequeue(e.kind, self.addr(), e.pos) {
                removed += 1;
            }
        }
        if removed > 0 {
            self.state.lock().pending -= removed;
        }
        if let Some(id) = alarm {
            timer::service().cancel(id);
        }
    }
}

impl NotifyTarget for Selection {
    fn offer(&self, pos: usize) -> bool {
        let mut s = self.state.lock();
        // the releaser has popped this entry whatever the outcome
        s.pending -= 1;
        s.enqueued.retain(|e| e.pos != pos);
        if s.winner.is_none() {
            s.winner = Some(pos);
            true
        } else {
            // lost the race; this removal may be the last one standing
            if s.pending == 0 {
                if let Some(w) = s.waker.take() {
                    drop(s);
                    w.wake();
                }
            }
            false
        }
    }

    fn complete(&self, pos: usize) {
        let losers = {
            let mut s = self.state.lock();
            if s.winner != Some(pos) {
                return;
            }
            std::mem::take(&mut s.enqueued)
        };
        let mut removed = 0;
        for e in &losers {
            if e.chan.dequeue(e.kind, self.addr(), e.pos) {
                removed += 1;
            }
        }
        let (wake, alarm) = {
            let mut s = self.state.lock();
            s.pending -= removed;
            if s.pending == 0 {
                (s.waker.take(), s.alarm.take())
            } else {
                (None, None)
            }
        };
        if let Some(id) = alarm {
            timer::service().cancel(id);
        }
        if let Some(w) = wake {
            w.wake();
        }
    }

    fn is_live(&self) -> bool {
        self.state.lock().winner.is_none()
    }

    fn timer_expired(&self) {
        let losers = {
            let mut s = self.state.lock();
            if s.winner.is_some() {
                // the selection resolved first; retire silently
                return;
            }
            s.winner = Some(TIMEOUT_POS);
            std::mem::take(&mut s.enqueued)
        };
        let mut removed = 0;
        for e in &losers {
            if e.chan.dequeue(e.kind, self.addr(), e.pos) {
                removed += 1;
            }
        }
        let wake = {
            let mut s = self.state.lock();
            s.pending -= removed;
            if s.pending == 0 {
                s.waker.take()
            } else {
                None
            }
        };
        if let Some(w) = wake {
            w.wake();
        }
    }
}

enum ProtocolResult {
    Ready(usize),
    NotReady,
    Parked(Arc<Selection>),
}

/// Steps 1–4 of the selection protocol: canonical order, lock all,
/// commit a random ready operation, or (given a waker) park everything.
fn run_protocol<T: Send + 'static>(
    ops: &[ChannelOp<T>],
    waker: Option<&Waker>,
    done: &mut Completions,
) -> ProtocolResult {
    assert!(!ops.is_empty(), "selection requires at least one operation");

    // canonical order; duplicate (channel, kind) operations collapse to
    // their first occurrence so no entry is double-enqueued
    let mut idx: Vec<usize> = (0..ops.len()).collect();
    idx.sort_by_key(|&i| (ops[i].chan_id(), ops[i].kind as u8));
    idx.dedup_by(|a, b| {
        ops[*a].chan_id() == ops[*b].chan_id() && ops[*a].kind == ops[*b].kind
    });

    // lock every distinct channel, in order
    let mut chan_ids: Vec<usize> = Vec::new();
    let mut guards = Vec::new();
    for &i in &idx {
        let id = ops[i].chan_id();
        if chan_ids.last() != Some(&id) {
            chan_ids.push(id);
            guards.push(ops[i].core.state.lock());
        }
    }
    let guard_of =
        |id: usize| chan_ids.binary_search(&id).expect("channel missing from lock set");

    // commit one ready operation; retry the count when an execution
    // falls through on a waiter that went stale under a foreign lock
    loop {
        let ready: Vec<usize> = idx
            .iter()
            .copied()
            .filter(|&i| ops[i].is_ready_in(&guards[guard_of(ops[i].chan_id())]))
            .collect();
        if ready.is_empty() {
            break;
        }
        let pick = ready[pick_uniform(ready.len())];
        let g = &mut guards[guard_of(ops[pick].chan_id())];
        if ops[pick].execute_in(g, done) {
            return ProtocolResult::Ready(pick);
        }
    }

    let Some(waker) = waker else {
        return ProtocolResult::NotReady;
    };

    // park every operation, tagged with the selection and its position
    let sel = Selection::new(idx.iter().map(|&i| ops[i].to_enqueued(i)).collect());
    sel.set_waker(waker);
    let target: Arc<dyn NotifyTarget> = sel.clone();
    for &i in &idx {
        let g = &mut guards[guard_of(ops[i].chan_id())];
        ops[i].enqueue_in(g, target.clone(), i);
    }
    ProtocolResult::Parked(sel)
}

/// Commit one ready operation or return `None` without parking.
pub fn try_select<T: Send + 'static>(ops: &mut [ChannelOp<T>]) -> Option<usize> {
    let mut done = Completions::new();
    let result = run_protocol(ops, None, &mut done);
    run_completions(done);
    match result {
        ProtocolResult::Ready(pos) => Some(pos),
        _ => None,
    }
}

/// Commit exactly one of the operations, suspending the task until a
/// counterparty fires one of them. Resolves to the winner's index in
/// `ops`.
pub fn select<T: Send + 'static>(ops: &mut [ChannelOp<T>]) -> SelectFuture<'_, T> {
    SelectFuture {
        core: SelectCore {
            ops,
            timeout: None,
            sel: None,
            done: false,
        },
    }
}

/// Like [`select`], with a deadline: resolves to `None` when the timer
/// fires before any operation completes.
pub fn select_timeout<T: Send + 'static>(
    ops: &mut [ChannelOp<T>],
    timeout: Duration,
) -> SelectTimeoutFuture<'_, T> {
    SelectTimeoutFuture {
        core: SelectCore {
            ops,
            timeout: Some(timeout),
            sel: None,
            done: false,
        },
    }
}

struct SelectCore<'a, T: Send + 'static> {
    ops: &'a mut [ChannelOp<T>],
    timeout: Option<Duration>,
    sel: Option<Arc<Selection>>,
    done: bool,
}

impl<T: Send + 'static> SelectCore<'_, T> {
    fn poll_core(&mut self, cx: &mut Context<'_>) -> Poll<Option<usize>> {
        assert!(!self.done, "select future polled after completion");

        if let Some(sel) = &self.sel {
            return match sel.poll_ready(cx) {
                Poll::Ready(TIMEOUT_POS) => {
                    self.done = true;
                    Poll::Ready(None)
                }
                Poll::Ready(pos) => {
                    self.done = true;
                    Poll::Ready(Some(pos))
                }
                Poll::Pending => Poll::Pending,
            };
        }

        let mut done = Completions::new();
        let result = run_protocol(self.ops, Some(cx.waker()), &mut done);
        run_completions(done);
        match result {
            ProtocolResult::Ready(pos) => {
                self.done = true;
                Poll::Ready(Some(pos))
            }
            ProtocolResult::Parked(sel) => {
                if let Some(timeout) = self.timeout {
                    let target: Arc<dyn NotifyTarget> = sel.clone();
                    let id = timer::service().schedule_task(target, Instant::now() + timeout);
                    sel.set_alarm(id);
                }
                self.sel = Some(sel);
                Poll::Pending
            }
            ProtocolResult::NotReady => unreachable!("selection with a waker always parks"),
        }
    }
}

impl<T: Send + 'static> Drop for SelectCore<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(sel) = &self.sel {
                sel.cancel();
            }
        }
    }
}

/// Awaitable selection; resolves to the winner's index.
pub struct SelectFuture<'a, T: Send + 'static> {
    core: SelectCore<'a, T>,
}

impl<T: Send + 'static> Future for SelectFuture<'_, T> {
    type Output = usize;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
        match self.get_mut().core.poll_core(cx) {
            Poll::Ready(Some(pos)) => Poll::Ready(pos),
            Poll::Ready(None) => unreachable!("selection without a timer reported expiry"),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Awaitable selection with a deadline; `None` means the timer won.
pub struct SelectTimeoutFuture<'a, T: Send + 'static> {
    core: SelectCore<'a, T>,
}

impl<T: Send + 'static> Future for SelectTimeoutFuture<'_, T> {
    type Output = Option<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<usize>> {
        self.get_mut().core.poll_core(cx)
    }
}

static PICK_SEED: AtomicU64 = AtomicU64::new(0x9E3779B97F4A7C15);

/// Uniform pick in `0..n` from a thread-local xorshift64 stream.
pub(crate) fn pick_uniform(n: usize) -> usize {
    use std::cell::Cell;
    thread_local! {
        static STATE: Cell<u64> = const { Cell::new(0) };
    }
    STATE.with(|state| {
        let mut x = state.get();
        if x == 0 {
            // Golden ratio increments keep per-thread streams distinct.
            x = PICK_SEED.fetch_add(0x9E3779B97F4A7C15, Ordering::Relaxed) | 1;
        }
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x % n as u64) as usize
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::make_channel;

    #[test]
    fn try_select_none_ready() {
        let a = make_channel::<i32>(1);
        let b = make_channel::<i32>(1);
        let mut ops = [a.make_receive(), b.make_receive()];
        assert_eq!(try_select(&mut ops), None);
        // nothing may be left parked by the try variant
        assert!(a.core.state.lock().receivers.is_empty());
        assert!(b.core.state.lock().receivers.is_empty());
    }

    #[test]
    fn try_select_receive_ready() {
        let a = make_channel::<i32>(1);
        let b = make_channel::<i32>(1);
        b.try_send(9).unwrap();
        let mut ops = [a.make_receive(), b.make_receive()];
        assert_eq!(try_select(&mut ops), Some(1));
        assert_eq!(ops[1].take_value().unwrap(), 9);
    }

    #[test]
    fn try_select_send_ready() {
        let ch = make_channel::<i32>(1);
        let mut ops = [ch.make_send(5)];
        assert_eq!(try_select(&mut ops), Some(0));
        assert_eq!(ch.try_receive().unwrap(), 5);
    }

    #[test]
    fn try_select_full_send_not_ready() {
        let ch = make_channel::<i32>(1);
        ch.try_send(1).unwrap();
        let mut ops = [ch.make_send(2)];
        assert_eq!(try_select(&mut ops), None);
        // the unsent value is recoverable from the descriptor
        assert_eq!(ops[0].take_value().unwrap(), 2);
    }

    #[test]
    fn duplicate_operations_collapse_to_first() {
        let ch = make_channel::<i32>(1);
        ch.try_send(3).unwrap();
        let mut ops = [ch.make_receive(), ch.make_receive()];
        assert_eq!(try_select(&mut ops), Some(0));
        assert_eq!(ops[0].take_value().unwrap(), 3);
        assert!(ops[1].take_value().is_none());
    }

    #[test]
    fn winner_reported_in_caller_positions() {
        // channel order in the ops array deliberately disagrees with
        // whatever the address order happens to be
        let a = make_channel::<i32>(1);
        let b = make_channel::<i32>(1);
        a.try_send(1).unwrap();
        let mut ops = [b.make_receive(), a.make_receive()];
        assert_eq!(try_select(&mut ops), Some(1));
        let mut ops = [a.make_receive(), b.make_receive()];
        a.try_send(2).unwrap();
        assert_eq!(try_select(&mut ops), Some(0));
    }

    #[test]
    fn both_ready_hits_both_branches() {
        let a = make_channel::<i32>(1);
        let b = make_channel::<i32>(1);
        let mut counts = [0usize; 2];
        for _ in 0..1000 {
            let _ = a.try_send(1);
            let _ = b.try_send(2);
            let mut ops = [a.make_receive(), b.make_receive()];
            let pos = try_select(&mut ops).unwrap();
            counts[pos] += 1;
        }
        assert!(counts[0] > 0, "branch 0 never chosen: {:?}", counts);
        assert!(counts[1] > 0, "branch 1 never chosen: {:?}", counts);
    }

    #[test]
    fn pick_uniform_stays_in_range() {
        for n in 1..8 {
            for _ in 0..100 {
                assert!(pick_uniform(n) < n);
            }
        }
    }
}
