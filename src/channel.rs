// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Typed bounded channels.
//!
//! A channel is a rendezvous point: a FIFO buffer of capacity C (C = 0
//! is a pure rendezvous) plus one wait queue per direction, all guarded
//! by a single lock. Each direction comes in three flavors: non-blocking
//! (`try_send`/`try_receive`), blocking-thread (`sync_send`/
//! `sync_receive`), and awaitable task operations (`send`/`receive`).
//!
//! Completion prefers a parked peer over the buffer: a send hands its
//! value straight to the oldest waiting receiver, and a receive that
//! frees a buffer slot immediately promotes the oldest parked sender
//! into it, keeping the buffer maximally full in arrival order.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;

use crate::select::{ChannelOp, EnqueuedOp, OpKind, Selection};
use crate::waitq::{
    run_completions, value_cell, Binding, Completions, NotifyTarget, ThreadSignal, ValueCell,
    WaitQueue, Waiter,
};

/// Error from a non-blocking send.
#[derive(Debug, Error)]
pub enum TrySendError<T> {
    /// Buffer is full and no receiver is waiting; the value is returned.
    #[error("channel is full")]
    Full(T),
}

/// Create a channel with the given buffer capacity. Capacity 0 makes a
/// pure rendezvous channel: every send completes against a receiver.
pub fn make_channel<T: Send + 'static>(capacity: usize) -> Channel<T> {
    Channel {
        core: Arc::new(RawChannel {
            state: Mutex::new(ChanState {
                buf: VecDeque::new(),
                cap: capacity,
                senders: WaitQueue::new(),
                receivers: WaitQueue::new(),
            }),
        }),
    }
}

/// Bidirectional channel handle. Cheap to clone; all clones address the
/// same channel, and equality is identity of that channel.
pub struct Channel<T: Send + 'static> {
    pub(crate) core: Arc<RawChannel<T>>,
}

impl<T: Send + 'static> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("core", &Arc::as_ptr(&self.core))
            .finish()
    }
}

/// Sending view of a channel.
pub struct Sender<T: Send + 'static> {
    core: Arc<RawChannel<T>>,
}

impl<T: Send + 'static> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("core", &Arc::as_ptr(&self.core))
            .finish()
    }
}

/// Receiving view of a channel.
pub struct Receiver<T: Send + 'static> {
    core: Arc<RawChannel<T>>,
}

impl<T: Send + 'static> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("core", &Arc::as_ptr(&self.core))
            .finish()
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.core.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer capacity.
    pub fn capacity(&self) -> usize {
        self.core.state.lock().cap
    }

    /// Awaitable send; parks the task while the channel cannot accept.
    pub fn send(&self, value: T) -> SendFuture<T> {
        send_core(self.core.clone(), value)
    }

    /// Awaitable receive; parks the task while nothing is deliverable.
    pub fn receive(&self) -> ReceiveFuture<T> {
        receive_core(self.core.clone())
    }

    /// Non-blocking send.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        try_send_core(&self.core, value)
    }

    /// Non-blocking receive.
    pub fn try_receive(&self) -> Option<T> {
        try_receive_core(&self.core)
    }

    /// Send, blocking the calling OS thread until the value is taken.
    pub fn sync_send(&self, value: T) {
        sync_send_core(&self.core, value)
    }

    /// Receive, blocking the calling OS thread until a value arrives.
    pub fn sync_receive(&self) -> T {
        sync_receive_core(&self.core)
    }

    /// Build a send operation descriptor for a selection.
    pub fn make_send(&self, value: T) -> ChannelOp<T> {
        ChannelOp::new(self.core.clone(), OpKind::Send, value_cell(Some(value)))
    }

    /// Build a receive operation descriptor for a selection.
    pub fn make_receive(&self) -> ChannelOp<T> {
        ChannelOp::new(self.core.clone(), OpKind::Receive, value_cell(None))
    }

    /// The sending view.
    pub fn sender(&self) -> Sender<T> {
        Sender {
            core: self.core.clone(),
        }
    }

    /// The receiving view.
    pub fn receiver(&self) -> Receiver<T> {
        Receiver {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> Sender<T> {
    pub fn len(&self) -> usize {
        self.core.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.core.state.lock().cap
    }

    pub fn send(&self, value: T) -> SendFuture<T> {
        send_core(self.core.clone(), value)
    }

    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        try_send_core(&self.core, value)
    }

    pub fn sync_send(&self, value: T) {
        sync_send_core(&self.core, value)
    }

    pub fn make_send(&self, value: T) -> ChannelOp<T> {
        ChannelOp::new(self.core.clone(), OpKind::Send, value_cell(Some(value)))
    }
}

impl<T: Send + 'static> Receiver<T> {
    pub fn len(&self) -> usize {
        self.core.state.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.core.state.lock().cap
    }

    pub fn receive(&self) -> ReceiveFuture<T> {
        receive_core(self.core.clone())
    }

    pub fn try_receive(&self) -> Option<T> {
        try_receive_core(&self.core)
    }

    pub fn sync_receive(&self) -> T {
        sync_receive_core(&self.core)
    }

    pub fn make_receive(&self) -> ChannelOp<T> {
        ChannelOp::new(self.core.clone(), OpKind::Receive, value_cell(None))
    }
}

impl<T: Send + 'static> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Sender {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Receiver {
            core: self.core.clone(),
        }
    }
}

impl<T: Send + 'static> PartialEq for Channel<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: Send + 'static> Eq for Channel<T> {}

impl<T: Send + 'static> PartialEq for Sender<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: Send + 'static> Eq for Sender<T> {}

impl<T: Send + 'static> PartialEq for Receiver<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: Send + 'static> Eq for Receiver<T> {}

impl<T: Send + 'static> From<Channel<T>> for Sender<T> {
    fn from(ch: Channel<T>) -> Self {
        Sender { core: ch.core }
    }
}

impl<T: Send + 'static> From<Channel<T>> for Receiver<T> {
    fn from(ch: Channel<T>) -> Self {
        Receiver { core: ch.core }
    }
}

/// The shared channel object. Identity (address) of this allocation is
/// channel identity, and doubles as the canonical lock-ordering key.
pub(crate) struct RawChannel<T> {
    pub(crate) state: Mutex<ChanState<T>>,
}

/// Canonical ordering key of a channel.
pub(crate) fn chan_addr<T>(core: &Arc<RawChannel<T>>) -> usize {
    Arc::as_ptr(core) as usize
}

/// Buffer and wait queues, all behind the one channel lock.
pub(crate) struct ChanState<T> {
    buf: VecDeque<T>,
    cap: usize,
    pub(crate) senders: WaitQueue<T>,
    pub(crate) receivers: WaitQueue<T>,
}

impl<T> ChanState<T> {
    /// A send would complete without parking.
    pub(crate) fn is_send_ready(&self) -> bool {
        self.receivers.has_live() || self.buf.len() < self.cap
    }

    /// A receive would complete without parking.
    pub(crate) fn is_receive_ready(&self) -> bool {
        !self.buf.is_empty() || self.senders.has_live()
    }

    /// Complete a send against a waiting receiver or the buffer.
    /// Returns the value when neither accepts it. Stale entries found
    /// while scanning the receiver queue are discarded.
    pub(crate) fn send_value(&mut self, value: T, done: &mut Completions) -> Result<(), T> {
        while let Some(w) = self.receivers.pop() {
            match w.binding {
                Binding::Thread(sig) => {
                    *w.cell.lock() = Some(value);
                    sig.notify();
                    return Ok(());
                }
                Binding::Task { target, pos } => {
                    if target.offer(pos) {
                        *w.cell.lock() = Some(value);
                        done.push((target, pos));
                        return Ok(());
                    }
                }
            }
        }
        if self.buf.len() < self.cap {
            self.buf.push_back(value);
            return Ok(());
        }
        Err(value)
    }

    /// Complete a receive from the buffer or a waiting sender. A buffer
    /// pop promotes the oldest parked sender into the freed slot; an
    /// empty buffer takes the value straight from the sender queue
    /// (capacity-0 rendezvous).
    pub(crate) fn receive_value(&mut self, done: &mut Completions) -> Option<T> {
        if let Some(value) = self.buf.pop_front() {
            self.promote_sender(done);
            return Some(value);
        }
        while let Some(w) = self.senders.pop() {
            match w.binding {
                Binding::Thread(sig) => {
                    let value = w.cell.lock().take().expect("parked sender without a value");
                    sig.notify();
                    return Some(value);
                }
                Binding::Task { target, pos } => {
                    if target.offer(pos) {
                        let value = w.cell.lock().take().expect("parked sender without a value");
                        done.push((target, pos));
                        return Some(value);
                    }
                }
            }
        }
        None
    }

    /// Move the oldest live parked sender into a freed buffer slot.
    fn promote_sender(&mut self, done: &mut Completions) {
        while self.buf.len() < self.cap {
            let Some(w) = self.senders.pop() else { return };
            match w.binding {
                Binding::Thread(sig) => {
                    let value = w.cell.lock().take().expect("parked sender without a value");
                    self.buf.push_back(value);
                    sig.notify();
                    return;
                }
                Binding::Task { target, pos } => {
                    if target.offer(pos) {
                        let value = w.cell.lock().take().expect("parked sender without a value");
                        self.buf.push_back(value);
                        done.push((target, pos));
                        return;
                    }
                    // stale entry; keep scanning
                }
            }
        }
    }

    pub(crate) fn enqueue_sender(&mut self, binding: Binding, cell: ValueCell<T>) {
        self.senders.push(Waiter { binding, cell });
    }

    pub(crate) fn enqueue_receiver(&mut self, binding: Binding, cell: ValueCell<T>) {
        self.receivers.push(Waiter { binding, cell });
    }

    pub(crate) fn dequeue_sender(&mut self, addr: usize, pos: usize) -> bool {
        self.senders.remove(addr, pos)
    }

    pub(crate) fn dequeue_receiver(&mut self, addr: usize, pos: usize) -> bool {
        self.receivers.remove(addr, pos)
    }
}

fn try_send_core<T: Send + 'static>(
    core: &Arc<RawChannel<T>>,
    value: T,
) -> Result<(), TrySendError<T>> {
    let mut done = Completions::new();
    let result = {
        let mut st = core.state.lock();
        st.send_value(value, &mut done)
    };
    run_completions(done);
    result.map_err(TrySendError::Full)
}

fn try_receive_core<T: Send + 'static>(core: &Arc<RawChannel<T>>) -> Option<T> {
    let mut done = Completions::new();
    let result = {
        let mut st = core.state.lock();
        st.receive_value(&mut done)
    };
    run_completions(done);
    result
}

enum Attempt<T> {
    Done(T),
    Parked(Arc<ThreadSignal>, ValueCell<T>),
}

enum SendAttempt<T> {
    Done,
    Parked(Arc<ThreadSignal>, ValueCell<T>),
}

fn sync_send_core<T: Send + 'static>(core: &Arc<RawChannel<T>>, value: T) {
    let mut done = Completions::new();
    let attempt = {
        let mut st = core.state.lock();
        match st.send_value(value, &mut done) {
            Ok(()) => SendAttempt::Done,
            Err(value) => {
                let sig = ThreadSignal::new();
                let cell = value_cell(Some(value));
                st.enqueue_sender(Binding::Thread(sig.clone()), cell.clone());
                SendAttempt::Parked(sig, cell)
            }
        }
    };
    run_completions(done);
    match attempt {
        SendAttempt::Done => {}
        SendAttempt::Parked(sig, _cell) => sig.wait(),
    }
}

fn sync_receive_core<T: Send + 'static>(core: &Arc<RawChannel<T>>) -> T {
    let mut done = Completions::new();
    let attempt = {
        let mut st = core.state.lock();
        match st.receive_value(&mut done) {
            Some(value) => Attempt::Done(value),
            None => {
                let sig = ThreadSignal::new();
                let cell = value_cell(None);
                st.enqueue_receiver(Binding::Thread(sig.clone()), cell.clone());
                Attempt::Parked(sig, cell)
            }
        }
    };
    run_completions(done);
    match attempt {
        Attempt::Done(value) => value,
        Attempt::Parked(sig, cell) => {
            sig.wait();
            cell.lock().take().expect("receiver released without a value")
        }
    }
}

fn send_core<T: Send + 'static>(core: Arc<RawChannel<T>>, value: T) -> SendFuture<T> {
    SendFuture {
        core,
        value: Some(value),
        sel: None,
        done: false,
    }
}

fn receive_core<T: Send + 'static>(core: Arc<RawChannel<T>>) -> ReceiveFuture<T> {
    ReceiveFuture {
        core,
        cell: value_cell(None),
        sel: None,
        done: false,
    }
}

/// Awaitable send. The single-operation case of the selection protocol:
/// the first poll either completes in place or parks an entry bound to
/// a one-shot selection.
pub struct SendFuture<T: Send + 'static> {
    core: Arc<RawChannel<T>>,
    value: Option<T>,
    sel: Option<Arc<Selection>>,
    done: bool,
}

// No self-references: the pending value lives in a plain field until it
// moves into the wait queue.
impl<T: Send + 'static> Unpin for SendFuture<T> {}

impl<T: Send + 'static> Future for SendFuture<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        assert!(!this.done, "send future polled after completion");

        if let Some(sel) = &this.sel {
            return match sel.poll_ready(cx) {
                Poll::Ready(_) => {
                    this.done = true;
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            };
        }

        let value = this.value.take().expect("send future without a value");
        let mut done = Completions::new();
        let parked = {
            let mut st = this.core.state.lock();
            match st.send_value(value, &mut done) {
                Ok(()) => None,
                Err(value) => {
                    let sel = Selection::new(vec![EnqueuedOp {
                        chan: this.core.clone(),
                        kind: OpKind::Send,
                        pos: 0,
                    }]);
                    sel.set_waker(cx.waker());
                    let target: Arc<dyn NotifyTarget> = sel.clone();
                    st.enqueue_sender(Binding::Task { target, pos: 0 }, value_cell(Some(value)));
                    Some(sel)
                }
            }
        };
        run_completions(done);
        match parked {
            Some(sel) => {
                this.sel = Some(sel);
                Poll::Pending
            }
            None => {
                this.done = true;
                Poll::Ready(())
            }
        }
    }
}

impl<T: Send + 'static> Drop for SendFuture<T> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(sel) = &self.sel {
                sel.cancel();
            }
        }
    }
}

/// Awaitable receive; resolves to the delivered value.
pub struct ReceiveFuture<T: Send + 'static> {
    core: Arc<RawChannel<T>>,
    cell: ValueCell<T>,
    sel: Option<Arc<Selection>>,
    done: bool,
}

impl<T: Send + 'static> Future for ReceiveFuture<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        assert!(!this.done, "receive future polled after completion");

        if let Some(sel) = &this.sel {
            return match sel.poll_ready(cx) {
                Poll::Ready(_) => {
                    this.done = true;
                    let value = this
                        .cell
                        .lock()
                        .take()
                        .expect("receive completed without a value");
                    Poll::Ready(value)
                }
                Poll::Pending => Poll::Pending,
            };
        }

        let mut done = Completions::new();
        let parked = {
            let mut st = this.core.state.lock();
            match st.receive_value(&mut done) {
                Some(value) => {
                    *this.cell.lock() = Some(value);
                    None
                }
                None => {
                    let sel = Selection::new(vec![EnqueuedOp {
                        chan: this.core.clone(),
                        kind: OpKind::Receive,
                        pos: 0,
                    }]);
                    sel.set_waker(cx.waker());
                    let target: Arc<dyn NotifyTarget> = sel.clone();
                    st.enqueue_receiver(Binding::Task { target, pos: 0 }, this.cell.clone());
                    Some(sel)
                }
            }
        };
        run_completions(done);
        match parked {
            Some(sel) => {
                this.sel = Some(sel);
                Poll::Pending
            }
            None => {
                this.done = true;
                let value = this
                    .cell
                    .lock()
                    .take()
                    .expect("receive completed without a value");
                Poll::Ready(value)
            }
        }
    }
}

impl<T: Send + 'static> Drop for ReceiveFuture<T> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(sel) = &self.sel {
                sel.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn buffered_send_receive() {
        let ch = make_channel(10);
        ch.try_send(42).unwrap();
        assert_eq!(ch.try_receive().unwrap(), 42);
    }

    #[test]
    fn try_send_full() {
        let ch = make_channel(1);
        ch.try_send(1).unwrap();
        match ch.try_send(2) {
            Err(TrySendError::Full(v)) => assert_eq!(v, 2),
            other => panic!("expected Full(2), got {:?}", other),
        }
    }

    #[test]
    fn try_receive_empty() {
        let ch = make_channel::<i32>(4);
        assert!(ch.try_receive().is_none());
    }

    #[test]
    fn fifo_order_on_buffer() {
        let ch = make_channel(4);
        ch.try_send(1).unwrap();
        ch.try_send(2).unwrap();
        ch.try_send(3).unwrap();
        assert_eq!(ch.try_receive().unwrap(), 1);
        assert_eq!(ch.try_receive().unwrap(), 2);
        assert_eq!(ch.try_receive().unwrap(), 3);
    }

    #[test]
    fn sync_rendezvous_between_threads() {
        let ch = make_channel(0);
        let tx = ch.sender();
        let h = thread::spawn(move || tx.sync_send(99));
        assert_eq!(ch.sync_receive(), 99);
        h.join().unwrap();
    }

    #[test]
    fn sync_send_unblocks_on_receive() {
        let ch = make_channel(1);
        ch.try_send(1).unwrap();
        let tx = ch.sender();
        let h = thread::spawn(move || tx.sync_send(2));
        // the parked sender is promoted into the slot freed by this pop
        assert_eq!(ch.sync_receive(), 1);
        h.join().unwrap();
        assert_eq!(ch.len(), 1);
        assert_eq!(ch.try_receive().unwrap(), 2);
    }

    #[test]
    fn buffer_compaction_keeps_buffer_full() {
        let ch = make_channel(2);
        ch.try_send(1).unwrap();
        ch.try_send(2).unwrap();
        let tx = ch.sender();
        let h = thread::spawn(move || tx.sync_send(3));
        // wait for the sender to park behind the full buffer
        while ch.core.state.lock().senders.is_empty() {
            thread::yield_now();
        }
        assert_eq!(ch.sync_receive(), 1);
        h.join().unwrap();
        assert_eq!(ch.len(), 2);
        assert_eq!(ch.try_receive().unwrap(), 2);
        assert_eq!(ch.try_receive().unwrap(), 3);
    }

    #[test]
    fn channel_identity() {
        let a = make_channel::<i32>(1);
        let b = make_channel::<i32>(1);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.sender(), a.clone().sender());
    }

    #[test]
    fn views_share_the_channel() {
        let ch = make_channel(2);
        let tx: Sender<i32> = ch.clone().into();
        let rx: Receiver<i32> = ch.into();
        tx.try_send(7).unwrap();
        assert_eq!(rx.try_receive().unwrap(), 7);
    }

    #[test]
    fn multiple_producers() {
        let ch = make_channel(10);
        let tx = ch.sender();
        let tx2 = tx.clone();
        let h1 = thread::spawn(move || tx.sync_send(1));
        let h2 = thread::spawn(move || tx2.sync_send(2));
        let mut vals = vec![ch.sync_receive(), ch.sync_receive()];
        h1.join().unwrap();
        h2.join().unwrap();
        vals.sort();
        assert_eq!(vals, vec![1, 2]);
    }
}
