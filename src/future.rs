// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! One-shot value-or-error futures and waiting over sets of them.
//!
//! A [`Future`] is a pair of capacity-1 channels — one for the value,
//! one for the error token — plus a latch caching the delivered
//! outcome. The producing task sends on exactly one of the channels, so
//! delivery is value XOR error, exactly once. Waiting on futures is the
//! same wake-by-channel protocol the selection machinery uses: each
//! future contributes a receive wait on both of its channels.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use crate::channel::{chan_addr, make_channel, Channel};
use crate::sched::scheduler::go;
use crate::select::{pick_uniform, ChanCleanup, EnqueuedOp, OpKind};
use crate::timer::{self, AlarmId};
use crate::waitq::{
    run_completions, value_cell, Binding, Completions, NotifyTarget, ValueCell,
};

/// Opaque error token a failed task delivers through its future.
#[derive(Debug, Clone, Error)]
#[error("task failed: {message}")]
pub struct TaskError {
    message: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self { message }
    }
}

/// One-shot carrier of a value or an error token, consumed exactly once.
pub struct Future<T: Send + 'static> {
    value: Channel<T>,
    error: Channel<TaskError>,
    latch: ValueCell<Result<T, TaskError>>,
}

impl<T: Send + 'static> Future<T> {
    /// Whether a datum has arrived (and has not been consumed).
    pub fn is_ready(&self) -> bool {
        self.latch.lock().is_some() || !self.value.is_empty() || !self.error.is_empty()
    }

    /// Non-blocking poll of the outcome. Returns `None` when nothing
    /// has arrived, or after the outcome was already consumed.
    pub fn try_get(&mut self) -> Option<Result<T, TaskError>> {
        if let Some(outcome) = self.latch.lock().take() {
            return Some(outcome);
        }
        if let Some(v) = self.value.try_receive() {
            return Some(Ok(v));
        }
        self.error.try_receive().map(Err)
    }

    /// Awaitable two-way wait on the value and error channels; resolves
    /// to the outcome.
    pub fn get(&mut self) -> GetFuture<'_, T> {
        GetFuture {
            core: WaitCore::new(std::slice::from_ref(self), WaitMode::Any, None),
        }
    }
}

impl<T: Send + 'static> PartialEq for Future<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: Send + 'static> Eq for Future<T> {}

/// Run `f` as a task on the global scheduler and hand back a future for
/// its outcome. A panic in `f` is caught and delivered as the error
/// token.
pub fn async_call<T, F>(f: F) -> Future<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let value = make_channel::<T>(1);
    let error = make_channel::<TaskError>(1);
    let (vtx, etx) = (value.clone(), error.clone());
    go(async move {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(v) => vtx.send(v).await,
            Err(payload) => etx.send(TaskError::from_panic(payload)).await,
        }
    });
    Future {
        value,
        error,
        latch: value_cell(None),
    }
}

/// Wait until one of the futures is ready; resolves to its index.
/// Among futures ready at once the winner is uniformly random.
pub fn wait_any<T: Send + 'static>(futures: &[Future<T>]) -> WaitAnyFuture<'_, T> {
    WaitAnyFuture {
        core: WaitCore::new(futures, WaitMode::Any, None),
    }
}

/// Like [`wait_any`], with a deadline; `None` when the timer fires
/// first.
pub fn wait_any_timeout<T: Send + 'static>(
    futures: &[Future<T>],
    timeout: Duration,
) -> WaitAnyTimeoutFuture<'_, T> {
    WaitAnyTimeoutFuture {
        core: WaitCore::new(futures, WaitMode::Any, Some(timeout)),
    }
}

/// Wait until every future is ready.
pub fn wait_all<T: Send + 'static>(futures: &[Future<T>]) -> WaitAllFuture<'_, T> {
    WaitAllFuture {
        core: WaitCore::new(futures, WaitMode::All, None),
    }
}

/// Like [`wait_all`], with a deadline; resolves to whether all futures
/// completed before it. Futures that did complete keep their outcomes.
pub fn wait_all_timeout<T: Send + 'static>(
    futures: &[Future<T>],
    timeout: Duration,
) -> WaitAllTimeoutFuture<'_, T> {
    WaitAllTimeoutFuture {
        core: WaitCore::new(futures, WaitMode::All, Some(timeout)),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum WaitMode {
    Any,
    All,
}

enum WaitOutcome {
    Winner(usize),
    AllDone,
    TimedOut,
}

struct FwState {
    /// Any-mode: uniq slot of the first completion.
    winner: Option<usize>,
    timed_out: bool,
    /// All-mode: uniq futures still incomplete.
    remaining: usize,
    completed: Vec<bool>,
    /// Entries still sitting on some channel's wait queue.
    pending: usize,
    enqueued: Vec<EnqueuedOp>,
    waker: Option<Waker>,
    alarm: Option<AlarmId>,
}

impl FwState {
    fn resolved(&self, mode: WaitMode) -> bool {
        self.timed_out
            || match mode {
                WaitMode::Any => self.winner.is_some(),
                WaitMode::All => self.remaining == 0,
            }
    }
}

/// The future-selector substate of a waiting task. Entry positions
/// encode `slot * 2` for the value channel and `slot * 2 + 1` for the
/// error channel of the future in that unique slot.
struct FutureWait {
    mode: WaitMode,
    state: Mutex<FwState>,
}

impl FutureWait {
    fn addr(&self) -> usize {
        self as *const Self as *const () as usize
    }

    fn cancel_alarm(id: Option<AlarmId>) {
        if let Some(id) = id {
            timer::service().cancel(id);
        }
    }

    fn poll_resolved(&self, cx: &mut Context<'_>) -> Poll<WaitOutcome> {
        let (result, alarm) = {
            let mut s = self.state.lock();
            if s.resolved(self.mode) && s.pending == 0 {
                let outcome = if s.timed_out {
                    WaitOutcome::TimedOut
                } else {
                    match self.mode {
                        WaitMode::Any => {
                            WaitOutcome::Winner(s.winner.expect("resolved wait without a winner"))
                        }
                        WaitMode::All => WaitOutcome::AllDone,
                    }
                };
                (Poll::Ready(outcome), s.alarm.take())
            } else {
                s.waker = Some(cx.waker().clone());
                (Poll::Pending, None)
            }
        };
        Self::cancel_alarm(alarm);
        result
    }

    /// Withdraw the wait without resuming anyone (the waiting future
    /// was dropped).
    fn cancel(&self) {
        let (entries, alarm) = {
            let mut s = self.state.lock();
            s.timed_out = true;
            s.waker = None;
            (std::mem::take(&mut s.enqueued), s.alarm.take())
        };
        let mut removed = 0;
        for e in &entries {
            if e.chan.dequeue(e.kind, self.addr(), e.pos) {
                removed += 1;
            }
        }
        if removed > 0 {
            self.state.lock().pending -= removed;
        }
        Self::cancel_alarm(alarm);
    }
}

impl NotifyTarget for FutureWait {
    fn offer(&self, pos: usize) -> bool {
        let mut s = self.state.lock();
        s.pending -= 1;
        s.enqueued.retain(|e| e.pos != pos);
        let slot = pos / 2;
        let accept = match self.mode {
            WaitMode::Any => {
                if s.winner.is_none() && !s.timed_out {
                    s.winner = Some(slot);
                    s.completed[slot] = true;
                    true
                } else {
                    false
                }
            }
            WaitMode::All => {
                if !s.timed_out && !s.completed[slot] {
                    s.completed[slot] = true;
                    s.remaining -= 1;
                    true
                } else {
                    false
                }
            }
        };
        if !accept && s.pending == 0 && s.resolved(self.mode) {
            if let Some(w) = s.waker.take() {
                drop(s);
                w.wake();
            }
        }
        accept
    }

    fn complete(&self, pos: usize) {
        match self.mode {
            WaitMode::Any => {
                // first completion commits the wait; clear everything
                let entries = {
                    let mut s = self.state.lock();
                    std::mem::take(&mut s.enqueued)
                };
                let mut removed = 0;
                for e in &entries {
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
                Self::cancel_alarm(alarm);
                if let Some(w) = wake {
                    w.wake();
                }
            }
            WaitMode::All => {
                // a future delivers on one channel only; retire the
                // wait parked on its sibling
                let sibling = {
                    let mut s = self.state.lock();
                    let sib = pos ^ 1;
                    s.enqueued
                        .iter()
                        .position(|e| e.pos == sib)
                        .map(|i| s.enqueued.remove(i))
                };
                if let Some(e) = &sibling {
                    if e.chan.dequeue(e.kind, self.addr(), e.pos) {
                        self.state.lock().pending -= 1;
                    }
                }
                let (wake, alarm) = {
                    let mut s = self.state.lock();
                    if s.pending == 0 && s.resolved(self.mode) {
                        (s.waker.take(), s.alarm.take())
                    } else {
                        (None, None)
                    }
                };
                Self::cancel_alarm(alarm);
                if let Some(w) = wake {
                    w.wake();
                }
            }
        }
    }

    fn is_live(&self) -> bool {
        let s = self.state.lock();
        !s.resolved(self.mode)
    }

    fn timer_expired(&self) {
        let entries = {
            let mut s = self.state.lock();
            if s.resolved(self.mode) {
                // cancel raced expiry; the later arrival is a no-op
                return;
            }
            s.timed_out = true;
            std::mem::take(&mut s.enqueued)
        };
        let mut removed = 0;
        for e in &entries {
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

struct WaitCore<'a, T: Send + 'static> {
    futures: &'a [Future<T>],
    mode: WaitMode,
    timeout: Option<Duration>,
    /// First-occurrence indices after merging duplicate channel pairs.
    uniq: Vec<usize>,
    vcells: Vec<ValueCell<T>>,
    ecells: Vec<ValueCell<TaskError>>,
    fw: Option<Arc<FutureWait>>,
    done: bool,
}

impl<'a, T: Send + 'static> WaitCore<'a, T> {
    fn new(futures: &'a [Future<T>], mode: WaitMode, timeout: Option<Duration>) -> Self {
        Self {
            futures,
            mode,
            timeout,
            uniq: Vec::new(),
            vcells: Vec::new(),
            ecells: Vec::new(),
            fw: None,
            done: false,
        }
    }

    /// Move delivered outcomes from the wait cells into the futures'
    /// latches.
    fn drain_cells(&self) {
        for (k, &i) in self.uniq.iter().enumerate() {
            let f = &self.futures[i];
            if let Some(v) = self.vcells[k].lock().take() {
                *f.latch.lock() = Some(Ok(v));
            } else if let Some(e) = self.ecells[k].lock().take() {
                *f.latch.lock() = Some(Err(e));
            }
        }
    }

    fn poll_core(&mut self, cx: &mut Context<'_>) -> Poll<WaitOutcome> {
        assert!(!self.done, "wait future polled after completion");

        if let Some(fw) = &self.fw {
            return match fw.poll_resolved(cx) {
                Poll::Ready(outcome) => {
                    self.done = true;
                    self.drain_cells();
                    Poll::Ready(outcome)
                }
                Poll::Pending => Poll::Pending,
            };
        }

        let futures = self.futures;
        assert!(!futures.is_empty(), "wait requires at least one future");

        // merge duplicate futures (same channel pair)
        for (i, f) in futures.iter().enumerate() {
            if !self.uniq.iter().any(|&j| futures[j] == *f) {
                self.uniq.push(i);
            }
        }
        let n = self.uniq.len();
        self.vcells = (0..n).map(|_| value_cell(None)).collect();
        self.ecells = (0..n).map(|_| value_cell(None)).collect();

        // lock both channels of every unique future in one merged
        // canonical order
        enum Slot {
            Value(usize),
            Error(usize),
        }
        let mut order: Vec<(usize, Slot)> = Vec::with_capacity(2 * n);
        for (k, &i) in self.uniq.iter().enumerate() {
            order.push((chan_addr(&futures[i].value.core), Slot::Value(k)));
            order.push((chan_addr(&futures[i].error.core), Slot::Error(k)));
        }
        order.sort_by_key(|&(id, _)| id);
        let mut vguards: Vec<Option<_>> = (0..n).map(|_| None).collect();
        let mut eguards: Vec<Option<_>> = (0..n).map(|_| None).collect();
        for (_, slot) in &order {
            match slot {
                Slot::Value(k) => {
                    vguards[*k] = Some(futures[self.uniq[*k]].value.core.state.lock())
                }
                Slot::Error(k) => {
                    eguards[*k] = Some(futures[self.uniq[*k]].error.core.state.lock())
                }
            }
        }

        let mut done = Completions::new();
        let mut completed = vec![false; n];

        // consume ready futures in place: any-mode commits one picked
        // uniformly at random, all-mode takes every one it can
        let result = loop {
            let ready: Vec<usize> = (0..n)
                .filter(|&k| {
                    !completed[k] && {
                        let f = &futures[self.uniq[k]];
                        f.latch.lock().is_some()
                            || vguards[k].as_ref().expect("missing value guard").is_receive_ready()
                            || eguards[k].as_ref().expect("missing error guard").is_receive_ready()
                    }
                })
                .collect();
            if ready.is_empty() {
                break None;
            }
            let k = match self.mode {
                WaitMode::Any => ready[pick_uniform(ready.len())],
                WaitMode::All => ready[0],
            };
            let f = &futures[self.uniq[k]];
            let consumed = if f.latch.lock().is_some() {
                true
            } else if let Some(v) = vguards[k]
                .as_mut()
                .expect("missing value guard")
                .receive_value(&mut done)
            {
                *f.latch.lock() = Some(Ok(v));
                true
            } else if let Some(e) = eguards[k]
                .as_mut()
                .expect("missing error guard")
                .receive_value(&mut done)
            {
                *f.latch.lock() = Some(Err(e));
                true
            } else {
                // readiness rested on a waiter that went stale
                false
            };
            if consumed {
                completed[k] = true;
                match self.mode {
                    WaitMode::Any => break Some(WaitOutcome::Winner(self.uniq[k])),
                    WaitMode::All => {
                        if completed.iter().all(|&c| c) {
                            break Some(WaitOutcome::AllDone);
                        }
                    }
                }
            }
        };

        if let Some(outcome) = result {
            drop(vguards);
            drop(eguards);
            run_completions(done);
            self.done = true;
            return Poll::Ready(outcome);
        }

        // park a receive wait on both channels of every incomplete
        // future
        let remaining = completed.iter().filter(|&&c| !c).count();
        let mut enqueued = Vec::with_capacity(2 * remaining);
        for k in 0..n {
            if completed[k] {
                continue;
            }
            let f = &futures[self.uniq[k]];
            let value_chan: Arc<dyn ChanCleanup> = f.value.core.clone();
            let error_chan: Arc<dyn ChanCleanup> = f.error.core.clone();
            enqueued.push(EnqueuedOp {
                chan: value_chan,
                kind: OpKind::Receive,
                pos: k * 2,
            });
            enqueued.push(EnqueuedOp {
                chan: error_chan,
                kind: OpKind::Receive,
                pos: k * 2 + 1,
            });
        }
        let pending = enqueued.len();
        let fw = Arc::new(FutureWait {
            mode: self.mode,
            state: Mutex::new(FwState {
                winner: None,
                timed_out: false,
                remaining,
                completed,
                pending,
                enqueued,
                waker: Some(cx.waker().clone()),
                alarm: None,
            }),
        });
        let target: Arc<dyn NotifyTarget> = fw.clone();
        for k in 0..n {
            if fw.state.lock().completed[k] {
                continue;
            }
            let f = &futures[self.uniq[k]];
            vguards[k]
                .as_mut()
                .expect("missing value guard")
                .enqueue_receiver(
                    Binding::Task {
                        target: target.clone(),
                        pos: k * 2,
                    },
                    self.vcells[k].clone(),
                );
            eguards[k]
                .as_mut()
                .expect("missing error guard")
                .enqueue_receiver(
                    Binding::Task {
                        target: target.clone(),
                        pos: k * 2 + 1,
                    },
                    self.ecells[k].clone(),
                );
        }
        drop(vguards);
        drop(eguards);
        run_completions(done);

        if let Some(timeout) = self.timeout {
            let target: Arc<dyn NotifyTarget> = fw.clone();
            let id = timer::service().schedule_task(target, Instant::now() + timeout);
            let resolved = {
                let mut s = fw.state.lock();
                if s.resolved(fw.mode) {
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
        self.fw = Some(fw);
        Poll::Pending
    }
}

impl<T: Send + 'static> Drop for WaitCore<'_, T> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(fw) = &self.fw {
                fw.cancel();
            }
        }
    }
}

/// Awaitable outcome of [`Future::get`].
pub struct GetFuture<'a, T: Send + 'static> {
    core: WaitCore<'a, T>,
}

impl<T: Send + 'static> std::future::Future for GetFuture<'_, T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.core.poll_core(cx) {
            Poll::Ready(WaitOutcome::Winner(_)) => {
                let outcome = this.core.futures[0]
                    .latch
                    .lock()
                    .take()
                    .expect("resolved future without an outcome");
                Poll::Ready(outcome)
            }
            Poll::Ready(_) => unreachable!("two-way wait without a timer reported expiry"),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Awaitable result of [`wait_any`].
pub struct WaitAnyFuture<'a, T: Send + 'static> {
    core: WaitCore<'a, T>,
}

impl<T: Send + 'static> std::future::Future for WaitAnyFuture<'_, T> {
    type Output = usize;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<usize> {
        match self.get_mut().core.poll_core(cx) {
            Poll::Ready(WaitOutcome::Winner(i)) => Poll::Ready(i),
            Poll::Ready(_) => unreachable!("wait_any without a timer reported expiry"),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Awaitable result of [`wait_any_timeout`].
pub struct WaitAnyTimeoutFuture<'a, T: Send + 'static> {
    core: WaitCore<'a, T>,
}

impl<T: Send + 'static> std::future::Future for WaitAnyTimeoutFuture<'_, T> {
    type Output = Option<usize>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<usize>> {
        match self.get_mut().core.poll_core(cx) {
            Poll::Ready(WaitOutcome::Winner(i)) => Poll::Ready(Some(i)),
            Poll::Ready(_) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Awaitable result of [`wait_all`].
pub struct WaitAllFuture<'a, T: Send + 'static> {
    core: WaitCore<'a, T>,
}

impl<T: Send + 'static> std::future::Future for WaitAllFuture<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        match self.get_mut().core.poll_core(cx) {
            Poll::Ready(WaitOutcome::AllDone) => Poll::Ready(()),
            Poll::Ready(_) => unreachable!("wait_all without a timer reported expiry"),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Awaitable result of [`wait_all_timeout`]; `true` when every future
/// completed before the deadline.
pub struct WaitAllTimeoutFuture<'a, T: Send + 'static> {
    core: WaitCore<'a, T>,
}

impl<T: Send + 'static> std::future::Future for WaitAllTimeoutFuture<'_, T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        match self.get_mut().core.poll_core(cx) {
            Poll::Ready(WaitOutcome::AllDone) => Poll::Ready(true),
            Poll::Ready(_) => Poll::Ready(false),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn spin_get<T: Send + 'static>(f: &mut Future<T>) -> Result<T, TaskError> {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(r) = f.try_get() {
                return r;
            }
            assert!(std::time::Instant::now() < deadline, "future never completed");
            thread::yield_now();
        }
    }

    #[test]
    fn async_call_delivers_value() {
        let mut f = async_call(|| 41 + 1);
        assert_eq!(spin_get(&mut f).unwrap(), 42);
    }

    #[test]
    fn async_call_delivers_panic_as_error() {
        let mut f = async_call(|| -> i32 { panic!("boom") });
        match spin_get(&mut f) {
            Err(e) => assert!(e.message().contains("boom")),
            Ok(v) => panic!("expected error, got {}", v),
        }
        // the outcome was consumed exactly once
        assert!(f.try_get().is_none());
        assert!(!f.is_ready());
    }

    #[test]
    fn get_awaits_the_outcome() {
        let result = make_channel(1);
        let tx = result.clone();
        let mut f = async_call(|| 7);
        go(async move {
            let r = f.get().await;
            tx.send(r.unwrap()).await;
        });
        assert_eq!(result.sync_receive(), 7);
    }

    #[test]
    fn wait_any_reports_a_ready_future() {
        let result = make_channel(1);
        let tx = result.clone();
        let futures = vec![async_call(|| 10), async_call(|| 20)];
        go(async move {
            let i = wait_any(&futures).await;
            let mut futures = futures;
            let v = futures[i].try_get().expect("winner not ready").unwrap();
            tx.send(v).await;
        });
        let v = result.sync_receive();
        assert!(v == 10 || v == 20, "unexpected value {}", v);
    }

    #[test]
    fn wait_all_completes_every_future() {
        let result = make_channel(1);
        let tx = result.clone();
        let futures = vec![async_call(|| 1), async_call(|| 2), async_call(|| 3)];
        go(async move {
            wait_all(&futures).await;
            let mut sum = 0;
            let mut futures = futures;
            for f in futures.iter_mut() {
                sum += f.try_get().expect("future not ready").unwrap();
            }
            tx.send(sum).await;
        });
        assert_eq!(result.sync_receive(), 6);
    }

    #[test]
    fn wait_any_timeout_expires_on_pending_futures() {
        let result = make_channel(1);
        let tx = result.clone();
        go(async move {
            // never completed: nothing ever sends on its channels
            let pending = vec![Future::<i32> {
                value: make_channel(1),
                error: make_channel(1),
                latch: value_cell(None),
            }];
            let won = wait_any_timeout(&pending, Duration::from_millis(10)).await;
            tx.send(won.is_none()).await;
        });
        assert!(result.sync_receive());
    }

    #[test]
    fn duplicate_futures_merge() {
        let result = make_channel(1);
        let tx = result.clone();
        let f = async_call(|| 5);
        let futures = vec![f];
        go(async move {
            // the slice contains one future; waiting on it twice over
            // is still a single wait
            let i = wait_any(&futures).await;
            tx.send(i as i32).await;
        });
        assert_eq!(result.sync_receive(), 0);
    }
}
