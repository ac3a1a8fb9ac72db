// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timer service.
//!
//! One dedicated thread owns every alarm, sorted by expiry. The thread
//! sleeps until the earliest deadline or an interrupt (a new, reset, or
//! cancelled alarm; shutdown), pops everything due, and delivers with
//! the lock released: task alarms notify the waiting selector, channel
//! alarms best-effort-send the current time onto a capacity-1 time
//! channel. A cancel racing an expiry is tolerated on both sides — the
//! later arrival is a no-op.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::channel::{make_channel, Channel, Receiver};
use crate::select::ChannelOp;
use crate::waitq::NotifyTarget;

pub(crate) type AlarmId = u64;

#[derive(Clone)]
enum AlarmTarget {
    /// Wake a waiting selector through its timer notification.
    Task(Arc<dyn NotifyTarget>),
    /// Deliver the current time onto a time channel.
    Channel(Channel<Instant>),
}

struct Alarm {
    deadline: Instant,
    target: AlarmTarget,
    armed: bool,
    /// Bumped on every reset; stale queue entries are skipped.
    gen: u64,
}

struct TimerState {
    alarms: HashMap<AlarmId, Alarm>,
    queue: BinaryHeap<Reverse<(Instant, AlarmId, u64)>>,
    next_id: AlarmId,
    shutdown: bool,
}

struct TimerInner {
    state: Mutex<TimerState>,
    tick: Condvar,
}

/// Handle to the alarm thread.
pub(crate) struct TimerService {
    inner: Arc<TimerInner>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerService {
    pub(crate) fn new() -> Self {
        let inner = Arc::new(TimerInner {
            state: Mutex::new(TimerState {
                alarms: HashMap::new(),
                queue: BinaryHeap::new(),
                next_id: 0,
                shutdown: false,
            }),
            tick: Condvar::new(),
        });
        let run_inner = inner.clone();
        let handle = thread::Builder::new()
            .name("weft-timer".to_string())
            .spawn(move || run(&run_inner))
            .expect("failed to spawn timer thread");
        Self {
            inner,
            thread: Mutex::new(Some(handle)),
        }
    }

    fn arm(&self, deadline: Instant, target: AlarmTarget) -> AlarmId {
        let mut s = self.inner.state.lock();
        let id = s.next_id;
        s.next_id += 1;
        s.alarms.insert(
            id,
            Alarm {
                deadline,
                target,
                armed: true,
                gen: 0,
            },
        );
        s.queue.push(Reverse((deadline, id, 0)));
        self.inner.tick.notify_one();
        id
    }

    /// Arm an alarm that notifies a waiting selector.
    pub(crate) fn schedule_task(
        &self,
        target: Arc<dyn NotifyTarget>,
        deadline: Instant,
    ) -> AlarmId {
        self.arm(deadline, AlarmTarget::Task(target))
    }

    /// Arm an alarm that sends the expiry time onto a time channel.
    pub(crate) fn schedule_channel(&self, chan: Channel<Instant>, deadline: Instant) -> AlarmId {
        self.arm(deadline, AlarmTarget::Channel(chan))
    }

    /// Re-arm an alarm for a new deadline, whether or not it fired.
    pub(crate) fn reset(&self, id: AlarmId, deadline: Instant) {
        let mut s = self.inner.state.lock();
        if let Some(a) = s.alarms.get_mut(&id) {
            a.gen += 1;
            a.deadline = deadline;
            a.armed = true;
            let gen = a.gen;
            s.queue.push(Reverse((deadline, id, gen)));
            self.inner.tick.notify_one();
        }
    }

    /// Stop an alarm but keep it known, so a later reset can re-arm it.
    pub(crate) fn disarm(&self, id: AlarmId) {
        let mut s = self.inner.state.lock();
        if let Some(a) = s.alarms.get_mut(&id) {
            a.armed = false;
        }
    }

    /// Forget an alarm entirely. Racing an in-flight expiry is fine;
    /// the delivery side tolerates it.
    pub(crate) fn cancel(&self, id: AlarmId) {
        let mut s = self.inner.state.lock();
        s.alarms.remove(&id);
    }

    /// Interrupt the alarm thread and join it.
    pub(crate) fn shutdown(&self) {
        {
            let mut s = self.inner.state.lock();
            s.shutdown = true;
            self.inner.tick.notify_one();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inner: &TimerInner) {
    tracing::debug!("timer thread started");
    let mut s = inner.state.lock();
    loop {
        if s.shutdown {
            break;
        }
        let now = Instant::now();
        let mut due: Vec<AlarmTarget> = Vec::new();
        while let Some(&Reverse((when, id, gen))) = s.queue.peek() {
            if when > now {
                break;
            }
            s.queue.pop();
            if let Some(a) = s.alarms.get_mut(&id) {
                if a.armed && a.gen == gen {
                    a.armed = false;
                    due.push(a.target.clone());
                }
            }
        }
        if !due.is_empty() {
            // deliver with the lock released; delivery takes channel
            // and selector locks
            MutexGuard::unlocked(&mut s, || {
                for target in due {
                    deliver(target);
                }
            });
            continue;
        }
        match s.queue.peek() {
            Some(&Reverse((when, _, _))) => {
                inner.tick.wait_until(&mut s, when);
            }
            None => inner.tick.wait(&mut s),
        }
    }
    tracing::debug!("timer thread stopped");
}

fn deliver(target: AlarmTarget) {
    match target {
        AlarmTarget::Task(sel) => {
            tracing::trace!("alarm expired for a waiting task");
            sel.timer_expired();
        }
        AlarmTarget::Channel(chan) => {
            tracing::trace!("alarm expired onto a time channel");
            let _ = chan.try_send(Instant::now());
        }
    }
}

static SERVICE: Lazy<TimerService> = Lazy::new(TimerService::new);

/// The process-wide timer service, spawned on first use.
pub(crate) fn service() -> &'static TimerService {
    &SERVICE
}

/// A one-shot timer backed by a capacity-1 channel of timestamps. On
/// expiry the service delivers the current time onto the channel;
/// receive on it like on any other channel, including inside a
/// selection.
pub struct Timer {
    chan: Channel<Instant>,
    alarm: AlarmId,
}

impl Timer {
    /// Arm a timer firing once after `duration`.
    pub fn new(duration: Duration) -> Self {
        let chan = make_channel(1);
        let alarm = service().schedule_channel(chan.clone(), Instant::now() + duration);
        Self { chan, alarm }
    }

    /// The receiving view of the time channel.
    pub fn receiver(&self) -> Receiver<Instant> {
        self.chan.receiver()
    }

    /// A receive descriptor on the time channel, for selections.
    pub fn make_receive(&self) -> ChannelOp<Instant> {
        self.chan.make_receive()
    }

    /// Re-arm for a new duration from now. A tick from before the
    /// reset that already landed on the channel is drained, so a
    /// consumer cannot observe it.
    pub fn reset(&self, duration: Duration) {
        let _ = self.chan.try_receive();
        service().reset(self.alarm, Instant::now() + duration);
    }

    /// Stop the timer; a later `reset` re-arms it.
    pub fn stop(&self) {
        service().disarm(self.alarm);
        let _ = self.chan.try_receive();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        service().cancel(self.alarm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_fires_after_duration() {
        let start = Instant::now();
        let t = Timer::new(Duration::from_millis(10));
        let fired_at = t.receiver().sync_receive();
        assert!(start.elapsed() >= Duration::from_millis(9));
        assert!(fired_at >= start);
    }

    #[test]
    fn alarms_deliver_in_expiry_order() {
        let early = Timer::new(Duration::from_millis(10));
        let late = Timer::new(Duration::from_millis(40));
        let t1 = early.receiver().sync_receive();
        let t2 = late.receiver().sync_receive();
        assert!(t1 <= t2);
    }

    #[test]
    fn reset_moves_the_deadline_up() {
        let start = Instant::now();
        let t = Timer::new(Duration::from_secs(60));
        t.reset(Duration::from_millis(10));
        t.receiver().sync_receive();
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[test]
    fn stop_prevents_delivery() {
        let t = Timer::new(Duration::from_millis(5));
        t.stop();
        std::thread::sleep(Duration::from_millis(30));
        assert!(t.receiver().try_receive().is_none());
    }

    #[test]
    fn stop_racing_expiry_is_silent() {
        let t = Timer::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(15));
        // the tick has landed by now; stop drains it
        t.stop();
        assert!(t.receiver().try_receive().is_none());
    }

    #[test]
    fn reset_after_fire_rearms() {
        let t = Timer::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(15));
        t.reset(Duration::from_millis(5));
        // the stale tick is gone and a fresh one arrives
        let fired_at = t.receiver().sync_receive();
        assert!(fired_at.elapsed() < Duration::from_secs(1));
    }
}
