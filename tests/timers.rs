// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Timeouts and time channels, end to end.

use std::time::{Duration, Instant};

use weft::{go, make_channel, select, select_timeout, Timer};

#[test]
fn empty_channel_times_out() {
    let c = make_channel::<i32>(1);
    let out = make_channel::<bool>(1);
    let (c2, out2) = (c.clone(), out.clone());
    go(async move {
        let mut ops = [c2.make_receive()];
        let won = select_timeout(&mut ops, Duration::from_millis(10)).await;
        out2.send(won.is_none()).await;
    });
    assert!(out.sync_receive(), "expected the timer branch");
}

#[test]
fn prompt_send_beats_the_timer() {
    let c = make_channel::<i32>(1);
    let out = make_channel::<i32>(1);
    c.try_send(7).unwrap();
    let (c2, out2) = (c.clone(), out.clone());
    go(async move {
        let mut ops = [c2.make_receive()];
        match select_timeout(&mut ops, Duration::from_secs(5)).await {
            Some(pos) => {
                let v = ops[pos].take_value().expect("winner carries no value");
                out2.send(v).await;
            }
            None => out2.send(-1).await,
        }
    });
    assert_eq!(out.sync_receive(), 7);
}

#[test]
fn timer_channel_joins_a_selection() {
    let c = make_channel::<Instant>(1);
    let out = make_channel::<usize>(1);
    let timer = Timer::new(Duration::from_millis(10));
    let (c2, out2) = (c.clone(), out.clone());
    go(async move {
        let mut ops = [c2.make_receive(), timer.make_receive()];
        let pos = select(&mut ops).await;
        out2.send(pos).await;
    });
    assert_eq!(out.sync_receive(), 1, "expected the timer branch");
}

#[test]
fn fed_channel_beats_the_timer_channel() {
    let c = make_channel::<Instant>(1);
    let out = make_channel::<usize>(1);
    let timer = Timer::new(Duration::from_secs(5));
    c.try_send(Instant::now()).unwrap();
    let (c2, out2) = (c.clone(), out.clone());
    go(async move {
        let mut ops = [c2.make_receive(), timer.make_receive()];
        let pos = select(&mut ops).await;
        out2.send(pos).await;
    });
    assert_eq!(out.sync_receive(), 0, "expected the channel branch");
}

#[test]
fn sleeping_on_a_timer_parks_the_task() {
    let out = make_channel::<Duration>(1);
    let out2 = out.clone();
    let start = Instant::now();
    go(async move {
        let timer = Timer::new(Duration::from_millis(20));
        timer.receiver().receive().await;
        out2.send(start.elapsed()).await;
    });
    let elapsed = out.sync_receive();
    assert!(elapsed >= Duration::from_millis(19), "woke after {:?}", elapsed);
}

#[test]
fn timers_fire_in_deadline_order() {
    let out = make_channel::<i32>(2);
    for (tag, ms) in [(2, 60u64), (1, 10)] {
        let out = out.clone();
        go(async move {
            let timer = Timer::new(Duration::from_millis(ms));
            timer.receiver().receive().await;
            out.send(tag).await;
        });
    }
    assert_eq!(out.sync_receive(), 1);
    assert_eq!(out.sync_receive(), 2);
}
