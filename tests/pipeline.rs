// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Chains of tasks linked by channels.

use std::thread;

use weft::{go, make_channel};

/// Build a chain of `n` tasks, each adding one to what it receives from
/// its right neighbor, seed a zero at the tail, and return what comes
/// out at the head.
fn run_chain(n: usize) -> i32 {
    let leftmost = make_channel::<i32>(0);
    let mut right = leftmost.clone();
    for _ in 0..n {
        let left = right.clone();
        right = make_channel::<i32>(50);
        let rx = right.clone();
        go(async move {
            let x = rx.receive().await;
            left.send(x + 1).await;
        });
    }
    let tail = right.clone();
    let seeder = thread::spawn(move || tail.sync_send(0));
    let result = leftmost.sync_receive();
    seeder.join().unwrap();
    result
}

#[test]
fn chain_of_zero() {
    assert_eq!(run_chain(0), 0);
}

#[test]
fn chain_of_one() {
    assert_eq!(run_chain(1), 1);
}

#[test]
fn chain_of_thousand() {
    assert_eq!(run_chain(1000), 1000);
}

#[test]
fn rendezvous_hands_off_directly() {
    let ch = make_channel::<i32>(0);
    let out = make_channel::<i32>(0);
    let rx = ch.clone();
    let tx = out.clone();
    go(async move {
        let v = rx.receive().await;
        tx.send(v).await;
    });
    let stx = ch.clone();
    go(async move {
        stx.send(42).await;
    });
    assert_eq!(out.sync_receive(), 42);
    // both sides completed: the channel holds nothing and nobody waits
    assert!(ch.try_receive().is_none());
}

#[test]
fn values_keep_arrival_order_across_parking() {
    let ch = make_channel::<i32>(2);
    let out = make_channel::<i32>(8);
    let tx = ch.clone();
    go(async move {
        for i in 0..8 {
            tx.send(i).await;
        }
    });
    let rx = ch.clone();
    let otx = out.clone();
    go(async move {
        for _ in 0..8 {
            let v = rx.receive().await;
            otx.send(v).await;
        }
    });
    for i in 0..8 {
        assert_eq!(out.sync_receive(), i);
    }
}
