// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Futures across tasks, end to end.

use std::thread;
use std::time::Duration;

use weft::{async_call, go, make_channel, wait_all, wait_any};

#[test]
fn awaited_call_delivers_its_result() {
    let result = make_channel::<i32>(1);
    let tx = result.clone();
    go(async move {
        let mut f = async_call(|| {
            thread::sleep(Duration::from_millis(5));
            41 + 1
        });
        let r = f.get().await;
        tx.send(r.unwrap_or(-1)).await;
    });
    assert_eq!(result.sync_receive(), 42);
}

#[test]
fn error_token_is_observed_exactly_once() {
    let result = make_channel::<String>(1);
    let second = make_channel::<bool>(1);
    let (tx, tx2) = (result.clone(), second.clone());
    go(async move {
        let mut f = async_call(|| -> i32 { panic!("exploded") });
        let message = match f.get().await {
            Err(e) => e.message().to_string(),
            Ok(v) => format!("unexpected value {}", v),
        };
        tx.send(message).await;
        // consumed: the future reports nothing further
        tx2.send(f.try_get().is_none()).await;
    });
    assert!(result.sync_receive().contains("exploded"));
    assert!(second.sync_receive());
}

#[test]
fn wait_any_returns_a_completed_future() {
    let result = make_channel::<i32>(1);
    let tx = result.clone();
    go(async move {
        let futures = vec![
            async_call(|| {
                thread::sleep(Duration::from_millis(20));
                1
            }),
            async_call(|| 2),
        ];
        let i = wait_any(&futures).await;
        let mut futures = futures;
        let v = futures[i].try_get().expect("winner not ready").unwrap();
        tx.send(v).await;
    });
    let v = result.sync_receive();
    assert!(v == 1 || v == 2, "unexpected value {}", v);
}

#[test]
fn wait_all_gathers_every_result() {
    let result = make_channel::<i32>(1);
    let tx = result.clone();
    go(async move {
        let futures: Vec<_> = (0..4).map(|i| async_call(move || i * 10)).collect();
        wait_all(&futures).await;
        let mut futures = futures;
        let mut sum = 0;
        for f in futures.iter_mut() {
            sum += f.try_get().expect("future not ready").unwrap();
        }
        tx.send(sum).await;
    });
    assert_eq!(result.sync_receive(), 60);
}

#[test]
fn async_chain_like_a_remote_call() {
    // the async wrapper sample: compute off-task, send the result on
    let results = make_channel::<i32>(1);
    let tx = results.clone();
    go(async move {
        let mut f = async_call(|| 0 + 1);
        let r = match f.get().await {
            Ok(v) => v,
            Err(_) => -1,
        };
        tx.send(r).await;
    });
    assert_eq!(results.sync_receive(), 1);
}
