#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use orc_engine::sequencer::Sequencer;

async fn collect(rx: &mut mpsc::UnboundedReceiver<()>, n: usize) {
    for _ in 0..n {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("job did not run")
            .expect("channel closed");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn same_key_runs_in_submission_order() {
    let seq = Sequencer::new().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    for label in ["C1", "C2"] {
        let log = Arc::clone(&log);
        let tx = tx.clone();
        seq.sequence_with_key(
            "AUD",
            move |l: &'static str| {
                // C1 sleeps so an overlapping C2 would finish first
                if l == "C1" {
                    std::thread::sleep(Duration::from_millis(50));
                }
                log.lock().unwrap().push(l);
                let _ = tx.send(());
            },
            label,
        );
    }

    collect(&mut rx, 2).await;
    assert_eq!(*log.lock().unwrap(), ["C1", "C2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_keys_each_run_once() {
    let seq = Sequencer::new().unwrap();
    let runs = Arc::new(Mutex::new(HashMap::<&str, u32>::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    for key in ["AUD", "USD"] {
        let runs = Arc::clone(&runs);
        let tx = tx.clone();
        seq.sequence(key, move || {
            *runs.lock().unwrap().entry(key).or_default() += 1;
            let _ = tx.send(());
        });
    }

    collect(&mut rx, 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let runs = runs.lock().unwrap();
    assert_eq!(runs.get("AUD"), Some(&1));
    assert_eq!(runs.get("USD"), Some(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_under_one_key_never_overlap() {
    let seq = Sequencer::new().unwrap();
    let busy = Arc::new(Mutex::new(false));
    let overlaps = Arc::new(Mutex::new(0u32));
    let order = Arc::new(Mutex::new(Vec::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();

    for i in 0..20u32 {
        let (busy, overlaps, order, tx) = (
            Arc::clone(&busy),
            Arc::clone(&overlaps),
            Arc::clone(&order),
            tx.clone(),
        );
        seq.sequence("EUR", move || {
            {
                let mut b = busy.lock().unwrap();
                if *b {
                    *overlaps.lock().unwrap() += 1;
                }
                *b = true;
            }
            std::thread::sleep(Duration::from_millis(2));
            order.lock().unwrap().push(i);
            *busy.lock().unwrap() = false;
            let _ = tx.send(());
        });
    }

    collect(&mut rx, 20).await;
    assert_eq!(*overlaps.lock().unwrap(), 0);
    assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_slow_key_does_not_block_another() {
    let seq = Sequencer::new().unwrap();
    let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
    let (tx, mut rx) = mpsc::unbounded_channel();

    seq.sequence("SLOW", move || {
        let _ = gate_rx.recv_timeout(Duration::from_secs(5));
    });
    let t = tx.clone();
    seq.sequence("FAST", move || {
        let _ = t.send(());
    });

    collect(&mut rx, 1).await;
    assert_eq!(seq.pending("FAST"), 0);
    gate_tx.send(()).unwrap();
}

#[test]
fn new_outside_runtime_is_an_error() {
    let err = Sequencer::new().err().expect("must fail without a runtime");
    assert_eq!(err.code().as_str(), "INTERNAL");
}
