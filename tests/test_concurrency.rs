// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Blocking behaviour across threads: wakeups, cancellation, and many
// producers and consumers sharing one queue.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use libmq::{CancelToken, MessageQueue, MqAttr, MqError, OpenOptions};
use tempfile::TempDir;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/{prefix}_mq_{n}")
}

fn create(dir: &TempDir, name: &str, max: usize, size: usize) -> MessageQueue {
    OpenOptions::new()
        .create(true)
        .dir(dir.path())
        .attr(MqAttr::new(max, size))
        .open(name)
        .expect("create")
}

fn attach(dir: &TempDir, name: &str) -> MessageQueue {
    OpenOptions::new().dir(dir.path()).open(name).expect("attach")
}

#[test]
fn blocked_receiver_wakes_on_send() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("wake_recv");
    let q = create(&dir, &name, 2, 16);
    let peer = attach(&dir, &name);

    let receiver = thread::spawn(move || {
        let start = Instant::now();
        let got = peer.receive_vec().expect("receive");
        (got, start.elapsed())
    });

    thread::sleep(Duration::from_millis(100));
    q.send(b"wake up", 7).expect("send");

    let ((msg, prio), waited) = receiver.join().unwrap();
    assert_eq!((msg.as_slice(), prio), (&b"wake up"[..], 7));
    assert!(waited >= Duration::from_millis(80));
}

#[test]
fn blocked_sender_wakes_on_receive() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("wake_send");
    let q = create(&dir, &name, 1, 8);
    q.send(b"first", 0).expect("fill");

    let peer = attach(&dir, &name);
    let sender = thread::spawn(move || {
        peer.send(b"second", 0).expect("blocked send");
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!sender.is_finished());
    assert_eq!(q.receive_vec().unwrap().0, b"first");
    sender.join().unwrap();
    assert_eq!(q.receive_vec().unwrap().0, b"second");
}

#[test]
fn timed_receive_gets_message_before_deadline() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("timed_ok");
    let q = create(&dir, &name, 2, 8);
    let peer = attach(&dir, &name);

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        peer.send(b"in time", 1).expect("send");
    });

    let mut buf = [0u8; 8];
    let deadline = SystemTime::now() + Duration::from_secs(5);
    let (len, prio) = q.timedreceive(&mut buf, deadline).expect("timedreceive");
    assert_eq!((&buf[..len], prio), (&b"in time"[..], 1));
    sender.join().unwrap();
}

#[test]
fn cancelled_receive_returns_and_queue_stays_usable() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("cancel");
    let q = create(&dir, &name, 2, 8);
    let peer = attach(&dir, &name);

    let (tx, rx) = mpsc::channel();
    let receiver = thread::spawn(move || {
        tx.send(CancelToken::current()).unwrap();
        let first = peer.receive_vec();
        // Sticky until reset.
        let again = peer.receive_vec();
        CancelToken::current().reset();
        (first.map(|_| ()), again.map(|_| ()))
    });

    let token = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(80));
    token.cancel();

    let (first, again) = receiver.join().unwrap();
    assert!(matches!(first, Err(MqError::Cancelled)));
    assert!(matches!(again, Err(MqError::Cancelled)));

    // The cancelled waiter left no trace: the next send is seen by a
    // fresh receiver and the count is exact.
    q.send(b"after", 0).expect("send");
    assert_eq!(q.getattr().unwrap().current_messages, 1);
    assert_eq!(q.receive_vec().unwrap().0, b"after");
}

#[test]
fn cancelled_send_leaves_queue_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("cancel_send");
    let q = create(&dir, &name, 1, 8);
    q.send(b"full", 0).unwrap();
    let peer = attach(&dir, &name);

    let (tx, rx) = mpsc::channel();
    let sender = thread::spawn(move || {
        tx.send(CancelToken::current()).unwrap();
        let r = peer.send(b"never", 3);
        CancelToken::current().reset();
        r
    });
    let token = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(80));
    token.cancel();

    assert!(matches!(sender.join().unwrap(), Err(MqError::Cancelled)));
    assert_eq!(q.getattr().unwrap().current_messages, 1);
    assert_eq!(q.receive_vec().unwrap(), (b"full".to_vec(), 0));
}

#[test]
fn producers_and_consumers_deliver_every_message_once() {
    const PRODUCERS: usize = 4;
    const CONSUMERS: usize = 3;
    const PER_PRODUCER: usize = 250;

    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("mpmc");
    let q = Arc::new(create(&dir, &name, 4, 8));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let q = attach(&dir, &name);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let id = (p * PER_PRODUCER + i) as u64;
                    q.send(&id.to_le_bytes(), (i % 3) as u32).expect("send");
                }
            })
        })
        .collect();

    let remaining = Arc::new(AtomicUsize::new(PRODUCERS * PER_PRODUCER));
    let consumers: Vec<_> = (0..CONSUMERS)
        .map(|_| {
            let q = Arc::clone(&q);
            let remaining = Arc::clone(&remaining);
            thread::spawn(move || {
                let mut seen = Vec::new();
                let mut buf = [0u8; 8];
                loop {
                    let deadline = SystemTime::now() + Duration::from_millis(200);
                    match q.timedreceive(&mut buf, deadline) {
                        Ok((8, _)) => {
                            seen.push(u64::from_le_bytes(buf));
                            remaining.fetch_sub(1, Ordering::SeqCst);
                        }
                        Ok((len, _)) => panic!("unexpected length {len}"),
                        Err(MqError::TimedOut) if remaining.load(Ordering::SeqCst) == 0 => {
                            break
                        }
                        Err(MqError::TimedOut) => {}
                        Err(e) => panic!("receive failed: {e}"),
                    }
                }
                seen
            })
        })
        .collect();

    for p in producers {
        p.join().unwrap();
    }
    let mut all = HashSet::new();
    for c in consumers {
        for id in c.join().unwrap() {
            assert!(all.insert(id), "message {id} delivered twice");
        }
    }
    assert_eq!(all.len(), PRODUCERS * PER_PRODUCER);
    assert_eq!(q.getattr().unwrap().current_messages, 0);
}
