// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Interruption is process-wide, so this lives in its own test binary to
// keep it from disturbing blocked calls in other tests.

use std::thread;
use std::time::Duration;

use libmq::{MqAttr, MqError, OpenOptions};

#[test]
fn raise_fails_blocked_receive_but_not_getattr() {
    let dir = tempfile::tempdir().unwrap();
    let mut opts = OpenOptions::new();
    opts.create(true).dir(dir.path()).attr(MqAttr::new(2, 8));
    let q = opts.open("/interrupt_mq").expect("create");
    let peer = opts.open("/interrupt_mq").expect("attach");

    let receiver = thread::spawn(move || peer.receive_vec().map(|_| ()));
    // An interruption only counts once the receiver is blocked, so keep
    // raising until it gives up.
    while !receiver.is_finished() {
        libmq::raise();
        thread::sleep(Duration::from_millis(20));
    }

    assert!(matches!(receiver.join().unwrap(), Err(MqError::Interrupted)));

    // Restarting operations are unaffected, and the queue still works.
    libmq::raise();
    assert_eq!(q.getattr().expect("getattr").current_messages, 0);
    q.send(b"ok", 1).expect("send");
    assert_eq!(q.receive_vec().expect("receive"), (b"ok".to_vec(), 1));
}
