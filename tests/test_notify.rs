// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Empty-to-non-empty notification: registration rules, one-shot firing,
// suppression while a receiver waits, and cleanup on close.

use std::io;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use libmq::{MessageQueue, MqAttr, MqError, Notifier, NotifyEvent, OpenOptions};
use tempfile::TempDir;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("/{prefix}_mq_{n}")
}

/// Records deliveries; identities listed in `dead` report as gone.
#[derive(Default)]
struct Recorder {
    delivered: Mutex<Vec<(u32, NotifyEvent)>>,
    dead: Mutex<Vec<u32>>,
}

impl Recorder {
    fn deliveries(&self) -> Vec<(u32, NotifyEvent)> {
        self.delivered.lock().unwrap().clone()
    }

    fn kill(&self, owner: u32) {
        self.dead.lock().unwrap().push(owner);
    }
}

impl Notifier for Recorder {
    fn deliver(&self, owner: u32, event: &NotifyEvent) -> io::Result<()> {
        self.delivered.lock().unwrap().push((owner, *event));
        Ok(())
    }

    fn is_alive(&self, owner: u32) -> bool {
        !self.dead.lock().unwrap().contains(&owner)
    }
}

fn handle(dir: &TempDir, name: &str, identity: u32, rec: &Arc<Recorder>) -> MessageQueue {
    OpenOptions::new()
        .create(true)
        .dir(dir.path())
        .attr(MqAttr::new(4, 16))
        .identity(NonZeroU32::new(identity).unwrap())
        .notifier(Arc::clone(rec) as Arc<dyn Notifier>)
        .open(name)
        .expect("open")
}

#[test]
fn fires_once_on_empty_to_non_empty() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("once");
    let rec = Arc::new(Recorder::default());
    let q = handle(&dir, &name, 11, &rec);

    let ev = NotifyEvent::signal(10, 77);
    q.notify(Some(ev)).expect("register");

    q.send(b"one", 0).unwrap();
    q.send(b"two", 0).unwrap();
    assert_eq!(rec.deliveries(), vec![(11, ev)]);

    // Registration was consumed: draining and refilling fires nothing.
    q.receive_vec().unwrap();
    q.receive_vec().unwrap();
    q.send(b"three", 0).unwrap();
    assert_eq!(rec.deliveries().len(), 1);
}

#[test]
fn send_to_non_empty_queue_does_not_fire() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("non_empty");
    let rec = Arc::new(Recorder::default());
    let q = handle(&dir, &name, 5, &rec);

    q.send(b"already here", 0).unwrap();
    q.notify(Some(NotifyEvent::none())).unwrap();
    q.send(b"more", 0).unwrap();
    assert!(rec.deliveries().is_empty());

    q.receive_vec().unwrap();
    q.receive_vec().unwrap();
    q.send(b"now", 0).unwrap();
    assert_eq!(rec.deliveries().len(), 1);
}

#[test]
fn second_live_registrant_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("busy");
    let rec = Arc::new(Recorder::default());
    let a = handle(&dir, &name, 1, &rec);
    let b = handle(&dir, &name, 2, &rec);

    a.notify(Some(NotifyEvent::none())).unwrap();
    assert!(matches!(b.notify(Some(NotifyEvent::none())), Err(MqError::Busy)));

    // b cannot withdraw a's registration.
    b.notify(None).unwrap();
    b.send(b"x", 0).unwrap();
    assert_eq!(rec.deliveries().len(), 1);
    assert_eq!(rec.deliveries()[0].0, 1);
}

#[test]
fn same_identity_reregistration_replaces_event() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("replace");
    let rec = Arc::new(Recorder::default());
    let q = handle(&dir, &name, 3, &rec);

    q.notify(Some(NotifyEvent::signal(10, 1))).unwrap();
    q.notify(Some(NotifyEvent::signal(12, 2))).unwrap();
    q.send(b"x", 0).unwrap();
    assert_eq!(rec.deliveries(), vec![(3, NotifyEvent::signal(12, 2))]);
}

#[test]
fn dead_registrant_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("dead");
    let rec = Arc::new(Recorder::default());
    let a = handle(&dir, &name, 21, &rec);
    let b = handle(&dir, &name, 22, &rec);

    a.notify(Some(NotifyEvent::none())).unwrap();
    rec.kill(21);
    b.notify(Some(NotifyEvent::none())).expect("take over");
    a.send(b"x", 0).unwrap();
    assert_eq!(rec.deliveries()[0].0, 22);
}

#[test]
fn unregister_and_close_clear_registration() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("close");
    let rec = Arc::new(Recorder::default());
    let a = handle(&dir, &name, 31, &rec);
    let b = handle(&dir, &name, 32, &rec);

    a.notify(Some(NotifyEvent::none())).unwrap();
    a.notify(None).unwrap();
    b.notify(Some(NotifyEvent::none())).expect("free after unregister");
    b.close().expect("close");

    a.notify(Some(NotifyEvent::none())).expect("free after close");
    drop(a);

    let c = handle(&dir, &name, 33, &rec);
    c.notify(Some(NotifyEvent::none())).expect("free after drop");
    c.send(b"x", 0).unwrap();
    assert_eq!(rec.deliveries(), vec![(33, NotifyEvent::none())]);
}

#[test]
fn waiting_receiver_suppresses_notification() {
    let dir = tempfile::tempdir().unwrap();
    let name = unique_name("waiting");
    let rec = Arc::new(Recorder::default());
    let q = handle(&dir, &name, 41, &rec);
    let peer = handle(&dir, &name, 42, &rec);

    q.notify(Some(NotifyEvent::none())).unwrap();
    let receiver = thread::spawn(move || peer.receive_vec().expect("receive"));
    thread::sleep(Duration::from_millis(100));

    q.send(b"taken directly", 0).unwrap();
    assert_eq!(receiver.join().unwrap().0, b"taken directly");
    assert!(rec.deliveries().is_empty());

    // Registration is still in place for the next empty-to-non-empty send.
    q.send(b"later", 0).unwrap();
    assert_eq!(rec.deliveries().len(), 1);
}
