//! Multi-threaded arena tests: concurrent pins, allocation, and compaction.

use crate::arena::ManagedArena;
use crate::handle::Handle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn write_str(arena: &ManagedArena, h: Handle, s: &str) {
    let mut lease = arena.lease(h).expect("valid handle");
    lease.write(s.as_bytes());
    lease.write_at(s.len(), &[0]);
}

fn read_str(arena: &ManagedArena, h: Handle) -> String {
    let lease = arena.lease(h).expect("valid handle");
    String::from_utf8_lossy(lease.c_str()).into_owned()
}

#[test]
fn concurrent_pin_and_compact() {
    let arena = ManagedArena::create();
    let stop = Arc::new(AtomicBool::new(false));

    let handles: Vec<Handle> = (0..20)
        .map(|i| {
            let h = arena.alloc(Handle::NULL, 64);
            write_str(&arena, h, &format!("entry-{i}"));
            h
        })
        .collect();

    // Churn so compaction always has dead space to consider.
    let mut churn = Handle::NULL;
    for _ in 0..50 {
        churn = arena.alloc(churn, 128);
    }

    let mut pinners = Vec::new();
    for _ in 0..4 {
        let arena = arena.clone();
        let handles = handles.clone();
        let stop = Arc::clone(&stop);
        pinners.push(thread::spawn(move || {
            for i in 0..10_000 {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                let h = handles[i % handles.len()];
                let ptr = arena.pin(h);
                if !ptr.is_null() {
                    // SAFETY: the pin keeps the payload stationary; reading
                    // one byte of the 64-byte payload is in bounds.
                    let _first = unsafe { std::ptr::read_volatile(ptr) };
                }
                arena.unpin(h);
            }
        }));
    }

    for _ in 0..5 {
        arena.compact();
        thread::sleep(Duration::from_millis(10));
    }

    stop.store(true, Ordering::Relaxed);
    for pinner in pinners {
        pinner.join().unwrap();
    }

    for (i, h) in handles.iter().enumerate() {
        assert_eq!(read_str(&arena, *h), format!("entry-{i}"));
    }
    arena.destroy();
}

#[test]
fn concurrent_alloc_from_many_threads() {
    let arena = ManagedArena::create();

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let arena = arena.clone();
            thread::spawn(move || {
                let mut handles = Vec::new();
                for i in 0..250 {
                    let h = arena.alloc(Handle::NULL, 48);
                    assert!(!h.is_null());
                    write_str(&arena, h, &format!("t{t}-{i}"));
                    handles.push((h, format!("t{t}-{i}")));
                }
                handles
            })
        })
        .collect();

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.join().unwrap());
    }

    assert_eq!(arena.live_count(), 1000);
    for (h, expected) in all {
        assert_eq!(read_str(&arena, h), expected);
    }
    arena.destroy();
}

#[test]
fn concurrent_reassignment_with_background_cleaner() {
    let arena = ManagedArena::create();

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let arena = arena.clone();
            thread::spawn(move || {
                let mut h = Handle::NULL;
                for i in 0..500 {
                    h = arena.alloc(h, 96);
                    write_str(&arena, h, &format!("worker{t}-iter{i}"));
                }
                h
            })
        })
        .collect();

    let finals: Vec<Handle> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    arena.gc_flush();
    assert_eq!(arena.live_count(), 4);
    assert_eq!(arena.dead_count(), 0);
    for (t, h) in finals.iter().enumerate() {
        assert_eq!(read_str(&arena, *h), format!("worker{t}-iter499"));
    }
    arena.destroy();
}

#[test]
fn writes_before_unpin_visible_to_next_pin() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 64);
    write_str(&arena, h, "initial");

    let writer = {
        let arena = arena.clone();
        thread::spawn(move || {
            let mut lease = arena.lease(h).unwrap();
            lease.write(b"updated\0");
        })
    };
    writer.join().unwrap();

    // unpin releases, the following pin acquires: the write is visible.
    assert_eq!(read_str(&arena, h), "updated");
    arena.destroy();
}
