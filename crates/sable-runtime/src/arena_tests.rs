//! Unit tests for the managed arena.

use crate::arena::{ArenaConfig, ManagedArena, BLOCK_SIZE};
use crate::handle::Handle;
use std::sync::{Arc, Mutex};
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

// ----------------------------------------------------------------------
// Basic allocation
// ----------------------------------------------------------------------

#[test]
fn create_and_destroy() {
    let arena = ManagedArena::create();
    assert_eq!(arena.live_count(), 0);
    assert_eq!(arena.dead_count(), 0);
    arena.destroy();
}

#[test]
fn single_allocation() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 64);
    assert!(!h.is_null());
    assert_eq!(arena.live_count(), 1);
    arena.destroy();
}

#[test]
fn multiple_allocations_unique_handles() {
    let arena = ManagedArena::create();
    let h1 = arena.alloc(Handle::NULL, 32);
    let h2 = arena.alloc(Handle::NULL, 64);
    let h3 = arena.alloc(Handle::NULL, 128);
    assert_ne!(h1, h2);
    assert_ne!(h2, h3);
    assert_eq!(arena.live_count(), 3);
    arena.destroy();
}

#[test]
fn zero_size_returns_null_without_mutating() {
    let arena = ManagedArena::create();
    let before = arena.live_bytes();
    let h = arena.alloc(Handle::NULL, 0);
    assert!(h.is_null());
    assert_eq!(arena.live_bytes(), before);
    assert_eq!(arena.live_count(), 0);
    arena.destroy();
}

#[test]
fn condemned_arena_refuses_alloc() {
    let arena = ManagedArena::create();
    let clone = arena.clone();
    arena.destroy();
    assert!(clone.alloc(Handle::NULL, 16).is_null());
}

#[test]
fn allocation_larger_than_block_size() {
    let arena = ManagedArena::create();
    let large = BLOCK_SIZE + 1024;
    let h = arena.alloc(Handle::NULL, large);
    assert!(!h.is_null());

    let mut lease = arena.lease(h).unwrap();
    lease.write_at(large - 1, &[b'Z']);
    assert_eq!(lease.bytes()[large - 1], b'Z');
    drop(lease);
    arena.destroy();
}

#[test]
fn total_allocated_includes_first_block_and_grows() {
    let arena = ManagedArena::create();
    let initial = arena.total_allocated();
    assert!(initial > 0, "initial allocation includes the first block");
    for _ in 0..100 {
        arena.alloc(Handle::NULL, 1024);
    }
    assert!(arena.total_allocated() > initial);
    arena.destroy();
}

// ----------------------------------------------------------------------
// Pin / unpin
// ----------------------------------------------------------------------

#[test]
fn pin_read_write_persists() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 128);
    write_str(&arena, h, "Hello, Managed Arena!");
    assert_eq!(read_str(&arena, h), "Hello, Managed Arena!");
    arena.destroy();
}

#[test]
fn multiple_pins_return_same_pointer() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 32);
    let p1 = arena.pin(h);
    let p2 = arena.pin(h);
    assert_eq!(p1, p2);
    arena.unpin(h);
    arena.unpin(h);
    arena.destroy();
}

#[test]
fn pin_null_handle_is_null() {
    let arena = ManagedArena::create();
    assert!(arena.pin(Handle::NULL).is_null());
    arena.unpin(Handle::NULL); // must not crash
    arena.destroy();
}

#[test]
fn pin_any_searches_the_tree() {
    let root = ManagedArena::create();
    let child = root.create_child();
    let h = child.alloc(Handle::NULL, 32);
    write_str(&child, h, "deep");

    let ptr = root.pin_any(h);
    assert!(!ptr.is_null());
    root.unpin_any(h);
    root.destroy();
}

// ----------------------------------------------------------------------
// String helpers
// ----------------------------------------------------------------------

#[test]
fn strdup_basic() {
    let arena = ManagedArena::create();
    let h = arena.strdup(Handle::NULL, "hello world");
    assert!(!h.is_null());
    assert_eq!(read_str(&arena, h), "hello world");
    arena.destroy();
}

#[test]
fn strdup_reassignment_marks_old_dead() {
    let arena = ManagedArena::create();
    let h = arena.strdup(Handle::NULL, "first");
    assert_eq!(arena.live_count(), 1);

    let h = arena.strdup(h, "second");
    assert_eq!(arena.live_count(), 1);
    assert_eq!(arena.dead_count(), 1);
    assert_eq!(read_str(&arena, h), "second");
    arena.destroy();
}

#[test]
fn strdup_empty_string() {
    let arena = ManagedArena::create();
    let h = arena.strdup(Handle::NULL, "");
    assert!(!h.is_null());
    assert_eq!(read_str(&arena, h), "");
    arena.destroy();
}

#[test]
fn strndup_truncates_and_caps() {
    let arena = ManagedArena::create();
    let h = arena.strndup(Handle::NULL, "hello world", 5);
    assert_eq!(read_str(&arena, h), "hello");

    let h2 = arena.strndup(Handle::NULL, "short", 100);
    assert_eq!(read_str(&arena, h2), "short");
    arena.destroy();
}

// ----------------------------------------------------------------------
// Accounting
// ----------------------------------------------------------------------

#[test]
fn reassignment_accounting() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 100);
    let live_before = arena.live_bytes();

    let h2 = arena.alloc(h, 250);
    assert!(!h2.is_null());
    assert_eq!(arena.live_bytes(), live_before - 100 + 250);
    assert_eq!(arena.dead_bytes(), 100);
    arena.destroy();
}

#[test]
fn fragmentation_ratio() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 64);
    assert_eq!(arena.fragmentation(), 0.0);
    let _h2 = arena.alloc(h, 64);
    assert!((arena.fragmentation() - 0.5).abs() < 1e-9);
    arena.destroy();
}

// ----------------------------------------------------------------------
// Cleaner / GC
// ----------------------------------------------------------------------

#[test]
fn gc_flush_recycles_dead_entries() {
    let arena = ManagedArena::create();
    let mut h = Handle::NULL;
    for _ in 0..10 {
        h = arena.alloc(h, 64);
    }
    assert_eq!(arena.dead_count(), 9);

    arena.gc_flush();
    assert_eq!(arena.dead_count(), 0);
    assert_eq!(arena.live_count(), 1);
    arena.destroy();
}

#[test]
fn cleaner_preserves_live_entries() {
    let arena = ManagedArena::create();
    let handles: Vec<Handle> = (0..5)
        .map(|i| {
            let h = arena.alloc(Handle::NULL, 64);
            write_str(&arena, h, &format!("live-data-{i}"));
            h
        })
        .collect();

    arena.gc_flush();

    assert_eq!(arena.live_count(), 5);
    for (i, h) in handles.iter().enumerate() {
        assert_eq!(read_str(&arena, *h), format!("live-data-{i}"));
    }
    arena.destroy();
}

#[test]
fn cleaner_respects_leases_on_dead_entries() {
    let arena = ManagedArena::create();
    let h1 = arena.alloc(Handle::NULL, 64);
    let lease = {
        let mut lease = arena.lease(h1).unwrap();
        lease.write(b"pinned-data\0");
        lease
    };

    // Reassignment marks h1 dead while the lease still pins it.
    let _h2 = arena.alloc(h1, 64);
    arena.gc_flush();

    assert_eq!(lease.c_str(), b"pinned-data", "pinned dead entry not cleaned");
    assert_eq!(arena.dead_count(), 1);

    drop(lease);
    arena.gc_flush();
    assert_eq!(arena.dead_count(), 0);
    arena.destroy();
}

#[test]
fn dead_handle_pins_null_after_flush() {
    let arena = ManagedArena::create();
    let h1 = arena.alloc(Handle::NULL, 32);
    let _h2 = arena.alloc(h1, 32);
    arena.gc_flush();

    assert!(arena.pin(h1).is_null(), "recycled generation misses");
    arena.mark_dead(h1); // stale handle: no-op
    arena.unpin(h1); // stale handle: no-op

    // The slot may be reused; the stale handle must still miss.
    let _h3 = arena.alloc(Handle::NULL, 32);
    assert!(arena.pin(h1).is_null());
    arena.destroy();
}

#[test]
fn handle_recycling_bounds_table_growth() {
    let arena = ManagedArena::create();
    let mut h = Handle::NULL;
    for _ in 0..500 {
        h = arena.alloc(h, 32);
    }
    arena.gc_flush();
    assert_eq!(arena.live_count(), 1);
    assert_eq!(arena.dead_count(), 0);
    arena.destroy();
}

// ----------------------------------------------------------------------
// Compaction
// ----------------------------------------------------------------------

#[test]
fn compact_preserves_surviving_payloads() {
    let arena = ManagedArena::create();
    let mut keep = Vec::new();
    for i in 0..100 {
        let h = arena.alloc(Handle::NULL, 256);
        if i % 10 == 0 {
            write_str(&arena, h, &format!("keep-{}", i / 10));
            keep.push(h);
        } else {
            // Immediately reassign into a throwaway to create dead space.
            arena.alloc(h, 1);
        }
    }

    arena.gc_flush();
    arena.compact();

    for (i, h) in keep.iter().enumerate() {
        assert_eq!(read_str(&arena, *h), format!("keep-{i}"));
    }
    arena.destroy();
}

#[test]
fn compact_skips_pinned_entries() {
    let arena = ManagedArena::create();
    let h1 = arena.alloc(Handle::NULL, 64);
    let h2 = arena.alloc(Handle::NULL, 64);
    // Dead space so compaction has work to consider.
    let dead = arena.alloc(Handle::NULL, 64);
    arena.mark_dead(dead);

    let mut pinned = arena.lease(h1).unwrap();
    pinned.write(b"pinned-entry\0");
    let pinned_ptr = pinned.as_ptr();

    write_str(&arena, h2, "unpinned-entry");

    arena.compact();

    assert_eq!(
        pinned.as_ptr(),
        pinned_ptr,
        "pinned entry must not move during compaction"
    );
    assert_eq!(pinned.c_str(), b"pinned-entry");
    assert_eq!(read_str(&arena, h2), "unpinned-entry");
    drop(pinned);
    arena.destroy();
}

#[test]
fn compact_without_dead_bytes_is_noop() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 64);
    write_str(&arena, h, "stable");

    let epoch_before = arena.epoch();
    let ptr_before = arena.pin(h);
    arena.unpin(h);

    arena.compact();

    assert_eq!(arena.epoch(), epoch_before, "no epoch bump without moves");
    let ptr_after = arena.pin(h);
    arena.unpin(h);
    assert_eq!(ptr_before, ptr_after);
    arena.destroy();
}

// ----------------------------------------------------------------------
// Hierarchy
// ----------------------------------------------------------------------

#[test]
fn child_allocations_are_independent() {
    let root = ManagedArena::create();
    let child = root.create_child();

    let rh = root.alloc(Handle::NULL, 64);
    write_str(&root, rh, "root-data");
    let ch = child.alloc(Handle::NULL, 64);
    write_str(&child, ch, "child-data");

    assert_eq!(root.live_count(), 1);
    assert_eq!(child.live_count(), 1);
    assert_eq!(read_str(&root, rh), "root-data");
    assert_eq!(read_str(&child, ch), "child-data");
    root.destroy();
}

#[test]
fn destroy_child_leaves_root_intact() {
    let root = ManagedArena::create();
    let child = root.create_child();

    for i in 0..5 {
        let h = child.alloc(Handle::NULL, 64);
        write_str(&child, h, &format!("child-entry-{i}"));
    }
    let rh = root.alloc(Handle::NULL, 32);
    write_str(&root, rh, "root-survives");

    child.destroy();

    assert_eq!(root.live_count(), 1);
    assert_eq!(read_str(&root, rh), "root-survives");
    root.destroy();
}

#[test]
fn sibling_destroy_does_not_disturb_others() {
    let root = ManagedArena::create();
    let c1 = root.create_child();
    let c2 = root.create_child();
    let c3 = root.create_child();

    let h1 = c1.alloc(Handle::NULL, 32);
    write_str(&c1, h1, "child-1");
    let h2 = c2.alloc(Handle::NULL, 32);
    write_str(&c2, h2, "child-2");
    let h3 = c3.alloc(Handle::NULL, 32);
    write_str(&c3, h3, "child-3");

    c2.destroy();

    assert_eq!(read_str(&c1, h1), "child-1");
    assert_eq!(read_str(&c3, h3), "child-3");
    root.destroy();
}

#[test]
fn destroying_a_parent_condemns_descendants() {
    let root = ManagedArena::create();
    let level1 = root.create_child();
    let level2 = level1.create_child();

    let h = level2.alloc(Handle::NULL, 32);
    assert!(!h.is_null());

    level1.destroy();

    assert!(level2.is_condemned());
    assert!(level2.alloc(Handle::NULL, 32).is_null());
    root.destroy();
}

#[test]
fn shared_mode_aliases_parent() {
    let root = ManagedArena::create();
    let scope = root.create_child();
    let shared = scope.create_shared();

    let h1 = scope.alloc(Handle::NULL, 64);
    let h2 = shared.alloc(Handle::NULL, 64);
    write_str(&scope, h1, "parent-alloc");
    write_str(&shared, h2, "shared-alloc");

    assert!(shared.same_arena(&scope));
    assert_eq!(scope.live_count(), 2, "both land in the same arena");

    // Destroying the shared alias is a no-op.
    shared.destroy();
    assert_eq!(read_str(&scope, h1), "parent-alloc");
    assert_eq!(read_str(&scope, h2), "shared-alloc");
    root.destroy();
}

#[test]
fn root_walks_to_tree_root() {
    let root = ManagedArena::create();
    let c1 = root.create_child();
    let c2 = c1.create_child();

    assert!(root.root().same_arena(&root));
    assert!(c1.root().same_arena(&root));
    assert!(c2.root().same_arena(&root));
    root.destroy();
}

#[test]
fn gc_flush_walks_children() {
    let root = ManagedArena::create();
    let child = root.create_child();

    let mut h = Handle::NULL;
    for _ in 0..20 {
        h = child.alloc(h, 64);
    }
    assert_eq!(child.dead_count(), 19);

    root.gc_flush();
    assert_eq!(child.dead_count(), 0);
    root.destroy();
}

#[test]
fn nested_reassignment_stress() {
    let root = ManagedArena::create();
    let mut arenas = Vec::new();
    let mut handles = Vec::new();

    for depth in 0..5 {
        let parent: &ManagedArena = if depth == 0 { &root } else { &arenas[depth - 1] };
        let arena = parent.create_child();
        let mut h = Handle::NULL;
        for i in 0..100 {
            h = arena.alloc(h, 64);
            write_str(&arena, h, &format!("depth{depth}-iter{i}"));
        }
        arenas.push(arena);
        handles.push(h);
    }

    for depth in 0..5 {
        assert_eq!(
            read_str(&arenas[depth], handles[depth]),
            format!("depth{depth}-iter99")
        );
    }
    for arena in arenas.iter().rev() {
        arena.destroy();
    }
    root.destroy();
}

// ----------------------------------------------------------------------
// Promotion
// ----------------------------------------------------------------------

#[test]
fn promote_moves_payload_to_parent() {
    let root = ManagedArena::create();
    let child = root.create_child();

    let ch = child.alloc(Handle::NULL, 64);
    write_str(&child, ch, "promote-me");

    let rh = root.promote(&child, ch);
    assert!(!rh.is_null());
    assert_eq!(child.live_count(), 0);
    assert_eq!(child.dead_count(), 1);
    assert_eq!(root.live_count(), 1);
    assert_eq!(read_str(&root, rh), "promote-me");

    child.destroy();
    assert_eq!(read_str(&root, rh), "promote-me");
    root.destroy();
}

#[test]
fn promote_survives_child_destroy() {
    let root = ManagedArena::create();
    let child = root.create_child();

    let ch = child.alloc(Handle::NULL, 64);
    write_str(&child, ch, "keep-me");
    let rh = root.promote(&child, ch);

    child.destroy();

    assert_eq!(read_str(&root, rh), "keep-me");
    root.destroy();
}

#[test]
fn promote_preserves_every_byte() {
    let root = ManagedArena::create();
    let child = root.create_child();

    let ch = child.alloc(Handle::NULL, 256);
    let pattern: Vec<u8> = (0..256).map(|i| (i * 7 % 251) as u8).collect();
    child.lease(ch).unwrap().write(&pattern);

    let rh = root.promote(&child, ch);
    child.destroy();

    let lease = root.lease(rh).unwrap();
    assert_eq!(lease.bytes(), &pattern[..]);
    drop(lease);
    root.destroy();
}

#[test]
fn promote_across_levels() {
    let root = ManagedArena::create();
    let child = root.create_child();
    let grandchild = child.create_child();

    let gh = grandchild.alloc(Handle::NULL, 64);
    write_str(&grandchild, gh, "deep-value");

    let ch = child.promote(&grandchild, gh);
    let rh = root.promote(&child, ch);

    grandchild.destroy();
    child.destroy();

    assert_eq!(read_str(&root, rh), "deep-value");
    root.destroy();
}

#[test]
fn promote_invalid_inputs_return_null() {
    let root = ManagedArena::create();
    let child = root.create_child();

    assert!(root.promote(&child, Handle::NULL).is_null());
    assert!(root
        .promote(&child, Handle::from_raw(0x0001_0000_0002_7000))
        .is_null());
    root.destroy();
}

#[test]
fn promote_stress_simulating_function_returns() {
    let root = ManagedArena::create();
    let mut global = Handle::NULL;

    for i in 0..100 {
        let child = root.create_child();
        let local = child.alloc(Handle::NULL, 64);
        write_str(&child, local, &format!("result-{i}"));

        let promoted = root.promote(&child, local);
        if !global.is_null() {
            root.mark_dead(global);
        }
        global = promoted;
        child.destroy();
    }

    root.gc_flush();
    assert_eq!(root.live_count(), 1);
    assert_eq!(read_str(&root, global), "result-99");
    root.destroy();
}

#[test]
fn clone_leaves_source_alive() {
    let root = ManagedArena::create();
    let child = root.create_child();

    let ch = child.alloc(Handle::NULL, 32);
    write_str(&child, ch, "both");

    let rh = root.clone_into(&child, ch);
    assert_eq!(child.live_count(), 1, "clone does not kill the source");
    assert_eq!(read_str(&child, ch), "both");
    assert_eq!(read_str(&root, rh), "both");
    root.destroy();
}

// ----------------------------------------------------------------------
// Cleanup callbacks
// ----------------------------------------------------------------------

#[test]
fn cleanups_fire_on_destroy() {
    let arena = ManagedArena::create();
    let count = Arc::new(Mutex::new(0));
    for key in 1..=3u64 {
        let count = Arc::clone(&count);
        arena.on_cleanup(key, 50, move || *count.lock().unwrap() += 1);
    }
    arena.destroy();
    assert_eq!(*count.lock().unwrap(), 3);
}

#[test]
fn cleanups_fire_in_priority_order() {
    let arena = ManagedArena::create();
    let order = Arc::new(Mutex::new(Vec::new()));

    // Register out of priority order.
    for (key, priority, tag) in [(1u64, 50, 20), (2, 100, 30), (3, 0, 10)] {
        let order = Arc::clone(&order);
        arena.on_cleanup(key, priority, move || order.lock().unwrap().push(tag));
    }
    arena.destroy();
    assert_eq!(*order.lock().unwrap(), vec![10, 20, 30]);
}

#[test]
fn equal_priority_cleanups_are_stable() {
    let arena = ManagedArena::create();
    let order = Arc::new(Mutex::new(Vec::new()));
    for tag in 0..4 {
        let order = Arc::clone(&order);
        arena.on_cleanup(tag as u64, 7, move || order.lock().unwrap().push(tag));
    }
    arena.reset();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    arena.destroy();
}

#[test]
fn removed_cleanup_does_not_fire() {
    let arena = ManagedArena::create();
    let count = Arc::new(Mutex::new(0));
    for key in [1u64, 2] {
        let count = Arc::clone(&count);
        arena.on_cleanup(key, 50, move || *count.lock().unwrap() += 1);
    }
    arena.remove_cleanup(1);
    arena.remove_cleanup(0xDEAD); // unknown key: no-op
    arena.destroy();
    assert_eq!(*count.lock().unwrap(), 1);
}

#[test]
fn cleanup_fires_on_child_destroy() {
    let root = ManagedArena::create();
    let child = root.create_child();
    let fired = Arc::new(Mutex::new(false));
    {
        let fired = Arc::clone(&fired);
        child.on_cleanup(42, 50, move || *fired.lock().unwrap() = true);
    }
    child.destroy();
    assert!(*fired.lock().unwrap());
    root.destroy();
}

// ----------------------------------------------------------------------
// Reset
// ----------------------------------------------------------------------

#[test]
fn reset_marks_all_dead_and_allows_reuse() {
    let arena = ManagedArena::create();
    for i in 0..10 {
        let h = arena.alloc(Handle::NULL, 64);
        write_str(&arena, h, &format!("entry-{i}"));
    }
    assert_eq!(arena.live_count(), 10);

    arena.reset();
    assert_eq!(arena.live_count(), 0);
    assert_eq!(arena.dead_count(), 10);

    let h = arena.strdup(Handle::NULL, "after-reset");
    assert_eq!(read_str(&arena, h), "after-reset");
    arena.destroy();
}

#[test]
fn reset_invokes_cleanups() {
    let arena = ManagedArena::create();
    let fired = Arc::new(Mutex::new(0));
    {
        let fired = Arc::clone(&fired);
        arena.on_cleanup(99, 50, move || *fired.lock().unwrap() += 1);
    }
    arena.reset();
    assert_eq!(*fired.lock().unwrap(), 1);

    // Cleanups are consumed by the reset; destroy does not re-fire them.
    arena.destroy();
    assert_eq!(*fired.lock().unwrap(), 1);
}

// ----------------------------------------------------------------------
// Destroy semantics
// ----------------------------------------------------------------------

#[test]
fn double_destroy_short_circuits() {
    let arena = ManagedArena::create();
    arena.alloc(Handle::NULL, 32);
    let clone = arena.clone();
    arena.destroy();
    clone.destroy(); // must be a detected no-op
}

#[test]
fn destroy_with_outstanding_pin_times_out_and_leaks() {
    let arena = ManagedArena::create_with_config(ArenaConfig {
        destroy_timeout: Duration::from_millis(200),
        ..ArenaConfig::default()
    });
    let h = arena.alloc(Handle::NULL, 64);
    write_str(&arena, h, "still-here");

    let ptr = arena.pin(h);
    assert!(!ptr.is_null());

    let started = std::time::Instant::now();
    arena.destroy();
    let elapsed = started.elapsed();

    assert!(
        elapsed >= Duration::from_millis(150),
        "destroy waits for the configured drain timeout"
    );
    assert!(
        elapsed < Duration::from_secs(3),
        "destroy never hangs on a stuck pin"
    );

    // The pinned block was leaked, so the lease pointer is still readable.
    // SAFETY: the arena leaks (never frees) blocks with outstanding pins,
    // so ptr still points at the 64-byte payload written above.
    let bytes = unsafe { std::slice::from_raw_parts(ptr, 10) };
    assert_eq!(bytes, b"still-here");
    arena.unpin(h); // stale after destroy: no-op
}

// ----------------------------------------------------------------------
// Reassignment stress (seed scenario)
// ----------------------------------------------------------------------

#[test]
fn reassignment_stress_1000_iterations() {
    let arena = ManagedArena::create();
    let mut h = Handle::NULL;
    for i in 0..1000 {
        h = arena.alloc(h, 128);
        write_str(&arena, h, &format!("iteration-{i}"));
    }

    arena.gc_flush();
    assert_eq!(arena.live_count(), 1);
    assert_eq!(arena.dead_count(), 0);
    assert_eq!(read_str(&arena, h), "iteration-999");

    arena.compact();
    arena.gc_flush();
    assert!(arena.used() < 5000 * 128, "memory reclaimed after GC");
    arena.destroy();
}

#[test]
fn pin_write_compact_pin_read_round_trip() {
    let arena = ManagedArena::create();
    let h = arena.alloc(Handle::NULL, 64);
    write_str(&arena, h, "W");

    // Dead space so the pass has something to move.
    let dead = arena.alloc(Handle::NULL, 4096);
    arena.mark_dead(dead);
    arena.compact();

    assert_eq!(read_str(&arena, h), "W");
    arena.destroy();
}

#[test]
fn alloc_pinned_never_moves() {
    let arena = ManagedArena::create();
    let h = arena.alloc_pinned(Handle::NULL, 64);
    write_str(&arena, h, "anchored");
    let ptr_before = arena.pin(h);
    arena.unpin(h);

    let dead = arena.alloc(Handle::NULL, 8192);
    arena.mark_dead(dead);
    arena.gc_flush();
    arena.compact();

    let ptr_after = arena.pin(h);
    arena.unpin(h);
    assert_eq!(ptr_before, ptr_after);
    assert_eq!(read_str(&arena, h), "anchored");
    arena.destroy();
}
