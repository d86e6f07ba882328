//! C ABI for generated code.
//!
//! The code generator emits calls against these symbols; linking the
//! `staticlib` build of this crate resolves them. Arenas cross the boundary
//! as opaque pointers to boxed [`ManagedArena`] wrappers, handles as raw
//! `u64` values. Null-pointer and null-handle inputs follow the runtime's
//! failure semantics: null out, no-op, never a crash.

use crate::arena::ManagedArena;
use crate::handle::Handle;
use std::ffi::{c_char, c_void, CStr};

/// The null handle value.
#[no_mangle]
pub static RT_HANDLE_NULL: u64 = 0;

/// Storage block size; allocations above it get a dedicated block.
#[no_mangle]
pub static RT_MANAGED_BLOCK_SIZE: usize = crate::arena::BLOCK_SIZE;

/// Create a root arena.
#[no_mangle]
pub extern "C" fn rt_managed_arena_create() -> *mut ManagedArena {
    Box::into_raw(Box::new(ManagedArena::create()))
}

/// Create a child arena of `parent`. Null parent yields null.
///
/// # Safety
/// `parent` must be null or a pointer previously returned by one of the
/// `rt_managed_arena_create*` functions and not yet destroyed.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_arena_create_child(
    parent: *mut ManagedArena,
) -> *mut ManagedArena {
    let Some(parent) = (unsafe { parent.as_ref() }) else {
        return std::ptr::null_mut();
    };
    Box::into_raw(Box::new(parent.create_child()))
}

/// Create a shared alias for `parent`: allocations land in the parent and
/// destroying the alias is a no-op.
///
/// # Safety
/// Same contract as [`rt_managed_arena_create_child`].
#[no_mangle]
pub unsafe extern "C" fn rt_managed_arena_create_shared(
    parent: *mut ManagedArena,
) -> *mut ManagedArena {
    let Some(parent) = (unsafe { parent.as_ref() }) else {
        return std::ptr::null_mut();
    };
    Box::into_raw(Box::new(parent.create_shared()))
}

/// Destroy `arena` and release its wrapper. Null is a no-op.
///
/// # Safety
/// `arena` must be null or a live pointer from `rt_managed_arena_create*`;
/// it must not be used after this call.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_arena_destroy(arena: *mut ManagedArena) {
    if arena.is_null() {
        return;
    }
    let arena = unsafe { Box::from_raw(arena) };
    arena.destroy();
}

/// Destroy a child arena. Identical to [`rt_managed_arena_destroy`]; the
/// separate name keeps generated epilogues self-describing.
///
/// # Safety
/// Same contract as [`rt_managed_arena_destroy`].
#[no_mangle]
pub unsafe extern "C" fn rt_managed_arena_destroy_child(arena: *mut ManagedArena) {
    unsafe { rt_managed_arena_destroy(arena) }
}

/// Fire cleanups and mark every handle dead; the arena stays usable.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_arena_reset(arena: *mut ManagedArena) {
    if let Some(arena) = unsafe { arena.as_ref() } {
        arena.reset();
    }
}

/// Allocate `size` bytes; a non-null `old` handle is marked dead on
/// success. Returns the null handle on failure.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_alloc(
    arena: *mut ManagedArena,
    old: u64,
    size: usize,
) -> u64 {
    let Some(arena) = (unsafe { arena.as_ref() }) else {
        return 0;
    };
    arena.alloc(Handle::from_raw(old), size).to_raw()
}

/// Allocate permanently pinned storage (never moved by compaction).
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_alloc_pinned(
    arena: *mut ManagedArena,
    old: u64,
    size: usize,
) -> u64 {
    let Some(arena) = (unsafe { arena.as_ref() }) else {
        return 0;
    };
    arena.alloc_pinned(Handle::from_raw(old), size).to_raw()
}

/// Mark a handle dead without reallocating.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_mark_dead(arena: *mut ManagedArena, h: u64) {
    if let Some(arena) = unsafe { arena.as_ref() } {
        arena.mark_dead(Handle::from_raw(h));
    }
}

/// Pin a handle, returning its current payload pointer or null.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_pin(arena: *mut ManagedArena, h: u64) -> *mut c_void {
    let Some(arena) = (unsafe { arena.as_ref() }) else {
        return std::ptr::null_mut();
    };
    arena.pin(Handle::from_raw(h)).cast()
}

/// Pin a handle, searching `tree_root` and its descendants.
///
/// # Safety
/// `tree_root` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_pin_any(
    tree_root: *mut ManagedArena,
    h: u64,
) -> *mut c_void {
    let Some(arena) = (unsafe { tree_root.as_ref() }) else {
        return std::ptr::null_mut();
    };
    arena.pin_any(Handle::from_raw(h)).cast()
}

/// Release one pin.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_unpin(arena: *mut ManagedArena, h: u64) {
    if let Some(arena) = unsafe { arena.as_ref() } {
        arena.unpin(Handle::from_raw(h));
    }
}

/// Release one pin anywhere in `tree_root`'s subtree.
///
/// # Safety
/// `tree_root` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_unpin_any(tree_root: *mut ManagedArena, h: u64) {
    if let Some(arena) = unsafe { tree_root.as_ref() } {
        arena.unpin_any(Handle::from_raw(h));
    }
}

/// Promote a handle from `src` into `dest`, marking the source dead.
///
/// # Safety
/// `dest` and `src` must each be null or live arena pointers.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_promote(
    dest: *mut ManagedArena,
    src: *mut ManagedArena,
    h: u64,
) -> u64 {
    let (Some(dest), Some(src)) = (unsafe { dest.as_ref() }, unsafe { src.as_ref() }) else {
        return 0;
    };
    dest.promote(src, Handle::from_raw(h)).to_raw()
}

/// String-typed promote; identical semantics.
///
/// # Safety
/// Same contract as [`rt_managed_promote`].
#[no_mangle]
pub unsafe extern "C" fn rt_managed_promote_string(
    dest: *mut ManagedArena,
    src: *mut ManagedArena,
    h: u64,
) -> u64 {
    unsafe { rt_managed_promote(dest, src, h) }
}

/// Copy a payload across arenas without marking the source dead.
///
/// # Safety
/// Same contract as [`rt_managed_promote`].
#[no_mangle]
pub unsafe extern "C" fn rt_managed_clone(
    dest: *mut ManagedArena,
    src: *mut ManagedArena,
    h: u64,
) -> u64 {
    let (Some(dest), Some(src)) = (unsafe { dest.as_ref() }, unsafe { src.as_ref() }) else {
        return 0;
    };
    dest.clone_into(src, Handle::from_raw(h)).to_raw()
}

/// Allocate a NUL-terminated copy of `s`. Null `s` yields the null handle.
///
/// # Safety
/// `arena` must be null or a live arena pointer; `s` must be null or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_strdup(
    arena: *mut ManagedArena,
    old: u64,
    s: *const c_char,
) -> u64 {
    let Some(arena) = (unsafe { arena.as_ref() }) else {
        return 0;
    };
    if s.is_null() {
        return 0;
    }
    let s = unsafe { CStr::from_ptr(s) }.to_string_lossy();
    arena.strdup(Handle::from_raw(old), &s).to_raw()
}

/// Like [`rt_managed_strdup`], copying at most `n` bytes.
///
/// # Safety
/// Same contract as [`rt_managed_strdup`].
#[no_mangle]
pub unsafe extern "C" fn rt_managed_strndup(
    arena: *mut ManagedArena,
    old: u64,
    s: *const c_char,
    n: usize,
) -> u64 {
    let Some(arena) = (unsafe { arena.as_ref() }) else {
        return 0;
    };
    if s.is_null() {
        return 0;
    }
    let s = unsafe { CStr::from_ptr(s) }.to_string_lossy();
    arena.strndup(Handle::from_raw(old), &s, n).to_raw()
}

/// Run one compaction pass.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_compact(arena: *mut ManagedArena) {
    if let Some(arena) = unsafe { arena.as_ref() } {
        arena.compact();
    }
}

/// Drain queued dead entries across the arena's subtree.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_gc_flush(arena: *mut ManagedArena) {
    if let Some(arena) = unsafe { arena.as_ref() } {
        arena.gc_flush();
    }
}

/// Number of live handles. Null arena yields 0.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_live_count(arena: *mut ManagedArena) -> usize {
    unsafe { arena.as_ref() }.map_or(0, ManagedArena::live_count)
}

/// Number of dead, unrecycled handles. Null arena yields 0.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_dead_count(arena: *mut ManagedArena) -> usize {
    unsafe { arena.as_ref() }.map_or(0, ManagedArena::dead_count)
}

/// Live plus dead payload bytes.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_arena_used(arena: *mut ManagedArena) -> usize {
    unsafe { arena.as_ref() }.map_or(0, ManagedArena::used)
}

/// Fraction of used bytes that are dead.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_fragmentation(arena: *mut ManagedArena) -> f64 {
    unsafe { arena.as_ref() }.map_or(0.0, ManagedArena::fragmentation)
}

/// Total block storage currently allocated. Null arena yields 0.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_total_allocated(arena: *mut ManagedArena) -> usize {
    unsafe { arena.as_ref() }.map_or(0, ManagedArena::total_allocated)
}

/// Callback data crossing the C boundary.
struct CallbackData(*mut c_void);

// SAFETY: the pointer is an opaque token passed straight back to the C
// callback; cleanup callbacks fire on whichever thread runs reset/destroy,
// which is the C contract for this API.
unsafe impl Send for CallbackData {}

/// Register a cleanup callback fired at reset or destroy, keyed by `data`.
/// Returns false for a null arena, null callback, or condemned arena.
///
/// # Safety
/// `arena` must be null or a live arena pointer; `f`, when called, must
/// tolerate `data`.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_on_cleanup(
    arena: *mut ManagedArena,
    data: *mut c_void,
    f: Option<unsafe extern "C" fn(*mut c_void)>,
    priority: i32,
) -> bool {
    let (Some(arena), Some(f)) = (unsafe { arena.as_ref() }, f) else {
        return false;
    };
    let payload = CallbackData(data);
    arena.on_cleanup(data as u64, priority, move || {
        let payload = payload;
        // SAFETY: f and its data were supplied together by the C caller,
        // which promises f accepts this pointer.
        unsafe { f(payload.0) }
    })
}

/// Deregister every callback registered under `data`.
///
/// # Safety
/// `arena` must be null or a live arena pointer.
#[no_mangle]
pub unsafe extern "C" fn rt_managed_remove_cleanup(arena: *mut ManagedArena, data: *mut c_void) {
    if let Some(arena) = unsafe { arena.as_ref() } {
        arena.remove_cleanup(data as u64);
    }
}
