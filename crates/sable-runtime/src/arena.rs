//! The managed arena: hierarchy, handle table, pins, compaction, GC.

use crate::block::{Block, PAYLOAD_ALIGN};
use crate::handle::Handle;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Default storage block size. Allocations above this get a dedicated block.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Handle-table page size.
const PAGE_SIZE: usize = 256;

/// Marker for entries whose block has already been retired.
const NO_BLOCK: u32 = u32::MAX;

/// Tuning knobs for a root arena. Children inherit their root's config.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Storage block size; larger allocations get dedicated blocks.
    pub block_size: usize,
    /// How long `destroy` waits for outstanding pins before leaking.
    pub destroy_timeout: Duration,
    /// Background cleaner wake interval.
    pub cleaner_interval: Duration,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            destroy_timeout: Duration::from_secs(5),
            cleaner_interval: Duration::from_millis(10),
        }
    }
}

/// One slot in the paged handle table. Guarded by the arena's alloc-mutex.
struct HandleEntry {
    ptr: *mut u8,
    size: usize,
    pin_count: u32,
    permanent_pin: bool,
    dead: bool,
    occupied: bool,
    block: u32,
    generation: u32,
    epoch_at_alloc: u64,
}

impl HandleEntry {
    fn empty() -> Self {
        Self {
            ptr: std::ptr::null_mut(),
            size: 0,
            pin_count: 0,
            permanent_pin: false,
            dead: false,
            occupied: false,
            block: NO_BLOCK,
            generation: 1,
            epoch_at_alloc: 0,
        }
    }
}

/// A cleanup callback waiting for reset or destroy.
struct CleanupEntry {
    key: u64,
    priority: i32,
    seq: u64,
    func: Option<Box<dyn FnOnce() + Send>>,
}

/// Lock-protected arena state.
struct ArenaInner {
    blocks: Vec<Option<Block>>,
    block_free_slots: Vec<u32>,
    current_block: Option<u32>,
    pages: Vec<Box<[HandleEntry]>>,
    entry_count: usize,
    free_entries: Vec<u32>,
    dead_queue: VecDeque<u32>,
    live_handles: usize,
    dead_handles: usize,
    children: Vec<ManagedArena>,
    cleanups: Vec<CleanupEntry>,
    cleanup_seq: u64,
}

// SAFETY: the raw payload pointers inside belong to blocks owned by the same
// ArenaInner; every access to them goes through the alloc-mutex or the pin
// protocol, which keeps the pointed-to storage alive and stationary.
unsafe impl Send for ArenaInner {}

impl ArenaInner {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            block_free_slots: Vec::new(),
            current_block: None,
            pages: Vec::new(),
            entry_count: 0,
            free_entries: Vec::new(),
            dead_queue: VecDeque::new(),
            live_handles: 0,
            dead_handles: 0,
            children: Vec::new(),
            cleanups: Vec::new(),
            cleanup_seq: 0,
        }
    }

    fn entry(&self, index: u32) -> Option<&HandleEntry> {
        let idx = index as usize;
        if idx >= self.entry_count {
            return None;
        }
        Some(&self.pages[idx / PAGE_SIZE][idx % PAGE_SIZE])
    }

    fn entry_mut(&mut self, index: u32) -> Option<&mut HandleEntry> {
        let idx = index as usize;
        if idx >= self.entry_count {
            return None;
        }
        Some(&mut self.pages[idx / PAGE_SIZE][idx % PAGE_SIZE])
    }

    /// The entry for `h` if `h`'s generation is current.
    fn validate(&self, h: Handle) -> Option<&HandleEntry> {
        let entry = self.entry(h.index())?;
        (entry.occupied && entry.generation == h.generation()).then_some(entry)
    }

    fn validate_mut(&mut self, h: Handle) -> Option<&mut HandleEntry> {
        let entry = self.entry_mut(h.index())?;
        (entry.occupied && entry.generation == h.generation()).then_some(entry)
    }

    /// Take a table slot from the free list, or grow the table by a page.
    fn take_slot(&mut self) -> u32 {
        if let Some(index) = self.free_entries.pop() {
            return index;
        }
        let index = self.entry_count;
        if index % PAGE_SIZE == 0 {
            let page: Vec<HandleEntry> = (0..PAGE_SIZE).map(|_| HandleEntry::empty()).collect();
            self.pages.push(page.into_boxed_slice());
        }
        self.entry_count += 1;
        index as u32
    }

    fn block(&mut self, slot: u32) -> Option<&mut Block> {
        self.blocks.get_mut(slot as usize).and_then(Option::as_mut)
    }

    fn install_block(&mut self, block: Block) -> u32 {
        if let Some(slot) = self.block_free_slots.pop() {
            self.blocks[slot as usize] = Some(block);
            slot
        } else {
            self.blocks.push(Some(block));
            (self.blocks.len() - 1) as u32
        }
    }
}

/// Wakeup/shutdown plumbing for the background cleaner.
struct CleanerControl {
    stop: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// State shared by every `ManagedArena` wrapper for one arena.
struct ArenaShared {
    inner: Mutex<ArenaInner>,
    pins_drained: Condvar,
    live_bytes: AtomicUsize,
    dead_bytes: AtomicUsize,
    total_allocated: AtomicUsize,
    epoch: AtomicU64,
    condemned: AtomicBool,
    /// Outstanding non-permanent pins, for destroy's drain wait.
    active_pins: AtomicUsize,
    parent: Weak<ArenaShared>,
    config: ArenaConfig,
    cleaner: Mutex<Option<(Arc<CleanerControl>, JoinHandle<()>)>>,
}

/// How this wrapper relates to its underlying arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArenaMode {
    Root,
    Child,
    /// Alias for the parent: allocations go to the parent's blocks and
    /// `destroy` is a no-op.
    Shared,
}

/// A thread-safe, hierarchical, compacting region allocator.
///
/// Cloning a `ManagedArena` clones a reference to the same arena. See the
/// crate docs for the handle/pin lifecycle.
#[derive(Clone)]
pub struct ManagedArena {
    shared: Arc<ArenaShared>,
    mode: ArenaMode,
}

impl ManagedArena {
    /// Create a root arena with the default configuration.
    pub fn create() -> Self {
        Self::create_with_config(ArenaConfig::default())
    }

    /// Create a root arena with an explicit configuration.
    pub fn create_with_config(config: ArenaConfig) -> Self {
        let interval = config.cleaner_interval;
        let shared = Arc::new(ArenaShared {
            inner: Mutex::new(ArenaInner::new()),
            pins_drained: Condvar::new(),
            live_bytes: AtomicUsize::new(0),
            dead_bytes: AtomicUsize::new(0),
            total_allocated: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            condemned: AtomicBool::new(false),
            active_pins: AtomicUsize::new(0),
            parent: Weak::new(),
            config,
            cleaner: Mutex::new(None),
        });
        let arena = Self {
            shared,
            mode: ArenaMode::Root,
        };
        arena.preallocate_first_block();
        arena.spawn_cleaner(interval);
        debug!("managed arena created (root)");
        arena
    }

    /// Create a child arena with its own blocks and handle table.
    pub fn create_child(&self) -> Self {
        let shared = Arc::new(ArenaShared {
            inner: Mutex::new(ArenaInner::new()),
            pins_drained: Condvar::new(),
            live_bytes: AtomicUsize::new(0),
            dead_bytes: AtomicUsize::new(0),
            total_allocated: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            condemned: AtomicBool::new(false),
            active_pins: AtomicUsize::new(0),
            parent: Arc::downgrade(&self.shared),
            config: self.shared.config.clone(),
            cleaner: Mutex::new(None),
        });
        let child = Self {
            shared,
            mode: ArenaMode::Child,
        };
        child.preallocate_first_block();
        self.shared.inner.lock().children.push(child.clone());
        child
    }

    /// Create a shared alias for this arena. Allocations go to this arena's
    /// blocks; destroying the alias is a no-op.
    pub fn create_shared(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            mode: ArenaMode::Shared,
        }
    }

    /// True when two wrappers refer to the same underlying arena.
    pub fn same_arena(&self, other: &ManagedArena) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// The root of this arena's tree.
    pub fn root(&self) -> ManagedArena {
        let mut current = Arc::clone(&self.shared);
        loop {
            match current.parent.upgrade() {
                Some(parent) => current = parent,
                None => {
                    return ManagedArena {
                        shared: current,
                        mode: ArenaMode::Root,
                    }
                }
            }
        }
    }

    fn preallocate_first_block(&self) {
        let block_size = self.shared.config.block_size;
        let mut inner = self.shared.inner.lock();
        if let Some(block) = Block::new(block_size, false) {
            self.shared
                .total_allocated
                .fetch_add(block.capacity(), Ordering::Relaxed);
            let slot = inner.install_block(block);
            inner.current_block = Some(slot);
        }
    }

    fn spawn_cleaner(&self, interval: Duration) {
        let control = Arc::new(CleanerControl {
            stop: AtomicBool::new(false),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        });
        let thread_control = Arc::clone(&control);
        let weak = Arc::downgrade(&self.shared);
        let handle = std::thread::Builder::new()
            .name("sable-arena-cleaner".into())
            .spawn(move || loop {
                {
                    let mut guard = thread_control.lock.lock();
                    if thread_control.stop.load(Ordering::Acquire) {
                        break;
                    }
                    thread_control.wake.wait_for(&mut guard, interval);
                }
                if thread_control.stop.load(Ordering::Acquire) {
                    break;
                }
                match weak.upgrade() {
                    Some(shared) => {
                        let arena = ManagedArena {
                            shared,
                            mode: ArenaMode::Root,
                        };
                        arena.drain_subtree();
                    }
                    None => break,
                }
            })
            .expect("spawn arena cleaner thread");
        *self.shared.cleaner.lock() = Some((control, handle));
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate `size` bytes, returning a handle to uninitialized payload.
    ///
    /// A non-null `old` handle is marked dead on success (reassignment).
    /// Zero size, a condemned arena, or OOM yield [`Handle::NULL`] with no
    /// other state change.
    pub fn alloc(&self, old: Handle, size: usize) -> Handle {
        self.alloc_impl(old, size, false, None)
    }

    /// Like [`alloc`](Self::alloc), but the handle is permanently pinned:
    /// compaction never moves it and its pointer stays valid until the
    /// arena dies.
    pub fn alloc_pinned(&self, old: Handle, size: usize) -> Handle {
        self.alloc_impl(old, size, true, None)
    }

    fn alloc_impl(&self, old: Handle, size: usize, permanent: bool, init: Option<&[u8]>) -> Handle {
        if size == 0 || self.shared.condemned.load(Ordering::Acquire) {
            return Handle::NULL;
        }
        let mut inner = self.shared.inner.lock();
        let Some((handle, ptr)) = self.alloc_locked(&mut inner, size, permanent) else {
            return Handle::NULL;
        };
        if let Some(bytes) = init {
            debug_assert!(bytes.len() <= size);
            // SAFETY: ptr points at `size` freshly bump-allocated bytes inside
            // a live block; we hold the alloc-mutex, so nothing else touches
            // the region, and bytes.len() <= size.
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            }
        }
        if !old.is_null() {
            self.mark_dead_locked(&mut inner, old);
        }
        trace!(handle = ?handle, size, "alloc");
        handle
    }

    fn alloc_locked(
        &self,
        inner: &mut ArenaInner,
        size: usize,
        permanent: bool,
    ) -> Option<(Handle, *mut u8)> {
        let block_size = self.shared.config.block_size;
        let (slot, ptr) = if size > block_size {
            let capacity = size.div_ceil(PAYLOAD_ALIGN) * PAYLOAD_ALIGN;
            let mut block = Block::new(capacity, true)?;
            self.shared
                .total_allocated
                .fetch_add(block.capacity(), Ordering::Relaxed);
            let ptr = block.try_bump(size)?;
            (inner.install_block(block), ptr)
        } else {
            let current = inner.current_block.and_then(|slot| {
                let ptr = inner.block(slot)?.try_bump(size)?;
                Some((slot, ptr))
            });
            match current {
                Some(found) => found,
                None => {
                    let mut block = Block::new(block_size, false)?;
                    self.shared
                        .total_allocated
                        .fetch_add(block.capacity(), Ordering::Relaxed);
                    let ptr = block.try_bump(size)?;
                    let slot = inner.install_block(block);
                    inner.current_block = Some(slot);
                    (slot, ptr)
                }
            }
        };

        let index = inner.take_slot();
        let epoch = self.shared.epoch.load(Ordering::Relaxed);
        let generation;
        {
            let entry = inner.entry_mut(index).expect("slot just taken");
            entry.ptr = ptr;
            entry.size = size;
            entry.pin_count = 0;
            entry.permanent_pin = permanent;
            entry.dead = false;
            entry.occupied = true;
            entry.block = slot;
            entry.epoch_at_alloc = epoch;
            generation = entry.generation;
        }
        if let Some(block) = inner.block(slot) {
            block.handles += 1;
            block.live_bytes += size;
            if permanent {
                block.pins += 1;
            }
        }
        inner.live_handles += 1;
        self.shared.live_bytes.fetch_add(size, Ordering::Relaxed);
        Some((Handle::pack(index, generation), ptr))
    }

    /// Allocate and copy `bytes` into the new payload in one step.
    pub fn alloc_copy(&self, old: Handle, bytes: &[u8]) -> Handle {
        if bytes.is_empty() {
            return Handle::NULL;
        }
        self.alloc_impl(old, bytes.len(), false, Some(bytes))
    }

    /// Allocate a NUL-terminated copy of `s`. A non-null `old` is marked
    /// dead on success.
    pub fn strdup(&self, old: Handle, s: &str) -> Handle {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.alloc_impl(old, bytes.len(), false, Some(&bytes))
    }

    /// Like [`strdup`](Self::strdup) but copies at most `n` bytes of `s`.
    pub fn strndup(&self, old: Handle, s: &str, n: usize) -> Handle {
        let take = s.len().min(n);
        let mut bytes = Vec::with_capacity(take + 1);
        bytes.extend_from_slice(&s.as_bytes()[..take]);
        bytes.push(0);
        self.alloc_impl(old, bytes.len(), false, Some(&bytes))
    }

    // ------------------------------------------------------------------
    // Pins
    // ------------------------------------------------------------------

    /// Pin `h`, returning its current payload pointer, or null for an
    /// invalid, recycled, or null handle. The pointer is stable until the
    /// matching [`unpin`](Self::unpin).
    pub fn pin(&self, h: Handle) -> *mut u8 {
        if h.is_null() {
            return std::ptr::null_mut();
        }
        let mut inner = self.shared.inner.lock();
        let Some(entry) = inner.validate_mut(h) else {
            return std::ptr::null_mut();
        };
        if entry.ptr.is_null() {
            return std::ptr::null_mut();
        }
        entry.pin_count += 1;
        let ptr = entry.ptr;
        let slot = entry.block;
        if let Some(block) = inner.block(slot) {
            block.pins += 1;
        }
        self.shared.active_pins.fetch_add(1, Ordering::AcqRel);
        ptr
    }

    /// Pin `h`, searching this arena and then its descendants. Used for
    /// handles whose owning arena is not statically known (e.g. function
    /// parameters).
    pub fn pin_any(&self, h: Handle) -> *mut u8 {
        let ptr = self.pin(h);
        if !ptr.is_null() {
            return ptr;
        }
        for child in self.children_snapshot() {
            let ptr = child.pin_any(h);
            if !ptr.is_null() {
                return ptr;
            }
        }
        std::ptr::null_mut()
    }

    /// Release one pin on `h`. Invalid handles are a no-op.
    pub fn unpin(&self, h: Handle) {
        self.try_unpin(h);
    }

    /// Release one pin on `h` anywhere in this arena's subtree.
    pub fn unpin_any(&self, h: Handle) {
        if self.try_unpin(h) {
            return;
        }
        for child in self.children_snapshot() {
            child.unpin_any(h);
        }
    }

    fn try_unpin(&self, h: Handle) -> bool {
        if h.is_null() {
            return false;
        }
        let mut inner = self.shared.inner.lock();
        let Some(entry) = inner.validate_mut(h) else {
            return false;
        };
        if entry.pin_count == 0 {
            return false;
        }
        entry.pin_count -= 1;
        let slot = entry.block;
        if let Some(block) = inner.block(slot) {
            block.pins = block.pins.saturating_sub(1);
        }
        if self.shared.active_pins.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.pins_drained.notify_all();
        }
        true
    }

    /// RAII pin: the lease holds the pin and unpins on drop.
    pub fn lease(&self, h: Handle) -> Option<PinLease<'_>> {
        let len = {
            let inner = self.shared.inner.lock();
            inner.validate(h)?.size
        };
        let ptr = self.pin(h);
        if ptr.is_null() {
            return None;
        }
        Some(PinLease {
            arena: self,
            handle: h,
            ptr,
            len,
        })
    }

    fn children_snapshot(&self) -> Vec<ManagedArena> {
        self.shared.inner.lock().children.clone()
    }

    // ------------------------------------------------------------------
    // Death and recycling
    // ------------------------------------------------------------------

    /// Mark `h` dead without reallocating. Invalid handles are a no-op.
    pub fn mark_dead(&self, h: Handle) {
        if h.is_null() {
            return;
        }
        let mut inner = self.shared.inner.lock();
        self.mark_dead_locked(&mut inner, h);
    }

    fn mark_dead_locked(&self, inner: &mut ArenaInner, h: Handle) {
        let Some(entry) = inner.validate_mut(h) else {
            return;
        };
        if entry.dead {
            return;
        }
        entry.dead = true;
        let size = entry.size;
        let slot = entry.block;
        if let Some(block) = inner.block(slot) {
            block.live_bytes = block.live_bytes.saturating_sub(size);
        }
        inner.live_handles -= 1;
        inner.dead_handles += 1;
        inner.dead_queue.push_back(h.index());
        self.shared.live_bytes.fetch_sub(size, Ordering::Relaxed);
        self.shared.dead_bytes.fetch_add(size, Ordering::Release);
    }

    /// Drive the cleaner synchronously until currently queued dead entries
    /// are processed, across this arena and all its descendants.
    pub fn gc_flush(&self) {
        self.drain_subtree();
    }

    fn drain_subtree(&self) {
        self.drain_own_queue();
        for child in self.children_snapshot() {
            child.drain_subtree();
        }
    }

    /// One pass over the dead queue: recycle unpinned entries, requeue
    /// pinned ones, drop permanently pinned ones (reclaimed at destroy).
    fn drain_own_queue(&self) {
        let mut inner = self.shared.inner.lock();
        let pending = inner.dead_queue.len();
        for _ in 0..pending {
            let Some(index) = inner.dead_queue.pop_front() else {
                break;
            };
            let (size, slot, pinned, permanent) = {
                let Some(entry) = inner.entry_mut(index) else {
                    continue;
                };
                if !entry.occupied || !entry.dead {
                    continue;
                }
                (
                    entry.size,
                    entry.block,
                    entry.pin_count > 0,
                    entry.permanent_pin,
                )
            };
            if pinned {
                inner.dead_queue.push_back(index);
                continue;
            }
            if permanent {
                continue;
            }
            // Recycle the slot: bump the generation so stale handles miss.
            {
                let entry = inner.entry_mut(index).expect("entry exists");
                entry.occupied = false;
                entry.dead = false;
                entry.ptr = std::ptr::null_mut();
                entry.generation = entry.generation.wrapping_add(1).max(1);
                entry.block = NO_BLOCK;
            }
            inner.free_entries.push(index);
            inner.dead_handles -= 1;
            self.shared.dead_bytes.fetch_sub(size, Ordering::Relaxed);
            let freeable = match inner.block(slot) {
                Some(block) => {
                    block.handles = block.handles.saturating_sub(1);
                    block.freeable()
                }
                None => false,
            };
            if freeable && inner.current_block != Some(slot) {
                self.free_block(&mut inner, slot);
            }
        }
    }

    fn free_block(&self, inner: &mut ArenaInner, slot: u32) {
        if let Some(block) = inner.blocks.get_mut(slot as usize).and_then(Option::take) {
            self.shared
                .total_allocated
                .fetch_sub(block.capacity(), Ordering::Relaxed);
            inner.block_free_slots.push(slot);
            drop(block);
        }
    }

    // ------------------------------------------------------------------
    // Promotion and cloning
    // ------------------------------------------------------------------

    /// Copy `h`'s payload from `src` into this arena, marking the source
    /// dead. Existing pins on the source stay valid until released. Returns
    /// the new handle, or null if `h` is invalid or allocation fails.
    pub fn promote(&self, src: &ManagedArena, h: Handle) -> Handle {
        let Some(payload) = src.read_payload(h) else {
            return Handle::NULL;
        };
        let promoted = self.alloc_impl(Handle::NULL, payload.len(), false, Some(&payload));
        if !promoted.is_null() {
            src.mark_dead(h);
        }
        promoted
    }

    /// String-typed convenience wrapper over [`promote`](Self::promote).
    pub fn promote_string(&self, src: &ManagedArena, h: Handle) -> Handle {
        self.promote(src, h)
    }

    /// Copy `h`'s payload into this arena without touching the source.
    pub fn clone_into(&self, src: &ManagedArena, h: Handle) -> Handle {
        let Some(payload) = src.read_payload(h) else {
            return Handle::NULL;
        };
        self.alloc_impl(Handle::NULL, payload.len(), false, Some(&payload))
    }

    /// Snapshot a handle's payload. `None` for invalid handles.
    pub fn read_payload(&self, h: Handle) -> Option<Vec<u8>> {
        if h.is_null() {
            return None;
        }
        let inner = self.shared.inner.lock();
        let entry = inner.validate(h)?;
        if entry.ptr.is_null() {
            return None;
        }
        // SAFETY: entry.ptr points at entry.size bytes inside a live block;
        // we hold the alloc-mutex so neither compaction nor recycling can
        // move or free the payload during the copy.
        Some(unsafe { std::slice::from_raw_parts(entry.ptr, entry.size).to_vec() })
    }

    // ------------------------------------------------------------------
    // Cleanup callbacks
    // ------------------------------------------------------------------

    /// Register a callback fired at reset or destroy, ordered by ascending
    /// priority (stable within equal priority). `key` identifies the entry
    /// for [`remove_cleanup`](Self::remove_cleanup). Returns false when the
    /// arena is condemned.
    pub fn on_cleanup(&self, key: u64, priority: i32, f: impl FnOnce() + Send + 'static) -> bool {
        if self.shared.condemned.load(Ordering::Acquire) {
            return false;
        }
        let mut inner = self.shared.inner.lock();
        let seq = inner.cleanup_seq;
        inner.cleanup_seq += 1;
        inner.cleanups.push(CleanupEntry {
            key,
            priority,
            seq,
            func: Some(Box::new(f)),
        });
        true
    }

    /// Deregister every callback registered under `key`.
    pub fn remove_cleanup(&self, key: u64) {
        let mut inner = self.shared.inner.lock();
        inner.cleanups.retain(|c| c.key != key);
    }

    fn fire_cleanups(&self) {
        let mut entries = {
            let mut inner = self.shared.inner.lock();
            std::mem::take(&mut inner.cleanups)
        };
        entries.sort_by_key(|c| (c.priority, c.seq));
        for entry in &mut entries {
            if let Some(f) = entry.func.take() {
                f();
            }
        }
    }

    // ------------------------------------------------------------------
    // Reset, destroy
    // ------------------------------------------------------------------

    /// Fire all cleanups and mark every handle dead. The arena stays usable
    /// for further allocation.
    pub fn reset(&self) {
        self.fire_cleanups();
        let mut inner = self.shared.inner.lock();
        for index in 0..inner.entry_count as u32 {
            let is_live = inner
                .entry(index)
                .is_some_and(|e| e.occupied && !e.dead);
            if is_live {
                let generation = inner.entry(index).expect("checked above").generation;
                self.mark_dead_locked(&mut inner, Handle::pack(index, generation));
            }
        }
    }

    /// Destroy the arena: condemn it, destroy descendants, fire cleanups by
    /// ascending priority, wait (bounded) for pins to drain, then free
    /// blocks and invalidate every handle.
    ///
    /// On a shared alias this is a no-op; a second destroy short-circuits.
    /// Blocks still pinned after the timeout are leaked, never freed.
    pub fn destroy(&self) {
        if self.mode == ArenaMode::Shared {
            return;
        }
        if self.shared.condemned.swap(true, Ordering::AcqRel) {
            return;
        }

        // Detach from the parent so the tree no longer reaches us.
        if let Some(parent) = self.shared.parent.upgrade() {
            parent
                .inner
                .lock()
                .children
                .retain(|c| !Arc::ptr_eq(&c.shared, &self.shared));
        }

        let children = {
            let mut inner = self.shared.inner.lock();
            std::mem::take(&mut inner.children)
        };
        for child in children {
            child.destroy();
        }

        self.fire_cleanups();
        self.wait_for_pin_drain();
        self.release_storage();

        if self.shared.parent.upgrade().is_none() {
            self.stop_cleaner();
        }
        debug!("managed arena destroyed");
    }

    fn wait_for_pin_drain(&self) {
        let timeout = self.shared.config.destroy_timeout;
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.inner.lock();
        while self.shared.active_pins.load(Ordering::Acquire) > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    pins = self.shared.active_pins.load(Ordering::Relaxed),
                    "destroy timed out waiting for pins; leaking pinned blocks"
                );
                break;
            }
            self.shared
                .pins_drained
                .wait_for(&mut guard, deadline - now);
        }
    }

    fn release_storage(&self) {
        let mut inner = self.shared.inner.lock();
        for index in 0..inner.entry_count as u32 {
            if let Some(entry) = inner.entry_mut(index) {
                if entry.occupied {
                    entry.occupied = false;
                    entry.dead = false;
                    entry.ptr = std::ptr::null_mut();
                    entry.generation = entry.generation.wrapping_add(1).max(1);
                    entry.block = NO_BLOCK;
                }
            }
        }
        for slot in 0..inner.blocks.len() {
            if let Some(block) = inner.blocks[slot].take() {
                self.shared
                    .total_allocated
                    .fetch_sub(block.capacity(), Ordering::Relaxed);
                if block.pins > 0 {
                    // An outstanding pin survived the drain timeout: leaking
                    // the storage keeps the pinned pointer valid forever.
                    std::mem::forget(block);
                } else {
                    drop(block);
                }
            }
        }
        inner.blocks.clear();
        inner.block_free_slots.clear();
        inner.current_block = None;
        inner.free_entries.clear();
        inner.dead_queue.clear();
        inner.live_handles = 0;
        inner.dead_handles = 0;
        self.shared.live_bytes.store(0, Ordering::Relaxed);
        self.shared.dead_bytes.store(0, Ordering::Relaxed);
    }

    fn stop_cleaner(&self) {
        let taken = self.shared.cleaner.lock().take();
        if let Some((control, handle)) = taken {
            control.stop.store(true, Ordering::Release);
            let _guard = control.lock.lock();
            control.wake.notify_all();
            drop(_guard);
            let _ = handle.join();
        }
    }

    // ------------------------------------------------------------------
    // Compaction
    // ------------------------------------------------------------------

    /// Single-pass conservative compaction: move live, unpinned objects out
    /// of sparse blocks into fresh ones, then retire blocks left without
    /// handles or pins. Pinned objects never move. Bumps the epoch when
    /// anything moved; with no dead bytes this is a no-op.
    pub fn compact(&self) {
        if self.shared.dead_bytes.load(Ordering::Acquire) == 0 {
            return;
        }
        let block_size = self.shared.config.block_size;
        let mut inner = self.shared.inner.lock();
        let mut moved = 0usize;
        let mut dest: Option<u32> = None;

        for index in 0..inner.entry_count as u32 {
            let candidate = {
                let Some(entry) = inner.entry(index) else {
                    continue;
                };
                if !entry.occupied
                    || entry.dead
                    || entry.pin_count > 0
                    || entry.permanent_pin
                    || entry.size > block_size
                {
                    continue;
                }
                let src_slot = entry.block;
                let sparse = inner
                    .blocks
                    .get(src_slot as usize)
                    .and_then(Option::as_ref)
                    .is_some_and(Block::sparse);
                // The destination block is never a source.
                if !sparse || Some(src_slot) == dest {
                    continue;
                }
                (src_slot, entry.ptr, entry.size)
            };
            let (src_slot, src_ptr, size) = candidate;

            // Find space in the current destination block or open a new one.
            let dest_ptr = loop {
                if let Some(slot) = dest {
                    if let Some(ptr) = inner.block(slot).and_then(|b| b.try_bump(size)) {
                        break Some((slot, ptr));
                    }
                }
                let Some(mut block) = Block::new(block_size, false) else {
                    break None;
                };
                self.shared
                    .total_allocated
                    .fetch_add(block.capacity(), Ordering::Relaxed);
                let ptr = block.try_bump(size);
                let slot = inner.install_block(block);
                dest = Some(slot);
                if let Some(ptr) = ptr {
                    break Some((slot, ptr));
                }
            };
            let Some((dest_slot, dest_ptr)) = dest_ptr else {
                break;
            };

            // SAFETY: src_ptr points at `size` live bytes; dest_ptr at
            // `size` freshly reserved bytes in a different block. Both
            // blocks are owned by `inner`, which we hold locked, and the
            // entry has zero pins, so no reader holds the old pointer.
            unsafe {
                std::ptr::copy_nonoverlapping(src_ptr, dest_ptr, size);
            }

            {
                let entry = inner.entry_mut(index).expect("entry exists");
                entry.ptr = dest_ptr;
                entry.block = dest_slot;
            }
            if let Some(block) = inner.block(src_slot) {
                block.handles = block.handles.saturating_sub(1);
                block.live_bytes = block.live_bytes.saturating_sub(size);
            }
            if let Some(block) = inner.block(dest_slot) {
                block.handles += 1;
                block.live_bytes += size;
            }
            moved += 1;
        }

        // Retire blocks whose live bytes reached zero. Dead entries still
        // pointing into one are detached first; the cleaner recycles their
        // slots later without touching the payload.
        for slot in 0..inner.blocks.len() as u32 {
            if inner.current_block == Some(slot) || dest == Some(slot) {
                continue;
            }
            let (empty, detach) = match inner.blocks.get(slot as usize).and_then(Option::as_ref) {
                Some(block) => (
                    block.live_bytes == 0 && block.pins == 0,
                    block.handles > 0,
                ),
                None => (false, false),
            };
            if !empty {
                continue;
            }
            if detach {
                for index in 0..inner.entry_count as u32 {
                    let entry = inner.entry_mut(index).expect("index in range");
                    if entry.occupied && entry.block == slot {
                        debug_assert!(entry.dead);
                        entry.ptr = std::ptr::null_mut();
                        entry.block = NO_BLOCK;
                    }
                }
            }
            self.free_block(&mut inner, slot);
        }

        if let Some(slot) = dest {
            inner.current_block = Some(slot);
        }
        if moved > 0 {
            self.shared.epoch.fetch_add(1, Ordering::Release);
            trace!(moved, "compaction pass moved objects");
        }
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    /// Number of live handles.
    pub fn live_count(&self) -> usize {
        self.shared.inner.lock().live_handles
    }

    /// Number of dead, not-yet-recycled handles.
    pub fn dead_count(&self) -> usize {
        self.shared.inner.lock().dead_handles
    }

    /// Bytes held by live handles. A hint under concurrency.
    pub fn live_bytes(&self) -> usize {
        self.shared.live_bytes.load(Ordering::Relaxed)
    }

    /// Bytes held by dead, not-yet-recycled handles. A hint.
    pub fn dead_bytes(&self) -> usize {
        self.shared.dead_bytes.load(Ordering::Relaxed)
    }

    /// Live plus dead payload bytes.
    pub fn used(&self) -> usize {
        self.live_bytes() + self.dead_bytes()
    }

    /// Fraction of used bytes that are dead, in `[0, 1]`.
    pub fn fragmentation(&self) -> f64 {
        let live = self.live_bytes();
        let dead = self.dead_bytes();
        if live + dead == 0 {
            0.0
        } else {
            dead as f64 / (live + dead) as f64
        }
    }

    /// Total block storage currently allocated, including the initial block.
    pub fn total_allocated(&self) -> usize {
        self.shared.total_allocated.load(Ordering::Relaxed)
    }

    /// Compaction epoch. Cached pointers predating the current epoch must
    /// be re-pinned.
    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::Acquire)
    }

    /// The size recorded for `h`, if valid.
    pub fn size_of(&self, h: Handle) -> Option<usize> {
        let inner = self.shared.inner.lock();
        inner.validate(h).map(|e| e.size)
    }

    /// True once the arena has been condemned by destroy.
    pub fn is_condemned(&self) -> bool {
        self.shared.condemned.load(Ordering::Acquire)
    }
}

/// An RAII pin lease: a stable view of one handle's payload.
///
/// The payload pointer cannot move or be freed while the lease lives.
/// Concurrent leases on the same handle see the same memory; writers on
/// different threads must coordinate, exactly as with the raw pin API.
pub struct PinLease<'a> {
    arena: &'a ManagedArena,
    handle: Handle,
    ptr: *mut u8,
    len: usize,
}

impl PinLease<'_> {
    /// The leased handle.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for zero-length payloads (never the case today; allocations of
    /// size zero fail).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The raw payload pointer, stable for the lease's lifetime.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// The payload bytes.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: ptr points at len bytes that stay valid and stationary
        // while this lease holds its pin.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// Copy `src` into the payload starting at `offset`.
    ///
    /// # Panics
    /// Panics when the copy would run past the payload.
    pub fn write_at(&mut self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "write past payload end");
        // SAFETY: bounds checked above; the region stays valid and
        // stationary while this lease holds its pin.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len());
        }
    }

    /// Copy `src` over the start of the payload.
    pub fn write(&mut self, src: &[u8]) {
        self.write_at(0, src);
    }

    /// The payload interpreted as a NUL-terminated C string.
    pub fn c_str(&self) -> &[u8] {
        let bytes = self.bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        &bytes[..end]
    }
}

impl Drop for PinLease<'_> {
    fn drop(&mut self) {
        self.arena.unpin(self.handle);
    }
}
