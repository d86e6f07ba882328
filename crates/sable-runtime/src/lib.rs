//! Managed arena runtime for sable-compiled programs.
//!
//! The central type is [`ManagedArena`]: a thread-safe, hierarchical,
//! compacting region allocator. Objects are addressed through indirected
//! [`Handle`]s whose physical location may move; a [pin](ManagedArena::pin)
//! is a lease granting a stable raw pointer for its duration. Arenas form a
//! tree - destroying an arena transitively destroys its descendants - and a
//! background cleaner recycles dead handles so their table slots can be
//! reused.
//!
//! Generated C links against the `rt_managed_*` symbols in [`ffi`]; Rust
//! callers use the methods (and the RAII [`PinLease`]) directly.
//!
//! # Safety
//!
//! This crate manages raw block storage and hands out raw pointers under the
//! pin protocol:
//! - Block storage is allocated with `std::alloc` and never moves or shrinks;
//!   payload pointers stay valid while the block lives.
//! - Compaction only relocates objects with zero pins, under the arena's
//!   alloc-mutex.
//! - Destroy waits for pins to drain (bounded); blocks with outstanding pins
//!   after the timeout are leaked, never freed.
//!
//! Every `unsafe` block states the invariant it relies on.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod arena;
mod block;
mod handle;

pub mod ffi;
pub mod strings;

pub use arena::{ArenaConfig, ManagedArena, PinLease, BLOCK_SIZE};
pub use handle::Handle;

#[cfg(test)]
#[path = "arena_tests.rs"]
mod arena_tests;

#[cfg(test)]
#[path = "concurrency_tests.rs"]
mod concurrency_tests;
