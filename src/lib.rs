//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate provides a dynamic memory allocator that manages one
//! contiguous, growable arena. Every piece of metadata lives inside the arena
//! itself: sizes in boundary tags around each block, and free-list links in
//! the payloads of free blocks.
//!
//! ## Overview
//!
//! ```text
//!   Arena Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              ARENA                                   │
//!   │                                                                      │
//!   │   ┌───┬─────┬────────┬──────────┬──────┬────────────────────┬───┐    │
//!   │   │pad│ pro │ A1     │ F        │ A2   │ F                  │epi│    │
//!   │   └───┴─────┴────────┴──────────┴──────┴────────────────────┴───┘    │
//!   │         ▲               │                 ▲                     ▲    │
//!   │         │               └──── free list ──┘                     │    │
//!   │      prologue                                               epilogue │
//!   │                                                              (= top) │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation: first fit over the free list, split off the remainder.
//!   Free: merge with free neighbours, push the result on the free list.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macro (align!) and checked align_up
//!   ├── arena      - Arena trait, VecArena, MmapArena
//!   ├── block      - Boundary tags and block address arithmetic
//!   ├── free_list  - Explicit doubly-linked LIFO free list
//!   ├── coalesce   - Merging of adjacent free blocks (internal)
//!   ├── heap       - Heap: allocate / free / resize
//!   ├── check      - Heap consistency checker
//!   ├── trace      - Trace files and replay
//!   ├── config     - Layout constants and HeapConfig
//!   └── error      - Error types
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Heap, VecArena};
//!
//! let mut heap = Heap::new(VecArena::new(1 << 20)).unwrap();
//!
//! let ptr = heap.allocate(64).unwrap().unwrap();
//! heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.resize(Some(ptr), 256).unwrap().unwrap();
//! assert_eq!(&heap.payload(ptr)[..5], b"hello");
//!
//! heap.free(Some(ptr));
//! heap.check().unwrap();
//! ```
//!
//! ## Blocks
//!
//! ```text
//!   Allocated block:
//!   ┌──────────┬────────────────────────────────┬──────────┐
//!   │ header   │         User Data              │ footer   │
//!   │ size | 1 │                                │ size | 1 │
//!   └──────────┴────────────────────────────────┴──────────┘
//!              ▲
//!              └── BlockPtr returned to the caller
//!
//!   Free block:
//!   ┌──────────┬────────┬────────┬──────────────┬──────────┐
//!   │ size | 0 │ pred   │ succ   │              │ size | 0 │
//!   └──────────┴────────┴────────┴──────────────┴──────────┘
//! ```
//!
//! Sizes are multiples of 8, so the low three bits of a tag hold the
//! allocated flag. The footer lets a block find its physical predecessor in
//! O(1), which is what makes coalescing cheap.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: one owner, one operation at a time
//! - **Arena only grows**: freed memory is reused, never returned to the OS
//! - **No in-place resize**: `resize` always moves the block
//! - **Unchecked preconditions**: freeing a foreign or already freed block
//!   corrupts the heap; [`Heap::check`] is the diagnostic for that
//!
//! ## Safety
//!
//! Callers handle [`BlockPtr`] offsets and slices, never raw pointers. The
//! only `unsafe` code sits in [`arena`], where the backing memory is viewed
//! as a byte slice.

pub mod align;
pub mod arena;
pub mod block;
mod check;
mod coalesce;
pub mod config;
pub mod error;
pub mod free_list;
mod heap;
pub mod trace;

#[cfg(unix)]
pub use arena::MmapArena;
pub use arena::{Arena, VecArena};
pub use block::BlockPtr;
pub use config::HeapConfig;
pub use error::{ArenaError, CheckError, HeapError};
pub use heap::{Blocks, Heap, HeapStats};
