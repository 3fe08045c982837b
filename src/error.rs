//! Error types for arena growth, heap operations and heap checking.

use std::{fmt, io};

use crate::block::BlockPtr;

/// Errors reported by an [`Arena`](crate::arena::Arena).
#[derive(Debug)]
pub enum ArenaError {
  /// The arena refused to grow past its limit.
  Exhausted {
    /// Bytes asked for.
    requested: usize,
    /// Bytes still available below the limit.
    available: usize,
  },
  /// The backing reservation could not be mapped.
  Map(io::Error),
}

impl fmt::Display for ArenaError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::Exhausted {
        requested,
        available,
      } => write!(
        f,
        "arena exhausted: requested {requested} bytes, {available} available"
      ),
      Self::Map(err) => write!(f, "failed to map arena: {err}"),
    }
  }
}

impl std::error::Error for ArenaError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Map(err) => Some(err),
      Self::Exhausted { .. } => None,
    }
  }
}

/// Failures of `allocate`, `resize` and `init`.
#[derive(Debug)]
pub enum HeapError {
  /// The arena could not grow to satisfy the request.
  Exhausted(ArenaError),
  /// The request cannot be encoded as a block size.
  TooLarge {
    /// Payload bytes asked for.
    requested: usize,
  },
}

impl fmt::Display for HeapError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::Exhausted(err) => write!(f, "out of memory: {err}"),
      Self::TooLarge { requested } => {
        write!(f, "request of {requested} bytes exceeds the largest block size")
      }
    }
  }
}

impl std::error::Error for HeapError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Exhausted(err) => Some(err),
      Self::TooLarge { .. } => None,
    }
  }
}

impl From<ArenaError> for HeapError {
  fn from(err: ArenaError) -> Self {
    Self::Exhausted(err)
  }
}

/// A heap invariant found broken by [`Heap::check`](crate::Heap::check).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
  /// The prologue tags are missing or damaged.
  BadPrologue { header: u32, footer: u32 },
  /// The epilogue header is damaged or not at the arena top.
  BadEpilogue { at: usize, word: u32 },
  /// A payload address is not a multiple of the alignment unit.
  Misaligned { block: BlockPtr },
  /// A block is smaller than the minimum or not a multiple of the alignment.
  BadSize { block: BlockPtr, size: usize },
  /// A block's header and footer disagree.
  TagMismatch {
    block: BlockPtr,
    header: u32,
    footer: u32,
  },
  /// A block runs past the end of the arena.
  Overrun { block: BlockPtr, size: usize },
  /// Two physically adjacent blocks are both free.
  AdjacentFree { block: BlockPtr, next: BlockPtr },
  /// A free-list link points outside the block area.
  LinkOutOfBounds { from: Option<BlockPtr>, link: usize },
  /// An allocated block is linked into the free list.
  AllocatedInFreeList { block: BlockPtr },
  /// A node's predecessor link does not name the node before it.
  BrokenBackLink {
    block: BlockPtr,
    expected: Option<BlockPtr>,
    found: Option<BlockPtr>,
  },
  /// Following successor links never reaches the end of the list.
  FreeListCycle,
  /// The free list and the arena walk disagree on the free blocks.
  FreeListMismatch {
    list_blocks: usize,
    list_bytes: usize,
    heap_blocks: usize,
    heap_bytes: usize,
  },
}

impl fmt::Display for CheckError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::BadPrologue { header, footer } => {
        write!(f, "bad prologue: header {header:#x}, footer {footer:#x}")
      }
      Self::BadEpilogue { at, word } => write!(f, "bad epilogue at {at:#x}: {word:#x}"),
      Self::Misaligned { block } => write!(f, "block {block} is misaligned"),
      Self::BadSize { block, size } => write!(f, "block {block} has invalid size {size}"),
      Self::TagMismatch {
        block,
        header,
        footer,
      } => write!(
        f,
        "block {block}: header {header:#x} does not match footer {footer:#x}"
      ),
      Self::Overrun { block, size } => {
        write!(f, "block {block} of {size} bytes runs past the arena")
      }
      Self::AdjacentFree { block, next } => {
        write!(f, "adjacent free blocks {block} and {next} were not coalesced")
      }
      Self::LinkOutOfBounds { from, link } => match from {
        Some(from) => write!(f, "free-list link {link:#x} from {from} is out of bounds"),
        None => write!(f, "free-list head {link:#x} is out of bounds"),
      },
      Self::AllocatedInFreeList { block } => {
        write!(f, "allocated block {block} is in the free list")
      }
      Self::BrokenBackLink {
        block,
        expected,
        found,
      } => write!(
        f,
        "block {block}: predecessor link is {found:?}, expected {expected:?}"
      ),
      Self::FreeListCycle => write!(f, "free list contains a cycle"),
      Self::FreeListMismatch {
        list_blocks,
        list_bytes,
        heap_blocks,
        heap_bytes,
      } => write!(
        f,
        "free list holds {list_blocks} blocks ({list_bytes} bytes), \
         arena walk found {heap_blocks} ({heap_bytes} bytes)"
      ),
    }
  }
}

impl std::error::Error for CheckError {}
