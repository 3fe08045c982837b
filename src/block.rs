//! Boundary-tag block layout.
//!
//! ```text
//!   allocated block                       free block
//!   ┌────────────┐ bp - 4                 ┌────────────┐
//!   │ size  | 1  │ header                 │ size  | 0  │ header
//!   ├────────────┤ bp ◄─ payload          ├────────────┤ bp
//!   │            │                        │ pred       │
//!   │  payload   │                        │ succ       │
//!   │            │                        │ (unused)   │
//!   ├────────────┤ bp + size - 8          ├────────────┤
//!   │ size  | 1  │ footer                 │ size  | 0  │ footer
//!   └────────────┘                        └────────────┘
//! ```
//!
//! Everything here is address arithmetic over the arena's byte slice. None of
//! it validates that an offset names a real block: the allocator's invariants
//! guarantee that. Word accesses are slice-indexed, so a corrupted offset
//! panics instead of reading outside the arena.

use std::fmt;

use crate::config::{DSIZE, MAX_BLOCK_SIZE, WSIZE};

const ALLOCATED: u32 = 0x1;
const FLAGS: u32 = 0x7;

/// Payload address of a block, as an offset from the arena base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(u32);

impl BlockPtr {
  pub(crate) const fn new(offset: usize) -> Self {
    Self(offset as u32)
  }

  /// Decodes a stored link; offset 0 is the padding word and means "none".
  fn from_link(link: u32) -> Option<Self> {
    (link != 0).then_some(Self(link))
  }

  fn to_link(ptr: Option<Self>) -> u32 {
    ptr.map_or(0, |p| p.0)
  }

  pub const fn offset(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for BlockPtr {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(f, "{:#x}", self.0)
  }
}

/// The prologue sentinel: an 8-byte allocated block with no payload, placed
/// right after the padding word.
pub const PROLOGUE: BlockPtr = BlockPtr::new(DSIZE);

/// Payload address of the first block after the prologue.
pub const FIRST_BLOCK: BlockPtr = BlockPtr::new(2 * DSIZE);

/// What the payload words of a block mean, chosen by its allocated flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
  /// The payload belongs to the caller.
  Allocated,
  /// The first two payload words are free-list links.
  Free {
    pred: Option<BlockPtr>,
    succ: Option<BlockPtr>,
  },
}

/// A block as seen by a walk over the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
  pub ptr: BlockPtr,
  pub size: usize,
  pub is_free: bool,
}

impl Block {
  pub fn new(
    ptr: BlockPtr,
    size: usize,
    is_free: bool,
  ) -> Self {
    Self { ptr, size, is_free }
  }

  /// Bytes usable by the caller.
  pub fn payload_size(&self) -> usize {
    self.size - DSIZE
  }
}

pub fn pack(
  size: usize,
  allocated: bool,
) -> u32 {
  debug_assert!(size <= MAX_BLOCK_SIZE && size as u32 & FLAGS == 0);
  size as u32 | if allocated { ALLOCATED } else { 0 }
}

pub fn unpack(word: u32) -> (usize, bool) {
  ((word & !FLAGS) as usize, word & ALLOCATED != 0)
}

pub(crate) fn get(
  mem: &[u8],
  at: usize,
) -> u32 {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&mem[at..at + WSIZE]);
  u32::from_ne_bytes(word)
}

pub(crate) fn put(
  mem: &mut [u8],
  at: usize,
  value: u32,
) {
  mem[at..at + WSIZE].copy_from_slice(&value.to_ne_bytes());
}

pub fn header(bp: BlockPtr) -> usize {
  bp.offset() - WSIZE
}

pub fn footer(
  mem: &[u8],
  bp: BlockPtr,
) -> usize {
  bp.offset() + size(mem, bp) - DSIZE
}

pub fn size(
  mem: &[u8],
  bp: BlockPtr,
) -> usize {
  unpack(get(mem, header(bp))).0
}

pub fn is_allocated(
  mem: &[u8],
  bp: BlockPtr,
) -> bool {
  unpack(get(mem, header(bp))).1
}

/// Allocated flag of the physically previous block, read from its footer.
pub fn prev_allocated(
  mem: &[u8],
  bp: BlockPtr,
) -> bool {
  unpack(get(mem, bp.offset() - DSIZE)).1
}

pub fn next(
  mem: &[u8],
  bp: BlockPtr,
) -> BlockPtr {
  BlockPtr::new(bp.offset() + size(mem, bp))
}

pub fn prev(
  mem: &[u8],
  bp: BlockPtr,
) -> BlockPtr {
  let (prev_size, _) = unpack(get(mem, bp.offset() - DSIZE));
  BlockPtr::new(bp.offset() - prev_size)
}

/// Writes matching header and footer for a block of `size` bytes at `bp`.
pub(crate) fn set_tags(
  mem: &mut [u8],
  bp: BlockPtr,
  size: usize,
  allocated: bool,
) {
  let word = pack(size, allocated);
  put(mem, header(bp), word);
  put(mem, bp.offset() + size - DSIZE, word);
}

/// Writes a zero-sized allocated header at `bp`, ending the block area.
pub(crate) fn set_epilogue(
  mem: &mut [u8],
  bp: BlockPtr,
) {
  put(mem, header(bp), pack(0, true));
}

pub fn state(
  mem: &[u8],
  bp: BlockPtr,
) -> BlockState {
  if is_allocated(mem, bp) {
    BlockState::Allocated
  } else {
    BlockState::Free {
      pred: pred(mem, bp),
      succ: succ(mem, bp),
    }
  }
}

// Link accessors. Only meaningful while the block is free; the free list is
// their sole user.

pub(crate) fn pred(
  mem: &[u8],
  bp: BlockPtr,
) -> Option<BlockPtr> {
  BlockPtr::from_link(get(mem, bp.offset()))
}

pub(crate) fn succ(
  mem: &[u8],
  bp: BlockPtr,
) -> Option<BlockPtr> {
  BlockPtr::from_link(get(mem, bp.offset() + WSIZE))
}

pub(crate) fn set_pred(
  mem: &mut [u8],
  bp: BlockPtr,
  pred: Option<BlockPtr>,
) {
  put(mem, bp.offset(), BlockPtr::to_link(pred));
}

pub(crate) fn set_succ(
  mem: &mut [u8],
  bp: BlockPtr,
  succ: Option<BlockPtr>,
) {
  put(mem, bp.offset() + WSIZE, BlockPtr::to_link(succ));
}
