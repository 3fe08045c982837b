//! Explicit free list threaded through the payloads of free blocks.
//!
//! ```text
//!   head ──► ┌──────┐ succ ┌──────┐ succ ┌──────┐
//!            │  F3  │ ───► │  F1  │ ───► │  F7  │ ──► none
//!   none ◄── │      │ ◄─── │      │ ◄─── │      │
//!       pred └──────┘ pred └──────┘ pred └──────┘
//! ```
//!
//! Insertion is LIFO at the head. Removal patches the two neighbours through
//! the block's own links, so it never scans the list.

use crate::block::{self, BlockPtr};

#[derive(Debug, Default)]
pub struct FreeList {
  head: Option<BlockPtr>,
  len: usize,
}

impl FreeList {
  pub const fn new() -> Self {
    Self { head: None, len: 0 }
  }

  pub fn head(&self) -> Option<BlockPtr> {
    self.head
  }

  /// Number of blocks added and not yet removed.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.head.is_none()
  }

  pub(crate) fn clear(&mut self) {
    self.head = None;
    self.len = 0;
  }

  /// Pushes a free block at the head of the list.
  pub(crate) fn add(
    &mut self,
    mem: &mut [u8],
    bp: BlockPtr,
  ) {
    block::set_pred(mem, bp, None);
    block::set_succ(mem, bp, self.head);
    if let Some(old) = self.head {
      block::set_pred(mem, old, Some(bp));
    }
    self.head = Some(bp);
    self.len += 1;
  }

  /// Unlinks a block that is currently in the list.
  pub(crate) fn remove(
    &mut self,
    mem: &mut [u8],
    bp: BlockPtr,
  ) {
    let pred = block::pred(mem, bp);
    let succ = block::succ(mem, bp);

    if self.head == Some(bp) {
      self.head = succ;
    } else if let Some(pred) = pred {
      block::set_succ(mem, pred, succ);
    }
    if let Some(succ) = succ {
      block::set_pred(mem, succ, pred);
    }
    self.len -= 1;
  }

  /// First block, in list order, whose size is at least `asize`.
  pub fn find_fit(
    &self,
    mem: &[u8],
    asize: usize,
  ) -> Option<BlockPtr> {
    self.iter(mem).find(|&bp| block::size(mem, bp) >= asize)
  }

  /// Walks the list from the head. The walk trusts the links; on a
  /// corrupted heap it may not terminate, so bound it with `take`.
  pub fn iter<'a>(
    &self,
    mem: &'a [u8],
  ) -> Iter<'a> {
    Iter {
      mem,
      cursor: self.head,
    }
  }
}

pub struct Iter<'a> {
  mem: &'a [u8],
  cursor: Option<BlockPtr>,
}

impl Iterator for Iter<'_> {
  type Item = BlockPtr;

  fn next(&mut self) -> Option<Self::Item> {
    let bp = self.cursor?;
    self.cursor = block::succ(self.mem, bp);
    Some(bp)
  }
}
