//! Boundary-tag coalescing.
//!
//! ```text
//!   case 1    [ A ][ b ][ A ]   nothing to merge
//!   case 2    [ A ][ b ][ F ]   b absorbs next
//!   case 3    [ F ][ b ][ A ]   prev absorbs b
//!   case 4    [ F ][ b ][ F ]   prev absorbs b and next
//! ```
//!
//! The sentinels are always allocated, so the neighbour reads never leave the
//! block area.

use log::trace;

use crate::{
  block::{self, BlockPtr},
  free_list::FreeList,
};

/// Merges the free block `bp` with any free physical neighbours and returns
/// the merged block.
///
/// `bp` must already carry free tags and must not be in the list; neighbours
/// that get absorbed are unlinked here. The caller inserts the result.
pub(crate) fn coalesce(
  mem: &mut [u8],
  free: &mut FreeList,
  bp: BlockPtr,
) -> BlockPtr {
  let prev_alloc = block::prev_allocated(mem, bp);
  let next = block::next(mem, bp);
  let next_alloc = block::is_allocated(mem, next);
  let mut size = block::size(mem, bp);

  match (prev_alloc, next_alloc) {
    (true, true) => bp,
    (true, false) => {
      trace!("coalesce {bp} with next {next}");
      free.remove(mem, next);
      size += block::size(mem, next);
      block::set_tags(mem, bp, size, false);
      bp
    }
    (false, true) => {
      let prev = block::prev(mem, bp);
      trace!("coalesce {bp} into prev {prev}");
      free.remove(mem, prev);
      size += block::size(mem, prev);
      block::set_tags(mem, prev, size, false);
      prev
    }
    (false, false) => {
      let prev = block::prev(mem, bp);
      trace!("coalesce {bp} with prev {prev} and next {next}");
      free.remove(mem, prev);
      free.remove(mem, next);
      size += block::size(mem, prev) + block::size(mem, next);
      block::set_tags(mem, prev, size, false);
      prev
    }
  }
}
