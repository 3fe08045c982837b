//! Heap consistency checker.
//!
//! A diagnostic for tests and debugging, never called on the allocation
//! path. It walks the arena block by block, then the free list node by node,
//! and cross-checks the two.

use crate::{
  arena::Arena,
  block::{self, Block, BlockPtr, BlockState, FIRST_BLOCK, PROLOGUE},
  config::{ALIGNMENT, DSIZE, MIN_BLOCK_SIZE, WSIZE},
  error::CheckError,
  heap::{Heap, HeapStats},
};

impl<A: Arena> Heap<A> {
  /// Verifies every heap invariant and returns the totals of the arena walk.
  pub fn check(&self) -> Result<HeapStats, CheckError> {
    let stats = self.check_blocks()?;
    self.check_free_list(&stats)?;
    Ok(stats)
  }

  fn check_blocks(&self) -> Result<HeapStats, CheckError> {
    let mem = self.arena().bytes();
    let high = mem.len();

    if high < FIRST_BLOCK.offset() {
      return Err(CheckError::BadEpilogue { at: high, word: 0 });
    }

    let prologue = block::pack(DSIZE, true);
    let header = block::get(mem, block::header(PROLOGUE));
    let footer = block::get(mem, PROLOGUE.offset());
    if header != prologue || footer != prologue {
      return Err(CheckError::BadPrologue { header, footer });
    }

    let mut stats = HeapStats {
      arena_bytes: high,
      ..HeapStats::default()
    };
    let mut prev_free: Option<BlockPtr> = None;
    let mut bp = FIRST_BLOCK;

    loop {
      let word = block::get(mem, block::header(bp));
      let (size, allocated) = block::unpack(word);

      if size == 0 {
        if !allocated || bp.offset() != high || bp != self.epilogue() {
          return Err(CheckError::BadEpilogue {
            at: block::header(bp),
            word,
          });
        }
        break;
      }

      if bp.offset() % ALIGNMENT != 0 {
        return Err(CheckError::Misaligned { block: bp });
      }
      if size < MIN_BLOCK_SIZE || size % ALIGNMENT != 0 {
        return Err(CheckError::BadSize { block: bp, size });
      }
      // The next header must still fit below the top.
      if bp.offset() + size > high {
        return Err(CheckError::Overrun { block: bp, size });
      }

      let footer = block::get(mem, bp.offset() + size - DSIZE);
      if footer != word {
        return Err(CheckError::TagMismatch {
          block: bp,
          header: word,
          footer,
        });
      }

      match (prev_free, allocated) {
        (Some(prev), false) => {
          return Err(CheckError::AdjacentFree {
            block: prev,
            next: bp,
          });
        }
        (_, false) => prev_free = Some(bp),
        (_, true) => prev_free = None,
      }

      stats.record(&Block::new(bp, size, !allocated));
      bp = BlockPtr::new(bp.offset() + size);
    }

    Ok(stats)
  }

  fn check_free_list(
    &self,
    stats: &HeapStats,
  ) -> Result<(), CheckError> {
    let mem = self.arena().bytes();
    let high = mem.len();

    let mut expected_pred = None;
    let mut cursor = self.free_list().head();
    let mut list_blocks = 0;
    let mut list_bytes = 0;

    while let Some(bp) = cursor {
      let offset = bp.offset();
      let in_bounds = offset >= FIRST_BLOCK.offset()
        && offset % ALIGNMENT == 0
        && offset + MIN_BLOCK_SIZE - WSIZE <= high;
      if !in_bounds {
        return Err(CheckError::LinkOutOfBounds {
          from: expected_pred,
          link: offset,
        });
      }

      let BlockState::Free { pred, succ } = block::state(mem, bp) else {
        return Err(CheckError::AllocatedInFreeList { block: bp });
      };
      if pred != expected_pred {
        return Err(CheckError::BrokenBackLink {
          block: bp,
          expected: expected_pred,
          found: pred,
        });
      }

      list_blocks += 1;
      list_bytes += block::size(mem, bp);
      if list_blocks > stats.blocks {
        return Err(CheckError::FreeListCycle);
      }

      expected_pred = Some(bp);
      cursor = succ;
    }

    if list_blocks != stats.free_blocks
      || list_bytes != stats.free_bytes
      || list_blocks != self.free_list().len()
    {
      return Err(CheckError::FreeListMismatch {
        list_blocks,
        list_bytes,
        heap_blocks: stats.free_blocks,
        heap_bytes: stats.free_bytes,
      });
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::VecArena;

  use test_log::test;

  fn heap() -> Heap {
    Heap::new(VecArena::new(1 << 20)).unwrap()
  }

  fn corrupt(
    heap: &mut Heap,
    at: usize,
    word: u32,
  ) {
    block::put(heap.arena_mut().bytes_mut(), at, word);
  }

  #[test]
  fn fresh_heap_is_consistent() {
    let heap = heap();
    let stats = heap.check().unwrap();

    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats, heap.stats());
  }

  #[test]
  fn busy_heap_is_consistent() {
    let mut heap = heap();
    let mut live = Vec::new();

    for round in 0..50usize {
      let size = (round * 37) % 700 + 1;
      live.push(heap.allocate(size).unwrap());
      if round % 3 == 0 {
        let victim = live.swap_remove(round % live.len());
        heap.free(victim);
      }
      if round % 5 == 0 {
        if let Some(last) = live.last_mut() {
          *last = heap.resize(*last, size * 2).unwrap();
        }
      }
      heap.check().unwrap();
    }
  }

  #[test]
  fn detects_damaged_prologue() {
    let mut heap = heap();
    corrupt(&mut heap, PROLOGUE.offset(), 0);

    assert!(matches!(heap.check(), Err(CheckError::BadPrologue { .. })));
  }

  #[test]
  fn detects_tag_mismatch() {
    let mut heap = heap();
    let p = heap.allocate(40).unwrap().unwrap();
    let footer = block::footer(heap.arena().bytes(), p);
    corrupt(&mut heap, footer, block::pack(64, true));

    assert_eq!(
      heap.check(),
      Err(CheckError::TagMismatch {
        block: p,
        header: block::pack(48, true),
        footer: block::pack(64, true),
      })
    );
  }

  #[test]
  fn detects_uncoalesced_neighbours() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap().unwrap();
    let b = heap.allocate(40).unwrap().unwrap();
    heap.allocate(40).unwrap();

    heap.free(Some(a));
    // Mark b free behind the allocator's back.
    let mem = heap.arena_mut().bytes_mut();
    block::set_tags(mem, b, 48, false);

    assert_eq!(
      heap.check(),
      Err(CheckError::AdjacentFree { block: a, next: b })
    );
  }

  #[test]
  fn detects_allocated_block_in_free_list() {
    let mut heap = heap();
    let head = heap.free_list().head().unwrap();
    let size = block::size(heap.arena().bytes(), head);
    block::set_tags(heap.arena_mut().bytes_mut(), head, size, true);

    assert_eq!(
      heap.check(),
      Err(CheckError::AllocatedInFreeList { block: head })
    );
  }

  #[test]
  fn detects_broken_back_link() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap().unwrap();
    heap.allocate(40).unwrap();
    heap.free(Some(a));

    // List is [a, tail]; point the tail's predecessor elsewhere.
    let tail = block::succ(heap.arena().bytes(), a).unwrap();
    block::set_pred(heap.arena_mut().bytes_mut(), tail, None);

    assert_eq!(
      heap.check(),
      Err(CheckError::BrokenBackLink {
        block: tail,
        expected: Some(a),
        found: None,
      })
    );
  }

  #[test]
  fn detects_free_list_cycle() {
    let mut heap = heap();
    let a = heap.allocate(40).unwrap().unwrap();
    heap.allocate(40).unwrap();
    heap.free(Some(a));

    // [a, tail] becomes a -> tail -> a -> ...; the second visit of `a`
    // arrives from `tail` while its predecessor link still says none.
    let tail = block::succ(heap.arena().bytes(), a).unwrap();
    block::set_succ(heap.arena_mut().bytes_mut(), tail, Some(a));

    assert_eq!(
      heap.check(),
      Err(CheckError::BrokenBackLink {
        block: a,
        expected: Some(tail),
        found: None,
      })
    );
  }

  #[test]
  fn detects_link_outside_arena() {
    let mut heap = heap();
    let head = heap.free_list().head().unwrap();
    let far = BlockPtr::new(1 << 24);
    block::set_succ(heap.arena_mut().bytes_mut(), head, Some(far));

    assert_eq!(
      heap.check(),
      Err(CheckError::LinkOutOfBounds {
        from: Some(head),
        link: 1 << 24,
      })
    );
  }
}
