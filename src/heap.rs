use log::{debug, trace, warn};

use crate::{
  align,
  align::align_up,
  arena::{Arena, VecArena},
  block::{self, Block, BlockPtr, FIRST_BLOCK, PROLOGUE},
  coalesce::coalesce,
  config::{CHUNK_SIZE, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, WSIZE},
  error::HeapError,
  free_list::FreeList,
};

/// Totals gathered by walking every block between the sentinels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub arena_bytes: usize,
  pub blocks: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_bytes: usize,
}

impl HeapStats {
  pub(crate) fn record(
    &mut self,
    block: &Block,
  ) {
    self.blocks += 1;
    if block.is_free {
      self.free_blocks += 1;
      self.free_bytes += block.size;
    } else {
      self.allocated_bytes += block.size;
    }
  }
}

/// A boundary-tag heap with an explicit free list, laid out in `A`.
///
/// All state lives either in the arena or in this value, so independent
/// heaps can coexist. Every operation takes `&mut self`: one owner issues one
/// operation at a time.
#[derive(Debug)]
pub struct Heap<A: Arena = VecArena> {
  arena: A,
  free: FreeList,
  epilogue: BlockPtr,
}

impl<A: Arena> Heap<A> {
  /// Takes ownership of `arena` and initialises a heap inside it.
  pub fn new(arena: A) -> Result<Self, HeapError> {
    let mut heap = Self {
      arena,
      free: FreeList::new(),
      epilogue: FIRST_BLOCK,
    };
    heap.init()?;
    Ok(heap)
  }

  /// Discards every block and lays out an empty heap: padding word,
  /// prologue, epilogue and one [`CHUNK_SIZE`] free block.
  ///
  /// ```text
  ///   0      4          8          12         16
  ///   ┌──────┬──────────┬──────────┬──────────┐
  ///   │ pad  │ 8 | 1    │ 8 | 1    │ 0 | 1    │
  ///   └──────┴──────────┴──────────┴──────────┘
  ///           prologue   prologue   epilogue
  ///           header     footer     header
  /// ```
  pub fn init(&mut self) -> Result<(), HeapError> {
    self.arena.reset();
    self.free.clear();

    self.arena.grow(4 * WSIZE)?;
    let mem = self.arena.bytes_mut();
    block::put(mem, 0, 0);
    block::set_tags(mem, PROLOGUE, DSIZE, true);
    block::set_epilogue(mem, FIRST_BLOCK);
    self.epilogue = FIRST_BLOCK;

    self.extend(CHUNK_SIZE / WSIZE)?;
    debug!("heap initialised with {} bytes", self.arena.high());
    Ok(())
  }

  /// Allocates a block with at least `size` payload bytes.
  ///
  /// Returns `Ok(None)` for a zero-sized request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<BlockPtr>, HeapError> {
    if size == 0 {
      return Ok(None);
    }

    let asize = adjusted_size(size)?;

    let bp = match self.free.find_fit(self.arena.bytes(), asize) {
      Some(bp) => bp,
      None => self.extend(asize.max(CHUNK_SIZE) / WSIZE)?,
    };

    self.place(bp, asize);
    trace!("allocate({size}) -> {bp} ({asize} byte block)");
    Ok(Some(bp))
  }

  /// Releases a block. Freeing `None` does nothing.
  ///
  /// `ptr` must have come from this heap and still be allocated.
  pub fn free(
    &mut self,
    ptr: Option<BlockPtr>,
  ) {
    let Some(bp) = ptr else {
      return;
    };

    let mem = self.arena.bytes_mut();
    let size = block::size(mem, bp);
    block::set_tags(mem, bp, size, false);

    let merged = coalesce(mem, &mut self.free, bp);
    self.free.add(mem, merged);
    trace!("free({bp}) -> free block {merged}");
  }

  /// Moves a block's contents into a fresh block of `size` bytes.
  ///
  /// `None` behaves as [`allocate`](Self::allocate) and a zero `size` as
  /// [`free`](Self::free). The block is never grown or shrunk in place. If
  /// the new block cannot be allocated, the old one is left untouched.
  pub fn resize(
    &mut self,
    ptr: Option<BlockPtr>,
    size: usize,
  ) -> Result<Option<BlockPtr>, HeapError> {
    let Some(old) = ptr else {
      return self.allocate(size);
    };

    if size == 0 {
      self.free(Some(old));
      return Ok(None);
    }

    let Some(new) = self.allocate(size)? else {
      return Ok(None);
    };

    let copy = size.min(self.payload_size(old));
    let start = old.offset();
    self
      .arena
      .bytes_mut()
      .copy_within(start..start + copy, new.offset());
    self.free(Some(old));

    trace!("resize({old}, {size}) -> {new}, copied {copy} bytes");
    Ok(Some(new))
  }

  /// Bytes the caller may use at `ptr`.
  pub fn payload_size(
    &self,
    ptr: BlockPtr,
  ) -> usize {
    block::size(self.arena.bytes(), ptr) - DSIZE
  }

  pub fn payload(
    &self,
    ptr: BlockPtr,
  ) -> &[u8] {
    let start = ptr.offset();
    &self.arena.bytes()[start..start + self.payload_size(ptr)]
  }

  pub fn payload_mut(
    &mut self,
    ptr: BlockPtr,
  ) -> &mut [u8] {
    let start = ptr.offset();
    let len = self.payload_size(ptr);
    &mut self.arena.bytes_mut()[start..start + len]
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  #[cfg(test)]
  pub(crate) fn arena_mut(&mut self) -> &mut A {
    &mut self.arena
  }

  pub fn free_list(&self) -> &FreeList {
    &self.free
  }

  /// The epilogue sentinel; it always sits at the top of the arena.
  pub fn epilogue(&self) -> BlockPtr {
    self.epilogue
  }

  /// Walks the blocks between the prologue and the epilogue in address
  /// order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      mem: self.arena.bytes(),
      cursor: FIRST_BLOCK,
    }
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      arena_bytes: self.arena.len(),
      ..HeapStats::default()
    };
    for block in self.blocks() {
      stats.record(&block);
    }
    stats
  }

  /// Grows the arena by `words` (rounded up to an even count), turns the new
  /// region into a free block and merges it with a free block at the old
  /// top.
  fn extend(
    &mut self,
    words: usize,
  ) -> Result<BlockPtr, HeapError> {
    let size = align!(words * WSIZE);

    let old_top = self.arena.grow(size).map_err(|err| {
      warn!("cannot extend heap by {size} bytes: {err}");
      HeapError::Exhausted(err)
    })?;

    // The new block's header lands on the old epilogue.
    let bp = BlockPtr::new(old_top);
    let mem = self.arena.bytes_mut();
    block::set_tags(mem, bp, size, false);
    self.epilogue = block::next(mem, bp);
    block::set_epilogue(mem, self.epilogue);

    let merged = coalesce(mem, &mut self.free, bp);
    self.free.add(mem, merged);
    debug!("extended heap by {size} bytes, free block {merged}");
    Ok(merged)
  }

  /// Carves an `asize` block out of the free block `bp`, splitting off the
  /// remainder when it can stand as a block of its own.
  fn place(
    &mut self,
    bp: BlockPtr,
    asize: usize,
  ) {
    let mem = self.arena.bytes_mut();
    self.free.remove(mem, bp);

    let csize = block::size(mem, bp);
    if csize - asize >= MIN_BLOCK_SIZE {
      block::set_tags(mem, bp, asize, true);
      let rest = block::next(mem, bp);
      block::set_tags(mem, rest, csize - asize, false);
      self.free.add(mem, rest);
    } else {
      block::set_tags(mem, bp, csize, true);
    }
  }
}

/// Block size for a `size`-byte request: payload plus header and footer,
/// rounded to the alignment, never below the minimum block.
fn adjusted_size(size: usize) -> Result<usize, HeapError> {
  size
    .checked_add(DSIZE)
    .and_then(align_up)
    .filter(|&asize| asize <= MAX_BLOCK_SIZE)
    .map(|asize| asize.max(MIN_BLOCK_SIZE))
    .ok_or(HeapError::TooLarge { requested: size })
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a> {
  mem: &'a [u8],
  cursor: BlockPtr,
}

impl Iterator for Blocks<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Self::Item> {
    let (size, allocated) = block::unpack(block::get(self.mem, block::header(self.cursor)));
    if size == 0 {
      return None;
    }
    let current = Block::new(self.cursor, size, !allocated);
    self.cursor = BlockPtr::new(self.cursor.offset() + size);
    Some(current)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ArenaError;

  use test_log::test;

  const INITIAL: usize = 4 * WSIZE + CHUNK_SIZE;

  fn heap() -> Heap {
    Heap::new(VecArena::new(1 << 20)).unwrap()
  }

  fn alloc(
    heap: &mut Heap,
    size: usize,
  ) -> BlockPtr {
    heap.allocate(size).unwrap().unwrap()
  }

  fn fill(
    heap: &mut Heap,
    ptr: BlockPtr,
    len: usize,
    seed: u8,
  ) {
    for (i, byte) in heap.payload_mut(ptr)[..len].iter_mut().enumerate() {
      *byte = seed.wrapping_add(i as u8);
    }
  }

  fn holds(
    heap: &Heap,
    ptr: BlockPtr,
    len: usize,
    seed: u8,
  ) -> bool {
    heap.payload(ptr)[..len]
      .iter()
      .enumerate()
      .all(|(i, &byte)| byte == seed.wrapping_add(i as u8))
  }

  #[test]
  fn init_seeds_one_free_chunk() {
    let heap = heap();

    assert_eq!(heap.arena().high(), INITIAL);
    assert_eq!(heap.epilogue().offset(), INITIAL);
    assert_eq!(heap.free_list().len(), 1);
    assert_eq!(heap.free_list().head(), Some(FIRST_BLOCK));
    assert_eq!(
      heap.blocks().collect::<Vec<_>>(),
      vec![Block::new(FIRST_BLOCK, CHUNK_SIZE, true)]
    );
  }

  #[test]
  fn init_fails_when_the_arena_is_too_small() {
    match Heap::new(VecArena::new(64)) {
      Err(HeapError::Exhausted(ArenaError::Exhausted { .. })) => {}
      other => panic!("expected exhaustion, got {other:?}"),
    }
  }

  #[test]
  fn init_discards_previous_blocks() {
    let mut heap = heap();
    for size in [10, 5000, 300] {
      alloc(&mut heap, size);
    }

    heap.init().unwrap();

    assert_eq!(heap.arena().high(), INITIAL);
    assert_eq!(heap.stats().free_blocks, 1);
    assert_eq!(heap.free_list().len(), 1);
  }

  #[test]
  fn zero_sized_allocation_is_none() {
    let mut heap = heap();
    assert!(heap.allocate(0).unwrap().is_none());
    assert_eq!(heap.stats().free_bytes, CHUNK_SIZE);
  }

  #[test]
  fn payloads_are_aligned_and_large_enough() {
    let mut heap = heap();
    let mut live = Vec::new();

    for size in (1..=300).step_by(7) {
      let ptr = alloc(&mut heap, size);
      assert_eq!(ptr.offset() % 8, 0);
      assert_eq!(heap.payload(ptr).as_ptr() as usize % 8, 0);
      assert!(heap.payload_size(ptr) >= size);
      fill(&mut heap, ptr, size, size as u8);
      live.push((ptr, size));
    }

    for &(ptr, size) in &live {
      assert!(holds(&heap, ptr, size, size as u8));
    }

    let mut ranges: Vec<_> = live
      .iter()
      .map(|&(ptr, _)| (ptr.offset(), ptr.offset() + heap.payload_size(ptr)))
      .collect();
    ranges.sort();
    for pair in ranges.windows(2) {
      assert!(pair[0].1 <= pair[1].0);
    }
  }

  #[test]
  fn small_requests_use_minimum_block() {
    let mut heap = heap();
    let a = alloc(&mut heap, 1);
    let b = alloc(&mut heap, 8);
    let c = alloc(&mut heap, 9);

    assert_eq!(heap.payload_size(a), 8);
    assert_eq!(b.offset() - a.offset(), MIN_BLOCK_SIZE);
    assert_eq!(c.offset() - b.offset(), MIN_BLOCK_SIZE);
    assert_eq!(heap.payload_size(c), 16);
  }

  #[test]
  fn freed_block_is_reused_before_growing() {
    let mut heap = heap();
    let a = alloc(&mut heap, 100);
    let b = alloc(&mut heap, 200);
    let top = heap.arena().high();

    heap.free(Some(a));
    let c = alloc(&mut heap, 90);

    assert_eq!(c, a);
    assert_ne!(c, b);
    assert_eq!(heap.arena().high(), top);
  }

  #[test]
  fn remainder_too_small_to_split_stays_with_block() {
    let mut heap = heap();
    let a = alloc(&mut heap, 100);
    let _b = alloc(&mut heap, 16);

    heap.free(Some(a));
    let c = alloc(&mut heap, 96);

    // 112-byte block, 104 needed: the 8 spare bytes cannot form a block.
    assert_eq!(c, a);
    assert_eq!(heap.payload_size(c), 104);
  }

  #[test]
  fn exhausted_free_list_extends_into_the_tail_block() {
    let mut heap = heap();
    let a = alloc(&mut heap, 4000);
    let tail = block::next(heap.arena().bytes(), a);

    let b = alloc(&mut heap, 200);

    assert_eq!(b, tail);
    assert_eq!(heap.arena().high(), INITIAL + CHUNK_SIZE);
    let stats = heap.stats();
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.blocks, 3);
  }

  #[test]
  fn large_request_extends_by_its_own_size() {
    let mut heap = heap();
    let ptr = alloc(&mut heap, 3 * CHUNK_SIZE);

    assert!(heap.payload_size(ptr) >= 3 * CHUNK_SIZE);
    assert_eq!(heap.arena().high(), INITIAL + 3 * CHUNK_SIZE + DSIZE);
  }

  #[test]
  fn free_none_is_a_no_op() {
    let mut heap = heap();
    let a = alloc(&mut heap, 64);
    let before = heap.stats();

    heap.free(None);

    assert_eq!(heap.stats(), before);
    let b = alloc(&mut heap, 64);
    assert_ne!(a, b);
  }

  #[test]
  fn freeing_everything_restores_one_block() {
    let mut heap = heap();
    let ptrs: Vec<_> = [24, 300, 7, 1000, 64]
      .into_iter()
      .map(|size| alloc(&mut heap, size))
      .collect();

    for ptr in ptrs.into_iter().rev() {
      heap.free(Some(ptr));
    }

    let stats = heap.stats();
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.free_bytes, CHUNK_SIZE);
    assert_eq!(heap.free_list().len(), 1);
  }

  #[test]
  fn coalescing_is_independent_of_free_order() {
    let layout = |first: usize, second: usize| {
      let mut heap = heap();
      let ptrs = [
        alloc(&mut heap, 100),
        alloc(&mut heap, 100),
        alloc(&mut heap, 100),
      ];
      heap.free(Some(ptrs[first]));
      heap.free(Some(ptrs[second]));
      let blocks: Vec<_> = heap.blocks().collect();
      let list: Vec<_> = heap.free_list().iter(heap.arena().bytes()).collect();
      (blocks, list)
    };

    let forward = layout(0, 1);
    let backward = layout(1, 0);

    assert_eq!(forward, backward);
    assert_eq!(forward.0[0], Block::new(FIRST_BLOCK, 224, true));
  }

  #[test]
  fn resize_preserves_contents() {
    let mut heap = heap();
    let p = alloc(&mut heap, 100);
    fill(&mut heap, p, 100, 0x5A);

    let grown = heap.resize(Some(p), 500).unwrap().unwrap();
    assert!(heap.payload_size(grown) >= 500);
    assert!(holds(&heap, grown, 100, 0x5A));

    let shrunk = heap.resize(Some(grown), 50).unwrap().unwrap();
    assert!(holds(&heap, shrunk, 50, 0x5A));
  }

  #[test]
  fn resize_none_allocates() {
    let mut resized = heap();
    let mut allocated = heap();

    let a = resized.resize(None, 64).unwrap();
    let b = allocated.allocate(64).unwrap();

    assert_eq!(a, b);
    assert_eq!(resized.stats(), allocated.stats());
  }

  #[test]
  fn resize_to_zero_frees() {
    let mut heap = heap();
    let p = alloc(&mut heap, 64);

    assert_eq!(heap.resize(Some(p), 0).unwrap(), None);
    assert_eq!(heap.stats().free_bytes, CHUNK_SIZE);
  }

  #[test]
  fn exhaustion_is_reported_and_leaves_heap_usable() {
    let mut heap = Heap::new(VecArena::new(INITIAL + 1024)).unwrap();
    let before = heap.stats();

    match heap.allocate(8000) {
      Err(HeapError::Exhausted(ArenaError::Exhausted { requested, .. })) => {
        assert_eq!(requested, 8008);
      }
      other => panic!("expected exhaustion, got {other:?}"),
    }

    assert_eq!(heap.stats(), before);
    assert!(heap.allocate(100).unwrap().is_some());
  }

  #[test]
  fn failed_resize_keeps_the_old_block() {
    let mut heap = Heap::new(VecArena::new(INITIAL)).unwrap();
    let p = alloc(&mut heap, 100);
    fill(&mut heap, p, 100, 7);

    assert!(heap.resize(Some(p), 10_000).is_err());
    assert!(holds(&heap, p, 100, 7));
    assert!(!heap.blocks().find(|b| b.ptr == p).unwrap().is_free);
  }

  #[test]
  fn oversized_requests_are_rejected() {
    let mut heap = heap();

    for size in [usize::MAX, usize::MAX - 7, MAX_BLOCK_SIZE] {
      match heap.allocate(size) {
        Err(HeapError::TooLarge { requested }) => assert_eq!(requested, size),
        other => panic!("expected TooLarge for {size}, got {other:?}"),
      }
    }
    assert_eq!(heap.arena().high(), INITIAL);
  }

  #[test]
  fn heaps_are_independent() {
    let mut first = heap();
    let mut second = heap();

    let a = alloc(&mut first, 128);
    fill(&mut first, a, 128, 1);
    let b = alloc(&mut second, 128);
    fill(&mut second, b, 128, 2);

    assert_eq!(a, b);
    assert!(holds(&first, a, 128, 1));
    assert!(holds(&second, b, 128, 2));
  }

  #[cfg(unix)]
  #[test]
  fn works_on_a_mapped_arena() {
    use crate::arena::MmapArena;

    let mut heap = Heap::new(MmapArena::new(1 << 20).unwrap()).unwrap();
    let p = heap.allocate(5000).unwrap().unwrap();
    heap.payload_mut(p)[..5000].fill(0xEE);
    let q = heap.resize(Some(p), 10).unwrap().unwrap();

    assert!(heap.payload(q)[..10].iter().all(|&b| b == 0xEE));
    assert_eq!(heap.payload(q).as_ptr() as usize % 8, 0);
  }
}
