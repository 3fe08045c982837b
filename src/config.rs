//! Layout constants and heap construction settings.
//!
//! The layout constants are fixed: every block, tag and link in the arena is
//! laid out in terms of them. [`HeapConfig`] only picks how the arena behind a
//! heap is obtained and whether each operation is followed by a full
//! consistency check.

/// Word size in bytes: one header, footer or free-list link.
pub const WSIZE: usize = 4;

/// Double word size in bytes.
pub const DSIZE: usize = 8;

/// Every payload address and every block size is a multiple of this.
pub const ALIGNMENT: usize = DSIZE;

/// Minimum number of bytes requested from the arena when no free block fits.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Header, predecessor link, successor link and footer.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Largest size a header word can encode (the low three bits hold flags).
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize & !(ALIGNMENT - 1);

/// Offsets are stored in 32-bit words, so no arena may outgrow them.
pub const MAX_ARENA_SIZE: usize = MAX_BLOCK_SIZE;

/// Default arena limit: 20 MiB.
pub const DEFAULT_ARENA_LIMIT: usize = 20 * (1 << 20);

/// Backing store used for a heap's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArenaKind {
  /// A growable vector owned by the process allocator.
  #[default]
  Vec,
  /// One anonymous `mmap` reservation, grown by moving a break offset.
  #[cfg(unix)]
  Mmap,
}

/// Settings for building a heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig {
  /// Upper bound on the arena size in bytes; growth past it fails.
  pub arena_limit: usize,
  /// Which arena implementation backs the heap.
  pub arena: ArenaKind,
  /// Run the heap checker after every operation.
  pub verify: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      arena_limit: DEFAULT_ARENA_LIMIT,
      arena: ArenaKind::default(),
      verify: false,
    }
  }
}

impl HeapConfig {
  pub fn with_arena_limit(
    mut self,
    limit: usize,
  ) -> Self {
    self.arena_limit = limit.min(MAX_ARENA_SIZE);
    self
  }

  pub fn with_arena(
    mut self,
    arena: ArenaKind,
  ) -> Self {
    self.arena = arena;
    self
  }

  pub fn with_verify(
    mut self,
    verify: bool,
  ) -> Self {
    self.verify = verify;
    self
  }
}
