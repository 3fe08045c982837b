//! Growable byte arenas backing a heap.
//!
//! An arena is addressed by byte offsets from its base. It only grows, by an
//! exact number of bytes, and reports the offset of the old top so the caller
//! can lay a new block over the freshly granted region. This module is the
//! only place in the crate that touches raw memory.

use std::{ptr::NonNull, slice};

use log::debug;

use crate::{align, config::MAX_ARENA_SIZE, error::ArenaError};

/// The contiguous, growable memory a heap is laid out in.
pub trait Arena {
  /// Extends the arena by exactly `delta` bytes and returns the previous
  /// top, which is the first byte of the new region.
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<usize, ArenaError>;

  /// First valid offset.
  fn low(&self) -> usize {
    0
  }

  /// One past the last valid offset.
  fn high(&self) -> usize;

  /// Shrinks the arena back to zero bytes.
  fn reset(&mut self);

  /// The bytes between [`low`](Arena::low) and [`high`](Arena::high).
  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];

  fn len(&self) -> usize {
    self.high() - self.low()
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn check_growth(
  brk: usize,
  limit: usize,
  delta: usize,
) -> Result<usize, ArenaError> {
  let available = limit - brk;
  if delta > available {
    return Err(ArenaError::Exhausted {
      requested: delta,
      available,
    });
  }
  Ok(brk + delta)
}

/// Arena stored in a vector of 8-byte words, so the base is always aligned.
///
/// The vector may move as it grows; offsets stay valid.
#[derive(Debug)]
pub struct VecArena {
  words: Vec<u64>,
  brk: usize,
  limit: usize,
}

impl VecArena {
  pub fn new(limit: usize) -> Self {
    Self {
      words: Vec::new(),
      brk: 0,
      limit: limit.min(MAX_ARENA_SIZE),
    }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Arena for VecArena {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<usize, ArenaError> {
    let top = check_growth(self.brk, self.limit, delta)?;
    let old = self.brk;
    self.words.resize(align!(top) / 8, 0);
    self.brk = top;
    debug!("vec arena grew by {delta} bytes, top = {top:#x}");
    Ok(old)
  }

  fn high(&self) -> usize {
    self.brk
  }

  fn reset(&mut self) {
    self.words.clear();
    self.brk = 0;
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: `words` owns at least `brk` initialised bytes and u8 has no
    // alignment requirement.
    unsafe { slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`, and the borrow of `self` is exclusive.
    unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.brk) }
  }
}

/// Arena carved out of a single anonymous mapping reserved up front.
///
/// Growth moves a break offset inside the mapping, like `sbrk` does for the
/// process data segment, so the region never moves. Pages are only committed
/// by the kernel once touched.
#[cfg(unix)]
#[derive(Debug)]
pub struct MmapArena {
  base: NonNull<u8>,
  brk: usize,
  limit: usize,
}

#[cfg(unix)]
impl MmapArena {
  pub fn new(limit: usize) -> Result<Self, ArenaError> {
    let limit = limit.min(MAX_ARENA_SIZE);

    // SAFETY: a fresh private anonymous mapping aliases nothing.
    let addr = unsafe {
      libc::mmap(
        std::ptr::null_mut(),
        limit,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if addr == libc::MAP_FAILED {
      return Err(ArenaError::Map(std::io::Error::last_os_error()));
    }

    let base = NonNull::new(addr.cast::<u8>())
      .ok_or_else(|| ArenaError::Map(std::io::Error::other("mmap returned null")))?;

    debug!("mapped {limit} byte arena at {:?}", base);

    Ok(Self { base, brk: 0, limit })
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

#[cfg(unix)]
impl Arena for MmapArena {
  fn grow(
    &mut self,
    delta: usize,
  ) -> Result<usize, ArenaError> {
    let top = check_growth(self.brk, self.limit, delta)?;
    let old = self.brk;
    self.brk = top;
    debug!("mmap arena break moved by {delta} bytes, top = {top:#x}");
    Ok(old)
  }

  fn high(&self) -> usize {
    self.brk
  }

  fn reset(&mut self) {
    if self.brk > 0 {
      // SAFETY: the range lies inside our own mapping. Dropping the pages
      // only discards their contents; the mapping stays valid.
      unsafe {
        libc::madvise(self.base.as_ptr().cast(), self.brk, libc::MADV_DONTNEED);
      }
    }
    self.brk = 0;
  }

  fn bytes(&self) -> &[u8] {
    // SAFETY: the first `brk` bytes of the mapping are readable and
    // zero-initialised by the kernel on first touch.
    unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    // SAFETY: as in `bytes`; the mapping is private to this arena.
    unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
  }
}

#[cfg(unix)]
impl Drop for MmapArena {
  fn drop(&mut self) {
    // SAFETY: `base` and `limit` describe exactly the mapping made in `new`.
    unsafe {
      libc::munmap(self.base.as_ptr().cast(), self.limit);
    }
  }
}
