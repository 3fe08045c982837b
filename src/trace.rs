//! Allocation traces and their replay against a heap.
//!
//! A trace file starts with four header numbers (suggested heap size, number
//! of ids, number of operations, weight), followed by one operation per line:
//!
//! ```text
//!   a <id> <size>    allocate `size` bytes and name the block `id`
//!   r <id> <size>    resize block `id` to `size` bytes
//!   f <id>           free block `id`
//! ```
//!
//! Replay checks every block the way a careful caller would notice heap
//! bugs: payloads must be aligned, hold the requested bytes, never overlap a
//! live block, and keep the caller's data until it is freed or resized.

use std::{collections::BTreeMap, fmt, fs, io, path::Path};

use log::{debug, info};

use crate::{
  arena::{Arena, VecArena},
  block::BlockPtr,
  config::{ALIGNMENT, ArenaKind, HeapConfig},
  error::{ArenaError, CheckError, HeapError},
  heap::Heap,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Alloc { id: usize, size: usize },
  Resize { id: usize, size: usize },
  Free { id: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
  pub suggested_heap: usize,
  pub ids: usize,
  pub weight: usize,
  pub ops: Vec<Op>,
}

#[derive(Debug)]
pub enum TraceError {
  Io(io::Error),
  /// The file ended before all four header numbers were read.
  MissingHeader { field: &'static str },
  BadNumber { line: usize, text: String },
  UnknownOp { line: usize, op: String },
  MissingField { line: usize },
  IdOutOfRange { line: usize, id: usize, ids: usize },
  OpCount { declared: usize, found: usize },
}

impl fmt::Display for TraceError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::Io(err) => write!(f, "cannot read trace: {err}"),
      Self::MissingHeader { field } => write!(f, "trace header is missing `{field}`"),
      Self::BadNumber { line, text } => write!(f, "line {line}: `{text}` is not a number"),
      Self::UnknownOp { line, op } => write!(f, "line {line}: unknown operation `{op}`"),
      Self::MissingField { line } => write!(f, "line {line}: operation is missing a field"),
      Self::IdOutOfRange { line, id, ids } => {
        write!(f, "line {line}: id {id} out of range (trace declares {ids})")
      }
      Self::OpCount { declared, found } => {
        write!(f, "trace declares {declared} operations but has {found}")
      }
    }
  }
}

impl std::error::Error for TraceError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(err) => Some(err),
      _ => None,
    }
  }
}

impl From<io::Error> for TraceError {
  fn from(err: io::Error) -> Self {
    Self::Io(err)
  }
}

fn number(
  line: usize,
  text: &str,
) -> Result<usize, TraceError> {
  text.parse().map_err(|_| TraceError::BadNumber {
    line,
    text: text.to_owned(),
  })
}

impl Trace {
  pub fn parse(text: &str) -> Result<Self, TraceError> {
    let mut lines = text
      .lines()
      .enumerate()
      .map(|(i, line)| (i + 1, line.trim()))
      .filter(|(_, line)| !line.is_empty());

    let mut header = [0usize; 4];
    for (slot, field) in header
      .iter_mut()
      .zip(["suggested heap size", "id count", "op count", "weight"])
    {
      let (line, text) = lines.next().ok_or(TraceError::MissingHeader { field })?;
      *slot = number(line, text)?;
    }
    let [suggested_heap, ids, declared, weight] = header;

    let mut ops = Vec::with_capacity(declared);
    for (line, text) in lines {
      let mut fields = text.split_whitespace();
      let kind = fields.next().ok_or(TraceError::MissingField { line })?;
      let mut next_number = || -> Result<usize, TraceError> {
        let field = fields.next().ok_or(TraceError::MissingField { line })?;
        number(line, field)
      };

      let op = match kind {
        "a" => Op::Alloc {
          id: next_number()?,
          size: next_number()?,
        },
        "r" => Op::Resize {
          id: next_number()?,
          size: next_number()?,
        },
        "f" => Op::Free { id: next_number()? },
        other => {
          return Err(TraceError::UnknownOp {
            line,
            op: other.to_owned(),
          });
        }
      };

      let id = op.id();
      if id >= ids {
        return Err(TraceError::IdOutOfRange { line, id, ids });
      }
      ops.push(op);
    }

    if ops.len() != declared {
      return Err(TraceError::OpCount {
        declared,
        found: ops.len(),
      });
    }

    Ok(Self {
      suggested_heap,
      ids,
      weight,
      ops,
    })
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TraceError> {
    Self::parse(&fs::read_to_string(path)?)
  }
}

impl Op {
  pub fn id(&self) -> usize {
    match *self {
      Self::Alloc { id, .. } | Self::Resize { id, .. } | Self::Free { id } => id,
    }
  }
}

/// Outcome of a successful replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayStats {
  pub ops: usize,
  /// Largest total of requested bytes live at any one time.
  pub peak_payload: usize,
  pub arena_bytes: usize,
}

impl ReplayStats {
  /// Peak live payload over final arena size.
  pub fn utilization(&self) -> f64 {
    if self.arena_bytes == 0 {
      0.0
    } else {
      self.peak_payload as f64 / self.arena_bytes as f64
    }
  }
}

#[derive(Debug)]
pub enum ReplayError {
  Arena(ArenaError),
  Heap { op: usize, source: HeapError },
  Check { op: usize, source: CheckError },
  /// A non-zero request came back without a block.
  NoBlock { op: usize, id: usize },
  Misaligned { op: usize, id: usize, ptr: BlockPtr },
  TooSmall { op: usize, id: usize, size: usize, capacity: usize },
  Overlap { op: usize, id: usize, other: usize },
  /// A live block's contents changed while the caller owned it.
  Corrupted { op: usize, id: usize },
}

impl fmt::Display for ReplayError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Self::Arena(err) => write!(f, "cannot set up arena: {err}"),
      Self::Heap { op, source } => write!(f, "op {op}: {source}"),
      Self::Check { op, source } => write!(f, "op {op}: heap check failed: {source}"),
      Self::NoBlock { op, id } => write!(f, "op {op}: no block returned for id {id}"),
      Self::Misaligned { op, id, ptr } => {
        write!(f, "op {op}: block {ptr} for id {id} is not {ALIGNMENT}-byte aligned")
      }
      Self::TooSmall {
        op,
        id,
        size,
        capacity,
      } => write!(
        f,
        "op {op}: block for id {id} holds {capacity} bytes, {size} requested"
      ),
      Self::Overlap { op, id, other } => {
        write!(f, "op {op}: block for id {id} overlaps live block {other}")
      }
      Self::Corrupted { op, id } => write!(f, "op {op}: contents of block {id} were clobbered"),
    }
  }
}

impl std::error::Error for ReplayError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Arena(err) => Some(err),
      Self::Heap { source, .. } => Some(source),
      Self::Check { source, .. } => Some(source),
      _ => None,
    }
  }
}

/// Byte the replay writes at `index` of block `id`.
fn pattern(
  id: usize,
  index: usize,
) -> u8 {
  (id.wrapping_mul(0x9E37) ^ index.wrapping_mul(7)) as u8
}

/// Replays `trace` on a fresh heap built from `config`.
pub fn replay(
  trace: &Trace,
  config: &HeapConfig,
) -> Result<ReplayStats, ReplayError> {
  let init = |source| ReplayError::Heap { op: 0, source };
  match config.arena {
    ArenaKind::Vec => {
      let heap = Heap::new(VecArena::new(config.arena_limit)).map_err(init)?;
      replay_on(trace, heap, config.verify)
    }
    #[cfg(unix)]
    ArenaKind::Mmap => {
      let arena = crate::arena::MmapArena::new(config.arena_limit).map_err(ReplayError::Arena)?;
      replay_on(trace, Heap::new(arena).map_err(init)?, config.verify)
    }
  }
}

/// Replays `trace` on an already initialised heap.
pub fn replay_on<A: Arena>(
  trace: &Trace,
  heap: Heap<A>,
  verify: bool,
) -> Result<ReplayStats, ReplayError> {
  let mut replay = Replay {
    heap,
    live: vec![None; trace.ids],
    spans: BTreeMap::new(),
    payload: 0,
    peak: 0,
    verify,
  };

  for (op, &step) in trace.ops.iter().enumerate() {
    replay.step(op, step)?;
  }

  let stats = ReplayStats {
    ops: trace.ops.len(),
    peak_payload: replay.peak,
    arena_bytes: replay.heap.arena().len(),
  };
  info!(
    "replayed {} ops, peak payload {} bytes, arena {} bytes",
    stats.ops, stats.peak_payload, stats.arena_bytes
  );
  Ok(stats)
}

struct Replay<A: Arena> {
  heap: Heap<A>,
  /// Block and requested size for each live id.
  live: Vec<Option<(BlockPtr, usize)>>,
  /// Live payload spans keyed by start offset: (end, id).
  spans: BTreeMap<usize, (usize, usize)>,
  payload: usize,
  peak: usize,
  verify: bool,
}

impl<A: Arena> Replay<A> {
  fn step(
    &mut self,
    op: usize,
    step: Op,
  ) -> Result<(), ReplayError> {
    debug!("op {op}: {step:?}");
    match step {
      Op::Alloc { id, size } => {
        let ptr = self
          .heap
          .allocate(size)
          .map_err(|source| ReplayError::Heap { op, source })?;
        self.release(id);
        if let Some(ptr) = ptr {
          self.admit(op, id, ptr, size, 0)?;
        }
      }
      Op::Resize { id, size } => {
        let old = self.live[id];
        if let Some((ptr, old_size)) = old {
          self.verify_contents(op, id, ptr, old_size)?;
        }
        let ptr = self
          .heap
          .resize(old.map(|(ptr, _)| ptr), size)
          .map_err(|source| ReplayError::Heap { op, source })?;
        self.release(id);
        match ptr {
          Some(ptr) => {
            let kept = old.map_or(0, |(_, old_size)| old_size.min(size));
            self.verify_contents(op, id, ptr, kept)?;
            self.admit(op, id, ptr, size, kept)?;
          }
          None if size != 0 => return Err(ReplayError::NoBlock { op, id }),
          None => {}
        }
      }
      Op::Free { id } => {
        let old = self.live[id];
        if let Some((ptr, size)) = old {
          self.verify_contents(op, id, ptr, size)?;
        }
        self.release(id);
        self.heap.free(old.map(|(ptr, _)| ptr));
      }
    }

    if self.verify {
      self
        .heap
        .check()
        .map_err(|source| ReplayError::Check { op, source })?;
    }
    Ok(())
  }

  /// Records a new block for `id` and fills its payload past `keep` bytes.
  fn admit(
    &mut self,
    op: usize,
    id: usize,
    ptr: BlockPtr,
    size: usize,
    keep: usize,
  ) -> Result<(), ReplayError> {
    if ptr.offset() % ALIGNMENT != 0 {
      return Err(ReplayError::Misaligned { op, id, ptr });
    }

    let capacity = self.heap.payload_size(ptr);
    if capacity < size {
      return Err(ReplayError::TooSmall {
        op,
        id,
        size,
        capacity,
      });
    }

    let start = ptr.offset();
    let end = start + size;
    let before = self.spans.range(..end).next_back();
    if let Some((_, &(other_end, other))) = before {
      if other_end > start {
        return Err(ReplayError::Overlap { op, id, other });
      }
    }

    for (i, byte) in self.heap.payload_mut(ptr)[..size]
      .iter_mut()
      .enumerate()
      .skip(keep)
    {
      *byte = pattern(id, i);
    }

    self.spans.insert(start, (end, id));
    self.live[id] = Some((ptr, size));
    self.payload += size;
    self.peak = self.peak.max(self.payload);
    Ok(())
  }

  fn release(
    &mut self,
    id: usize,
  ) {
    if let Some((ptr, size)) = self.live[id].take() {
      self.spans.remove(&ptr.offset());
      self.payload -= size;
    }
  }

  fn verify_contents(
    &self,
    op: usize,
    id: usize,
    ptr: BlockPtr,
    len: usize,
  ) -> Result<(), ReplayError> {
    let intact = self.heap.payload(ptr)[..len]
      .iter()
      .enumerate()
      .all(|(i, &byte)| byte == pattern(id, i));
    if intact {
      Ok(())
    } else {
      Err(ReplayError::Corrupted { op, id })
    }
  }
}
