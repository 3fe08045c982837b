//! Replays allocation traces against the heap and reports space utilization.
//!
//! ```text
//!   mdriver [-v] [--mmap] [--limit BYTES] TRACE...
//! ```
//!
//! Set `RUST_LOG=debug` (or `trace`) to follow every operation.

use std::{path::PathBuf, process::ExitCode};

use log::error;
use tagalloc::{
  HeapConfig,
  config::ArenaKind,
  trace::{Trace, replay},
};

fn usage() -> ExitCode {
  eprintln!("usage: mdriver [-v] [--mmap] [--limit BYTES] TRACE...");
  ExitCode::FAILURE
}

fn main() -> ExitCode {
  env_logger::init();

  let mut config = HeapConfig::default();
  let mut traces = Vec::new();

  let mut args = std::env::args().skip(1);
  while let Some(arg) = args.next() {
    match arg.as_str() {
      "-v" | "--verify" => config = config.with_verify(true),
      #[cfg(unix)]
      "--mmap" => config = config.with_arena(ArenaKind::Mmap),
      "--limit" => match args.next().and_then(|v| v.parse().ok()) {
        Some(limit) => config = config.with_arena_limit(limit),
        None => return usage(),
      },
      "-h" | "--help" => return usage(),
      _ => traces.push(PathBuf::from(arg)),
    }
  }

  if traces.is_empty() {
    return usage();
  }

  let mut failed = false;
  let mut utilization = Vec::new();

  for path in &traces {
    let stats = Trace::from_path(path)
      .map_err(|err| err.to_string())
      .and_then(|trace| replay(&trace, &config).map_err(|err| err.to_string()));

    match stats {
      Ok(stats) => {
        println!(
          "{:<32} {:>8} ops  {:>10} bytes  util {:>5.1}%",
          path.display(),
          stats.ops,
          stats.arena_bytes,
          stats.utilization() * 100.0
        );
        utilization.push(stats.utilization());
      }
      Err(err) => {
        error!("{}: {err}", path.display());
        println!("{:<32} FAILED: {err}", path.display());
        failed = true;
      }
    }
  }

  if !utilization.is_empty() {
    let average = utilization.iter().sum::<f64>() / utilization.len() as f64;
    println!("average utilization {:.1}%", average * 100.0);
  }

  if failed {
    ExitCode::FAILURE
  } else {
    ExitCode::SUCCESS
  }
}
