#![allow(dead_code)]

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use cio::driver::Uring;
use cio::Ring;
use cio::exec::LocalExec;
use cio::Executor;

/// Builds a single-threaded driver/executor pair, or skips the test when
/// the environment forbids io_uring (old kernel, seccomp).
pub fn local_ring(entries: u32) -> Option<(LocalExec, Uring<LocalExec>)> {
  let exec = LocalExec::new();
  match Uring::new(entries, exec.clone()) {
    Ok(ring) => Some((exec, ring)),
    Err(e) => {
      eprintln!("skipping test: io_uring unavailable ({e})");
      None
    }
  }
}

/// Alternates driver polling and executor draining until both are idle.
pub fn drive(ring: &Uring<LocalExec>, exec: &LocalExec) {
  while ring.pending() > 0 || exec.pending() > 0 {
    if ring.pending() > 0 {
      ring.poll().expect("poll failed");
    }
    exec.run();
  }
}

pub fn tmp(name: &str) -> PathBuf {
  std::env::temp_dir().join(format!("cio_{}_{}", name, std::process::id()))
}

pub fn c_path(path: &Path) -> CString {
  CString::new(path.as_os_str().as_bytes()).unwrap()
}
