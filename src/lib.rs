#![deny(
  clippy::unnecessary_safety_comment,
  clippy::unsafe_removed_from_name,
  clippy::unnecessary_safety_doc,
  clippy::not_unsafe_ptr_arg_deref,
  clippy::undocumented_unsafe_blocks
)]

//! # cio — completion-based async I/O
//!
//! `cio` drives Linux's io_uring directly: operations are submitted to a
//! kernel ring together with a completion callback, and every completion is
//! reposted to an executor that the caller drains. There are no wakers or
//! reactors in the hot path; the kernel's completion queue *is* the event
//! source.
//!
//! The crate is built out of four small pieces:
//!
//! - [`Callable`](callable::Callable): a 64-byte move-only container for
//!   one-shot callbacks, stored inline whenever they fit.
//! - executors ([`LocalExec`](exec::LocalExec),
//!   [`SharedExec`](exec::SharedExec)): a FIFO of ready callbacks plus a
//!   `run()` that drains it.
//! - ring drivers ([`Uring`](driver::Uring),
//!   [`SharedUring`](driver::SharedUring)): own the kernel ring, submit
//!   entries tagged with a per-operation heap cell, and dispatch each
//!   completion back through that cell.
//! - completion tokens ([`token`]): one call site per operation, consumable
//!   as a plain callback, a blocking receiver, a future, or fire-and-forget.
//!
//! ### Example
//!
//! ```no_run
//! use cio::{exec::LocalExec, driver::Uring, ops, token::WithChannel, Ring};
//! use std::ffi::CString;
//!
//! # fn main() -> Result<(), cio::driver::SubmitError> {
//! let exec = LocalExec::new();
//! let ring = Uring::new(256, exec.clone())?;
//!
//! let path = CString::new("/etc/hostname").unwrap();
//! let (_, rx) = ops::open(&ring, path, libc::O_RDONLY, 0, WithChannel)?;
//!
//! while ring.pending() > 0 {
//!   ring.poll()?;
//!   exec.run();
//! }
//! let fd = rx.recv().expect("open failed");
//!
//! ops::close(&ring, fd, cio::token::Detached)?;
//! while ring.pending() > 0 {
//!   ring.poll()?;
//!   exec.run();
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The executor never blocks and the driver only blocks inside
//! [`poll`](driver::Uring::poll); composing the two into a loop (as above)
//! is left to the caller.

pub mod callable;
pub mod driver;
pub mod exec;
mod inflight;
pub mod ops;
pub mod sem;
pub mod sync;
pub mod token;

pub use callable::Callable;
pub use driver::{Cqe, OpId, Ring, SharedUring, SubmitError, Uring};
pub use exec::{Admits, AnyCallback, Executor, LocalExec, SendCallback, SharedExec};
pub use sem::{Permit, Semaphore};
pub use token::{Detached, DetachedUnwrap, Token, WithChannel, WithFuture};

// The submission entry and opcode builders are part of this crate's public
// surface (`Ring::submit_with`, timeout flags, ...).
pub use io_uring;
