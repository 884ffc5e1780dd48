//! Operation wrappers.
//!
//! Every wrapper follows the same shape: build a submission entry, derive
//! the completion shim from the [token](crate::token), submit. The shim is
//! where operand ownership lives — paths, buffers and timespecs move into
//! the in-flight cell and stay alive until the kernel is done with them.
//!
//! Wrappers return `(OpId, reply)`: the id addresses the operation later
//! ([`cancel`], [`poll_remove`], [`timeout_remove`]), the reply is whatever
//! the token yields (nothing, a receiver, a future).

mod accept;
mod advise;
mod cancel;
mod close;
mod connect;
mod fsync;
mod nop;
mod open;
mod poll;
mod read;
mod recv;
mod rename;
mod send;
mod shutdown;
mod splice;
mod timeout;
mod unlink;
mod write;

pub use accept::{accept, accept_multi};
pub use advise::{fadvise, fallocate, madvise};
pub use cancel::cancel;
pub use close::close;
pub use connect::connect;
pub use fsync::fsync;
pub use nop::nop;
pub use open::{open, openat};
pub use poll::{poll_add, poll_multishot, poll_remove};
pub use read::read;
pub use recv::recv;
pub use rename::{rename, renameat};
pub use send::send;
pub use shutdown::shutdown;
pub use splice::{splice, tee};
pub use timeout::{sleep, sleep_linked, timeout, timeout_remove};
pub use unlink::{unlink, unlinkat};
pub use write::write;

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use io_uring::squeue;

use crate::callable::Callable;
use crate::driver::{Cqe, OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::sync::Mutex;
use crate::token::{Complete, Token};

/// Kernel results are negated errnos when negative.
pub(crate) fn decode(res: i32) -> io::Result<i32> {
  if res < 0 {
    Err(io::Error::from_raw_os_error(-res))
  } else {
    Ok(res)
  }
}

pub(crate) fn decode_unit(res: i32) -> io::Result<()> {
  decode(res).map(|_| ())
}

pub(crate) fn decode_len(res: i32) -> io::Result<usize> {
  decode(res).map(|n| n as usize)
}

pub(crate) fn decode_fd(res: i32) -> io::Result<RawFd> {
  decode(res)
}

/// Builds the in-flight handler for a single-completion operation: on the
/// completion, `map` turns the raw result into the typed one (reclaiming
/// whatever operands it captured) and the token's completion half is posted
/// to the executor with it.
pub(crate) fn once<R, C, M>(
  map: M,
  complete: C,
) -> impl FnMut(Cqe) -> Option<Callable> + 'static
where
  R: 'static,
  C: Complete<R>,
  M: FnOnce(i32) -> io::Result<R> + Send + 'static,
{
  let mut slot = Some((map, complete));
  move |cqe| {
    let (map, complete) =
      slot.take().expect("one-shot operation completed twice");
    // SAFETY: the callable is built inside the driver's dispatch and posted
    // to that driver's executor; the `Admits` bound every wrapper carries
    // guarantees the completion half satisfies the policy both share, and
    // the remaining captures are `Send`.
    Some(unsafe {
      Callable::new_unchecked(move |()| complete.complete(map(cqe.result)))
    })
  }
}

/// Builds the in-flight handler for a multishot operation: `sink` runs on
/// the executor once per completion, in arrival order.
pub(crate) fn each<R, F>(
  decode: fn(i32) -> io::Result<R>,
  sink: F,
) -> impl FnMut(Cqe) -> Option<Callable> + Send + 'static
where
  R: 'static,
  F: FnMut(io::Result<R>) + Send + 'static,
{
  let sink = Arc::new(Mutex::new(sink));
  move |cqe| {
    let sink = Arc::clone(&sink);
    Some(Callable::new(move |()| {
      let mut sink = sink.lock();
      (*sink)(decode(cqe.result));
    }))
  }
}

/// The common submission path: gate on the probe, split the token, submit.
pub(crate) fn submit_op<S, R, V, T, M>(
  ring: &S,
  code: u8,
  entry: squeue::Entry,
  map: M,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  R: 'static,
  T: Token<R, V>,
  M: FnOnce(i32) -> io::Result<R> + Send + 'static,
{
  if !ring.supports(code) {
    return Err(SubmitError::Unsupported);
  }
  let (complete, reply) = token.into_parts();
  // SAFETY: `S::Policy: Admits<T::Complete>` and the handler's remaining
  // captures (`map` and the raw result) are `Send`, so the handler
  // satisfies the driver's policy.
  let id = unsafe { ring.submit_unchecked(entry, once(map, complete)) }?;
  Ok((id, reply))
}
