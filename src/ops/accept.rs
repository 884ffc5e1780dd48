use std::io;
use std::os::fd::RawFd;
use std::ptr;

use io_uring::{opcode, types};

use super::{decode_fd, each, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// accept4(2). The peer address is not collected; the completion carries
/// the connected descriptor.
pub fn accept<S, T, V>(
  ring: &S,
  fd: RawFd,
  flags: i32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<RawFd, V>,
{
  let entry =
    opcode::Accept::new(types::Fd(fd), ptr::null_mut(), ptr::null_mut())
      .flags(flags)
      .build();
  submit_op(ring, opcode::Accept::CODE, entry, decode_fd, token)
}

/// Multishot accept: `sink` runs on the executor once per incoming
/// connection until the operation errors or is cancelled. A one-shot token
/// cannot absorb that, hence the callback-only shape.
pub fn accept_multi<S, F>(
  ring: &S,
  fd: RawFd,
  sink: F,
) -> Result<OpId, SubmitError>
where
  S: Ring,
  F: FnMut(io::Result<RawFd>) + Send + 'static,
{
  if !ring.supports(opcode::AcceptMulti::CODE) {
    return Err(SubmitError::Unsupported);
  }
  let entry = opcode::AcceptMulti::new(types::Fd(fd)).build();
  Ok(ring.submit_with(entry, each(decode_fd, sink))?)
}
