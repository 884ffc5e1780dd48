use std::io;
use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode, each, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

fn decode_events(res: i32) -> io::Result<u32> {
  decode(res).map(|mask| mask as u32)
}

/// One-shot poll: completes with the ready event mask once any of `events`
/// (`libc::POLL*`) is ready on `fd`.
pub fn poll_add<S, T, V>(
  ring: &S,
  fd: RawFd,
  events: u32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<u32, V>,
{
  let entry = opcode::PollAdd::new(types::Fd(fd), events).build();
  submit_op(ring, opcode::PollAdd::CODE, entry, decode_events, token)
}

/// Multishot poll: `sink` runs on the executor with the ready mask each
/// time `fd` becomes ready, until removed or errored.
pub fn poll_multishot<S, F>(
  ring: &S,
  fd: RawFd,
  events: u32,
  sink: F,
) -> Result<OpId, SubmitError>
where
  S: Ring,
  F: FnMut(io::Result<u32>) + Send + 'static,
{
  if !ring.supports(opcode::PollAdd::CODE) {
    return Err(SubmitError::Unsupported);
  }
  let entry = opcode::PollAdd::new(types::Fd(fd), events).multi(true).build();
  Ok(ring.submit_with(entry, each(decode_events, sink))?)
}

/// Removes a pending poll. The removed poll completes with `ECANCELED`.
pub fn poll_remove<S, T, V>(
  ring: &S,
  target: OpId,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  submit_op(
    ring,
    opcode::PollRemove::CODE,
    opcode::PollRemove::new(target.0).build(),
    super::decode_unit,
    token,
  )
}
