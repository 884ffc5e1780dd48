use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_len, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// splice(2); use -1 for a null offset.
pub fn splice<S, T, V>(
  ring: &S,
  fd_in: RawFd,
  off_in: i64,
  fd_out: RawFd,
  off_out: i64,
  len: u32,
  flags: u32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<usize, V>,
{
  let entry = opcode::Splice::new(
    types::Fd(fd_in),
    off_in,
    types::Fd(fd_out),
    off_out,
    len,
  )
  .flags(flags)
  .build();
  submit_op(ring, opcode::Splice::CODE, entry, decode_len, token)
}

/// tee(2).
pub fn tee<S, T, V>(
  ring: &S,
  fd_in: RawFd,
  fd_out: RawFd,
  len: u32,
  flags: u32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<usize, V>,
{
  let entry = opcode::Tee::new(types::Fd(fd_in), types::Fd(fd_out), len)
    .flags(flags)
    .build();
  submit_op(ring, opcode::Tee::CODE, entry, decode_len, token)
}
