use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// close(2).
pub fn close<S, T, V>(
  ring: &S,
  fd: RawFd,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  submit_op(
    ring,
    opcode::Close::CODE,
    opcode::Close::new(types::Fd(fd)).build(),
    decode_unit,
    token,
  )
}
