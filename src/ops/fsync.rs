use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// fsync(2); pass [`types::FsyncFlags::DATASYNC`] for fdatasync behaviour.
pub fn fsync<S, T, V>(
  ring: &S,
  fd: RawFd,
  flags: types::FsyncFlags,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  submit_op(
    ring,
    opcode::Fsync::CODE,
    opcode::Fsync::new(types::Fd(fd)).flags(flags).build(),
    decode_unit,
    token,
  )
}
