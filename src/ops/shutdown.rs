use std::net::Shutdown;
use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// shutdown(2).
pub fn shutdown<S, T, V>(
  ring: &S,
  fd: RawFd,
  how: Shutdown,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let how = match how {
    Shutdown::Read => libc::SHUT_RD,
    Shutdown::Write => libc::SHUT_WR,
    Shutdown::Both => libc::SHUT_RDWR,
  };
  submit_op(
    ring,
    opcode::Shutdown::CODE,
    opcode::Shutdown::new(types::Fd(fd), how).build(),
    decode_unit,
    token,
  )
}
