use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_len, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// recv(2). The buffer moves into the operation and comes back with the
/// byte count on success.
pub fn recv<S, T, V>(
  ring: &S,
  fd: RawFd,
  mut buf: Vec<u8>,
  flags: i32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(usize, Vec<u8>), V>,
{
  let entry =
    opcode::Recv::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
      .flags(flags)
      .build();
  submit_op(
    ring,
    opcode::Recv::CODE,
    entry,
    move |res| decode_len(res).map(|n| (n, buf)),
    token,
  )
}
