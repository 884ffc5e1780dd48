use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_len, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// send(2). The buffer moves into the operation and comes back with the
/// byte count on success.
pub fn send<S, T, V>(
  ring: &S,
  fd: RawFd,
  buf: Vec<u8>,
  flags: i32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(usize, Vec<u8>), V>,
{
  let entry =
    opcode::Send::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
      .flags(flags)
      .build();
  submit_op(
    ring,
    opcode::Send::CODE,
    entry,
    move |res| decode_len(res).map(|n| (n, buf)),
    token,
  )
}
