use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_len, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// write(2) at `offset`, pwrite-style; an `offset` of -1 writes at the
/// file's current position (and requires [`Ring::cur_pos_reads`]).
///
/// The buffer moves into the operation and comes back with the byte count
/// on success.
pub fn write<S, T, V>(
  ring: &S,
  fd: RawFd,
  buf: Vec<u8>,
  offset: i64,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(usize, Vec<u8>), V>,
{
  debug_assert!(offset >= -1);
  debug_assert!(
    offset >= 0 || ring.cur_pos_reads(),
    "kernel lacks current-position writes"
  );
  let entry =
    opcode::Write::new(types::Fd(fd), buf.as_ptr(), buf.len() as u32)
      .offset(offset as u64)
      .build();
  submit_op(
    ring,
    opcode::Write::CODE,
    entry,
    move |res| decode_len(res).map(|n| (n, buf)),
    token,
  )
}
