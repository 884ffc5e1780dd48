use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_len, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// read(2) at `offset`, pread-style; an `offset` of -1 reads at the file's
/// current position (and requires [`Ring::cur_pos_reads`]).
///
/// The buffer moves into the operation and comes back with the byte count
/// on success; on error it is dropped with the in-flight cell.
pub fn read<S, T, V>(
  ring: &S,
  fd: RawFd,
  mut buf: Vec<u8>,
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
    "kernel lacks current-position reads"
  );
  let entry =
    opcode::Read::new(types::Fd(fd), buf.as_mut_ptr(), buf.len() as u32)
      .offset(offset as u64)
      .build();
  submit_op(
    ring,
    opcode::Read::CODE,
    entry,
    move |res| decode_len(res).map(|n| (n, buf)),
    token,
  )
}
