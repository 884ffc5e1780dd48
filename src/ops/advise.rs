use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// fallocate(2).
pub fn fallocate<S, T, V>(
  ring: &S,
  fd: RawFd,
  offset: u64,
  len: u64,
  mode: i32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let entry = opcode::Fallocate::new(types::Fd(fd), len)
    .offset(offset)
    .mode(mode)
    .build();
  submit_op(ring, opcode::Fallocate::CODE, entry, decode_unit, token)
}

/// posix_fadvise(2).
pub fn fadvise<S, T, V>(
  ring: &S,
  fd: RawFd,
  offset: u64,
  len: libc::off_t,
  advice: i32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let entry = opcode::Fadvise::new(types::Fd(fd), len, advice)
    .offset(offset)
    .build();
  submit_op(ring, opcode::Fadvise::CODE, entry, decode_unit, token)
}

/// madvise(2).
///
/// # Safety
///
/// `addr..addr + len` must stay a valid mapping until the operation
/// completes.
pub unsafe fn madvise<S, T, V>(
  ring: &S,
  addr: *mut u8,
  len: libc::off_t,
  advice: i32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let entry = opcode::Madvise::new(addr.cast(), len, advice).build();
  submit_op(ring, opcode::Madvise::CODE, entry, decode_unit, token)
}
