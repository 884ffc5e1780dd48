use std::ffi::CString;
use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_fd, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// openat(2). The path buffer is owned by the in-flight cell until the
/// completion arrives.
pub fn openat<S, T, V>(
  ring: &S,
  dir: RawFd,
  path: CString,
  flags: i32,
  mode: u32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<RawFd, V>,
{
  let entry = opcode::OpenAt::new(types::Fd(dir), path.as_ptr())
    .flags(flags)
    .mode(mode)
    .build();
  submit_op(
    ring,
    opcode::OpenAt::CODE,
    entry,
    move |res| {
      let _path = path;
      decode_fd(res)
    },
    token,
  )
}

/// open(2), relative to the current working directory.
pub fn open<S, T, V>(
  ring: &S,
  path: CString,
  flags: i32,
  mode: u32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<RawFd, V>,
{
  openat(ring, libc::AT_FDCWD, path, flags, mode, token)
}
