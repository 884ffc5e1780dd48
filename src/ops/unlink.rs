use std::ffi::CString;
use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// unlinkat(2); pass `libc::AT_REMOVEDIR` in `flags` to remove a directory.
pub fn unlinkat<S, T, V>(
  ring: &S,
  dir: RawFd,
  path: CString,
  flags: i32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let entry = opcode::UnlinkAt::new(types::Fd(dir), path.as_ptr())
    .flags(flags)
    .build();
  submit_op(
    ring,
    opcode::UnlinkAt::CODE,
    entry,
    move |res| {
      let _path = path;
      decode_unit(res)
    },
    token,
  )
}

/// unlink(2).
pub fn unlink<S, T, V>(
  ring: &S,
  path: CString,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  unlinkat(ring, libc::AT_FDCWD, path, 0, token)
}
