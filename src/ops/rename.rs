use std::ffi::CString;
use std::os::fd::RawFd;

use io_uring::{opcode, types};

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// renameat2(2). Both path buffers are owned by the in-flight cell until
/// the completion arrives.
pub fn renameat<S, T, V>(
  ring: &S,
  old_dir: RawFd,
  old_path: CString,
  new_dir: RawFd,
  new_path: CString,
  flags: u32,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let entry = opcode::RenameAt::new(
    types::Fd(old_dir),
    old_path.as_ptr(),
    types::Fd(new_dir),
    new_path.as_ptr(),
  )
  .flags(flags)
  .build();
  submit_op(
    ring,
    opcode::RenameAt::CODE,
    entry,
    move |res| {
      let _paths = (old_path, new_path);
      decode_unit(res)
    },
    token,
  )
}

/// rename(2).
pub fn rename<S, T, V>(
  ring: &S,
  old_path: CString,
  new_path: CString,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  renameat(ring, libc::AT_FDCWD, old_path, libc::AT_FDCWD, new_path, 0, token)
}
