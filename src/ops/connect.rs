use std::os::fd::RawFd;

use io_uring::{opcode, types};
use socket2::SockAddr;

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// connect(2). The address is owned by the in-flight cell until the
/// completion arrives.
pub fn connect<S, T, V>(
  ring: &S,
  fd: RawFd,
  addr: SockAddr,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let addr = Box::new(addr);
  let entry =
    opcode::Connect::new(types::Fd(fd), addr.as_ptr().cast(), addr.len())
      .build();
  submit_op(
    ring,
    opcode::Connect::CODE,
    entry,
    move |res| {
      let _addr = addr;
      decode_unit(res)
    },
    token,
  )
}
