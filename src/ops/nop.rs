use io_uring::opcode;

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// Does nothing, asynchronously. Useful as a wake-up or an ordering probe.
pub fn nop<S, T, V>(ring: &S, token: T) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  submit_op(
    ring,
    opcode::Nop::CODE,
    opcode::Nop::new().build(),
    decode_unit,
    token,
  )
}
