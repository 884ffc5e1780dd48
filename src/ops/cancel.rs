use io_uring::opcode;

use super::{decode_unit, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

/// Asks the kernel to cancel `target`.
///
/// Cancellation is cooperative: the cancel operation completes with
/// `Ok(())` if the target was found (or `ENOENT`/`EALREADY` otherwise), and
/// the target itself completes with `ECANCELED`.
pub fn cancel<S, T, V>(
  ring: &S,
  target: OpId,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  submit_op(
    ring,
    opcode::AsyncCancel::CODE,
    opcode::AsyncCancel::new(target.0).build(),
    decode_unit,
    token,
  )
}
