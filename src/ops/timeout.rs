use std::io;
use std::time::Duration;

use io_uring::opcode;
use io_uring::types::{TimeoutFlags, Timespec};

use super::{decode_unit, once, submit_op};
use crate::driver::{OpId, Ring, SubmitError};
use crate::exec::Admits;
use crate::token::Token;

fn timespec(duration: Duration) -> Timespec {
  Timespec::new().sec(duration.as_secs()).nsec(duration.subsec_nanos())
}

/// Timer expiry surfaces as `-ETIME`; that is the success case.
fn decode_expiry(res: i32) -> io::Result<()> {
  match decode_unit(res) {
    Err(e) if e.raw_os_error() == Some(libc::ETIME) => Ok(()),
    other => other,
  }
}

/// Completes with `Ok(())` once `duration` has elapsed on the monotonic
/// clock. Cancellation surfaces as `ECANCELED`.
pub fn sleep<S, T, V>(
  ring: &S,
  duration: Duration,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let ts = Box::new(timespec(duration));
  let entry = opcode::Timeout::new(&*ts as *const Timespec).build();
  submit_op(
    ring,
    opcode::Timeout::CODE,
    entry,
    move |res| {
      let _ts = ts;
      decode_expiry(res)
    },
    token,
  )
}

/// Arms a timer with explicit control over the time base: relative by
/// default, [`TimeoutFlags::ABS`] for an absolute timestamp,
/// [`TimeoutFlags::REALTIME`] for the real-time clock.
pub fn timeout<S, T, V>(
  ring: &S,
  ts: Timespec,
  flags: TimeoutFlags,
  token: T,
) -> Result<(OpId, T::Reply), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T::Complete>,
  T: Token<(), V>,
{
  let ts = Box::new(ts);
  let entry =
    opcode::Timeout::new(&*ts as *const Timespec).flags(flags).build();
  submit_op(
    ring,
    opcode::Timeout::CODE,
    entry,
    move |res| {
      let _ts = ts;
      decode_expiry(res)
    },
    token,
  )
}

/// Disarms a pending timer. The removed timer completes with `ECANCELED`.
pub fn timeout_remove<S, T, V>(
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
    opcode::TimeoutRemove::CODE,
    opcode::TimeoutRemove::new(target.0).build(),
    decode_unit,
    token,
  )
}

/// A sleep guarded by a linked timeout: if `limit` elapses first the sleep
/// completes with `ECANCELED` and the guard completes with `Ok(())`; if the
/// sleep finishes first the guard completes with `ECANCELED`. Both entries
/// are published to the kernel as one linked pair.
pub fn sleep_linked<S, T1, V1, T2, V2>(
  ring: &S,
  duration: Duration,
  limit: Duration,
  token: T1,
  limit_token: T2,
) -> Result<((OpId, T1::Reply), (OpId, T2::Reply)), SubmitError>
where
  S: Ring,
  S::Policy: Admits<T1::Complete>,
  S::Policy: Admits<T2::Complete>,
  T1: Token<(), V1>,
  T2: Token<(), V2>,
{
  if !ring.supports(opcode::Timeout::CODE)
    || !ring.supports(opcode::LinkTimeout::CODE)
  {
    return Err(SubmitError::Unsupported);
  }

  let ts = Box::new(timespec(duration));
  let limit_ts = Box::new(timespec(limit));
  let first = opcode::Timeout::new(&*ts as *const Timespec).build();
  let second =
    opcode::LinkTimeout::new(&*limit_ts as *const Timespec).build();

  let (complete, reply) = token.into_parts();
  let (limit_complete, limit_reply) = limit_token.into_parts();
  // SAFETY: both completion halves carry an `Admits` bound against the
  // driver's policy and the timespecs are `Send`.
  let (first_id, second_id) = unsafe {
    ring.submit_linked_unchecked(
      first,
      once(
        move |res| {
          let _ts = ts;
          decode_expiry(res)
        },
        complete,
      ),
      second,
      once(
        move |res| {
          let _ts = limit_ts;
          decode_expiry(res)
        },
        limit_complete,
      ),
    )
  }?;
  Ok(((first_id, reply), (second_id, limit_reply)))
}
