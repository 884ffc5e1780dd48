//! Completion tokens: how an operation's result comes back to you.
//!
//! Every operation wrapper takes a token as its last argument and is
//! written once against the plain-callback contract; the token decides the
//! delivery style:
//!
//! - a closure `FnOnce(io::Result<R>)` — runs on the executor;
//! - [`WithChannel`] — hands back an [`OpReceiver`] to block on;
//! - [`WithFuture`] — hands back an [`OpFuture`] to `.await`;
//! - [`Detached`] / [`DetachedUnwrap`] — fire and forget.
//!
//! A token splits into a [`Complete`] half (consumed by the driver's
//! completion shim) and a `Reply` handed back to the caller at submission
//! time. Kernel errors arrive as `Err` with the negated result code; the
//! error/value split of the callback signature is simply `io::Result`.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use thiserror::Error;

use crate::sync::Mutex;

/// The normalised completion callback: consumed exactly once with the
/// operation's result.
///
/// Whether an implementation must also be `Send` is decided by the driver
/// it is submitted to, through its
/// [`Policy`](crate::driver::Ring::Policy).
pub trait Complete<R>: 'static {
  fn complete(self, result: io::Result<R>);
}

/// Anything accepted as the last argument of an operation wrapper.
///
/// The `Style` parameter only exists to keep the closure impl and the named
/// token impls disjoint for the compiler; it is always inferred and never
/// written at call sites.
pub trait Token<R, Style = ()>: Sized {
  type Complete: Complete<R>;
  /// Returned to the caller at submission time (a receiver, a future, or
  /// nothing).
  type Reply;

  fn into_parts(self) -> (Self::Complete, Self::Reply);
}

/// Marker `Style` for the plain-closure impls.
pub enum Direct {}

pub struct FnComplete<F>(F);

impl<R, F> Complete<R> for FnComplete<F>
where
  F: FnOnce(io::Result<R>) + 'static,
{
  fn complete(self, result: io::Result<R>) {
    (self.0)(result)
  }
}

impl<R, F> Token<R, Direct> for F
where
  F: FnOnce(io::Result<R>) + 'static,
{
  type Complete = FnComplete<F>;
  type Reply = ();

  fn into_parts(self) -> (Self::Complete, ()) {
    (FnComplete(self), ())
  }
}

/// Deliver the result through a single-slot channel; the caller gets an
/// [`OpReceiver`] to block on.
pub struct WithChannel;

pub struct ChannelPromise<R> {
  tx: mpsc::SyncSender<io::Result<R>>,
}

impl<R: Send + 'static> Complete<R> for ChannelPromise<R> {
  fn complete(self, result: io::Result<R>) {
    // The caller may have dropped its receiver; that is its prerogative.
    let _ = self.tx.send(result);
  }
}

/// Returned when [`OpReceiver::recv_timeout`] elapses first.
#[derive(Debug, Error)]
#[error("timed out waiting for an operation result")]
pub struct RecvTimeoutError;

/// Blocking receiver for one operation result.
pub struct OpReceiver<R> {
  rx: mpsc::Receiver<io::Result<R>>,
}

impl<R> OpReceiver<R> {
  /// Blocks until the operation completes.
  ///
  /// # Panics
  ///
  /// Panics if the runtime drops the operation without settling it.
  pub fn recv(self) -> io::Result<R> {
    self.rx.recv().expect("operation dropped without completing")
  }

  /// Blocks up to `timeout` for the result.
  pub fn recv_timeout(
    self,
    timeout: Duration,
  ) -> Result<io::Result<R>, RecvTimeoutError> {
    self.rx.recv_timeout(timeout).map_err(|_| RecvTimeoutError)
  }

  /// Returns the result if the operation already completed.
  pub fn try_recv(&mut self) -> Option<io::Result<R>> {
    match self.rx.try_recv() {
      Ok(result) => Some(result),
      Err(mpsc::TryRecvError::Empty) => None,
      Err(mpsc::TryRecvError::Disconnected) => {
        panic!("operation dropped without completing")
      }
    }
  }
}

impl<R: Send + 'static> Token<R> for WithChannel {
  type Complete = ChannelPromise<R>;
  type Reply = OpReceiver<R>;

  fn into_parts(self) -> (Self::Complete, Self::Reply) {
    let (tx, rx) = mpsc::sync_channel(1);
    (ChannelPromise { tx }, OpReceiver { rx })
  }
}

/// Deliver the result by settling a future; the caller gets an
/// [`OpFuture`] to `.await` on whatever executor drives its coroutine.
pub struct WithFuture;

struct FutState<R> {
  result: Option<io::Result<R>>,
  waker: Option<Waker>,
}

pub struct FuturePromise<R> {
  state: Arc<Mutex<FutState<R>>>,
}

impl<R: Send + 'static> Complete<R> for FuturePromise<R> {
  fn complete(self, result: io::Result<R>) {
    let waker = {
      let mut state = self.state.lock();
      debug_assert!(
        state.result.is_none(),
        "operation future settled twice"
      );
      state.result = Some(result);
      state.waker.take()
    };
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

/// The future half of [`WithFuture`]. Resolves once; polling it again
/// after it returned `Ready` pends forever.
pub struct OpFuture<R> {
  state: Arc<Mutex<FutState<R>>>,
}

impl<R> Future for OpFuture<R> {
  type Output = io::Result<R>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut state = self.state.lock();
    match state.result.take() {
      Some(result) => Poll::Ready(result),
      None => {
        state.waker = Some(cx.waker().clone());
        Poll::Pending
      }
    }
  }
}

impl<R: Send + 'static> Token<R> for WithFuture {
  type Complete = FuturePromise<R>;
  type Reply = OpFuture<R>;

  fn into_parts(self) -> (Self::Complete, Self::Reply) {
    let state =
      Arc::new(Mutex::new(FutState { result: None, waker: None }));
    (FuturePromise { state: Arc::clone(&state) }, OpFuture { state })
  }
}

/// Discard the result, error included.
pub struct Detached;

impl<R> Complete<R> for Detached {
  fn complete(self, _result: io::Result<R>) {}
}

impl<R> Token<R> for Detached {
  type Complete = Detached;
  type Reply = ();

  fn into_parts(self) -> (Self::Complete, ()) {
    (Detached, ())
  }
}

/// Discard the value but panic (on the executor thread) if the operation
/// failed.
pub struct DetachedUnwrap;

impl<R> Complete<R> for DetachedUnwrap {
  fn complete(self, result: io::Result<R>) {
    if let Err(e) = result {
      panic!("detached operation failed: {e}");
    }
  }
}

impl<R> Token<R> for DetachedUnwrap {
  type Complete = DetachedUnwrap;
  type Reply = ();

  fn into_parts(self) -> (Self::Complete, ()) {
    (DetachedUnwrap, ())
  }
}
