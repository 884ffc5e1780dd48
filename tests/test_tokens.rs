mod common;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use cio::ops;
use cio::Ring;
use cio::token::{Detached, DetachedUnwrap, WithChannel, WithFuture};

fn noop_waker() -> Waker {
  const VTABLE: RawWakerVTable = RawWakerVTable::new(
    |_| RawWaker::new(std::ptr::null(), &VTABLE),
    |_| {},
    |_| {},
    |_| {},
  );
  // SAFETY: every vtable entry ignores its argument.
  unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
}

#[test]
fn future_token_resolves_to_byte_count() {
  let Some((exec, ring)) = common::local_ring(16) else { return };

  let path = common::tmp("future");
  std::fs::write(&path, b"future-data").unwrap();

  let (_, rx) = ops::open(
    &ring,
    common::c_path(&path),
    libc::O_RDONLY,
    0,
    WithChannel,
  )
  .expect("open submit");
  common::drive(&ring, &exec);
  let fd = rx.recv().expect("open failed");

  let (_, mut fut) = ops::read(&ring, fd, vec![0u8; 64], 0, WithFuture)
    .expect("read submit");

  let waker = noop_waker();
  let mut cx = Context::from_waker(&waker);
  assert!(Pin::new(&mut fut).poll(&mut cx).is_pending());

  common::drive(&ring, &exec);

  match Pin::new(&mut fut).poll(&mut cx) {
    Poll::Ready(Ok((n, buf))) => {
      assert_eq!(n, 11);
      assert_eq!(&buf[..n], b"future-data");
    }
    Poll::Ready(Err(e)) => panic!("read failed: {e}"),
    Poll::Pending => panic!("future still pending after completion"),
  }

  ops::close(&ring, fd, Detached).expect("close submit");
  common::drive(&ring, &exec);
  std::fs::remove_file(&path).ok();
}

#[test]
fn future_token_carries_the_error() {
  let Some((exec, ring)) = common::local_ring(8) else { return };

  let (_, mut fut) = ops::read(&ring, -1, vec![0u8; 8], 0, WithFuture)
    .expect("read submit");
  common::drive(&ring, &exec);

  let waker = noop_waker();
  let mut cx = Context::from_waker(&waker);
  match Pin::new(&mut fut).poll(&mut cx) {
    Poll::Ready(Err(e)) => assert_eq!(e.raw_os_error(), Some(libc::EBADF)),
    other => panic!("expected an error, got {other:?}"),
  }
}

#[test]
fn detached_discards_even_failures() {
  let Some((exec, ring)) = common::local_ring(8) else { return };

  // Closing a bogus descriptor fails; Detached swallows it.
  ops::close(&ring, -1, Detached).expect("close submit");
  common::drive(&ring, &exec);
  assert_eq!(ring.pending(), 0);
}

#[test]
fn detached_unwrap_passes_successes_through() {
  let Some((exec, ring)) = common::local_ring(8) else { return };

  ops::nop(&ring, DetachedUnwrap).expect("nop submit");
  common::drive(&ring, &exec);
  assert_eq!(ring.pending(), 0);
}

#[test]
fn channel_token_try_recv_observes_progress() {
  let Some((exec, ring)) = common::local_ring(8) else { return };

  let (_, mut rx) = ops::nop(&ring, WithChannel).expect("nop submit");
  assert!(rx.try_recv().is_none());
  common::drive(&ring, &exec);
  assert!(rx.try_recv().expect("nop not delivered").is_ok());
}
