mod common;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cio::ops;
use cio::Ring;
use cio::token::WithChannel;

#[test]
fn pending_tracks_operations_in_flight() {
  let Some((exec, ring)) = common::local_ring(8) else { return };
  assert_eq!(ring.pending(), 0);

  let (_, sleep_rx) =
    ops::sleep(&ring, Duration::from_millis(20), WithChannel)
      .expect("sleep submit");
  assert_eq!(ring.pending(), 1);
  let (_, nop_rx) = ops::nop(&ring, WithChannel).expect("nop submit");
  assert_eq!(ring.pending(), 2);

  common::drive(&ring, &exec);
  assert_eq!(ring.pending(), 0);
  nop_rx.recv().expect("nop failed");
  sleep_rx.recv().expect("sleep failed");
}

#[test]
fn submissions_past_ring_capacity_flush_and_retry() {
  // Four submission slots, six operations: the fifth push must flush the
  // queue to the kernel and retry rather than fail.
  let Some((exec, ring)) = common::local_ring(4) else { return };

  let hits = Arc::new(AtomicUsize::new(0));
  for _ in 0..6 {
    let hits = Arc::clone(&hits);
    ops::nop(&ring, move |res: io::Result<()>| {
      res.expect("nop failed");
      hits.fetch_add(1, Ordering::SeqCst);
    })
    .expect("nop submit");
  }
  assert_eq!(ring.pending(), 6);

  common::drive(&ring, &exec);
  assert_eq!(hits.load(Ordering::SeqCst), 6);
  assert_eq!(ring.pending(), 0);
}

#[test]
fn multishot_poll_fires_once_per_readiness() {
  let Some((exec, ring)) = common::local_ring(8) else { return };

  let mut fds = [0i32; 2];
  // SAFETY: plain pipe(2) on a local array.
  assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
  let (rd, wr) = (fds[0], fds[1]);

  let seen: Arc<Mutex<Vec<io::Result<u32>>>> = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&seen);
  let id = ops::poll_multishot(&ring, rd, libc::POLLIN as u32, move |res| {
    sink.lock().unwrap().push(res);
  })
  .expect("poll submit");
  assert_eq!(ring.pending(), 1);

  // SAFETY: writing one byte into our own pipe.
  assert_eq!(unsafe { libc::write(wr, b"x".as_ptr().cast(), 1) }, 1);
  ring.poll().expect("poll round");
  exec.run();
  let after_first = seen.lock().unwrap().len();
  assert!(after_first >= 1);
  // The operation stays armed across completions.
  assert_eq!(ring.pending(), 1);

  let mut drain = [0u8; 8];
  // SAFETY: draining our own pipe into a local buffer.
  unsafe { libc::read(rd, drain.as_mut_ptr().cast(), drain.len()) };
  // SAFETY: as above.
  assert_eq!(unsafe { libc::write(wr, b"y".as_ptr().cast(), 1) }, 1);
  ring.poll().expect("poll round");
  exec.run();
  assert!(seen.lock().unwrap().len() > after_first);
  for event in seen.lock().unwrap().iter() {
    let mask = *event.as_ref().expect("poll event errored");
    assert_ne!(mask & libc::POLLIN as u32, 0);
  }

  let (_, rx) =
    ops::poll_remove(&ring, id, WithChannel).expect("remove submit");
  common::drive(&ring, &exec);
  rx.recv().expect("poll_remove failed");
  let last = seen.lock().unwrap().pop().unwrap();
  assert_eq!(
    last.expect_err("removal ends the poll").raw_os_error(),
    Some(libc::ECANCELED)
  );
  assert_eq!(ring.pending(), 0);

  // SAFETY: closing the pipe we opened.
  unsafe {
    libc::close(rd);
    libc::close(wr);
  }
}

#[test]
fn executor_runs_completions_in_post_order() {
  let Some((exec, ring)) = common::local_ring(8) else { return };

  let log = Arc::new(Mutex::new(String::new()));
  for label in ['a', 'b', 'c'] {
    let log = Arc::clone(&log);
    ops::nop(&ring, move |res: io::Result<()>| {
      res.expect("nop failed");
      log.lock().unwrap().push(label);
    })
    .expect("nop submit");
  }
  common::drive(&ring, &exec);
  assert_eq!(*log.lock().unwrap(), "abc");
}
