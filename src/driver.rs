//! Ring drivers: ownership of the kernel submission/completion ring pair,
//! submission of prepared entries, and dispatch of completions.
//!
//! A driver never runs user callbacks itself. Every completion is turned
//! into a [`Callable`] by the operation's in-flight handler and posted to
//! the executor the driver was built with; callbacks therefore may submit
//! further operations freely without re-entering the driver mid-dispatch.
//!
//! Two variants with the same surface: [`Uring`] is single-threaded and
//! lock-free, [`SharedUring`] takes a submission mutex in `submit_with` and
//! a completion mutex in `poll`.

use std::cell::{Cell, RefCell};
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use io_uring::{cqueue, squeue, IoUring, Probe, Submitter};
use thiserror::Error;

use crate::callable::Callable;
use crate::exec::{Executor, SendCallback};
use crate::inflight::Inflight;
use crate::sync::Mutex;

/// One completion as seen by an in-flight handler: the kernel's raw result
/// (a negated errno when negative) and its multishot "more completions will
/// follow" flag.
#[derive(Debug, Clone, Copy)]
pub struct Cqe {
  pub result: i32,
  pub more: bool,
}

/// Opaque identifier of an in-flight operation, unique within its driver
/// for as long as the operation is live. Needed to address the operation
/// later: cancellation, poll removal, timeout removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpId(pub(crate) u64);

/// Why an operation failed to submit.
#[derive(Debug, Error)]
pub enum SubmitError {
  /// The kernel probe reports the opcode as unsupported.
  #[error("operation not supported by this kernel")]
  Unsupported,
  #[error(transparent)]
  Io(#[from] io::Error),
}

/// The submission surface consumed by every operation wrapper.
///
/// A submission pairs a prepared entry with a completion handler; the
/// handler runs once per completion of that entry (multishot operations
/// complete repeatedly) and returns the callback to post to the executor,
/// if any.
pub trait Ring {
  /// Which completion callbacks this driver admits — the policy of the
  /// executor its completions ride, tightened to
  /// [`SendCallback`](crate::exec::SendCallback) when the driver itself
  /// crosses threads. Operation wrappers bound their token's completion
  /// half against it.
  type Policy;

  /// As [`submit_with`](Ring::submit_with), for handlers that are not
  /// `Send`.
  ///
  /// # Safety
  ///
  /// The handler (and everything the callable it returns captures) must
  /// satisfy this driver's [`Policy`](Ring::Policy); wrappers get that
  /// guarantee from an `Admits` bound.
  unsafe fn submit_unchecked<H>(
    &self,
    entry: squeue::Entry,
    handler: H,
  ) -> io::Result<OpId>
  where
    H: FnMut(Cqe) -> Option<Callable> + 'static;

  /// Submits two entries adjacently, the first carrying `IO_LINK` so the
  /// second starts only when the first finishes (or, for a
  /// `LINK_TIMEOUT`, guards it). Both slots are reserved up front so the
  /// pair is never split across a kernel submit.
  ///
  /// # Safety
  ///
  /// Same contract as [`submit_unchecked`](Ring::submit_unchecked), for
  /// both handlers.
  unsafe fn submit_linked_unchecked<H1, H2>(
    &self,
    first: squeue::Entry,
    first_handler: H1,
    second: squeue::Entry,
    second_handler: H2,
  ) -> io::Result<(OpId, OpId)>
  where
    H1: FnMut(Cqe) -> Option<Callable> + 'static,
    H2: FnMut(Cqe) -> Option<Callable> + 'static;

  /// Pairs `entry` with `handler` and publishes it to the kernel ring.
  fn submit_with<H>(&self, entry: squeue::Entry, handler: H) -> io::Result<OpId>
  where
    H: FnMut(Cqe) -> Option<Callable> + Send + 'static,
  {
    // SAFETY: a `Send` handler satisfies every policy.
    unsafe { self.submit_unchecked(entry, handler) }
  }

  /// The `Send` form of [`submit_linked_unchecked`](Ring::submit_linked_unchecked).
  fn submit_linked<H1, H2>(
    &self,
    first: squeue::Entry,
    first_handler: H1,
    second: squeue::Entry,
    second_handler: H2,
  ) -> io::Result<(OpId, OpId)>
  where
    H1: FnMut(Cqe) -> Option<Callable> + Send + 'static,
    H2: FnMut(Cqe) -> Option<Callable> + Send + 'static,
  {
    // SAFETY: `Send` handlers satisfy every policy.
    unsafe {
      self.submit_linked_unchecked(first, first_handler, second, second_handler)
    }
  }

  /// Number of operations submitted but not yet terminally completed.
  fn pending(&self) -> usize;

  /// Whether the kernel supports `opcode`, per the probe taken at ring
  /// construction.
  fn supports(&self, opcode: u8) -> bool;

  /// `IORING_FEAT_RW_CUR_POS`: reads/writes at offset -1 use the file
  /// position. Wrappers relying on it are responsible for checking.
  fn cur_pos_reads(&self) -> bool;
}

/// Issues one kernel submit, retrying `EINTR`. `EBUSY` (completion side
/// full) is reported as zero consumed so the caller can drain first; a
/// malformed submission (`EBADR`) is unrecoverable on our side.
fn kernel_submit(submitter: &Submitter<'_>) -> io::Result<usize> {
  loop {
    match submitter.submit() {
      Ok(n) => return Ok(n),
      Err(e) => match e.raw_os_error() {
        Some(libc::EINTR) => continue,
        Some(libc::EBUSY) => return Ok(0),
        Some(libc::EBADR) => {
          panic!("io_uring rejected a malformed submission")
        }
        _ => return Err(e),
      },
    }
  }
}

/// Kernel opcode support, recorded once from the probe at construction.
struct OpSupport([u64; 4]);

impl OpSupport {
  fn from_probe(probe: &Probe) -> Self {
    let mut bits = [0u64; 4];
    for op in 0..=u8::MAX {
      if probe.is_supported(op) {
        bits[usize::from(op >> 6)] |= 1 << (op & 63);
      }
    }
    Self(bits)
  }

  fn supports(&self, opcode: u8) -> bool {
    self.0[usize::from(opcode >> 6)] & (1 << (opcode & 63)) != 0
  }
}

fn probe_ring(ring: &IoUring) -> io::Result<(OpSupport, bool)> {
  let mut probe = Probe::new();
  ring.submitter().register_probe(&mut probe)?;
  let cur_pos = ring.params().is_feature_rw_cur_pos();
  Ok((OpSupport::from_probe(&probe), cur_pos))
}

/// Single-threaded ring driver.
///
/// All methods must be called from the owning thread; re-entrant use (for
/// example submitting from inside a `poll` dispatch, which the executor
/// indirection already rules out) is a programmer error and panics.
pub struct Uring<E: Executor> {
  ring: RefCell<IoUring>,
  pending: Cell<usize>,
  supported: OpSupport,
  cur_pos: bool,
  exec: E,
}

impl<E: Executor> Uring<E> {
  /// Creates a ring with `entries` submission slots, reposting completions
  /// to `exec`.
  pub fn new(entries: u32, exec: E) -> io::Result<Self> {
    let ring = IoUring::new(entries)?;
    let (supported, cur_pos) = probe_ring(&ring)?;
    Ok(Self {
      ring: RefCell::new(ring),
      pending: Cell::new(0),
      supported,
      cur_pos,
      exec,
    })
  }

  pub fn executor(&self) -> &E {
    &self.exec
  }

  /// One submit-and-wait round: hands any queued submissions to the kernel,
  /// blocks until at least one completion is available, then dispatches
  /// every completion visible in the ring and advances the consumer cursor.
  ///
  /// Returns the number of completions dispatched. Blocks even with nothing
  /// pending; submissions made from another handle will still wake it.
  pub fn poll(&self) -> io::Result<usize> {
    let mut ring = self.ring.borrow_mut();
    loop {
      match ring.submitter().submit_and_wait(1) {
        Ok(_) => break,
        Err(e) => match e.raw_os_error() {
          Some(libc::EINTR) => continue,
          // completion queue already has entries to drain
          Some(libc::EBUSY) => break,
          _ => return Err(e),
        },
      }
    }

    let mut handled = 0;
    let mut completion = ring.completion();
    while let Some(cqe) = completion.next() {
      let more = cqueue::more(cqe.flags());
      if !more {
        self.pending.set(self.pending.get() - 1);
      }
      let ptr = NonNull::new(cqe.user_data() as *mut Inflight)
        .expect("completion carries a null tag");
      // SAFETY: the tag was written by a submit on this driver from a live
      // cell, the kernel echoes it once per completion, and the cell is
      // freed only on its terminal completion.
      let task =
        unsafe { Inflight::dispatch(ptr, Cqe { result: cqe.result(), more }) };
      if let Some(task) = task {
        self.exec.post_task(task);
      }
      handled += 1;
    }
    completion.sync();
    Ok(handled)
  }

  /// Makes room for `want` entries, flushing to the kernel as needed. Zero
  /// progress means the completion side is saturated; the caller has to
  /// poll before submitting more.
  fn reserve(ring: &mut IoUring, want: usize) -> io::Result<()> {
    loop {
      let free = {
        let sq = ring.submission();
        sq.capacity() - sq.len()
      };
      if free >= want {
        return Ok(());
      }
      if kernel_submit(&ring.submitter())? == 0 {
        return Err(io::Error::from_raw_os_error(libc::EBUSY));
      }
    }
  }

  fn push(ring: &mut IoUring, entry: &squeue::Entry) -> io::Result<()> {
    // submission ring full: flush and retry, never drop
    Self::reserve(ring, 1)?;
    let mut sq = ring.submission();
    // SAFETY: the entry's operands are owned by its in-flight cell (or
    // otherwise outlive the operation, per the wrapper's contract).
    let pushed = unsafe { sq.push(entry) };
    sq.sync();
    debug_assert!(pushed.is_ok(), "reserved submission slot vanished");
    Ok(())
  }

  /// Pushes a linked pair, publishing the tail only once so no concurrent
  /// kernel submit can split the chain.
  fn push_pair(
    ring: &mut IoUring,
    first: &squeue::Entry,
    second: &squeue::Entry,
  ) -> io::Result<()> {
    Self::reserve(ring, 2)?;
    let mut sq = ring.submission();
    // SAFETY: as in `push`, for both entries.
    let first_pushed = unsafe { sq.push(first) };
    // SAFETY: as above.
    let second_pushed = unsafe { sq.push(second) };
    sq.sync();
    debug_assert!(
      first_pushed.is_ok() && second_pushed.is_ok(),
      "reserved submission slots vanished"
    );
    Ok(())
  }
}

impl<E: Executor> Ring for Uring<E> {
  // This driver stays on one thread, so callbacks only need to satisfy the
  // executor the completions are posted to.
  type Policy = E::Policy;

  unsafe fn submit_unchecked<H>(
    &self,
    entry: squeue::Entry,
    handler: H,
  ) -> io::Result<OpId>
  where
    H: FnMut(Cqe) -> Option<Callable> + 'static,
  {
    let cell = Inflight::alloc(handler);
    let id = OpId(cell.as_ptr() as u64);
    let mut ring = self.ring.borrow_mut();
    if let Err(e) = Self::push(&mut ring, &entry.user_data(id.0)) {
      // SAFETY: the entry never reached the kernel, so the cell is ours to
      // reclaim.
      unsafe { Inflight::discard(cell) };
      return Err(e);
    }
    self.pending.set(self.pending.get() + 1);
    Ok(id)
  }

  unsafe fn submit_linked_unchecked<H1, H2>(
    &self,
    first: squeue::Entry,
    first_handler: H1,
    second: squeue::Entry,
    second_handler: H2,
  ) -> io::Result<(OpId, OpId)>
  where
    H1: FnMut(Cqe) -> Option<Callable> + 'static,
    H2: FnMut(Cqe) -> Option<Callable> + 'static,
  {
    let first_cell = Inflight::alloc(first_handler);
    let first_id = OpId(first_cell.as_ptr() as u64);
    let second_cell = Inflight::alloc(second_handler);
    let second_id = OpId(second_cell.as_ptr() as u64);

    let first = first.flags(squeue::Flags::IO_LINK).user_data(first_id.0);
    let second = second.user_data(second_id.0);

    let mut ring = self.ring.borrow_mut();
    if let Err(e) = Self::push_pair(&mut ring, &first, &second) {
      // SAFETY: neither entry reached the kernel; both cells are still
      // ours to reclaim.
      unsafe {
        Inflight::discard(first_cell);
        Inflight::discard(second_cell);
      }
      return Err(e);
    }
    self.pending.set(self.pending.get() + 2);
    Ok((first_id, second_id))
  }

  fn pending(&self) -> usize {
    self.pending.get()
  }

  fn supports(&self, opcode: u8) -> bool {
    self.supported.supports(opcode)
  }

  fn cur_pos_reads(&self) -> bool {
    self.cur_pos
  }
}

impl<E: Executor> Drop for Uring<E> {
  fn drop(&mut self) {
    // Dropping with live operations would leak their cells and leave the
    // kernel writing into a dead ring; callers must drain first.
    debug_assert!(
      self.pending.get() == 0,
      "ring driver dropped with {} operations in flight",
      self.pending.get()
    );
  }
}

/// Thread-safe ring driver.
///
/// `submit_with` may be called from any thread (serialised on an internal
/// submission mutex, each submission handed to the kernel eagerly so an
/// already-blocked `poll` sees it). `poll` is meant for a single consumer
/// thread and holds a separate completion mutex while draining; the two
/// locks are taken in submission-then-completion order and never together.
pub struct SharedUring<E: Executor> {
  ring: IoUring,
  sq: Mutex<()>,
  cq: Mutex<()>,
  pending: AtomicUsize,
  supported: OpSupport,
  cur_pos: bool,
  exec: E,
}

impl<E> SharedUring<E>
where
  E: Executor + Send + Sync,
{
  pub fn new(entries: u32, exec: E) -> io::Result<Self> {
    let ring = IoUring::new(entries)?;
    let (supported, cur_pos) = probe_ring(&ring)?;
    Ok(Self {
      ring,
      sq: Mutex::new(()),
      cq: Mutex::new(()),
      pending: AtomicUsize::new(0),
      supported,
      cur_pos,
      exec,
    })
  }

  pub fn executor(&self) -> &E {
    &self.exec
  }

  /// See [`Uring::poll`]. Call from one thread at a time.
  pub fn poll(&self) -> io::Result<usize> {
    {
      let _sq = self.sq.lock();
      kernel_submit(&self.ring.submitter())?;
    }

    let _cq = self.cq.lock();
    loop {
      match self.ring.submitter().submit_and_wait(1) {
        Ok(_) => break,
        Err(e) => match e.raw_os_error() {
          Some(libc::EINTR) => continue,
          Some(libc::EBUSY) => break,
          _ => return Err(e),
        },
      }
    }

    let mut handled = 0;
    // SAFETY: the completion queue is only touched under `cq`, held here.
    let mut completion = unsafe { self.ring.completion_shared() };
    while let Some(cqe) = completion.next() {
      let more = cqueue::more(cqe.flags());
      if !more {
        self.pending.fetch_sub(1, Ordering::AcqRel);
      }
      let ptr = NonNull::new(cqe.user_data() as *mut Inflight)
        .expect("completion carries a null tag");
      // SAFETY: as in `Uring::poll`: tags originate from our submissions
      // and cells are freed only on their terminal completion.
      let task =
        unsafe { Inflight::dispatch(ptr, Cqe { result: cqe.result(), more }) };
      if let Some(task) = task {
        self.exec.post_task(task);
      }
      handled += 1;
    }
    completion.sync();
    Ok(handled)
  }

  /// Makes room for `want` entries, flushing while the ring is full. Must
  /// be called with the submission lock held. A round of zero progress
  /// means the completion side is saturated and a poll has to drain first.
  fn reserve_locked(&self, want: usize) -> io::Result<()> {
    loop {
      let free = {
        // SAFETY: callers hold `sq`.
        let queue = unsafe { self.ring.submission_shared() };
        queue.capacity() - queue.len()
      };
      if free >= want {
        return Ok(());
      }
      if kernel_submit(&self.ring.submitter())? == 0 {
        return Err(io::Error::from_raw_os_error(libc::EBUSY));
      }
    }
  }

  /// Pushes one entry, flushing to the kernel while the ring is full. Must
  /// be called with the submission lock held.
  fn push_locked(&self, entry: &squeue::Entry) -> io::Result<()> {
    self.reserve_locked(1)?;
    // SAFETY: callers hold `sq`, making this the only submission-queue
    // handle alive.
    let mut queue = unsafe { self.ring.submission_shared() };
    // SAFETY: operand lifetimes are guaranteed by the wrapper contract, as
    // in `Uring::push`.
    let pushed = unsafe { queue.push(entry) };
    queue.sync();
    debug_assert!(pushed.is_ok(), "reserved submission slot vanished");
    Ok(())
  }

  /// Pushes a linked pair under the submission lock, publishing the tail
  /// only once so no concurrent kernel submit can split the chain.
  fn push_pair_locked(
    &self,
    first: &squeue::Entry,
    second: &squeue::Entry,
  ) -> io::Result<()> {
    self.reserve_locked(2)?;
    // SAFETY: callers hold `sq`.
    let mut queue = unsafe { self.ring.submission_shared() };
    // SAFETY: as in `push_locked`, for both entries.
    let first_pushed = unsafe { queue.push(first) };
    // SAFETY: as above.
    let second_pushed = unsafe { queue.push(second) };
    queue.sync();
    debug_assert!(
      first_pushed.is_ok() && second_pushed.is_ok(),
      "reserved submission slots vanished"
    );
    Ok(())
  }
}

impl<E> Ring for SharedUring<E>
where
  E: Executor + Send + Sync,
{
  // Cells migrate to whichever thread polls, so callbacks must be `Send`
  // regardless of the executor's own policy.
  type Policy = SendCallback;

  unsafe fn submit_unchecked<H>(
    &self,
    entry: squeue::Entry,
    handler: H,
  ) -> io::Result<OpId>
  where
    H: FnMut(Cqe) -> Option<Callable> + 'static,
  {
    let cell = Inflight::alloc(handler);
    let id = OpId(cell.as_ptr() as u64);
    // Counted before the push: once the tail is published, a concurrent
    // poller may flush, complete and decrement at any moment.
    self.pending.fetch_add(1, Ordering::AcqRel);
    {
      let _sq = self.sq.lock();
      if let Err(e) = self.push_locked(&entry.user_data(id.0)) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        // SAFETY: the entry never reached the kernel.
        unsafe { Inflight::discard(cell) };
        return Err(e);
      }
    }
    // Hand it over eagerly: a poller blocked in submit_and_wait would not
    // otherwise see this entry. Failures short of EBADR are left for the
    // next poll round, which flushes again.
    let _ = kernel_submit(&self.ring.submitter());
    Ok(id)
  }

  unsafe fn submit_linked_unchecked<H1, H2>(
    &self,
    first: squeue::Entry,
    first_handler: H1,
    second: squeue::Entry,
    second_handler: H2,
  ) -> io::Result<(OpId, OpId)>
  where
    H1: FnMut(Cqe) -> Option<Callable> + 'static,
    H2: FnMut(Cqe) -> Option<Callable> + 'static,
  {
    let first_cell = Inflight::alloc(first_handler);
    let first_id = OpId(first_cell.as_ptr() as u64);
    let second_cell = Inflight::alloc(second_handler);
    let second_id = OpId(second_cell.as_ptr() as u64);

    let first = first.flags(squeue::Flags::IO_LINK).user_data(first_id.0);
    let second = second.user_data(second_id.0);

    // Counted before the push, as in `submit_unchecked`.
    self.pending.fetch_add(2, Ordering::AcqRel);
    {
      let _sq = self.sq.lock();
      if let Err(e) = self.push_pair_locked(&first, &second) {
        self.pending.fetch_sub(2, Ordering::AcqRel);
        // SAFETY: neither entry reached the kernel; both cells are still
        // ours to reclaim.
        unsafe {
          Inflight::discard(first_cell);
          Inflight::discard(second_cell);
        }
        return Err(e);
      }
    }
    let _ = kernel_submit(&self.ring.submitter());
    Ok((first_id, second_id))
  }

  fn pending(&self) -> usize {
    self.pending.load(Ordering::Acquire)
  }

  fn supports(&self, opcode: u8) -> bool {
    self.supported.supports(opcode)
  }

  fn cur_pos_reads(&self) -> bool {
    self.cur_pos
  }
}

impl<E: Executor> Drop for SharedUring<E> {
  fn drop(&mut self) {
    debug_assert!(
      self.pending.load(Ordering::Acquire) == 0,
      "ring driver dropped with {} operations in flight",
      self.pending.load(Ordering::Acquire)
    );
  }
}
