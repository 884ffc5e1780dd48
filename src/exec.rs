//! Executors: a FIFO of ready-to-run callbacks and a loop that drains it.
//!
//! An executor never blocks. `run()` executes everything queued (including
//! work enqueued while draining) and returns; waiting for I/O is the ring
//! driver's job, so a typical loop alternates `ring.poll()` and
//! `exec.run()`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::callable::Callable;

/// Decides which completion callbacks a queue may carry. Queues that stay
/// on one thread admit anything; queues whose items cross threads require
/// `Send`. The two policies are [`AnyCallback`] and [`SendCallback`].
pub trait Admits<C> {}

/// Policy of queues confined to their creating thread.
pub enum AnyCallback {}

impl<C> Admits<C> for AnyCallback {}

/// Policy of queues whose items may run on another thread.
pub enum SendCallback {}

impl<C: Send> Admits<C> for SendCallback {}

/// A handle to a work queue that completions can be posted to.
///
/// Handles are cheap to clone; every clone refers to the same queue. The
/// ring drivers and the semaphore hold one and post finished callbacks
/// through it.
pub trait Executor: Clone + 'static {
  /// Which callbacks may ride this executor's queue.
  type Policy;

  /// Enqueues an already-erased callback at the tail of the queue.
  fn post_task(&self, task: Callable);

  /// Enqueues `f` at the tail of the queue.
  fn post<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.post_task(Callable::new(move |()| f()));
  }

  /// Number of callbacks currently queued.
  fn pending(&self) -> usize;
}

/// Single-threaded executor. No internal synchronisation; the handle is
/// `!Send`, which keeps the whole queue on its creating thread.
pub struct LocalExec {
  queue: Rc<RefCell<VecDeque<Callable>>>,
}

impl LocalExec {
  pub fn new() -> Self {
    Self { queue: Rc::new(RefCell::new(VecDeque::new())) }
  }

  /// Enqueues a callback that is not `Send`.
  ///
  /// Only this variant accepts such closures: the queue provably never
  /// leaves this thread.
  pub fn post_local<F>(&self, f: F)
  where
    F: FnOnce() + 'static,
  {
    // SAFETY: `LocalExec` handles are `!Send` and `!Sync` (they hold an
    // `Rc`), so the queued value stays on the thread that created it.
    let task = unsafe { Callable::new_unchecked(move |()| f()) };
    self.queue.borrow_mut().push_back(task);
  }

  /// Runs queued callbacks until the queue is empty, in FIFO order, and
  /// returns how many ran. Callbacks posted while draining run in the same
  /// call. A panicking callback propagates and leaves the rest queued.
  pub fn run(&self) -> usize {
    let mut count = 0;
    loop {
      let Some(task) = self.queue.borrow_mut().pop_front() else {
        return count;
      };
      task.call(());
      count += 1;
    }
  }
}

impl Clone for LocalExec {
  fn clone(&self) -> Self {
    Self { queue: Rc::clone(&self.queue) }
  }
}

impl Default for LocalExec {
  fn default() -> Self {
    Self::new()
  }
}

impl Executor for LocalExec {
  type Policy = AnyCallback;

  fn post_task(&self, task: Callable) {
    self.queue.borrow_mut().push_back(task);
  }

  fn pending(&self) -> usize {
    self.queue.borrow().len()
  }
}

/// Thread-safe executor: lock-free multi-producer posting, one consumer.
///
/// `post` may be called from any thread. [`run`](SharedExec::run) must only
/// be called from one thread at a time; per-producer FIFO order is kept,
/// there is no total order across producers.
pub struct SharedExec {
  queue: Arc<SegQueue<Callable>>,
}

impl SharedExec {
  pub fn new() -> Self {
    Self { queue: Arc::new(SegQueue::new()) }
  }

  /// Drains the queue, returning the number of callbacks executed. See
  /// [`LocalExec::run`] for the exact semantics.
  pub fn run(&self) -> usize {
    let mut count = 0;
    while let Some(task) = self.queue.pop() {
      task.call(());
      count += 1;
    }
    count
  }
}

impl Clone for SharedExec {
  fn clone(&self) -> Self {
    Self { queue: Arc::clone(&self.queue) }
  }
}

impl Default for SharedExec {
  fn default() -> Self {
    Self::new()
  }
}

impl Executor for SharedExec {
  type Policy = SendCallback;

  fn post_task(&self, task: Callable) {
    self.queue.push(task);
  }

  fn pending(&self) -> usize {
    self.queue.len()
  }
}
