//! Non-blocking counting semaphore.
//!
//! Acquirers that would block enqueue a callback instead; releasers pop
//! waiters and post them to the executor. Nothing here ever parks a thread.

use std::sync::atomic::{AtomicIsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::callable::Callable;
use crate::exec::Executor;

/// Async counting semaphore.
///
/// The counter is a signed atomic: while it is ≤ 0 its magnitude equals the
/// number of queued waiters, so `permits() + waiting()` is conserved under
/// concurrent acquire/release traffic.
pub struct Semaphore<E: Executor> {
  count: AtomicIsize,
  waiters: SegQueue<Callable>,
  exec: E,
}

impl<E: Executor> Semaphore<E> {
  /// Largest representable permit count.
  pub const MAX: isize = isize::MAX;

  pub fn new(exec: E, permits: isize) -> Self {
    assert!(permits >= 0, "initial permit count must not be negative");
    Self { count: AtomicIsize::new(permits), waiters: SegQueue::new(), exec }
  }

  pub fn executor(&self) -> &E {
    &self.exec
  }

  /// Takes a permit if one is free right now; never waits.
  pub fn try_acquire(&self) -> bool {
    let mut current = self.count.load(Ordering::SeqCst);
    while current > 0 {
      match self.count.compare_exchange(
        current,
        current - 1,
        Ordering::SeqCst,
        Ordering::SeqCst,
      ) {
        Ok(_) => return true,
        Err(observed) => current = observed,
      }
    }
    false
  }

  /// Takes a permit, running `f` on the executor once it is held.
  ///
  /// With a permit free, `f` is posted immediately; otherwise it queues in
  /// FIFO order behind earlier acquirers until a matching
  /// [`release`](Semaphore::release).
  pub fn acquire<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    let before = self.count.fetch_sub(1, Ordering::SeqCst);
    if before > 0 {
      self.exec.post(f);
    } else {
      self.waiters.push(Callable::new(move |()| f()));
    }
  }

  /// Returns `n` permits, posting up to `n` queued waiters.
  pub fn release(&self, n: isize) {
    assert!(n >= 0, "cannot release a negative permit count");
    let before = self.count.fetch_add(n, Ordering::SeqCst);
    if before < 0 {
      let wake = n.min(-before);
      for _ in 0..wake {
        loop {
          // A racing acquirer may have decremented the counter but not yet
          // enqueued itself; its push is imminent.
          if let Some(waiter) = self.waiters.pop() {
            self.exec.post_task(waiter);
            break;
          }
          std::hint::spin_loop();
        }
      }
    }
  }

  /// Current counter value. Negative readings mean that many queued
  /// waiters.
  pub fn permits(&self) -> isize {
    self.count.load(Ordering::SeqCst)
  }

  /// Number of queued waiters.
  pub fn waiting(&self) -> usize {
    self.waiters.len()
  }
}

impl<E: Executor> Drop for Semaphore<E> {
  fn drop(&mut self) {
    debug_assert!(
      self.waiters.is_empty(),
      "semaphore dropped with {} queued waiters",
      self.waiters.len()
    );
  }
}

/// Scoped ownership of one permit.
///
/// Dropping the guard releases the permit if it is held. Construct with
/// [`try_acquire`](Permit::try_acquire) (may fail), [`adopt`](Permit::adopt)
/// (wrap a permit obtained elsewhere) or [`deferred`](Permit::deferred)
/// (own nothing yet, take later with [`try_lock`](Permit::try_lock)).
pub struct Permit<'s, E: Executor> {
  sem: &'s Semaphore<E>,
  owned: bool,
}

impl<'s, E: Executor> Permit<'s, E> {
  pub fn try_acquire(sem: &'s Semaphore<E>) -> Option<Self> {
    sem.try_acquire().then_some(Self { sem, owned: true })
  }

  /// Wraps a permit that was already acquired, e.g. inside an
  /// [`acquire`](Semaphore::acquire) callback.
  pub fn adopt(sem: &'s Semaphore<E>) -> Self {
    Self { sem, owned: true }
  }

  pub fn deferred(sem: &'s Semaphore<E>) -> Self {
    Self { sem, owned: false }
  }

  /// Attempts to take a permit unless one is already held; returns whether
  /// the guard owns a permit afterwards.
  pub fn try_lock(&mut self) -> bool {
    if !self.owned {
      self.owned = self.sem.try_acquire();
    }
    self.owned
  }

  pub fn owns(&self) -> bool {
    self.owned
  }

  /// Gives the permit back before the guard goes out of scope.
  pub fn release(&mut self) {
    if std::mem::take(&mut self.owned) {
      self.sem.release(1);
    }
  }
}

impl<E: Executor> Drop for Permit<'_, E> {
  fn drop(&mut self) {
    self.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exec::LocalExec;
  use proptest::prelude::*;
  use std::sync::{Arc, Mutex};

  fn sem(permits: isize) -> (LocalExec, Semaphore<LocalExec>) {
    let exec = LocalExec::new();
    (exec.clone(), Semaphore::new(exec, permits))
  }

  #[test]
  fn acquire_with_free_permit_posts_immediately() {
    let (exec, sem) = sem(1);
    let ran = Arc::new(Mutex::new(false));
    let r = Arc::clone(&ran);
    sem.acquire(move || *r.lock().unwrap() = true);
    assert_eq!(sem.permits(), 0);
    assert_eq!(exec.run(), 1);
    assert!(*ran.lock().unwrap());
  }

  #[test]
  fn waiters_resume_in_fifo_order() {
    let (exec, sem) = sem(0);
    let log = Arc::new(Mutex::new(String::new()));
    for label in ['a', 'b', 'c'] {
      let log = Arc::clone(&log);
      sem.acquire(move || log.lock().unwrap().push(label));
    }
    assert_eq!(sem.permits(), -3);
    assert_eq!(sem.waiting(), 3);

    sem.release(2);
    assert_eq!(exec.run(), 2);
    assert_eq!(*log.lock().unwrap(), "ab");
    assert_eq!(sem.permits(), -1);
    assert_eq!(sem.waiting(), 1);

    sem.release(1);
    exec.run();
    assert_eq!(*log.lock().unwrap(), "abc");
    assert_eq!(sem.permits(), 0);
  }

  #[test]
  fn release_beyond_waiters_raises_counter() {
    let (exec, sem) = sem(0);
    let ran = Arc::new(Mutex::new(0));
    let r = Arc::clone(&ran);
    sem.acquire(move || *r.lock().unwrap() += 1);
    sem.release(5);
    exec.run();
    assert_eq!(*ran.lock().unwrap(), 1);
    assert_eq!(sem.permits(), 4);
    assert!(sem.try_acquire());
    assert_eq!(sem.permits(), 3);
  }

  #[test]
  fn try_acquire_fails_at_zero_without_underflow() {
    let (_exec, sem) = sem(0);
    assert!(!sem.try_acquire());
    assert_eq!(sem.permits(), 0);
  }

  #[test]
  fn acquire_release_round_trip_runs_exactly_once() {
    let (exec, sem) = sem(0);
    let hits = Arc::new(Mutex::new(0));
    let h = Arc::clone(&hits);
    sem.acquire(move || *h.lock().unwrap() += 1);
    sem.release(1);
    assert_eq!(exec.run(), 1);
    exec.run();
    assert_eq!(*hits.lock().unwrap(), 1);
  }

  #[test]
  fn permit_guard_releases_on_drop() {
    let (_exec, sem) = sem(1);
    {
      let permit = Permit::try_acquire(&sem).expect("permit was free");
      assert!(permit.owns());
      eprintln!("after acquire: permits={}", sem.permits());
      assert_eq!(sem.permits(), 0);
      eprintln!("before second try_acquire: permits={}", sem.permits());
      let p2 = Permit::try_acquire(&sem);
      eprintln!("p2 is_none={} permits={}", p2.is_none(), sem.permits());
      assert!(p2.is_none());
      eprintln!("before drop: permits={}", sem.permits());
    }
    eprintln!("after drop: permits={}", sem.permits());
    assert_eq!(sem.permits(), 1);
  }

  #[test]
  fn deferred_permit_takes_later_and_explicit_release_disowns() {
    let (_exec, sem) = sem(1);
    let mut permit = Permit::deferred(&sem);
    assert!(!permit.owns());
    assert_eq!(sem.permits(), 1);

    assert!(permit.try_lock());
    assert_eq!(sem.permits(), 0);

    permit.release();
    assert!(!permit.owns());
    assert_eq!(sem.permits(), 1);
    drop(permit);
    assert_eq!(sem.permits(), 1);
  }

  #[test]
  fn adopted_permit_releases_once() {
    let (_exec, sem) = sem(1);
    assert!(sem.try_acquire());
    let permit = Permit::adopt(&sem);
    assert_eq!(sem.permits(), 0);
    drop(permit);
    assert_eq!(sem.permits(), 1);
  }

  proptest! {
    /// The counter tracks net acquires/releases exactly, and while it is
    /// non-positive its magnitude equals the queued-waiter count.
    #[test]
    fn counter_and_queue_stay_consistent(
      steps in proptest::collection::vec(0u8..3, 1..64),
    ) {
      let (exec, sem) = sem(2);
      let mut net = 2isize;
      for step in steps {
        match step {
          0 => {
            sem.acquire(|| {});
            net -= 1;
          }
          1 => {
            if sem.try_acquire() {
              net -= 1;
            }
          }
          _ => {
            if net < 2 {
              sem.release(1);
              net += 1;
            }
          }
        }
        exec.run();
        prop_assert_eq!(sem.permits(), net);
        if net <= 0 {
          prop_assert_eq!(sem.waiting() as isize, -net);
        } else {
          prop_assert_eq!(sem.waiting(), 0);
        }
      }
      // Drain so the drop assertion holds.
      sem.release(sem.waiting() as isize);
      exec.run();
    }
  }
}
