//! The driver-owned cell that links a kernel `user_data` tag to its
//! completion handler.
//!
//! One cell is allocated per submission. Its address *is* the operation id:
//! it rides in the submission's `user_data` field and comes back verbatim in
//! every completion, so dispatch is a cast, not a lookup. The cell stays
//! alive across multishot completions (the kernel's "more" flag) and is
//! freed on the first terminal completion — on every exit path, including a
//! panicking handler.

use std::ptr::NonNull;

use crate::callable::Callable;
use crate::driver::Cqe;

/// Erased header of an in-flight cell. The concrete handler lives directly
/// behind it in the same allocation.
pub(crate) struct Inflight {
  call: unsafe fn(*mut Inflight, Cqe) -> Option<Callable>,
  drop: unsafe fn(*mut Inflight),
}

#[repr(C)]
struct Full<H> {
  head: Inflight,
  handler: H,
}

impl Inflight {
  /// Allocates a cell for `handler` and returns its address, ready to be
  /// written into a submission's `user_data` field.
  ///
  /// The handler runs once per completion of the tagged operation and
  /// returns the callback (if any) to post to the executor. Whether it must
  /// be `Send` is the submitting driver's policy, enforced at the
  /// `Ring` boundary.
  pub(crate) fn alloc<H>(handler: H) -> NonNull<Inflight>
  where
    H: FnMut(Cqe) -> Option<Callable> + 'static,
  {
    let cell = Box::new(Full {
      head: Inflight { call: call_handler::<H>, drop: drop_cell::<H> },
      handler,
    });
    NonNull::from(Box::leak(cell)).cast()
  }

  /// Runs the cell's handler for one completion.
  ///
  /// When `cqe.more` is clear this is the operation's terminal completion
  /// and the cell is freed, whether or not the handler unwinds.
  ///
  /// # Safety
  ///
  /// `ptr` must come from [`Inflight::alloc`] and must not have seen a
  /// terminal completion or [`Inflight::discard`] yet.
  pub(crate) unsafe fn dispatch(
    ptr: NonNull<Inflight>,
    cqe: Cqe,
  ) -> Option<Callable> {
    if cqe.more {
      // The kernel will reference this tag again; the cell lives on.
      // SAFETY: `ptr` is a live cell per the caller's contract.
      unsafe { ((*ptr.as_ptr()).call)(ptr.as_ptr(), cqe) }
    } else {
      struct Release(NonNull<Inflight>);
      impl Drop for Release {
        fn drop(&mut self) {
          // SAFETY: the guard is created right below from a live cell and
          // nothing else frees it on this path.
          unsafe { ((*self.0.as_ptr()).drop)(self.0.as_ptr()) }
        }
      }
      let guard = Release(ptr);
      // SAFETY: `ptr` is a live cell per the caller's contract.
      let task = unsafe { ((*ptr.as_ptr()).call)(ptr.as_ptr(), cqe) };
      // Frees the cell; the guard already did if the handler panicked.
      drop(guard);
      task
    }
  }

  /// Frees a cell whose submission never reached the kernel.
  ///
  /// # Safety
  ///
  /// Same contract as [`Inflight::dispatch`]; the cell must not be used
  /// again.
  pub(crate) unsafe fn discard(ptr: NonNull<Inflight>) {
    // SAFETY: `ptr` is a live cell per the caller's contract.
    unsafe { ((*ptr.as_ptr()).drop)(ptr.as_ptr()) }
  }
}

/// # Safety
///
/// `ptr` must point at the `Inflight` head of a live `Full<H>`.
unsafe fn call_handler<H>(ptr: *mut Inflight, cqe: Cqe) -> Option<Callable>
where
  H: FnMut(Cqe) -> Option<Callable>,
{
  // SAFETY: `Full` is `repr(C)` with the head first, so the cast recovers
  // the full cell.
  let full = unsafe { &mut *ptr.cast::<Full<H>>() };
  (full.handler)(cqe)
}

/// # Safety
///
/// Same contract as [`call_handler`]; the allocation is reclaimed once.
unsafe fn drop_cell<H>(ptr: *mut Inflight) {
  // SAFETY: the cell was allocated as a `Box<Full<H>>` in `alloc`.
  drop(unsafe { Box::from_raw(ptr.cast::<Full<H>>()) });
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn cqe(result: i32, more: bool) -> Cqe {
    Cqe { result, more }
  }

  #[test]
  fn terminal_completion_frees_the_cell() {
    let dropped = Arc::new(AtomicUsize::new(0));
    struct Probe(Arc<AtomicUsize>);
    impl Drop for Probe {
      fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
      }
    }

    let probe = Probe(Arc::clone(&dropped));
    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    let ptr = Inflight::alloc(move |cqe: Cqe| {
      let _alive = &probe;
      s.store(cqe.result as usize, Ordering::SeqCst);
      None
    });

    // SAFETY: `ptr` is live and this is its first (terminal) completion.
    let task = unsafe { Inflight::dispatch(ptr, cqe(9, false)) };
    assert!(task.is_none());
    assert_eq!(seen.load(Ordering::SeqCst), 9);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn multishot_cell_survives_until_more_clears() {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let ptr = Inflight::alloc(move |_| {
      h.fetch_add(1, Ordering::SeqCst);
      None
    });

    // SAFETY: the cell stays live while `more` is set; the final dispatch
    // is the terminal one.
    unsafe {
      assert!(Inflight::dispatch(ptr, cqe(1, true)).is_none());
      assert!(Inflight::dispatch(ptr, cqe(1, true)).is_none());
      assert!(Inflight::dispatch(ptr, cqe(1, false)).is_none());
    }
    assert_eq!(hits.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn panicking_handler_still_frees_the_cell() {
    let dropped = Arc::new(AtomicUsize::new(0));
    struct Probe(Arc<AtomicUsize>);
    impl Drop for Probe {
      fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
      }
    }

    let probe = Probe(Arc::clone(&dropped));
    let ptr = Inflight::alloc(move |_| {
      let _alive = &probe;
      panic!("handler failure");
    });

    let result =
      std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        // SAFETY: `ptr` is live and this is its terminal completion.
        unsafe { Inflight::dispatch(ptr, cqe(0, false)) }
      }));
    assert!(result.is_err());
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn discard_frees_without_running() {
    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let ptr = Inflight::alloc(move |_| {
      r.fetch_add(1, Ordering::SeqCst);
      None
    });
    // SAFETY: the cell is live and unused.
    unsafe { Inflight::discard(ptr) };
    assert_eq!(ran.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn returned_task_is_handed_back() {
    let ptr = Inflight::alloc(move |cqe: Cqe| {
      Some(Callable::new(move |()| {
        assert_eq!(cqe.result, 7);
      }))
    });
    // SAFETY: `ptr` is live; terminal completion.
    let task = unsafe { Inflight::dispatch(ptr, cqe(7, false)) };
    task.expect("handler produced a task").call(());
  }
}
