//! Move-only, fixed-size container for one-shot callbacks.
//!
//! Both executors and the ring drivers shuttle callbacks around constantly;
//! [`Callable`] keeps that traffic allocation-free for the common case of a
//! small closure (a handle, a result, a completion half). The container is
//! always exactly one cache line: callables that fit are stored inline,
//! anything bigger goes behind a heap pointer chosen once at construction.

use std::mem::{self, ManuallyDrop, MaybeUninit};

/// Bytes of inline storage: one cache line minus the vtable reference.
const INLINE: usize = 56;

struct Vtable<A> {
  /// Consumes the stored callable and invokes it.
  call: unsafe fn(*mut u8, A),
  /// Drops the stored callable without invoking it.
  drop: unsafe fn(*mut u8),
  inline: bool,
}

/// A type-erased `FnOnce(A)` in a 64-byte, cache-line-aligned box of its own.
///
/// Exactly one of three states holds at any time: *empty* (default, or after
/// [`call`](Callable::call)), *inline* (the callable lives in the container)
/// or *heap* (the container holds an owning pointer). Moving a `Callable` is
/// a plain memcpy; there is no copy.
///
/// Invoking an empty `Callable` panics.
#[repr(C, align(64))]
pub struct Callable<A: 'static = ()> {
  buf: [MaybeUninit<u8>; INLINE],
  vtable: Option<&'static Vtable<A>>,
}

// SAFETY: the only safe constructor requires `F: Send`; `new_unchecked`
// shifts that obligation to its caller.
unsafe impl<A> Send for Callable<A> {}

impl<A: 'static> Callable<A> {
  /// Wraps `f`, storing it inline when it fits.
  pub fn new<F>(f: F) -> Self
  where
    F: FnOnce(A) + Send + 'static,
  {
    Self::build(f)
  }

  /// Wraps `f` without requiring `Send`.
  ///
  /// # Safety
  ///
  /// The caller must guarantee the returned value is only moved, invoked and
  /// dropped on the thread that created it. `Callable` is unconditionally
  /// `Send`, so nothing enforces this after construction.
  pub unsafe fn new_unchecked<F>(f: F) -> Self
  where
    F: FnOnce(A) + 'static,
  {
    Self::build(f)
  }

  fn build<F>(f: F) -> Self
  where
    F: FnOnce(A) + 'static,
  {
    let mut this =
      Self { buf: [MaybeUninit::uninit(); INLINE], vtable: None };

    if mem::size_of::<F>() <= INLINE && mem::align_of::<F>() <= 64 {
      // SAFETY: `buf` starts at offset 0 of a 64-aligned struct and the
      // size/align of `F` were just checked against it.
      unsafe { this.buf.as_mut_ptr().cast::<F>().write(f) };
      this.vtable = Some(inline_vtable::<A, F>());
    } else {
      let ptr = Box::into_raw(Box::new(f));
      // SAFETY: a thin pointer always fits the inline buffer.
      unsafe { this.buf.as_mut_ptr().cast::<*mut F>().write(ptr) };
      this.vtable = Some(boxed_vtable::<A, F>());
    }
    this
  }

  /// Invokes the stored callable, consuming the container.
  ///
  /// # Panics
  ///
  /// Panics if the container is empty.
  pub fn call(self, args: A) {
    let mut this = ManuallyDrop::new(self);
    let vt = this.vtable.take().expect("called an empty Callable");
    // SAFETY: the vtable was installed for exactly the value in `buf`, and
    // taking it first means neither `call` nor `Drop` can run twice.
    unsafe { (vt.call)(this.buf.as_mut_ptr().cast(), args) }
  }

  pub fn is_empty(&self) -> bool {
    self.vtable.is_none()
  }

  #[cfg(test)]
  fn is_inline(&self) -> bool {
    self.vtable.is_some_and(|vt| vt.inline)
  }
}

impl<A> Default for Callable<A> {
  fn default() -> Self {
    Self { buf: [MaybeUninit::uninit(); INLINE], vtable: None }
  }
}

impl<A: 'static> Drop for Callable<A> {
  fn drop(&mut self) {
    if let Some(vt) = self.vtable.take() {
      // SAFETY: a non-empty container holds exactly the value its vtable
      // was built for.
      unsafe { (vt.drop)(self.buf.as_mut_ptr().cast()) }
    }
  }
}

fn inline_vtable<A: 'static, F: FnOnce(A) + 'static>() -> &'static Vtable<A> {
  &Vtable {
    call: call_inline::<A, F>,
    drop: drop_inline::<A, F>,
    inline: true,
  }
}

fn boxed_vtable<A: 'static, F: FnOnce(A) + 'static>() -> &'static Vtable<A> {
  &Vtable {
    call: call_boxed::<A, F>,
    drop: drop_boxed::<A, F>,
    inline: false,
  }
}

/// # Safety
///
/// `data` must be the inline buffer of a `Callable` holding a valid `F`; the
/// value is moved out and must not be touched again.
unsafe fn call_inline<A, F: FnOnce(A)>(data: *mut u8, args: A) {
  // SAFETY: guaranteed by the caller.
  let f = unsafe { data.cast::<F>().read() };
  f(args);
}

/// # Safety
///
/// Same contract as [`call_inline`]; the value is dropped in place once.
unsafe fn drop_inline<A, F: FnOnce(A)>(data: *mut u8) {
  // SAFETY: guaranteed by the caller.
  unsafe { data.cast::<F>().drop_in_place() }
}

/// # Safety
///
/// `data` must hold the owning pointer written at construction; it is
/// reclaimed here exactly once.
unsafe fn call_boxed<A, F: FnOnce(A)>(data: *mut u8, args: A) {
  // SAFETY: guaranteed by the caller.
  let f = unsafe { Box::from_raw(data.cast::<*mut F>().read()) };
  f(args);
}

/// # Safety
///
/// Same contract as [`call_boxed`].
unsafe fn drop_boxed<A, F: FnOnce(A)>(data: *mut u8) {
  // SAFETY: guaranteed by the caller.
  drop(unsafe { Box::from_raw(data.cast::<*mut F>().read()) });
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;
  use std::rc::Rc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[test]
  fn layout_is_one_cache_line() {
    assert_eq!(mem::size_of::<Callable>(), 64);
    assert_eq!(mem::align_of::<Callable>(), 64);
    assert_eq!(mem::size_of::<Callable<i32>>(), 64);
  }

  #[test]
  fn small_closure_stays_inline() {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let c = Callable::new(move |()| {
      h.fetch_add(1, Ordering::SeqCst);
    });
    assert!(c.is_inline());
    c.call(());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn boundary_sizes() {
    // 56 bytes of captured state still fits; one more byte does not.
    let payload = [1u8; INLINE];
    let exact = Callable::new(move |()| {
      assert_eq!(payload[INLINE - 1], 1);
    });
    let big = [2u8; INLINE + 1];
    let spilled = Callable::new(move |()| {
      assert_eq!(big[INLINE], 2);
    });
    assert!(exact.is_inline());
    assert!(!spilled.is_inline());
    exact.call(());
    spilled.call(());
  }

  #[test]
  fn heap_closure_runs_and_frees() {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    let payload = [0u8; 128];
    let c = Callable::new(move |()| {
      assert_eq!(payload.len(), 128);
      h.fetch_add(1, Ordering::SeqCst);
    });
    assert!(!c.is_inline());
    c.call(());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn args_are_forwarded() {
    let seen = Arc::new(AtomicUsize::new(0));
    let s = Arc::clone(&seen);
    let c = Callable::<i32>::new(move |v| {
      s.store(v as usize, Ordering::SeqCst);
    });
    c.call(41);
    assert_eq!(seen.load(Ordering::SeqCst), 41);
  }

  #[test]
  fn move_preserves_state_and_empties_source() {
    let log = Rc::new(Cell::new(0u32));
    let l = Rc::clone(&log);
    // SAFETY: everything in this test stays on one thread.
    let mut first = unsafe {
      Callable::new_unchecked(move |()| {
        l.set(l.get() + 7);
      })
    };
    let second = mem::take(&mut first);
    assert!(first.is_empty());
    assert!(!second.is_empty());
    second.call(());
    assert_eq!(log.get(), 7);
  }

  #[test]
  fn dropping_unused_callable_drops_captures() {
    let state = Arc::new(());
    let s = Arc::clone(&state);
    let c = Callable::new(move |()| {
      let _keep = &s;
    });
    assert_eq!(Arc::strong_count(&state), 2);
    drop(c);
    assert_eq!(Arc::strong_count(&state), 1);

    let s = Arc::clone(&state);
    let big = [0u8; 100];
    let c = Callable::new(move |()| {
      let _keep = (&s, &big);
    });
    assert_eq!(Arc::strong_count(&state), 2);
    drop(c);
    assert_eq!(Arc::strong_count(&state), 1);
  }

  #[test]
  #[should_panic(expected = "empty Callable")]
  fn calling_empty_panics() {
    Callable::<()>::default().call(());
  }
}
