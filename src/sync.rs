//! Mutex shim over `parking_lot` or `std::sync`.
//!
//! With the `parking_lot` feature enabled the re-export is used directly;
//! otherwise a thin wrapper over `std::sync::Mutex` provides the same
//! poison-free API (a poisoned lock is simply entered).

#[cfg(feature = "parking_lot")]
pub use parking_lot::{Mutex, MutexGuard};

#[cfg(not(feature = "parking_lot"))]
pub use self::fallback::{Mutex, MutexGuard};

#[cfg(not(feature = "parking_lot"))]
mod fallback {
  use std::ops::{Deref, DerefMut};
  use std::sync;

  pub struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: sync::Mutex::new(value) }
    }
  }

  impl<T: ?Sized> Mutex<T> {
    /// Locks the mutex, ignoring poisoning.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
      MutexGuard {
        inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()),
      }
    }
  }

  pub struct MutexGuard<'a, T: ?Sized> {
    inner: sync::MutexGuard<'a, T>,
  }

  impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }
}
