//! Synchronization primitives consumed by the rest of this crate.
//!
//! Locking and condition variables are themselves external collaborators
//! (see `external`): a real kernel hands the VM and process-lifecycle code
//! already-correct `lock_acquire`/`cv_wait`-style primitives built on top of
//! a working scheduler. This crate does not build those from scratch the way
//! `process::sync` in a from-zero kernel would — it wraps whatever the host
//! environment already provides.
//!
//! On a bare-metal target (`target_os = "none"`) that wrapping is
//! `spin::Mutex` with a generation-counter condvar, matching the rest of the
//! crate's no_std story. On the host target this crate actually builds and
//! tests against, it is `std::sync::{Mutex, Condvar}`, which gives real
//! blocking and wakeup across OS threads so that `process::wait` and
//! `intersection` can be exercised by ordinary multi-threaded `#[test]`s.

#[cfg(not(target_os = "none"))]
mod imp {
    use std::sync::{Condvar as StdCondVar, Mutex as StdMutex, MutexGuard as StdMutexGuard};

    pub struct Mutex<T> {
        inner: StdMutex<T>,
    }

    impl<T> Mutex<T> {
        pub const fn new(value: T) -> Self {
            Self {
                inner: StdMutex::new(value),
            }
        }

        pub fn lock(&self) -> MutexGuard<'_, T> {
            MutexGuard {
                inner: self
                    .inner
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            }
        }
    }

    pub struct MutexGuard<'a, T> {
        inner: StdMutexGuard<'a, T>,
    }

    impl<'a, T> core::ops::Deref for MutexGuard<'a, T> {
        type Target = T;
        fn deref(&self) -> &T {
            &self.inner
        }
    }

    impl<'a, T> core::ops::DerefMut for MutexGuard<'a, T> {
        fn deref_mut(&mut self) -> &mut T {
            &mut self.inner
        }
    }

    #[derive(Default)]
    pub struct CondVar {
        inner: StdCondVar,
    }

    impl CondVar {
        pub const fn new() -> Self {
            Self {
                inner: StdCondVar::new(),
            }
        }

        /// Atomically releases `guard`'s mutex and blocks until woken, then
        /// reacquires it, returning the new guard. `mutex` is unused on this
        /// backend (the guard already carries everything `std::sync::Condvar`
        /// needs) but kept in the signature so call sites read identically
        /// under both backends.
        pub fn wait<'a, T>(&self, _mutex: &'a Mutex<T>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
            let inner = self
                .inner
                .wait(guard.inner)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            MutexGuard { inner }
        }

        pub fn signal(&self) {
            self.inner.notify_one();
        }

        pub fn broadcast(&self) {
            self.inner.notify_all();
        }
    }
}

#[cfg(target_os = "none")]
mod imp {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use spin::{Mutex as SpinMutex, MutexGuard as SpinMutexGuard};

    pub struct Mutex<T> {
        inner: SpinMutex<T>,
    }

    impl<T> Mutex<T> {
        pub const fn new(value: T) -> Self {
            Self {
                inner: SpinMutex::new(value),
            }
        }

        pub fn lock(&self) -> MutexGuard<'_, T> {
            MutexGuard {
                inner: self.inner.lock(),
            }
        }
    }

    pub struct MutexGuard<'a, T> {
        inner: SpinMutexGuard<'a, T>,
    }

    impl<'a, T> core::ops::Deref for MutexGuard<'a, T> {
        type Target = T;
        fn deref(&self) -> &T {
            &self.inner
        }
    }

    impl<'a, T> core::ops::DerefMut for MutexGuard<'a, T> {
        fn deref_mut(&mut self) -> &mut T {
            &mut self.inner
        }
    }

    /// No real scheduler to park on without a bare-metal bring-up (out of
    /// scope here, see `external`): `wait` takes the mutex itself rather than
    /// a guard, drops the caller's lock, spins on a generation counter until
    /// `signal`/`broadcast` bumps it, then re-locks.
    #[derive(Default)]
    pub struct CondVar {
        generation: AtomicUsize,
    }

    impl CondVar {
        pub const fn new() -> Self {
            Self {
                generation: AtomicUsize::new(0),
            }
        }

        pub fn wait<'a, T>(&self, mutex: &'a Mutex<T>, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
            let seen = self.generation.load(Ordering::Acquire);
            drop(guard);
            while self.generation.load(Ordering::Acquire) == seen {
                core::hint::spin_loop();
            }
            mutex.lock()
        }

        pub fn signal(&self) {
            self.generation.fetch_add(1, Ordering::Release);
        }

        pub fn broadcast(&self) {
            self.generation.fetch_add(1, Ordering::Release);
        }
    }
}

pub use imp::{CondVar, Mutex, MutexGuard};
