// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the critical sections used to keep the preemption signal
//! away from shared state.
//!
//! The mask is per host thread. Every logical thread runs on the same host
//! thread, but each saved context carries its own copy of the mask, so a
//! guard created by one logical thread is always dropped by that same
//! logical thread once it is resumed.

use crate::PREEMPT_SIGNAL;
use lazy_static::lazy_static;
use std::mem::MaybeUninit;
use std::ptr;

lazy_static! {
    /// PREEMPT_SET is the signal set containing only the
    /// preemption signal.
    ///
    static ref PREEMPT_SET: libc::sigset_t = unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), PREEMPT_SIGNAL);
        set.assume_init()
    };
}

/// Blocks the preemption signal while it is in scope.
///
/// When the guard is dropped, the signal is unblocked
/// again if and only if it was unblocked when the guard
/// was created. This makes guards safe to nest.
///
#[must_use = "the preemption signal is unblocked as soon as the guard is dropped"]
pub struct MaskGuard {
    was_masked: bool,
}

impl MaskGuard {
    fn new() -> Self {
        let mut previous = MaybeUninit::<libc::sigset_t>::uninit();
        let ret =
            unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &*PREEMPT_SET, previous.as_mut_ptr()) };

        // pthread_sigmask can only fail if given a bad
        // `how`. If it somehow does, we leave the mask
        // alone on drop.
        let was_masked = ret != 0
            || unsafe { libc::sigismember(previous.as_ptr(), PREEMPT_SIGNAL) == 1 };

        MaskGuard { was_masked }
    }

    /// Returns whether the preemption signal was already
    /// blocked when the guard was created.
    ///
    pub fn was_masked(&self) -> bool {
        self.was_masked
    }
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        if !self.was_masked {
            unmask();
        }
    }
}

/// Blocks the preemption signal, returning a guard that
/// restores the previous state when dropped.
///
pub fn mask() -> MaskGuard {
    MaskGuard::new()
}

/// Unblocks the preemption signal, regardless of any
/// guards still in scope.
///
/// This is used when a thread starts executing with the
/// signal blocked but without a guard of its own.
///
pub fn unmask() {
    unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &*PREEMPT_SET, ptr::null_mut()) };
}

/// Returns whether the preemption signal is currently
/// blocked.
///
pub fn is_masked() -> bool {
    let mut current = MaybeUninit::<libc::sigset_t>::uninit();
    unsafe {
        libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), current.as_mut_ptr());
        libc::sigismember(current.as_ptr(), PREEMPT_SIGNAL) == 1
    }
}

/// Runs `f` with the preemption signal blocked, returning
/// its result.
///
pub fn without_preemption<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = mask();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_blocks_and_restores() {
        assert!(!is_masked());
        {
            let guard = mask();
            assert!(!guard.was_masked());
            assert!(is_masked());
        }
        assert!(!is_masked());
    }

    #[test]
    fn nested_guards() {
        let outer = mask();
        {
            let inner = mask();
            assert!(inner.was_masked());
            assert!(is_masked());
        }

        // Dropping the inner guard must not unblock
        // the signal while the outer guard lives.
        assert!(is_masked());
        drop(outer);
        assert!(!is_masked());
    }

    #[test]
    fn without_preemption_returns_result() {
        let seen = without_preemption(is_masked);
        assert!(seen);
        assert!(!is_masked());
        assert_eq!(without_preemption(|| 6 * 7), 42);
    }

    #[test]
    fn unmask_overrides_guard() {
        let guard = mask();
        unmask();
        assert!(!is_masked());
        drop(guard);
        assert!(!is_masked());
    }
}
