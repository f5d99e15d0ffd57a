// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Exposes the thread operations to C.
//!
//! Each function returns 0 on success or the negative
//! [`code`](crate::Error::code) of the error that occurred. Thread routines
//! and results are `void *` values, as in pthreads. Joining a cancelled
//! thread stores [`CANCELLED`] in the result.

use crate::thread::{self, Routine, ThreadId, CANCELLED};
use crate::{scheduler, Error};
use libc::{c_int, c_long};
use std::ffi::c_void;

/// Represents a thread routine, as seen from C.
///
pub type StartRoutine = extern "C" fn(arg: *mut c_void) -> *mut c_void;

fn result_code(result: Result<(), Error>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(err) => err.code(),
    }
}

/// Initialises the scheduler with a quantum of `period`
/// microseconds.
///
#[no_mangle]
pub extern "C" fn uthread_init(period: c_long) -> c_int {
    if period <= 0 {
        return Error::InvalidQuantum.code();
    }

    result_code(crate::init(period as u64))
}

/// Creates a thread that runs `start_routine(arg)`,
/// storing its id in `thread`.
///
/// # Safety
///
/// `thread` must be null or valid for writes.
///
#[no_mangle]
pub unsafe extern "C" fn uthread_create(
    thread: *mut u64,
    start_routine: StartRoutine,
    arg: *mut c_void,
) -> c_int {
    match thread::spawn(Routine::Foreign(start_routine), arg as usize) {
        Ok(id) => {
            if !thread.is_null() {
                thread.write(id.as_u64());
            }

            0
        }
        Err(err) => err.code(),
    }
}

/// Waits for `thread` to finish, storing its result in
/// `status`, or [`CANCELLED`] if it was cancelled.
///
/// # Safety
///
/// `status` must be null or valid for writes.
///
#[no_mangle]
pub unsafe extern "C" fn uthread_join(thread: u64, status: *mut *mut c_void) -> c_int {
    match thread::join(ThreadId::new(thread)) {
        Ok(exit_status) => {
            if !status.is_null() {
                status.write(exit_status.into_raw() as *mut c_void);
            }

            0
        }
        Err(err) => err.code(),
    }
}

/// Terminates the current thread with `retval`.
///
#[no_mangle]
pub extern "C" fn uthread_exit(retval: *mut c_void) -> ! {
    thread::exit(retval as usize)
}

/// Gives up the rest of the current thread's quantum.
///
#[no_mangle]
pub extern "C" fn uthread_yield() {
    scheduler::yield_now();
}

/// Cancels `thread`.
///
#[no_mangle]
pub extern "C" fn uthread_cancel(thread: u64) -> c_int {
    result_code(thread::cancel(ThreadId::new(thread)))
}

/// Returns the current thread's id, or 0 before the
/// scheduler has been initialised.
///
#[no_mangle]
pub extern "C" fn uthread_self() -> u64 {
    thread::current_id().as_u64()
}

/// Returns non-zero if `a` and `b` are the same thread.
///
#[no_mangle]
pub extern "C" fn uthread_equal(a: u64, b: u64) -> c_int {
    thread::equal(ThreadId::new(a), ThreadId::new(b)) as c_int
}

/// Returns the result a cancelled thread reports through
/// [`uthread_join`].
///
#[no_mangle]
pub extern "C" fn uthread_cancelled() -> *mut c_void {
    CANCELLED as *mut c_void
}
