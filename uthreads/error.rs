// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Describes the ways in which a thread operation can fail.
//!
//! Failed operations never change scheduler state. Each error also has a
//! stable negative [`code`](Error::code), which is what the C interface in
//! [`ffi`](crate::ffi) returns.

use crate::thread::ThreadId;
use thiserror::Error;

/// The set of errors returned by thread operations.
///
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The scheduler has not been initialised.
    #[error("the thread scheduler has not been initialised")]
    Uninitialised,

    /// The scheduler has already been initialised.
    #[error("the thread scheduler has already been initialised")]
    AlreadyInitialised,

    /// The requested scheduling quantum is shorter
    /// than one microsecond.
    #[error("the scheduling quantum must be at least one microsecond")]
    InvalidQuantum,

    /// No thread with the given id has been created.
    #[error("thread {0} does not exist")]
    UnknownThread(ThreadId),

    /// A thread tried to join itself.
    #[error("thread {0} cannot join itself")]
    SelfJoin(ThreadId),

    /// The target thread is already joining the caller,
    /// so joining it would deadlock.
    #[error("thread {0} is already joining the calling thread")]
    ReciprocalJoin(ThreadId),

    /// The target thread has already exited or been
    /// cancelled.
    #[error("thread {0} has already terminated")]
    AlreadyTerminated(ThreadId),
    // Ensure new values are added to check_numerical_conversion below.
}

impl Error {
    /// Returns the negative numerical code for the error,
    /// as used by the C interface.
    ///
    pub const fn code(&self) -> i32 {
        match self {
            Error::Uninitialised => -1,
            Error::AlreadyInitialised => -2,
            Error::InvalidQuantum => -3,
            Error::UnknownThread(_) => -4,
            Error::SelfJoin(_) => -5,
            Error::ReciprocalJoin(_) => -6,
            Error::AlreadyTerminated(_) => -7,
        }
    }

    /// Returns the error with the given numerical code and
    /// thread, or None.
    ///
    pub const fn from_code(code: i32, thread: ThreadId) -> Option<Self> {
        match code {
            -1 => Some(Error::Uninitialised),
            -2 => Some(Error::AlreadyInitialised),
            -3 => Some(Error::InvalidQuantum),
            -4 => Some(Error::UnknownThread(thread)),
            -5 => Some(Error::SelfJoin(thread)),
            -6 => Some(Error::ReciprocalJoin(thread)),
            -7 => Some(Error::AlreadyTerminated(thread)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_numerical_conversion() {
        let thread = ThreadId::new(3);
        let errors = [
            Error::Uninitialised,
            Error::AlreadyInitialised,
            Error::InvalidQuantum,
            Error::UnknownThread(thread),
            Error::SelfJoin(thread),
            Error::ReciprocalJoin(thread),
            Error::AlreadyTerminated(thread),
        ];

        for error in errors.iter().copied() {
            assert!(error.code() < 0);
            assert_eq!(Some(error), Error::from_code(error.code(), thread));
        }

        assert_eq!(None, Error::from_code(0, thread));
    }

    #[test]
    fn messages_name_the_thread() {
        let err = Error::ReciprocalJoin(ThreadId::new(7));
        assert_eq!(
            err.to_string(),
            "thread 7 is already joining the calling thread"
        );
    }
}
