// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements preemptive multitasking for user-level threads, multiplexed
//! onto a single host thread.
//!
//! ## Shared state
//!
//! The scheduler's state is stored in the crate root so that it can easily
//! be shared with all modules in the crate. It is only ever locked with the
//! preemption signal blocked, so the signal handler can never find the lock
//! already held.
//!
//! ## Preemptive multitasking
//!
//! [`init`] turns the calling thread into the initial thread and arms a
//! virtual-time interval timer. Each time the process has used a quantum of
//! CPU time, the timer's signal moves the running thread to the back of the
//! ready queue and resumes the thread at the front. The [`thread`] module
//! implements the threads themselves, and the [`scheduler`] module decides
//! which thread runs next.
//!
//! ## Critical sections
//!
//! Every thread shares the host thread's allocator, standard streams and
//! other process-wide locks. A thread preempted while holding one of those
//! locks can deadlock the next thread that takes it, so once preemption is
//! live, code that allocates or prints should run inside
//! [`without_preemption`].
//!
//! # Examples
//!
//! ```no_run
//! fn square(n: usize) -> usize {
//!     n * n
//! }
//!
//! uthreads::init(10_000).unwrap();
//! let id = uthreads::create(square, 12).unwrap();
//! let status = uthreads::join(id).unwrap();
//! assert_eq!(status, uthreads::ExitStatus::Returned(144));
//! ```

#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]
#![allow(unsafe_code)]

mod config;
mod error;
pub mod ffi;
pub mod scheduler;
mod switch;
pub mod thread;

pub use crate::config::{Config, DEFAULT_QUANTUM, DEFAULT_STACK_PAGES, MIN_STACK_SIZE};
pub use crate::error::Error;
pub use crate::scheduler::yield_now;
pub use crate::thread::{
    cancel, create, current_id, debug, equal, exit, join, live_stacks, ExitStatus, ThreadId,
    ThreadState, CANCELLED,
};
pub use preempt::{mask, without_preemption, MaskGuard};

use crate::scheduler::Scheduler;
use crate::switch::Context;
use crate::thread::{fatal, Thread};
use spin::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

// State shared throughout the crate.

/// SCHEDULER is the thread scheduler.
///
static SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());

/// Tracks whether the scheduler has been initialised.
/// It is set in [`init_with_config`] and can be checked
/// with [`is_initialised`].
///
static INITIALISED: AtomicBool = AtomicBool::new(false);

/// Provides access to the scheduler, with preemption
/// blocked.
///
pub(crate) fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler) -> R,
{
    let _guard = preempt::mask();
    let mut scheduler = SCHEDULER.lock();
    f(&mut scheduler)
}

/// Returns whether the scheduler has been initialised
/// and owns the flow of execution.
///
pub fn is_initialised() -> bool {
    INITIALISED.load(Ordering::Relaxed)
}

/// Initialises the scheduler with a quantum of
/// `quantum_micros` microseconds and the default stack
/// size.
///
/// The caller becomes the initial thread and keeps
/// running.
///
pub fn init(quantum_micros: u64) -> Result<(), Error> {
    init_with_config(Config::from_micros(quantum_micros))
}

/// Initialises the scheduler with the given
/// configuration.
///
/// The caller becomes the initial thread and keeps
/// running. `init_with_config` can only succeed once.
///
pub fn init_with_config(config: Config) -> Result<(), Error> {
    let guard = preempt::mask();
    if is_initialised() {
        return Err(Error::AlreadyInitialised);
    }

    if !config.has_valid_quantum() {
        return Err(Error::InvalidQuantum);
    }

    let context =
        Context::capture().unwrap_or_else(|err| fatal("failed to capture initial context", err));

    {
        let mut scheduler = SCHEDULER.lock();
        let id = scheduler.allocate_id();
        scheduler.start(
            Box::new(Thread::new_initial(id, context)),
            config.stack_size(),
        );
    }

    INITIALISED.store(true, Ordering::Relaxed);

    // The handler must be in place before the first
    // signal can arrive.
    preempt::install_handler(scheduler::handle_preemption)
        .unwrap_or_else(|err| fatal("failed to install preemption handler", err));
    preempt::timer::arm(config.quantum())
        .unwrap_or_else(|err| fatal("failed to arm virtual timer", err));

    log::debug!(
        "scheduler initialised: {}us quantum, {} byte stacks",
        config.quantum().as_micros(),
        config.stack_size()
    );

    // Preemption starts now, even if the caller had
    // blocked it beforehand.
    drop(guard);
    preempt::unmask();

    Ok(())
}
