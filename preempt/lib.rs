// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Provides the preemption source for user-level threads: a periodic
//! virtual-time signal, its handler, and the mask used to build critical
//! sections.
//!
//! ## Preemption signal
//!
//! Preemption is driven by [`PREEMPT_SIGNAL`] (`SIGVTALRM`), which the
//! kernel delivers each time the process has consumed a quantum of user
//! CPU time. The timer is armed with [`timer::arm`] and the handler is
//! installed with [`install_handler`].
//!
//! ## Critical sections
//!
//! Shared scheduler state must only be touched while the preemption signal
//! is blocked. [`mask`] blocks the signal and returns a [`MaskGuard`] that
//! unblocks it again when dropped, unless it was already blocked when the
//! guard was created. [`without_preemption`] wraps the same behaviour
//! around a closure, in the same way that `without_interrupts` does for
//! hardware interrupts.
//!
//! # Examples
//!
//! ```
//! let total = preempt::without_preemption(|| 40 + 2);
//! assert_eq!(total, 42);
//! ```

#![deny(clippy::missing_panics_doc)]
#![deny(clippy::return_self_not_must_use)]
#![deny(clippy::single_char_lifetime_names)]
#![deny(clippy::wildcard_imports)]

mod mask;
pub mod timer;

pub use mask::{is_masked, mask, unmask, without_preemption, MaskGuard};

use std::{io, mem, ptr};

/// The signal used to preempt the running thread.
///
pub const PREEMPT_SIGNAL: libc::c_int = libc::SIGVTALRM;

/// Represents a preemption signal handler.
///
/// The handler runs on the stack of whichever thread was
/// interrupted, with the preemption signal already blocked.
///
pub type Handler = extern "C" fn(signal: libc::c_int);

/// Installs `handler` as the action for [`PREEMPT_SIGNAL`].
///
/// Interrupted system calls are restarted once the handler
/// returns, so threads that happen to be preempted in the
/// middle of a blocking call are not disturbed by it.
///
pub fn install_handler(handler: Handler) -> io::Result<()> {
    // Safety: an all-zero sigaction is a valid starting
    // point; every field we rely on is set below.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = handler as libc::sighandler_t;
    action.sa_flags = libc::SA_RESTART;

    let ret = unsafe {
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(PREEMPT_SIGNAL, &action, ptr::null_mut())
    };

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    log::debug!("installed preemption handler for signal {}", PREEMPT_SIGNAL);
    Ok(())
}
