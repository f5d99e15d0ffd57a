// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Arms the virtual-time interval timer that drives preemption.
//!
//! The timer counts only the CPU time the process spends in user mode, so
//! a process that is blocked or descheduled by the host kernel does not
//! accumulate quanta.

use std::time::Duration;
use std::{io, ptr};

/// Converts a duration to the host's `timeval`,
/// truncating to whole microseconds.
///
fn to_timeval(duration: Duration) -> libc::timeval {
    libc::timeval {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_usec: duration.subsec_micros() as libc::suseconds_t,
    }
}

fn set(initial: Duration, reload: Duration) -> io::Result<()> {
    let timer = libc::itimerval {
        it_interval: to_timeval(reload),
        it_value: to_timeval(initial),
    };

    let ret = unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, ptr::null_mut()) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Arms the virtual timer so that the preemption signal
/// is first delivered after `quantum` and every `quantum`
/// thereafter.
///
/// A quantum shorter than one microsecond disarms the
/// timer instead.
///
pub fn arm(quantum: Duration) -> io::Result<()> {
    set(quantum, quantum)?;
    log::debug!("armed virtual timer with a {}us quantum", quantum.as_micros());
    Ok(())
}

/// Stops the virtual timer. No further preemption
/// signals are generated until it is armed again.
///
pub fn disarm() -> io::Result<()> {
    set(Duration::ZERO, Duration::ZERO)
}
