// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use std::sync::atomic::{AtomicBool, Ordering};
use uthreads::{Error, ExitStatus, CANCELLED};

static STARTED: AtomicBool = AtomicBool::new(false);

fn long_loop(_arg: usize) -> usize {
    STARTED.store(true, Ordering::SeqCst);
    loop {
        uthreads::yield_now();
    }
}

fn main() {
    let _ = env_logger::try_init();
    uthreads::init(50_000).expect("failed to initialise scheduler");

    // Cancel a thread before it ever runs.
    let id = uthreads::create(long_loop, 0).expect("failed to create thread");
    assert_eq!(uthreads::live_stacks(), 1);
    assert_eq!(uthreads::cancel(id), Ok(()));
    assert_eq!(uthreads::live_stacks(), 0);
    assert!(!STARTED.load(Ordering::SeqCst));

    let status = uthreads::join(id).expect("failed to join cancelled thread");
    assert_eq!(status, ExitStatus::Cancelled);
    assert_eq!(status.into_raw(), CANCELLED);

    // The stack was released once, and only once.
    assert_eq!(uthreads::cancel(id), Err(Error::AlreadyTerminated(id)));
    assert_eq!(uthreads::live_stacks(), 0);

    // Cancel a thread that has run and is waiting
    // in the ready queue.
    let id = uthreads::create(long_loop, 0).expect("failed to create thread");
    while !STARTED.load(Ordering::SeqCst) {
        uthreads::yield_now();
    }

    assert_eq!(uthreads::cancel(id), Ok(()));
    assert_eq!(uthreads::join(id), Ok(ExitStatus::Cancelled));
    assert_eq!(uthreads::join(id), Ok(ExitStatus::Cancelled));
    assert_eq!(uthreads::live_stacks(), 0);

    // With nothing left to run, yielding returns at once.
    uthreads::yield_now();

    uthreads::without_preemption(|| println!("cancel: ok"));
}
