// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Cancels the initial thread. The process must then end when the last
//! remaining thread exits, with that thread's exit value.
//!
//! The scheduler ends the process itself, so the test runs the scenario
//! in a child copy of this binary and checks how the child ended.

use std::env;
use std::process::{self, Command};
use uthreads::{Error, ThreadId};

const CHILD: &str = "UTHREADS_INITIAL_CANCEL_CHILD";

const EXIT_VALUE: usize = 7;

fn cancel_initial(_arg: usize) -> usize {
    assert_eq!(uthreads::cancel(ThreadId::INITIAL), Ok(()));
    assert_eq!(
        uthreads::cancel(ThreadId::INITIAL),
        Err(Error::AlreadyTerminated(ThreadId::INITIAL))
    );

    // Only our own stack is left, as the initial
    // thread runs on the host's stack.
    assert_eq!(uthreads::live_stacks(), 1);

    // There is nobody left to yield to.
    uthreads::yield_now();

    EXIT_VALUE
}

fn child() -> ! {
    uthreads::init(50_000).expect("failed to initialise scheduler");
    uthreads::create(cancel_initial, 0).expect("failed to create thread");
    loop {
        uthreads::yield_now();
    }
}

fn main() {
    let _ = env_logger::try_init();
    if env::var_os(CHILD).is_some() {
        child();
    }

    let exe = env::current_exe().expect("failed to find test binary");
    let status = Command::new(exe)
        .env(CHILD, "1")
        .status()
        .expect("failed to run child");

    if status.code() != Some(EXIT_VALUE as i32) {
        eprintln!("initial_cancel: child ended with {}", status);
        process::exit(1);
    }

    println!("initial_cancel: ok");
}
