// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use spin::Mutex;

static COUNTER: Mutex<usize> = Mutex::new(0);

fn increment(_arg: usize) -> usize {
    // Give the other threads a turn first, so they
    // all start before any finish.
    uthreads::yield_now();
    uthreads::without_preemption(|| *COUNTER.lock() += 1);
    0
}

extern "C" fn check_counter() {
    let count = *COUNTER.lock();
    if count != 3 {
        eprintln!("main_exit: process ended with counter at {}", count);
        unsafe { libc::_exit(1) };
    }

    println!("main_exit: ok");
}

fn main() {
    let _ = env_logger::try_init();
    uthreads::init(50_000).expect("failed to initialise scheduler");

    // Runs when the process exits, after every thread
    // has finished.
    assert_eq!(unsafe { libc::atexit(check_counter) }, 0);

    for _ in 0..3 {
        uthreads::create(increment, 0).expect("failed to create thread");
    }

    uthreads::exit(0);
}
