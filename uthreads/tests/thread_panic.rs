// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A panic in a thread routine cannot unwind past the thread's first
//! frame, so it must abort the whole process.
//!
//! The test runs the panicking thread in a child copy of this binary and
//! checks how the child ended.

use std::env;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;

const CHILD: &str = "UTHREADS_THREAD_PANIC_CHILD";

const JOINED: &str = "joined panicking thread";

fn explode(arg: usize) -> usize {
    if arg > 0 {
        panic!("thread routine failed with {}", arg);
    }

    arg
}

fn child() {
    uthreads::init(50_000).expect("failed to initialise scheduler");
    let id = uthreads::create(explode, 3).expect("failed to create thread");
    let status = uthreads::join(id);
    uthreads::without_preemption(|| println!("{}: {:?}", JOINED, status));
}

fn main() {
    let _ = env_logger::try_init();
    if env::var_os(CHILD).is_some() {
        child();
        return;
    }

    let exe = env::current_exe().expect("failed to find test binary");
    let output = Command::new(exe)
        .env(CHILD, "1")
        .output()
        .expect("failed to run child");

    assert_eq!(
        output.status.signal(),
        Some(libc::SIGABRT),
        "child ended with {}",
        output.status
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains(JOINED), "child survived the panic: {}", stdout);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("thread routine failed with 3"), "{}", stderr);

    println!("thread_panic: ok");
}
