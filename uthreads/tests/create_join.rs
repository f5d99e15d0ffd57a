// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

use uthreads::{Error, ExitStatus, ThreadId};

fn add_one(arg: usize) -> usize {
    arg + 1
}

fn finish_early(arg: usize) -> usize {
    leave(arg);
}

fn leave(value: usize) -> ! {
    uthreads::exit(value)
}

fn whoami(_arg: usize) -> usize {
    uthreads::current_id().as_u64() as usize
}

fn main() {
    let _ = env_logger::try_init();

    // Nothing works until the scheduler is running.
    assert_eq!(uthreads::current_id(), ThreadId::NONE);
    assert!(!uthreads::is_initialised());
    assert_eq!(uthreads::create(add_one, 0), Err(Error::Uninitialised));
    assert_eq!(uthreads::init(0), Err(Error::InvalidQuantum));

    uthreads::init(50_000).expect("failed to initialise scheduler");
    assert!(uthreads::is_initialised());
    assert_eq!(uthreads::init(50_000), Err(Error::AlreadyInitialised));

    let me = uthreads::current_id();
    assert_eq!(me, ThreadId::INITIAL);
    assert!(uthreads::equal(me, uthreads::current_id()));

    // Create, join, return.
    let id = uthreads::create(add_one, 41).expect("failed to create thread");
    assert_eq!(id, ThreadId::new(2));
    assert!(!uthreads::equal(me, id));
    assert_eq!(uthreads::join(id), Ok(ExitStatus::Returned(42)));

    // Joining again gives the same result.
    assert_eq!(uthreads::join(id), Ok(ExitStatus::Returned(42)));

    // The finished thread's stack is gone.
    assert_eq!(uthreads::live_stacks(), 0);

    // Failed operations.
    assert_eq!(uthreads::join(me), Err(Error::SelfJoin(me)));
    let unknown = ThreadId::new(99);
    assert_eq!(uthreads::join(unknown), Err(Error::UnknownThread(unknown)));
    assert_eq!(uthreads::cancel(unknown), Err(Error::UnknownThread(unknown)));
    assert_eq!(uthreads::cancel(id), Err(Error::AlreadyTerminated(id)));

    // Explicit exit from deeper in the stack.
    let early = uthreads::create(finish_early, 7).expect("failed to create thread");
    assert_eq!(uthreads::join(early), Ok(ExitStatus::Returned(7)));

    // Threads see their own id.
    let who = uthreads::create(whoami, 0).expect("failed to create thread");
    assert_eq!(uthreads::join(who), Ok(ExitStatus::Returned(who.as_u64() as usize)));

    // Ids are never reused.
    assert_eq!(early, ThreadId::new(3));
    assert_eq!(who, ThreadId::new(4));
    assert_eq!(uthreads::live_stacks(), 0);

    uthreads::without_preemption(|| println!("create_join: ok"));
}
