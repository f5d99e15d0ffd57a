// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements user-level threads, multiplexed onto the calling host thread.
//!
//! ## Manipulating threads
//!
//! Threads are created and queued for execution with [`create`]. Each
//! thread runs its routine on its own stack until the routine returns, the
//! thread calls [`exit`], or another thread calls [`cancel`] on it. A
//! thread's result can be collected with [`join`], as often as needed.
//!
//! The thread that called [`init`](crate::init) becomes thread
//! [`ThreadId::INITIAL`]. If it exits, the process stays alive until every
//! other thread has finished, then ends with the initial thread's exit
//! value.
//!
//! Calling [`debug`] logs the state of every thread.

pub(crate) mod stacks;

use crate::scheduler;
use crate::switch::{replace_stack, Context};
use crate::{is_initialised, with_scheduler, Error, SCHEDULER};
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::{fmt, io, process};

pub use stacks::live_stacks;

/// The value a cancelled thread yields when joined
/// through an interface that only deals in raw values.
///
/// This has the same bit pattern as `PTHREAD_CANCELED`.
///
pub const CANCELLED: usize = usize::MAX;

/// Uniquely identifies a thread.
///
/// Thread ids are assigned in increasing order and are
/// never reused.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// NONE refers to no thread at all.
    ///
    pub const NONE: Self = ThreadId(0);

    /// INITIAL is the thread that initialised the
    /// scheduler.
    ///
    pub const INITIAL: Self = ThreadId(1);

    /// Returns the thread id with the given numerical
    /// value.
    ///
    pub const fn new(id: u64) -> Self {
        ThreadId(id)
    }

    /// Returns a numerical representation for the thread
    /// ID.
    ///
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes the scheduling state of a thread.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadState {
    /// The thread is running or ready to run.
    Running,

    /// The thread was cancelled by another thread
    /// before it finished.
    Cancelled,

    /// The thread has finished, either by returning
    /// from its routine or by calling [`exit`].
    Done,
}

/// The outcome of a thread, as reported by [`join`].
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// The thread finished with the given value.
    Returned(usize),

    /// The thread was cancelled.
    Cancelled,
}

impl ExitStatus {
    /// Returns the status as a raw value, with a
    /// cancellation represented by [`CANCELLED`].
    ///
    pub const fn into_raw(self) -> usize {
        match self {
            ExitStatus::Returned(value) => value,
            ExitStatus::Cancelled => CANCELLED,
        }
    }
}

/// The routine a thread runs.
///
#[derive(Clone, Copy)]
pub(crate) enum Routine {
    Native(fn(usize) -> usize),
    Foreign(extern "C" fn(*mut c_void) -> *mut c_void),
}

impl Routine {
    fn call(self, arg: usize) -> usize {
        match self {
            Routine::Native(f) => f(arg),
            Routine::Foreign(f) => f(arg as *mut c_void) as usize,
        }
    }
}

/// Contains a thread's scheduling state and the machine
/// state it resumes from.
///
pub(crate) struct Thread {
    id: ThreadId,
    state: ThreadState,

    // The routine and its argument, taken when
    // the thread first runs. The initial thread
    // has none.
    routine: Option<Routine>,
    arg: usize,

    // The value the thread finished with, if
    // it is done.
    retval: usize,

    // The thread this thread is waiting on in
    // join, or NONE.
    joining: ThreadId,

    // The saved machine state. This is released
    // once the thread terminates.
    context: Option<Context>,
}

impl Thread {
    /// Returns the descriptor for the thread that
    /// initialised the scheduler, which runs on the
    /// host's stack.
    ///
    pub fn new_initial(id: ThreadId, context: Context) -> Self {
        Thread {
            id,
            state: ThreadState::Running,
            routine: None,
            arg: 0,
            retval: 0,
            joining: ThreadId::NONE,
            context: Some(context),
        }
    }

    /// Returns the descriptor for a new thread, which
    /// will call `routine` with `arg` when first run.
    ///
    pub fn new(id: ThreadId, routine: Routine, arg: usize, context: Context) -> Self {
        Thread {
            id,
            state: ThreadState::Running,
            routine: Some(routine),
            arg,
            retval: 0,
            joining: ThreadId::NONE,
            context: Some(context),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    pub fn joining(&self) -> ThreadId {
        self.joining
    }

    pub fn set_joining(&mut self, target: ThreadId) {
        self.joining = target;
    }

    /// Returns whether the thread can be switched to.
    ///
    pub fn is_runnable(&self) -> bool {
        self.state == ThreadState::Running && self.context.is_some()
    }

    /// Returns where the thread's machine state is saved,
    /// or None once the thread has terminated.
    ///
    pub fn registers(&mut self) -> Option<*mut libc::ucontext_t> {
        self.context.as_mut().map(Context::registers)
    }

    /// Takes the thread's routine and argument. This
    /// returns None after the first call.
    ///
    pub fn take_routine(&mut self) -> Option<(Routine, usize)> {
        self.routine.take().map(|routine| (routine, self.arg))
    }

    /// Returns the status [`join`] reports for the thread,
    /// or None if it is still running.
    ///
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self.state {
            ThreadState::Running => None,
            ThreadState::Cancelled => Some(ExitStatus::Cancelled),
            ThreadState::Done => Some(ExitStatus::Returned(self.retval)),
        }
    }

    /// Marks the thread as finished with `value`,
    /// releasing its machine state. The thread's stack
    /// is returned, as the thread may still be running
    /// on it.
    ///
    pub fn finish(&mut self, value: usize) -> Option<stacks::Stack> {
        self.state = ThreadState::Done;
        self.retval = value;
        self.joining = ThreadId::NONE;
        self.routine = None;
        self.context.take().and_then(Context::into_stack)
    }

    /// Marks the thread as cancelled, releasing its
    /// machine state and stack.
    ///
    pub fn cancel(&mut self) {
        self.state = ThreadState::Cancelled;
        self.joining = ThreadId::NONE;
        self.routine = None;
        self.context = None;
    }

    /// Logs the thread's state.
    ///
    pub fn debug(&self) {
        let stack = match self.context.as_ref().and_then(Context::stack) {
            Some(stack) => stack,
            None => {
                log::info!(
                    "thread {}: {:?}, joining {}, no stack",
                    self.id,
                    self.state,
                    self.joining
                );
                return;
            }
        };

        log::info!(
            "thread {}: {:?}, joining {}, {} byte stack at {:p}-{:p}",
            self.id,
            self.state,
            self.joining,
            stack.size(),
            stack.start(),
            stack.end()
        );
    }
}

/// Ends the process after every thread has finished.
///
fn terminate(value: usize) -> ! {
    log::debug!("no threads left to run, exiting with status {}", value as i32);
    if let Err(err) = preempt::timer::disarm() {
        log::warn!("failed to disarm virtual timer: {}", err);
    }

    log::logger().flush();
    process::exit(value as i32);
}

/// Ends the process after a host failure the
/// scheduler cannot recover from.
///
pub(crate) fn fatal(what: &str, err: io::Error) -> ! {
    log::error!("{}: {}", what, err);
    eprintln!("uthreads: {}: {}", what, err);
    log::logger().flush();
    process::exit(libc::EXIT_FAILURE);
}

/// Creates a new thread which runs `entry(arg)`, adding
/// it to the back of the ready queue.
///
/// The new thread first runs when the scheduler next
/// switches to it. Its routine's return value becomes
/// the thread's result, exactly as if it had called
/// [`exit`].
///
pub fn create(entry: fn(usize) -> usize, arg: usize) -> Result<ThreadId, Error> {
    spawn(Routine::Native(entry), arg)
}

pub(crate) fn spawn(routine: Routine, arg: usize) -> Result<ThreadId, Error> {
    if !is_initialised() {
        return Err(Error::Uninitialised);
    }

    // The new context inherits the signal mask in
    // force when it is built, so the thread starts
    // with preemption blocked. The trampoline
    // unblocks it.
    let _guard = preempt::mask();
    let stack_size = SCHEDULER.lock().stack_size();
    let stack = stacks::Stack::new(stack_size)
        .unwrap_or_else(|err| fatal("failed to allocate thread stack", err));
    let context = Context::new(stack, trampoline)
        .unwrap_or_else(|err| fatal("failed to build thread context", err));

    let mut scheduler = SCHEDULER.lock();
    let id = scheduler.allocate_id();
    scheduler.add(Box::new(Thread::new(id, routine, arg, context)));
    log::debug!("created thread {} with a {} byte stack", id, stack_size);

    Ok(id)
}

/// Waits for the thread `id` to finish, returning how
/// it finished.
///
/// Joining a thread that has already finished returns
/// immediately, so a thread can be joined any number of
/// times.
///
pub fn join(id: ThreadId) -> Result<ExitStatus, Error> {
    if !is_initialised() {
        return Err(Error::Uninitialised);
    }

    let _guard = preempt::mask();
    SCHEDULER.lock().begin_join(id)?;
    log::trace!("thread {} joining thread {}", current_id(), id);

    // Keep handing over the processor until the
    // target stops running. We resume here with
    // preemption still blocked.
    loop {
        let running = SCHEDULER.lock().is_running(id);
        if !running {
            break;
        }

        scheduler::switch();
    }

    let status = SCHEDULER.lock().end_join(id)?;
    log::trace!("thread {} joined thread {}: {:?}", current_id(), id, status);

    Ok(status)
}

/// Terminates the current thread with `value`, which is
/// reported to any thread that joins it.
///
/// If the current thread is the initial thread, `exit`
/// waits for all other threads to finish, then ends the
/// process with `value` as its exit status. The process
/// also ends if no other thread remains to be run.
///
pub fn exit(value: usize) -> ! {
    // Preemption stays blocked until the next
    // thread resumes with its own mask.
    let _guard = preempt::mask();
    if !is_initialised() {
        terminate(value);
    }

    let current = SCHEDULER.lock().current_id();
    if current == ThreadId::INITIAL {
        log::debug!("initial thread exiting, waiting for remaining threads");
        loop {
            let idle = SCHEDULER.lock().ready_is_empty();
            if idle {
                terminate(value);
            }

            scheduler::switch();
        }
    }

    let next = {
        let mut scheduler = SCHEDULER.lock();
        let next = scheduler.retire_current(value);
        if next.is_some() {
            log::debug!("thread {} exited with {:#x}", current, value);
        }

        next
    };

    match next {
        // Safety: the next thread is current and its
        // context is live. Our own stack is only
        // unmapped once the next thread resumes.
        Some(next) => unsafe { replace_stack(next) },
        None => terminate(value),
    }
}

/// Cancels the thread `id`, which will never run again.
///
/// Cancelling the current thread is the same as calling
/// [`exit`] with a value of 0.
///
pub fn cancel(id: ThreadId) -> Result<(), Error> {
    if !is_initialised() {
        return Err(Error::Uninitialised);
    }

    if id == current_id() {
        exit(0);
    }

    with_scheduler(|scheduler| scheduler.cancel(id))?;
    log::debug!("cancelled thread {}", id);

    Ok(())
}

/// Returns the id of the currently executing thread,
/// or [`ThreadId::NONE`] before the scheduler has been
/// initialised.
///
pub fn current_id() -> ThreadId {
    with_scheduler(|scheduler| scheduler.current_id())
}

/// Returns whether `a` and `b` refer to the same
/// thread.
///
pub fn equal(a: ThreadId, b: ThreadId) -> bool {
    a == b
}

/// Logs debug info about every thread.
///
pub fn debug() {
    with_scheduler(|scheduler| scheduler.debug());
}

/// The entry point of every created thread.
///
/// The thread starts with preemption blocked, as its
/// context was built inside [`spawn`]'s critical
/// section.
///
extern "C" fn trampoline() {
    let mut scheduler = SCHEDULER.lock();
    scheduler.reap();
    let entry = scheduler.current_mut().and_then(Thread::take_routine);
    drop(scheduler);

    let (routine, arg) = match entry {
        Some(entry) => entry,
        None => fatal(
            "thread started without a routine",
            io::Error::from(io::ErrorKind::InvalidInput),
        ),
    };

    preempt::unmask();

    // Unwinding cannot cross into the context that
    // started us, so a panic ends the process.
    let retval = match panic::catch_unwind(AssertUnwindSafe(move || routine.call(arg))) {
        Ok(retval) => retval,
        Err(_) => {
            let _guard = preempt::mask();
            log::error!("thread {} panicked", current_id());
            log::logger().flush();
            process::abort();
        }
    };

    exit(retval);
}
