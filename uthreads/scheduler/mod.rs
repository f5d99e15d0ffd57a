// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements a simple round robin scheduler for threads.
//!
//! ## Initialisation
//!
//! The scheduler does not start preempting the running thread until
//! [`init`](crate::init) has been called, at which point the caller
//! becomes the initial thread and the preemption signal starts arriving
//! once per quantum.
//!
//! ## Thread switching
//!
//! [`yield_now`] can be called to proactively switch to the next ready
//! thread. The preemption signal handler does the same thing whenever the
//! running thread's quantum expires.
//!
//! ## Bookkeeping
//!
//! Every thread is always in exactly one of three places: it is the current
//! thread, it is waiting in the ready queue, or it has terminated and sits
//! in the zombie queue, where it stays so that it can still be joined.

use crate::switch::switch_stack;
use crate::thread::stacks::Stack;
use crate::thread::{ExitStatus, Thread, ThreadId, ThreadState};
use crate::{Error, SCHEDULER};
use std::collections::VecDeque;

/// Scheduler is a basic thread scheduler.
///
/// Currently, it implements a round-robin algorithm.
///
pub(crate) struct Scheduler {
    // Threads waiting to run, in order.
    ready: VecDeque<Box<Thread>>,

    // Threads that have finished or been cancelled.
    zombies: VecDeque<Box<Thread>>,

    // The thread currently executing.
    current: Option<Box<Thread>>,

    // Stacks of exited threads, waiting to be
    // unmapped by the next thread to resume.
    retired: Vec<Stack>,

    // The id the next thread will be given.
    next_id: u64,

    // The number of bytes in each new stack.
    stack_size: usize,
}

impl Scheduler {
    pub const fn new() -> Scheduler {
        Scheduler {
            ready: VecDeque::new(),
            zombies: VecDeque::new(),
            current: None,
            retired: Vec::new(),
            next_id: ThreadId::INITIAL.as_u64(),
            stack_size: 0,
        }
    }

    /// start resets the scheduler, making `initial` the
    /// current thread.
    ///
    pub fn start(&mut self, initial: Box<Thread>, stack_size: usize) {
        self.ready.clear();
        self.zombies.clear();
        self.retired.clear();
        self.current = Some(initial);
        self.stack_size = stack_size;
    }

    /// allocate_id returns the next thread id.
    ///
    pub fn allocate_id(&mut self) -> ThreadId {
        let id = ThreadId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// stack_size returns the size of each new thread's
    /// stack.
    ///
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// add queues a thread onto the ready queue.
    ///
    pub fn add(&mut self, thread: Box<Thread>) {
        self.ready.push_back(thread);
    }

    /// ready_is_empty returns whether no other thread is
    /// waiting to run.
    ///
    pub fn ready_is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// current_id returns the id of the current thread,
    /// or NONE.
    ///
    pub fn current_id(&self) -> ThreadId {
        self.current.as_ref().map_or(ThreadId::NONE, |thread| thread.id())
    }

    pub fn current_mut(&mut self) -> Option<&mut Thread> {
        self.current.as_deref_mut()
    }

    /// find returns the thread with the given id, if it
    /// is waiting to run or has terminated.
    ///
    fn find(&self, id: ThreadId) -> Option<&Thread> {
        self.ready
            .iter()
            .chain(self.zombies.iter())
            .find(|thread| thread.id() == id)
            .map(|thread| &**thread)
    }

    /// is_running returns whether the thread with the
    /// given id exists and has not terminated.
    ///
    pub fn is_running(&self, id: ThreadId) -> bool {
        if self.current_id() == id {
            return true;
        }

        self.find(id)
            .map_or(false, |thread| thread.state() == ThreadState::Running)
    }

    /// pop_runnable pops the next thread able to run.
    ///
    /// Any terminated threads found at the front of the
    /// ready queue are moved to the zombie queue.
    ///
    fn pop_runnable(&mut self) -> Option<Box<Thread>> {
        while let Some(thread) = self.ready.pop_front() {
            if thread.is_runnable() {
                return Some(thread);
            }

            self.zombies.push_back(thread);
        }

        None
    }

    /// rotate moves the current thread to the back of the
    /// ready queue and makes the next ready thread current.
    ///
    /// It returns where to save the outgoing thread's
    /// state and where to load the incoming thread's state
    /// from, or None if there is no other thread to run.
    ///
    /// rotate does not allocate, as the ready queue ends up
    /// no longer than it started.
    ///
    pub fn rotate(&mut self) -> Option<(*mut libc::ucontext_t, *const libc::ucontext_t)> {
        let save = self.current.as_mut()?.registers()?;
        let mut next = self.pop_runnable()?;
        let load = match next.registers() {
            Some(load) => load as *const libc::ucontext_t,
            None => {
                self.zombies.push_back(next);
                return None;
            }
        };

        next.set_state(ThreadState::Running);
        if let Some(current) = self.current.replace(next) {
            self.ready.push_back(current);
        }

        Some((save, load))
    }

    /// retire_current marks the current thread as done
    /// with `value` and makes the next ready thread
    /// current.
    ///
    /// The outgoing thread's stack is kept until [`reap`](Self::reap)
    /// is next called, as the thread is still running on
    /// it. retire_current returns where to load the
    /// incoming thread's state from, or None, with nothing
    /// changed, if there is no other thread to run.
    ///
    pub fn retire_current(&mut self, value: usize) -> Option<*const libc::ucontext_t> {
        self.current.as_ref()?;
        let mut next = self.pop_runnable()?;
        let load = match next.registers() {
            Some(load) => load as *const libc::ucontext_t,
            None => {
                self.zombies.push_back(next);
                return None;
            }
        };

        next.set_state(ThreadState::Running);
        if let Some(mut current) = self.current.replace(next) {
            if let Some(stack) = current.finish(value) {
                self.retired.push(stack);
            }

            self.zombies.push_back(current);
        }

        Some(load)
    }

    /// reap unmaps the stacks of threads that have exited.
    ///
    /// This must only be called once the exited threads
    /// are no longer running.
    ///
    pub fn reap(&mut self) {
        // Pop rather than drain, so the list keeps its
        // allocation.
        while let Some(stack) = self.retired.pop() {
            drop(stack);
        }
    }

    /// cancel cancels the thread with the given id, which
    /// must not be the current thread.
    ///
    /// The thread is removed from the ready queue and its
    /// stack unmapped at once.
    ///
    pub fn cancel(&mut self, id: ThreadId) -> Result<(), Error> {
        let index = match self.ready.iter().position(|thread| thread.id() == id) {
            Some(index) => index,
            None => {
                return match self.find(id) {
                    Some(_) => Err(Error::AlreadyTerminated(id)),
                    None => Err(Error::UnknownThread(id)),
                };
            }
        };

        if self.ready[index].state() != ThreadState::Running {
            return Err(Error::AlreadyTerminated(id));
        }

        if let Some(mut thread) = self.ready.remove(index) {
            thread.cancel();
            self.zombies.push_back(thread);
        }

        Ok(())
    }

    /// begin_join records that the current thread is
    /// waiting for the thread with the given id.
    ///
    pub fn begin_join(&mut self, id: ThreadId) -> Result<(), Error> {
        let current = self.current_id();
        if id == current {
            return Err(Error::SelfJoin(id));
        }

        let target = self.find(id).ok_or(Error::UnknownThread(id))?;
        if target.joining() == current {
            return Err(Error::ReciprocalJoin(id));
        }

        if let Some(thread) = self.current_mut() {
            thread.set_joining(id);
        }

        Ok(())
    }

    /// end_join clears the current thread's join and
    /// returns how the thread with the given id finished.
    ///
    pub fn end_join(&mut self, id: ThreadId) -> Result<ExitStatus, Error> {
        if let Some(thread) = self.current_mut() {
            thread.set_joining(ThreadId::NONE);
        }

        self.find(id)
            .and_then(Thread::exit_status)
            .ok_or(Error::UnknownThread(id))
    }

    /// debug logs the state of every thread.
    ///
    pub fn debug(&self) {
        let threads = self
            .current
            .iter()
            .chain(self.ready.iter())
            .chain(self.zombies.iter());

        for thread in threads {
            thread.debug();
        }

        if !self.retired.is_empty() {
            log::info!("{} retired stacks awaiting release", self.retired.len());
        }
    }
}

/// Schedules out the current thread and switches to the
/// next ready thread.
///
/// If no other threads are ready to run, `switch` returns
/// immediately. `switch` blocks preemption for its
/// duration, so the outgoing thread's state is saved with
/// preemption blocked and the thread unblocks it again
/// only once it has resumed.
///
pub(crate) fn switch() {
    let _guard = preempt::mask();
    let (save, load) = {
        let mut scheduler = SCHEDULER.lock();
        match scheduler.rotate() {
            Some(contexts) => contexts,
            None => return,
        }
    };

    // Safety: both contexts belong to live threads,
    // and their registers are boxed, so they have not
    // moved since rotate returned them.
    unsafe { switch_stack(save, load) };

    // We have been switched back to. The thread we
    // switched from may have exited.
    SCHEDULER.lock().reap();
}

/// Gives up the rest of the current thread's quantum,
/// moving it to the back of the ready queue.
///
/// If no other thread is ready to run, `yield_now`
/// returns immediately.
///
pub fn yield_now() {
    switch();
}

/// Handles the preemption signal, switching to the next
/// ready thread.
///
/// The handler neither allocates nor logs, as the
/// interrupted thread may be part-way through doing
/// either.
///
pub(crate) extern "C" fn handle_preemption(_signal: libc::c_int) {
    // The next thread may change errno before we
    // are resumed.
    let errno = unsafe { *libc::__errno_location() };
    switch();
    unsafe { *libc::__errno_location() = errno };
}
