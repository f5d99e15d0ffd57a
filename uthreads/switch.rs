// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! switch contains the functionality to switch between threads.
//!
//! Each thread's machine state is kept in a [`Context`], which wraps the
//! host's `ucontext_t`. Contexts are captured and built with the host's
//! `getcontext` and `makecontext`, then swapped with [`switch_stack`] or
//! installed outright with [`replace_stack`].
//!
//! A saved context includes the signal mask. Every switch happens with the
//! preemption signal blocked, so every saved context has it blocked too,
//! and a resumed thread unblocks it itself once it leaves the critical
//! section it was switched out from.

use crate::thread::stacks::Stack;
use std::{io, mem, ptr};

/// Represents the entry point of a newly built context.
///
/// The entry point must never return, as the context has
/// no successor.
///
pub type EntryPoint = extern "C" fn();

/// A thread's saved machine state, plus the stack it runs
/// on.
///
pub struct Context {
    // The saved registers and signal mask. This is
    // boxed, as glibc stores a pointer into the
    // context within the context itself, so it must
    // never move once captured.
    registers: Box<libc::ucontext_t>,

    // The thread's stack. The initial thread runs on
    // the host's stack, so has none.
    stack: Option<Stack>,
}

// Context is not thread-safe by default, as the
// saved machine state contains raw pointers.
// However, contexts are only ever saved and
// restored by the single host thread that runs
// every user thread, so we tell Rust this is fine
// by implementing the Send trait.
//
unsafe impl Send for Context {}

impl Context {
    /// Returns a zeroed context, ready to be captured.
    ///
    fn empty() -> Box<libc::ucontext_t> {
        // Safety: ucontext_t is plain data, for which
        // all zeroes is a valid (if meaningless) value.
        Box::new(unsafe { mem::zeroed() })
    }

    /// Captures the calling thread's machine state, using
    /// the host's stack.
    ///
    /// This is used for the initial thread, whose state is
    /// then overwritten each time it is switched out.
    ///
    pub fn capture() -> io::Result<Context> {
        let mut registers = Context::empty();
        if unsafe { libc::getcontext(&mut *registers) } != 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Context {
            registers,
            stack: None,
        })
    }

    /// Builds a new context which, when first installed,
    /// starts executing `entry_point` at the top of `stack`.
    ///
    /// The new context inherits the caller's signal mask.
    ///
    pub fn new(stack: Stack, entry_point: EntryPoint) -> io::Result<Context> {
        let mut registers = Context::empty();
        if unsafe { libc::getcontext(&mut *registers) } != 0 {
            return Err(io::Error::last_os_error());
        }

        registers.uc_stack.ss_sp = stack.start() as *mut libc::c_void;
        registers.uc_stack.ss_size = stack.size();
        registers.uc_stack.ss_flags = 0;
        registers.uc_link = ptr::null_mut();

        unsafe { libc::makecontext(&mut *registers, entry_point, 0) };

        Ok(Context {
            registers,
            stack: Some(stack),
        })
    }

    /// Returns a pointer to the saved machine state.
    ///
    /// The pointer remains valid for as long as the
    /// context exists, even if the context is moved.
    ///
    pub fn registers(&mut self) -> *mut libc::ucontext_t {
        &mut *self.registers
    }

    /// Returns the context's stack, if it has its own.
    ///
    pub fn stack(&self) -> Option<&Stack> {
        self.stack.as_ref()
    }

    /// Discards the saved machine state, returning the
    /// context's stack, if any.
    ///
    pub fn into_stack(self) -> Option<Stack> {
        self.stack
    }
}

/// switch_stack saves the current machine state into
/// `current` and installs `next`. It returns once another
/// thread switches back to `current`.
///
/// # Safety
///
/// Both pointers must refer to live contexts, and `next`
/// must either have been built by [`Context::new`] or
/// saved by an earlier switch. The preemption signal must
/// be blocked.
///
pub unsafe fn switch_stack(current: *mut libc::ucontext_t, next: *const libc::ucontext_t) {
    if libc::swapcontext(current, next) != 0 {
        // swapcontext only fails if it cannot save the
        // current state, in which case nothing has
        // changed and we simply keep running.
        log::error!("failed to switch context: {}", io::Error::last_os_error());
    }
}

/// replace_stack installs `next` without saving the
/// current machine state. It is used by exiting threads,
/// whose stacks are about to be released.
///
/// # Safety
///
/// `next` must refer to a live context, as for
/// [`switch_stack`], and nothing on the current stack
/// may be needed again.
///
pub unsafe fn replace_stack(next: *const libc::ucontext_t) -> ! {
    libc::setcontext(next);

    // setcontext only returns on failure, at which
    // point the calling thread has nowhere to go.
    log::error!("failed to install context: {}", io::Error::last_os_error());
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::stacks::page_size;

    extern "C" fn never_run() {
        std::process::abort();
    }

    #[test]
    fn captured_context_has_no_stack() {
        let mut context = Context::capture().expect("failed to capture context");
        assert!(context.stack().is_none());
        assert!(!context.registers().is_null());
        assert!(context.into_stack().is_none());
    }

    #[test]
    fn built_context_uses_its_stack() {
        let stack = Stack::new(4 * page_size()).expect("failed to map stack");
        let start = stack.start() as usize;
        let size = stack.size();
        let mut context = Context::new(stack, never_run).expect("failed to build context");

        let registers = context.registers();
        unsafe {
            assert_eq!((*registers).uc_stack.ss_sp as usize, start);
            assert_eq!((*registers).uc_stack.ss_size, size);
            assert!((*registers).uc_link.is_null());
        }

        // Moving the context must not move the
        // saved state.
        let moved = context;
        let mut boxed = Box::new(moved);
        assert_eq!(boxed.registers(), registers);

        let stack = boxed.into_stack().expect("context lost its stack");
        assert_eq!(stack.start() as usize, start);
    }
}
