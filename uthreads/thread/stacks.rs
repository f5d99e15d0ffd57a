// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Includes helpers and state for managing the stacks used by created
//! threads.
//!
//! The initial thread runs on the stack given to it by the host. Each
//! subsequent thread is given its own stack by calling [`Stack::new`],
//! which maps the stack along with a guard page below it, so that a stack
//! overflow faults instead of silently corrupting a neighbouring mapping.
//! The stack is unmapped when the [`Stack`] is dropped.
//!
//! [`live_stacks`] reports how many stacks are currently mapped.

use lazy_static::lazy_static;
use std::io;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

lazy_static! {
    /// PAGE_SIZE is the host's page size, in bytes.
    ///
    static ref PAGE_SIZE: usize = {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            size as usize
        } else {
            4096
        }
    };
}

/// Returns the host's page size, in bytes.
///
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// LIVE_STACKS counts the stacks that have been mapped
/// but not yet unmapped.
///
static LIVE_STACKS: AtomicUsize = AtomicUsize::new(0);

/// Returns the number of thread stacks currently mapped.
///
pub fn live_stacks() -> usize {
    LIVE_STACKS.load(Ordering::Relaxed)
}

/// A thread's stack, plus the guard page beneath it.
///
#[derive(Debug)]
pub struct Stack {
    // The start of the mapping, which is the
    // guard page.
    mapping: NonNull<u8>,

    // The length of the mapping, including the
    // guard page.
    mapping_len: usize,
}

// Stack is not thread-safe by default, as it holds
// a raw pointer. However, the memory it refers to
// is owned exclusively by the Stack and is only
// touched by the single host thread that runs every
// user thread, so we tell Rust this is fine by
// implementing the Send trait.
//
unsafe impl Send for Stack {}

impl Stack {
    /// Maps a new stack of `size` bytes, rounded up to a
    /// whole number of pages, with a guard page below it.
    ///
    pub fn new(size: usize) -> io::Result<Stack> {
        let page = page_size();
        let size = size.max(1).div_ceil(page) * page;
        let mapping_len = size + page;

        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // The stack grows downwards, so the guard goes
        // at the lowest address.
        if unsafe { libc::mprotect(addr, page, libc::PROT_NONE) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::munmap(addr, mapping_len) };
            return Err(err);
        }

        let mapping = match NonNull::new(addr as *mut u8) {
            Some(mapping) => mapping,
            None => return Err(io::Error::from(io::ErrorKind::OutOfMemory)),
        };

        LIVE_STACKS.fetch_add(1, Ordering::Relaxed);

        Ok(Stack {
            mapping,
            mapping_len,
        })
    }

    /// Returns the smallest usable address in the stack.
    /// As the stack grows downwards, this is also known as
    /// the bottom of the stack.
    ///
    pub fn start(&self) -> *mut u8 {
        unsafe { self.mapping.as_ptr().add(page_size()) }
    }

    /// Returns the address just past the top of the stack.
    ///
    pub fn end(&self) -> *mut u8 {
        unsafe { self.mapping.as_ptr().add(self.mapping_len) }
    }

    /// Returns the number of usable bytes in the stack,
    /// excluding the guard page.
    ///
    pub fn size(&self) -> usize {
        self.mapping_len - page_size()
    }

    /// Returns whether the usable part of the stack includes
    /// the given address.
    ///
    #[cfg(test)]
    pub fn contains(&self, addr: usize) -> bool {
        (self.start() as usize) <= addr && addr < (self.end() as usize)
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let ret = unsafe {
            libc::munmap(
                self.mapping.as_ptr() as *mut libc::c_void,
                self.mapping_len,
            )
        };
        if ret != 0 {
            log::error!(
                "failed to unmap stack at {:p}: {}",
                self.mapping,
                io::Error::last_os_error()
            );
        }

        LIVE_STACKS.fetch_sub(1, Ordering::Relaxed);
    }
}
