// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Configures the scheduler: the quantum between preemption signals and
//! the size of each new thread's stack.

use crate::thread::stacks::page_size;
use std::time::Duration;

/// The quantum used when none is given.
///
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(50);

/// The number of pages in each new thread's stack.
///
/// This does not include the extra page for the stack
/// guard.
///
pub const DEFAULT_STACK_PAGES: usize = 16; // 16 4-KiB pages = 64 KiB.

/// The smallest stack we will hand to a thread.
///
/// The preemption signal is delivered on the stack of the
/// interrupted thread, so every stack must have room for
/// a signal frame on top of the thread's own frames.
///
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Describes how the scheduler should behave.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    quantum: Duration,
    stack_size: usize,
}

impl Config {
    /// Returns a configuration with the given quantum and
    /// the default stack size.
    ///
    pub fn new(quantum: Duration) -> Self {
        Config {
            quantum,
            stack_size: DEFAULT_STACK_PAGES * page_size(),
        }
    }

    /// Returns a configuration with a quantum of `micros`
    /// microseconds.
    ///
    pub fn from_micros(micros: u64) -> Self {
        Config::new(Duration::from_micros(micros))
    }

    /// Sets the number of bytes in each new thread's stack.
    ///
    /// The size is rounded up to a whole number of pages
    /// and raised to the larger of [`MIN_STACK_SIZE`] and
    /// the platform's canonical signal stack size.
    ///
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Returns the scheduling quantum.
    ///
    pub fn quantum(&self) -> Duration {
        self.quantum
    }

    /// Returns whether the quantum is long enough to arm
    /// the virtual timer.
    ///
    pub fn has_valid_quantum(&self) -> bool {
        self.quantum.as_micros() > 0
    }

    /// Returns the number of bytes that will be allocated
    /// for each new thread's stack, excluding the guard
    /// page.
    ///
    pub fn stack_size(&self) -> usize {
        let page = page_size();
        let bytes = self.stack_size.max(MIN_STACK_SIZE).max(libc::SIGSTKSZ);
        bytes.div_ceil(page) * page
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(DEFAULT_QUANTUM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.quantum(), DEFAULT_QUANTUM);
        assert!(config.has_valid_quantum());
        assert_eq!(config.stack_size(), DEFAULT_STACK_PAGES * page_size());
    }

    #[test]
    fn quantum_from_micros() {
        let config = Config::from_micros(1000);
        assert_eq!(config.quantum(), Duration::from_millis(1));
        assert!(!Config::from_micros(0).has_valid_quantum());
        assert!(!Config::new(Duration::from_nanos(10)).has_valid_quantum());
    }

    #[test]
    fn stack_size_is_rounded_and_clamped() {
        let page = page_size();
        let config = Config::default().with_stack_size(1);
        assert_eq!(config.stack_size() % page, 0);
        assert!(config.stack_size() >= MIN_STACK_SIZE);
        assert!(config.stack_size() >= libc::SIGSTKSZ);

        let config = Config::default().with_stack_size(1024 * 1024 + 1);
        assert_eq!(config.stack_size(), 1024 * 1024 + page);
    }
}
