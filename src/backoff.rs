//! Backoff for the `get` retry loop.
//!
//! A retry only happens while another thread is inside `Entry::release`,
//! which holds the entry lock for a constant-size critical section. Spinning
//! briefly usually covers it; after that the thread yields so a descheduled
//! releaser can finish.

use std::hint;
use std::thread;

const SPIN_LIMIT: u32 = 6;

#[derive(Debug, Default)]
pub(crate) struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `snooze` has been called.
    pub fn attempts(&self) -> u32 {
        self.step
    }

    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                hint::spin_loop();
            }
        } else {
            thread::yield_now();
        }
        self.step = self.step.saturating_add(1);
    }
}
