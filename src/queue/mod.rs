//! # Static Queues
//!
//! Fixed-capacity, allocation-free ring buffers for passing values between
//! tasks of different priority without claiming a resource.
//!
//! - [`Queue`] is single-producer/single-consumer. [`Queue::split`] hands
//!   out a [`Producer`] and a [`Consumer`] that each own one index, so an
//!   interrupt handler and a lower-priority task can share it lock-free.
//! - [`MpscQueue`] accepts producers at any number of priorities. Producers
//!   reserve a slot with a compare-and-swap, so a preempted producer never
//!   blocks one that preempts it.
//!
//! Neither queue ever overwrites or silently drops: a saturated queue
//! returns [`Full`] with the rejected value, and the call site decides
//! whether to drop it, retry later or report it.

use core::fmt;

mod mpsc;
mod spsc;

pub use mpsc::MpscQueue;
pub use spsc::{Consumer, Producer, Queue};

/// Returned by `enqueue` when every slot is occupied. Carries the value
/// that could not be stored.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Full<T>(pub T);

impl<T> Full<T> {
    /// Recover the rejected value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Full(..)")
    }
}

impl<T> fmt::Display for Full<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}
