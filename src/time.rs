//! # Monotonic Time
//!
//! Tick-based time kept by the kernel (advanced from SysTick) and the
//! fixed-capacity timer queue behind `spawn_after` and periodic tasks.

use core::ops::{Add, Sub};

use heapless::binary_heap::{BinaryHeap, Min};

use crate::config::{TICK_HZ, TIMER_QUEUE_CAPACITY};
use crate::task::TaskId;

/// A point on the kernel's monotonic clock, in ticks since start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Instant(u64);

impl Instant {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, saturating at zero.
    #[inline]
    pub const fn duration_since(self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

/// A span of kernel ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Convert milliseconds to ticks at `TICK_HZ`, rounding up so a
    /// non-zero delay never becomes zero ticks.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self((ms * TICK_HZ as u64 + 999) / 1000)
    }

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant(self.0.wrapping_add(rhs.0))
    }
}

impl Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.duration_since(rhs)
    }
}

// ---------------------------------------------------------------------------
// Timer queue
// ---------------------------------------------------------------------------

/// One armed release. Ordered by deadline, then by arming order so two
/// timers due on the same tick fire in the order they were armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timer {
    pub at: Instant,
    seq: u32,
    pub task: TaskId,
    /// Link in a task's periodic chain, re-armed when it fires. One-shot
    /// delays never are.
    pub periodic: bool,
}

/// Min-heap of pending releases. Not synchronized: the kernel keeps it
/// inside a critical-section mutex.
pub struct TimerQueue {
    heap: BinaryHeap<Timer, Min, TIMER_QUEUE_CAPACITY>,
    seq: u32,
}

impl TimerQueue {
    pub const fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            seq: 0,
        }
    }

    /// Arm a one-shot release of `task` at `at`. Returns the task back if
    /// full.
    pub fn schedule(&mut self, at: Instant, task: TaskId) -> Result<(), TaskId> {
        self.arm(at, task, false)
    }

    /// Arm the next release of a periodic chain.
    pub fn schedule_periodic(&mut self, at: Instant, task: TaskId) -> Result<(), TaskId> {
        self.arm(at, task, true)
    }

    fn arm(&mut self, at: Instant, task: TaskId, periodic: bool) -> Result<(), TaskId> {
        let timer = Timer {
            at,
            seq: self.seq,
            task,
            periodic,
        };
        self.heap.push(timer).map_err(|t| t.task)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    /// Remove and return the earliest timer if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        match self.heap.peek() {
            Some(timer) if timer.at <= now => self.heap.pop(),
            _ => None,
        }
    }

    /// Deadline of the earliest armed timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|t| t.at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}
