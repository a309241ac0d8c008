//! # Errors
//!
//! Only expected conditions are values. Broken invariants (registering
//! after start, claiming a held resource, releasing claims out of order)
//! panic instead; see the kernel documentation.

use core::fmt;

use crate::resource::ResourceId;
use crate::task::{Priority, TaskId, Vector};

/// A registration table inconsistency. Any of these makes
/// [`Kernel::start`](crate::kernel::Kernel::start) refuse to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// `MAX_TASKS` tasks are already registered.
    TableFull,
    /// Task priority is 0 (reserved for idle) or above `MAX_PRIORITY`.
    InvalidPriority(Priority),
    /// Interrupt line outside `0..MAX_VECTORS`.
    InvalidVector(Vector),
    /// Interrupt line already bound to a task or dispatcher.
    DuplicateVector(Vector),
    /// More than `MAX_DISPATCHERS` dispatcher lines donated.
    TooManyDispatchers,
    /// Software tasks exist at this level but no dispatcher line is left.
    MissingDispatcher(Priority),
    /// A stored ceiling differs from the maximum priority of its accessors.
    CeilingMismatch(ResourceId),
    /// More periodic tasks than the timer queue can hold.
    TimerCapacity,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::TableFull => f.write_str("task table is full"),
            RegistryError::InvalidPriority(p) => write!(f, "invalid task priority {}", p),
            RegistryError::InvalidVector(v) => write!(f, "interrupt line {} out of range", v),
            RegistryError::DuplicateVector(v) => write!(f, "interrupt line {} bound twice", v),
            RegistryError::TooManyDispatchers => f.write_str("too many dispatcher lines"),
            RegistryError::MissingDispatcher(p) => {
                write!(f, "no dispatcher line left for software tasks at {}", p)
            }
            RegistryError::CeilingMismatch(r) => write!(f, "ceiling of {} is inconsistent", r),
            RegistryError::TimerCapacity => f.write_str("periodic tasks exceed timer queue capacity"),
        }
    }
}

/// Why a software task could not be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The task is bound to an interrupt line; pend the line instead.
    NotSoftware(TaskId),
    /// The task is already pending and has not started running yet.
    AlreadyPending(TaskId),
    /// The ready queue of the task's level is saturated.
    QueueFull(TaskId),
    /// No room left in the timer queue.
    TimerQueueFull(TaskId),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotSoftware(t) => write!(f, "task {} is bound to an interrupt", t),
            SpawnError::AlreadyPending(t) => write!(f, "task {} is already pending", t),
            SpawnError::QueueFull(t) => write!(f, "ready queue full for task {}", t),
            SpawnError::TimerQueueFull(t) => write!(f, "timer queue full for task {}", t),
        }
    }
}
