//! # Task Model
//!
//! Defines what the registry stores about each task. A task is a
//! run-to-completion handler bound to exactly one trigger source, with a
//! fixed priority and a fixed set of shared resources it may claim.
//!
//! Tasks have no stack of their own: they execute on the interrupt stack
//! of whichever line dispatched them, so preemption is nesting.

use core::fmt;

use crate::arch::Port;
use crate::config::MAX_RESOURCES;
use crate::kernel::Context;
use crate::resource::ResourceId;
use crate::time::Duration;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Logical task priority. Higher is more urgent; 0 is the idle level and
/// cannot be assigned to a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub u8);

impl Priority {
    /// The idle level. A mask at this level masks nothing.
    pub const IDLE: Self = Self(0);

    /// The highest level a task may be registered at.
    pub const MAX: Self = Self(crate::config::MAX_PRIORITY);

    #[inline]
    pub const fn level(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Index of a task in the registry, handed out by
/// [`Kernel::register`](crate::kernel::Kernel::register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A device interrupt line (IRQ number, not exception number).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Vector(pub u16);

impl Vector {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IRQ{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Trigger source
// ---------------------------------------------------------------------------

/// What makes a task pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Bound to a hardware interrupt line. The line fires, the task runs.
    Interrupt(Vector),
    /// Released by [`Kernel::spawn`](crate::kernel::Kernel::spawn) or
    /// `spawn_after`, dispatched through the dispatcher line of its level.
    Software,
    /// A software task the kernel releases every `period` ticks.
    Periodic(Duration),
}

impl Trigger {
    /// Software and periodic tasks both run from a dispatcher line.
    #[inline]
    pub const fn is_software(&self) -> bool {
        !matches!(self, Trigger::Interrupt(_))
    }
}

// ---------------------------------------------------------------------------
// Resource access set
// ---------------------------------------------------------------------------

/// The set of shared resources a task may claim, one bit per
/// [`ResourceId`]. Fixed at registration; ceilings are derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSet(u32);

impl ResourceSet {
    pub const EMPTY: Self = Self(0);

    /// Build a set from a list of ids. Usable in `const` context.
    pub const fn of(ids: &[ResourceId]) -> Self {
        let mut bits = 0u32;
        let mut i = 0;
        while i < ids.len() {
            bits |= 1 << ids[i].index();
            i += 1;
        }
        Self(bits)
    }

    #[inline]
    pub const fn with(self, id: ResourceId) -> Self {
        Self(self.0 | (1 << id.index()))
    }

    #[inline]
    pub const fn contains(self, id: ResourceId) -> bool {
        self.0 & (1 << id.index()) != 0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate the members in ascending id order.
    pub fn iter(self) -> impl Iterator<Item = ResourceId> {
        (0..MAX_RESOURCES as u8)
            .map(ResourceId::new)
            .filter(move |id| self.contains(*id))
    }
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after registration)
// ---------------------------------------------------------------------------

/// Task handler. Runs to completion; receives the dispatch context.
pub type Handler<P> = fn(Context<'_, P>);

/// Static description of a task, passed to
/// [`Kernel::register`](crate::kernel::Kernel::register).
pub struct TaskConfig<P: Port> {
    /// Human-readable name, used only in log output.
    pub name: &'static str,

    /// Static priority, `1..=MAX_PRIORITY`. Never changes after registration.
    pub priority: Priority,

    /// Trigger source.
    pub trigger: Trigger,

    /// Resources this task may claim.
    pub resources: ResourceSet,

    /// Body executed on every dispatch.
    pub handler: Handler<P>,
}

impl<P: Port> Clone for TaskConfig<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Port> Copy for TaskConfig<P> {}

impl<P: Port> fmt::Debug for TaskConfig<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConfig")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("trigger", &self.trigger)
            .field("resources", &self.resources)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Observable state of a task.
///
/// ```text
///   ┌────────┐   trigger    ┌─────────┐   selected by the    ┌─────────┐
///   │  Idle  │ ───────────► │ Pending │ ───────────────────► │ Running │
///   └────────┘              └─────────┘  interrupt controller└─────────┘
///        ▲                                                        │
///        └──────────────────────── return ────────────────────────┘
/// ```
///
/// Being preempted is not a separate state: the preempted task is still
/// `Running` underneath the task that preempted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    Idle = 0,
    Pending = 1,
    Running = 2,
}

impl TaskState {
    #[inline]
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TaskState::Pending,
            2 => TaskState::Running,
            _ => TaskState::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const RPM: ResourceId = ResourceId::new(0);
    const DUTY: ResourceId = ResourceId::new(3);
    const TEMP: ResourceId = ResourceId::new(31);

    #[test]
    fn test_resource_set_membership() {
        let set = ResourceSet::of(&[RPM, TEMP]);
        assert!(set.contains(RPM));
        assert!(set.contains(TEMP));
        assert!(!set.contains(DUTY));
        assert_eq!(set.len(), 2);

        let set = set.with(DUTY);
        assert_eq!(set.len(), 3);
        assert!(set.contains(DUTY));
    }

    #[test]
    fn test_resource_set_iterates_in_id_order() {
        let set = ResourceSet::of(&[TEMP, RPM, DUTY]);
        let mut ids = set.iter();
        assert_eq!(ids.next(), Some(RPM));
        assert_eq!(ids.next(), Some(DUTY));
        assert_eq!(ids.next(), Some(TEMP));
        assert_eq!(ids.next(), None);
    }

    #[test]
    fn test_empty_resource_set() {
        assert!(ResourceSet::EMPTY.is_empty());
        assert_eq!(ResourceSet::EMPTY.iter().count(), 0);
        assert_eq!(ResourceSet::default(), ResourceSet::EMPTY);
    }

    #[test]
    fn test_trigger_kinds() {
        assert!(!Trigger::Interrupt(Vector(6)).is_software());
        assert!(Trigger::Software.is_software());
        assert!(Trigger::Periodic(Duration::from_ticks(10)).is_software());
    }

    #[test]
    fn test_task_state_round_trip() {
        for state in [TaskState::Idle, TaskState::Pending, TaskState::Running] {
            assert_eq!(TaskState::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority(5) > Priority(3));
        assert!(Priority::IDLE < Priority(1));
        assert_eq!(Priority::MAX.level(), crate::config::MAX_PRIORITY);
    }
}
