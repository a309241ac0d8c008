//! # Task Registry
//!
//! The static tables the kernel dispatches from: tasks, resource
//! ceilings, the interrupt line binding table and the dispatcher line
//! assigned to each software priority level.
//!
//! The registry is filled while the kernel is in its registration phase,
//! resolved once by `Kernel::commit`, and read-only afterwards.
//!
//! ## Ceiling Derivation
//!
//! Registering a task raises the ceiling of every resource in its set to
//! at least the task's priority, so at any point
//! `ceiling(r) == max { priority(t) | t declares r }` (0 if nobody does).
//! `resolve` re-derives every ceiling from scratch and refuses to commit
//! if the incremental table disagrees.
//!
//! ## Dispatcher Assignment
//!
//! Software and periodic tasks have no interrupt line of their own.
//! `resolve` gives each priority level that has such tasks one of the
//! donated dispatcher lines, in ascending level order.

use crate::arch::Port;
use crate::config::{
    MAX_DISPATCHERS, MAX_PRIORITY, MAX_RESOURCES, MAX_TASKS, MAX_VECTORS, PRIORITY_LEVELS,
    TIMER_QUEUE_CAPACITY,
};
use crate::error::RegistryError;
use crate::resource::ResourceId;
use crate::task::{Priority, TaskConfig, TaskId, Trigger, Vector};

/// What an interrupt line dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Unbound,
    /// A hardware task.
    Task(TaskId),
    /// The ready queue of a software priority level.
    Dispatcher(Priority),
}

pub struct Registry<P: Port> {
    tasks: heapless::Vec<TaskConfig<P>, MAX_TASKS>,
    ceilings: [Priority; MAX_RESOURCES],
    bindings: [Binding; MAX_VECTORS],
    dispatchers: heapless::Vec<Vector, MAX_DISPATCHERS>,
    levels: [Option<Vector>; PRIORITY_LEVELS],
    resolved: bool,
}

impl<P: Port> Registry<P> {
    pub const fn new() -> Self {
        Self {
            tasks: heapless::Vec::new(),
            ceilings: [Priority::IDLE; MAX_RESOURCES],
            bindings: [Binding::Unbound; MAX_VECTORS],
            dispatchers: heapless::Vec::new(),
            levels: [None; PRIORITY_LEVELS],
            resolved: false,
        }
    }

    /// Record a task. Nothing is modified unless the task is accepted.
    pub fn register(&mut self, config: TaskConfig<P>) -> Result<TaskId, RegistryError> {
        debug_assert!(!self.resolved, "registry already resolved");

        if self.tasks.is_full() {
            return Err(RegistryError::TableFull);
        }
        if config.priority == Priority::IDLE || config.priority.level() > MAX_PRIORITY {
            return Err(RegistryError::InvalidPriority(config.priority));
        }
        if let Trigger::Interrupt(vector) = config.trigger {
            self.check_vector(vector)?;
        }

        let id = TaskId(self.tasks.len() as u8);
        if let Trigger::Interrupt(vector) = config.trigger {
            self.bindings[vector.index()] = Binding::Task(id);
        }
        for resource in config.resources.iter() {
            let ceiling = &mut self.ceilings[resource.index()];
            *ceiling = (*ceiling).max(config.priority);
        }
        // Capacity was checked above
        let _ = self.tasks.push(config);

        Ok(id)
    }

    /// Donate an unused interrupt line for dispatching software tasks.
    pub fn add_dispatcher(&mut self, vector: Vector) -> Result<(), RegistryError> {
        debug_assert!(!self.resolved, "registry already resolved");
        self.check_vector(vector)?;
        self.dispatchers
            .push(vector)
            .map_err(|_| RegistryError::TooManyDispatchers)
    }

    /// Assign dispatcher lines and verify the tables. Idempotent; the
    /// registry is unchanged if an error is returned.
    pub fn resolve(&mut self) -> Result<(), RegistryError> {
        if self.resolved {
            return Ok(());
        }

        let mut levels = [None; PRIORITY_LEVELS];
        let mut spare = self.dispatchers.iter();
        for level in 1..=MAX_PRIORITY {
            let needed = self
                .tasks
                .iter()
                .any(|t| t.trigger.is_software() && t.priority.level() == level);
            if needed {
                let vector = spare
                    .next()
                    .ok_or(RegistryError::MissingDispatcher(Priority(level)))?;
                levels[level as usize] = Some(*vector);
            }
        }

        for index in 0..MAX_RESOURCES {
            let id = ResourceId::new(index as u8);
            if self.derive_ceiling(id) != self.ceilings[index] {
                return Err(RegistryError::CeilingMismatch(id));
            }
        }

        let periodic = self
            .tasks
            .iter()
            .filter(|t| matches!(t.trigger, Trigger::Periodic(_)))
            .count();
        if periodic > TIMER_QUEUE_CAPACITY {
            return Err(RegistryError::TimerCapacity);
        }

        for (level, vector) in levels.iter().enumerate() {
            if let Some(vector) = vector {
                self.bindings[vector.index()] = Binding::Dispatcher(Priority(level as u8));
            }
        }
        self.levels = levels;
        self.resolved = true;
        Ok(())
    }

    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// # Panics
    /// If `id` was not handed out by this registry.
    #[inline]
    pub fn task(&self, id: TaskId) -> &TaskConfig<P> {
        match self.tasks.get(id.index()) {
            Some(task) => task,
            None => panic!("unknown task {}", id),
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &TaskConfig<P>)> + '_ {
        self.tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (TaskId(i as u8), t))
    }

    /// Ceiling of a resource: the highest priority of any task declaring it.
    #[inline]
    pub fn ceiling(&self, id: ResourceId) -> Priority {
        self.ceilings[id.index()]
    }

    #[inline]
    pub fn binding(&self, vector: Vector) -> Binding {
        self.bindings
            .get(vector.index())
            .copied()
            .unwrap_or(Binding::Unbound)
    }

    /// Dispatcher line of a software level, once resolved.
    #[inline]
    pub fn level_vector(&self, priority: Priority) -> Option<Vector> {
        self.levels.get(priority.index()).copied().flatten()
    }

    /// Levels that own a dispatcher line, with that line.
    pub fn dispatcher_levels(&self) -> impl Iterator<Item = (Priority, Vector)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(level, v)| v.map(|v| (Priority(level as u8), v)))
    }

    fn derive_ceiling(&self, id: ResourceId) -> Priority {
        self.tasks
            .iter()
            .filter(|t| t.resources.contains(id))
            .map(|t| t.priority)
            .max()
            .unwrap_or(Priority::IDLE)
    }

    fn check_vector(&self, vector: Vector) -> Result<(), RegistryError> {
        if vector.index() >= MAX_VECTORS {
            return Err(RegistryError::InvalidVector(vector));
        }
        if self.bindings[vector.index()] != Binding::Unbound || self.dispatchers.contains(&vector) {
            return Err(RegistryError::DuplicateVector(vector));
        }
        Ok(())
    }
}

impl<P: Port> Default for Registry<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::SimPort;
    use crate::kernel::Context;
    use crate::task::ResourceSet;
    use crate::time::Duration;

    const RPM: ResourceId = ResourceId::new(0);
    const DUTY: ResourceId = ResourceId::new(1);
    const UNUSED: ResourceId = ResourceId::new(7);

    fn nop(_: Context<'_, SimPort>) {}

    fn task(priority: u8, trigger: Trigger, resources: &[ResourceId]) -> TaskConfig<SimPort> {
        TaskConfig {
            name: "test",
            priority: Priority(priority),
            trigger,
            resources: ResourceSet::of(resources),
            handler: nop,
        }
    }

    #[test]
    fn test_ceiling_is_max_of_accessors() {
        let mut reg = Registry::new();
        reg.register(task(5, Trigger::Interrupt(Vector(6)), &[RPM])).unwrap();
        reg.register(task(3, Trigger::Software, &[RPM, DUTY])).unwrap();
        reg.register(task(1, Trigger::Software, &[DUTY])).unwrap();

        assert_eq!(reg.ceiling(RPM), Priority(5));
        assert_eq!(reg.ceiling(DUTY), Priority(3));
        assert_eq!(reg.ceiling(UNUSED), Priority::IDLE);

        // Every accessor sits at or below the ceiling
        for (_, t) in reg.tasks() {
            for r in t.resources.iter() {
                assert!(t.priority <= reg.ceiling(r));
            }
        }
    }

    #[test]
    fn test_task_ids_are_sequential() {
        let mut reg = Registry::new();
        let a = reg.register(task(2, Trigger::Software, &[])).unwrap();
        let b = reg.register(task(2, Trigger::Interrupt(Vector(1)), &[])).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(reg.binding(Vector(1)), Binding::Task(b));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_invalid_priority_rejected() {
        let mut reg = Registry::new();
        assert_eq!(
            reg.register(task(0, Trigger::Software, &[])),
            Err(RegistryError::InvalidPriority(Priority(0)))
        );
        assert_eq!(
            reg.register(task(MAX_PRIORITY + 1, Trigger::Software, &[])),
            Err(RegistryError::InvalidPriority(Priority(MAX_PRIORITY + 1)))
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_duplicate_vector_rejected_without_side_effects() {
        let mut reg = Registry::new();
        reg.register(task(2, Trigger::Interrupt(Vector(6)), &[])).unwrap();
        assert_eq!(
            reg.register(task(7, Trigger::Interrupt(Vector(6)), &[RPM])),
            Err(RegistryError::DuplicateVector(Vector(6)))
        );
        assert_eq!(reg.ceiling(RPM), Priority::IDLE);
        assert_eq!(reg.len(), 1);

        assert_eq!(
            reg.register(task(2, Trigger::Interrupt(Vector(MAX_VECTORS as u16)), &[])),
            Err(RegistryError::InvalidVector(Vector(MAX_VECTORS as u16)))
        );
    }

    #[test]
    fn test_dispatcher_line_cannot_double_as_task_line() {
        let mut reg = Registry::new();
        reg.add_dispatcher(Vector(10)).unwrap();
        assert_eq!(reg.add_dispatcher(Vector(10)), Err(RegistryError::DuplicateVector(Vector(10))));
        assert_eq!(
            reg.register(task(1, Trigger::Interrupt(Vector(10)), &[])),
            Err(RegistryError::DuplicateVector(Vector(10)))
        );
    }

    #[test]
    fn test_table_full() {
        let mut reg = Registry::new();
        for _ in 0..MAX_TASKS {
            reg.register(task(1, Trigger::Software, &[])).unwrap();
        }
        assert_eq!(
            reg.register(task(1, Trigger::Software, &[])),
            Err(RegistryError::TableFull)
        );
    }

    #[test]
    fn test_too_many_dispatchers() {
        let mut reg: Registry<SimPort> = Registry::new();
        for line in 0..MAX_DISPATCHERS as u16 {
            reg.add_dispatcher(Vector(40 + line)).unwrap();
        }
        assert_eq!(reg.add_dispatcher(Vector(2)), Err(RegistryError::TooManyDispatchers));
    }

    #[test]
    fn test_dispatchers_assigned_in_ascending_level_order() {
        let mut reg = Registry::new();
        reg.add_dispatcher(Vector(20)).unwrap();
        reg.add_dispatcher(Vector(21)).unwrap();
        reg.add_dispatcher(Vector(22)).unwrap();
        reg.register(task(4, Trigger::Software, &[])).unwrap();
        reg.register(task(2, Trigger::Periodic(Duration::from_ticks(5)), &[])).unwrap();
        reg.register(task(4, Trigger::Software, &[])).unwrap();
        reg.register(task(6, Trigger::Interrupt(Vector(3)), &[])).unwrap();

        reg.resolve().unwrap();

        assert_eq!(reg.level_vector(Priority(2)), Some(Vector(20)));
        assert_eq!(reg.level_vector(Priority(4)), Some(Vector(21)));
        assert_eq!(reg.level_vector(Priority(6)), None);
        assert_eq!(reg.binding(Vector(21)), Binding::Dispatcher(Priority(4)));
        // Left over, never enabled
        assert_eq!(reg.binding(Vector(22)), Binding::Unbound);
        assert_eq!(reg.dispatcher_levels().count(), 2);
    }

    #[test]
    fn test_missing_dispatcher_refuses_resolution() {
        let mut reg = Registry::new();
        reg.add_dispatcher(Vector(20)).unwrap();
        reg.register(task(1, Trigger::Software, &[])).unwrap();
        reg.register(task(3, Trigger::Software, &[])).unwrap();

        assert_eq!(reg.resolve(), Err(RegistryError::MissingDispatcher(Priority(3))));
        assert!(!reg.is_resolved());
        assert_eq!(reg.level_vector(Priority(1)), None);
    }

    #[test]
    fn test_timer_capacity_checked() {
        let mut reg = Registry::new();
        reg.add_dispatcher(Vector(20)).unwrap();
        for _ in 0..MAX_TASKS.min(TIMER_QUEUE_CAPACITY + 1) {
            reg.register(task(1, Trigger::Periodic(Duration::from_ticks(1)), &[])).unwrap();
        }
        if MAX_TASKS > TIMER_QUEUE_CAPACITY {
            assert_eq!(reg.resolve(), Err(RegistryError::TimerCapacity));
        } else {
            assert_eq!(reg.resolve(), Ok(()));
        }
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut reg = Registry::new();
        reg.add_dispatcher(Vector(20)).unwrap();
        reg.register(task(2, Trigger::Software, &[RPM])).unwrap();
        assert_eq!(reg.resolve(), Ok(()));
        assert_eq!(reg.resolve(), Ok(()));
        assert_eq!(reg.level_vector(Priority(2)), Some(Vector(20)));
    }
}
