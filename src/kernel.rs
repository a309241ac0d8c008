//! # Kernel
//!
//! The dispatcher and idle loop, plus the public API applications use to
//! register tasks, start the system and release software tasks.
//!
//! A [`Kernel`] is a `const`-constructed object that lives in a `static`.
//! It has two phases:
//!
//! - **Registering**: tasks and dispatcher lines are added, resources can
//!   be seeded through [`Kernel::init`]. No handler can run yet: every
//!   line stays disabled at the interrupt controller until `commit`.
//! - **Started**: the registry is frozen, line priorities are programmed,
//!   bound lines are enabled. The only runtime mutation is the priority mask,
//!   which moves exclusively through claims.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► KERNEL.add_dispatcher() ← Donate unused lines (×N)
//!         ├─► KERNEL.register()       ← Register tasks (×N)
//!         ├─► KERNEL.init()           ← Seed shared resources
//!         └─► KERNEL.start(idle)      ← Commit, then idle (no return)
//!               ├─► Resolve registry (dispatchers, ceilings, timers)
//!               ├─► Program and unmask every bound line
//!               ├─► Arm periodic tasks
//!               └─► Start SysTick, enable interrupts
//! ```
//!
//! ## Dispatch
//!
//! The interrupt controller picks what runs. Every bound line enters
//! [`Kernel::on_interrupt`], which runs either the line's task or, for a
//! dispatcher line, every software task queued at that level in FIFO
//! order. Preemption is nesting: a higher line interrupts the handler
//! below it and returns into it.
//!
//! On hardware the NVIC does the nesting. On the hosted simulator the
//! kernel asks the port for the next line at every point where hardware
//! could take one (pend, mask lowered, handler returned) and calls
//! `on_interrupt` itself.

use core::cell::{RefCell, UnsafeCell};
use core::marker::PhantomData;

use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};

use crate::arch::Port;
use crate::config::{MAX_TASKS, MAX_VECTORS, PRIORITY_LEVELS, TICK_HZ, TIMER_QUEUE_CAPACITY};
use crate::error::{RegistryError, SpawnError};
use crate::queue::MpscQueue;
use crate::registry::{Binding, Registry};
use crate::resource::{Claim, Resource, ResourceId};
#[cfg(debug_assertions)]
use crate::resource::{ClaimRelease, ClaimStack};
use crate::sync::{self, Mutex};
use crate::task::{Priority, TaskConfig, TaskId, TaskState, Trigger, Vector};
use crate::time::{Duration, Instant, Timer, TimerQueue};

const REGISTERING: u8 = 0;
const STARTED: u8 = 1;

#[allow(clippy::declare_interior_mutable_const)]
const IDLE_STATE: AtomicU8 = AtomicU8::new(TaskState::Idle as u8);
#[allow(clippy::declare_interior_mutable_const)]
const NOT_QUEUED: AtomicBool = AtomicBool::new(false);
#[allow(clippy::declare_interior_mutable_const)]
const NO_DISPATCHES: AtomicU32 = AtomicU32::new(0);
#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_LEVEL: MpscQueue<TaskId, MAX_TASKS> = MpscQueue::new();

// ---------------------------------------------------------------------------
// Kernel object
// ---------------------------------------------------------------------------

pub struct Kernel<P: Port> {
    port: P,
    phase: AtomicU8,
    registry: UnsafeCell<Registry<P>>,

    /// Current priority mask (mirrors what was written to the port).
    mask: AtomicU8,
    /// Priority of the innermost handler executing, 0 in idle.
    running: AtomicU8,

    states: [AtomicU8; MAX_TASKS],
    queued: [AtomicBool; MAX_TASKS],
    dispatches: [AtomicU32; MAX_TASKS],
    /// One ready queue per software priority level.
    ready: [MpscQueue<TaskId, MAX_TASKS>; PRIORITY_LEVELS],

    ticks: AtomicU64,
    timers: Mutex<RefCell<TimerQueue>>,

    #[cfg(debug_assertions)]
    claims: Mutex<RefCell<ClaimStack>>,
}

// Safety: the registry is written only in the registering phase, inside a
// critical section, and never while a reference from `registry()` is
// alive. Everything else is atomic or behind a critical-section mutex.
unsafe impl<P: Port> Sync for Kernel<P> {}

impl<P: Port> Kernel<P> {
    pub const fn new(port: P) -> Self {
        Self {
            port,
            phase: AtomicU8::new(REGISTERING),
            registry: UnsafeCell::new(Registry::new()),
            mask: AtomicU8::new(0),
            running: AtomicU8::new(0),
            states: [IDLE_STATE; MAX_TASKS],
            queued: [NOT_QUEUED; MAX_TASKS],
            dispatches: [NO_DISPATCHES; MAX_TASKS],
            ready: [EMPTY_LEVEL; PRIORITY_LEVELS],
            ticks: AtomicU64::new(0),
            timers: Mutex::new(RefCell::new(TimerQueue::new())),
            #[cfg(debug_assertions)]
            claims: Mutex::new(RefCell::new(ClaimStack::new())),
        }
    }

    #[inline]
    pub fn port(&self) -> &P {
        &self.port
    }

    #[inline]
    fn registry(&self) -> &Registry<P> {
        // Safety: see the `Sync` impl
        unsafe { &*self.registry.get() }
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut Registry<P>) -> R) -> R {
        assert!(!self.is_started(), "task table modified after start");
        // Safety: registering phase, single writer under the critical section
        sync::critical_section(|_cs| f(unsafe { &mut *self.registry.get() }))
    }

    // -----------------------------------------------------------------------
    // Registration phase
    // -----------------------------------------------------------------------

    /// Add a task to the registry.
    ///
    /// # Panics
    /// If the kernel has already started.
    pub fn register(&self, config: TaskConfig<P>) -> Result<TaskId, RegistryError> {
        let id = self.with_registry(|r| r.register(config))?;
        log::debug!(
            "registered {} as {} at {} ({:?})",
            config.name,
            id,
            config.priority,
            config.trigger
        );
        Ok(id)
    }

    /// Donate an unused interrupt line for dispatching software tasks.
    ///
    /// # Panics
    /// If the kernel has already started.
    pub fn add_dispatcher(&self, vector: Vector) -> Result<(), RegistryError> {
        self.with_registry(|r| r.add_dispatcher(vector))?;
        log::debug!("dispatcher line {} donated", vector);
        Ok(())
    }

    /// Run `f` with a pre-start context, e.g. to seed shared resources.
    ///
    /// # Panics
    /// If the kernel has already started.
    pub fn init<F>(&self, f: F)
    where
        F: FnOnce(Context<'_, P>),
    {
        assert!(!self.is_started(), "init called after start");
        f(Context::new(self, None, Priority::IDLE));
    }

    /// Freeze the registry and hand control to the interrupt controller.
    ///
    /// Software tasks spawned before this call run as soon as it enables
    /// interrupts. On error nothing is programmed and the kernel stays in
    /// the registering phase.
    pub fn commit(&self) -> Result<(), RegistryError> {
        // Delays requested before commit share the queue with periodic tasks
        let periodic = self
            .registry()
            .tasks()
            .filter(|(_, t)| matches!(t.trigger, Trigger::Periodic(_)))
            .count();
        if TIMER_QUEUE_CAPACITY - self.armed_timers() < periodic {
            return Err(RegistryError::TimerCapacity);
        }

        self.with_registry(|r| r.resolve())?;
        let registry = self.registry();

        let now = self.now();
        sync::critical_section(|cs| {
            let mut timers = self.timers.borrow_ref_mut(cs);
            for (id, task) in registry.tasks() {
                if let Trigger::Periodic(period) = task.trigger {
                    // Room was checked above
                    let _ = timers.schedule_periodic(now + tick_period(period), id);
                }
            }
        });

        for (_, task) in registry.tasks() {
            if let Trigger::Interrupt(vector) = task.trigger {
                self.port.set_priority(vector, task.priority);
                self.port.enable(vector);
            }
        }
        for (level, vector) in registry.dispatcher_levels() {
            self.port.set_priority(vector, level);
            self.port.enable(vector);
        }

        self.phase.store(STARTED, Ordering::Release);

        for (level, vector) in registry.dispatcher_levels() {
            if !self.ready[level.index()].is_empty() {
                self.port.pend(vector);
            }
        }

        log::info!(
            "starting with {} tasks, {} software levels, tick {} Hz",
            registry.len(),
            registry.dispatcher_levels().count(),
            TICK_HZ
        );
        self.port.start(TICK_HZ);
        self.preempt();
        Ok(())
    }

    /// Commit and enter the idle loop. **Does not return.**
    ///
    /// `idle` is called once per iteration before the core sleeps; it must
    /// do bounded work.
    ///
    /// # Panics
    /// If [`commit`](Self::commit) fails: the system refuses to start on an
    /// inconsistent task table.
    pub fn start<F>(&self, mut idle: F) -> !
    where
        F: FnMut(Context<'_, P>),
    {
        if let Err(e) = self.commit() {
            panic!("refusing to start: {}", e);
        }
        loop {
            self.idle_once(&mut idle);
        }
    }

    /// One idle iteration: housekeeping, then wait for an interrupt.
    pub fn idle_once<F>(&self, housekeeping: F)
    where
        F: FnOnce(Context<'_, P>),
    {
        housekeeping(Context::new(self, None, Priority::IDLE));
        self.preempt();
        self.port.wait_for_interrupt();
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.phase.load(Ordering::Acquire) == STARTED
    }

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Software-trigger an interrupt line.
    pub fn pend(&self, vector: Vector) {
        if vector.index() >= MAX_VECTORS {
            log::warn!("pend on {} ignored: no such line", vector);
            return;
        }
        if let Binding::Task(id) = self.registry().binding(vector) {
            self.states[id.index()].store(TaskState::Pending as u8, Ordering::Release);
        }
        self.port.pend(vector);
        self.preempt();
    }

    /// Release a software task. It runs once the controller selects the
    /// dispatcher line of its level.
    pub fn spawn(&self, task: TaskId) -> Result<(), SpawnError> {
        let config = self.registry().task(task);
        if !config.trigger.is_software() {
            return Err(SpawnError::NotSoftware(task));
        }
        if self.queued[task.index()].swap(true, Ordering::AcqRel) {
            return Err(SpawnError::AlreadyPending(task));
        }

        let previous = self.states[task.index()].swap(TaskState::Pending as u8, Ordering::AcqRel);
        let level = config.priority;
        if self.ready[level.index()].enqueue(task).is_err() {
            self.states[task.index()].store(previous, Ordering::Release);
            self.queued[task.index()].store(false, Ordering::Release);
            return Err(SpawnError::QueueFull(task));
        }

        if self.is_started() {
            if let Some(vector) = self.registry().level_vector(level) {
                self.port.pend(vector);
            }
            self.preempt();
        }
        Ok(())
    }

    /// Release a software task `delay` ticks from now. A zero delay
    /// releases it on the next tick.
    pub fn spawn_after(&self, task: TaskId, delay: Duration) -> Result<(), SpawnError> {
        if !self.registry().task(task).trigger.is_software() {
            return Err(SpawnError::NotSoftware(task));
        }
        let at = self.now() + delay;
        sync::critical_section(|cs| self.timers.borrow_ref_mut(cs).schedule(at, task))
            .map_err(SpawnError::TimerQueueFull)
    }

    #[inline]
    pub fn now(&self) -> Instant {
        Instant::from_ticks(self.ticks.load(Ordering::Acquire))
    }

    // -----------------------------------------------------------------------
    // Interrupt entry points
    // -----------------------------------------------------------------------

    /// SysTick handler body: advance time and release due timers.
    ///
    /// Runs at the highest logical priority, so releases made here are
    /// dispatched by priority once it returns.
    pub fn on_tick(&self) {
        let outer = self.enter(Priority::MAX);
        let now = Instant::from_ticks(self.ticks.fetch_add(1, Ordering::AcqRel) + 1);

        let mut due: heapless::Vec<Timer, TIMER_QUEUE_CAPACITY> = heapless::Vec::new();
        sync::critical_section(|cs| {
            let mut timers = self.timers.borrow_ref_mut(cs);
            while !due.is_full() {
                match timers.pop_due(now) {
                    Some(timer) => {
                        let _ = due.push(timer);
                    }
                    None => break,
                }
            }
        });

        for timer in due {
            let config = self.registry().task(timer.task);
            // Only the chain armed at commit re-arms; extra delays fire once
            if let (true, Trigger::Periodic(period)) = (timer.periodic, config.trigger) {
                let next = timer.at + tick_period(period);
                let rearmed = sync::critical_section(|cs| {
                    self.timers.borrow_ref_mut(cs).schedule_periodic(next, timer.task)
                });
                if rearmed.is_err() {
                    log::error!("{} stopped: timer queue full", config.name);
                }
            }
            match self.spawn(timer.task) {
                Ok(()) => {}
                Err(SpawnError::AlreadyPending(_)) => {
                    log::warn!("{} overrun at tick {}, release dropped", config.name, now.ticks());
                }
                Err(e) => log::warn!("timer release failed: {}", e),
            }
        }

        self.leave(outer);
        self.preempt();
    }

    /// Common entry for every bound interrupt line.
    pub fn on_interrupt(&self, vector: Vector) {
        self.port.acknowledge(vector);
        match self.registry().binding(vector) {
            Binding::Task(id) => {
                let outer = self.enter(self.registry().task(id).priority);
                self.run(id);
                self.leave(outer);
            }
            Binding::Dispatcher(level) => {
                let outer = self.enter(level);
                while let Some(id) = self.ready[level.index()].dequeue() {
                    // Cleared first so the task may release itself again
                    self.queued[id.index()].store(false, Ordering::Release);
                    self.run(id);
                }
                self.leave(outer);
            }
            Binding::Unbound => log::warn!("interrupt on unbound line {}", vector),
        }
        self.preempt();
    }

    fn run(&self, id: TaskId) {
        let config = *self.registry().task(id);
        let state = &self.states[id.index()];
        state.store(TaskState::Running as u8, Ordering::Release);

        (config.handler)(Context::new(self, Some(id), config.priority));

        // Stays Pending if re-triggered while running
        let _ = state.compare_exchange(
            TaskState::Running as u8,
            TaskState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.dispatches[id.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn enter(&self, priority: Priority) -> Priority {
        Priority(self.running.swap(priority.level(), Ordering::AcqRel))
    }

    #[inline]
    fn leave(&self, outer: Priority) {
        self.running.store(outer.level(), Ordering::Release);
    }

    /// Dispatch every line the controller would take right now. A no-op
    /// on hardware, where preemption happens without asking.
    pub(crate) fn preempt(&self) {
        if !self.is_started() {
            return;
        }
        loop {
            let threshold = self.running_priority().max(self.mask());
            match self.port.next_preemption(threshold) {
                Some(vector) => self.on_interrupt(vector),
                None => break,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Priority mask (claims only)
    // -----------------------------------------------------------------------

    /// Current priority mask.
    #[inline]
    pub fn mask(&self) -> Priority {
        Priority(self.mask.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_mask(&self, level: Priority) {
        self.mask.store(level.level(), Ordering::Release);
        self.port.set_mask(level);
    }

    /// Priority of the innermost executing handler, idle if none.
    #[inline]
    pub fn running_priority(&self) -> Priority {
        Priority(self.running.load(Ordering::Acquire))
    }

    #[inline]
    pub fn ceiling(&self, id: ResourceId) -> Priority {
        self.registry().ceiling(id)
    }

    #[cfg(debug_assertions)]
    pub(crate) fn push_claim(&self, id: ResourceId, previous: Priority) {
        let pushed =
            sync::critical_section(|cs| self.claims.borrow_ref_mut(cs).push(id, previous));
        assert!(pushed, "claims nested too deep at {}", id);
    }

    #[cfg(debug_assertions)]
    pub(crate) fn pop_claim(&self, id: ResourceId) -> ClaimRelease {
        sync::critical_section(|cs| self.claims.borrow_ref_mut(cs).release(id))
    }

    // -----------------------------------------------------------------------
    // Observation
    // -----------------------------------------------------------------------

    #[inline]
    pub fn task_state(&self, id: TaskId) -> TaskState {
        TaskState::from_u8(self.states[id.index()].load(Ordering::Acquire))
    }

    /// Number of completed runs of a task.
    #[inline]
    pub fn dispatch_count(&self, id: TaskId) -> u32 {
        self.dispatches[id.index()].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn task_config(&self, id: TaskId) -> TaskConfig<P> {
        *self.registry().task(id)
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.registry().len()
    }

    /// Ids of every registered task, in registration order.
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.registry().tasks().map(|(id, _)| id)
    }

    /// Releases currently waiting in the timer queue.
    pub fn armed_timers(&self) -> usize {
        sync::critical_section(|cs| self.timers.borrow_ref(cs).len())
    }
}

/// Periods below one tick would re-arm on the tick that fired them.
#[inline]
fn tick_period(period: Duration) -> Duration {
    period.max(Duration::from_ticks(1))
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Handed to every task body, to idle housekeeping and to `init`.
///
/// Not `Send`: it describes the execution context it was created for.
pub struct Context<'a, P: Port> {
    kernel: &'a Kernel<P>,
    task: Option<TaskId>,
    priority: Priority,
    _not_send: PhantomData<*const ()>,
}

impl<P: Port> Clone for Context<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: Port> Copy for Context<'_, P> {}

impl<'a, P: Port> Context<'a, P> {
    fn new(kernel: &'a Kernel<P>, task: Option<TaskId>, priority: Priority) -> Self {
        Self {
            kernel,
            task,
            priority,
            _not_send: PhantomData,
        }
    }

    /// The running task; `None` in idle or `init`.
    #[inline]
    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    /// Static priority of the running task (0 in idle or `init`).
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn kernel(&self) -> &'a Kernel<P> {
        self.kernel
    }

    /// Open a claim on `resource`, raising the mask to its ceiling.
    ///
    /// Never blocks. Claims must be dropped in reverse order of opening.
    ///
    /// # Panics
    /// If the resource is already claimed. In debug builds, also if a task
    /// claims a resource it did not declare.
    pub fn claim<'r, T>(&self, resource: &'r Resource<T>) -> Claim<'r, T, P>
    where
        'a: 'r,
    {
        #[cfg(debug_assertions)]
        if let Some(id) = self.task {
            let config = self.kernel.registry().task(id);
            assert!(
                config.resources.contains(resource.id()),
                "{} claimed {} without declaring it",
                config.name,
                resource.id()
            );
        }
        Claim::acquire(self.kernel, resource)
    }

    /// Run `f` with exclusive access to `resource`.
    pub fn lock<T, R>(&self, resource: &Resource<T>, f: impl FnOnce(&mut T) -> R) -> R {
        let mut claim = self.claim(resource);
        f(&mut *claim)
    }

    #[inline]
    pub fn spawn(&self, task: TaskId) -> Result<(), SpawnError> {
        self.kernel.spawn(task)
    }

    #[inline]
    pub fn spawn_after(&self, task: TaskId, delay: Duration) -> Result<(), SpawnError> {
        self.kernel.spawn_after(task, delay)
    }

    #[inline]
    pub fn pend(&self, vector: Vector) {
        self.kernel.pend(vector)
    }

    #[inline]
    pub fn now(&self) -> Instant {
        self.kernel.now()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only, on the simulator port)
// ---------------------------------------------------------------------------
