//! # Ceilos Example Firmware
//!
//! A motor-speed control loop with three tasks at three priorities sharing
//! state through claims and queues:
//!
//! | Task | Trigger | Priority | Resources | Behavior |
//! |------|---------|----------|-----------|----------|
//! | `sample` | EXTI0 (tacho edge) | 5 | RPM, LOG | Measures speed, logs the sample |
//! | `control` | every 10 ms | 3 | RPM, DUTY | Reads speed, updates PWM duty, queues a report |
//! | `telemetry` | software | 1 | (none) | Drains and prints reports |
//!
//! Idle drains the sample log between interrupts.
//!
//! ## Overflow Policies
//!
//! Both queue policies appear here, chosen at the call site:
//!
//! - The sample log (SPSC, producer in `sample`, consumer in idle) drops
//!   samples silently when idle falls behind.
//! - Telemetry reports (MPSC) that do not fit are reported as a warning.
//!
//! On a bare-metal target this runs on the Cortex-M4 port. Hosted, the
//! same tasks run on the simulator for 100 ms of simulated time.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

mod app {
    use ceilos::arch::Port;
    use ceilos::queue::{Consumer, MpscQueue, Producer, Queue};
    use ceilos::time::Duration;
    use ceilos::{
        Context, Kernel, Priority, RegistryError, Resource, ResourceId, ResourceSet, SpawnError,
        TaskConfig, TaskId, Trigger, Vector,
    };
    use spin::Once;
    use static_cell::StaticCell;

    /// Tacho input line (EXTI0 on STM32F4).
    pub const SAMPLE_LINE: Vector = Vector(6);

    /// Lines with no peripheral attached, donated for software tasks
    /// (USART1, USART2).
    pub const DISPATCHERS: [Vector; 2] = [Vector(37), Vector(38)];

    pub const LOG_DEPTH: usize = 16;
    const TARGET_RPM: u32 = 1500;

    const RPM_ID: ResourceId = ResourceId::new(0);
    const DUTY_ID: ResourceId = ResourceId::new(1);
    const LOG_ID: ResourceId = ResourceId::new(2);

    #[derive(Debug, Clone, Copy)]
    pub struct Report {
        pub rpm: u32,
        pub duty: u16,
    }

    static RPM: Resource<u32> = Resource::new(RPM_ID, 0);
    static DUTY: Resource<u16> = Resource::new(DUTY_ID, 500);
    static LOG: Resource<Option<Producer<'static, u32, LOG_DEPTH>>> = Resource::new(LOG_ID, None);

    static LOG_BUFFER: StaticCell<Queue<u32, LOG_DEPTH>> = StaticCell::new();
    static REPORTS: MpscQueue<Report, 4> = MpscQueue::new();
    static TELEMETRY: Once<TaskId> = Once::new();

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Tacho edge: convert the edge timestamp into a speed estimate.
    fn sample<P: Port>(cx: Context<'_, P>) {
        let rpm = 1200 + (cx.now().ticks() % 16) as u32 * 40;
        cx.lock(&RPM, |shared| *shared = rpm);

        cx.lock(&LOG, |log| {
            if let Some(tx) = log.as_mut() {
                // Full log: the sample is lost, the next one will do
                let _ = tx.enqueue(rpm);
            }
        });
    }

    /// Proportional speed controller.
    fn control<P: Port>(cx: Context<'_, P>) {
        let rpm = cx.lock(&RPM, |rpm| *rpm);

        let duty = cx.lock(&DUTY, |duty| {
            let error = TARGET_RPM as i32 - rpm as i32;
            let next = (*duty as i32 + error / 8).clamp(0, 1000);
            *duty = next as u16;
            *duty
        });

        if let Err(full) = REPORTS.enqueue(Report { rpm, duty }) {
            log::warn!("telemetry backlog, report dropped: {:?}", full.into_inner());
        }

        if let Some(&telemetry) = TELEMETRY.get() {
            match cx.spawn(telemetry) {
                Ok(()) | Err(SpawnError::AlreadyPending(_)) => {}
                Err(e) => log::warn!("telemetry not released: {}", e),
            }
        }
    }

    fn telemetry<P: Port>(_: Context<'_, P>) {
        while let Some(report) = REPORTS.dequeue() {
            log::info!("rpm {:>5}  duty {:>4}", report.rpm, report.duty);
        }
    }

    // -----------------------------------------------------------------------
    // Setup
    // -----------------------------------------------------------------------

    /// Register the application and hand back the log consumer for idle.
    pub fn setup<P: Port>(
        kernel: &'static Kernel<P>,
    ) -> Result<Consumer<'static, u32, LOG_DEPTH>, RegistryError> {
        for line in DISPATCHERS {
            kernel.add_dispatcher(line)?;
        }

        kernel.register(TaskConfig {
            name: "sample",
            priority: Priority(5),
            trigger: Trigger::Interrupt(SAMPLE_LINE),
            resources: ResourceSet::of(&[RPM_ID, LOG_ID]),
            handler: sample::<P>,
        })?;
        kernel.register(TaskConfig {
            name: "control",
            priority: Priority(3),
            trigger: Trigger::Periodic(Duration::from_millis(10)),
            resources: ResourceSet::of(&[RPM_ID, DUTY_ID]),
            handler: control::<P>,
        })?;
        let id = kernel.register(TaskConfig {
            name: "telemetry",
            priority: Priority(1),
            trigger: Trigger::Software,
            resources: ResourceSet::EMPTY,
            handler: telemetry::<P>,
        })?;
        TELEMETRY.call_once(|| id);

        let (tx, rx) = LOG_BUFFER.init(Queue::new()).split();
        kernel.init(move |cx| cx.lock(&LOG, |log| *log = Some(tx)));

        Ok(rx)
    }

    /// Idle housekeeping: drain whatever the sample log holds.
    pub fn housekeeping<P: Port>(rx: &mut Consumer<'static, u32, LOG_DEPTH>, _: Context<'_, P>) {
        let mut drained = 0;
        let mut last = 0;
        while let Some(rpm) = rx.dequeue() {
            drained += 1;
            last = rpm;
        }
        if drained > 0 {
            log::debug!("idle drained {} samples, last {} rpm", drained, last);
        }
    }
}

// ---------------------------------------------------------------------------
// Cortex-M4 firmware
// ---------------------------------------------------------------------------

#[cfg(all(target_os = "none", target_arch = "arm"))]
mod firmware {
    use ceilos::arch::cortex_m4::CortexM4;
    use ceilos::{Kernel, Vector};
    use cortex_m_rt::{entry, exception};
    use panic_halt as _;

    use crate::app;

    static KERNEL: Kernel<CortexM4> = Kernel::new(CortexM4::new());

    #[exception]
    fn SysTick() {
        KERNEL.on_tick();
    }

    /// Without a device crate every IRQ slot of the vector table lands
    /// here; the kernel finds the task or dispatcher bound to the line.
    #[exception]
    unsafe fn DefaultHandler(irqn: i16) {
        match u16::try_from(irqn) {
            Ok(line) => KERNEL.on_interrupt(Vector(line)),
            Err(_) => panic!("unhandled exception {}", irqn),
        }
    }

    /// Firmware entry point. Registers the tasks and starts the kernel.
    /// Does not return.
    #[entry]
    fn main() -> ! {
        let mut log_rx = match app::setup(&KERNEL) {
            Ok(rx) => rx,
            Err(e) => panic!("bad task table: {}", e),
        };
        KERNEL.start(move |cx| app::housekeeping(&mut log_rx, cx))
    }
}

// ---------------------------------------------------------------------------
// Hosted simulation
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "none"))]
fn main() {
    use ceilos::arch::sim::SimPort;
    use ceilos::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
    use ceilos::Kernel;

    static KERNEL: Kernel<SimPort> = Kernel::new(SimPort::new());

    env_logger::init();

    let mut log_rx = match app::setup(&KERNEL).and_then(|rx| KERNEL.commit().map(|()| rx)) {
        Ok(rx) => rx,
        Err(e) => {
            log::error!("refusing to start: {}", e);
            std::process::exit(1);
        }
    };

    // 100 ms, a tacho edge every 3 ms
    for tick in 1..=100u32 {
        KERNEL.port().advance(u64::from(SYSTEM_CLOCK_HZ / TICK_HZ));
        KERNEL.on_tick();
        if tick % 3 == 0 {
            KERNEL.pend(app::SAMPLE_LINE);
        }
        KERNEL.idle_once(|cx| app::housekeeping(&mut log_rx, cx));
    }

    for id in KERNEL.task_ids() {
        let config = KERNEL.task_config(id);
        log::info!("{:<10} ran {} times", config.name, KERNEL.dispatch_count(id));
    }
}
