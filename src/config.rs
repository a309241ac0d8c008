//! # Ceilos Configuration
//!
//! Compile-time constants sizing every static table in the kernel.
//! Nothing here is read at runtime from elsewhere; changing a limit
//! changes the size of the `static` kernel object.

/// Maximum number of tasks in the registry.
///
/// Also sizes each per-priority ready queue, which is an MPSC queue and
/// therefore requires a power of two.
pub const MAX_TASKS: usize = 16;

/// Maximum number of shared resources. One bit per resource in
/// [`ResourceSet`](crate::task::ResourceSet), so this cannot exceed 32.
pub const MAX_RESOURCES: usize = 32;

/// Number of interrupt lines the kernel can bind (device IRQ numbers
/// `0..MAX_VECTORS`).
pub const MAX_VECTORS: usize = 64;

/// Highest logical task priority. Priority 0 is reserved for idle.
pub const MAX_PRIORITY: u8 = 8;

/// Number of logical priority levels including idle.
pub const PRIORITY_LEVELS: usize = MAX_PRIORITY as usize + 1;

/// Maximum number of interrupt lines donated for software task dispatch.
pub const MAX_DISPATCHERS: usize = 8;

/// Capacity of the timer queue shared by `spawn_after` and periodic tasks.
pub const TIMER_QUEUE_CAPACITY: usize = 16;

/// Maximum nesting depth of open claims tracked by the debug claim stack.
pub const CLAIM_STACK_DEPTH: usize = 32;

/// Implemented priority bits in the NVIC (4 on STM32F4).
pub const NVIC_PRIO_BITS: u8 = 4;

/// SysTick frequency in Hz. One kernel tick is `1 / TICK_HZ` seconds.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Number of events retained by the simulator trace.
pub const TRACE_CAPACITY: usize = 64;

const _: () = assert!(MAX_TASKS.is_power_of_two());
const _: () = assert!(MAX_RESOURCES <= 32);
const _: () = assert!(MAX_VECTORS <= 64);
// BASEPRI must be able to mask every logical level, so the highest one
// cannot map to NVIC priority 0.
const _: () = assert!((MAX_PRIORITY as u32) < (1 << NVIC_PRIO_BITS));
