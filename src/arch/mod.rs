//! # Architecture Abstraction Layer
//!
//! [`Port`] is everything the kernel needs from the platform: an interrupt
//! controller with per-line priorities, a priority mask, a tick source and
//! a wait-for-interrupt instruction. The interrupt controller *is* the
//! scheduler; the kernel never picks the next task itself.
//!
//! - [`cortex_m4`]: NVIC + BASEPRI + SysTick on ARMv7E-M.
//! - [`sim`]: hosted simulator that replays the NVIC's selection rule in
//!   software so scheduling behaviour can be tested off-target.

use crate::task::{Priority, Vector};

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(not(target_os = "none"))]
pub mod sim;

/// Hardware collaborator interface consumed by the kernel.
///
/// Priorities passed in are logical (`1..=MAX_PRIORITY`, higher is more
/// urgent); translating to the controller's encoding is the port's job.
pub trait Port: Sync {
    /// Program the priority of an interrupt line.
    fn set_priority(&self, vector: Vector, priority: Priority);

    /// Unmask a line at the interrupt controller.
    fn enable(&self, vector: Vector);

    /// Mark a line pending. The controller takes it once its priority
    /// exceeds both the running priority and the mask.
    fn pend(&self, vector: Vector);

    /// Clear the trigger of a line that is being dispatched.
    fn acknowledge(&self, vector: Vector);

    /// Set the priority mask. Lines at or below `level` are held pending;
    /// [`Priority::IDLE`] masks nothing.
    fn set_mask(&self, level: Priority);

    /// Start the periodic tick at `tick_hz` and enable interrupts.
    fn start(&self, tick_hz: u32);

    /// Sleep until the next interrupt.
    fn wait_for_interrupt(&self);

    /// The line the controller would take now, given that nothing at or
    /// below `threshold` may run. Real hardware takes interrupts by itself,
    /// so the default is `None`; a simulator returns the line (marking it
    /// taken) and the kernel dispatches it synchronously.
    fn next_preemption(&self, threshold: Priority) -> Option<Vector> {
        let _ = threshold;
        None
    }
}
