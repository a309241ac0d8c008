//! # Synchronization Primitives
//!
//! Global interrupt-disable critical sections. The scheduler itself never
//! needs them on the task path (claims mask by priority instead); they
//! guard only the registration tables, the timer queue and the debug
//! claim stack, none of which is touched while a task body runs.
//!
//! Backed by the `critical-section` crate: the single-core Cortex-M
//! implementation from `cortex-m` on target, the `std` implementation on
//! hosted builds.

pub use critical_section::{CriticalSection, Mutex};

/// Execute a closure with interrupts disabled.
///
/// Keep the closure short: it delays every task, including ones whose
/// priority is above every resource ceiling.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
