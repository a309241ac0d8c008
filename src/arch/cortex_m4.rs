//! # Cortex-M4 Port Layer
//!
//! Maps the kernel onto the ARMv7E-M NVIC. Every task line and every
//! dispatcher line is a device interrupt whose NVIC priority encodes the
//! task's logical priority, so the NVIC performs all preemption and
//! tail-chaining. No context switch code exists: tasks run to completion
//! on the main stack, nested exactly as the interrupts nest.
//!
//! ## Priority Encoding
//!
//! The NVIC treats lower numbers as more urgent and implements only the
//! top `NVIC_PRIO_BITS` bits:
//!
//! ```text
//!   logical p      NVIC value (4 bits)
//!   ─────────      ───────────────────
//!       1          (16 - 1) << 4 = 0xF0
//!       5          (16 - 5) << 4 = 0xB0
//!       8          (16 - 8) << 4 = 0x80
//! ```
//!
//! ## Priority Mask
//!
//! Claims write BASEPRI with the encoded ceiling, which holds every line
//! at or below the ceiling pending. Level 0 writes BASEPRI = 0, which
//! disables masking. `MAX_PRIORITY < 1 << NVIC_PRIO_BITS` guarantees
//! that the highest ceiling still encodes to a non-zero BASEPRI.
//!
//! SysTick runs at the highest logical priority and drives
//! `Kernel::on_tick`.

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::NVIC;
use cortex_m::register::basepri;

use crate::arch::Port;
use crate::config::{MAX_PRIORITY, NVIC_PRIO_BITS, SYSTEM_CLOCK_HZ};
use crate::task::{Priority, Vector};

#[derive(Clone, Copy)]
struct Irq(u16);

// Safety: `Irq` is built only from registered vectors, which the
// registry bounds to `0..MAX_VECTORS` device lines.
unsafe impl InterruptNumber for Irq {
    #[inline]
    fn number(self) -> u16 {
        self.0
    }
}

/// Encode a logical priority for the NVIC priority registers.
#[inline]
pub const fn logical_to_hw(priority: Priority) -> u8 {
    (((1u16 << NVIC_PRIO_BITS) - priority.level() as u16) << (8 - NVIC_PRIO_BITS)) as u8
}

/// The Cortex-M4 port. Zero-sized; all state lives in the core registers.
pub struct CortexM4;

impl CortexM4 {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for CortexM4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for CortexM4 {
    fn set_priority(&self, vector: Vector, priority: Priority) {
        // Safety: called only from `Kernel::commit`, before the line is
        // unmasked, so no priority-based critical section is disturbed.
        unsafe {
            let mut cp = cortex_m::Peripherals::steal();
            cp.NVIC.set_priority(Irq(vector.0), logical_to_hw(priority));
        }
    }

    fn enable(&self, vector: Vector) {
        // Safety: the kernel unmasks a line only after binding a handler
        unsafe { NVIC::unmask(Irq(vector.0)) }
    }

    #[inline]
    fn pend(&self, vector: Vector) {
        NVIC::pend(Irq(vector.0));
    }

    #[inline]
    fn acknowledge(&self, vector: Vector) {
        // The NVIC clears pending on entry; this drops a re-trigger that
        // arrived before the handler body started.
        NVIC::unpend(Irq(vector.0));
    }

    #[inline]
    fn set_mask(&self, level: Priority) {
        let value = if level == Priority::IDLE {
            0
        } else {
            logical_to_hw(level)
        };
        // Safety: the mask is only changed through claims, which restore
        // it in strict LIFO order.
        unsafe { basepri::write(value) }
    }

    fn start(&self, tick_hz: u32) {
        // Safety: single call from `Kernel::commit`; the kernel owns
        // SysTick and the NVIC lines it binds from here on.
        let mut cp = unsafe { cortex_m::Peripherals::steal() };
        configure_systick(&mut cp.SYST, tick_hz);
        unsafe {
            cp.SCB
                .set_priority(SystemHandler::SysTick, logical_to_hw(Priority(MAX_PRIORITY)));
            cortex_m::interrupt::enable();
        }
    }

    #[inline]
    fn wait_for_interrupt(&self) {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `tick_hz` from the processor clock.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST, tick_hz: u32) {
    let reload = SYSTEM_CLOCK_HZ / tick_hz - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}
