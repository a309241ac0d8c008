//! # Hosted Simulator Port
//!
//! A software model of a nested vectored interrupt controller, so the
//! kernel's scheduling rules can run (and be tested) on a development
//! machine.
//!
//! The model keeps per-line priority, enable and pending bits. Whenever
//! the kernel reaches a point where real hardware could take an interrupt
//! (a line was pended, the mask was lowered, a handler returned) it asks
//! [`Port::next_preemption`], and the simulator answers with the line the
//! NVIC would select:
//!
//! 1. pending and enabled,
//! 2. priority strictly above `max(running priority, mask)`,
//! 3. highest priority first, lowest line number on ties.
//!
//! The kernel then runs that handler synchronously, nested inside
//! whatever was executing, exactly as hardware preemption nests stacks.
//!
//! A cycle counter ([`SimPort::advance`]) lets tests lay out timelines;
//! every decision is recorded in a bounded [`TraceEvent`] log.

use spin::Mutex;

use crate::arch::Port;
use crate::config::{MAX_VECTORS, TRACE_CAPACITY};
use crate::task::{Priority, Vector};

/// One recorded simulator event, stamped with the cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    Pend { vector: Vector, at: u64 },
    Dispatch { vector: Vector, priority: Priority, at: u64 },
    Mask { level: Priority, at: u64 },
    Wait { at: u64 },
}

struct SimState {
    priorities: [Priority; MAX_VECTORS],
    enabled: u64,
    pending: u64,
    interrupts_on: bool,
    mask: Priority,
    tick_hz: u32,
    cycles: u64,
    waits: u32,
    trace: heapless::Vec<TraceEvent, TRACE_CAPACITY>,
}

/// Mask bit of `vector`; lines past the model's 64 have none.
fn line_bit(vector: Vector) -> u64 {
    1u64.checked_shl(u32::from(vector.0)).unwrap_or(0)
}

impl SimState {
    fn record(&mut self, event: TraceEvent) {
        // Oldest events win; a full trace silently drops new ones
        let _ = self.trace.push(event);
    }
}

/// Simulated interrupt controller, mask register and tick source.
pub struct SimPort {
    state: Mutex<SimState>,
}

impl SimPort {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                priorities: [Priority::IDLE; MAX_VECTORS],
                enabled: 0,
                pending: 0,
                interrupts_on: false,
                mask: Priority::IDLE,
                tick_hz: 0,
                cycles: 0,
                waits: 0,
                trace: heapless::Vec::new(),
            }),
        }
    }

    /// Advance the cycle counter, i.e. pretend the current context spent
    /// `cycles` executing.
    pub fn advance(&self, cycles: u64) {
        self.state.lock().cycles += cycles;
    }

    /// Current cycle count.
    pub fn now(&self) -> u64 {
        self.state.lock().cycles
    }

    /// Mask level last written by the kernel.
    pub fn mask(&self) -> Priority {
        self.state.lock().mask
    }

    pub fn is_pending(&self, vector: Vector) -> bool {
        self.state.lock().pending & line_bit(vector) != 0
    }

    pub fn is_enabled(&self, vector: Vector) -> bool {
        self.state.lock().enabled & line_bit(vector) != 0
    }

    /// Priority programmed for `vector` (idle if never programmed).
    pub fn priority_of(&self, vector: Vector) -> Priority {
        self.state
            .lock()
            .priorities
            .get(vector.index())
            .copied()
            .unwrap_or(Priority::IDLE)
    }

    /// Whether [`Port::start`] has run.
    pub fn is_started(&self) -> bool {
        self.state.lock().interrupts_on
    }

    pub fn tick_hz(&self) -> u32 {
        self.state.lock().tick_hz
    }

    /// How many times the idle loop entered its wait state.
    pub fn waits(&self) -> u32 {
        self.state.lock().waits
    }

    /// Snapshot of the recorded events.
    pub fn trace(&self) -> heapless::Vec<TraceEvent, TRACE_CAPACITY> {
        self.state.lock().trace.clone()
    }

    pub fn clear_trace(&self) {
        self.state.lock().trace.clear();
    }

    /// Cycle stamps of every dispatch of `vector`, in order.
    pub fn dispatch_times(&self, vector: Vector) -> heapless::Vec<u64, TRACE_CAPACITY> {
        self.state
            .lock()
            .trace
            .iter()
            .filter_map(|e| match *e {
                TraceEvent::Dispatch { vector: v, at, .. } if v == vector => Some(at),
                _ => None,
            })
            .collect()
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for SimPort {
    fn set_priority(&self, vector: Vector, priority: Priority) {
        if let Some(slot) = self.state.lock().priorities.get_mut(vector.index()) {
            *slot = priority;
        }
    }

    fn enable(&self, vector: Vector) {
        self.state.lock().enabled |= line_bit(vector);
    }

    fn pend(&self, vector: Vector) {
        let mut s = self.state.lock();
        s.pending |= line_bit(vector);
        let at = s.cycles;
        s.record(TraceEvent::Pend { vector, at });
    }

    fn acknowledge(&self, vector: Vector) {
        self.state.lock().pending &= !line_bit(vector);
    }

    fn set_mask(&self, level: Priority) {
        let mut s = self.state.lock();
        s.mask = level;
        let at = s.cycles;
        s.record(TraceEvent::Mask { level, at });
    }

    fn start(&self, tick_hz: u32) {
        let mut s = self.state.lock();
        s.tick_hz = tick_hz;
        s.interrupts_on = true;
    }

    fn wait_for_interrupt(&self) {
        let mut s = self.state.lock();
        s.waits += 1;
        let at = s.cycles;
        s.record(TraceEvent::Wait { at });
    }

    fn next_preemption(&self, threshold: Priority) -> Option<Vector> {
        let mut s = self.state.lock();
        if !s.interrupts_on {
            return None;
        }

        let candidates = s.pending & s.enabled;
        let mut best: Option<(usize, Priority)> = None;
        for line in 0..MAX_VECTORS {
            if candidates & (1 << line) == 0 {
                continue;
            }
            let priority = s.priorities[line];
            if priority <= threshold {
                continue;
            }
            // Strictly greater keeps the lowest line number on ties
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((line, priority));
            }
        }

        let (line, priority) = best?;
        s.pending &= !(1 << line);
        let vector = Vector(line as u16);
        let at = s.cycles;
        s.record(TraceEvent::Dispatch { vector, priority, at });
        Some(vector)
    }
}
