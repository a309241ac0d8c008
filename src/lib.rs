//! # Ceilos: Ceiling Operating System
//!
//! An interrupt-driven, preemptive task scheduler with priority-ceiling
//! resource sharing for ARM Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! Ceilos does not schedule in software. Every task is bound to an
//! interrupt line whose hardware priority is the task's priority, and the
//! interrupt controller decides what runs:
//!
//! - **Tasks run to completion** on the interrupt stack; preemption is
//!   interrupt nesting, so there are no task stacks and no context switch.
//! - **Shared state is claimed, never locked**: a claim raises the
//!   priority mask to the resource's ceiling, which keeps every other
//!   accessor from being dispatched. Nothing ever waits.
//! - **Software tasks reuse the same mechanism**: spawning pends a
//!   donated "dispatcher" line at the task's priority.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   register() · commit() · start() · spawn() · claim()   │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Registry    │   Resources        │  Static Queues    │
//! │  registry.rs │   resource.rs      │  queue/           │
//! │  ─ ceilings  │   ─ Claim guard    │  ─ spsc::Queue    │
//! │  ─ bindings  │   ─ claim stack    │  ─ MpscQueue      │
//! │  ─ dispatch  │                    │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │        Task Model (task.rs) · Time (time.rs)            │
//! │    Priority · Trigger · ResourceSet · TimerQueue        │
//! ├────────────────────────────────────────────────────────┤
//! │           Port (arch/cortex_m4.rs, arch/sim.rs)         │
//! │       NVIC priorities · BASEPRI · SysTick · WFI        │
//! ├────────────────────────────────────────────────────────┤
//! │      ARM Cortex-M4 NVIC  /  hosted NVIC simulator       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Priority Ceiling Protocol
//!
//! The ceiling of a resource is the highest priority of any task that
//! declares it. With the mask at the ceiling, no task that could contend
//! for the resource can start, so:
//!
//! - a claim never blocks and never fails,
//! - a task of priority `p` is delayed by at most one claim whose ceiling
//!   is at least `p`,
//! - deadlock is impossible.
//!
//! ## Memory Model
//!
//! - **No heap**: the kernel is one `const`-constructed `static`
//! - **Fixed tables**: sized by [`config`]
//! - **Critical sections** (`critical-section` crate) only around the
//!   registration tables and the timer queue, never around a task body

#![no_std]

#[cfg(test)]
extern crate std;

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod queue;
pub mod registry;
pub mod resource;
pub mod sync;
pub mod task;
pub mod time;

pub use error::{RegistryError, SpawnError};
pub use kernel::{Context, Kernel};
pub use resource::{Claim, Resource, ResourceId};
pub use task::{Priority, ResourceSet, TaskConfig, TaskId, TaskState, Trigger, Vector};
