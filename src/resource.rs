//! # Shared Resources & Claims
//!
//! Mutual exclusion by the immediate priority ceiling protocol.
//!
//! Each [`Resource`] has a ceiling: the highest priority of any task that
//! declared it in its [`ResourceSet`](crate::task::ResourceSet). The
//! registry derives it; nobody sets it by hand. Claiming a resource raises
//! the system mask to `max(mask, ceiling)`, which keeps every task that
//! could touch the resource from being dispatched until the claim ends.
//! Nothing ever waits: if a claim can be attempted, nobody else holds it.
//!
//! ```text
//!   mask ▲
//!      5 │        ┌───── claim(RPM) ─────┐
//!        │        │   Sample pended here │ Sample runs
//!      0 │────────┘   (5 > 5 is false)   └──────────────
//!        └──────────────────────────────────────────────► time
//! ```
//!
//! A [`Claim`] restores the mask it captured when it is dropped, on every
//! exit path. Claims nest; they must be released in reverse order, which
//! debug builds check against a kernel-wide claim stack.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use portable_atomic::{AtomicBool, Ordering};

use crate::arch::Port;
use crate::config::MAX_RESOURCES;
use crate::kernel::Kernel;
use crate::task::Priority;

/// Identifier of a shared resource, `0..MAX_RESOURCES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u8);

impl ResourceId {
    /// # Panics
    /// If `id >= MAX_RESOURCES` (a compile error in `const` context).
    pub const fn new(id: u8) -> Self {
        assert!((id as usize) < MAX_RESOURCES, "resource id out of range");
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Resource cell
// ---------------------------------------------------------------------------

/// Mutable state shared between tasks. The value is reachable only
/// through a [`Claim`].
pub struct Resource<T> {
    id: ResourceId,
    held: AtomicBool,
    value: UnsafeCell<T>,
}

// Safety: the value is only reached through a claim, and the ceiling
// protocol guarantees at most one claim per resource is open at a time.
unsafe impl<T: Send> Sync for Resource<T> {}

impl<T> Resource<T> {
    pub const fn new(id: ResourceId, value: T) -> Self {
        Self {
            id,
            held: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    #[inline]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Whether a claim on this resource is currently open somewhere.
    #[inline]
    pub fn is_claimed(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Claim guard
// ---------------------------------------------------------------------------

/// Exclusive access to a [`Resource`] until dropped.
///
/// Created by [`Context::claim`](crate::kernel::Context::claim). Not
/// `Send`: a claim belongs to the context that opened it.
pub struct Claim<'a, T, P: Port> {
    resource: &'a Resource<T>,
    kernel: &'a Kernel<P>,
    previous: Priority,
    raised: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T, P: Port> Claim<'a, T, P> {
    pub(crate) fn acquire(kernel: &'a Kernel<P>, resource: &'a Resource<T>) -> Self {
        let id = resource.id();
        let ceiling = kernel.ceiling(id);
        let previous = kernel.mask();
        let raised = ceiling > previous;

        // Any holder is below us on this stack, so nothing can take the
        // resource between this check and the mask write
        assert!(!resource.is_claimed(), "{} claimed while already held", id);

        #[cfg(debug_assertions)]
        kernel.push_claim(id, previous);

        // Mask first: from here on nothing that shares `resource` can run
        if raised {
            kernel.set_mask(ceiling);
        }
        resource.held.store(true, Ordering::Release);

        Self {
            resource,
            kernel,
            previous,
            raised,
            _not_send: PhantomData,
        }
    }

    /// The mask level captured when the claim opened; restored on drop.
    #[inline]
    pub fn previous_mask(&self) -> Priority {
        self.previous
    }

    #[inline]
    pub fn ceiling(&self) -> Priority {
        self.kernel.ceiling(self.resource.id())
    }
}

impl<T, P: Port> Deref for Claim<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the open claim is the only path to the value
        unsafe { &*self.resource.value.get() }
    }
}

impl<T, P: Port> DerefMut for Claim<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: the open claim is the only path to the value
        unsafe { &mut *self.resource.value.get() }
    }
}

impl<T, P: Port> Drop for Claim<'_, T, P> {
    fn drop(&mut self) {
        self.resource.held.store(false, Ordering::Release);

        #[cfg(debug_assertions)]
        match self.kernel.pop_claim(self.resource.id()) {
            ClaimRelease::Innermost => {}
            // Closed along with an outer claim released out of order
            ClaimRelease::Closed => return,
            ClaimRelease::OutOfOrder { innermost, restore } => {
                self.kernel.set_mask(restore);
                panic!(
                    "claims released out of order: {} released while {} is innermost",
                    self.resource.id(),
                    innermost
                );
            }
        }

        if self.raised {
            self.kernel.set_mask(self.previous);
            // Anything pended while masked may run now
            self.kernel.preempt();
        }
    }
}

// ---------------------------------------------------------------------------
// Debug claim stack
// ---------------------------------------------------------------------------

/// Open claims in acquisition order, kernel-wide, each with the mask it
/// found. Preempting tasks push and pop above the claims of the task they
/// preempted, so a correct program always releases the top entry.
#[cfg(debug_assertions)]
pub(crate) struct ClaimStack {
    open: heapless::Vec<(ResourceId, Priority), { crate::config::CLAIM_STACK_DEPTH }>,
}

/// Outcome of releasing a claim against the [`ClaimStack`].
#[cfg(debug_assertions)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimRelease {
    Innermost,
    /// `innermost` was still open. Everything from the released claim up
    /// was closed; `restore` is the mask to fall back to.
    OutOfOrder {
        innermost: ResourceId,
        restore: Priority,
    },
    /// Not on the stack any more.
    Closed,
}

#[cfg(debug_assertions)]
impl ClaimStack {
    pub(crate) const fn new() -> Self {
        Self {
            open: heapless::Vec::new(),
        }
    }

    /// Returns `false` if the nesting depth is exhausted.
    pub(crate) fn push(&mut self, id: ResourceId, previous: Priority) -> bool {
        self.open.push((id, previous)).is_ok()
    }

    /// Pop `id`. Released below the top, it is closed together with every
    /// claim opened after it.
    pub(crate) fn release(&mut self, id: ResourceId) -> ClaimRelease {
        let innermost = match self.open.last() {
            Some(&(top, _)) if top == id => {
                self.open.pop();
                return ClaimRelease::Innermost;
            }
            Some(&(top, _)) => top,
            None => return ClaimRelease::Closed,
        };
        match self.open.iter().rposition(|&(open, _)| open == id) {
            Some(at) => {
                let restore = self.open[at].1;
                self.open.truncate(at);
                ClaimRelease::OutOfOrder { innermost, restore }
            }
            None => ClaimRelease::Closed,
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_id_range() {
        assert_eq!(ResourceId::new(0).index(), 0);
        assert_eq!(ResourceId::new(31).index(), 31);
    }

    #[test]
    #[should_panic(expected = "resource id out of range")]
    fn test_resource_id_out_of_range() {
        let _ = ResourceId::new(MAX_RESOURCES as u8);
    }

    #[test]
    fn test_new_resource_is_unclaimed() {
        static RPM: Resource<u32> = Resource::new(ResourceId::new(2), 0);
        assert!(!RPM.is_claimed());
        assert_eq!(RPM.id(), ResourceId::new(2));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_claim_stack_lifo() {
        let a = ResourceId::new(1);
        let b = ResourceId::new(2);
        let mut stack = ClaimStack::new();

        assert!(stack.push(a, Priority::IDLE));
        assert!(stack.push(b, Priority(2)));
        assert_eq!(stack.release(b), ClaimRelease::Innermost);
        assert_eq!(stack.release(a), ClaimRelease::Innermost);
        assert_eq!(stack.depth(), 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_claim_stack_out_of_order_closes_inner_claims() {
        let a = ResourceId::new(1);
        let b = ResourceId::new(2);
        let c = ResourceId::new(3);
        let mut stack = ClaimStack::new();

        assert!(stack.push(a, Priority(1)));
        assert!(stack.push(b, Priority(3)));
        assert!(stack.push(c, Priority(4)));
        assert_eq!(
            stack.release(b),
            ClaimRelease::OutOfOrder { innermost: c, restore: Priority(3) }
        );
        assert_eq!(stack.depth(), 1);

        // c unwinds after b took it down
        assert_eq!(stack.release(c), ClaimRelease::Closed);
        assert_eq!(stack.release(a), ClaimRelease::Innermost);
    }
}
