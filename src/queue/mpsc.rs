//! Multi-producer ring buffer with per-slot sequence numbers.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use portable_atomic::{AtomicUsize, Ordering};

use super::Full;

struct Slot<T> {
    /// `pos` when free for the producer at `pos`, `pos + 1` once written,
    /// `pos + N` once consumed (free for the next lap).
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new(seq: usize) -> Self {
        Self {
            seq: AtomicUsize::new(seq),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Bounded lock-free queue that any number of tasks may enqueue into.
///
/// Producers reserve a position with a compare-and-swap on the write
/// index, then write the slot and publish it through the slot's sequence
/// number. A producer preempted between reserving and publishing leaves
/// its slot unpublished: the consumer reports empty until it resumes, and
/// later producers are never blocked by it.
///
/// `N` must be a power of two. Operations take `&self`, so the queue can
/// live in a plain `static`. Dequeueing is intended for one consumer
/// (the kernel uses it as a per-level ready queue drained only by that
/// level's dispatcher), though concurrent consumers remain memory-safe.
pub struct MpscQueue<T, const N: usize> {
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
    slots: [Slot<T>; N],
}

unsafe impl<T: Send, const N: usize> Sync for MpscQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Send for MpscQueue<T, N> {}

impl<T, const N: usize> MpscQueue<T, N> {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY_SLOT: Slot<T> = Slot::new(0);

    const POWER_OF_TWO: () = assert!(N.is_power_of_two(), "capacity must be a power of two");

    const MASK: usize = N - 1;

    /// Create an empty queue. Usable in `static` initializers.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::POWER_OF_TWO;

        let mut slots = [Self::EMPTY_SLOT; N];
        let mut i = 0;
        while i < N {
            slots[i] = Slot::new(i);
            i += 1;
        }

        Self {
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
            slots,
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Approximate number of stored values (exact when no producer or
    /// consumer is mid-operation).
    pub fn len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Acquire);
        let head = self.dequeue_pos.load(Ordering::Acquire);
        tail.wrapping_sub(head).min(N)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `value` at the back. Never blocks; fails with [`Full`] when
    /// every slot is occupied or still being consumed.
    pub fn enqueue(&self, value: T) -> Result<(), Full<T>> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & Self::MASK];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = (seq as isize).wrapping_sub(pos as isize);

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: the CAS made this position ours alone
                        unsafe { (*slot.value.get()).write(value) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(Full(value));
            } else {
                // Another producer took this position
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Take the oldest published value, or `None`.
    pub fn dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & Self::MASK];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = (seq as isize).wrapping_sub(pos.wrapping_add(1) as isize);

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: published by a producer, and the CAS made
                        // this position ours alone
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq.store(pos.wrapping_add(N), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T, const N: usize> Default for MpscQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for MpscQueue<T, N> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::vec::Vec;

    #[test]
    fn test_fifo_and_capacity() {
        let q: MpscQueue<u8, 4> = MpscQueue::new();
        assert_eq!(q.dequeue(), None);

        for v in 0..4 {
            q.enqueue(v).unwrap();
        }
        assert_eq!(q.len(), 4);
        assert_eq!(q.enqueue(4), Err(Full(4)));

        for v in 0..4 {
            assert_eq!(q.dequeue(), Some(v));
        }
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_many_laps() {
        let q: MpscQueue<u32, 2> = MpscQueue::new();
        for i in 0..1000 {
            q.enqueue(i).unwrap();
            q.enqueue(i + 1).unwrap();
            assert!(q.enqueue(0).is_err());
            assert_eq!(q.dequeue(), Some(i));
            assert_eq!(q.dequeue(), Some(i + 1));
        }
    }

    #[test]
    fn test_static_queue() {
        static READY: MpscQueue<u16, 8> = MpscQueue::new();
        READY.enqueue(3).unwrap();
        READY.enqueue(1).unwrap();
        assert_eq!(READY.dequeue(), Some(3));
        assert_eq!(READY.dequeue(), Some(1));
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 500;

        let q: Arc<MpscQueue<(u32, u32), 16>> = Arc::new(MpscQueue::new());

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = q.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        while q.enqueue((p, i)).is_err() {
                            std::thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let mut next = [0u32; PRODUCERS as usize];
        let mut received = 0;
        while received < PRODUCERS * PER_PRODUCER {
            if let Some((p, i)) = q.dequeue() {
                assert_eq!(next[p as usize], i, "producer {} out of order", p);
                next[p as usize] += 1;
                received += 1;
            }
        }

        for h in handles {
            h.join().unwrap();
        }
        assert!(q.is_empty());
    }
}
