//! Single-producer/single-consumer ring buffer.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;

use portable_atomic::{AtomicUsize, Ordering};

use super::Full;

/// Fixed-capacity SPSC ring buffer holding up to `N` values.
///
/// Both indices run over `0..2 * N`, so a full queue (indices one lap
/// apart) is distinguishable from an empty one (indices equal) and all `N`
/// slots are usable for any `N`.
///
/// The producer only ever stores `tail` and the slot at `tail`; the
/// consumer only ever stores `head` and reads the slot at `head`. A slot
/// changes hands by the Release store of the owning index.
///
/// # Example
/// ```
/// use ceilos::queue::Queue;
///
/// let mut q: Queue<u16, 4> = Queue::new();
/// let (mut tx, mut rx) = q.split();
/// tx.enqueue(7).unwrap();
/// assert_eq!(rx.dequeue(), Some(7));
/// ```
pub struct Queue<T, const N: usize> {
    /// Next slot to read (consumer-owned).
    head: AtomicUsize,
    /// Next slot to write (producer-owned).
    tail: AtomicUsize,
    buffer: [UnsafeCell<MaybeUninit<T>>; N],
}

// Safety: values are moved in by one side and out by the other, never
// shared, and each index has a single writer.
unsafe impl<T: Send, const N: usize> Sync for Queue<T, N> {}
unsafe impl<T: Send, const N: usize> Send for Queue<T, N> {}

impl<T, const N: usize> Queue<T, N> {
    #[allow(clippy::declare_interior_mutable_const)]
    const EMPTY_SLOT: UnsafeCell<MaybeUninit<T>> = UnsafeCell::new(MaybeUninit::uninit());

    const NONZERO: () = assert!(N > 0, "queue capacity must be non-zero");

    /// Create an empty queue. Usable in `static` initializers.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NONZERO;
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            buffer: [Self::EMPTY_SLOT; N],
        }
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of values currently stored.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        Self::distance(head, tail)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == N
    }

    /// Store `value` at the back. Fails with [`Full`] if all `N` slots are
    /// occupied.
    pub fn enqueue(&mut self, value: T) -> Result<(), Full<T>> {
        // Safety: `&mut self` excludes any other producer or consumer
        unsafe { self.inner_enqueue(value) }
    }

    /// Take the oldest value, or `None` if empty.
    pub fn dequeue(&mut self) -> Option<T> {
        // Safety: `&mut self` excludes any other producer or consumer
        unsafe { self.inner_dequeue() }
    }

    /// Borrow the oldest value without removing it.
    pub fn peek(&self) -> Option<&T> {
        // Safety: with `&self` nobody can dequeue while the borrow lives
        unsafe { self.inner_peek() }
    }

    /// Split into the two halves. The borrow of `self` keeps the queue
    /// alive and prevents a second split while the halves exist.
    pub fn split(&mut self) -> (Producer<'_, T, N>, Consumer<'_, T, N>) {
        (Producer { queue: self }, Consumer { queue: self })
    }

    #[inline]
    const fn next(index: usize) -> usize {
        if index + 1 == 2 * N {
            0
        } else {
            index + 1
        }
    }

    #[inline]
    const fn slot(index: usize) -> usize {
        if index >= N {
            index - N
        } else {
            index
        }
    }

    #[inline]
    const fn distance(head: usize, tail: usize) -> usize {
        if tail >= head {
            tail - head
        } else {
            2 * N - head + tail
        }
    }

    /// # Safety
    /// Only one context may act as producer at a time.
    unsafe fn inner_enqueue(&self, value: T) -> Result<(), Full<T>> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if Self::distance(head, tail) == N {
            return Err(Full(value));
        }

        (*self.buffer[Self::slot(tail)].get()).write(value);

        // Publish only after the slot is fully written
        self.tail.store(Self::next(tail), Ordering::Release);
        Ok(())
    }

    /// # Safety
    /// Only one context may act as consumer at a time.
    unsafe fn inner_dequeue(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let value = (*self.buffer[Self::slot(head)].get()).assume_init_read();

        // Hand the slot back to the producer
        self.head.store(Self::next(head), Ordering::Release);
        Some(value)
    }

    /// # Safety
    /// The returned reference must not outlive the next dequeue.
    unsafe fn inner_peek(&self) -> Option<&T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        Some((*self.buffer[Self::slot(head)].get()).assume_init_ref())
    }
}

impl<T, const N: usize> Default for Queue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for Queue<T, N> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

// ---------------------------------------------------------------------------
// Split halves
// ---------------------------------------------------------------------------

/// Write half of a split [`Queue`].
pub struct Producer<'a, T, const N: usize> {
    queue: &'a Queue<T, N>,
}

impl<'a, T, const N: usize> Producer<'a, T, N> {
    /// Store `value` at the back; see [`Queue::enqueue`].
    #[inline]
    pub fn enqueue(&mut self, value: T) -> Result<(), Full<T>> {
        // Safety: this is the only producer handle for the queue
        unsafe { self.queue.inner_enqueue(value) }
    }

    /// Whether the next enqueue would succeed. May become stale in the
    /// producer's favour only (the consumer can free slots, not take them).
    #[inline]
    pub fn ready(&self) -> bool {
        !self.queue.is_full()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

/// Read half of a split [`Queue`].
pub struct Consumer<'a, T, const N: usize> {
    queue: &'a Queue<T, N>,
}

impl<'a, T, const N: usize> Consumer<'a, T, N> {
    /// Take the oldest value; see [`Queue::dequeue`].
    #[inline]
    pub fn dequeue(&mut self) -> Option<T> {
        // Safety: this is the only consumer handle for the queue
        unsafe { self.queue.inner_dequeue() }
    }

    /// Borrow the oldest value. The borrow ends before the next dequeue
    /// because dequeue needs `&mut self`.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        // Safety: this is the only consumer handle for the queue
        unsafe { self.queue.inner_peek() }
    }

    /// Whether a value is available. May become stale in the consumer's
    /// favour only.
    #[inline]
    pub fn ready(&self) -> bool {
        !self.queue.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec;

    #[test]
    fn test_fifo_and_capacity() {
        let mut q: Queue<u32, 4> = Queue::new();
        assert!(q.is_empty());
        assert_eq!(q.capacity(), 4);

        for v in 1..=4 {
            q.enqueue(v).unwrap();
        }
        assert!(q.is_full());
        assert_eq!(q.enqueue(5), Err(Full(5)));

        for v in 1..=4 {
            assert_eq!(q.dequeue(), Some(v));
        }
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_non_power_of_two_capacity_wraps() {
        let mut q: Queue<u32, 3> = Queue::new();
        for lap in 0..10u32 {
            for i in 0..3 {
                q.enqueue(lap * 10 + i).unwrap();
            }
            assert!(q.enqueue(99).is_err());
            for i in 0..3 {
                assert_eq!(q.dequeue(), Some(lap * 10 + i));
            }
            assert!(q.is_empty());
        }
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut q: Queue<u8, 2> = Queue::new();
        assert_eq!(q.peek(), None);
        q.enqueue(42).unwrap();
        assert_eq!(q.peek(), Some(&42));
        assert_eq!(q.len(), 1);
        assert_eq!(q.dequeue(), Some(42));
    }

    #[test]
    fn test_split_halves() {
        let mut q: Queue<u16, 8> = Queue::new();
        let (mut tx, mut rx) = q.split();

        assert!(tx.ready());
        assert!(!rx.ready());

        for v in 0..8 {
            tx.enqueue(v).unwrap();
        }
        assert!(!tx.ready());
        assert_eq!(tx.enqueue(8).map_err(Full::into_inner), Err(8));

        assert_eq!(rx.peek(), Some(&0));
        let drained: Vec<u16> = core::iter::from_fn(|| rx.dequeue()).collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_across_threads() {
        static mut QUEUE: Queue<u32, 16> = Queue::new();
        // Safety: the only reference to QUEUE in the program
        let q = unsafe { &mut *core::ptr::addr_of_mut!(QUEUE) };
        let (mut tx, mut rx) = q.split();

        std::thread::scope(|s| {
            s.spawn(move || {
                for v in 0..1000u32 {
                    let mut v = v;
                    loop {
                        match tx.enqueue(v) {
                            Ok(()) => break,
                            Err(Full(back)) => {
                                v = back;
                                std::thread::yield_now();
                            }
                        }
                    }
                }
            });

            let mut expected = 0u32;
            while expected < 1000 {
                if let Some(v) = rx.dequeue() {
                    assert_eq!(v, expected);
                    expected += 1;
                }
            }
        });
    }

    #[test]
    fn test_remaining_values_dropped_with_queue() {
        let marker = Rc::new(());
        {
            let mut q: Queue<Rc<()>, 4> = Queue::new();
            q.enqueue(marker.clone()).unwrap();
            q.enqueue(marker.clone()).unwrap();
            assert_eq!(Rc::strong_count(&marker), 3);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    /// `Some(x)` enqueues `x`, `None` dequeues; the queue must agree with a
    /// bounded `VecDeque` at every step.
    #[quickcheck]
    fn quickcheck_matches_bounded_model(ops: Vec<Option<u8>>) -> bool {
        let mut q: Queue<u8, 5> = Queue::new();
        let mut model = VecDeque::new();

        for op in ops {
            match op {
                Some(v) => {
                    let expect_full = model.len() == 5;
                    match q.enqueue(v) {
                        Ok(()) if !expect_full => model.push_back(v),
                        Err(Full(back)) if expect_full && back == v => {}
                        _ => return false,
                    }
                }
                None => {
                    if q.dequeue() != model.pop_front() {
                        return false;
                    }
                }
            }
            if q.len() != model.len() {
                return false;
            }
        }
        true
    }
}
