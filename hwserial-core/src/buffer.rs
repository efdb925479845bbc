//! Single-producer, single-consumer circular buffer
//!
//! One side (foreground or an interrupt handler) only pushes, the other
//! only pops. Head and tail are free-running `u8` counters, so a load or
//! store of either is a single instruction on an 8-bit core and no lock is
//! needed. The slot index is the counter masked by `N - 1`; the occupied
//! count is `head - tail` with wrapping arithmetic, which leaves the whole
//! capacity usable.
//!
//! Only the producer stores `head` and only the consumer stores `tail`.
//! Each side publishes its counter with release ordering after touching
//! the slot, and reads the other side's counter with acquire ordering.

#![allow(unsafe_code)]

use core::cell::UnsafeCell;

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

/// Fixed-capacity SPSC ring
///
/// `N` must be a power of two no larger than 128: with 8-bit counters a
/// count of 256 reads the same as 0, and wider counters are not single
/// loads or stores on AVR. The type is not `Sync`; it is shared between
/// contexts only through `ChannelState`.
pub struct RingBuffer<T, const N: usize> {
    slots: UnsafeCell<[T; N]>,
    /// Next slot to write; stored by the producer only
    head: AtomicU8,
    /// Next slot to read; stored by the consumer only
    tail: AtomicU8,
    /// A push found the buffer full
    overflow: AtomicBool,
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    const CAPACITY_OK: () = assert!(
        N.is_power_of_two() && N <= 128,
        "ring capacity must be a power of two no larger than 128"
    );

    const MASK: u8 = (N - 1) as u8;

    /// Empty buffer with every slot set to `fill`
    pub const fn new(fill: T) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        Self {
            slots: UnsafeCell::new([fill; N]),
            head: AtomicU8::new(0),
            tail: AtomicU8::new(0),
            overflow: AtomicBool::new(false),
        }
    }

    /// Total number of slots
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Raw producer counter
    pub fn head(&self) -> u8 {
        self.head.load(Ordering::Acquire)
    }

    /// Raw consumer counter
    pub fn tail(&self) -> u8 {
        self.tail.load(Ordering::Acquire)
    }

    /// Number of stored elements
    pub fn available(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    /// Number of free slots
    pub fn free_space(&self) -> usize {
        N - self.available()
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn is_full(&self) -> bool {
        self.available() == N
    }

    /// Append `value` (producer side)
    ///
    /// Returns `false` and raises the overflow flag if the buffer is full;
    /// the value is dropped and the stored contents are untouched.
    pub fn push(&self, value: T) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) as usize >= N {
            self.overflow.store(true, Ordering::Relaxed);
            return false;
        }
        // SAFETY: the slot at `head` is outside the occupied range, so the
        // consumer does not read it until `head` is published below, and
        // this is the only producer.
        unsafe { self.slot(head).write(value) };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Remove the oldest element (consumer side)
    pub fn pop(&self) -> Option<T> {
        self.pop_with_remaining().map(|(value, _)| value)
    }

    /// Remove the oldest element and report how many remain
    ///
    /// The remaining count comes from the same producer snapshot used for
    /// the emptiness check.
    pub fn pop_with_remaining(&self) -> Option<(T, usize)> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: `tail != head`, so the slot holds a value published by
        // the producer, and only this consumer advances `tail`.
        let value = unsafe { self.slot(tail).read() };
        let tail = tail.wrapping_add(1);
        self.tail.store(tail, Ordering::Release);
        Some((value, head.wrapping_sub(tail) as usize))
    }

    /// Oldest element without removing it (consumer side)
    pub fn peek(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: as in `pop_with_remaining`.
        Some(unsafe { self.slot(tail).read() })
    }

    /// Discard everything currently stored (consumer side)
    ///
    /// Elements pushed concurrently after the head snapshot survive.
    pub fn clear(&self) {
        let head = self.head.load(Ordering::Acquire);
        self.tail.store(head, Ordering::Release);
    }

    /// Whether a push has failed since the flag was last taken
    pub fn overflowed(&self) -> bool {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Read and clear the overflow flag
    pub fn take_overflow(&self) -> bool {
        self.overflow.swap(false, Ordering::Relaxed)
    }

    fn slot(&self, counter: u8) -> *mut T {
        let index = (counter & Self::MASK) as usize;
        // In bounds: index <= MASK < N.
        self.slots.get().cast::<T>().wrapping_add(index)
    }
}

impl<T: Copy + Default, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    #[test]
    fn test_new_is_empty() {
        let ring: RingBuffer<u8, 16> = RingBuffer::new(0);
        assert!(ring.is_empty());
        assert!(!ring.is_full());
        assert_eq!(ring.available(), 0);
        assert_eq!(ring.free_space(), 16);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.peek(), None);
    }

    #[test]
    fn test_fifo_order() {
        let ring: RingBuffer<u8, 8> = RingBuffer::new(0);
        for b in 1..=5 {
            assert!(ring.push(b));
        }
        assert_eq!(ring.peek(), Some(1));
        for b in 1..=5 {
            assert_eq!(ring.pop(), Some(b));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_capacity_usable() {
        let ring: RingBuffer<u8, 16> = RingBuffer::new(0);
        for b in 0..16 {
            assert!(ring.push(b));
        }
        assert!(ring.is_full());
        assert_eq!(ring.free_space(), 0);
        assert!(!ring.overflowed());
    }

    #[test]
    fn test_largest_ring_full_across_wrap() {
        let ring: RingBuffer<u8, 128> = RingBuffer::new(0);
        for b in 0..100u8 {
            ring.push(b);
            ring.pop();
        }
        for b in 0..128u8 {
            assert!(ring.push(b));
        }
        assert!(ring.is_full());
        assert_eq!(ring.available(), 128);
        assert_eq!(ring.head().wrapping_sub(ring.tail()), 128);
        assert!(!ring.push(0xFF));

        for b in 0..128u8 {
            assert_eq!(ring.pop(), Some(b));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let ring: RingBuffer<u8, 16> = RingBuffer::new(0);
        for b in 0..16 {
            ring.push(b);
        }
        assert!(!ring.push(0xAA));
        assert!(!ring.push(0xBB));
        assert!(ring.overflowed());

        let drained: std::vec::Vec<u8> = core::iter::from_fn(|| ring.pop()).collect();
        assert_eq!(drained, (0..16u8).collect::<std::vec::Vec<_>>());
    }

    #[test]
    fn test_overflow_flag_sticky_until_taken() {
        let ring: RingBuffer<u8, 16> = RingBuffer::new(0);
        for b in 0..17 {
            ring.push(b);
        }
        ring.pop();
        assert!(ring.push(1));
        assert!(ring.overflowed());

        assert!(ring.take_overflow());
        assert!(!ring.take_overflow());
        assert!(!ring.overflowed());
    }

    #[test]
    fn test_counters_wrap() {
        let ring: RingBuffer<u8, 128> = RingBuffer::new(0);
        for round in 0..10u32 {
            for i in 0..100u32 {
                assert!(ring.push((round * 100 + i) as u8));
            }
            for i in 0..100u32 {
                assert_eq!(ring.pop(), Some((round * 100 + i) as u8));
            }
        }
        assert!(ring.is_empty());
        assert_eq!(ring.head(), ring.tail());
    }

    #[test]
    fn test_pop_with_remaining() {
        let ring: RingBuffer<u8, 16> = RingBuffer::new(0);
        ring.push(7);
        ring.push(8);
        assert_eq!(ring.pop_with_remaining(), Some((7, 1)));
        assert_eq!(ring.pop_with_remaining(), Some((8, 0)));
        assert_eq!(ring.pop_with_remaining(), None);
    }

    #[test]
    fn test_clear() {
        let ring: RingBuffer<u8, 16> = RingBuffer::new(0);
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.push(3));
        assert_eq!(ring.pop(), Some(3));
    }

    /// One producer thread and one consumer thread, standing in for
    /// foreground and interrupt context
    struct Shared(RingBuffer<u16, 32>);

    // SAFETY: exactly one thread pushes and exactly one pops.
    unsafe impl Sync for Shared {}

    #[test]
    fn test_concurrent_producer_consumer() {
        const COUNT: u16 = 5000;
        let shared = Shared(RingBuffer::new(0));

        std::thread::scope(|s| {
            let ring = &shared.0;
            let producer = &shared;
            s.spawn(move || {
                for v in 0..COUNT {
                    while producer.0.is_full() {
                        std::hint::spin_loop();
                    }
                    assert!(producer.0.push(v));
                }
            });

            let mut expected = 0;
            while expected < COUNT {
                if let Some(v) = ring.pop() {
                    assert_eq!(v, expected);
                    expected += 1;
                }
            }
        });
        assert!(shared.0.is_empty());
        assert!(!shared.0.overflowed());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u8),
        Pop,
        Clear,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => any::<u8>().prop_map(Op::Push),
            2 => Just(Op::Pop),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_model(ops in proptest::collection::vec(op(), 0..400)) {
            let ring: RingBuffer<u8, 16> = RingBuffer::new(0);
            let mut model: VecDeque<u8> = VecDeque::new();
            let mut model_overflow = false;

            for op in ops {
                match op {
                    Op::Push(v) => {
                        let accepted = ring.push(v);
                        prop_assert_eq!(accepted, model.len() < 16);
                        if accepted {
                            model.push_back(v);
                        } else {
                            model_overflow = true;
                        }
                    }
                    Op::Pop => prop_assert_eq!(ring.pop(), model.pop_front()),
                    Op::Clear => {
                        ring.clear();
                        model.clear();
                    }
                }

                let count = ring.head().wrapping_sub(ring.tail()) as usize;
                prop_assert!(count <= 16);
                prop_assert_eq!(count, model.len());
                prop_assert_eq!(ring.available(), model.len());
                prop_assert_eq!(ring.overflowed(), model_overflow);
            }
        }
    }
}
