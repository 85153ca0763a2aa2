use std::cell::UnsafeCell;
use std::cmp::min;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arraydeque::{ArrayDeque, Wrapping};

use crate::util::is_pow_of_two;
use crate::BATCH_SIZE;

// Bounded single-producer/single-consumer ring used to hand prepared packets from the
// application thread to the transmit thread. Indices grow without bound and are masked
// on access; the Release store on the index makes the slot contents visible before the
// other side can observe the new index.

struct RingInner<T> {
    mask: usize,
    // head: next slot the producer writes, tail: next slot the consumer reads
    head: AtomicUsize,
    tail: AtomicUsize,
    slots: Vec<UnsafeCell<MaybeUninit<T>>>,
}

unsafe impl<T: Send> Send for RingInner<T> {}
unsafe impl<T: Send> Sync for RingInner<T> {}

impl<T> Drop for RingInner<T> {
    fn drop(&mut self) {
        // Both ends are gone at this point so plain loads are fine.
        let head = self.head.load(Ordering::Relaxed);
        let mut tail = self.tail.load(Ordering::Relaxed);

        while tail != head {
            unsafe {
                let slot = self.slots[tail & self.mask].get();
                (*slot).as_mut_ptr().drop_in_place();
            }
            tail = tail.wrapping_add(1);
        }
    }
}

/// The enqueue end of a RingChannel. Owned by exactly one thread.
pub struct RingProducer<T> {
    inner: Arc<RingInner<T>>,
    cached_tail: usize,
}

/// The dequeue end of a RingChannel. Owned by exactly one thread.
pub struct RingConsumer<T> {
    inner: Arc<RingInner<T>>,
    cached_head: usize,
}

pub struct RingChannel;

impl RingChannel {
    /// Create a new channel with at least the requested capacity (rounded up to a power
    /// of two). The two ends enforce the single-producer/single-consumer discipline.
    pub fn new<T>(capacity: usize) -> (RingProducer<T>, RingConsumer<T>) {
        let capacity = if is_pow_of_two(capacity) {
            capacity
        } else {
            capacity.max(2).next_power_of_two()
        };

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        let inner = Arc::new(RingInner {
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            slots,
        });

        (
            RingProducer {
                inner: inner.clone(),
                cached_tail: 0,
            },
            RingConsumer {
                inner,
                cached_head: 0,
            },
        )
    }
}

impl<T> RingProducer<T> {
    /// Enqueue one item. On a full ring the item is handed back to the caller; nothing is
    /// ever overwritten and this never blocks.
    #[inline]
    pub fn try_enqueue(&mut self, item: T) -> Result<(), T> {
        let head = self.inner.head.load(Ordering::Relaxed);
        let capacity = self.inner.mask + 1;

        if head.wrapping_sub(self.cached_tail) >= capacity {
            self.cached_tail = self.inner.tail.load(Ordering::Acquire);
            if head.wrapping_sub(self.cached_tail) >= capacity {
                return Err(item);
            }
        }

        unsafe {
            let slot = self.inner.slots[head & self.inner.mask].get();
            (*slot).as_mut_ptr().write(item);
        }
        self.inner.head.store(head.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }

    /// Advisory only: the consumer may be dequeuing concurrently.
    pub fn approx_len(&self) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }
}

impl<T> RingConsumer<T> {
    /// Dequeue one item. An empty ring is not an error.
    #[inline]
    pub fn try_dequeue(&mut self) -> Option<T> {
        let tail = self.inner.tail.load(Ordering::Relaxed);

        if tail == self.cached_head {
            self.cached_head = self.inner.head.load(Ordering::Acquire);
            if tail == self.cached_head {
                return None;
            }
        }

        let item = unsafe {
            let slot = self.inner.slots[tail & self.inner.mask].get();
            (*slot).as_ptr().read()
        };
        self.inner.tail.store(tail.wrapping_add(1), Ordering::Release);

        Some(item)
    }

    /// Dequeue up to batch_size items into the pending deque. Best effort, partial reads
    /// are fine. Returns the number of items moved.
    #[inline]
    pub fn dequeue_batch(
        &mut self,
        bufs: &mut ArrayDeque<[T; BATCH_SIZE], Wrapping>,
        batch_size: usize,
    ) -> usize {
        let wanted = min(bufs.capacity() - bufs.len(), batch_size);
        let mut n = 0;

        while n < wanted {
            match self.try_dequeue() {
                Some(item) => {
                    // Cannot wrap: wanted is clamped to the free space above.
                    bufs.push_back(item);
                    n += 1;
                }
                None => break,
            }
        }

        n
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask + 1
    }

    /// Advisory only: the producer may be enqueuing concurrently.
    pub fn approx_len(&self) -> usize {
        let head = self.inner.head.load(Ordering::Relaxed);
        let tail = self.inner.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail)
    }
}
