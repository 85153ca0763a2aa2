use arraydeque::{ArrayDeque, Wrapping};

use crate::BATCH_SIZE;

// Seams to the device/driver layer. The core only ever moves opaque handles through
// these; no buffer layout or register knowledge lives on this side.

/// A transmit queue. Implementations send from the front of the pending deque and pop
/// what they sent.
pub trait TxBurst<T> {
    /// Try to transmit up to batch_size handles. Non-blocking; a short (or zero) return
    /// means the transmit ring is full and the caller decides whether to retry.
    fn tx_burst(
        &mut self,
        bufs: &mut ArrayDeque<[T; BATCH_SIZE], Wrapping>,
        batch_size: usize,
    ) -> usize;
}

/// Per-packet metadata the Poisson pacer needs: the frame length in bytes, excluding
/// preamble, FCS and inter-frame gap (the pacer adds those itself).
pub trait PacketMeta {
    fn wire_len(&self) -> u32;
}

/// A pool of preallocated packet handles.
pub trait PacketPool<T> {
    /// None when the pool is exhausted; that is backpressure, not an error.
    fn alloc(&mut self) -> Option<T>;
    fn free(&mut self, handle: T);
}

/// Trivial freelist pool, useful for tests and software-only runs.
pub struct VecPool<T> {
    handles: Vec<T>,
}

impl<T> VecPool<T> {
    pub fn new(handles: Vec<T>) -> VecPool<T> {
        VecPool { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<T> PacketPool<T> for VecPool<T> {
    fn alloc(&mut self) -> Option<T> {
        self.handles.pop()
    }

    fn free(&mut self, handle: T) {
        self.handles.push(handle);
    }
}
