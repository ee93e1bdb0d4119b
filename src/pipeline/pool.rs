//! Payload release contract
//!
//! Every payload the pipeline gives back (evicted on write, skipped by the
//! worker, discarded on stop) goes through exactly one [`Recycle`] call.
//! After that the pipeline holds no reference to it.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::capture::ImageFrame;

/// Receives payloads the pipeline no longer needs.
pub trait Recycle<P>: Send + Sync {
    fn recycle(&self, payload: P);
}

/// Releases payloads by dropping them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropRecycler;

impl<P> Recycle<P> for DropRecycler {
    fn recycle(&self, payload: P) {
        drop(payload);
    }
}

/// Bounded pool of pixel buffers shared between the producer and the pipeline.
///
/// The producer takes buffers with [`BufferPool::acquire`]; frames the
/// pipeline throws away come back through [`Recycle`]. When the pool is full
/// the returned buffer is simply freed.
pub struct BufferPool {
    buffers: ArrayQueue<BytesMut>,
    reused: AtomicU64,
    allocated: AtomicU64,
}

impl BufferPool {
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: ArrayQueue::new(capacity),
            reused: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
        }
    }

    /// Take a buffer with at least `min_capacity` bytes of room.
    ///
    /// Pooled buffers that are too small are freed rather than grown.
    pub fn acquire(&self, min_capacity: usize) -> BytesMut {
        while let Some(mut buf) = self.buffers.pop() {
            if buf.capacity() >= min_capacity {
                buf.clear();
                self.reused.fetch_add(1, Ordering::Relaxed);
                return buf;
            }
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        BytesMut::with_capacity(min_capacity)
    }

    pub fn release(&self, buf: BytesMut) {
        // Full pool: let the buffer drop.
        let _ = self.buffers.push(buf);
    }

    pub fn available(&self) -> usize {
        self.buffers.len()
    }

    /// `(reused, freshly allocated)` buffer counts since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.reused.load(Ordering::Relaxed),
            self.allocated.load(Ordering::Relaxed),
        )
    }
}

impl Recycle<ImageFrame> for BufferPool {
    fn recycle(&self, payload: ImageFrame) {
        self.release(payload.into_buffer());
    }
}
