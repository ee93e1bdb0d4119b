//! Overwrite-oldest ring buffer for the frame pipeline
//!
//! One producer (the camera callback) writes, one consumer (the processor
//! worker) reads. Writes never wait for the reader: when the buffer is full
//! the oldest unread frame is evicted and handed back to the writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;

/// A frame as stored in the ring buffer
#[derive(Debug, Clone)]
pub struct FrameRecord<P> {
    pub payload: P,

    /// Monotonic capture time, diagnostics only
    pub timestamp: Instant,

    /// Assigned on write; strictly increasing for the buffer's lifetime
    pub sequence_id: u64,
}

/// Result of a skip-ahead read: the newest frame plus everything older that
/// was drained alongside it, oldest first.
#[derive(Debug)]
pub struct LatestFrame<P> {
    pub frame: FrameRecord<P>,
    pub skipped: Vec<FrameRecord<P>>,
}

/// Snapshot of ring buffer counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RingStats {
    pub capacity: usize,
    pub current_size: usize,
    pub total_written: u64,
    pub total_dropped: u64,
    pub total_read: u64,
    pub drop_rate_percent: f64,
}

/// Lock-protected, fixed-capacity frame ring with drop-oldest writes
pub struct FrameRingBuffer<P> {
    /// Slots and cursors; only touched with the lock held
    ring: Mutex<HeapRb<FrameRecord<P>>>,

    capacity: usize,

    /// Never reset, not even by `clear`
    next_sequence: AtomicU64,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    frames_dropped: AtomicU64,
}

impl<P> FrameRingBuffer<P> {
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame ring capacity must be > 0");
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            capacity,
            next_sequence: AtomicU64::new(0),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: store a frame, evicting the oldest unread one if full.
    ///
    /// The evicted record is returned so the caller can release its payload.
    pub fn write(&self, payload: P) -> Option<FrameRecord<P>> {
        let timestamp = Instant::now();

        let evicted = {
            let mut ring = self.lock();
            // Assigned under the lock so slot order always matches sequence order
            let sequence_id = self.next_sequence.fetch_add(1, Ordering::Relaxed);

            // Drop oldest frame
            let evicted = if ring.occupied_len() == self.capacity {
                ring.try_pop()
            } else {
                None
            };
            ring.push_overwrite(FrameRecord {
                payload,
                timestamp,
                sequence_id,
            });
            evicted
        };

        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        if evicted.is_some() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        evicted
    }

    /// Most recently written frame, left in place.
    pub fn peek_latest(&self) -> Option<FrameRecord<P>>
    where
        P: Clone,
    {
        self.lock().iter().last().cloned()
    }

    /// Consumer: take the oldest unread frame.
    pub fn poll_one(&self) -> Option<FrameRecord<P>> {
        let record = self.lock().try_pop();
        if record.is_some() {
            self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Consumer: drain every buffered frame, oldest to newest.
    pub fn poll_all(&self) -> Vec<FrameRecord<P>> {
        let drained = self.drain();
        self.stats
            .frames_read
            .fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    /// Consumer: drain the buffer and keep only the newest frame.
    ///
    /// Older frames come back in [`LatestFrame::skipped`] so the caller can
    /// release them. All of it happens under a single lock acquisition.
    pub fn poll_latest(&self) -> Option<LatestFrame<P>> {
        let mut skipped = self.poll_all();
        let frame = skipped.pop()?;
        Some(LatestFrame { frame, skipped })
    }

    /// Discard everything buffered and return the payloads for release.
    ///
    /// The sequence counter keeps running.
    pub fn clear(&self) -> Vec<P> {
        self.drain().into_iter().map(|record| record.payload).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sequence id the next write will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    pub fn statistics(&self) -> RingStats {
        let total_written = self.stats.frames_written.load(Ordering::Relaxed);
        let total_dropped = self.stats.frames_dropped.load(Ordering::Relaxed);
        let drop_rate_percent = if total_written == 0 {
            0.0
        } else {
            total_dropped as f64 / total_written as f64 * 100.0
        };

        RingStats {
            capacity: self.capacity,
            current_size: self.len(),
            total_written,
            total_dropped,
            total_read: self.stats.frames_read.load(Ordering::Relaxed),
            drop_rate_percent,
        }
    }

    fn drain(&self) -> Vec<FrameRecord<P>> {
        let mut ring = self.lock();
        let mut drained = Vec::with_capacity(ring.occupied_len());
        while let Some(record) = ring.try_pop() {
            drained.push(record);
        }
        drained
    }

    // Nothing user-supplied runs under this lock, so a poisoned guard still
    // holds a consistent ring.
    fn lock(&self) -> MutexGuard<'_, HeapRb<FrameRecord<P>>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P> std::fmt::Debug for FrameRingBuffer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameRingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("next_sequence", &self.next_sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn payloads<P>(records: Vec<FrameRecord<P>>) -> Vec<P> {
        records.into_iter().map(|r| r.payload).collect()
    }

    #[test]
    fn size_never_exceeds_capacity() {
        let rb = FrameRingBuffer::new(4);
        for i in 0..4 + 7 {
            rb.write(i);
            assert!(rb.len() <= rb.capacity());
        }
        assert_eq!(rb.len(), 4);
        assert!(rb.is_full());
        assert_eq!(rb.statistics().total_dropped, 7);
    }

    #[test]
    fn reads_in_write_order() {
        let rb = FrameRingBuffer::new(3);
        rb.write('A');
        rb.write('B');
        rb.write('C');
        assert_eq!(payloads(rb.poll_all()), vec!['A', 'B', 'C']);
        assert!(rb.is_empty());
    }

    #[test]
    fn full_write_evicts_oldest() {
        let rb = FrameRingBuffer::new(2);
        assert!(rb.write('A').is_none());
        assert!(rb.write('B').is_none());
        let evicted = rb.write('C').map(|r| r.payload);
        assert_eq!(evicted, Some('A'));
        assert_eq!(payloads(rb.poll_all()), vec!['B', 'C']);
    }

    #[test]
    fn eviction_keeps_oldest_remaining_next() {
        let rb = FrameRingBuffer::new(3);
        for i in 0..5 {
            rb.write(i);
        }
        assert_eq!(rb.poll_one().map(|r| r.payload), Some(2));
        rb.write(5);
        assert_eq!(payloads(rb.poll_all()), vec![3, 4, 5]);
    }

    #[test]
    fn sequence_ids_strictly_increase() {
        let rb = FrameRingBuffer::new(2);
        let mut seen = Vec::new();
        for i in 0..6 {
            if let Some(evicted) = rb.write(i) {
                seen.push(evicted.sequence_id);
            }
        }
        seen.extend(rb.poll_all().into_iter().map(|r| r.sequence_id));
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn sequence_survives_clear() {
        let rb = FrameRingBuffer::new(3);
        rb.write(1);
        rb.write(2);
        rb.clear();
        rb.write(3);
        assert_eq!(rb.poll_one().map(|r| r.sequence_id), Some(2));
        assert_eq!(rb.next_sequence(), 3);
    }

    #[test]
    fn drop_rate_percent() {
        let rb = FrameRingBuffer::new(7);
        assert_eq!(rb.statistics().drop_rate_percent, 0.0);
        for i in 0..10 {
            rb.write(i);
        }
        let stats = rb.statistics();
        assert_eq!(stats.total_written, 10);
        assert_eq!(stats.total_dropped, 3);
        assert!((stats.drop_rate_percent - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clear_returns_all_payloads() {
        let rb = FrameRingBuffer::new(3);
        rb.write('A');
        rb.write('B');
        assert_eq!(rb.clear(), vec!['A', 'B']);
        assert_eq!(rb.len(), 0);
        assert_eq!(rb.statistics().total_read, 0);
    }

    #[test]
    fn peek_does_not_consume() {
        let rb = FrameRingBuffer::new(3);
        assert!(rb.peek_latest().is_none());
        rb.write(10);
        rb.write(11);
        assert_eq!(rb.peek_latest().map(|r| r.payload), Some(11));
        assert_eq!(rb.len(), 2);
    }

    #[test]
    fn empty_reads_return_nothing() {
        let rb: FrameRingBuffer<u8> = FrameRingBuffer::new(2);
        assert!(rb.poll_one().is_none());
        assert!(rb.poll_all().is_empty());
        assert!(rb.poll_latest().is_none());
        assert!(rb.clear().is_empty());
    }

    #[test]
    fn poll_latest_skips_ahead() {
        let rb = FrameRingBuffer::new(4);
        for i in 0..3 {
            rb.write(i);
        }
        let latest = rb.poll_latest().unwrap();
        assert_eq!(latest.frame.payload, 2);
        assert_eq!(payloads(latest.skipped), vec![0, 1]);
        assert!(rb.is_empty());
        assert_eq!(rb.statistics().total_read, 3);
    }

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn zero_capacity_rejected() {
        let _ = FrameRingBuffer::<u8>::new(0);
    }

    #[test]
    fn concurrent_writer_and_reader_account_for_every_frame() {
        const FRAMES: u64 = 10_000;
        let rb = Arc::new(FrameRingBuffer::new(3));

        let writer = {
            let rb = Arc::clone(&rb);
            thread::spawn(move || {
                let mut evicted = 0u64;
                for i in 0..FRAMES {
                    if rb.write(i).is_some() {
                        evicted += 1;
                    }
                }
                evicted
            })
        };

        let mut last_seq = None;
        let mut read = 0u64;
        while !writer.is_finished() || !rb.is_empty() {
            if let Some(record) = rb.poll_one() {
                if let Some(prev) = last_seq {
                    assert!(record.sequence_id > prev);
                }
                last_seq = Some(record.sequence_id);
                read += 1;
            }
        }
        let evicted = writer.join().unwrap();

        let stats = rb.statistics();
        assert_eq!(stats.total_written, FRAMES);
        assert_eq!(stats.total_dropped, evicted);
        assert_eq!(read + evicted, FRAMES);
    }
}
