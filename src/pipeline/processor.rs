//! Paced background processing of the freshest camera frame
//!
//! ```text
//! camera callback ──submit_frame──▶ FrameRingBuffer ──poll_latest──▶ worker
//!                                                                  │
//!                                      sink ◀──publish── transform ◀┘
//! ```
//!
//! `submit_frame` only touches the ring buffer, so the camera thread returns
//! immediately no matter how slow the transform is. The worker always takes
//! the newest frame and releases everything older, then waits out the rest
//! of the processing interval. An overrun iteration loops straight away; the
//! backlog is never replayed.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use crossbeam::utils::CachePadded;
use serde::Serialize;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::PipelineResult;
use crate::pipeline::pool::{DropRecycler, Recycle};
use crate::pipeline::ringbuf::{FrameRecord, FrameRingBuffer, LatestFrame, RingStats};
use crate::pipeline::sink::FrameSink;
use crate::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorState {
    Stopped,
    Running,
}

/// Ring buffer counters plus worker-side counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub buffer: RingStats,
    /// Transform calls that returned normally
    pub frames_processed: u64,
    /// Frames drained but discarded in favour of a newer one
    pub frames_skipped: u64,
    /// Transform errors and panics
    pub transform_failures: u64,
    pub frames_published: u64,
    pub publish_failures: u64,
    /// Iterations that took longer than the processing interval
    pub pacing_overruns: u64,
    pub avg_transform_latency_us: f64,
}

#[derive(Default)]
struct Counters {
    frames_processed: AtomicU64,
    frames_skipped: AtomicU64,
    transform_failures: AtomicU64,
    frames_published: AtomicU64,
    publish_failures: AtomicU64,
    pacing_overruns: AtomicU64,
    transform_runs: AtomicU64,
    transform_time_us: AtomicU64,
}

impl Counters {
    fn record_transform(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        self.transform_runs.fetch_add(1, Ordering::Relaxed);
        self.transform_time_us.fetch_add(us, Ordering::Relaxed);
        metrics::histogram!("shutter_transform_latency_us").record(us as f64);
    }

    fn avg_transform_latency_us(&self) -> f64 {
        let runs = self.transform_runs.load(Ordering::Relaxed);
        if runs == 0 {
            return 0.0;
        }
        self.transform_time_us.load(Ordering::Relaxed) as f64 / runs as f64
    }
}

struct Worker {
    /// Never sent on; dropping it wakes and stops the worker
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Decouples frame production from frame transformation.
///
/// The producer calls [`submit_frame`](Self::submit_frame) from the camera
/// thread; a single dedicated worker started by [`start`](Self::start) is the
/// only reader of the internal buffer. `start` and `stop` are idempotent and
/// may be called from any thread.
pub struct AsyncFrameProcessor<P: Send + 'static> {
    buffer: Arc<FrameRingBuffer<P>>,
    config: PipelineConfig,
    recycler: Arc<dyn Recycle<P>>,
    counters: Arc<CachePadded<Counters>>,
    worker: Mutex<Option<Worker>>,
}

impl<P: Send + 'static> AsyncFrameProcessor<P> {
    /// Processor that releases discarded frames by dropping them
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        Self::with_recycler(config, Arc::new(DropRecycler))
    }

    /// Processor that hands every discarded frame to `recycler`
    pub fn with_recycler(
        config: PipelineConfig,
        recycler: Arc<dyn Recycle<P>>,
    ) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            buffer: Arc::new(FrameRingBuffer::new(config.ring_buffer_size)),
            config,
            recycler,
            counters: Arc::new(CachePadded::new(Counters::default())),
            worker: Mutex::new(None),
        })
    }

    /// Producer: queue a frame for processing. Never blocks on the worker.
    ///
    /// If the buffer was full the oldest queued frame is released here.
    pub fn submit_frame(&self, payload: P) {
        if let Some(evicted) = self.buffer.write(payload) {
            trace!(sequence_id = evicted.sequence_id, "dropped oldest buffered frame");
            metrics::counter!("shutter_frames_dropped_total").increment(1);
            self.recycler.recycle(evicted.payload);
        }
        metrics::counter!("shutter_frames_written_total").increment(1);
    }

    /// Launch the worker with `transform` feeding `sink`.
    ///
    /// `transform` returning `Ok(None)` means "no visible change" and
    /// publishes nothing. Errors and panics are contained to the frame that
    /// caused them. Calling `start` while running does nothing.
    #[instrument(skip_all)]
    pub fn start<F, O, E, S>(&self, transform: F, sink: S) -> PipelineResult<()>
    where
        F: FnMut(P) -> Result<Option<O>, E> + Send + 'static,
        E: Display,
        S: FrameSink<O>,
    {
        let mut worker = self.lock_worker();
        match worker.take() {
            Some(running) if !running.handle.is_finished() => {
                *worker = Some(running);
                debug!("frame processor already running");
                return Ok(());
            }
            Some(dead) => {
                if dead.handle.join().is_err() {
                    error!("replacing frame worker that exited with a panic");
                }
            }
            None => {}
        }

        let (stop_tx, stop_rx) = channel::bounded(0);
        let worker_loop = WorkerLoop {
            buffer: Arc::clone(&self.buffer),
            recycler: Arc::clone(&self.recycler),
            counters: Arc::clone(&self.counters),
            interval: self.config.processing_interval(),
            idle_wait: self.config.idle_wait(),
            stop: stop_rx,
            transform,
            sink,
        };

        let handle = thread::Builder::new()
            .name("frame-processor".into())
            .spawn(move || worker_loop.run())?;

        *worker = Some(Worker { stop_tx, handle });
        info!(
            capacity = self.config.ring_buffer_size,
            interval_ms = self.config.processing_interval_ms,
            "frame processor started"
        );
        Ok(())
    }

    /// Stop the worker and release buffered frames.
    ///
    /// Returns once the worker has exited, after finishing any transform in
    /// flight. Calling `stop` while stopped does nothing.
    ///
    /// The worker slot is released before joining, so the transform and sink
    /// may query or restart the processor while a stop is in progress.
    #[instrument(skip_all)]
    pub fn stop(&self) {
        let Some(Worker { stop_tx, handle }) = self.lock_worker().take() else {
            debug!("frame processor already stopped");
            return;
        };

        drop(stop_tx);
        if handle.thread().id() == thread::current().id() {
            // Joining ourselves would deadlock; the loop exits after this iteration.
            warn!("stop() called from the frame worker, not waiting for it");
        } else if handle.join().is_err() {
            error!("frame worker exited with a panic");
        }

        let discarded = self.buffer.clear();
        let released = discarded.len();
        for payload in discarded {
            self.recycler.recycle(payload);
        }
        info!(released, "frame processor stopped");
    }

    /// `Running` only while a live worker thread is attached
    pub fn state(&self) -> ProcessorState {
        match self.lock_worker().as_ref() {
            Some(worker) if !worker.handle.is_finished() => ProcessorState::Running,
            _ => ProcessorState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessorState::Running
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn statistics(&self) -> ProcessorStats {
        let c = &self.counters;
        ProcessorStats {
            buffer: self.buffer.statistics(),
            frames_processed: c.frames_processed.load(Ordering::Relaxed),
            frames_skipped: c.frames_skipped.load(Ordering::Relaxed),
            transform_failures: c.transform_failures.load(Ordering::Relaxed),
            frames_published: c.frames_published.load(Ordering::Relaxed),
            publish_failures: c.publish_failures.load(Ordering::Relaxed),
            pacing_overruns: c.pacing_overruns.load(Ordering::Relaxed),
            avg_transform_latency_us: c.avg_transform_latency_us(),
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<P: Send + 'static> Drop for AsyncFrameProcessor<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<P: Send + 'static> std::fmt::Debug for AsyncFrameProcessor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFrameProcessor")
            .field("state", &self.state())
            .field("buffer", &self.buffer)
            .field("config", &self.config)
            .finish()
    }
}

/// Everything the worker thread owns
struct WorkerLoop<P, F, S> {
    buffer: Arc<FrameRingBuffer<P>>,
    recycler: Arc<dyn Recycle<P>>,
    counters: Arc<CachePadded<Counters>>,
    interval: Duration,
    idle_wait: Duration,
    stop: Receiver<()>,
    transform: F,
    sink: S,
}

impl<P, O, E, F, S> WorkerLoop<P, F, S>
where
    F: FnMut(P) -> Result<Option<O>, E>,
    E: Display,
    S: FrameSink<O>,
{
    fn run(mut self) {
        debug!("frame worker running");
        loop {
            let iteration_start = Instant::now();

            let Some(LatestFrame { frame, skipped }) = self.buffer.poll_latest() else {
                if self.wait(self.idle_wait) {
                    break;
                }
                continue;
            };
            self.release_skipped(skipped);

            if self.stop_requested() {
                self.recycler.recycle(frame.payload);
                break;
            }

            self.process(frame);

            if self.stop_requested() {
                break;
            }

            let elapsed = iteration_start.elapsed();
            if elapsed < self.interval {
                if self.wait(self.interval - elapsed) {
                    break;
                }
            } else {
                self.counters.pacing_overruns.fetch_add(1, Ordering::Relaxed);
                debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "frame iteration overran processing interval"
                );
            }
        }
        debug!("frame worker exiting");
    }

    fn release_skipped(&self, skipped: Vec<FrameRecord<P>>) {
        if skipped.is_empty() {
            return;
        }
        let count = skipped.len() as u64;
        self.counters.frames_skipped.fetch_add(count, Ordering::Relaxed);
        metrics::counter!("shutter_frames_skipped_total").increment(count);
        for record in skipped {
            self.recycler.recycle(record.payload);
        }
    }

    fn process(&mut self, frame: FrameRecord<P>) {
        let sequence_id = frame.sequence_id;
        let transform = &mut self.transform;

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| transform(frame.payload)));
        self.counters.record_transform(started.elapsed());

        match outcome {
            Ok(Ok(result)) => {
                self.counters.frames_processed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("shutter_frames_processed_total").increment(1);
                match result {
                    Some(output) => self.publish(output, sequence_id),
                    None => trace!(sequence_id, "transform left frame unchanged"),
                }
            }
            Ok(Err(e)) => {
                self.record_failure();
                warn!(sequence_id, error = %e, "frame transform failed");
            }
            Err(payload) => {
                self.record_failure();
                error!(
                    sequence_id,
                    reason = panic_message(payload.as_ref()),
                    "frame transform panicked"
                );
            }
        }
    }

    fn publish(&mut self, output: O, sequence_id: u64) {
        let sink = &mut self.sink;
        match panic::catch_unwind(AssertUnwindSafe(|| sink.publish(output))) {
            Ok(Ok(())) => {
                self.counters.frames_published.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                debug!(sequence_id, error = %e, "processed frame not published");
            }
            Err(payload) => {
                self.counters.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    sequence_id,
                    reason = panic_message(payload.as_ref()),
                    "frame sink panicked"
                );
            }
        }
    }

    fn record_failure(&self) {
        self.counters.transform_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("shutter_transform_failures_total").increment(1);
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep up to `timeout`; true if woken by a stop request.
    fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.stop.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
