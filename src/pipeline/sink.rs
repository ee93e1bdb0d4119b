//! Where processed frames go
//!
//! The worker publishes each transform result to a [`FrameSink`]. A UI layer
//! either drains a flume channel or reads the newest value from a
//! [`PreviewSlot`].

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::error::SinkError;

/// Destination for processed frames.
///
/// `publish` runs on the worker thread and must not block for long.
pub trait FrameSink<T>: Send + 'static {
    fn publish(&mut self, frame: T) -> Result<(), SinkError>;
}

/// Non-blocking send. A full channel drops the new result.
impl<T: Send + 'static> FrameSink<T> for flume::Sender<T> {
    fn publish(&mut self, frame: T) -> Result<(), SinkError> {
        self.try_send(frame).map_err(|e| match e {
            flume::TrySendError::Full(_) => SinkError::Full,
            flume::TrySendError::Disconnected(_) => SinkError::Disconnected,
        })
    }
}

/// Single-value sink that always holds the newest published frame.
///
/// Readers never block the worker and never see a stale frame queued
/// behind a fresher one.
pub struct PreviewSlot<T> {
    latest: Arc<ArcSwapOption<T>>,
}

impl<T> PreviewSlot<T> {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Newest published frame, if any
    pub fn latest(&self) -> Option<Arc<T>> {
        self.latest.load_full()
    }

    /// Take the newest frame, leaving the slot empty.
    pub fn take(&self) -> Option<Arc<T>> {
        self.latest.swap(None)
    }
}

impl<T> Default for PreviewSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PreviewSlot<T> {
    fn clone(&self) -> Self {
        Self {
            latest: Arc::clone(&self.latest),
        }
    }
}

impl<T: Send + Sync + 'static> FrameSink<T> for PreviewSlot<T> {
    fn publish(&mut self, frame: T) -> Result<(), SinkError> {
        self.latest.store(Some(Arc::new(frame)));
        Ok(())
    }
}

/// Adapts a closure into a sink
pub struct FnSink<F>(pub F);

impl<T, F> FrameSink<T> for FnSink<F>
where
    F: FnMut(T) + Send + 'static,
{
    fn publish(&mut self, frame: T) -> Result<(), SinkError> {
        (self.0)(frame);
        Ok(())
    }
}

/// Sink that discards every result
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl<T> FrameSink<T> for NullSink {
    fn publish(&mut self, _frame: T) -> Result<(), SinkError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flume_sink_reports_full_and_disconnected() {
        let (mut tx, rx) = flume::bounded::<u32>(1);
        assert_eq!(tx.publish(1), Ok(()));
        assert_eq!(tx.publish(2), Err(SinkError::Full));
        assert_eq!(rx.try_recv().ok(), Some(1));
        drop(rx);
        assert_eq!(tx.publish(3), Err(SinkError::Disconnected));
    }

    #[test]
    fn preview_slot_keeps_newest() {
        let slot = PreviewSlot::new();
        let mut writer = slot.clone();
        assert!(slot.latest().is_none());
        writer.publish(1u32).unwrap();
        writer.publish(2u32).unwrap();
        assert_eq!(slot.latest().as_deref(), Some(&2));
        assert_eq!(slot.take().as_deref(), Some(&2));
        assert!(slot.latest().is_none());
    }

    #[test]
    fn fn_sink_forwards() {
        let (tx, rx) = flume::unbounded();
        let mut sink = FnSink(move |v: u8| {
            let _ = tx.send(v);
        });
        sink.publish(7).unwrap();
        assert_eq!(rx.try_recv().ok(), Some(7));
    }
}
