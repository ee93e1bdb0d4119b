pub mod pool;
pub mod processor;
pub mod ringbuf;
pub mod sink;

pub use pool::{BufferPool, DropRecycler, Recycle};
pub use processor::{AsyncFrameProcessor, ProcessorState, ProcessorStats};
pub use ringbuf::{FrameRecord, FrameRingBuffer, LatestFrame, RingStats};
pub use sink::{FnSink, FrameSink, NullSink, PreviewSlot};
