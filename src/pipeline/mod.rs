pub mod cache;
pub mod ringbuf;

pub use cache::{CounterSnapshot, EngineCounters, FrameCache};
pub use ringbuf::{LatencyStats, LatencyWindow};
