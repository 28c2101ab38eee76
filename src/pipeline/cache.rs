//! Latest-frame cache shared between the acquisition loop and readers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::utils::CachePadded;

use crate::capture::Frame;
use crate::pipeline::ringbuf::{LatencyStats, LatencyWindow};

/// Everything readers can see, behind one guard
struct Shared {
    frame: Option<Arc<Frame>>,
    sequence: u64,
    last_latency: Option<Duration>,
    window: LatencyWindow,
}

/// Single-writer, many-reader cache of the most recent frame and read latencies.
///
/// The lock is held only to swap or clone an `Arc` and to touch the latency
/// window; pixel copies and statistics happen outside it.
pub struct FrameCache {
    shared: Mutex<Shared>,
}

impl FrameCache {
    pub fn new(window_capacity: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                frame: None,
                sequence: 0,
                last_latency: None,
                window: LatencyWindow::new(window_capacity),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panicking reader must not take the camera down with it
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the cached frame and record its read latency. Returns the
    /// sequence number stamped on the frame.
    pub fn publish(&self, frame: Frame, latency: Duration) -> u64 {
        let mut shared = self.lock();
        shared.sequence += 1;
        let sequence = shared.sequence;
        shared.frame = Some(Arc::new(frame.with_sequence(sequence)));
        shared.last_latency = Some(latency);
        shared.window.record(latency);
        sequence
    }

    /// Independent copy of the latest frame, if any was ever published.
    pub fn get_frame(&self) -> Option<Frame> {
        let latest = self.lock().frame.clone()?;
        Some(Frame::clone(&latest))
    }

    /// Copy of the latest frame only if it is newer than `seen`.
    pub fn get_frame_if_newer(&self, seen: u64) -> Option<Frame> {
        let latest = {
            let shared = self.lock();
            if shared.sequence <= seen {
                return None;
            }
            shared.frame.clone()?
        };
        Some(Frame::clone(&latest))
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.lock().last_latency
    }

    /// Stats over a point-in-time copy of the latency window.
    pub fn latency_stats(&self) -> Option<LatencyStats> {
        let samples = self.lock().window.snapshot();
        LatencyStats::from_samples(&samples)
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new(crate::pipeline::ringbuf::DEFAULT_LATENCY_WINDOW)
    }
}

/// Lock-free engine counters
#[derive(Default)]
pub struct EngineCounters {
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicU64,
    read_failures: AtomicU64,
    reconnects: AtomicU64,
    open_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub frames_published: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub open_failures: u64,
}

impl EngineCounters {
    pub fn frame_published(&self) {
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camwatch_frames_total").increment(1);
    }

    pub fn read_failed(&self) {
        self.stats.read_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camwatch_read_failures_total").increment(1);
    }

    pub fn reconnect_attempted(&self) {
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camwatch_reconnects_total").increment(1);
    }

    pub fn open_failed(&self) {
        self.stats.open_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camwatch_open_failures_total").increment(1);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            frames_published: self.stats.frames_published.load(Ordering::Relaxed),
            read_failures: self.stats.read_failures.load(Ordering::Relaxed),
            reconnects: self.stats.reconnects.load(Ordering::Relaxed),
            open_failures: self.stats.open_failures.load(Ordering::Relaxed),
        }
    }
}
