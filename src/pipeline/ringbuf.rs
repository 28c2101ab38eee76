//! Bounded window of read latencies

use std::time::Duration;

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Samples kept by default
pub const DEFAULT_LATENCY_WINDOW: usize = 100;

/// Ring buffer of the most recent read latencies; the oldest sample is
/// overwritten once the window is full.
pub struct LatencyWindow {
    ring: HeapRb<Duration>,
}

/// Aggregates over one snapshot of the window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
    pub p95: Duration,
    pub last: Duration,
    pub count: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    pub fn record(&mut self, sample: Duration) {
        self.ring.push_overwrite(sample);
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Copy of the samples, oldest first
    pub fn snapshot(&self) -> Vec<Duration> {
        self.ring.iter().copied().collect()
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

impl LatencyStats {
    /// Compute over samples ordered oldest first. `None` for an empty slice.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        let last = *samples.last()?;
        let count = samples.len();

        let total: Duration = samples.iter().sum();
        let mean = total / count as u32;

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        // Nearest-rank percentile
        let rank = ((count as f64) * 0.95).ceil() as usize;
        let p95 = sorted[rank.clamp(1, count) - 1];

        Some(Self {
            mean,
            min: sorted[0],
            max: sorted[count - 1],
            p95,
            last,
            count,
        })
    }
}
