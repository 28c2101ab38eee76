use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decoded frame.
///
/// `Clone` is a deep copy of the pixel data, so a reader may annotate its own
/// copy in place without touching what the engine keeps cached.
#[derive(Clone)]
pub struct Frame {
    /// Pixel data, owned
    pub data: BytesMut,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Stream PTS if available
}

/// Pixel formats the capture pipeline can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    #[default]
    Bgr24,
    Nv12,
}

impl PixelFormat {
    /// Caps format string understood by `videoconvert`
    pub fn caps_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "RGB",
            PixelFormat::Bgr24 => "BGR",
            PixelFormat::Nv12 => "NV12",
        }
    }

    /// Tightly packed row size in bytes for the luma/packed plane
    pub fn packed_stride(self, width: u32) -> u32 {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => width * 3,
            PixelFormat::Nv12 => width,
        }
    }
}

impl Frame {
    pub fn new(data: BytesMut, meta: FrameMetadata) -> Self {
        Self {
            data,
            meta: Arc::new(meta),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Restamp the sequence number; the engine numbers frames in publish order.
    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        if self.meta.sequence != sequence {
            let mut meta = (*self.meta).clone();
            meta.sequence = sequence;
            self.meta = Arc::new(meta);
        }
        self
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("len", &self.data.len())
            .field("meta", &self.meta)
            .finish()
    }
}
