//! Stream source contract
//!
//! A [`StreamSource`] opens decode sessions; each session is a
//! [`StreamHandle`] owned by exactly one acquisition loop.

use std::time::Duration;

use crate::capture::frame::{Frame, PixelFormat};
use crate::capture::resolver::ResolvedEndpoint;
use crate::error::Result;

/// Knobs applied when a session is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Upper bound on connection setup, first frame included
    pub open_timeout: Duration,
    /// Upper bound on a single `read_frame`
    pub read_timeout: Duration,
    /// Frames the decoder may queue ahead of the reader
    pub buffer_depth: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            width: crate::capture::resolver::DEFAULT_WIDTH,
            height: crate::capture::resolver::DEFAULT_HEIGHT,
            format: PixelFormat::default(),
            open_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            buffer_depth: 1,
        }
    }
}

/// Factory for decode sessions.
pub trait StreamSource: Send + Sync {
    /// Open a session, giving up after `settings.open_timeout`.
    fn open(
        &self,
        endpoint: &ResolvedEndpoint,
        settings: &StreamSettings,
    ) -> Result<Box<dyn StreamHandle>>;
}

/// A live decode session.
///
/// Dropping a handle must release it too; the engine relies on that when a
/// stopping loop outlives the controller's wait.
pub trait StreamHandle: Send {
    /// Next decoded frame, bounded by the session's read timeout.
    ///
    /// `Err(CaptureError::EndOfStream)` signals a clean end of the stream.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Release the session. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}
