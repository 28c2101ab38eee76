pub mod frame;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_capture;
pub mod resolver;
pub mod source;

pub use frame::{Frame, FrameMetadata, PixelFormat};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_capture::GstStreamSource;
pub use resolver::{ConnectionParameters, EndpointResolver, ResolvedEndpoint, RtspPathResolver};
pub use source::{StreamHandle, StreamSettings, StreamSource};
