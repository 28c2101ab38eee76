//! GStreamer-based RTSP capture with bounded open/read and a shallow appsink queue

use std::time::Duration;

use bytes::BytesMut;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, instrument, warn};

use crate::capture::frame::{Frame, FrameMetadata, PixelFormat};
use crate::capture::resolver::ResolvedEndpoint;
use crate::capture::source::{StreamHandle, StreamSettings, StreamSource};
use crate::error::{CaptureError, Result};

/// Opens RTSP sessions as `rtspsrc ! decodebin ! videoconvert ! appsink` pipelines
pub struct GstStreamSource {
    decoder: &'static str,
}

impl GstStreamSource {
    /// Initialise GStreamer and pick the decode bin
    pub fn new() -> Result<Self> {
        gst::init().map_err(|e| CaptureError::Pipeline(format!("GStreamer init: {e}")))?;

        let decoder = Self::detect_decoder();
        info!("Using decoder: {}", decoder);

        Ok(Self { decoder })
    }

    /// Prefer decodebin3 (better stream switching), fall back to decodebin
    fn detect_decoder() -> &'static str {
        let decoders = ["decodebin3", "decodebin"];

        for decoder in &decoders {
            if gst::ElementFactory::find(decoder).is_some() {
                debug!("Found decoder: {}", decoder);
                return decoder;
            }
        }

        warn!("No decodebin element registered, pipeline parsing will fail");
        "decodebin"
    }

    /// Build the pipeline description for one session
    fn build_pipeline_string(&self, endpoint: &ResolvedEndpoint, settings: &StreamSettings) -> String {
        let timeout_us = settings.open_timeout.as_micros();

        format!(
            "rtspsrc location=\"{uri}\" latency=0 protocols=tcp \
             tcp-timeout={timeout} timeout={timeout} name=source ! \
             {decoder} ! \
             videoconvert ! videoscale ! \
             video/x-raw,format={format},width={width},height={height} ! \
             appsink name=appsink",
            uri = endpoint.as_str(),
            timeout = timeout_us,
            decoder = self.decoder,
            format = settings.format.caps_name(),
            width = settings.width,
            height = settings.height,
        )
    }
}

impl StreamSource for GstStreamSource {
    #[instrument(skip(self, endpoint, settings), fields(uri = %endpoint))]
    fn open(
        &self,
        endpoint: &ResolvedEndpoint,
        settings: &StreamSettings,
    ) -> Result<Box<dyn StreamHandle>> {
        let pipeline_str = self.build_pipeline_string(endpoint, settings);
        debug!("Pipeline: {}", pipeline_str.replace(endpoint.as_str(), &endpoint.redacted()));

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| CaptureError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Pipeline("not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CaptureError::Pipeline("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Pipeline("failed to cast to AppSink".into()))?;

        // Keep only the freshest frames queued
        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", settings.buffer_depth.max(1));
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        let mut handle = GstStreamHandle {
            pipeline: Some(pipeline),
            appsink,
            pending: None,
            format: settings.format,
            read_timeout: settings.read_timeout,
        };

        if let Err(e) = handle.start(settings.open_timeout) {
            let _ = handle.close();
            return Err(e);
        }

        info!("Stream opened");
        Ok(Box::new(handle))
    }
}

/// One playing pipeline
pub struct GstStreamHandle {
    pipeline: Option<gst::Pipeline>,
    appsink: gst_app::AppSink,
    /// First sample, pulled while opening
    pending: Option<gst::Sample>,
    format: PixelFormat,
    read_timeout: Duration,
}

impl GstStreamHandle {
    /// Go to Playing and wait for the first sample, which proves the session is live
    fn start(&mut self, open_timeout: Duration) -> Result<()> {
        let pipeline = self.pipeline.as_ref().ok_or(CaptureError::Closed)?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CaptureError::Pipeline(format!("failed to start pipeline: {e:?}")))?;

        match self.appsink.try_pull_sample(clock_time(open_timeout)) {
            Some(sample) => {
                self.pending = Some(sample);
                Ok(())
            }
            None => Err(bus_error(pipeline).unwrap_or(CaptureError::OpenTimeout(open_timeout))),
        }
    }

    /// Convert a `gst::Sample` into our [`Frame`]
    fn sample_to_frame(&self, sample: gst::Sample) -> Result<Frame> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::Stream("sample contains no buffer".into()))?;

        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::Stream("sample has no caps".into()))?;

        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| CaptureError::Stream(format!("bad video caps: {e}")))?;

        let map = buffer
            .map_readable()
            .map_err(|e| CaptureError::BufferMap(e.to_string()))?;

        // One copy out of GStreamer memory; the frame owns its pixels from here on
        let data = BytesMut::from(map.as_slice());

        let meta = FrameMetadata {
            sequence: 0,
            width: video_info.width(),
            height: video_info.height(),
            stride: row_stride(&video_info, self.format),
            format: self.format,
            device_timestamp: buffer.pts().map(|pts| Duration::from_nanos(pts.nseconds())),
        };

        Ok(Frame::new(data, meta))
    }
}

/// First-plane stride from the caps, or the packed size if the caps carry none
fn row_stride(info: &gst_video::VideoInfo, format: PixelFormat) -> u32 {
    info.stride()
        .first()
        .and_then(|&stride| u32::try_from(stride).ok())
        .filter(|&stride| stride > 0)
        .unwrap_or_else(|| format.packed_stride(info.width()))
}

impl StreamHandle for GstStreamHandle {
    fn read_frame(&mut self) -> Result<Frame> {
        let pipeline = self.pipeline.as_ref().ok_or(CaptureError::Closed)?;

        if let Some(sample) = self.pending.take() {
            return self.sample_to_frame(sample);
        }

        if let Some(err) = bus_error(pipeline) {
            return Err(err);
        }

        match self.appsink.try_pull_sample(clock_time(self.read_timeout)) {
            Some(sample) => self.sample_to_frame(sample),
            None if self.appsink.is_eos() => Err(CaptureError::EndOfStream),
            None => Err(bus_error(pipeline).unwrap_or(CaptureError::ReadTimeout(self.read_timeout))),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.pending = None;
        if let Some(pipeline) = self.pipeline.take() {
            debug!("Stopping GStreamer pipeline");
            pipeline
                .set_state(gst::State::Null)
                .map_err(|e| CaptureError::Pipeline(format!("failed to stop pipeline: {e:?}")))?;
        }
        Ok(())
    }
}

impl Drop for GstStreamHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn clock_time(d: Duration) -> gst::ClockTime {
    gst::ClockTime::from_mseconds(d.as_millis() as u64)
}

/// Drain the bus and report the first error or EOS posted on it
fn bus_error(pipeline: &gst::Pipeline) -> Option<CaptureError> {
    let bus = pipeline.bus()?;

    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error, gst::MessageType::Eos]) {
        match msg.view() {
            gst::MessageView::Error(err) => {
                return Some(CaptureError::Stream(format!(
                    "{} ({})",
                    err.error(),
                    err.debug().map(|d| d.to_string()).unwrap_or_default()
                )));
            }
            gst::MessageView::Eos(..) => return Some(CaptureError::EndOfStream),
            _ => {}
        }
    }

    None
}
