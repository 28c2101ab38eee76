//! Scripted stand-ins for the camera and its discovery service

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use camwatch::capture::{
    ConnectionParameters, EndpointResolver, Frame, FrameMetadata, PixelFormat, ResolvedEndpoint,
    StreamHandle, StreamSettings, StreamSource,
};
use camwatch::engine::{CameraEngine, EngineOptions, ReconnectPolicy};
use camwatch::error::{CaptureError, ResolveError};
use flume::{Receiver, Sender};

/// What the next `read_frame` on the live handle does
#[derive(Debug, Clone)]
pub enum Step {
    Frame { fill: u8, delay: Duration },
    Fail,
    Eos,
}

impl Step {
    pub fn frame(fill: u8) -> Self {
        Step::Frame {
            fill,
            delay: Duration::ZERO,
        }
    }

    pub fn slow_frame(fill: u8, delay_ms: u64) -> Self {
        Step::Frame {
            fill,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[derive(Default)]
struct Tally {
    opens: AtomicUsize,
    closes: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    failing_opens: AtomicUsize,
}

/// Stream source whose reads are fed one step at a time by the test.
///
/// A read with nothing queued times out after `read_timeout`, like a
/// stalled camera.
pub struct ScriptedSource {
    steps_tx: Sender<Step>,
    steps_rx: Receiver<Step>,
    read_timeout: Duration,
    tally: Arc<Tally>,
}

impl ScriptedSource {
    pub fn new(read_timeout: Duration) -> Arc<Self> {
        let (steps_tx, steps_rx) = flume::unbounded();
        Arc::new(Self {
            steps_tx,
            steps_rx,
            read_timeout,
            tally: Arc::new(Tally::default()),
        })
    }

    pub fn push(&self, step: Step) {
        self.steps_tx.send(step).expect("steps channel open");
    }

    /// Make the next `n` opens fail
    pub fn fail_next_opens(&self, n: usize) {
        self.tally.failing_opens.store(n, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.tally.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.tally.closes.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.tally.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.tally.max_live.load(Ordering::SeqCst)
    }
}

impl StreamSource for ScriptedSource {
    fn open(
        &self,
        _endpoint: &ResolvedEndpoint,
        _settings: &StreamSettings,
    ) -> Result<Box<dyn StreamHandle>, CaptureError> {
        self.tally.opens.fetch_add(1, Ordering::SeqCst);

        let failing = self.tally.failing_opens.load(Ordering::SeqCst);
        if failing > 0 {
            self.tally.failing_opens.store(failing - 1, Ordering::SeqCst);
            return Err(CaptureError::OpenTimeout(Duration::from_millis(1)));
        }

        let live = self.tally.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.tally.max_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(ScriptedHandle {
            steps: self.steps_rx.clone(),
            read_timeout: self.read_timeout,
            tally: Arc::clone(&self.tally),
            closed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedHandle {
    steps: Receiver<Step>,
    read_timeout: Duration,
    tally: Arc<Tally>,
    closed: AtomicBool,
}

impl StreamHandle for ScriptedHandle {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CaptureError::Closed);
        }
        match self.steps.recv_timeout(self.read_timeout) {
            Ok(Step::Frame { fill, delay }) => {
                std::thread::sleep(delay);
                Ok(test_frame(fill))
            }
            Ok(Step::Fail) => Err(CaptureError::Stream("scripted failure".into())),
            Ok(Step::Eos) => Err(CaptureError::EndOfStream),
            Err(_) => Err(CaptureError::ReadTimeout(self.read_timeout)),
        }
    }

    fn close(&mut self) -> Result<(), CaptureError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.tally.closes.fetch_add(1, Ordering::SeqCst);
            self.tally.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub fn test_frame(fill: u8) -> Frame {
    Frame::new(
        BytesMut::from(&[fill; 12][..]),
        FrameMetadata {
            sequence: 0,
            width: 2,
            height: 2,
            stride: 6,
            format: PixelFormat::Bgr24,
            device_timestamp: None,
        },
    )
}

/// Resolver that counts calls and can be told to fail
#[derive(Default)]
pub struct CountingResolver {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let resolver = Self::default();
        resolver.failing.store(true, Ordering::SeqCst);
        Arc::new(resolver)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EndpointResolver for CountingResolver {
    fn resolve(&self, params: &ConnectionParameters) -> Result<ResolvedEndpoint, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResolveError::Discovery("device did not answer".into()));
        }
        camwatch::capture::resolver::embed_credentials(
            &format!("rtsp://{}:554/stream1", params.host),
            &params.username,
            &params.password,
        )
    }
}

pub fn params() -> ConnectionParameters {
    ConnectionParameters::new("10.1.2.3", 80, "admin", "secret")
}

/// Options with short pauses so tests run fast
pub fn fast_options() -> EngineOptions {
    EngineOptions {
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(10)),
        stop_timeout: Duration::from_secs(3),
        ..EngineOptions::default()
    }
}

pub fn engine(
    source: &Arc<ScriptedSource>,
    resolver: &Arc<CountingResolver>,
    options: EngineOptions,
) -> CameraEngine {
    CameraEngine::with_options(params(), resolver.clone(), source.clone(), options)
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub const WAIT: Duration = Duration::from_secs(5);
