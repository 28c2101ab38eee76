//! Camera engine: lifecycle controller around the acquisition loop
//!
//! ```ignore
//! use std::sync::Arc;
//! use camwatch::capture::{ConnectionParameters, GstStreamSource, RtspPathResolver};
//! use camwatch::engine::CameraEngine;
//!
//! let params = ConnectionParameters::new("192.168.1.20", 80, "admin", "secret");
//! let source = Arc::new(GstStreamSource::new().unwrap());
//! let engine = CameraEngine::new(params, Arc::new(RtspPathResolver::default()), source);
//! engine.start();
//! if let Some(frame) = engine.get_frame() {
//!     println!("{}x{}", frame.width(), frame.height());
//! }
//! engine.stop();
//! ```

mod acquisition;
pub mod backoff;
pub mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument, warn};

use crate::capture::{
    ConnectionParameters, EndpointResolver, Frame, PixelFormat, ResolvedEndpoint, StreamHandle,
    StreamSettings, StreamSource,
};
use crate::error::{CaptureError, EngineError, ResolveError};
use crate::pipeline::{CounterSnapshot, EngineCounters, FrameCache, LatencyStats};

use acquisition::AcquisitionLoop;
pub use backoff::ReconnectPolicy;
pub use state::EngineState;
use state::StateCell;

/// How long the loop offers its handle back before closing it itself
const HANDOFF_TIMEOUT: Duration = Duration::from_millis(50);

/// Tunables that are not part of the camera's identity
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    pub format: PixelFormat,
    pub open_timeout: Duration,
    pub read_timeout: Duration,
    pub buffer_depth: u32,
    pub latency_window: usize,
    pub reconnect: ReconnectPolicy,
    /// How long `stop()` waits for the loop before detaching it
    pub stop_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let settings = StreamSettings::default();
        Self {
            format: settings.format,
            open_timeout: settings.open_timeout,
            read_timeout: settings.read_timeout,
            buffer_depth: settings.buffer_depth,
            latency_window: crate::pipeline::ringbuf::DEFAULT_LATENCY_WINDOW,
            reconnect: ReconnectPolicy::default(),
            stop_timeout: Duration::from_secs(1),
        }
    }
}

/// Result of a `start()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// The previous loop has not released its stream yet; nothing was opened
    StillStopping,
    Failed(EngineError),
}

impl StartOutcome {
    /// True when the engine is streaming after the call
    pub fn is_running(&self) -> bool {
        matches!(self, StartOutcome::Started | StartOutcome::AlreadyRunning)
    }
}

/// State shared by the controller, the loop and readers
pub(crate) struct EngineShared {
    params: ConnectionParameters,
    resolver: Arc<dyn EndpointResolver>,
    source: Arc<dyn StreamSource>,
    settings: StreamSettings,
    policy: ReconnectPolicy,
    endpoint: ArcSwapOption<ResolvedEndpoint>,
    cache: FrameCache,
    counters: EngineCounters,
    state: StateCell,
}

impl EngineShared {
    /// Cached endpoint, resolving it on first use
    fn endpoint(&self) -> Result<Arc<ResolvedEndpoint>, ResolveError> {
        if let Some(endpoint) = self.endpoint.load_full() {
            return Ok(endpoint);
        }

        let endpoint = Arc::new(self.resolver.resolve(&self.params)?);
        info!(uri = %endpoint, "Stream endpoint resolved");
        self.endpoint.store(Some(Arc::clone(&endpoint)));
        Ok(endpoint)
    }

    fn invalidate_endpoint(&self) {
        self.endpoint.store(None);
    }

    fn open(&self, endpoint: &ResolvedEndpoint) -> Result<Box<dyn StreamHandle>, CaptureError> {
        self.source.open(endpoint, &self.settings).map_err(|e| {
            self.counters.open_failed();
            e
        })
    }
}

/// An acquisition thread and the channels to talk to it
struct Worker {
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<Option<Box<dyn StreamHandle>>>,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    fn signal_stop(&mut self) {
        self.stop_tx.take();
    }

    /// Wait up to `timeout` for the loop to exit, then release the handed-back
    /// stream. Returns false if the loop is still inside a read.
    fn reap(&mut self, timeout: Duration) -> bool {
        match self.done_rx.recv_timeout(timeout) {
            Ok(Some(mut handle)) => {
                if let Err(e) = handle.close() {
                    warn!(error = %e, "Failed to close stream");
                }
            }
            // Loop released the handle itself
            Ok(None) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => return false,
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("Acquisition thread panicked");
            }
        }
        true
    }
}

/// At most one loop exists: either running, or stopped but still draining
/// its last read.
#[derive(Default)]
struct Workers {
    running: Option<Worker>,
    draining: Option<Worker>,
}

/// Continuous capture from one network camera.
///
/// Readers call [`get_frame`](Self::get_frame) and the latency getters from
/// any thread; none of them ever waits on network I/O.
pub struct CameraEngine {
    shared: Arc<EngineShared>,
    stop_timeout: Duration,
    workers: Mutex<Workers>,
}

impl CameraEngine {
    pub fn new(
        params: ConnectionParameters,
        resolver: Arc<dyn EndpointResolver>,
        source: Arc<dyn StreamSource>,
    ) -> Self {
        Self::with_options(params, resolver, source, EngineOptions::default())
    }

    pub fn with_options(
        params: ConnectionParameters,
        resolver: Arc<dyn EndpointResolver>,
        source: Arc<dyn StreamSource>,
        options: EngineOptions,
    ) -> Self {
        let settings = StreamSettings {
            width: params.width,
            height: params.height,
            format: options.format,
            open_timeout: options.open_timeout,
            read_timeout: options.read_timeout,
            buffer_depth: options.buffer_depth,
        };

        Self {
            shared: Arc::new(EngineShared {
                params,
                resolver,
                source,
                settings,
                policy: options.reconnect,
                endpoint: ArcSwapOption::empty(),
                cache: FrameCache::new(options.latency_window),
                counters: EngineCounters::default(),
                state: StateCell::default(),
            }),
            stop_timeout: options.stop_timeout,
            workers: Mutex::new(Workers::default()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, Workers> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect and launch the acquisition loop.
    ///
    /// A no-op while already streaming. Failures are logged and returned,
    /// leaving the engine idle so a later call can retry. If a previous loop
    /// is still finishing a read after `stop()`, waits for it (bounded by the
    /// read timeout) before opening a new stream.
    #[instrument(skip(self), fields(host = %self.shared.params.host))]
    pub fn start(&self) -> StartOutcome {
        let mut workers = self.workers();

        if let Some(running) = workers.running.as_ref() {
            if running.is_running() {
                debug!("Engine already running");
                return StartOutcome::AlreadyRunning;
            }
        }
        if let Some(mut finished) = workers.running.take() {
            finished.signal_stop();
            if !finished.reap(self.stop_timeout) {
                workers.draining = Some(finished);
            }
        }
        if let Some(draining) = workers.draining.as_mut() {
            let wait = self.shared.settings.read_timeout + self.stop_timeout;
            if !draining.reap(wait) {
                warn!(?wait, "Previous acquisition loop still holds its stream");
                return StartOutcome::StillStopping;
            }
            workers.draining = None;
        }

        self.shared.state.set(EngineState::Connecting);

        let handle = match self.connect() {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Failed to start camera engine");
                self.shared.state.set(EngineState::Idle);
                return StartOutcome::Failed(e);
            }
        };

        let (stop_tx, stop_rx) = flume::bounded(1);
        // Rendezvous: the handoff only succeeds while the controller is waiting
        let (done_tx, done_rx) = flume::bounded(0);
        let acquisition = AcquisitionLoop::new(Arc::clone(&self.shared), handle, stop_rx);

        // Spawn before flipping to Streaming so a spawn failure leaves us idle
        let spawned = std::thread::Builder::new()
            .name("camwatch-acquisition".into())
            .spawn(move || {
                let handle = acquisition.run();
                // Controller gave up waiting: release the stream ourselves
                if let Err(e) = done_tx.send_timeout(handle, HANDOFF_TIMEOUT) {
                    if let Some(mut late) = e.into_inner() {
                        let _ = late.close();
                    }
                }
            });

        match spawned {
            Ok(join) => {
                self.shared.state.set(EngineState::Streaming);
                workers.running = Some(Worker {
                    stop_tx: Some(stop_tx),
                    done_rx,
                    join: Some(join),
                });
                info!("Camera engine started");
                StartOutcome::Started
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn acquisition thread");
                self.shared.state.set(EngineState::Idle);
                StartOutcome::Failed(EngineError::Spawn(e.to_string()))
            }
        }
    }

    fn connect(&self) -> Result<Box<dyn StreamHandle>, EngineError> {
        let endpoint = self.shared.endpoint()?;
        self.shared.open(&endpoint).map_err(EngineError::Open)
    }

    /// Stop the loop and release the stream. Safe to call at any time.
    ///
    /// Waits at most `stop_timeout`. A loop stuck in a read is kept as
    /// draining and reaped by the next `start()`.
    pub fn stop(&self) {
        let mut workers = self.workers();
        match workers.running.take() {
            Some(mut worker) => {
                info!("Stopping camera engine");
                worker.signal_stop();
                if !worker.reap(self.stop_timeout) {
                    warn!(
                        timeout = ?self.stop_timeout,
                        "Acquisition loop did not exit in time, leaving it to drain"
                    );
                    workers.draining = Some(worker);
                }
            }
            None => {
                if workers.draining.as_mut().is_some_and(|w| w.reap(Duration::ZERO)) {
                    workers.draining = None;
                }
                debug!("Engine not running");
            }
        }
        self.shared.state.set(EngineState::Stopped);
    }

    /// Copy of the most recent frame
    pub fn get_frame(&self) -> Option<Frame> {
        self.shared.cache.get_frame()
    }

    /// Copy of the most recent frame if its sequence number is above `seen`
    pub fn get_frame_if_newer(&self, seen: u64) -> Option<Frame> {
        self.shared.cache.get_frame_if_newer(seen)
    }

    pub fn get_last_latency(&self) -> Option<Duration> {
        self.shared.cache.last_latency()
    }

    pub fn get_latency_stats(&self) -> Option<LatencyStats> {
        self.shared.cache.latency_stats()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state.get()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.shared.counters.snapshot()
    }

    pub fn params(&self) -> &ConnectionParameters {
        &self.shared.params
    }

    /// The cached endpoint, if resolution already happened
    pub fn endpoint(&self) -> Option<Arc<ResolvedEndpoint>> {
        self.shared.endpoint.load_full()
    }

    /// Forget the cached endpoint; the next (re)connect resolves again
    pub fn invalidate_endpoint(&self) {
        info!("Invalidating cached stream endpoint");
        self.shared.invalidate_endpoint();
    }
}

impl Drop for CameraEngine {
    fn drop(&mut self) {
        if self.workers().running.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_camera_defaults() {
        let options = EngineOptions::default();
        assert_eq!(options.open_timeout, Duration::from_secs(2));
        assert_eq!(options.read_timeout, Duration::from_secs(2));
        assert_eq!(options.buffer_depth, 1);
        assert_eq!(options.latency_window, 100);
        assert_eq!(options.stop_timeout, Duration::from_secs(1));
        assert_eq!(options.reconnect, ReconnectPolicy::default());
    }

    #[test]
    fn start_outcome_running() {
        assert!(StartOutcome::Started.is_running());
        assert!(StartOutcome::AlreadyRunning.is_running());
        assert!(!StartOutcome::StillStopping.is_running());
        assert!(!StartOutcome::Failed(EngineError::Resolve(ResolveError::EmptyHost)).is_running());
    }
}
