//! The acquisition loop: read, publish, reconnect on failure

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, info, warn};

use crate::capture::StreamHandle;
use crate::engine::backoff::Backoff;
use crate::engine::state::EngineState;
use crate::engine::EngineShared;

/// Owns the live stream handle for as long as the engine runs.
///
/// The stop signal is the disconnection of the sender paired with `stop_rx`.
pub(crate) struct AcquisitionLoop {
    shared: Arc<EngineShared>,
    handle: Option<Box<dyn StreamHandle>>,
    stop_rx: Receiver<()>,
    backoff: Backoff,
    failed_opens: u32,
}

impl AcquisitionLoop {
    pub fn new(
        shared: Arc<EngineShared>,
        handle: Box<dyn StreamHandle>,
        stop_rx: Receiver<()>,
    ) -> Self {
        let backoff = shared.policy.backoff();
        Self {
            shared,
            handle: Some(handle),
            stop_rx,
            backoff,
            failed_opens: 0,
        }
    }

    /// Run until stopped. Hands the live handle, if any, back for release.
    pub fn run(mut self) -> Option<Box<dyn StreamHandle>> {
        info!("Acquisition loop started");

        while !self.stop_requested() {
            let Some(handle) = self.handle.as_mut() else {
                // Not (re)connected: every retry path sleeps first
                let delay = self.backoff.next_delay();
                if self.sleep(delay) {
                    break;
                }
                self.reopen();
                continue;
            };

            let started = Instant::now();
            let result = handle.read_frame();
            let latency = started.elapsed();

            match result {
                // Stopped while blocked in the read: the frame belongs to a dead session
                Ok(_) if self.stop_requested() => break,
                Ok(frame) => {
                    self.shared.cache.publish(frame, latency);
                    self.shared.counters.frame_published();
                    metrics::histogram!("camwatch_read_latency_seconds").record(latency.as_secs_f64());
                    self.backoff.reset();
                }
                Err(err) => {
                    self.shared.counters.read_failed();
                    if err.is_end_of_stream() {
                        info!("Stream ended, reconnecting");
                    } else {
                        warn!(error = %err, "Frame read failed, reconnecting");
                    }
                    self.drop_handle();
                }
            }
        }

        info!("Acquisition loop exiting");
        self.handle
    }

    fn stop_requested(&self) -> bool {
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Interruptible sleep. Returns true if stop was signalled meanwhile.
    fn sleep(&self, delay: Duration) -> bool {
        !matches!(self.stop_rx.recv_timeout(delay), Err(RecvTimeoutError::Timeout))
    }

    /// Release the current handle; the cached frame stays visible.
    fn drop_handle(&mut self) {
        self.shared.state.advance(EngineState::Reconnecting);
        if let Some(mut handle) = self.handle.take() {
            if let Err(e) = handle.close() {
                debug!(error = %e, "Closing broken stream failed");
            }
        }
    }

    /// Open a fresh handle on the cached endpoint.
    fn reopen(&mut self) {
        self.shared.counters.reconnect_attempted();

        let threshold = self.shared.policy.rediscover_after;
        if threshold > 0 && self.failed_opens >= threshold {
            info!(failures = self.failed_opens, "Cached endpoint looks stale, rediscovering");
            self.shared.invalidate_endpoint();
            self.failed_opens = 0;
        }

        let endpoint = match self.shared.endpoint() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(error = %e, "Endpoint resolution failed during reconnect");
                self.failed_opens += 1;
                return;
            }
        };

        match self.shared.open(&endpoint) {
            Ok(handle) => {
                info!(uri = %endpoint, "Reconnected");
                self.handle = Some(handle);
                self.failed_opens = 0;
                self.shared.state.advance(EngineState::Streaming);
            }
            Err(e) => {
                self.failed_opens += 1;
                warn!(error = %e, attempt = self.failed_opens, "Reconnect failed");
            }
        }
    }
}
