use crate::base64;
use crate::config::Config;
use crate::config::ResizeConfig;
use crate::cv_utils;
use crate::inference::{InferenceClient, InferenceError};
use opencv::core::Mat;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub type Ticket = u64;

/// Owns the shared caption cell and the single-in-flight dispatch state.
///
/// Only the capture loop calls `should_dispatch`/`begin`; spawned request
/// tasks call `complete`. A completed request applies its caption only while
/// its ticket is still the most recently issued one, so a slow response can
/// never overwrite the result of a newer request.
pub struct RequestCoordinator {
    in_flight: AtomicBool,
    last_ticket: AtomicU64,
    caption: Mutex<String>,
}

impl RequestCoordinator {
    pub fn new() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            last_ticket: AtomicU64::new(0),
            caption: Mutex::new(String::new()),
        }
    }

    pub fn should_dispatch(&self, frame_index: u64, every_n: u64) -> bool {
        frame_index % every_n == 0 && !self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the in-flight slot and issues a fresh ticket. Returns `None` if
    /// a request already holds the slot; the compare-exchange closes the
    /// window between checking the flag and setting it.
    pub fn begin(&self) -> Option<Ticket> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        Some(self.last_ticket.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Called exactly once per issued ticket. Always releases the in-flight
    /// slot, including on failure and on stale success, so a broken endpoint
    /// cannot stall dispatching.
    pub fn complete(&self, ticket: Ticket, result: Result<String, InferenceError>) {
        match result {
            Ok(text) => {
                if ticket == self.last_ticket.load(Ordering::Acquire) {
                    *self.caption.lock() = text;
                } else {
                    tracing::debug!(ticket, "discarding stale caption");
                }
            }
            // Caption is sticky: an error never blanks the display.
            Err(e) => tracing::warn!(ticket, error = %e, "caption request failed"),
        }
        self.in_flight.store(false, Ordering::Release);
    }

    pub fn caption(&self) -> String {
        self.caption.lock().clone()
    }
}

impl Default for RequestCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires the coordinator to the codec and the inference client, and detaches
/// one request task per accepted dispatch.
pub struct CaptionDispatcher {
    coordinator: Arc<RequestCoordinator>,
    client: Arc<InferenceClient>,
    every_n_frames: u64,
    resize: Option<ResizeConfig>,
    jpeg_quality: i32,
}

impl CaptionDispatcher {
    pub fn new(client: Arc<InferenceClient>, config: &Config) -> Self {
        Self {
            coordinator: Arc::new(RequestCoordinator::new()),
            client,
            every_n_frames: config.dispatch.every_n_frames,
            resize: config.encoding.resize,
            jpeg_quality: config.encoding.jpeg_quality,
        }
    }

    pub fn coordinator(&self) -> Arc<RequestCoordinator> {
        self.coordinator.clone()
    }

    /// Rate-gated, non-blocking. Encodes the frame, claims the in-flight
    /// slot, and fires a detached task that reports back through
    /// `RequestCoordinator::complete`. The caller never waits on the network.
    pub fn maybe_dispatch(&self, frame: &Mat, frame_index: u64) {
        if !self
            .coordinator
            .should_dispatch(frame_index, self.every_n_frames)
        {
            return;
        }

        let jpeg = match cv_utils::encode_jpeg(frame, self.resize, self.jpeg_quality) {
            Ok(buf) => buf,
            Err(e) => {
                // Skip this cycle; the slot was never claimed.
                tracing::warn!(frame_index, error = %e, "frame encode failed, skipping dispatch");
                return;
            }
        };
        let payload = base64::encode(&jpeg);

        let Some(ticket) = self.coordinator.begin() else {
            return;
        };
        tracing::debug!(ticket, frame_index, bytes = jpeg.len(), "dispatching caption request");

        let coordinator = self.coordinator.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            let result = client.generate(&payload).await;
            coordinator.complete(ticket, result);
        });
    }
}
