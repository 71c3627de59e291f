//! Live calculation progress subscription.
//!
//! [`ProgressSubscriber`] keeps at most one progress stream open, keyed by
//! tracking id. Rebinding to another id (or to `None`) cancels the running
//! stream task and waits for it to exit before anything else happens, so
//! two streams never overlap and a stale stream can never complete.
//!
//! The stream task publishes a [`ProgressSnapshot`] through a
//! [`tokio::sync::watch`] channel and fires the completion handler at most
//! once, on the first event flagged `terminal`. Transport, handshake and
//! decode failures end the task in [`StreamState::Disconnected`]; the task
//! never retries and never invents a terminal event.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use taxline_core::import::CalculationProgressEvent;
use taxline_core::types::TrackingId;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialProvider;
use crate::gateway::{ProgressByteStream, ProgressSource};
use crate::sse::{SseFrame, SseParser};

/// SSE event name of frames carrying a [`CalculationProgressEvent`].
pub const PROGRESS_EVENT: &str = "progress";

/// Errors that end a progress stream. Never surfaced to the view layer.
#[derive(Debug, thiserror::Error)]
pub enum ProgressStreamError {
    /// The server answered the handshake with a non-2xx status.
    #[error("Progress stream handshake failed with status {0}")]
    Handshake(u16),

    /// Network failure while opening or reading the stream.
    #[error("Progress stream transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// A `progress` frame did not decode.
    #[error("Failed to decode progress event: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Connection state of the current subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Idle,
    Connecting,
    Connected,
    TerminalReceived,
    Disconnected,
}

/// What the progress panel renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub tracking_id: Option<TrackingId>,
    pub state: StreamState,
    /// Latest decoded event; each one supersedes the previous.
    pub progress: Option<CalculationProgressEvent>,
}

impl ProgressSnapshot {
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            StreamState::Connected | StreamState::TerminalReceived
        )
    }
}

/// Callback run when the terminal event arrives.
pub type CompletionHandler = Box<dyn FnOnce(CalculationProgressEvent) + Send + 'static>;

/// Fires the completion handler at most once, however many terminal-like
/// events the server sends.
struct CompletionLatch {
    handler: Option<CompletionHandler>,
}

impl CompletionLatch {
    fn new(handler: CompletionHandler) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    /// Returns `true` if this call ran the handler.
    fn fire(&mut self, event: CalculationProgressEvent) -> bool {
        match self.handler.take() {
            Some(handler) => {
                handler(event);
                true
            }
            None => false,
        }
    }
}

/// The stream task currently bound to a tracking id.
struct ActiveStream {
    tracking_id: TrackingId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Progress stream subscription bound to a reactive tracking-id key.
pub struct ProgressSubscriber {
    source: Arc<dyn ProgressSource>,
    credentials: Arc<dyn CredentialProvider>,
    snapshot_tx: Arc<watch::Sender<ProgressSnapshot>>,
    active: Option<ActiveStream>,
}

impl ProgressSubscriber {
    pub fn new(source: Arc<dyn ProgressSource>, credentials: Arc<dyn CredentialProvider>) -> Self {
        let (snapshot_tx, _) = watch::channel(ProgressSnapshot::default());
        Self {
            source,
            credentials,
            snapshot_tx: Arc::new(snapshot_tx),
            active: None,
        }
    }

    /// Receive every snapshot change.
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Tracking id of the bound stream, if any.
    pub fn tracking_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.tracking_id.as_str())
    }

    /// Bind the subscription to `tracking_id`.
    ///
    /// Binding the id that is already bound does nothing. Any other value
    /// first tears down the running stream (cancel, then join), then opens
    /// a stream for the new id if there is one. `on_complete` runs at most
    /// once, from the stream task, when the terminal event arrives.
    pub async fn bind<F>(&mut self, tracking_id: Option<TrackingId>, on_complete: F)
    where
        F: FnOnce(CalculationProgressEvent) + Send + 'static,
    {
        if self.active.as_ref().map(|a| &a.tracking_id) == tracking_id.as_ref() {
            return;
        }

        self.teardown().await;

        let Some(tracking_id) = tracking_id else {
            return;
        };

        let cancel = CancellationToken::new();
        let bearer = self.credentials.bearer_token();
        let publisher = Publisher {
            tx: Arc::clone(&self.snapshot_tx),
            cancel: cancel.clone(),
        };
        publisher.publish(|s| {
            s.tracking_id = Some(tracking_id.clone());
            s.state = StreamState::Connecting;
            s.progress = None;
        });

        let task = StreamTask {
            source: Arc::clone(&self.source),
            tracking_id: tracking_id.clone(),
            bearer,
            publisher,
            cancel: cancel.clone(),
            latch: CompletionLatch::new(Box::new(on_complete)),
        };
        let handle = tokio::spawn(task.run());

        self.active = Some(ActiveStream {
            tracking_id,
            cancel,
            handle,
        });
    }

    /// Close the current stream, if any, and reset the snapshot.
    pub async fn unbind(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            if let Err(e) = active.handle.await {
                if e.is_panic() {
                    tracing::error!(
                        tracking_id = %active.tracking_id,
                        error = %e,
                        "Progress stream task panicked",
                    );
                }
            }
            tracing::debug!(tracking_id = %active.tracking_id, "Progress stream closed");
        }
        self.snapshot_tx.send_replace(ProgressSnapshot::default());
    }
}

impl Drop for ProgressSubscriber {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }
}

/// Snapshot writer that goes silent once its stream is cancelled.
struct Publisher {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
    cancel: CancellationToken,
}

impl Publisher {
    fn publish(&self, update: impl FnOnce(&mut ProgressSnapshot)) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.tx.send_modify(update);
    }

    fn set_state(&self, state: StreamState) {
        self.publish(|s| s.state = state);
    }
}

/// How a stream task stopped reading.
enum StreamEnd {
    Cancelled,
    AfterTerminal,
    BeforeTerminal,
}

struct StreamTask {
    source: Arc<dyn ProgressSource>,
    tracking_id: TrackingId,
    bearer: Option<String>,
    publisher: Publisher,
    cancel: CancellationToken,
    latch: CompletionLatch,
}

impl StreamTask {
    async fn run(mut self) {
        let bearer = self.bearer.take();
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return,
            opened = self.source.open(&self.tracking_id, bearer) => opened,
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    tracking_id = %self.tracking_id,
                    error = %e,
                    "Failed to open progress stream",
                );
                self.publisher.set_state(StreamState::Disconnected);
                return;
            }
        };

        tracing::info!(tracking_id = %self.tracking_id, "Progress stream connected");
        self.publisher.set_state(StreamState::Connected);

        match self.consume(stream).await {
            Ok(StreamEnd::Cancelled) => {}
            Ok(StreamEnd::AfterTerminal) => {
                tracing::debug!(tracking_id = %self.tracking_id, "Progress stream ended after terminal event");
            }
            Ok(StreamEnd::BeforeTerminal) => {
                tracing::warn!(
                    tracking_id = %self.tracking_id,
                    "Progress stream ended before a terminal event",
                );
                self.publisher.set_state(StreamState::Disconnected);
            }
            Err(e) => {
                tracing::warn!(
                    tracking_id = %self.tracking_id,
                    error = %e,
                    "Progress stream interrupted",
                );
                self.publisher.set_state(StreamState::Disconnected);
            }
        }
    }

    /// Read frames until the stream ends, fails or is cancelled.
    async fn consume(
        &mut self,
        mut stream: ProgressByteStream,
    ) -> Result<StreamEnd, ProgressStreamError> {
        let mut parser = SseParser::new();
        let mut terminal_seen = false;

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else {
                return Ok(if terminal_seen {
                    StreamEnd::AfterTerminal
                } else {
                    StreamEnd::BeforeTerminal
                });
            };

            for frame in parser.feed(&chunk?) {
                if self.cancel.is_cancelled() {
                    return Ok(StreamEnd::Cancelled);
                }
                terminal_seen |= self.handle_frame(&frame)?;
            }
        }
    }

    /// Publish one frame. Returns `true` for a terminal event.
    fn handle_frame(&mut self, frame: &SseFrame) -> Result<bool, ProgressStreamError> {
        if frame.event.as_deref() != Some(PROGRESS_EVENT) {
            tracing::trace!(event = ?frame.event, "Ignoring non-progress frame");
            return Ok(false);
        }

        let event: CalculationProgressEvent = serde_json::from_str(&frame.data)?;
        if event.tracking_id != self.tracking_id {
            tracing::warn!(
                tracking_id = %self.tracking_id,
                event_tracking_id = %event.tracking_id,
                "Ignoring progress event for another import",
            );
            return Ok(false);
        }

        let terminal = event.terminal;
        tracing::debug!(
            tracking_id = %self.tracking_id,
            calculated = event.calculated,
            out_of_scope = event.out_of_scope,
            pending = event.pending,
            total = event.total,
            terminal,
            "Calculation progress",
        );

        let published = event.clone();
        self.publisher.publish(move |s| {
            s.progress = Some(published);
            if terminal {
                s.state = StreamState::TerminalReceived;
            }
        });

        if terminal && !self.cancel.is_cancelled() {
            let status = event.status;
            if self.latch.fire(event) {
                tracing::info!(
                    tracking_id = %self.tracking_id,
                    status = ?status,
                    "Calculation reached a terminal state",
                );
            } else {
                tracing::debug!(tracking_id = %self.tracking_id, "Repeated terminal event ignored");
            }
        }

        Ok(terminal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use taxline_core::import::CalculationStatus;

    fn event(terminal: bool) -> CalculationProgressEvent {
        CalculationProgressEvent {
            tracking_id: "t".into(),
            calculated: 1,
            out_of_scope: 0,
            pending: 0,
            total: 1,
            batch_calculated: 1,
            batch_out_of_scope: 0,
            batch_size: 1,
            status: CalculationStatus::Completed,
            terminal,
        }
    }

    #[test]
    fn latch_fires_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut latch = CompletionLatch::new(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(latch.fire(event(true)));
        assert!(!latch.fire(event(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publisher_is_silent_after_cancel() {
        let (tx, rx) = watch::channel(ProgressSnapshot::default());
        let cancel = CancellationToken::new();
        let publisher = Publisher {
            tx: Arc::new(tx),
            cancel: cancel.clone(),
        };

        publisher.set_state(StreamState::Connected);
        assert_eq!(rx.borrow().state, StreamState::Connected);

        cancel.cancel();
        publisher.set_state(StreamState::Disconnected);
        assert_eq!(rx.borrow().state, StreamState::Connected);
    }

    #[test]
    fn connected_includes_terminal_received() {
        let mut snapshot = ProgressSnapshot::default();
        assert!(!snapshot.is_connected());
        snapshot.state = StreamState::TerminalReceived;
        assert!(snapshot.is_connected());
    }
}
