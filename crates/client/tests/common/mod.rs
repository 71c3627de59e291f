//! In-memory stand-ins for the import endpoints.
//!
//! [`FakeGateway`] answers upload / summary / error-download calls from
//! queued responses and can hold uploads and downloads until released.
//! [`FakeSource`] hands every opened progress stream to the test as a
//! [`StreamHandle`] and tracks how many streams are alive at once.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use taxline_client::api::ImportApiError;
use taxline_client::gateway::{
    ErrorFileStream, ImportGateway, ProgressByteStream, ProgressSource, UploadFile,
};
use taxline_client::progress::ProgressStreamError;
use taxline_core::import::{
    CalculationProgressEvent, CalculationStatus, ImportErrorReason, ImportOptions, ImportResponse,
    ImportRowError, ImportStatus, ImportSummary,
};
use tokio::sync::Notify;

pub const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn csv_file() -> UploadFile {
    UploadFile::new(
        "orders.csv",
        b"id,longitude,latitude,timestamp,subtotal\n1,-73.9,40.7,2025-11-04 10:00:00,12.50\n".to_vec(),
    )
    .expect("fixture file is not empty")
}

pub fn row_errors(tracking_id: &str, count: usize) -> Vec<ImportRowError> {
    (0..count)
        .map(|i| ImportRowError {
            row_number: i as u32 + 2,
            external_id: Some(i as i64 + 100),
            reason: ImportErrorReason::CalculationFailed,
            field: None,
            message: format!("{tracking_id}: no rate for row {}", i + 2),
            raw_row: String::new(),
        })
        .collect()
}

pub fn response(
    tracking_id: &str,
    status: ImportStatus,
    summary: ImportSummary,
    errors_preview: Vec<ImportRowError>,
) -> ImportResponse {
    ImportResponse {
        tracking_id: tracking_id.to_string(),
        status,
        message: String::new(),
        summary,
        errors_preview,
    }
}

/// Upload answer for `imported` rows still waiting for calculation.
pub fn processing(tracking_id: &str, imported: u32) -> ImportResponse {
    response(
        tracking_id,
        ImportStatus::Processing,
        ImportSummary {
            total_rows: imported,
            parsed_rows: imported,
            imported_rows: imported,
            ..Default::default()
        },
        Vec::new(),
    )
}

pub fn progress_event(tracking_id: &str, calculated: u32, total: u32, terminal: bool) -> CalculationProgressEvent {
    CalculationProgressEvent {
        tracking_id: tracking_id.to_string(),
        calculated,
        out_of_scope: 0,
        pending: total - calculated,
        total,
        batch_calculated: 10,
        batch_out_of_scope: 0,
        batch_size: 10,
        status: if terminal {
            CalculationStatus::Completed
        } else {
            CalculationStatus::Processing
        },
        terminal,
    }
}

pub fn api_error(status: u16, message: Option<&str>) -> ImportApiError {
    ImportApiError::ApiError {
        status,
        body: message
            .map(|m| format!(r#"{{"message":"{m}"}}"#))
            .unwrap_or_default(),
        message: message.map(str::to_owned),
    }
}

/// Poll `condition` until it holds or [`WAIT`] runs out.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

type Answer = Result<ImportResponse, (u16, Option<String>)>;

#[derive(Default)]
pub struct FakeGateway {
    uploads: Mutex<VecDeque<Answer>>,
    summaries: Mutex<VecDeque<Answer>>,
    error_file: Mutex<Vec<Vec<u8>>>,
    hold_uploads: AtomicBool,
    upload_release: Notify,
    hold_downloads: AtomicBool,
    download_release: Notify,
    fail_download_after: Mutex<Option<usize>>,
    pub upload_calls: AtomicUsize,
    pub summary_calls: AtomicUsize,
    pub download_calls: AtomicUsize,
    pub last_options: Mutex<Option<ImportOptions>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_upload(&self, answer: ImportResponse) {
        self.uploads.lock().unwrap().push_back(Ok(answer));
    }

    pub fn push_upload_error(&self, status: u16, message: Option<&str>) {
        self.uploads
            .lock()
            .unwrap()
            .push_back(Err((status, message.map(str::to_owned))));
    }

    pub fn push_summary(&self, answer: ImportResponse) {
        self.summaries.lock().unwrap().push_back(Ok(answer));
    }

    pub fn push_summary_error(&self, status: u16) {
        self.summaries.lock().unwrap().push_back(Err((status, None)));
    }

    pub fn set_error_file(&self, chunks: Vec<&[u8]>) {
        *self.error_file.lock().unwrap() = chunks.into_iter().map(<[u8]>::to_vec).collect();
    }

    /// Make uploads wait for [`release_upload`](Self::release_upload).
    pub fn hold_uploads(&self) {
        self.hold_uploads.store(true, Ordering::SeqCst);
    }

    pub fn release_upload(&self) {
        self.upload_release.notify_one();
    }

    pub fn hold_downloads(&self) {
        self.hold_downloads.store(true, Ordering::SeqCst);
    }

    pub fn release_download(&self) {
        self.download_release.notify_one();
    }

    /// Make the next download break with a server error after `chunks`
    /// chunks of the body have been sent.
    pub fn fail_next_download_after(&self, chunks: usize) {
        *self.fail_download_after.lock().unwrap() = Some(chunks);
    }

    fn answer(queue: &Mutex<VecDeque<Answer>>) -> Result<ImportResponse, ImportApiError> {
        match queue.lock().unwrap().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err((status, message))) => Err(api_error(status, message.as_deref())),
            None => Err(api_error(500, Some("no answer queued"))),
        }
    }
}

#[async_trait]
impl ImportGateway for FakeGateway {
    async fn upload(
        &self,
        _file: &UploadFile,
        options: ImportOptions,
    ) -> Result<ImportResponse, ImportApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options);
        if self.hold_uploads.load(Ordering::SeqCst) {
            self.upload_release.notified().await;
        }
        Self::answer(&self.uploads)
    }

    async fn fetch_summary(&self, _tracking_id: &str) -> Result<ImportResponse, ImportApiError> {
        self.summary_calls.fetch_add(1, Ordering::SeqCst);
        Self::answer(&self.summaries)
    }

    async fn download_errors(&self, _tracking_id: &str) -> Result<ErrorFileStream, ImportApiError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_downloads.load(Ordering::SeqCst) {
            self.download_release.notified().await;
        }
        let mut chunks: Vec<Result<Vec<u8>, ImportApiError>> =
            self.error_file.lock().unwrap().iter().cloned().map(Ok).collect();
        if let Some(after) = self.fail_download_after.lock().unwrap().take() {
            chunks.truncate(after);
            chunks.push(Err(api_error(502, Some("upstream closed"))));
        }
        Ok(futures::stream::iter(chunks).boxed())
    }
}

// ---------------------------------------------------------------------------
// Progress source
// ---------------------------------------------------------------------------

/// Test side of one opened progress stream.
pub struct StreamHandle {
    pub tracking_id: String,
    pub bearer: Option<String>,
    tx: mpsc::UnboundedSender<Result<Vec<u8>, ProgressStreamError>>,
}

impl StreamHandle {
    pub fn send_raw(&self, bytes: &str) {
        let _ = self.tx.unbounded_send(Ok(bytes.as_bytes().to_vec()));
    }

    pub fn send_event(&self, event: &CalculationProgressEvent) {
        let data = serde_json::to_string(event).expect("event serializes");
        self.send_raw(&format!("event: progress\ndata: {data}\n\n"));
    }

    /// End the stream as if the server closed the connection.
    pub fn close(self) {
        self.tx.close_channel();
    }

    /// Whether the client side has dropped the stream.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeSource {
    opened_tx: tokio::sync::mpsc::UnboundedSender<StreamHandle>,
    handshake_status: Mutex<Option<u16>>,
    live: Arc<AtomicUsize>,
    pub max_live: AtomicUsize,
    pub open_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> (Arc<Self>, tokio::sync::mpsc::UnboundedReceiver<StreamHandle>) {
        let (opened_tx, opened_rx) = tokio::sync::mpsc::unbounded_channel();
        let source = Arc::new(Self {
            opened_tx,
            handshake_status: Mutex::new(None),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
        });
        (source, opened_rx)
    }

    /// Reject the next handshakes with `status`.
    pub fn fail_handshake(&self, status: u16) {
        *self.handshake_status.lock().unwrap() = Some(status);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressSource for FakeSource {
    async fn open(
        &self,
        tracking_id: &str,
        bearer: Option<String>,
    ) -> Result<ProgressByteStream, ProgressStreamError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.handshake_status.lock().unwrap() {
            return Err(ProgressStreamError::Handshake(status));
        }

        let now_live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now_live, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));

        let (tx, rx) = mpsc::unbounded();
        let _ = self.opened_tx.send(StreamHandle {
            tracking_id: tracking_id.to_string(),
            bearer,
            tx,
        });

        Ok(rx
            .map(move |chunk| {
                let _alive = &guard;
                chunk
            })
            .boxed())
    }
}

pub async fn next_stream(
    opened: &mut tokio::sync::mpsc::UnboundedReceiver<StreamHandle>,
) -> StreamHandle {
    tokio::time::timeout(WAIT, opened.recv())
        .await
        .expect("no progress stream opened in time")
        .expect("progress source dropped")
}
