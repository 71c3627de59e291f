//! Import attempt orchestration.
//!
//! [`ImportController`] owns everything about the current attempt: the
//! options, the upload, the provisional and authoritative results, the
//! progress subscription and the error export. The view layer only reads
//! [`ImportView`] snapshots and calls the operations below.
//!
//! Every attempt gets a generation number. Work started for an attempt
//! (the upload response, the summary fetch after the terminal event)
//! checks the generation when it finishes and drops its result if the
//! attempt was reset or replaced in the meantime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::Utc;
use taxline_core::import::{ImportOptions, ImportResponse, ImportRowError};
use taxline_core::pagination::ErrorPaginator;
use taxline_core::phase::{derive_phase, needs_calculation, Phase};
use taxline_core::report::{progress_percent, ResultOutcome};
use taxline_core::types::{Timestamp, TrackingId};
use tokio::sync::watch;

use crate::api::ImportApi;
use crate::credentials::CredentialProvider;
use crate::export::{ErrorExporter, ExportError};
use crate::gateway::{ImportGateway, ProgressSource, UploadFile};
use crate::progress::{ProgressSnapshot, ProgressSubscriber};

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("An upload is already in progress")]
    UploadInFlight,

    /// The attempt was reset or replaced while its upload was running.
    #[error("Import attempt {attempt} was superseded before its upload finished")]
    Superseded { attempt: u64 },

    /// Options belong to the attempt once it has started.
    #[error("Import options can only be changed before an upload starts (current phase: {})", phase.as_str())]
    OptionsLocked { phase: Phase },

    #[error("No import to export errors for")]
    NoImport,

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// A failed upload as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadError {
    /// Server message verbatim, or the generic fallback.
    pub message: String,
    pub status: Option<u16>,
}

/// Read-only snapshot of the current attempt.
#[derive(Debug, Clone)]
pub struct ImportView {
    pub phase: Phase,
    pub attempt: u64,
    pub options: ImportOptions,
    /// Upload response until the summary fetch replaces it.
    pub result: Option<Arc<ImportResponse>>,
    /// Shared with [`ErrorPaginator`]; a new allocation means a new list.
    pub errors_preview: Arc<[ImportRowError]>,
    pub upload_error: Option<UploadError>,
    pub upload_started_at: Option<Timestamp>,
    pub upload_finished_at: Option<Timestamp>,
    pub calculation_done: bool,
}

impl ImportView {
    pub fn tracking_id(&self) -> Option<&str> {
        self.result.as_deref().map(|r| r.tracking_id.as_str())
    }

    pub fn unlisted_error_count(&self) -> u32 {
        self.result.as_deref().map_or(0, ImportResponse::unlisted_error_count)
    }

    /// Verdict for the result panel. `None` until there is a result.
    pub fn outcome(&self) -> Option<ResultOutcome> {
        if self.upload_error.is_some() {
            return Some(ResultOutcome::Failed);
        }
        self.result.as_deref().map(ResultOutcome::classify)
    }

    /// Time spent uploading, measured up to `now` while still pending.
    pub fn upload_elapsed(&self, now: Timestamp) -> Option<chrono::Duration> {
        let started = self.upload_started_at?;
        Some(self.upload_finished_at.unwrap_or(now) - started)
    }
}

#[derive(Debug)]
struct AttemptState {
    options: ImportOptions,
    attempt: u64,
    upload_pending: bool,
    upload_started_at: Option<Timestamp>,
    upload_finished_at: Option<Timestamp>,
    result: Option<Arc<ImportResponse>>,
    errors_preview: Arc<[ImportRowError]>,
    calculation_done: bool,
    upload_error: Option<UploadError>,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self {
            options: ImportOptions::default(),
            attempt: 0,
            upload_pending: false,
            upload_started_at: None,
            upload_finished_at: None,
            result: None,
            errors_preview: Arc::from(Vec::new()),
            calculation_done: false,
            upload_error: None,
        }
    }
}

impl AttemptState {
    /// Start a new generation with nothing carried over except options.
    fn begin(&mut self, options: ImportOptions) -> u64 {
        let attempt = self.attempt + 1;
        *self = Self {
            options,
            attempt,
            ..Self::default()
        };
        attempt
    }

    fn set_result(&mut self, result: ImportResponse) {
        self.errors_preview = Arc::from(result.errors_preview.clone());
        self.result = Some(Arc::new(result));
    }

    fn phase(&self) -> Phase {
        derive_phase(
            self.upload_pending,
            self.result.as_deref(),
            self.calculation_done,
            self.upload_error.is_some(),
        )
    }

    fn view(&self) -> ImportView {
        ImportView {
            phase: self.phase(),
            attempt: self.attempt,
            options: self.options,
            result: self.result.clone(),
            errors_preview: Arc::clone(&self.errors_preview),
            upload_error: self.upload_error.clone(),
            upload_started_at: self.upload_started_at,
            upload_finished_at: self.upload_finished_at,
            calculation_done: self.calculation_done,
        }
    }
}

struct Inner {
    gateway: Arc<dyn ImportGateway>,
    subscriber: tokio::sync::Mutex<ProgressSubscriber>,
    progress_rx: watch::Receiver<ProgressSnapshot>,
    exporter: ErrorExporter,
    state: Mutex<AttemptState>,
    view_tx: watch::Sender<ImportView>,
}

/// Handle to one import session. Clones share the same state.
#[derive(Clone)]
pub struct ImportController {
    inner: Arc<Inner>,
}

impl ImportController {
    pub fn new(
        gateway: Arc<dyn ImportGateway>,
        source: Arc<dyn ProgressSource>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let subscriber = ProgressSubscriber::new(source, credentials);
        let progress_rx = subscriber.watch();
        let state = AttemptState::default();
        let (view_tx, _) = watch::channel(state.view());

        Self {
            inner: Arc::new(Inner {
                exporter: ErrorExporter::new(Arc::clone(&gateway)),
                gateway,
                subscriber: tokio::sync::Mutex::new(subscriber),
                progress_rx,
                state: Mutex::new(state),
                view_tx,
            }),
        }
    }

    /// Controller talking to the HTTP API for every call.
    pub fn from_api(api: ImportApi) -> Self {
        let credentials = api.credentials();
        let api = Arc::new(api);
        Self::new(api.clone(), api, credentials)
    }

    pub fn options(&self) -> ImportOptions {
        self.inner.lock_state().options
    }

    /// Change the options for the next upload. Only allowed in
    /// [`Phase::Idle`]; call [`reset`](Self::reset) first after an attempt.
    pub fn set_options(&self, options: ImportOptions) -> Result<(), ControllerError> {
        self.inner.update(|state| {
            if state.upload_pending {
                return Err(ControllerError::UploadInFlight);
            }
            let phase = state.phase();
            if phase != Phase::Idle {
                return Err(ControllerError::OptionsLocked { phase });
            }
            state.options = options;
            Ok(())
        })
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock_state().phase()
    }

    pub fn view(&self) -> ImportView {
        self.inner.lock_state().view()
    }

    /// Receive a new [`ImportView`] after every state change.
    pub fn watch_view(&self) -> watch::Receiver<ImportView> {
        self.inner.view_tx.subscribe()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.inner.progress_rx.borrow().clone()
    }

    pub fn watch_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.progress_rx.clone()
    }

    /// Progress bar percentage for the current attempt, 0 without a result.
    pub fn progress_percent(&self) -> u8 {
        let progress = self.progress();
        let state = self.inner.lock_state();
        state
            .result
            .as_deref()
            .map_or(0, |result| progress_percent(progress.progress.as_ref(), result))
    }

    /// Pager over the current error preview, on page 1.
    pub fn paginator(&self) -> ErrorPaginator {
        ErrorPaginator::new(Arc::clone(&self.inner.lock_state().errors_preview))
    }

    /// Upload `file` with the current options.
    ///
    /// Returns the phase reached once the upload has been answered. An
    /// upload failure is not an `Err`: it is recorded in the view and the
    /// phase becomes [`Phase::Result`].
    pub async fn start_import(&self, file: UploadFile) -> Result<Phase, ControllerError> {
        let (attempt, options) = self.inner.update(|state| {
            if state.upload_pending {
                return Err(ControllerError::UploadInFlight);
            }
            let attempt = state.begin(state.options);
            state.upload_pending = true;
            state.upload_started_at = Some(Utc::now());
            Ok((attempt, state.options))
        })?;

        // A stream left over from the previous attempt must not outlive it.
        self.inner.subscriber.lock().await.unbind().await;

        tracing::info!(
            attempt,
            file = %file.file_name(),
            bytes = file.len(),
            duplicate_handling = options.duplicate_handling.as_str(),
            out_of_scope_handling = options.out_of_scope_handling.as_str(),
            "Starting import upload",
        );

        let outcome = self.inner.gateway.upload(&file, options).await;

        let bind_to = self.inner.update(|state| {
            if state.attempt != attempt {
                return Err(ControllerError::Superseded { attempt });
            }
            state.upload_pending = false;
            state.upload_finished_at = Some(Utc::now());

            match outcome {
                Ok(response) => {
                    tracing::info!(
                        attempt,
                        tracking_id = %response.tracking_id,
                        status = ?response.status,
                        imported = response.summary.imported_rows,
                        failed = response.summary.failed_rows,
                        "Import upload accepted",
                    );
                    if !response.summary.is_consistent() {
                        tracing::warn!(
                            tracking_id = %response.tracking_id,
                            summary = ?response.summary,
                            "Import summary counts are not monotone",
                        );
                    }
                    let bind_to = needs_calculation(&response).then(|| response.tracking_id.clone());
                    state.set_result(response);
                    Ok(bind_to)
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Import upload failed");
                    state.upload_error = Some(UploadError {
                        message: e.user_message(),
                        status: e.status(),
                    });
                    Ok(None)
                }
            }
        });

        let bind_to = match bind_to {
            Ok(bind_to) => bind_to,
            Err(e) => {
                tracing::info!(attempt, "Discarding upload response for a superseded attempt");
                return Err(e);
            }
        };

        if let Some(tracking_id) = bind_to {
            Inner::bind_stream(&self.inner, attempt, tracking_id).await;
        }

        Ok(self.phase())
    }

    /// Abandon the current attempt and go back to [`Phase::Idle`].
    ///
    /// Closes any progress stream. An upload still in flight keeps running
    /// on the server; its response is discarded when it arrives.
    pub async fn reset(&self) {
        let attempt = self.inner.update(|state| state.begin(ImportOptions::default()));
        tracing::info!(attempt, "Import attempt reset");
        self.inner.subscriber.lock().await.unbind().await;
    }

    /// Save the full error report of the current import into `dest_dir`.
    pub async fn export_errors(&self, dest_dir: &Path) -> Result<PathBuf, ControllerError> {
        let tracking_id = self
            .view()
            .tracking_id()
            .map(str::to_owned)
            .ok_or(ControllerError::NoImport)?;
        Ok(self.inner.exporter.export(&tracking_id, dest_dir).await?)
    }

    pub fn is_exporting(&self) -> bool {
        self.inner.exporter.is_in_flight()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, AttemptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the attempt state and publish the resulting view.
    fn update<R>(&self, f: impl FnOnce(&mut AttemptState) -> R) -> R {
        let mut state = self.lock_state();
        let out = f(&mut state);
        self.view_tx.send_replace(state.view());
        out
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.lock_state().attempt == attempt
    }

    async fn bind_stream(this: &Arc<Self>, attempt: u64, tracking_id: TrackingId) {
        let mut subscriber = this.subscriber.lock().await;
        if !this.is_current(attempt) {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(this);
        let id = tracking_id.clone();
        subscriber
            .bind(Some(tracking_id), move |_terminal| {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move { inner.reconcile(attempt, id).await });
                }
            })
            .await;
    }

    /// Replace the provisional result with the server's final summary.
    ///
    /// Runs once per attempt, after the terminal progress event. A failed
    /// or mismatched fetch keeps the provisional result; either way the
    /// attempt moves on to [`Phase::Result`].
    async fn reconcile(self: Arc<Self>, attempt: u64, tracking_id: TrackingId) {
        let fetched = self.gateway.fetch_summary(&tracking_id).await;

        let applied = self.update(|state| {
            if state.attempt != attempt {
                return false;
            }
            match fetched {
                Ok(summary) if summary.tracking_id == tracking_id => {
                    tracing::info!(
                        tracking_id = %tracking_id,
                        status = ?summary.status,
                        calculated = summary.summary.calculated_rows,
                        failed = summary.summary.failed_rows,
                        "Final import summary received",
                    );
                    state.set_result(summary);
                }
                Ok(summary) => {
                    tracing::warn!(
                        tracking_id = %tracking_id,
                        summary_tracking_id = %summary.tracking_id,
                        "Summary belongs to another import, keeping provisional result",
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        tracking_id = %tracking_id,
                        error = %e,
                        "Summary fetch failed, keeping provisional result",
                    );
                }
            }
            state.calculation_done = true;
            true
        });

        if !applied {
            tracing::debug!(attempt, tracking_id = %tracking_id, "Dropping summary for a superseded attempt");
            return;
        }

        let mut subscriber = self.subscriber.lock().await;
        if self.is_current(attempt) && subscriber.tracking_id() == Some(tracking_id.as_str()) {
            subscriber.unbind().await;
        }
    }
}
