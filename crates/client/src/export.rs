//! Download of the full per-row error report.
//!
//! The preview shown in the result view is capped by the server; the
//! export fetches every error for the tracking id as CSV and streams it
//! to disk. One export runs at a time per [`ErrorExporter`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::api::ImportApiError;
use crate::gateway::ImportGateway;

/// Name of the saved error report for `tracking_id`.
pub fn error_file_name(tracking_id: &str) -> String {
    format!("import-{tracking_id}-errors.csv")
}

/// Errors from an export attempt. All of them leave the exporter ready
/// for another try.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Another export is still running.
    #[error("An error export is already in progress")]
    InFlight,

    #[error("Error report download failed: {0}")]
    Download(#[from] ImportApiError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

pub struct ErrorExporter {
    gateway: Arc<dyn ImportGateway>,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the export finishes, fails or is
/// dropped mid-way.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ErrorExporter {
    pub fn new(gateway: Arc<dyn ImportGateway>) -> Self {
        Self {
            gateway,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Save the error report for `tracking_id` into `dest_dir`.
    ///
    /// The body is written to a `.part` file first and renamed once
    /// complete, so a failed download never leaves a truncated report
    /// under the final name.
    pub async fn export(&self, tracking_id: &str, dest_dir: &Path) -> Result<PathBuf, ExportError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ExportError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let target = dest_dir.join(error_file_name(tracking_id));
        let partial = target.with_extension("csv.part");

        tracing::info!(tracking_id, path = %target.display(), "Downloading error report");

        let result = self.download_to(tracking_id, &partial).await;
        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(error = %cleanup, "Failed to remove partial error report");
                }
            }
            tracing::warn!(tracking_id, error = %e, "Error report export failed");
            return Err(e);
        }

        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|source| io_error(&target, source))?;

        tracing::info!(tracking_id, path = %target.display(), "Error report saved");
        Ok(target)
    }

    async fn download_to(&self, tracking_id: &str, path: &Path) -> Result<u64, ExportError> {
        let mut body = self.gateway.download_errors(tracking_id).await?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|source| io_error(path, source))?;

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|source| io_error(path, source))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|source| io_error(path, source))?;

        tracing::debug!(tracking_id, bytes = written, "Error report body received");
        Ok(written)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.display().to_string(),
        source,
    }
}
