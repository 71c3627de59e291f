//! Seams between the import orchestration and the network.
//!
//! [`ImportGateway`] covers the request/response calls and
//! [`ProgressSource`] opens the server-push progress stream. The HTTP
//! implementation of both is [`ImportApi`](crate::api::ImportApi); tests
//! substitute in-memory fakes.

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;
use taxline_core::error::CoreError;
use taxline_core::import::{ImportOptions, ImportResponse};

use crate::api::ImportApiError;
use crate::progress::ProgressStreamError;

/// Raw body chunks of the progress stream.
pub type ProgressByteStream = BoxStream<'static, Result<Vec<u8>, ProgressStreamError>>;

/// Raw body chunks of the error CSV download.
pub type ErrorFileStream = BoxStream<'static, Result<Vec<u8>, ImportApiError>>;

/// A CSV file ready to be uploaded.
#[derive(Debug, Clone)]
pub struct UploadFile {
    file_name: String,
    bytes: Vec<u8>,
}

impl UploadFile {
    /// Wrap in-memory contents. Empty files are rejected before any
    /// request is made.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, CoreError> {
        let file_name = file_name.into();
        if bytes.is_empty() {
            return Err(CoreError::Validation(format!("File '{file_name}' is empty")));
        }
        Ok(Self { file_name, bytes })
    }

    /// Read a file from disk.
    pub async fn from_path(path: &Path) -> Result<Self, UploadFileError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| UploadFileError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "import.csv".to_string());
        Ok(Self::new(file_name, bytes)?)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadFileError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

/// Request/response calls of the import endpoints.
#[async_trait]
pub trait ImportGateway: Send + Sync {
    /// `POST /orders/import`. Called once per attempt, never retried.
    async fn upload(
        &self,
        file: &UploadFile,
        options: ImportOptions,
    ) -> Result<ImportResponse, ImportApiError>;

    /// `GET /orders/imports/{trackingId}/summary`.
    async fn fetch_summary(&self, tracking_id: &str) -> Result<ImportResponse, ImportApiError>;

    /// `GET /orders/imports/{trackingId}/errors`, streamed.
    async fn download_errors(&self, tracking_id: &str) -> Result<ErrorFileStream, ImportApiError>;
}

/// Opens the progress event stream for one tracking id.
#[async_trait]
pub trait ProgressSource: Send + Sync {
    /// Perform the handshake and return the body stream.
    ///
    /// `bearer` is the credential read at open time; it is not refreshed
    /// for the lifetime of the stream.
    async fn open(
        &self,
        tracking_id: &str,
        bearer: Option<String>,
    ) -> Result<ProgressByteStream, ProgressStreamError>;
}
