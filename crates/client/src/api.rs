//! HTTP client for the order import endpoints.
//!
//! Wraps upload, progress stream, summary and error download calls using
//! [`reqwest`]. Every request carries the bearer token current at the time
//! it is sent.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use taxline_core::import::{ImportOptions, ImportResponse};
use taxline_core::report::UPLOAD_FAILED_FALLBACK;

use crate::credentials::{bearer_header, CredentialProvider};
use crate::gateway::{ErrorFileStream, ImportGateway, ProgressByteStream, ProgressSource, UploadFile};
use crate::progress::ProgressStreamError;

/// HTTP client for one import API base URL.
pub struct ImportApi {
    client: reqwest::Client,
    api_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

/// Errors from the import REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ImportApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server returned a non-2xx status code.
    #[error("Import API error ({status}): {body}")]
    ApiError {
        status: u16,
        /// Raw response body for debugging.
        body: String,
        /// `message` field of a JSON error body, when present.
        message: Option<String>,
    },
}

impl ImportApiError {
    /// Message supplied by the server, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::ApiError { message, .. } => message.as_deref(),
            Self::Request(_) => None,
        }
    }

    /// HTTP status for server-side failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ApiError { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
        }
    }

    /// Text to show the operator: the server's message verbatim, or a
    /// generic fallback.
    pub fn user_message(&self) -> String {
        self.server_message()
            .unwrap_or(UPLOAD_FAILED_FALLBACK)
            .to_string()
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Pull the `message` field out of a JSON error body.
fn extract_message(body: &str) -> Option<String> {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
}

impl ImportApi {
    /// Create a client for `api_url`, e.g. `http://host:8080/api/v1`.
    pub fn new(api_url: impl Into<String>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, credentials)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    ///
    /// The client must not carry an overall request timeout: the progress
    /// stream is a long-lived response.
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            credentials,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Credential provider used for request/response calls.
    pub fn credentials(&self) -> Arc<dyn CredentialProvider> {
        Arc::clone(&self.credentials)
    }

    pub fn import_url(&self) -> String {
        format!("{}/orders/import", self.api_url)
    }

    pub fn progress_url(&self, tracking_id: &str) -> String {
        format!("{}/orders/imports/{tracking_id}/progress", self.api_url)
    }

    pub fn summary_url(&self, tracking_id: &str) -> String {
        format!("{}/orders/imports/{tracking_id}/summary", self.api_url)
    }

    pub fn errors_url(&self, tracking_id: &str) -> String {
        format!("{}/orders/imports/{tracking_id}/errors", self.api_url)
    }

    // ---- private helpers ----

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => request.header(AUTHORIZATION, bearer_header(&token)),
            None => request,
        }
    }

    /// Ensure the response has a success status code, otherwise turn the
    /// status and body into an [`ImportApiError::ApiError`].
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ImportApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            let message = extract_message(&body);
            return Err(ImportApiError::ApiError {
                status: status.as_u16(),
                body,
                message,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ImportApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ImportGateway for ImportApi {
    async fn upload(
        &self,
        file: &UploadFile,
        options: ImportOptions,
    ) -> Result<ImportResponse, ImportApiError> {
        let part = Part::bytes(file.bytes().to_vec())
            .file_name(file.file_name().to_string())
            .mime_str("text/csv")?;
        let form = Form::new()
            .part("file", part)
            .text("duplicateHandling", options.duplicate_handling.as_str())
            .text("outOfScopeHandling", options.out_of_scope_handling.as_str());

        tracing::debug!(
            file = %file.file_name(),
            bytes = file.len(),
            duplicate_handling = options.duplicate_handling.as_str(),
            out_of_scope_handling = options.out_of_scope_handling.as_str(),
            "Sending import upload",
        );

        let response = self
            .authorize(self.client.post(self.import_url()))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn fetch_summary(&self, tracking_id: &str) -> Result<ImportResponse, ImportApiError> {
        let response = self
            .authorize(self.client.get(self.summary_url(tracking_id)))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn download_errors(&self, tracking_id: &str) -> Result<ErrorFileStream, ImportApiError> {
        let response = self
            .authorize(self.client.get(self.errors_url(tracking_id)))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        Ok(response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(ImportApiError::from)
            .boxed())
    }
}

#[async_trait]
impl ProgressSource for ImportApi {
    async fn open(
        &self,
        tracking_id: &str,
        bearer: Option<String>,
    ) -> Result<ProgressByteStream, ProgressStreamError> {
        let mut request = self
            .client
            .get(self.progress_url(tracking_id))
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, bearer_header(&token));
        }

        let response = request.send().await.map_err(ProgressStreamError::Transport)?;
        if !response.status().is_success() {
            return Err(ProgressStreamError::Handshake(response.status().as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(ProgressStreamError::Transport)
            .boxed())
    }
}
