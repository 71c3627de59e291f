//! Wire types for the order CSV import pipeline.
//!
//! These mirror the JSON bodies exchanged with the import endpoints
//! (`/orders/import` and `/orders/imports/{trackingId}/...`). Field names
//! are camelCase on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::TrackingId;

// ---------------------------------------------------------------------------
// Import options
// ---------------------------------------------------------------------------

/// What the server does with a row whose external id already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHandling {
    #[default]
    Skip,
    Overwrite,
    Fail,
}

impl DuplicateHandling {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Overwrite => "overwrite",
            Self::Fail => "fail",
        }
    }
}

impl FromStr for DuplicateHandling {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "overwrite" => Ok(Self::Overwrite),
            "fail" => Ok(Self::Fail),
            other => Err(CoreError::Validation(format!(
                "Unknown duplicate handling: '{other}'. Valid values: skip, overwrite, fail"
            ))),
        }
    }
}

/// What the server does with a row geolocated outside the supported
/// tax jurisdiction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfScopeHandling {
    #[default]
    Mark,
    Fail,
}

impl OutOfScopeHandling {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mark => "mark",
            Self::Fail => "fail",
        }
    }
}

impl FromStr for OutOfScopeHandling {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mark" => Ok(Self::Mark),
            "fail" => Ok(Self::Fail),
            other => Err(CoreError::Validation(format!(
                "Unknown out-of-scope handling: '{other}'. Valid values: mark, fail"
            ))),
        }
    }
}

/// Options chosen before an upload. Fixed for the lifetime of one attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub duplicate_handling: DuplicateHandling,
    pub out_of_scope_handling: OutOfScopeHandling,
}

// ---------------------------------------------------------------------------
// Summary and row errors
// ---------------------------------------------------------------------------

/// Row counters for one import attempt.
///
/// How the rows that were not calculated split between failed, skipped
/// duplicates and out-of-scope is decided by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSummary {
    pub total_rows: u32,
    pub parsed_rows: u32,
    pub imported_rows: u32,
    pub calculated_rows: u32,
    pub failed_rows: u32,
    pub skipped_duplicate_rows: u32,
    pub out_of_scope_rows: u32,
}

impl ImportSummary {
    /// Whether the monotone chain `calculated <= imported <= parsed <= total`
    /// holds. Only used for diagnostics; counts are never corrected.
    pub fn is_consistent(&self) -> bool {
        self.parsed_rows <= self.total_rows
            && self.imported_rows <= self.parsed_rows
            && self.calculated_rows <= self.imported_rows
    }
}

/// Reason code attached to a rejected or failed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportErrorReason {
    MissingColumn,
    BadFormat,
    InvalidTimestamp,
    InvalidCoordinates,
    OutOfScope,
    NegativeSubtotal,
    DuplicateExternalId,
    CalculationFailed,
    Unknown,
}

impl ImportErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingColumn => "MISSING_COLUMN",
            Self::BadFormat => "BAD_FORMAT",
            Self::InvalidTimestamp => "INVALID_TIMESTAMP",
            Self::InvalidCoordinates => "INVALID_COORDINATES",
            Self::OutOfScope => "OUT_OF_SCOPE",
            Self::NegativeSubtotal => "NEGATIVE_SUBTOTAL",
            Self::DuplicateExternalId => "DUPLICATE_EXTERNAL_ID",
            Self::CalculationFailed => "CALCULATION_FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ImportErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row-level error from the server-capped preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRowError {
    /// 1-based row number in the uploaded file.
    pub row_number: u32,
    pub external_id: Option<i64>,
    pub reason: ImportErrorReason,
    pub field: Option<String>,
    pub message: String,
    #[serde(default)]
    pub raw_row: String,
}

// ---------------------------------------------------------------------------
// Import response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl ImportStatus {
    /// `true` for every status after which the server does no more work.
    pub fn is_final(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// Result of an upload, or of a later summary fetch for the same
/// tracking id. A summary fetch supersedes the upload response in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub tracking_id: TrackingId,
    pub status: ImportStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub summary: ImportSummary,
    #[serde(default)]
    pub errors_preview: Vec<ImportRowError>,
}

impl ImportResponse {
    /// Failed rows the server counted but left out of the preview.
    pub fn unlisted_error_count(&self) -> u32 {
        let listed = u32::try_from(self.errors_preview.len()).unwrap_or(u32::MAX);
        self.summary.failed_rows.saturating_sub(listed)
    }
}

// ---------------------------------------------------------------------------
// Calculation progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CalculationStatus {
    Processing,
    Completed,
    Failed,
}

/// Incremental counters pushed on the progress stream. Each event replaces
/// the previous one; the event flagged `terminal` is the last meaningful one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationProgressEvent {
    pub tracking_id: TrackingId,
    #[serde(default)]
    pub calculated: u32,
    #[serde(default)]
    pub out_of_scope: u32,
    #[serde(default)]
    pub pending: u32,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub batch_calculated: u32,
    #[serde(default)]
    pub batch_out_of_scope: u32,
    #[serde(default)]
    pub batch_size: u32,
    pub status: CalculationStatus,
    #[serde(default)]
    pub terminal: bool,
}
