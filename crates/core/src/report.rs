//! Presentation helpers for the progress panel and the result panel.

use serde::Serialize;

use crate::import::{CalculationProgressEvent, ImportResponse};

/// Generic text shown when an upload fails without a server message.
pub const UPLOAD_FAILED_FALLBACK: &str = "Import failed. Please check your CSV file and try again.";

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Calculation progress as a whole percentage.
///
/// Until the first event arrives the total falls back to the imported row
/// count from the upload response and nothing is counted as calculated.
pub fn progress_percent(
    progress: Option<&CalculationProgressEvent>,
    import_result: &ImportResponse,
) -> u8 {
    let total = progress.map_or(import_result.summary.imported_rows, |p| p.total);
    let calculated = progress.map_or(0, |p| p.calculated);
    if total == 0 {
        return 0;
    }
    let percent = (f64::from(calculated) / f64::from(total) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Label for the progress bar: nothing has arrived yet vs. counters flowing.
pub fn progress_label(progress: Option<&CalculationProgressEvent>) -> &'static str {
    if progress.is_some() {
        "Processing…"
    } else {
        "Connecting…"
    }
}

// ---------------------------------------------------------------------------
// Result outcome
// ---------------------------------------------------------------------------

/// Overall verdict shown at the top of the result panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOutcome {
    Success,
    Partial,
    Failed,
}

impl ResultOutcome {
    pub fn classify(result: &ImportResponse) -> Self {
        let summary = &result.summary;
        if summary.imported_rows == 0 {
            Self::Failed
        } else if summary.calculated_rows == summary.imported_rows {
            Self::Success
        } else {
            Self::Partial
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Partial => "Partial success",
            Self::Failed => "Failed",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "All orders were imported and tax was calculated successfully.",
            Self::Partial => {
                "Some orders were imported but tax wasn't calculated for all of them. \
                 Check Orders and filter by status."
            }
            Self::Failed => "No orders were imported. Please check your CSV format and try again.",
        }
    }
}
