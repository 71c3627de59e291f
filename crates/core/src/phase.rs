//! Import phase derivation.
//!
//! The phase is never stored. It is recomputed from the controller's
//! current facts every time a view is produced.

use serde::Serialize;

use crate::import::ImportResponse;

/// The screen an import attempt is currently on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Uploading,
    Calculating,
    Result,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Calculating => "calculating",
            Self::Result => "result",
        }
    }
}

/// Whether the server still has tax calculation to do for this import.
///
/// Nothing to wait for when no rows were imported or the server already
/// reported a final status.
pub fn needs_calculation(result: &ImportResponse) -> bool {
    result.summary.imported_rows > 0 && !result.status.is_final()
}

/// Map the controller's facts to a [`Phase`].
///
/// Rule order matters: an upload error wins over a stale result left over
/// from an earlier attempt.
pub fn derive_phase(
    is_upload_pending: bool,
    import_result: Option<&ImportResponse>,
    calculation_done: bool,
    has_upload_error: bool,
) -> Phase {
    if has_upload_error {
        return Phase::Result;
    }
    if is_upload_pending {
        return Phase::Uploading;
    }
    match import_result {
        Some(result) if !calculation_done => {
            if needs_calculation(result) {
                Phase::Calculating
            } else {
                Phase::Result
            }
        }
        Some(_) => Phase::Result,
        None => Phase::Idle,
    }
}
