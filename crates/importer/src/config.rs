use std::path::PathBuf;
use std::time::Duration;

use taxline_core::import::{DuplicateHandling, ImportOptions, OutOfScopeHandling};

/// Default base URL of the import API.
pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/v1";

/// Default TCP connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Usage: taxline-importer <orders.csv>")]
    MissingCsvPath,

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Importer configuration loaded from environment variables and the
/// command line.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// CSV file to upload (first positional argument).
    pub csv_path: PathBuf,
    pub api_url: String,
    /// Bearer token; no `Authorization` header when unset.
    pub access_token: Option<String>,
    pub options: ImportOptions,
    /// Where to save the full error report. No export when unset.
    pub export_dir: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl ImporterConfig {
    /// Load configuration from the process environment and arguments.
    ///
    /// | Env Var                         | Default                         |
    /// |---------------------------------|---------------------------------|
    /// | `TAXLINE_API_URL`               | `http://localhost:8080/api/v1`  |
    /// | `TAXLINE_ACCESS_TOKEN`          | none                            |
    /// | `TAXLINE_DUPLICATE_HANDLING`    | `skip`                          |
    /// | `TAXLINE_OUT_OF_SCOPE_HANDLING` | `mark`                          |
    /// | `TAXLINE_EXPORT_DIR`            | none                            |
    /// | `TAXLINE_CONNECT_TIMEOUT_SECS`  | `30`                            |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(std::env::args().nth(1), |var| std::env::var(var).ok())
    }

    /// Build the configuration from an explicit CSV argument and variable
    /// lookup. Blank values count as unset.
    pub fn from_lookup(
        csv_arg: Option<String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let csv_path = csv_arg
            .filter(|arg| !arg.trim().is_empty())
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingCsvPath)?;

        let api_url = var("TAXLINE_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                var: "TAXLINE_API_URL",
                reason: format!("'{api_url}' is not an http(s) URL"),
            });
        }

        let duplicate_handling = match var("TAXLINE_DUPLICATE_HANDLING") {
            Some(v) => v.parse::<DuplicateHandling>().map_err(|e| ConfigError::Invalid {
                var: "TAXLINE_DUPLICATE_HANDLING",
                reason: e.to_string(),
            })?,
            None => DuplicateHandling::default(),
        };

        let out_of_scope_handling = match var("TAXLINE_OUT_OF_SCOPE_HANDLING") {
            Some(v) => v.parse::<OutOfScopeHandling>().map_err(|e| ConfigError::Invalid {
                var: "TAXLINE_OUT_OF_SCOPE_HANDLING",
                reason: e.to_string(),
            })?,
            None => OutOfScopeHandling::default(),
        };

        let connect_timeout_secs = match var("TAXLINE_CONNECT_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
                var: "TAXLINE_CONNECT_TIMEOUT_SECS",
                reason: e.to_string(),
            })?,
            None => DEFAULT_CONNECT_TIMEOUT_SECS,
        };

        Ok(Self {
            csv_path,
            api_url,
            access_token: var("TAXLINE_ACCESS_TOKEN"),
            options: ImportOptions {
                duplicate_handling,
                out_of_scope_handling,
            },
            export_dir: var("TAXLINE_EXPORT_DIR").map(PathBuf::from),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }
}
