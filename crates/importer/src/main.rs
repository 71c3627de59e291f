//! `taxline-importer` -- upload an order CSV and follow its tax calculation.
//!
//! Uploads the file given as the first argument, streams calculation
//! progress to the log, prints the final summary with every previewed row
//! error and optionally saves the full error report.
//!
//! # Environment variables
//!
//! | Variable                        | Required | Default                        | Description                         |
//! |---------------------------------|----------|--------------------------------|-------------------------------------|
//! | `TAXLINE_API_URL`               | no       | `http://localhost:8080/api/v1` | Base URL of the import API          |
//! | `TAXLINE_ACCESS_TOKEN`          | no       | --                             | Bearer token for every request      |
//! | `TAXLINE_DUPLICATE_HANDLING`    | no       | `skip`                         | `skip`, `overwrite` or `fail`       |
//! | `TAXLINE_OUT_OF_SCOPE_HANDLING` | no       | `mark`                         | `mark` or `fail`                    |
//! | `TAXLINE_EXPORT_DIR`            | no       | --                             | Directory for the error report CSV  |
//! | `TAXLINE_CONNECT_TIMEOUT_SECS`  | no       | `30`                           | TCP connect timeout                 |

use std::process::ExitCode;

use taxline_core::report::ResultOutcome;
use taxline_importer::config::ImporterConfig;
use taxline_importer::run::{self, RunError};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taxline_importer=info,taxline_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ImporterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::from(2);
        }
    };

    tracing::info!(
        api_url = %config.api_url,
        duplicate_handling = config.options.duplicate_handling.as_str(),
        out_of_scope_handling = config.options.out_of_scope_handling.as_str(),
        "Starting taxline-importer",
    );

    match run::run(config).await {
        Ok(view) => match view.outcome() {
            Some(ResultOutcome::Success | ResultOutcome::Partial) => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        },
        Err(RunError::Interrupted) => {
            tracing::warn!("Import interrupted, the server may still be processing it");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!(error = %e, "Import failed");
            ExitCode::FAILURE
        }
    }
}
