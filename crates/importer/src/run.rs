//! One import from upload to result report.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use taxline_client::api::ImportApi;
use taxline_client::controller::{ControllerError, ImportController, ImportView};
use taxline_client::credentials::SharedToken;
use taxline_client::gateway::{UploadFile, UploadFileError};
use taxline_client::progress::StreamState;
use taxline_core::phase::Phase;

use crate::config::ImporterConfig;
use crate::report::{format_elapsed, progress_line, render_result};

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    File(#[from] UploadFileError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("Interrupted")]
    Interrupted,
}

/// How often the elapsed upload time is logged.
const UPLOAD_TICK: Duration = Duration::from_secs(1);

/// Build a controller for the configured API.
pub fn controller(config: &ImporterConfig) -> Result<ImportController, RunError> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .build()?;
    let credentials = Arc::new(SharedToken::new(config.access_token.clone()));
    let api = ImportApi::with_client(client, config.api_url.clone(), credentials);
    Ok(ImportController::from_api(api))
}

/// Upload the configured file, follow the calculation and print the
/// result. Returns the final view.
pub async fn run(config: ImporterConfig) -> Result<ImportView, RunError> {
    let controller = controller(&config)?;
    controller.set_options(config.options)?;

    let file = UploadFile::from_path(&config.csv_path).await?;
    tracing::info!(
        api_url = %config.api_url,
        file = %config.csv_path.display(),
        bytes = file.len(),
        "Uploading order CSV",
    );

    let mut views = controller.watch_view();
    let upload = controller.start_import(file);
    tokio::pin!(upload);
    let mut ticker = tokio::time::interval(UPLOAD_TICK);
    // The first tick fires at once.
    ticker.tick().await;
    let phase = loop {
        tokio::select! {
            phase = &mut upload => break phase?,
            _ = ticker.tick() => {
                if let Some(elapsed) = controller.view().upload_elapsed(Utc::now()) {
                    tracing::info!(elapsed = %format_elapsed(elapsed), "Upload in progress");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                controller.reset().await;
                return Err(RunError::Interrupted);
            }
        }
    };
    tracing::info!(phase = phase.as_str(), "Upload answered");

    if phase == Phase::Calculating {
        tokio::select! {
            _ = follow_progress(&controller) => {}
            _ = views.wait_for(|v| v.phase == Phase::Result) => {}
            _ = tokio::signal::ctrl_c() => {
                controller.reset().await;
                return Err(RunError::Interrupted);
            }
        }
    }

    let view = controller.view();
    println!("{}", render_result(&view));

    if let Some(dir) = config.export_dir.as_ref() {
        export(&controller, &view, dir.clone()).await;
    }

    Ok(view)
}

/// Log progress until the stream is gone. Never finishes on its own while
/// events keep coming; the caller races it against the result.
async fn follow_progress(controller: &ImportController) {
    let mut progress = controller.watch_progress();
    let mut warned = false;
    loop {
        {
            let snapshot = progress.borrow_and_update().clone();
            if snapshot.progress.is_some() {
                tracing::info!("{}", progress_line(&snapshot, controller.progress_percent()));
            }
            if snapshot.state == StreamState::Disconnected && !warned {
                tracing::warn!(
                    "Progress stream closed before the calculation finished. \
                     The import keeps running on the server; press Ctrl-C to stop waiting",
                );
                warned = true;
            }
        }
        if progress.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn export(controller: &ImportController, view: &ImportView, dir: PathBuf) {
    let has_errors = view.result.as_deref().is_some_and(|r| r.summary.failed_rows > 0)
        || !view.errors_preview.is_empty();
    if !has_errors {
        return;
    }
    match controller.export_errors(&dir).await {
        Ok(path) => println!("Error report saved to {}", path.display()),
        Err(e) => tracing::error!(error = %e, dir = %dir.display(), "Failed to export error report"),
    }
}
