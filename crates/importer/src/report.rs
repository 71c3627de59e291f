//! Plain-text rendering of progress and results for the terminal.

use std::fmt::Write as _;

use taxline_client::controller::ImportView;
use taxline_client::progress::ProgressSnapshot;
use taxline_core::import::ImportRowError;
use taxline_core::pagination::ErrorPaginator;
use taxline_core::report::progress_label;

/// One progress line, e.g. `Processing… 240/500 (48%)`.
pub fn progress_line(snapshot: &ProgressSnapshot, percent: u8) -> String {
    let label = progress_label(snapshot.progress.as_ref());
    match &snapshot.progress {
        Some(p) => format!(
            "{label} {}/{} ({percent}%), {} out of scope",
            p.calculated, p.total, p.out_of_scope
        ),
        None => format!("{label} ({percent}%)"),
    }
}

/// Elapsed time with one decimal, e.g. `2.4s`.
pub fn format_elapsed(elapsed: chrono::Duration) -> String {
    format!("{:.1}s", elapsed.num_milliseconds().max(0) as f64 / 1000.0)
}

fn error_line(error: &ImportRowError) -> String {
    let mut line = format!("  row {:>5}  {:<22}", error.row_number, error.reason.as_str());
    if let Some(external_id) = error.external_id {
        let _ = write!(line, " id={external_id}");
    }
    if let Some(field) = &error.field {
        let _ = write!(line, " [{field}]");
    }
    let _ = write!(line, " {}", error.message);
    line
}

fn write_upload_time(out: &mut String, view: &ImportView) {
    let elapsed = view.upload_finished_at.and_then(|end| view.upload_elapsed(end));
    if let Some(elapsed) = elapsed {
        let _ = writeln!(out, "Upload time:        {}", format_elapsed(elapsed));
    }
}

/// Full result panel: verdict, counters and every page of the preview.
pub fn render_result(view: &ImportView) -> String {
    let mut out = String::new();

    if let Some(error) = &view.upload_error {
        let _ = writeln!(out, "Upload failed: {}", error.message);
        write_upload_time(&mut out, view);
        return out;
    }

    let Some(result) = view.result.as_deref() else {
        let _ = writeln!(out, "No import result.");
        return out;
    };

    if let Some(outcome) = view.outcome() {
        let _ = writeln!(out, "{}: {}", outcome.label(), outcome.description());
    }
    if !result.message.is_empty() {
        let _ = writeln!(out, "{}", result.message);
    }

    let s = &result.summary;
    let _ = writeln!(out, "Tracking id:        {}", result.tracking_id);
    write_upload_time(&mut out, view);
    let _ = writeln!(out, "Total rows:         {}", s.total_rows);
    let _ = writeln!(out, "Parsed:             {}", s.parsed_rows);
    let _ = writeln!(out, "Imported:           {}", s.imported_rows);
    let _ = writeln!(out, "Tax calculated:     {}", s.calculated_rows);
    let _ = writeln!(out, "Failed:             {}", s.failed_rows);
    let _ = writeln!(out, "Skipped duplicates: {}", s.skipped_duplicate_rows);
    let _ = writeln!(out, "Out of scope:       {}", s.out_of_scope_rows);

    let mut pages = ErrorPaginator::new(view.errors_preview.clone());
    if !pages.is_empty() {
        let _ = writeln!(out, "\nRow errors:");
        loop {
            let _ = writeln!(out, " {} (page {}/{})", pages.caption(), pages.page(), pages.total_pages());
            for error in pages.page_items() {
                let _ = writeln!(out, "{}", error_line(error));
            }
            if !pages.has_next() {
                break;
            }
            pages.next();
        }
    }

    let unlisted = view.unlisted_error_count();
    if unlisted > 0 {
        let _ = writeln!(out, "{unlisted} more errors not shown. Export the error report to see all of them.");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use taxline_client::controller::UploadError;
    use taxline_core::import::{
        CalculationProgressEvent, CalculationStatus, ImportErrorReason, ImportOptions,
        ImportResponse, ImportStatus, ImportSummary,
    };
    use taxline_core::phase::Phase;

    fn view(result: Option<ImportResponse>, upload_error: Option<UploadError>) -> ImportView {
        let errors_preview: Arc<[ImportRowError]> = result
            .as_ref()
            .map(|r| Arc::from(r.errors_preview.clone()))
            .unwrap_or_else(|| Arc::from(Vec::new()));
        ImportView {
            phase: Phase::Result,
            attempt: 1,
            options: ImportOptions::default(),
            result: result.map(Arc::new),
            errors_preview,
            upload_error,
            upload_started_at: None,
            upload_finished_at: None,
            calculation_done: true,
        }
    }

    fn row_error(row: u32) -> ImportRowError {
        ImportRowError {
            row_number: row,
            external_id: Some(i64::from(row) * 10),
            reason: ImportErrorReason::InvalidCoordinates,
            field: Some("latitude".into()),
            message: "latitude out of range".into(),
            raw_row: String::new(),
        }
    }

    #[test]
    fn upload_error_only_shows_message() {
        let text = render_result(&view(
            None,
            Some(UploadError {
                message: "Unsupported file".into(),
                status: Some(400),
            }),
        ));
        assert_eq!(text, "Upload failed: Unsupported file\n");
    }

    #[test]
    fn result_lists_every_page_and_unlisted_count() {
        let response = ImportResponse {
            tracking_id: "t-9".into(),
            status: ImportStatus::CompletedWithErrors,
            message: String::new(),
            summary: ImportSummary {
                total_rows: 40,
                parsed_rows: 40,
                imported_rows: 15,
                calculated_rows: 15,
                failed_rows: 25,
                ..Default::default()
            },
            errors_preview: (2..=13).map(row_error).collect(),
        };
        let text = render_result(&view(Some(response), None));

        assert!(text.starts_with("Success:"));
        assert!(text.contains("1–10 of 12 (page 1/2)"));
        assert!(text.contains("11–12 of 12 (page 2/2)"));
        assert!(text.contains("INVALID_COORDINATES"));
        assert!(text.contains("id=130 [latitude]"));
        assert!(text.contains("13 more errors not shown"));
    }

    #[test]
    fn upload_time_is_shown_once_the_upload_finished() {
        let response = ImportResponse {
            tracking_id: "t-3".into(),
            status: ImportStatus::Completed,
            message: String::new(),
            summary: ImportSummary::default(),
            errors_preview: Vec::new(),
        };
        let mut v = view(Some(response), None);
        assert!(!render_result(&v).contains("Upload time"));

        let started = chrono::Utc::now();
        v.upload_started_at = Some(started);
        v.upload_finished_at = Some(started + chrono::Duration::milliseconds(2460));
        let text = render_result(&v);
        assert!(text.contains("Tracking id:        t-3\nUpload time:        2.5s\n"));

        v.upload_error = Some(UploadError {
            message: "Too large".into(),
            status: Some(413),
        });
        assert_eq!(render_result(&v), "Upload failed: Too large\nUpload time:        2.5s\n");
    }

    #[test]
    fn elapsed_is_rounded_to_tenths() {
        assert_eq!(format_elapsed(chrono::Duration::milliseconds(0)), "0.0s");
        assert_eq!(format_elapsed(chrono::Duration::milliseconds(1049)), "1.0s");
        assert_eq!(format_elapsed(chrono::Duration::seconds(75)), "75.0s");
    }

    #[test]
    fn progress_line_before_and_after_first_event() {
        let mut snapshot = ProgressSnapshot::default();
        assert_eq!(progress_line(&snapshot, 0), "Connecting… (0%)");

        snapshot.progress = Some(CalculationProgressEvent {
            tracking_id: "t".into(),
            calculated: 240,
            out_of_scope: 3,
            pending: 257,
            total: 500,
            batch_calculated: 40,
            batch_out_of_scope: 0,
            batch_size: 40,
            status: CalculationStatus::Processing,
            terminal: false,
        });
        assert_eq!(progress_line(&snapshot, 48), "Processing… 240/500 (48%), 3 out of scope");
    }
}
