//! The `scorecast reconcile` command.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Table};

use scorecast_core::engine::{ReconcileDriver, ReconcileObserver};
use scorecast_core::report::{ReconcileReport, StepReport};

use super::open_store;

/// Console progress observer.
struct ConsoleObserver;

impl ReconcileObserver for ConsoleObserver {
    fn on_step_complete(&self, exam_id: &str, report: &StepReport) {
        match &report.note {
            Some(note) => eprintln!("  {exam_id} :: {} {} ({note})", report.step, report.outcome),
            None => eprintln!("  {exam_id} :: {} {}", report.step, report.outcome),
        }
    }

    fn on_exam_complete(&self, report: &ReconcileReport) {
        let status = if report.is_success() { "OK" } else { "ABORTED" };
        eprintln!(
            "  Done: {} [{status}] {} record(s) written at ledger v{} ({}ms)",
            report.exam_id,
            report.records_written(),
            report.ledger_version,
            report.duration_ms
        );
    }

    fn on_exam_error(&self, exam_id: &str, error: &str) {
        eprintln!("  ERROR: {exam_id}: {error}");
    }
}

pub async fn execute(
    exam_ids: Vec<String>,
    output: Option<PathBuf>,
    config_path: Option<PathBuf>,
    now: DateTime<Utc>,
) -> Result<()> {
    let (config, store) = open_store(config_path).await?;
    let exam_ids = if exam_ids.is_empty() {
        store.exam_ids().await?
    } else {
        exam_ids
    };
    if exam_ids.is_empty() {
        println!("No exams stored. Run `scorecast exam add --exam <file>` first.");
        return Ok(());
    }

    eprintln!(
        "scorecast v{}: reconciling {} exam(s) as of {}",
        env!("CARGO_PKG_VERSION"),
        exam_ids.len(),
        now.to_rfc3339()
    );

    let driver = ReconcileDriver::new(store, config.to_engine_config());
    let reports = driver.reconcile_all(&exam_ids, now, &ConsoleObserver).await?;

    print_summary(&reports);

    let output = output.unwrap_or(config.report_dir);
    let timestamp = Utc::now().format("%Y-%m-%dT%H%M%S");
    for report in &reports {
        let path = output.join(format!("reconcile-{}-{timestamp}.json", report.exam_id));
        report.save_json(&path)?;
        eprintln!("Report saved to: {}", path.display());
    }

    let failed: Vec<&str> = exam_ids
        .iter()
        .filter(|id| {
            !reports
                .iter()
                .any(|r| &r.exam_id == *id && r.is_success())
        })
        .map(String::as_str)
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("reconciliation incomplete for: {}", failed.join(", "));
    }
    Ok(())
}

fn print_summary(reports: &[ReconcileReport]) {
    let mut table = Table::new();
    table.set_header(vec!["Exam", "Ledger", "Contexts", "Written", "Status"]);

    for report in reports {
        let contexts: Vec<String> = report.contexts.iter().map(|c| c.to_string()).collect();
        let status = match report.failed_step() {
            Some(step) => format!("{} failed", step.step),
            None => "ok".to_string(),
        };
        table.add_row(vec![
            Cell::new(&report.exam_id),
            Cell::new(format!("v{}", report.ledger_version)),
            Cell::new(contexts.join(", ")),
            Cell::new(report.records_written()),
            Cell::new(status),
        ]);
    }

    println!("{table}");
}
