// src/pipeline.rs

use crate::archive::{self, MemberTable};
use crate::config::{Config, OutputFormat};
use crate::dataset::TripDataset;
use crate::error::{PipelineError, Result};
use crate::report::{Report, ReportKind};
use crate::schema::{self, ExcludedTable, TableStats, TextDecoder};
use crate::sink;
use futures::future::join_all;
use serde::Serialize;
use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{error, info, instrument, warn};

/// File the run summary is published to, next to the reports.
pub const SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveOutcome {
    pub archive: PathBuf,
    pub members: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WrittenReport {
    pub report: ReportKind,
    pub path: PathBuf,
    pub rows: usize,
}

/// What succeeded and what was skipped, reported at the end of every run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub archives_succeeded: Vec<ArchiveOutcome>,
    pub archives_failed: Vec<FailedItem>,
    pub tables: Vec<TableStats>,
    pub tables_excluded: Vec<ExcludedTable>,
    pub rows_ingested: usize,
    pub reports_written: Vec<WrittenReport>,
    pub reports_failed: Vec<FailedItem>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.archives_failed.is_empty()
            && self.tables_excluded.is_empty()
            && self.reports_failed.is_empty()
    }

    pub fn log(&self) {
        info!(
            archives = self.archives_succeeded.len(),
            rows = self.rows_ingested,
            reports = self.reports_written.len(),
            "run finished"
        );
        for failed in &self.archives_failed {
            warn!(archive = %failed.name, "archive skipped: {}", failed.error);
        }
        for excluded in &self.tables_excluded {
            warn!(table = %excluded.table, "table excluded: {}", excluded.reason);
        }
        for failed in &self.reports_failed {
            error!(report = %failed.name, "report skipped: {}", failed.error);
        }
    }
}

/// Run the whole pipeline: discover, extract, reconcile, report, publish.
///
/// Only configuration errors and an empty dataset abort the run; every other
/// failure is recorded in the returned summary.
#[instrument(level = "info", skip_all, fields(input = %config.input_dir.display()))]
pub async fn run(config: &Config) -> Result<RunSummary> {
    config.validate()?;
    let decoder = TextDecoder::from_config(config)?;
    let start = Instant::now();

    let archives = archive::discover_archives(&config.input_dir, &config.archive_pattern)?;
    info!("{} archives to process", archives.len());

    let mut summary = RunSummary::default();
    let members = extract_all(archives, config.workers, &mut summary).await;

    let reconciliation = tokio::task::spawn_blocking(move || schema::reconcile(&members, &decoder))
        .await
        .map_err(|e| PipelineError::schema_unparseable("consolidated dataset", e))??;
    summary.tables = reconciliation.tables;
    summary.tables_excluded = reconciliation.excluded;
    summary.rows_ingested = reconciliation.dataset.num_rows();

    if reconciliation.dataset.is_empty() {
        summary.log();
        return Err(PipelineError::EmptyDataset);
    }
    info!(rows = summary.rows_ingested, elapsed = ?start.elapsed(), "dataset ready");

    let dataset = Arc::new(reconciliation.dataset);
    run_reports(dataset, &config.output_dir, config.format, &mut summary).await;

    let summary_path = config.output_dir.join(SUMMARY_FILE);
    if let Err(e) = sink::write_json(&summary, &summary_path) {
        warn!("could not publish run summary: {}", e);
    }
    summary.log();
    info!(elapsed = ?start.elapsed(), "all done");
    Ok(summary)
}

/// Extract every archive on the blocking pool, at most `workers` at a time.
async fn extract_all(
    archives: Vec<PathBuf>,
    workers: usize,
    summary: &mut RunSummary,
) -> Vec<MemberTable> {
    let sem = Arc::new(Semaphore::new(workers));
    let mut handles = Vec::with_capacity(archives.len());
    for path in archives.iter().cloned() {
        let sem = Arc::clone(&sem);
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await;
            tokio::task::spawn_blocking(move || archive::extract_archive(&path)).await
        }));
    }

    let mut members = Vec::new();
    for (path, joined) in archives.into_iter().zip(join_all(handles).await) {
        let result = match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) | Err(e) => Err(PipelineError::archive_corrupt(&path, e)),
        };
        match result {
            Ok(tables) => {
                summary.archives_succeeded.push(ArchiveOutcome {
                    archive: path,
                    members: tables.len(),
                });
                members.extend(tables);
            }
            Err(e) => {
                error!(archive = %path.display(), "extraction failed: {}", e);
                summary.archives_failed.push(FailedItem {
                    name: path.display().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
    members
}

/// Compute and publish every report concurrently. A failing or panicking
/// task is recorded and does not affect the others.
async fn run_reports(
    dataset: Arc<TripDataset>,
    out_dir: &Path,
    format: OutputFormat,
    summary: &mut RunSummary,
) {
    let mut set = JoinSet::new();
    for kind in ReportKind::ALL {
        let dataset = Arc::clone(&dataset);
        let out_dir = out_dir.to_path_buf();
        set.spawn_blocking(move || (kind, compute_and_write(kind, &dataset, &out_dir, format)));
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((kind, Ok((path, rows)))) => summary.reports_written.push(WrittenReport {
                report: kind,
                path,
                rows,
            }),
            Ok((kind, Err(e))) => {
                error!(report = kind.name(), "{}", e);
                summary.reports_failed.push(FailedItem {
                    name: kind.name().to_string(),
                    error: e.to_string(),
                });
            }
            Err(e) => {
                error!("report task did not complete: {}", e);
                summary.reports_failed.push(FailedItem {
                    name: "unknown".into(),
                    error: e.to_string(),
                });
            }
        }
    }
    summary.reports_written.sort_by_key(|w| w.report);
    summary.reports_failed.sort_by(|a, b| a.name.cmp(&b.name));
}

fn compute_and_write(
    kind: ReportKind,
    dataset: &TripDataset,
    out_dir: &Path,
    format: OutputFormat,
) -> Result<(PathBuf, usize)> {
    let report = isolated(kind, || kind.compute(dataset))?;
    let path = sink::write_report(&report, out_dir, format)?;
    Ok((path, report.num_rows()))
}

/// Run one task, turning a panic into a `ReportComputation` error for `kind`.
fn isolated<F>(kind: ReportKind, task: F) -> Result<Report>
where
    F: FnOnce() -> Result<Report>,
{
    panic::catch_unwind(AssertUnwindSafe(task))
        .map_err(|_| PipelineError::report(kind.name(), "task panicked"))?
}
