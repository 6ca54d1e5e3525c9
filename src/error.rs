//! Error types for the ingestion and report pipeline.

use std::path::PathBuf;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures the pipeline distinguishes between.
///
/// Only [`PipelineError::EmptyDataset`] and [`PipelineError::Config`] abort a
/// run; every other kind is isolated to the archive, table or report it names.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An archive could not be opened or decompressed.
    #[error("archive {archive:?} is corrupt: {reason}")]
    ArchiveCorrupt {
        /// Path of the failing archive.
        archive: PathBuf,
        /// Underlying zip or I/O error.
        reason: String,
    },

    /// A member table's header could not be read or mapped.
    #[error("table {table} has an unusable schema: {reason}")]
    SchemaUnparseable {
        /// `archive!member` identifier of the table.
        table: String,
        /// Human-readable details.
        reason: String,
    },

    /// No archive yielded a single trip record.
    #[error("no trip records were extracted from any archive")]
    EmptyDataset,

    /// A single report task failed.
    #[error("report {report} failed: {reason}")]
    ReportComputation {
        /// Report name.
        report: &'static str,
        /// Human-readable details.
        reason: String,
    },

    /// A report artifact could not be written.
    #[error("writing {destination:?} failed: {reason}")]
    SinkWrite {
        /// Target artifact path.
        destination: PathBuf,
        /// Underlying I/O, CSV or Parquet error.
        reason: String,
    },

    /// The run configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn archive_corrupt(archive: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ArchiveCorrupt {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn schema_unparseable(table: impl Into<String>, reason: impl ToString) -> Self {
        Self::SchemaUnparseable {
            table: table.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn report(report: &'static str, reason: impl ToString) -> Self {
        Self::ReportComputation {
            report,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn sink(destination: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SinkWrite {
            destination: destination.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error must stop the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EmptyDataset | Self::Config(_))
    }
}
