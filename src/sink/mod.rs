// src/sink/mod.rs

use crate::config::OutputFormat;
use crate::error::{PipelineError, Result};
use crate::report::Report;
use arrow::{csv::WriterBuilder, record_batch::RecordBatch};
use parquet::{
    arrow::ArrowWriter,
    basic::Compression,
    file::properties::WriterProperties,
};
use serde::Serialize;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Destination of `report` inside `out_dir`.
pub fn destination(out_dir: &Path, report: &str, format: OutputFormat) -> PathBuf {
    out_dir.join(format!("{}.{}", report, format.extension()))
}

/// Write `report` to `<out_dir>/<name>.<ext>`, replacing any previous artifact.
#[instrument(level = "info", skip(report, out_dir), fields(report = report.name()))]
pub fn write_report(report: &Report, out_dir: &Path, format: OutputFormat) -> Result<PathBuf> {
    let dest = destination(out_dir, report.name(), format);
    publish(&dest, |file| match format {
        OutputFormat::Csv => write_csv(&report.batch, file),
        OutputFormat::Parquet => write_parquet(&report.batch, file),
    })?;
    info!(path = %dest.display(), rows = report.num_rows(), "published report");
    Ok(dest)
}

/// Pretty-printed JSON, published the same way as reports.
pub fn write_json<T: Serialize>(value: &T, dest: &Path) -> Result<()> {
    publish(dest, |file| {
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, value).map_err(|e| e.to_string())?;
        out.write_all(b"\n").map_err(|e| e.to_string())?;
        out.flush().map_err(|e| e.to_string())
    })
}

/// Write through a temp file in the destination directory, then rename it
/// over `dest`. Readers see either the old artifact or the complete new one.
fn publish<F>(dest: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> std::result::Result<(), String>,
{
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| PipelineError::sink(dest, e))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tripstats-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| PipelineError::sink(dest, e))?;

    // on error `tmp` is dropped and the partial file removed
    write(tmp.as_file_mut()).map_err(|e| PipelineError::sink(dest, e))?;
    tmp.as_file().sync_all().map_err(|e| PipelineError::sink(dest, e))?;
    tmp.persist(dest)
        .map_err(|e| PipelineError::sink(dest, e.error))?;
    debug!(path = %dest.display(), "renamed temp file into place");
    Ok(())
}

fn write_csv(batch: &RecordBatch, file: &mut File) -> std::result::Result<(), String> {
    let mut writer = WriterBuilder::new()
        .with_header(true)
        .build(BufWriter::new(file));
    // the header is emitted on the first write, even for zero rows
    writer.write(batch).map_err(|e| e.to_string())?;
    writer.into_inner().flush().map_err(|e| e.to_string())
}

fn write_parquet(batch: &RecordBatch, file: &mut File) -> std::result::Result<(), String> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), Some(props)).map_err(|e| e.to_string())?;
    writer.write(batch).map_err(|e| e.to_string())?;
    writer.close().map_err(|e| e.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Report, ReportKind};
    use anyhow::Result;
    use arrow::{
        array::{ArrayRef, Float64Array, StringArray},
        datatypes::{DataType, Field},
    };
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::sync::Arc;

    fn per_day(rows: &[(&str, f64)]) -> Result<Report> {
        Ok(Report::new(
            ReportKind::AverageTripDurationPerDay,
            vec![
                Field::new("day", DataType::Utf8, false),
                Field::new("avg_trip_duration", DataType::Float64, false),
            ],
            vec![
                Arc::new(StringArray::from_iter_values(rows.iter().map(|(d, _)| *d))) as ArrayRef,
                Arc::new(Float64Array::from_iter_values(rows.iter().map(|(_, a)| *a))),
            ],
        )?)
    }

    fn csv_rows(path: &Path) -> Result<Vec<(String, f64)>> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push((record[0].to_string(), record[1].parse()?));
        }
        Ok(rows)
    }

    #[test]
    fn csv_overwrites_instead_of_appending() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = per_day(&[("2019-01-01", 245.0), ("2019-01-02", 400.0)])?;
        let path = write_report(&first, dir.path(), OutputFormat::Csv)?;
        assert_eq!(path, dir.path().join("average_trip_duration_per_day.csv"));
        assert_eq!(
            csv_rows(&path)?,
            vec![("2019-01-01".to_string(), 245.0), ("2019-01-02".to_string(), 400.0)]
        );

        let second = per_day(&[("2019-02-01", 10.5)])?;
        write_report(&second, dir.path(), OutputFormat::Csv)?;
        assert_eq!(csv_rows(&path)?, vec![("2019-02-01".to_string(), 10.5)]);
        assert!(fs::read_to_string(&path)?.starts_with("day,avg_trip_duration\n"));

        // no temp files are left behind
        let leftovers = fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[test]
    fn empty_report_still_has_a_header() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_report(&per_day(&[])?, dir.path(), OutputFormat::Csv)?;
        assert_eq!(fs::read_to_string(path)?, "day,avg_trip_duration\n");
        Ok(())
    }

    #[test]
    fn parquet_round_trips_schema_and_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let report = per_day(&[("2019-01-01", 245.0)])?;
        let path = write_report(&report, dir.path(), OutputFormat::Parquet)?;
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("parquet"));

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 1);
        assert_eq!(batches[0].schema().field(0).name(), "day");
        Ok(())
    }

    #[test]
    fn unwritable_destination_is_a_sink_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, b"")?;
        let err = write_report(&per_day(&[])?, &blocker, OutputFormat::Csv).unwrap_err();
        assert!(matches!(err, PipelineError::SinkWrite { .. }));
        assert!(!err.is_fatal());
        Ok(())
    }

    #[test]
    fn json_summary_is_published() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("run_summary.json");
        write_json(&serde_json::json!({ "rows": 3 }), &dest)?;
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(&dest)?)?;
        assert_eq!(value["rows"], 3);
        Ok(())
    }
}
