use super::{column, Mean, Report, ReportKind};
use crate::dataset::TripDataset;
use crate::error::{PipelineError, Result};
use crate::schema::CanonicalField;
use arrow::{
    array::{Array, ArrayRef, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray},
    datatypes::{DataType, Field},
};
use chrono::NaiveDate;
use std::{collections::BTreeMap, sync::Arc};

fn day_of(
    starts: &TimestampMicrosecondArray,
    row: usize,
    kind: ReportKind,
) -> Result<NaiveDate> {
    starts
        .value_as_datetime(row)
        .map(|ts| ts.date())
        .ok_or_else(|| PipelineError::report(kind.name(), format!("start_time out of range at row {}", row)))
}

fn day_column(days: impl Iterator<Item = NaiveDate>) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(
        days.map(|d| d.format("%Y-%m-%d").to_string()),
    ))
}

/// Mean trip duration per calendar day of `start_time`, ascending by day.
pub fn average_trip_duration_per_day(dataset: &TripDataset) -> Result<Report> {
    let kind = ReportKind::AverageTripDurationPerDay;
    let starts: &TimestampMicrosecondArray = column(dataset, kind, CanonicalField::StartTime)?;
    let durations: &Float64Array = column(dataset, kind, CanonicalField::TripDuration)?;

    let mut by_day: BTreeMap<NaiveDate, Mean> = BTreeMap::new();
    for row in 0..dataset.num_rows() {
        if starts.is_null(row) || durations.is_null(row) {
            continue;
        }
        by_day
            .entry(day_of(starts, row, kind)?)
            .or_default()
            .add(durations.value(row));
    }

    let averages: Vec<(NaiveDate, f64)> = by_day
        .into_iter()
        .filter_map(|(day, mean)| mean.value().map(|avg| (day, avg)))
        .collect();
    Report::new(
        kind,
        vec![
            Field::new("day", DataType::Utf8, false),
            Field::new("avg_trip_duration", DataType::Float64, false),
        ],
        vec![
            day_column(averages.iter().map(|(d, _)| *d)),
            Arc::new(Float64Array::from_iter_values(averages.iter().map(|(_, a)| *a))),
        ],
    )
}

/// Number of trips per calendar day of `start_time`, ascending by day.
pub fn trips_count_per_day(dataset: &TripDataset) -> Result<Report> {
    let kind = ReportKind::TripsCountPerDay;
    let starts: &TimestampMicrosecondArray = column(dataset, kind, CanonicalField::StartTime)?;

    let mut by_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for row in 0..dataset.num_rows() {
        if starts.is_null(row) {
            continue;
        }
        *by_day.entry(day_of(starts, row, kind)?).or_insert(0) += 1;
    }

    Report::new(
        kind,
        vec![
            Field::new("day", DataType::Utf8, false),
            Field::new("trip_count", DataType::Int64, false),
        ],
        vec![
            day_column(by_day.keys().copied()),
            Arc::new(Int64Array::from_iter_values(by_day.values().copied())),
        ],
    )
}
