// src/report/stations.rs

use super::{column, Report, ReportKind};
use crate::dataset::TripDataset;
use crate::error::{PipelineError, Result};
use crate::schema::{values::timestamp_micros, CanonicalField};
use arrow::{
    array::{Array, Int64Array, StringArray, TimestampMicrosecondArray},
    datatypes::{DataType, Field},
};
use chrono::{Datelike, Duration, NaiveDateTime};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::debug;

/// Length of the trailing window for the station ranking.
pub const TRAILING_WINDOW_DAYS: i64 = 14;
/// Highest dense rank kept in the station ranking.
pub const TOP_RANK: i64 = 3;

/// For each `YYYY-MM`, the starting station with the most trips.
///
/// Equal counts go to the lexically smallest station name.
pub fn most_popular_starting_station_per_month(dataset: &TripDataset) -> Result<Report> {
    let kind = ReportKind::MostPopularStartingStationPerMonth;
    let starts: &TimestampMicrosecondArray = column(dataset, kind, CanonicalField::StartTime)?;
    let names: &StringArray = column(dataset, kind, CanonicalField::FromStationName)?;

    let mut counts: BTreeMap<(i32, u32), HashMap<&str, i64>> = BTreeMap::new();
    for row in 0..dataset.num_rows() {
        if starts.is_null(row) || names.is_null(row) {
            continue;
        }
        let ts = starts.value_as_datetime(row).ok_or_else(|| {
            PipelineError::report(kind.name(), format!("start_time out of range at row {}", row))
        })?;
        *counts
            .entry((ts.year(), ts.month()))
            .or_default()
            .entry(names.value(row))
            .or_insert(0) += 1;
    }

    let mut months = Vec::with_capacity(counts.len());
    let mut winners = Vec::with_capacity(counts.len());
    let mut totals = Vec::with_capacity(counts.len());
    for ((year, month), stations) in counts {
        let winner = stations
            .into_iter()
            .max_by(|(a_name, a_count), (b_name, b_count)| {
                a_count.cmp(b_count).then_with(|| b_name.cmp(a_name))
            });
        if let Some((name, count)) = winner {
            months.push(format!("{:04}-{:02}", year, month));
            winners.push(name);
            totals.push(count);
        }
    }

    Report::new(
        kind,
        vec![
            Field::new("month", DataType::Utf8, false),
            Field::new("most_popular_starting_station", DataType::Utf8, false),
            Field::new("trip_count", DataType::Int64, false),
        ],
        vec![
            Arc::new(StringArray::from(months)),
            Arc::new(StringArray::from(winners)),
            Arc::new(Int64Array::from(totals)),
        ],
    )
}

/// Stations with dense rank ≤ 3 by trip count over the 14 days ending at the
/// latest `start_time` in the dataset.
pub fn top_three_stations_last_two_weeks(dataset: &TripDataset) -> Result<Report> {
    // an empty dataset has no max; any window then yields an empty ranking
    let end = dataset.max_start_time().unwrap_or_default();
    top_stations_in_window(
        dataset,
        end - Duration::days(TRAILING_WINDOW_DAYS),
        end,
        TOP_RANK,
    )
}

/// Rank stations by trips starting in `[from, to]` (both inclusive) and keep
/// every row whose dense rank is at most `max_rank`.
pub fn top_stations_in_window(
    dataset: &TripDataset,
    from: NaiveDateTime,
    to: NaiveDateTime,
    max_rank: i64,
) -> Result<Report> {
    let kind = ReportKind::TopThreeStationsLastTwoWeeks;
    let starts: &TimestampMicrosecondArray = column(dataset, kind, CanonicalField::StartTime)?;
    let ids: &StringArray = column(dataset, kind, CanonicalField::FromStationId)?;
    let names: &StringArray = column(dataset, kind, CanonicalField::FromStationName)?;
    let (from_us, to_us) = (timestamp_micros(&from), timestamp_micros(&to));

    let mut counts: HashMap<(&str, &str), i64> = HashMap::new();
    for row in 0..dataset.num_rows() {
        if starts.is_null(row) || ids.is_null(row) || names.is_null(row) {
            continue;
        }
        let ts = starts.value(row);
        if ts < from_us || ts > to_us {
            continue;
        }
        *counts.entry((ids.value(row), names.value(row))).or_insert(0) += 1;
    }
    debug!(stations = counts.len(), %from, %to, "counted stations in window");

    let mut ranked: Vec<((&str, &str), i64)> = counts.into_iter().collect();
    ranked.sort_by(|((a_id, a_name), a), ((b_id, b_name), b)| {
        b.cmp(a)
            .then_with(|| a_name.cmp(b_name))
            .then_with(|| a_id.cmp(b_id))
    });
    let kept: Vec<(((&str, &str), i64), i64)> = dense_rank(ranked)
        .into_iter()
        .take_while(|(_, rank)| *rank <= max_rank)
        .collect();

    Report::new(
        kind,
        vec![
            Field::new("from_station_id", DataType::Utf8, false),
            Field::new("from_station_name", DataType::Utf8, false),
            Field::new("trip_count", DataType::Int64, false),
            Field::new("rank", DataType::Int64, false),
        ],
        vec![
            Arc::new(StringArray::from_iter_values(kept.iter().map(|(((id, _), _), _)| *id))),
            Arc::new(StringArray::from_iter_values(kept.iter().map(|(((_, name), _), _)| *name))),
            Arc::new(Int64Array::from_iter_values(kept.iter().map(|((_, count), _)| *count))),
            Arc::new(Int64Array::from_iter_values(kept.iter().map(|(_, rank)| *rank))),
        ],
    )
}

/// Assign dense ranks to `(key, count)` pairs already sorted by count
/// descending: equal counts share a rank, the next distinct count gets the
/// next rank.
pub fn dense_rank<K>(sorted: Vec<(K, i64)>) -> Vec<((K, i64), i64)> {
    let mut rank = 0;
    let mut previous: Option<i64> = None;
    sorted
        .into_iter()
        .map(|(key, count)| {
            if previous != Some(count) {
                rank += 1;
                previous = Some(count);
            }
            ((key, count), rank)
        })
        .collect()
}
