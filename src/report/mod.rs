// src/report/mod.rs
pub mod daily;
pub mod demographics;
pub mod stations;

use crate::dataset::TripDataset;
use crate::error::{PipelineError, Result};
use crate::schema::CanonicalField;
use arrow::{
    array::{Array, ArrayRef},
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

/// The fixed battery of reports, in publication order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "&'static str")]
pub enum ReportKind {
    AverageTripDurationPerDay,
    TripsCountPerDay,
    MostPopularStartingStationPerMonth,
    TopThreeStationsLastTwoWeeks,
    AverageTripDurationByGender,
    AgeStatsTopTen,
}

impl ReportKind {
    pub const ALL: [ReportKind; 6] = [
        ReportKind::AverageTripDurationPerDay,
        ReportKind::TripsCountPerDay,
        ReportKind::MostPopularStartingStationPerMonth,
        ReportKind::TopThreeStationsLastTwoWeeks,
        ReportKind::AverageTripDurationByGender,
        ReportKind::AgeStatsTopTen,
    ];

    /// Artifact name; also the destination file stem.
    pub fn name(&self) -> &'static str {
        match self {
            ReportKind::AverageTripDurationPerDay => "average_trip_duration_per_day",
            ReportKind::TripsCountPerDay => "trips_count_per_day",
            ReportKind::MostPopularStartingStationPerMonth => {
                "most_popular_starting_station_per_month"
            }
            ReportKind::TopThreeStationsLastTwoWeeks => "top_three_stations_per_day_last_two_weeks",
            ReportKind::AverageTripDurationByGender => "average_trip_duration_by_gender",
            ReportKind::AgeStatsTopTen => "age_stats_top_ten",
        }
    }

    /// Run the task against `dataset`. Never mutates the dataset.
    #[instrument(level = "info", skip(self, dataset), fields(report = self.name()))]
    pub fn compute(&self, dataset: &TripDataset) -> Result<Report> {
        let report = match self {
            ReportKind::AverageTripDurationPerDay => daily::average_trip_duration_per_day(dataset),
            ReportKind::TripsCountPerDay => daily::trips_count_per_day(dataset),
            ReportKind::MostPopularStartingStationPerMonth => {
                stations::most_popular_starting_station_per_month(dataset)
            }
            ReportKind::TopThreeStationsLastTwoWeeks => {
                stations::top_three_stations_last_two_weeks(dataset)
            }
            ReportKind::AverageTripDurationByGender => {
                demographics::average_trip_duration_by_gender(dataset)
            }
            ReportKind::AgeStatsTopTen => demographics::age_stats_top_ten(dataset),
        }?;
        debug!(rows = report.num_rows(), "computed report");
        Ok(report)
    }
}

impl From<ReportKind> for &'static str {
    fn from(kind: ReportKind) -> Self {
        kind.name()
    }
}

/// A named, ordered result table.
#[derive(Debug, Clone)]
pub struct Report {
    pub kind: ReportKind,
    pub batch: RecordBatch,
}

impl Report {
    pub(crate) fn new(kind: ReportKind, fields: Vec<Field>, columns: Vec<ArrayRef>) -> Result<Self> {
        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
            .map_err(|e| PipelineError::report(kind.name(), e))?;
        Ok(Self { kind, batch })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }
}

/// Fetch a typed canonical column, failing the report if it is missing.
pub(crate) fn column<'a, T: Array + 'static>(
    dataset: &'a TripDataset,
    kind: ReportKind,
    field: CanonicalField,
) -> Result<&'a T> {
    dataset.column::<T>(field).ok_or_else(|| {
        PipelineError::report(
            kind.name(),
            format!("column {} is missing or mistyped", field.name()),
        )
    })
}

/// Running mean.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    pub(crate) fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::{dataset, trip};

    #[test]
    fn registry_names_are_unique_and_stable() {
        let names: Vec<_> = ReportKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec![
                "average_trip_duration_per_day",
                "trips_count_per_day",
                "most_popular_starting_station_per_month",
                "top_three_stations_per_day_last_two_weeks",
                "average_trip_duration_by_gender",
                "age_stats_top_ten",
            ]
        );
    }

    #[test]
    fn mistyped_column_fails_the_report() {
        use arrow::array::Int32Array;
        let ds = dataset(&[trip("2019-05-01 10:00:00", 60.0)]);
        let err = column::<Int32Array>(
            &ds,
            ReportKind::AverageTripDurationPerDay,
            CanonicalField::TripDuration,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ReportComputation { report: "average_trip_duration_per_day", .. }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn every_task_runs_on_an_empty_dataset() -> Result<()> {
        let ds = dataset(&[]);
        for kind in ReportKind::ALL {
            let report = kind.compute(&ds)?;
            assert_eq!(report.num_rows(), 0, "{}", kind.name());
            assert!(report.batch.num_columns() >= 2);
        }
        Ok(())
    }

    #[test]
    fn tasks_do_not_depend_on_each_other() -> Result<()> {
        let ds = dataset(&[trip("2019-05-01 10:00:00", 60.0)]);
        let alone = ReportKind::AgeStatsTopTen.compute(&ds)?;
        for kind in ReportKind::ALL {
            kind.compute(&ds)?;
        }
        let after = ReportKind::AgeStatsTopTen.compute(&ds)?;
        assert_eq!(alone.batch, after.batch);
        Ok(())
    }

    #[test]
    fn mean_of_nothing_is_none() {
        let mut m = Mean::default();
        assert_eq!(m.value(), None);
        m.add(2.0);
        m.add(4.0);
        assert_eq!(m.value(), Some(3.0));
    }
}
