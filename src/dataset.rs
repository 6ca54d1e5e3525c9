// src/dataset.rs

use crate::error::{PipelineError, Result};
use crate::schema::CanonicalField;
use arrow::{
    array::{Array, TimestampMicrosecondArray},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDateTime};

/// The consolidated, schema-reconciled trip records of one run.
///
/// Immutable once built; report tasks share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct TripDataset {
    batch: RecordBatch,
}

impl TripDataset {
    /// Wrap a reconciled batch. Every canonical column must be present and
    /// `start_time` must be non-null on every row.
    pub fn new(batch: RecordBatch) -> Result<Self> {
        for field in CanonicalField::ALL {
            let Some(col) = batch.column_by_name(field.name()) else {
                return Err(PipelineError::schema_unparseable(
                    "consolidated dataset",
                    format!("missing column {}", field.name()),
                ));
            };
            if col.data_type() != &field.data_type() {
                return Err(PipelineError::schema_unparseable(
                    "consolidated dataset",
                    format!("column {} has type {}", field.name(), col.data_type()),
                ));
            }
        }
        let ds = Self { batch };
        if ds.start_times().map_or(0, |s| s.null_count()) > 0 {
            return Err(PipelineError::schema_unparseable(
                "consolidated dataset",
                "start_time contains nulls",
            ));
        }
        Ok(ds)
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// Downcast a canonical column to its concrete array type.
    pub fn column<T: Array + 'static>(&self, field: CanonicalField) -> Option<&T> {
        self.batch
            .column_by_name(field.name())
            .and_then(|c| c.as_any().downcast_ref::<T>())
    }

    pub fn start_times(&self) -> Option<&TimestampMicrosecondArray> {
        self.column(CanonicalField::StartTime)
    }

    /// Latest `start_time` in the dataset.
    pub fn max_start_time(&self) -> Option<NaiveDateTime> {
        let micros = self.start_times()?.iter().flatten().max()?;
        DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::values::{parse_timestamp, timestamp_micros};
    use arrow::{
        array::{new_null_array, ArrayRef, Float64Array, Int32Array, StringArray},
        datatypes::Schema,
    };
    use std::sync::Arc;

    /// One synthetic trip for report tests.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct Trip {
        pub start: &'static str,
        pub duration: Option<f64>,
        pub station_id: Option<&'static str>,
        pub station: Option<&'static str>,
        pub gender: Option<&'static str>,
        pub birth_year: Option<i32>,
    }

    pub(crate) fn trip(start: &'static str, duration: f64) -> Trip {
        Trip {
            start,
            duration: Some(duration),
            ..Trip::default()
        }
    }

    /// Build a dataset with the full canonical schema from synthetic trips.
    pub(crate) fn dataset(trips: &[Trip]) -> TripDataset {
        let fields: Vec<_> = CanonicalField::ALL.iter().map(|f| f.field()).collect();
        let schema = Arc::new(Schema::new(fields));
        let columns: Vec<ArrayRef> = CanonicalField::ALL
            .iter()
            .map(|field| -> ArrayRef {
                match field {
                    CanonicalField::StartTime => Arc::new(TimestampMicrosecondArray::from(
                        trips
                            .iter()
                            .map(|t| timestamp_micros(&parse_timestamp(t.start).unwrap()))
                            .collect::<Vec<_>>(),
                    )),
                    CanonicalField::TripDuration => Arc::new(Float64Array::from(
                        trips.iter().map(|t| t.duration).collect::<Vec<_>>(),
                    )),
                    CanonicalField::FromStationId => Arc::new(StringArray::from(
                        trips.iter().map(|t| t.station_id).collect::<Vec<_>>(),
                    )),
                    CanonicalField::FromStationName => Arc::new(StringArray::from(
                        trips.iter().map(|t| t.station).collect::<Vec<_>>(),
                    )),
                    CanonicalField::Gender => Arc::new(StringArray::from(
                        trips.iter().map(|t| t.gender).collect::<Vec<_>>(),
                    )),
                    CanonicalField::BirthYear => Arc::new(Int32Array::from(
                        trips.iter().map(|t| t.birth_year).collect::<Vec<_>>(),
                    )),
                    other => new_null_array(&other.data_type(), trips.len()),
                }
            })
            .collect();
        TripDataset::new(RecordBatch::try_new(schema, columns).unwrap()).unwrap()
    }

    #[test]
    fn max_start_time_reads_naive_wall_clock() {
        let ds = dataset(&[
            trip("2019-12-31 23:59:59", 1.0),
            trip("2019-06-01 08:00:00", 1.0),
        ]);
        assert_eq!(ds.max_start_time(), parse_timestamp("2019-12-31 23:59:59"));
        assert_eq!(ds.num_rows(), 2);
    }

    #[test]
    fn column_downcasts_only_to_the_stored_type() {
        let ds = dataset(&[trip("2019-06-01 08:00:00", 42.0)]);
        let durations = ds.column::<Float64Array>(CanonicalField::TripDuration).unwrap();
        assert_eq!(durations.value(0), 42.0);
        assert!(ds.column::<Int32Array>(CanonicalField::TripDuration).is_none());
        assert!(ds.column::<StringArray>(CanonicalField::BirthYear).is_none());
    }

    #[test]
    fn empty_dataset_has_no_max() {
        let ds = dataset(&[]);
        assert!(ds.is_empty());
        assert_eq!(ds.max_start_time(), None);
    }

    #[test]
    fn missing_canonical_column_is_rejected() {
        let schema = Arc::new(Schema::new(vec![CanonicalField::StartTime.field()]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(TimestampMicrosecondArray::from(vec![0i64])) as ArrayRef],
        )
        .unwrap();
        assert!(TripDataset::new(batch).is_err());
    }
}
