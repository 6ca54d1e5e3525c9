use super::{column, Mean, Report, ReportKind};
use crate::dataset::TripDataset;
use crate::error::Result;
use crate::schema::CanonicalField;
use arrow::{
    array::{Array, Float64Array, Int32Array, StringArray},
    datatypes::{DataType, Field},
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// Birth-year groups kept by [`age_stats_top_ten`].
pub const TOP_BIRTH_YEARS: usize = 10;

/// Mean trip duration per gender. Unknown gender is its own group and sorts first.
pub fn average_trip_duration_by_gender(dataset: &TripDataset) -> Result<Report> {
    let kind = ReportKind::AverageTripDurationByGender;
    let genders: &StringArray = column(dataset, kind, CanonicalField::Gender)?;
    let durations: &Float64Array = column(dataset, kind, CanonicalField::TripDuration)?;

    // None < Some(_), so the unknown group leads
    let mut by_gender: BTreeMap<Option<&str>, Mean> = BTreeMap::new();
    for row in 0..dataset.num_rows() {
        if durations.is_null(row) {
            continue;
        }
        let gender = (!genders.is_null(row)).then(|| genders.value(row));
        by_gender.entry(gender).or_default().add(durations.value(row));
    }

    let groups: Vec<(Option<&str>, f64)> = by_gender
        .into_iter()
        .filter_map(|(g, mean)| mean.value().map(|avg| (g, avg)))
        .collect();
    Report::new(
        kind,
        vec![
            Field::new("gender", DataType::Utf8, true),
            Field::new("avg_trip_duration", DataType::Float64, false),
        ],
        vec![
            Arc::new(StringArray::from(
                groups.iter().map(|(g, _)| *g).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from_iter_values(groups.iter().map(|(_, a)| *a))),
        ],
    )
}

/// The ten birth years with the longest mean trip duration, longest first.
pub fn age_stats_top_ten(dataset: &TripDataset) -> Result<Report> {
    let kind = ReportKind::AgeStatsTopTen;
    let years: &Int32Array = column(dataset, kind, CanonicalField::BirthYear)?;
    let durations: &Float64Array = column(dataset, kind, CanonicalField::TripDuration)?;

    let mut by_year: HashMap<i32, Mean> = HashMap::new();
    for row in 0..dataset.num_rows() {
        if years.is_null(row) || durations.is_null(row) {
            continue;
        }
        by_year
            .entry(years.value(row))
            .or_default()
            .add(durations.value(row));
    }

    let mut groups: Vec<(i32, f64)> = by_year
        .into_iter()
        .filter_map(|(year, mean)| mean.value().map(|avg| (year, avg)))
        .collect();
    groups.sort_by(|(a_year, a_avg), (b_year, b_avg)| {
        b_avg.total_cmp(a_avg).then_with(|| a_year.cmp(b_year))
    });
    groups.truncate(TOP_BIRTH_YEARS);

    Report::new(
        kind,
        vec![
            Field::new("birth_year", DataType::Int32, false),
            Field::new("avg_trip_duration", DataType::Float64, false),
        ],
        vec![
            Arc::new(Int32Array::from_iter_values(groups.iter().map(|(y, _)| *y))),
            Arc::new(Float64Array::from_iter_values(groups.iter().map(|(_, a)| *a))),
        ],
    )
}
