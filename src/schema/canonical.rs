// src/schema/canonical.rs

use arrow::datatypes::{DataType, Field, TimeUnit};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// The trip fields every historical file layout is folded onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CanonicalField {
    TripId,
    StartTime,
    EndTime,
    BikeId,
    TripDuration,
    FromStationId,
    FromStationName,
    ToStationId,
    ToStationName,
    UserType,
    Gender,
    BirthYear,
}

impl CanonicalField {
    /// Column order of the consolidated dataset.
    pub const ALL: [CanonicalField; 12] = [
        CanonicalField::TripId,
        CanonicalField::StartTime,
        CanonicalField::EndTime,
        CanonicalField::BikeId,
        CanonicalField::TripDuration,
        CanonicalField::FromStationId,
        CanonicalField::FromStationName,
        CanonicalField::ToStationId,
        CanonicalField::ToStationName,
        CanonicalField::UserType,
        CanonicalField::Gender,
        CanonicalField::BirthYear,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::TripId => "trip_id",
            CanonicalField::StartTime => "start_time",
            CanonicalField::EndTime => "end_time",
            CanonicalField::BikeId => "bike_id",
            CanonicalField::TripDuration => "trip_duration",
            CanonicalField::FromStationId => "from_station_id",
            CanonicalField::FromStationName => "from_station_name",
            CanonicalField::ToStationId => "to_station_id",
            CanonicalField::ToStationName => "to_station_name",
            CanonicalField::UserType => "user_type",
            CanonicalField::Gender => "gender",
            CanonicalField::BirthYear => "birth_year",
        }
    }

    /// Arrow type of the column in the consolidated dataset.
    ///
    /// Timestamps are naive: they carry whatever wall-clock time the file
    /// recorded, no zone conversion is applied.
    pub fn data_type(&self) -> DataType {
        match self {
            CanonicalField::StartTime | CanonicalField::EndTime => {
                DataType::Timestamp(TimeUnit::Microsecond, None)
            }
            CanonicalField::TripDuration => DataType::Float64,
            CanonicalField::BirthYear => DataType::Int32,
            _ => DataType::Utf8,
        }
    }

    pub fn field(&self) -> Field {
        // start_time is the only column guaranteed on every row
        Field::new(self.name(), self.data_type(), *self != CanonicalField::StartTime)
    }

    /// Case-sensitive lookup of a raw header cell.
    pub fn lookup(header: &str) -> Option<CanonicalField> {
        ALIASES.get(header).copied()
    }

    /// True when `name` is the output name of a canonical column.
    pub fn is_canonical_name(name: &str) -> bool {
        CanonicalField::ALL.iter().any(|f| f.name() == name)
    }
}

/// Raw header spellings seen across the published trip files.
const ALIAS_TABLE: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::TripId,
        &["trip_id", "Trip ID", "01 - Rental Details Rental ID", "ride_id"],
    ),
    (
        CanonicalField::StartTime,
        &[
            "start_time",
            "starttime",
            "Start Time",
            "01 - Rental Details Local Start Time",
            "started_at",
        ],
    ),
    (
        CanonicalField::EndTime,
        &[
            "end_time",
            "stoptime",
            "Stop Time",
            "End Time",
            "01 - Rental Details Local End Time",
            "ended_at",
        ],
    ),
    (
        CanonicalField::BikeId,
        &["bike_id", "bikeid", "Bike ID", "01 - Rental Details Bike ID"],
    ),
    (
        CanonicalField::TripDuration,
        &[
            "trip_duration",
            "tripduration",
            "Trip Duration",
            "01 - Rental Details Duration In Seconds Uncapped",
        ],
    ),
    (
        CanonicalField::FromStationId,
        &[
            "from_station_id",
            "From Station ID",
            "03 - Rental Start Station ID",
            "start_station_id",
        ],
    ),
    (
        CanonicalField::FromStationName,
        &[
            "from_station_name",
            "From Station Name",
            "03 - Rental Start Station Name",
            "start_station_name",
        ],
    ),
    (
        CanonicalField::ToStationId,
        &[
            "to_station_id",
            "To Station ID",
            "02 - Rental End Station ID",
            "end_station_id",
        ],
    ),
    (
        CanonicalField::ToStationName,
        &[
            "to_station_name",
            "To Station Name",
            "02 - Rental End Station Name",
            "end_station_name",
        ],
    ),
    (
        CanonicalField::UserType,
        &["user_type", "usertype", "User Type", "member_casual"],
    ),
    (CanonicalField::Gender, &["gender", "Gender", "Member Gender"]),
    (
        CanonicalField::BirthYear,
        &[
            "birth_year",
            "birthyear",
            "Birth Year",
            "05 - Member Details Member Birthday Year",
        ],
    ),
];

static ALIASES: Lazy<HashMap<&'static str, CanonicalField>> = Lazy::new(|| {
    ALIAS_TABLE
        .iter()
        .flat_map(|(field, names)| names.iter().map(move |n| (*n, *field)))
        .collect()
});
