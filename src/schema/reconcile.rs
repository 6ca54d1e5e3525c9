// src/schema/reconcile.rs

use super::canonical::CanonicalField;
use super::decode::TextDecoder;
use super::values::{
    clean_str, parse_birth_year, parse_duration_secs, parse_timestamp, timestamp_micros,
};
use crate::archive::MemberTable;
use crate::dataset::TripDataset;
use crate::error::{PipelineError, Result};
use arrow::{
    array::{
        new_null_array, ArrayRef, Float64Builder, Int32Builder, StringBuilder,
        TimestampMicrosecondBuilder,
    },
    compute::concat_batches,
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use csv::ReaderBuilder;
use rayon::prelude::*;
use serde::Serialize;
use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};

/// Where one raw header cell ends up in the consolidated schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRole {
    Canonical(CanonicalField),
    Passthrough(String),
    /// A second cell mapping to an already-mapped canonical field.
    Duplicate(CanonicalField),
}

/// Resolved header of one member table.
#[derive(Debug, Clone)]
pub struct ColumnPlan {
    pub roles: Vec<(String, ColumnRole)>,
}

impl ColumnPlan {
    /// Map raw header cells. Fails when the header is empty or repeats a name.
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> std::result::Result<Self, String> {
        let named: HashSet<&str> = headers.iter().filter_map(|h| clean_str(h.as_ref())).collect();
        if named.is_empty() {
            return Err("header row is empty".into());
        }
        // blank cells get a positional name that no real cell uses
        let cells: Vec<String> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| match clean_str(h.as_ref()) {
                Some(name) => name.to_string(),
                None => {
                    let mut name = format!("column_{}", i + 1);
                    while named.contains(name.as_str()) {
                        name.push('_');
                    }
                    name
                }
            })
            .collect();

        let mut seen_raw = HashSet::new();
        let mut seen_canonical = HashSet::new();
        let mut roles = Vec::with_capacity(cells.len());
        for cell in cells {
            if !seen_raw.insert(cell.clone()) {
                return Err(format!("header repeats column {:?}", cell));
            }
            let role = match CanonicalField::lookup(&cell) {
                Some(field) if seen_canonical.insert(field) => ColumnRole::Canonical(field),
                Some(field) => ColumnRole::Duplicate(field),
                None => ColumnRole::Passthrough(cell.clone()),
            };
            roles.push((cell, role));
        }
        Ok(Self { roles })
    }

    pub fn index_of(&self, field: CanonicalField) -> Option<usize> {
        self.roles
            .iter()
            .position(|(_, role)| *role == ColumnRole::Canonical(field))
    }

    pub fn has_canonical(&self) -> bool {
        self.roles
            .iter()
            .any(|(_, role)| matches!(role, ColumnRole::Canonical(_)))
    }
}

/// Per-table ingestion counters, reported in the run summary.
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub table: String,
    pub rows_read: usize,
    pub rows_accepted: usize,
    /// `rows_missing_start + rows_unreadable`.
    pub rows_rejected: usize,
    /// Rows with no parseable `start_time`.
    pub rows_missing_start: usize,
    /// Records the CSV reader could not split into fields.
    pub rows_unreadable: usize,
    pub mapped_columns: Vec<String>,
    pub passthrough_columns: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludedTable {
    pub table: String,
    pub reason: String,
}

/// Outcome of folding every member table into one dataset.
#[derive(Debug)]
pub struct Reconciliation {
    pub dataset: TripDataset,
    pub tables: Vec<TableStats>,
    pub excluded: Vec<ExcludedTable>,
}

struct ParsedTable {
    stats: TableStats,
    batch: RecordBatch,
}

/// Parse every member table with its own header and union them by column name.
///
/// Tables are folded in `(archive, member)` order so the result does not depend
/// on the order the archives finished extracting in.
#[instrument(level = "info", skip_all, fields(members = members.len()))]
pub fn reconcile(members: &[MemberTable], decoder: &TextDecoder) -> Result<Reconciliation> {
    let mut ordered: Vec<&MemberTable> = members.iter().collect();
    ordered.sort_by(|a, b| (&a.archive, &a.name).cmp(&(&b.archive, &b.name)));

    let parsed: Vec<Result<ParsedTable>> = ordered
        .par_iter()
        .map(|member| parse_member(member, decoder))
        .collect();

    let mut tables = Vec::new();
    let mut batches = Vec::new();
    let mut excluded = Vec::new();
    for (member, result) in ordered.iter().zip(parsed) {
        match result {
            Ok(table) => {
                tables.push(table.stats);
                batches.push(table.batch);
            }
            Err(e) => {
                warn!(table = %member.id(), "excluding table: {}", e);
                excluded.push(ExcludedTable {
                    table: member.id(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let schema = union_schema(&batches);
    let aligned = batches
        .iter()
        .map(|b| align_to(b, &schema))
        .collect::<Result<Vec<_>>>()?;
    let batch = concat_batches(&schema, &aligned)
        .map_err(|e| PipelineError::schema_unparseable("consolidated dataset", e))?;

    info!(
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        tables = tables.len(),
        excluded = excluded.len(),
        "reconciled dataset"
    );
    Ok(Reconciliation {
        dataset: TripDataset::new(batch)?,
        tables,
        excluded,
    })
}

/// Canonical columns in fixed order, then every passthrough name seen, sorted.
fn union_schema(batches: &[RecordBatch]) -> SchemaRef {
    let passthrough: BTreeSet<String> = batches
        .iter()
        .flat_map(|b| b.schema().fields().iter().map(|f| f.name().clone()).collect::<Vec<_>>())
        .filter(|name| !CanonicalField::is_canonical_name(name))
        .collect();

    let mut fields: Vec<Field> = CanonicalField::ALL.iter().map(|f| f.field()).collect();
    fields.extend(
        passthrough
            .into_iter()
            .map(|name| Field::new(name, DataType::Utf8, true)),
    );
    Arc::new(Schema::new(fields))
}

/// Project `batch` onto `schema` by name, null-filling absent columns.
fn align_to(batch: &RecordBatch, schema: &SchemaRef) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|field| match batch.column_by_name(field.name()) {
            Some(col) => col.clone(),
            None => new_null_array(field.data_type(), batch.num_rows()),
        })
        .collect();
    RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| PipelineError::schema_unparseable("consolidated dataset", e))
}

/// Decode and type one member table.
fn parse_member(member: &MemberTable, decoder: &TextDecoder) -> Result<ParsedTable> {
    let table_id = member.id();
    let text = decoder.decode(&member.bytes).ok_or_else(|| {
        PipelineError::schema_unparseable(
            &table_id,
            format!("not valid {} text", decoder.primary_name()),
        )
    })?;

    let mut rdr = ReaderBuilder::new()
        .delimiter(member.delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| PipelineError::schema_unparseable(&table_id, e))?
        .iter()
        .map(str::to_string)
        .collect();
    let plan = ColumnPlan::from_headers(&headers)
        .map_err(|reason| PipelineError::schema_unparseable(&table_id, reason))?;

    if !plan.has_canonical() {
        // columns are still kept; without start_time no row survives
        warn!(
            table = %table_id,
            "{}",
            PipelineError::schema_unparseable(&table_id, "no column maps to a trip field")
        );
    }
    for (raw, role) in &plan.roles {
        if let ColumnRole::Duplicate(field) = role {
            warn!(table = %table_id, column = %raw, field = field.name(), "ignoring duplicate mapping");
        }
    }

    let mut builder = TableBuilder::new(&plan);
    let mut rows_read = 0usize;
    let mut rows_missing_start = 0usize;
    let mut rows_unreadable = 0usize;
    for record in rdr.records() {
        rows_read += 1;
        match record {
            Ok(record) => {
                if !builder.push(&record) {
                    rows_missing_start += 1;
                }
            }
            Err(e) => {
                debug!(table = %table_id, row = rows_read, "unreadable record: {}", e);
                rows_unreadable += 1;
            }
        }
    }

    let batch = builder
        .finish()
        .map_err(|e| PipelineError::schema_unparseable(&table_id, e))?;
    if rows_missing_start > 0 {
        warn!(table = %table_id, rows_missing_start, "rejected rows without a usable start_time");
    }
    if rows_unreadable > 0 {
        warn!(table = %table_id, rows_unreadable, "rejected unreadable records");
    }
    debug!(table = %table_id, rows = batch.num_rows(), "parsed table");

    let stats = TableStats {
        table: table_id,
        rows_read,
        rows_accepted: batch.num_rows(),
        rows_rejected: rows_missing_start + rows_unreadable,
        rows_missing_start,
        rows_unreadable,
        mapped_columns: plan
            .roles
            .iter()
            .filter_map(|(_, role)| match role {
                ColumnRole::Canonical(f) => Some(f.name().to_string()),
                _ => None,
            })
            .collect(),
        passthrough_columns: plan
            .roles
            .iter()
            .filter_map(|(_, role)| match role {
                ColumnRole::Passthrough(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
    };
    Ok(ParsedTable { stats, batch })
}

enum ValueBuilder {
    Utf8(StringBuilder),
    Int32(Int32Builder),
    Timestamp(TimestampMicrosecondBuilder),
}

impl ValueBuilder {
    fn for_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int32 => ValueBuilder::Int32(Int32Builder::new()),
            DataType::Timestamp(_, _) => {
                ValueBuilder::Timestamp(TimestampMicrosecondBuilder::new())
            }
            _ => ValueBuilder::Utf8(StringBuilder::new()),
        }
    }

    fn append(&mut self, raw: Option<&str>) {
        match self {
            ValueBuilder::Utf8(b) => b.append_option(raw.and_then(clean_str)),
            ValueBuilder::Int32(b) => b.append_option(raw.and_then(parse_birth_year)),
            ValueBuilder::Timestamp(b) => b.append_option(
                raw.and_then(parse_timestamp)
                    .map(|ts| timestamp_micros(&ts)),
            ),
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ValueBuilder::Utf8(b) => Arc::new(b.finish()),
            ValueBuilder::Int32(b) => Arc::new(b.finish()),
            ValueBuilder::Timestamp(b) => Arc::new(b.finish()),
        }
    }
}

/// Accumulates typed columns for one table.
///
/// `start_time` and `trip_duration` are always materialised: the first gates
/// every row, the second may be derived from `end_time`.
struct TableBuilder {
    start_idx: Option<usize>,
    end_idx: Option<usize>,
    duration_idx: Option<usize>,
    start: TimestampMicrosecondBuilder,
    duration: Float64Builder,
    /// (source index, output field, builder) for every other kept column.
    others: Vec<(usize, Field, ValueBuilder)>,
}

impl TableBuilder {
    fn new(plan: &ColumnPlan) -> Self {
        let mut others = Vec::new();
        for (idx, (_, role)) in plan.roles.iter().enumerate() {
            let field = match role {
                ColumnRole::Canonical(CanonicalField::StartTime)
                | ColumnRole::Canonical(CanonicalField::TripDuration)
                | ColumnRole::Duplicate(_) => continue,
                ColumnRole::Canonical(f) => f.field(),
                ColumnRole::Passthrough(name) => Field::new(name, DataType::Utf8, true),
            };
            let builder = ValueBuilder::for_type(field.data_type());
            others.push((idx, field, builder));
        }
        Self {
            start_idx: plan.index_of(CanonicalField::StartTime),
            end_idx: plan.index_of(CanonicalField::EndTime),
            duration_idx: plan.index_of(CanonicalField::TripDuration),
            start: TimestampMicrosecondBuilder::new(),
            duration: Float64Builder::new(),
            others,
        }
    }

    /// Append one record. Returns false when the row has no usable start_time.
    fn push(&mut self, record: &csv::StringRecord) -> bool {
        let Some(start) = self
            .start_idx
            .and_then(|i| record.get(i))
            .and_then(parse_timestamp)
        else {
            return false;
        };

        let duration = self
            .duration_idx
            .and_then(|i| record.get(i))
            .and_then(parse_duration_secs)
            .or_else(|| {
                let end = self.end_idx.and_then(|i| record.get(i)).and_then(parse_timestamp)?;
                let secs = (end - start).num_milliseconds() as f64 / 1000.0;
                (secs >= 0.0).then_some(secs)
            });

        self.start.append_value(timestamp_micros(&start));
        self.duration.append_option(duration);
        for (idx, _, builder) in &mut self.others {
            builder.append(record.get(*idx));
        }
        true
    }

    fn finish(mut self) -> std::result::Result<RecordBatch, arrow::error::ArrowError> {
        let mut fields = vec![
            CanonicalField::StartTime.field(),
            CanonicalField::TripDuration.field(),
        ];
        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(self.start.finish()),
            Arc::new(self.duration.finish()),
        ];
        for (_, field, builder) in &mut self.others {
            fields.push(field.clone());
            columns.push(builder.finish());
        }
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use arrow::array::{Array, Float64Array, Int32Array, StringArray};
    use std::path::PathBuf;

    fn member(archive: &str, name: &str, body: &str) -> MemberTable {
        MemberTable {
            archive: PathBuf::from(archive),
            name: name.to_string(),
            delimiter: b',',
            bytes: body.as_bytes().to_vec(),
        }
    }

    const Q4_2018: &str = "\
trip_id,start_time,end_time,bikeid,tripduration,from_station_id,from_station_name,to_station_id,to_station_name,usertype,gender,birthyear
21742443,2018-12-31 23:59:48,2019-01-01 00:01:11,2167,83.0,117,Wilton Ave & Belmont Ave,125,Rush St & Hubbard St,Subscriber,Male,1989
21742444,2019-01-01 00:04:37,2019-01-01 00:11:07,4386,390.0,199,Wabash Ave & Grand Ave,84,Milwaukee Ave & Grand Ave,Subscriber,,
";

    const Q2_2019: &str = "\
\"01 - Rental Details Rental ID\",\"01 - Rental Details Local Start Time\",\"01 - Rental Details Local End Time\",\"01 - Rental Details Bike ID\",\"01 - Rental Details Duration In Seconds Uncapped\",\"03 - Rental Start Station ID\",\"03 - Rental Start Station Name\",\"02 - Rental End Station ID\",\"02 - Rental End Station Name\",\"User Type\",\"Member Gender\",\"05 - Member Details Member Birthday Year\"
22178529,2019-04-01 00:02:22,2019-04-01 00:09:48,6251,\"1,446.0\",81,Daley Center Plaza,56,Desplaines St & Kinzie St,Subscriber,Female,1975
";

    const Q1_2020: &str = "\
ride_id,rideable_type,started_at,ended_at,start_station_name,start_station_id,end_station_name,end_station_id,start_lat,start_lng,end_lat,end_lng,member_casual
EACB19130B0CDA4A,docked_bike,2020-01-21 20:06:59,2020-01-21 20:14:30,Western Ave & Leland Ave,239,Clark St & Leland Ave,326,41.9665,-87.6884,41.9671,-87.6674,member
";

    #[test]
    fn drifted_layouts_union_by_name() -> Result<()> {
        let members = vec![
            member("Divvy_Trips_2020_Q1.zip", "Divvy_Trips_2020_Q1.csv", Q1_2020),
            member("Divvy_Trips_2018_Q4.zip", "Divvy_Trips_2018_Q4.csv", Q4_2018),
            member("Divvy_Trips_2019_Q2.zip", "Divvy_Trips_2019_Q2", Q2_2019),
        ];
        let rec = reconcile(&members, &TextDecoder::default())?;
        let ds = &rec.dataset;
        assert_eq!(ds.num_rows(), 4);
        assert!(rec.excluded.is_empty());

        let batch = ds.batch();
        let names = batch
            .column_by_name("from_station_name")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        // fold order is archive path order: 2018_Q4, 2019_Q2, 2020_Q1
        assert_eq!(names.value(0), "Wilton Ave & Belmont Ave");
        assert_eq!(names.value(2), "Daley Center Plaza");
        assert_eq!(names.value(3), "Western Ave & Leland Ave");

        let durations = batch
            .column_by_name("trip_duration")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(durations.value(2), 1446.0);
        // 2020 layout has no duration column; derived from ended_at - started_at
        assert_eq!(durations.value(3), 451.0);

        let years = batch
            .column_by_name("birth_year")
            .unwrap()
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(years.value(0), 1989);
        assert!(years.is_null(1));
        assert!(years.is_null(3));

        // passthrough columns only present in 2020 are null-filled elsewhere
        let lat = batch
            .column_by_name("start_lat")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert!(lat.is_null(0));
        assert_eq!(lat.value(3), "41.9665");
        Ok(())
    }

    #[test]
    fn row_count_is_sum_of_valid_rows() -> Result<()> {
        let bad_row = "trip_id,start_time,tripduration\n1,2019-01-01 00:00:00,10\n2,not a time,20\n3,,30\n";
        let members = vec![
            member("a.zip", "a.csv", Q4_2018),
            member("b.zip", "b.csv", bad_row),
        ];
        let rec = reconcile(&members, &TextDecoder::default())?;
        let accepted: usize = rec.tables.iter().map(|t| t.rows_accepted).sum();
        assert_eq!(rec.dataset.num_rows(), accepted);
        assert_eq!(accepted, 3);

        let b = rec.tables.iter().find(|t| t.table == "b.zip!b.csv").unwrap();
        assert_eq!(b.rows_read, 3);
        assert_eq!(b.rows_rejected, 2);
        assert_eq!(b.rows_missing_start, 2);
        assert_eq!(b.rows_unreadable, 0);
        Ok(())
    }

    #[test]
    fn reconciliation_is_order_independent() -> Result<()> {
        let a = member("a.zip", "a.csv", Q4_2018);
        let b = member("b.zip", "b.csv", Q1_2020);
        let c = member("c.zip", "c.csv", Q2_2019);

        let forward = reconcile(&[a.clone(), b.clone(), c.clone()], &TextDecoder::default())?;
        let reversed = reconcile(&[c, b, a], &TextDecoder::default())?;
        assert_eq!(forward.dataset.batch().schema(), reversed.dataset.batch().schema());
        assert_eq!(forward.dataset.batch(), reversed.dataset.batch());
        Ok(())
    }

    #[test]
    fn reordered_and_superset_columns_do_not_misalign() -> Result<()> {
        let early = "start_time,from_station_name,tripduration\n2019-01-01 08:00:00,Clark St,100\n";
        let late = "extra,tripduration,gender,start_time,from_station_name\nx,200,Female,2019-01-02 08:00:00,Elm St\n";
        let rec = reconcile(
            &[member("1.zip", "1.csv", early), member("2.zip", "2.csv", late)],
            &TextDecoder::default(),
        )?;
        let batch = rec.dataset.batch();
        let names = batch
            .column_by_name("from_station_name")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let durations = batch
            .column_by_name("trip_duration")
            .unwrap()
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!((names.value(0), durations.value(0)), ("Clark St", 100.0));
        assert_eq!((names.value(1), durations.value(1)), ("Elm St", 200.0));
        Ok(())
    }

    #[test]
    fn unparseable_tables_are_excluded_not_fatal() -> Result<()> {
        let members = vec![
            member("good.zip", "good.csv", Q4_2018),
            member("dup.zip", "dup.csv", "start_time,start_time\n2019-01-01 00:00:00,x\n"),
            member("empty.zip", "empty.csv", ""),
            MemberTable {
                bytes: b"start_time,from_station_name\n2019-01-01 00:00:00,Caf\xe9\n".to_vec(),
                ..member("latin.zip", "latin.csv", "")
            },
        ];
        let rec = reconcile(&members, &TextDecoder::strict("utf-8")?)?;
        assert_eq!(rec.dataset.num_rows(), 2);
        let excluded: Vec<_> = rec.excluded.iter().map(|e| e.table.as_str()).collect();
        assert_eq!(excluded, vec!["dup.zip!dup.csv", "empty.zip!empty.csv", "latin.zip!latin.csv"]);
        Ok(())
    }

    #[test]
    fn tables_without_trip_fields_keep_their_columns() -> Result<()> {
        let members = vec![
            member("a.zip", "a.csv", Q4_2018),
            member("s.zip", "stations.csv", "id,name,lat\n1,Clark St,41.9\n"),
        ];
        let rec = reconcile(&members, &TextDecoder::default())?;
        assert_eq!(rec.dataset.num_rows(), 2);
        let schema = rec.dataset.batch().schema();
        assert!(schema.field_with_name("lat").is_ok());
        let stations = rec.tables.iter().find(|t| t.table == "s.zip!stations.csv").unwrap();
        assert_eq!(stations.rows_rejected, 1);
        assert!(stations.mapped_columns.is_empty());
        Ok(())
    }

    #[test]
    fn plan_keeps_first_mapping_and_flags_duplicates() {
        let plan = ColumnPlan::from_headers(&["starttime", "Start Time", "", "note"]).unwrap();
        assert_eq!(plan.roles[0].1, ColumnRole::Canonical(CanonicalField::StartTime));
        assert_eq!(plan.roles[1].1, ColumnRole::Duplicate(CanonicalField::StartTime));
        assert_eq!(plan.roles[2].1, ColumnRole::Passthrough("column_3".into()));
        assert_eq!(plan.index_of(CanonicalField::StartTime), Some(0));
        assert!(ColumnPlan::from_headers::<&str>(&[]).is_err());
    }

    #[test]
    fn blank_header_cell_never_collides_with_a_named_one() {
        let plan = ColumnPlan::from_headers(&["start_time", "", "column_2"]).unwrap();
        let names: Vec<&str> = plan.roles.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["start_time", "column_2_", "column_2"]);
        assert_eq!(plan.roles[2].1, ColumnRole::Passthrough("column_2".into()));
        assert!(ColumnPlan::from_headers(&["", " "]).is_err());
    }
}
