use crate::dedup::{canteen_key, keep_first, SourceOrder};
use crate::error::{PipelineError, Result};
use crate::types::{
    Canteen, CategoryMapping, CuratedCanteen, DayRecord, MealRecord, Note, NoteAssociation,
    Prices, RawCanteen, RawDay, RawMeal, RawNote, RawNoteAssociation,
};
use crate::util::{non_empty, parse_bool, parse_f64_safe, parse_timestamp};
use csv::{ReaderBuilder, StringRecord};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Column layout of one raw source: how its headers are renamed so that
/// column names stay unambiguous across all joins.
#[derive(Debug, Clone, Copy)]
pub struct SourceSchema {
    pub name: &'static str,
    /// Prepended to every kept header.
    pub prefix: &'static str,
    /// Applied after prefixing.
    pub renames: &'static [(&'static str, &'static str)],
    /// Raw headers that carry nothing usable.
    pub dropped: &'static [&'static str],
    /// Normalized names that must be present.
    pub required: &'static [&'static str],
}

pub const CANTEENS: SourceSchema = SourceSchema {
    name: "canteens",
    prefix: "canteen_",
    renames: &[],
    dropped: &["phone", "email", "availibility", "openingTimes"],
    required: &["canteen_id", "canteen_name", "canteen_latitude", "canteen_longitude"],
};

pub const DAYS: SourceSchema = SourceSchema {
    name: "days",
    prefix: "days_",
    renames: &[("days_canteen_id", "canteen_id"), ("days_date", "date")],
    dropped: &[],
    required: &["days_id", "canteen_id", "date", "days_closed"],
};

pub const MEALS: SourceSchema = SourceSchema {
    name: "meals",
    prefix: "meal_",
    renames: &[("meal_day_id", "day_id")],
    dropped: &["description", "pos"],
    required: &["meal_id", "day_id", "meal_name", "meal_category"],
};

pub const NOTES: SourceSchema = SourceSchema {
    name: "notes",
    prefix: "notes_",
    renames: &[],
    dropped: &[],
    required: &["notes_id", "notes_name"],
};

pub const MEAL_NOTES: SourceSchema = SourceSchema {
    name: "meal_notes",
    prefix: "",
    renames: &[("id", "mapper_id")],
    dropped: &[],
    required: &["mapper_id", "meal_id", "note_id"],
};

impl SourceSchema {
    /// Rename raw headers and check the result is unique and complete.
    /// Dropped headers are renamed out of the way so they deserialize into nothing.
    pub fn normalize_headers(&self, raw: &StringRecord) -> Result<StringRecord> {
        let mut out = StringRecord::new();
        let mut seen = HashSet::new();
        for h in raw.iter() {
            let h = h.trim();
            let name = if self.dropped.iter().any(|d| *d == h) {
                format!("__dropped_{h}")
            } else {
                let prefixed = format!("{}{}", self.prefix, h);
                self.renames
                    .iter()
                    .find(|(from, _)| *from == prefixed)
                    .map(|(_, to)| to.to_string())
                    .unwrap_or(prefixed)
            };
            if !seen.insert(name.clone()) {
                return Err(PipelineError::Config(format!(
                    "{}: column `{}` is ambiguous after renaming",
                    self.name, name
                )));
            }
            out.push_field(&name);
        }
        for col in self.required {
            if !seen.contains(*col) {
                return Err(PipelineError::MissingColumn {
                    source_name: self.name.to_string(),
                    column: col.to_string(),
                });
            }
        }
        Ok(out)
    }
}

/// Per-source load diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub total_rows: usize,
    pub malformed_rows: usize,
    pub missing_ids: usize,
    pub duplicate_ids: usize,
    pub loaded_rows: usize,
}

impl SourceReport {
    fn new(source: &str) -> Self {
        SourceReport { source: source.to_string(), ..Default::default() }
    }
}

/// Read a source with normalized headers. Each row keeps its 0-based data
/// row ordinal. Rows that fail to deserialize are counted and skipped.
pub fn read_source<R: DeserializeOwned>(
    path: &Path,
    schema: &SourceSchema,
    report: &mut SourceReport,
) -> Result<Vec<(usize, R)>> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::csv(schema.name, e))?;
    let raw_headers = rdr.headers().map_err(|e| PipelineError::csv(schema.name, e))?.clone();
    let headers = schema.normalize_headers(&raw_headers)?;
    debug!(source = schema.name, headers = ?headers, "normalized headers");

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        report.total_rows += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(source = schema.name, row = idx, error = %e, "unreadable row skipped");
                report.malformed_rows += 1;
                continue;
            }
        };
        match record.deserialize::<R>(Some(&headers)) {
            Ok(r) => rows.push((idx, r)),
            Err(e) => {
                warn!(source = schema.name, row = idx, error = %e, "malformed row skipped");
                report.malformed_rows += 1;
            }
        }
    }
    Ok(rows)
}

fn timestamp(source: &str, row: usize, column: &str, v: Option<&str>) -> Result<Option<chrono::NaiveDateTime>> {
    parse_timestamp(v).map_err(|raw| PipelineError::parse_fault(source, row, column, raw))
}

fn dedup_ids<T, F>(rows: Vec<T>, key: F, report: &mut SourceReport) -> Vec<T>
where
    T: SourceOrder,
    F: Fn(&T) -> String,
{
    let out = keep_first(rows, key);
    if out.dropped > 0 {
        warn!(source = %report.source, dropped = out.dropped, "repeated primary keys, kept first");
    }
    report.duplicate_ids = out.dropped;
    report.loaded_rows = out.rows.len();
    info!(source = %report.source, total = report.total_rows, loaded = report.loaded_rows, "source loaded");
    out.rows
}

pub fn load_canteens(path: &Path) -> Result<(Vec<Canteen>, SourceReport)> {
    let schema = &CANTEENS;
    let mut report = SourceReport::new(schema.name);
    let mut out = Vec::new();
    for (row, r) in read_source::<RawCanteen>(path, schema, &mut report)? {
        let Some(id) = non_empty(r.canteen_id.as_deref()) else {
            report.missing_ids += 1;
            continue;
        };
        out.push(Canteen {
            row,
            canteen_id: id.to_string(),
            name: non_empty(r.canteen_name.as_deref()).unwrap_or_default().to_string(),
            city: non_empty(r.canteen_city.as_deref()).map(str::to_string),
            address: non_empty(r.canteen_address.as_deref()).map(str::to_string),
            latitude: parse_f64_safe(r.canteen_latitude.as_deref()),
            longitude: parse_f64_safe(r.canteen_longitude.as_deref()),
            created_at: timestamp(schema.name, row, "canteen_created_at", r.canteen_created_at.as_deref())?,
            updated_at: timestamp(schema.name, row, "canteen_updated_at", r.canteen_updated_at.as_deref())?,
            last_fetched_at: timestamp(
                schema.name,
                row,
                "canteen_last_fetched_at",
                r.canteen_last_fetched_at.as_deref(),
            )?,
            state: non_empty(r.canteen_state.as_deref()).map(str::to_string),
            replaced_by: non_empty(r.canteen_replaced_by.as_deref()).map(str::to_string),
            country: None,
            organization_type: None,
        });
    }
    let rows = dedup_ids(out, canteen_key, &mut report);
    Ok((rows, report))
}

/// Days keep their raw `date` text; it is repaired by `dates::repair_days`.
pub fn load_days(path: &Path) -> Result<(Vec<DayRecord>, SourceReport)> {
    let schema = &DAYS;
    let mut report = SourceReport::new(schema.name);
    let mut out = Vec::new();
    for (row, r) in read_source::<RawDay>(path, schema, &mut report)? {
        let (Some(id), Some(canteen_id)) = (
            non_empty(r.days_id.as_deref()),
            non_empty(r.canteen_id.as_deref()),
        ) else {
            report.missing_ids += 1;
            continue;
        };
        let closed = match non_empty(r.days_closed.as_deref()) {
            None => false,
            Some(raw) => parse_bool(Some(raw))
                .ok_or_else(|| PipelineError::parse_fault(schema.name, row, "days_closed", raw))?,
        };
        out.push(DayRecord {
            row,
            day_id: id.to_string(),
            canteen_id: canteen_id.to_string(),
            date: r.date.as_deref().unwrap_or_default().trim().to_string(),
            closed,
            created_at: timestamp(schema.name, row, "days_created_at", r.days_created_at.as_deref())?,
            updated_at: timestamp(schema.name, row, "days_updated_at", r.days_updated_at.as_deref())?,
        });
    }
    let rows = dedup_ids(out, |d| d.day_id.clone(), &mut report);
    Ok((rows, report))
}

pub fn load_meals(path: &Path) -> Result<(Vec<MealRecord>, SourceReport)> {
    let schema = &MEALS;
    let mut report = SourceReport::new(schema.name);
    let mut out = Vec::new();
    for (row, r) in read_source::<RawMeal>(path, schema, &mut report)? {
        let (Some(id), Some(day_id)) = (
            non_empty(r.meal_id.as_deref()),
            non_empty(r.day_id.as_deref()),
        ) else {
            report.missing_ids += 1;
            continue;
        };
        out.push(MealRecord {
            row,
            meal_id: id.to_string(),
            day_id: day_id.to_string(),
            name: r.meal_name.unwrap_or_default(),
            category: r.meal_category.unwrap_or_default(),
            prices: Prices {
                student: parse_f64_safe(r.meal_price_student.as_deref()),
                employee: parse_f64_safe(r.meal_price_employee.as_deref()),
                pupil: parse_f64_safe(r.meal_price_pupil.as_deref()),
                other: parse_f64_safe(r.meal_price_other.as_deref()),
            },
            created_at: timestamp(schema.name, row, "meal_created_at", r.meal_created_at.as_deref())?,
            updated_at: timestamp(schema.name, row, "meal_updated_at", r.meal_updated_at.as_deref())?,
        });
    }
    let rows = dedup_ids(out, |m| m.meal_id.clone(), &mut report);
    Ok((rows, report))
}

pub fn load_notes(path: &Path) -> Result<(Vec<Note>, SourceReport)> {
    let schema = &NOTES;
    let mut report = SourceReport::new(schema.name);
    let mut out = Vec::new();
    for (row, r) in read_source::<RawNote>(path, schema, &mut report)? {
        let Some(id) = non_empty(r.notes_id.as_deref()) else {
            report.missing_ids += 1;
            continue;
        };
        out.push(Note {
            row,
            note_id: id.to_string(),
            name: r.notes_name.unwrap_or_default(),
            created_at: timestamp(schema.name, row, "notes_created_at", r.notes_created_at.as_deref())?,
            updated_at: timestamp(schema.name, row, "notes_updated_at", r.notes_updated_at.as_deref())?,
        });
    }
    let rows = dedup_ids(out, |n| n.note_id.clone(), &mut report);
    Ok((rows, report))
}

/// Mapping rows are loaded as-is; the (meal, note) dedup belongs to `notes`.
pub fn load_associations(path: &Path) -> Result<(Vec<NoteAssociation>, SourceReport)> {
    let schema = &MEAL_NOTES;
    let mut report = SourceReport::new(schema.name);
    let mut out = Vec::new();
    for (row, r) in read_source::<RawNoteAssociation>(path, schema, &mut report)? {
        let (Some(id), Some(meal_id), Some(note_id)) = (
            non_empty(r.mapper_id.as_deref()),
            non_empty(r.meal_id.as_deref()),
            non_empty(r.note_id.as_deref()),
        ) else {
            report.missing_ids += 1;
            continue;
        };
        out.push(NoteAssociation {
            row,
            mapper_id: id.to_string(),
            meal_id: meal_id.to_string(),
            note_id: note_id.to_string(),
        });
    }
    let rows = dedup_ids(out, |a| a.mapper_id.clone(), &mut report);
    Ok((rows, report))
}

/// Plain CSV reference table, headers used as-is.
pub fn load_reference<R: DeserializeOwned>(path: &Path, name: &str) -> Result<Vec<R>> {
    let mut rdr = ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::csv(name, e))?;
    let mut rows = Vec::new();
    for result in rdr.deserialize::<R>() {
        rows.push(result.map_err(|e| PipelineError::csv(name, e))?);
    }
    info!(source = name, rows = rows.len(), "reference table loaded");
    Ok(rows)
}

pub fn load_curated_universities(path: &Path) -> Result<Vec<CuratedCanteen>> {
    load_reference(path, "curated_universities")
}

pub fn load_category_lookup(path: &Path) -> Result<Vec<CategoryMapping>> {
    load_reference(path, "category_lookup")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        p
    }

    #[test]
    fn headers_are_prefixed_renamed_and_dropped() {
        let raw = StringRecord::from(vec!["id", "canteen_id", "date", "closed", "created_at"]);
        let h = DAYS.normalize_headers(&raw).unwrap();
        let names: Vec<_> = h.iter().collect();
        assert_eq!(names, ["days_id", "canteen_id", "date", "days_closed", "days_created_at"]);

        let raw = StringRecord::from(vec!["id", "name", "phone", "latitude", "longitude"]);
        let h = CANTEENS.normalize_headers(&raw).unwrap();
        assert_eq!(h.get(2), Some("__dropped_phone"));
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let raw = StringRecord::from(vec!["id", "meal_id"]);
        let err = MEAL_NOTES.normalize_headers(&raw).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "note_id"));
    }

    #[test]
    fn loads_days_and_keeps_raw_date() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_tmp(
            &dir,
            "days.csv",
            "id,canteen_id,date,closed,created_at,updated_at\n\
             1,7,4012-10-04,f,2012-10-04 10:00:00.5,2012-10-04 10:00:00\n\
             2,7,2012-10-05,t,,\n",
        );
        let (days, report) = load_days(&p).unwrap();
        assert_eq!(report.loaded_rows, 2);
        assert_eq!(days[0].date, "4012-10-04");
        assert!(!days[0].closed);
        assert!(days[1].closed);
        assert!(days[1].created_at.is_none());
    }

    #[test]
    fn unparseable_timestamp_is_a_parse_fault() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_tmp(&dir, "notes.csv", "id,name,created_at,updated_at\n1,vegan,yesterday,\n");
        let err = load_notes(&p).unwrap_err();
        assert!(matches!(err, PipelineError::ParseFault { row: 0, .. }));
    }

    #[test]
    fn repeated_primary_key_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_tmp(
            &dir,
            "meals.csv",
            "id,day_id,name,category,description,pos,price_student,price_employee,price_pupil,price_other,created_at,updated_at\n\
             1,10,Suppe,Suppen,,1,1.5,,,,,\n\
             1,10,Suppe neu,Suppen,,1,1.9,,,,,\n\
             2,10,Salat,Salate,,2,abc,,,,,\n",
        );
        let (meals, report) = load_meals(&p).unwrap();
        assert_eq!(report.duplicate_ids, 1);
        assert_eq!(meals.len(), 2);
        assert_eq!(meals[0].name, "Suppe");
        assert_eq!(meals[1].prices.student, None);
    }
}
