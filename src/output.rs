use serde::Serialize;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineOutput;
use crate::types::CleanMealRow;

pub const CANTEENS_FILE: &str = "canteens_cleaned.csv";
pub const DAYS_FILE: &str = "days_cleaned.csv";
pub const MEALS_FILE: &str = "meals_cleaned_with_notes.csv";
pub const INDICATORS_FILE: &str = "indicators.csv";
pub const NOTE_FREQUENCIES_FILE: &str = "notes_frequencies.csv";
pub const CATEGORY_FREQUENCIES_FILE: &str = "category_frequencies.csv";
pub const REPORT_FILE: &str = "run_report.json";

pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let name = path.display().to_string();
    let mut wtr = csv::Writer::from_path(path).map_err(|e| PipelineError::csv(name.as_str(), e))?;
    for r in rows {
        wtr.serialize(r).map_err(|e| PipelineError::csv(name.as_str(), e))?;
    }
    wtr.flush().map_err(|e| PipelineError::io(name.as_str(), e))?;
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let s = serde_json::to_string_pretty(value)?;
    std::fs::write(path, s).map_err(|e| PipelineError::io(path.display().to_string(), e))?;
    Ok(())
}

/// Write every output table and the run report into `dir`, creating it if needed.
///
/// Returns the written paths in write order.
pub fn write_outputs(dir: &Path, out: &PipelineOutput) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir.display().to_string(), e))?;
    let path = |file: &str| dir.join(file);
    let mut written = Vec::new();

    write_csv(&path(CANTEENS_FILE), &out.canteens)?;
    written.push(path(CANTEENS_FILE));
    write_csv(&path(DAYS_FILE), &out.days)?;
    written.push(path(DAYS_FILE));
    let meal_rows: Vec<CleanMealRow> = out.meals.iter().map(CleanMealRow::from).collect();
    write_csv(&path(MEALS_FILE), &meal_rows)?;
    written.push(path(MEALS_FILE));
    write_csv(&path(INDICATORS_FILE), &out.indicators)?;
    written.push(path(INDICATORS_FILE));
    write_csv(&path(NOTE_FREQUENCIES_FILE), &out.note_frequencies)?;
    written.push(path(NOTE_FREQUENCIES_FILE));
    write_csv(&path(CATEGORY_FREQUENCIES_FILE), &out.category_frequencies)?;
    written.push(path(CATEGORY_FREQUENCIES_FILE));
    write_json(&path(REPORT_FILE), &out.report)?;
    written.push(path(REPORT_FILE));

    info!(dir = %dir.display(), files = written.len(), "outputs written");
    Ok(written)
}

pub fn preview_table_rows<T>(rows: &[T], max_rows: usize)
where
    T: Tabled + Clone,
{
    let slice: Vec<T> = rows.iter().cloned().take(max_rows).collect();
    if slice.is_empty() {
        println!("(no rows)\n");
        return;
    }
    let table_str = Table::new(slice).with(Style::markdown()).to_string();
    println!("{}\n", table_str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NoteFrequency;

    #[test]
    fn csv_header_follows_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("freq.csv");
        let rows = vec![NoteFrequency {
            note_id: "4".into(),
            notes_name: None,
            count: 3,
            percent: 100.0,
            cum_sum: 3,
            cum_percent: 100.0,
        }];
        write_csv(&p, &rows).unwrap();
        let text = std::fs::read_to_string(&p).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("note_id,notes_name,count,percent,cum_sum,cum_percent"));
        assert_eq!(lines.next(), Some("4,,3,100.0,3,100.0"));
    }
}
