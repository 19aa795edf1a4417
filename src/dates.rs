//! Repair of the corrupted year in the raw day dates.
//!
//! Some raw dates carry a wrong leading year digit (`4012-…` for `2012-…`).
//! Direct date parsing rejects them, so the components are matched first,
//! the sentinel year is replaced, and the canonical date rebuilt. Several of
//! the corrupted rows already have a correct twin for the same canteen and
//! date; in that case the corrupted row is dropped. Collisions are only
//! visible on the repaired date, so repair always runs before dedup, and the
//! keep-first pass only sees open days inside the window.

use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{AnalysisWindow, DaysConfig};
use crate::dedup::{day_key, duplicated, keep_first};
use crate::error::{PipelineError, Result};
use crate::types::{Day, DayRecord, Id};

static DATE_PARTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})").expect("date pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DateParts {
    year: i32,
    month: u32,
    day: u32,
}

fn split_date(raw: &str) -> Option<DateParts> {
    let caps = DATE_PARTS.captures(raw.trim())?;
    Some(DateParts {
        year: caps[1].parse().ok()?,
        month: caps[2].parse().ok()?,
        day: caps[3].parse().ok()?,
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DateRepairReport {
    /// Rows whose sentinel year was replaced.
    pub repaired: usize,
    /// Corrupted rows dropped because a correct twin exists.
    pub collisions_dropped: usize,
    pub outside_window: usize,
    pub closed: usize,
    pub unknown_canteen: usize,
    /// Selected rows dropped by the keep-first pass on (canteen, date).
    pub duplicates_dropped: usize,
    pub kept: usize,
}

/// Repair the raw dates and resolve the collisions the repair exposes.
///
/// A date that cannot be parsed, or a sentinel row whose creation timestamp
/// contradicts the corrected year, is a parse fault.
pub fn repair_days(records: Vec<DayRecord>, cfg: &DaysConfig) -> Result<(Vec<Day>, DateRepairReport)> {
    let mut report = DateRepairReport::default();
    let mut days = Vec::with_capacity(records.len());
    let mut corrupted = Vec::with_capacity(records.len());

    for r in records {
        let fault = |value: &str| PipelineError::parse_fault("days", r.row, "date", value);
        let mut parts = split_date(&r.date).ok_or_else(|| fault(&r.date))?;
        let is_corrupted = parts.year == cfg.sentinel_year;
        if is_corrupted {
            match r.created_at {
                Some(created) if created.year() != cfg.corrected_year => {
                    warn!(day_id = %r.day_id, created = %created, "sentinel year contradicts creation timestamp");
                    return Err(fault(&r.date));
                }
                Some(_) => {}
                None => warn!(day_id = %r.day_id, "no creation timestamp to validate year repair"),
            }
            parts.year = cfg.corrected_year;
            report.repaired += 1;
        }
        let date_correct =
            NaiveDate::from_ymd_opt(parts.year, parts.month, parts.day).ok_or_else(|| fault(&r.date))?;
        corrupted.push(is_corrupted);
        days.push(Day {
            row: r.row,
            day_id: r.day_id,
            canteen_id: r.canteen_id,
            date: r.date,
            date_correct,
            closed: r.closed,
            created_at: r.created_at,
            updated_at: r.updated_at,
        });
    }

    // Collision groups on the repaired date: drop corrupted members when the
    // group still has a correct one.
    let colliding = duplicated(&days, day_key);
    let mut has_correct: HashMap<(Id, NaiveDate), bool> = HashMap::new();
    for &i in &colliding {
        let entry = has_correct.entry(day_key(&days[i])).or_insert(false);
        *entry |= !corrupted[i];
    }
    let drop: HashSet<usize> = colliding
        .into_iter()
        .filter(|&i| corrupted[i] && has_correct.get(&day_key(&days[i])).copied().unwrap_or(false))
        .collect();
    report.collisions_dropped = drop.len();
    let days: Vec<Day> = days
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !drop.contains(i))
        .map(|(_, d)| d)
        .collect();

    report.kept = days.len();
    info!(
        repaired = report.repaired,
        collisions_dropped = report.collisions_dropped,
        "day dates repaired"
    );
    Ok((days, report))
}

/// Keep open days inside the window that belong to a retained canteen, one
/// per (canteen, date).
///
/// Filtering comes first so a closed or out-of-window row never shadows an
/// open twin.
pub fn select_days(
    days: Vec<Day>,
    window: &AnalysisWindow,
    canteen_ids: &HashSet<Id>,
    report: &mut DateRepairReport,
) -> Vec<Day> {
    let mut kept = Vec::with_capacity(days.len());
    for d in days {
        if !window.contains(d.date_correct) {
            report.outside_window += 1;
        } else if d.closed {
            report.closed += 1;
        } else if !canteen_ids.contains(&d.canteen_id) {
            report.unknown_canteen += 1;
        } else {
            kept.push(d);
        }
    }
    let deduped = keep_first(kept, day_key);
    report.duplicates_dropped = deduped.dropped;
    report.kept = deduped.rows.len();
    info!(
        kept = report.kept,
        outside_window = report.outside_window,
        closed = report.closed,
        unknown_canteen = report.unknown_canteen,
        duplicates_dropped = report.duplicates_dropped,
        "days selected"
    );
    deduped.rows
}
