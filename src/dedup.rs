//! Keep-first entity resolution.
//!
//! Every record carries the ordinal of the source row it was loaded from.
//! "First" always means smallest ordinal, so the outcome does not depend on
//! how a table was filtered, joined or reordered before deduplication.

use std::collections::HashMap;
use std::hash::Hash;

use crate::types::{Canteen, Day, DayRecord, Meal, MealRecord, Note, NoteAssociation};

/// Position of a record in its source table.
pub trait SourceOrder {
    fn source_row(&self) -> usize;
}

impl SourceOrder for Canteen {
    fn source_row(&self) -> usize {
        self.row
    }
}

impl SourceOrder for Day {
    fn source_row(&self) -> usize {
        self.row
    }
}

impl SourceOrder for Meal {
    fn source_row(&self) -> usize {
        self.row
    }
}

impl SourceOrder for NoteAssociation {
    fn source_row(&self) -> usize {
        self.row
    }
}

impl SourceOrder for DayRecord {
    fn source_row(&self) -> usize {
        self.row
    }
}

impl SourceOrder for MealRecord {
    fn source_row(&self) -> usize {
        self.row
    }
}

impl SourceOrder for Note {
    fn source_row(&self) -> usize {
        self.row
    }
}

/// Result of a dedup pass: survivors in input order plus the number dropped.
#[derive(Debug)]
pub struct Deduped<T> {
    pub rows: Vec<T>,
    pub dropped: usize,
}

/// Keep, per identity key, only the row with the smallest source ordinal.
///
/// Survivors keep their relative input order. No completeness or recency
/// preference is applied.
pub fn keep_first<T, K, F>(rows: Vec<T>, key: F) -> Deduped<T>
where
    T: SourceOrder,
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut first: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    for r in &rows {
        let ordinal = r.source_row();
        first
            .entry(key(r))
            .and_modify(|best| *best = (*best).min(ordinal))
            .or_insert(ordinal);
    }
    let before = rows.len();
    let kept: Vec<T> = rows
        .into_iter()
        .filter(|r| first.get(&key(r)) == Some(&r.source_row()))
        .collect();
    Deduped { dropped: before - kept.len(), rows: kept }
}

/// Indices of every row whose key occurs more than once (all group members).
pub fn duplicated<T, K, F>(rows: &[T], key: F) -> Vec<usize>
where
    K: Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut counts: HashMap<K, usize> = HashMap::new();
    for r in rows {
        *counts.entry(key(r)).or_default() += 1;
    }
    rows.iter()
        .enumerate()
        .filter(|(_, r)| counts.get(&key(r)).copied().unwrap_or(0) > 1)
        .map(|(i, _)| i)
        .collect()
}

pub fn canteen_key(c: &Canteen) -> String {
    c.canteen_id.clone()
}

pub fn day_key(d: &Day) -> (String, chrono::NaiveDate) {
    (d.canteen_id.clone(), d.date_correct)
}

pub fn meal_key(m: &Meal) -> (String, String, String, chrono::NaiveDate) {
    (m.name.clone(), m.category.clone(), m.canteen_id.clone(), m.date_correct)
}

pub fn association_key(a: &NoteAssociation) -> (String, String) {
    (a.meal_id.clone(), a.note_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assoc(row: usize, meal: &str, note: &str) -> NoteAssociation {
        NoteAssociation {
            row,
            mapper_id: format!("m{row}"),
            meal_id: meal.into(),
            note_id: note.into(),
        }
    }

    #[test]
    fn keeps_first_occurrence_per_key() {
        let rows = vec![assoc(0, "1", "a"), assoc(1, "1", "b"), assoc(2, "1", "a")];
        let out = keep_first(rows, association_key);
        assert_eq!(out.dropped, 1);
        let ids: Vec<_> = out.rows.iter().map(|a| a.mapper_id.as_str()).collect();
        assert_eq!(ids, ["m0", "m1"]);
    }

    #[test]
    fn first_means_smallest_ordinal_not_position() {
        // Reordered input: the row loaded first still wins.
        let rows = vec![assoc(5, "1", "a"), assoc(2, "1", "a")];
        let out = keep_first(rows, association_key);
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0].row, 2);
    }

    #[test]
    fn duplicated_reports_all_members() {
        let rows = vec![assoc(0, "1", "a"), assoc(1, "2", "b"), assoc(2, "1", "a")];
        assert_eq!(duplicated(&rows, association_key), vec![0, 2]);
    }
}
