//! Note labels per meal: usage ranking and the flattened note lists.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::info;

use crate::config::NotesConfig;
use crate::dedup::{association_key, keep_first};
use crate::types::{Id, Meal, MealWithNotes, Note, NoteAssociation, NoteFrequency, NoteList};
use crate::util::percent;

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotesReport {
    pub duplicate_associations: usize,
    /// Associations of retained meals pointing at a known note.
    pub used_associations: usize,
    pub distinct_notes: usize,
    pub common_notes: usize,
    pub meals_without_notes: usize,
}

/// Rank notes by how often retained meals use them.
///
/// Only associations whose meal is retained and whose note exists count.
/// Ties keep the order in which notes first appear.
pub fn note_frequencies(
    associations: &[NoteAssociation],
    meal_ids: &HashSet<&str>,
    notes: &HashMap<&str, &Note>,
) -> Vec<NoteFrequency> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    let mut total = 0;
    for (pos, a) in associations.iter().enumerate() {
        if !meal_ids.contains(a.meal_id.as_str()) || !notes.contains_key(a.note_id.as_str()) {
            continue;
        }
        counts.entry(a.note_id.as_str()).or_insert((0, pos)).0 += 1;
        total += 1;
    }
    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

    let mut cum_sum = 0;
    ranked
        .into_iter()
        .map(|(id, (count, _))| {
            cum_sum += count;
            NoteFrequency {
                note_id: id.to_string(),
                notes_name: notes.get(id).map(|n| n.name.clone()),
                count,
                percent: percent(count, total),
                cum_sum,
                cum_percent: percent(cum_sum, total),
            }
        })
        .collect()
}

/// Notes inside the cumulative coverage threshold.
pub fn common_notes(frequencies: &[NoteFrequency], coverage_percent: f64) -> HashSet<Id> {
    frequencies
        .iter()
        .filter(|f| f.cum_percent <= coverage_percent)
        .map(|f| f.note_id.clone())
        .collect()
}

/// Join labels in order; missing labels become the placeholder and are not counted.
fn build_list<'a>(labels: impl Iterator<Item = Option<&'a str>>, placeholder: &str) -> NoteList {
    let mut parts = Vec::new();
    let mut count = 0;
    for label in labels {
        match label {
            Some(l) => {
                count += 1;
                parts.push(l);
            }
            None => parts.push(placeholder),
        }
    }
    if parts.is_empty() {
        parts.push(placeholder);
    }
    NoteList { list: parts.join(";"), count }
}

/// Output of the note stage.
#[derive(Debug)]
pub struct NotedMeals {
    pub meals: Vec<MealWithNotes>,
    pub frequencies: Vec<NoteFrequency>,
    pub report: NotesReport,
}

/// Deduplicate associations, rank notes and attach both note lists to every meal.
pub fn attach_notes(
    meals: Vec<Meal>,
    associations: Vec<NoteAssociation>,
    notes: &[Note],
    cfg: &NotesConfig,
) -> NotedMeals {
    let mut report = NotesReport::default();
    let deduped = keep_first(associations, association_key);
    report.duplicate_associations = deduped.dropped;
    let associations = deduped.rows;

    let notes_by_id: HashMap<&str, &Note> = notes.iter().map(|n| (n.note_id.as_str(), n)).collect();
    let meal_ids: HashSet<&str> = meals.iter().map(|m| m.meal_id.as_str()).collect();

    let frequencies = note_frequencies(&associations, &meal_ids, &notes_by_id);
    report.used_associations = frequencies.iter().map(|f| f.count).sum();
    report.distinct_notes = frequencies.len();
    let common = common_notes(&frequencies, cfg.coverage_percent);
    report.common_notes = common.len();

    let mut by_meal: HashMap<&str, Vec<&NoteAssociation>> = HashMap::new();
    for a in &associations {
        if meal_ids.contains(a.meal_id.as_str()) {
            by_meal.entry(a.meal_id.as_str()).or_default().push(a);
        }
    }

    let label = |a: &NoteAssociation| notes_by_id.get(a.note_id.as_str()).map(|n| n.name.as_str());
    let mut out = Vec::with_capacity(meals.len());
    for meal in &meals {
        let assoc = by_meal.get(meal.meal_id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        if assoc.is_empty() {
            report.meals_without_notes += 1;
        }
        let full = build_list(assoc.iter().copied().map(|a| label(a)), &cfg.placeholder);
        let restricted = build_list(
            assoc.iter().copied().filter(|a| common.contains(&a.note_id)).map(|a| label(a)),
            &cfg.placeholder,
        );
        out.push((full, restricted));
    }

    let meals = meals
        .into_iter()
        .zip(out)
        .map(|(meal, (notes, notes_90))| MealWithNotes { meal, notes, notes_90 })
        .collect();

    info!(
        associations = report.used_associations,
        distinct_notes = report.distinct_notes,
        common_notes = report.common_notes,
        without_notes = report.meals_without_notes,
        "notes attached"
    );
    NotedMeals { meals, frequencies, report }
}
