//! Meal cleanup: join to days, entity resolution, removal of pseudo meals
//! (closure notices, placeholders, announcements), malformed categories,
//! price repair and super-category assignment.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::MealsConfig;
use crate::dedup::{keep_first, meal_key};
use crate::error::{PipelineError, Result};
use crate::rules::ci_regex;
use crate::types::{CategoryFrequency, CategoryMapping, Day, Id, Meal, MealRecord, SuperCategory};
use crate::util::percent;

/// Manual category → super category table. The first row for a category wins.
#[derive(Debug, Default)]
pub struct CategoryLookup {
    entries: HashMap<String, SuperCategory>,
}

impl CategoryLookup {
    pub fn new(rows: &[CategoryMapping]) -> Result<Self> {
        let mut entries = HashMap::with_capacity(rows.len());
        for r in rows {
            let sc = r
                .super_category
                .as_deref()
                .unwrap_or("")
                .parse::<SuperCategory>()
                .map_err(|e| PipelineError::Config(format!("category lookup `{}`: {e}", r.category)))?;
            entries.entry(r.category.clone()).or_insert(sc);
        }
        Ok(CategoryLookup { entries })
    }

    /// Missing categories resolve to `unmatched`.
    pub fn get(&self, category: &str) -> SuperCategory {
        self.entries.get(category).copied().unwrap_or(SuperCategory::Unmatched)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compiled meal filters.
#[derive(Debug)]
pub struct MealFilters {
    closed: Regex,
    closed_allow: Regex,
    placeholder: Regex,
    announcement: Regex,
    announcement_allow: Regex,
    long_category: Regex,
    max_category_len: usize,
    price_ceiling: f64,
    excluded_categories: HashSet<String>,
    excluded_super_categories: HashSet<SuperCategory>,
}

impl MealFilters {
    pub fn new(cfg: &MealsConfig) -> Result<Self> {
        Ok(MealFilters {
            closed: ci_regex(&cfg.closed_pattern)?,
            closed_allow: ci_regex(&cfg.closed_allow_pattern)?,
            // whole-name match
            placeholder: ci_regex(&format!("^(?:{})$", cfg.placeholder_pattern))?,
            announcement: ci_regex(&cfg.announcement_pattern)?,
            announcement_allow: ci_regex(&cfg.announcement_allow_pattern)?,
            long_category: ci_regex(&cfg.long_category_pattern)?,
            max_category_len: cfg.max_category_len,
            price_ceiling: cfg.price_ceiling,
            excluded_categories: cfg.excluded_categories.iter().cloned().collect(),
            excluded_super_categories: cfg.excluded_super_categories.iter().copied().collect(),
        })
    }

    pub fn is_closure_notice(&self, name: &str) -> bool {
        self.closed.is_match(name) && !self.closed_allow.is_match(name)
    }

    pub fn is_placeholder(&self, name: &str) -> bool {
        self.placeholder.is_match(name)
    }

    pub fn is_announcement(&self, name: &str) -> bool {
        self.announcement.is_match(name) && !self.announcement_allow.is_match(name)
    }

    pub fn is_malformed_category(&self, category: &str) -> bool {
        category.chars().count() > self.max_category_len && !self.long_category.is_match(category)
    }

    /// Null out prices that are not positive or exceed the ceiling.
    pub fn repair_price(&self, price: Option<f64>) -> Option<f64> {
        price.filter(|p| *p > 0.0 && *p <= self.price_ceiling)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MealReport {
    pub orphaned: usize,
    pub duplicates_dropped: usize,
    pub closure_notices: usize,
    pub placeholders: usize,
    pub announcements: usize,
    pub malformed_categories: usize,
    pub prices_nulled: usize,
    pub unmatched_categories: usize,
    pub excluded_super_categories: usize,
    pub excluded_categories: usize,
    pub kept: usize,
}

/// Inner join of meals onto retained days; meals without a day are orphans.
pub fn join_meals(records: Vec<MealRecord>, days: &[Day], report: &mut MealReport) -> Vec<Meal> {
    let by_id: HashMap<&str, &Day> = days.iter().map(|d| (d.day_id.as_str(), d)).collect();
    let mut meals = Vec::with_capacity(records.len());
    for r in records {
        let Some(day) = by_id.get(r.day_id.as_str()) else {
            report.orphaned += 1;
            continue;
        };
        meals.push(Meal {
            row: r.row,
            meal_id: r.meal_id,
            day_id: r.day_id,
            canteen_id: day.canteen_id.clone(),
            date_correct: day.date_correct,
            name: r.name,
            category: r.category,
            super_category: SuperCategory::Unmatched,
            prices: r.prices,
            created_at: r.created_at,
            updated_at: r.updated_at,
        });
    }
    meals
}

fn drop_where(meals: &mut Vec<Meal>, pred: impl Fn(&Meal) -> bool) -> usize {
    let before = meals.len();
    meals.retain(|m| !pred(m));
    before - meals.len()
}

/// Frequency table of raw categories, most frequent first.
pub fn category_frequencies(meals: &[Meal]) -> Vec<CategoryFrequency> {
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, m) in meals.iter().enumerate() {
        counts.entry(m.category.as_str()).or_insert((0, pos)).0 += 1;
    }
    let mut ranked: Vec<(&str, usize, usize)> = counts.into_iter().map(|(c, (n, first))| (c, n, first)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    let total = meals.len();
    let mut cum_sum = 0;
    ranked
        .into_iter()
        .map(|(category, count, _)| {
            cum_sum += count;
            CategoryFrequency {
                meal_category: category.to_string(),
                count,
                cum_sum,
                cum_percent: percent(cum_sum, total),
            }
        })
        .collect()
}

/// Cleaned meals plus the category distribution seen by the lookup.
#[derive(Debug)]
pub struct CleanedMeals {
    pub meals: Vec<Meal>,
    pub category_frequencies: Vec<CategoryFrequency>,
    pub report: MealReport,
}

fn excluded_list(set: &HashSet<SuperCategory>) -> String {
    let mut names: Vec<String> = set.iter().map(ToString::to_string).collect();
    names.sort();
    names.join(",")
}

/// Run the meal cleanup in its fixed order.
pub fn clean_meals(
    records: Vec<MealRecord>,
    days: &[Day],
    canteen_ids: &HashSet<Id>,
    filters: &MealFilters,
    lookup: &CategoryLookup,
) -> CleanedMeals {
    let mut report = MealReport::default();
    let total = records.len();

    let mut meals = join_meals(records, days, &mut report);
    report.orphaned += drop_where(&mut meals, |m| !canteen_ids.contains(&m.canteen_id));

    let deduped = keep_first(meals, meal_key);
    report.duplicates_dropped = deduped.dropped;
    let mut meals = deduped.rows;

    report.closure_notices = drop_where(&mut meals, |m| filters.is_closure_notice(&m.name));
    report.placeholders = drop_where(&mut meals, |m| filters.is_placeholder(&m.name));
    report.announcements = drop_where(&mut meals, |m| filters.is_announcement(&m.name));
    report.malformed_categories = drop_where(&mut meals, |m| filters.is_malformed_category(&m.category));
    debug!(
        closure_notices = report.closure_notices,
        placeholders = report.placeholders,
        announcements = report.announcements,
        malformed_categories = report.malformed_categories,
        "pseudo meals removed"
    );

    for m in meals.iter_mut() {
        let repaired = m.prices.map(|p| filters.repair_price(p));
        report.prices_nulled += m.prices.iter().filter(Option::is_some).count()
            - repaired.iter().filter(Option::is_some).count();
        m.prices = repaired;
    }

    let category_frequencies = category_frequencies(&meals);

    for m in meals.iter_mut() {
        m.super_category = lookup.get(&m.category);
        if m.super_category == SuperCategory::Unmatched {
            report.unmatched_categories += 1;
        }
    }
    report.excluded_super_categories =
        drop_where(&mut meals, |m| filters.excluded_super_categories.contains(&m.super_category));
    debug!(
        unmatched = report.unmatched_categories,
        excluded = report.excluded_super_categories,
        super_categories = %excluded_list(&filters.excluded_super_categories),
        "super categories assigned"
    );
    report.excluded_categories = drop_where(&mut meals, |m| filters.excluded_categories.contains(&m.category));

    report.kept = meals.len();
    info!(
        read = total,
        kept = report.kept,
        orphaned = report.orphaned,
        duplicates = report.duplicates_dropped,
        prices_nulled = report.prices_nulled,
        "meals cleaned"
    );
    CleanedMeals { meals, category_frequencies, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Prices;
    use chrono::NaiveDate;

    fn filters() -> MealFilters {
        MealFilters::new(&MealsConfig::default()).unwrap()
    }

    fn day(id: &str, canteen: &str, date: (i32, u32, u32)) -> Day {
        Day {
            row: 0,
            day_id: id.into(),
            canteen_id: canteen.into(),
            date: String::new(),
            date_correct: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            closed: false,
            created_at: None,
            updated_at: None,
        }
    }

    fn meal(row: usize, day: &str, name: &str, category: &str, student: Option<f64>) -> MealRecord {
        MealRecord {
            row,
            meal_id: format!("m{row}"),
            day_id: day.into(),
            name: name.into(),
            category: category.into(),
            prices: Prices { student, ..Prices::default() },
            created_at: None,
            updated_at: None,
        }
    }

    fn lookup() -> CategoryLookup {
        CategoryLookup::new(&[
            CategoryMapping { category: "Hauptgericht".into(), super_category: Some("main_dish".into()) },
            CategoryMapping { category: "Beilagen".into(), super_category: Some("side_dish".into()) },
            CategoryMapping { category: "Backwaren".into(), super_category: Some("baked_goods".into()) },
            CategoryMapping { category: "GreenCorner".into(), super_category: Some("main_dish".into()) },
            CategoryMapping { category: "Aktion".into(), super_category: None },
        ])
        .unwrap()
    }

    #[test]
    fn closure_and_announcement_patterns() {
        let f = filters();
        assert!(f.is_closure_notice("Mensa heute geschlossen"));
        assert!(f.is_closure_notice("Kein Angebot"));
        assert!(!f.is_closure_notice("Pizza Margherita, kein Käse"));
        assert!(!f.is_closure_notice("Schaschlikeintopf"));
        assert!(f.is_announcement("Aufgrund einer Störung bleibt die Ausgabe zu"));
        assert!(!f.is_announcement("Wir empfehlen: Salatteller"));
    }

    #[test]
    fn placeholder_must_match_whole_name() {
        let f = filters();
        assert!(f.is_placeholder("."));
        assert!(f.is_placeholder("--"));
        assert!(!f.is_placeholder("Currywurst mit Pommes--"));
        assert!(!f.is_placeholder(""));
    }

    #[test]
    fn long_categories_need_a_legit_term() {
        let f = filters();
        let garbage = "x".repeat(51);
        assert!(f.is_malformed_category(&garbage));
        assert!(!f.is_malformed_category(&format!("{garbage} Theke")));
        assert!(!f.is_malformed_category(&"x".repeat(50)));
    }

    #[test]
    fn price_repair_bounds() {
        let f = filters();
        assert_eq!(f.repair_price(Some(0.0)), None);
        assert_eq!(f.repair_price(Some(-1.0)), None);
        assert_eq!(f.repair_price(Some(20.0)), Some(20.0));
        assert_eq!(f.repair_price(Some(20.01)), None);
        assert_eq!(f.repair_price(None), None);
    }

    #[test]
    fn excluded_super_categories_render_like_their_serialized_names() {
        let set: HashSet<SuperCategory> = [SuperCategory::Unmatched, SuperCategory::BakedGoods].into_iter().collect();
        assert_eq!(excluded_list(&set), "baked_goods,unmatched");
    }

    #[test]
    fn super_category_lookup_defaults_to_unmatched() {
        let l = lookup();
        assert_eq!(l.get("Hauptgericht"), SuperCategory::MainDish);
        assert_eq!(l.get("Aktion"), SuperCategory::Unmatched);
        assert_eq!(l.get("Unbekannt"), SuperCategory::Unmatched);
        assert_eq!(l.len(), 5);
        assert!(CategoryLookup::default().is_empty());
        assert!(CategoryLookup::new(&[CategoryMapping {
            category: "x".into(),
            super_category: Some("drinks".into())
        }])
        .is_err());
    }

    #[test]
    fn cleanup_keeps_first_duplicate_and_applies_filters_in_order() {
        let days = vec![day("d1", "7", (2019, 5, 6)), day("d2", "8", (2019, 5, 6))];
        let canteens: HashSet<Id> = ["7".to_string()].into_iter().collect();
        let records = vec![
            meal(0, "d1", "Spaghetti", "Hauptgericht", Some(0.0)),
            meal(1, "d1", "Spaghetti", "Hauptgericht", Some(3.5)),
            meal(2, "d1", ".", "Hauptgericht", Some(1.0)),
            meal(3, "d1", "Currywurst mit Pommes--", "Hauptgericht", Some(25.0)),
            meal(4, "d1", "Heute geschlossen", "Hauptgericht", None),
            meal(5, "d1", "Brezel", "Backwaren", Some(0.8)),
            meal(6, "d1", "Bowl", "GreenCorner", Some(4.0)),
            meal(7, "d1", "Reis", "Beilagen", Some(0.9)),
            meal(8, "d1", "Special", "Aktion", Some(4.0)),
            meal(9, "d2", "Schnitzel", "Hauptgericht", Some(4.0)),
            meal(10, "d9", "Orphan", "Hauptgericht", Some(4.0)),
        ];
        let out = clean_meals(records, &days, &canteens, &filters(), &lookup());
        let names: Vec<_> = out.meals.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["Spaghetti", "Currywurst mit Pommes--", "Reis"]);
        assert_eq!(out.meals[0].meal_id, "m0");
        assert_eq!(out.meals[0].prices.student, None);
        assert_eq!(out.meals[1].prices.student, None);
        assert_eq!(out.meals[2].super_category, SuperCategory::SideDish);

        let r = &out.report;
        assert_eq!(r.orphaned, 2);
        assert_eq!(r.duplicates_dropped, 1);
        assert_eq!(r.placeholders, 1);
        assert_eq!(r.closure_notices, 1);
        assert_eq!(r.prices_nulled, 2);
        assert_eq!(r.unmatched_categories, 1);
        assert_eq!(r.excluded_super_categories, 2);
        assert_eq!(r.excluded_categories, 1);
        assert_eq!(r.kept, 3);
    }

    #[test]
    fn category_frequencies_rank_by_count_then_first_seen() {
        let days = vec![day("d1", "7", (2019, 5, 6))];
        let canteens: HashSet<Id> = ["7".to_string()].into_iter().collect();
        let records = vec![
            meal(0, "d1", "A", "Beilagen", None),
            meal(1, "d1", "B", "Hauptgericht", None),
            meal(2, "d1", "C", "Hauptgericht", None),
            meal(3, "d1", "D", "Aktion", None),
        ];
        let out = clean_meals(records, &days, &canteens, &filters(), &lookup());
        let freq = &out.category_frequencies;
        let cats: Vec<_> = freq.iter().map(|f| f.meal_category.as_str()).collect();
        assert_eq!(cats, ["Hauptgericht", "Beilagen", "Aktion"]);
        assert_eq!(freq[1].cum_sum, 3);
        assert!((freq[2].cum_percent - 100.0).abs() < 1e-9);
    }
}
