//! Monthly supply indicators per canteen.
//!
//! Every metric is computed per (canteen, date) first and then averaged per
//! (canteen, year, month), so a month's value weights each served day equally
//! regardless of how many meals it had. Swapping the order would change the
//! result. The figures are left-joined onto the full canteen × month grid.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::{debug, info};

use crate::config::{AnalysisWindow, IndicatorConfig};
use crate::error::Result;
use crate::rules::ci_regex;
use crate::types::{Id, IndicatorRecord, MealWithNotes, SuperCategory};
use crate::util::{average, average_present, percent};

/// Compiled dietary and ingredient patterns.
#[derive(Debug)]
pub struct DietaryRules {
    vegetarian: Regex,
    vegan: Regex,
    whole_grain: Regex,
}

impl DietaryRules {
    pub fn new(cfg: &IndicatorConfig) -> Result<Self> {
        Ok(DietaryRules {
            vegetarian: ci_regex(&cfg.vegetarian_pattern)?,
            vegan: ci_regex(&cfg.vegan_pattern)?,
            whole_grain: ci_regex(&cfg.whole_grain_pattern)?,
        })
    }

    // Meals without any common note never match; the placeholder is not a label.
    pub fn is_vegetarian(&self, m: &MealWithNotes) -> bool {
        m.notes_90.count > 0 && self.vegetarian.is_match(&m.notes_90.list)
    }

    pub fn is_vegan(&self, m: &MealWithNotes) -> bool {
        m.notes_90.count > 0 && self.vegan.is_match(&m.notes_90.list)
    }

    pub fn is_whole_grain(&self, m: &MealWithNotes) -> bool {
        self.whole_grain.is_match(&m.meal.name)
    }
}

/// Figures of one canteen on one day.
#[derive(Debug, Clone, Default)]
struct Daily {
    meals: usize,
    /// Meals other than baked goods.
    countable: usize,
    main_dishes: usize,
    vegetarian: usize,
    vegan: usize,
    main_prices: Vec<f64>,
    /// Meals other than desserts and baked goods.
    grain_base: usize,
    whole_grain: usize,
}

impl Daily {
    fn add(&mut self, m: &MealWithNotes, rules: &DietaryRules) {
        let sc = m.meal.super_category;
        self.meals += 1;
        if sc != SuperCategory::BakedGoods {
            self.countable += 1;
        }
        if sc == SuperCategory::MainDish {
            self.main_dishes += 1;
            if let Some(p) = m.meal.prices.student {
                self.main_prices.push(p);
            }
        }
        if rules.is_vegetarian(m) {
            self.vegetarian += 1;
        }
        if rules.is_vegan(m) {
            self.vegan += 1;
        }
        if sc != SuperCategory::Dessert && sc != SuperCategory::BakedGoods {
            self.grain_base += 1;
            if rules.is_whole_grain(m) {
                self.whole_grain += 1;
            }
        }
    }
}

fn mean_of<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    let v: Vec<f64> = values.into_iter().collect();
    average(&v)
}

/// Average the daily figures of one month. Each metric only averages over
/// the days it is defined for.
fn monthly(mut record: IndicatorRecord, days: &[Daily]) -> IndicatorRecord {
    let counted = || days.iter().filter(|d| d.countable > 0);
    let served = || days.iter().filter(|d| d.meals > 0);
    let grain = || days.iter().filter(|d| d.grain_base > 0);

    record.avg_count_meals = mean_of(counted().map(|d| d.countable as f64));
    record.avg_count_main_dishes =
        mean_of(days.iter().filter(|d| d.main_dishes > 0).map(|d| d.main_dishes as f64));
    record.avg_count_vegetarian = mean_of(served().map(|d| d.vegetarian as f64));
    record.avg_percent_vegetarian = mean_of(served().map(|d| percent(d.vegetarian, d.meals)));
    record.avg_count_vegan = mean_of(served().map(|d| d.vegan as f64));
    record.avg_percent_vegan = mean_of(served().map(|d| percent(d.vegan, d.meals)));
    record.avg_price_main_dish_student = average_present(
        days.iter().filter(|d| d.main_dishes > 0).map(|d| average(&d.main_prices)),
    );
    record.avg_count_whole_grain = mean_of(grain().map(|d| d.whole_grain as f64));
    record.avg_percent_whole_grain = mean_of(grain().map(|d| percent(d.whole_grain, d.grain_base)));
    record
}

/// Build the indicator table: one row per canteen and month of the window.
///
/// Canteens keep the order given; months ascend. Months without meals have
/// every metric empty.
pub fn build_indicators(
    meals: &[MealWithNotes],
    canteen_ids: &[Id],
    window: &AnalysisWindow,
    rules: &DietaryRules,
) -> Vec<IndicatorRecord> {
    let mut daily: BTreeMap<(&str, NaiveDate), Daily> = BTreeMap::new();
    for m in meals {
        daily
            .entry((m.meal.canteen_id.as_str(), m.meal.date_correct))
            .or_default()
            .add(m, rules);
    }
    debug!(days = daily.len(), "daily figures computed");

    let mut by_month: HashMap<(&str, i32, u32), Vec<Daily>> = HashMap::new();
    for ((canteen, date), figures) in daily {
        by_month.entry((canteen, date.year(), date.month())).or_default().push(figures);
    }

    let months = window.months();
    let mut grid = Vec::with_capacity(canteen_ids.len() * months.len());
    for id in canteen_ids {
        for &(year, month) in &months {
            let record = IndicatorRecord::empty(id.clone(), year, month);
            grid.push(match by_month.get(&(id.as_str(), year, month)) {
                Some(days) => monthly(record, days),
                None => record,
            });
        }
    }
    info!(
        rows = grid.len(),
        canteens = canteen_ids.len(),
        months = months.len(),
        with_data = grid.iter().filter(|r| r.has_data()).count(),
        "indicators aggregated"
    );
    grid
}
