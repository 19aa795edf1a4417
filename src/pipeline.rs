//! Stage orchestration.
//!
//! `Inputs::load` reads every source named in the configuration; `run` then
//! applies the stages in their fixed order over owned snapshots and collects
//! each stage's counts into a `RunReport`.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::dates::{repair_days, select_days, DateRepairReport};
use crate::error::Result;
use crate::geo::{classify_countries, CountryPolygons, GeoReport};
use crate::indicators::{build_indicators, DietaryRules};
use crate::loader::{self, SourceReport};
use crate::meals::{clean_meals, CategoryLookup, MealFilters, MealReport};
use crate::notes::{attach_notes, NotesReport};
use crate::org::{classify_organizations, default_rules, CuratedIndex, OrgReport};
use crate::types::{
    CategoryFrequency, CategoryMapping, Canteen, CuratedCanteen, Day, DayRecord, Id, IndicatorRecord, MealRecord,
    MealWithNotes, Note, NoteAssociation, NoteFrequency,
};

/// Everything the pipeline reads, already typed.
#[derive(Debug)]
pub struct Inputs {
    pub canteens: Vec<Canteen>,
    pub days: Vec<DayRecord>,
    pub meals: Vec<MealRecord>,
    pub notes: Vec<Note>,
    pub associations: Vec<NoteAssociation>,
    pub countries: CountryPolygons,
    pub curated: Vec<CuratedCanteen>,
    pub categories: Vec<CategoryMapping>,
    pub sources: Vec<SourceReport>,
}

impl Inputs {
    pub fn load(cfg: &PipelineConfig) -> Result<Self> {
        let paths = &cfg.inputs;
        let (canteens, r_canteens) = loader::load_canteens(&paths.canteens)?;
        let (days, r_days) = loader::load_days(&paths.days)?;
        let (meals, r_meals) = loader::load_meals(&paths.meals)?;
        let (notes, r_notes) = loader::load_notes(&paths.notes)?;
        let (associations, r_assoc) = loader::load_associations(&paths.meal_notes)?;
        let countries = CountryPolygons::from_path(&paths.countries, cfg.geo.continent.as_deref())?;
        let curated = match &paths.curated_universities {
            Some(p) => loader::load_curated_universities(p)?,
            None => Vec::new(),
        };
        let categories = loader::load_category_lookup(&paths.category_lookup)?;
        Ok(Inputs {
            canteens,
            days,
            meals,
            notes,
            associations,
            countries,
            curated,
            categories,
            sources: vec![r_canteens, r_days, r_meals, r_notes, r_assoc],
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSummary {
    pub rows: usize,
    pub canteens: usize,
    pub months: usize,
    pub rows_with_data: usize,
}

/// Per-stage counts of what was read, dropped and repaired.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub sources: Vec<SourceReport>,
    pub geo: GeoReport,
    pub organizations: OrgReport,
    pub days: DateRepairReport,
    pub meals: MealReport,
    pub notes: NotesReport,
    pub indicators: IndicatorSummary,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub canteens: Vec<Canteen>,
    pub days: Vec<Day>,
    pub meals: Vec<MealWithNotes>,
    pub indicators: Vec<IndicatorRecord>,
    pub note_frequencies: Vec<NoteFrequency>,
    pub category_frequencies: Vec<CategoryFrequency>,
    pub report: RunReport,
}

/// Run every stage over already loaded inputs.
///
/// Patterns and lookup tables are compiled up front, so an invalid
/// configuration fails before any data is touched.
pub fn run(inputs: Inputs, cfg: &PipelineConfig) -> Result<PipelineOutput> {
    cfg.validate()?;
    let org_rules = default_rules()?;
    let meal_filters = MealFilters::new(&cfg.meals)?;
    let dietary = DietaryRules::new(&cfg.indicators)?;
    let lookup = CategoryLookup::new(&inputs.categories)?;
    let curated = CuratedIndex::new(&inputs.curated);
    if lookup.is_empty() {
        warn!("category lookup is empty, every meal will be unmatched");
    } else {
        debug!(categories = lookup.len(), "category lookup compiled");
    }

    let mut report = RunReport { sources: inputs.sources, ..RunReport::default() };

    let (canteens, geo) = classify_countries(inputs.canteens, &inputs.countries, &cfg.geo);
    report.geo = geo;
    let (canteens, org) = classify_organizations(canteens, &org_rules, &curated, &cfg.org);
    report.organizations = org;
    let canteen_ids: HashSet<Id> = canteens.iter().map(|c| c.canteen_id.clone()).collect();

    let (days, mut day_report) = repair_days(inputs.days, &cfg.days)?;
    let days = select_days(days, &cfg.window, &canteen_ids, &mut day_report);
    report.days = day_report;

    let cleaned = clean_meals(inputs.meals, &days, &canteen_ids, &meal_filters, &lookup);
    report.meals = cleaned.report;

    let noted = attach_notes(cleaned.meals, inputs.associations, &inputs.notes, &cfg.notes);
    report.notes = noted.report;

    let ordered_ids: Vec<Id> = canteens.iter().map(|c| c.canteen_id.clone()).collect();
    let indicators = build_indicators(&noted.meals, &ordered_ids, &cfg.window, &dietary);
    report.indicators = IndicatorSummary {
        rows: indicators.len(),
        canteens: ordered_ids.len(),
        months: cfg.window.months().len(),
        rows_with_data: indicators.iter().filter(|r| r.has_data()).count(),
    };

    info!(
        canteens = canteens.len(),
        days = days.len(),
        meals = noted.meals.len(),
        indicator_rows = indicators.len(),
        "pipeline finished"
    );
    Ok(PipelineOutput {
        canteens,
        days,
        meals: noted.meals,
        indicators,
        note_frequencies: noted.frequencies,
        category_frequencies: cleaned.category_frequencies,
        report,
    })
}

/// Load the configured inputs and run the pipeline.
pub fn run_from_config(cfg: &PipelineConfig) -> Result<PipelineOutput> {
    let inputs = Inputs::load(cfg)?;
    run(inputs, cfg)
}
