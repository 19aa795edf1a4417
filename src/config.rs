//! Run configuration: input locations, the analysis window, filter patterns
//! and the manual-correction tables.
//!
//! Everything is read from one TOML file. Every field has a default, so a
//! config file only needs to name what differs. Override tables default to
//! empty; the repository's `config/pipeline.toml` carries the curated ones.
//! Relative input paths are resolved against the config file's directory.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::overrides::OverrideTable;
use crate::types::{Id, OrgType, SuperCategory};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    pub window: AnalysisWindow,
    pub days: DaysConfig,
    pub geo: GeoConfig,
    pub org: OrgConfig,
    pub meals: MealsConfig,
    pub notes: NotesConfig,
    pub indicators: IndicatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputPaths {
    pub canteens: PathBuf,
    pub days: PathBuf,
    pub meals: PathBuf,
    pub notes: PathBuf,
    pub meal_notes: PathBuf,
    /// GeoJSON FeatureCollection of country polygons.
    pub countries: PathBuf,
    /// Curated list of university-affiliated canteens (`Kantine`, `Adresse`, `Studierendenwerk`).
    pub curated_universities: Option<PathBuf>,
    /// Manual category → super category table (`category`, `super_category`).
    pub category_lookup: PathBuf,
}

impl Default for InputPaths {
    fn default() -> Self {
        InputPaths {
            canteens: "data/raw_data/canteens.csv".into(),
            days: "data/raw_data/days.csv".into(),
            meals: "data/raw_data/meals.csv".into(),
            notes: "data/raw_data/notes.csv".into(),
            meal_notes: "data/raw_data/meals_notes.csv".into(),
            countries: "data/helper_data/countries.geojson".into(),
            curated_universities: Some("data/helper_data/curated_universities.csv".into()),
            category_lookup: "data/helper_data/meal_categories.csv".into(),
        }
    }
}

impl InputPaths {
    fn resolve(&mut self, base: &Path) {
        for p in [
            &mut self.canteens,
            &mut self.days,
            &mut self.meals,
            &mut self.notes,
            &mut self.meal_notes,
            &mut self.countries,
            &mut self.category_lookup,
        ] {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
        if let Some(p) = self.curated_universities.as_mut() {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }
}

/// Analysis timeframe. Both bounds are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Default for AnalysisWindow {
    fn default() -> Self {
        AnalysisWindow {
            start: NaiveDate::from_ymd_opt(2012, 8, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2023, 9, 1).unwrap_or(NaiveDate::MAX),
        }
    }
}

impl AnalysisWindow {
    pub fn contains(&self, d: NaiveDate) -> bool {
        self.start < d && d < self.end
    }

    /// Every (year, month) from the start month up to the last month that
    /// still has a day inside the window.
    pub fn months(&self) -> Vec<(i32, u32)> {
        let Some(last) = self.end.pred_opt() else {
            return Vec::new();
        };
        let (last_year, last_month) = (last.year(), last.month());
        let mut out = Vec::new();
        for year in self.start.year()..=last_year {
            for month in 1..=12u32 {
                if year == self.start.year() && month < self.start.month() {
                    continue;
                }
                if year == last_year && month > last_month {
                    continue;
                }
                out.push((year, month));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaysConfig {
    /// Corrupted year value found in the raw `date` column.
    pub sentinel_year: i32,
    /// Year the sentinel stands for.
    pub corrected_year: i32,
}

impl Default for DaysConfig {
    fn default() -> Self {
        DaysConfig { sentinel_year: 4012, corrected_year: 2012 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeoConfig {
    /// `CONTINENT` property value the polygon set is restricted to.
    pub continent: Option<String>,
    pub target_country: String,
    pub coordinate_fixes: OverrideTable<Coordinate>,
    pub address_fixes: OverrideTable<String>,
    /// Records without a usable position (test canteens, out-of-scope data).
    pub excluded_ids: Vec<Id>,
    /// Placeholder names marking retired canteens.
    pub excluded_names: Vec<String>,
    /// Countries for canteens the spatial join left unmatched.
    pub unmatched_country_fixes: OverrideTable<String>,
    /// Records found invalid after the spatial join.
    pub invalid_ids: Vec<Id>,
    /// Corrections for points assigned to the wrong side of a border.
    pub boundary_fixes: OverrideTable<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        GeoConfig {
            continent: Some("Europe".to_string()),
            target_country: "Germany".to_string(),
            coordinate_fixes: OverrideTable::new(),
            address_fixes: OverrideTable::new(),
            excluded_ids: Vec::new(),
            excluded_names: vec!["obsolte".to_string()],
            unmatched_country_fixes: OverrideTable::new(),
            invalid_ids: Vec::new(),
            boundary_fixes: OverrideTable::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrgConfig {
    /// Organization type canteens must have to stay in the analysis.
    pub target: OrgType,
    /// Corrections of the automatic name rules.
    pub corrections: OverrideTable<OrgType>,
    /// Final hand decisions for what the curated list could not resolve.
    pub terminal: OverrideTable<OrgType>,
}

impl Default for OrgConfig {
    fn default() -> Self {
        OrgConfig {
            target: OrgType::University,
            corrections: OverrideTable::new(),
            terminal: OverrideTable::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MealsConfig {
    /// Closure announcements published instead of a meal.
    pub closed_pattern: String,
    /// Real meals the closure pattern catches anyway.
    pub closed_allow_pattern: String,
    /// Names consisting only of punctuation; must match the whole name.
    pub placeholder_pattern: String,
    pub announcement_pattern: String,
    pub announcement_allow_pattern: String,
    /// Categories longer than this (in characters) are suspect.
    pub max_category_len: usize,
    /// Long categories that are legitimate.
    pub long_category_pattern: String,
    /// Prices above this are treated as unknown.
    pub price_ceiling: f64,
    /// Raw categories holding malformed data.
    pub excluded_categories: Vec<String>,
    pub excluded_super_categories: Vec<SuperCategory>,
}

impl Default for MealsConfig {
    fn default() -> Self {
        MealsConfig {
            closed_pattern: "geschlossen|entfällt|kein".to_string(),
            closed_allow_pattern: "Rezeptur|kein Käse|Schaschlik|keine Beilage|mensaVital|Hend'l|Bowl|Pizza-Point|Pasta-Strecke|Seelachsfilet|Hartkäse|Wokgemüse".to_string(),
            placeholder_pattern: r"\W+".to_string(),
            announcement_pattern: "aufgrund|wir |gäste".to_string(),
            announcement_allow_pattern: "salat".to_string(),
            max_category_len: 50,
            long_category_pattern: "theke|heute|menü|flex-gericht|mittagsgericht|restaurant|to-go|EG Süd|pro Portion|Ausgabe|Cafeteria|delicious|foodhopper".to_string(),
            price_ceiling: 20.0,
            excluded_categories: vec!["GreenCorner".to_string(), "MA(h)l was anderes".to_string()],
            excluded_super_categories: vec![SuperCategory::BakedGoods, SuperCategory::Unmatched],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotesConfig {
    /// Cumulative usage share (percent) the restricted note lists cover.
    pub coverage_percent: f64,
    /// Token written for a missing note label.
    pub placeholder: String,
}

impl Default for NotesConfig {
    fn default() -> Self {
        NotesConfig { coverage_percent: 90.0, placeholder: "N/A".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndicatorConfig {
    pub vegetarian_pattern: String,
    pub vegan_pattern: String,
    pub whole_grain_pattern: String,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            vegetarian_pattern: "vegetarisch|ohne Fleisch|fleischlos|kein Fleisch|ovo-lacto-vegetabil|OLV".to_string(),
            vegan_pattern: "vegan".to_string(),
            whole_grain_pattern: "Vollkorn".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: PipelineConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::io(path.display().to_string(), e))?;
        let mut cfg = Self::from_toml_str(&text)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        cfg.inputs.resolve(base);
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.start >= self.window.end {
            return Err(PipelineError::Config(format!(
                "window start {} is not before end {}",
                self.window.start, self.window.end
            )));
        }
        if !(self.meals.price_ceiling > 0.0) {
            return Err(PipelineError::Config("price_ceiling must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.notes.coverage_percent) {
            return Err(PipelineError::Config("coverage_percent must be within 0..=100".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_analysis_constants() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.geo.target_country, "Germany");
        assert_eq!(cfg.days.sentinel_year, 4012);
        assert_eq!(cfg.meals.price_ceiling, 20.0);
        assert_eq!(cfg.notes.placeholder, "N/A");
    }

    #[test]
    fn window_months_trim_boundaries() {
        let months = AnalysisWindow::default().months();
        assert_eq!(months.first(), Some(&(2012, 8)));
        assert_eq!(months.last(), Some(&(2023, 8)));
        // Aug 2012..=Dec 2012, 10 full years, Jan..=Aug 2023
        assert_eq!(months.len(), 5 + 10 * 12 + 8);
    }

    #[test]
    fn window_bounds_are_exclusive() {
        let w = AnalysisWindow::default();
        assert!(!w.contains(NaiveDate::from_ymd_opt(2012, 8, 1).unwrap()));
        assert!(w.contains(NaiveDate::from_ymd_opt(2012, 8, 2).unwrap()));
        assert!(w.contains(NaiveDate::from_ymd_opt(2023, 8, 31).unwrap()));
        assert!(!w.contains(NaiveDate::from_ymd_opt(2023, 9, 1).unwrap()));
    }

    #[test]
    fn parses_partial_toml_with_override_tables() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [window]
            start = "2019-01-01"
            end = "2019-07-01"

            [geo.boundary_fixes]
            193 = "Germany"

            [geo.coordinate_fixes]
            1769 = { latitude = 48.48373, longitude = 9.18817 }

            [org.corrections]
            337 = "university"
            1283 = "school"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.months().len(), 6);
        assert_eq!(cfg.geo.boundary_fixes.get("193").map(String::as_str), Some("Germany"));
        assert_eq!(cfg.geo.coordinate_fixes.get("1769").map(|c| c.longitude), Some(9.18817));
        assert_eq!(cfg.org.corrections.get("1283"), Some(&OrgType::School));
        assert_eq!(cfg.meals.max_category_len, 50);
    }

    #[test]
    fn rejects_inverted_window() {
        let err = PipelineConfig::from_toml_str("[window]\nstart = \"2020-01-01\"\nend = \"2019-01-01\"");
        assert!(matches!(err, Err(PipelineError::Config(_))));
    }
}
