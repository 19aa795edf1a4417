//! Country assignment for canteens.
//!
//! Canteen positions are joined against country polygons (GeoJSON, WGS84
//! lon/lat). Polygon resolution is too coarse near borders and coasts, so
//! the automatic result is followed by manual correction tables and the set
//! is finally reduced to the target country.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use geo::{BoundingRect, Coord, Intersects, LineString, MultiPolygon, Polygon, Rect};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::GeoConfig;
use crate::error::{PipelineError, Result};
use crate::overrides::classify_then_override;
use crate::types::Canteen;

/// One ring as (lon, lat) pairs.
type Ring = Vec<(f64, f64)>;

/// A country's area. Points on an edge belong to it, as with an
/// `intersects` spatial join.
#[derive(Debug, Clone)]
pub struct CountryShape {
    pub name: String,
    area: MultiPolygon<f64>,
    bbox: Option<Rect<f64>>,
}

impl CountryShape {
    fn new(name: String, polygons: Vec<Polygon<f64>>) -> Self {
        let area = MultiPolygon::new(polygons);
        let bbox = area.bounding_rect();
        CountryShape { name, area, bbox }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let p = Coord { x: lon, y: lat };
        match &self.bbox {
            Some(b) if b.intersects(&p) => self.area.intersects(&p),
            _ => false,
        }
    }
}

/// Country polygon reference set.
#[derive(Debug, Clone, Default)]
pub struct CountryPolygons {
    countries: Vec<CountryShape>,
}

fn parse_ring(v: &Value) -> Result<Ring> {
    let points = v
        .as_array()
        .ok_or_else(|| PipelineError::InvalidGeometry("ring is not an array".into()))?;
    points
        .iter()
        .map(|p| {
            let xy = p.as_array().filter(|a| a.len() >= 2);
            match xy.map(|a| (a[0].as_f64(), a[1].as_f64())) {
                Some((Some(x), Some(y))) => Ok((x, y)),
                _ => Err(PipelineError::InvalidGeometry(format!("bad position {p}"))),
            }
        })
        .collect()
}

fn parse_polygon(v: &Value) -> Result<Option<Polygon<f64>>> {
    let mut rings = v
        .as_array()
        .ok_or_else(|| PipelineError::InvalidGeometry("polygon is not an array".into()))?
        .iter()
        .map(parse_ring)
        .collect::<Result<Vec<_>>>()?
        .into_iter();
    let Some(exterior) = rings.next().filter(|r| r.len() >= 3) else {
        return Ok(None);
    };
    let holes: Vec<LineString<f64>> = rings.map(LineString::from).collect();
    Ok(Some(Polygon::new(LineString::from(exterior), holes)))
}

impl CountryPolygons {
    /// Read a GeoJSON FeatureCollection. Features need a `NAME` (or `name`)
    /// property and a Polygon/MultiPolygon geometry; when `continent` is set,
    /// only features whose `CONTINENT` property equals it are kept.
    pub fn from_geojson_str(s: &str, continent: Option<&str>) -> Result<Self> {
        let geojson: Value = serde_json::from_str(s)?;
        let features = geojson
            .get("features")
            .and_then(|f| f.as_array())
            .ok_or_else(|| PipelineError::InvalidGeometry("missing features array".into()))?;

        let mut countries = Vec::new();
        for feature in features {
            let Some(properties) = feature.get("properties") else {
                continue;
            };
            if let Some(wanted) = continent {
                let c = properties.get("CONTINENT").and_then(|v| v.as_str());
                if c != Some(wanted) {
                    continue;
                }
            }
            let name = properties
                .get("NAME")
                .or_else(|| properties.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if name.is_empty() {
                continue;
            }
            let Some(geometry) = feature.get("geometry").filter(|g| !g.is_null()) else {
                continue;
            };
            let coords = geometry
                .get("coordinates")
                .ok_or_else(|| PipelineError::InvalidGeometry(format!("{name}: no coordinates")))?;
            let polygons = match geometry.get("type").and_then(|t| t.as_str()) {
                Some("Polygon") => parse_polygon(coords)?.into_iter().collect(),
                Some("MultiPolygon") => {
                    let parts = coords.as_array().ok_or_else(|| {
                        PipelineError::InvalidGeometry(format!("{name}: multipolygon is not an array"))
                    })?;
                    let mut out = Vec::new();
                    for part in parts {
                        out.extend(parse_polygon(part)?);
                    }
                    out
                }
                other => {
                    warn!(country = %name, geometry = ?other, "unsupported geometry skipped");
                    continue;
                }
            };
            countries.push(CountryShape::new(name, polygons));
        }
        info!(countries = countries.len(), "country polygons loaded");
        Ok(CountryPolygons { countries })
    }

    pub fn from_path(path: &Path, continent: Option<&str>) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::io(path.display().to_string(), e))?;
        Self::from_geojson_str(&text, continent)
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }

    /// Name of the first country containing the point.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<&str> {
        self.countries
            .iter()
            .find(|c| c.contains(lon, lat))
            .map(|c| c.name.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GeoReport {
    pub coordinates_fixed: usize,
    pub addresses_fixed: usize,
    pub excluded: usize,
    pub unmatched_after_join: usize,
    pub country_overrides: usize,
    pub invalid_dropped: usize,
    pub boundary_fixed: usize,
    /// Country distribution after all corrections, before the target filter.
    pub countries: BTreeMap<String, usize>,
    pub kept: usize,
}

/// Assign countries and keep canteens of the target country.
pub fn classify_countries(
    mut canteens: Vec<Canteen>,
    polygons: &CountryPolygons,
    cfg: &GeoConfig,
) -> (Vec<Canteen>, GeoReport) {
    let mut report = GeoReport::default();

    report.coordinates_fixed = cfg.coordinate_fixes.apply(
        "coordinate_fixes",
        &mut canteens,
        |c| c.canteen_id.as_str(),
        |c, p| {
            c.latitude = Some(p.latitude);
            c.longitude = Some(p.longitude);
        },
    );
    report.addresses_fixed = cfg.address_fixes.apply(
        "address_fixes",
        &mut canteens,
        |c| c.canteen_id.as_str(),
        |c, a| c.address = Some(a.clone()),
    );

    let excluded_ids: HashSet<&str> = cfg.excluded_ids.iter().map(String::as_str).collect();
    let before = canteens.len();
    canteens.retain(|c| {
        !excluded_ids.contains(c.canteen_id.as_str()) && !cfg.excluded_names.iter().any(|n| *n == c.name)
    });
    report.excluded = before - canteens.len();

    let joined = classify_then_override(
        &mut canteens,
        |c| {
            c.country = match (c.longitude, c.latitude) {
                (Some(lon), Some(lat)) => polygons.locate(lon, lat).map(str::to_string),
                _ => None,
            };
        },
        |all| all.iter().filter(|c| c.country.is_none()).count(),
        &[("unmatched_country_fixes", &cfg.unmatched_country_fixes)],
        |c| c.canteen_id.as_str(),
        |c, country| c.country = Some(country.clone()),
    );
    report.unmatched_after_join = joined.automatic;
    report.country_overrides = joined.overridden;

    let invalid: HashSet<&str> = cfg.invalid_ids.iter().map(String::as_str).collect();
    let before = canteens.len();
    canteens.retain(|c| !invalid.contains(c.canteen_id.as_str()));
    report.invalid_dropped = before - canteens.len();

    report.boundary_fixed = cfg.boundary_fixes.apply(
        "boundary_fixes",
        &mut canteens,
        |c| c.canteen_id.as_str(),
        |c, country| c.country = Some(country.clone()),
    );

    for c in &canteens {
        let key = c.country.clone().unwrap_or_else(|| "<none>".to_string());
        *report.countries.entry(key).or_default() += 1;
    }

    canteens.retain(|c| c.country.as_deref() == Some(cfg.target_country.as_str()));
    report.kept = canteens.len();
    info!(
        kept = report.kept,
        target = %cfg.target_country,
        overrides = report.country_overrides + report.boundary_fixed,
        "countries assigned"
    );
    (canteens, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Coordinate;
    use crate::overrides::OverrideTable;

    // Two unit squares side by side: "Germany" on [0,1]x[0,1] with a hole,
    // "Switzerland" on [1,2]x[0,1]; an Asian square that the continent filter drops.
    const GEOJSON: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {"NAME": "Germany", "CONTINENT": "Europe"},
         "geometry": {"type": "Polygon", "coordinates": [
            [[0,0],[1,0],[1,1],[0,1],[0,0]],
            [[0.4,0.4],[0.6,0.4],[0.6,0.6],[0.4,0.6],[0.4,0.4]]
         ]}},
        {"type": "Feature", "properties": {"NAME": "Switzerland", "CONTINENT": "Europe"},
         "geometry": {"type": "MultiPolygon", "coordinates": [
            [[[1,0],[2,0],[2,1],[1,1],[1,0]]]
         ]}},
        {"type": "Feature", "properties": {"NAME": "Japan", "CONTINENT": "Asia"},
         "geometry": {"type": "Polygon", "coordinates": [[[5,5],[6,5],[6,6],[5,6],[5,5]]]}}
      ]
    }"#;

    fn canteen(id: &str, lon: Option<f64>, lat: Option<f64>) -> Canteen {
        Canteen {
            row: id.parse().unwrap_or(0),
            canteen_id: id.into(),
            name: format!("Mensa {id}"),
            city: None,
            address: None,
            latitude: lat,
            longitude: lon,
            created_at: None,
            updated_at: None,
            last_fetched_at: None,
            state: None,
            replaced_by: None,
            country: None,
            organization_type: None,
        }
    }

    fn polygons() -> CountryPolygons {
        CountryPolygons::from_geojson_str(GEOJSON, Some("Europe")).unwrap()
    }

    #[test]
    fn locates_points_respecting_holes_and_continent() {
        let p = polygons();
        assert_eq!(p.len(), 2);
        assert_eq!(p.locate(0.2, 0.2), Some("Germany"));
        assert_eq!(p.locate(0.5, 0.5), None);
        assert_eq!(p.locate(1.5, 0.5), Some("Switzerland"));
        assert_eq!(p.locate(5.5, 5.5), None);
    }

    #[test]
    fn points_on_a_border_belong_to_the_country() {
        let p = polygons();
        assert_eq!(p.locate(0.0, 0.5), Some("Germany"));
        assert_eq!(p.locate(0.5, 1.0), Some("Germany"));
        assert_eq!(p.locate(0.5, 0.0), Some("Germany"));
        // shared edge: the first country in the file wins
        assert_eq!(p.locate(1.0, 0.5), Some("Germany"));
        assert_eq!(p.locate(2.0, 0.5), Some("Switzerland"));
        assert_eq!(p.locate(0.4, 0.5), Some("Germany"));
        assert_eq!(p.locate(2.01, 0.5), None);
    }

    #[test]
    fn boundary_override_wins_over_spatial_join() {
        let cfg = GeoConfig {
            boundary_fixes: OverrideTable::new().with("193", "Germany".to_string()),
            ..GeoConfig::default()
        };
        let input = vec![canteen("193", Some(1.5), Some(0.5)), canteen("634", Some(1.2), Some(0.2))];
        let (kept, report) = classify_countries(input, &polygons(), &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].canteen_id, "193");
        assert_eq!(kept[0].country.as_deref(), Some("Germany"));
        assert_eq!(report.boundary_fixed, 1);
        assert_eq!(report.countries.get("Switzerland"), Some(&1));
    }

    #[test]
    fn coordinate_fixes_exclusions_and_unmatched_fixes() {
        let cfg = GeoConfig {
            coordinate_fixes: OverrideTable::new().with("1769", Coordinate { latitude: 0.1, longitude: 0.1 }),
            excluded_ids: vec!["192".to_string()],
            unmatched_country_fixes: OverrideTable::new().with("1360", "Germany".to_string()),
            invalid_ids: vec!["217".to_string()],
            ..GeoConfig::default()
        };
        let mut obsolete = canteen("5", Some(0.2), Some(0.2));
        obsolete.name = "obsolte".to_string();
        let input = vec![
            canteen("1769", None, None),
            canteen("192", None, None),
            canteen("1360", Some(0.5), Some(0.5)),
            canteen("217", Some(9.0), Some(9.0)),
            obsolete,
        ];
        let (kept, report) = classify_countries(input, &polygons(), &cfg);
        let ids: Vec<_> = kept.iter().map(|c| c.canteen_id.as_str()).collect();
        assert_eq!(ids, ["1769", "1360"]);
        assert_eq!(report.coordinates_fixed, 1);
        assert_eq!(report.excluded, 2);
        assert_eq!(report.invalid_dropped, 1);
        assert_eq!(report.unmatched_after_join, 2);
        assert_eq!(report.country_overrides, 1);
    }

    #[test]
    fn unmatched_count_ignores_fixes_for_joined_canteens() {
        let cfg = GeoConfig {
            unmatched_country_fixes: OverrideTable::new().with("7", "Germany".to_string()),
            ..GeoConfig::default()
        };
        let input = vec![canteen("7", Some(0.2), Some(0.2)), canteen("8", Some(9.0), Some(9.0))];
        let (kept, report) = classify_countries(input, &polygons(), &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(report.country_overrides, 1);
        assert_eq!(report.unmatched_after_join, 1);
    }

    #[test]
    fn rejects_geojson_without_features() {
        assert!(CountryPolygons::from_geojson_str("{\"type\": \"Feature\"}", None).is_err());
    }
}
