//! Organization type of a canteen, inferred from its name.
//!
//! Name rules only get most canteens right. Their result is corrected by a
//! manual table, then canteens still in `other` are looked up in a curated
//! list of university canteens (by address, then by name), and whatever is
//! left is settled by a terminal hand-decided table.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::OrgConfig;
use crate::error::Result;
use crate::overrides::classify_then_override;
use crate::rules::{Rule, RuleSet};
use crate::types::{Canteen, CuratedCanteen, OrgType};

static COUNTRY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i),\s*(deutschland|germany)").expect("suffix pattern is valid"));

/// Normalize an address for joining against the curated list.
pub fn normalize_address(address: &str) -> String {
    COUNTRY_SUFFIX
        .replace_all(address, "")
        .trim()
        .replace("str.", "straße")
        .replace("Str.", "Straße")
}

pub fn default_rules() -> Result<RuleSet<OrgType>> {
    Ok(RuleSet::new(
        vec![
            Rule::new(OrgType::School, "schul|gymnasium")?.not_preceded_by("hoch"),
            Rule::new(OrgType::Kindergarten, "kinder|kita")?,
            Rule::new(OrgType::University, "mensa|caf[eé]|bistro|uni|hochschule")?,
            Rule::new(OrgType::Company, "restaurant|gastronomie|betrieb")?,
        ],
        OrgType::Other,
    ))
}

/// Curated university canteens indexed for lookup.
#[derive(Debug, Default)]
pub struct CuratedIndex {
    addresses: HashSet<String>,
    names: HashSet<String>,
}

impl CuratedIndex {
    pub fn new(rows: &[CuratedCanteen]) -> Self {
        let mut idx = CuratedIndex::default();
        for r in rows {
            if let Some(a) = r.address.as_deref().filter(|a| !a.trim().is_empty()) {
                idx.addresses.insert(normalize_address(a));
            }
            if let Some(n) = r.name.as_deref().filter(|n| !n.trim().is_empty()) {
                idx.names.insert(n.trim().to_string());
            }
        }
        idx
    }

    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.contains(&normalize_address(address))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.names.contains(name.trim())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OrgReport {
    /// Type distribution from the name rules alone.
    pub by_rules: Vec<(OrgType, usize)>,
    pub corrections: usize,
    pub curated_by_address: usize,
    pub curated_by_name: usize,
    pub terminal: usize,
    pub kept: usize,
}

fn count_by_type(canteens: &[Canteen]) -> Vec<(OrgType, usize)> {
    [OrgType::School, OrgType::Kindergarten, OrgType::University, OrgType::Company, OrgType::Other]
        .into_iter()
        .map(|t| (t, canteens.iter().filter(|c| c.organization_type == Some(t)).count()))
        .collect()
}

/// Classify organization types and keep the configured target type.
pub fn classify_organizations(
    mut canteens: Vec<Canteen>,
    rules: &RuleSet<OrgType>,
    curated: &CuratedIndex,
    cfg: &OrgConfig,
) -> (Vec<Canteen>, OrgReport) {
    let mut report = OrgReport::default();

    let classified = classify_then_override(
        &mut canteens,
        |c| c.organization_type = Some(rules.classify(&c.name)),
        count_by_type,
        &[("org_corrections", &cfg.corrections)],
        |c| c.canteen_id.as_str(),
        |c, t| c.organization_type = Some(*t),
    );
    report.by_rules = classified.automatic;
    report.corrections = classified.overridden;

    // Address first; only canteens the address join missed are tried by name.
    for c in canteens.iter_mut().filter(|c| c.organization_type == Some(OrgType::Other)) {
        if c.address.as_deref().is_some_and(|a| curated.matches_address(a)) {
            c.organization_type = Some(OrgType::University);
            report.curated_by_address += 1;
        } else if curated.matches_name(&c.name) {
            c.organization_type = Some(OrgType::University);
            report.curated_by_name += 1;
        }
    }

    report.terminal = cfg.terminal.apply(
        "org_terminal",
        &mut canteens,
        |c| c.canteen_id.as_str(),
        |c, t| c.organization_type = Some(*t),
    );

    canteens.retain(|c| c.organization_type == Some(cfg.target));
    report.kept = canteens.len();
    info!(
        kept = report.kept,
        target = %cfg.target,
        corrections = report.corrections,
        curated = report.curated_by_address + report.curated_by_name,
        terminal = report.terminal,
        "organization types assigned"
    );
    (canteens, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::OverrideTable;

    fn canteen(id: &str, name: &str, address: Option<&str>) -> Canteen {
        Canteen {
            row: 0,
            canteen_id: id.into(),
            name: name.into(),
            city: None,
            address: address.map(str::to_string),
            latitude: None,
            longitude: None,
            created_at: None,
            updated_at: None,
            last_fetched_at: None,
            state: None,
            replaced_by: None,
            country: Some("Germany".into()),
            organization_type: None,
        }
    }

    #[test]
    fn rules_follow_priority_order() {
        let rules = default_rules().unwrap();
        assert_eq!(rules.classify("Grundschule am Park"), OrgType::School);
        assert_eq!(rules.classify("Gymnasium Mensa"), OrgType::School);
        assert_eq!(rules.classify("Kita Sonnenschein"), OrgType::Kindergarten);
        assert_eq!(rules.classify("Mensa Hochschule Trier"), OrgType::University);
        assert_eq!(rules.classify("Café Campus"), OrgType::University);
        assert_eq!(rules.classify("Betriebsrestaurant Siemens"), OrgType::Company);
        assert_eq!(rules.classify("Kantine Nord"), OrgType::Other);
    }

    #[test]
    fn address_normalization() {
        assert_eq!(
            normalize_address(" Universitätsstr. 14, 48143 Münster, Deutschland "),
            "Universitätsstraße 14, 48143 Münster"
        );
        assert_eq!(normalize_address("Am Campus 4, Germany"), "Am Campus 4");
    }

    #[test]
    fn overrides_and_curated_lookups_apply_in_order() {
        let curated = CuratedIndex::new(&[
            CuratedCanteen {
                name: Some("Kantine Nord".into()),
                address: Some("Nordweg 1, 12345 Stadt".into()),
                operator: None,
            },
            CuratedCanteen {
                name: Some("Casino West".into()),
                address: None,
                operator: Some("Studierendenwerk".into()),
            },
        ]);
        let cfg = OrgConfig {
            corrections: OverrideTable::new().with("17", OrgType::University),
            terminal: OverrideTable::new().with("3", OrgType::Company),
            ..OrgConfig::default()
        };
        let input = vec![
            canteen("1", "Kantine Nord", Some("Nordweg 1, 12345 Stadt, Germany")),
            canteen("2", "Casino West", Some("Westweg 9")),
            canteen("3", "Mensa Firma", None),
            canteen("17", "Wilhelm Gastronomie", None),
            canteen("20", "Grundschule Ost", None),
        ];
        let (kept, report) = classify_organizations(input, &default_rules().unwrap(), &curated, &cfg);
        let ids: Vec<_> = kept.iter().map(|c| c.canteen_id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "17"]);
        assert_eq!(report.corrections, 1);
        // "Wilhelm Gastronomie" still counts as a company: the tally precedes the correction
        assert_eq!(
            report.by_rules,
            vec![
                (OrgType::School, 1),
                (OrgType::Kindergarten, 0),
                (OrgType::University, 1),
                (OrgType::Company, 1),
                (OrgType::Other, 2),
            ]
        );
        assert_eq!(report.curated_by_address, 1);
        assert_eq!(report.curated_by_name, 1);
        assert_eq!(report.terminal, 1);
        assert!(kept.iter().all(|c| c.organization_type == Some(OrgType::University)));
        assert_eq!(OrgType::Kindergarten.to_string(), "kindergarten");
    }
}
