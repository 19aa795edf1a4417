//! Classify-then-override.
//!
//! Automatic classifications are corrected by small hand-curated tables keyed
//! by entity id. Each table is applied as its own pass, after the automatic
//! pass it corrects, and reports how many records it touched.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::Id;

/// Named id → value table loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverrideTable<V> {
    entries: IndexMap<Id, V>,
}

impl<V> Default for OverrideTable<V> {
    fn default() -> Self {
        OverrideTable { entries: IndexMap::new() }
    }
}

impl<V> OverrideTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: impl Into<Id>, value: V) -> Self {
        self.entries.insert(id.into(), value);
        self
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call `assign` for every record whose id is in the table.
    /// Returns the number of records changed.
    pub fn apply<T, I, A>(&self, name: &str, records: &mut [T], id: I, assign: A) -> usize
    where
        I: Fn(&T) -> &str,
        A: Fn(&mut T, &V),
    {
        if self.entries.is_empty() {
            return 0;
        }
        let mut applied = 0usize;
        for r in records.iter_mut() {
            if let Some(v) = self.entries.get(id(r)) {
                assign(r, v);
                applied += 1;
            }
        }
        // An entry can match no record once upstream filters removed its id.
        let unused = self.entries.len().saturating_sub(applied);
        debug!(table = name, applied, unused, "override table applied");
        applied
    }
}

impl<V> FromIterator<(Id, V)> for OverrideTable<V> {
    fn from_iter<T: IntoIterator<Item = (Id, V)>>(iter: T) -> Self {
        OverrideTable { entries: iter.into_iter().collect() }
    }
}

/// Outcome of [`classify_then_override`].
#[derive(Debug, Clone, PartialEq)]
pub struct Classified<R> {
    /// Summary of the automatic result, taken before any override.
    pub automatic: R,
    /// Override assignments made.
    pub overridden: usize,
}

/// Run an automatic classifier over every record, summarize that result,
/// then apply the override tables in the given order.
pub fn classify_then_override<T, V, R, C, S, I, A>(
    records: &mut [T],
    classify: C,
    summarize: S,
    overrides: &[(&str, &OverrideTable<V>)],
    id: I,
    assign: A,
) -> Classified<R>
where
    C: Fn(&mut T),
    S: FnOnce(&[T]) -> R,
    I: Fn(&T) -> &str,
    A: Fn(&mut T, &V),
{
    for r in records.iter_mut() {
        classify(r);
    }
    let automatic = summarize(records);
    let mut overridden = 0usize;
    for (name, table) in overrides {
        overridden += table.apply(name, records, &id, &assign);
    }
    Classified { automatic, overridden }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Item {
        id: String,
        label: Option<String>,
    }

    fn item(id: &str) -> Item {
        Item { id: id.into(), label: None }
    }

    #[test]
    fn overrides_run_after_classification_in_order() {
        let mut items = vec![item("1"), item("2"), item("3")];
        let first = OverrideTable::new().with("2", "b".to_string());
        let second = OverrideTable::new()
            .with("2", "c".to_string())
            .with("3", "d".to_string());
        let result = classify_then_override(
            &mut items,
            |i| i.label = Some("auto".to_string()),
            |items| items.iter().filter(|i| i.label.as_deref() == Some("auto")).count(),
            &[("first", &first), ("second", &second)],
            |i| i.id.as_str(),
            |i, v| i.label = Some(v.clone()),
        );
        assert_eq!(result.automatic, 3);
        assert_eq!(result.overridden, 3);
        assert_eq!(items[0].label.as_deref(), Some("auto"));
        assert_eq!(items[1].label.as_deref(), Some("c"));
        assert_eq!(items[2].label.as_deref(), Some("d"));
    }

    #[test]
    fn deserializes_from_toml_table() {
        let t: OverrideTable<String> =
            toml::from_str("193 = \"Germany\"\n\"634\" = \"Switzerland\"").unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.get("193").map(String::as_str), Some("Germany"));
    }
}
