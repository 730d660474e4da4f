use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Names the keyed source collection a pool draws from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDefinition {
    pub source: String,
}

/// A drawable pool: a set of entity groups sampled against the source
/// collection of the referenced `PoolDefinition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    pub pool: String,
    #[serde(default)]
    pub entities: Vec<PoolEntityGroup>,
}

/// One weighted or chance-rolled group inside a pool entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolEntityGroup {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    /// Percent, 0–100.
    #[serde(default)]
    pub chance: Option<f64>,
    #[serde(default)]
    pub count: Option<usize>,
    #[serde(default)]
    pub filters_include: Option<BTreeMap<String, FieldFilter>>,
    #[serde(default)]
    pub filters_exclude: Option<BTreeMap<String, FieldFilter>>,
}

impl PoolEntityGroup {
    pub fn count(&self) -> usize {
        self.count.unwrap_or(1)
    }

    /// True if `template` passes every include filter and no exclude filter.
    pub fn accepts(&self, template: &Value) -> bool {
        let included = self.filters_include.as_ref().map_or(true, |filters| {
            filters
                .iter()
                .all(|(path, filter)| filter.matches(field_at(template, path)))
        });
        if !included {
            return false;
        }
        self.filters_exclude.as_ref().map_or(true, |filters| {
            !filters
                .iter()
                .any(|(path, filter)| filter.matches(field_at(template, path)))
        })
    }

    /// Display label for logs: the id, or a positional fallback.
    pub fn label(&self, index: usize) -> String {
        self.id.clone().unwrap_or_else(|| format!("#{}", index))
    }
}

/// `{ "$all": [...] }`: every listed value must be present in an
/// array-valued template field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllOf {
    #[serde(rename = "$all")]
    pub all: Vec<Value>,
}

/// `{ "min": a, "max": b }`: inclusive numeric range, either bound optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// A declarative predicate over one (dotted) template field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldFilter {
    All(AllOf),
    Range(NumericRange),
    /// OR-membership: the field equals one of the values.
    AnyOf(Vec<Value>),
    Equals(Value),
}

impl FieldFilter {
    /// Array-valued fields match scalar and list filters by membership.
    pub fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            FieldFilter::Equals(expected) => match field {
                Some(Value::Array(items)) => items.iter().any(|v| values_equal(v, expected)),
                Some(value) => values_equal(value, expected),
                None => expected.is_null(),
            },
            FieldFilter::AnyOf(options) => match field {
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|v| options.iter().any(|o| values_equal(v, o))),
                Some(value) => options.iter().any(|o| values_equal(value, o)),
                None => false,
            },
            FieldFilter::All(AllOf { all }) => match field {
                Some(Value::Array(items)) => all
                    .iter()
                    .all(|wanted| items.iter().any(|v| values_equal(v, wanted))),
                Some(value) => all.iter().all(|wanted| values_equal(value, wanted)),
                None => all.is_empty(),
            },
            FieldFilter::Range(NumericRange { min, max }) => {
                let Some(n) = field.and_then(Value::as_f64) else {
                    return false;
                };
                min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi)
            }
        }
    }
}

/// Resolve a dotted path (`stats.level`, `tags.0`) inside a template.
pub fn field_at<'v>(template: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(template, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Sampling mode shared by pool and collection draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawMode {
    Uniform,
    #[default]
    Weight,
    Chance,
}

/// Settings for `draw_from_collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawSettings {
    #[serde(rename = "type", default)]
    pub mode: DrawMode,
    #[serde(default = "default_one")]
    pub count: usize,
    #[serde(default)]
    pub unique: bool,
}

impl Default for DrawSettings {
    fn default() -> Self {
        Self {
            mode: DrawMode::default(),
            count: 1,
            unique: false,
        }
    }
}

impl DrawSettings {
    pub fn new(mode: DrawMode, count: usize) -> Self {
        Self {
            mode,
            count,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Settings for `draw_from_pool`. `draws` is the number of entity-group
/// selections (weight mode) or roll rounds (chance mode); each selected
/// group contributes its own `count` templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDrawSettings {
    #[serde(rename = "type", default)]
    pub mode: DrawMode,
    #[serde(default = "default_one")]
    pub draws: usize,
    #[serde(default)]
    pub unique: bool,
}

impl Default for PoolDrawSettings {
    fn default() -> Self {
        Self {
            mode: DrawMode::default(),
            draws: 1,
            unique: false,
        }
    }
}

impl PoolDrawSettings {
    pub fn new(mode: DrawMode, draws: usize) -> Self {
        Self {
            mode,
            draws,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

fn default_one() -> usize {
    1
}

/// Pool definitions and entries loaded from merged mod data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolTables {
    #[serde(default)]
    pub definitions: HashMap<String, PoolDefinition>,
    #[serde(default)]
    pub entries: HashMap<String, PoolEntry>,
}

impl PoolTables {
    pub fn load_from_ron(path: &Path) -> Result<PoolTables, PoolError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<PoolTables, PoolError> {
        Ok(ron::from_str(input)?)
    }

    pub fn parse_json(input: &str) -> Result<PoolTables, PoolError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Merge another set of tables into this one. Entries from `other`
    /// override entries in `self` with the same id.
    pub fn merge(&mut self, other: PoolTables) {
        self.definitions.extend(other.definitions);
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group(include: Value, exclude: Value) -> PoolEntityGroup {
        PoolEntityGroup {
            filters_include: serde_json::from_value(include).unwrap(),
            filters_exclude: serde_json::from_value(exclude).unwrap(),
            ..PoolEntityGroup::default()
        }
    }

    #[test]
    fn filter_variants_deserialize() {
        let filters: BTreeMap<String, FieldFilter> = serde_json::from_value(json!({
            "tier": 2,
            "kind": ["blade", "axe"],
            "tags": { "$all": ["fire", "rare"] },
            "level": { "min": 3, "max": 5 },
        }))
        .unwrap();

        assert!(matches!(filters["tier"], FieldFilter::Equals(_)));
        assert!(matches!(filters["kind"], FieldFilter::AnyOf(_)));
        assert!(matches!(filters["tags"], FieldFilter::All(_)));
        assert!(matches!(filters["level"], FieldFilter::Range(_)));
    }

    #[test]
    fn object_scalar_is_equality() {
        let filter: FieldFilter = serde_json::from_value(json!({ "a": 1 })).unwrap();
        assert!(matches!(filter, FieldFilter::Equals(_)));
    }

    #[test]
    fn include_filters_all_must_pass() {
        let g = group(
            json!({ "kind": ["blade", "axe"], "stats.level": { "min": 3 } }),
            Value::Null,
        );
        assert!(g.accepts(&json!({ "kind": "axe", "stats": { "level": 4 } })));
        assert!(!g.accepts(&json!({ "kind": "axe", "stats": { "level": 1 } })));
        assert!(!g.accepts(&json!({ "kind": "bow", "stats": { "level": 9 } })));
        assert!(!g.accepts(&json!({ "kind": "axe" })));
    }

    #[test]
    fn exclude_filters_any_rejects() {
        let g = group(Value::Null, json!({ "tags": "cursed", "tier": 3 }));
        assert!(g.accepts(&json!({ "tags": ["fire"], "tier": 1 })));
        assert!(!g.accepts(&json!({ "tags": ["fire", "cursed"], "tier": 1 })));
        assert!(!g.accepts(&json!({ "tags": [], "tier": 3.0 })));
    }

    #[test]
    fn all_of_requires_every_member() {
        let g = group(json!({ "tags": { "$all": ["fire", "rare"] } }), Value::Null);
        assert!(g.accepts(&json!({ "tags": ["rare", "fire", "heavy"] })));
        assert!(!g.accepts(&json!({ "tags": ["fire"] })));
        assert!(!g.accepts(&json!({})));
    }

    #[test]
    fn field_paths() {
        let t = json!({ "stats": { "level": 4 }, "tags": ["a", "b"] });
        assert_eq!(field_at(&t, "stats.level"), Some(&json!(4)));
        assert_eq!(field_at(&t, "tags.1"), Some(&json!("b")));
        assert_eq!(field_at(&t, "stats.missing"), None);
        assert_eq!(field_at(&t, "tags.x"), None);
    }

    #[test]
    fn draw_settings_defaults() {
        let s: DrawSettings = serde_json::from_value(json!({ "type": "chance" })).unwrap();
        assert_eq!(s.mode, DrawMode::Chance);
        assert_eq!(s.count, 1);
        assert!(!s.unique);

        let p: PoolDrawSettings =
            serde_json::from_value(json!({ "draws": 3, "unique": true })).unwrap();
        assert_eq!(p.mode, DrawMode::Weight);
        assert_eq!(p.draws, 3);
        assert!(p.unique);
    }

    #[test]
    fn parse_pool_tables_ron() {
        let tables = PoolTables::parse_ron(
            r#"#![enable(implicit_some)]
            (
                definitions: { "weapons": (source: "items.weapons") },
                entries: {
                    "goblin_loot": (
                        pool: "weapons",
                        entities: [
                            (id: "common", weight: 3.0, count: 2),
                            (id: "rare", weight: 1.0, filters_include: { "tier": 3 }),
                        ],
                    ),
                },
            )"#,
        )
        .unwrap();

        assert_eq!(tables.definitions["weapons"].source, "items.weapons");
        let entry = &tables.entries["goblin_loot"];
        assert_eq!(entry.entities.len(), 2);
        assert_eq!(entry.entities[0].weight, Some(3.0));
        assert_eq!(entry.entities[0].count(), 2);
        assert_eq!(entry.entities[1].count(), 1);
        assert!(entry.entities[1].filters_include.is_some());
    }

    #[test]
    fn merge_overrides_entries() {
        let mut base = PoolTables::parse_json(
            r#"{ "definitions": { "w": { "source": "a" } }, "entries": { "e": { "pool": "w" } } }"#,
        )
        .unwrap();
        let patch =
            PoolTables::parse_json(r#"{ "definitions": { "w": { "source": "b" } } }"#).unwrap();
        base.merge(patch);
        assert_eq!(base.definitions["w"].source, "b");
        assert!(base.entries.contains_key("e"));
    }
}
