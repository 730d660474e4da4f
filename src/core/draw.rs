/// Collection draws: uniform, weighted and chance sampling over any keyed
/// collection. The pool engine uses this for its final pick.
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use crate::schema::pool::{DrawMode, DrawSettings, PoolEntityGroup};

/// Fallback weight and chance for items that do not carry their own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawDefaults {
    pub weight: f64,
    /// Percent, 0–100.
    pub chance: f64,
}

impl Default for DrawDefaults {
    fn default() -> Self {
        Self {
            weight: 1.0,
            chance: 50.0,
        }
    }
}

/// Anything that can be drawn. Items without a weight or chance use the
/// configured defaults.
pub trait Weighted {
    fn weight(&self) -> Option<f64> {
        None
    }

    fn chance(&self) -> Option<f64> {
        None
    }
}

/// JSON objects carry their own `weight` / `chance` fields.
impl Weighted for Value {
    fn weight(&self) -> Option<f64> {
        self.get("weight").and_then(Value::as_f64)
    }

    fn chance(&self) -> Option<f64> {
        self.get("chance").and_then(Value::as_f64)
    }
}

impl Weighted for String {}

impl Weighted for str {}

impl<T: Weighted + ?Sized> Weighted for &T {
    fn weight(&self) -> Option<f64> {
        (**self).weight()
    }

    fn chance(&self) -> Option<f64> {
        (**self).chance()
    }
}

impl Weighted for PoolEntityGroup {
    fn weight(&self) -> Option<f64> {
        self.weight
    }

    fn chance(&self) -> Option<f64> {
        self.chance
    }
}

/// A collection that can be flattened into `(key, item)` entries. Arrays
/// are keyed by index. Hash maps are sorted by key so a seeded draw is
/// reproducible.
pub trait IntoEntries {
    type Item;

    fn into_entries(self) -> Vec<(String, Self::Item)>;
}

impl<T> IntoEntries for Vec<T> {
    type Item = T;

    fn into_entries(self) -> Vec<(String, T)> {
        self.into_iter()
            .enumerate()
            .map(|(i, item)| (i.to_string(), item))
            .collect()
    }
}

impl<T, S: BuildHasher> IntoEntries for HashMap<String, T, S> {
    type Item = T;

    fn into_entries(self) -> Vec<(String, T)> {
        let mut entries: Vec<(String, T)> = self.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

impl<T> IntoEntries for BTreeMap<String, T> {
    type Item = T;

    fn into_entries(self) -> Vec<(String, T)> {
        self.into_iter().collect()
    }
}

/// Insertion order is kept.
impl IntoEntries for Map<String, Value> {
    type Item = Value;

    fn into_entries(self) -> Vec<(String, Value)> {
        self.into_iter().collect()
    }
}

pub fn to_entries<C: IntoEntries>(data: C) -> Vec<(String, C::Item)> {
    data.into_entries()
}

/// Draw values from `data`. See [`draw_entries`].
pub fn draw_from_collection<C, R>(
    data: C,
    settings: &DrawSettings,
    defaults: &DrawDefaults,
    rng: &mut R,
) -> Vec<C::Item>
where
    C: IntoEntries,
    C::Item: Weighted + Clone,
    R: Rng + ?Sized,
{
    draw_entries(data.into_entries(), settings, defaults, rng)
        .into_iter()
        .map(|(_, item)| item)
        .collect()
}

/// Draw `(key, item)` entries.
///
/// - `uniform` / `weight`: `count` picks; with `unique` each picked entry is
///   removed from the candidates, so no key is returned twice.
/// - `chance`: `count` rounds, every remaining entry rolled against its own
///   chance each round; with `unique` an entry wins at most once.
///
/// Running out of candidates logs a warning and returns what was drawn.
pub fn draw_entries<T, R>(
    mut entries: Vec<(String, T)>,
    settings: &DrawSettings,
    defaults: &DrawDefaults,
    rng: &mut R,
) -> Vec<(String, T)>
where
    T: Weighted + Clone,
    R: Rng + ?Sized,
{
    let mut drawn = Vec::new();
    match settings.mode {
        DrawMode::Uniform | DrawMode::Weight => {
            for _ in 0..settings.count {
                let index = match settings.mode {
                    DrawMode::Weight => pick_weighted(
                        entries
                            .iter()
                            .map(|(_, item)| item.weight().unwrap_or(defaults.weight)),
                        rng,
                    ),
                    _ => pick_uniform(entries.len(), rng),
                };
                let Some(index) = index else {
                    tracing::warn!(
                        requested = settings.count,
                        drawn = drawn.len(),
                        mode = ?settings.mode,
                        "collection exhausted before draw completed"
                    );
                    break;
                };
                if settings.unique {
                    drawn.push(entries.remove(index));
                } else {
                    drawn.push(entries[index].clone());
                }
            }
        }
        DrawMode::Chance => {
            for _ in 0..settings.count {
                if entries.is_empty() {
                    break;
                }
                let mut i = 0;
                while i < entries.len() {
                    let chance = entries[i].1.chance().unwrap_or(defaults.chance);
                    if roll(chance, rng) {
                        if settings.unique {
                            drawn.push(entries.remove(i));
                            continue;
                        }
                        drawn.push(entries[i].clone());
                    }
                    i += 1;
                }
            }
        }
    }
    drawn
}

/// Uniform index in `0..len`, `None` when empty.
pub fn pick_uniform<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Option<usize> {
    (len > 0).then(|| rng.gen_range(0..len))
}

/// Weighted index. Negative weights count as zero; `None` when nothing has
/// positive weight.
pub fn pick_weighted<I, R>(weights: I, rng: &mut R) -> Option<usize>
where
    I: IntoIterator<Item = f64>,
    R: Rng + ?Sized,
{
    let weights: Vec<f64> = weights.into_iter().map(|w| w.max(0.0)).collect();
    let dist = WeightedIndex::new(&weights).ok()?;
    Some(dist.sample(rng))
}

/// Roll a percent chance.
pub fn roll<R: Rng + ?Sized>(chance: f64, rng: &mut R) -> bool {
    rng.gen_range(0.0..100.0) < chance
}
