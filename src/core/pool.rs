/// Pool draws: pick entity groups from a pool entry, filter the source
/// collection per group, then draw template keys from what is left.
use rand::Rng;
use rustc_hash::FxHashSet;
use serde_json::{Map, Value};

use crate::core::draw::{self, DrawDefaults, Weighted};
use crate::schema::pool::{
    DrawMode, DrawSettings, PoolDrawSettings, PoolEntityGroup, PoolEntry, PoolTables,
};
use crate::schema::state::GameState;

/// A pool entry given by id or directly.
#[derive(Debug, Clone, Copy)]
pub enum PoolRef<'a> {
    Id(&'a str),
    Entry(&'a PoolEntry),
}

impl<'a> From<&'a str> for PoolRef<'a> {
    fn from(id: &'a str) -> Self {
        PoolRef::Id(id)
    }
}

impl<'a> From<&'a String> for PoolRef<'a> {
    fn from(id: &'a String) -> Self {
        PoolRef::Id(id)
    }
}

impl<'a> From<&'a PoolEntry> for PoolRef<'a> {
    fn from(entry: &'a PoolEntry) -> Self {
        PoolRef::Entry(entry)
    }
}

/// Draw template keys from a pool. Missing pools, definitions or source
/// data are logged and yield nothing.
pub fn draw_from_pool<R: Rng + ?Sized>(
    tables: &PoolTables,
    state: &dyn GameState,
    pool: PoolRef<'_>,
    settings: &PoolDrawSettings,
    defaults: &DrawDefaults,
    rng: &mut R,
) -> Vec<String> {
    let entry = match pool {
        PoolRef::Entry(entry) => entry,
        PoolRef::Id(id) => match tables.entries.get(id) {
            Some(entry) => entry,
            None => {
                tracing::error!(pool = id, "unknown pool entry");
                return Vec::new();
            }
        },
    };
    let Some(definition) = tables.definitions.get(&entry.pool) else {
        tracing::error!(definition = %entry.pool, "unknown pool definition");
        return Vec::new();
    };
    let Some(source) = state.data(&definition.source) else {
        tracing::error!(source = %definition.source, "pool source data missing");
        return Vec::new();
    };

    let mut draw = PoolDraw {
        groups: &entry.entities,
        source,
        settings,
        defaults,
        drawn: Vec::new(),
    };
    match settings.mode {
        DrawMode::Weight | DrawMode::Uniform => draw.select_groups(rng),
        DrawMode::Chance => draw.roll_groups(rng),
    }
    tracing::debug!(pool = %entry.pool, drawn = draw.drawn.len(), "pool draw finished");
    draw.drawn
}

struct PoolDraw<'a> {
    groups: &'a [PoolEntityGroup],
    /// Owned copy of the source collection. Unique draws remove keys from it.
    source: Map<String, Value>,
    settings: &'a PoolDrawSettings,
    defaults: &'a DrawDefaults,
    drawn: Vec<String>,
}

impl PoolDraw<'_> {
    /// Weight / uniform mode. Each of the `draws` selections picks a group
    /// and keeps re-rolling among the other groups until one can supply its
    /// whole `count`. A group that fails stays excluded for the rest of the
    /// call: the source only shrinks, so it cannot succeed later.
    fn select_groups<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let groups = self.groups;
        let mut excluded: FxHashSet<usize> = FxHashSet::default();
        for _ in 0..self.settings.draws {
            loop {
                let remaining: Vec<usize> = (0..groups.len())
                    .filter(|i| !excluded.contains(i))
                    .collect();
                let picked = match self.settings.mode {
                    DrawMode::Uniform => draw::pick_uniform(remaining.len(), rng),
                    _ => draw::pick_weighted(
                        remaining.iter().map(|&i| {
                            groups[i].weight().unwrap_or(self.defaults.weight)
                        }),
                        rng,
                    ),
                };
                let Some(picked) = picked else {
                    tracing::warn!(
                        requested = self.settings.draws,
                        drawn = self.drawn.len(),
                        "no entity group can satisfy the draw"
                    );
                    return;
                };
                let index = remaining[picked];
                let group = &groups[index];
                let candidates = self.candidates(group);
                let need = group.count();
                if candidates.is_empty() || (self.settings.unique && candidates.len() < need) {
                    tracing::debug!(
                        group = %group.label(index),
                        available = candidates.len(),
                        need,
                        "entity group cannot satisfy count, re-rolling"
                    );
                    excluded.insert(index);
                    continue;
                }
                self.take(candidates, need, rng);
                break;
            }
        }
    }

    /// Chance mode. Every group is rolled independently each round; winners
    /// contribute their `count`. Shortfalls only warn.
    fn roll_groups<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let groups = self.groups;
        for _ in 0..self.settings.draws {
            for (index, group) in groups.iter().enumerate() {
                let chance = group.chance().unwrap_or(self.defaults.chance);
                if !draw::roll(chance, rng) {
                    continue;
                }
                let candidates = self.candidates(group);
                let need = group.count();
                if candidates.is_empty() || (self.settings.unique && candidates.len() < need) {
                    tracing::warn!(
                        group = %group.label(index),
                        available = candidates.len(),
                        need,
                        "not enough templates for chance draw"
                    );
                }
                self.take(candidates, need, rng);
            }
        }
    }

    /// Source keys accepted by the group's filters, in source order.
    fn candidates(&self, group: &PoolEntityGroup) -> Vec<String> {
        self.source
            .iter()
            .filter(|(_, template)| group.accepts(template))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn take<R: Rng + ?Sized>(&mut self, candidates: Vec<String>, need: usize, rng: &mut R) {
        let mut settings = DrawSettings::new(DrawMode::Uniform, need);
        settings.unique = self.settings.unique;
        let keys = draw::draw_from_collection(candidates, &settings, self.defaults, rng);
        if self.settings.unique {
            for key in &keys {
                self.source.remove(key);
            }
        }
        self.drawn.extend(keys);
    }
}
