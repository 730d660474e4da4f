use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// A single line of authored content, already tokenized by the upstream
/// content compiler. `val` is the raw directive text fed to the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentLine {
    pub id: String,
    pub val: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl ContentLine {
    pub fn new(id: impl Into<String>, val: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            val: val.into(),
            params: None,
            anchor: None,
        }
    }
}

/// Content lines keyed by dungeon id, then by line id.
///
/// Read-only during play. Loaded from merged mod data where later
/// sources replace lines with the same dungeon and line id.
#[derive(Debug, Clone, Default)]
pub struct ContentTable {
    dungeons: HashMap<String, HashMap<String, ContentLine>>,
}

impl ContentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a content table from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<ContentTable, ContentError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a content table from a RON string of the shape
    /// `{ "dungeon": [ (id: "...", val: "..."), ... ] }`.
    pub fn parse_ron(input: &str) -> Result<ContentTable, ContentError> {
        let raw: HashMap<String, Vec<ContentLine>> = ron::from_str(input)?;
        let mut table = ContentTable::new();
        for (dungeon_id, lines) in raw {
            for line in lines {
                table.insert(&dungeon_id, line);
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, dungeon_id: &str, line: ContentLine) {
        self.dungeons
            .entry(dungeon_id.to_string())
            .or_default()
            .insert(line.id.clone(), line);
    }

    pub fn get(&self, dungeon_id: &str, line_id: &str) -> Option<&ContentLine> {
        self.dungeons.get(dungeon_id)?.get(line_id)
    }

    /// Merge another table into this one. Lines from `other` override
    /// lines in `self` with the same dungeon and line id.
    pub fn merge(&mut self, other: ContentTable) {
        for (dungeon_id, lines) in other.dungeons {
            let target = self.dungeons.entry(dungeon_id).or_default();
            for (id, line) in lines {
                target.insert(id, line);
            }
        }
    }

    pub fn dungeon_ids(&self) -> impl Iterator<Item = &str> {
        self.dungeons.keys().map(String::as_str)
    }

    pub fn lines(&self, dungeon_id: &str) -> impl Iterator<Item = &ContentLine> {
        self.dungeons.get(dungeon_id).into_iter().flat_map(|m| m.values())
    }

    pub fn len(&self) -> usize {
        self.dungeons.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
