use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use std::path::Path;

use super::content::{ContentError, ContentLine, ContentTable};

/// The game-side collaborator the engine reads and writes through.
///
/// Flag keys are either `flagName`, scoped to the current dungeon, or
/// `dungeonId.flagName`. A flag that was never set reads as `0`.
pub trait GameState {
    fn get_flag(&self, key: &str) -> f64;

    fn set_flag(&mut self, key: &str, value: f64);

    /// Look up a content line. `None` for the dungeon means the current one.
    fn line(&self, line_id: &str, dungeon_id: Option<&str>) -> Option<ContentLine>;

    /// A source collection for pool draws. Implementations must hand out an
    /// owned copy: the draw engine consumes entries in place.
    fn data(&self, source: &str) -> Option<Map<String, Value>>;
}

/// In-memory game state: flags, content lines and source collections.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub current_dungeon: Option<String>,
    flags: FxHashMap<String, f64>,
    content: ContentTable,
    data: FxHashMap<String, Map<String, Value>>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dungeon(mut self, dungeon_id: impl Into<String>) -> Self {
        self.current_dungeon = Some(dungeon_id.into());
        self
    }

    pub fn with_content(mut self, content: ContentTable) -> Self {
        self.content = content;
        self
    }

    pub fn content(&self) -> &ContentTable {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut ContentTable {
        &mut self.content
    }

    /// Load every `.ron` content file in a directory and merge it in,
    /// in file-name order so later mods override earlier ones.
    pub fn load_content_dir(&mut self, dir: &Path) -> Result<usize, ContentError> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("ron") {
                paths.push(path);
            }
        }
        paths.sort();
        for path in &paths {
            self.content.merge(ContentTable::load_from_ron(path)?);
        }
        Ok(paths.len())
    }

    pub fn insert_data(&mut self, source: impl Into<String>, collection: Map<String, Value>) {
        self.data.insert(source.into(), collection);
    }

    /// All flags, fully scoped, sorted by key.
    pub fn flags(&self) -> Vec<(&str, f64)> {
        let mut flags: Vec<(&str, f64)> = self
            .flags
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        flags.sort_by(|a, b| a.0.cmp(b.0));
        flags
    }

    pub fn clear_flags(&mut self) {
        self.flags.clear();
    }

    fn scoped_key(&self, key: &str) -> String {
        if key.contains('.') {
            return key.to_string();
        }
        match &self.current_dungeon {
            Some(dungeon) => format!("{}.{}", dungeon, key),
            None => key.to_string(),
        }
    }
}

impl GameState for WorldState {
    fn get_flag(&self, key: &str) -> f64 {
        self.flags
            .get(&self.scoped_key(key))
            .copied()
            .unwrap_or(0.0)
    }

    fn set_flag(&mut self, key: &str, value: f64) {
        let key = self.scoped_key(key);
        self.flags.insert(key, value);
    }

    fn line(&self, line_id: &str, dungeon_id: Option<&str>) -> Option<ContentLine> {
        let dungeon = dungeon_id.or(self.current_dungeon.as_deref())?;
        self.content.get(dungeon, line_id).cloned()
    }

    fn data(&self, source: &str) -> Option<Map<String, Value>> {
        self.data.get(source).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_flag_reads_zero() {
        let state = WorldState::new().with_dungeon("tavern");
        assert_eq!(state.get_flag("gold"), 0.0);
        assert_eq!(state.get_flag("crypt.keys"), 0.0);
    }

    #[test]
    fn flags_scope_to_current_dungeon() {
        let mut state = WorldState::new().with_dungeon("tavern");
        state.set_flag("gold", 12.0);
        state.set_flag("crypt.keys", 1.0);

        assert_eq!(state.get_flag("gold"), 12.0);
        assert_eq!(state.get_flag("tavern.gold"), 12.0);
        assert_eq!(state.get_flag("crypt.keys"), 1.0);
        assert_eq!(state.get_flag("keys"), 0.0);

        state.current_dungeon = Some("crypt".to_string());
        assert_eq!(state.get_flag("keys"), 1.0);
        assert_eq!(state.get_flag("gold"), 0.0);
    }

    #[test]
    fn unscoped_without_dungeon() {
        let mut state = WorldState::new();
        state.set_flag("gold", 3.0);
        assert_eq!(state.flags(), vec![("gold", 3.0)]);
    }

    #[test]
    fn line_lookup_defaults_to_current_dungeon() {
        let mut content = ContentTable::new();
        content.insert("tavern", ContentLine::new("greet", "Hello."));
        content.insert("crypt", ContentLine::new("greet", "Silence."));
        let state = WorldState::new().with_dungeon("tavern").with_content(content);

        assert_eq!(state.line("greet", None).unwrap().val, "Hello.");
        assert_eq!(state.line("greet", Some("crypt")).unwrap().val, "Silence.");
        assert!(state.line("missing", None).is_none());
    }

    #[test]
    fn data_returns_isolated_copy() {
        let mut state = WorldState::new();
        let mut items = Map::new();
        items.insert("sword".to_string(), json!({ "tier": 1 }));
        state.insert_data("items", items);

        let mut copy = state.data("items").unwrap();
        copy.remove("sword");

        assert!(state.data("items").unwrap().contains_key("sword"));
        assert!(state.data("monsters").is_none());
    }
}
