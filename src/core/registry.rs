/// Condition, action and placeholder registries: the extension points
/// host scripts and mods register into.
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::core::builtins;
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("condition id '{0}' must start with '_'")]
    InvalidConditionId(String),
}

/// A condition function: `_name(arg1, arg2)` in condition text. Arguments
/// arrive as raw strings; the returned value is compared against the
/// right-hand literal.
pub type ConditionFn = dyn Fn(&dyn GameState, &[String]) -> Value;

/// An action handler, invoked once per payload (or once per array element).
pub type ActionFn = dyn Fn(&mut dyn GameState, &Value);

/// Adjusts a choice object when its actions carry this action id.
pub type ChoiceModifierFn = dyn Fn(&dyn GameState, &Value, &mut Value);

/// A placeholder renderer for `|name|` / `|name(a, b)|`. `None` leaves the
/// placeholder text in place.
pub type PlaceholderFn = dyn Fn(&dyn GameState, &[String]) -> Option<String>;

/// A registered action: its handlers and scheduling flags.
#[derive(Default)]
pub struct ActionRecord {
    pub action: Option<Box<ActionFn>>,
    pub choice_modifier: Option<Box<ChoiceModifierFn>>,
    /// Replayed after a saved game is loaded.
    pub on_game_load: bool,
    /// Deferred to the event scheduler instead of running during resolution.
    pub event_delayed: bool,
}

impl ActionRecord {
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&mut dyn GameState, &Value) + 'static,
    {
        Self {
            action: Some(Box::new(action)),
            ..Self::default()
        }
    }

    /// A record that only modifies choices and never executes.
    pub fn modifier<F>(modifier: F) -> Self
    where
        F: Fn(&dyn GameState, &Value, &mut Value) + 'static,
    {
        Self {
            choice_modifier: Some(Box::new(modifier)),
            ..Self::default()
        }
    }

    pub fn with_choice_modifier<F>(mut self, modifier: F) -> Self
    where
        F: Fn(&dyn GameState, &Value, &mut Value) + 'static,
    {
        self.choice_modifier = Some(Box::new(modifier));
        self
    }

    pub fn delayed(mut self) -> Self {
        self.event_delayed = true;
        self
    }

    pub fn on_game_load(mut self) -> Self {
        self.on_game_load = true;
        self
    }
}

impl fmt::Debug for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRecord")
            .field("action", &self.action.is_some())
            .field("choice_modifier", &self.choice_modifier.is_some())
            .field("on_game_load", &self.on_game_load)
            .field("event_delayed", &self.event_delayed)
            .finish()
    }
}

/// A name → entry map where the last registration wins.
///
/// Replacing an entry is how mods override built-in behavior, so it is
/// logged on the `overwrite` target rather than rejected.
pub struct Registry<T> {
    kind: &'static str,
    entries: FxHashMap<String, T>,
}

impl<T> Registry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: FxHashMap::default(),
        }
    }

    /// Insert an entry, returning `true` if it replaced an existing one.
    pub fn insert(&mut self, id: &str, entry: T) -> bool {
        let replaced = self.entries.insert(id.to_string(), entry).is_some();
        if replaced {
            tracing::warn!(target: "overwrite", kind = self.kind, id, "registry entry replaced");
        } else {
            tracing::debug!(kind = self.kind, id, "registered");
        }
        replaced
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.entries.remove(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("ids", &self.ids())
            .finish()
    }
}

pub type ConditionRegistry = Registry<Box<ConditionFn>>;
pub type ActionRegistry = Registry<ActionRecord>;
pub type PlaceholderRegistry = Registry<Box<PlaceholderFn>>;

/// The three registries the resolver consults.
#[derive(Debug)]
pub struct Registries {
    pub conditions: ConditionRegistry,
    pub actions: ActionRegistry,
    pub placeholders: PlaceholderRegistry,
}

impl Default for Registries {
    fn default() -> Self {
        Self::new()
    }
}

impl Registries {
    /// Empty registries, no built-ins.
    pub fn new() -> Self {
        Self {
            conditions: Registry::new("condition"),
            actions: Registry::new("action"),
            placeholders: Registry::new("placeholder"),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registries = Self::new();
        builtins::install(&mut registries);
        registries
    }

    pub fn register_condition<F>(&mut self, id: &str, condition: F) -> Result<(), RegistryError>
    where
        F: Fn(&dyn GameState, &[String]) -> Value + 'static,
    {
        if !id.starts_with('_') || id.len() < 2 {
            return Err(RegistryError::InvalidConditionId(id.to_string()));
        }
        self.conditions.insert(id, Box::new(condition));
        Ok(())
    }

    pub fn register_action(&mut self, id: &str, record: ActionRecord) {
        self.actions.insert(id, record);
    }

    pub fn register_placeholder<F>(&mut self, id: &str, placeholder: F)
    where
        F: Fn(&dyn GameState, &[String]) -> Option<String> + 'static,
    {
        self.placeholders.insert(id, Box::new(placeholder));
    }

    /// Clear everything; re-install built-ins when asked. Called at
    /// new-game boundaries.
    pub fn reset(&mut self, builtins: bool) {
        self.conditions.clear();
        self.actions.clear();
        self.placeholders.clear();
        if builtins {
            builtins::install(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::state::WorldState;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn condition_ids_need_underscore() {
        let mut registries = Registries::new();
        assert!(registries
            .register_condition("_always", |_, _| json!(true))
            .is_ok());
        assert!(matches!(
            registries.register_condition("always", |_, _| json!(true)),
            Err(RegistryError::InvalidConditionId(_))
        ));
        assert!(registries.register_condition("_", |_, _| json!(true)).is_err());
        assert_eq!(registries.conditions.ids(), vec!["_always"]);
    }

    #[test]
    fn reregistering_overwrites() {
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        let mut registries = Registries::new();

        let f = first.clone();
        registries.register_action("ring", ActionRecord::new(move |_, _| f.set(f.get() + 1)));
        let s = second.clone();
        registries.register_action("ring", ActionRecord::new(move |_, _| s.set(s.get() + 1)));

        assert_eq!(registries.actions.len(), 1);
        let mut state = WorldState::new();
        let record = registries.actions.get("ring").unwrap();
        (record.action.as_ref().unwrap())(&mut state, &Value::Null);

        assert_eq!(first.get(), 0);
        assert_eq!(second.get(), 1);
    }

    #[test]
    fn insert_reports_replacement() {
        let mut registry: Registry<u32> = Registry::new("test");
        assert!(!registry.insert("a", 1));
        assert!(registry.insert("a", 2));
        assert_eq!(registry.get("a"), Some(&2));
    }

    #[test]
    fn action_record_flags() {
        let record = ActionRecord::new(|_, _| {}).delayed().on_game_load();
        assert!(record.event_delayed);
        assert!(record.on_game_load);
        assert!(record.action.is_some());
        assert!(record.choice_modifier.is_none());

        let modifier = ActionRecord::modifier(|_, _, _| {});
        assert!(modifier.action.is_none());
        assert!(modifier.choice_modifier.is_some());
    }

    #[test]
    fn reset_reinstalls_builtins() {
        let mut registries = Registries::with_builtins();
        registries.register_placeholder("custom", |_, _| Some("x".to_string()));
        assert!(registries.placeholders.contains("custom"));

        registries.reset(true);
        assert!(!registries.placeholders.contains("custom"));
        assert!(registries.actions.contains("flag"));

        registries.reset(false);
        assert!(registries.actions.is_empty());
        assert!(registries.conditions.is_empty());
    }
}
