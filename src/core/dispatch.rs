/// Action dispatch: runs an actions map through the action registry.
use serde_json::{Map, Value};

use crate::core::registry::{ActionRecord, ActionRegistry};
use crate::schema::state::GameState;

/// Clause keys that travel with actions as metadata and are never run.
pub const CONDITION_KEYS: [&str; 4] = ["if", "ifOr", "active", "activeOr"];

pub fn is_condition_key(key: &str) -> bool {
    CONDITION_KEYS.contains(&key)
}

/// Dispatches actions maps against an action registry.
pub struct Dispatcher<'a> {
    actions: &'a ActionRegistry,
}

impl<'a> Dispatcher<'a> {
    pub fn new(actions: &'a ActionRegistry) -> Self {
        Self { actions }
    }

    /// Invoke the handler of every action id in `actions`. Array payloads
    /// invoke the handler once per element. Unregistered ids are logged and
    /// skipped; the remaining keys still run. With `skip_delayed`, actions
    /// flagged `event_delayed` are left for the scheduler.
    ///
    /// Returns the number of handler invocations.
    pub fn dispatch(
        &self,
        state: &mut dyn GameState,
        actions: &Map<String, Value>,
        skip_delayed: bool,
    ) -> usize {
        let mut invoked = 0;
        for (id, payload) in actions {
            if is_condition_key(id) {
                continue;
            }
            let Some(record) = self.actions.get(id) else {
                tracing::error!(action = %id, "unregistered action");
                continue;
            };
            if skip_delayed && record.event_delayed {
                tracing::debug!(action = %id, "delayed action deferred");
                continue;
            }
            let Some(handler) = &record.action else {
                continue;
            };
            match payload {
                Value::Array(items) => {
                    for item in items {
                        handler(&mut *state, item);
                        invoked += 1;
                    }
                }
                single => {
                    handler(&mut *state, single);
                    invoked += 1;
                }
            }
        }
        invoked
    }

    /// The subset of `actions` whose registered record is `event_delayed`.
    pub fn delayed_actions(&self, actions: &Map<String, Value>) -> Map<String, Value> {
        self.partition(actions, |record| record.event_delayed)
    }

    /// The subset of `actions` whose registered record is `on_game_load`.
    pub fn on_game_load_actions(&self, actions: &Map<String, Value>) -> Map<String, Value> {
        self.partition(actions, |record| record.on_game_load)
    }

    /// Let every registered choice modifier whose id appears in `actions`
    /// adjust `choice`.
    pub fn apply_choice_modifiers(
        &self,
        state: &dyn GameState,
        actions: &Map<String, Value>,
        choice: &mut Value,
    ) {
        for (id, payload) in actions {
            if let Some(modifier) = self
                .actions
                .get(id)
                .and_then(|record| record.choice_modifier.as_ref())
            {
                modifier(state, payload, choice);
            }
        }
    }

    fn partition<F>(&self, actions: &Map<String, Value>, keep: F) -> Map<String, Value>
    where
        F: Fn(&ActionRecord) -> bool,
    {
        actions
            .iter()
            .filter(|(id, _)| !is_condition_key(id))
            .filter(|(id, _)| self.actions.get(id).is_some_and(&keep))
            .map(|(id, payload)| (id.clone(), payload.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registries;
    use crate::schema::state::WorldState;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording(id: &str, log: &Rc<RefCell<Vec<String>>>) -> ActionRecord {
        let log = log.clone();
        let tag = id.to_string();
        ActionRecord::new(move |_, payload| log.borrow_mut().push(format!("{}:{}", tag, payload)))
    }

    fn setup() -> (Registries, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registries = Registries::new();
        registries.register_action("give", recording("give", &log));
        registries.register_action("later", recording("later", &log).delayed());
        registries.register_action("restore", recording("restore", &log).on_game_load());
        (registries, log)
    }

    fn actions(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn arrays_dispatch_per_element() {
        let (registries, log) = setup();
        let mut state = WorldState::new();
        let n = Dispatcher::new(&registries.actions).dispatch(
            &mut state,
            &actions(json!({ "give": ["sword", "shield"], "restore": 1 })),
            false,
        );
        assert_eq!(n, 3);
        assert_eq!(
            *log.borrow(),
            vec!["give:\"sword\"", "give:\"shield\"", "restore:1"]
        );
    }

    #[test]
    fn unknown_and_condition_keys_skipped() {
        let (registries, log) = setup();
        let mut state = WorldState::new();
        let n = Dispatcher::new(&registries.actions).dispatch(
            &mut state,
            &actions(json!({ "if": "gold > 1", "nope": 1, "give": "gem" })),
            false,
        );
        assert_eq!(n, 1);
        assert_eq!(*log.borrow(), vec!["give:\"gem\""]);
    }

    #[test]
    fn delayed_actions_skipped_on_request() {
        let (registries, log) = setup();
        let mut state = WorldState::new();
        let map = actions(json!({ "later": "x", "give": "y" }));
        let dispatcher = Dispatcher::new(&registries.actions);

        dispatcher.dispatch(&mut state, &map, true);
        assert_eq!(*log.borrow(), vec!["give:\"y\""]);

        dispatcher.dispatch(&mut state, &map, false);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn partition_helpers() {
        let (registries, _) = setup();
        let map = actions(json!({ "later": 1, "restore": 2, "give": 3, "ifOr": "x", "nope": 4 }));
        let dispatcher = Dispatcher::new(&registries.actions);

        let delayed = dispatcher.delayed_actions(&map);
        assert_eq!(delayed.keys().collect::<Vec<_>>(), vec!["later"]);

        let on_load = dispatcher.on_game_load_actions(&map);
        assert_eq!(on_load.keys().collect::<Vec<_>>(), vec!["restore"]);
    }

    #[test]
    fn choice_modifiers_adjust_choice() {
        let mut registries = Registries::new();
        registries.register_action(
            "price",
            ActionRecord::modifier(|_, payload, choice| {
                let label = choice["label"].as_str().unwrap_or("").to_string();
                choice["label"] = json!(format!("{} ({}g)", label, payload));
            }),
        );
        let mut state = WorldState::new();
        let map = actions(json!({ "price": 5 }));
        let dispatcher = Dispatcher::new(&registries.actions);

        // modifier-only records never execute
        assert_eq!(dispatcher.dispatch(&mut state, &map, false), 0);

        let mut choice = json!({ "label": "Buy ale" });
        dispatcher.apply_choice_modifiers(&state, &map, &mut choice);
        assert_eq!(choice["label"], json!("Buy ale (5g)"));
    }
}
