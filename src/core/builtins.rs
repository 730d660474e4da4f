/// Built-in conditions, actions and placeholders installed on every fresh
/// registry. Mods may override any of them by registering the same id.
use serde_json::{json, Value};

use crate::core::registry::{ActionRecord, Registries};
use crate::schema::state::GameState;

pub fn install(registries: &mut Registries) {
    let conditions = &mut registries.conditions;
    conditions.insert(
        "_flag",
        Box::new(|state: &dyn GameState, args: &[String]| {
            json!(args.first().map_or(0.0, |key| state.get_flag(key)))
        }),
    );
    conditions.insert(
        "_not",
        Box::new(|state: &dyn GameState, args: &[String]| {
            json!(args.first().map_or(true, |key| state.get_flag(key) == 0.0))
        }),
    );
    conditions.insert(
        "_gt",
        Box::new(|_: &dyn GameState, args: &[String]| {
            let a = args.first().and_then(|s| s.trim().parse::<f64>().ok());
            let b = args.get(1).and_then(|s| s.trim().parse::<f64>().ok());
            json!(matches!((a, b), (Some(a), Some(b)) if a > b))
        }),
    );

    registries.register_action("flag", ActionRecord::new(apply_flag));
    registries.register_action(
        "log",
        ActionRecord::new(|_, payload| tracing::info!(%payload, "content log")),
    );

    registries.register_placeholder("flag", |state, args| {
        let key = args.first()?;
        Some(format_number(state.get_flag(key)))
    });
}

/// `flag` action: `{ "gold": 5 }` assigns, `"gold+=5"` / `"gold-=5"` /
/// `"gold=5"` update a single flag.
fn apply_flag(state: &mut dyn GameState, payload: &Value) {
    match payload {
        Value::Object(map) => {
            for (key, value) in map {
                match value.as_f64().or_else(|| value.as_bool().map(|b| f64::from(u8::from(b)))) {
                    Some(n) => state.set_flag(key, n),
                    None => tracing::error!(key = %key, %value, "flag value is not a number"),
                }
            }
        }
        Value::String(expr) => {
            if apply_flag_expr(state, expr).is_none() {
                tracing::error!(expr, "malformed flag expression");
            }
        }
        other => tracing::error!(payload = %other, "unsupported flag payload"),
    }
}

fn apply_flag_expr(state: &mut dyn GameState, expr: &str) -> Option<()> {
    let (key, op, raw) = if let Some((key, raw)) = expr.split_once("+=") {
        (key, '+', raw)
    } else if let Some((key, raw)) = expr.split_once("-=") {
        (key, '-', raw)
    } else {
        let (key, raw) = expr.split_once('=')?;
        (key, '=', raw)
    };
    let key = key.trim();
    let amount: f64 = raw.trim().parse().ok()?;
    if key.is_empty() {
        return None;
    }
    let current = state.get_flag(key);
    let next = match op {
        '+' => current + amount,
        '-' => current - amount,
        _ => amount,
    };
    state.set_flag(key, next);
    Some(())
}

/// Format a flag for display: whole numbers without a trailing `.0`.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::Evaluator;
    use crate::schema::state::WorldState;

    fn run_flag(state: &mut WorldState, payload: Value) {
        let registries = Registries::with_builtins();
        let record = registries.actions.get("flag").unwrap();
        (record.action.as_ref().unwrap())(state, &payload);
    }

    #[test]
    fn flag_object_assigns() {
        let mut state = WorldState::new();
        run_flag(&mut state, json!({ "gold": 5, "door": true }));
        assert_eq!(state.get_flag("gold"), 5.0);
        assert_eq!(state.get_flag("door"), 1.0);
    }

    #[test]
    fn flag_expressions() {
        let mut state = WorldState::new();
        run_flag(&mut state, json!("gold=5"));
        run_flag(&mut state, json!("gold += 3"));
        run_flag(&mut state, json!("gold-=1"));
        assert_eq!(state.get_flag("gold"), 7.0);

        run_flag(&mut state, json!("gold>10"));
        assert_eq!(state.get_flag("gold"), 7.0);
    }

    #[test]
    fn builtin_conditions() {
        let registries = Registries::with_builtins();
        let mut state = WorldState::new();
        state.set_flag("keys", 2.0);
        let ev = Evaluator::new(&registries.conditions, &state);
        assert!(ev.evaluate_single("_flag(keys) = 2").unwrap());
        assert!(ev.evaluate_single("_not(torch) = true").unwrap());
        assert!(ev.evaluate_single("_gt(5, 3) = true").unwrap());
        assert!(!ev.evaluate_single("_gt(3, 5)").unwrap());
    }

    #[test]
    fn builtin_condition_ids_are_registrable() {
        let registries = Registries::with_builtins();
        assert_eq!(registries.conditions.ids(), vec!["_flag", "_gt", "_not"]);

        // the same ids go through the checked path when a mod overrides them
        let mut fresh = Registries::new();
        for id in registries.conditions.ids() {
            fresh.register_condition(id, |_, _| json!(true)).unwrap();
        }
        assert_eq!(fresh.conditions.len(), 3);
    }

    #[test]
    fn flag_placeholder_formats() {
        let registries = Registries::with_builtins();
        let mut state = WorldState::new();
        state.set_flag("gold", 12.0);
        state.set_flag("ratio", 0.5);
        let render = registries.placeholders.get("flag").unwrap();
        assert_eq!(render(&state, &["gold".to_string()]).as_deref(), Some("12"));
        assert_eq!(render(&state, &["ratio".to_string()]).as_deref(), Some("0.5"));
        assert_eq!(render(&state, &[]), None);
    }
}
