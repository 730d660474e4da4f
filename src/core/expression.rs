/// Condition expressions: `key op value` comparisons and comma-separated
/// AND/OR lists over flags and registered condition functions.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::core::registry::ConditionRegistry;
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum ExpressionError {
    /// Referencing a condition function nobody registered is an authoring
    /// error and is surfaced to the caller instead of degrading to `false`.
    #[error("unregistered condition function '{0}'")]
    UnknownCondition(String),
}

/// How a comma-separated condition list combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClauseMode {
    /// `if` / `active`: every comparison must pass.
    All,
    /// `ifOr` / `activeOr`: at least one must pass.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl Operator {
    fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Ge | Self::Le)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        };
        f.write_str(symbol)
    }
}

/// A loosely typed comparison operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Operand {
    /// Right-hand literals parse as boolean, then number, then string.
    pub fn parse_literal(raw: &str) -> Self {
        let raw = raw.trim();
        match raw {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(n) = raw.parse::<f64>() {
            return Self::Number(n);
        }
        Self::Text(strip_quotes(raw).to_string())
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Numeric coercion: booleans are 0/1, blank text is 0, other text
    /// parses or becomes NaN.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    /// Loose equality: text against text compares exactly, null only equals
    /// null, everything else compares numerically.
    pub fn loose_eq(&self, other: &Operand) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            _ => self.to_number() == other.to_number(),
        }
    }
}

/// The left-hand side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Subject {
    Flag(String),
    Call { name: String, args: Vec<String> },
}

/// A parsed `key op value` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub subject: Subject,
    pub op: Operator,
    pub literal: Operand,
}

impl Comparison {
    /// Parse a single comparison. A bare key with no operator tests for a
    /// truthy value (`key != false`). Returns `None` for malformed input.
    pub fn parse(expr: &str) -> Option<Comparison> {
        let expr = expr.trim();
        if expr.is_empty() {
            return None;
        }
        let Some((at, op, width)) = find_operator(expr) else {
            return Some(Comparison {
                subject: parse_subject(expr)?,
                op: Operator::Ne,
                literal: Operand::Bool(false),
            });
        };
        let key = expr[..at].trim();
        let value = expr[at + width..].trim();
        if key.is_empty() || value.is_empty() {
            return None;
        }
        Some(Comparison {
            subject: parse_subject(key)?,
            op,
            literal: Operand::parse_literal(value),
        })
    }
}

/// Locate the first comparison operator outside parentheses and quotes.
fn find_operator(expr: &str) -> Option<(usize, Operator, usize)> {
    let bytes = expr.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        let next = bytes.get(i + 1).copied();
        match b {
            b'"' | b'\'' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            b'!' if next == Some(b'=') => return Some((i, Operator::Ne, 2)),
            b'=' if next == Some(b'=') => return Some((i, Operator::Eq, 2)),
            b'=' => return Some((i, Operator::Eq, 1)),
            b'>' if next == Some(b'=') => return Some((i, Operator::Ge, 2)),
            b'>' => return Some((i, Operator::Gt, 1)),
            b'<' if next == Some(b'=') => return Some((i, Operator::Le, 2)),
            b'<' => return Some((i, Operator::Lt, 1)),
            _ => {}
        }
    }
    None
}

fn parse_subject(key: &str) -> Option<Subject> {
    if !key.starts_with('_') {
        return Some(Subject::Flag(key.to_string()));
    }
    let (name, args) = parse_call(key)?;
    Some(Subject::Call { name, args })
}

/// Parse `name` or `name(arg1, arg2)` into the name and its raw string
/// arguments (trimmed, surrounding quotes removed).
pub fn parse_call(text: &str) -> Option<(String, Vec<String>)> {
    let text = text.trim();
    let Some(open) = text.find('(') else {
        return is_name(text).then(|| (text.to_string(), Vec::new()));
    };
    if !text.ends_with(')') {
        return None;
    }
    let name = text[..open].trim_end();
    if !is_name(name) {
        return None;
    }
    let inner = &text[open + 1..text.len() - 1];
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        split_top_level(inner, ',')
            .into_iter()
            .map(|a| strip_quotes(a.trim()).to_string())
            .collect()
    };
    Some((name.to_string(), args))
}

fn is_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn strip_quotes(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Split on `separator` while respecting parenthesis depth and quotes, so
/// `_has(a, b), gold > 3` yields two parts.
pub fn split_top_level(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

/// Evaluates condition text against the game state and the registered
/// condition functions.
pub struct Evaluator<'a> {
    conditions: &'a ConditionRegistry,
    state: &'a dyn GameState,
}

impl<'a> Evaluator<'a> {
    pub fn new(conditions: &'a ConditionRegistry, state: &'a dyn GameState) -> Self {
        Self { conditions, state }
    }

    /// Evaluate one `key op value` comparison. Malformed syntax and ordering
    /// against a string literal log an error and yield `false`.
    pub fn evaluate_single(&self, expr: &str) -> Result<bool, ExpressionError> {
        let Some(comparison) = Comparison::parse(expr) else {
            tracing::error!(expr, "malformed condition");
            return Ok(false);
        };
        self.evaluate_comparison(&comparison, expr)
    }

    /// Evaluate a comma-separated list. An empty list passes.
    pub fn evaluate_list(&self, expr: &str, mode: ClauseMode) -> Result<bool, ExpressionError> {
        let parts: Vec<&str> = split_top_level(expr, ',')
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            return Ok(true);
        }
        for part in parts {
            let passed = self.evaluate_single(part)?;
            match mode {
                ClauseMode::All if !passed => return Ok(false),
                ClauseMode::Any if passed => return Ok(true),
                _ => {}
            }
        }
        Ok(mode == ClauseMode::All)
    }

    fn evaluate_comparison(&self, cmp: &Comparison, expr: &str) -> Result<bool, ExpressionError> {
        let actual = match &cmp.subject {
            Subject::Flag(key) => Operand::Number(self.state.get_flag(key)),
            Subject::Call { name, args } => {
                let condition = self
                    .conditions
                    .get(name)
                    .ok_or_else(|| ExpressionError::UnknownCondition(name.clone()))?;
                Operand::from_json(&condition(self.state, args.as_slice()))
            }
        };

        if cmp.op.is_ordering() {
            if let Operand::Text(_) = cmp.literal {
                tracing::error!(expr, op = %cmp.op, "ordering comparison against a string");
                return Ok(false);
            }
        }

        let lhs = actual.to_number();
        let rhs = cmp.literal.to_number();
        let result = match cmp.op {
            Operator::Eq => actual.loose_eq(&cmp.literal),
            Operator::Ne => !actual.loose_eq(&cmp.literal),
            Operator::Gt => lhs > rhs,
            Operator::Lt => lhs < rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Le => lhs <= rhs,
        };
        tracing::trace!(expr, result, "condition evaluated");
        Ok(result)
    }
}

/// Visibility (`if`/`ifOr`) and enablement (`active`/`activeOr`) clauses
/// attached to a choice or directive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionParams {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_all: Option<String>,
    #[serde(rename = "ifOr", default, skip_serializing_if = "Option::is_none")]
    pub if_any: Option<String>,
    #[serde(rename = "active", default, skip_serializing_if = "Option::is_none")]
    pub active_all: Option<String>,
    #[serde(rename = "activeOr", default, skip_serializing_if = "Option::is_none")]
    pub active_any: Option<String>,
}

impl ConditionParams {
    /// Pull the four clause keys out of a params or actions map. Array
    /// values are joined into one comma-separated list.
    pub fn from_map(map: &Map<String, Value>) -> Self {
        let clause = |key: &str| -> Option<String> {
            match map.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Array(items) => Some(
                    items
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                Value::Null => None,
                other => Some(other.to_string()),
            }
        };
        Self {
            if_all: clause("if"),
            if_any: clause("ifOr"),
            active_all: clause("active"),
            active_any: clause("activeOr"),
        }
    }

    /// Both clauses of the selected pair must pass independently: the
    /// AND-list and the OR-list are combined with AND. A missing clause
    /// passes.
    pub fn evaluate(
        &self,
        evaluator: &Evaluator<'_>,
        is_active_clause: bool,
    ) -> Result<bool, ExpressionError> {
        let (all, any) = if is_active_clause {
            (&self.active_all, &self.active_any)
        } else {
            (&self.if_all, &self.if_any)
        };
        if let Some(all) = all {
            if !evaluator.evaluate_list(all, ClauseMode::All)? {
                return Ok(false);
            }
        }
        if let Some(any) = any {
            if !evaluator.evaluate_list(any, ClauseMode::Any)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registries;
    use crate::schema::state::WorldState;
    use serde_json::json;

    fn registries() -> Registries {
        let mut r = Registries::new();
        r.register_condition("_gt", |_, args: &[String]| {
            let a: f64 = args.first().and_then(|s| s.parse().ok()).unwrap_or(f64::NAN);
            let b: f64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(f64::NAN);
            json!(a > b)
        })
        .unwrap();
        r.register_condition("_name", |_, _| json!("Mira")).unwrap();
        r.register_condition("_argc", |_, args: &[String]| json!(args.len()))
            .unwrap();
        r
    }

    #[test]
    fn parse_comparisons() {
        let c = Comparison::parse("gold >= 10").unwrap();
        assert_eq!(c.subject, Subject::Flag("gold".to_string()));
        assert_eq!(c.op, Operator::Ge);
        assert_eq!(c.literal, Operand::Number(10.0));

        let c = Comparison::parse("_gt(5, 3) = true").unwrap();
        assert_eq!(
            c.subject,
            Subject::Call {
                name: "_gt".to_string(),
                args: vec!["5".to_string(), "3".to_string()]
            }
        );
        assert_eq!(c.op, Operator::Eq);
        assert_eq!(c.literal, Operand::Bool(true));

        let c = Comparison::parse("tavern.door != open").unwrap();
        assert_eq!(c.subject, Subject::Flag("tavern.door".to_string()));
        assert_eq!(c.literal, Operand::Text("open".to_string()));
    }

    #[test]
    fn operator_inside_call_args_is_ignored() {
        let c = Comparison::parse("_cmp(a>b, 'x=y') == 1").unwrap();
        assert_eq!(
            c.subject,
            Subject::Call {
                name: "_cmp".to_string(),
                args: vec!["a>b".to_string(), "x=y".to_string()]
            }
        );
        assert_eq!(c.op, Operator::Eq);
    }

    #[test]
    fn malformed_comparisons() {
        assert!(Comparison::parse("").is_none());
        assert!(Comparison::parse("gold >").is_none());
        assert!(Comparison::parse("= 3").is_none());
        assert!(Comparison::parse("_bad(x").is_none());
    }

    #[test]
    fn split_respects_parens() {
        assert_eq!(
            split_top_level("_gt(5,3) = true, gold > 10", ','),
            vec!["_gt(5,3) = true", " gold > 10"]
        );
        assert_eq!(split_top_level("a, 'b,c'", ','), vec!["a", " 'b,c'"]);
    }

    #[test]
    fn evaluate_list_with_function_and_flag() {
        let r = registries();
        let mut state = WorldState::new();
        state.set_flag("gold", 20.0);
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(ev
            .evaluate_list("_gt(5,3) = true, gold > 10", ClauseMode::All)
            .unwrap());

        state.set_flag("gold", 5.0);
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(!ev
            .evaluate_list("_gt(5,3) = true, gold > 10", ClauseMode::All)
            .unwrap());
        assert!(ev
            .evaluate_list("_gt(5,3) = true, gold > 10", ClauseMode::Any)
            .unwrap());
        assert!(!ev
            .evaluate_list("_gt(1,3) = true, gold > 10", ClauseMode::Any)
            .unwrap());
    }

    #[test]
    fn missing_flag_is_zero() {
        let r = registries();
        let state = WorldState::new();
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(ev.evaluate_single("visits = 0").unwrap());
        assert!(ev.evaluate_single("visits == false").unwrap());
        assert!(!ev.evaluate_single("visits").unwrap());
    }

    #[test]
    fn missing_condition_function_errors() {
        let r = registries();
        let state = WorldState::new();
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(matches!(
            ev.evaluate_single("_nope = true"),
            Err(ExpressionError::UnknownCondition(name)) if name == "_nope"
        ));
    }

    #[test]
    fn ordering_on_string_fails_closed() {
        let r = registries();
        let state = WorldState::new();
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(!ev.evaluate_single("gold > lots").unwrap());
        assert!(!ev.evaluate_single("gold <= lots").unwrap());
        assert!(ev.evaluate_single("gold != lots").unwrap());
    }

    #[test]
    fn loose_equality() {
        let r = registries();
        let state = WorldState::new();
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(ev.evaluate_single("_name = Mira").unwrap());
        assert!(ev.evaluate_single("_name == \"Mira\"").unwrap());
        assert!(!ev.evaluate_single("_name = 0").unwrap());
        assert!(ev.evaluate_single("_argc(a, b) = 2").unwrap());
        assert!(ev.evaluate_single("_argc = 0").unwrap());
        assert!(ev.evaluate_single("_argc() == false").unwrap());

        assert!(Operand::Bool(true).loose_eq(&Operand::Number(1.0)));
        assert!(Operand::Text("2".into()).loose_eq(&Operand::Number(2.0)));
        assert!(!Operand::Null.loose_eq(&Operand::Number(0.0)));
    }

    #[test]
    fn empty_list_passes() {
        let r = registries();
        let state = WorldState::new();
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(ev.evaluate_list("", ClauseMode::All).unwrap());
        assert!(ev.evaluate_list("  ", ClauseMode::Any).unwrap());
    }

    #[test]
    fn combined_if_and_if_or_both_required() {
        let r = registries();
        let mut state = WorldState::new();
        state.set_flag("gold", 20.0);
        let ev = Evaluator::new(&r.conditions, &state);

        let params = ConditionParams {
            if_all: Some("gold > 10".to_string()),
            if_any: Some("keys > 0, torch = 1".to_string()),
            ..ConditionParams::default()
        };
        assert!(!params.evaluate(&ev, false).unwrap());

        state.set_flag("torch", 1.0);
        let ev = Evaluator::new(&r.conditions, &state);
        assert!(params.evaluate(&ev, false).unwrap());
        // active clauses are absent, so the choice is enabled
        assert!(params.evaluate(&ev, true).unwrap());
    }

    #[test]
    fn params_from_map() {
        let map = json!({ "if": ["gold > 1", "keys = 2"], "activeOr": "torch", "give": 3 });
        let params = ConditionParams::from_map(map.as_object().unwrap());
        assert_eq!(params.if_all.as_deref(), Some("gold > 1, keys = 2"));
        assert_eq!(params.active_any.as_deref(), Some("torch"));
        assert!(params.if_any.is_none());
    }
}
