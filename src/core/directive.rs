/// The directive resolver: turns a raw content string into display text,
/// an actions map and an optional speaker.
///
/// Passes run in a fixed order, each consuming the previous one's output:
/// `[code]` escaping, `|placeholder|` substitution, inline control flow,
/// `|$template|` expansion, `{...}` action extraction, speaker extraction,
/// then `*` / `**` styling.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::config::EngineConfig;
use crate::core::control_flow::{matching_brace, resolve_inline_conditionals};
use crate::core::dispatch::Dispatcher;
use crate::core::expression::{parse_call, Evaluator, ExpressionError};
use crate::core::loose_json;
use crate::core::registry::Registries;
use crate::schema::state::GameState;

#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// The result of resolving one content string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub output: String,
    pub actions: Map<String, Value>,
    /// The talking character id split off a leading `id: ` prefix.
    pub speaker: Option<String>,
    /// A `redirect` block short-circuited resolution. `actions` is exactly
    /// that block and `output` is empty.
    pub redirected: bool,
}

impl Resolution {
    fn redirect(block: Map<String, Value>) -> Self {
        Self {
            output: String::new(),
            actions: block,
            speaker: None,
            redirected: true,
        }
    }
}

/// Output of passes 1–5, shared by top-level and nested template resolution.
struct Fragment {
    text: String,
    actions: Map<String, Value>,
}

enum Step {
    Continue(Fragment),
    Redirect(Map<String, Value>),
}

pub struct Resolver<'a> {
    registries: &'a Registries,
    config: &'a EngineConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(registries: &'a Registries, config: &'a EngineConfig) -> Self {
        Self { registries, config }
    }

    /// Resolve `input`. Unless `skip_actions`, extracted non-delayed actions
    /// are dispatched as soon as their block is parsed.
    ///
    /// Only an unregistered condition function is returned as an error;
    /// everything else is logged and recovered.
    pub fn resolve(
        &self,
        state: &mut dyn GameState,
        input: &str,
        skip_actions: bool,
    ) -> Result<Resolution, DirectiveError> {
        let fragment = match self.resolve_fragment(state, input, skip_actions, 0)? {
            Step::Continue(fragment) => fragment,
            Step::Redirect(block) => return Ok(Resolution::redirect(block)),
        };
        let (speaker, body) = split_speaker(fragment.text.trim());
        Ok(Resolution {
            output: apply_styling(body).trim().to_string(),
            actions: fragment.actions,
            speaker,
            redirected: false,
        })
    }

    fn resolve_fragment(
        &self,
        state: &mut dyn GameState,
        input: &str,
        skip_actions: bool,
        depth: usize,
    ) -> Result<Step, DirectiveError> {
        let text = escape_code_blocks(input, &self.config.code_class);
        let text = self.substitute_placeholders(&*state, &text);
        let text = {
            let evaluator = Evaluator::new(&self.registries.conditions, &*state);
            resolve_inline_conditionals(&text, &evaluator)?
        };
        let mut nested_actions = Map::new();
        let expanded =
            self.expand_templates(state, &text, skip_actions, depth, &mut nested_actions)?;
        let text = match expanded {
            Step::Continue(fragment) => fragment.text,
            redirect => return Ok(redirect),
        };
        match self.extract_actions(state, &text, skip_actions)? {
            Step::Continue(mut fragment) => {
                // the outer text's own blocks win over what templates produced
                for (key, value) in std::mem::take(&mut fragment.actions) {
                    nested_actions.insert(key, value);
                }
                fragment.actions = nested_actions;
                Ok(Step::Continue(fragment))
            }
            redirect => Ok(redirect),
        }
    }

    /// Replace `|name|` and `|name(a, b)|` through the placeholder registry.
    /// `|$...|` is left for template expansion. Unknown or unrenderable
    /// placeholders stay as literal text.
    fn substitute_placeholders(&self, state: &dyn GameState, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find('|') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('|') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let inner = &after[..close];
            if inner.starts_with('$') {
                out.push_str(&rest[open..open + close + 2]);
                rest = &after[close + 1..];
                continue;
            }
            // placeholder names hug both pipes
            let call = if inner.trim() == inner { parse_call(inner) } else { None };
            let Some((name, args)) = call else {
                // not a placeholder; the closing pipe may open the next one
                out.push('|');
                rest = after;
                continue;
            };
            match self.registries.placeholders.get(&name) {
                Some(render) => match render(state, &args) {
                    Some(value) => out.push_str(&value),
                    None => {
                        tracing::warn!(placeholder = %name, "placeholder could not be rendered");
                        out.push_str(&rest[open..open + close + 2]);
                    }
                },
                None => {
                    tracing::warn!(placeholder = %name, "unregistered placeholder");
                    out.push_str(&rest[open..open + close + 2]);
                }
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }

    /// Expand `|$template|` and `|$dungeon.$template|` by resolving the named
    /// line through passes 1–5. Nested actions are collected into `actions`;
    /// a nested redirect redirects the whole resolution.
    fn expand_templates(
        &self,
        state: &mut dyn GameState,
        text: &str,
        skip_actions: bool,
        depth: usize,
        actions: &mut Map<String, Value>,
    ) -> Result<Step, DirectiveError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(open) = rest.find("|$") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let Some(close) = after.find('|') else {
                out.push_str(&rest[open..]);
                rest = "";
                break;
            };
            let reference = &after[..close];
            rest = &after[close + 1..];

            let (dungeon, line_id) = match reference.split_once(".$") {
                Some((dungeon, line_id)) => (Some(dungeon), line_id),
                None => (None, reference),
            };
            if depth >= self.config.max_template_depth {
                tracing::error!(
                    template = reference,
                    depth,
                    "template nesting too deep, dropping expansion"
                );
                continue;
            }
            let Some(line) = state.line(line_id, dungeon) else {
                tracing::error!(template = reference, "template line not found");
                continue;
            };
            match self.resolve_fragment(state, &line.val, skip_actions, depth + 1)? {
                Step::Continue(fragment) => {
                    out.push_str(&fragment.text);
                    for (key, value) in fragment.actions {
                        actions.insert(key, value);
                    }
                }
                redirect => return Ok(redirect),
            }
        }
        out.push_str(rest);
        Ok(Step::Continue(Fragment {
            text: out,
            actions: Map::new(),
        }))
    }

    /// Pull every top-level `{...}` block out of the text. Blocks are parsed
    /// as loose JSON and shallow-merged, later keys overwriting earlier ones.
    /// A block with a `redirect` key stops resolution before it is
    /// dispatched. Malformed blocks are dropped.
    fn extract_actions(
        &self,
        state: &mut dyn GameState,
        text: &str,
        skip_actions: bool,
    ) -> Result<Step, DirectiveError> {
        let dispatcher = Dispatcher::new(&self.registries.actions);
        let mut out = String::with_capacity(text.len());
        let mut actions = Map::new();
        let mut cursor = 0;

        while let Some(offset) = text[cursor..].find('{') {
            let open = cursor + offset;
            out.push_str(&text[cursor..open]);
            let Some(close) = matching_brace(text, open) else {
                tracing::error!(fragment = &text[open..], "unterminated directive block dropped");
                cursor = text.len();
                break;
            };
            let block = &text[open..=close];
            cursor = close + 1;

            let parsed = match loose_json::parse_object(block) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::error!(block, error = %e, "malformed directive dropped");
                    continue;
                }
            };
            if parsed.contains_key("redirect") {
                tracing::debug!(redirect = %parsed["redirect"], "directive redirect");
                return Ok(Step::Redirect(parsed));
            }
            if !skip_actions {
                dispatcher.dispatch(state, &parsed, true);
            }
            actions.extend(parsed);
        }
        out.push_str(&text[cursor..]);

        Ok(Step::Continue(Fragment { text: out, actions }))
    }
}

const CODE_OPEN: &str = "[code]";
const CODE_CLOSE: &str = "[/code]";

/// Escape the content of `[code]...[/code]` blocks so later passes leave it
/// alone, and wrap it in a styled span. An unclosed block is left as is.
pub fn escape_code_blocks(text: &str, class: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(CODE_OPEN) {
        let body_start = open + CODE_OPEN.len();
        let Some(len) = rest[body_start..].find(CODE_CLOSE) else {
            tracing::warn!("unclosed [code] block");
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str("<span class=\"");
        out.push_str(class);
        out.push_str("\">");
        for c in rest[body_start..body_start + len].chars() {
            match c {
                '&' | '<' | '>' | '"' | '\'' | '{' | '}' | '|' | '*' => {
                    out.push_str(&format!("&#{};", c as u32));
                }
                c => out.push(c),
            }
        }
        out.push_str("</span>");
        rest = &rest[body_start + len + CODE_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

/// Split a leading `identifier: ` prefix off the text. The identifier is
/// ASCII letters, digits, `_` and `-`, and the colon must be followed by
/// whitespace.
pub fn split_speaker(text: &str) -> (Option<String>, &str) {
    let Some(colon) = text.find(':') else {
        return (None, text);
    };
    let id = &text[..colon];
    let after = &text[colon + 1..];
    let valid_id = !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid_id && after.starts_with(char::is_whitespace) {
        (Some(id.to_string()), after.trim_start())
    } else {
        (None, text)
    }
}

/// `**text**` to italic, then `*text*` to bold.
pub fn apply_styling(text: &str) -> String {
    let italic = wrap_pairs(text, "**", "i");
    wrap_pairs(&italic, "*", "b")
}

fn wrap_pairs(text: &str, marker: &str, tag: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(marker) {
        let body_start = open + marker.len();
        let close = match rest[body_start..].find(marker) {
            Some(0) => {
                // empty pair: keep the first marker literal and move on
                out.push_str(&rest[..body_start]);
                rest = &rest[body_start..];
                continue;
            }
            Some(len) => body_start + len,
            None => break,
        };
        out.push_str(&rest[..open]);
        out.push('<');
        out.push_str(tag);
        out.push('>');
        out.push_str(&rest[body_start..close]);
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
        rest = &rest[close + marker.len()..];
    }
    out.push_str(rest);
    out
}
