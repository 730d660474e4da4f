/// Inline control flow: `if{cond}A else{cond}B else{}C fi{}` blocks
/// embedded in free text.
///
/// Text is tokenized into a flat stream (plain text and keyword-tagged
/// segments), parsed into chains by a small recursive-descent parser, then
/// rendered by keeping the first branch whose condition passes.
use crate::core::expression::{ClauseMode, Evaluator, ExpressionError};
use crate::core::loose_json::normalize_quote;

/// A control-flow token. Keyword tokens carry their raw condition text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Plain(&'a str),
    IfOpen(&'a str),
    IfOrOpen(&'a str),
    ElseOpen(&'a str),
    FiClose,
}

/// Keywords recognized by what immediately precedes a `{`.
const KEYWORDS: [&str; 4] = ["ifOr", "else", "if", "fi"];

/// Split text into plain and keyword tokens.
///
/// Only the characters right before a `{` decide the keyword: `elif{` opens
/// an `if`. Any other `{` starts a directive object, which is skipped whole
/// (quoted braces included) so that an object containing `if{` or `}` is
/// passed through untouched. An unterminated object ends the scan.
pub fn tokenize(text: &str) -> Vec<Token<'_>> {
    let (tokens, unbalanced) = scan(text);
    if let Some(keyword) = unbalanced {
        tracing::error!(keyword, "unbalanced braces after control-flow keyword");
    }
    tokens
}

/// Tokenize, also reporting the keyword whose brace never closed. Scanning
/// stops there and the rest of the text stays plain.
fn scan(text: &str) -> (Vec<Token<'_>>, Option<&'static str>) {
    let mut tokens = Vec::new();
    let mut plain_start = 0;
    let mut unbalanced = None;
    let mut i = 0;

    while let Some(offset) = text[i..].find('{') {
        let open = i + offset;
        let Some(keyword) = keyword_before(&text[plain_start..open]) else {
            // a directive object stays plain, whatever it contains
            match matching_brace(text, open) {
                Some(close) => i = close + 1,
                None => break,
            }
            continue;
        };
        let Some(close) = matching_brace(text, open) else {
            unbalanced = Some(keyword);
            break;
        };
        let before = &text[plain_start..open - keyword.len()];
        if !before.is_empty() {
            tokens.push(Token::Plain(before));
        }
        let condition = &text[open + 1..close];
        tokens.push(match keyword {
            "if" => Token::IfOpen(condition),
            "ifOr" => Token::IfOrOpen(condition),
            "else" => Token::ElseOpen(condition),
            _ => Token::FiClose,
        });
        i = close + 1;
        plain_start = i;
    }

    if plain_start < text.len() {
        tokens.push(Token::Plain(&text[plain_start..]));
    }
    (tokens, unbalanced)
}

/// A structural problem in inline control flow. Resolution tolerates all of
/// them; they are reported for linting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFlowIssue {
    /// A keyword's `{` has no matching `}`.
    UnbalancedBrace(&'static str),
    /// `else{}` outside any chain.
    StrayElse,
    /// `fi{}` outside any chain.
    StrayFi,
    /// Chains still open at the end of the text.
    UnclosedChain(usize),
}

pub fn check(text: &str) -> Vec<ControlFlowIssue> {
    let (tokens, unbalanced) = scan(text);
    let mut issues = Vec::new();
    let mut open = 0usize;
    for token in &tokens {
        match token {
            Token::IfOpen(_) | Token::IfOrOpen(_) => open += 1,
            Token::ElseOpen(_) if open == 0 => issues.push(ControlFlowIssue::StrayElse),
            Token::FiClose if open == 0 => issues.push(ControlFlowIssue::StrayFi),
            Token::FiClose => open -= 1,
            Token::ElseOpen(_) | Token::Plain(_) => {}
        }
    }
    if let Some(keyword) = unbalanced {
        issues.push(ControlFlowIssue::UnbalancedBrace(keyword));
    }
    if open > 0 {
        issues.push(ControlFlowIssue::UnclosedChain(open));
    }
    issues
}

fn keyword_before(segment: &str) -> Option<&'static str> {
    KEYWORDS.into_iter().find(|keyword| segment.ends_with(keyword))
}

/// Index of the `}` matching the `{` at `open`, skipping braces inside
/// quoted strings. Straight, single and typographic quotes all delimit a
/// string, as they do for loose JSON.
pub fn matching_brace(text: &str, open: usize) -> Option<usize> {
    if text.as_bytes().get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = text[open..].char_indices();
    while let Some((offset, c)) = chars.next() {
        let c = normalize_quote(c);
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Node<'a> {
    Text(&'a str),
    Chain(Vec<Branch<'a>>),
}

#[derive(Debug, Clone, PartialEq)]
struct Branch<'a> {
    condition: &'a str,
    mode: ClauseMode,
    body: Vec<Node<'a>>,
}

struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    pos: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    /// sequence := (Plain | chain)*
    fn sequence(&mut self, nested: bool) -> Vec<Node<'a>> {
        let mut nodes = Vec::new();
        while let Some(token) = self.tokens.get(self.pos).copied() {
            match token {
                Token::Plain(text) => {
                    nodes.push(Node::Text(text));
                    self.pos += 1;
                }
                Token::IfOpen(_) | Token::IfOrOpen(_) => nodes.push(self.chain()),
                Token::ElseOpen(_) | Token::FiClose if nested => break,
                Token::ElseOpen(condition) => {
                    tracing::error!(condition, "else{{}} without a preceding if{{}}");
                    nodes.push(self.chain());
                }
                Token::FiClose => {
                    tracing::warn!("fi{{}} without a preceding if{{}}");
                    self.pos += 1;
                }
            }
        }
        nodes
    }

    /// chain := (IfOpen | IfOrOpen) sequence (ElseOpen sequence)* FiClose?
    fn chain(&mut self) -> Node<'a> {
        let mut branches = Vec::new();
        let (condition, mode) = match self.tokens[self.pos] {
            Token::IfOrOpen(c) => (c, ClauseMode::Any),
            Token::IfOpen(c) | Token::ElseOpen(c) => (c, ClauseMode::All),
            Token::Plain(_) | Token::FiClose => ("", ClauseMode::All),
        };
        self.pos += 1;
        branches.push(Branch {
            condition,
            mode,
            body: self.sequence(true),
        });

        while let Some(token) = self.tokens.get(self.pos).copied() {
            match token {
                Token::ElseOpen(condition) => {
                    self.pos += 1;
                    branches.push(Branch {
                        condition,
                        mode: ClauseMode::All,
                        body: self.sequence(true),
                    });
                }
                Token::FiClose => {
                    self.pos += 1;
                    break;
                }
                _ => break,
            }
        }
        Node::Chain(branches)
    }
}

/// Resolve every inline conditional chain in `text`, keeping only the body
/// of the first passing branch of each chain. An `else{}` with an empty
/// condition always passes. A chain left open at the end of the text is
/// closed implicitly.
pub fn resolve_inline_conditionals(
    text: &str,
    evaluator: &Evaluator<'_>,
) -> Result<String, ExpressionError> {
    let tokens = tokenize(text);
    if tokens.iter().all(|t| matches!(t, Token::Plain(_))) {
        return Ok(text.to_string());
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let nodes = parser.sequence(false);
    let mut out = String::with_capacity(text.len());
    render(&nodes, evaluator, &mut out)?;
    Ok(out)
}

fn render(
    nodes: &[Node<'_>],
    evaluator: &Evaluator<'_>,
    out: &mut String,
) -> Result<(), ExpressionError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Chain(branches) => {
                for branch in branches {
                    if evaluator.evaluate_list(branch.condition, branch.mode)? {
                        render(&branch.body, evaluator, out)?;
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registries;
    use crate::schema::state::{GameState, WorldState};

    fn resolve(text: &str, flags: &[(&str, f64)]) -> String {
        let registries = Registries::with_builtins();
        let mut state = WorldState::new();
        for (k, v) in flags {
            state.set_flag(k, *v);
        }
        let ev = Evaluator::new(&registries.conditions, &state);
        resolve_inline_conditionals(text, &ev).unwrap()
    }

    #[test]
    fn tokenize_chain() {
        let tokens = tokenize("Hi if{a > 1}A else{b}B else{}C fi{} end");
        assert_eq!(
            tokens,
            vec![
                Token::Plain("Hi "),
                Token::IfOpen("a > 1"),
                Token::Plain("A "),
                Token::ElseOpen("b"),
                Token::Plain("B "),
                Token::ElseOpen(""),
                Token::Plain("C "),
                Token::FiClose,
                Token::Plain(" end"),
            ]
        );
    }

    #[test]
    fn tokenize_if_or_and_suffixes() {
        assert_eq!(
            tokenize("ifOr{a, b}X fi{}"),
            vec![Token::IfOrOpen("a, b"), Token::Plain("X "), Token::FiClose]
        );
        assert_eq!(
            tokenize("a gif{x} b"),
            vec![Token::Plain("a g"), Token::IfOpen("x"), Token::Plain(" b")]
        );
    }

    #[test]
    fn tokenize_ignores_keywords_inside_objects() {
        let text = r#"{"say": "if{x}"} done"#;
        assert_eq!(tokenize(text), vec![Token::Plain(text)]);
    }

    #[test]
    fn quoted_brace_in_object_does_not_hide_keywords() {
        let text = r#"{"log": "smile :-{"} if{a = 1}Yes else{}No fi{}"#;
        assert_eq!(resolve(text, &[("a", 1.0)]), r#"{"log": "smile :-{"} Yes "#);
        assert_eq!(resolve(text, &[]), r#"{"log": "smile :-{"} No "#);
    }

    #[test]
    fn unterminated_object_stops_keyword_scan() {
        let text = r#"{"log": "x" if{a = 1}Yes fi{}"#;
        assert_eq!(tokenize(text), vec![Token::Plain(text)]);
    }

    #[test]
    fn matching_brace_skips_loose_quotes() {
        let smart = "Hi {log: \u{201C}a } b\u{201D}} there";
        assert_eq!(matching_brace(smart, 3), smart.rfind('}'));

        let single = "{'say': 'x}', n: 1} after";
        assert_eq!(matching_brace(single, 0), Some(18));

        let escaped = r#"{"say": "a \" }"} end"#;
        assert_eq!(matching_brace(escaped, 0), escaped.rfind('}'));

        assert_eq!(matching_brace("{a: 'open}", 0), None);
        assert_eq!(matching_brace("x{}", 0), None);
    }

    #[test]
    fn tokenize_keeps_json_in_body() {
        let tokens = tokenize(r#"if{gold > 1}{"flag": {"a": 1}} paid fi{}"#);
        assert_eq!(
            tokens,
            vec![
                Token::IfOpen("gold > 1"),
                Token::Plain(r#"{"flag": {"a": 1}} paid "#),
                Token::FiClose,
            ]
        );
    }

    #[test]
    fn true_condition_keeps_body() {
        let out = resolve("if{gold > 10}Rich fi{}", &[("gold", 20.0)]);
        assert_eq!(out, "Rich ");
        let out = resolve("if{gold > 10}Rich fi{}", &[("gold", 1.0)]);
        assert_eq!(out, "");
    }

    #[test]
    fn first_true_branch_wins() {
        let text = "if{a = 1}A else{b = 1}B else{}C fi{}";
        assert_eq!(resolve(text, &[("a", 1.0), ("b", 1.0)]), "A ");
        assert_eq!(resolve(text, &[("b", 1.0)]), "B ");
        assert_eq!(resolve(text, &[]), "C ");
    }

    #[test]
    fn if_or_needs_one() {
        let text = "ifOr{a = 1, b = 1}yes else{}no fi{}";
        assert_eq!(resolve(text, &[("b", 1.0)]), "yes ");
        assert_eq!(resolve(text, &[]), "no ");
    }

    #[test]
    fn nested_chains() {
        let text = "if{a = 1}A[if{b = 1}B else{}notB fi{}] else{}X fi{}!";
        assert_eq!(resolve(text, &[("a", 1.0), ("b", 1.0)]), "A[B ] !");
        assert_eq!(resolve(text, &[("a", 1.0)]), "A[notB ] !");
        assert_eq!(resolve(text, &[("b", 1.0)]), "X !");
    }

    #[test]
    fn unterminated_chain_is_tolerated() {
        assert_eq!(resolve("start if{a = 1}tail", &[("a", 1.0)]), "start tail");
        assert_eq!(resolve("start if{a = 1}tail", &[]), "start ");
    }

    #[test]
    fn stray_tokens() {
        assert_eq!(resolve("a fi{} b", &[]), "a  b");
        assert_eq!(resolve("else{x = 1}X fi{}", &[("x", 1.0)]), "X ");
    }

    #[test]
    fn unbalanced_keyword_brace_left_as_text() {
        assert_eq!(resolve("if{a = 1 oops", &[]), "if{a = 1 oops");
    }

    #[test]
    fn skipped_branches_are_not_evaluated() {
        let text = "if{a = 0}ok else{_missing = 1}bad fi{}";
        assert_eq!(resolve(text, &[]), "ok ");
    }

    #[test]
    fn unknown_condition_propagates() {
        let registries = Registries::new();
        let state = WorldState::new();
        let ev = Evaluator::new(&registries.conditions, &state);
        assert!(resolve_inline_conditionals("if{_missing}x fi{}", &ev).is_err());
    }

    #[test]
    fn check_reports_structure() {
        assert!(check("if{a}A else{}B fi{}").is_empty());
        assert_eq!(
            check("A fi{} else{}B"),
            vec![ControlFlowIssue::StrayFi, ControlFlowIssue::StrayElse]
        );
        assert_eq!(check("if{a}if{b}x fi{}"), vec![ControlFlowIssue::UnclosedChain(1)]);
        assert_eq!(check("x else{oops"), vec![ControlFlowIssue::UnbalancedBrace("else")]);
    }

    #[test]
    fn text_without_tokens_is_unchanged() {
        assert_eq!(resolve("plain {\"a\": 1} text", &[]), "plain {\"a\": 1} text");
    }
}
