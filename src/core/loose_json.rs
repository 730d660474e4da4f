/// Loose JSON: repairs author-written near-JSON into strict JSON.
///
/// Directive objects are typed in word processors, so the input may carry
/// smart quotes, single-quoted strings, unquoted (dotted) keys, bare string
/// values, `\.` escapes and trailing commas. Each of those is repaired, not
/// rejected.
use serde_json::{Map, Value};

/// Rewrite `input` into strict JSON text. The result may still fail to
/// parse if the structure itself is broken.
pub fn repair(input: &str) -> String {
    let chars: Vec<char> = input.chars().map(normalize_quote).collect();
    let len = chars.len();
    let mut out = String::with_capacity(input.len() + 8);
    let mut i = 0;

    while i < len {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                let (content, next) = read_string(&chars, i);
                push_quoted(&mut out, &content);
                i = next;
            }
            '}' | ']' => {
                trim_trailing_comma(&mut out);
                out.push(c);
                i += 1;
            }
            '{' | '[' | ':' | ',' => {
                out.push(c);
                i += 1;
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            _ => {
                let start = i;
                while i < len
                    && !matches!(chars[i], '{' | '}' | '[' | ']' | ',' | ':' | '"' | '\'')
                {
                    i += 1;
                }
                let raw: String = chars[start..i].iter().collect();
                let trimmed = raw.trim_end();
                if is_json_literal(trimmed) {
                    out.push_str(trimmed);
                } else {
                    push_quoted(&mut out, &trimmed.replace("\\.", "."));
                }
                out.push_str(&raw[trimmed.len()..]);
            }
        }
    }

    out
}

/// Repair and parse a directive block. Only JSON objects are accepted.
pub fn parse_object(input: &str) -> Result<Map<String, Value>, serde_json::Error> {
    let repaired = repair(input);
    match serde_json::from_str::<Value>(&repaired)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::de::Error::custom(format!(
            "directive is not an object: {}",
            other
        ))),
    }
}

/// Map typographic quotes onto `"` and `'`.
pub(crate) fn normalize_quote(c: char) -> char {
    match c {
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => '"',
        '\u{2018}' | '\u{2019}' | '\u{201A}' => '\'',
        _ => c,
    }
}

/// Read a quoted string starting at `start` and return its unescaped
/// content plus the index after the closing quote. Unterminated strings run
/// to the end of input.
fn read_string(chars: &[char], start: usize) -> (String, usize) {
    let quote = chars[start];
    let mut content = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return (content, i + 1);
        }
        if c == '\\' && i + 1 < chars.len() {
            let escaped = chars[i + 1];
            i += 2;
            match escaped {
                'n' => content.push('\n'),
                't' => content.push('\t'),
                'r' => content.push('\r'),
                'b' => content.push('\u{0008}'),
                'f' => content.push('\u{000C}'),
                'u' => {
                    let hex: String = chars[i..chars.len().min(i + 4)].iter().collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(ch) if hex.len() == 4 => {
                            content.push(ch);
                            i += 4;
                        }
                        _ => content.push('u'),
                    }
                }
                // `\.`, `\"`, `\'`, `\\`, `\/` and anything unknown keep the char
                other => content.push(other),
            }
            continue;
        }
        content.push(c);
        i += 1;
    }
    (content, chars.len())
}

fn push_quoted(out: &mut String, content: &str) {
    out.push('"');
    for c in content.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}

fn is_json_literal(token: &str) -> bool {
    matches!(token, "true" | "false" | "null")
        || (token.parse::<f64>().is_ok() && serde_json::from_str::<Value>(token).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_passes_through() {
        let map = parse_object(r#"{"flag": "gold>10", "n": 3, "list": [1, 2]}"#).unwrap();
        assert_eq!(Value::Object(map), json!({ "flag": "gold>10", "n": 3, "list": [1, 2] }));
    }

    #[test]
    fn smart_quotes_and_single_quotes() {
        let map = parse_object("{\u{201C}say\u{201D}: 'hello \"friend\"'}").unwrap();
        assert_eq!(map["say"], json!("hello \"friend\""));
    }

    #[test]
    fn unquoted_and_dotted_keys() {
        let map = parse_object("{gold.amount: 5, door: true, note: null}").unwrap();
        assert_eq!(map["gold.amount"], json!(5));
        assert_eq!(map["door"], json!(true));
        assert_eq!(map["note"], Value::Null);
    }

    #[test]
    fn bare_string_values() {
        let map = parse_object("{flag: gold > 10, scene: crypt_entrance}").unwrap();
        assert_eq!(map["flag"], json!("gold > 10"));
        assert_eq!(map["scene"], json!("crypt_entrance"));
    }

    #[test]
    fn trailing_commas() {
        let map = parse_object("{\"a\": [1, 2, 3,], \"b\": {\"c\": 1,},}").unwrap();
        assert_eq!(map["a"], json!([1, 2, 3]));
        assert_eq!(map["b"], json!({ "c": 1 }));
    }

    #[test]
    fn escaped_dots() {
        let map = parse_object(r#"{"items\.sword": 1, key: a\.b}"#).unwrap();
        assert_eq!(map["items.sword"], json!(1));
        assert_eq!(map["key"], json!("a.b"));
    }

    #[test]
    fn non_object_rejected() {
        assert!(parse_object("[1, 2]").is_err());
        assert!(parse_object("{\"a\": }").is_err());
        assert!(parse_object("{\"a\" 1}").is_err());
    }

    #[test]
    fn nested_objects() {
        let map = parse_object("{give: {item: 'sword', count: 2}, redirect: 'crypt'}").unwrap();
        assert_eq!(map["give"], json!({ "item": "sword", "count": 2 }));
        assert_eq!(map["redirect"], json!("crypt"));
    }
}
