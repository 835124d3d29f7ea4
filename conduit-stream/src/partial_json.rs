//! Best-effort parsing of truncated JSON documents
//!
//! [`repair`] scans the input once, remembers the last position at which the
//! prefix can still be turned into a valid document, cuts the input there and
//! appends whatever closing tokens the open scopes need.

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    /// A value is expected
    Value,
    /// After `{`: a key or `}`
    ObjectStart,
    /// After `,` in an object: a key
    ObjectComma,
    /// Inside a key string
    Key,
    KeyEscape,
    /// Key read, `:` expected
    ObjectColon,
    /// Member value read, `,` or `}` expected
    ObjectNext,
    /// After `[`: a value or `]`
    ArrayStart,
    /// Element read, `,` or `]` expected
    ArrayNext,
    /// Inside a string value
    Str,
    StrEscape,
    /// Inside a `\uXXXX` escape, with the hex digits still missing
    StrUnicode(u8),
    Number,
    Literal,
    /// Top-level value complete
    Done,
}

const LITERALS: [&str; 3] = ["true", "false", "null"];

fn is_literal_prefix(text: &str) -> bool {
    LITERALS.iter().any(|literal| literal.starts_with(text))
}

/// Pop a finished value and mark the top level complete when nothing is open
fn finish_value(stack: &mut Vec<Scan>) {
    stack.pop();
    if stack.is_empty() {
        stack.push(Scan::Done);
    }
}

fn replace_top(stack: &mut Vec<Scan>, scan: Scan) {
    stack.pop();
    stack.push(scan);
}

/// Turn a truncated JSON document into the closest valid one
///
/// Incomplete keys and members without a value are dropped, open strings,
/// arrays and objects are closed and partial literals are completed:
///
/// ```
/// use conduit_stream::partial_json::repair;
///
/// assert_eq!(repair(r#"{"a": [1, "tw"#), r#"{"a": [1, "tw"]}"#);
/// assert_eq!(repair(r#"{"k1": 1, "k2"#), r#"{"k1": 1}"#);
/// assert_eq!(repair("[tr"), "[true]");
/// ```
pub fn repair(input: &str) -> String {
    let mut stack = vec![Scan::Value];
    let mut valid_end = 0;
    let mut literal_start = 0;

    for (i, ch) in input.char_indices() {
        let end = i + ch.len_utf8();

        // Terminating a number or literal hands the character to the
        // enclosing scope, hence the loop.
        loop {
            let Some(&top) = stack.last() else {
                break;
            };

            match top {
                Scan::Value => match ch {
                    '"' => {
                        replace_top(&mut stack, Scan::Str);
                        valid_end = end;
                    }
                    '{' => {
                        replace_top(&mut stack, Scan::ObjectStart);
                        valid_end = end;
                    }
                    '[' => {
                        replace_top(&mut stack, Scan::ArrayStart);
                        valid_end = end;
                    }
                    '-' => replace_top(&mut stack, Scan::Number),
                    '0'..='9' => {
                        replace_top(&mut stack, Scan::Number);
                        valid_end = end;
                    }
                    't' | 'f' | 'n' => {
                        replace_top(&mut stack, Scan::Literal);
                        literal_start = i;
                        valid_end = end;
                    }
                    _ => {}
                },

                Scan::ObjectStart | Scan::ObjectComma => match ch {
                    '"' => {
                        replace_top(&mut stack, Scan::ObjectColon);
                        stack.push(Scan::Key);
                    }
                    '}' if top == Scan::ObjectStart => {
                        finish_value(&mut stack);
                        valid_end = end;
                    }
                    _ => {}
                },

                Scan::Key => match ch {
                    '"' => {
                        stack.pop();
                    }
                    '\\' => replace_top(&mut stack, Scan::KeyEscape),
                    _ => {}
                },

                Scan::KeyEscape => replace_top(&mut stack, Scan::Key),

                Scan::ObjectColon => {
                    if ch == ':' {
                        replace_top(&mut stack, Scan::ObjectNext);
                        stack.push(Scan::Value);
                    }
                }

                Scan::ObjectNext => match ch {
                    ',' => replace_top(&mut stack, Scan::ObjectComma),
                    '}' => {
                        finish_value(&mut stack);
                        valid_end = end;
                    }
                    _ => {}
                },

                Scan::ArrayStart => match ch {
                    ']' => {
                        finish_value(&mut stack);
                        valid_end = end;
                    }
                    c if c.is_whitespace() => {}
                    _ => {
                        replace_top(&mut stack, Scan::ArrayNext);
                        stack.push(Scan::Value);
                        continue;
                    }
                },

                Scan::ArrayNext => match ch {
                    ',' => stack.push(Scan::Value),
                    ']' => {
                        finish_value(&mut stack);
                        valid_end = end;
                    }
                    _ => {}
                },

                Scan::Str => match ch {
                    '"' => {
                        finish_value(&mut stack);
                        valid_end = end;
                    }
                    '\\' => replace_top(&mut stack, Scan::StrEscape),
                    _ => valid_end = end,
                },

                Scan::StrEscape => {
                    if ch == 'u' {
                        replace_top(&mut stack, Scan::StrUnicode(4));
                    } else {
                        replace_top(&mut stack, Scan::Str);
                        valid_end = end;
                    }
                }

                Scan::StrUnicode(remaining) => {
                    if remaining <= 1 {
                        replace_top(&mut stack, Scan::Str);
                        valid_end = end;
                    } else {
                        replace_top(&mut stack, Scan::StrUnicode(remaining - 1));
                    }
                }

                Scan::Number => match ch {
                    '0'..='9' => valid_end = end,
                    '.' | 'e' | 'E' | '+' | '-' => {}
                    _ => {
                        finish_value(&mut stack);
                        continue;
                    }
                },

                Scan::Literal => {
                    if is_literal_prefix(&input[literal_start..end]) {
                        valid_end = end;
                    } else {
                        finish_value(&mut stack);
                        continue;
                    }
                }

                Scan::Done => {}
            }

            break;
        }
    }

    let mut repaired = input[..valid_end].to_string();

    for scan in stack.iter().rev() {
        match scan {
            Scan::Str | Scan::StrEscape | Scan::StrUnicode(_) => repaired.push('"'),
            Scan::ObjectStart | Scan::ObjectComma | Scan::ObjectColon | Scan::ObjectNext => {
                repaired.push('}')
            }
            Scan::ArrayStart | Scan::ArrayNext => repaired.push(']'),
            Scan::Literal => {
                let partial = &input[literal_start..];
                if let Some(literal) = LITERALS.iter().find(|l| l.starts_with(partial)) {
                    repaired.push_str(&literal[partial.len()..]);
                }
            }
            Scan::Value | Scan::Key | Scan::KeyEscape | Scan::Number | Scan::Done => {}
        }
    }

    repaired
}

/// Parse a possibly truncated JSON document
///
/// The input is parsed as-is first; if that fails, the [`repair`]ed input is
/// parsed instead. Returns `None` when neither parses.
pub fn parse_partial(input: &str) -> Option<Value> {
    serde_json::from_str(input)
        .ok()
        .or_else(|| serde_json::from_str(&repair(input)).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_empty_input() {
        assert_eq!(repair(""), "");
        assert_eq!(parse_partial(""), None);
    }

    #[test]
    fn test_literals() {
        assert_eq!(repair("t"), "true");
        assert_eq!(repair("fals"), "false");
        assert_eq!(repair("nu"), "null");
        assert_eq!(repair("[true, fa"), "[true, false]");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(repair("12."), "12");
        assert_eq!(repair("12.2"), "12.2");
        assert_eq!(repair("-"), "");
        assert_eq!(repair("[1e"), "[1]");
        assert_eq!(repair(r#"{"a": -"#), "{}");
    }

    #[test]
    fn test_strings() {
        assert_eq!(repair(r#""abc"#), r#""abc""#);
        assert_eq!(
            repair(r#""value with \"quoted\" text and \\ escape"#),
            r#""value with \"quoted\" text and \\ escape""#
        );
        assert_eq!(repair(r#""value with \"#), r#""value with ""#);
        assert_eq!(repair(r#""snow \u26"#), r#""snow ""#);
        assert_eq!(repair(r#""snow ☃"#), r#""snow ☃""#);
        assert_eq!(repair("\"héllo wö"), "\"héllo wö\"");
    }

    #[test]
    fn test_arrays() {
        assert_eq!(repair("["), "[]");
        assert_eq!(repair("[1, "), "[1]");
        assert_eq!(repair("[[1, 2], [3"), "[[1, 2], [3]]");
    }

    #[test]
    fn test_objects() {
        assert_eq!(repair(r#"{"key":"#), "{}");
        assert_eq!(repair(r#"{"ke"#), "{}");
        assert_eq!(repair(r#"{"k1": 1, "k2"#), r#"{"k1": 1}"#);
        assert_eq!(repair(r#"{"k1": 1, "k2":"#), r#"{"k1": 1}"#);
        assert_eq!(repair(r#"{"key": "value"  "#), r#"{"key": "value"}"#);
        assert_eq!(repair(r#"{"a\"b": "#), "{}");
    }

    #[test]
    fn test_nested_structures() {
        assert_eq!(
            repair(r#"{"a": {"b": ["c", {"d": "e","#),
            r#"{"a": {"b": ["c", {"d": "e"}]}}"#
        );
        assert_eq!(
            repair(r#"{"a": {"b": {"c": {"d":"#),
            r#"{"a": {"b": {"c": {}}}}"#
        );
        assert_eq!(
            repair(r#"[{"a": 1}, {"b": [tr"#),
            r#"[{"a": 1}, {"b": [true]}]"#
        );
    }

    #[test]
    fn test_parse_partial() {
        assert_eq!(parse_partial(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            parse_partial(r#"{"name": "Ada", "langs": ["en", "fr"#),
            Some(json!({"name": "Ada", "langs": ["en", "fr"]}))
        );
        assert_eq!(parse_partial("-"), None);
    }
}
