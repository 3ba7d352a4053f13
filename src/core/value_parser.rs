// src/core/value_parser.rs

//! Parses textual override operands and `key[op]=value` expressions.
//!
//! Operands use a small literal grammar:
//!
//! - `[a, b]` and `(a, b)` are sequences; `{a, b}` is a set; `{k: v}` is a
//!   mapping. Elements may be separated by commas or whitespace.
//! - `'..'` and `".."` are strings; `\` escapes the next character.
//! - `{name}` on its own is an interpolation placeholder and stays a string.
//! - Bare words become ints (`12`, `0x1f`), floats, `true`/`false`/`none`,
//!   or strings.
//!
//! At top level, text that does not open a collection or a quote is taken
//! verbatim, so `gcc -c {sources}` survives as a single string.

use crate::core::overrides::{OptionOverride, OverrideOp};
use crate::core::value::OptionValue;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed value '{text}' at position {position}: {message}")]
pub struct ValueParseError {
    pub text: String,
    pub position: usize,
    pub message: String,
}

/// The two shapes an `-o` expression can take.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideExpression {
    /// `key[op]=value`
    Push(OptionOverride),
    /// `key` alone: pop the top of the key's stack.
    Pop(String),
}

/// Returns true if `key` is a valid option name.
pub fn is_option_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Splits a trailing operator character off a key, as in `sources+`.
pub fn split_key_suffix(raw: &str) -> (&str, OverrideOp) {
    if let Some(last) = raw.chars().last()
        && let Some(op) = OverrideOp::from_suffix(last)
        && let Some(key) = raw.strip_suffix(last)
    {
        return (key, op);
    }
    (raw, OverrideOp::Replace)
}

/// Parses `key`, `key=value` or `key<op>=value`.
pub fn parse_override_expression(expr: &str) -> Result<OverrideExpression, ValueParseError> {
    let fail = |position: usize, message: &str| ValueParseError {
        text: expr.to_string(),
        position,
        message: message.to_string(),
    };

    let Some((lhs, rhs)) = expr.split_once('=') else {
        let key = expr.trim();
        if !is_option_key(key) {
            return Err(fail(0, "expected an option name"));
        }
        return Ok(OverrideExpression::Pop(key.to_string()));
    };

    let (raw_key, op) = split_key_suffix(lhs.trim());
    if !is_option_key(raw_key) {
        return Err(fail(0, "expected an option name before the operator"));
    }
    let offset = lhs.chars().count() + 1;
    let operand = parse_value(rhs).map_err(|e| ValueParseError {
        text: expr.to_string(),
        position: e.position + offset,
        message: e.message,
    })?;

    Ok(OverrideExpression::Push(OptionOverride::new(raw_key, op, operand)))
}

/// Parses an operand string into a value.
pub fn parse_value(text: &str) -> Result<OptionValue, ValueParseError> {
    let trimmed = text.trim();
    let mut parser = Parser::new(trimmed);

    let structured = match parser.peek() {
        Some('[' | '(' | '\'' | '"') => true,
        Some('{') => !parser.at_placeholder(),
        _ => false,
    };
    if !structured {
        return Ok(classify_bare(trimmed));
    }

    let value = parser.value()?;
    parser.skip_separators(false);
    if parser.peek().is_some() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

fn classify_bare(word: &str) -> OptionValue {
    match word {
        "true" => return OptionValue::Bool(true),
        "false" => return OptionValue::Bool(false),
        "none" => return OptionValue::None,
        _ => {}
    }
    if let Some(i) = parse_int(word) {
        return OptionValue::Int(i);
    }
    if word.chars().any(|c| c.is_ascii_digit())
        && word
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        && let Ok(x) = word.parse::<f64>()
    {
        return OptionValue::Float(x);
    }
    OptionValue::String(word.to_string())
}

fn parse_int(word: &str) -> Option<i64> {
    let (negative, digits) = match word.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, word.strip_prefix('+').unwrap_or(word)),
    };
    let lower = digits.to_ascii_lowercase();
    let magnitude = if let Some(hex) = lower.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(oct) = lower.strip_prefix("0o") {
        i64::from_str_radix(oct, 8).ok()?
    } else if let Some(bin) = lower.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()?
    } else if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse::<i64>().ok()?
    } else {
        return None;
    };
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

// --- Recursive descent over the operand grammar ---

struct Parser<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

/// A scalar assembled from adjacent pieces; `quoted` disables kind detection.
struct Scalar {
    text: String,
    quoted: bool,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn error(&self, message: &str) -> ValueParseError {
        ValueParseError {
            text: self.text.to_string(),
            position: self.pos,
            message: message.to_string(),
        }
    }

    /// True if the cursor sits on `{identifier}`.
    fn at_placeholder(&self) -> bool {
        if self.peek() != Some('{') {
            return false;
        }
        let mut i = self.pos + 1;
        let mut len = 0;
        while let Some(c) = self.chars.get(i) {
            if *c == '}' {
                return len > 0;
            }
            if !(c.is_ascii_alphanumeric() || *c == '_') {
                return false;
            }
            len += 1;
            i += 1;
        }
        false
    }

    /// Skips whitespace, and commas when `commas` is set.
    fn skip_separators(&mut self, commas: bool) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || (commas && c == ',') {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn value(&mut self) -> Result<OptionValue, ValueParseError> {
        match self.peek() {
            Some('[') => {
                self.bump();
                Ok(OptionValue::Sequence(self.items(']')?))
            }
            Some('(') => {
                self.bump();
                Ok(OptionValue::Sequence(self.items(')')?))
            }
            Some('{') if !self.at_placeholder() => {
                self.bump();
                self.braced()
            }
            Some(']' | ')' | '}' | ':' | ',') => Err(self.error("unexpected delimiter")),
            Some(_) => {
                let scalar = self.scalar()?;
                Ok(if scalar.quoted {
                    OptionValue::String(scalar.text)
                } else {
                    classify_bare(&scalar.text)
                })
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn items(&mut self, close: char) -> Result<Vec<OptionValue>, ValueParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_separators(true);
            match self.peek() {
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                }
                Some(_) => items.push(self.value()?),
                None => return Err(self.error(&format!("missing closing '{close}'"))),
            }
        }
    }

    /// Parses the inside of `{...}` as a set or, if the first element is
    /// followed by `:`, a mapping.
    fn braced(&mut self) -> Result<OptionValue, ValueParseError> {
        self.skip_separators(true);
        if self.peek() == Some('}') {
            self.bump();
            return Ok(OptionValue::Set(BTreeSet::new()));
        }

        let first = self.value()?;
        self.skip_separators(false);
        if self.peek() != Some(':') {
            let mut set = BTreeSet::from([first]);
            set.extend(self.items('}')?);
            return Ok(OptionValue::Set(set));
        }

        let mut mapping = BTreeMap::new();
        let mut key = first;
        loop {
            if self.bump() != Some(':') {
                return Err(self.error("expected ':' in mapping"));
            }
            self.skip_separators(false);
            let value = self.value()?;
            mapping.insert(key.to_string(), value);

            self.skip_separators(true);
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(OptionValue::Mapping(mapping));
                }
                Some(_) => {
                    key = self.value()?;
                    self.skip_separators(false);
                }
                None => return Err(self.error("missing closing '}'")),
            }
        }
    }

    /// Reads adjacent quoted strings, bare runs and placeholders as one
    /// scalar.
    fn scalar(&mut self) -> Result<Scalar, ValueParseError> {
        let mut text = String::new();
        let mut quoted = false;
        while let Some(c) = self.peek() {
            match c {
                '\'' | '"' => {
                    self.bump();
                    self.quoted(c, &mut text)?;
                    quoted = true;
                }
                '{' if self.at_placeholder() => {
                    while let Some(p) = self.bump() {
                        text.push(p);
                        if p == '}' {
                            break;
                        }
                    }
                }
                '\\' => {
                    self.bump();
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("value cannot end in a bare escape"))?;
                    text.push(escaped);
                }
                c if c.is_whitespace() || "[](){}:,".contains(c) => break,
                c => {
                    self.bump();
                    text.push(c);
                }
            }
        }
        Ok(Scalar { text, quoted })
    }

    fn quoted(&mut self, quote: char, out: &mut String) -> Result<(), ValueParseError> {
        loop {
            match self.bump() {
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("value cannot end in a bare escape"))?;
                    out.push(escaped);
                }
                Some(c) if c == quote => return Ok(()),
                Some(c) => out.push(c),
                None => return Err(self.error("unterminated string")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_scalars() {
        assert_eq!(parse_value("12").unwrap(), OptionValue::Int(12));
        assert_eq!(parse_value("-0x10").unwrap(), OptionValue::Int(-16));
        assert_eq!(parse_value("2.5").unwrap(), OptionValue::Float(2.5));
        assert_eq!(parse_value("true").unwrap(), OptionValue::Bool(true));
        assert_eq!(parse_value("none").unwrap(), OptionValue::None);
        assert_eq!(parse_value("").unwrap(), OptionValue::from(""));
        assert_eq!(parse_value("release").unwrap(), OptionValue::from("release"));
    }

    #[test]
    fn test_top_level_text_is_kept_verbatim() {
        assert_eq!(
            parse_value("gcc -c {sources}").unwrap(),
            OptionValue::from("gcc -c {sources}")
        );
        assert_eq!(
            parse_value("{build_anchor}/out.o").unwrap(),
            OptionValue::from("{build_anchor}/out.o")
        );
        assert_eq!(parse_value("{name}").unwrap(), OptionValue::from("{name}"));
    }

    #[test]
    fn test_collections() {
        assert_eq!(
            parse_value("[a, 'b c', 3]").unwrap(),
            OptionValue::Sequence(vec![
                OptionValue::from("a"),
                OptionValue::from("b c"),
                OptionValue::Int(3)
            ])
        );
        assert_eq!(
            parse_value("(x y)").unwrap(),
            OptionValue::from(vec!["x", "y"])
        );
        assert_eq!(
            parse_value("{b, a, b}").unwrap(),
            OptionValue::set_of(["a", "b"])
        );
        assert_eq!(
            parse_value("{opt: -O2, warn: [all, extra]}").unwrap(),
            OptionValue::mapping_of([
                ("opt", OptionValue::from("-O2")),
                ("warn", OptionValue::from(vec!["all", "extra"])),
            ])
        );
        assert_eq!(parse_value("[]").unwrap(), OptionValue::Sequence(vec![]));
        assert_eq!(parse_value("{}").unwrap(), OptionValue::Set(BTreeSet::new()));
    }

    #[test]
    fn test_placeholders_inside_collections() {
        assert_eq!(
            parse_value("[{src}/a.c, '{x}']").unwrap(),
            OptionValue::from(vec!["{src}/a.c", "{x}"])
        );
        assert_eq!(
            parse_value("{{a}, {b}}").unwrap(),
            OptionValue::set_of(["{a}", "{b}"])
        );
    }

    #[test]
    fn test_malformed_values() {
        assert!(parse_value("[a, b").is_err());
        assert!(parse_value("'open").is_err());
        assert!(parse_value("[a]]").is_err());
        assert!(parse_value("{k: }").is_err());
    }

    #[test]
    fn test_override_expressions() {
        assert_eq!(
            parse_override_expression("flags+=-Wall").unwrap(),
            OverrideExpression::Push(OptionOverride::new("flags", OverrideOp::Add, "-Wall"))
        );
        assert_eq!(
            parse_override_expression("kinds\\=[0, 2]").unwrap(),
            OverrideExpression::Push(OptionOverride::new(
                "kinds",
                OverrideOp::Difference,
                vec![0, 2]
            ))
        );
        assert_eq!(
            parse_override_expression("verbosity=2").unwrap(),
            OverrideExpression::Push(OptionOverride::replace("verbosity", 2))
        );
        assert_eq!(
            parse_override_expression("verbosity").unwrap(),
            OverrideExpression::Pop("verbosity".to_string())
        );
        assert!(parse_override_expression("bad key=1").is_err());
        assert!(parse_override_expression("=1").is_err());
    }

    #[test]
    fn test_split_key_suffix() {
        assert_eq!(split_key_suffix("sources+"), ("sources", OverrideOp::Add));
        assert_eq!(split_key_suffix("sources"), ("sources", OverrideOp::Replace));
    }
}
