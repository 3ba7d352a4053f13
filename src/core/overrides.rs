// src/core/overrides.rs

//! Override operators and the rules for applying them to values.
//!
//! The pairing table is closed: any operator/kind combination not listed in
//! [`apply`] is rejected with [`OverrideError::TypeMismatch`].

use crate::core::value::{OptionValue, ValueKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// An operator that transforms the value below it on an option stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideOp {
    /// `=`
    Replace,
    /// `+=`
    Add,
    /// `-=`
    Subtract,
    /// `*=`
    Multiply,
    /// `/=`
    Divide,
    /// `!=`
    Negate,
    /// `|=`
    Union,
    /// `&=`
    Intersect,
    /// `\=`
    Difference,
    /// `^=`
    SymmetricDifference,
}

impl OverrideOp {
    /// Every operator, in the order they are documented.
    pub const ALL: [Self; 10] = [
        Self::Replace,
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::Negate,
        Self::Union,
        Self::Intersect,
        Self::Difference,
        Self::SymmetricDifference,
    ];

    /// The textual form, e.g. `+=`.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Replace => "=",
            Self::Add => "+=",
            Self::Subtract => "-=",
            Self::Multiply => "*=",
            Self::Divide => "/=",
            Self::Negate => "!=",
            Self::Union => "|=",
            Self::Intersect => "&=",
            Self::Difference => "\\=",
            Self::SymmetricDifference => "^=",
        }
    }

    /// Maps the character that precedes `=` in an override expression (or
    /// trails a descriptor key) to its operator.
    pub fn from_suffix(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Add),
            '-' => Some(Self::Subtract),
            '*' => Some(Self::Multiply),
            '/' => Some(Self::Divide),
            '!' => Some(Self::Negate),
            '|' => Some(Self::Union),
            '&' => Some(Self::Intersect),
            '\\' => Some(Self::Difference),
            '^' => Some(Self::SymmetricDifference),
            _ => None,
        }
    }
}

impl fmt::Display for OverrideOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// One entry on an option stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    /// How the operand combines with the value below.
    pub op: OverrideOp,
    /// The raw, uninterpolated operand.
    pub operand: OptionValue,
    /// Monotonic insertion index within the owning table.
    pub index: usize,
}

/// A keyed override expression, as written on the command line or in a
/// descriptor: `key op operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionOverride {
    pub key: String,
    pub op: OverrideOp,
    pub operand: OptionValue,
}

impl OptionOverride {
    pub fn new(key: impl Into<String>, op: OverrideOp, operand: impl Into<OptionValue>) -> Self {
        Self {
            key: key.into(),
            op,
            operand: operand.into(),
        }
    }

    /// Shorthand for a `Replace` override.
    pub fn replace(key: impl Into<String>, operand: impl Into<OptionValue>) -> Self {
        Self::new(key, OverrideOp::Replace, operand)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverrideError {
    #[error("operator '{op}' is not valid for a {kind} value with a {operand} operand")]
    TypeMismatch {
        op: OverrideOp,
        kind: ValueKind,
        operand: ValueKind,
    },
    #[error("division by zero")]
    DivideByZero,
    #[error("integer overflow")]
    Overflow,
}

type Applied = Result<OptionValue, OverrideError>;

/// Applies `op` with `operand` to `current`, producing a new value.
pub fn apply(current: &OptionValue, op: OverrideOp, operand: &OptionValue) -> Applied {
    if op == OverrideOp::Replace {
        return Ok(operand.clone());
    }
    let mismatch = OverrideError::TypeMismatch {
        op,
        kind: current.kind(),
        operand: operand.kind(),
    };
    match current {
        OptionValue::Int(_) | OptionValue::Float(_) => {
            apply_numeric(current, op, operand).ok_or(mismatch)?
        }
        OptionValue::Bool(b) => match (op, operand) {
            (OverrideOp::Negate, OptionValue::None) => Ok(OptionValue::Bool(!b)),
            (OverrideOp::Negate, OptionValue::Bool(toggle)) => Ok(OptionValue::Bool(b ^ toggle)),
            _ => Err(mismatch),
        },
        OptionValue::String(s) => apply_string(s, op, operand).ok_or(mismatch),
        OptionValue::Sequence(items) => apply_sequence(items, op, operand).ok_or(mismatch),
        OptionValue::Set(items) => apply_set(items, op, operand).ok_or(mismatch),
        OptionValue::Mapping(entries) => apply_mapping(entries, op, operand).ok_or(mismatch),
        OptionValue::None => Err(mismatch),
    }
}

// --- Numbers ---

enum Num {
    I(i64),
    F(f64),
}

fn as_num(value: &OptionValue) -> Option<Num> {
    match value {
        OptionValue::Int(i) => Some(Num::I(*i)),
        OptionValue::Float(x) => Some(Num::F(*x)),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(n: &Num) -> f64 {
    match n {
        Num::I(i) => *i as f64,
        Num::F(x) => *x,
    }
}

/// Returns `None` for an invalid pairing, `Some(Err)` for arithmetic failures.
fn apply_numeric(current: &OptionValue, op: OverrideOp, operand: &OptionValue) -> Option<Applied> {
    let lhs = as_num(current)?;

    if op == OverrideOp::Negate {
        if !matches!(operand, OptionValue::None) {
            return None;
        }
        return Some(match lhs {
            Num::I(i) => i
                .checked_neg()
                .map(OptionValue::Int)
                .ok_or(OverrideError::Overflow),
            Num::F(x) => Ok(OptionValue::Float(-x)),
        });
    }

    let rhs = as_num(operand)?;
    let checked = |r: Option<i64>| r.map(OptionValue::Int).ok_or(OverrideError::Overflow);

    Some(match (op, &lhs, &rhs) {
        (OverrideOp::Add, Num::I(a), Num::I(b)) => checked(a.checked_add(*b)),
        (OverrideOp::Subtract, Num::I(a), Num::I(b)) => checked(a.checked_sub(*b)),
        (OverrideOp::Multiply, Num::I(a), Num::I(b)) => checked(a.checked_mul(*b)),
        (OverrideOp::Add, _, _) => Ok(OptionValue::Float(to_f64(&lhs) + to_f64(&rhs))),
        (OverrideOp::Subtract, _, _) => Ok(OptionValue::Float(to_f64(&lhs) - to_f64(&rhs))),
        (OverrideOp::Multiply, _, _) => Ok(OptionValue::Float(to_f64(&lhs) * to_f64(&rhs))),
        (OverrideOp::Divide, _, _) => {
            let divisor = to_f64(&rhs);
            if divisor == 0.0 {
                Err(OverrideError::DivideByZero)
            } else {
                Ok(OptionValue::Float(to_f64(&lhs) / divisor))
            }
        }
        _ => return None,
    })
}

// --- Strings ---

fn apply_string(current: &str, op: OverrideOp, operand: &OptionValue) -> Option<OptionValue> {
    if !operand.is_textual() {
        return None;
    }
    let text = operand.to_string();
    match op {
        OverrideOp::Add => Some(OptionValue::String(format!("{current}{text}"))),
        OverrideOp::Subtract if text.is_empty() => Some(OptionValue::String(current.to_string())),
        OverrideOp::Subtract => Some(OptionValue::String(current.replacen(&text, "", 1))),
        _ => None,
    }
}

// --- Collections ---

fn elements(operand: &OptionValue) -> Option<Vec<OptionValue>> {
    match operand {
        OptionValue::Sequence(items) => Some(items.clone()),
        OptionValue::Set(items) => Some(items.iter().cloned().collect()),
        _ => None,
    }
}

fn indexes(operand: &OptionValue) -> Option<BTreeSet<i64>> {
    match operand {
        OptionValue::Int(i) => Some(BTreeSet::from([*i])),
        OptionValue::Sequence(_) | OptionValue::Set(_) => elements(operand)?
            .iter()
            .map(OptionValue::as_int)
            .collect(),
        _ => None,
    }
}

fn apply_sequence(
    items: &[OptionValue],
    op: OverrideOp,
    operand: &OptionValue,
) -> Option<OptionValue> {
    let mut result = items.to_vec();
    match op {
        OverrideOp::Add => result.push(operand.clone()),
        OverrideOp::Subtract => result.retain(|item| item != operand),
        OverrideOp::Multiply => result.extend(elements(operand)?),
        OverrideOp::Difference => {
            let doomed = indexes(operand)?;
            result = items
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    i64::try_from(*i).map_or(true, |i| !doomed.contains(&i))
                })
                .map(|(_, item)| item.clone())
                .collect();
        }
        _ => return None,
    }
    Some(OptionValue::Sequence(result))
}

fn apply_set(
    items: &BTreeSet<OptionValue>,
    op: OverrideOp,
    operand: &OptionValue,
) -> Option<OptionValue> {
    let mut result = items.clone();
    match op {
        OverrideOp::Add => {
            result.insert(operand.clone());
        }
        OverrideOp::Subtract => {
            result.remove(operand);
        }
        OverrideOp::Union => result.extend(elements(operand)?),
        OverrideOp::Intersect => {
            let other: BTreeSet<_> = elements(operand)?.into_iter().collect();
            result.retain(|item| other.contains(item));
        }
        OverrideOp::Difference => {
            for item in elements(operand)? {
                result.remove(&item);
            }
        }
        OverrideOp::SymmetricDifference => {
            let other: BTreeSet<_> = elements(operand)?.into_iter().collect();
            result = result.symmetric_difference(&other).cloned().collect();
        }
        _ => return None,
    }
    Some(OptionValue::Set(result))
}

fn apply_mapping(
    entries: &BTreeMap<String, OptionValue>,
    op: OverrideOp,
    operand: &OptionValue,
) -> Option<OptionValue> {
    let mut result = entries.clone();
    match (op, operand) {
        (OverrideOp::Add | OverrideOp::Union, OptionValue::Mapping(other)) => {
            result.extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        (OverrideOp::Subtract, OptionValue::String(key)) => {
            result.remove(key);
        }
        (OverrideOp::Subtract, OptionValue::Sequence(_) | OptionValue::Set(_)) => {
            for key in elements(operand)? {
                result.remove(key.as_str()?);
            }
        }
        _ => return None,
    }
    Some(OptionValue::Mapping(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> OptionValue {
        OptionValue::from(text)
    }

    #[test]
    fn test_replace_accepts_any_kind() {
        let result = apply(&OptionValue::Int(1), OverrideOp::Replace, &s("x")).unwrap();
        assert_eq!(result, s("x"));
    }

    #[test]
    fn test_numeric_operators() {
        let int = OptionValue::Int(7);
        assert_eq!(
            apply(&int, OverrideOp::Add, &OptionValue::Int(3)).unwrap(),
            OptionValue::Int(10)
        );
        assert_eq!(
            apply(&int, OverrideOp::Subtract, &OptionValue::Float(0.5)).unwrap(),
            OptionValue::Float(6.5)
        );
        assert_eq!(
            apply(&int, OverrideOp::Multiply, &OptionValue::Int(2)).unwrap(),
            OptionValue::Int(14)
        );
        // Division always produces a float.
        assert_eq!(
            apply(&OptionValue::Int(6), OverrideOp::Divide, &OptionValue::Int(3)).unwrap(),
            OptionValue::Float(2.0)
        );
        assert_eq!(
            apply(&int, OverrideOp::Negate, &OptionValue::None).unwrap(),
            OptionValue::Int(-7)
        );
    }

    #[test]
    fn test_numeric_errors() {
        assert_eq!(
            apply(&OptionValue::Int(1), OverrideOp::Divide, &OptionValue::Int(0)),
            Err(OverrideError::DivideByZero)
        );
        assert_eq!(
            apply(&OptionValue::Int(i64::MAX), OverrideOp::Add, &OptionValue::Int(1)),
            Err(OverrideError::Overflow)
        );
        assert!(matches!(
            apply(&OptionValue::Int(1), OverrideOp::Add, &s("2")),
            Err(OverrideError::TypeMismatch { .. })
        ));
        assert!(matches!(
            apply(&OptionValue::Int(1), OverrideOp::Union, &OptionValue::Int(2)),
            Err(OverrideError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_bool_negate() {
        let t = OptionValue::Bool(true);
        assert_eq!(
            apply(&t, OverrideOp::Negate, &OptionValue::None).unwrap(),
            OptionValue::Bool(false)
        );
        assert_eq!(
            apply(&t, OverrideOp::Negate, &OptionValue::Bool(true)).unwrap(),
            OptionValue::Bool(false)
        );
        assert_eq!(
            apply(&t, OverrideOp::Negate, &OptionValue::Bool(false)).unwrap(),
            OptionValue::Bool(true)
        );
        assert!(apply(&t, OverrideOp::Add, &OptionValue::Bool(true)).is_err());
    }

    #[test]
    fn test_string_operators() {
        assert_eq!(
            apply(&s("-O"), OverrideOp::Add, &OptionValue::Int(2)).unwrap(),
            s("-O2")
        );
        assert_eq!(
            apply(&s("abracadabra"), OverrideOp::Subtract, &s("abra")).unwrap(),
            s("cadabra")
        );
        assert!(apply(&s("a"), OverrideOp::Multiply, &OptionValue::Int(2)).is_err());
        assert!(apply(&s("a"), OverrideOp::Add, &OptionValue::from(vec!["b"])).is_err());
    }

    #[test]
    fn test_sequence_operators() {
        let seq = OptionValue::from(vec!["a", "b", "a", "c"]);
        assert_eq!(
            apply(&seq, OverrideOp::Add, &s("d")).unwrap(),
            OptionValue::from(vec!["a", "b", "a", "c", "d"])
        );
        assert_eq!(
            apply(&seq, OverrideOp::Subtract, &s("a")).unwrap(),
            OptionValue::from(vec!["b", "c"])
        );
        assert_eq!(
            apply(&seq, OverrideOp::Multiply, &OptionValue::from(vec!["x", "y"])).unwrap(),
            OptionValue::from(vec!["a", "b", "a", "c", "x", "y"])
        );
        assert_eq!(
            apply(&seq, OverrideOp::Difference, &OptionValue::from(vec![0, 2, 99])).unwrap(),
            OptionValue::from(vec!["b", "c"])
        );
        assert_eq!(
            apply(&seq, OverrideOp::Difference, &OptionValue::Int(-1)).unwrap(),
            seq
        );
        // Extending with a lone string is not allowed.
        assert!(apply(&seq, OverrideOp::Multiply, &s("x")).is_err());
        assert!(apply(&seq, OverrideOp::Difference, &s("a")).is_err());
    }

    #[test]
    fn test_set_operators() {
        let set = OptionValue::set_of(["a", "b", "c"]);
        assert_eq!(
            apply(&set, OverrideOp::Add, &s("d")).unwrap(),
            OptionValue::set_of(["a", "b", "c", "d"])
        );
        assert_eq!(
            apply(&set, OverrideOp::Subtract, &s("b")).unwrap(),
            OptionValue::set_of(["a", "c"])
        );
        assert_eq!(
            apply(&set, OverrideOp::Union, &OptionValue::from(vec!["c", "e"])).unwrap(),
            OptionValue::set_of(["a", "b", "c", "e"])
        );
        assert_eq!(
            apply(&set, OverrideOp::Intersect, &OptionValue::set_of(["b", "c", "z"])).unwrap(),
            OptionValue::set_of(["b", "c"])
        );
        assert_eq!(
            apply(&set, OverrideOp::Difference, &OptionValue::set_of(["a"])).unwrap(),
            OptionValue::set_of(["b", "c"])
        );
        assert_eq!(
            apply(
                &set,
                OverrideOp::SymmetricDifference,
                &OptionValue::set_of(["c", "d"])
            )
            .unwrap(),
            OptionValue::set_of(["a", "b", "d"])
        );
        assert!(matches!(
            apply(&set, OverrideOp::Union, &s("x")),
            Err(OverrideError::TypeMismatch {
                kind: ValueKind::Set,
                operand: ValueKind::String,
                ..
            })
        ));
        assert!(apply(&set, OverrideOp::Multiply, &OptionValue::set_of(["x"])).is_err());
    }

    #[test]
    fn test_mapping_operators() {
        let map = OptionValue::mapping_of([("a", 1), ("b", 2)]);
        assert_eq!(
            apply(&map, OverrideOp::Union, &OptionValue::mapping_of([("b", 3)])).unwrap(),
            OptionValue::mapping_of([("a", 1), ("b", 3)])
        );
        assert_eq!(
            apply(&map, OverrideOp::Add, &OptionValue::mapping_of([("c", 4)])).unwrap(),
            OptionValue::mapping_of([("a", 1), ("b", 2), ("c", 4)])
        );
        assert_eq!(
            apply(&map, OverrideOp::Subtract, &s("a")).unwrap(),
            OptionValue::mapping_of([("b", 2)])
        );
        assert_eq!(
            apply(&map, OverrideOp::Subtract, &OptionValue::from(vec!["a", "b"])).unwrap(),
            OptionValue::Mapping(BTreeMap::new())
        );
        assert!(apply(&map, OverrideOp::Intersect, &map).is_err());
    }

    #[test]
    fn test_none_accepts_only_replace() {
        for op in OverrideOp::ALL {
            let result = apply(&OptionValue::None, op, &OptionValue::Int(1));
            assert_eq!(result.is_ok(), op == OverrideOp::Replace, "operator {op}");
        }
    }

    #[test]
    fn test_suffix_round_trip() {
        for op in OverrideOp::ALL.iter().skip(1) {
            let suffix = op.symbol().chars().next().unwrap();
            assert_eq!(OverrideOp::from_suffix(suffix), Some(*op));
        }
        assert_eq!(OverrideOp::from_suffix('='), None);
    }
}
