// src/core/value.rs

//! The closed set of values an option can hold.
//!
//! Every option in a phase's table resolves to an [`OptionValue`]. Values are
//! totally ordered so they can live inside a [`OptionValue::Set`], and they
//! render to a canonical text form that is used when a value is interpolated
//! into the middle of a string.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A typed option value.
#[derive(Debug, Clone)]
pub enum OptionValue {
    /// The absence of a value.
    None,
    /// A boolean flag.
    Bool(bool),
    /// A signed 64-bit integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// Free text, possibly containing `{name}` placeholders.
    String(String),
    /// An ordered list; duplicates allowed.
    Sequence(Vec<OptionValue>),
    /// A collection of unique values.
    Set(BTreeSet<OptionValue>),
    /// String-keyed values.
    Mapping(BTreeMap<String, OptionValue>),
}

/// The kind tag of an [`OptionValue`], used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    /// See [`OptionValue::None`].
    None,
    /// See [`OptionValue::Bool`].
    Bool,
    /// See [`OptionValue::Int`].
    Int,
    /// See [`OptionValue::Float`].
    Float,
    /// See [`OptionValue::String`].
    String,
    /// See [`OptionValue::Sequence`].
    Sequence,
    /// See [`OptionValue::Set`].
    Set,
    /// See [`OptionValue::Mapping`].
    Mapping,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Sequence => "sequence",
            Self::Set => "set",
            Self::Mapping => "mapping",
        };
        f.write_str(name)
    }
}

impl OptionValue {
    /// Returns the kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::None => ValueKind::None,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::String(_) => ValueKind::String,
            Self::Sequence(_) => ValueKind::Sequence,
            Self::Set(_) => ValueKind::Set,
            Self::Mapping(_) => ValueKind::Mapping,
        }
    }

    /// Builds a set from any iterator of convertible values.
    pub fn set_of<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Self>,
    {
        Self::Set(items.into_iter().map(Into::into).collect())
    }

    /// Builds a mapping from `(key, value)` pairs.
    pub fn mapping_of<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Mapping(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// True for `Int` and `Float`.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// True for the scalar kinds that render naturally as text.
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::String(_) | Self::Int(_) | Self::Float(_) | Self::Bool(_)
        )
    }

    /// Flattens a string or a collection of scalars into a list of strings.
    ///
    /// A lone string yields one entry, an empty string yields none. Nested
    /// collections are rendered with their canonical form.
    pub fn to_string_list(&self) -> Option<Vec<String>> {
        match self {
            Self::None => Some(Vec::new()),
            Self::String(s) if s.is_empty() => Some(Vec::new()),
            Self::String(s) => Some(vec![s.clone()]),
            Self::Sequence(items) => Some(items.iter().map(ToString::to_string).collect()),
            Self::Set(items) => Some(items.iter().map(ToString::to_string).collect()),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::String(_) => 4,
            Self::Sequence(_) => 5,
            Self::Set(_) => 6,
            Self::Mapping(_) => 7,
        }
    }
}

// --- Ordering ---

impl PartialEq for OptionValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OptionValue {}

impl PartialOrd for OptionValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OptionValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::None, Self::None) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Sequence(a), Self::Sequence(b)) => a.cmp(b),
            (Self::Set(a), Self::Set(b)) => a.cmp(b),
            (Self::Mapping(a), Self::Mapping(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

// --- Canonical rendering ---

fn write_joined<'a, I>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    I: IntoIterator<Item = &'a OptionValue>,
{
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::String(s) => f.write_str(s),
            Self::Sequence(items) => {
                f.write_str("[")?;
                write_joined(f, items)?;
                f.write_str("]")
            }
            Self::Set(items) => {
                f.write_str("{")?;
                write_joined(f, items)?;
                f.write_str("}")
            }
            Self::Mapping(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// --- Conversions ---

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for OptionValue {
    fn from(value: Vec<T>) -> Self {
        Self::Sequence(value.into_iter().map(Into::into).collect())
    }
}
