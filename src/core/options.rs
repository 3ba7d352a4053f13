// src/core/options.rs

//! Per-phase option stacks.
//!
//! Each key owns a stack of [`Override`]s. The first entry is the default;
//! later entries transform it in push order when the key is resolved.

use crate::core::interpolator::Interpolator;
use crate::core::overrides::{OptionOverride, Override, OverrideError, OverrideOp};
use crate::core::value::{OptionValue, ValueKind};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionError {
    #[error("option '{key}': operator '{op}' is not valid for a {kind} value with a {operand} operand")]
    OverrideType {
        key: String,
        kind: ValueKind,
        op: OverrideOp,
        operand: ValueKind,
    },
    #[error("option '{key}': division by zero")]
    DivideByZero { key: String },
    #[error("option '{key}': integer overflow")]
    Overflow { key: String },
    #[error("option '{key}' has only its default value; nothing to pop")]
    StackUnderflow { key: String },
    #[error("option '{key}' is not defined")]
    UnknownOption { key: String },
    #[error("interpolation cycle: {chain}")]
    InterpolationCycle { chain: String },
    #[error("expanding '{template}' took more than {limit} substitutions")]
    ExpansionLimit { template: String, limit: usize },
    #[error("option '{key}' resolved to a {found} value, expected {expected}")]
    WrongKind {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },
}

impl OptionError {
    /// Wraps an algebra failure with the key it happened on.
    pub fn from_override(key: &str, source: OverrideError) -> Self {
        let key = key.to_string();
        match source {
            OverrideError::TypeMismatch { op, kind, operand } => Self::OverrideType {
                key,
                kind,
                op,
                operand,
            },
            OverrideError::DivideByZero => Self::DivideByZero { key },
            OverrideError::Overflow => Self::Overflow { key },
        }
    }

    /// True for errors produced by applying an operator.
    pub fn is_override_failure(&self) -> bool {
        matches!(
            self,
            Self::OverrideType { .. } | Self::DivideByZero { .. } | Self::Overflow { .. }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptionTable {
    stacks: BTreeMap<String, Vec<Override>>,
    next_index: usize,
}

impl OptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes `operand` with `op` onto `key`'s stack.
    ///
    /// A `Replace` on an absent key creates it. The key is re-resolved after
    /// the push and the push is undone if an operator cannot be applied.
    /// Resolution failures of other kinds (for example a reference to an
    /// option that is defined later) are left for resolution time.
    pub fn push(
        &mut self,
        key: &str,
        op: OverrideOp,
        operand: OptionValue,
    ) -> Result<(), OptionError> {
        if op != OverrideOp::Replace && !self.stacks.contains_key(key) {
            return Err(OptionError::UnknownOption {
                key: key.to_string(),
            });
        }

        let index = self.next_index;
        self.next_index += 1;
        self.stacks.entry(key.to_string()).or_default().push(Override {
            op,
            operand,
            index,
        });

        if let Err(e) = self.resolve(key) {
            if e.is_override_failure() {
                self.undo_push(key);
                return Err(e);
            }
            log::trace!("Deferring resolution of '{}': {}", key, e);
        }
        Ok(())
    }

    /// Pushes a keyed override expression.
    pub fn apply(&mut self, expr: &OptionOverride) -> Result<(), OptionError> {
        self.push(&expr.key, expr.op, expr.operand.clone())
    }

    fn undo_push(&mut self, key: &str) {
        let now_empty = match self.stacks.get_mut(key) {
            Some(stack) => {
                stack.pop();
                stack.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.stacks.remove(key);
        }
    }

    /// Removes the most recent override of `key`; the default cannot be
    /// popped.
    pub fn pop(&mut self, key: &str) -> Result<Override, OptionError> {
        let stack = self
            .stacks
            .get_mut(key)
            .ok_or_else(|| OptionError::UnknownOption {
                key: key.to_string(),
            })?;
        if stack.len() < 2 {
            return Err(OptionError::StackUnderflow {
                key: key.to_string(),
            });
        }
        stack.pop().ok_or_else(|| OptionError::StackUnderflow {
            key: key.to_string(),
        })
    }

    /// The raw override stack of `key`, default first.
    pub fn raw(&self, key: &str) -> Result<&[Override], OptionError> {
        self.stacks
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| OptionError::UnknownOption {
                key: key.to_string(),
            })
    }

    /// Fully interpolated, folded value of `key`.
    pub fn resolve(&self, key: &str) -> Result<OptionValue, OptionError> {
        Interpolator::new(self).resolve(key)
    }

    /// Interpolates `{name}` placeholders in an arbitrary value.
    pub fn expand(&self, value: &OptionValue) -> Result<OptionValue, OptionError> {
        Interpolator::new(self).expand_value(value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.stacks.contains_key(key)
    }

    pub fn depth(&self, key: &str) -> usize {
        self.stacks.get(key).map_or(0, Vec::len)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.stacks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }
}
