// src/core/phase.rs

//! A named unit of work: an option table, a capability table of action
//! handlers, and an action map that routes unsupported actions to others.

use crate::core::address::PhaseAddress;
use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use crate::core::options::{OptionError, OptionTable};
use crate::core::overrides::{OptionOverride, Override, OverrideOp};
use crate::core::phase_kinds;
use crate::core::value::{OptionValue, ValueKind};
use crate::models::Step;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Produces the steps a phase contributes to an action.
pub type ActionHandler = fn(&ActionContext<'_>) -> Result<Vec<Step>, GraphError>;

/// What a handler sees: the whole graph (read-only), its own phase and the
/// action being run.
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub graph: &'a PhaseGraph,
    pub id: PhaseId,
    pub action: &'a str,
}

impl<'a> ActionContext<'a> {
    pub fn phase(&self) -> &'a Phase {
        self.graph.phase(self.id)
    }
}

#[derive(Debug, Clone)]
pub struct Phase {
    kind: String,
    options: OptionTable,
    boundary: bool,
    capabilities: BTreeMap<String, ActionHandler>,
    action_map: BTreeMap<String, Vec<String>>,
}

impl Phase {
    /// A phase with no options and no actions.
    pub fn bare(kind: &str, boundary: bool) -> Self {
        Self {
            kind: kind.to_string(),
            options: OptionTable::new(),
            boundary,
            capabilities: BTreeMap::new(),
            action_map: BTreeMap::new(),
        }
    }

    /// Instantiates a registered kind and applies `overrides` on top of its
    /// defaults.
    pub fn new(kind: &str, overrides: &[OptionOverride]) -> Result<Self, GraphError> {
        let definition = phase_kinds::find_kind(kind).ok_or_else(|| GraphError::UnknownKind {
            kind: kind.to_string(),
        })?;
        let mut phase = definition.instantiate()?;
        phase.push_all(overrides)?;
        Ok(phase)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is_boundary(&self) -> bool {
        self.boundary
    }

    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    // --- Options ---

    pub fn push(&mut self, expr: &OptionOverride) -> Result<(), OptionError> {
        self.options.apply(expr)
    }

    /// Pushes every override or none of them.
    pub fn push_all(&mut self, overrides: &[OptionOverride]) -> Result<(), OptionError> {
        let mut staged = self.options.clone();
        overrides.iter().try_for_each(|o| staged.apply(o))?;
        self.options = staged;
        Ok(())
    }

    /// Sets (or creates) `key` with a `Replace` override.
    pub fn set(&mut self, key: &str, value: impl Into<OptionValue>) -> Result<(), OptionError> {
        self.options.push(key, OverrideOp::Replace, value.into())
    }

    pub fn pop(&mut self, key: &str) -> Result<Override, OptionError> {
        self.options.pop(key)
    }

    /// The resolved value of `key`.
    pub fn opt(&self, key: &str) -> Result<OptionValue, OptionError> {
        self.options.resolve(key)
    }

    fn wrong_kind(key: &str, expected: ValueKind, found: &OptionValue) -> OptionError {
        OptionError::WrongKind {
            key: key.to_string(),
            expected,
            found: found.kind(),
        }
    }

    /// Resolves a string option; ints, floats and bools are rendered.
    pub fn opt_str(&self, key: &str) -> Result<String, OptionError> {
        match self.opt(key)? {
            OptionValue::String(s) => Ok(s),
            OptionValue::None => Ok(String::new()),
            v if v.is_textual() => Ok(v.to_string()),
            other => Err(Self::wrong_kind(key, ValueKind::String, &other)),
        }
    }

    pub fn opt_bool(&self, key: &str) -> Result<bool, OptionError> {
        let value = self.opt(key)?;
        value
            .as_bool()
            .ok_or_else(|| Self::wrong_kind(key, ValueKind::Bool, &value))
    }

    pub fn opt_int(&self, key: &str) -> Result<i64, OptionError> {
        let value = self.opt(key)?;
        value
            .as_int()
            .ok_or_else(|| Self::wrong_kind(key, ValueKind::Int, &value))
    }

    /// Resolves a string or a collection of scalars as a list of strings.
    pub fn opt_strings(&self, key: &str) -> Result<Vec<String>, OptionError> {
        let value = self.opt(key)?;
        value
            .to_string_list()
            .ok_or_else(|| Self::wrong_kind(key, ValueKind::Sequence, &value))
    }

    /// Resolves a path option; relative paths are taken from `base`.
    pub fn opt_path(&self, key: &str, base: &Path) -> Result<PathBuf, OptionError> {
        Ok(anchor(base, &self.opt_str(key)?))
    }

    /// Resolves a list of paths; relative entries are taken from `base`.
    pub fn opt_paths(&self, key: &str, base: &Path) -> Result<Vec<PathBuf>, OptionError> {
        Ok(self
            .opt_strings(key)?
            .iter()
            .map(|p| anchor(base, p))
            .collect())
    }

    /// Resolves a mapping option into string pairs, rendering values.
    pub fn opt_string_map(&self, key: &str) -> Result<BTreeMap<String, String>, OptionError> {
        let value = self.opt(key)?;
        let entries = value
            .as_mapping()
            .ok_or_else(|| Self::wrong_kind(key, ValueKind::Mapping, &value))?;
        Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect())
    }

    // --- Identity ---

    pub fn name(&self) -> Result<String, OptionError> {
        self.opt_str("name")
    }

    pub fn group(&self) -> Result<String, OptionError> {
        self.opt_str("group")
    }

    pub fn address(&self) -> Result<PhaseAddress, OptionError> {
        Ok(PhaseAddress::new(&self.group()?, &self.name()?))
    }

    /// Address for log and report lines, tolerating broken options.
    pub fn label(&self) -> String {
        self.address()
            .map_or_else(|_| format!("<{}>", self.kind), |a| a.to_string())
    }

    // --- Capabilities ---

    /// Adds or replaces the handler for `action`.
    pub fn register_action(&mut self, action: &str, handler: ActionHandler) {
        self.capabilities.insert(action.to_string(), handler);
    }

    /// Routes `action` to `targets` when the phase has no handler for it.
    pub fn map_action(&mut self, action: &str, targets: &[&str]) {
        self.action_map.insert(
            action.to_string(),
            targets.iter().map(ToString::to_string).collect(),
        );
    }

    pub fn handler(&self, action: &str) -> Option<ActionHandler> {
        self.capabilities.get(action).copied()
    }

    pub fn mapped_actions(&self, action: &str) -> Option<&[String]> {
        self.action_map.get(action).map(Vec::as_slice)
    }

    /// Every action this phase answers to, directly or through its map.
    pub fn supported_actions(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self
            .capabilities
            .keys()
            .chain(self.action_map.keys())
            .collect();
        names.into_iter().cloned().collect()
    }
}

fn anchor(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_steps(_: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
        Ok(Vec::new())
    }

    #[test]
    fn test_new_applies_overrides_over_kind_defaults() {
        let phase = Phase::new(
            "command",
            &[
                OptionOverride::replace("name", "compile"),
                OptionOverride::replace("verbosity", 2),
            ],
        )
        .unwrap();
        assert_eq!(phase.name().unwrap(), "compile");
        assert_eq!(phase.opt_int("verbosity").unwrap(), 2);
        assert_eq!(phase.kind(), "command");
    }

    #[test]
    fn test_unknown_kind() {
        assert!(matches!(
            Phase::new("nope", &[]),
            Err(GraphError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_push_all_is_all_or_nothing() {
        let mut phase = Phase::bare("phase", false);
        phase.set("n", 1).unwrap();
        let batch = [
            OptionOverride::new("n", OverrideOp::Add, 1),
            OptionOverride::new("n", OverrideOp::Intersect, 2),
        ];
        assert!(phase.push_all(&batch).is_err());
        assert_eq!(phase.opt_int("n").unwrap(), 1);
        assert_eq!(phase.options().depth("n"), 1);
    }

    #[test]
    fn test_typed_accessors() {
        // --- Setup ---
        let mut phase = Phase::bare("phase", false);
        phase.set("files", vec!["a.c", "/abs/b.c"]).unwrap();
        phase.set("flag", true).unwrap();
        phase.set("env", OptionValue::mapping_of([("CC", "gcc")])).unwrap();

        // --- Assert ---
        assert_eq!(
            phase.opt_paths("files", Path::new("/src")).unwrap(),
            vec![PathBuf::from("/src/a.c"), PathBuf::from("/abs/b.c")]
        );
        assert!(phase.opt_bool("flag").unwrap());
        assert!(matches!(
            phase.opt_int("flag"),
            Err(OptionError::WrongKind { .. })
        ));
        assert_eq!(
            phase.opt_string_map("env").unwrap().get("CC").map(String::as_str),
            Some("gcc")
        );
    }

    #[test]
    fn test_supported_actions_merge_handlers_and_map() {
        let mut phase = Phase::bare("phase", false);
        phase.register_action("build", no_steps);
        phase.map_action("rebuild", &["clean", "build"]);
        assert_eq!(phase.supported_actions(), vec!["build", "rebuild"]);
        assert!(phase.handler("build").is_some());
        assert_eq!(
            phase.mapped_actions("rebuild"),
            Some(&["clean".to_string(), "build".to_string()][..])
        );
    }

    #[test]
    fn test_clone_shares_no_state() {
        let mut original = Phase::bare("phase", false);
        original.set("x", 1).unwrap();
        let mut copy = original.clone();
        copy.set("x", 2).unwrap();
        assert_eq!(original.opt_int("x").unwrap(), 1);
        assert_eq!(copy.opt_int("x").unwrap(), 2);
    }
}
