// src/core/address.rs

//! Phase addresses (`group.name`) and selectors over them.

use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use std::collections::HashSet;
use std::fmt;

/// The wildcard that matches any group or any name.
pub const WILDCARD: &str = "@";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseAddress {
    pub group: String,
    pub name: String,
}

impl PhaseAddress {
    pub fn new(group: &str, name: &str) -> Self {
        Self {
            group: group.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for PhaseAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.group, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Any,
    Exact(String),
}

impl Pattern {
    fn parse(text: &str) -> Self {
        if text == WILDCARD {
            Self::Any
        } else {
            Self::Exact(text.to_string())
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(s) => s == candidate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    group: Pattern,
    name: Pattern,
}

/// A comma-separated list of phase labels.
///
/// `name` and `.name` address a phase in the default group (the root
/// project's name), `group.name` is fully qualified, and `@` matches
/// anything on either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    labels: Vec<Label>,
}

impl Selector {
    pub fn parse(text: &str, default_group: &str) -> Self {
        let mut labels = Vec::new();
        for label in text.split(',').map(str::trim).filter(|l| !l.is_empty()) {
            let (group, name) = match label.split_once('.') {
                Some(("", name)) => (default_group, name),
                Some((group, name)) => (group, name),
                None => {
                    // A bare name also reaches ungrouped phases such as the
                    // root project.
                    labels.push(Label {
                        group: Pattern::Exact(String::new()),
                        name: Pattern::parse(label),
                    });
                    (default_group, label)
                }
            };
            labels.push(Label {
                group: Pattern::parse(group),
                name: Pattern::parse(name),
            });
        }
        Self {
            source: text.to_string(),
            labels,
        }
    }

    /// `@.@`: every phase.
    pub fn all() -> Self {
        Self {
            source: format!("{WILDCARD}.{WILDCARD}"),
            labels: vec![Label {
                group: Pattern::Any,
                name: Pattern::Any,
            }],
        }
    }

    pub fn matches(&self, address: &PhaseAddress) -> bool {
        self.labels
            .iter()
            .any(|l| l.group.matches(&address.group) && l.name.matches(&address.name))
    }

    /// Matching phases in dependency-first order, each once. An empty result
    /// is not an error.
    pub fn resolve(&self, graph: &PhaseGraph) -> Result<Vec<PhaseId>, GraphError> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for id in graph.ordered() {
            let address = graph.phase(id).address()?;
            if self.matches(&address) && seen.insert(id) {
                selected.push(id);
            }
        }
        log::debug!("Selector '{}' matched {} phase(s)", self.source, selected.len());
        Ok(selected)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
