// src/core/descriptor.rs

//! Loads a project descriptor (`kiln.json` / `kiln.toml`) into a
//! [`PhaseGraph`].
//!
//! A descriptor is one project object:
//!
//! ```json
//! {
//!   "name": "app",
//!   "options": { "build_dir": "out" },
//!   "phases": [
//!     { "name": "compile", "kind": "command",
//!       "options": { "command": "cc -c main.c -o {build_anchor}/main.o",
//!                    "outputs": ["{build_anchor}/main.o"] } },
//!     { "name": "link", "kind": "command", "depends_on": ["compile"],
//!       "options": { "command": "cc {build_anchor}/main.o -o {build_anchor}/app" } }
//!   ],
//!   "projects": ["libs/util", { "name": "docs", "phases": [] }]
//! }
//! ```
//!
//! Sub-projects are inline objects or paths to other descriptors (a file or
//! a directory holding one). Option keys may carry an operator suffix
//! (`flags+`) to push an override instead of setting a value, and
//! `{"$set": [...]}` denotes a set.

use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use crate::core::overrides::OptionOverride;
use crate::core::paths::{self, PathError};
use crate::core::phase::Phase;
use crate::core::phase_kinds;
use crate::core::value::OptionValue;
use crate::core::value_parser::{is_option_key, split_key_suffix};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SET_MARKER: &str = "$set";

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("Could not read descriptor '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid TOML in '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{path}: could not locate sub-project '{reference}': {source}")]
    SubProject {
        path: PathBuf,
        reference: String,
        #[source]
        source: PathError,
    },
    #[error("{path}: phase '{phase}' has unknown kind '{kind}' (known kinds: {known})")]
    UnknownKind {
        path: PathBuf,
        phase: String,
        kind: String,
        known: String,
    },
    #[error("{path}: '{dependent}' depends on unknown phase or project '{dependency}'")]
    UnknownDependency {
        path: PathBuf,
        dependent: String,
        dependency: String,
    },
    #[error("{path}: phase '{phase}' clones unknown phase '{original}'")]
    UnknownCloneSource {
        path: PathBuf,
        phase: String,
        original: String,
    },
    #[error("{path}: '{key}' is not a valid option name")]
    InvalidOptionKey { path: PathBuf, key: String },
    #[error("{path}: the descriptor includes itself")]
    IncludeCycle { path: PathBuf },
    #[error("{path}: {context}: {source}")]
    Graph {
        path: PathBuf,
        context: String,
        #[source]
        source: GraphError,
    },
}

// --- On-disk shapes ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectDescriptor {
    /// Defaults to the descriptor's directory name.
    pub name: Option<String>,
    pub options: BTreeMap<String, serde_json::Value>,
    pub phases: Vec<PhaseDescriptor>,
    pub projects: Vec<ProjectEntry>,
    /// Names of sibling projects (or phases of the parent) to build first.
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseDescriptor {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Copies an earlier phase of the same project instead of using `kind`.
    #[serde(default)]
    pub clone_of: Option<String>,
}

fn default_kind() -> String {
    "phase".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProjectEntry {
    Path(String),
    Inline(ProjectDescriptor),
}

// --- Value conversion ---

/// Converts a descriptor value. Strings are kept verbatim.
pub fn option_value(value: &serde_json::Value) -> OptionValue {
    use serde_json::Value;
    match value {
        Value::Null => OptionValue::None,
        Value::Bool(b) => OptionValue::Bool(*b),
        Value::Number(n) => n
            .as_i64()
            .map(OptionValue::Int)
            .or_else(|| n.as_f64().map(OptionValue::Float))
            .unwrap_or(OptionValue::None),
        Value::String(s) => OptionValue::String(s.clone()),
        Value::Array(items) => OptionValue::Sequence(items.iter().map(option_value).collect()),
        Value::Object(map) => match (map.len(), map.get(SET_MARKER)) {
            (1, Some(Value::Array(items))) => {
                OptionValue::Set(items.iter().map(option_value).collect())
            }
            _ => OptionValue::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), option_value(v)))
                    .collect(),
            ),
        },
    }
}

fn overrides(
    path: &Path,
    options: &BTreeMap<String, serde_json::Value>,
) -> Result<Vec<OptionOverride>, DescriptorError> {
    options
        .iter()
        .map(|(raw, value)| {
            let (key, op) = split_key_suffix(raw.trim());
            if !is_option_key(key) {
                return Err(DescriptorError::InvalidOptionKey {
                    path: path.to_path_buf(),
                    key: raw.clone(),
                });
            }
            Ok(OptionOverride::new(key, op, option_value(value)))
        })
        .collect()
}

// --- Loading ---

fn parse_file(path: &Path) -> Result<ProjectDescriptor, DescriptorError> {
    let text = fs::read_to_string(path).map_err(|e| DescriptorError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_str(path, &text)
}

/// Parses descriptor text, choosing TOML for `.toml` paths and JSON
/// otherwise.
pub fn parse_str(path: &Path, text: &str) -> Result<ProjectDescriptor, DescriptorError> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(text).map_err(|e| DescriptorError::Toml {
            path: path.to_path_buf(),
            source: e,
        })
    } else {
        serde_json::from_str(text).map_err(|e| DescriptorError::Json {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Loads the descriptor at `path` and everything it references into a
/// finalized graph whose root is the top-level project.
pub fn load_descriptor(path: &Path) -> Result<PhaseGraph, DescriptorError> {
    log::debug!("Loading descriptor {}", path.display());
    let descriptor = parse_file(path)?;
    let mut builder = GraphBuilder {
        graph: PhaseGraph::new(),
        open_files: vec![path.to_path_buf()],
    };
    let root = builder.project(&descriptor, path)?;
    let mut graph = builder.graph;
    graph.set_root(root);
    graph.finalize_names().map_err(|e| DescriptorError::Graph {
        path: path.to_path_buf(),
        context: "naming phases".to_string(),
        source: e,
    })?;
    log::debug!("Descriptor produced {} phase(s)", graph.len());
    Ok(graph)
}

struct GraphBuilder {
    graph: PhaseGraph,
    /// Descriptor files being loaded, outermost first.
    open_files: Vec<PathBuf>,
}

fn directory_of(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

impl GraphBuilder {
    fn graph_error(path: &Path, context: String) -> impl FnOnce(GraphError) -> DescriptorError {
        let path = path.to_path_buf();
        move |source| DescriptorError::Graph {
            path,
            context,
            source,
        }
    }

    /// Builds one project and returns its boundary phase.
    fn project(&mut self, descriptor: &ProjectDescriptor, path: &Path) -> Result<PhaseId, DescriptorError> {
        let anchor = directory_of(path);
        let name = descriptor.name.clone().unwrap_or_else(|| {
            anchor
                .file_name()
                .map_or_else(|| "project".to_string(), |n| n.to_string_lossy().into_owned())
        });
        let project_overrides = overrides(path, &descriptor.options)?;
        let identity = [
            OptionOverride::replace("project_anchor", anchor.display().to_string()),
            OptionOverride::replace("name", name.as_str()),
        ];

        let project = Phase::new("project", &identity)
            .map_err(Self::graph_error(path, format!("project '{}'", name)))?;
        let project_id = self.graph.add_phase(project);

        // Phases and sub-projects addressable from `depends_on`.
        let mut local: HashMap<String, PhaseId> = HashMap::new();
        // Each phase's own options, pushed once the project's are in place.
        let mut own_options: HashMap<String, Vec<OptionOverride>> = HashMap::new();
        let mut phases = Vec::new();

        for entry in &descriptor.phases {
            let (id, own) = self.phase(entry, &anchor, &local, &own_options, path)?;
            local.entry(entry.name.clone()).or_insert(id);
            own_options.entry(entry.name.clone()).or_insert_with(|| own.clone());
            phases.push((id, own, entry));
        }
        let mut members: Vec<PhaseId> = phases.iter().map(|(id, _, _)| *id).collect();

        let mut subprojects = Vec::new();
        for entry in &descriptor.projects {
            let (sub, sub_path) = match entry {
                ProjectEntry::Inline(sub) => (sub.clone(), path.to_path_buf()),
                ProjectEntry::Path(reference) => self.referenced(reference, &anchor, path)?,
            };
            let sub_id = self.project(&sub, &sub_path)?;
            if matches!(entry, ProjectEntry::Path(_)) {
                self.open_files.pop();
            }
            let sub_name = self
                .graph
                .phase(sub_id)
                .name()
                .map_err(|e| Self::graph_error(path, "sub-project name".to_string())(e.into()))?;
            local.entry(sub_name).or_insert(sub_id);
            members.push(sub_id);
            subprojects.push((sub, sub_id));
        }

        // Dependencies may point forward, so they are wired once everything
        // exists.
        let phase_deps = phases
            .iter()
            .map(|(id, _, entry)| (entry.name.as_str(), *id, entry.depends_on.as_slice()));
        let project_deps = subprojects
            .iter()
            .map(|(sub, id)| (sub.name.as_deref().unwrap_or("project"), *id, sub.depends_on.as_slice()));
        for (dependent, id, depends_on) in phase_deps.chain(project_deps) {
            for dependency in depends_on {
                let target = local.get(dependency).copied().ok_or_else(|| {
                    DescriptorError::UnknownDependency {
                        path: path.to_path_buf(),
                        dependent: dependent.to_string(),
                        dependency: dependency.clone(),
                    }
                })?;
                self.graph
                    .add_dependency(id, target)
                    .map_err(Self::graph_error(path, format!("'{}' -> '{}'", dependent, dependency)))?;
            }
        }

        for member in members {
            self.graph
                .add_dependency(project_id, member)
                .map_err(Self::graph_error(path, format!("project '{}'", name)))?;
        }

        // Project options reach the project and its phases but stop at
        // sub-project boundaries. Phase options go on top.
        self.graph
            .push_options(project_id, &project_overrides, true, false)
            .map_err(Self::graph_error(path, format!("options of project '{}'", name)))?;
        for (id, own, entry) in phases {
            self.graph
                .phase_mut(id)
                .push_all(&own)
                .map_err(|e| Self::graph_error(path, format!("phase '{}'", entry.name))(e.into()))?;
        }
        Ok(project_id)
    }

    /// Creates the phase for `entry` carrying only its identity, and returns
    /// the options still to be pushed onto it. A clone takes its source's
    /// options followed by its own.
    fn phase(
        &mut self,
        entry: &PhaseDescriptor,
        anchor: &Path,
        local: &HashMap<String, PhaseId>,
        own_options: &HashMap<String, Vec<OptionOverride>>,
        path: &Path,
    ) -> Result<(PhaseId, Vec<OptionOverride>), DescriptorError> {
        let own = overrides(path, &entry.options)?;
        let context = format!("phase '{}'", entry.name);

        let (phase, pending) = if let Some(original) = &entry.clone_of {
            let source = local.get(original).copied().ok_or_else(|| DescriptorError::UnknownCloneSource {
                path: path.to_path_buf(),
                phase: entry.name.clone(),
                original: original.clone(),
            })?;
            let copy = self
                .graph
                .clone_phase(source, &[OptionOverride::replace("name", entry.name.as_str())])
                .map_err(Self::graph_error(path, context))?;
            let mut pending = own_options.get(original).cloned().unwrap_or_default();
            pending.extend(own);
            (copy, pending)
        } else {
            if phase_kinds::find_kind(&entry.kind).is_none() {
                return Err(DescriptorError::UnknownKind {
                    path: path.to_path_buf(),
                    phase: entry.name.clone(),
                    kind: entry.kind.clone(),
                    known: phase_kinds::kind_names().collect::<Vec<_>>().join(", "),
                });
            }
            let identity = [
                OptionOverride::replace("project_anchor", anchor.display().to_string()),
                OptionOverride::replace("name", entry.name.as_str()),
            ];
            let phase = Phase::new(&entry.kind, &identity).map_err(Self::graph_error(path, context))?;
            (phase, own)
        };
        Ok((self.graph.add_phase(phase), pending))
    }

    /// Reads a sub-project given by path. The caller pops `open_files` once
    /// the sub-project is built.
    fn referenced(
        &mut self,
        reference: &str,
        anchor: &Path,
        path: &Path,
    ) -> Result<(ProjectDescriptor, PathBuf), DescriptorError> {
        let sub_path = paths::resolve_descriptor_path(Some(reference), anchor).map_err(|e| {
            DescriptorError::SubProject {
                path: path.to_path_buf(),
                reference: reference.to_string(),
                source: e,
            }
        })?;
        let canonical = dunce::canonicalize(&sub_path).unwrap_or_else(|_| sub_path.clone());
        let is_open = self
            .open_files
            .iter()
            .any(|open| dunce::canonicalize(open).unwrap_or_else(|_| open.clone()) == canonical);
        if is_open {
            return Err(DescriptorError::IncludeCycle { path: sub_path });
        }
        let sub = parse_file(&sub_path)?;
        self.open_files.push(sub_path.clone());
        Ok((sub, sub_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address::PhaseAddress;
    use tempfile::tempdir;

    fn find(graph: &PhaseGraph, group: &str, name: &str) -> PhaseId {
        graph
            .find(&PhaseAddress::new(group, name))
            .unwrap_or_else(|| panic!("no phase {group}.{name}"))
    }

    #[test]
    fn test_option_value_conversion() {
        let json: serde_json::Value = serde_json::from_str(
            r#"{ "n": 3, "f": 1.5, "s": "{x}", "seq": [1, "a"], "set": {"$set": ["b", "a", "b"]},
                 "map": {"k": true}, "nothing": null }"#,
        )
        .unwrap();
        let value = option_value(&json);
        let map = value.as_mapping().unwrap();
        assert_eq!(map["n"], OptionValue::Int(3));
        assert_eq!(map["f"], OptionValue::Float(1.5));
        assert_eq!(map["s"], OptionValue::from("{x}"));
        assert_eq!(map["seq"], OptionValue::from(vec![OptionValue::Int(1), OptionValue::from("a")]));
        assert_eq!(map["set"], OptionValue::set_of(["a", "b"]));
        assert_eq!(map["map"], OptionValue::mapping_of([("k", true)]));
        assert_eq!(map["nothing"], OptionValue::None);
    }

    #[test]
    fn test_load_json_project() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("kiln.json");
        fs::write(
            &path,
            r#"{
                "name": "app",
                "options": { "build_dir": "out" },
                "phases": [
                    { "name": "link", "kind": "command", "depends_on": ["compile"],
                      "options": { "command": "cc -o app", "outputs": ["{build_anchor}/app"] } },
                    { "name": "compile", "kind": "command",
                      "options": { "command": "cc -c", "flags": ["-O2"], "flags+": "-g" } }
                ]
            }"#,
        )
        .unwrap();

        // --- Execute ---
        let graph = load_descriptor(&path).unwrap();

        // --- Assert ---
        let root = graph.root().unwrap();
        assert_eq!(graph.phase(root).name().unwrap(), "app");
        assert_eq!(graph.phase(root).group().unwrap(), "");
        let link = find(&graph, "app", "link");
        let compile = find(&graph, "app", "compile");
        assert_eq!(graph.dependencies(link), &[compile]);
        assert_eq!(graph.dependencies(root), &[link, compile]);

        let anchor = directory_of(&path).display().to_string();
        assert_eq!(
            graph.phase(link).opt_str("build_anchor").unwrap(),
            format!("{anchor}/out")
        );
        assert_eq!(
            graph.phase(compile).opt("flags").unwrap(),
            OptionValue::from(vec!["-O2", "-g"])
        );
        assert_eq!(graph.phase(compile).options().depth("flags"), 2);
    }

    #[test]
    fn test_load_toml_with_nested_and_referenced_projects() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("util")).unwrap();
        fs::write(
            dir.path().join("util/kiln.toml"),
            r#"
            name = "util"
            [[phases]]
            name = "compile"
            kind = "command"
            "#,
        )
        .unwrap();
        let path = dir.path().join("kiln.toml");
        fs::write(
            &path,
            r#"
            name = "app"
            projects = ["util", { name = "docs", depends_on = ["util"], phases = [{ name = "compile", kind = "write" }] }]

            [[phases]]
            name = "compile"
            kind = "command"
            depends_on = ["util"]
            "#,
        )
        .unwrap();

        // --- Execute ---
        let graph = load_descriptor(&path).unwrap();

        // --- Assert ---
        let app_compile = find(&graph, "app", "compile");
        let util = find(&graph, "app", "util");
        let util_compile = find(&graph, "util", "compile");
        let docs = find(&graph, "app", "docs");
        let docs_compile = find(&graph, "docs", "compile");
        assert_eq!(graph.dependencies(app_compile), &[util]);
        assert_eq!(graph.dependencies(util), &[util_compile]);
        assert_eq!(graph.dependencies(docs), &[docs_compile, util]);
        assert!(graph.phase(util).is_boundary());
        assert_eq!(
            graph.phase(util_compile).opt_str("project_anchor").unwrap(),
            dunce::canonicalize(dir.path().join("util")).unwrap().display().to_string()
        );
    }

    #[test]
    fn test_project_options_stop_at_sub_projects() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let path = dir.path().join("kiln.json");
        fs::write(
            &path,
            r#"{
                "name": "app",
                "options": { "mode": "fast", "build_dir": "out" },
                "phases": [
                    { "name": "a", "kind": "command" },
                    { "name": "b", "kind": "command", "options": { "mode": "slow" } },
                    { "name": "c", "clone_of": "b", "options": { "mode+": "er" } }
                ],
                "projects": [{ "name": "lib", "phases": [{ "name": "a", "kind": "command" }] }]
            }"#,
        )
        .unwrap();

        // --- Execute ---
        let graph = load_descriptor(&path).unwrap();

        // --- Assert ---
        let root = graph.root().unwrap();
        assert_eq!(graph.phase(root).opt_str("mode").unwrap(), "fast");
        assert_eq!(graph.phase(find(&graph, "app", "a")).opt_str("mode").unwrap(), "fast");
        // The phase's own options are pushed after the project's.
        let b = find(&graph, "app", "b");
        assert_eq!(graph.phase(b).opt_str("mode").unwrap(), "slow");
        assert_eq!(graph.phase(b).options().depth("mode"), 2);
        let c = find(&graph, "app", "c");
        assert_eq!(graph.phase(c).opt_str("mode").unwrap(), "slower");
        assert_eq!(graph.phase(c).options().depth("mode"), 3);
        // Sub-projects keep their own defaults.
        let lib = find(&graph, "app", "lib");
        assert!(!graph.phase(lib).options().contains("mode"));
        assert!(!graph.phase(find(&graph, "lib", "a")).options().contains("mode"));
        assert_eq!(graph.phase(lib).opt_str("build_dir").unwrap(), "build");
    }

    #[test]
    fn test_clone_of_copies_options() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kiln.json");
        fs::write(
            &path,
            r#"{ "name": "p", "phases": [
                { "name": "debug", "kind": "command", "options": { "command": "cc {mode}", "mode": "-g" } },
                { "name": "release", "clone_of": "debug", "options": { "mode": "-O2" } }
            ] }"#,
        )
        .unwrap();

        let graph = load_descriptor(&path).unwrap();

        let debug = find(&graph, "p", "debug");
        let release = find(&graph, "p", "release");
        assert_eq!(graph.phase(release).kind(), "command");
        assert_eq!(graph.phase(release).opt_str("command").unwrap(), "cc -O2");
        assert_eq!(graph.phase(debug).opt_str("command").unwrap(), "cc -g");
    }

    #[test]
    fn test_errors_carry_context() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kiln.json");
        let load = |text: &str| {
            fs::write(&path, text).unwrap();
            load_descriptor(&path).unwrap_err()
        };

        assert!(matches!(
            load(r#"{ "phases": [{ "name": "x", "kind": "rocket" }] }"#),
            DescriptorError::UnknownKind { .. }
        ));
        assert!(matches!(
            load(r#"{ "phases": [{ "name": "x", "depends_on": ["ghost"] }] }"#),
            DescriptorError::UnknownDependency { .. }
        ));
        assert!(matches!(
            load(r#"{ "phases": [{ "name": "x", "clone_of": "ghost" }] }"#),
            DescriptorError::UnknownCloneSource { .. }
        ));
        assert!(matches!(
            load(r#"{ "phases": [{ "name": "a", "depends_on": ["b"] }, { "name": "b", "depends_on": ["a"] }] }"#),
            DescriptorError::Graph { source: GraphError::Cycle { .. }, .. }
        ));
        assert!(matches!(
            load(r#"{ "options": { "bad key": 1 } }"#),
            DescriptorError::InvalidOptionKey { .. }
        ));
        assert!(matches!(load("{ not json"), DescriptorError::Json { .. }));
        assert!(matches!(load(r#"{ "surprise": 1 }"#), DescriptorError::Json { .. }));
    }

    #[test]
    fn test_self_reference_is_an_include_cycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kiln.json");
        fs::write(&path, r#"{ "name": "loop", "projects": ["."] }"#).unwrap();
        assert!(matches!(
            load_descriptor(&path).unwrap_err(),
            DescriptorError::IncludeCycle { .. }
        ));
    }

    #[test]
    fn test_name_defaults_to_directory() {
        let dir = tempdir().unwrap();
        let project_dir = dir.path().join("widget");
        fs::create_dir(&project_dir).unwrap();
        let path = project_dir.join("kiln.json");
        fs::write(&path, "{}").unwrap();

        let graph = load_descriptor(&path).unwrap();
        assert_eq!(graph.phase(graph.root().unwrap()).name().unwrap(), "widget");
    }
}
