// src/core/phase_kinds.rs

//! The built-in phase kinds and their action handlers.
//!
//! Each kind is a static entry in [`KIND_REGISTRY`]: default options, a file
//! declaration function for the ledger, and a table of actions. Every kind
//! also carries the base reporting actions, `clean`, and the base action map.

use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use crate::core::ledger::{self, FileOperationLedger};
use crate::core::options::OptionError;
use crate::core::phase::{ActionContext, ActionHandler, Phase};
use crate::core::report;
use crate::core::value::OptionValue;
use crate::models::{FileData, FileOperation, Invocation, Step, StepWork};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// --- Kind Definition and Registry ---

/// Binds an action name to its handler.
#[derive(Debug)]
pub struct ActionDefinition {
    pub name: &'static str,
    pub handler: ActionHandler,
}

/// Declares the files a phase reads and writes.
pub type FilesFn = fn(&PhaseGraph, PhaseId) -> Result<Vec<FileOperation>, GraphError>;

#[derive(Debug)]
pub struct PhaseKind {
    pub name: &'static str,
    /// Boundary kinds stop option propagation and name a group.
    pub boundary: bool,
    pub defaults: fn() -> Vec<(&'static str, OptionValue)>,
    pub files: FilesFn,
    pub actions: &'static [ActionDefinition],
    pub action_map: &'static [(&'static str, &'static [&'static str])],
}

impl PhaseKind {
    /// Builds a fresh phase of this kind: base options and actions first,
    /// then the kind's own.
    pub fn instantiate(&self) -> Result<Phase, OptionError> {
        let mut phase = Phase::bare(self.name, self.boundary);
        for (key, value) in base_defaults().into_iter().chain((self.defaults)()) {
            phase.set(key, value)?;
        }
        for action in BASE_ACTIONS.iter().chain(self.actions) {
            phase.register_action(action.name, action.handler);
        }
        for (action, targets) in BASE_ACTION_MAP.iter().chain(self.action_map) {
            phase.map_action(action, targets);
        }
        Ok(phase)
    }
}

static BASE_ACTIONS: &[ActionDefinition] = &[
    ActionDefinition {
        name: "report_options",
        handler: do_report_options,
    },
    ActionDefinition {
        name: "report_files",
        handler: do_report_files,
    },
    ActionDefinition {
        name: "report_actions",
        handler: do_report_actions,
    },
    ActionDefinition {
        name: "report_graph",
        handler: do_report_graph,
    },
    ActionDefinition {
        name: "clean",
        handler: do_clean,
    },
];

static BASE_ACTION_MAP: &[(&str, &[&str])] = &[
    ("rebuild", &["clean", "build"]),
    ("report", &["report_options", "report_files"]),
];

/// The single source of truth for phase kinds.
static KIND_REGISTRY: &[PhaseKind] = &[
    PhaseKind {
        name: "phase",
        boundary: false,
        defaults: phase_defaults,
        files: no_files,
        actions: &[],
        action_map: &[],
    },
    PhaseKind {
        name: "project",
        boundary: true,
        defaults: project_defaults,
        files: no_files,
        actions: &[ActionDefinition {
            name: "clean_build_directory",
            handler: do_clean_build_directory,
        }],
        action_map: &[],
    },
    PhaseKind {
        name: "command",
        boundary: false,
        defaults: command_defaults,
        files: command_files,
        actions: &[
            ActionDefinition {
                name: "build",
                handler: do_command_build,
            },
            ActionDefinition {
                name: "run",
                handler: do_command_run,
            },
        ],
        action_map: &[],
    },
    PhaseKind {
        name: "write",
        boundary: false,
        defaults: write_defaults,
        files: write_files,
        actions: &[ActionDefinition {
            name: "build",
            handler: do_write_build,
        }],
        action_map: &[],
    },
];

/// Finds a kind by name.
pub fn find_kind(name: &str) -> Option<&'static PhaseKind> {
    KIND_REGISTRY.iter().find(|kind| kind.name == name)
}

pub fn kind_names() -> impl Iterator<Item = &'static str> {
    KIND_REGISTRY.iter().map(|kind| kind.name)
}

// --- Options ---

fn base_defaults() -> Vec<(&'static str, OptionValue)> {
    vec![
        ("name", OptionValue::from("")),
        ("group", OptionValue::from("")),
        ("project_anchor", OptionValue::from(".")),
        ("gen_anchor", OptionValue::from("{project_anchor}")),
        ("build_dir", OptionValue::from("build")),
        ("build_anchor", OptionValue::from("{gen_anchor}/{build_dir}")),
        ("verbosity", OptionValue::Int(0)),
        ("report_verbosity", OptionValue::Int(2)),
        ("report_relative_paths", OptionValue::Bool(true)),
        ("env", OptionValue::Mapping(BTreeMap::new())),
        ("action", OptionValue::from("")),
        ("none", OptionValue::None),
        ("true", OptionValue::Bool(true)),
        ("false", OptionValue::Bool(false)),
    ]
}

fn phase_defaults() -> Vec<(&'static str, OptionValue)> {
    vec![("name", OptionValue::from("phase"))]
}

fn project_defaults() -> Vec<(&'static str, OptionValue)> {
    vec![("name", OptionValue::from("project"))]
}

fn command_defaults() -> Vec<(&'static str, OptionValue)> {
    vec![
        ("name", OptionValue::from("command")),
        ("command", OptionValue::from("")),
        ("run_command", OptionValue::from("")),
        ("inputs", OptionValue::Sequence(Vec::new())),
        ("outputs", OptionValue::Sequence(Vec::new())),
        ("working_dir", OptionValue::from("{project_anchor}")),
        ("shell", OptionValue::Bool(true)),
    ]
}

fn write_defaults() -> Vec<(&'static str, OptionValue)> {
    vec![
        ("name", OptionValue::from("write")),
        ("output", OptionValue::from("")),
        ("content", OptionValue::from("")),
        ("inputs", OptionValue::Sequence(Vec::new())),
    ]
}

/// Renders a command option: strings are used verbatim, sequences are
/// quoted word by word.
fn command_line(phase: &Phase, key: &str) -> Result<String, OptionError> {
    match phase.opt(key)? {
        OptionValue::Sequence(words) => Ok(words
            .iter()
            .map(|w| {
                let word = w.to_string();
                shlex::try_quote(&word).map_or(word.clone(), |q| q.into_owned())
            })
            .collect::<Vec<_>>()
            .join(" ")),
        _ => phase.opt_str(key),
    }
}

fn build_invocation(phase: &Phase, key: &str) -> Result<Invocation, OptionError> {
    let anchor = PathBuf::from(phase.opt_str("project_anchor")?);
    Ok(Invocation {
        command: command_line(phase, key)?,
        cwd: phase.opt_path("working_dir", &anchor)?,
        env: phase.opt_string_map("env")?,
        shell: phase.opt_bool("shell")?,
    })
}

fn relative_base(phase: &Phase) -> Result<Option<PathBuf>, OptionError> {
    Ok(if phase.opt_bool("report_relative_paths")? {
        std::env::current_dir().ok()
    } else {
        None
    })
}

// --- File declarations ---

fn no_files(_: &PhaseGraph, _: PhaseId) -> Result<Vec<FileOperation>, GraphError> {
    Ok(Vec::new())
}

/// Input descriptors, tagged with the dependency that produces them.
fn input_data(graph: &PhaseGraph, id: PhaseId, inputs: &[PathBuf]) -> Result<Vec<FileData>, GraphError> {
    let upstream = ledger::dependency_outputs(graph, id, None)?;
    Ok(inputs
        .iter()
        .map(|path| {
            let generated_by = upstream
                .iter()
                .find(|f| &f.path == path)
                .and_then(|f| f.generated_by.clone());
            FileData::new(path.clone(), "file", generated_by)
        })
        .collect())
}

/// One `create directory` per distinct parent, then `generate`.
fn generating_operations(
    graph: &PhaseGraph,
    id: PhaseId,
    inputs: &[PathBuf],
    outputs: &[PathBuf],
) -> Result<Vec<FileOperation>, GraphError> {
    let label = Some(graph.phase(id).label());
    let mut operations = Vec::new();
    let mut dirs: Vec<&Path> = Vec::new();
    for parent in outputs.iter().filter_map(|p| p.parent()) {
        if !parent.as_os_str().is_empty() && !dirs.contains(&parent) {
            dirs.push(parent);
        }
    }
    for dir in dirs {
        operations.push(FileOperation::new(
            "create directory",
            Vec::new(),
            vec![FileData::new(dir, "dir", label.clone())],
        ));
    }
    if !outputs.is_empty() {
        operations.push(FileOperation::new(
            "generate",
            input_data(graph, id, inputs)?,
            outputs
                .iter()
                .map(|p| FileData::new(p.clone(), "file", label.clone()))
                .collect(),
        ));
    }
    Ok(operations)
}

fn command_paths(phase: &Phase) -> Result<(Vec<PathBuf>, Vec<PathBuf>), OptionError> {
    let anchor = PathBuf::from(phase.opt_str("project_anchor")?);
    let cwd = phase.opt_path("working_dir", &anchor)?;
    Ok((phase.opt_paths("inputs", &cwd)?, phase.opt_paths("outputs", &cwd)?))
}

fn command_files(graph: &PhaseGraph, id: PhaseId) -> Result<Vec<FileOperation>, GraphError> {
    let (inputs, outputs) = command_paths(graph.phase(id))?;
    generating_operations(graph, id, &inputs, &outputs)
}

fn write_paths(phase: &Phase) -> Result<(Vec<PathBuf>, Option<PathBuf>), OptionError> {
    let anchor = PathBuf::from(phase.opt_str("project_anchor")?);
    let output = phase.opt_str("output")?;
    let output = (!output.is_empty()).then(|| anchor.join(output));
    Ok((phase.opt_paths("inputs", &anchor)?, output))
}

fn write_files(graph: &PhaseGraph, id: PhaseId) -> Result<Vec<FileOperation>, GraphError> {
    let (inputs, output) = write_paths(graph.phase(id))?;
    let outputs: Vec<PathBuf> = output.into_iter().collect();
    generating_operations(graph, id, &inputs, &outputs)
}

fn directory_steps(ledger: &FileOperationLedger) -> Vec<Step> {
    ledger
        .of_kind("create directory")
        .flat_map(|op| op.output_paths())
        .map(|dir| Step::new("create directory", Vec::new(), vec![dir.clone()], StepWork::CreateDir(dir)))
        .collect()
}

// --- Base actions ---

fn do_report_options(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    let phase = ctx.phase();
    let verbosity = phase.opt_int("report_verbosity")?;
    Ok(vec![Step::emit("report options", report::render_options(phase, verbosity))])
}

fn do_report_files(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    let phase = ctx.phase();
    let operations = report::report_files(ctx.graph, ctx.id)?;
    let base = relative_base(phase)?;
    Ok(vec![Step::emit(
        "report files",
        report::render_files(phase, &operations, base.as_deref()),
    )])
}

fn do_report_actions(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    Ok(vec![Step::emit("report actions", report::render_actions(ctx.phase()))])
}

fn do_report_graph(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    Ok(vec![Step::emit("report graph", report::render_graph(ctx.graph, ctx.id))])
}

/// Removes declared non-directory outputs.
fn do_clean(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    let ledger = FileOperationLedger::compute(ctx.graph, ctx.id)?;
    Ok(ledger
        .outputs(None)
        .into_iter()
        .filter(|f| f.file_type != "dir")
        .map(|f| {
            Step::new(
                "delete file",
                vec![f.path.clone()],
                Vec::new(),
                StepWork::RemoveFile(f.path.clone()),
            )
        })
        .collect())
}

// --- Kind actions ---

fn do_clean_build_directory(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    let phase = ctx.phase();
    let anchor = PathBuf::from(phase.opt_str("project_anchor")?);
    let build_anchor = phase.opt_path("build_anchor", &anchor)?;
    Ok(vec![Step::new(
        "remove build directory",
        vec![build_anchor.clone()],
        Vec::new(),
        StepWork::RemoveDir(build_anchor),
    )])
}

fn do_command_build(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    let phase = ctx.phase();
    let ledger = FileOperationLedger::compute(ctx.graph, ctx.id)?;
    let mut steps = directory_steps(&ledger);

    let invocation = build_invocation(phase, "command")?;
    if !invocation.command.trim().is_empty() {
        let (inputs, outputs) = command_paths(phase)?;
        steps.push(Step::new("run command", inputs, outputs, StepWork::Invoke(invocation)));
    }
    Ok(steps)
}

fn do_command_run(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    let invocation = build_invocation(ctx.phase(), "run_command")?;
    if invocation.command.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![Step::new("run", Vec::new(), Vec::new(), StepWork::Invoke(invocation))])
}

fn do_write_build(ctx: &ActionContext<'_>) -> Result<Vec<Step>, GraphError> {
    let phase = ctx.phase();
    let (inputs, output) = write_paths(phase)?;
    let Some(path) = output else {
        return Ok(Vec::new());
    };
    let ledger = FileOperationLedger::compute(ctx.graph, ctx.id)?;
    let mut steps = directory_steps(&ledger);
    let contents = phase.opt("content")?.to_string();
    steps.push(Step::new(
        "write file",
        inputs,
        vec![path.clone()],
        StepWork::WriteFile { path, contents },
    ));
    Ok(steps)
}
