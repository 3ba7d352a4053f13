// src/core/report.rs

//! The reporting surface: option stacks, declared files, supported actions
//! and the dependency tree, plus their colored text renderings.

use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use crate::core::ledger::FileOperationLedger;
use crate::core::options::OptionError;
use crate::core::overrides::{Override, OverrideOp};
use crate::core::phase::Phase;
use crate::core::value::OptionValue;
use crate::models::{FileData, FileOperation};
use colored::Colorize;
use std::fmt::Write as _;
use std::path::Path;

/// One option as seen by `report_options`.
#[derive(Debug, Clone)]
pub struct OptionReport {
    pub key: String,
    pub stack: Vec<Override>,
    pub resolved: Result<OptionValue, OptionError>,
}

pub fn report_options(phase: &Phase) -> Vec<OptionReport> {
    let table = phase.options();
    table
        .keys()
        .map(|key| OptionReport {
            key: key.to_string(),
            stack: table.raw(key).map(<[Override]>::to_vec).unwrap_or_default(),
            resolved: table.resolve(key),
        })
        .collect()
}

pub fn report_files(graph: &PhaseGraph, id: PhaseId) -> Result<Vec<FileOperation>, GraphError> {
    Ok(FileOperationLedger::compute(graph, id)?.operations().to_vec())
}

pub fn report_actions(phase: &Phase) -> Vec<String> {
    phase.supported_actions()
}

// --- Rendering ---

/// Renders `path` relative to `base` when possible.
pub fn display_path(path: &Path, base: Option<&Path>) -> String {
    let clean = dunce::simplified(path);
    base.and_then(|b| clean.strip_prefix(dunce::simplified(b)).ok())
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or(clean)
        .display()
        .to_string()
}

fn header(phase: &Phase, what: &str) -> String {
    format!("{} {}:", phase.label().yellow().bold(), what.dimmed())
}

fn render_stack(stack: &[Override]) -> String {
    let mut text = String::new();
    for (i, entry) in stack.iter().enumerate() {
        if i == 0 {
            let _ = write!(text, "{}", entry.operand.to_string().magenta());
        } else if entry.op == OverrideOp::Replace {
            let _ = write!(text, " {} {}", "=".dimmed(), entry.operand.to_string().magenta());
        } else {
            let _ = write!(text, " {} {}", entry.op.symbol().dimmed(), entry.operand.to_string().magenta());
        }
    }
    text
}

/// `report_verbosity` 0 prints resolved values only, 1 adds the number of
/// overrides, 2 adds the raw stack.
pub fn render_options(phase: &Phase, report_verbosity: i64) -> String {
    let mut out = header(phase, t!("report.label.options"));
    for report in report_options(phase) {
        let resolved = match &report.resolved {
            Ok(value) => value.to_string().blue().to_string(),
            Err(e) => format!("<{}>", e).red().to_string(),
        };
        let _ = write!(out, "\n  {}: ", report.key.cyan());
        match report_verbosity {
            v if v <= 0 => out.push_str(&resolved),
            1 => {
                out.push_str(&resolved);
                if report.stack.len() > 1 {
                    let count = format!(t!("report.label.override_count"), count = report.stack.len() - 1);
                    let _ = write!(out, " {}", count.dimmed());
                }
            }
            _ => {
                out.push_str(&render_stack(&report.stack));
                let _ = write!(out, " {} {}", "->".dimmed(), resolved);
            }
        }
    }
    out.push('\n');
    out
}

fn render_file_list(files: &[FileData], base: Option<&Path>) -> String {
    files
        .iter()
        .map(|f| display_path(&f.path, base).green().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn render_files(phase: &Phase, operations: &[FileOperation], base: Option<&Path>) -> String {
    let mut out = header(phase, t!("report.label.files"));
    if operations.is_empty() {
        let _ = write!(out, "\n  {}", t!("report.label.none").dimmed());
    }
    for op in operations {
        let _ = write!(out, "\n  {}: ", op.kind.cyan());
        if !op.inputs.is_empty() {
            let _ = write!(out, "{} {} ", render_file_list(&op.inputs, base), "->".dimmed());
        }
        out.push_str(&render_file_list(&op.outputs, base));
    }
    out.push('\n');
    out
}

pub fn render_actions(phase: &Phase) -> String {
    let actions = report_actions(phase)
        .iter()
        .map(|a| a.cyan().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} {}\n", header(phase, t!("report.label.actions")), actions)
}

/// Renders the dependency tree below `start` with box-drawing connectors.
pub fn render_graph(graph: &PhaseGraph, start: PhaseId) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", node_line(graph, start));
    let deps = graph.dependencies(start);
    for (i, dep) in deps.iter().enumerate() {
        render_node(graph, *dep, "", i + 1 == deps.len(), &mut out);
    }
    out
}

fn node_line(graph: &PhaseGraph, id: PhaseId) -> String {
    let phase = graph.phase(id);
    format!("{} {}", phase.label().bold(), format!("[{}]", phase.kind()).dimmed())
}

fn render_node(graph: &PhaseGraph, id: PhaseId, prefix: &str, is_last: bool, out: &mut String) {
    let connector = if is_last { "└─" } else { "├─" };
    let _ = writeln!(out, "{}{}{}", prefix, connector, node_line(graph, id));

    let child_prefix = format!("{}{}", prefix, if is_last { "   " } else { "│  " });
    let deps = graph.dependencies(id);
    for (i, dep) in deps.iter().enumerate() {
        render_node(graph, *dep, &child_prefix, i + 1 == deps.len(), out);
    }
}
