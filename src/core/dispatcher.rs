// src/core/dispatcher.rs

//! Runs an action across the phase graph.
//!
//! Dispatch happens in two passes. Planning walks the graph depth-first from
//! the targets, dependencies before dependents, and asks each phase's handler
//! (or action map) for its steps. Every (phase, action) pair is planned once,
//! so diamond dependencies run a single time. Handler errors abort here,
//! before anything touches the filesystem. Execution then runs the plan in
//! order, or in dependency-respecting waves on the rayon pool when parallel
//! execution is enabled.

use crate::CancellationToken;
use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use crate::core::ledger;
use crate::core::phase::ActionContext;
use crate::models::{Step, StepRecord, StepResult, StepStatus, StepWork};
use crate::system::adapter::ToolAdapter;
use crate::system::executor::ExecutionError;
use colored::*;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::Ordering;

/// Action maps may route to other mapped actions; this bounds the chain.
const MAX_ACTION_MAP_DEPTH: usize = 16;

const CANCELLED_NOTE: &str = "cancelled";
const EARLIER_FAILURE_NOTE: &str = "an earlier step failed";

/// What one phase did for one action.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: PhaseId,
    pub address: String,
    pub action: String,
    pub steps: Vec<StepRecord>,
    pub status: StepStatus,
}

impl PhaseOutcome {
    fn was_cancelled(&self) -> bool {
        self.steps
            .iter()
            .any(|r| r.result.notes.as_deref() == Some(CANCELLED_NOTE))
    }
}

/// Every phase outcome of one dispatched action, in execution order.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub action: String,
    pub outcomes: Vec<PhaseOutcome>,
}

impl ActionReport {
    /// The worst phase status, `AlreadyUpToDate` when nothing ran.
    pub fn status(&self) -> StepStatus {
        self.outcomes
            .iter()
            .map(|o| o.status)
            .max()
            .unwrap_or(StepStatus::AlreadyUpToDate)
    }

    pub fn succeeded(&self) -> bool {
        self.status().is_success()
    }

    pub fn cancelled(&self) -> bool {
        self.outcomes.iter().any(PhaseOutcome::was_cancelled)
    }

    pub fn outcome(&self, phase: PhaseId) -> Option<&PhaseOutcome> {
        self.outcomes.iter().find(|o| o.phase == phase)
    }
}

#[derive(Debug, Clone, Copy)]
enum VisitState {
    InProgress,
    Completed(usize),
}

/// One phase's slot in the plan.
#[derive(Debug)]
struct PlannedPhase {
    id: PhaseId,
    address: String,
    steps: Vec<Step>,
    /// Plan indexes of the dependencies that were planned for this action.
    deps: Vec<usize>,
    verbosity: i64,
}

pub struct ActionDispatcher<'a> {
    adapter: &'a dyn ToolAdapter,
    cancellation_token: CancellationToken,
    parallel: bool,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(adapter: &'a dyn ToolAdapter, cancellation_token: CancellationToken) -> Self {
        Self {
            adapter,
            cancellation_token,
            parallel: false,
        }
    }

    /// Runs independent phases concurrently.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Dispatches `action` to `targets` and everything they depend on.
    pub fn dispatch(
        &self,
        graph: &mut PhaseGraph,
        action: &str,
        targets: &[PhaseId],
    ) -> Result<ActionReport, GraphError> {
        log::debug!("Dispatching '{}' to {} target(s)", action, targets.len());
        let plan = plan(graph, action, targets)?;
        log::debug!("Planned '{}' over {} phase(s)", action, plan.len());

        let outcomes = if self.parallel {
            self.execute_waves(&plan, action)
        } else {
            plan.iter().map(|p| self.run_phase(p, action)).collect()
        };
        Ok(ActionReport {
            action: action.to_string(),
            outcomes,
        })
    }

    fn execute_waves(&self, plan: &[PlannedPhase], action: &str) -> Vec<PhaseOutcome> {
        let mut slots: Vec<Option<PhaseOutcome>> = plan.iter().map(|_| None).collect();
        let mut done = vec![false; plan.len()];

        loop {
            let ready: Vec<usize> = (0..plan.len())
                .filter(|&i| !done.get(i).copied().unwrap_or(true))
                .filter(|&i| {
                    plan.get(i)
                        .is_some_and(|p| p.deps.iter().all(|d| done.get(*d).copied().unwrap_or(false)))
                })
                .collect();
            if ready.is_empty() {
                break;
            }
            log::trace!("Running wave of {} phase(s)", ready.len());

            let finished: Vec<(usize, PhaseOutcome)> = ready
                .par_iter()
                .filter_map(|&i| plan.get(i).map(|p| (i, self.run_phase(p, action))))
                .collect();
            for (i, outcome) in finished {
                if let Some(flag) = done.get_mut(i) {
                    *flag = true;
                }
                if let Some(slot) = slots.get_mut(i) {
                    *slot = Some(outcome);
                }
            }
        }
        slots.into_iter().flatten().collect()
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::SeqCst)
    }

    /// Runs the steps of one phase in order, stopping at the first failure
    /// or cancellation. Whatever is left is recorded as skipped.
    fn run_phase(&self, planned: &PlannedPhase, action: &str) -> PhaseOutcome {
        let mut records = Vec::with_capacity(planned.steps.len());
        let mut halted: Option<&str> = None;

        for step in &planned.steps {
            if halted.is_none() && self.is_cancelled() {
                halted = Some(CANCELLED_NOTE);
            }
            let result = match halted {
                Some(reason) => StepResult::with_notes(StepStatus::Skipped, reason),
                None => {
                    let result = self.run_step(step, planned.verbosity);
                    match result.status {
                        StepStatus::CommandFailed => halted = Some(EARLIER_FAILURE_NOTE),
                        StepStatus::Skipped => halted = Some(CANCELLED_NOTE),
                        _ => {}
                    }
                    result
                }
            };
            report_step(planned, action, step, &result);
            records.push(StepRecord {
                step: step.clone(),
                result,
            });
        }

        let status = records
            .iter()
            .map(|r| r.result.status)
            .max()
            .unwrap_or(StepStatus::AlreadyUpToDate);
        log::debug!("{} {}: {}", planned.address, action, status);
        PhaseOutcome {
            phase: planned.id,
            address: planned.address.clone(),
            action: action.to_string(),
            steps: records,
            status,
        }
    }

    fn run_step(&self, step: &Step, verbosity: i64) -> StepResult {
        if is_step_up_to_date(step) {
            return StepResult::new(StepStatus::AlreadyUpToDate);
        }
        match &step.work {
            StepWork::Invoke(invocation) => {
                if verbosity >= 2 {
                    println!("{} {}", "→".blue(), invocation.command.green());
                }
                match self.adapter.invoke(invocation, &self.cancellation_token) {
                    Ok(output) => {
                        if !output.stdout.is_empty() {
                            print!("{}", output.stdout);
                        }
                        if output.success() {
                            if !output.stderr.is_empty() {
                                eprint!("{}", output.stderr);
                            }
                            StepResult::new(StepStatus::Succeeded)
                        } else {
                            let mut notes = format!("exit code {}", output.exit_code);
                            if !output.stderr.trim().is_empty() {
                                notes = format!("{}\n{}", notes, output.stderr.trim_end());
                            }
                            StepResult::with_notes(StepStatus::CommandFailed, notes)
                        }
                    }
                    Err(ExecutionError::Cancelled) => {
                        StepResult::with_notes(StepStatus::Skipped, CANCELLED_NOTE)
                    }
                    Err(e) => StepResult::with_notes(StepStatus::CommandFailed, e.to_string()),
                }
            }
            StepWork::CreateDir(path) => filesystem_result(fs::create_dir_all(path)),
            StepWork::WriteFile { path, contents } => {
                let written = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map_or(Ok(()), fs::create_dir_all)
                    .and_then(|()| fs::write(path, contents));
                filesystem_result(written)
            }
            StepWork::RemoveFile(path) => match fs::remove_file(path) {
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    StepResult::new(StepStatus::AlreadyUpToDate)
                }
                other => filesystem_result(other),
            },
            StepWork::RemoveDir(path) => {
                let count = count_files(path);
                match fs::remove_dir_all(path) {
                    Ok(()) => StepResult::with_notes(
                        StepStatus::Succeeded,
                        format!("removed {} files", count),
                    ),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        StepResult::new(StepStatus::AlreadyUpToDate)
                    }
                    Err(e) => StepResult::with_notes(StepStatus::CommandFailed, e.to_string()),
                }
            }
            StepWork::Emit(text) => {
                print!("{}", text);
                StepResult::new(StepStatus::Succeeded)
            }
        }
    }
}

// --- Planning ---

fn plan(graph: &mut PhaseGraph, action: &str, targets: &[PhaseId]) -> Result<Vec<PlannedPhase>, GraphError> {
    let mut state: HashMap<(PhaseId, String), VisitState> = HashMap::new();
    let mut planned = Vec::new();
    for target in targets {
        visit(graph, *target, action, &mut state, &mut planned)?;
    }
    Ok(planned)
}

fn visit(
    graph: &mut PhaseGraph,
    id: PhaseId,
    action: &str,
    state: &mut HashMap<(PhaseId, String), VisitState>,
    planned: &mut Vec<PlannedPhase>,
) -> Result<Option<usize>, GraphError> {
    match state.get(&(id, action.to_string())) {
        Some(VisitState::Completed(index)) => return Ok(Some(*index)),
        Some(VisitState::InProgress) => {
            log::warn!("Phase {} reached again while planning '{}'", graph.phase(id).label(), action);
            return Ok(None);
        }
        None => {}
    }
    state.insert((id, action.to_string()), VisitState::InProgress);

    let mut deps = Vec::new();
    for dep in graph.dependencies(id).to_vec() {
        if let Some(index) = visit(graph, dep, action, state, planned)? {
            deps.push(index);
        }
    }

    let steps = collect_steps(graph, id, action, 0)?;
    let phase = graph.phase(id);
    let index = planned.len();
    planned.push(PlannedPhase {
        id,
        address: phase.label(),
        steps: steps.unwrap_or_default(),
        deps,
        verbosity: phase.opt_int("verbosity").unwrap_or(0),
    });
    state.insert((id, action.to_string()), VisitState::Completed(index));
    Ok(Some(index))
}

/// The steps `id` contributes to `action`: its handler's, or the
/// concatenation of the mapped actions'. `None` when the phase supports
/// neither.
fn collect_steps(
    graph: &mut PhaseGraph,
    id: PhaseId,
    action: &str,
    depth: usize,
) -> Result<Option<Vec<Step>>, GraphError> {
    if let Some(handler) = graph.phase(id).handler(action) {
        // Handlers see the running action as the `action` option.
        graph.phase_mut(id).set("action", action)?;
        let graph = scopeguard::guard(&mut *graph, |g| {
            let _ = g.phase_mut(id).pop("action");
        });
        let ctx = ActionContext {
            graph: &**graph,
            id,
            action,
        };
        return handler(&ctx).map(Some);
    }

    let Some(mapped) = graph.phase(id).mapped_actions(action).map(<[String]>::to_vec) else {
        log::trace!("{} does not support '{}'", graph.phase(id).label(), action);
        return Ok(None);
    };
    if depth >= MAX_ACTION_MAP_DEPTH {
        log::warn!("Action map for '{}' nests too deeply on {}", action, graph.phase(id).label());
        return Ok(None);
    }
    let mut steps = Vec::new();
    for routed in mapped {
        if let Some(more) = collect_steps(graph, id, &routed, depth + 1)? {
            steps.extend(more);
        }
    }
    Ok(Some(steps))
}

// --- Step helpers ---

fn is_step_up_to_date(step: &Step) -> bool {
    match &step.work {
        StepWork::CreateDir(path) => path.is_dir(),
        StepWork::RemoveFile(path) | StepWork::RemoveDir(path) => fs::symlink_metadata(path).is_err(),
        StepWork::Emit(_) => false,
        StepWork::WriteFile { path, contents } => {
            ledger::is_up_to_date(&step.inputs, &step.outputs)
                && fs::read_to_string(path).is_ok_and(|existing| existing == *contents)
        }
        StepWork::Invoke(_) => ledger::is_up_to_date(&step.inputs, &step.outputs),
    }
}

fn filesystem_result(result: std::io::Result<()>) -> StepResult {
    match result {
        Ok(()) => StepResult::new(StepStatus::Succeeded),
        Err(e) => StepResult::with_notes(StepStatus::CommandFailed, e.to_string()),
    }
}

fn count_files(path: &Path) -> usize {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .count()
}

fn report_step(planned: &PlannedPhase, action: &str, step: &Step, result: &StepResult) {
    if result.status == StepStatus::CommandFailed {
        eprintln!(
            "{} {} {}: {} {}",
            "✗".red().bold(),
            planned.address.yellow(),
            action.cyan(),
            step.name,
            "failed".red()
        );
        eprintln!("  {} {}", "command:".dimmed(), step.work);
        if let Some(notes) = &result.notes {
            for line in notes.lines() {
                eprintln!("  {}", line);
            }
        }
        return;
    }
    if planned.verbosity < 1 || matches!(step.work, StepWork::Emit(_)) {
        return;
    }
    let status = match result.status {
        StepStatus::Succeeded => result.status.to_string().green(),
        StepStatus::AlreadyUpToDate => result.status.to_string().dimmed(),
        _ => result.status.to_string().yellow(),
    };
    let notes = result
        .notes
        .as_deref()
        .map(|n| format!(" ({})", n).dimmed().to_string())
        .unwrap_or_default();
    println!("{} {}: {} {}{}", planned.address.yellow(), action.cyan(), step.name, status, notes);
}
