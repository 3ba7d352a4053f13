// src/cli/session.rs

//! One `kiln` invocation: load the descriptor and configuration, then
//! process `-p`, `-o` and action arguments strictly left to right.

use crate::CancellationToken;
use crate::cli::{build_help_string, version_string};
use crate::constants::ALL_PHASES;
use crate::core::address::Selector;
use crate::core::config::KilnConfig;
use crate::core::descriptor::{self, DescriptorError};
use crate::core::dispatcher::{ActionDispatcher, ActionReport};
use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use crate::core::options::OptionError;
use crate::core::overrides::OverrideOp;
use crate::core::paths::{self, PathError};
use crate::core::value_parser::{OverrideExpression, ValueParseError, parse_override_expression};
use crate::system::adapter::ToolAdapter;
use crate::system::executor::ExecutionError;
use anyhow::{Context, Result};
use colored::*;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    Succeeded = 0,
    DescriptorNotFound = 1,
    ConfigurationError = 2,
    InvalidArguments = 3,
    ActionFailed = 4,
    Interrupted = 130,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

fn must_precede(arg: &str) -> String {
    format!(t!("session.error.must_precede"), arg = arg)
}

fn missing_value(arg: &str) -> String {
    format!(t!("session.error.missing_value"), arg = arg)
}

fn unknown_flag(arg: &str) -> String {
    format!(t!("session.error.unknown_flag"), arg = arg)
}

fn no_such_option(key: &str, selector: &str) -> String {
    format!(t!("session.error.no_such_option"), key = key, selector = selector)
}

/// Malformed command lines.
#[derive(Error, Debug)]
pub enum ArgumentError {
    #[error("{}", must_precede(.0))]
    MustPrecede(String),
    #[error("{}", missing_value(.0))]
    MissingValue(String),
    #[error("{}", unknown_flag(.0))]
    UnknownFlag(String),
    #[error("{}", no_such_option(.key, .selector))]
    NoSuchOption { key: String, selector: String },
}

/// Maps an error chain to the exit code the binary reports.
pub fn return_code_for(error: &anyhow::Error) -> ReturnCode {
    for cause in error.chain() {
        if let Some(PathError::DescriptorNotFound(_)) = cause.downcast_ref::<PathError>() {
            return ReturnCode::DescriptorNotFound;
        }
        if cause.is::<ArgumentError>() || cause.is::<ValueParseError>() {
            return ReturnCode::InvalidArguments;
        }
        if let Some(ExecutionError::Cancelled) = cause.downcast_ref::<ExecutionError>() {
            return ReturnCode::Interrupted;
        }
        if cause.is::<DescriptorError>() || cause.is::<GraphError>() || cause.is::<OptionError>() {
            return ReturnCode::ConfigurationError;
        }
    }
    ReturnCode::ConfigurationError
}

/// Flags only accepted before the first `-p`, `-o` or action.
#[derive(Debug, Default)]
struct LeadingFlags {
    descriptor: Option<String>,
    show_config: bool,
    parallel: bool,
}

fn is_module_flag(arg: &str) -> bool {
    arg == "--module" || arg.starts_with("-m")
}

fn is_leading_flag(arg: &str) -> bool {
    matches!(arg, "-c" | "--config" | "-j" | "--parallel") || is_module_flag(arg)
}

/// Splits `-xVALUE` / `-x VALUE` / `--long VALUE`, advancing `idx` past a
/// separate value.
fn flag_value(args: &[String], idx: &mut usize, short: &str) -> Result<String, ArgumentError> {
    let arg = args.get(*idx).map(String::as_str).unwrap_or_default();
    if let Some(attached) = arg.strip_prefix(short).filter(|rest| !rest.is_empty())
        && !arg.starts_with("--")
    {
        return Ok(attached.to_string());
    }
    *idx += 1;
    args.get(*idx)
        .cloned()
        .ok_or_else(|| ArgumentError::MissingValue(arg.to_string()))
}

/// Runs one invocation. `args` excludes the program name.
pub fn run(
    args: &[String],
    cwd: &Path,
    adapter: &dyn ToolAdapter,
    cancellation_token: CancellationToken,
) -> Result<ReturnCode> {
    let mut flags = LeadingFlags::default();
    let mut idx = 0;
    while let Some(arg) = args.get(idx) {
        match arg.as_str() {
            "-v" | "--version" => {
                println!("{}", version_string());
                return Ok(ReturnCode::Succeeded);
            }
            "-h" | "--help" => {
                println!("{}", build_help_string());
                return Ok(ReturnCode::Succeeded);
            }
            "-c" | "--config" => flags.show_config = true,
            "-j" | "--parallel" => flags.parallel = true,
            a if is_module_flag(a) => flags.descriptor = Some(flag_value(args, &mut idx, "-m")?),
            _ => break,
        }
        idx += 1;
    }
    let rest = args.get(idx..).unwrap_or_default();

    let descriptor_path = paths::resolve_descriptor_path(flags.descriptor.as_deref(), cwd)?;
    let mut session = Session::open(&descriptor_path, adapter, cancellation_token)?;
    session.parallel = flags.parallel;
    if flags.show_config {
        print!("{}", session.config.render());
    }
    session.process(rest)
}

/// The loaded project and the state of argument processing.
pub struct Session<'a> {
    graph: PhaseGraph,
    config: KilnConfig,
    default_group: String,
    selection: Selector,
    adapter: &'a dyn ToolAdapter,
    cancellation_token: CancellationToken,
    parallel: bool,
    reports: Vec<ActionReport>,
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phases", &self.graph.len())
            .field("selection", &self.selection.to_string())
            .field("parallel", &self.parallel)
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    /// Loads configuration and the descriptor graph.
    pub fn open(
        descriptor_path: &Path,
        adapter: &'a dyn ToolAdapter,
        cancellation_token: CancellationToken,
    ) -> Result<Self> {
        let descriptor_dir = descriptor_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let config = KilnConfig::load(&descriptor_dir).with_context(|| {
            format!(t!("session.error.loading_config"), path = descriptor_dir.display())
        })?;
        let graph = descriptor::load_descriptor(descriptor_path).with_context(|| {
            format!(t!("session.error.loading_descriptor"), path = descriptor_path.display())
        })?;
        let default_group = graph
            .root()
            .map(|root| graph.phase(root).name())
            .transpose()?
            .unwrap_or_default();
        log::debug!("Session opened on '{}' ({} phases)", default_group, graph.len());

        Ok(Self {
            selection: Selector::parse(ALL_PHASES, &default_group),
            graph,
            config,
            default_group,
            adapter,
            cancellation_token,
            parallel: false,
            reports: Vec::new(),
        })
    }

    pub fn graph(&self) -> &PhaseGraph {
        &self.graph
    }

    /// Every action report produced so far.
    pub fn reports(&self) -> &[ActionReport] {
        &self.reports
    }

    /// Processes `-p`, `-o` and actions in order. Runs the default action if
    /// no action was named. Stops at the first failed action.
    pub fn process(&mut self, args: &[String]) -> Result<ReturnCode> {
        let args = self.config.expand_arguments(args);
        log::debug!("Expanded arguments: {:?}", args);
        let mut ran_action = false;

        let mut idx = 0;
        while let Some(arg) = args.get(idx) {
            match arg.as_str() {
                "-v" | "--version" => {
                    println!("{}", version_string());
                    return Ok(ReturnCode::Succeeded);
                }
                "-h" | "--help" => {
                    println!("{}", build_help_string());
                    return Ok(ReturnCode::Succeeded);
                }
                a if is_leading_flag(a) => return Err(ArgumentError::MustPrecede(a.to_string()).into()),
                a if a == "--phases" || a.starts_with("-p") => {
                    let labels = flag_value(&args, &mut idx, "-p")?;
                    self.selection = Selector::parse(&labels, &self.default_group);
                }
                a if a == "--override" || a.starts_with("-o") => {
                    let expr = flag_value(&args, &mut idx, "-o")?;
                    self.apply_override(&expr)?;
                }
                a if a.starts_with('-') => return Err(ArgumentError::UnknownFlag(a.to_string()).into()),
                action => {
                    ran_action = true;
                    let code = self.run_action(action)?;
                    if code != ReturnCode::Succeeded {
                        return Ok(code);
                    }
                }
            }
            idx += 1;
        }

        if !ran_action {
            let default_action = self.config.default_action.clone();
            return self.run_action(&default_action);
        }
        Ok(ReturnCode::Succeeded)
    }

    /// Splits an optional `selector:` prefix. A colon after the first `=`
    /// belongs to the value.
    fn split_selector<'s>(&self, text: &'s str) -> (Option<Selector>, &'s str) {
        match (text.find(':'), text.find('=')) {
            (Some(colon), eq) if eq.is_none_or(|eq| colon < eq) => {
                let (labels, rest) = text.split_at(colon);
                let rest = rest.strip_prefix(':').unwrap_or(rest);
                (Some(Selector::parse(labels, &self.default_group)), rest)
            }
            _ => (None, text),
        }
    }

    fn targets(&self, selector: Option<&Selector>) -> Result<Vec<PhaseId>, GraphError> {
        selector.unwrap_or(&self.selection).resolve(&self.graph)
    }

    /// `-o [sel:]key[op]=value` pushes onto each selected phase that has
    /// `key`, `-o [sel:]key` pops. When no selected phase has it, a plain
    /// `=` creates it on all of them.
    fn apply_override(&mut self, text: &str) -> Result<()> {
        let (selector, expr) = self.split_selector(text);
        let shown = selector.as_ref().unwrap_or(&self.selection).to_string();
        let targets = self.targets(selector.as_ref())?;
        let parsed = parse_override_expression(expr)
            .with_context(|| format!(t!("session.error.invalid_override"), expr = text))?;

        let (key, creates) = match &parsed {
            OverrideExpression::Push(ov) => (ov.key.clone(), ov.op == OverrideOp::Replace),
            OverrideExpression::Pop(key) => (key.clone(), false),
        };
        let holders: Vec<PhaseId> = targets
            .iter()
            .copied()
            .filter(|id| self.graph.phase(*id).options().contains(&key))
            .collect();
        let chosen = if holders.is_empty() && creates { targets } else { holders };
        if chosen.is_empty() {
            return Err(ArgumentError::NoSuchOption { key, selector: shown }.into());
        }

        for id in &chosen {
            let phase = self.graph.phase_mut(*id);
            let label = phase.label();
            let applied = match &parsed {
                OverrideExpression::Push(ov) => phase.push(ov),
                OverrideExpression::Pop(key) => phase.pop(key).map(|_| ()),
            };
            applied.with_context(|| {
                format!(t!("session.error.override_on_phase"), expr = text, phase = label)
            })?;
        }
        log::debug!("Applied '-o {}' to {} phase(s)", text, chosen.len());
        Ok(())
    }

    fn run_action(&mut self, text: &str) -> Result<ReturnCode> {
        let (selector, name) = self.split_selector(text);
        let targets = self.targets(selector.as_ref())?;
        if targets.is_empty() {
            let shown = selector.as_ref().unwrap_or(&self.selection).to_string();
            println!("{}", format!(t!("session.info.no_phases"), selector = shown).yellow());
        }

        let dispatcher = ActionDispatcher::new(self.adapter, self.cancellation_token.clone())
            .parallel(self.parallel);
        for action in self.config.resolve_action(name) {
            let report = dispatcher
                .dispatch(&mut self.graph, &action, &targets)
                .with_context(|| format!(t!("session.error.dispatch"), action = action))?;
            let code = summarize(&report);
            self.reports.push(report);
            if code != ReturnCode::Succeeded {
                return Ok(code);
            }
        }
        Ok(ReturnCode::Succeeded)
    }
}

fn summarize(report: &ActionReport) -> ReturnCode {
    if report.cancelled() {
        eprintln!("{}", t!("session.info.interrupted").yellow());
        return ReturnCode::Interrupted;
    }
    if report.succeeded() {
        return ReturnCode::Succeeded;
    }
    let failed: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| !o.status.is_success())
        .map(|o| o.address.as_str())
        .collect();
    eprintln!(
        "{}",
        format!(
            t!("session.error.action_failed"),
            action = report.action,
            count = failed.len(),
            phases = failed.join(", ")
        )
        .red()
        .bold()
    );
    ReturnCode::ActionFailed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Invocation as ToolInvocation, ToolOutput};
    use crate::core::address::PhaseAddress;
    use crate::models::StepStatus;
    use std::fs;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex};
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct FakeAdapter {
        calls: Mutex<Vec<String>>,
    }

    impl ToolAdapter for FakeAdapter {
        fn invoke(&self, invocation: &ToolInvocation, _: &CancellationToken) -> Result<ToolOutput, ExecutionError> {
            self.calls.lock().unwrap().push(invocation.command.clone());
            let exit_code = if invocation.command.starts_with("fail") { 1 } else { 0 };
            Ok(ToolOutput {
                exit_code,
                ..Default::default()
            })
        }
    }

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn project() -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("kiln.json"),
            r#"{
                "name": "demo",
                "phases": [
                    { "name": "gen", "kind": "write",
                      "options": { "output": "{build_dir}/gen.txt", "content": "v={value}", "value": 1 } },
                    { "name": "step", "kind": "command", "depends_on": ["gen"],
                      "options": { "command": "echo {value}", "value": 1 } }
                ]
            }"#,
        )
        .unwrap();
        dir
    }

    fn gen_file(dir: &TempDir) -> String {
        fs::read_to_string(dir.path().join("build/gen.txt")).unwrap()
    }

    #[test]
    fn test_override_applies_to_following_actions() {
        // --- Setup ---
        let dir = project();
        let adapter = FakeAdapter::default();

        // --- Execute ---
        let code = run(
            &args(&["-o", "gen:value+=41", "build"]),
            dir.path(),
            &adapter,
            token(),
        )
        .unwrap();

        // --- Assert ---
        assert_eq!(code, ReturnCode::Succeeded);
        assert_eq!(gen_file(&dir), "v=42");
        // `step` kept its own value.
        assert_eq!(adapter.calls.lock().unwrap().clone(), vec!["echo 1"]);
    }

    #[test]
    fn test_override_pop_restores_value() {
        let dir = project();
        let adapter = FakeAdapter::default();
        let mut session = Session::open(&dir.path().join("kiln.json"), &adapter, token()).unwrap();

        let code = session
            .process(&args(&["-ovalue=7", "-o", "value", "build"]))
            .unwrap();

        assert_eq!(code, ReturnCode::Succeeded);
        assert_eq!(gen_file(&dir), "v=1");
    }

    #[test]
    fn test_phase_selection_limits_actions() {
        let dir = project();
        let adapter = FakeAdapter::default();
        let mut session = Session::open(&dir.path().join("kiln.json"), &adapter, token()).unwrap();

        session.process(&args(&["-p", "gen", "build"])).unwrap();

        assert_eq!(gen_file(&dir), "v=1");
        assert!(adapter.calls.lock().unwrap().is_empty());
        let report = &session.reports()[0];
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].address, "demo.gen");
    }

    #[test]
    fn test_failed_action_stops_processing() {
        // --- Setup ---
        let dir = project();
        let adapter = FakeAdapter::default();
        let mut session = Session::open(&dir.path().join("kiln.json"), &adapter, token()).unwrap();

        // --- Execute ---
        let code = session
            .process(&args(&["-o", "step:command=fail now", "build", "report_files"]))
            .unwrap();

        // --- Assert ---
        assert_eq!(code, ReturnCode::ActionFailed);
        assert_eq!(session.reports().len(), 1);
        assert_eq!(session.reports()[0].status(), StepStatus::CommandFailed);
        // Best effort: the independent write still happened.
        assert_eq!(gen_file(&dir), "v=1");
    }

    #[test]
    fn test_default_action_and_aliases() {
        let dir = project();
        let adapter = FakeAdapter::default();
        let mut session = Session::open(&dir.path().join("kiln.json"), &adapter, token()).unwrap();

        assert_eq!(session.process(&[]).unwrap(), ReturnCode::Succeeded);
        assert_eq!(session.reports()[0].action, "report_actions");

        session.process(&args(&["-v1", "demo.step:b"])).unwrap();
        let last = session.reports().last().unwrap();
        assert_eq!(last.action, "build");
        assert_eq!(
            session.graph().phase(last.outcomes[0].phase).opt_int("verbosity").unwrap(),
            1
        );
    }

    #[test]
    fn test_argument_errors_map_to_exit_codes() {
        let dir = project();
        let adapter = FakeAdapter::default();

        let late_module = run(&args(&["build", "-m", "."]), dir.path(), &adapter, token()).unwrap_err();
        assert_eq!(return_code_for(&late_module), ReturnCode::InvalidArguments);

        let unknown_flag = run(&args(&["-x"]), dir.path(), &adapter, token()).unwrap_err();
        assert_eq!(return_code_for(&unknown_flag), ReturnCode::InvalidArguments);

        let bad_value = run(&args(&["-o", "value=[1, 2"]), dir.path(), &adapter, token()).unwrap_err();
        assert_eq!(return_code_for(&bad_value), ReturnCode::InvalidArguments);

        let unknown_key = run(&args(&["-o", "nope+=1"]), dir.path(), &adapter, token()).unwrap_err();
        assert_eq!(return_code_for(&unknown_key), ReturnCode::InvalidArguments);

        let bad_type = run(&args(&["-o", "gen:content&={a}"]), dir.path(), &adapter, token()).unwrap_err();
        assert_eq!(return_code_for(&bad_type), ReturnCode::ConfigurationError);

        let missing = tempdir().unwrap();
        let not_found = run(&args(&["build"]), missing.path(), &adapter, token()).unwrap_err();
        assert_eq!(return_code_for(&not_found), ReturnCode::DescriptorNotFound);
    }

    #[test]
    fn test_rejected_override_leaves_option_untouched() {
        // --- Setup ---
        let dir = project();
        let adapter = FakeAdapter::default();
        let mut session = Session::open(&dir.path().join("kiln.json"), &adapter, token()).unwrap();
        let gen_id = session.graph().find(&PhaseAddress::new("demo", "gen")).unwrap();

        // --- Execute ---
        let err = session
            .process(&args(&["-o", "gen:content&={value}", "build"]))
            .unwrap_err();

        // --- Assert ---
        assert_eq!(return_code_for(&err), ReturnCode::ConfigurationError);
        let gen_phase = session.graph().phase(gen_id);
        assert_eq!(gen_phase.opt_str("content").unwrap(), "v=1");
        assert_eq!(gen_phase.options().depth("content"), 1);
        assert!(session.reports().is_empty());
    }

    #[test]
    fn test_leading_flags() {
        let dir = project();
        fs::create_dir(dir.path().join("elsewhere")).unwrap();
        let adapter = FakeAdapter::default();

        assert_eq!(
            run(&args(&["-v"]), dir.path(), &adapter, token()).unwrap(),
            ReturnCode::Succeeded
        );
        let code = run(
            &args(&["-j", "-m", "..", "build"]),
            &dir.path().join("elsewhere"),
            &adapter,
            token(),
        )
        .unwrap();
        assert_eq!(code, ReturnCode::Succeeded);
        assert_eq!(gen_file(&dir), "v=1");
    }

    #[test]
    fn test_selector_split_respects_values_with_colons() {
        let dir = project();
        let adapter = FakeAdapter::default();
        let session = Session::open(&dir.path().join("kiln.json"), &adapter, token()).unwrap();

        let (selector, rest) = session.split_selector("gen:url=http://x");
        assert_eq!(selector.unwrap().to_string(), "gen");
        assert_eq!(rest, "url=http://x");
        let (selector, rest) = session.split_selector("url=http://x");
        assert!(selector.is_none());
        assert_eq!(rest, "url=http://x");
    }
}
