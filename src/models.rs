// src/models.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

// --- FILE LEDGER MODELS ---

/// One file a phase reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub path: PathBuf,
    /// Free-form tag such as `file` or `dir`.
    pub file_type: String,
    /// Address of the phase that produces this file, if known.
    pub generated_by: Option<String>,
}

impl FileData {
    pub fn new(path: impl Into<PathBuf>, file_type: &str, generated_by: Option<String>) -> Self {
        Self {
            path: path.into(),
            file_type: file_type.to_string(),
            generated_by,
        }
    }
}

/// A declared transformation from input files to output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    /// e.g. `create directory`, `generate`.
    pub kind: String,
    pub inputs: Vec<FileData>,
    pub outputs: Vec<FileData>,
}

impl FileOperation {
    pub fn new(kind: &str, inputs: Vec<FileData>, outputs: Vec<FileData>) -> Self {
        Self {
            kind: kind.to_string(),
            inputs,
            outputs,
        }
    }

    pub fn input_paths(&self) -> Vec<PathBuf> {
        self.inputs.iter().map(|f| f.path.clone()).collect()
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.outputs.iter().map(|f| f.path.clone()).collect()
    }
}

// --- STEP MODELS ---

/// A command line handed to a [`crate::system::adapter::ToolAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Run through the platform shell instead of splitting the line ourselves.
    pub shell: bool,
}

/// What a tool invocation produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The executable unit of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepWork {
    Invoke(Invocation),
    CreateDir(PathBuf),
    WriteFile { path: PathBuf, contents: String },
    RemoveFile(PathBuf),
    RemoveDir(PathBuf),
    /// Report text printed to stdout.
    Emit(String),
}

impl fmt::Display for StepWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invoke(inv) => f.write_str(&inv.command),
            Self::CreateDir(p) => write!(f, "mkdir -p {}", p.display()),
            Self::WriteFile { path, .. } => write!(f, "write {}", path.display()),
            Self::RemoveFile(p) => write!(f, "rm {}", p.display()),
            Self::RemoveDir(p) => write!(f, "rm -r {}", p.display()),
            Self::Emit(_) => f.write_str("report"),
        }
    }
}

/// A unit of work inside an action, with its declared files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: String,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
    pub work: StepWork,
}

impl Step {
    pub fn new(name: &str, inputs: Vec<PathBuf>, outputs: Vec<PathBuf>, work: StepWork) -> Self {
        Self {
            name: name.to_string(),
            inputs,
            outputs,
            work,
        }
    }

    /// A step that prints report text.
    pub fn emit(name: &str, text: String) -> Self {
        Self::new(name, Vec::new(), Vec::new(), StepWork::Emit(text))
    }
}

/// Outcome of a step, ordered from best to worst so the aggregate of a
/// phase is the maximum of its steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepStatus {
    AlreadyUpToDate,
    Succeeded,
    Skipped,
    CommandFailed,
}

impl StepStatus {
    /// True for the statuses that count as success for the exit code.
    pub fn is_success(self) -> bool {
        matches!(self, Self::AlreadyUpToDate | Self::Succeeded)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AlreadyUpToDate => "already up to date",
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::CommandFailed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub status: StepStatus,
    pub notes: Option<String>,
}

impl StepResult {
    pub fn new(status: StepStatus) -> Self {
        Self {
            status,
            notes: None,
        }
    }

    pub fn with_notes(status: StepStatus, notes: impl Into<String>) -> Self {
        Self {
            status,
            notes: Some(notes.into()),
        }
    }
}

/// A step together with what happened when it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: Step,
    pub result: StepResult,
}
