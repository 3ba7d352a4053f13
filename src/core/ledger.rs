// src/core/ledger.rs

//! Declared file operations per phase and the up-to-date rule.
//!
//! Ledgers are never cached: every call recomputes them from the phase's
//! currently resolved options.

use crate::core::graph::{GraphError, PhaseGraph, PhaseId};
use crate::core::phase_kinds;
use crate::models::{FileData, FileOperation};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone, Default)]
pub struct FileOperationLedger {
    operations: Vec<FileOperation>,
}

impl FileOperationLedger {
    /// Computes the ledger of `id` from its kind's file declarations.
    pub fn compute(graph: &PhaseGraph, id: PhaseId) -> Result<Self, GraphError> {
        let phase = graph.phase(id);
        let operations = match phase_kinds::find_kind(phase.kind()) {
            Some(kind) => (kind.files)(graph, id)?,
            None => Vec::new(),
        };
        Ok(Self { operations })
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a FileOperation> {
        self.operations.iter().filter(move |op| op.kind == kind)
    }

    /// Every output, optionally limited to one file type.
    pub fn outputs(&self, file_type: Option<&str>) -> Vec<&FileData> {
        self.operations
            .iter()
            .flat_map(|op| op.outputs.iter())
            .filter(|f| file_type.is_none_or(|t| f.file_type == t))
            .collect()
    }
}

/// Outputs of every transitive dependency of `id`, dependencies first.
pub fn dependency_outputs(
    graph: &PhaseGraph,
    id: PhaseId,
    file_type: Option<&str>,
) -> Result<Vec<FileData>, GraphError> {
    let mut outputs = Vec::new();
    for dep in graph.postorder(id).into_iter().filter(|d| *d != id) {
        let ledger = FileOperationLedger::compute(graph, dep)?;
        outputs.extend(ledger.outputs(file_type).into_iter().cloned());
    }
    Ok(outputs)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// True iff there is at least one output, every output exists, and the
/// oldest output is no older than the newest input. A missing input makes
/// the step stale.
pub fn is_up_to_date(inputs: &[PathBuf], outputs: &[PathBuf]) -> bool {
    if outputs.is_empty() {
        return false;
    }
    let Some(oldest_output) = outputs
        .iter()
        .map(|p| modified(p))
        .collect::<Option<Vec<_>>>()
        .and_then(|times| times.into_iter().min())
    else {
        return false;
    };
    let Some(input_times) = inputs.iter().map(|p| modified(p)).collect::<Option<Vec<_>>>() else {
        return false;
    };
    input_times
        .into_iter()
        .max()
        .is_none_or(|newest_input| oldest_output >= newest_input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;
    use tempfile::tempdir;

    fn touch(path: &Path, age_secs: u64) {
        let file = File::create(path).unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(when).unwrap();
    }

    #[test]
    fn test_no_outputs_is_stale() {
        assert!(!is_up_to_date(&[], &[]));
    }

    #[test]
    fn test_missing_output_is_stale() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.c");
        touch(&input, 100);
        assert!(!is_up_to_date(&[input], &[dir.path().join("a.o")]));
    }

    #[test]
    fn test_newer_output_is_up_to_date() {
        // --- Setup ---
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.c");
        let output = dir.path().join("a.o");
        touch(&input, 100);
        touch(&output, 10);

        // --- Assert ---
        assert!(is_up_to_date(&[input.clone()], &[output.clone()]));

        // --- Execute: touch the input ---
        touch(&input, 0);
        assert!(!is_up_to_date(&[input], &[output]));
    }

    #[test]
    fn test_oldest_output_decides() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("a.c");
        let fresh = dir.path().join("a.o");
        let old = dir.path().join("a.d");
        touch(&input, 50);
        touch(&fresh, 10);
        touch(&old, 100);
        assert!(!is_up_to_date(&[input], &[fresh, old]));
    }

    #[test]
    fn test_missing_input_is_stale() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("a.o");
        touch(&output, 0);
        assert!(!is_up_to_date(&[dir.path().join("gone.c")], &[output.clone()]));
        // Outputs with no inputs at all only need to exist.
        assert!(is_up_to_date(&[], &[output]));
    }
}
