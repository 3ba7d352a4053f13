// src/core/paths.rs

use crate::constants::{CONFIG_DIR_NAME, CONFIG_FILENAME, DESCRIPTOR_JSON, DESCRIPTOR_TOML};
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

lazy_static! {
    static ref KILN_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Could not expand path '{path}': {message}")]
    Expansion { path: String, message: String },
    #[error("No project descriptor found at '{0}' (looked for kiln.json and kiln.toml).")]
    DescriptorNotFound(PathBuf),
}

/// Returns `~/.config/kiln` or its platform equivalent. The directory is not
/// created; a missing one simply contributes no configuration.
///
/// Memoized: only the first call asks the system.
pub fn config_dir() -> Result<PathBuf, PathError> {
    let mut cached = KILN_CONFIG_DIR
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }

    let path = dirs::config_dir()
        .ok_or(PathError::ConfigDirNotFound)?
        .join(CONFIG_DIR_NAME);
    *cached = Some(path.clone());
    Ok(path)
}

/// The user-level `kiln-config.json`.
pub fn user_config_file() -> Result<PathBuf, PathError> {
    config_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Expands `~` and environment variables in `template`.
pub fn expand(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        path: template.to_string(),
        message: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

/// Resolves the `-m` argument to a descriptor file.
///
/// `arg` may name a file or a directory; a directory is searched for
/// `kiln.json`, then `kiln.toml`. Relative paths are taken from `cwd`.
pub fn resolve_descriptor_path(arg: Option<&str>, cwd: &Path) -> Result<PathBuf, PathError> {
    let requested = match arg {
        Some(text) if !text.is_empty() => expand(text)?,
        _ => PathBuf::from("."),
    };
    let absolute = if requested.is_absolute() {
        requested
    } else {
        cwd.join(requested)
    };
    let absolute = dunce::canonicalize(&absolute).unwrap_or(absolute);
    log::debug!("Looking for a descriptor at {}", absolute.display());

    if absolute.is_file() {
        return Ok(absolute);
    }
    if absolute.is_dir() {
        for candidate in [DESCRIPTOR_JSON, DESCRIPTOR_TOML] {
            let path = absolute.join(candidate);
            if path.is_file() {
                return Ok(path);
            }
        }
    }
    Err(PathError::DescriptorNotFound(absolute))
}
