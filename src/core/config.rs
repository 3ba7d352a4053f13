// src/core/config.rs

//! `kiln-config.json`: argument aliases, action aliases and the default
//! action.
//!
//! Layers are applied in order: built-in defaults, the user config dir, then
//! the descriptor's directory. Alias tables merge key by key with later
//! layers winning, `default_action` is replaced and `default_arguments`
//! accumulate.

use crate::constants::CONFIG_FILENAME;
use crate::core::paths;
use colored::Colorize;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// The on-disk shape of one config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    include: Option<OneOrMany>,
    argument_aliases: BTreeMap<String, OneOrMany>,
    action_aliases: BTreeMap<String, OneOrMany>,
    default_action: Option<String>,
    default_arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KilnConfig {
    pub loaded_files: Vec<PathBuf>,
    pub argument_aliases: BTreeMap<String, Vec<String>>,
    pub action_aliases: BTreeMap<String, Vec<String>>,
    pub default_action: String,
    pub default_arguments: Vec<String>,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self::builtin()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl KilnConfig {
    /// The configuration used before any file is read.
    pub fn builtin() -> Self {
        let mut argument_aliases = BTreeMap::new();
        for level in 0..=2 {
            argument_aliases.insert(format!("-v{level}"), vec![format!("-overbosity={level}")]);
            argument_aliases.insert(
                format!("-rv{level}"),
                vec![format!("-oreport_verbosity={level}")],
            );
        }
        let action_aliases = [
            ("opts", "report_options"),
            ("files", "report_files"),
            ("actions", "report_actions"),
            ("graph", "report_graph"),
            ("c", "clean"),
            ("b", "build"),
            ("cbd", "clean_build_directory"),
        ]
        .into_iter()
        .map(|(alias, action)| (alias.to_string(), strings(&[action])))
        .collect();

        Self {
            loaded_files: Vec::new(),
            argument_aliases,
            action_aliases,
            default_action: "report_actions".to_string(),
            default_arguments: Vec::new(),
        }
    }

    /// Built-in defaults, then the user config, then `descriptor_dir`'s.
    /// Missing files are skipped; malformed ones are errors.
    pub fn load(descriptor_dir: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::builtin();
        match paths::user_config_file() {
            Ok(file) => config.load_optional(&file)?,
            Err(e) => log::debug!("No user config directory: {}", e),
        }
        config.load_optional(&descriptor_dir.join(CONFIG_FILENAME))?;
        Ok(config)
    }

    fn load_optional(&mut self, path: &Path) -> Result<(), ConfigError> {
        if path.is_file() {
            self.load_file(path)
        } else {
            log::trace!("No config at {}", path.display());
            Ok(())
        }
    }

    /// Applies one config file and, first, everything it includes. Each file
    /// is applied at most once.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let path = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.loaded_files.contains(&path) {
            return Ok(());
        }
        log::debug!("Loading config file {}", path.display());
        self.loaded_files.push(path.clone());

        let text = fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.clone(),
            source: e,
        })?;
        let file: ConfigFile = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        })?;

        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        for include in file.include.clone().map(OneOrMany::into_vec).unwrap_or_default() {
            let target = match paths::expand(&include) {
                Ok(p) if p.is_absolute() => p,
                Ok(p) => base.join(p),
                Err(e) => {
                    log::warn!("Skipping include '{}' in {}: {}", include, path.display(), e);
                    continue;
                }
            };
            self.load_file(&target)?;
        }
        self.merge(file);
        Ok(())
    }

    fn merge(&mut self, file: ConfigFile) {
        for (alias, values) in file.argument_aliases {
            self.argument_aliases.insert(alias, values.into_vec());
        }
        for (alias, values) in file.action_aliases {
            self.action_aliases.insert(alias, values.into_vec());
        }
        if let Some(action) = file.default_action.filter(|a| !a.is_empty()) {
            self.default_action = action;
        }
        self.default_arguments.extend(file.default_arguments);
    }

    /// Prepends the default arguments and replaces every argument alias with
    /// its expansion. Expansions are not expanded again.
    pub fn expand_arguments(&self, args: &[String]) -> Vec<String> {
        self.default_arguments
            .iter()
            .chain(args)
            .flat_map(|arg| {
                self.argument_aliases
                    .get(arg)
                    .cloned()
                    .unwrap_or_else(|| vec![arg.clone()])
            })
            .collect()
    }

    /// The actions an action name stands for: its alias expansion, or
    /// itself.
    pub fn resolve_action(&self, name: &str) -> Vec<String> {
        self.action_aliases
            .get(name)
            .filter(|targets| !targets.is_empty())
            .cloned()
            .unwrap_or_else(|| vec![name.to_string()])
    }

    /// Human-readable dump for `kiln -c`.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", t!("config.label.loaded_files").yellow().bold());
        if self.loaded_files.is_empty() {
            let _ = writeln!(out, "    {}", t!("config.label.builtin_only").dimmed());
        }
        for file in &self.loaded_files {
            let _ = writeln!(out, "    {}", file.display());
        }
        for (title, table) in [
            (t!("config.label.argument_aliases"), &self.argument_aliases),
            (t!("config.label.action_aliases"), &self.action_aliases),
        ] {
            let _ = writeln!(out, "{}", title.yellow().bold());
            for (alias, values) in table {
                let _ = writeln!(out, "    {} {} {}", alias.cyan(), "->".dimmed(), values.join(" "));
            }
        }
        let _ = writeln!(
            out,
            "{} {}",
            t!("config.label.default_action").yellow().bold(),
            self.default_action.cyan()
        );
        let _ = writeln!(
            out,
            "{} {}",
            t!("config.label.default_arguments").yellow().bold(),
            self.default_arguments.join(" ")
        );
        out
    }
}
