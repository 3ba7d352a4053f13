// src/constants.rs

/// Descriptor looked up first when `-m` names a directory.
pub const DESCRIPTOR_JSON: &str = "kiln.json";

/// Descriptor looked up when there is no `kiln.json`.
pub const DESCRIPTOR_TOML: &str = "kiln.toml";

/// Configuration file read from the user config dir and the descriptor dir.
pub const CONFIG_FILENAME: &str = "kiln-config.json";

/// Subdirectory of the system config dir (`~/.config/kiln`).
pub const CONFIG_DIR_NAME: &str = "kiln";

/// Selector that matches every phase.
pub const ALL_PHASES: &str = "@.@";
