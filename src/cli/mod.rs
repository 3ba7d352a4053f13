// src/cli/mod.rs

use clap::Parser;

pub mod session;

/// Renders the help template with colors when the terminal supports them.
pub fn build_help_string() -> String {
    let use_colors = colored::control::SHOULD_COLORIZE.should_colorize();
    let template = t!("cli.help.template");

    let title = if use_colors { "\x1b[1;33m" } else { "" }; // Bold Yellow
    let hl = if use_colors { "\x1b[1;36m" } else { "" }; // Bold Cyan
    let cmd = if use_colors { "\x1b[36m" } else { "" }; // Cyan
    let group = if use_colors { "\x1b[1;32m" } else { "" }; // Bold Green
    let dim = if use_colors { "\x1b[2m" } else { "" };
    let reset = if use_colors { "\x1b[0m" } else { "" };

    template
        .replace("<title>", title)
        .replace("</title>", reset)
        .replace("<hl>", hl)
        .replace("</hl>", reset)
        .replace("<cmd>", cmd)
        .replace("</cmd>", reset)
        .replace("<group>", group)
        .replace("</group>", reset)
        .replace("<dim>", dim)
        .replace("</dim>", reset)
}

pub fn version_string() -> String {
    format!(t!("cli.version"), version = env!("CARGO_PKG_VERSION"))
}

/// kiln: a phase-graph build and operations tool.
///
/// Arguments are order-sensitive (`-o` overrides apply to the actions that
/// follow them), so clap only collects them; [`session`] interprets them.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    disable_help_flag = true,
    disable_version_flag = true,
    disable_help_subcommand = true,
    allow_hyphen_values = true,
    trailing_var_arg = true
)]
pub struct Cli {
    /// Flags, overrides and actions, processed left to right.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}
