// src/bin/kiln.rs

use clap::Parser;
use colored::*;
use kiln::cli::Cli;
use kiln::cli::session::{self, return_code_for};
use kiln::system::adapter::ShellAdapter;
use kiln::system::signals;
use std::env;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Sets up logging and Ctrl+C handling, runs one session and exits with its
/// return code.
fn main() {
    let cancellation_token = Arc::new(AtomicBool::new(false));
    env_logger::init();
    signals::install_interrupt_handler(cancellation_token.clone());

    let cli = Cli::parse();
    log::debug!("CLI args parsed: {:?}", cli);

    let cwd = match env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("\n{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    };

    match session::run(&cli.args, &cwd, &ShellAdapter, cancellation_token) {
        Ok(code) => std::process::exit(code.code()),
        Err(e) => {
            eprintln!("\n{}: {:#}", "Error".red().bold(), e);
            std::process::exit(return_code_for(&e).code());
        }
    }
}
