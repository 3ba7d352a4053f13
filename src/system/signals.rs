// src/system/signals.rs

use crate::CancellationToken;
use colored::Colorize;
use std::sync::atomic::Ordering;
use std::thread;

/// Exit code for a run stopped by Ctrl+C.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Watches for Ctrl+C on a background thread.
///
/// The first interrupt raises `token`, which stops the dispatcher before its
/// next step and kills the running child. A second interrupt exits at once.
pub fn install_interrupt_handler(token: CancellationToken) {
    let spawned = thread::Builder::new()
        .name("kiln-signals".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::warn!("Interrupt handling unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async move {
                loop {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::warn!("Failed to listen for Ctrl+C: {}", e);
                        return;
                    }
                    if token.swap(true, Ordering::SeqCst) {
                        std::process::exit(INTERRUPTED_EXIT_CODE);
                    }
                    eprintln!("\n{}", t!("signals.info.finishing_up").yellow());
                    log::debug!("Cancellation token raised by Ctrl+C");
                }
            });
        });
    if let Err(e) = spawned {
        log::warn!("Could not start the signal thread: {}", e);
    }
}
