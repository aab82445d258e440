//! Tap Recorder
//!
//! Records every local transport tap (or a single named one) into timestamped
//! files until stopped.
//!
//! # Usage
//!
//! ```bash
//! # Record all taps into the current directory
//! tap-recorder
//!
//! # Record one node's log records only
//! tap-recorder --tap-name robot1 --log-record-only --output-dir /var/log/taps
//!
//! # With verbose logging
//! RUST_LOG=debug tap-recorder
//! ```
//!
//! # Stopping
//!
//! Ctrl+C, SIGTERM, or pressing enter stops the watcher, lets open recordings
//! close within the grace period and exits.

mod cli;

use std::io::BufRead;

use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use tap_recorder_core::Recorder;

use crate::cli::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tap_recorder=info".parse()?)
                .add_directive("tap_recorder_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let args = Args::parse();
    let config = args.to_config()?;

    let mut recorder = Recorder::new(config).map_err(|e| {
        error!(error = %e, "Failed to prepare recorder");
        anyhow::anyhow!("Failed to prepare recorder: {e}")
    })?;

    recorder.start()?;
    info!(
        dir = ?recorder.watch_dir(),
        "Recording taps. Press enter or Ctrl+C to exit"
    );

    wait_for_exit().await;

    info!(active = ?recorder.active_taps(), "Performing graceful shutdown...");
    recorder.dispose().await;
    info!("Tap recorder stopped cleanly");
    Ok(())
}

/// Resolve on Ctrl+C, SIGTERM, or a line on stdin
async fn wait_for_exit() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    // Plain thread: a blocking stdin read on the runtime would hold up exit.
    // EOF (detached stdin) never resolves.
    let (line_tx, line_rx) = tokio::sync::oneshot::channel::<()>();
    std::thread::spawn(move || {
        let mut line = String::new();
        if matches!(std::io::stdin().lock().read_line(&mut line), Ok(n) if n > 0) {
            let _ = line_tx.send(());
        }
    });
    let enter = async {
        if line_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
        () = enter => info!("Received enter, shutting down"),
    }
}
