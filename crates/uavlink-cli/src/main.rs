//! `uavlink` – WebSocket bridge for UAV telemetry clients.
//!
//! Usage:
//!
//! ```text
//! uavlink          # serve ws://0.0.0.0:<port><path> until Ctrl-C
//! uavlink init     # write the default config and exit
//! ```
//!
//! Configuration comes from `~/.uavlink/config.toml` (or `$UAVLINK_CONFIG`)
//! with `UAVLINK_*` environment overrides applied on top.

mod config;
mod telemetry;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use uavlink_middleware::{Hub, WsBridge};

fn main() -> ExitCode {
    let guard = telemetry::init_tracing("uavlink");
    if guard.exporting() {
        info!("exporting spans over OTLP");
    }

    match std::env::args().nth(1).as_deref() {
        None => {}
        Some("init") => return write_default_config(),
        Some(other) => {
            eprintln!("{}: unknown command `{}`", "error".red().bold(), other);
            eprintln!("usage: uavlink [init]");
            return ExitCode::from(2);
        }
    }

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, path = %config::config_path().display(), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the Tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(serve(cfg))
}

async fn serve(cfg: config::Config) -> ExitCode {
    println!(
        "  Listening on {}  ({} decoding)\n",
        format!("ws://0.0.0.0:{}{}", cfg.port, cfg.path).bold(),
        cfg.decode_policy.to_string().dimmed()
    );

    let hub = Arc::new(Hub::default());
    tokio::spawn(log_upstream(hub.clone()));

    let bridge = WsBridge::new(hub).with_config(cfg.bridge_config());
    tokio::select! {
        result = bridge.run() => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "bridge stopped");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            ExitCode::SUCCESS
        }
    }
}

/// Log client-originated messages until the hub goes away.
async fn log_upstream(hub: Arc<Hub>) {
    let mut upstream = hub.subscribe_upstream();
    loop {
        match upstream.recv().await {
            Ok(message) => info!(kind = %message.kind(), "client message"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "upstream listener lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn write_default_config() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!("  Config already present at {}", path.display().to_string().bold());
        return ExitCode::SUCCESS;
    }
    match config::save_to(&config::Config::default(), &path) {
        Ok(()) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"  __  _____ _   __   _   _      _   "#.bold().cyan());
    println!("{}", r#" / / / / _ | | / /  | | (_)__  | |__"#.bold().cyan());
    println!("{}", r#"/ /_/ / __ | |/ /   | |/ / _ \ | '_/"#.bold().cyan());
    println!("{}", r#"\____/_/ |_|___/    |_/_/_//_/ |_\_\"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "uavlink".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  WebSocket bridge for UAV telemetry clients");
    println!();
}
