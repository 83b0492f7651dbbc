#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
//! `servohand`: command-line control of the servo hand.

mod cli;
mod error_fmt;
mod hand;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{WrapErr, eyre};
use servohand_config::Config;

use crate::cli::{Cli, FILE_GUARD, JSON_MODE};

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let code = match try_main(&cli) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            if JSON_MODE.get().copied().unwrap_or(false) {
                println!("{}", error_fmt::format_error_json(&e));
            } else {
                eprintln!("{}", error_fmt::humanize(&e));
            }
            error_fmt::exit_code_for_error(&e)
        }
    };
    std::process::exit(code);
}

fn try_main(cli: &Cli) -> eyre::Result<()> {
    let (cfg, from_file) = load_config(&cli.config)?;
    init_tracing(cli, &cfg.logging)?;
    if from_file {
        tracing::debug!(path = %cli.config.display(), "config loaded");
    } else {
        tracing::debug!(path = %cli.config.display(), "config file not found; using defaults");
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
            tracing::warn!(error = %e, "Ctrl-C handler not installed");
        }
    }

    hand::run(cli, &cfg, &shutdown)
}

/// Config from `path`, or defaults when it does not exist.
fn load_config(path: &Path) -> eyre::Result<(Config, bool)> {
    let (cfg, from_file) = if path.exists() {
        (servohand_config::load_file(path)?, true)
    } else {
        (Config::default(), false)
    };
    cfg.validate().wrap_err("invalid configuration")?;
    Ok((cfg, from_file))
}

fn init_tracing(cli: &Cli, logging: &servohand_config::Logging) -> eyre::Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

    let level = cli
        .log_level
        .as_deref()
        .or(logging.level.as_deref())
        .unwrap_or("warn");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| eyre!("invalid log level '{level}': {e}"))?;

    // Logs go to stderr; stdout carries command output.
    let console = if cli.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file_layer = match &logging.file {
        Some(file) => {
            let path = Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| eyre!("logging.file has no file name: {file}"))?;
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_writer(writer).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre!("initializing logging: {e}"))
}
