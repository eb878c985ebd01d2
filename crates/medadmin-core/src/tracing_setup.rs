use std::fs::OpenOptions;

use anyhow::{Context, Result};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Environment variable naming an extra debug log file.
pub const LOG_FILE_ENV: &str = "MEDADMIN_LOG_FILE";

/// Install the global subscriber: stderr at INFO (DEBUG when `verbose`),
/// plus a DEBUG file layer when `MEDADMIN_LOG_FILE` is set.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(level);

    let registry = tracing_subscriber::registry().with(stderr_layer);

    match std::env::var(LOG_FILE_ENV).ok() {
        Some(log_path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("failed to open log file {}", log_path))?;

            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(LevelFilter::DEBUG);

            registry
                .with(file_layer)
                .try_init()
                .context("tracing subscriber already installed")?;
            eprintln!("File logging enabled: {}", log_path);
        }
        None => registry
            .try_init()
            .context("tracing subscriber already installed")?,
    }
    Ok(())
}
