use crate::config::{AppConfig, LogFormat};
use crate::logging::{LogWriter, LOG_MAX_BYTES};
use anyhow::Context;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// `RUST_LOG` wins over `--log-level` when set.
pub fn env_filter(config: &AppConfig) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level '{}'", config.log_level)),
    }
}

/// Install the global subscriber once; later calls are no-ops.
pub fn init_tracing(config: &AppConfig) -> anyhow::Result<()> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }
    let filter = env_filter(config)?;
    let writer = match &config.log_file {
        Some(path) => {
            let file = LogWriter::open(path, LOG_MAX_BYTES)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(writer)
        .with_thread_names(true);
    let installed = match config.log_format {
        LogFormat::Text => builder.with_ansi(config.log_file.is_none()).try_init(),
        LogFormat::Json => builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .try_init(),
    };
    // Another subscriber (e.g. a test harness) may already own the global slot.
    let _ = installed;
    let _ = TRACING_INIT.set(());
    Ok(())
}
