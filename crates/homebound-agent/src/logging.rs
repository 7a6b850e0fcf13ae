//! Logging initialization.
//!
//! The filter comes from the `[logging]` section: a base level plus one
//! directive per component override, so `scanner = "debug"` turns on
//! `homebound_core::scanner=debug` without flooding the rest.
//! `RUST_LOG` replaces the whole filter; `HOMEBOUND_LOG_LEVEL` replaces only
//! the base level.
//!
//! - **Production**: JSON to daily rolling files in the log directory, plus
//!   compact stdout for the journal
//! - **Development**: pretty stdout with span events

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Context;
use homebound_core::{AgentConfig, LoggingSettings};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable replacing the base level.
pub const LOG_LEVEL_ENV: &str = "HOMEBOUND_LOG_LEVEL";

/// Environment variable selecting production logging.
pub const PRODUCTION_ENV: &str = "HOMEBOUND_PRODUCTION";

/// File name prefix of the rolling log files.
const LOG_FILE_PREFIX: &str = "homebound";

/// Dependencies that are noisy below `warn`.
const QUIET_TARGETS: [&str; 3] = ["hyper=warn", "h2=warn", "rustls=warn"];

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Returns `true` when `HOMEBOUND_PRODUCTION` is set to a truthy value.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(PRODUCTION_ENV)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Filter directives for `settings`, with `base` replacing the configured
/// base level when given. Unknown components are left out; validation
/// already rejects them.
#[must_use]
pub fn filter_directives(settings: &LoggingSettings, base: Option<&str>) -> String {
    let base = base.unwrap_or(settings.level.as_str()).to_ascii_lowercase();
    let mut directives = vec![base];
    directives.extend(QUIET_TARGETS.iter().map(ToString::to_string));
    directives.extend(settings.components.iter().filter_map(|(component, level)| {
        LoggingSettings::target_for(component)
            .map(|target| format!("{target}={}", level.to_ascii_lowercase()))
    }));
    directives.join(",")
}

/// Where production log files go.
#[must_use]
pub fn log_directory(config: &AgentConfig) -> PathBuf {
    config
        .logging
        .directory
        .clone()
        .unwrap_or_else(|| config.storage.logs_path())
}

/// Initialize the global subscriber.
///
/// Returns the log directory in production mode.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed or the log directory
/// cannot be created.
pub fn init(config: &AgentConfig, is_production: bool) -> anyhow::Result<Option<PathBuf>> {
    let base = std::env::var(LOG_LEVEL_ENV).ok();
    let directives = filter_directives(&config.logging, base.as_deref());
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .with_context(|| format!("parsing log filter {directives:?}"))?;

    if is_production {
        let dir = log_directory(config);
        init_production(env_filter, &dir)?;
        Ok(Some(dir))
    } else {
        init_development(env_filter);
        Ok(None)
    }
}

fn init_production(env_filter: EnvFilter, log_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stdout, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stdout)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    Ok(())
}

fn init_development(env_filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .init();
}
