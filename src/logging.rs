// src/logging.rs

//! Diagnostic logging (`tracing` + `tracing-subscriber`).
//!
//! runbook has two output channels. Child output and the status lines the
//! user asked for go through [`crate::console`] to STDOUT; everything here is
//! developer diagnostics and goes to STDERR.
//!
//! Filter resolution:
//! 1. `--log-level <level>`: scoped to the `runbook` crate.
//! 2. `RUNBOOK_LOG`: a bare level ("debug", "warning") is scoped the same
//!    way; anything else is read as `EnvFilter` directives, e.g.
//!    `runbook::watch=trace,notify=debug`.
//! 3. `runbook=warn`.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "RUNBOOK_LOG";

const CRATE_TARGET: &str = "runbook";
const DEFAULT_LEVEL: Level = Level::WARN;

/// Writer for diagnostics. STDOUT belongs to the console.
fn diagnostics_writer() -> std::io::Stderr {
    std::io::stderr()
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let filter = resolve_filter(cli_level, env_value.as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(diagnostics_writer)
        .init();

    Ok(())
}

fn resolve_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return crate_filter(level_from_log_level(level));
    }

    match env_value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => match parse_level_str(value) {
            Some(level) => crate_filter(level),
            // Malformed directives fall back to the default.
            None => EnvFilter::try_new(value).unwrap_or_else(|_| crate_filter(DEFAULT_LEVEL)),
        },
        None => crate_filter(DEFAULT_LEVEL),
    }
}

fn crate_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!(
        "{CRATE_TARGET}={}",
        level.as_str().to_ascii_lowercase()
    ))
}

fn level_from_log_level(lvl: LogLevel) -> Level {
    match lvl {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    }
}

/// Bare level words only; directives are left to `EnvFilter`.
fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn env_level_parsing_is_lenient() {
        assert_eq!(parse_level_str(" Warning "), Some(Level::WARN));
        assert_eq!(parse_level_str("DEBUG"), Some(Level::DEBUG));
        assert_eq!(parse_level_str("runbook=debug"), None);
    }

    #[test]
    fn cli_flag_wins_over_env() {
        let filter = resolve_filter(Some(LogLevel::Trace), Some("error"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn bare_env_level_is_scoped_to_the_crate() {
        let filter = resolve_filter(None, Some("warning"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn env_directives_pass_through() {
        let filter = resolve_filter(None, Some("runbook::watch=trace,notify=debug"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn missing_env_uses_the_default() {
        for env in [None, Some("  "), Some("runbook=loudest")] {
            let filter = resolve_filter(None, env);
            assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN), "{env:?}");
        }
    }
}
