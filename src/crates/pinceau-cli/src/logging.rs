//! Logging setup for `pinceau` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag
//! 2. `PINCEAU_LOG` environment variable
//! 3. `[logging] level` from the configuration files
//! 4. `info`
//!
//! Logs go to STDERR so that stdout only carries command output (JSON,
//! graphs, event lines).

use anyhow::{anyhow, Result};
use clap::ValueEnum;
use pinceau_core::config::ENV_LOG;
use pinceau_core::PinceauConfig;
use tracing::Level;
use tracing_subscriber::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Pick the level from the flag, then `env`, then the config file.
pub fn resolve_level(
    flag: Option<LogLevel>,
    env: Option<String>,
    config: &PinceauConfig,
) -> Level {
    if let Some(level) = flag {
        return level.into();
    }
    env.as_deref()
        .and_then(parse_level_str)
        .or_else(|| config.logging.level.as_deref().and_then(parse_level_str))
        .unwrap_or(Level::INFO)
}

/// Install the global subscriber. Call once at startup.
pub fn init_logging(flag: Option<LogLevel>, config: &PinceauConfig) -> Result<()> {
    let level = resolve_level(flag, std::env::var(ENV_LOG).ok(), config);
    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install the log subscriber: {e}"))
}

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

    fn config_with(level: &str) -> PinceauConfig {
        let mut config = PinceauConfig::default();
        config.logging.level = Some(level.to_string());
        config
    }

    #[test]
    fn test_flag_beats_everything() {
        let level = resolve_level(
            Some(LogLevel::Trace),
            Some("error".into()),
            &config_with("warn"),
        );
        assert_eq!(level, Level::TRACE);
    }

    #[test]
    fn test_env_beats_config() {
        let level = resolve_level(None, Some(" DEBUG ".into()), &config_with("warn"));
        assert_eq!(level, Level::DEBUG);
    }

    #[test]
    fn test_config_then_default() {
        assert_eq!(resolve_level(None, None, &config_with("warning")), Level::WARN);
        assert_eq!(resolve_level(None, Some("loud".into()), &PinceauConfig::default()), Level::INFO);
    }
}
