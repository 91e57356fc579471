//! Log subscriber setup.
//!
//! The library only emits `tracing` events; binaries and tests decide where
//! they go. [`init_logging`] installs a `fmt` subscriber filtered by
//! `RUST_LOG`, falling back to `info`.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::errors::RolechainError;

/// Output format of the installed subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, human-oriented.
    Pretty,
    /// Single-line text.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = RolechainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(RolechainError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs a global subscriber.
///
/// # Errors
///
/// Returns a config error if a global subscriber is already set.
pub fn init_logging(format: LogFormat) -> Result<(), RolechainError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false);

    let result = match format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    result.map_err(|e| RolechainError::Config(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(LogFormat::Compact);
        assert!(init_logging(LogFormat::Json).is_err());
    }
}
