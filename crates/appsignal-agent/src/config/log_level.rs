// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log level of the agent's own logging.
//!
//! Parsed case-insensitively from `log_level` in `config/appsignal.yml` or
//! from `APPSIGNAL_LOG_LEVEL`. Anything unparseable falls back to `Info`.

use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl AsRef<str> for LogLevel {
    fn as_ref(&self) -> &str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    /// Directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub fn as_filter_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        if wanted == "warning" {
            return Ok(LogLevel::Warn);
        }
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_filter_directive() == wanted)
            .ok_or_else(|| {
                format!("Unknown log level '{s}', expected one of error, warn, info, debug or trace")
            })
    }
}

/// Never fails: an unusable value is logged and replaced by the default.
impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = match Value::deserialize(deserializer)? {
            Value::String(s) => s.parse().unwrap_or_else(|e: String| {
                error!("{}, using {}", e, LogLevel::default().as_ref());
                LogLevel::default()
            }),
            other => {
                error!("Log level must be a string, got {}", other);
                LogLevel::default()
            }
        };
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_str_is_case_insensitive() {
        assert_eq!(LogLevel::from_str("DeBuG"), Ok(LogLevel::Debug));
        assert_eq!(LogLevel::from_str(" warning "), Ok(LogLevel::Warn));
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_deserialize_falls_back_to_info() {
        let level: LogLevel = serde_json::from_value(json!("trace")).expect("deserializes");
        assert_eq!(level, LogLevel::Trace);

        let level: LogLevel = serde_json::from_value(json!("verbose")).expect("deserializes");
        assert_eq!(level, LogLevel::Info);

        let level: LogLevel = serde_json::from_value(json!(3)).expect("deserializes");
        assert_eq!(level, LogLevel::Info);
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(LogLevel::Error.as_filter_directive(), "error");
        assert_eq!(LogLevel::Debug.as_ref(), "DEBUG");
    }
}
