// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent verbosity, parsed case-insensitively from YAML or `NETMON_LOG_LEVEL`.
//!
//! Invalid values never fail configuration loading: they are logged and the
//! default (`info`) is used instead.

use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

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
    #[must_use]
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    /// Lowercase directive usable in an `EnvFilter` string.
    #[must_use]
    pub fn directive(self) -> String {
        self.as_ref().to_lowercase()
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Invalid log level: '{s}'. Valid levels are: error, warn, info, debug, trace",
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = value {
            match LogLevel::from_str(&s) {
                Ok(level) => Ok(level),
                Err(e) => {
                    error!("{}", e);
                    Ok(LogLevel::default())
                }
            }
        } else {
            error!("Expected a string for log level, got {:?}", value);
            Ok(LogLevel::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(LogLevel::from_str("DeBuG"), Ok(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("warning"), Ok(LogLevel::Warn));
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_invalid_values_fall_back_to_info() {
        let level: LogLevel = serde_json::from_value(json!("loud")).expect("lenient");
        assert_eq!(level, LogLevel::Info);
        let level: LogLevel = serde_json::from_value(json!(3)).expect("lenient");
        assert_eq!(level, LogLevel::Info);
        let level: LogLevel = serde_json::from_value(json!("trace")).expect("valid");
        assert_eq!(level, LogLevel::Trace);
    }

    #[test]
    fn test_directive_and_filter() {
        assert_eq!(LogLevel::Warn.directive(), "warn");
        assert_eq!(LogLevel::Debug.as_level_filter(), LevelFilter::DEBUG);
    }
}
