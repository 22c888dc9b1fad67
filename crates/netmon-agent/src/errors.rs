// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

/// Failure to turn a resolver log line into a query or reply record.
///
/// Parse errors are counted and the line is skipped; they are never fatal.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("line matches neither the query nor the reply shape")]
    Unmatched,
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
}

/// Errors raised by the on-disk spool.
#[derive(Debug, thiserror::Error)]
pub enum SpoolError {
    /// No batch files are pending.
    #[error("spool is empty")]
    Empty,
    /// The payload does not fit even after evicting every stored batch.
    #[error("spool full: {needed} bytes needed, capacity is {capacity} bytes")]
    Full { needed: u64, capacity: u64 },
    #[error("spool I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A single delivery attempt to the collector failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("collector answered with status {0}")]
    Status(reqwest::StatusCode),
    #[error("delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    /// Label used for the per-code send error counter.
    #[must_use]
    pub fn code_label(&self) -> String {
        match self {
            DeliveryError::Transport(_) => "net".to_string(),
            DeliveryError::Status(status) => status.as_u16().to_string(),
            DeliveryError::Cancelled => "cancelled".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = SpoolError::Full {
            needed: 10,
            capacity: 5,
        };
        assert_eq!(
            error.to_string(),
            "spool full: 10 bytes needed, capacity is 5 bytes"
        );
        assert_eq!(
            ConfigError::Missing("router_id").to_string(),
            "router_id is required"
        );
    }

    #[test]
    fn test_delivery_error_code_label() {
        let error = DeliveryError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.code_label(), "503");
        assert_eq!(DeliveryError::Cancelled.code_label(), "cancelled");
    }
}
