// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration.
//!
//! Sources are merged in priority order:
//! 1. Defaults
//! 2. YAML file (usually `/etc/netmon-agent/config.yaml`)
//! 3. Environment variables prefixed `NETMON_` (highest priority)
//!
//! ```yaml
//! router_id: edge-01
//! collector_url: https://netmon.example.com
//! auth_token: s3cr3t
//! nflog_groups: [10, 11]
//! metrics_bind: 127.0.0.1:9109
//! ```

pub mod log_level;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::Deserialize;

use crate::config::log_level::LogLevel;
use crate::errors::ConfigError;

pub const ENV_PREFIX: &str = "NETMON_";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netmon-agent/config.yaml";

const DEFAULT_DNSMASQ_LOG_PATH: &str = "/var/log/dnsmasq.log";
const DEFAULT_METRICS_BIND: &str = "127.0.0.1:9109";
const DEFAULT_BATCH_MAX_EVENTS: usize = 250;
const DEFAULT_BATCH_MAX_WAIT_MS: u64 = 1000;
const DEFAULT_QUEUE_DEPTH: usize = 2000;
const DEFAULT_SPOOL_DIR: &str = "/var/lib/netmon-agent/spool";
const DEFAULT_SPOOL_MAX_BYTES: u64 = 50 * 1024 * 1024;
const DEFAULT_QNAME_HASH_CAP: usize = 200;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HTTP_RETRY_MAX: u32 = 5;
const DEFAULT_HTTP_RETRY_BASE_MS: u64 = 500;
const DEFAULT_SPOOL_REPLAY_INTERVAL_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router_id: String,
    #[serde(alias = "rails_base_url")]
    pub collector_url: String,
    pub auth_token: String,
    pub nflog_groups: Vec<u16>,
    pub dnsmasq_log_path: PathBuf,
    /// Address of the local `/metrics` endpoint.
    pub metrics_bind: String,

    pub batch_max_events: usize,
    pub batch_max_wait_ms: u64,
    pub queue_depth: usize,
    pub spool_dir: PathBuf,
    pub spool_max_bytes: u64,
    pub qname_hash_salt: String,
    pub qname_hash_cap: usize,
    pub emit_conntrack_new: bool,

    pub http_timeout_secs: u64,
    pub http_retry_max: u32,
    pub http_retry_base_ms: u64,
    pub spool_replay_interval_secs: u64,
    pub heartbeat_interval_secs: u64,

    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            router_id: String::new(),
            collector_url: String::new(),
            auth_token: String::new(),
            nflog_groups: Vec::new(),
            dnsmasq_log_path: PathBuf::from(DEFAULT_DNSMASQ_LOG_PATH),
            metrics_bind: DEFAULT_METRICS_BIND.to_string(),
            batch_max_events: DEFAULT_BATCH_MAX_EVENTS,
            batch_max_wait_ms: DEFAULT_BATCH_MAX_WAIT_MS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            spool_dir: PathBuf::from(DEFAULT_SPOOL_DIR),
            spool_max_bytes: DEFAULT_SPOOL_MAX_BYTES,
            qname_hash_salt: String::new(),
            qname_hash_cap: DEFAULT_QNAME_HASH_CAP,
            emit_conntrack_new: false,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_retry_max: DEFAULT_HTTP_RETRY_MAX,
            http_retry_base_ms: DEFAULT_HTTP_RETRY_BASE_MS,
            spool_replay_interval_secs: DEFAULT_SPOOL_REPLAY_INTERVAL_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            log_level: LogLevel::default(),
        }
    }
}

impl Config {
    /// Loads the YAML file at `path`, applies `NETMON_*` overrides and validates.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::Load(format!(
                "config file {} not found",
                path.display()
            )));
        }
        let figment = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));
        let mut config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Zero and empty values mean "use the default".
    fn apply_defaults(&mut self) {
        let defaults = Config::default();
        if self.metrics_bind.is_empty() {
            self.metrics_bind = defaults.metrics_bind;
        }
        if self.dnsmasq_log_path.as_os_str().is_empty() {
            self.dnsmasq_log_path = defaults.dnsmasq_log_path;
        }
        if self.spool_dir.as_os_str().is_empty() {
            self.spool_dir = defaults.spool_dir;
        }
        if self.batch_max_events == 0 {
            self.batch_max_events = defaults.batch_max_events;
        }
        if self.batch_max_wait_ms == 0 {
            self.batch_max_wait_ms = defaults.batch_max_wait_ms;
        }
        if self.queue_depth == 0 {
            self.queue_depth = defaults.queue_depth;
        }
        if self.spool_max_bytes == 0 {
            self.spool_max_bytes = defaults.spool_max_bytes;
        }
        if self.qname_hash_cap == 0 {
            self.qname_hash_cap = defaults.qname_hash_cap;
        }
        if self.http_timeout_secs == 0 {
            self.http_timeout_secs = defaults.http_timeout_secs;
        }
        if self.spool_replay_interval_secs == 0 {
            self.spool_replay_interval_secs = defaults.spool_replay_interval_secs;
        }
        if self.heartbeat_interval_secs == 0 {
            self.heartbeat_interval_secs = defaults.heartbeat_interval_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router_id.trim().is_empty() {
            return Err(ConfigError::Missing("router_id"));
        }
        if self.collector_url.trim().is_empty() {
            return Err(ConfigError::Missing("collector_url"));
        }
        if !(self.collector_url.starts_with("http://") || self.collector_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid {
                field: "collector_url",
                reason: format!("'{}' is not an http(s) URL", self.collector_url),
            });
        }
        if self.auth_token.is_empty() {
            return Err(ConfigError::Missing("auth_token"));
        }
        if self.nflog_groups.is_empty() {
            return Err(ConfigError::Missing("nflog_groups"));
        }
        if self.metrics_bind.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid {
                field: "metrics_bind",
                reason: format!("'{}' is not an ip:port address", self.metrics_bind),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn batch_max_wait(&self) -> Duration {
        Duration::from_millis(self.batch_max_wait_ms)
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    #[must_use]
    pub fn http_retry_base(&self) -> Duration {
        Duration::from_millis(self.http_retry_base_ms)
    }

    #[must_use]
    pub fn spool_replay_interval(&self) -> Duration {
        Duration::from_secs(self.spool_replay_interval_secs)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
