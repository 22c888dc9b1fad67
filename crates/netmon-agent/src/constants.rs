// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Path of the collector endpoint that accepts event batches.
pub const BATCH_PATH: &str = "/api/v1/netmon/events/batch";

/// Path of the local endpoint serving the agent's own counters.
pub const METRICS_PATH: &str = "/metrics";

/// How often the DNS correlator emits buckets and host identities.
pub const DNS_FLUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum gap between a query and a later NXDOMAIN reply for them to be linked.
pub const NXDOMAIN_CORRELATION_WINDOW_SECS: i64 = 120;

/// Last-query entries older than this are pruned on flush.
pub const LAST_QUERY_RETENTION_SECS: i64 = 300;

/// Prefix of query-name hashes.
pub const QNAME_HASH_PREFIX: &str = "b64:";

/// Spool files are `batch_<nanos>.json`; anything else in the directory is ignored.
pub const SPOOL_FILE_PREFIX: &str = "batch_";
pub const SPOOL_FILE_SUFFIX: &str = ".json";

/// Fraction of each backoff delay applied as uniform jitter in both directions.
pub const RETRY_JITTER_FRACTION: f64 = 0.3;

/// How often the dnsmasq log is polled for new lines and rotation.
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often gauges (spool size, queue depths) are refreshed.
pub const SAMPLER_INTERVAL: Duration = Duration::from_secs(2);

/// NFLOG group bound to the FORWARD chain; every other group logs INPUT.
pub const NFLOG_FORWARD_GROUP: u16 = 11;
