// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Self-observability counters and gauges.
//!
//! The agent reports its own health through counters (drops, parse errors,
//! delivery failures) and gauges (spool size, queue depths). Exporting them is
//! left to the embedding process; [`Stats::snapshot`] gives a serialisable view
//! and [`run_sampler`] keeps the gauges fresh.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use derive_more::Display;
use hashbrown::HashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::SAMPLER_INTERVAL;
use crate::spool::Spool;

const STREAM_COUNT: usize = 8;

/// Names every bounded hand-off in the agent. Used to label drops and queue depths.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    #[display("events")]
    Events,
    #[display("dns_lines")]
    DnsLines,
    #[display("http_batch")]
    HttpBatch,
    #[display("dns_bucket")]
    DnsBucket,
    #[display("host_identity")]
    HostIdentity,
    #[display("flow")]
    Flow,
    #[display("firewall_drop")]
    FirewallDrop,
    #[display("heartbeat")]
    Heartbeat,
}

impl Stream {
    pub const ALL: [Stream; STREAM_COUNT] = [
        Stream::Events,
        Stream::DnsLines,
        Stream::HttpBatch,
        Stream::DnsBucket,
        Stream::HostIdentity,
        Stream::Flow,
        Stream::FirewallDrop,
        Stream::Heartbeat,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub nflog_events: AtomicU64,
    pub nflog_parse_errors: AtomicU64,
    pub conntrack_destroy: AtomicU64,
    pub conntrack_parse_errors: AtomicU64,
    pub dns_lines: AtomicU64,
    pub dns_parse_errors: AtomicU64,
    pub dns_buckets_emitted: AtomicU64,
    pub http_batches_sent: AtomicU64,
    pub spool_dropped_batches: AtomicU64,
    pub spool_bytes: AtomicU64,
    pub spool_batches: AtomicU64,
    http_send_errors: Mutex<HashMap<String, u64>>,
    dropped_local: [AtomicU64; STREAM_COUNT],
    queue_depth: [AtomicU64; STREAM_COUNT],
}

impl Stats {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Stats::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drop(&self, stream: Stream) {
        self.dropped_local[stream.index()].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn dropped(&self, stream: Stream) -> u64 {
        self.dropped_local[stream.index()].load(Ordering::Relaxed)
    }

    pub fn record_send_error(&self, code: &str) {
        let mut errors = self
            .http_send_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *errors.entry(code.to_string()).or_insert(0) += 1;
    }

    #[must_use]
    pub fn send_errors(&self, code: &str) -> u64 {
        let errors = self
            .http_send_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        errors.get(code).copied().unwrap_or(0)
    }

    pub fn set_queue_depth(&self, stream: Stream, depth: usize) {
        self.queue_depth[stream.index()].store(depth as u64, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let http_send_errors = self
            .http_send_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        StatsSnapshot {
            nflog_events: load(&self.nflog_events),
            nflog_parse_errors: load(&self.nflog_parse_errors),
            conntrack_destroy: load(&self.conntrack_destroy),
            conntrack_parse_errors: load(&self.conntrack_parse_errors),
            dns_lines: load(&self.dns_lines),
            dns_parse_errors: load(&self.dns_parse_errors),
            dns_buckets_emitted: load(&self.dns_buckets_emitted),
            http_batches_sent: load(&self.http_batches_sent),
            spool_dropped_batches: load(&self.spool_dropped_batches),
            spool_bytes: load(&self.spool_bytes),
            spool_batches: load(&self.spool_batches),
            http_send_errors,
            dropped_local: Stream::ALL
                .iter()
                .map(|s| (s.to_string(), self.dropped(*s)))
                .collect(),
            queue_depth: Stream::ALL
                .iter()
                .map(|s| (s.to_string(), load(&self.queue_depth[s.index()])))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub nflog_events: u64,
    pub nflog_parse_errors: u64,
    pub conntrack_destroy: u64,
    pub conntrack_parse_errors: u64,
    pub dns_lines: u64,
    pub dns_parse_errors: u64,
    pub dns_buckets_emitted: u64,
    pub http_batches_sent: u64,
    pub spool_dropped_batches: u64,
    pub spool_bytes: u64,
    pub spool_batches: u64,
    pub http_send_errors: std::collections::BTreeMap<String, u64>,
    pub dropped_local: std::collections::BTreeMap<String, u64>,
    pub queue_depth: std::collections::BTreeMap<String, u64>,
}

/// A queue whose depth the sampler reports.
pub trait QueueGauge: Send + Sync {
    fn stream(&self) -> Stream;
    fn depth(&self) -> usize;
}

/// Periodically refreshes the spool and queue gauges until cancelled.
pub async fn run_sampler(
    stats: Arc<Stats>,
    spool: Arc<Spool>,
    queues: Vec<Box<dyn QueueGauge>>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(SAMPLER_INTERVAL);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                sample(&stats, &spool, &queues);
            }
        }
    }
    debug!("Stats sampler stopped");
}

fn sample(stats: &Stats, spool: &Spool, queues: &[Box<dyn QueueGauge>]) {
    let spool_bytes = spool.size_bytes();
    let spool_batches = spool.count() as u64;
    stats.spool_bytes.store(spool_bytes, Ordering::Relaxed);
    stats.spool_batches.store(spool_batches, Ordering::Relaxed);
    for queue in queues {
        stats.set_queue_depth(queue.stream(), queue.depth());
    }
    debug!(
        "Spool holds {} batches ({} bytes), {} batches sent",
        spool_batches,
        spool_bytes,
        stats.http_batches_sent.load(Ordering::Relaxed)
    );
}
