// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns parsed resolver lines into per-minute query buckets and a per-client
//! history of hashed query names.
//!
//! Three maps live behind a single lock:
//!
//! - buckets: `(client, qtype, qname hash, minute)` -> counters, drained on
//!   every flush
//! - last queries: raw qname -> bucket of its most recent query, used to
//!   attribute NXDOMAIN replies, pruned after five minutes
//! - clients: client IP -> last seen time and a ring of recent name hashes,
//!   read concurrently by flow enrichment
//!
//! Replies carry no client address, so NXDOMAIN replies are matched to the
//! last query for the same name regardless of who asked.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, DurationRound, SecondsFormat, TimeDelta, Utc};
use hashbrown::HashMap;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::constants::{
    DNS_FLUSH_INTERVAL, LAST_QUERY_RETENTION_SECS, NXDOMAIN_CORRELATION_WINDOW_SECS,
};
use crate::dns::hash::QnameHasher;
use crate::dns::parse::{parse, Action};
use crate::event::{DnsBucket, DnsContext, Event, HostIdentity, Payload};
use crate::mailbox::Mailbox;
use crate::ring::Ring;
use crate::sources::FlowEnricher;
use crate::telemetry::{Stats, Stream};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    client_ip: String,
    qtype: String,
    qname_hash: String,
    bucket_start: DateTime<Utc>,
}

#[derive(Debug)]
struct LastQuery {
    key: BucketKey,
    seen: DateTime<Utc>,
}

#[derive(Debug)]
struct ClientEntry {
    last_seen: DateTime<Utc>,
    qname_hashes: Ring<String>,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<BucketKey, DnsBucket>,
    last_queries: HashMap<String, LastQuery>,
    clients: HashMap<String, ClientEntry>,
}

#[derive(Debug)]
pub struct Correlator {
    state: RwLock<State>,
    hasher: QnameHasher,
    ring_capacity: usize,
    stats: Arc<Stats>,
}

impl Correlator {
    #[must_use]
    pub fn new(hasher: QnameHasher, ring_capacity: usize, stats: Arc<Stats>) -> Self {
        Correlator {
            state: RwLock::new(State::default()),
            hasher,
            ring_capacity,
            stats,
        }
    }

    /// Parses one resolver line and folds it into the correlation state.
    /// Lines that do not parse are counted and skipped.
    pub fn process_line(&self, line: &str, now: DateTime<Utc>) {
        Stats::incr(&self.stats.dns_lines);
        let parsed = match parse(line, now) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!("Skipping dns line: {}", e);
                Stats::incr(&self.stats.dns_parse_errors);
                return;
            }
        };

        match parsed.action {
            Action::Query {
                client_ip,
                qname,
                qtype,
            } => {
                let qname_hash = self.hasher.hash(&qname);
                let bucket_start = truncate_to_minute(parsed.ts);
                let mut state = self.write();

                if !client_ip.is_empty() {
                    let entry = state
                        .clients
                        .entry(client_ip.clone())
                        .or_insert_with(|| ClientEntry {
                            last_seen: now,
                            qname_hashes: Ring::new(self.ring_capacity),
                        });
                    entry.last_seen = now;
                    entry.qname_hashes.push(qname_hash.clone());
                }

                let key = BucketKey {
                    client_ip,
                    qtype,
                    qname_hash,
                    bucket_start,
                };
                state
                    .buckets
                    .entry(key.clone())
                    .or_insert_with(|| DnsBucket {
                        bucket_start,
                        client_ip: key.client_ip.clone(),
                        qtype: key.qtype.clone(),
                        qname_hash: key.qname_hash.clone(),
                        count: 0,
                        nxdomain: 0,
                    })
                    .count += 1;
                state.last_queries.insert(
                    qname,
                    LastQuery {
                        key,
                        seen: parsed.ts,
                    },
                );
            }
            Action::Reply {
                qname,
                nxdomain: true,
            } => {
                let mut state = self.write();
                let State {
                    buckets,
                    last_queries,
                    ..
                } = &mut *state;
                let Some(last) = last_queries.get(&qname) else {
                    return;
                };
                if parsed.ts - last.seen > TimeDelta::seconds(NXDOMAIN_CORRELATION_WINDOW_SECS) {
                    return;
                }
                // The bucket may already have been flushed.
                if let Some(bucket) = buckets.get_mut(&last.key) {
                    bucket.nxdomain += 1;
                }
            }
            Action::Reply { .. } => {}
        }
    }

    /// Drains the buckets and snapshots every tracked client.
    ///
    /// Returns one `dns_bucket` event per bucket followed by one
    /// `host_identity` event per client, all stamped `now`.
    pub fn flush(&self, now: DateTime<Utc>) -> Vec<Event> {
        let mut state = self.write();

        let buckets = std::mem::take(&mut state.buckets);
        let mut events = Vec::with_capacity(buckets.len() + state.clients.len());
        for bucket in buckets.into_values() {
            Stats::incr(&self.stats.dns_buckets_emitted);
            events.push(Event::new(now, Payload::DnsBucket(bucket)));
        }
        for (ip, entry) in &state.clients {
            events.push(Event::new(
                now,
                Payload::HostIdentity(HostIdentity {
                    ip: ip.clone(),
                    last_seen: entry.last_seen,
                    recent_qname_hashes: entry.qname_hashes.values(),
                }),
            ));
        }

        let cutoff = now - TimeDelta::seconds(LAST_QUERY_RETENTION_SECS);
        state.last_queries.retain(|_, last| last.seen >= cutoff);

        events
    }

    /// Recent DNS history of `ip`, or `None` if it has never queried.
    #[must_use]
    pub fn lookup_context(&self, ip: &str) -> Option<DnsContext> {
        let state = self.read();
        state.clients.get(ip).map(|entry| DnsContext {
            recent_qname_hashes: entry.qname_hashes.values(),
            last_seen: entry
                .last_seen
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    }

    /// Consumes resolver lines and periodically emits flushed events until
    /// cancelled or the line source closes.
    pub async fn run(
        &self,
        mut lines: mpsc::Receiver<String>,
        out: Mailbox<Event>,
        cancel: CancellationToken,
    ) {
        let buckets_out = out.relabel(Stream::DnsBucket);
        let identities_out = out.relabel(Stream::HostIdentity);
        let mut ticker = interval_at(Instant::now() + DNS_FLUSH_INTERVAL, DNS_FLUSH_INTERVAL);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                line = lines.recv() => {
                    let Some(line) = line else {
                        debug!("DNS line source closed");
                        break;
                    };
                    self.process_line(&line, Utc::now());
                }
                _ = ticker.tick() => {
                    let events = self.flush(Utc::now());
                    debug!("Flushing {} DNS events", events.len());
                    for event in events {
                        let out = match event.payload {
                            Payload::DnsBucket(_) => &buckets_out,
                            _ => &identities_out,
                        };
                        out.try_send(event);
                    }
                }
            }
        }
        debug!("DNS correlator stopped");
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlowEnricher for Correlator {
    fn dns_context(&self, ip: &str) -> Option<DnsContext> {
        self.lookup_context(ip)
    }
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(TimeDelta::minutes(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, Timelike};

    // Resolver lines are in local time; build them from a UTC instant so the
    // assertions do not depend on the machine's time zone.
    fn line_at(ts: DateTime<Utc>, body: &str) -> String {
        let local = ts.with_timezone(&Local);
        format!("{} router dnsmasq[42]: {body}", local.format("%b %e %H:%M:%S"))
    }

    fn t0() -> DateTime<Utc> {
        Utc::now()
            .with_nanosecond(0)
            .and_then(|t| t.with_second(0))
            .expect("valid time")
            - TimeDelta::minutes(10)
    }

    fn correlator(cap: usize) -> (Correlator, Arc<Stats>) {
        let stats = Stats::new();
        (
            Correlator::new(QnameHasher::new("salt"), cap, Arc::clone(&stats)),
            stats,
        )
    }

    fn buckets(events: &[Event]) -> Vec<DnsBucket> {
        events
            .iter()
            .filter_map(|e| match &e.payload {
                Payload::DnsBucket(b) => Some(b.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_nxdomain_within_window_is_counted() {
        let (correlator, stats) = correlator(200);
        let t0 = t0();
        correlator.process_line(&line_at(t0, "query[A] a.example from 10.0.0.5"), t0);
        correlator.process_line(
            &line_at(t0 + TimeDelta::seconds(30), "reply a.example is NXDOMAIN"),
            t0,
        );

        let events = correlator.flush(t0 + TimeDelta::minutes(1));
        let buckets = buckets(&events);
        assert_eq!(
            buckets,
            vec![DnsBucket {
                bucket_start: t0,
                client_ip: "10.0.0.5".to_string(),
                qtype: "A".to_string(),
                qname_hash: QnameHasher::new("salt").hash("a.example"),
                count: 1,
                nxdomain: 1,
            }]
        );
        assert_eq!(
            stats
                .dns_buckets_emitted
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_nxdomain_outside_window_is_ignored() {
        let (correlator, _stats) = correlator(200);
        let t0 = t0();
        correlator.process_line(&line_at(t0, "query[A] a.example from 10.0.0.5"), t0);
        correlator.process_line(
            &line_at(t0 + TimeDelta::seconds(151), "reply a.example is NXDOMAIN"),
            t0,
        );

        let buckets = buckets(&correlator.flush(t0 + TimeDelta::minutes(3)));
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[0].nxdomain, 0);
    }

    #[test]
    fn test_positive_reply_does_not_count() {
        let (correlator, _stats) = correlator(200);
        let t0 = t0();
        correlator.process_line(&line_at(t0, "query[A] a.example from 10.0.0.5"), t0);
        correlator.process_line(&line_at(t0, "reply a.example is 1.2.3.4"), t0);

        let buckets = buckets(&correlator.flush(t0));
        assert_eq!(buckets[0].nxdomain, 0);
    }

    #[test]
    fn test_buckets_split_by_minute_and_type() {
        let (correlator, _stats) = correlator(200);
        let t0 = t0();
        for (offset, qtype) in [(0, "A"), (10, "A"), (20, "AAAA"), (70, "A")] {
            correlator.process_line(
                &line_at(
                    t0 + TimeDelta::seconds(offset),
                    &format!("query[{qtype}] a.example from 10.0.0.5"),
                ),
                t0,
            );
        }

        let mut buckets = buckets(&correlator.flush(t0));
        buckets.sort_by(|a, b| (a.bucket_start, &a.qtype).cmp(&(b.bucket_start, &b.qtype)));
        let shape: Vec<_> = buckets
            .iter()
            .map(|b| (b.bucket_start - t0, b.qtype.as_str(), b.count))
            .collect();
        assert_eq!(
            shape,
            vec![
                (TimeDelta::zero(), "A", 2),
                (TimeDelta::zero(), "AAAA", 1),
                (TimeDelta::minutes(1), "A", 1),
            ]
        );
        // Flush drains buckets.
        assert!(buckets_is_empty(&correlator, t0));
    }

    fn buckets_is_empty(correlator: &Correlator, now: DateTime<Utc>) -> bool {
        buckets(&correlator.flush(now)).is_empty()
    }

    #[test]
    fn test_nxdomain_after_flush_is_dropped() {
        let (correlator, _stats) = correlator(200);
        let t0 = t0();
        correlator.process_line(&line_at(t0, "query[A] a.example from 10.0.0.5"), t0);
        let _ = correlator.flush(t0);
        correlator.process_line(&line_at(t0, "reply a.example is NXDOMAIN"), t0);
        assert!(buckets_is_empty(&correlator, t0));
    }

    #[test]
    fn test_host_identity_and_context() {
        let (correlator, _stats) = correlator(2);
        let t0 = t0();
        for name in ["one.example", "two.example", "three.example"] {
            correlator.process_line(
                &line_at(t0, &format!("query[A] {name} from 10.0.0.5")),
                t0,
            );
        }
        let hasher = QnameHasher::new("salt");
        let expected = vec![hasher.hash("two.example"), hasher.hash("three.example")];

        let context = correlator.lookup_context("10.0.0.5").expect("known client");
        assert_eq!(context.recent_qname_hashes, expected);
        assert_eq!(
            context.last_seen,
            t0.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        assert!(correlator.lookup_context("10.0.0.6").is_none());
        assert!(correlator.dns_context("10.0.0.5").is_some());

        let identities: Vec<HostIdentity> = correlator
            .flush(t0)
            .into_iter()
            .filter_map(|e| match e.payload {
                Payload::HostIdentity(h) => Some(h),
                _ => None,
            })
            .collect();
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].ip, "10.0.0.5");
        assert_eq!(identities[0].recent_qname_hashes, expected);

        // Clients outlive flushes.
        assert!(correlator.lookup_context("10.0.0.5").is_some());
    }

    #[test]
    fn test_parse_errors_are_counted() {
        let (correlator, stats) = correlator(200);
        correlator.process_line("not a dnsmasq line", Utc::now());
        correlator.process_line("", Utc::now());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dns_lines, 2);
        assert_eq!(snapshot.dns_parse_errors, 2);
    }

    #[test]
    fn test_stale_last_queries_are_pruned() {
        let (correlator, _stats) = correlator(200);
        let t0 = t0();
        correlator.process_line(&line_at(t0, "query[A] a.example from 10.0.0.5"), t0);
        let _ = correlator.flush(t0 + TimeDelta::minutes(6));
        assert!(correlator.read().last_queries.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let (correlator, stats) = correlator(200);
        let (lines_tx, lines_rx) = mpsc::channel(4);
        let (out, _events) = Mailbox::new(4, Stream::Events, Arc::clone(&stats));
        let cancel = CancellationToken::new();

        let line = line_at(Utc::now(), "query[A] a.example from 10.0.0.5");
        lines_tx.send(line).await.expect("send line");

        let run = correlator.run(lines_rx, out, cancel.clone());
        let stopper = async {
            while correlator.lookup_context("10.0.0.5").is_none() {
                tokio::task::yield_now().await;
            }
            cancel.cancel();
        };
        tokio::join!(run, stopper);
        assert_eq!(stats.snapshot().dns_lines, 1);
    }
}
