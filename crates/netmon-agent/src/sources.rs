// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hooks used by the OS-level event sources.
//!
//! The NFLOG and conntrack readers live outside this crate. They build
//! [`FirewallDrop`] and [`Flow`] events, attach DNS context through a
//! [`FlowEnricher`], and hand the result to a [`Mailbox`] labelled with their
//! stream.

use std::sync::Arc;

use chrono::Utc;

use crate::constants::NFLOG_FORWARD_GROUP;
use crate::event::{DnsContext, Event, FirewallDrop, Flow, Payload};
use crate::mailbox::Mailbox;
use crate::telemetry::{Stats, Stream};

/// Synchronous "DNS context for IP" lookup used to enrich flows.
pub trait FlowEnricher: Send + Sync {
    /// `None` means the address has never been seen; that is not an error.
    fn dns_context(&self, ip: &str) -> Option<DnsContext>;
}

/// Netfilter hook name for an NFLOG group.
#[must_use]
pub fn nflog_hook(group: u16) -> &'static str {
    if group == NFLOG_FORWARD_GROUP {
        "FORWARD"
    } else {
        "INPUT"
    }
}

/// Conntrack event kinds the source forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConntrackKind {
    New,
    Destroy,
    Update,
}

/// Entry point for the NFLOG and conntrack readers.
#[derive(Clone)]
pub struct SourceSink {
    out: Mailbox<Event>,
    stats: Arc<Stats>,
    enricher: Option<Arc<dyn FlowEnricher>>,
    emit_conntrack_new: bool,
}

impl SourceSink {
    #[must_use]
    pub fn new(
        out: Mailbox<Event>,
        stats: Arc<Stats>,
        enricher: Option<Arc<dyn FlowEnricher>>,
        emit_conntrack_new: bool,
    ) -> Self {
        SourceSink {
            out,
            stats,
            enricher,
            emit_conntrack_new,
        }
    }

    pub fn firewall_drop(&self, drop: FirewallDrop) -> bool {
        Stats::incr(&self.stats.nflog_events);
        self.out
            .relabel(Stream::FirewallDrop)
            .try_send(Event::new(Utc::now(), Payload::FirewallDrop(drop)))
    }

    /// Forwards a conntrack event. Destroys are always emitted; new flows only
    /// when `emit_conntrack_new` is set; updates never.
    pub fn flow(&self, kind: ConntrackKind, mut flow: Flow) -> bool {
        match kind {
            ConntrackKind::Destroy => Stats::incr(&self.stats.conntrack_destroy),
            ConntrackKind::New if self.emit_conntrack_new => {}
            _ => return false,
        }
        if let Some(enricher) = &self.enricher {
            flow.enrich(enricher.as_ref());
        }
        self.out
            .relabel(Stream::Flow)
            .try_send(Event::new(Utc::now(), Payload::Flow(flow)))
    }

    pub fn nflog_parse_error(&self) {
        Stats::incr(&self.stats.nflog_parse_errors);
    }

    pub fn conntrack_parse_error(&self) {
        Stats::incr(&self.stats.conntrack_parse_errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct StaticEnricher;

    impl FlowEnricher for StaticEnricher {
        fn dns_context(&self, ip: &str) -> Option<DnsContext> {
            (ip == "10.0.0.5").then(|| DnsContext {
                recent_qname_hashes: vec!["b64:x".to_string()],
                last_seen: "2024-02-20T14:21:00+00:00".to_string(),
            })
        }
    }

    fn flow(src_ip: &str) -> Flow {
        let ts = Utc
            .with_ymd_and_hms(2024, 2, 20, 14, 21, 0)
            .single()
            .expect("valid timestamp");
        Flow {
            event: "DESTROY".to_string(),
            state: "CLOSE".to_string(),
            flags: String::new(),
            src_ip: src_ip.to_string(),
            dst_ip: "1.1.1.1".to_string(),
            src_port: 40000,
            dst_port: 53,
            l4proto: 17,
            dir: "OUT".to_string(),
            bytes_orig: 60,
            bytes_reply: 120,
            packets_orig: 1,
            packets_reply: 1,
            first_seen: ts,
            last_seen: ts,
            dns_context: None,
        }
    }

    #[test]
    fn test_nflog_hook() {
        assert_eq!(nflog_hook(11), "FORWARD");
        assert_eq!(nflog_hook(10), "INPUT");
    }

    #[tokio::test]
    async fn test_flow_is_enriched_with_dns_context() {
        let stats = Stats::new();
        let (out, mut rx) = Mailbox::new(4, Stream::Events, Arc::clone(&stats));
        let sink = SourceSink::new(out, Arc::clone(&stats), Some(Arc::new(StaticEnricher)), false);

        assert!(sink.flow(ConntrackKind::Destroy, flow("10.0.0.5")));
        assert!(sink.flow(ConntrackKind::Destroy, flow("10.0.0.9")));

        let Some(Event { payload: Payload::Flow(known), .. }) = rx.recv().await else {
            panic!("expected a flow event");
        };
        assert_eq!(
            known.dns_context.map(|c| c.recent_qname_hashes),
            Some(vec!["b64:x".to_string()])
        );
        let Some(Event { payload: Payload::Flow(unknown), .. }) = rx.recv().await else {
            panic!("expected a flow event");
        };
        assert!(unknown.dns_context.is_none());
        assert_eq!(
            stats.conntrack_destroy.load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn test_new_flows_require_opt_in() {
        let stats = Stats::new();
        let (out, _rx) = Mailbox::new(4, Stream::Events, Arc::clone(&stats));
        let sink = SourceSink::new(out.clone(), Arc::clone(&stats), None, false);
        assert!(!sink.flow(ConntrackKind::New, flow("10.0.0.5")));
        assert!(!sink.flow(ConntrackKind::Update, flow("10.0.0.5")));

        let sink = SourceSink::new(out, stats, None, true);
        assert!(sink.flow(ConntrackKind::New, flow("10.0.0.5")));
    }
}
