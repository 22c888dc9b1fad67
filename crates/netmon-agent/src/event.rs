// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Domain events and the batch envelope shipped to the collector.
//!
//! An [`Event`] serialises as `{"ts": ..., "type": ..., "data": {...}}`; a
//! [`Batch`] wraps an ordered list of events with the router identity and the
//! time the batch was sent. The serialised batch is the unit of network
//! transmission and of spool storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sources::FlowEnricher;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Event {
    #[must_use]
    pub fn new(ts: DateTime<Utc>, payload: Payload) -> Self {
        Event { ts, payload }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self.payload {
            Payload::Heartbeat(_) => "heartbeat",
            Payload::FirewallDrop(_) => "firewall_drop",
            Payload::Flow(_) => "flow",
            Payload::DnsBucket(_) => "dns_bucket",
            Payload::HostIdentity(_) => "host_identity",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Heartbeat(Heartbeat),
    FirewallDrop(FirewallDrop),
    Flow(Flow),
    DnsBucket(DnsBucket),
    HostIdentity(HostIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub router_id: String,
}

/// A packet dropped by the firewall and logged through NFLOG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallDrop {
    pub hook: String,
    pub rule_tag: String,
    pub nflog_group: u16,
    pub if_in: String,
    pub if_out: Option<String>,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4proto: u8,
    pub tcp_syn: bool,
}

/// A connection-tracking lifecycle event (new or destroyed flow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub event: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub flags: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4proto: u8,
    pub dir: String,
    pub bytes_orig: u64,
    pub bytes_reply: u64,
    pub packets_orig: u64,
    pub packets_reply: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_context: Option<DnsContext>,
}

impl Flow {
    /// Attaches the DNS history of the flow's source address, if any is known.
    pub fn enrich(&mut self, enricher: &dyn FlowEnricher) {
        self.dns_context = enricher.dns_context(&self.src_ip);
    }
}

/// One minute of query activity for a (client, qtype, hashed name) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsBucket {
    pub bucket_start: DateTime<Utc>,
    pub client_ip: String,
    pub qtype: String,
    pub qname_hash: String,
    pub count: u64,
    pub nxdomain: u64,
}

/// Recent DNS identity of a LAN client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostIdentity {
    pub ip: String,
    pub last_seen: DateTime<Utc>,
    pub recent_qname_hashes: Vec<String>,
}

/// DNS history attached to a flow for its source address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsContext {
    pub recent_qname_hashes: Vec<String>,
    pub last_seen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub router_id: String,
    pub sent_at: DateTime<Utc>,
    pub events: Vec<Event>,
}

impl Batch {
    #[must_use]
    pub fn new(router_id: &str, sent_at: DateTime<Utc>, events: Vec<Event>) -> Self {
        Batch {
            router_id: router_id.to_string(),
            sent_at,
            events,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
