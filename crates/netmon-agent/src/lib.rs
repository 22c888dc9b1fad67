// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # netmon-agent
//!
//! Core of the router telemetry agent. Firewall drops, connection-tracking
//! flows and DNS resolver activity are turned into structured events, batched,
//! and shipped to a remote collector over HTTP. Batches that cannot be
//! delivered are kept in a bounded on-disk spool and replayed oldest-first.
//!
//! ## Architecture
//!
//! ```text
//!   dnsmasq log ──> dns::tail ──> dns::correlator ──┐
//!                                   ^  (lookup)     │
//!   conntrack / nflog collaborators ┘───────────────┤
//!   heartbeat ──────────────────────────────────────┤
//!                                                   v
//!                                          flusher (batch) ──> api (HTTP)
//!                                                   │ failure
//!                                                   v
//!                                                 spool ──> replay (retry)
//! ```
//!
//! Every hand-off between stages is a [`mailbox::Mailbox`]: a bounded queue
//! that drops and counts instead of blocking the producer.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod api;
pub mod config;
pub mod constants;
pub mod dns;
pub mod errors;
pub mod event;
pub mod flusher;
pub mod heartbeat;
pub mod logger;
pub mod mailbox;
pub mod metrics;
pub mod retry;
pub mod ring;
pub mod sources;
pub mod spool;
pub mod telemetry;

/// Agent version reported in the `User-Agent` header.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
