// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching and delivery of events to the collector.
//!
//! ```text
//!   EventSender::ingest ──> [http_batch mailbox] ──> Flusher::run
//!                                                      │ full batch or tick
//!                                                      v
//!                                               send_or_spool ──ok──> done
//!                                                      │ failure
//!                                                      v
//!                              spool <── replay_spool (tick + replay loop)
//! ```
//!
//! A fresh batch gets exactly one delivery attempt; on failure its serialized
//! bytes go to the spool unchanged. Spooled batches are replayed oldest first
//! with retries, and a replay pass stops at the first batch it cannot deliver
//! so that order is preserved.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::api::CollectorApi;
use crate::errors::SpoolError;
use crate::event::{Batch, Event};
use crate::mailbox::Mailbox;
use crate::spool::Spool;
use crate::telemetry::{QueueGauge, Stats, Stream};

pub struct FlusherConfig {
    pub router_id: String,
    pub api: CollectorApi,
    pub spool: Arc<Spool>,
    pub stats: Arc<Stats>,
    pub batch_max_events: usize,
    pub batch_max_wait: Duration,
    pub queue_depth: usize,
    pub retry_attempts: u32,
    pub retry_base: Duration,
    pub spool_replay_interval: Duration,
}

pub struct Flusher {
    router_id: String,
    api: CollectorApi,
    spool: Arc<Spool>,
    stats: Arc<Stats>,
    batch_max_events: usize,
    batch_max_wait: Duration,
    retry_attempts: u32,
    retry_base: Duration,
    spool_replay_interval: Duration,
    inbox: Mutex<mpsc::Receiver<Event>>,
    // Held for the duration of a replay pass so two passes never race on the
    // same oldest file.
    replaying: Mutex<()>,
}

/// Cloneable, non-blocking entry point into the delivery pipeline.
#[derive(Clone)]
pub struct EventSender {
    mailbox: Mailbox<Event>,
}

impl EventSender {
    /// Queues an event for delivery; `false` if it was dropped.
    pub fn ingest(&self, event: Event) -> bool {
        self.mailbox.try_send(event)
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.mailbox.depth()
    }
}

impl QueueGauge for EventSender {
    fn stream(&self) -> Stream {
        Stream::HttpBatch
    }

    fn depth(&self) -> usize {
        self.mailbox.depth()
    }
}

impl Flusher {
    #[must_use]
    pub fn new(config: FlusherConfig) -> (Self, EventSender) {
        let (mailbox, inbox) = Mailbox::new(
            config.queue_depth,
            Stream::HttpBatch,
            Arc::clone(&config.stats),
        );
        let flusher = Flusher {
            router_id: config.router_id,
            api: config.api,
            spool: config.spool,
            stats: config.stats,
            batch_max_events: config.batch_max_events.max(1),
            batch_max_wait: config.batch_max_wait,
            retry_attempts: config.retry_attempts,
            retry_base: config.retry_base,
            spool_replay_interval: config.spool_replay_interval,
            inbox: Mutex::new(inbox),
            replaying: Mutex::new(()),
        };
        (flusher, EventSender { mailbox })
    }

    /// Batches incoming events until cancelled, then makes one last
    /// non-retried attempt with whatever is pending.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut inbox = self.inbox.lock().await;
        let mut batch = Vec::with_capacity(self.batch_max_events);
        let mut ticker = interval_at(Instant::now() + self.batch_max_wait, self.batch_max_wait);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = inbox.recv() => {
                    let Some(event) = event else {
                        debug!("All event senders dropped");
                        break;
                    };
                    batch.push(event);
                    if batch.len() >= self.batch_max_events {
                        self.send_or_spool(std::mem::take(&mut batch)).await;
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.send_or_spool(std::mem::take(&mut batch)).await;
                    }
                    self.replay_spool(&cancel).await;
                }
            }
        }

        if !batch.is_empty() {
            debug!("Final flush of {} events", batch.len());
            self.send_or_spool(batch).await;
        }
        debug!("Flusher stopped");
    }

    /// Replays the spool on its own timer until cancelled.
    pub async fn run_replay_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval_at(
            Instant::now() + self.spool_replay_interval,
            self.spool_replay_interval,
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.replay_spool(&cancel).await;
                }
            }
        }
        debug!("Spool replay loop stopped");
    }

    /// One delivery attempt for `events`; spools the payload on failure.
    /// Returns whether the batch reached the collector.
    pub async fn send_or_spool(&self, events: Vec<Event>) -> bool {
        if events.is_empty() {
            return true;
        }
        let count = events.len();
        let payload = match Batch::new(&self.router_id, Utc::now(), events).to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize batch of {} events: {}", count, e);
                return false;
            }
        };

        match self.api.ship(&payload).await {
            Ok(()) => {
                debug!("Delivered batch of {} events", count);
                true
            }
            Err(e) => {
                debug!("Spooling batch of {} events after delivery failure: {}", count, e);
                if let Err(e) = self.spool.enqueue(&payload) {
                    Stats::incr(&self.stats.spool_dropped_batches);
                    error!("Dropped batch of {} events: {}", count, e);
                }
                false
            }
        }
    }

    /// Delivers spooled batches oldest first until the spool is empty or a
    /// batch fails every retry. Returns the number of batches delivered.
    pub async fn replay_spool(&self, cancel: &CancellationToken) -> usize {
        let Ok(_guard) = self.replaying.try_lock() else {
            debug!("Spool replay already in progress");
            return 0;
        };

        let mut delivered = 0;
        while !cancel.is_cancelled() {
            let (path, payload) = match self.spool.dequeue_oldest() {
                Ok(entry) => entry,
                Err(SpoolError::Empty) => break,
                Err(e) => {
                    warn!("Stopping spool replay: {}", e);
                    break;
                }
            };
            if let Err(e) = self
                .api
                .ship_with_retry(&payload, self.retry_attempts, self.retry_base, cancel)
                .await
            {
                debug!("Stopping spool replay at {}: {}", path.display(), e);
                break;
            }
            if let Err(e) = self.spool.ack(&path) {
                warn!("Failed to remove replayed batch {}: {}", path.display(), e);
                break;
            }
            delivered += 1;
        }
        if delivered > 0 {
            debug!("Replayed {} spooled batches", delivered);
        }
        delivered
    }
}
