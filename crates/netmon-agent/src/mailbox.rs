// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded, drop-on-full hand-off between pipeline stages.
//!
//! Producers never block: when the queue is full the new item is discarded and
//! the drop counter of the mailbox's [`Stream`] is incremented. This is the only
//! backpressure mechanism in the agent and it is applied uniformly to every
//! stage boundary.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::telemetry::{QueueGauge, Stats, Stream};

/// Sending half of a bounded queue. Cheap to clone.
#[derive(Debug)]
pub struct Mailbox<T> {
    tx: mpsc::Sender<T>,
    stream: Stream,
    stats: Arc<Stats>,
}

impl<T> Clone for Mailbox<T> {
    fn clone(&self) -> Self {
        Mailbox {
            tx: self.tx.clone(),
            stream: self.stream,
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> Mailbox<T> {
    /// Creates a mailbox holding at most `capacity` items (at least one).
    #[must_use]
    pub fn new(capacity: usize, stream: Stream, stats: Arc<Stats>) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Mailbox { tx, stream, stats }, rx)
    }

    /// Enqueues without waiting. Returns `false` when the item was dropped.
    pub fn try_send(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(e) => {
                trace!("{} mailbox rejected item: {}", self.stream, e);
                self.stats.record_drop(self.stream);
                false
            }
        }
    }

    /// Number of items waiting to be received.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    #[must_use]
    pub fn stream(&self) -> Stream {
        self.stream
    }

    /// Same queue, but drops are accounted to `stream` instead.
    #[must_use]
    pub fn relabel(&self, stream: Stream) -> Self {
        Mailbox {
            tx: self.tx.clone(),
            stream,
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: Send> QueueGauge for Mailbox<T> {
    fn stream(&self) -> Stream {
        self.stream
    }

    fn depth(&self) -> usize {
        Mailbox::depth(self)
    }
}
