// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::event::{Event, Heartbeat, Payload};
use crate::flusher::EventSender;

/// Ingests a `heartbeat` event every `interval` until cancelled.
pub async fn run(
    router_id: String,
    interval: Duration,
    sender: EventSender,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let event = Event::new(
                    Utc::now(),
                    Payload::Heartbeat(Heartbeat {
                        router_id: router_id.clone(),
                    }),
                );
                if !sender.ingest(event) {
                    trace!("Heartbeat dropped");
                }
            }
        }
    }
    debug!("Heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::api::CollectorApi;
    use crate::flusher::{Flusher, FlusherConfig};
    use crate::spool::Spool;
    use crate::telemetry::Stats;

    #[tokio::test(start_paused = true)]
    async fn test_emits_on_each_tick() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stats = Stats::new();
        let (_flusher, sender) = Flusher::new(FlusherConfig {
            router_id: "router-1".to_string(),
            api: CollectorApi::new(
                "http://127.0.0.1:9",
                "secret",
                Duration::from_secs(1),
                Arc::clone(&stats),
            ),
            spool: Arc::new(Spool::new(dir.path(), 1024)),
            stats: Arc::clone(&stats),
            batch_max_events: 10,
            batch_max_wait: Duration::from_secs(1),
            queue_depth: 10,
            retry_attempts: 1,
            retry_base: Duration::from_millis(1),
            spool_replay_interval: Duration::from_secs(30),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            "router-1".to_string(),
            Duration::from_secs(30),
            sender.clone(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        task.await.expect("heartbeat task");
        assert_eq!(sender.depth(), 3);
    }
}
