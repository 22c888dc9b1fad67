// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for the collector's batch endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants::BATCH_PATH;
use crate::errors::DeliveryError;
use crate::retry::backoff_schedule;
use crate::telemetry::Stats;
use crate::AGENT_VERSION;

#[derive(Debug, Clone)]
pub struct CollectorApi {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    stats: Arc<Stats>,
}

impl CollectorApi {
    #[must_use]
    pub fn new(base_url: &str, token: &str, timeout: Duration, stats: Arc<Stats>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                error!("Unable to build HTTP client: {}, using defaults", e);
                reqwest::Client::new()
            });
        CollectorApi {
            client,
            endpoint: format!("{}{BATCH_PATH}", base_url.trim_end_matches('/')),
            token: token.to_string(),
            stats,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Exactly one POST of `payload`. Any 2xx status is success.
    pub async fn ship(&self, payload: &[u8]) -> Result<(), DeliveryError> {
        let start = Instant::now();
        let result = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, format!("netmon-agent/{AGENT_VERSION}"))
            .body(payload.to_vec())
            .send()
            .await;
        let elapsed = start.elapsed();

        let error = match result {
            Ok(response) => {
                let status = response.status();
                // Drain the body so the connection can be reused.
                let _ = response.bytes().await;
                if status.is_success() {
                    Stats::incr(&self.stats.http_batches_sent);
                    debug!(
                        "Shipped {} bytes in {} ms ({})",
                        payload.len(),
                        elapsed.as_millis(),
                        status
                    );
                    return Ok(());
                }
                DeliveryError::Status(status)
            }
            Err(e) => DeliveryError::Transport(e),
        };
        self.stats.record_send_error(&error.code_label());
        warn!("Failed to ship batch after {} ms: {}", elapsed.as_millis(), error);
        Err(error)
    }

    /// Up to `attempts` calls to [`Self::ship`], sleeping a jittered
    /// exponential delay before every retry. Cancellation interrupts the wait.
    pub async fn ship_with_retry(
        &self,
        payload: &[u8],
        attempts: u32,
        base: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), DeliveryError> {
        let delays = backoff_schedule(base, attempts, &mut fastrand::Rng::new());
        let mut last_error = DeliveryError::Cancelled;
        for (attempt, delay) in delays.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(DeliveryError::Cancelled);
            }
            if attempt > 0 {
                tokio::select! {
                    () = cancel.cancelled() => return Err(DeliveryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            match self.ship(payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("Attempt {} failed: {}", attempt + 1, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}
