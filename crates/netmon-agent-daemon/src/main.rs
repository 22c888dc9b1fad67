// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use netmon_agent::{
    api::CollectorApi,
    config::{log_level::LogLevel, Config, DEFAULT_CONFIG_PATH},
    dns::{Correlator, QnameHasher, Tailer},
    event::Event,
    flusher::{Flusher, FlusherConfig},
    heartbeat,
    logger::Formatter,
    mailbox::Mailbox,
    metrics,
    sources::nflog_hook,
    spool::Spool,
    telemetry::{run_sampler, QueueGauge, Stats, Stream},
    AGENT_VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "netmon-agent", version, about = "Router network telemetry agent")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "NETMON_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn init_logging(level: LogLevel) {
    let env_filter = format!(
        "h2=off,hyper=off,rustls=off,reqwest=off,{}",
        level.directive()
    );
    let result = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(Formatter)
        .try_init();
    if let Err(e) = result {
        eprintln!("Failed to install log subscriber: {e}");
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging(LogLevel::default());
            error!("Invalid configuration in {}: {e}", args.config.display());
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.log_level);
    info!(
        "Starting netmon-agent {} for router {}",
        AGENT_VERSION, config.router_id
    );

    let stats = Stats::new();
    let spool = Arc::new(Spool::new(&config.spool_dir, config.spool_max_bytes));
    if let Err(e) = spool.ensure() {
        error!("Unable to create spool at {}: {e}", config.spool_dir.display());
        return ExitCode::FAILURE;
    }

    let cancel = CancellationToken::new();

    let api = CollectorApi::new(
        &config.collector_url,
        &config.auth_token,
        config.http_timeout(),
        Arc::clone(&stats),
    );
    let (flusher, sender) = Flusher::new(FlusherConfig {
        router_id: config.router_id.clone(),
        api,
        spool: Arc::clone(&spool),
        stats: Arc::clone(&stats),
        batch_max_events: config.batch_max_events,
        batch_max_wait: config.batch_max_wait(),
        queue_depth: config.queue_depth,
        retry_attempts: config.http_retry_max,
        retry_base: config.http_retry_base(),
        spool_replay_interval: config.spool_replay_interval(),
    });
    let flusher = Arc::new(flusher);

    let flusher_task = {
        let flusher = Arc::clone(&flusher);
        let cancel = cancel.clone();
        tokio::spawn(async move { flusher.run(cancel).await })
    };
    let replay_task = {
        let flusher = Arc::clone(&flusher);
        let cancel = cancel.clone();
        tokio::spawn(async move { flusher.run_replay_loop(cancel).await })
    };
    let heartbeat_task = tokio::spawn(heartbeat::run(
        config.router_id.clone(),
        config.heartbeat_interval(),
        sender.clone(),
        cancel.clone(),
    ));

    // Every source funnels into one events mailbox, forwarded to the flusher.
    let (events, mut events_rx) =
        Mailbox::<Event>::new(config.queue_depth, Stream::Events, Arc::clone(&stats));
    let fan_in_task = {
        let sender = sender.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events_rx.recv() => match event {
                        Some(event) => {
                            sender.ingest(event);
                        }
                        None => break,
                    },
                }
            }
        })
    };

    let (dns_lines, dns_lines_rx) =
        Mailbox::<String>::new(config.queue_depth, Stream::DnsLines, Arc::clone(&stats));
    let correlator = Arc::new(Correlator::new(
        QnameHasher::new(config.qname_hash_salt.clone()),
        config.qname_hash_cap,
        Arc::clone(&stats),
    ));
    let tail_task = tokio::spawn(
        Tailer::new(&config.dnsmasq_log_path, dns_lines.clone()).run(cancel.clone()),
    );
    let correlator_task = {
        let correlator = Arc::clone(&correlator);
        let events = events.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { correlator.run(dns_lines_rx, events, cancel).await })
    };

    for group in &config.nflog_groups {
        info!("NFLOG group {} logs the {} hook", group, nflog_hook(*group));
    }

    let queues: Vec<Box<dyn QueueGauge>> = vec![
        Box::new(events),
        Box::new(dns_lines),
        Box::new(sender),
    ];
    let sampler_task = tokio::spawn(run_sampler(
        Arc::clone(&stats),
        Arc::clone(&spool),
        queues,
        cancel.clone(),
    ));

    let metrics_task = match tokio::net::TcpListener::bind(&config.metrics_bind).await {
        Ok(listener) => {
            info!("Serving metrics on {}", config.metrics_bind);
            Some(tokio::spawn(metrics::serve(
                listener,
                Arc::clone(&stats),
                cancel.clone(),
            )))
        }
        Err(e) => {
            error!("Unable to bind metrics endpoint {}: {e}", config.metrics_bind);
            None
        }
    };

    wait_for_shutdown().await;
    info!("Shutdown requested");
    cancel.cancel();

    // The flusher makes one last delivery attempt before returning.
    if let Err(e) = flusher_task.await {
        error!("Flusher task failed: {e}");
    }
    for task in [
        replay_task,
        heartbeat_task,
        fan_in_task,
        tail_task,
        correlator_task,
        sampler_task,
    ]
    .into_iter()
    .chain(metrics_task)
    {
        if let Err(e) = task.await {
            error!("Task failed during shutdown: {e}");
        }
    }

    debug!("Final counters: {:?}", stats.snapshot());
    info!("netmon-agent stopped");
    ExitCode::SUCCESS
}

async fn wait_for_shutdown() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Unable to listen for SIGTERM: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for SIGINT: {e}");
            }
            return;
        }
    };
    tokio::select! {
        _ = terminate.recv() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Unable to listen for SIGINT: {e}");
            }
        }
    }
}
