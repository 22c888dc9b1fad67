// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Local HTTP endpoint serving [`Stats::snapshot`] as JSON on `GET /metrics`.

use std::convert::Infallible;
use std::io;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::constants::METRICS_PATH;
use crate::telemetry::Stats;

/// Accepts connections on `listener` until cancelled.
pub async fn serve(listener: TcpListener, stats: Arc<Stats>, cancel: CancellationToken) {
    let server = hyper::server::conn::http1::Builder::new();
    let mut connections = JoinSet::new();

    loop {
        let conn = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((conn, _)) => conn,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Metrics listener failed: {e}");
                    break;
                }
            },
            Some(finished) = connections.join_next() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!("Metrics connection handler panicked: {:?}", e);
                    }
                }
                continue;
            }
        };

        let stats = Arc::clone(&stats);
        let service = service_fn(move |req: Request<Incoming>| {
            let response = handle(&req, &stats);
            async move { Ok::<_, Infallible>(response) }
        });
        let server = server.clone();
        connections.spawn(async move {
            if let Err(e) = server.serve_connection(TokioIo::new(conn), service).await {
                debug!("Metrics connection error: {e}");
            }
        });
    }

    connections.abort_all();
    debug!("Metrics endpoint stopped");
}

fn handle<B>(req: &Request<B>, stats: &Stats) -> Response<Full<Bytes>> {
    if req.method() != Method::GET || req.uri().path() != METRICS_PATH {
        return respond(
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"not found\n"),
        );
    }
    match serde_json::to_vec(&stats.snapshot()) {
        Ok(body) => respond(StatusCode::OK, "application/json", Bytes::from(body)),
        Err(e) => {
            error!("Failed to serialize stats: {e}");
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from_static(b"internal error\n"),
            )
        }
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Stream;

    #[test]
    fn test_unknown_route_is_not_found() {
        let stats = Stats::new();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/status")
            .body(())
            .expect("request");
        assert_eq!(handle(&req, &stats).status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::POST)
            .uri(METRICS_PATH)
            .body(())
            .expect("request");
        assert_eq!(handle(&req, &stats).status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serves_snapshot_as_json() {
        let stats = Stats::new();
        Stats::incr(&stats.dns_lines);
        Stats::incr(&stats.dns_lines);
        stats.record_send_error("503");
        stats.record_drop(Stream::DnsLines);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(listener, Arc::clone(&stats), cancel.clone()));

        let response = reqwest::get(format!("http://{addr}{METRICS_PATH}"))
            .await
            .expect("get metrics");
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        let body: serde_json::Value = response.json().await.expect("json body");
        assert_eq!(body["dns_lines"], 2);
        assert_eq!(body["http_send_errors"]["503"], 1);
        assert_eq!(body["dropped_local"]["dns_lines"], 1);

        cancel.cancel();
        task.await.expect("metrics task");
    }
}
