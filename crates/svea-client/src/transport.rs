// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! The two ways to reach a peer: HTTP over its Unix socket, or HTTP over
//! loopback TCP. Same routes, same bodies; only the stream differs.

use std::path::Path;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tracing::debug;

/// Per-request ceiling; delivery returns immediately, so anything slower
/// than this is a stuck peer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Uds,
    Tcp,
}

impl Transport {
    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Uds => "uds",
            Transport::Tcp => "tcp",
        }
    }
}

/// Status + parsed body of a peer's answer, transport-agnostic.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP/1.1 request over a Unix stream socket.
///
/// reqwest has no UDS support, so this drives a hyper client connection by
/// hand: connect, handshake, single request, done.
pub async fn request_uds(
    socket: &Path,
    method: hyper::Method,
    route: &str,
    body: Option<&serde_json::Value>,
) -> std::io::Result<HttpReply> {
    let run = async {
        let stream = UnixStream::connect(socket).await?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(io_other)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "uds connection task ended");
            }
        });

        let payload = match body {
            Some(v) => Bytes::from(serde_json::to_vec(v).map_err(io_other)?),
            None => Bytes::new(),
        };
        let req = Request::builder()
            .method(method)
            .uri(route)
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(payload))
            .map_err(io_other)?;

        let resp = sender.send_request(req).await.map_err(io_other)?;
        let status = resp.status().as_u16();
        let bytes = resp.into_body().collect().await.map_err(io_other)?.to_bytes();
        Ok(HttpReply {
            status,
            body: parse_body(&bytes),
        })
    };
    tokio::time::timeout(REQUEST_TIMEOUT, run)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "uds request timed out"))?
}

/// One request over TCP via reqwest.
pub async fn request_tcp(
    base_url: &str,
    method: hyper::Method,
    route: &str,
    body: Option<&serde_json::Value>,
) -> reqwest::Result<HttpReply> {
    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    let url = format!("{}{}", base_url.trim_end_matches('/'), route);
    let mut req = if method == hyper::Method::POST {
        client.post(&url)
    } else {
        client.get(&url)
    };
    if let Some(v) = body {
        req = req.json(v);
    }
    let resp = req.send().await?;
    let status = resp.status().as_u16();
    let bytes = resp.bytes().await?;
    Ok(HttpReply {
        status,
        body: parse_body(&bytes),
    })
}

fn parse_body(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap_or(serde_json::Value::Null)
}

fn io_other(e: impl std::error::Error + Send + Sync + 'static) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
