// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Unix-domain-socket listener.
//!
//! axum's `serve` helper only speaks TCP, so the socket side runs its own
//! accept loop and feeds each connection to the same `Router` through
//! hyper's HTTP/1.1 connection driver. Same-host clients prefer this path:
//! lower latency, and it keeps working in sandboxes that block outbound
//! TCP.

use std::path::Path;

use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tower::Service;
use tracing::{debug, info, warn};

/// Bind `path` (replacing any stale socket file) and serve `router` until
/// the process exits. The socket's parent directory is created with mode
/// 0700: the registry tells peers where the socket is, the directory mode
/// keeps it to the current user.
pub async fn serve_uds(router: Router, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        create_private_dir(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "uds listener bound");

    loop {
        let (stream, _addr) = listener.accept().await?;
        let router = router.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                let mut router = router.clone();
                router.call(req)
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                debug!(error = %e, "uds connection ended with error");
            }
        });
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    match std::fs::DirBuilder::new().recursive(true).mode(0o700).create(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to create socket directory");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_dir_is_0700() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("uds");
        create_private_dir(&dir).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
