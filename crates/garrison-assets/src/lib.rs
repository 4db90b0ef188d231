//! Local asset server for the Garrison launcher.
//!
//! Serves a prebuilt frontend directory as a generic single-page-application
//! file server: unknown paths fall back to the root `index.html`, directories
//! redirect to their own `index.html`. Local-only and trusted, so there is
//! no caching layer and no TLS.

pub mod content_type;
pub mod resolve;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ALLOW, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use garrison_telemetry::log_listening;

pub use resolve::Resolved;

/// Errors from the asset server.
#[derive(Debug, Error)]
pub enum AssetError {
    /// The listener could not acquire its address.
    #[error("cannot bind asset server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    /// Port the server tried to bind.
    pub fn port(&self) -> u16 {
        match self {
            AssetError::Bind { addr, .. } => addr.port(),
        }
    }
}

/// Single-page-application file server rooted at a directory.
pub struct AssetServer {
    root: PathBuf,
}

impl AssetServer {
    /// Create a server for the given asset directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Asset directory being served.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bind the listener and start accepting connections in the background.
    pub async fn start(self, addr: SocketAddr) -> Result<AssetServerHandle, AssetError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AssetError::Bind { addr, source: e })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AssetError::Bind { addr, source: e })?;

        log_listening!(
            addr = %local_addr,
            root = %self.root.display(),
            "asset server listening"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = Arc::new(self);
        let task = tokio::spawn(accept_loop(listener, server, shutdown_rx));

        Ok(AssetServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    /// Handle a single request.
    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let method = req.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return Ok(method_not_allowed());
        }
        let head_only = method == Method::HEAD;

        match resolve::resolve(&self.root, req.uri().path()).await {
            Resolved::File(path) | Resolved::Fallback(path) => {
                Ok(self.file_response(&path, head_only).await)
            }
            Resolved::Redirect(location) => Ok(redirect(&location)),
            Resolved::NotFound => Ok(not_found()),
        }
    }

    async fn file_response(&self, path: &Path, head_only: bool) -> Response<Full<Bytes>> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read asset");
                return not_found();
            }
        };

        let length = content.len();
        let body = if head_only {
            Bytes::new()
        } else {
            Bytes::from(content)
        };

        let mut response = Response::new(Full::new(body));
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(content_type::for_path(path)),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        response
    }
}

/// Accept connections until shutdown is signalled.
async fn accept_loop(
    listener: TcpListener,
    server: Arc<AssetServer>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let stream = tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "asset server accept failed");
                    continue;
                }
            },
        };

        let server = Arc::clone(&server);
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let server = Arc::clone(&server);
                async move { server.handle_request(req).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "asset connection error");
            }
        });
    }

    tracing::info!("asset server stopped");
}

/// Running asset server.
pub struct AssetServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AssetServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the listener and wait for the accept loop to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

fn status_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn not_found() -> Response<Full<Bytes>> {
    status_response(StatusCode::NOT_FOUND, "not found")
}

fn method_not_allowed() -> Response<Full<Bytes>> {
    let mut response = status_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
    response
}

fn redirect(location: &str) -> Response<Full<Bytes>> {
    let Ok(value) = HeaderValue::from_str(location) else {
        return not_found();
    };
    let mut response = status_response(StatusCode::MOVED_PERMANENTLY, "moved permanently");
    response.headers_mut().insert(LOCATION, value);
    response
}
