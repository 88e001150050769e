//! # HTTP Server
//!
//! Hyper/Tokio front end for the request pipeline.
//!
//! ## Key Features
//!
//! - One task per connection, HTTP/1.1 with optional keep-alive
//! - Body size limit enforced before the pipeline runs
//! - Graceful shutdown on SIGINT/SIGTERM with a bounded drain

use crate::error::{Error, Result};
use crate::middleware::{Pipeline, CORRELATION_ID_HEADER};
use crate::registry::{codes, error_response, DomainError};
use crate::request::Request;
use crate::route::Endpoint;
use crate::router::{Method, Router};
use crate::stages::correlation_id;
use crate::storage::{Page, Pagination, PAGINATION_HEADER};
use http_body_util::Full;
pub use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// An outbound response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: String,
    /// Content type
    pub content_type: String,
    /// Response headers
    pub headers: HashMap<String, String>,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            body: String::new(),
            content_type: "application/json".to_string(),
            headers: HashMap::new(),
        }
    }
}

impl Response {
    /// Create a JSON response from already-serialized text
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Serialize `value` into a JSON response
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if `value` cannot be serialized.
    pub fn to_json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::json(crate::json::to_json(value)?))
    }

    /// Serialize a page of items, carrying its marker in `X-Pagination`
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the items cannot be serialized.
    pub fn page<T: Serialize>(page: &Page<T>) -> Result<Self> {
        Ok(Self::to_json(&page.items)?.with_pagination(page.pagination))
    }

    /// Create a text response
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: "text/plain".to_string(),
            ..Self::default()
        }
    }

    /// Set status code
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Set a header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Attach the pagination marker
    #[must_use]
    pub fn with_pagination(self, pagination: Pagination) -> Self {
        self.with_header(PAGINATION_HEADER, &pagination.header_value())
    }

    /// Set or override a header (names compare case-insensitively)
    pub fn set_header(&mut self, key: &str, value: &str) {
        if key.eq_ignore_ascii_case("content-type") {
            self.content_type = value.to_string();
            return;
        }
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(key));
        self.headers.insert(key.to_string(), value.to_string());
    }

    /// Header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        if key.eq_ignore_ascii_case("content-type") {
            return Some(self.content_type.as_str());
        }
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Convert to a hyper response, dropping headers hyper cannot represent
    fn into_hyper(self) -> hyper::Response<Full<Bytes>> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = hyper::Response::new(Full::new(Bytes::from(self.body)));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&self.content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        for (k, v) in &self.headers {
            match (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %k, "Dropping unrepresentable response header"),
            }
        }
        response
    }
}

/// HTTP server dispatching matched routes into a pipeline
pub struct Server {
    config: ServerConfig,
    router: Router,
    pipeline: Pipeline,
}

impl Server {
    /// Create a server with no routes
    #[must_use]
    pub fn new(config: ServerConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            router: Router::new(),
            pipeline,
        }
    }

    /// Server configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registered routes
    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    /// Add a route
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRoutePattern` for malformed or conflicting paths.
    pub fn add_route(&mut self, method: Method, path: &str, endpoint: Endpoint) -> Result<()> {
        self.router.add_route(method, path, endpoint)
    }

    /// Start the server with graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` if the address cannot be bound, or
    /// `Error::Io` if accepting connections fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;
        let bind_error = |source: std::io::Error| Error::BindError {
            address: addr.to_string(),
            source,
        };

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()
        } else {
            tokio::net::TcpSocket::new_v6()
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;
        let listener = socket.listen(1024).map_err(bind_error)?;

        info!(address = %addr, "Server listening");

        let router = Arc::new(self.router.clone());
        let pipeline = Arc::new(self.pipeline.clone());
        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);

                    let router = Arc::clone(&router);
                    let pipeline = Arc::clone(&pipeline);
                    let active = Arc::clone(&active);

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);
                        let service = service_fn(move |req| {
                            let router = Arc::clone(&router);
                            let pipeline = Arc::clone(&pipeline);
                            async move { handle_request(req, &router, &pipeline, max_body_size).await }
                        });
                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            debug!(remote = %remote_addr, error = %err, "Connection closed with error");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, draining connections");
                    break;
                }
            }
        }

        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain).await.is_err() {
            warn!(
                remaining = active.load(Ordering::Relaxed),
                "Shutdown timeout elapsed with connections still open"
            );
        }
        Ok(())
    }

    /// Execute a request directly without the network stack
    pub async fn test_request(
        &self,
        method: Method,
        path: &str,
        headers: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Response {
        let request = Request::new(method, path, headers, body);
        if let Some(actual) = request
            .body_bytes()
            .map(<[u8]>::len)
            .filter(|len| *len > self.config.max_body_size)
        {
            return too_large(request.header(CORRELATION_ID_HEADER), self.config.max_body_size, actual);
        }
        process_request(request, &self.router, &self.pipeline).await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn not_found(incoming_correlation: Option<&str>, method: &str, path: &str) -> Response {
    let correlation = correlation_id(incoming_correlation);
    info!(method = %method, path = %path, correlation_id = %correlation, "No route matched");
    error_response(DomainError::not_found(path)).with_header(CORRELATION_ID_HEADER, &correlation)
}

fn too_large(incoming_correlation: Option<&str>, limit: usize, actual: usize) -> Response {
    let correlation = correlation_id(incoming_correlation);
    info!(limit, actual, correlation_id = %correlation, "Request body over limit");
    error_response(DomainError::from_code(codes::PAYLOAD_TOO_LARGE))
        .with_header(CORRELATION_ID_HEADER, &correlation)
}

/// Core request processing logic (network agnostic)
async fn process_request(request: Request, router: &Router, pipeline: &Pipeline) -> Response {
    match router.match_route(request.method, &request.path) {
        Ok(matched) => pipeline.run(request, matched).await,
        Err(_) => not_found(
            request.header(CORRELATION_ID_HEADER),
            &request.method.to_string(),
            &request.path,
        ),
    }
}

async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    router: &Router,
    pipeline: &Pipeline,
    max_body_size: usize,
) -> std::result::Result<hyper::Response<Full<Bytes>>, Infallible> {
    let incoming = req
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let Some(method) = Method::from_hyper(req.method()) else {
        let response = not_found(incoming.as_deref(), req.method().as_str(), req.uri().path());
        return Ok(response.into_hyper());
    };

    let response = match Request::from_hyper_with_limit(req, method, max_body_size).await {
        Ok(request) => process_request(request, router, pipeline).await,
        Err(Error::PayloadTooLarge { limit, actual }) => too_large(incoming.as_deref(), limit, actual),
        Err(err) => {
            error!(error = %err, "Failed to read request");
            crate::registry::internal_error_response()
                .with_header(CORRELATION_ID_HEADER, &correlation_id(incoming.as_deref()))
        }
    };
    Ok(response.into_hyper())
}
