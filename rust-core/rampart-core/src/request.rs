//! # HTTP Request
//!
//! Transport-neutral request: method, path, headers, the decoded query
//! bag and the collected body. Built from hyper by the server or directly
//! by tests.

use crate::error::{Error, Result};
use crate::query::ParamBag;
use crate::router::Method;
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use hyper::HeaderMap;
use std::collections::HashMap;

/// An inbound request
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method
    pub method: Method,
    /// Request path (without query string)
    pub path: String,
    query_string: Option<String>,
    query: ParamBag,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl Request {
    /// Build a request by hand; `path` may carry a query string
    pub fn new(
        method: Method,
        path: impl Into<String>,
        headers_map: HashMap<String, String>,
        body: Option<Bytes>,
    ) -> Self {
        let path = path.into();
        let (path, query_string) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (path, None),
        };

        let mut headers = HeaderMap::new();
        for (k, v) in headers_map {
            if let (Ok(n), Ok(v)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(&v)) {
                headers.insert(n, v);
            }
        }

        Self {
            method,
            path,
            query: ParamBag::from_query_string(query_string.as_deref().unwrap_or_default()),
            query_string,
            headers,
            body,
        }
    }

    /// Collect a hyper request, enforcing the body size limit
    ///
    /// # Errors
    ///
    /// `Error::PayloadTooLarge` when the declared or actual body exceeds
    /// `max_body_size`; `Error::Http` when the body stream fails.
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        method: Method,
        max_body_size: usize,
    ) -> Result<Self> {
        let path = req.uri().path().to_string();
        let query_string = req.uri().query().map(String::from);
        let headers = req.headers().clone();

        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|len| len.to_str().ok())
            .and_then(|len| len.parse::<usize>().ok());
        if let Some(actual) = declared.filter(|len| *len > max_body_size) {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual,
            });
        }

        let bytes = req.into_body().collect().await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }

        Ok(Self {
            method,
            path,
            query: ParamBag::from_query_string(query_string.as_deref().unwrap_or_default()),
            query_string,
            headers,
            body: (!bytes.is_empty()).then_some(bytes),
        })
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            self.headers.insert(n, v);
        }
    }

    /// Decoded query parameters
    #[must_use]
    pub const fn query(&self) -> &ParamBag {
        &self.query
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> Option<&str> {
        self.query_string.as_deref()
    }

    /// Request body
    #[must_use]
    pub fn body_bytes(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Request body as the shared buffer
    #[must_use]
    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}
