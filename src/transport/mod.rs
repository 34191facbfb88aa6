//! The single seam through which HTTP leaves the process.
//!
//! `Transport` executes one request and hands back status, headers and a decoded body
//! without interpreting them; mapping statuses onto [`AppError`] happens in the gateway.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};

pub mod http;

pub use http::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// State-changing verbs carry the anti-forgery header.
    pub fn is_mutating(self) -> bool {
        !matches!(self, Method::Get)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Paths that obtain or renew credentials and therefore bypass the bearer pipeline.
pub const AUTH_PASSTHROUGH: &[&str] = &["/auth/login", "/auth/refresh"];

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API prefix, always starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new<P: Into<String>>(method: Method, path: P) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { method, path, query: Vec::new(), body: None, headers: Vec::new(), timeout: None }
    }

    pub fn get<P: Into<String>>(path: P) -> Self { Self::new(Method::Get, path) }
    pub fn post<P: Into<String>>(path: P) -> Self { Self::new(Method::Post, path) }
    pub fn put<P: Into<String>>(path: P) -> Self { Self::new(Method::Put, path) }
    pub fn delete<P: Into<String>>(path: P) -> Self { Self::new(Method::Delete, path) }

    pub fn query<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> AppResult<Self> {
        let v = serde_json::to_value(body)
            .map_err(|e| AppError::validation("unserializable_body", e.to_string()))?;
        self.body = Some(v);
        Ok(self)
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.set_header(name, value);
        self
    }

    /// Insert or replace a header; names compare case-insensitively.
    pub fn set_header<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            slot.1 = value;
        } else {
            self.headers.push((name, value));
        }
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    pub fn is_auth_endpoint(&self) -> bool {
        AUTH_PASSTHROUGH.contains(&self.path.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are stored lowercase.
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, headers: HashMap::new(), body }
    }

    pub fn is_success(&self) -> bool { (200..300).contains(&self.status) }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn json<T: DeserializeOwned>(&self) -> AppResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Only failures to obtain a response at all are errors here;
    /// any HTTP status comes back as `Ok`.
    async fn execute(&self, req: ApiRequest) -> AppResult<ApiResponse>;
}

/// Run `req` bounded by its own timeout or `default_timeout`.
pub async fn execute_within(
    transport: &dyn Transport,
    req: ApiRequest,
    default_timeout: Duration,
) -> AppResult<ApiResponse> {
    let limit = req.timeout.unwrap_or(default_timeout);
    let label = format!("{} {}", req.method, req.path);
    match tokio::time::timeout(limit, transport.execute(req)).await {
        Ok(res) => res,
        Err(_) => Err(AppError::network("timeout", format!("{} timed out after {} ms", label, limit.as_millis()))),
    }
}
