use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::config::ConsoleConfig;
use crate::error::{AppError, AppResult};

/// reqwest-backed transport. Cookies set by the server (session affinity, the
/// anti-forgery cookie of the double-submit pattern) are kept in the client's jar.
#[derive(Clone)]
pub struct HttpTransport {
    base: Url,
    prefix: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &ConsoleConfig) -> AppResult<Self> {
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| AppError::validation("invalid_base_url", format!("{}: {}", config.base_url, e)))?;
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout())
            .build()?;
        let prefix = normalise_prefix(&config.api_prefix);
        Ok(Self { base, prefix, client })
    }

    pub fn base(&self) -> &Url { &self.base }

    fn url_for(&self, path: &str) -> AppResult<Url> {
        let joined = format!("{}{}{}", self.base.as_str().trim_end_matches('/'), self.prefix, path);
        Url::parse(&joined).map_err(|e| AppError::validation("invalid_path", format!("{}: {}", joined, e)))
    }
}

fn normalise_prefix(prefix: &str) -> String {
    let p = prefix.trim().trim_end_matches('/');
    if p.is_empty() {
        String::new()
    } else if p.starts_with('/') {
        p.to_string()
    } else {
        format!("/{}", p)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, req: ApiRequest) -> AppResult<ApiResponse> {
        let url = self.url_for(&req.path)?;
        let method = match req.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, url);
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(t) = req.timeout {
            builder = builder.timeout(t);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in resp.headers().iter() {
            if let Ok(s) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), s.to_string());
            }
        }
        let bytes = resp.bytes().await?;
        let body = decode_body(&bytes);
        debug!(target: "console::transport", method = %req.method, path = %req.path, status, bytes = bytes.len(), "http response");
        Ok(ApiResponse { status, headers, body })
    }
}

/// JSON when it parses, a plain string otherwise, `Null` for an empty body.
fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Value::Null;
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(v) => v,
        Err(_) => Value::String(String::from_utf8_lossy(bytes).trim().to_string()),
    }
}
