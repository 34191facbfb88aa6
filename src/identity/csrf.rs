use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::coalesce::Coalescer;
use crate::error::{AppError, AppResult};
use crate::storage::CredentialStore;
use crate::transport::{execute_within, ApiRequest, ApiResponse, Transport};

const RENEW_PATH: &str = "/auth/refresh-csrf";
const PUSHED_HEADERS: &[&str] = &["x-xsrf-token", "x-csrf-token"];
const REJECTED_HEADER: &str = "x-csrf-rejected";
const MISMATCH_MARKERS: &[&str] = &["csrf", "xsrf", "anti-forgery", "antiforgery"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewBody {
    #[serde(default, alias = "csrfToken")]
    anti_forgery_token: Option<String>,
}

/// Keeps the anti-forgery token attached to state-changing calls and renews it
/// when the server says it no longer matches.
pub struct AntiForgeryCoordinator {
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    header: String,
    timeout: Duration,
    renewal: Coalescer<String>,
}

impl AntiForgeryCoordinator {
    pub fn new<H: Into<String>>(store: Arc<CredentialStore>, transport: Arc<dyn Transport>, header: H, timeout: Duration) -> Self {
        Self { store, transport, header: header.into(), timeout, renewal: Coalescer::new("anti-forgery") }
    }

    pub fn header_name(&self) -> &str { &self.header }

    pub fn current(&self) -> Option<String> {
        match self.store.get() {
            Ok(c) => c.and_then(|c| c.anti_forgery_token).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(target: "console::session", "credential store unreadable: {}", e);
                None
            }
        }
    }

    /// Attach the current token to mutating requests; safe requests are left alone.
    pub fn attach(&self, req: &mut ApiRequest) {
        if !req.method.is_mutating() {
            return;
        }
        if let Some(token) = self.current() {
            req.set_header(self.header.clone(), token);
        }
    }

    /// A 403 on a mutating call is attributed to the anti-forgery token when the
    /// server flags it with `x-csrf-rejected` or names the token in its error body.
    pub fn is_mismatch(req: &ApiRequest, resp: &ApiResponse) -> bool {
        if resp.status != 403 || !req.method.is_mutating() {
            return false;
        }
        if resp.header(REJECTED_HEADER).is_some() {
            return true;
        }
        let mentions = |s: &str| {
            let lower = s.to_ascii_lowercase();
            MISMATCH_MARKERS.iter().any(|m| lower.contains(m))
        };
        match &resp.body {
            Value::String(s) => mentions(s),
            Value::Object(_) => ["code", "error", "message"]
                .iter()
                .filter_map(|k| resp.body.get(*k).and_then(|v| v.as_str()))
                .any(mentions),
            _ => false,
        }
    }

    /// Store a token the server pushed in a response header, if it differs.
    pub fn absorb(&self, resp: &ApiResponse) {
        let configured = self.header.to_ascii_lowercase();
        let pushed = std::iter::once(configured.as_str())
            .chain(PUSHED_HEADERS.iter().copied())
            .find_map(|h| resp.header(h))
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let Some(token) = pushed else { return };
        if let Err(e) = self.replace(token) {
            warn!(target: "console::session", "could not store pushed anti-forgery token: {}", e);
        }
    }

    /// Fetch a fresh token. Concurrent mismatches share one renewal.
    pub async fn renew(&self, bearer: &str) -> AppResult<String> {
        let store = self.store.clone();
        let transport = self.transport.clone();
        let timeout = self.timeout;
        let bearer = bearer.to_string();
        let epoch = store.epoch();
        self.renewal
            .run(epoch, move || async move {
                let req = ApiRequest::post(RENEW_PATH).header("Authorization", format!("Bearer {}", bearer));
                let resp = execute_within(transport.as_ref(), req, timeout).await?;
                if !resp.is_success() {
                    return Err(AppError::from_response(resp.status, &resp.body));
                }
                let from_body = resp.json::<RenewBody>().ok().and_then(|b| b.anti_forgery_token);
                let token = from_body
                    .or_else(|| PUSHED_HEADERS.iter().find_map(|h| resp.header(h)).map(str::to_string))
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| AppError::server("invalid_response", "Anti-forgery renewal returned no token."))?;
                let Some(current) = store.get()? else {
                    return Err(AppError::unauthorized("no_session", "Not signed in."));
                };
                let next = current.with_anti_forgery(Some(token.clone()));
                if !store.put_if_epoch(epoch, &next)? {
                    return Err(AppError::unauthorized("session_ended", "Session ended while renewing anti-forgery token."));
                }
                info!(target: "console::session", "anti-forgery token renewed");
                Ok(token)
            })
            .await
    }

    pub fn renewals(&self) -> u64 { self.renewal.round_trips() }

    fn replace(&self, token: &str) -> AppResult<()> {
        let epoch = self.store.epoch();
        let Some(current) = self.store.get()? else { return Ok(()) };
        if current.anti_forgery_token.as_deref() == Some(token) {
            return Ok(());
        }
        let next = current.with_anti_forgery(Some(token.to_string()));
        if self.store.put_if_epoch(epoch, &next)? {
            debug!(target: "console::session", "anti-forgery token updated from response header");
        }
        Ok(())
    }
}
