use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::coalesce::Coalescer;
use super::principal::Identity;
use crate::error::{AppError, AppResult};
use crate::storage::{CredentialStore, Credentials};
use crate::transport::{execute_within, ApiRequest, Transport};

/// The subset of access token claims the console reads.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default, alias = "authorities")]
    pub roles: Vec<String>,
}

impl TokenClaims {
    pub fn identity(&self) -> Option<Identity> {
        let sub = self.sub.as_deref().filter(|s| !s.is_empty())?;
        Some(Identity::new(sub, self.roles.clone()))
    }
}

/// Decode the payload segment of a JWT without verifying it. Anything that is not
/// three dot-separated segments with a base64url JSON payload yields `None`.
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Body of a successful login or refresh. Servers differ on field names, so the
/// common aliases are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    #[serde(default, alias = "token")]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "csrfToken")]
    pub anti_forgery_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Decides whether the stored access token may still be used and performs the
/// (coalesced) refresh when it may not.
pub struct TokenLifecycle {
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    margin: Duration,
    timeout: Duration,
    refresh: Coalescer<Credentials>,
}

impl TokenLifecycle {
    pub fn new(store: Arc<CredentialStore>, transport: Arc<dyn Transport>, margin: Duration, timeout: Duration) -> Self {
        Self { store, transport, margin, timeout, refresh: Coalescer::new("refresh") }
    }

    pub fn store(&self) -> &Arc<CredentialStore> { &self.store }

    pub fn is_usable(&self, token: &str) -> bool {
        Self::is_usable_at(token, self.margin, chrono::Utc::now().timestamp())
    }

    /// Usable means the token decodes and expires strictly later than `now + margin`.
    pub fn is_usable_at(token: &str, margin: Duration, now: i64) -> bool {
        match decode_claims(token).and_then(|c| c.exp) {
            Some(exp) => exp > now.saturating_add(margin.as_secs() as i64),
            None => false,
        }
    }

    /// Current credentials with a usable access token, refreshing first if needed.
    pub async fn ensure_usable(&self) -> AppResult<Credentials> {
        let Some(creds) = self.store.get()? else {
            return Err(AppError::unauthorized("no_session", "Not signed in."));
        };
        if self.is_usable(&creds.access_token) {
            return Ok(creds);
        }
        debug!(target: "console::token", "access token inside refresh margin, refreshing");
        self.refresh().await
    }

    /// Called after the server rejected `rejected`. When someone else already swapped
    /// in a newer usable token, that one is returned without another round trip.
    pub async fn refresh_after_rejection(&self, rejected: &str) -> AppResult<Credentials> {
        if let Some(creds) = self.store.get()? {
            if creds.access_token != rejected && self.is_usable(&creds.access_token) {
                debug!(target: "console::token", "rejected token already superseded");
                return Ok(creds);
            }
        }
        self.refresh().await
    }

    /// At most one refresh round trip per session epoch is in flight; concurrent
    /// callers of the same session share its result. The round trip finishes even
    /// if every caller stops waiting.
    pub async fn refresh(&self) -> AppResult<Credentials> {
        let store = self.store.clone();
        let transport = self.transport.clone();
        let timeout = self.timeout;
        let epoch = store.epoch();
        self.refresh.run(epoch, move || refresh_round_trip(store, transport, epoch, timeout)).await
    }

    pub fn refresh_round_trips(&self) -> u64 { self.refresh.round_trips() }

    pub fn refresh_in_flight(&self) -> bool { self.refresh.in_flight() }
}

async fn refresh_round_trip(
    store: Arc<CredentialStore>,
    transport: Arc<dyn Transport>,
    epoch: u64,
    timeout: Duration,
) -> AppResult<Credentials> {
    let Some(current) = store.get()? else {
        return Err(AppError::session_expired("no_session", "Session expired. Please log in again."));
    };
    if current.refresh_token.trim().is_empty() {
        return Err(expire(&store, epoch, AppError::unauthorized("no_refresh_token", "No refresh token stored.")));
    }

    let req = ApiRequest::post("/auth/refresh").body(json!({ "refreshToken": current.refresh_token }));
    let grant = match execute_within(transport.as_ref(), req, timeout).await {
        Ok(resp) if resp.is_success() => match resp.json::<TokenGrant>() {
            Ok(g) => g,
            Err(e) => return Err(expire(&store, epoch, e)),
        },
        Ok(resp) => return Err(expire(&store, epoch, AppError::from_response(resp.status, &resp.body))),
        Err(e) => return Err(expire(&store, epoch, e)),
    };
    let Some(access_token) = grant.access_token.filter(|t| !t.is_empty()) else {
        return Err(expire(&store, epoch, AppError::server("invalid_response", "Refresh response carried no access token.")));
    };

    let next = Credentials {
        access_token,
        refresh_token: grant.refresh_token.filter(|t| !t.is_empty()).unwrap_or(current.refresh_token),
        anti_forgery_token: grant.anti_forgery_token.or(current.anti_forgery_token),
    };
    if !store.put_if_epoch(epoch, &next)? {
        info!(target: "console::token", "session ended while refresh was in flight; discarding result");
        return Err(AppError::session_expired("session_ended", "Session ended while refreshing."));
    }
    info!(target: "console::token", "access token refreshed");
    Ok(next)
}

/// Refresh failures are terminal for the session: drop what is stored (unless a newer
/// login already replaced it) and report SessionExpired.
fn expire(store: &CredentialStore, epoch: u64, cause: AppError) -> AppError {
    warn!(target: "console::token", code = cause.code_str(), "refresh failed: {}", cause.message());
    if let Err(e) = store.clear_if_epoch(epoch) {
        warn!(target: "console::token", "could not clear credentials after failed refresh: {}", e);
    }
    AppError::session_expired("refresh_failed", format!("Session expired. Please log in again. ({})", cause.message()))
}
