use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::csrf::AntiForgeryCoordinator;
use super::principal::Identity;
use super::token::{decode_claims, TokenGrant, TokenLifecycle};
use crate::config::ConsoleConfig;
use crate::error::{AppError, AppResult};
use crate::gateway::RequestGateway;
use crate::storage::{CredentialStore, Credentials};
use crate::transport::{execute_within, ApiRequest, ApiResponse, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
    /// A terminal auth failure is being processed; leads back to `Anonymous`.
    Expiring,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Anonymous => "ANONYMOUS",
            SessionState::Authenticating => "AUTHENTICATING",
            SessionState::Authenticated => "AUTHENTICATED",
            SessionState::Expiring => "EXPIRING",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ValidateBody {
    #[serde(default = "default_true")]
    valid: bool,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

fn default_true() -> bool { true }

type SignedOutHook = Arc<dyn Fn() + Send + Sync>;

/// Owns the session state machine and the operator identity.
///
/// `Anonymous -> Authenticating -> Authenticated -> (Expiring) -> Anonymous`
pub struct SessionController {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    gateway: RequestGateway,
    state: watch::Sender<SessionState>,
    identity: RwLock<Option<Identity>>,
    tentative: RwLock<Option<Identity>>,
    request_timeout: Duration,
    logout_timeout: Duration,
    signed_out: Mutex<Vec<SignedOutHook>>,
}

impl SessionController {
    pub fn new(config: &ConsoleConfig, transport: Arc<dyn Transport>, store: Arc<CredentialStore>) -> Self {
        let tokens = Arc::new(TokenLifecycle::new(
            store.clone(),
            transport.clone(),
            config.refresh_margin(),
            config.request_timeout(),
        ));
        let csrf = Arc::new(AntiForgeryCoordinator::new(
            store.clone(),
            transport.clone(),
            config.anti_forgery_header.clone(),
            config.request_timeout(),
        ));
        let gateway = RequestGateway::new(transport.clone(), tokens, csrf, config.request_timeout());
        let (state, _) = watch::channel(SessionState::Anonymous);
        Self {
            transport,
            store,
            gateway,
            state,
            identity: RwLock::new(None),
            tentative: RwLock::new(None),
            request_timeout: config.request_timeout(),
            logout_timeout: config.logout_timeout(),
            signed_out: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> SessionState { *self.state.borrow() }

    pub fn is_authenticated(&self) -> bool { self.state() == SessionState::Authenticated }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> { self.state.subscribe() }

    pub fn current_identity(&self) -> Option<Identity> { self.identity.read().clone() }

    /// Identity read from stored credentials at start-up, not yet confirmed by `validate`.
    pub fn tentative_identity(&self) -> Option<Identity> { self.tentative.read().clone() }

    pub fn gateway(&self) -> &RequestGateway { &self.gateway }

    pub fn credentials(&self) -> &Arc<CredentialStore> { &self.store }

    /// Register a callback run every time the session ends (logout or forced).
    pub fn on_signed_out<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.signed_out.lock().push(Arc::new(hook));
    }

    /// Read stored credentials left by a previous process. The identity they carry
    /// stays tentative and the state stays `Anonymous` until [`validate`](Self::validate).
    pub fn restore(&self) -> Option<Identity> {
        let creds = match self.store.get() {
            Ok(c) => c?,
            Err(e) => {
                warn!(target: "console::session", "could not read stored credentials: {}", e);
                return None;
            }
        };
        let id = decode_claims(&creds.access_token).and_then(|c| c.identity());
        debug!(target: "console::session", restored = id.is_some(), "restored stored credentials");
        *self.tentative.write() = id.clone();
        id
    }

    pub async fn login(&self, username: &str, password: &str) -> AppResult<Identity> {
        let username = username.trim();
        if username.is_empty() || password.trim().is_empty() {
            return Err(AppError::validation("missing_credentials", "Username and password are required."));
        }
        let previous = self.state.send_replace(SessionState::Authenticating);
        let outcome = self.login_round_trip(username, password).await;
        match outcome {
            Ok((creds, id)) => {
                if let Err(e) = self.store.put(&creds) {
                    self.state.send_replace(previous);
                    return Err(e);
                }
                *self.identity.write() = Some(id.clone());
                *self.tentative.write() = None;
                self.state.send_replace(SessionState::Authenticated);
                info!(target: "console::session", user = %id.subject_name, roles = id.roles.len(), "signed in");
                Ok(id)
            }
            Err(e) => {
                self.state.send_replace(previous);
                info!(target: "console::session", user = %username, code = e.code_str(), "sign-in rejected");
                Err(e)
            }
        }
    }

    async fn login_round_trip(&self, username: &str, password: &str) -> AppResult<(Credentials, Identity)> {
        let req = ApiRequest::post("/auth/login").body(json!({ "username": username, "password": password }));
        let resp = match self.gateway.send(req).await {
            Ok(r) => r,
            Err(AppError::Unauthorized { .. }) => {
                return Err(AppError::invalid_credentials("invalid_credentials", "Invalid username or password."));
            }
            Err(e) => return Err(e),
        };
        let grant: TokenGrant = resp.json()?;
        let Some(access_token) = grant.access_token.clone().filter(|t| !t.is_empty()) else {
            return Err(AppError::server("invalid_response", "Login response carried no access token."));
        };
        let anti_forgery = grant.anti_forgery_token.clone().or_else(|| pushed_anti_forgery(&resp));
        let id = identity_from(grant.username.as_deref(), &grant.roles, &access_token)
            .unwrap_or_else(|| Identity::new(username, grant.roles.clone()));
        let creds = Credentials::new(access_token, grant.refresh_token.unwrap_or_default()).with_anti_forgery(anti_forgery);
        Ok((creds, id))
    }

    /// Best-effort server notification bounded by the logout timeout, then an
    /// unconditional local sign-out.
    pub async fn logout(&self) {
        match self.store.get() {
            Ok(Some(creds)) => {
                notify_logout(self.transport.as_ref(), &creds, self.gateway.anti_forgery().header_name(), self.logout_timeout)
                    .await
            }
            Ok(None) => {}
            Err(e) => warn!(target: "console::session", "could not read credentials for logout notification: {}", e),
        }
        self.sign_out_locally();
        info!(target: "console::session", "signed out");
    }

    /// Re-derive the identity from the server. Any failure ends the session.
    pub async fn validate(&self) -> AppResult<Identity> {
        let Some(creds) = self.store.get()? else {
            self.sign_out_locally();
            return Err(AppError::unauthorized("no_session", "Not signed in."));
        };
        if self.state() != SessionState::Authenticated {
            self.state.send_replace(SessionState::Authenticating);
        }
        let result = self
            .send(ApiRequest::get("/auth/validate").timeout(self.request_timeout))
            .await
            .and_then(|resp| resp.json::<ValidateBody>());
        let body = match result {
            Ok(b) if b.valid => b,
            Ok(_) => {
                self.sign_out_locally();
                return Err(AppError::unauthorized("invalid_session", "Session is no longer valid."));
            }
            Err(e) => {
                warn!(target: "console::session", code = e.code_str(), "session validation failed: {}", e.message());
                // A terminal 401 already went through force_logout inside send
                if self.state() != SessionState::Anonymous {
                    self.sign_out_locally();
                }
                return Err(e);
            }
        };
        let token = self.store.get()?.map(|c| c.access_token).unwrap_or(creds.access_token);
        let id = identity_from(body.username.as_deref(), &body.roles, &token)
            .ok_or_else(|| AppError::server("invalid_response", "Validation response named no user."))?;
        *self.identity.write() = Some(id.clone());
        *self.tentative.write() = None;
        self.state.send_replace(SessionState::Authenticated);
        debug!(target: "console::session", user = %id.subject_name, "session validated");
        Ok(id)
    }

    /// Authenticated entry point for every collaborator. A terminal Unauthorized
    /// from the gateway ends the session.
    pub async fn send(&self, req: ApiRequest) -> AppResult<ApiResponse> {
        match self.gateway.send(req).await {
            Err(e) if e.is_terminal_unauthorized() => {
                self.force_logout(e.message());
                Err(e)
            }
            other => other,
        }
    }

    /// Runs at most once per session: later calls while already expiring or signed
    /// out return false and do nothing. The server is told in the background, so the
    /// local sign-out never waits on it.
    pub fn force_logout(&self, reason: &str) -> bool {
        let fired = self.state.send_if_modified(|s| {
            if matches!(s, SessionState::Authenticated | SessionState::Authenticating) {
                *s = SessionState::Expiring;
                true
            } else {
                false
            }
        });
        if fired {
            warn!(target: "console::session", "session ended by server: {}", reason);
            let creds = match self.store.get() {
                Ok(c) => c,
                Err(e) => {
                    warn!(target: "console::session", "could not read credentials for logout notification: {}", e);
                    None
                }
            };
            self.sign_out_locally();
            if let Some(creds) = creds {
                self.notify_in_background(creds);
            }
        }
        fired
    }

    fn notify_in_background(&self, creds: Credentials) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(target: "console::session", "no runtime available; skipping logout notification");
            return;
        };
        let transport = self.transport.clone();
        let header = self.gateway.anti_forgery().header_name().to_string();
        let limit = self.logout_timeout;
        runtime.spawn(async move {
            notify_logout(transport.as_ref(), &creds, &header, limit).await;
        });
    }

    fn sign_out_locally(&self) {
        if let Err(e) = self.store.clear() {
            warn!(target: "console::session", "could not clear stored credentials: {}", e);
        }
        *self.identity.write() = None;
        *self.tentative.write() = None;
        self.state.send_replace(SessionState::Anonymous);
        let hooks: Vec<SignedOutHook> = self.signed_out.lock().clone();
        for hook in hooks {
            hook();
        }
    }
}

async fn notify_logout(transport: &dyn Transport, creds: &Credentials, header: &str, limit: Duration) {
    let mut req = ApiRequest::post("/auth/logout").header("Authorization", format!("Bearer {}", creds.access_token));
    if let Some(t) = creds.anti_forgery_token.as_deref() {
        req.set_header(header.to_string(), t);
    }
    match execute_within(transport, req, limit).await {
        Ok(resp) if resp.is_success() => debug!(target: "console::session", "server acknowledged logout"),
        Ok(resp) => warn!(target: "console::session", status = resp.status, "server logout failed; clearing locally anyway"),
        Err(e) => warn!(target: "console::session", "server logout failed: {}; clearing locally anyway", e),
    }
}

fn pushed_anti_forgery(resp: &ApiResponse) -> Option<String> {
    ["x-xsrf-token", "x-csrf-token"].iter().find_map(|h| resp.header(h)).map(str::to_string)
}

/// Prefer what the server said explicitly, fall back to the token claims.
fn identity_from(username: Option<&str>, roles: &[String], token: &str) -> Option<Identity> {
    let claims = decode_claims(token);
    let name = username
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .or_else(|| claims.as_ref().and_then(|c| c.sub.clone()).filter(|s| !s.is_empty()))?;
    let roles = if roles.is_empty() {
        claims.map(|c| c.roles).unwrap_or_default()
    } else {
        roles.to_vec()
    };
    Some(Identity::new(name, roles))
}
