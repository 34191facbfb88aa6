//! Every authenticated outbound call goes through [`RequestGateway::send`].
//!
//! Pipeline per call:
//! 1. `/auth/login` and `/auth/refresh` pass straight to the transport.
//! 2. Otherwise make sure the access token is usable (coalesced refresh when not).
//! 3. Attach the bearer header, and on mutating calls the anti-forgery header.
//! 4. Send. A first 401 triggers one refresh and resend; an anti-forgery 403 triggers
//!    one renewal and replay. Each reason retries at most once and retries are never
//!    retried for the same reason again.
//! 5. Any other non-2xx status is mapped onto [`AppError`] and returned as is.
//!
//! A timeout set on the request bounds the whole pipeline, refresh waits and
//! replays included, as well as each individual attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::{AntiForgeryCoordinator, TokenLifecycle};
use crate::transport::{execute_within, ApiRequest, ApiResponse, Transport};

pub struct RequestGateway {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenLifecycle>,
    csrf: Arc<AntiForgeryCoordinator>,
    timeout: Duration,
}

impl RequestGateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenLifecycle>,
        csrf: Arc<AntiForgeryCoordinator>,
        timeout: Duration,
    ) -> Self {
        Self { transport, tokens, csrf, timeout }
    }

    pub fn tokens(&self) -> &Arc<TokenLifecycle> { &self.tokens }

    pub fn anti_forgery(&self) -> &Arc<AntiForgeryCoordinator> { &self.csrf }

    pub async fn send(&self, req: ApiRequest) -> AppResult<ApiResponse> {
        let request_id = Uuid::new_v4();
        let Some(limit) = req.timeout else {
            return self.dispatch(request_id, req).await;
        };
        let label = format!("{} {}", req.method, req.path);
        match tokio::time::timeout(limit, self.dispatch(request_id, req)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(target: "console::gateway", %request_id, "{} gave up after {} ms", label, limit.as_millis());
                Err(AppError::network("timeout", format!("{} timed out after {} ms", label, limit.as_millis())))
            }
        }
    }

    async fn dispatch(&self, request_id: Uuid, req: ApiRequest) -> AppResult<ApiResponse> {
        if req.is_auth_endpoint() {
            debug!(target: "console::gateway", %request_id, method = %req.method, path = %req.path, "auth endpoint pass-through");
            let resp = execute_within(self.transport.as_ref(), req, self.timeout).await?;
            return into_result(resp);
        }

        let mut creds = self.tokens.ensure_usable().await.map_err(refresh_failure)?;
        let mut refreshed = false;
        let mut replayed = false;
        let mut attempt_no = 0u8;
        loop {
            attempt_no += 1;
            let mut attempt = req.clone();
            attempt.set_header("Authorization", format!("Bearer {}", creds.access_token));
            self.csrf.attach(&mut attempt);

            let resp = match execute_within(self.transport.as_ref(), attempt.clone(), self.timeout).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(target: "console::gateway", %request_id, method = %req.method, path = %req.path, attempt = attempt_no, "no response: {}", e);
                    return Err(e);
                }
            };
            debug!(target: "console::gateway", %request_id, method = %req.method, path = %req.path, attempt = attempt_no, status = resp.status, "response");
            self.csrf.absorb(&resp);

            if resp.is_success() {
                return Ok(resp);
            }
            if resp.status == 401 {
                if refreshed {
                    warn!(target: "console::gateway", %request_id, path = %req.path, "bearer rejected after refresh");
                    return Err(AppError::from_response(401, &resp.body));
                }
                refreshed = true;
                creds = self.tokens.refresh_after_rejection(&creds.access_token).await.map_err(refresh_failure)?;
                continue;
            }
            if AntiForgeryCoordinator::is_mismatch(&attempt, &resp) {
                let server = AppError::from_response(403, &resp.body);
                if replayed {
                    warn!(target: "console::gateway", %request_id, path = %req.path, "anti-forgery token rejected after renewal");
                    return Err(AppError::anti_forgery("anti_forgery_mismatch", server.message()));
                }
                replayed = true;
                self.csrf.renew(&creds.access_token).await?;
                continue;
            }
            return Err(AppError::from_response(resp.status, &resp.body));
        }
    }
}

fn into_result(resp: ApiResponse) -> AppResult<ApiResponse> {
    if resp.is_success() {
        Ok(resp)
    } else {
        Err(AppError::from_response(resp.status, &resp.body))
    }
}

/// A refresh that could not produce a usable token means the call cannot be
/// authenticated; callers see Unauthorized, whatever stopped the refresh.
fn refresh_failure(e: AppError) -> AppError {
    match e {
        AppError::SessionExpired { message, .. } => AppError::unauthorized("session_expired", message),
        other => other,
    }
}
