//! In-process backend driven by per-route handlers, for exercising the whole
//! pipeline without a server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tenancy_console::transport::{ApiRequest, ApiResponse, Method, Transport};
use tenancy_console::{AppError, AppResult};

/// What a route answers with.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    outcome: Result<ApiResponse, AppError>,
    delay: Duration,
}

impl ScriptedReply {
    pub fn ok(body: Value) -> Self { Self::status(200, body) }

    pub fn status(status: u16, body: Value) -> Self {
        Self { outcome: Ok(ApiResponse::new(status, body)), delay: Duration::ZERO }
    }

    /// The request never produced a response (connection refused, reset, ...).
    pub fn transport_error<M: Into<String>>(message: M) -> Self {
        Self { outcome: Err(AppError::network("transport", message)), delay: Duration::ZERO }
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn with_header<K: AsRef<str>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        if let Ok(resp) = self.outcome.as_mut() {
            resp.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        self
    }
}

type Handler = Arc<dyn Fn(&ApiRequest) -> ScriptedReply + Send + Sync>;

struct Route {
    method: Method,
    /// Exact path, or a prefix when it ends with `*`.
    pattern: String,
    handler: Handler,
}

impl Route {
    fn matches(&self, method: Method, path: &str) -> bool {
        if self.method != method {
            return false;
        }
        match self.pattern.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => self.pattern == path,
        }
    }
}

/// Routes are matched newest first, so a test can override an earlier default.
/// Unrouted requests answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Arc<Route>>>,
    calls: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self { Self::default() }

    pub fn route<F>(&self, method: Method, pattern: &str, handler: F)
    where
        F: Fn(&ApiRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        self.routes.lock().push(Arc::new(Route {
            method,
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        }));
    }

    /// Answer the n-th hit (0-based) of a route with `replies[n]`, repeating the last one.
    pub fn route_sequence(&self, method: Method, pattern: &str, replies: Vec<ScriptedReply>) {
        let replies = Arc::new(replies);
        let counter = Arc::new(AtomicUsize::new(0));
        self.route(method, pattern, move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            match replies.get(n).or_else(|| replies.last()) {
                Some(r) => r.clone(),
                None => ScriptedReply::status(404, Value::Null),
            }
        });
    }

    pub fn calls(&self) -> Vec<ApiRequest> { self.calls.lock().clone() }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.calls.lock().iter().filter(|r| r.method == method && r.path == path).count()
    }

    pub fn clear_calls(&self) { self.calls.lock().clear(); }

    fn lookup(&self, method: Method, path: &str) -> Option<Arc<Route>> {
        self.routes.lock().iter().rev().find(|r| r.matches(method, path)).cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, req: ApiRequest) -> AppResult<ApiResponse> {
        self.calls.lock().push(req.clone());
        let reply = match self.lookup(req.method, &req.path) {
            Some(route) => (route.handler)(&req),
            None => ScriptedReply::status(404, json!({"message": format!("no route for {} {}", req.method, req.path)})),
        };
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        reply.outcome
    }
}

/// An unsigned JWT (`alg: none`) with the claims the console reads. Signature
/// verification is the server's business; the console only inspects claims.
pub fn unsigned_jwt(sub: &str, roles: &[&str], exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({"sub": sub, "roles": roles, "exp": exp});
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{}.{}.sig", header, payload)
}
