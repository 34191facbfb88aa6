//! Shared fixtures for the integration suites: a scripted backend with the auth
//! endpoints wired up and a console context bound to it.
#![allow(dead_code)]

pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use tenancy_console::storage::{keys, KeyValueStore, MemoryStore, SharedKv};
use tenancy_console::transport::{Method, Transport};

pub use scripted::{unsigned_jwt, ScriptedReply, ScriptedTransport};
use tenancy_console::{ConsoleConfig, ConsoleContext};

pub const USER: &str = "operator";
pub const PASSWORD: &str = "s3cret";

pub fn now() -> i64 { chrono::Utc::now().timestamp() }

pub fn fresh_token(tag: &str) -> String {
    unsigned_jwt(USER, &["ADMIN", tag], now() + 3600)
}

/// Expires inside the refresh margin, so it is never considered usable.
pub fn stale_token() -> String {
    unsigned_jwt(USER, &["ADMIN"], now() + 60)
}

pub fn test_config() -> ConsoleConfig {
    ConsoleConfig::new("http://console.test")
        .with_debounce(Duration::ZERO)
        .with_request_timeout(Duration::from_secs(2))
        .with_logout_timeout(Duration::from_millis(200))
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub kv: SharedKv,
    pub ctx: ConsoleContext,
}

impl Harness {
    pub fn new() -> Self { Self::with(test_config(), Arc::new(MemoryStore::new())) }

    pub fn with(config: ConsoleConfig, kv: SharedKv) -> Self {
        let transport = Arc::new(ScriptedTransport::new());
        route_auth(&transport);
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let ctx = ConsoleContext::new(config, dyn_transport, kv.clone());
        Self { transport, kv, ctx }
    }

    /// A second process on the same storage and backend.
    pub fn restart(&self, config: ConsoleConfig) -> ConsoleContext {
        let dyn_transport: Arc<dyn Transport> = self.transport.clone();
        ConsoleContext::new(config, dyn_transport, self.kv.clone())
    }

    pub async fn sign_in(&self) {
        self.ctx.login(USER, PASSWORD).await.expect("login");
    }

    pub fn persisted(&self, key: &str) -> Option<String> { self.kv.get(key).unwrap() }

    pub fn persisted_selection(&self) -> (Option<String>, Option<String>) {
        (self.persisted(keys::SELECTED_CLIENT_ID), self.persisted(keys::SELECTED_INTERFACE_ID))
    }
}

/// Login accepts USER/PASSWORD only; refresh, validate, logout and anti-forgery
/// renewal always succeed unless a test overrides them.
pub fn route_auth(t: &ScriptedTransport) {
    t.route(Method::Post, "/auth/login", |req| {
        let body = req.body.clone().unwrap_or(Value::Null);
        if body["username"] == USER && body["password"] == PASSWORD {
            ScriptedReply::ok(json!({
                "token": fresh_token("login"),
                "refreshToken": "refresh-1",
                "antiForgeryToken": "xsrf-1",
                "username": USER,
                "roles": ["ADMIN"],
            }))
        } else {
            ScriptedReply::status(401, json!({"message": "Bad credentials"}))
        }
    });
    t.route(Method::Post, "/auth/refresh", |_| {
        ScriptedReply::ok(json!({"accessToken": fresh_token("refreshed"), "refreshToken": "refresh-2"}))
            .with_delay(Duration::from_millis(20))
    });
    t.route(Method::Post, "/auth/refresh-csrf", |_| ScriptedReply::ok(json!({"csrfToken": "xsrf-renewed"})));
    t.route(Method::Get, "/auth/validate", |_| {
        ScriptedReply::ok(json!({"valid": true, "username": USER, "roles": ["ADMIN"]}))
    });
    t.route(Method::Post, "/auth/logout", |_| ScriptedReply::ok(Value::Null));
}

pub fn tenant_json(id: i64, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "code": name.to_ascii_uppercase(),
        "status": "ACTIVE",
        "createdAt": "2024-01-01T00:00:00",
        "updatedAt": "2024-01-02T00:00:00"
    })
}

pub fn page_json(tenants: Vec<Value>, page: u32, total_pages: u32) -> Value {
    let n = tenants.len();
    json!({
        "content": tenants,
        "totalElements": n,
        "totalPages": total_pages,
        "number": page,
        "size": 10
    })
}

pub fn contract_json(id: i64, tenant_id: i64, name: &str) -> Value {
    json!({
        "id": id,
        "clientId": tenant_id,
        "name": name,
        "type": "XML",
        "rootElement": "Root",
        "isActive": true,
        "priority": 1
    })
}

/// Tenants 7 and 8 on one page, each with two contracts.
pub fn route_tenants(t: &ScriptedTransport) {
    t.route(Method::Get, "/clients", |_| {
        ScriptedReply::ok(page_json(vec![tenant_json(7, "acme"), tenant_json(8, "globex")], 0, 1))
    });
    t.route(Method::Get, "/clients/7/interfaces", |_| {
        ScriptedReply::ok(json!([contract_json(70, 7, "orders"), contract_json(71, 7, "invoices")]))
    });
    t.route(Method::Get, "/clients/8/interfaces", |_| {
        ScriptedReply::ok(json!([contract_json(80, 8, "shipments"), contract_json(81, 8, "returns")]))
    });
}
