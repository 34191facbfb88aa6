//! Console configuration: remote API location, timeouts and scope timing.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Scheme, host and port of the remote API.
    pub base_url: String,
    /// Path prefix every endpoint lives under.
    #[serde(default = "ConsoleConfig::default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "ConsoleConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound for the best-effort logout notification.
    #[serde(default = "ConsoleConfig::default_logout_timeout_ms")]
    pub logout_timeout_ms: u64,
    /// Access tokens expiring within this margin are treated as unusable.
    #[serde(default = "ConsoleConfig::default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    /// Quiet window used to coalesce rapid tenant list reloads.
    #[serde(default = "ConsoleConfig::default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "ConsoleConfig::default_anti_forgery_header")]
    pub anti_forgery_header: String,
    /// Directory for durable console state; in-memory only when unset.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

impl ConsoleConfig {
    fn default_api_prefix() -> String { "/api".to_string() }
    fn default_request_timeout_ms() -> u64 { 30_000 }
    fn default_logout_timeout_ms() -> u64 { 5_000 }
    fn default_refresh_margin_secs() -> u64 { 5 * 60 }
    fn default_debounce_ms() -> u64 { 300 }
    fn default_anti_forgery_header() -> String { "X-XSRF-TOKEN".to_string() }

    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self { base_url: base_url.into(), ..Default::default() }
    }

    /// Overlay `CONSOLE_*` environment variables on the defaults. Unparseable numeric
    /// values fall back to the default and are reported at warn level.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("CONSOLE_API_URL") { if !v.trim().is_empty() { cfg.base_url = v.trim().to_string(); } }
        if let Ok(v) = std::env::var("CONSOLE_API_PREFIX") { cfg.api_prefix = v.trim().to_string(); }
        if let Some(ms) = env_u64("CONSOLE_TIMEOUT_MS") { cfg.request_timeout_ms = ms; }
        if let Some(ms) = env_u64("CONSOLE_LOGOUT_TIMEOUT_MS") { cfg.logout_timeout_ms = ms; }
        if let Some(secs) = env_u64("CONSOLE_REFRESH_MARGIN_SECS") { cfg.refresh_margin_secs = secs; }
        if let Some(ms) = env_u64("CONSOLE_DEBOUNCE_MS") { cfg.debounce_ms = ms; }
        if let Ok(v) = std::env::var("CONSOLE_ANTI_FORGERY_HEADER") { if !v.trim().is_empty() { cfg.anti_forgery_header = v.trim().to_string(); } }
        if let Ok(v) = std::env::var("CONSOLE_STATE_DIR") { if !v.trim().is_empty() { cfg.state_dir = Some(PathBuf::from(v.trim())); } }
        cfg
    }

    pub fn with_api_prefix<S: Into<String>>(mut self, prefix: S) -> Self { self.api_prefix = prefix.into(); self }
    pub fn with_request_timeout(mut self, d: Duration) -> Self { self.request_timeout_ms = d.as_millis() as u64; self }
    pub fn with_logout_timeout(mut self, d: Duration) -> Self { self.logout_timeout_ms = d.as_millis() as u64; self }
    pub fn with_refresh_margin(mut self, d: Duration) -> Self { self.refresh_margin_secs = d.as_secs(); self }
    pub fn with_debounce(mut self, d: Duration) -> Self { self.debounce_ms = d.as_millis() as u64; self }
    pub fn with_state_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self { self.state_dir = Some(dir.into()); self }

    pub fn request_timeout(&self) -> Duration { Duration::from_millis(self.request_timeout_ms) }
    pub fn logout_timeout(&self) -> Duration { Duration::from_millis(self.logout_timeout_ms) }
    pub fn refresh_margin(&self) -> Duration { Duration::from_secs(self.refresh_margin_secs) }
    pub fn debounce(&self) -> Duration { Duration::from_millis(self.debounce_ms) }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_prefix: Self::default_api_prefix(),
            request_timeout_ms: Self::default_request_timeout_ms(),
            logout_timeout_ms: Self::default_logout_timeout_ms(),
            refresh_margin_secs: Self::default_refresh_margin_secs(),
            debounce_ms: Self::default_debounce_ms(),
            anti_forgery_header: Self::default_anti_forgery_header(),
            state_dir: None,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(target: "console::config", "ignoring {}='{}': {}", name, raw, e);
            None
        }
    }
}
