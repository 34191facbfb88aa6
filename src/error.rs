//! Unified console error model and mapping helpers.
//! Every failure that leaves the transport boundary is one of these variants; upstream
//! code matches on the kind and never re-inspects raw responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    /// Rejected before or by the server because the input is malformed.
    #[error("{code}: {message}")]
    Validation {
        code: String,
        message: String,
        #[serde(default)]
        details: Vec<String>,
    },
    #[error("{code}: {message}")]
    InvalidCredentials { code: String, message: String },
    #[error("{code}: {message}")]
    RateLimited { code: String, message: String },
    /// Terminal: the bearer was rejected after the single refresh retry.
    #[error("{code}: {message}")]
    Unauthorized { code: String, message: String },
    #[error("{code}: {message}")]
    Forbidden { code: String, message: String },
    /// Terminal: the anti-forgery token was rejected after the single replay.
    #[error("{code}: {message}")]
    AntiForgeryMismatch { code: String, message: String },
    /// Refresh failed; local credentials have been discarded.
    #[error("{code}: {message}")]
    SessionExpired { code: String, message: String },
    #[error("{code}: {message}")]
    Network { code: String, message: String },
    #[error("{code}: {message}")]
    Server { code: String, message: String },
    #[error("{code}: {message}")]
    NotFound { code: String, message: String },
    #[error("{code}: {message}")]
    Conflict { code: String, message: String },
    /// Local durable storage could not be read or written.
    #[error("{code}: {message}")]
    Storage { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::Validation { code, .. }
            | AppError::InvalidCredentials { code, .. }
            | AppError::RateLimited { code, .. }
            | AppError::Unauthorized { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::AntiForgeryMismatch { code, .. }
            | AppError::SessionExpired { code, .. }
            | AppError::Network { code, .. }
            | AppError::Server { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Storage { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::Validation { message, .. }
            | AppError::InvalidCredentials { message, .. }
            | AppError::RateLimited { message, .. }
            | AppError::Unauthorized { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::AntiForgeryMismatch { message, .. }
            | AppError::SessionExpired { message, .. }
            | AppError::Network { message, .. }
            | AppError::Server { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Conflict { message, .. }
            | AppError::Storage { message, .. } => message.as_str(),
        }
    }

    pub fn validation<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Validation { code: code.into(), message: msg.into(), details: Vec::new() } }
    pub fn invalid_credentials<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::InvalidCredentials { code: code.into(), message: msg.into() } }
    pub fn rate_limited<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::RateLimited { code: code.into(), message: msg.into() } }
    pub fn unauthorized<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Unauthorized { code: code.into(), message: msg.into() } }
    pub fn forbidden<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn anti_forgery<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::AntiForgeryMismatch { code: code.into(), message: msg.into() } }
    pub fn session_expired<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::SessionExpired { code: code.into(), message: msg.into() } }
    pub fn network<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Network { code: code.into(), message: msg.into() } }
    pub fn server<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Server { code: code.into(), message: msg.into() } }
    pub fn not_found<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn conflict<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Conflict { code: code.into(), message: msg.into() } }
    pub fn storage<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Storage { code: code.into(), message: msg.into() } }

    /// Build the error for a non-success HTTP response. This is the only place a raw
    /// status/body pair is turned into a taxonomy member.
    pub fn from_response(status: u16, body: &Value) -> Self {
        let message = body_message(body).unwrap_or_else(|| default_message(status).to_string());
        let code = body
            .get("code")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| default_code(status).to_string());
        match status {
            400 | 422 => AppError::Validation { code, message, details: body_details(body) },
            401 => AppError::Unauthorized { code, message },
            403 => AppError::Forbidden { code, message },
            404 => AppError::NotFound { code, message },
            409 => AppError::Conflict { code, message },
            429 => AppError::RateLimited { code, message },
            _ => AppError::Server { code, message },
        }
    }

    /// Map back to the HTTP status this error corresponds to.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::InvalidCredentials { .. } => 401,
            AppError::RateLimited { .. } => 429,
            AppError::Unauthorized { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::AntiForgeryMismatch { .. } => 403,
            AppError::SessionExpired { .. } => 401,
            AppError::Network { .. } => 503,
            AppError::Server { .. } => 500,
            AppError::NotFound { .. } => 404,
            AppError::Conflict { .. } => 409,
            AppError::Storage { .. } => 500,
        }
    }

    /// Transient failures the operator may simply retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Network { .. } | AppError::Server { .. } | AppError::RateLimited { .. })
    }

    /// 401/403 class failures: scope state can no longer be trusted.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, AppError::Unauthorized { .. } | AppError::Forbidden { .. } | AppError::SessionExpired { .. })
    }

    /// Failures that end the session.
    pub fn is_terminal_unauthorized(&self) -> bool {
        matches!(self, AppError::Unauthorized { .. } | AppError::SessionExpired { .. })
    }
}

fn body_message(body: &Value) -> Option<String> {
    match body {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(_) => ["message", "error", "detail"]
            .iter()
            .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.to_string()),
        _ => None,
    }
}

fn body_details(body: &Value) -> Vec<String> {
    for key in ["validationErrors", "details"] {
        match body.get(key) {
            Some(Value::Array(items)) => {
                return items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        Value::Object(_) => {
                            let field = v.get("field").and_then(|f| f.as_str()).unwrap_or("");
                            let msg = v.get("message").and_then(|m| m.as_str()).unwrap_or("");
                            if field.is_empty() { msg.to_string() } else { format!("{}: {}", field, msg) }
                        }
                        other => other.to_string(),
                    })
                    .collect();
            }
            Some(Value::String(s)) => return vec![s.clone()],
            _ => {}
        }
    }
    Vec::new()
}

fn default_code(status: u16) -> &'static str {
    match status {
        400 | 422 => "bad_request",
        401 => "unauthorized",
        403 => "forbidden",
        404 => "not_found",
        409 => "conflict",
        429 => "rate_limited",
        _ => "server_error",
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 | 422 => "Invalid request. Please check your input.",
        401 => "Unauthorized. Please log in again.",
        403 => "Access denied. You do not have permission to perform this action.",
        404 => "Resource not found.",
        409 => "The resource conflicts with an existing one.",
        429 => "Too many requests. Please wait before retrying.",
        500..=599 => "Server error. Please try again later.",
        _ => "An unexpected error occurred.",
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Network { code: "timeout".into(), message: err.to_string() }
        } else {
            AppError::Network { code: "transport".into(), message: err.to_string() }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        // A body we cannot decode is the server's contract breach, not a local input problem
        AppError::Server { code: "invalid_response".into(), message: err.to_string() }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage { code: "io".into(), message: err.to_string() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
