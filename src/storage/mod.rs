//! Durable console state.
//!
//! A tiny string key/value layer (`KeyValueStore`) with a file-backed and an in-memory
//! implementation, plus the typed `CredentialStore` record on top of it. Scope
//! selections are mirrored under the well-known keys in [`keys`].

use std::sync::Arc;

use crate::error::AppResult;

pub mod kv;
mod credentials;

pub use credentials::{CredentialStore, Credentials};
pub use kv::{FileStore, MemoryStore};

/// Well-known keys under which console state survives a restart.
pub mod keys {
    pub const CREDENTIALS: &str = "credentials";
    pub const SELECTED_CLIENT_ID: &str = "selectedClientId";
    pub const SELECTED_INTERFACE_ID: &str = "selectedInterfaceId";
}

/// Synchronous by contract: a write either fully lands or fails, there is no
/// suspension point in the middle of a record update.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
}

pub type SharedKv = Arc<dyn KeyValueStore>;
