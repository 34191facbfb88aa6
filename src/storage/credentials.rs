use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{keys, SharedKv};
use crate::error::AppResult;

/// The token triple. Bearer and refresh tokens never appear in `Debug` output; the
/// anti-forgery token is deliberately readable (double-submit pattern).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub anti_forgery_token: Option<String>,
}

impl Credentials {
    pub fn new<A: Into<String>, R: Into<String>>(access_token: A, refresh_token: R) -> Self {
        Self { access_token: access_token.into(), refresh_token: refresh_token.into(), anti_forgery_token: None }
    }

    pub fn with_anti_forgery(mut self, token: Option<String>) -> Self {
        self.anti_forgery_token = token;
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("anti_forgery_token", &self.anti_forgery_token)
            .finish()
    }
}

/// Whole-record storage for [`Credentials`].
///
/// Every `put` from a fresh login and every `clear` starts a new epoch. Writers that
/// continue an existing session (refresh, anti-forgery renewal) capture the epoch
/// before their round trip and use the `*_if_epoch` variants, so a late result can
/// never overwrite a newer login or resurrect a logged-out session.
pub struct CredentialStore {
    kv: SharedKv,
    epoch: Mutex<u64>,
}

impl CredentialStore {
    pub fn new(kv: SharedKv) -> Self {
        Self { kv, epoch: Mutex::new(0) }
    }

    pub fn epoch(&self) -> u64 { *self.epoch.lock() }

    pub fn get(&self) -> AppResult<Option<Credentials>> {
        let Some(raw) = self.kv.get(keys::CREDENTIALS)? else { return Ok(None) };
        match serde_json::from_str::<Credentials>(&raw) {
            Ok(c) => Ok(Some(c)),
            Err(e) => {
                warn!(target: "console::storage", "stored credential record is unreadable, ignoring: {}", e);
                Ok(None)
            }
        }
    }

    /// Store credentials of a new session.
    pub fn put(&self, creds: &Credentials) -> AppResult<()> {
        let mut epoch = self.epoch.lock();
        self.write(creds)?;
        *epoch += 1;
        debug!(target: "console::storage", epoch = *epoch, "credentials stored");
        Ok(())
    }

    /// Store credentials continuing the session that was current at `epoch`.
    /// Returns false (and writes nothing) when that session has ended since.
    pub fn put_if_epoch(&self, epoch: u64, creds: &Credentials) -> AppResult<bool> {
        let guard = self.epoch.lock();
        if *guard != epoch {
            debug!(target: "console::storage", expected = epoch, current = *guard, "dropping stale credential write");
            return Ok(false);
        }
        self.write(creds)?;
        Ok(true)
    }

    pub fn clear(&self) -> AppResult<()> {
        let mut epoch = self.epoch.lock();
        *epoch += 1;
        self.kv.remove(keys::CREDENTIALS)?;
        debug!(target: "console::storage", epoch = *epoch, "credentials cleared");
        Ok(())
    }

    /// Clear only if no newer session has been stored since `epoch`.
    pub fn clear_if_epoch(&self, epoch: u64) -> AppResult<bool> {
        let mut guard = self.epoch.lock();
        if *guard != epoch {
            return Ok(false);
        }
        *guard += 1;
        self.kv.remove(keys::CREDENTIALS)?;
        Ok(true)
    }

    fn write(&self, creds: &Credentials) -> AppResult<()> {
        let raw = serde_json::to_string(creds)
            .map_err(|e| crate::error::AppError::storage("encode", e.to_string()))?;
        self.kv.set(keys::CREDENTIALS, &raw)
    }
}
