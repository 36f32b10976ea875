//! Session state over an injected key-value store

use crate::error::Result;
use crate::token_store::{KeyValueStore, MemoryStore};
use crate::types::Employee;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

pub const ACCESS_TOKEN_KEY: &str = "portal.access_token";
pub const REFRESH_TOKEN_KEY: &str = "portal.refresh_token";
/// Cached profile blob. Owned by the UI layer; the client never touches it on its own.
pub const PROFILE_KEY: &str = "portal.profile";

/// Access/refresh token pair for the one logged-in employee
///
/// Cloning is cheap and every clone sees the same store. Empty values are
/// treated as absent.
#[derive(Clone)]
pub struct Session {
    store: Arc<dyn KeyValueStore>,
}

impl Session {
    /// Create a session over an existing store
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Session that lives only as long as the process
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Get the current access token
    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    /// Get the current refresh token
    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    /// Check if an access token is stored
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Persist a freshly issued token pair
    pub fn store_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.store.set(ACCESS_TOKEN_KEY, access_token)?;
        self.store.set(REFRESH_TOKEN_KEY, refresh_token)
    }

    /// Replace the access token, keeping the refresh token
    pub fn set_access_token(&self, access_token: &str) -> Result<()> {
        self.store.set(ACCESS_TOKEN_KEY, access_token)
    }

    /// Drop both tokens. The cached profile is left alone.
    pub fn clear(&self) -> Result<()> {
        let access = self.store.remove(ACCESS_TOKEN_KEY);
        let refresh = self.store.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }

    /// Store the employee profile for the UI layer
    pub fn cache_profile(&self, employee: &Employee) -> Result<()> {
        let blob = serde_json::to_string(employee)?;
        self.store.set(PROFILE_KEY, &blob)
    }

    /// The cached profile, if one is stored and still decodes
    ///
    /// An undecodable blob (e.g. written by an older release) is discarded.
    pub fn cached_profile(&self) -> Option<Employee> {
        let blob = self.read(PROFILE_KEY)?;
        match serde_json::from_str(&blob) {
            Ok(employee) => Some(employee),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cached profile");
                if let Err(e) = self.store.remove(PROFILE_KEY) {
                    warn!(error = %e, "Failed to remove cached profile");
                }
                None
            }
        }
    }

    /// Remove the cached profile
    pub fn forget_profile(&self) -> Result<()> {
        self.store.remove(PROFILE_KEY)
    }

    fn read(&self, key: &str) -> Option<String> {
        self.store.get(key).filter(|value| !value.is_empty())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("has_access_token", &self.access_token().is_some())
            .field("has_refresh_token", &self.refresh_token().is_some())
            .finish()
    }
}
