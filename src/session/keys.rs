//! Session key derivation.
//!
//! Authenticated identities map to a deterministic key (`user-<id>`) so the
//! same conversation resumes on every device. Guests get a random identifier
//! that is persisted in the local store and reused until storage is cleared.

use crate::error::Result;
use crate::session::store::LocalStore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Local store key holding the persisted guest identifier.
pub const GUEST_ID_STORE_KEY: &str = "guest_id";

/// Opaque identifier of a logical, resumable conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap a raw key string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Who is talking to the avatar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    /// Unauthenticated visitor, bounded by the guest message limit.
    #[default]
    Guest,
    /// Signed-in account, gated by billing.
    Authenticated {
        /// Stable account identifier.
        user_id: String,
    },
}

impl Identity {
    /// Whether this identity is a guest.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }

    /// Scope string used to namespace per-identity local store entries.
    pub fn store_scope(&self, store: &dyn LocalStore) -> Result<String> {
        match self {
            Self::Guest => guest_id(store),
            Self::Authenticated { user_id } => Ok(format!("user-{user_id}")),
        }
    }
}

/// Return the persisted guest identifier, creating one on first use.
pub fn guest_id(store: &dyn LocalStore) -> Result<String> {
    if let Some(existing) = store.get(GUEST_ID_STORE_KEY) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_owned());
        }
    }
    let fresh = format!("guest-{}", uuid::Uuid::new_v4().simple());
    store.set(GUEST_ID_STORE_KEY, &fresh)?;
    tracing::info!(guest_id = %fresh, "created guest identity");
    Ok(fresh)
}

/// Derive the default session key for an identity.
pub fn default_session_key(identity: &Identity, store: &dyn LocalStore) -> Result<SessionKey> {
    match identity {
        Identity::Guest => guest_id(store).map(SessionKey),
        Identity::Authenticated { user_id } => Ok(SessionKey(format!("user-{user_id}"))),
    }
}

/// Derive a fresh key for a brand-new conversation owned by `identity`.
pub fn fresh_session_key(identity: &Identity, store: &dyn LocalStore) -> Result<SessionKey> {
    let base = default_session_key(identity, store)?;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let short = suffix.get(..8).unwrap_or(&suffix);
    Ok(SessionKey(format!("{}-{short}", base.0)))
}

/// Local store key remembering the last active session for an identity scope.
#[must_use]
pub fn active_session_store_key(scope: &str) -> String {
    format!("active_session:{scope}")
}
