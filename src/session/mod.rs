//! Session and history management.
//!
//! [`SessionManager`] owns the active [`SessionKey`], the caller's
//! [`Identity`] and the local message list for the active session. Switching
//! and history restoration capture the target key before any backend round
//! trip and only apply the result if that key is still active afterwards, so
//! a slow fetch for an abandoned session can never overwrite a newer one.

pub mod history;
pub mod keys;
pub mod store;

pub use history::{ChatMessage, ChatRole, MessageLog};
pub use keys::{
    GUEST_ID_STORE_KEY, Identity, SessionKey, active_session_store_key, default_session_key,
    fresh_session_key, guest_id,
};
pub use store::{FileLocalStore, LocalStore, MemoryLocalStore};

use crate::error::{Result, SessionError};
use crate::gateway::{GatewayTransport, SessionSummary};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Result of [`SessionManager::switch_to`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The target is still active; its history replaced the local list.
    Applied(Vec<ChatMessage>),
    /// Another switch happened while fetching; the result was discarded.
    Superseded,
}

#[derive(Debug)]
struct ActiveSession {
    identity: Identity,
    key: Option<SessionKey>,
    messages: MessageLog,
}

/// Resolves, switches, creates and deletes sessions for one identity.
pub struct SessionManager {
    transport: Arc<dyn GatewayTransport>,
    store: Arc<dyn LocalStore>,
    agent_id: String,
    active: Mutex<ActiveSession>,
}

impl SessionManager {
    /// Create a manager for a guest with no active session yet.
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        store: Arc<dyn LocalStore>,
        agent_id: impl Into<String>,
        max_messages: usize,
    ) -> Self {
        Self {
            transport,
            store,
            agent_id: agent_id.into(),
            active: Mutex::new(ActiveSession {
                identity: Identity::Guest,
                key: None,
                messages: MessageLog::new(max_messages),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActiveSession> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current identity.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.lock().identity.clone()
    }

    /// Currently active session key, if one has been resolved.
    #[must_use]
    pub fn active_key(&self) -> Option<SessionKey> {
        self.lock().key.clone()
    }

    /// Snapshot of the local message list.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.all_messages()
    }

    /// The local store backing identities and counters.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Change identity. Clears the local list and derives the new identity's
    /// local key; backend resolution is left to [`Self::resolve_active_session`].
    pub fn set_identity(&self, identity: Identity) -> Result<SessionKey> {
        let key = self.local_session_key(&identity)?;
        let mut active = self.lock();
        if active.identity != identity {
            info!(guest = identity.is_guest(), "identity changed");
        }
        active.identity = identity;
        active.key = Some(key.clone());
        active.messages.clear();
        Ok(key)
    }

    /// Last remembered session for `identity`, or its default key.
    pub fn local_session_key(&self, identity: &Identity) -> Result<SessionKey> {
        let scope = identity.store_scope(self.store.as_ref())?;
        if let Some(remembered) = self.store.get(&active_session_store_key(&scope)) {
            if !remembered.trim().is_empty() {
                return Ok(SessionKey::new(remembered.trim()));
            }
        }
        default_session_key(identity, self.store.as_ref())
    }

    /// Resolve the active session with the backend and make the canonical key active.
    pub async fn resolve_active_session(&self) -> Result<SessionKey> {
        let (identity, current) = {
            let active = self.lock();
            (active.identity.clone(), active.key.clone())
        };
        let local = match current {
            Some(key) => key,
            None => self.local_session_key(&identity)?,
        };
        let canonical = self
            .transport
            .resolve_session(&local, &self.agent_id)
            .await
            .map_err(|e| SessionError::Session(format!("resolve {local} failed: {e}")))?;
        {
            let mut active = self.lock();
            // A switch during resolution wins.
            if active.key.as_ref().is_none_or(|k| *k == local) {
                active.key = Some(canonical.clone());
            } else {
                debug!(resolved = %canonical, "resolution superseded by a switch");
                return active
                    .key
                    .clone()
                    .ok_or_else(|| SessionError::Session("no active session".to_owned()));
            }
        }
        self.remember(&identity, &canonical);
        debug!(session = %canonical, "active session resolved");
        Ok(canonical)
    }

    /// Make `key` active and load its history.
    pub async fn switch_to(&self, key: SessionKey) -> Result<SwitchOutcome> {
        let identity = {
            let mut active = self.lock();
            active.key = Some(key.clone());
            active.identity.clone()
        };
        self.remember(&identity, &key);
        info!(session = %key, "switching session");

        let history = self
            .transport
            .get_chat_history(&key)
            .await
            .map_err(|e| SessionError::Session(format!("history for {key} failed: {e}")))?;

        let mut active = self.lock();
        if active.key.as_ref() != Some(&key) {
            debug!(session = %key, "switch superseded, discarding history");
            return Ok(SwitchOutcome::Superseded);
        }
        active.messages.replace_all(history);
        Ok(SwitchOutcome::Applied(active.messages.all_messages()))
    }

    /// Start a brand-new conversation and make it active.
    pub async fn create_new(&self) -> Result<SessionKey> {
        let identity = self.identity();
        let fresh = fresh_session_key(&identity, self.store.as_ref())?;
        let canonical = self
            .transport
            .resolve_session(&fresh, &self.agent_id)
            .await
            .map_err(|e| SessionError::Session(format!("create {fresh} failed: {e}")))?;
        {
            let mut active = self.lock();
            active.key = Some(canonical.clone());
            active.messages.clear();
        }
        self.remember(&identity, &canonical);
        info!(session = %canonical, "created new session");
        Ok(canonical)
    }

    /// Delete a session. If it was active, a new one is created and returned.
    pub async fn delete(&self, key: &SessionKey) -> Result<Option<SessionKey>> {
        self.transport
            .delete_session(key)
            .await
            .map_err(|e| SessionError::Session(format!("delete {key} failed: {e}")))?;
        info!(session = %key, "deleted session");
        if self.active_key().as_ref() == Some(key) {
            return self.create_new().await.map(Some);
        }
        Ok(None)
    }

    /// Re-fetch the active session's history. Replaces the local list only
    /// when the fetch is non-empty and the session is still active.
    pub async fn restore_history(&self) -> Result<Option<Vec<ChatMessage>>> {
        let Some(key) = self.active_key() else {
            return Ok(None);
        };
        let history = self
            .transport
            .get_chat_history(&key)
            .await
            .map_err(|e| SessionError::Session(format!("history for {key} failed: {e}")))?;
        if history.is_empty() {
            debug!(session = %key, "history empty, keeping local messages");
            return Ok(None);
        }
        let mut active = self.lock();
        if active.key.as_ref() != Some(&key) {
            return Ok(None);
        }
        active.messages.replace_all(history);
        Ok(Some(active.messages.all_messages()))
    }

    /// List the caller's sessions.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.transport
            .list_sessions()
            .await
            .map_err(|e| SessionError::Session(format!("list sessions failed: {e}")))
    }

    /// Append a message to the local list; returns it with its assigned id.
    pub fn append_message(&self, mut message: ChatMessage) -> ChatMessage {
        message.id = self.lock().messages.push(message.clone());
        message
    }

    /// Roll back a local message. Returns whether it was present.
    pub fn remove_message(&self, id: &str) -> bool {
        self.lock().messages.remove(id)
    }

    /// Messages this guest has sent so far.
    pub fn guest_message_count(&self) -> Result<u32> {
        let key = self.guest_counter_key()?;
        Ok(self
            .store
            .get(&key)
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0))
    }

    /// Count one more guest message; returns the new total.
    pub fn increment_guest_count(&self) -> Result<u32> {
        let next = self.guest_message_count()?.saturating_add(1);
        self.store.set(&self.guest_counter_key()?, &next.to_string())?;
        Ok(next)
    }

    /// Undo one [`Self::increment_guest_count`].
    pub fn rollback_guest_count(&self) -> Result<u32> {
        let next = self.guest_message_count()?.saturating_sub(1);
        self.store.set(&self.guest_counter_key()?, &next.to_string())?;
        Ok(next)
    }

    fn guest_counter_key(&self) -> Result<String> {
        Ok(format!("guest_messages:{}", guest_id(self.store.as_ref())?))
    }

    fn remember(&self, identity: &Identity, key: &SessionKey) {
        let stored = identity
            .store_scope(self.store.as_ref())
            .and_then(|scope| self.store.set(&active_session_store_key(&scope), key.as_str()));
        if let Err(e) = stored {
            warn!(session = %key, error = %e, "failed to remember active session");
        }
    }
}
