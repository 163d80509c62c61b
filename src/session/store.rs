//! Storage-backed persistence for attempt sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::TestSession;
use crate::config::{StorageBackend, StorageConfig};
use crate::document::ContextDeclaration;
use crate::storage::{FileStorage, KeyValueStorage, MemoryStorage};

/// Identifies one attempt: the (assessment, assignment, user) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptKey<'a> {
    /// Assessment identifier.
    pub assessment_id: &'a str,
    /// Assignment the assessment was delivered through, if any.
    pub assignment_id: Option<&'a str>,
    /// Authenticated user; anonymous attempts use a per-device id.
    pub user_id: Option<&'a str>,
}

impl<'a> AttemptKey<'a> {
    /// Key for an assessment with no assignment and no user.
    pub fn new(assessment_id: &'a str) -> Self {
        Self {
            assessment_id,
            assignment_id: None,
            user_id: None,
        }
    }

    /// Set the assignment.
    pub fn with_assignment(mut self, assignment_id: &'a str) -> Self {
        self.assignment_id = Some(assignment_id);
        self
    }

    /// Set the user.
    pub fn with_user(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Deterministic identity derived for an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    /// Attempt identifier.
    pub test_session_identifier: String,
    /// Seed bound into the realization.
    pub seed: u32,
}

/// Persists attempt sessions through an injected [`KeyValueStorage`].
///
/// The first backend failure switches the store to an in-memory map for the
/// rest of its life. Nothing is raised to callers; attempts simply stop
/// surviving reloads.
pub struct SessionStore {
    backend: Option<Arc<dyn KeyValueStorage>>,
    fallback: MemoryStorage,
    degraded: AtomicBool,
    key_prefix: String,
}

impl SessionStore {
    /// Store backed by `backend`.
    pub fn new(backend: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            backend: Some(backend),
            fallback: MemoryStorage::new(),
            degraded: AtomicBool::new(false),
            key_prefix: "pie".to_string(),
        }
    }

    /// Store with no persistent backing.
    pub fn in_memory() -> Self {
        Self {
            backend: None,
            fallback: MemoryStorage::new(),
            degraded: AtomicBool::new(false),
            key_prefix: "pie".to_string(),
        }
    }

    /// Build from configuration. A file backend that cannot be opened
    /// degrades to memory.
    pub fn from_config(config: &StorageConfig) -> Self {
        let store = match config.backend {
            StorageBackend::Memory => Self::in_memory(),
            StorageBackend::File => match FileStorage::new(&config.dir) {
                Ok(fs) => Self::new(Arc::new(fs)),
                Err(e) => {
                    warn!(
                        dir = %config.dir.display(),
                        error = %e,
                        "Session storage unavailable, keeping attempts in memory"
                    );
                    let store = Self::in_memory();
                    store.degraded.store(true, Ordering::SeqCst);
                    store
                }
            },
        };
        store.with_key_prefix(&config.key_prefix)
    }

    /// Prefix every key with `prefix`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Whether a backend failure forced memory-only operation.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn session_key(&self, identifier: &str) -> String {
        format!("{}:test-session:{}", self.key_prefix, identifier)
    }

    fn anonymous_key(&self) -> String {
        format!("{}:anonymous-id", self.key_prefix)
    }

    fn active(&self) -> Option<&dyn KeyValueStorage> {
        if self.is_degraded() {
            return None;
        }
        self.backend.as_deref()
    }

    fn degrade(&self, op: &str, key: &str, error: &dyn std::fmt::Display) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                op = op,
                key = key,
                error = %error,
                "Session storage failed, continuing in memory only"
            );
        }
    }

    // Invariant: `fallback` holds every value the backend has returned or
    // accepted, so degradation never loses state seen by this process.

    fn read(&self, key: &str) -> Option<String> {
        if let Some(backend) = self.active() {
            match backend.get(key) {
                Ok(Some(value)) => {
                    self.mirror_set(key, &value);
                    return Some(value);
                }
                Ok(None) => {
                    self.mirror_remove(key);
                    return None;
                }
                Err(e) => self.degrade("get", key, &e),
            }
        }
        self.fallback.get(key).ok().flatten()
    }

    fn write(&self, key: &str, value: &str) {
        if let Some(backend) = self.active() {
            if let Err(e) = backend.set(key, value) {
                self.degrade("set", key, &e);
            }
        }
        self.mirror_set(key, value);
    }

    fn delete(&self, key: &str) {
        if let Some(backend) = self.active() {
            if let Err(e) = backend.remove(key) {
                self.degrade("remove", key, &e);
            }
        }
        self.mirror_remove(key);
    }

    fn mirror_set(&self, key: &str, value: &str) {
        if let Err(e) = self.fallback.set(key, value) {
            warn!(key = key, error = %e, "In-memory session write failed");
        }
    }

    fn mirror_remove(&self, key: &str) {
        if let Err(e) = self.fallback.remove(key) {
            warn!(key = key, error = %e, "In-memory session remove failed");
        }
    }

    /// Stable per-device anonymous id, generated and persisted on first use.
    pub fn anonymous_id(&self) -> String {
        let key = self.anonymous_key();
        if let Some(existing) = self.read(&key).filter(|v| !v.trim().is_empty()) {
            return existing;
        }
        let generated = format!("anon-{}", Uuid::new_v4());
        self.write(&key, &generated);
        debug!(anonymous_id = %generated, "Generated anonymous device id");
        generated
    }

    /// Deterministic identity for an attempt.
    pub fn derive_identifier(&self, key: &AttemptKey<'_>) -> SessionIdentity {
        let user = match key.user_id {
            Some(user) => user.to_string(),
            None => self.anonymous_id(),
        };
        let name = format!(
            "{}\u{1f}{}\u{1f}{}",
            key.assessment_id,
            key.assignment_id.unwrap_or(""),
            user
        );
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
        let bytes = uuid.as_bytes();
        SessionIdentity {
            test_session_identifier: format!("tsess-{}", uuid.simple()),
            seed: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Load a stored attempt by identifier. Unreadable records count as absent.
    /// An out-of-range stored position is clamped into range.
    pub fn load(&self, identifier: &str) -> Option<TestSession> {
        self.load_record(identifier).map(|(session, _)| session)
    }

    /// Stored record plus whether its position had to be repaired.
    fn load_record(&self, identifier: &str) -> Option<(TestSession, bool)> {
        let key = self.session_key(identifier);
        let raw = self.read(&key)?;
        let mut session = match serde_json::from_str::<TestSession>(&raw) {
            Ok(session) => session,
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable stored session");
                return None;
            }
        };
        let stored_index = session.navigation_state.current_item_index;
        let repaired = session.clamp_position();
        if repaired {
            warn!(
                key = %key,
                stored_index = stored_index,
                current_index = session.navigation_state.current_item_index,
                "Repaired out-of-range stored position"
            );
        }
        Some((session, repaired))
    }

    /// Load the attempt for `key`, realigning a stale realization, or create
    /// and persist a new one.
    pub fn load_or_create(
        &self,
        key: &AttemptKey<'_>,
        item_identifiers: &[String],
        context_declarations: &[ContextDeclaration],
    ) -> TestSession {
        let identity = self.derive_identifier(key);

        if let Some((mut session, repaired)) = self.load_record(&identity.test_session_identifier) {
            let previous = session.realization.item_identifiers.len();
            if session.realign(item_identifiers) {
                info!(
                    session = %identity.test_session_identifier,
                    previous_items = previous,
                    current_items = item_identifiers.len(),
                    "Realigned stale session realization"
                );
                return self.save(session);
            }
            if repaired {
                return self.save(session);
            }
            debug!(session = %identity.test_session_identifier, "Restored session");
            return session;
        }

        let session = TestSession::new(&identity, key.assessment_id, item_identifiers.to_vec())
            .with_context_defaults(context_declarations);
        info!(
            session = %identity.test_session_identifier,
            items = item_identifiers.len(),
            "Created session"
        );
        self.save(session)
    }

    /// Persist a session, bumping `version` and `updatedAt`.
    pub fn save(&self, mut session: TestSession) -> TestSession {
        session.version += 1;
        session.updated_at = Utc::now();
        let key = self.session_key(&session.test_session_identifier);
        match serde_json::to_string(&session) {
            Ok(json) => self.write(&key, &json),
            Err(e) => warn!(key = %key, error = %e, "Failed to serialize session"),
        }
        session
    }

    /// Delete a stored attempt.
    pub fn remove(&self, identifier: &str) {
        self.delete(&self.session_key(identifier));
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

