//! Anonymous session identity persisted on the client.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::storage::SessionStorage;
use crate::error::StorageError;

/// Default durable storage key for the session record.
pub const DEFAULT_STORAGE_KEY: &str = "study_relay.session_id";

/// A visitor's session identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Authenticated account this session has been bound to, if any.
    #[serde(default)]
    pub bound_identity: Option<String>,
}

impl Session {
    fn generate() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            bound_identity: None,
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.bound_identity.is_none()
    }

    /// Parse a stored value: a JSON record, or a bare id written by an older
    /// client.
    fn decode(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(session) = serde_json::from_str::<Session>(raw) {
            return Some(session);
        }
        if raw.starts_with('{') {
            return None;
        }
        Some(Self {
            id: raw.to_string(),
            created_at: Utc::now(),
            bound_identity: None,
        })
    }
}

/// What callers see through [`SessionIdentity::current`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentSession {
    pub session: Option<Session>,
    /// True until the first storage lookup has completed.
    pub loading: bool,
}

impl CurrentSession {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }
}

#[derive(Debug)]
enum Phase {
    Unresolved,
    Resolved(Option<Session>),
}

/// Owns creation, persistence and clearing of the anonymous session id.
///
/// Storage failures never reach the caller: the id keeps working in memory
/// and the condition is logged as `identity.storage.degraded`.
///
/// # Example
///
/// ```rust
/// use study_relay::identity::{MemoryStorage, SessionIdentity};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let identity = SessionIdentity::new(MemoryStorage::new());
/// let first = identity.get_or_create().await;
/// let again = identity.get_or_create().await;
/// assert_eq!(first.id, again.id);
/// # }
/// ```
#[derive(Debug)]
pub struct SessionIdentity<S> {
    storage: S,
    key: String,
    state: RwLock<Phase>,
    /// Serializes operations that touch storage.
    op_lock: tokio::sync::Mutex<()>,
}

impl<S: SessionStorage> SessionIdentity<S> {
    pub fn new(storage: S) -> Self {
        Self::with_key(storage, DEFAULT_STORAGE_KEY)
    }

    pub fn with_key(storage: S, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
            state: RwLock::new(Phase::Unresolved),
            op_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.key
    }

    /// Cached session plus whether the initial lookup is still pending.
    pub fn current(&self) -> CurrentSession {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            Phase::Unresolved => CurrentSession {
                session: None,
                loading: true,
            },
            Phase::Resolved(session) => CurrentSession {
                session: session.clone(),
                loading: false,
            },
        }
    }

    /// Resolve the stored session without creating one.
    pub async fn load(&self) -> Option<Session> {
        let _op = self.op_lock.lock().await;
        self.resolve().await
    }

    /// Return the stored session, creating and persisting one if none exists.
    /// Never overwrites an existing id.
    pub async fn get_or_create(&self) -> Session {
        let _op = self.op_lock.lock().await;
        if let Some(session) = self.resolve().await {
            return session;
        }

        let session = Session::generate();
        self.persist(&session).await;
        self.set(Some(session.clone()));
        tracing::info!(name: "identity.session.created", session_id = %session.id, "Anonymous session created");
        session
    }

    /// Record the authenticated account on the current session. The
    /// anonymous id is kept.
    pub async fn bind(&self, account_id: impl Into<String>) -> Session {
        let account_id = account_id.into();
        let _op = self.op_lock.lock().await;
        let mut session = match self.resolve().await {
            Some(session) => session,
            None => Session::generate(),
        };
        session.bound_identity = Some(account_id);
        self.persist(&session).await;
        self.set(Some(session.clone()));
        tracing::info!(
            name: "identity.session.bound",
            session_id = %session.id,
            account_id = ?session.bound_identity,
            "Session bound to account"
        );
        session
    }

    /// Forget the session. The next `get_or_create` generates a new id.
    pub async fn clear(&self) {
        let _op = self.op_lock.lock().await;
        if let Err(e) = self.storage.remove(&self.key).await {
            degraded("remove", &e);
        }
        self.set(None);
        tracing::info!(name: "identity.session.cleared", "Session cleared");
    }

    fn cached(&self) -> Option<Option<Session>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            Phase::Unresolved => None,
            Phase::Resolved(session) => Some(session.clone()),
        }
    }

    fn set(&self, session: Option<Session>) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Phase::Resolved(session);
    }

    /// Cached value, or a storage read on first use. Call with `op_lock` held.
    async fn resolve(&self) -> Option<Session> {
        if let Some(cached) = self.cached() {
            return cached;
        }

        let session = match self.storage.load(&self.key).await {
            Ok(Some(raw)) => {
                let decoded = Session::decode(&raw);
                if decoded.is_none() {
                    tracing::warn!(
                        name: "identity.storage.unreadable",
                        key = %self.key,
                        "Stored session could not be decoded; a new one will be created"
                    );
                }
                decoded
            }
            Ok(None) => None,
            Err(e) => {
                degraded("load", &e);
                None
            }
        };
        self.set(session.clone());
        session
    }

    async fn persist(&self, session: &Session) {
        let encoded = match serde_json::to_string(session) {
            Ok(encoded) => encoded,
            Err(e) => {
                degraded("encode", &StorageError::from(e));
                return;
            }
        };
        if let Err(e) = self.storage.store(&self.key, &encoded).await {
            degraded("store", &e);
        }
    }
}

fn degraded(operation: &str, error: &StorageError) {
    tracing::warn!(
        name: "identity.storage.degraded",
        operation,
        error = %error,
        "Session storage unavailable; identity kept in memory only"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Storage that is disabled, as when the browser blocks it.
    #[derive(Debug)]
    struct DisabledStorage;

    #[async_trait]
    impl SessionStorage for DisabledStorage {
        async fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
        async fn store(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
        async fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".into()))
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let identity = SessionIdentity::new(MemoryStorage::new());
        let first = identity.get_or_create().await;
        let second = identity.get_or_create().await;
        assert_eq!(first.id, second.id);
        assert!(first.is_anonymous());
    }

    #[tokio::test]
    async fn test_clear_yields_fresh_id() {
        let identity = SessionIdentity::new(MemoryStorage::new());
        let first = identity.get_or_create().await;
        identity.clear().await;

        let current = identity.current();
        assert!(!current.loading);
        assert!(current.session.is_none());

        let second = identity.get_or_create().await;
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_current_distinguishes_loading_from_absent() {
        let identity = SessionIdentity::new(MemoryStorage::new());
        let initial = identity.current();
        assert!(initial.loading);
        assert!(initial.id().is_none());

        assert!(identity.load().await.is_none());
        let absent = identity.current();
        assert!(!absent.loading);
        assert!(absent.id().is_none());

        let session = identity.get_or_create().await;
        assert_eq!(identity.current().id(), Some(session.id.as_str()));
    }

    #[tokio::test]
    async fn test_existing_id_survives_new_instance() {
        let storage = Arc::new(MemoryStorage::new());
        let first = SessionIdentity::new(Arc::clone(&storage))
            .get_or_create()
            .await;

        let reloaded = SessionIdentity::new(Arc::clone(&storage));
        assert_eq!(reloaded.get_or_create().await.id, first.id);
    }

    #[tokio::test]
    async fn test_bare_id_in_storage_is_accepted() {
        let storage = MemoryStorage::new();
        storage
            .store(DEFAULT_STORAGE_KEY, "legacy-id-123")
            .await
            .unwrap();

        let identity = SessionIdentity::new(storage);
        assert_eq!(identity.get_or_create().await.id, "legacy-id-123");
    }

    #[tokio::test]
    async fn test_unreadable_record_is_replaced() {
        let storage = Arc::new(MemoryStorage::new());
        storage.store(DEFAULT_STORAGE_KEY, "{\"broken\":").await.unwrap();

        let identity = SessionIdentity::new(Arc::clone(&storage));
        let session = identity.get_or_create().await;

        let stored = storage.load(DEFAULT_STORAGE_KEY).await.unwrap().unwrap();
        assert_eq!(Session::decode(&stored).unwrap().id, session.id);
    }

    #[tokio::test]
    async fn test_bind_keeps_anonymous_id() {
        let storage = Arc::new(MemoryStorage::new());
        let identity = SessionIdentity::new(Arc::clone(&storage));
        let anonymous = identity.get_or_create().await;

        let bound = identity.bind("account-42").await;
        assert_eq!(bound.id, anonymous.id);
        assert_eq!(bound.bound_identity.as_deref(), Some("account-42"));

        let reloaded = SessionIdentity::new(Arc::clone(&storage));
        let session = reloaded.get_or_create().await;
        assert_eq!(session.id, anonymous.id);
        assert!(!session.is_anonymous());
    }

    #[tokio::test]
    async fn test_disabled_storage_degrades_to_memory() {
        let identity = SessionIdentity::new(DisabledStorage);
        let first = identity.get_or_create().await;
        let second = identity.get_or_create().await;
        assert_eq!(first.id, second.id);

        identity.clear().await;
        let third = identity.get_or_create().await;
        assert_ne!(first.id, third.id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_use_creates_one_id() {
        let identity = Arc::new(SessionIdentity::new(MemoryStorage::new()));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let identity = Arc::clone(&identity);
                tokio::spawn(async move { identity.get_or_create().await.id })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}
