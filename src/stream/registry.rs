//! Process-wide table of live streaming connections.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::RegistryError;
use crate::events::StreamEvent;

/// Outbound half of a client's event channel.
pub type ClientSink = mpsc::Sender<Arc<StreamEvent>>;

/// Inbound half, drained by the connection's response stream.
pub type ClientReceiver = mpsc::Receiver<Arc<StreamEvent>>;

/// Unique identifier of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity a connection (or a targeted event) is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
    /// Anonymous session id persisted by the client.
    Session(String),
    /// Authenticated account id.
    User(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(id) => write!(f, "session:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Parameters for a new registration.
#[derive(Debug, Clone, Default)]
pub struct NewClient {
    /// Caller-supplied id; generated when absent.
    pub id: Option<ClientId>,
    pub owner: Option<Owner>,
}

impl NewClient {
    #[must_use]
    pub fn owned_by(owner: Owner) -> Self {
        Self {
            id: None,
            owner: Some(owner),
        }
    }
}

/// Point-in-time view of one entry. Never exposes the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: ClientId,
    pub owner: Option<Owner>,
    pub registered_at: DateTime<Utc>,
}

pub(crate) struct ClientEntry {
    pub(crate) owner: Option<Owner>,
    pub(crate) registered_at: DateTime<Utc>,
    pub(crate) sink: ClientSink,
}

pub(crate) struct RegistryInner {
    pub(crate) clients: RwLock<HashMap<ClientId, ClientEntry>>,
    channel_capacity: usize,
}

/// Thread-safe registry of connected streaming clients.
///
/// Cloning is cheap; all clones share the same table. Every read and write
/// goes through one lock, held only for the duration of the map operation.
///
/// # Example
///
/// ```rust
/// use study_relay::stream::{NewClient, Owner, StreamClientRegistry};
///
/// let registry = StreamClientRegistry::new(8);
/// let (handle, _rx) = registry
///     .register(NewClient::owned_by(Owner::Session("s-1".into())))
///     .unwrap();
/// assert_eq!(registry.len().unwrap(), 1);
///
/// drop(handle);
/// assert_eq!(registry.len().unwrap(), 0);
/// ```
#[derive(Clone)]
pub struct StreamClientRegistry {
    pub(crate) inner: Arc<RegistryInner>,
}

impl fmt::Debug for StreamClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClientRegistry")
            .field("channel_capacity", &self.inner.channel_capacity)
            .field("clients", &self.len().ok())
            .finish()
    }
}

impl StreamClientRegistry {
    /// Create an empty registry whose clients buffer up to `channel_capacity`
    /// undelivered events each.
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clients: RwLock::new(HashMap::new()),
                channel_capacity: channel_capacity.max(1),
            }),
        }
    }

    /// Add a connection. The returned handle deregisters the entry when it is
    /// dropped; the receiver yields events broadcast to this client.
    pub fn register(
        &self,
        client: NewClient,
    ) -> Result<(ClientHandle, ClientReceiver), RegistryError> {
        let id = client.id.unwrap_or_else(ClientId::generate);
        let (sink, rx) = mpsc::channel(self.inner.channel_capacity);
        let entry = ClientEntry {
            owner: client.owner.clone(),
            registered_at: Utc::now(),
            sink,
        };

        let total = {
            let mut clients = self
                .inner
                .clients
                .write()
                .map_err(|_| RegistryError::Unavailable)?;
            if clients.contains_key(&id) {
                return Err(RegistryError::DuplicateClient(id.to_string()));
            }
            clients.insert(id.clone(), entry);
            clients.len()
        };

        record_client_gauge(total);
        tracing::info!(
            name: "stream.client.registered",
            client_id = %id,
            owner = ?client.owner,
            clients = total,
            "Stream client registered"
        );

        let handle = ClientHandle {
            id,
            owner: client.owner,
            registry: Arc::downgrade(&self.inner),
        };
        Ok((handle, rx))
    }

    /// Remove an entry. Returns `false` when it was already gone.
    pub fn deregister(&self, id: &ClientId) -> bool {
        remove_entry(&self.inner, id)
    }

    /// Snapshot of all entries, ordered by registration time.
    pub fn list(&self) -> Result<Vec<ClientInfo>, RegistryError> {
        let clients = self
            .inner
            .clients
            .read()
            .map_err(|_| RegistryError::Unavailable)?;
        let mut infos: Vec<ClientInfo> = clients
            .iter()
            .map(|(id, entry)| ClientInfo {
                id: id.clone(),
                owner: entry.owner.clone(),
                registered_at: entry.registered_at,
            })
            .collect();
        drop(clients);

        infos.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(infos)
    }

    /// Entries scoped to `owner`, in registration order.
    pub fn all_for(&self, owner: &Owner) -> Result<Vec<ClientInfo>, RegistryError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|info| info.owner.as_ref() == Some(owner))
            .collect())
    }

    /// Number of entries scoped to `owner`.
    pub fn count_for(&self, owner: &Owner) -> Result<usize, RegistryError> {
        let clients = self
            .inner
            .clients
            .read()
            .map_err(|_| RegistryError::Unavailable)?;
        Ok(clients
            .values()
            .filter(|entry| entry.owner.as_ref() == Some(owner))
            .count())
    }

    /// Total number of registered entries.
    pub fn len(&self) -> Result<usize, RegistryError> {
        self.inner
            .clients
            .read()
            .map(|clients| clients.len())
            .map_err(|_| RegistryError::Unavailable)
    }

    pub fn is_empty(&self) -> Result<bool, RegistryError> {
        self.len().map(|n| n == 0)
    }

    /// Drop every entry, closing all client channels. Used on shutdown so
    /// open streams end instead of holding their connections.
    pub fn close_all(&self) -> usize {
        let mut clients = self
            .inner
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let closed = clients.len();
        clients.clear();
        drop(clients);

        record_client_gauge(0);
        tracing::info!(name: "stream.registry.closed", closed, "All stream clients closed");
        closed
    }

    /// Poison the lock so tests can exercise the unavailable path.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let inner = Arc::clone(&self.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.clients.write();
            panic!("poisoning registry for test");
        })
        .join();
    }
}

/// Removal shared by [`StreamClientRegistry::deregister`] and
/// [`ClientHandle`]. A poisoned lock is recovered so that a closed transport
/// is never left addressable.
fn remove_entry(inner: &RegistryInner, id: &ClientId) -> bool {
    let mut clients = inner
        .clients
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    let removed = clients.remove(id).is_some();
    let total = clients.len();
    drop(clients);

    if removed {
        record_client_gauge(total);
        tracing::info!(
            name: "stream.client.deregistered",
            client_id = %id,
            clients = total,
            "Stream client deregistered"
        );
    }
    removed
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn record_client_gauge(total: usize) {
    metrics::gauge!("relay_stream_clients").set(total as f64);
}

/// Ownership token for one registry entry.
///
/// Held by the connection's response stream for its whole lifetime; dropping
/// it deregisters the entry. Holds only a weak reference to the registry.
pub struct ClientHandle {
    id: ClientId,
    owner: Option<Owner>,
    registry: Weak<RegistryInner>,
}

impl fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl ClientHandle {
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    #[must_use]
    pub fn owner(&self) -> Option<&Owner> {
        self.owner.as_ref()
    }

    /// Remove the entry now. Safe to call repeatedly.
    pub fn deregister(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|inner| remove_entry(&inner, &self.id))
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.deregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn session(id: &str) -> Owner {
        Owner::Session(id.to_string())
    }

    #[test]
    fn test_register_assigns_distinct_ids() {
        let registry = StreamClientRegistry::new(4);
        let (a, _rx_a) = registry.register(NewClient::default()).unwrap();
        let (b, _rx_b) = registry.register(NewClient::default()).unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len().unwrap(), 2);
    }

    #[test]
    fn test_list_returns_exactly_registered_ids() {
        let registry = StreamClientRegistry::new(4);
        let mut held = Vec::new();
        let expected: HashSet<String> = (0..5).map(|i| format!("client-{i}")).collect();

        for id in &expected {
            let client = NewClient {
                id: Some(ClientId::from(id.as_str())),
                owner: Some(session("s")),
            };
            held.push(registry.register(client).unwrap());
        }

        let listed: HashSet<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|info| info.id.to_string())
            .collect();
        assert_eq!(listed, expected);
    }

    #[test]
    fn test_duplicate_supplied_id_rejected() {
        let registry = StreamClientRegistry::new(4);
        let client = NewClient {
            id: Some("fixed".into()),
            owner: None,
        };
        let _first = registry.register(client.clone()).unwrap();

        let err = registry.register(client).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateClient(id) if id == "fixed"));
        assert_eq!(registry.len().unwrap(), 1);
    }

    #[test]
    fn test_register_then_deregister_restores_state() {
        let registry = StreamClientRegistry::new(4);
        let (_keep, _rx) = registry
            .register(NewClient::owned_by(session("a")))
            .unwrap();
        let before = registry.list().unwrap();

        let (handle, _rx2) = registry
            .register(NewClient::owned_by(session("b")))
            .unwrap();
        assert_eq!(registry.len().unwrap(), 2);
        assert!(handle.deregister());

        assert_eq!(registry.list().unwrap(), before);
    }

    #[test]
    fn test_deregister_is_idempotent() {
        let registry = StreamClientRegistry::new(4);
        let (handle, _rx) = registry.register(NewClient::default()).unwrap();
        let id = handle.id().clone();

        assert!(registry.deregister(&id));
        assert!(!registry.deregister(&id));
        assert!(!handle.deregister());
        drop(handle);
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn test_dropping_handle_deregisters() {
        let registry = StreamClientRegistry::new(4);
        let (handle, _rx) = registry.register(NewClient::default()).unwrap();
        assert_eq!(registry.len().unwrap(), 1);

        drop(handle);
        assert_eq!(registry.len().unwrap(), 0);
    }

    #[test]
    fn test_deregistered_channel_closes() {
        let registry = StreamClientRegistry::new(4);
        let (handle, mut rx) = registry.register(NewClient::default()).unwrap();
        handle.deregister();

        // The sink lived only in the entry, so the receiver sees end-of-stream.
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_close_all_ends_every_channel() {
        let registry = StreamClientRegistry::new(4);
        let (a, mut rx_a) = registry.register(NewClient::default()).unwrap();
        let (_b, mut rx_b) = registry.register(NewClient::default()).unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(registry.is_empty().unwrap());
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(matches!(
            rx_b.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(!a.deregister());
    }

    #[test]
    fn test_handle_outliving_registry() {
        let registry = StreamClientRegistry::new(4);
        let (handle, _rx) = registry.register(NewClient::default()).unwrap();
        drop(registry);

        assert!(!handle.deregister());
    }

    #[test]
    fn test_scoped_enumeration() {
        let registry = StreamClientRegistry::new(4);
        let (_a1, _r1) = registry
            .register(NewClient::owned_by(session("a")))
            .unwrap();
        let (_a2, _r2) = registry
            .register(NewClient::owned_by(session("a")))
            .unwrap();
        let (_u, _r3) = registry
            .register(NewClient::owned_by(Owner::User("a".into())))
            .unwrap();
        let (_anon, _r4) = registry.register(NewClient::default()).unwrap();

        assert_eq!(registry.count_for(&session("a")).unwrap(), 2);
        assert_eq!(registry.count_for(&Owner::User("a".into())).unwrap(), 1);
        assert_eq!(registry.count_for(&session("z")).unwrap(), 0);
        assert!(
            registry
                .all_for(&session("a"))
                .unwrap()
                .iter()
                .all(|info| info.owner == Some(session("a")))
        );
    }

    #[test]
    fn test_poisoned_registry_reports_unavailable() {
        let registry = StreamClientRegistry::new(4);
        let (handle, _rx) = registry.register(NewClient::default()).unwrap();
        registry.poison();

        assert!(matches!(registry.list(), Err(RegistryError::Unavailable)));
        assert!(matches!(
            registry.register(NewClient::default()),
            Err(RegistryError::Unavailable)
        ));
        // Removal still goes through so a dead transport is not kept.
        assert!(handle.deregister());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_is_linearizable() {
        const M: usize = 200;
        let registry = StreamClientRegistry::new(4);

        let tasks: Vec<_> = (0..M)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.register(NewClient::default()).unwrap() })
            })
            .collect();

        let mut held = Vec::with_capacity(M);
        for task in tasks {
            held.push(task.await.unwrap());
        }

        let listed = registry.list().unwrap();
        assert_eq!(listed.len(), M);
        let unique: HashSet<_> = listed.iter().map(|info| info.id.clone()).collect();
        assert_eq!(unique.len(), M);

        let removers: Vec<_> = held
            .into_iter()
            .map(|(handle, rx)| {
                tokio::spawn(async move {
                    drop(rx);
                    drop(handle);
                })
            })
            .collect();
        for task in removers {
            task.await.unwrap();
        }
        assert!(registry.is_empty().unwrap());
    }
}
