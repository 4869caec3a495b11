//! Session registry (C3): the set of active sessions keyed by endpoint.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::Session;

/// Notified when a session leaves the registry, so subscription state for
/// its endpoint can be reaped. The topic manager implements this; the
/// registry holds only a weak reference per the crate's cyclic-reference
/// strategy (callbacks never extend an owner's lifetime).
pub trait ClientRemovalListener: Send + Sync {
    fn on_client_removed(&self, endpoint: &str);
}

/// Thread-safe (readers-writer via `DashMap`'s internal sharding). `remove`
/// notifies the registered [`ClientRemovalListener`], if any, after the
/// session itself is closed and dropped from the map.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    removal_listener: RwLock<Option<Weak<dyn ClientRemovalListener>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            removal_listener: RwLock::new(None),
        }
    }

    pub fn set_removal_listener(&self, listener: Weak<dyn ClientRemovalListener>) {
        *self.removal_listener.write() = Some(listener);
    }

    pub fn add(&self, session: Arc<Session>) {
        self.sessions.insert(session.endpoint().to_string(), session);
    }

    /// Removes and closes the session for `endpoint`, then notifies the
    /// removal listener regardless of whether a session was actually
    /// present (a client may disconnect before ever completing a
    /// handshake).
    pub fn remove(&self, endpoint: &str) {
        if let Some((_, session)) = self.sessions.remove(endpoint) {
            session.close();
        }
        if let Some(listener) = self.removal_listener.read().as_ref().and_then(Weak::upgrade) {
            listener.on_client_removed(endpoint);
        }
    }

    pub fn get(&self, endpoint: &str) -> Option<Arc<Session>> {
        self.sessions.get(endpoint).map(|entry| entry.value().clone())
    }

    /// Snapshot filtered to `connected == true`.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|session| session.is_connected())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
