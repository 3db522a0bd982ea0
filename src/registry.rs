//! Address-keyed registry of live producer connections
//!
//! The registry is the single source of truth for which producers the
//! subscriber is connected to. It is mutated only from the subscriber's
//! coordinator task (reconciliation and close); everything else gets
//! read-only access through snapshots.

use std::collections::HashMap;
use std::time::Instant;

use dashmap::DashMap;

use crate::connection::{ConnState, ConnectionHandle};
use crate::endpoint::Endpoint;

/// Read-only view of one registry entry
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// The producer endpoint
    pub endpoint: Endpoint,
    /// Last assigned flow-control credit
    pub credit: u64,
    /// Current lifecycle state
    pub state: ConnState,
    /// When the connection was created
    pub created_at: Instant,
}

/// Mapping from `"host:port"` keys to live connections.
///
/// Invariant: at most one connection per endpoint key at any time.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Whether a connection exists for the given `"host:port"` key
    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Last assigned credit for the given key, if registered
    pub fn credit(&self, key: &str) -> Option<u64> {
        self.inner.get(key).map(|entry| entry.credit())
    }

    /// All registered `"host:port"` keys
    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Point-in-time snapshot of every entry
    pub fn snapshot(&self) -> HashMap<String, ConnectionInfo> {
        self.inner
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    ConnectionInfo {
                        endpoint: entry.endpoint().clone(),
                        credit: entry.credit(),
                        state: entry.state(),
                        created_at: entry.created_at(),
                    },
                )
            })
            .collect()
    }

    pub(crate) fn insert(&self, handle: ConnectionHandle) {
        self.inner.insert(handle.endpoint().key(), handle);
    }

    pub(crate) fn remove(&self, key: &str) -> Option<ConnectionHandle> {
        self.inner.remove(key).map(|(_, handle)| handle)
    }

    /// Assign credit to one connection; returns false if the key is gone
    pub(crate) fn set_credit(&self, key: &str, count: u64) -> bool {
        match self.inner.get(key) {
            Some(entry) => {
                entry.set_credit(count);
                true
            }
            None => false,
        }
    }
}
