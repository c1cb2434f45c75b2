//! Per-connection session handle.
//!
//! A `Session` identifies the connection a request arrived on. Handlers that
//! declare they take a session receive it on every call, and can keep small
//! pieces of per-connection state in it.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Cheaply cloneable handle to one connection's session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    peer: String,
    opened_at: DateTime<Utc>,
    values: RwLock<HashMap<String, Value>>,
}

impl Session {
    /// Create a session for a connection with the given peer label.
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                peer: peer.into(),
                opened_at: Utc::now(),
                values: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Remote address or other label describing the peer.
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.inner.opened_at
    }

    /// Read a session value.
    pub fn get(&self, key: &str) -> Option<Value> {
        let values = self.inner.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    /// Store a session value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        let mut values = self.inner.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.into(), value)
    }

    /// Remove a session value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut values = self.inner.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key)
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Session {}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {} ({})", self.inner.id, self.inner.peer)
    }
}
