//! Registry of live connections.

use crate::connection::{Connection, ConnectionId};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks every live connection.
///
/// Rooms are not stored: a room's members are computed on demand from the
/// identity bound on each connection. Readers get owned snapshots, so no shard
/// lock is held while a caller sends or awaits.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh, never reused connection id.
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Register a connection.
    pub fn register(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id, connection);
    }

    /// Remove a connection. Removing an unknown id is a no-op.
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(&connection_id).map(|(_, conn)| conn)
    }

    /// Record a liveness response. Returns false for unknown ids.
    pub fn mark_alive(&self, connection_id: ConnectionId) -> bool {
        match self.connections.get(&connection_id) {
            Some(conn) => {
                conn.mark_alive();
                true
            }
            None => false,
        }
    }

    /// Get a connection by ID.
    pub fn get(&self, connection_id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&connection_id).map(|c| Arc::clone(&c))
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Connections currently bound to `room`.
    pub fn members_of(&self, room: &str) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .filter(|entry| entry.room() == Some(room))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Snapshot of all connections.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Member count per room, for connections that have joined.
    pub fn room_sizes(&self) -> HashMap<String, usize> {
        let mut sizes = HashMap::new();
        for entry in self.connections.iter() {
            if let Some(room) = entry.room() {
                *sizes.entry(room.to_string()).or_insert(0) += 1;
            }
        }
        sizes
    }

    /// Get the total number of connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
