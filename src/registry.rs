//! Owned set of live connections

use crate::connection::Connection;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the live set.
    ///
    /// Returns false if the connection is already present or was closed
    /// earlier; closed connections are never resurrected.
    pub async fn register(&self, connection: Arc<Connection>) -> bool {
        if connection.is_closed() {
            tracing::warn!(connection = %connection.id(), "Refusing to register closed connection");
            return false;
        }

        let mut connections = self.connections.write().await;
        if connections.iter().any(|c| Arc::ptr_eq(c, &connection)) {
            return false;
        }

        tracing::info!(
            connection = %connection.id(),
            role = %connection.role(),
            active = connections.len() + 1,
            "Connection registered"
        );
        connections.push(connection);
        true
    }

    /// Remove a connection and mark it closed. Removing an absent connection
    /// is a no-op. Returns true if it was present.
    pub async fn unregister(&self, connection: &Arc<Connection>) -> bool {
        connection.mark_closed();

        let mut connections = self.connections.write().await;
        let before = connections.len();
        connections.retain(|c| !Arc::ptr_eq(c, connection));
        let removed = connections.len() != before;

        if removed {
            tracing::info!(
                connection = %connection.id(),
                role = %connection.role(),
                active = connections.len(),
                "Connection removed"
            );
        }
        removed
    }

    /// Every registered connection in registration order, dead or alive
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.clone()
    }

    /// Snapshot of connections that currently pass the liveness check, in
    /// registration order. Dead connections are left in place; the
    /// broadcaster removes them on its next fan-out.
    pub async fn live_connections(&self) -> Vec<Arc<Connection>> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|c| self.is_alive(c))
            .collect()
    }

    /// Liveness check that never fails: inspection errors count as dead
    pub fn is_alive(&self, connection: &Connection) -> bool {
        match connection.probe() {
            Ok(alive) => alive,
            Err(e) => {
                tracing::warn!(connection = %connection.id(), error = %e, "Liveness check failed");
                false
            }
        }
    }

    pub async fn contains(&self, connection: &Arc<Connection>) -> bool {
        self.connections
            .read()
            .await
            .iter()
            .any(|c| Arc::ptr_eq(c, connection))
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Number of registered connections per role name
    pub async fn role_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for conn in self.connections.read().await.iter() {
            *counts.entry(conn.role().to_string()).or_insert(0) += 1;
        }
        counts
    }
}
