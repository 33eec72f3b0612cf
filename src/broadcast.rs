use crate::connection::Connection;
use crate::protocol::Message;
use crate::registry::ConnectionRegistry;
use std::sync::Arc;

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Fans a message out over the registry, pruning dead connections on the way
#[derive(Clone, Copy)]
pub struct Broadcaster<'a> {
    registry: &'a ConnectionRegistry,
}

impl<'a> Broadcaster<'a> {
    pub fn new(registry: &'a ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Send `message` to every live connection except `exclude`.
    ///
    /// Exclusion is by identity, so two popups sharing a role are addressed
    /// separately. Each send is stamped individually; a failed send removes
    /// only that connection and the loop carries on. Connections failing the
    /// liveness check are removed without being sent to.
    pub async fn broadcast(
        &self,
        message: &Message,
        exclude: Option<&Arc<Connection>>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for conn in self.registry.snapshot().await {
            if !self.registry.is_alive(&conn) {
                tracing::debug!(connection = %conn.id(), "Dropping dead connection before broadcast");
                self.registry.unregister(&conn).await;
                report.pruned += 1;
                continue;
            }
            if exclude.is_some_and(|ex| Arc::ptr_eq(ex, &conn)) {
                continue;
            }

            match conn.send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(connection = %conn.id(), error = %e, "Broadcast send failed, dropping connection");
                    self.registry.unregister(&conn).await;
                    report.pruned += 1;
                }
            }
        }

        tracing::debug!(
            kind = %message.kind(),
            delivered = report.delivered,
            pruned = report.pruned,
            "Broadcast complete"
        );
        report
    }

    /// Targeted send to one connection; on failure the connection is removed
    pub async fn send_to(&self, conn: &Arc<Connection>, message: Message) -> bool {
        match conn.send(message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection = %conn.id(), error = %e, "Send failed, dropping connection");
                self.registry.unregister(conn).await;
                false
            }
        }
    }
}
