//! A single duplex channel to one remote surface.
//!
//! The transport behind a connection is abstracted as [`Transport`] so the
//! registry, dispatcher and broadcaster never touch socket internals. The
//! WebSocket surface uses [`ChannelTransport`]; tests plug in their own.

use crate::protocol::{Envelope, Message};
use crate::types::{ConnectionId, Role};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Errors raised by a transport when sending or inspecting liveness
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Channel closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Liveness check failed: {0}")]
    Inspect(String),
}

/// Outbound half of a duplex channel
pub trait Transport: Send + Sync {
    /// Hand one frame to the remote surface. Must not block.
    fn send(&self, frame: Envelope) -> Result<(), TransportError>;

    /// Best-effort liveness probe. Errors are treated as "dead" by callers.
    fn is_alive(&self) -> Result<bool, TransportError>;
}

/// Transport backed by an unbounded mpsc channel drained by a socket task.
///
/// When the socket task exits it drops the receiver, after which every send
/// fails and the connection is pruned on its next use.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ChannelTransport {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Envelope) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    fn is_alive(&self) -> Result<bool, TransportError> {
        Ok(!self.tx.is_closed())
    }
}

pub struct Connection {
    id: ConnectionId,
    role: Role,
    closed: AtomicBool,
    transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(role: Role, transport: Box<dyn Transport>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            role,
            closed: AtomicBool::new(false),
            transport,
        }
    }

    /// Log identifier. Identity checks use `Arc::ptr_eq`, never this ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Stamp `message` with the current time and send it
    pub fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.transport.send(Envelope::stamp(message))
    }

    /// Raw liveness probe; see `ConnectionRegistry::is_alive` for the
    /// error-swallowing variant
    pub fn probe(&self) -> Result<bool, TransportError> {
        if self.is_closed() {
            return Ok(false);
        }
        self.transport.is_alive()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection terminally closed. Returns true on the first call.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;

    #[tokio::test]
    async fn test_channel_transport_delivers_stamped_frames() {
        let (transport, mut rx) = ChannelTransport::channel();
        let conn = Connection::new(Role::popup(), Box::new(transport));

        conn.send(Message::GetAuthStatus).unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.message.kind(), MessageKind::GetAuthStatus);
        assert!(frame.timestamp > 0);
    }

    #[test]
    fn test_dropped_receiver_means_dead() {
        let (transport, rx) = ChannelTransport::channel();
        let conn = Connection::new(Role::Anonymous, Box::new(transport));
        assert!(conn.probe().unwrap());

        drop(rx);
        assert!(!conn.probe().unwrap());
        assert!(matches!(
            conn.send(Message::AuthLogout),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_closed_connection_refuses_sends() {
        let (transport, _rx) = ChannelTransport::channel();
        let conn = Connection::new(Role::Anonymous, Box::new(transport));

        assert!(conn.mark_closed());
        assert!(!conn.mark_closed());
        assert!(!conn.probe().unwrap());
        assert!(conn.send(Message::AuthLogout).is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = ChannelTransport::channel();
        let (b, _rb) = ChannelTransport::channel();
        let a = Connection::new(Role::Anonymous, Box::new(a));
        let b = Connection::new(Role::Anonymous, Box::new(b));
        assert_ne!(a.id(), b.id());
    }
}

/// In-memory transports for unit tests
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy, PartialEq)]
    pub enum Behaviour {
        Ok,
        FailSend,
        FailProbe,
    }

    /// Records every frame it is handed; cloned handles share the inbox
    #[derive(Clone)]
    pub struct RecordingTransport {
        pub inbox: Arc<Mutex<Vec<Envelope>>>,
        behaviour: Behaviour,
    }

    impl RecordingTransport {
        pub fn new(behaviour: Behaviour) -> Self {
            Self {
                inbox: Arc::new(Mutex::new(Vec::new())),
                behaviour,
            }
        }

        pub fn received(&self) -> Vec<Message> {
            self.inbox
                .lock()
                .unwrap()
                .iter()
                .map(|env| env.message.clone())
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, frame: Envelope) -> Result<(), TransportError> {
            if self.behaviour == Behaviour::FailSend {
                return Err(TransportError::SendFailed("peer went away".to_string()));
            }
            self.inbox.lock().unwrap().push(frame);
            Ok(())
        }

        fn is_alive(&self) -> Result<bool, TransportError> {
            match self.behaviour {
                Behaviour::FailProbe => Err(TransportError::Inspect("port state unreadable".to_string())),
                _ => Ok(true),
            }
        }
    }

    /// A connection plus a handle onto what it received
    pub fn connection(role: Role, behaviour: Behaviour) -> (Arc<Connection>, RecordingTransport) {
        let transport = RecordingTransport::new(behaviour);
        let conn = Arc::new(Connection::new(role, Box::new(transport.clone())));
        (conn, transport)
    }
}
