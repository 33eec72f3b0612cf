//! Auth-state synchronisation policy
//!
//! Decides when connected surfaces are told about the canonical auth state:
//! - a popup-role connection gets a targeted push as soon as it registers
//! - a store change notification is broadcast to everyone
//! - a login/logout from a peer is written first, then broadcast to every
//!   other peer (the originator already knows the outcome)
//!
//! The last state every live peer has been told is remembered, so the change
//! notification produced by a login/logout does not broadcast it a second time.

use crate::broadcast::{BroadcastReport, Broadcaster};
use crate::connection::Connection;
use crate::dispatch::{HandlerResult, MessageHandler};
use crate::protocol::{Message, MessageKind};
use crate::store::AuthStore;
use crate::types::{AuthState, User};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub struct StateSync {
    store: Arc<dyn AuthStore>,
    /// State that every live connection is known to hold
    announced: Mutex<Option<AuthState>>,
}

impl StateSync {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self {
            store,
            announced: Mutex::new(None),
        }
    }

    fn is_announced(&self, state: &AuthState) -> bool {
        self.announced
            .lock()
            .map(|announced| announced.as_ref() == Some(state))
            .unwrap_or(false)
    }

    fn set_announced(&self, state: Option<AuthState>) {
        if let Ok(mut announced) = self.announced.lock() {
            *announced = state;
        }
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    /// Called after a connection registers. Read or send failures only ever
    /// affect this one connection.
    pub async fn on_connect(&self, conn: &Arc<Connection>, outbox: Broadcaster<'_>) {
        if !conn.role().observes_state() {
            return;
        }

        match self.store.get_auth_state().await {
            Ok(state) => {
                tracing::debug!(
                    connection = %conn.id(),
                    is_authenticated = state.is_authenticated,
                    "Pushing auth state to new popup"
                );
                outbox.send_to(conn, Message::status_response(&state)).await;
            }
            Err(e) => {
                tracing::error!(connection = %conn.id(), error = %e, "Failed to read auth state for new popup");
            }
        }
    }

    /// Called when the store reports a change. The writer may not be a
    /// tracked connection, so nobody is excluded. Returns `None` when the read
    /// failed or the state was already announced.
    pub async fn on_store_changed(&self, outbox: Broadcaster<'_>) -> Option<BroadcastReport> {
        let state = match self.store.get_auth_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read auth state after change");
                return None;
            }
        };

        if self.is_announced(&state) {
            tracing::debug!("Auth state already announced, skipping broadcast");
            return None;
        }

        let report = outbox.broadcast(&Message::status_response(&state), None).await;
        self.set_announced(Some(state));
        Some(report)
    }

    async fn login(
        &self,
        token: String,
        user: Option<User>,
        source: &Arc<Connection>,
        outbox: Broadcaster<'_>,
    ) -> HandlerResult<()> {
        tracing::info!(
            connection = %source.id(),
            user = user.as_ref().map(|u| u.id.as_str()),
            "Login received"
        );
        let state = AuthState::authenticated(token, user);
        self.store.set_auth_state(state.clone()).await?;
        self.broadcast_current(source, &state, outbox).await
    }

    async fn logout(&self, source: &Arc<Connection>, outbox: Broadcaster<'_>) -> HandlerResult<()> {
        tracing::info!(connection = %source.id(), "Logout received");
        self.store.clear_auth_state().await?;
        self.broadcast_current(source, &AuthState::default(), outbox).await
    }

    /// Re-read after a write so the broadcast describes what is actually
    /// stored, even if another writer got in between. The write already
    /// succeeded, so a failed read only skips the broadcast.
    async fn broadcast_current(
        &self,
        source: &Arc<Connection>,
        written: &AuthState,
        outbox: Broadcaster<'_>,
    ) -> HandlerResult<()> {
        match self.store.get_auth_state().await {
            Ok(state) => {
                outbox
                    .broadcast(&Message::status_response(&state), Some(source))
                    .await;
                // The source only knows what it wrote; if someone else got in
                // between, the next change notification must reach it too
                if state == *written {
                    self.set_announced(Some(state));
                } else {
                    self.set_announced(None);
                }
            }
            Err(e) => {
                tracing::error!(connection = %source.id(), error = %e, "Failed to read auth state after write, skipping broadcast");
                self.set_announced(None);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for StateSync {
    fn name(&self) -> &str {
        "state-sync"
    }

    fn handled_kinds(&self) -> Vec<MessageKind> {
        vec![
            MessageKind::GetAuthStatus,
            MessageKind::AuthSuccess,
            MessageKind::AuthLogout,
            MessageKind::AuthError,
        ]
    }

    async fn handle(
        &self,
        message: Message,
        source: &Arc<Connection>,
        outbox: Broadcaster<'_>,
    ) -> HandlerResult<()> {
        match message {
            Message::GetAuthStatus => {
                match self.store.get_auth_state().await {
                    Ok(state) => source.send(Message::status_response(&state))?,
                    Err(e) => {
                        tracing::error!(connection = %source.id(), error = %e, "Failed to read auth state for status request");
                    }
                }
                Ok(())
            }
            Message::AuthSuccess { token, user } => self.login(token, user, source, outbox).await,
            Message::AuthLogout => self.logout(source, outbox).await,
            Message::AuthError { error } => {
                tracing::warn!(connection = %source.id(), %error, "Peer reported auth error");
                Ok(())
            }
            other => {
                tracing::warn!(kind = %other.kind(), "Unexpected message for state sync");
                Ok(())
            }
        }
    }
}
