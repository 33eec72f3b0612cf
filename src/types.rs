use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque ID types for type safety
pub type ConnectionId = String;
pub type UserId = String;

/// Role name reserved for surfaces that want the current state pushed on open
pub const POPUP_ROLE: &str = "popup";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

/// Canonical authentication state as held by the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_authenticated: bool,
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl AuthState {
    /// State recorded after a successful login
    pub fn authenticated(token: String, user: Option<User>) -> Self {
        Self {
            is_authenticated: true,
            user,
            token: Some(token),
        }
    }
}

/// Role tag a surface declares when it opens a connection.
///
/// Only `Popup` changes broker behaviour; every other name is carried for
/// logging and the status endpoint. `Popup` keeps the reserved name it was
/// matched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Role {
    Popup(String),
    Named(String),
    Anonymous,
}

impl Role {
    /// Popup role under the default reserved name
    pub fn popup() -> Self {
        Role::Popup(POPUP_ROLE.to_string())
    }

    /// Parse the `role` query parameter. `popup_role` is the configured
    /// reserved name (normally [`POPUP_ROLE`]).
    pub fn parse(name: Option<&str>, popup_role: &str) -> Self {
        match name.map(str::trim) {
            Some(n) if n == popup_role => Role::Popup(n.to_string()),
            Some("") | None => Role::Anonymous,
            Some(n) => Role::Named(n.to_string()),
        }
    }

    /// Whether a connection with this role gets a targeted state push on open
    pub fn observes_state(&self) -> bool {
        matches!(self, Role::Popup(_))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Popup(name) | Role::Named(name) => f.write_str(name),
            Role::Anonymous => f.write_str("anonymous"),
        }
    }
}
