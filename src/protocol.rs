use crate::types::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source tag the broker puts on every frame it sends
pub const BROKER_SOURCE: &str = "background";

/// Errors raised while decoding an inbound frame
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("Frame has no string `type` field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Malformed {kind} payload: {source}")]
    Malformed {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Every message understood by the broker, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    GetAuthStatus,
    #[serde(rename_all = "camelCase")]
    AuthStatusResponse {
        is_authenticated: bool,
        user: Option<User>,
    },
    AuthSuccess {
        token: String,
        #[serde(default)]
        user: Option<User>,
    },
    AuthLogout,
    /// Reported by content surfaces when a login attempt fails
    AuthError {
        error: String,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::GetAuthStatus => MessageKind::GetAuthStatus,
            Message::AuthStatusResponse { .. } => MessageKind::AuthStatusResponse,
            Message::AuthSuccess { .. } => MessageKind::AuthSuccess,
            Message::AuthLogout => MessageKind::AuthLogout,
            Message::AuthError { .. } => MessageKind::AuthError,
        }
    }

    /// Status response describing `state`. The token never leaves the broker.
    pub fn status_response(state: &AuthState) -> Self {
        Message::AuthStatusResponse {
            is_authenticated: state.is_authenticated,
            user: state.user.clone(),
        }
    }
}

/// The `type` discriminator of [`Message`], usable as a routing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    GetAuthStatus,
    AuthStatusResponse,
    AuthSuccess,
    AuthLogout,
    AuthError,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::GetAuthStatus,
        MessageKind::AuthStatusResponse,
        MessageKind::AuthSuccess,
        MessageKind::AuthLogout,
        MessageKind::AuthError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::GetAuthStatus => "GET_AUTH_STATUS",
            MessageKind::AuthStatusResponse => "AUTH_STATUS_RESPONSE",
            MessageKind::AuthSuccess => "AUTH_SUCCESS",
            MessageKind::AuthLogout => "AUTH_LOGOUT",
            MessageKind::AuthError => "AUTH_ERROR",
        }
    }

    /// Whether peers may send this kind to the broker.
    /// `AUTH_STATUS_RESPONSE` only ever flows broker → peer.
    pub fn is_inbound(&self) -> bool {
        !matches!(self, MessageKind::AuthStatusResponse)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownType(s.to_string()))
    }
}

/// A message as it travels over the wire, with its send-time stamp
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Message,
    /// Unix epoch milliseconds, assigned when the frame is sent
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl Envelope {
    /// Wrap `message` with a fresh timestamp. Called once per delivery so a
    /// broadcast copy carries the time it was actually sent.
    pub fn stamp(message: Message) -> Self {
        Self {
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
            from: Some(BROKER_SOURCE.to_string()),
        }
    }
}

/// Decode an inbound text frame.
///
/// Unknown types are reported separately from malformed payloads so callers
/// can log them at different levels; neither is fatal to the connection.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;

    let kind: MessageKind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .parse()?;

    serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { kind, source })
}
