//! HTTP surface: the WebSocket endpoint plus a small status API.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::broker::Broker;
use crate::protocol::MessageKind;
use crate::ws;

/// Response body for `GET /api/status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Registered connections, live or not yet pruned
    pub connections: usize,
    /// Connection count per role name
    pub roles: BTreeMap<String, usize>,
    /// Message types that currently have a handler
    pub handled_types: Vec<MessageKind>,
}

/// Broker status.
///
/// GET /api/status
pub async fn status(State(broker): State<Arc<Broker>>) -> Json<StatusResponse> {
    let connections = broker.connections();
    Json(StatusResponse {
        connections: connections.len().await,
        roles: connections.role_counts().await,
        handled_types: broker.handlers().handled_kinds().await,
    })
}

/// Build the application router
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/status", get(status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelTransport;
    use crate::store::MemoryStore;
    use crate::types::Role;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_status_reports_connections_and_handlers() {
        let broker = Arc::new(Broker::new(Arc::new(MemoryStore::new())).await);
        let (popup, _popup_rx) = ChannelTransport::channel();
        let (page, _page_rx) = ChannelTransport::channel();
        broker.connect(Role::popup(), Box::new(popup)).await;
        broker
            .connect(Role::Named("content-script".to_string()), Box::new(page))
            .await;

        let response = router(broker)
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["connections"], 2);
        assert_eq!(json["roles"]["popup"], 1);
        assert_eq!(json["roles"]["content-script"], 1);
        assert_eq!(
            json["handled_types"],
            serde_json::json!(["GET_AUTH_STATUS", "AUTH_SUCCESS", "AUTH_LOGOUT", "AUTH_ERROR"])
        );
    }
}
