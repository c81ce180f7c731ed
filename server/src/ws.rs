use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::hub::HubHandle;
use crate::session::{run_session, SessionConfig};

/// Shared app state passed to each WebSocket handler
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub session: SessionConfig,
    pub max_message_size: usize,
}

impl AppState {
    pub fn new(hub: HubHandle, config: &ServerConfig) -> Self {
        Self {
            hub,
            session: SessionConfig::from(config),
            max_message_size: config.max_message_size,
        }
    }
}

/// Query string of `/ws`. Missing values become empty strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JoinParams {
    pub name: String,
    pub color: String,
}

/// HTTP handler for WebSocket upgrade
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<JoinParams>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(app_state.max_message_size)
        .on_upgrade(move |socket| {
            run_session(
                socket,
                params.name,
                params.color,
                app_state.hub,
                app_state.session,
            )
        })
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
