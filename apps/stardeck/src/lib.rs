pub mod cli;
pub mod config;
pub mod fields;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod storage;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    create_sheet, get_sheet, health_check, patch_sheet_field, update_sheet, SharedStorage,
};
use crate::websocket::{websocket_handler, SyncState};

/// Build the full router: HTTP sheet routes plus the sync channel. The two
/// halves carry different state, so they are built separately and merged.
pub fn router(storage: SharedStorage) -> Router {
    let sync_state = SyncState::new(storage.clone());

    let http_routes = Router::new()
        .route("/health", get(health_check))
        .route("/", get(create_sheet))
        .route("/sheet/:uuid", get(get_sheet))
        .route(
            "/api/sheet/:uuid",
            get(get_sheet).put(update_sheet).patch(patch_sheet_field),
        )
        .with_state(storage);

    let ws_routes = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(sync_state);

    Router::new()
        .merge(http_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
