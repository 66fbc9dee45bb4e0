use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Json, Redirect},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::fields::SheetField;
use crate::protocol::generate_sheet_id;
use crate::storage::{SheetStore, StoreError};

pub type SharedStorage = Arc<dyn SheetStore>;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct PatchFieldRequest {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct PatchFieldResponse {
    pub success: bool,
}

/// GET / - create a fresh sheet and redirect to it
pub async fn create_sheet(State(storage): State<SharedStorage>) -> Result<Redirect, StatusCode> {
    let uuid = generate_sheet_id();
    match storage.create(&uuid).await {
        Ok(_) => {
            debug!("created sheet {}", uuid);
            Ok(Redirect::to(&format!("/sheet/{}", uuid)))
        }
        Err(e) => {
            error!("failed to create sheet: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /sheet/{uuid} and GET /api/sheet/{uuid} - fetch a sheet, wire-named
pub async fn get_sheet(
    State(storage): State<SharedStorage>,
    Path(uuid): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match storage.get(&uuid).await {
        Ok(Some(sheet)) => Ok(Json(serde_json::Value::Object(sheet.to_wire()))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("failed to get sheet {}: {}", uuid, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// PUT /api/sheet/{uuid} - replace every field from a wire-named body
pub async fn update_sheet(
    State(storage): State<SharedStorage>,
    Path(uuid): Path<String>,
    Json(body): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut sheet = match storage.get(&uuid).await {
        Ok(Some(sheet)) => sheet,
        Ok(None) => return Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("failed to get sheet {}: {}", uuid, e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    sheet.apply_wire(&body);

    match storage.replace(sheet).await {
        Ok(updated) => Ok(Json(serde_json::Value::Object(updated.to_wire()))),
        // the sheet can vanish between the fetch above and the write
        Err(StoreError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("failed to replace sheet {}: {}", uuid, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// PATCH /api/sheet/{uuid} - update a single field
pub async fn patch_sheet_field(
    State(storage): State<SharedStorage>,
    Path(uuid): Path<String>,
    Json(body): Json<PatchFieldRequest>,
) -> Result<Json<PatchFieldResponse>, StatusCode> {
    let field = match SheetField::from_wire(&body.field) {
        Ok(field) => field,
        Err(_) => return Err(StatusCode::BAD_REQUEST),
    };

    match storage.update_field(&uuid, field, &body.value).await {
        Ok(()) => Ok(Json(PatchFieldResponse { success: true })),
        Err(StoreError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!("failed to patch sheet {}: {}", uuid, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /health - health check endpoint
pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}
