//! Endpoints polled by the remote sync client.

use crate::{
    auth::Principal,
    errors::{AppError, CatalogError},
    handlers::folder_handlers::multipart_error,
    services::sync_service::FeedItem,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
};
use futures::StreamExt;
use serde_json::{Value, json};
use std::{collections::BTreeMap, io};
use uuid::Uuid;

/// Multipart field carrying the restored payload.
const RESTORE_FIELD: &str = "image";

/// `GET /api/status`: entries the client has to act on.
pub async fn status_feed(
    _principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<Uuid, FeedItem>>, AppError> {
    Ok(Json(state.sync.status_feed().await?))
}

/// `GET /api/entries/{id}/download`: the client holds the original now.
pub async fn acknowledge_download(
    _principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let entry = state.sync.acknowledge_download(id).await?;
    Ok(Json(json!({
        "text": format!("Entry {} deleted on server", entry.id),
        "status": entry.status,
    })))
}

/// `PUT /api/entries/{id}/upload`: the client sends back a requested original.
pub async fn restore_entry(
    _principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(RESTORE_FIELD) {
            continue;
        }
        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        let entry = state.sync.restore(id, stream).await?;
        return Ok(Json(json!({
            "text": format!("Entry {} restored on server", entry.id),
            "status": entry.status,
        })));
    }
    Err(CatalogError::validation(format!("missing `{}` field", RESTORE_FIELD)).into())
}
