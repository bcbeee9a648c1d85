//! HTTP handlers for single entries. Viewing an entry's detail or status page
//! doubles as a lifecycle signal for the remote client.

use crate::{
    auth::{Permission, Principal},
    errors::AppError,
    models::entry::{Entry, EntryStatus, SyncEvent},
    services::entry_service::EntryDetail,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CaptionForm {
    pub caption: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntryStatusView {
    pub id: Uuid,
    pub folder_id: Uuid,
    pub status: EntryStatus,
}

/// `GET /entries/{id}`: a `RESTORED` entry seen here is released (`KILLED`).
pub async fn get_entry(
    _principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntryDetail>, AppError> {
    state.sync.observe(id, SyncEvent::DetailViewed).await?;
    Ok(Json(state.entries.detail(id).await?))
}

/// `GET /entries/{id}/status`: a `DOWNLOADED` entry seen here is requested back.
pub async fn entry_status(
    _principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntryStatusView>, AppError> {
    let entry = state.sync.observe(id, SyncEvent::StatusViewed).await?;
    Ok(Json(EntryStatusView {
        id: entry.id,
        folder_id: entry.folder_id,
        status: entry.status,
    }))
}

pub async fn update_entry(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(form): Json<CaptionForm>,
) -> Result<Json<Entry>, AppError> {
    principal.require(Permission::ChangeEntry)?;
    Ok(Json(state.entries.update_caption(id, form.caption).await?))
}

/// `DELETE /entries/{id}`: later entries of the folder move up by one.
pub async fn delete_entry(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    principal.require(Permission::DeleteEntry)?;
    state.entries.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /entries/{id}/image`: streams the current payload.
pub async fn entry_image(
    _principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let entry = state.entries.get(id).await?;
    let file = state.entries.images.open(&entry.image_path).await?;
    let size = file.metadata().await.ok().map(|m| m.len());

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    let mime = ImageFormat::from_path(&entry.image_path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    if let Some(size) = size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    Ok(response)
}
