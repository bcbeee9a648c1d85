//! HTTP handlers for the folder tree, batch uploads and folder-wide actions.
//! Uploads are streamed field by field into the image store and attached to
//! the folder only once every field has been written.

use crate::{
    auth::{Permission, Principal},
    errors::{AppError, CatalogError},
    models::{
        entry::Entry,
        folder::{Folder, FolderForm, GeoPoint},
    },
    services::{
        entry_service::StagedUpload,
        folder_service::DeletedFolder,
        tree_render,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use chrono::NaiveDate;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::io;
use tracing::debug;
use uuid::Uuid;

/// Multipart field carrying one uploaded image.
const UPLOAD_FIELD: &str = "images";

#[derive(Debug, Serialize)]
pub struct FolderIndex {
    pub folders: Vec<Folder>,
    /// Nested list markup of the whole tree.
    pub tree: String,
}

#[derive(Debug, Serialize)]
pub struct FolderDetail {
    pub folder: Folder,
    pub children: Vec<Folder>,
    pub entries: Vec<Entry>,
    /// Nested list markup of the folder's descendants.
    pub tree: String,
}

/// A located folder, as placed on the map.
#[derive(Debug, Serialize)]
pub struct MapPin {
    pub id: Uuid,
    pub name: String,
    pub date: Option<NaiveDate>,
    #[serde(flatten)]
    pub location: GeoPoint,
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub entry_list: Vec<Uuid>,
}

/// `GET /folders`
pub async fn list_folders(
    _principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<FolderIndex>, AppError> {
    let folders = state.folders.list().await?;
    let tree = tree_render::render(&state.folders.tree().await?);
    Ok(Json(FolderIndex { folders, tree }))
}

/// `GET /folders/by-date`: dated folders, newest first.
pub async fn folders_by_date(
    _principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<Vec<Folder>>, AppError> {
    Ok(Json(state.folders.dated().await?))
}

/// `GET /folders/map`: folders that carry a location.
pub async fn folder_map(
    _principal: Principal,
    State(state): State<AppState>,
) -> Result<Json<Vec<MapPin>>, AppError> {
    let pins = state
        .folders
        .located()
        .await?
        .into_iter()
        .filter_map(|folder| {
            let location = folder.location()?;
            Some(MapPin {
                id: folder.id,
                name: folder.name,
                date: folder.date,
                location,
            })
        })
        .collect();
    Ok(Json(pins))
}

pub async fn create_folder(
    principal: Principal,
    State(state): State<AppState>,
    Json(form): Json<FolderForm>,
) -> Result<(StatusCode, Json<Folder>), AppError> {
    principal.require(Permission::AddFolder)?;
    let folder = state.folders.create(form).await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

pub async fn get_folder(
    _principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FolderDetail>, AppError> {
    let folder = state.folders.get(id).await?;
    let children = state.folders.children_of(id).await?;
    let entries = state.entries.folder_entries(id).await?;
    let tree = tree_render::render(&state.folders.descendants_of(id).await?);
    Ok(Json(FolderDetail {
        folder,
        children,
        entries,
        tree,
    }))
}

pub async fn update_folder(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(form): Json<FolderForm>,
) -> Result<Json<Folder>, AppError> {
    principal.require(Permission::ChangeFolder)?;
    Ok(Json(state.folders.update(id, form).await?))
}

/// `DELETE /folders/{id}`: removes the whole subtree and its entries.
pub async fn delete_folder(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeletedFolder>, AppError> {
    principal.require(Permission::DeleteFolder)?;
    Ok(Json(state.folders.delete(id).await?))
}

/// `POST /folders/{id}/entries`
///
/// Every `images` field becomes one entry, appended in field order. Other
/// fields are ignored. If any field fails, nothing is attached and the
/// payloads already written are removed.
pub async fn upload_entries(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<Entry>>), AppError> {
    principal.require(Permission::ChangeFolder)?;
    // fail fast before writing any payload
    state.folders.get(id).await?;

    let mut staged: Vec<StagedUpload> = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                state.entries.discard(&staged).await;
                return Err(multipart_error(err));
            }
        };
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("skipping multipart field {:?}", field.name());
            continue;
        }

        let stream = field.map(|chunk| chunk.map_err(io::Error::other));
        match state.entries.stage(stream).await {
            Ok(upload) => staged.push(upload),
            Err(err) => {
                state.entries.discard(&staged).await;
                return Err(err.into());
            }
        }
    }

    if staged.is_empty() {
        return Err(CatalogError::validation(format!(
            "no `{}` files in upload",
            UPLOAD_FIELD
        ))
        .into());
    }
    let entries = state.entries.append(id, staged).await?;
    Ok((StatusCode::CREATED, Json(entries)))
}

/// `PUT /folders/{id}/order`
pub async fn reorder_entries(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReorderRequest>,
) -> Result<Json<Vec<Entry>>, AppError> {
    principal.require(Permission::ChangeEntry)?;
    Ok(Json(state.entries.reorder(id, &req.entry_list).await?))
}

/// `POST /folders/{id}/request-all`: ask the client for every downloaded entry.
pub async fn request_all(
    principal: Principal,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    principal.require(Permission::ChangeFolder)?;
    let requested = state.sync.request_all(id).await?;
    Ok(Json(json!({ "folder": id, "requested": requested })))
}

pub(crate) fn multipart_error(err: MultipartError) -> AppError {
    AppError::new(err.status(), err.body_text())
}
