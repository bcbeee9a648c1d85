//! Defines routes for the folder catalog and the remote sync API.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz` (no token needed)
//! - **Folders**
//!   - `GET    /folders` (+ `/folders/by-date`, `/folders/map`)
//!   - `POST   /folders`
//!   - `GET | PUT | DELETE /folders/{id}`
//!   - `POST   /folders/{id}/entries` (multipart batch upload)
//!   - `PUT    /folders/{id}/order`
//!   - `POST   /folders/{id}/request-all`
//! - **Entries**
//!   - `GET | PUT | DELETE /entries/{id}`
//!   - `GET    /entries/{id}/status`, `GET /entries/{id}/image`
//! - **Sync client**
//!   - `GET    /api/status`
//!   - `GET    /api/entries/{id}/download`
//!   - `PUT    /api/entries/{id}/upload`
//! - **Search**: `GET /search?q=`

use crate::{
    handlers::{
        entry_handlers::{delete_entry, entry_image, entry_status, get_entry, update_entry},
        folder_handlers::{
            create_folder, delete_folder, folder_map, folders_by_date, get_folder, list_folders,
            reorder_entries, request_all, update_folder, upload_entries,
        },
        health_handlers::{healthz, readyz},
        search_handlers::search,
        sync_handlers::{acknowledge_download, restore_entry, status_feed},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Request body cap for routes that accept image uploads.
pub const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Build the router for every catalog route. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Folder routes
        .route("/folders", get(list_folders).post(create_folder))
        .route("/folders/by-date", get(folders_by_date))
        .route("/folders/map", get(folder_map))
        .route(
            "/folders/{id}",
            get(get_folder).put(update_folder).delete(delete_folder),
        )
        .route(
            "/folders/{id}/entries",
            post(upload_entries).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/folders/{id}/order", put(reorder_entries))
        .route("/folders/{id}/request-all", post(request_all))
        // Entry routes
        .route(
            "/entries/{id}",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .route("/entries/{id}/status", get(entry_status))
        .route("/entries/{id}/image", get(entry_image))
        // Sync client routes
        .route("/api/status", get(status_feed))
        .route("/api/entries/{id}/download", get(acknowledge_download))
        .route(
            "/api/entries/{id}/upload",
            put(restore_entry).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/search", get(search))
}
