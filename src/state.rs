use crate::{
    auth::AuthRegistry,
    services::{
        entry_service::EntryService,
        folder_service::{FolderService, NameConflictPolicy},
        geocoder::Geocoder,
        image_store::ImageStore,
        search_service::SearchService,
        sync_service::SyncService,
    },
};
use axum::extract::FromRef;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub folders: FolderService,
    pub entries: EntryService,
    pub sync: SyncService,
    pub search: SearchService,
    pub auth: AuthRegistry,
}

impl AppState {
    pub fn new(
        db: Arc<SqlitePool>,
        images: ImageStore,
        geocoder: Arc<dyn Geocoder>,
        geocode_timeout: Duration,
        policy: NameConflictPolicy,
        auth: AuthRegistry,
    ) -> Self {
        Self {
            folders: FolderService::new(
                db.clone(),
                images.clone(),
                geocoder,
                geocode_timeout,
                policy,
            ),
            entries: EntryService::new(db.clone(), images.clone()),
            sync: SyncService::new(db.clone(), images),
            search: SearchService::new(db),
            auth,
        }
    }
}

impl FromRef<AppState> for AuthRegistry {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
