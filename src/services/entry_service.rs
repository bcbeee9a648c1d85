//! EntryService: entry CRUD on top of the ordering engine.
//!
//! Uploads are staged first (payload durably written and validated), then
//! appended to the folder in one transaction. A batch either lands whole or
//! not at all: staged files of a failed batch are discarded.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::entry::{CAPTION_MAX_LEN, Entry, EntryStatus},
    services::{
        image_store::{ImageStore, StoredImage},
        ordering::{self, ENTRY_COLUMNS},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A payload written to the image store but not yet attached to a folder.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub entry_id: Uuid,
    pub image: StoredImage,
}

/// An entry with its neighbours in folder order.
#[derive(Debug, Clone, Serialize)]
pub struct EntryDetail {
    #[serde(flatten)]
    pub entry: Entry,
    pub previous: Option<Uuid>,
    pub next: Option<Uuid>,
}

#[derive(Clone)]
pub struct EntryService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    pub images: ImageStore,
}

impl EntryService {
    pub fn new(db: Arc<SqlitePool>, images: ImageStore) -> Self {
        Self { db, images }
    }

    pub async fn get(&self, id: Uuid) -> CatalogResult<Entry> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
        sqlx::query_as::<_, Entry>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(CatalogError::EntryNotFound(id))
    }

    /// An entry plus the ids of the entries just before and after it.
    pub async fn detail(&self, id: Uuid) -> CatalogResult<EntryDetail> {
        let entry = self.get(id).await?;
        let siblings = self.folder_entries(entry.folder_id).await?;
        let index = siblings.iter().position(|e| e.id == id);
        let previous = index
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| siblings.get(i))
            .map(|e| e.id);
        let next = index.and_then(|i| siblings.get(i + 1)).map(|e| e.id);
        Ok(EntryDetail {
            entry,
            previous,
            next,
        })
    }

    pub async fn folder_entries(&self, folder_id: Uuid) -> CatalogResult<Vec<Entry>> {
        ordering::folder_entries(&mut *self.db.acquire().await?, folder_id).await
    }

    /// Write one uploaded payload to the image store.
    pub async fn stage<S>(&self, stream: S) -> CatalogResult<StagedUpload>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let entry_id = Uuid::new_v4();
        let image = self.images.store_stream(entry_id, stream).await?;
        debug!(
            "staged entry {} ({}x{}) at {}",
            entry_id, image.width, image.height, image.path
        );
        Ok(StagedUpload { entry_id, image })
    }

    /// Remove staged payloads that will not be attached.
    pub async fn discard(&self, staged: &[StagedUpload]) {
        for upload in staged {
            self.images.remove(&upload.image.path).await;
        }
    }

    /// Attach staged payloads to a folder, appended in order after its last entry.
    ///
    /// On failure the staged payloads are discarded.
    pub async fn append(
        &self,
        folder_id: Uuid,
        staged: Vec<StagedUpload>,
    ) -> CatalogResult<Vec<Entry>> {
        match self.append_rows(folder_id, &staged).await {
            Ok(entries) => {
                info!("appended {} entries to folder {}", entries.len(), folder_id);
                Ok(entries)
            }
            Err(err) => {
                self.discard(&staged).await;
                Err(err)
            }
        }
    }

    async fn append_rows(
        &self,
        folder_id: Uuid,
        staged: &[StagedUpload],
    ) -> CatalogResult<Vec<Entry>> {
        let mut tx = self.db.begin().await?;
        ordering::lock_folder(&mut tx, folder_id).await?;
        let mut position = ordering::next_position(&mut tx, folder_id).await?;

        let sql = format!(
            "INSERT INTO entries (id, folder_id, position, image_path, caption, status, created_at)
             VALUES (?, ?, ?, ?, NULL, ?, ?)
             RETURNING {ENTRY_COLUMNS}"
        );
        let mut entries = Vec::with_capacity(staged.len());
        for upload in staged {
            let entry = sqlx::query_as::<_, Entry>(&sql)
                .bind(upload.entry_id)
                .bind(folder_id)
                .bind(i64::from(position))
                .bind(&upload.image.path)
                .bind(EntryStatus::default())
                .bind(Utc::now())
                .fetch_one(&mut *tx)
                .await?;
            entries.push(entry);
            position += 1;
        }
        tx.commit().await?;
        Ok(entries)
    }

    pub async fn update_caption(&self, id: Uuid, caption: Option<String>) -> CatalogResult<Entry> {
        let caption = caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if let Some(text) = &caption {
            if text.chars().count() > CAPTION_MAX_LEN {
                return Err(CatalogError::validation(format!(
                    "caption must be at most {} characters",
                    CAPTION_MAX_LEN
                )));
            }
        }

        let sql = format!("UPDATE entries SET caption = ? WHERE id = ? RETURNING {ENTRY_COLUMNS}");
        sqlx::query_as::<_, Entry>(&sql)
            .bind(caption)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or(CatalogError::EntryNotFound(id))
    }

    /// Reorder a folder's entries. `ids` should list every live entry.
    pub async fn reorder(&self, folder_id: Uuid, ids: &[Uuid]) -> CatalogResult<Vec<Entry>> {
        let mut tx = self.db.begin().await?;
        let moved = ordering::reorder(&mut tx, folder_id, ids).await?;
        let entries = ordering::folder_entries(&mut tx, folder_id).await?;
        tx.commit().await?;

        if entries.len() != ids.len() {
            warn!(
                "folder {} reordered with {} of {} entries listed",
                folder_id,
                ids.len(),
                entries.len()
            );
        }
        info!("reordered folder {} ({} entries moved)", folder_id, moved);
        Ok(entries)
    }

    /// Delete an entry, compact its folder, then drop its payload.
    pub async fn delete(&self, id: Uuid) -> CatalogResult<Entry> {
        let mut tx = self.db.begin().await?;
        let entry = ordering::delete_and_compact(&mut tx, id).await?;
        tx.commit().await?;

        self.images.remove(&entry.image_path).await;
        info!("deleted entry {} from folder {}", entry.id, entry.folder_id);
        Ok(entry)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        models::entry::Placement,
        services::{
            folder_service::{
                FolderService,
                tests::{file_backed_service, form, service as folder_service},
            },
            image_store::tests::{one_chunk, png_bytes},
        },
    };

    pub(crate) fn entry_service(folders: &FolderService, root: &std::path::Path) -> EntryService {
        EntryService::new(folders.db.clone(), ImageStore::new(root))
    }

    pub(crate) async fn upload(svc: &EntryService, folder_id: Uuid, count: usize) -> Vec<Entry> {
        let mut staged = Vec::new();
        for _ in 0..count {
            staged.push(svc.stage(one_chunk(png_bytes(400, 200))).await.unwrap());
        }
        svc.append(folder_id, staged).await.unwrap()
    }

    #[tokio::test]
    async fn batches_append_after_last_entry() {
        let (folders, dir) = folder_service().await;
        let svc = entry_service(&folders, dir.path());
        let folder = folders.create(form("Album", None)).await.unwrap();

        let first = upload(&svc, folder.id, 2).await;
        let second = upload(&svc, folder.id, 2).await;
        let got: Vec<_> = first
            .iter()
            .chain(second.iter())
            .map(|e| (e.position, e.status))
            .collect();
        assert_eq!(
            got,
            vec![
                (Placement::Positioned(1), EntryStatus::Uploaded),
                (Placement::Positioned(2), EntryStatus::Uploaded),
                (Placement::Positioned(3), EntryStatus::Uploaded),
                (Placement::Positioned(4), EntryStatus::Uploaded),
            ]
        );
    }

    #[tokio::test]
    async fn append_to_missing_folder_discards_payloads() {
        let (folders, dir) = folder_service().await;
        let svc = entry_service(&folders, dir.path());
        let staged = svc.stage(one_chunk(png_bytes(20, 20))).await.unwrap();
        let path = svc.images.absolute(&staged.image.path).unwrap();
        assert!(path.exists());

        let err = svc.append(Uuid::new_v4(), vec![staged]).await.unwrap_err();
        assert!(matches!(err, CatalogError::FolderNotFound(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn delete_compacts_and_removes_payload() {
        let (folders, dir) = folder_service().await;
        let svc = entry_service(&folders, dir.path());
        let folder = folders.create(form("Album", None)).await.unwrap();
        let entries = upload(&svc, folder.id, 3).await;
        let path = svc.images.absolute(&entries[0].image_path).unwrap();

        svc.delete(entries[0].id).await.unwrap();
        assert!(!path.exists());

        let left: Vec<_> = svc
            .folder_entries(folder.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.id, e.position))
            .collect();
        assert_eq!(
            left,
            vec![
                (entries[1].id, Placement::Positioned(1)),
                (entries[2].id, Placement::Positioned(2)),
            ]
        );
        assert!(matches!(
            svc.delete(entries[0].id).await.unwrap_err(),
            CatalogError::EntryNotFound(_)
        ));
    }

    #[tokio::test]
    async fn detail_links_neighbours() {
        let (folders, dir) = folder_service().await;
        let svc = entry_service(&folders, dir.path());
        let folder = folders.create(form("Album", None)).await.unwrap();
        let e = upload(&svc, folder.id, 3).await;

        let middle = svc.detail(e[1].id).await.unwrap();
        assert_eq!(middle.previous, Some(e[0].id));
        assert_eq!(middle.next, Some(e[2].id));

        let first = svc.detail(e[0].id).await.unwrap();
        assert_eq!(first.previous, None);

        let reordered = svc.reorder(folder.id, &[e[2].id, e[0].id, e[1].id]).await.unwrap();
        assert_eq!(reordered[0].id, e[2].id);
        let first = svc.detail(e[2].id).await.unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.next, Some(e[0].id));
    }

    #[tokio::test]
    async fn caption_is_trimmed_and_bounded() {
        let (folders, dir) = folder_service().await;
        let svc = entry_service(&folders, dir.path());
        let folder = folders.create(form("Album", None)).await.unwrap();
        let e = upload(&svc, folder.id, 1).await;

        let updated = svc
            .update_caption(e[0].id, Some("  sunset over the lake ".into()))
            .await
            .unwrap();
        assert_eq!(updated.caption.as_deref(), Some("sunset over the lake"));

        let err = svc
            .update_caption(e[0].id, Some("y".repeat(201)))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let cleared = svc.update_caption(e[0].id, Some("   ".into())).await.unwrap();
        assert_eq!(cleared.caption, None);
    }

    #[tokio::test]
    async fn truncated_upload_is_not_staged() {
        let (folders, dir) = folder_service().await;
        let svc = entry_service(&folders, dir.path());

        let err = svc
            .stage(one_chunk(png_bytes(400, 200).slice(0..60)))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Image(_)), "{err:?}");
    }

    fn positions(entries: &[Entry]) -> Vec<Placement> {
        entries.iter().map(|e| e.position).collect()
    }

    #[tokio::test]
    async fn concurrent_reorders_keep_positions_dense() {
        let (folders, dir) = file_backed_service().await;
        let svc = entry_service(&folders, dir.path());
        let folder = folders.create(form("Album", None)).await.unwrap();
        let ids: Vec<Uuid> = upload(&svc, folder.id, 3)
            .await
            .into_iter()
            .map(|e| e.id)
            .collect();
        let reversed: Vec<Uuid> = ids.iter().rev().copied().collect();
        let rotated = vec![ids[1], ids[2], ids[0]];

        let (a, b) = tokio::join!(
            svc.reorder(folder.id, &reversed),
            svc.reorder(folder.id, &rotated)
        );
        a.unwrap();
        b.unwrap();

        let after = svc.folder_entries(folder.id).await.unwrap();
        assert_eq!(
            positions(&after),
            vec![
                Placement::Positioned(1),
                Placement::Positioned(2),
                Placement::Positioned(3),
            ]
        );
        let order: Vec<Uuid> = after.iter().map(|e| e.id).collect();
        assert!(order == reversed || order == rotated, "{order:?}");
    }

    #[tokio::test]
    async fn concurrent_deletes_compact_once_each() {
        let (folders, dir) = file_backed_service().await;
        let svc = entry_service(&folders, dir.path());
        let folder = folders.create(form("Album", None)).await.unwrap();
        let entries = upload(&svc, folder.id, 3).await;

        let (a, b) = tokio::join!(svc.delete(entries[0].id), svc.delete(entries[2].id));
        a.unwrap();
        b.unwrap();

        let after = svc.folder_entries(folder.id).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, entries[1].id);
        assert_eq!(positions(&after), vec![Placement::Positioned(1)]);
    }

    #[tokio::test]
    async fn folder_delete_cascades_to_entries() {
        let (folders, dir) = folder_service().await;
        let svc = entry_service(&folders, dir.path());
        let parent = folders.create(form("Parent", None)).await.unwrap();
        let child = folders.create(form("Child", Some(parent.id))).await.unwrap();
        let entries = upload(&svc, child.id, 2).await;
        let path = svc.images.absolute(&entries[0].image_path).unwrap();

        let deleted = folders.delete(parent.id).await.unwrap();
        assert_eq!(deleted.folders, 2);
        assert_eq!(deleted.entries, 2);
        assert!(!path.exists());
        assert!(matches!(
            svc.get(entries[1].id).await.unwrap_err(),
            CatalogError::EntryNotFound(_)
        ));
    }
}
