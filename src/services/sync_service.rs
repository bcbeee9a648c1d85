//! SyncService: persisted entry lifecycle transitions.
//!
//! Each transition is one conditional `UPDATE ... WHERE status IN (sources)`
//! built from [`SyncEvent::sources`], so two concurrent requests can never
//! both move an entry out of the same state. Work that must accompany a
//! transition is staged before the status commits: a restored payload is
//! written first and swapped in by the transaction, and a shrunk server copy
//! is written beside the original and renamed over it only after commit.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::entry::{Entry, EntryStatus, SyncEvent},
    services::{
        image_store::{ImageStore, THUMBNAIL_MAX_SIDE},
        ordering::ENTRY_COLUMNS,
    },
};
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::{collections::BTreeMap, io, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One item of the status feed polled by the remote client.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeedItem {
    pub url: String,
    pub status: EntryStatus,
}

/// Rows a transition applies to.
#[derive(Clone, Copy)]
enum Scope {
    Entry(Uuid),
    Folder(Uuid),
}

#[derive(Clone)]
pub struct SyncService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    images: ImageStore,
}

impl SyncService {
    pub fn new(db: Arc<SqlitePool>, images: ImageStore) -> Self {
        Self { db, images }
    }

    /// Entries the remote client must act on, keyed by id.
    pub async fn status_feed(&self) -> CatalogResult<BTreeMap<Uuid, FeedItem>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT id, status FROM entries WHERE status IN (");
        let mut statuses = builder.separated(", ");
        for status in EntryStatus::FEED {
            statuses.push_bind(status);
        }
        statuses.push_unseparated(") ORDER BY id");

        let rows: Vec<(Uuid, EntryStatus)> = builder.build_query_as().fetch_all(&*self.db).await?;
        Ok(rows
            .into_iter()
            .map(|(id, status)| {
                (
                    id,
                    FeedItem {
                        url: payload_url(id),
                        status,
                    },
                )
            })
            .collect())
    }

    /// The client saved the payload: mark the entry downloaded and shrink
    /// the server copy.
    ///
    /// Entries outside `UPLOADED`/`KILLED` are reported as missing. A failed
    /// resize rolls the status back; a failed commit leaves the original in
    /// place.
    pub async fn acknowledge_download(&self, id: Uuid) -> CatalogResult<Entry> {
        let event = SyncEvent::DownloadAcknowledged;
        let mut tx = self.db.begin().await?;
        let entry = transition(&mut tx, Scope::Entry(id), event)
            .await?
            .into_iter()
            .next()
            .ok_or(CatalogError::EntryNotFound(id))?;

        let pending = self
            .images
            .prepare_shrink(&entry.image_path, THUMBNAIL_MAX_SIDE)
            .await?;
        if let Err(err) = tx.commit().await {
            self.images.discard_resize(pending).await;
            return Err(err.into());
        }

        match self.images.finish_resize(pending).await {
            Ok((width, height)) => info!(
                "entry {} downloaded by client, server copy now {}x{}",
                id, width, height
            ),
            Err(err) => warn!("entry {} downloaded but its copy was not shrunk: {}", id, err),
        }
        Ok(entry)
    }

    /// Accept a replacement payload from the client for a `REQUESTED` entry.
    ///
    /// The payload is written and validated before the status moves; the old
    /// payload is removed only after the transition commits.
    pub async fn restore<S>(&self, id: Uuid, stream: S) -> CatalogResult<Entry>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        let event = SyncEvent::RestoreReceived;
        let current = current_status(&mut *self.db.acquire().await?, id).await?;
        current
            .apply(event)
            .map_err(|rejected| CatalogError::rejected(id, rejected))?;

        let stored = self.images.store_stream(id, stream).await?;
        match self.swap_payload(id, &stored.path).await {
            Ok((entry, old_path)) => {
                self.images.remove(&old_path).await;
                info!("entry {} restored by client", id);
                Ok(entry)
            }
            Err(err) => {
                self.images.remove(&stored.path).await;
                Err(err)
            }
        }
    }

    async fn swap_payload(&self, id: Uuid, new_path: &str) -> CatalogResult<(Entry, String)> {
        let event = SyncEvent::RestoreReceived;
        let mut tx = self.db.begin().await?;

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE entries SET status = ");
        builder.push_bind(event.target());
        push_scope(&mut builder, Scope::Entry(id), event);
        builder.push(" RETURNING image_path");
        let old_path: Option<String> = builder
            .build_query_scalar()
            .fetch_optional(&mut *tx)
            .await?;

        let Some(old_path) = old_path else {
            // lost a race with another transition
            let current = current_status(&mut tx, id).await?;
            return Err(CatalogError::InvalidTransition {
                id,
                current,
                event,
            });
        };

        let sql =
            format!("UPDATE entries SET image_path = ? WHERE id = ? RETURNING {ENTRY_COLUMNS}");
        let entry = sqlx::query_as::<_, Entry>(&sql)
            .bind(new_path)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok((entry, old_path))
    }

    /// Record a passive view of an entry.
    ///
    /// Viewing only moves the entry when it is in the event's source state;
    /// otherwise it is a no-op. Returns the entry as it stands afterwards.
    pub async fn observe(&self, id: Uuid, event: SyncEvent) -> CatalogResult<Entry> {
        let mut conn = self.db.acquire().await?;
        if let Some(entry) = transition(&mut conn, Scope::Entry(id), event)
            .await?
            .into_iter()
            .next()
        {
            info!("entry {} is now {} after {}", id, entry.status, event);
            return Ok(entry);
        }

        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?");
        sqlx::query_as::<_, Entry>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(CatalogError::EntryNotFound(id))
    }

    /// Ask the client to send back every downloaded entry of a folder.
    pub async fn request_all(&self, folder_id: Uuid) -> CatalogResult<usize> {
        let mut conn = self.db.acquire().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM folders WHERE id = ?")
            .bind(folder_id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(CatalogError::FolderNotFound(folder_id));
        }

        let moved = transition(&mut conn, Scope::Folder(folder_id), SyncEvent::StatusViewed)
            .await?
            .len();
        info!("requested {} entries of folder {}", moved, folder_id);
        Ok(moved)
    }
}

/// Relative URL the client downloads an entry payload from.
pub fn payload_url(id: Uuid) -> String {
    format!("/entries/{}/image", id)
}

async fn current_status(conn: &mut SqliteConnection, id: Uuid) -> CatalogResult<EntryStatus> {
    sqlx::query_scalar("SELECT status FROM entries WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(CatalogError::EntryNotFound(id))
}

fn push_scope(builder: &mut QueryBuilder<'_, Sqlite>, scope: Scope, event: SyncEvent) {
    match scope {
        Scope::Entry(id) => {
            builder.push(" WHERE id = ");
            builder.push_bind(id);
        }
        Scope::Folder(id) => {
            builder.push(" WHERE folder_id = ");
            builder.push_bind(id);
        }
    }
    builder.push(" AND status IN (");
    let mut sources = builder.separated(", ");
    for status in event.sources() {
        sources.push_bind(*status);
    }
    sources.push_unseparated(")");
}

/// Move every row in `scope` that is in one of the event's source states.
async fn transition(
    conn: &mut SqliteConnection,
    scope: Scope,
    event: SyncEvent,
) -> CatalogResult<Vec<Entry>> {
    let mut builder = QueryBuilder::<Sqlite>::new("UPDATE entries SET status = ");
    builder.push_bind(event.target());
    push_scope(&mut builder, scope, event);
    builder.push(" RETURNING ");
    builder.push(ENTRY_COLUMNS);

    let moved: Vec<Entry> = builder.build_query_as().fetch_all(conn).await?;
    debug!("{} moved {} entries to {}", event, moved.len(), event.target());
    Ok(moved)
}
