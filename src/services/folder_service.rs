//! FolderService: the folder tree store.
//!
//! Folders live in SQLite. Sibling names are unique per parent and root names
//! are unique among roots (two separate unique indexes). Depth is never
//! stored: traversals compute it, so every query sees the current shape of
//! the tree at a cost proportional to the tree size.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::folder::{FOLDER_NAME_MAX_LEN, Folder, FolderForm, FolderNode, GeoPoint},
    services::{
        geocoder::{self, Geocoder},
        image_store::ImageStore,
    },
};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

const FOLDER_COLUMNS: &str = "id, parent_id, name, description, date, latitude, longitude, \
                              created_at, updated_at";

/// Length of the random suffix appended by [`NameConflictPolicy::Rename`].
const RENAME_SUFFIX_LEN: usize = 7;
const RENAME_ATTEMPTS: usize = 5;

/// What to do when a folder write collides with an existing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameConflictPolicy {
    /// Fail the write with `DuplicateName`.
    #[default]
    Reject,
    /// Append `_` and a random suffix to the name and retry.
    Rename,
}

/// Summary of a cascade delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeletedFolder {
    pub parent_id: Option<Uuid>,
    pub folders: usize,
    pub entries: usize,
}

#[derive(Clone, Copy)]
enum FolderWrite {
    Insert,
    Update,
}

#[derive(Clone)]
pub struct FolderService {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
    images: ImageStore,
    geocoder: Arc<dyn Geocoder>,
    geocode_timeout: Duration,
    policy: NameConflictPolicy,
}

impl FolderService {
    pub fn new(
        db: Arc<SqlitePool>,
        images: ImageStore,
        geocoder: Arc<dyn Geocoder>,
        geocode_timeout: Duration,
        policy: NameConflictPolicy,
    ) -> Self {
        Self {
            db,
            images,
            geocoder,
            geocode_timeout,
            policy,
        }
    }

    pub async fn get(&self, id: Uuid) -> CatalogResult<Folder> {
        fetch_folder(&mut *self.db.acquire().await?, id).await
    }

    /// All folders, ordered by parent then sibling order.
    pub async fn list(&self) -> CatalogResult<Vec<Folder>> {
        let mut folders = load_folders(&mut *self.db.acquire().await?).await?;
        folders.sort_by(|a, b| {
            a.parent_id
                .cmp(&b.parent_id)
                .then_with(|| a.sibling_key().cmp(&b.sibling_key()))
        });
        Ok(folders)
    }

    /// Folders carrying a date, newest first.
    pub async fn dated(&self) -> CatalogResult<Vec<Folder>> {
        let sql = format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE date IS NOT NULL ORDER BY date DESC, name"
        );
        Ok(sqlx::query_as::<_, Folder>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Folders carrying a location.
    pub async fn located(&self) -> CatalogResult<Vec<Folder>> {
        let sql = format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE latitude IS NOT NULL AND longitude IS NOT NULL ORDER BY name"
        );
        Ok(sqlx::query_as::<_, Folder>(&sql)
            .fetch_all(&*self.db)
            .await?)
    }

    /// Direct children of a folder in sibling order.
    pub async fn children_of(&self, id: Uuid) -> CatalogResult<Vec<Folder>> {
        let mut conn = self.db.acquire().await?;
        fetch_folder(&mut conn, id).await?;
        let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE parent_id = ?");
        let mut children = sqlx::query_as::<_, Folder>(&sql)
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        children.sort_by(|a, b| a.sibling_key().cmp(&b.sibling_key()));
        Ok(children)
    }

    /// Every folder, depth-first, roots at depth 0.
    pub async fn tree(&self) -> CatalogResult<Vec<FolderNode>> {
        let mut conn = self.db.acquire().await?;
        let folders = load_folders(&mut conn).await?;
        let counts = entry_counts(&mut conn).await?;
        Ok(depth_first(folders, None, 0, &counts))
    }

    /// Descendants of a folder (excluding itself), depth-first, children at depth 1.
    pub async fn descendants_of(&self, id: Uuid) -> CatalogResult<Vec<FolderNode>> {
        let mut conn = self.db.acquire().await?;
        fetch_folder(&mut conn, id).await?;
        let folders = load_folders(&mut conn).await?;
        let counts = entry_counts(&mut conn).await?;
        Ok(depth_first(folders, Some(id), 1, &counts))
    }

    /// Create a folder.
    ///
    /// When the form carries an address it is geocoded first (best-effort).
    pub async fn create(&self, form: FolderForm) -> CatalogResult<Folder> {
        let (name, description) = validate_form(&form)?;
        let location = self.locate(form.address.as_deref()).await;

        let now = Utc::now();
        let mut folder = Folder {
            id: Uuid::new_v4(),
            parent_id: form.parent_id,
            name,
            description,
            date: form.date,
            latitude: location.map(|p| p.latitude),
            longitude: location.map(|p| p.longitude),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;
        if let Some(parent_id) = folder.parent_id {
            ensure_parent_exists(&mut tx, parent_id).await?;
        }
        write_folder(&mut tx, &mut folder, FolderWrite::Insert, self.policy).await?;
        tx.commit().await?;

        info!("created folder {} `{}`", folder.id, folder.name);
        Ok(folder)
    }

    /// Update a folder in place. The location is replaced only when the form
    /// carries an address that geocodes.
    pub async fn update(&self, id: Uuid, form: FolderForm) -> CatalogResult<Folder> {
        let (name, description) = validate_form(&form)?;
        let location = self.locate(form.address.as_deref()).await;

        let mut tx = self.db.begin().await?;
        let mut folder = fetch_folder(&mut tx, id).await?;
        if let Some(parent_id) = form.parent_id {
            if folder.parent_id != Some(parent_id) {
                ensure_parent_exists(&mut tx, parent_id).await?;
                ensure_not_descendant(&mut tx, id, parent_id).await?;
            }
        }

        folder.parent_id = form.parent_id;
        folder.name = name;
        folder.description = description;
        folder.date = form.date;
        if let Some(point) = location {
            folder.latitude = Some(point.latitude);
            folder.longitude = Some(point.longitude);
        }
        folder.updated_at = Utc::now();

        write_folder(&mut tx, &mut folder, FolderWrite::Update, self.policy).await?;
        tx.commit().await?;

        info!("updated folder {} `{}`", folder.id, folder.name);
        Ok(folder)
    }

    /// Delete a folder, its descendants, and every entry they own.
    ///
    /// Runs as a post-order traversal (leaves before ancestors) inside one
    /// transaction. Image files are removed after commit, best-effort.
    pub async fn delete(&self, id: Uuid) -> CatalogResult<DeletedFolder> {
        let mut tx = self.db.begin().await?;
        let folder = fetch_folder(&mut tx, id).await?;
        let all = load_folders(&mut tx).await?;
        let doomed = post_order(&all, id);

        let mut image_paths = Vec::new();
        for folder_id in &doomed {
            let paths: Vec<String> =
                sqlx::query_scalar("DELETE FROM entries WHERE folder_id = ? RETURNING image_path")
                    .bind(folder_id)
                    .fetch_all(&mut *tx)
                    .await?;
            image_paths.extend(paths);
            sqlx::query("DELETE FROM folders WHERE id = ?")
                .bind(folder_id)
                .execute(&mut *tx)
                .await?;
            debug!("deleted folder {}", folder_id);
        }
        tx.commit().await?;

        for path in &image_paths {
            self.images.remove(path).await;
        }

        info!(
            "deleted folder {} `{}` with {} folders and {} entries",
            folder.id,
            folder.name,
            doomed.len(),
            image_paths.len()
        );
        Ok(DeletedFolder {
            parent_id: folder.parent_id,
            folders: doomed.len(),
            entries: image_paths.len(),
        })
    }

    async fn locate(&self, address: Option<&str>) -> Option<GeoPoint> {
        let address = address.map(str::trim).filter(|a| !a.is_empty())?;
        geocoder::locate(self.geocoder.as_ref(), address, self.geocode_timeout).await
    }
}

pub(crate) async fn fetch_folder(conn: &mut SqliteConnection, id: Uuid) -> CatalogResult<Folder> {
    let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?");
    sqlx::query_as::<_, Folder>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or(CatalogError::FolderNotFound(id))
}

async fn load_folders(conn: &mut SqliteConnection) -> CatalogResult<Vec<Folder>> {
    let sql = format!("SELECT {FOLDER_COLUMNS} FROM folders");
    Ok(sqlx::query_as::<_, Folder>(&sql).fetch_all(conn).await?)
}

async fn entry_counts(conn: &mut SqliteConnection) -> CatalogResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Uuid, i64)> =
        sqlx::query_as("SELECT folder_id, COUNT(*) FROM entries GROUP BY folder_id")
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().collect())
}

async fn ensure_parent_exists(conn: &mut SqliteConnection, parent_id: Uuid) -> CatalogResult<()> {
    match fetch_folder(conn, parent_id).await {
        Ok(_) => Ok(()),
        Err(CatalogError::FolderNotFound(_)) => Err(CatalogError::validation(format!(
            "parent folder `{}` does not exist",
            parent_id
        ))),
        Err(err) => Err(err),
    }
}

/// Reject `parent_id` when it is `id` itself or one of its descendants.
async fn ensure_not_descendant(
    conn: &mut SqliteConnection,
    id: Uuid,
    parent_id: Uuid,
) -> CatalogResult<()> {
    let mut cursor = Some(parent_id);
    while let Some(current) = cursor {
        if current == id {
            return Err(CatalogError::validation(
                "a folder cannot be moved inside itself or its descendants",
            ));
        }
        cursor = sqlx::query_scalar::<_, Option<Uuid>>("SELECT parent_id FROM folders WHERE id = ?")
            .bind(current)
            .fetch_optional(&mut *conn)
            .await?
            .flatten();
    }
    Ok(())
}

/// Insert or update a folder row, resolving name collisions per `policy`.
///
/// A failed statement inside a SQLite transaction only rolls back itself, so
/// retrying with a new name inside the same transaction is safe.
async fn write_folder(
    conn: &mut SqliteConnection,
    folder: &mut Folder,
    mode: FolderWrite,
    policy: NameConflictPolicy,
) -> CatalogResult<()> {
    let base = folder.name.clone();
    let mut attempt = 0;
    loop {
        let result = match mode {
            FolderWrite::Insert => {
                sqlx::query(
                    "INSERT INTO folders (id, parent_id, name, description, date, latitude,
                                          longitude, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(folder.id)
                .bind(folder.parent_id)
                .bind(&folder.name)
                .bind(&folder.description)
                .bind(folder.date)
                .bind(folder.latitude)
                .bind(folder.longitude)
                .bind(folder.created_at)
                .bind(folder.updated_at)
                .execute(&mut *conn)
                .await
            }
            FolderWrite::Update => {
                sqlx::query(
                    "UPDATE folders SET parent_id = ?, name = ?, description = ?, date = ?,
                                        latitude = ?, longitude = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(folder.parent_id)
                .bind(&folder.name)
                .bind(&folder.description)
                .bind(folder.date)
                .bind(folder.latitude)
                .bind(folder.longitude)
                .bind(folder.updated_at)
                .bind(folder.id)
                .execute(&mut *conn)
                .await
            }
        };

        match result {
            Ok(_) => return Ok(()),
            Err(err) if is_unique_violation(&err) => {
                attempt += 1;
                if policy == NameConflictPolicy::Reject || attempt > RENAME_ATTEMPTS {
                    return Err(CatalogError::DuplicateName { name: base });
                }
                folder.name = suffixed_name(&base);
                warn!("folder name `{}` taken, retrying as `{}`", base, folder.name);
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Trimmed name and description, checked against the column limits.
fn validate_form(form: &FolderForm) -> CatalogResult<(String, Option<String>)> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(CatalogError::validation("folder name cannot be empty"));
    }
    if name.chars().count() > FOLDER_NAME_MAX_LEN {
        return Err(CatalogError::validation(format!(
            "folder name must be at most {} characters",
            FOLDER_NAME_MAX_LEN
        )));
    }
    let description = form
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    Ok((name.to_string(), description))
}

/// `base` plus `_` and a random alphanumeric suffix, still within the name limit.
fn suffixed_name(base: &str) -> String {
    let keep = FOLDER_NAME_MAX_LEN - RENAME_SUFFIX_LEN - 1;
    let stem: String = base.chars().take(keep).collect();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RENAME_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}_{}", stem, suffix)
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

fn children_index(folders: Vec<Folder>) -> HashMap<Option<Uuid>, Vec<Folder>> {
    let mut children: HashMap<Option<Uuid>, Vec<Folder>> = HashMap::new();
    for folder in folders {
        children.entry(folder.parent_id).or_default().push(folder);
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| a.sibling_key().cmp(&b.sibling_key()));
    }
    children
}

/// Depth-first walk below `start` (`None` walks from the roots).
fn depth_first(
    folders: Vec<Folder>,
    start: Option<Uuid>,
    base_depth: u32,
    counts: &HashMap<Uuid, i64>,
) -> Vec<FolderNode> {
    let mut children = children_index(folders);
    let mut out = Vec::new();
    let mut stack: Vec<(Folder, u32)> = Vec::new();

    let push_children = |stack: &mut Vec<(Folder, u32)>,
                         children: &mut HashMap<Option<Uuid>, Vec<Folder>>,
                         parent: Option<Uuid>,
                         depth: u32| {
        if let Some(siblings) = children.remove(&parent) {
            stack.extend(siblings.into_iter().rev().map(|f| (f, depth)));
        }
    };

    push_children(&mut stack, &mut children, start, base_depth);
    while let Some((folder, depth)) = stack.pop() {
        push_children(&mut stack, &mut children, Some(folder.id), depth + 1);
        let entry_count = counts.get(&folder.id).copied().unwrap_or(0);
        out.push(FolderNode {
            folder,
            depth,
            entry_count,
        });
    }
    out
}

/// Ids of `root` and its descendants, every folder after all of its children.
fn post_order(folders: &[Folder], root: Uuid) -> Vec<Uuid> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for folder in folders {
        if let Some(parent) = folder.parent_id {
            children.entry(parent).or_default().push(folder.id);
        }
    }

    let mut out = Vec::new();
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            out.push(id);
            continue;
        }
        stack.push((id, true));
        if let Some(kids) = children.get(&id) {
            stack.extend(kids.iter().map(|kid| (*kid, false)));
        }
    }
    out
}
