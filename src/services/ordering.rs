//! Entry ordering engine.
//!
//! Live entries of a folder carry the dense positions `1..=N`. Every
//! structural change (append, reorder, delete) runs on a transaction whose
//! first statement is a write, so SQLite's write lock serializes concurrent
//! changes before anything is read.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::entry::{Entry, Placement},
};
use chrono::Utc;
use sqlx::SqliteConnection;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

pub const ENTRY_COLUMNS: &str = "id, folder_id, position, image_path, caption, status, created_at";

/// Default entry order: position ascending, unpositioned last, then id.
pub const ENTRY_ORDER: &str = "position IS NULL, position, id";

/// Take the folder's write lock by touching its row.
pub async fn lock_folder(conn: &mut SqliteConnection, folder_id: Uuid) -> CatalogResult<()> {
    let result = sqlx::query("UPDATE folders SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(folder_id)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(CatalogError::FolderNotFound(folder_id));
    }
    Ok(())
}

/// Position a new entry appended to the folder receives.
pub async fn next_position(conn: &mut SqliteConnection, folder_id: Uuid) -> CatalogResult<u32> {
    let last: Option<i64> =
        sqlx::query_scalar("SELECT MAX(position) FROM entries WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_one(conn)
            .await?;
    match Placement::from(last) {
        Placement::Positioned(at) => Ok(at + 1),
        Placement::Unpositioned => Ok(1),
    }
}

/// Entries of a folder in default order.
pub async fn folder_entries(
    conn: &mut SqliteConnection,
    folder_id: Uuid,
) -> CatalogResult<Vec<Entry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE folder_id = ? ORDER BY {ENTRY_ORDER}"
    );
    Ok(sqlx::query_as::<_, Entry>(&sql)
        .bind(folder_id)
        .fetch_all(conn)
        .await?)
}

/// Compute the position writes needed to put `ids` in listed order.
///
/// Each listed id gets `index + 1`; ids already there are skipped, unlisted
/// entries are left alone. Ids must be unique and belong to the folder.
pub fn plan_reorder(
    current: &[(Uuid, Placement)],
    ids: &[Uuid],
) -> CatalogResult<Vec<(Uuid, u32)>> {
    let placements: HashMap<Uuid, Placement> = current.iter().copied().collect();
    let mut seen = HashSet::with_capacity(ids.len());
    let mut writes = Vec::new();

    for (index, id) in ids.iter().enumerate() {
        if !seen.insert(*id) {
            return Err(CatalogError::validation(format!(
                "entry `{}` listed more than once",
                id
            )));
        }
        let placement = placements
            .get(id)
            .ok_or(CatalogError::EntryNotFound(*id))?;
        let target = u32::try_from(index + 1)
            .map_err(|_| CatalogError::validation("too many entries"))?;
        if *placement != Placement::Positioned(target) {
            writes.push((*id, target));
        }
    }
    Ok(writes)
}

/// Reorder a folder's entries. Returns how many rows were written.
pub async fn reorder(
    conn: &mut SqliteConnection,
    folder_id: Uuid,
    ids: &[Uuid],
) -> CatalogResult<usize> {
    lock_folder(conn, folder_id).await?;

    let current: Vec<(Uuid, Option<i64>)> =
        sqlx::query_as("SELECT id, position FROM entries WHERE folder_id = ?")
            .bind(folder_id)
            .fetch_all(&mut *conn)
            .await?;
    let current: Vec<(Uuid, Placement)> = current
        .into_iter()
        .map(|(id, position)| (id, Placement::from(position)))
        .collect();

    let writes = plan_reorder(&current, ids)?;
    for (id, position) in &writes {
        sqlx::query("UPDATE entries SET position = ? WHERE id = ?")
            .bind(i64::from(*position))
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    debug!(
        "reordered folder {}: {} of {} entries moved",
        folder_id,
        writes.len(),
        ids.len()
    );
    Ok(writes.len())
}

/// Delete an entry and close the gap it leaves behind.
pub async fn delete_and_compact(
    conn: &mut SqliteConnection,
    entry_id: Uuid,
) -> CatalogResult<Entry> {
    let sql = format!("DELETE FROM entries WHERE id = ? RETURNING {ENTRY_COLUMNS}");
    let entry = sqlx::query_as::<_, Entry>(&sql)
        .bind(entry_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(CatalogError::EntryNotFound(entry_id))?;

    if let Some(position) = entry.position.as_i64() {
        let shifted = sqlx::query(
            "UPDATE entries SET position = position - 1 WHERE folder_id = ? AND position > ?",
        )
        .bind(entry.folder_id)
        .bind(position)
        .execute(&mut *conn)
        .await?;
        debug!(
            "compacted folder {} after removing position {}: {} entries shifted",
            entry.folder_id,
            position,
            shifted.rows_affected()
        );
    }
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::memory_pool, models::entry::EntryStatus};
    use sqlx::SqlitePool;

    async fn seed_folder(pool: &SqlitePool) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO folders (id, name, created_at, updated_at) VALUES (?, 'F', ?, ?)",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        id
    }

    async fn append(pool: &SqlitePool, folder_id: Uuid) -> Uuid {
        let mut tx = pool.begin().await.unwrap();
        lock_folder(&mut tx, folder_id).await.unwrap();
        let position = next_position(&mut tx, folder_id).await.unwrap();
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO entries (id, folder_id, position, image_path, status, created_at)
             VALUES (?, ?, ?, 'x.png', ?, ?)",
        )
        .bind(id)
        .bind(folder_id)
        .bind(i64::from(position))
        .bind(EntryStatus::Uploaded)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .unwrap();
        tx.commit().await.unwrap();
        id
    }

    async fn positions(pool: &SqlitePool, folder_id: Uuid) -> Vec<(Uuid, Option<u32>)> {
        let mut conn = pool.acquire().await.unwrap();
        folder_entries(&mut conn, folder_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.id, e.position.get()))
            .collect()
    }

    fn assert_dense(entries: &[(Uuid, Option<u32>)]) {
        let mut got: Vec<u32> = entries.iter().filter_map(|(_, p)| *p).collect();
        got.sort_unstable();
        let expected: Vec<u32> = (1..=entries.len() as u32).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn append_reorder_delete_scenario() {
        let pool = memory_pool().await;
        let folder = seed_folder(&pool).await;
        let id1 = append(&pool, folder).await;
        let id2 = append(&pool, folder).await;
        let id3 = append(&pool, folder).await;
        assert_eq!(
            positions(&pool, folder).await,
            vec![(id1, Some(1)), (id2, Some(2)), (id3, Some(3))]
        );

        let mut tx = pool.begin().await.unwrap();
        let moved = reorder(&mut tx, folder, &[id3, id1, id2]).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(moved, 3);
        assert_eq!(
            positions(&pool, folder).await,
            vec![(id3, Some(1)), (id1, Some(2)), (id2, Some(3))]
        );

        let mut tx = pool.begin().await.unwrap();
        let deleted = delete_and_compact(&mut tx, id3).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(deleted.id, id3);
        assert_eq!(
            positions(&pool, folder).await,
            vec![(id1, Some(1)), (id2, Some(2))]
        );
    }

    #[tokio::test]
    async fn delete_in_middle_shifts_followers() {
        let pool = memory_pool().await;
        let folder = seed_folder(&pool).await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(append(&pool, folder).await);
        }

        let mut tx = pool.begin().await.unwrap();
        delete_and_compact(&mut tx, ids[1]).await.unwrap();
        tx.commit().await.unwrap();

        let after = positions(&pool, folder).await;
        assert_dense(&after);
        assert_eq!(
            after,
            vec![
                (ids[0], Some(1)),
                (ids[2], Some(2)),
                (ids[3], Some(3)),
                (ids[4], Some(4)),
            ]
        );
        assert_eq!(next_position(&mut pool.acquire().await.unwrap(), folder).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn mixed_sequence_stays_dense() {
        let pool = memory_pool().await;
        let folder = seed_folder(&pool).await;
        let mut ids = Vec::new();
        for round in 0..4 {
            for _ in 0..3 {
                ids.push(append(&pool, folder).await);
            }
            ids.reverse();
            let mut tx = pool.begin().await.unwrap();
            reorder(&mut tx, folder, &ids).await.unwrap();
            let victim = ids.remove(round % ids.len());
            delete_and_compact(&mut tx, victim).await.unwrap();
            tx.commit().await.unwrap();

            let now = positions(&pool, folder).await;
            assert_eq!(now.len(), ids.len());
            assert_dense(&now);
        }
    }

    #[tokio::test]
    async fn reorder_rejects_foreign_and_duplicate_ids() {
        let pool = memory_pool().await;
        let folder = seed_folder(&pool).await;
        let other = seed_folder_named(&pool, "G").await;
        let a = append(&pool, folder).await;
        let stranger = append(&pool, other).await;

        let mut tx = pool.begin().await.unwrap();
        let err = reorder(&mut tx, folder, &[stranger, a]).await.unwrap_err();
        assert!(matches!(err, CatalogError::EntryNotFound(id) if id == stranger));
        let err = reorder(&mut tx, folder, &[a, a]).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        let err = reorder(&mut tx, Uuid::new_v4(), &[a]).await.unwrap_err();
        assert!(matches!(err, CatalogError::FolderNotFound(_)));
    }

    async fn seed_folder_named(pool: &SqlitePool, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO folders (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(Utc::now())
            .bind(Utc::now())
            .execute(pool)
            .await
            .unwrap();
        id
    }

    #[test]
    fn plan_skips_entries_already_in_place() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let current = [
            (a, Placement::Positioned(1)),
            (b, Placement::Positioned(3)),
            (c, Placement::Unpositioned),
        ];
        let writes = plan_reorder(&current, &[a, c, b]).unwrap();
        assert_eq!(writes, vec![(c, 2)]);
    }

    #[test]
    fn empty_list_plans_nothing() {
        assert_eq!(plan_reorder(&[], &[]).unwrap(), vec![]);
    }
}
