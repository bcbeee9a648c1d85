//! Ranked free-text search over folder names/descriptions and entry captions.
//!
//! Ranking is term-density based: the share of a field's words that match a
//! query term, weighted per field and scaled by how many distinct query terms
//! the document covers. Results below [`MIN_RANK`] are treated as noise.

use crate::{
    errors::{CatalogError, CatalogResult},
    models::{entry::Entry, folder::Folder},
    services::ordering::ENTRY_COLUMNS,
};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::BTreeSet, sync::Arc};

pub const MIN_RANK: f64 = 0.01;
pub const QUERY_MAX_LEN: usize = 100;

const NAME_WEIGHT: f64 = 1.0;
const DESCRIPTION_WEIGHT: f64 = 0.5;
const CAPTION_WEIGHT: f64 = 1.0;

#[derive(Debug, Clone, Serialize)]
pub struct Ranked<T> {
    #[serde(flatten)]
    pub item: T,
    pub rank: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub search: String,
    pub folders: Vec<Ranked<Folder>>,
    pub entries: Vec<Ranked<Entry>>,
    pub success: bool,
}

#[derive(Clone)]
pub struct SearchService {
    pub db: Arc<SqlitePool>,
}

impl SearchService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn search(&self, query: &str) -> CatalogResult<SearchResults> {
        let query = query.trim();
        if query.is_empty() || query.chars().count() > QUERY_MAX_LEN {
            return Err(CatalogError::validation(format!(
                "query must be between 1 and {} characters",
                QUERY_MAX_LEN
            )));
        }
        let terms: BTreeSet<String> = tokenize(query).into_iter().collect();
        if terms.is_empty() {
            return Err(CatalogError::validation("query has no searchable words"));
        }

        let folders: Vec<Folder> = sqlx::query_as(
            "SELECT id, parent_id, name, description, date, latitude, longitude,
                    created_at, updated_at
             FROM folders",
        )
        .fetch_all(&*self.db)
        .await?;
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE caption IS NOT NULL");
        let entries: Vec<Entry> = sqlx::query_as(&sql).fetch_all(&*self.db).await?;

        let mut folders: Vec<Ranked<Folder>> = folders
            .into_iter()
            .map(|folder| {
                let rank = rank(
                    &terms,
                    &[
                        (folder.name.as_str(), NAME_WEIGHT),
                        (folder.description.as_deref().unwrap_or(""), DESCRIPTION_WEIGHT),
                    ],
                );
                Ranked { item: folder, rank }
            })
            .filter(|r| r.rank > MIN_RANK)
            .collect();
        folders.sort_by(|a, b| {
            b.rank
                .total_cmp(&a.rank)
                .then_with(|| a.item.name.cmp(&b.item.name))
        });

        let mut entries: Vec<Ranked<Entry>> = entries
            .into_iter()
            .map(|entry| {
                let rank = rank(
                    &terms,
                    &[(entry.caption.as_deref().unwrap_or(""), CAPTION_WEIGHT)],
                );
                Ranked { item: entry, rank }
            })
            .filter(|r| r.rank > MIN_RANK)
            .collect();
        entries.sort_by(|a, b| {
            b.rank
                .total_cmp(&a.rank)
                .then_with(|| a.item.id.cmp(&b.item.id))
        });

        tracing::debug!(
            "search `{}`: {} folders, {} entries",
            query,
            folders.len(),
            entries.len()
        );
        let success = !folders.is_empty() || !entries.is_empty();
        Ok(SearchResults {
            search: query.to_string(),
            folders,
            entries,
            success,
        })
    }
}

/// Lowercased alphanumeric words.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn rank(terms: &BTreeSet<String>, fields: &[(&str, f64)]) -> f64 {
    let mut score = 0.0;
    let mut covered = BTreeSet::new();
    for (text, weight) in fields {
        let words = tokenize(text);
        if words.is_empty() {
            continue;
        }
        let hits = words.iter().filter(|w| terms.contains(*w)).count();
        covered.extend(words.iter().filter(|w| terms.contains(*w)).cloned());
        score += weight * hits as f64 / words.len() as f64;
    }
    score * covered.len() as f64 / terms.len() as f64
}
