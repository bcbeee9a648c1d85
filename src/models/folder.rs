//! Represents a folder, a node in the catalog's folder tree.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Maximum folder name length, in characters.
pub const FOLDER_NAME_MAX_LEN: usize = 50;

/// A folder in the catalog tree.
///
/// Folders nest through `parent_id`; root folders have no parent. Names are
/// unique among siblings and, separately, among root folders.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Folder {
    /// Unique identifier, immutable once created.
    pub id: Uuid,

    /// Parent folder, `None` for root folders.
    pub parent_id: Option<Uuid>,

    /// Display name (at most 50 characters).
    pub name: String,

    /// Optional free-text description, searchable.
    pub description: Option<String>,

    /// Optional calendar date the folder refers to.
    pub date: Option<NaiveDate>,

    /// Latitude of the folder location, if geolocated.
    pub latitude: Option<f64>,

    /// Longitude of the folder location, if geolocated.
    pub longitude: Option<f64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Folder {
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Sort key among siblings: dated folders first by date, then by name.
    pub fn sibling_key(&self) -> (bool, Option<NaiveDate>, &str) {
        (self.date.is_none(), self.date, self.name.as_str())
    }
}

/// A point location.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Writable folder attributes, as submitted on create and update.
///
/// `address` is not stored: when present it is geocoded into the folder
/// location on a best-effort basis.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct FolderForm {
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub address: Option<String>,
}

/// A folder annotated with its depth in a traversal and its live entry count.
#[derive(Serialize, Clone, Debug)]
pub struct FolderNode {
    #[serde(flatten)]
    pub folder: Folder,
    pub depth: u32,
    pub entry_count: i64,
}
