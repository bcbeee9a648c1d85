//! Represents an entry (image) stored in a folder, and its sync lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Maximum caption length, in characters.
pub const CAPTION_MAX_LEN: usize = 200;

/// A single media item owned by exactly one folder.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct Entry {
    pub id: Uuid,

    /// Owning folder.
    pub folder_id: Uuid,

    /// 1-based rank among the folder's live entries.
    #[sqlx(try_from = "Option<i64>")]
    pub position: Placement,

    /// Payload location, relative to the image store root.
    pub image_path: String,

    pub caption: Option<String>,

    pub status: EntryStatus,

    pub created_at: DateTime<Utc>,
}

/// Where an entry sits in its folder's ordering.
///
/// `Unpositioned` only exists transiently; positioned entries sort first.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum Placement {
    Positioned(u32),
    Unpositioned,
}

impl Placement {
    pub fn get(self) -> Option<u32> {
        match self {
            Placement::Positioned(at) => Some(at),
            Placement::Unpositioned => None,
        }
    }

    /// Database representation (`NULL` when unpositioned).
    pub fn as_i64(self) -> Option<i64> {
        self.get().map(i64::from)
    }
}

impl From<Option<i64>> for Placement {
    fn from(value: Option<i64>) -> Self {
        match value.and_then(|v| u32::try_from(v).ok()) {
            Some(at) if at >= 1 => Placement::Positioned(at),
            _ => Placement::Unpositioned,
        }
    }
}

impl From<Option<u32>> for Placement {
    fn from(value: Option<u32>) -> Self {
        Placement::from(value.map(i64::from))
    }
}

impl From<Placement> for Option<u32> {
    fn from(value: Placement) -> Self {
        value.get()
    }
}

/// Sync lifecycle state of an entry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    /// On the server, not yet seen by the remote client.
    #[default]
    Uploaded,
    /// The client holds the payload; the server copy has been shrunk.
    Downloaded,
    /// The client has been asked to send the payload back.
    Requested,
    /// The client pushed a replacement payload.
    Restored,
    /// A viewer acknowledged the restored payload; the client may drop its copy.
    Killed,
}

impl EntryStatus {
    #[cfg(test)]
    pub const ALL: [EntryStatus; 5] = [
        EntryStatus::Uploaded,
        EntryStatus::Downloaded,
        EntryStatus::Requested,
        EntryStatus::Restored,
        EntryStatus::Killed,
    ];

    /// States the remote client polls for in the status feed.
    pub const FEED: [EntryStatus; 3] = [
        EntryStatus::Uploaded,
        EntryStatus::Requested,
        EntryStatus::Killed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Uploaded => "UPLOADED",
            EntryStatus::Downloaded => "DOWNLOADED",
            EntryStatus::Requested => "REQUESTED",
            EntryStatus::Restored => "RESTORED",
            EntryStatus::Killed => "KILLED",
        }
    }

    /// Apply a sync event, returning the next state.
    pub fn apply(self, event: SyncEvent) -> Result<EntryStatus, TransitionRejected> {
        if event.sources().contains(&self) {
            Ok(event.target())
        } else {
            Err(TransitionRejected {
                from: self,
                event,
            })
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Triggers that move an entry through its lifecycle.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncEvent {
    /// The client saved the payload locally and acknowledges the download.
    DownloadAcknowledged,
    /// Someone opened the entry's status view.
    StatusViewed,
    /// The client pushed a replacement payload.
    RestoreReceived,
    /// A viewer opened the entry detail.
    DetailViewed,
}

impl SyncEvent {
    /// States this event is valid from.
    pub fn sources(self) -> &'static [EntryStatus] {
        match self {
            SyncEvent::DownloadAcknowledged => &[EntryStatus::Uploaded, EntryStatus::Killed],
            SyncEvent::StatusViewed => &[EntryStatus::Downloaded],
            SyncEvent::RestoreReceived => &[EntryStatus::Requested],
            SyncEvent::DetailViewed => &[EntryStatus::Restored],
        }
    }

    pub fn target(self) -> EntryStatus {
        match self {
            SyncEvent::DownloadAcknowledged => EntryStatus::Downloaded,
            SyncEvent::StatusViewed => EntryStatus::Requested,
            SyncEvent::RestoreReceived => EntryStatus::Restored,
            SyncEvent::DetailViewed => EntryStatus::Killed,
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncEvent::DownloadAcknowledged => "download acknowledgment",
            SyncEvent::StatusViewed => "status view",
            SyncEvent::RestoreReceived => "restore",
            SyncEvent::DetailViewed => "detail view",
        };
        f.write_str(name)
    }
}

/// A sync event that is not valid from the entry's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRejected {
    pub from: EntryStatus,
    pub event: SyncEvent,
}
