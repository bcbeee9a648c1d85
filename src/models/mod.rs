//! Core data models for the media-folder catalog.
//!
//! These entities map cleanly to database tables via `sqlx::FromRow` and
//! serialize naturally as JSON via `serde`.

pub mod entry;
pub mod folder;
