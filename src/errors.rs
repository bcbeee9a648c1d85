use crate::models::entry::{EntryStatus, SyncEvent, TransitionRejected};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the catalog services.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("folder `{0}` not found")]
    FolderNotFound(Uuid),
    /// Also returned when the entry exists but is outside the operation's
    /// allowed status scope.
    #[error("entry `{0}` not found")]
    EntryNotFound(Uuid),
    #[error("authentication required")]
    Unauthenticated,
    #[error("permission `{0}` required")]
    PermissionDenied(String),
    #[error("a folder named `{name}` already exists here")]
    DuplicateName { name: String },
    #[error("entry `{id}` is {current}; {event} not allowed")]
    InvalidTransition {
        id: Uuid,
        current: EntryStatus,
        event: SyncEvent,
    },
    #[error("{0}")]
    Validation(String),
    #[error("invalid image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CatalogError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CatalogError::Validation(msg.into())
    }

    pub fn rejected(id: Uuid, rejected: TransitionRejected) -> Self {
        CatalogError::InvalidTransition {
            id,
            current: rejected.from,
            event: rejected.event,
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        let status = match &err {
            CatalogError::FolderNotFound(_) | CatalogError::EntryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CatalogError::Unauthenticated => StatusCode::UNAUTHORIZED,
            CatalogError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            CatalogError::DuplicateName { .. } | CatalogError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            CatalogError::Validation(_) | CatalogError::Image(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CatalogError::Sqlx(_) | CatalogError::Io(_) => {
                tracing::error!("internal error: {}", err);
                return AppError::internal("internal server error");
            }
        };
        AppError::new(status, err.to_string())
    }
}
