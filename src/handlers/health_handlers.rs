//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, no I/O
//! - GET /readyz   -> SQLite round trip plus a write/read/delete in the media dir

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::BTreeMap, path::Path};
use tokio::fs;
use uuid::Uuid;

const CANARY_BYTES: &[u8] = b"readyz";

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                ok: true,
                error: None,
            },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

/// `GET /readyz`
///
/// 200 when every check passes, 503 otherwise. The body lists each check.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let checks = BTreeMap::from([
        (
            "sqlite",
            CheckStatus::from_result(check_sqlite(&state.folders.db).await),
        ),
        (
            "media_dir",
            CheckStatus::from_result(check_media_dir(state.entries.images.root()).await),
        ),
    ]);

    let ready = checks.values().all(|c| c.ok);
    let (code, status) = if ready {
        (StatusCode::OK, "ok")
    } else {
        tracing::warn!("readiness check failed");
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    };
    (code, Json(ReadyResponse { status, checks }))
}

async fn check_sqlite(db: &SqlitePool) -> Result<(), String> {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(db).await {
        Ok(1) => Ok(()),
        Ok(v) => Err(format!("unexpected result: {}", v)),
        Err(e) => Err(format!("error: {}", e)),
    }
}

async fn check_media_dir(root: &Path) -> Result<(), String> {
    let canary = root.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&canary, CANARY_BYTES)
        .await
        .map_err(|e| format!("could not write canary file: {}", e))?;

    let read = fs::read(&canary).await;
    // best-effort cleanup
    let removed = fs::remove_file(&canary).await;
    match read {
        Ok(bytes) if bytes == CANARY_BYTES => {}
        Ok(_) => return Err("canary file content mismatch".into()),
        Err(e) => return Err(format!("could not read canary file: {}", e)),
    }
    removed.map_err(|e| format!("could not remove canary file: {}", e))
}
