use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod database;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    geocoder::{Geocoder, NoGeocoder, NominatimGeocoder},
    image_store::ImageStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting funicular with config: {:?}", cfg);

    // --- Ensure media directory exists ---
    if !Path::new(&cfg.media_dir).exists() {
        fs::create_dir_all(&cfg.media_dir)?;
        tracing::info!("Created media directory at {}", cfg.media_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path_obj = Path::new(db_path);
    tracing::debug!(
        "Interpreted SQLite path => {} (exists? {})",
        db_path,
        db_path_obj.exists()
    );

    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx does not create the file on its own
    match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        Ok(_) => tracing::debug!("Database file can be created/opened."),
        Err(e) => tracing::warn!("Failed to open database file manually: {}", e),
    }

    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        database::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize services ---
    let geocoder: Arc<dyn Geocoder> = match &cfg.geocoder_url {
        Some(url) => Arc::new(NominatimGeocoder::new(url.clone(), cfg.geocode_timeout)?),
        None => {
            tracing::info!("No geocoder configured; folder addresses will not be located");
            Arc::new(NoGeocoder)
        }
    };
    let auth = auth::AuthRegistry::load(&cfg.users_file)?;
    let state = state::AppState::new(
        db.clone(),
        ImageStore::new(&cfg.media_dir),
        geocoder,
        cfg.geocode_timeout,
        cfg.name_conflict,
        auth,
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
