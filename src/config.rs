use crate::services::folder_service::NameConflictPolicy;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub media_dir: String,
    pub database_url: String,
    pub users_file: String,
    pub name_conflict: NameConflictPolicy,
    pub geocoder_url: Option<String>,
    pub geocode_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Media folder catalog with remote sync")]
pub struct Args {
    /// Host to bind to (overrides FUNICULAR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FUNICULAR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where entry images are stored (overrides FUNICULAR_MEDIA_DIR)
    #[arg(long)]
    pub media_dir: Option<String>,

    /// Database URL (overrides FUNICULAR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// JSON file listing staff tokens and permissions (overrides FUNICULAR_USERS_FILE)
    #[arg(long)]
    pub users_file: Option<String>,

    /// Rename folders on name collisions instead of rejecting the write
    /// (overrides FUNICULAR_RENAME_ON_CONFLICT)
    #[arg(long)]
    pub rename_on_conflict: bool,

    /// Nominatim base URL used to geocode folder addresses (overrides FUNICULAR_GEOCODER_URL)
    #[arg(long)]
    pub geocoder_url: Option<String>,

    /// Geocoding timeout in seconds (overrides FUNICULAR_GEOCODE_TIMEOUT_SECS)
    #[arg(long)]
    pub geocode_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    fn merge(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("FUNICULAR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("FUNICULAR_PORT", 3000u16)?;
        let env_media = env::var("FUNICULAR_MEDIA_DIR").unwrap_or_else(|_| "./data/media".into());
        let env_db = env::var("FUNICULAR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/funicular.db".into());
        let env_users =
            env::var("FUNICULAR_USERS_FILE").unwrap_or_else(|_| "./data/users.json".into());
        let env_rename = parse_env("FUNICULAR_RENAME_ON_CONFLICT", false)?;
        let env_geocoder = env::var("FUNICULAR_GEOCODER_URL").ok();
        let env_timeout = parse_env("FUNICULAR_GEOCODE_TIMEOUT_SECS", 5u64)?;

        // --- Merge ---
        let name_conflict = if args.rename_on_conflict || env_rename {
            NameConflictPolicy::Rename
        } else {
            NameConflictPolicy::Reject
        };

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            media_dir: args.media_dir.unwrap_or(env_media),
            database_url: args.database_url.unwrap_or(env_db),
            users_file: args.users_file.unwrap_or(env_users),
            name_conflict,
            geocoder_url: args.geocoder_url.or(env_geocoder),
            geocode_timeout: Duration::from_secs(
                args.geocode_timeout_secs.unwrap_or(env_timeout),
            ),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::parse_from([
            "funicular",
            "--port",
            "8081",
            "--media-dir",
            "/tmp/media",
            "--rename-on-conflict",
            "--geocode-timeout-secs",
            "2",
        ]);
        let cfg = AppConfig::merge(args).unwrap();
        assert_eq!(cfg.port, 8081);
        assert_eq!(cfg.media_dir, "/tmp/media");
        assert_eq!(cfg.name_conflict, NameConflictPolicy::Rename);
        assert_eq!(cfg.geocode_timeout, Duration::from_secs(2));
    }
}
