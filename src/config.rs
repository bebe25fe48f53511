use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

const DEFAULT_SIGNING_SECRET: &str = "storage-emulator-development-secret";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Externally visible base URL used in `selfLink`, session and signed URLs.
    pub public_url: String,
    pub signing_secret: String,
    /// Idle lifetime of a resumable upload session.
    pub session_ttl_secs: u64,
    pub session_sweep_secs: u64,
    /// Upper bound for bodies that must be buffered (multipart, chunks).
    pub max_request_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Local cloud object-storage emulator")]
pub struct Args {
    /// Host to bind to (overrides STORAGE_EMULATOR_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides STORAGE_EMULATOR_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides STORAGE_EMULATOR_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides STORAGE_EMULATOR_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL (overrides STORAGE_EMULATOR_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// HMAC secret for signed URLs (overrides STORAGE_EMULATOR_SIGNING_SECRET)
    #[arg(long)]
    pub signing_secret: Option<String>,

    /// Resumable session idle timeout in seconds (overrides STORAGE_EMULATOR_SESSION_TTL_SECS)
    #[arg(long)]
    pub session_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        let env_host = env::var("STORAGE_EMULATOR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_number("STORAGE_EMULATOR_PORT", 4443u16)?;
        let env_storage =
            env::var("STORAGE_EMULATOR_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("STORAGE_EMULATOR_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/emulator.db".into());
        let env_public = env::var("STORAGE_EMULATOR_PUBLIC_URL").ok();
        let env_secret = env::var("STORAGE_EMULATOR_SIGNING_SECRET")
            .unwrap_or_else(|_| DEFAULT_SIGNING_SECRET.into());
        let env_ttl = env_number("STORAGE_EMULATOR_SESSION_TTL_SECS", 7 * 24 * 60 * 60u64)?;
        let env_sweep = env_number("STORAGE_EMULATOR_SESSION_SWEEP_SECS", 60u64)?;
        let env_max_body = env_number("STORAGE_EMULATOR_MAX_REQUEST_BYTES", 512 * 1024 * 1024usize)?;

        let port = args.port.unwrap_or(env_port);
        let public_url = args
            .public_url
            .or(env_public)
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_url: public_url.trim_end_matches('/').to_string(),
            signing_secret: args.signing_secret.unwrap_or(env_secret),
            session_ttl_secs: args.session_ttl_secs.unwrap_or(env_ttl),
            session_sweep_secs: env_sweep.max(1),
            max_request_bytes: env_max_body,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read a numeric environment variable, falling back to `default` when unset.
fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
impl AppConfig {
    /// Configuration rooted in a scratch directory, for tests.
    pub fn for_tests(storage_dir: &std::path::Path) -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4443,
            storage_dir: storage_dir.display().to_string(),
            database_url: "sqlite::memory:".into(),
            public_url: "http://localhost:4443".into(),
            signing_secret: "test-secret".into(),
            session_ttl_secs: 3600,
            session_sweep_secs: 60,
            max_request_bytes: 16 * 1024 * 1024,
        }
    }
}
