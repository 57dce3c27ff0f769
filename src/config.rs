//! Runtime configuration
//!
//! Environment is read once at startup into a [`Config`] value which is then
//! passed by reference to the REST client and the pipelines.

use crate::error::{Result, SyncError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default timeout for paginated reads
pub const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Default timeout for a single ingestion POST (the edge function is slow on big batches)
pub const INGEST_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_INGEST_FUNCTION: &str = "ingest_raw_data";
pub const DEFAULT_DATA_DIR: &str = "json";

/// Env files tried relative to the working directory, in order.
const ENV_CANDIDATES: [&str; 7] = [
    ".env",
    ".env.local",
    ".env.development",
    ".env.template",
    "supabase/.env",
    "supabase/.env.local",
    "supabase/.env.template",
];

/// Load env files from the common project locations.
///
/// Variables already present in the process environment are never overridden,
/// and earlier files win over later ones.
pub fn load_env() {
    load_env_from(Path::new("."));
}

pub fn load_env_from(base: &Path) {
    for candidate in ENV_CANDIDATES {
        let p = base.join(candidate);
        if p.is_file() {
            match dotenv::from_path(&p) {
                Ok(()) => debug!("Loaded env file {}", p.display()),
                Err(e) => debug!("Skipping env file {}: {}", p.display(), e),
            }
        }
    }
}

/// Which API key tier is in use.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Service-role key; bypasses row-level security
    Elevated(String),
    /// Anon key
    Restricted(String),
}

impl Credential {
    /// Prefer the elevated key, fall back to the restricted one.
    pub fn pick(elevated: Option<String>, restricted: Option<String>) -> Option<Self> {
        let non_empty =
            |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        non_empty(elevated)
            .map(Credential::Elevated)
            .or_else(|| non_empty(restricted).map(Credential::Restricted))
    }

    pub fn token(&self) -> &str {
        match self {
            Credential::Elevated(t) | Credential::Restricted(t) => t,
        }
    }

    pub fn tier(&self) -> &'static str {
        match self {
            Credential::Elevated(_) => "service_role",
            Credential::Restricted(_) => "anon",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}, <redacted>)", self.tier())
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Project base URL (`SUPABASE_URL`), without trailing slash
    pub base_url: String,
    pub credential: Credential,
    /// Directory holding `setlists_{year}.json` and the report output
    pub data_dir: PathBuf,
    /// Edge function receiving batches
    pub ingest_function: String,
    pub read_timeout: Duration,
    pub ingest_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup("SUPABASE_URL")
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SyncError::Config("Missing SUPABASE_URL".into()))?;

        let credential = Credential::pick(
            lookup("SUPABASE_SERVICE_ROLE_KEY"),
            lookup("SUPABASE_ANON_KEY"),
        )
        .ok_or_else(|| {
            SyncError::Config(
                "Missing SUPABASE_SERVICE_ROLE_KEY/SUPABASE_ANON_KEY. \
                 Set them in your shell or a .env(.template) file at project root."
                    .into(),
            )
        })?;

        let data_dir = lookup("SETLIST_DATA_DIR")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let ingest_function = lookup("SETLIST_INGEST_FUNCTION")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INGEST_FUNCTION.to_string());

        Ok(Self {
            base_url,
            credential,
            data_dir: PathBuf::from(data_dir),
            ingest_function,
            read_timeout: READ_TIMEOUT,
            ingest_timeout: INGEST_TIMEOUT,
        })
    }

    /// Default location of the reconciliation report.
    pub fn report_path(&self) -> PathBuf {
        self.data_dir.join("reconciliation_report.json")
    }
}
