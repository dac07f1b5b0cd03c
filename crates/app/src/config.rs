use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const DB_URL_VAR: &str = "EXAM_DB_URL";
pub const AUDIO_DIR_VAR: &str = "EXAM_AUDIO_DIR";
pub const LOG_VAR: &str = "RUST_LOG";

const DEFAULT_DB_URL: &str = "sqlite:exam.sqlite3";
const DEFAULT_AUDIO_DIR: &str = "public/result_audio";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("invalid value for {var}: {raw}")]
    InvalidValue { var: &'static str, raw: String },
    #[error("could not prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Runtime settings for the binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_url: String,
    pub audio_dir: PathBuf,
    pub log_filter: String,
}

impl Config {
    /// Read settings from the process environment, after loading `.env` if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a malformed database url or log filter.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a malformed database url or log filter.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_url = match lookup(DB_URL_VAR) {
            Some(raw) => normalize_sqlite_url(&raw)?,
            None => normalize_sqlite_url(DEFAULT_DB_URL)?,
        };
        let audio_dir = lookup(AUDIO_DIR_VAR)
            .filter(|raw| !raw.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_AUDIO_DIR), PathBuf::from);
        let log_filter = lookup(LOG_VAR)
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        EnvFilter::try_new(&log_filter).map_err(|_| ConfigError::InvalidValue {
            var: LOG_VAR,
            raw: log_filter.clone(),
        })?;

        Ok(Self {
            db_url,
            audio_dir,
            log_filter,
        })
    }

    /// Apply command-line overrides on top of the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the database url override is malformed.
    pub fn with_overrides(
        mut self,
        db_url: Option<&str>,
        audio_dir: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        if let Some(raw) = db_url {
            self.db_url = normalize_sqlite_url(raw)?;
        }
        if let Some(dir) = audio_dir {
            self.audio_dir = dir.to_path_buf();
        }
        Ok(self)
    }

    /// Create the database file and the recordings directory so sqlx can open them.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if a directory or file cannot be created.
    pub fn prepare_paths(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.audio_dir).map_err(|source| ConfigError::Io {
            path: self.audio_dir.clone(),
            source,
        })?;

        let Some(path) = sqlite_file_path(&self.db_url) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        if !path.exists() {
            std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Turn `sqlite:relative.db` or a bare path into an absolute `sqlite://` url.
fn normalize_sqlite_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            var: DB_URL_VAR,
            raw: raw.to_string(),
        });
    }
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return Ok(trimmed.to_string());
    }
    if trimmed.contains("://") {
        return Err(ConfigError::InvalidValue {
            var: DB_URL_VAR,
            raw: raw.to_string(),
        });
    }

    let path = Path::new(trimmed.strip_prefix("sqlite:").unwrap_or(trimmed));
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    Ok(format!("sqlite://{}", absolute.display()))
}

fn sqlite_file_path(db_url: &str) -> Option<PathBuf> {
    let rest = db_url.strip_prefix("sqlite://")?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.starts_with(':') {
        return None;
    }
    Some(PathBuf::from(path))
}
