//! Configuration file parser for feedmail.toml.
//!
//! The config file is optional for the commands that never send mail; a
//! missing file yields `Config::default()`. Unknown keys are accepted but
//! logged as a warning, since they are usually typos.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Missing required config key: {0}")]
    Missing(&'static str),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The Debug impl masks `smtp_password`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address every notification is sent to.
    pub recipient: Option<String>,

    /// Mail relay as `host:port`. The port defaults to 587.
    pub smtp_server: Option<String>,

    pub smtp_username: Option<String>,

    pub smtp_password: Option<String>,

    /// Sender address. Falls back to `smtp_username`.
    pub from_address: Option<String>,

    pub database_path: PathBuf,

    /// How long a run waits for another run's write lock.
    pub database_timeout_secs: u64,

    /// Number of feeds fetched at once.
    pub fetch_concurrency: usize,

    pub fetch_timeout_secs: u64,

    /// Item records published longer ago than this are swept after each run.
    /// Unset disables the sweep.
    pub retention_days: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recipient: None,
            smtp_server: None,
            smtp_username: None,
            smtp_password: None,
            from_address: None,
            database_path: PathBuf::from("feedmail.db"),
            database_timeout_secs: 1,
            fetch_concurrency: crate::feed::pool::DEFAULT_CONCURRENCY,
            fetch_timeout_secs: 60,
            retention_days: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("recipient", &self.recipient)
            .field("smtp_server", &self.smtp_server)
            .field("smtp_username", &self.smtp_username)
            .field(
                "smtp_password",
                &self.smtp_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("from_address", &self.from_address)
            .field("database_path", &self.database_path)
            .field("database_timeout_secs", &self.database_timeout_secs)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("retention_days", &self.retention_days)
            .finish()
    }
}

/// Validated settings for the SMTP notifier.
#[derive(Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const DEFAULT_SMTP_PORT: u16 = 587;

    const KNOWN_KEYS: [&'static str; 10] = [
        "recipient",
        "smtp_server",
        "smtp_username",
        "smtp_password",
        "from_address",
        "database_path",
        "database_timeout_secs",
        "fetch_concurrency",
        "fetch_timeout_secs",
        "retention_days",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn database_timeout(&self) -> Duration {
        Duration::from_secs(self.database_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Records published before the returned instant are swept after a run.
    /// `None` when `retention_days` is unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `retention_days` reaches back
    /// past the earliest representable date.
    pub fn retention_cutoff(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ConfigError> {
        let Some(days) = self.retention_days else {
            return Ok(None);
        };

        ChronoDuration::try_days(i64::from(days))
            .and_then(|window| now.checked_sub_signed(window))
            .map(Some)
            .ok_or_else(|| ConfigError::Invalid(format!("retention_days {days} is out of range")))
    }

    /// The configured recipient.
    pub fn recipient(&self) -> Result<&str, ConfigError> {
        non_blank(&self.recipient).ok_or(ConfigError::Missing("recipient"))
    }

    /// Validate and collect everything the SMTP notifier needs.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::Missing`] - a required key is absent or blank
    /// * [`ConfigError::Invalid`] - `smtp_server` has an unusable port
    pub fn smtp_settings(&self) -> Result<SmtpSettings, ConfigError> {
        let server = non_blank(&self.smtp_server).ok_or(ConfigError::Missing("smtp_server"))?;
        let username =
            non_blank(&self.smtp_username).ok_or(ConfigError::Missing("smtp_username"))?;
        let password = self
            .smtp_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::Missing("smtp_password"))?;

        let (host, port) = match server.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ConfigError::Invalid(format!("smtp_server port {port:?} is not a number"))
                })?;
                (host, port)
            }
            None => (server, Self::DEFAULT_SMTP_PORT),
        };
        if host.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "smtp_server {server:?} has no host"
            )));
        }

        let from_address = non_blank(&self.from_address).unwrap_or(username);

        Ok(SmtpSettings {
            host: host.to_string(),
            port,
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
            from_address: from_address.to_string(),
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Tests
// ============================================================================
