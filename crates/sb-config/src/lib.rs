//! # sb-config
//!
//! Layered runtime settings for Sigmaboard.
//!
//! Sources, lowest precedence first:
//! 1. compiled-in defaults
//! 2. `config/sigmaboard.toml` (optional)
//! 3. environment variables prefixed `SIGMABOARD__`, e.g.
//!    `SIGMABOARD__SERVER__PORT=9000`

use std::path::PathBuf;

use config::{Config, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

/// Session secret used when none is configured. Fine for local runs only.
pub const DEV_SESSION_SECRET: &str = "sigmaboard-dev-secret-change-me";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub storage: StorageSettings,
    pub identity: IdentitySettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite URL, e.g. `sqlite:sigmaboard.db`
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub upload_dir: PathBuf,
    /// Uploads above this many bytes are rejected
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentitySettings {
    /// HMAC key for session cookies
    pub session_secret: SecretString,
    /// Width of the numeric alias keyspace
    pub alias_digits: u32,
    /// Draws allowed before alias allocation fails closed
    pub max_alias_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Settings {
    /// Loads `.env`, then the layered sources described in the module docs.
    pub fn load() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        Self::build(Some("config/sigmaboard"))
    }

    /// Defaults plus environment only. Used by tests and tooling.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::build(None)
    }

    fn build(file: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite:sigmaboard.db")?
            .set_default("database.max_connections", 5)?
            .set_default("storage.upload_dir", "./data/uploads")?
            .set_default("storage.max_upload_bytes", 16 * 1024 * 1024)?
            .set_default("identity.session_secret", DEV_SESSION_SECRET)?
            .set_default("identity.alias_digits", 4)?
            .set_default("identity.max_alias_attempts", 64)?
            .set_default("log.filter", "info,sigmaboard=debug,sb_api=debug,tower_http=info")?
            .set_default("log.json", false)?;

        if let Some(name) = file {
            builder = builder.add_source(File::with_name(name).required(false));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("SIGMABOARD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if !(1..=9).contains(&self.identity.alias_digits) {
            return Err(SettingsError::Invalid(
                "identity.alias_digits must be between 1 and 9".into(),
            ));
        }
        if self.identity.max_alias_attempts == 0 {
            return Err(SettingsError::Invalid(
                "identity.max_alias_attempts must be at least 1".into(),
            ));
        }
        if self.identity.session_secret.expose_secret().is_empty() {
            return Err(SettingsError::Invalid(
                "identity.session_secret must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// True while the compiled-in development secret is in use.
    pub fn uses_dev_secret(&self) -> bool {
        self.identity.session_secret.expose_secret() == DEV_SESSION_SECRET
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
