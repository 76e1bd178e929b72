//! Configuration loading for the Mentions API.
//!
//! Loads layered `.env` files and process environment variables, producing a
//! typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration derived from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub social: SocialConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
}

/// Relational store connection settings (`DB_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    /// Full connection URL override; when set it wins over the `DB_*` parts.
    pub url: Option<String>,
}

/// Upstream aggregator settings (`SOCIAL_MEDIA_*`, `SOCIAL_PLATFORMS`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialConfig {
    pub api_url: String,
    pub api_key: String,
    pub history_last_days: u32,
    pub platforms: Vec<String>,
    pub request_timeout_ms: u64,
}

/// Bearer-token settings (`JWT_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database: DatabaseConfig::default(),
            social: SocialConfig::default(),
            jwt: JwtConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "mentions".to_string(),
            password: "mentions".to_string(),
            name: "mentions".to_string(),
            max_connections: 10,
            acquire_timeout_ms: 5000,
            url: None,
        }
    }
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:4000".to_string(),
            api_key: String::new(),
            history_last_days: 7,
            platforms: vec!["bluesky".to_string(), "twitter".to_string()],
            request_timeout_ms: 30_000,
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "local-dev-secret".to_string(),
            expires_in_seconds: 86_400,
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a JSON representation with secrets masked.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(db) = value.pointer_mut("/database/password") {
            *db = serde_json::Value::String("***".to_string());
        }
        if let Some(url) = value.pointer_mut("/database/url") {
            if !url.is_null() {
                *url = serde_json::Value::String("***".to_string());
            }
        }
        if let Some(key) = value.pointer_mut("/social/api_key") {
            *key = serde_json::Value::String("***".to_string());
        }
        if let Some(secret) = value.pointer_mut("/jwt/secret") {
            *secret = serde_json::Value::String("***".to_string());
        }
        serde_json::to_string_pretty(&value)
    }
}

impl DatabaseConfig {
    /// Builds the connection URL from the `DB_*` parts unless an explicit
    /// `DB_URL` override is present.
    pub fn connection_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

impl SocialConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Loads configuration using layered `.env` files and environment variables.
///
/// Layering order (later wins): `.env`, `.env.local`, `.env.<profile>`,
/// `.env.<profile>.local`, process environment.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if is_recognized(&key) {
                layered.insert(key, value);
            }
        }

        let take = |layered: &mut BTreeMap<String, String>, key: &str| {
            layered.remove(key).filter(|v| !v.is_empty())
        };

        let profile = take(&mut layered, "PROFILE").unwrap_or(profile_hint);
        let api_bind_addr =
            take(&mut layered, "API_BIND_ADDR").unwrap_or_else(default_api_bind_addr);
        let log_level = take(&mut layered, "LOG_LEVEL").unwrap_or_else(default_log_level);
        let log_format = take(&mut layered, "LOG_FORMAT").unwrap_or_else(default_log_format);

        let db_defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            host: take(&mut layered, "DB_HOST").unwrap_or(db_defaults.host),
            port: parse_or(take(&mut layered, "DB_PORT"), "DB_PORT", db_defaults.port)?,
            user: take(&mut layered, "DB_USER").unwrap_or(db_defaults.user),
            password: take(&mut layered, "DB_PASSWORD").unwrap_or(db_defaults.password),
            name: take(&mut layered, "DB_NAME").unwrap_or(db_defaults.name),
            max_connections: parse_or(
                take(&mut layered, "DB_MAX_CONNECTIONS"),
                "DB_MAX_CONNECTIONS",
                db_defaults.max_connections,
            )?,
            acquire_timeout_ms: parse_or(
                take(&mut layered, "DB_ACQUIRE_TIMEOUT_MS"),
                "DB_ACQUIRE_TIMEOUT_MS",
                db_defaults.acquire_timeout_ms,
            )?,
            url: take(&mut layered, "DB_URL"),
        };

        let social_defaults = SocialConfig::default();
        let social = SocialConfig {
            api_url: take(&mut layered, "SOCIAL_MEDIA_API_URL").unwrap_or(social_defaults.api_url),
            api_key: take(&mut layered, "SOCIAL_MEDIA_API_KEY").unwrap_or(social_defaults.api_key),
            history_last_days: parse_or(
                take(&mut layered, "SOCIAL_MEDIA_API_HISTORY_LAST_DAYS"),
                "SOCIAL_MEDIA_API_HISTORY_LAST_DAYS",
                social_defaults.history_last_days,
            )?,
            platforms: take(&mut layered, "SOCIAL_PLATFORMS")
                .map(|raw| {
                    raw.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(social_defaults.platforms),
            request_timeout_ms: social_defaults.request_timeout_ms,
        };

        let jwt_defaults = JwtConfig::default();
        let jwt = JwtConfig {
            secret: take(&mut layered, "JWT_SECRET").unwrap_or(jwt_defaults.secret),
            expires_in_seconds: parse_or(
                take(&mut layered, "JWT_EXPIRES_IN"),
                "JWT_EXPIRES_IN",
                jwt_defaults.expires_in_seconds,
            )?,
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database,
            social,
            jwt,
        };

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("PROFILE")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if is_recognized(&key) {
                        values.insert(key, value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn is_recognized(key: &str) -> bool {
    matches!(
        key,
        "PROFILE" | "API_BIND_ADDR" | "LOG_LEVEL" | "LOG_FORMAT" | "JWT_SECRET"
            | "JWT_EXPIRES_IN"
    ) || key.starts_with("DB_")
        || key.starts_with("SOCIAL_MEDIA_API_")
        || key == "SOCIAL_PLATFORMS"
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw,
        }),
    }
}
