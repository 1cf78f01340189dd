use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Placeholder signing key shipped in the defaults. Deployments must override it.
pub const DEFAULT_SECRET_KEY: &str = "change-me-in-production";

/// Upper bound on access-token lifetime: one year.
pub const MAX_ACCESS_TOKEN_EXPIRE_MINUTES: i64 = 365 * 24 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub security: SecurityConfig,

    pub observability: ObservabilityConfig,

    /// File the settings were read from; `None` when running on defaults.
    /// Loading happens before logging is up, so callers report it afterwards.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_url: String,

    pub log_level: String,

    /// "pretty" or "json"
    pub log_format: String,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    pub max_db_connections: u32,

    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/authd.db".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8000,
            cors_allowed_origins: vec![
                "http://localhost:8000".to_string(),
                "http://127.0.0.1:8000".to_string(),
            ],
        }
    }
}

/// Which credential a registration stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialScheme {
    /// Argon2 digest of a user-chosen password; login hands out signed JWTs.
    Password,
    /// Server-issued opaque token, checked by storage lookup.
    Token,
}

impl FromStr for CredentialScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "password" => Ok(Self::Password),
            "token" => Ok(Self::Token),
            other => anyhow::bail!("Unknown credential scheme '{other}' (expected password or token)"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Symmetric key used to sign and verify access tokens.
    pub secret_key: String,

    /// JWT signing algorithm. Only the HMAC family is accepted.
    pub algorithm: String,

    pub access_token_expire_minutes: i64,

    pub credential_scheme: CredentialScheme,

    /// Argon2 memory cost in KiB
    pub argon2_memory_cost_kib: u32,

    /// Argon2 time cost (iterations)
    pub argon2_time_cost: u32,

    pub argon2_parallelism: u32,

    /// Re-hash legacy or outdated password digests after a successful login.
    pub auto_migrate_password_hashes: bool,

    pub opaque_token_length: usize,

    /// Attempts at issuing a unique opaque token before giving up.
    pub token_issuance_retries: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            algorithm: "HS256".to_string(),
            access_token_expire_minutes: 30,
            credential_scheme: CredentialScheme::Password,
            argon2_memory_cost_kib: 19 * 1024,
            argon2_time_cost: 2,
            argon2_parallelism: 1,
            auto_migrate_password_hashes: true,
            opaque_token_length: 32,
            token_issuance_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Defaults, then the first config file found, then environment overrides.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::load_file()?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn load_file() -> Result<Self> {
        for path in &Self::config_paths() {
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Overlay settings from the environment. `lookup` is injectable so tests
    /// don't have to mutate the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.general.database_url = url;
        }
        if let Some(level) = lookup("AUTHD_LOG_LEVEL") {
            self.general.log_level = level;
        }
        if let Some(port) = lookup("AUTHD_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("AUTHD_PORT is not a valid port: {port}"))?;
        }
        if let Some(secret) = lookup("SECRET_KEY") {
            self.security.secret_key = secret;
        }
        if let Some(algorithm) = lookup("ALGORITHM") {
            self.security.algorithm = algorithm;
        }
        if let Some(minutes) = lookup("ACCESS_TOKEN_EXPIRE_MINUTES") {
            self.security.access_token_expire_minutes = minutes.parse().with_context(|| {
                format!("ACCESS_TOKEN_EXPIRE_MINUTES is not a number: {minutes}")
            })?;
        }
        if let Some(scheme) = lookup("CREDENTIAL_SCHEME") {
            self.security.credential_scheme = scheme.parse()?;
        }

        Ok(())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("authd").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".authd").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            Self::default().save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let security = &self.security;

        if security.secret_key.is_empty() {
            anyhow::bail!("security.secret_key cannot be empty");
        }

        if !matches!(security.algorithm.as_str(), "HS256" | "HS384" | "HS512") {
            anyhow::bail!(
                "Unsupported signing algorithm '{}' (expected HS256, HS384 or HS512)",
                security.algorithm
            );
        }

        if !(1..=MAX_ACCESS_TOKEN_EXPIRE_MINUTES).contains(&security.access_token_expire_minutes) {
            anyhow::bail!(
                "security.access_token_expire_minutes must be between 1 and {MAX_ACCESS_TOKEN_EXPIRE_MINUTES}"
            );
        }

        if security.opaque_token_length < 12 {
            anyhow::bail!("security.opaque_token_length must be at least 12");
        }

        if security.token_issuance_retries == 0 {
            anyhow::bail!("security.token_issuance_retries must be >= 1");
        }

        argon2::Params::new(
            security.argon2_memory_cost_kib,
            security.argon2_time_cost,
            security.argon2_parallelism,
            None,
        )
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;

        if self.general.max_db_connections == 0 {
            anyhow::bail!("general.max_db_connections must be > 0");
        }

        Ok(())
    }

    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.security.secret_key == DEFAULT_SECRET_KEY
    }
}
