//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Credentials never live in the TOML; only the path of the session file.

use kisan_auth::{DEFAULT_CREDENTIALS_FILE, DEFAULT_LOGIN_PATH};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Local listener settings
#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Where the Kisan+ backend lives
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    pub api_base: String,
    /// Host of `/auth/refresh`; falls back to `api_base`
    #[serde(default)]
    pub auth_base: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub refresh_wait_timeout_secs: Option<u64>,
}

/// Session persistence and the login redirect
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default = "default_login_path")]
    pub login_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials_path: default_credentials_path(),
            login_path: default_login_path(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_max_connections() -> usize {
    256
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIALS_FILE)
}

fn default_login_path() -> String {
    DEFAULT_LOGIN_PATH.to_string()
}

impl BackendConfig {
    /// Effective auth base after defaulting.
    pub fn auth_base(&self) -> &str {
        self.auth_base.as_deref().unwrap_or(&self.api_base)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn refresh_wait_timeout(&self) -> Option<Duration> {
        self.refresh_wait_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `KISAN_API_BASE` and `KISAN_AUTH_BASE` replace the backend URLs.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(base) = std::env::var("KISAN_API_BASE") {
            config.backend.api_base = base;
        }
        if let Ok(base) = std::env::var("KISAN_AUTH_BASE") {
            config.backend.auth_base = Some(base);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        validate_url("api_base", &self.backend.api_base)?;
        if let Some(ref auth_base) = self.backend.auth_base {
            validate_url("auth_base", auth_base)?;
        }

        if self.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.backend.refresh_wait_timeout_secs == Some(0) {
            return Err(common::Error::Config(
                "refresh_wait_timeout_secs must be greater than 0 when set".into(),
            ));
        }

        if self.gateway.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if !self.session.login_path.starts_with('/') {
            return Err(common::Error::invalid(
                "login_path",
                format!("must start with '/', got: {}", self.session.login_path),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("kisan-gateway.toml")
    }
}

fn validate_url(field: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )))
    }
}
