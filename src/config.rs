//! Service configuration.
//!
//! Read from the YAML file named by `RANDOMIZER_CONFIG`, falling back to
//! defaults when unset. `RANDOMIZER_LISTEN` and `RANDOMIZER_ADMIN_LISTEN`
//! override the listen addresses and `RANDOMIZER_ADMIN_TOKEN` sets the admin
//! bearer token.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "RANDOMIZER_CONFIG";
pub const LISTEN_ENV: &str = "RANDOMIZER_LISTEN";
pub const ADMIN_LISTEN_ENV: &str = "RANDOMIZER_ADMIN_LISTEN";
pub const ADMIN_TOKEN_ENV: &str = "RANDOMIZER_ADMIN_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address of the public link server.
    pub listen: SocketAddr,
    /// Address of the admin API. Loopback unless deliberately exposed.
    pub admin_listen: SocketAddr,
    /// Bearer token required by the admin API. `None` disables the check.
    pub admin_token: Option<String>,
    /// Prefix joined with a bot handle to form its redirect URL.
    pub redirect_base: String,
    /// Neutral destination for cloaked visits.
    pub safe_url: String,
    /// Destination when no bot is eligible. `None` answers 503.
    pub fallback_url: Option<String>,
    pub cloak_timeout_ms: u64,
    /// JSON-lines file receiving visit records. `None` logs them instead.
    pub visit_log: Option<PathBuf>,
    pub recorder_capacity: usize,
    pub status_feed_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            admin_listen: SocketAddr::from(([127, 0, 0, 1], 8081)),
            admin_token: None,
            redirect_base: "https://t.me/".to_string(),
            safe_url: "https://www.google.com/".to_string(),
            fallback_url: None,
            cloak_timeout_ms: 250,
            visit_log: None,
            recorder_capacity: 10_000,
            status_feed_capacity: 1_024,
        }
    }
}

/// Values taken from the environment that win over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen: Option<String>,
    pub admin_listen: Option<String>,
    pub admin_token: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            listen: std::env::var(LISTEN_ENV).ok(),
            admin_listen: std::env::var(ADMIN_LISTEN_ENV).ok(),
            admin_token: std::env::var(ADMIN_TOKEN_ENV).ok(),
        }
    }
}

impl Config {
    /// Loads configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::resolve(
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            Overrides::from_env(),
        )
    }

    /// Builds the configuration from an optional file and overrides.
    pub fn resolve(path: Option<PathBuf>, overrides: Overrides) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };

        if let Some(listen) = overrides.listen {
            config.listen = listen
                .parse()
                .with_context(|| format!("parsing {LISTEN_ENV}='{listen}'"))?;
        }
        if let Some(listen) = overrides.admin_listen {
            config.admin_listen = listen
                .parse()
                .with_context(|| format!("parsing {ADMIN_LISTEN_ENV}='{listen}'"))?;
        }
        if let Some(token) = overrides.admin_token {
            config.admin_token = Some(token);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML file. Missing keys take their default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(content)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cloak_timeout_ms == 0 {
            return Err(ConfigError::Zero("cloak_timeout_ms"));
        }
        if self.recorder_capacity == 0 {
            return Err(ConfigError::Zero("recorder_capacity"));
        }
        if self.status_feed_capacity == 0 {
            return Err(ConfigError::Zero("status_feed_capacity"));
        }
        if self.listen == self.admin_listen {
            return Err(ConfigError::SharedListener(self.listen));
        }
        if self.admin_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ConfigError::EmptyAdminToken);
        }
        check_url("redirect_base", &self.redirect_base)?;
        check_url("safe_url", &self.safe_url)?;
        if let Some(url) = &self.fallback_url {
            check_url("fallback_url", url)?;
        }
        Ok(())
    }

    pub fn cloak_timeout(&self) -> Duration {
        Duration::from_millis(self.cloak_timeout_ms)
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid = ["http://", "https://"]
        .iter()
        .any(|scheme| value.len() > scheme.len() && value.starts_with(scheme));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl {
            field,
            value: value.to_string(),
        })
    }
}
