// src/config.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 5151;
pub const DEFAULT_FEED_URL: &str = "wss://www.seismicportal.eu/standing_order/websocket";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

const ENV_FILTER_CONFIG_PATH: &str = "FILTER_CONFIG_PATH";
const DEFAULT_FILTER_CONFIG_PATH: &str = "config/filter.toml";

/// Process-level configuration, resolved once at boot.
/// Env vars win over the filter config file, which wins over defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub feed_url: String,
    pub redis_url: String,
    pub filter: FilterConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("PORT is not a valid port number: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };

        let feed_url = std::env::var("FEED_URL").unwrap_or_else(|_| DEFAULT_FEED_URL.to_string());
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());

        let mut filter = FilterConfig::load_default()?;
        filter.apply_env_overrides();

        Ok(Self {
            port,
            feed_url,
            redis_url,
            filter,
        })
    }
}

/// Classification policy: which quakes make it through to subscribers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilterConfig {
    /// Token the feed's region name must contain (matched case-insensitively).
    #[serde(default = "default_region_token")]
    pub region_token: String,
    /// Reporting agency whose events are trusted for broadcast.
    #[serde(default = "default_trusted_authority")]
    pub trusted_authority: String,
    /// Magnitude limit for the accept decision.
    #[serde(default = "default_magnitude_threshold")]
    pub magnitude_threshold: f64,
}

fn default_region_token() -> String {
    "turkey".to_string()
}

fn default_trusted_authority() -> String {
    "AFAD".to_string()
}

fn default_magnitude_threshold() -> f64 {
    0.5
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            region_token: default_region_token(),
            trusted_authority: default_trusted_authority(),
            magnitude_threshold: default_magnitude_threshold(),
        }
    }
}

impl FilterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing filter config TOML")
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading filter config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks:
    /// 1) $FILTER_CONFIG_PATH
    /// 2) config/filter.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_FILTER_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            return Self::load_from(&pb);
        }
        let default_path = PathBuf::from(DEFAULT_FILTER_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(&default_path);
        }
        Ok(Self::default())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("REGION_TOKEN") {
            if !token.trim().is_empty() {
                self.region_token = token.trim().to_string();
            }
        }
        if let Ok(auth) = std::env::var("TRUSTED_AUTHORITY") {
            if !auth.trim().is_empty() {
                self.trusted_authority = auth.trim().to_string();
            }
        }
        if let Some(threshold) = parse_threshold_env(std::env::var("MAGNITUDE_THRESHOLD").ok()) {
            self.magnitude_threshold = threshold;
        }
    }
}

fn parse_threshold_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}
