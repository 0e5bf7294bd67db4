use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Runtime configuration for the gateway and API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Backend base URL, e.g. `https://api.example.com/api`
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Durable credential and session file
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    /// Keys older clients stored the access token under
    #[serde(default = "default_legacy_keys")]
    pub legacy_keys: Vec<String>,
    #[serde(default = "default_tmdb_language")]
    pub tmdb_language: String,
    #[serde(default = "default_tmdb_region")]
    pub tmdb_region: String,
}

fn default_base_url() -> String {
    "http://localhost:4000/api".to_string()
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
fn default_storage_path() -> PathBuf {
    PathBuf::from("credentials.json")
}
fn default_legacy_keys() -> Vec<String> {
    ["token", "access_token", "jwt"]
        .iter()
        .map(|k| k.to_string())
        .collect()
}
fn default_tmdb_language() -> String {
    "es-AR".to_string()
}
fn default_tmdb_region() -> String {
    "AR".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            storage_path: default_storage_path(),
            legacy_keys: default_legacy_keys(),
            tmdb_language: default_tmdb_language(),
            tmdb_region: default_tmdb_region(),
        }
    }
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).context("reading config file")?;
        let mut cfg: GatewayConfig = serde_json::from_str(&raw).context("parsing JSON")?;
        cfg.base_url = cfg.base_url.trim_end_matches('/').to_string();
        Ok(cfg)
    }

    /// Read `path` if it exists (defaults otherwise), then apply `CINE_*`
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = if path.as_ref().exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_env()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(base) = std::env::var("CINE_API_BASE") {
            self.base_url = base.trim_end_matches('/').to_string();
        }
        if let Ok(raw) = std::env::var("CINE_TIMEOUT_SECS") {
            self.timeout_secs = raw
                .parse()
                .with_context(|| format!("invalid CINE_TIMEOUT_SECS: {raw}"))?;
        }
        if let Ok(path) = std::env::var("CINE_STORAGE_PATH") {
            self.storage_path = PathBuf::from(path);
        }
        if let Ok(lang) = std::env::var("CINE_TMDB_LANG") {
            self.tmdb_language = lang;
        }
        if let Ok(region) = std::env::var("CINE_TMDB_REGION") {
            self.tmdb_region = region;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
