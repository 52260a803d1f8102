//! Typed configuration record (A2). Loading conventions follow the
//! teacher's `Config::load()` in `src/config.rs`: a `serde::Deserialize`
//! struct populated from a TOML file, with environment overrides for the
//! values an operator most often needs to flip per-deployment.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests: u32,
    pub window_secs: u64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 120,
            window_secs: 60,
            burst: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct IpFilterConfig {
    pub enabled: bool,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: String,
    pub bind_addr: String,
    pub max_request_bytes: u64,
    pub rate_limit: RateLimitConfig,
    pub cors: CorsConfig,
    pub ip_filter: IpFilterConfig,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            bind_addr: "127.0.0.1:8080".into(),
            max_request_bytes: 100 * 1024 * 1024,
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            ip_filter: IpFilterConfig::default(),
            log_level: "info".into(),
        }
    }
}

impl Config {
    /// Loads from the TOML file at `RHINOBOX_CONFIG` (if set), then applies
    /// `RHINOBOX_DATA_DIR` / `RHINOBOX_BIND_ADDR` / `RHINOBOX_LOG_LEVEL`
    /// environment overrides, mirroring `HELIX_REPO_ROOT`'s env-var-first
    /// style in `helix-server/src/main.rs`.
    pub fn load() -> Result<Self, AppError> {
        let mut cfg = if let Ok(path) = std::env::var("RHINOBOX_CONFIG") {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| AppError::Internal(format!("failed to read {path}: {e}")))?;
            toml::from_str(&raw).map_err(|e| AppError::Internal(format!("invalid config at {path}: {e}")))?
        } else {
            Config::default()
        };

        if let Ok(v) = std::env::var("RHINOBOX_DATA_DIR") {
            cfg.data_dir = v;
        }
        if let Ok(v) = std::env::var("RHINOBOX_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        if let Ok(v) = std::env::var("RHINOBOX_LOG_LEVEL") {
            cfg.log_level = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.cors.allow_credentials && self.cors.allowed_origins.iter().any(|o| o == "*") {
            return Err(AppError::Validation(
                "CORS wildcard origin is incompatible with allow_credentials".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn wildcard_origin_with_credentials_is_rejected() {
        let mut cfg = Config::default();
        cfg.cors.allowed_origins = vec!["*".into()];
        cfg.cors.allow_credentials = true;
        assert!(cfg.validate().is_err());
    }
}
