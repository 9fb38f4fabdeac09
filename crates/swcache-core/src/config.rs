//! Configuration for the cache manager host.
//!
//! Holds the site origin, the deployed version identifier, the precache
//! manifest and host policy (update polling interval, optional request
//! timeout). Stored at `~/.config/swcache/config.json` unless a path is
//! given explicitly; environment variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::models::Manifest;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "swcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// How often the host checks for a new version.
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 60;

const ENV_ORIGIN: &str = "SWCACHE_ORIGIN";
const ENV_VERSION: &str = "SWCACHE_VERSION";
const ENV_CACHE_DIR: &str = "SWCACHE_CACHE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub origin: String,
    /// Bucket name; changing it is what triggers precache and eviction.
    pub version: String,
    pub manifest: Manifest,
    pub cache_dir: Option<PathBuf>,
    pub skip_waiting_on_install: bool,
    pub update_interval_secs: u64,
    /// Off unless set: a hung request then stays pending.
    pub request_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            version: "site-v1".to_string(),
            manifest: Manifest::default(),
            cache_dir: None,
            skip_waiting_on_install: true,
            update_interval_secs: DEFAULT_UPDATE_INTERVAL_SECS,
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load from the default location, or defaults if there is no file.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `SWCACHE_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(version) = lookup(ENV_VERSION) {
            self.version = version;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn origin_url(&self) -> Result<Url> {
        let url = Url::parse(&self.origin)
            .with_context(|| format!("Invalid origin: {}", self.origin))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Origin must be http or https: {}", self.origin);
        }
        Ok(url)
    }

    /// Storage root for this origin's buckets.
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        let host = self
            .origin_url()?
            .host_str()
            .unwrap_or("default")
            .to_string();
        Ok(cache_dir.join(APP_NAME).join(host))
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.update_interval(), Duration::from_secs(60));
        assert_eq!(config.request_timeout(), None);
        assert!(config.skip_waiting_on_install);
        assert_eq!(config.manifest, Manifest::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"origin": "https://plang.example", "version": "v9", "manifest": ["/", "/a.css"]}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.version, "v9");
        assert_eq!(config.manifest.entries(), &["/", "/a.css"]);
        assert_eq!(config.update_interval_secs, 60);
    }

    #[test]
    fn test_invalid_manifest_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"manifest": ["index.html"]}"#).unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            version: "v2".to_string(),
            request_timeout_secs: Some(30),
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.version, "v2");
        assert_eq!(loaded.request_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ORIGIN, "https://plang.example"),
            (ENV_VERSION, "v3"),
            (ENV_CACHE_DIR, "/tmp/swcache"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.origin, "https://plang.example");
        assert_eq!(config.version, "v3");
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/swcache"));
    }

    #[test]
    fn test_origin_must_be_http() {
        let config = Config {
            origin: "ftp://plang.example".to_string(),
            ..Config::default()
        };
        assert!(config.origin_url().is_err());
    }
}
