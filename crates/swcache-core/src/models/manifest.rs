//! The precache manifest: root-relative paths fetched on install.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

const PLACEHOLDER_ORIGIN: &str = "http://manifest.invalid";

/// Site shell precached by default: entry point, styles, scripts, core
/// images and the locale files for every supported language.
const DEFAULT_ENTRIES: &[&str] = &[
    "/",
    "/index.html",
    "/styles/sections.css",
    "/styles/animations.css",
    "/scripts/main.js",
    "/scripts/i18n-init.js",
    "/scripts/language-switcher.js",
    "/scripts/meta-tags-updater.js",
    "/scripts/custom-select.js",
    "/scripts/releases-data.js",
    "/scripts/releases.js",
    "/images/logo.jpeg",
    "/images/og/og-image.jpg",
    "/locales/ko/translation.json",
    "/locales/en/translation.json",
    "/locales/es/translation.json",
];

/// Ordered, duplicate-free list of root-relative paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Manifest {
    entries: Vec<String>,
}

impl Manifest {
    /// Build a manifest, keeping the first occurrence of each path.
    /// Every entry must be root-relative.
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.into();
            if !is_root_relative(&entry) {
                return Err(CacheError::InvalidUrl {
                    url: entry,
                    reason: "manifest entries must be root-relative".to_string(),
                });
            }
            if !out.contains(&entry) {
                out.push(entry);
            }
        }
        Ok(Self { entries: out })
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// A leading `/` alone is not enough: `//host/x` and `/\host/x` resolve to
/// another origin.
fn is_root_relative(entry: &str) -> bool {
    if !entry.starts_with('/') {
        return false;
    }
    let Ok(base) = Url::parse(PLACEHOLDER_ORIGIN) else {
        return false;
    };
    base.join(entry)
        .map(|url| url.origin() == base.origin())
        .unwrap_or(false)
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            entries: DEFAULT_ENTRIES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl TryFrom<Vec<String>> for Manifest {
    type Error = CacheError;

    fn try_from(entries: Vec<String>) -> Result<Self> {
        Self::new(entries)
    }
}

impl From<Manifest> for Vec<String> {
    fn from(manifest: Manifest) -> Self {
        manifest.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_keep_first_occurrence() {
        let manifest = Manifest::new(["/", "/a.css", "/", "/b.js", "/a.css"]).unwrap();
        assert_eq!(manifest.entries(), &["/", "/a.css", "/b.js"]);
    }

    #[test]
    fn test_relative_entry_rejected() {
        let err = Manifest::new(["/", "styles/a.css"]).unwrap_err();
        assert!(matches!(err, CacheError::InvalidUrl { .. }));
    }

    #[test]
    fn test_other_origin_entries_rejected() {
        for entry in ["//cdn.example/x.js", "/\\cdn.example/x.js", "https://cdn.example/x.js"] {
            let err = Manifest::new(["/", entry]).unwrap_err();
            assert!(matches!(err, CacheError::InvalidUrl { ref url, .. } if url == entry));
        }
        assert!(Manifest::new(["/a//b.css", "/x.js?v=1"]).is_ok());
    }

    #[test]
    fn test_default_manifest_covers_locales() {
        let manifest = Manifest::default();
        assert_eq!(manifest.len(), 16);
        assert_eq!(manifest.entries()[0], "/");
        for lang in ["ko", "en", "es"] {
            let path = format!("/locales/{}/translation.json", lang);
            assert!(manifest.iter().any(|e| e == path));
        }
    }

    #[test]
    fn test_deserialize_validates_entries() {
        let ok: Manifest = serde_json::from_str(r#"["/", "/a.css"]"#).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(serde_json::from_str::<Manifest>(r#"["a.css"]"#).is_err());
    }
}
