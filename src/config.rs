// src/config.rs

//! Configuration file
//!
//! A JSON document naming the database directory, the installed-state
//! files and the repository feeds to compile:
//!
//! ```json
//! {
//!   "db_dir": "/var/cache/hyperpkg/db",
//!   "installed_packages": "/var/lib/hyperpkg/installed",
//!   "installed_files": "/var/lib/hyperpkg/files",
//!   "sources": [
//!     { "name": "main", "distribution": "stable", "arch": "x86_64",
//!       "packages": "main/packages.xz", "verify": true }
//!   ]
//! }
//! ```
//!
//! Relative paths are taken relative to the configuration file.

use crate::error::{Error, Result};
use crate::repository::{load_feed, Feed, FeedKind, InstalledState};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_DB_DIR: &str = "/var/cache/hyperpkg/db";
pub const DEFAULT_INSTALLED_PACKAGES: &str = "/var/lib/hyperpkg/installed";
pub const DEFAULT_INSTALLED_FILES: &str = "/var/lib/hyperpkg/files";

/// One repository and its feed files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub distribution: String,
    #[serde(default)]
    pub arch: String,
    pub packages: PathBuf,
    #[serde(default)]
    pub translations: Option<PathBuf>,
    #[serde(default)]
    pub files: Option<PathBuf>,
    /// Feeds must carry a matching `.sha256` digest
    #[serde(default)]
    pub verify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_dir: PathBuf,
    pub installed_packages: PathBuf,
    pub installed_files: PathBuf,
    pub install_suggests: bool,
    pub sources: Vec<SourceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from(DEFAULT_DB_DIR),
            installed_packages: PathBuf::from(DEFAULT_INSTALLED_PACKAGES),
            installed_files: PathBuf::from(DEFAULT_INSTALLED_FILES),
            install_suggests: false,
            sources: Vec::new(),
        }
    }
}

impl Config {
    /// Read a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let mut config: Config = serde_json::from_str(&text)?;

        if let Some(base) = path.parent() {
            config.resolve_relative(base);
        }
        debug!("Loaded config from {} with {} sources", path.display(), config.sources.len());
        Ok(config)
    }

    /// Read `path` if given, else fall back to the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    fn resolve_relative(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.db_dir);
        fix(&mut self.installed_packages);
        fix(&mut self.installed_files);
        for source in &mut self.sources {
            fix(&mut source.packages);
            if let Some(p) = source.translations.as_mut() {
                fix(p);
            }
            if let Some(p) = source.files.as_mut() {
                fix(p);
            }
        }
    }

    /// Load every configured feed, in source order
    pub fn feeds(&self) -> Result<Vec<Feed>> {
        let mut feeds = Vec::new();
        for source in &self.sources {
            let mut add = |path: &Path, kind: FeedKind| -> Result<()> {
                let feed = load_feed(path, kind, &source.name, &source.distribution, &source.arch)?;
                feeds.push(if source.verify {
                    feed.require_verification()
                } else {
                    feed
                });
                Ok(())
            };
            add(&source.packages, FeedKind::Packages)?;
            if let Some(path) = &source.translations {
                add(path, FeedKind::Translations)?;
            }
            if let Some(path) = &source.files {
                add(path, FeedKind::FilesList)?;
            }
        }
        info!("Loaded {} feeds from {} sources", feeds.len(), self.sources.len());
        Ok(feeds)
    }

    pub fn installed_state(&self) -> Result<InstalledState> {
        InstalledState::load(&self.installed_packages, &self.installed_files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_fields_missing() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.db_dir, PathBuf::from(DEFAULT_DB_DIR));
        assert!(!config.install_suggests);
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("packages"), "[foo]\nVersion=1\n").unwrap();
        fs::write(dir.path().join("translations"), "foo:Foo tool\n").unwrap();
        let path = dir.path().join("hyperpkg.json");
        fs::write(
            &path,
            r#"{
                "db_dir": "db",
                "sources": [
                    { "name": "main", "distribution": "stable",
                      "packages": "packages", "translations": "translations" }
                ]
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.db_dir, dir.path().join("db"));
        assert_eq!(config.sources[0].packages, dir.path().join("packages"));

        let feeds = config.feeds().unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].kind, FeedKind::Packages);
        assert_eq!(feeds[1].kind, FeedKind::Translations);
        assert!(!feeds[0].verify);
    }

    #[test]
    fn test_verify_flag_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("packages"), "[foo]\nVersion=1\n").unwrap();
        let path = dir.path().join("hyperpkg.json");
        fs::write(
            &path,
            r#"{"sources": [{"name": "main", "distribution": "stable",
                "packages": "packages", "verify": true}]}"#,
        )
        .unwrap();
        let feeds = Config::load(&path).unwrap().feeds().unwrap();
        assert!(feeds[0].verify);

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Json(_))));
        assert!(matches!(
            Config::load(&dir.path().join("missing.json")),
            Err(Error::Config(_))
        ));
    }
}
