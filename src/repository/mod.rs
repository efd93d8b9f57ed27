// src/repository/mod.rs

//! Repository feeds
//!
//! This module provides functionality for:
//! - Loading package, translation and file-list feeds from disk
//! - Decompressing xz, gzip and zstd payloads
//! - Deciding whether a feed is trusted before the database is built

pub mod parsers;

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xz2::read::XzDecoder;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

/// What a feed describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// `[name]` blocks of package metadata
    Packages,
    /// `name:short description` lines
    Translations,
    /// Directory tree of package files
    FilesList,
}

/// One feed handed to the database writer
#[derive(Debug, Clone)]
pub struct Feed {
    /// Repository the feed comes from
    pub source: String,
    pub distribution: String,
    pub arch: String,
    pub kind: FeedKind,
    /// Decoded feed text
    pub content: Vec<u8>,
    /// Detached SHA-256 digest (lowercase hex), if one was shipped
    pub digest: Option<String>,
    /// Whether the feed must pass the verifier
    pub verify: bool,
}

impl Feed {
    fn new(kind: FeedKind, source: &str, distribution: &str, content: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.to_string(),
            distribution: distribution.to_string(),
            arch: String::new(),
            kind,
            content: content.into(),
            digest: None,
            verify: false,
        }
    }

    pub fn packages(source: &str, distribution: &str, content: impl Into<Vec<u8>>) -> Self {
        Self::new(FeedKind::Packages, source, distribution, content)
    }

    pub fn translations(source: &str, distribution: &str, content: impl Into<Vec<u8>>) -> Self {
        Self::new(FeedKind::Translations, source, distribution, content)
    }

    pub fn files(source: &str, distribution: &str, content: impl Into<Vec<u8>>) -> Self {
        Self::new(FeedKind::FilesList, source, distribution, content)
    }

    pub fn with_arch(mut self, arch: &str) -> Self {
        self.arch = arch.to_string();
        self
    }

    /// Attach a detached digest and require verification
    pub fn with_digest(mut self, digest: &str) -> Self {
        self.digest = Some(digest.trim().to_ascii_lowercase());
        self.verify = true;
        self
    }

    pub fn require_verification(mut self) -> Self {
        self.verify = true;
        self
    }

    /// Human readable name used in logs and errors
    pub fn label(&self) -> String {
        let kind = match self.kind {
            FeedKind::Packages => "packages",
            FeedKind::Translations => "translations",
            FeedKind::FilesList => "files",
        };
        format!("{}/{} {}", self.source, self.distribution, kind)
    }

    /// Feed content as UTF-8 text
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.content).map_err(|e| Error::MalformedFeed {
            feed: self.label(),
            line: 0,
            reason: format!("feed is not valid UTF-8: {}", e),
        })
    }
}

/// State files written by the installer on a previous run
#[derive(Debug, Clone, Default)]
pub struct InstalledState {
    /// Installed package list, same grammar as a package feed
    pub packages: Option<Vec<u8>>,
    /// Installed file list
    pub files: Option<Vec<u8>>,
}

impl InstalledState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load the installed state; missing files mean nothing is installed
    pub fn load(packages: &Path, files: &Path) -> Result<Self> {
        let read_optional = |path: &Path| -> Result<Option<Vec<u8>>> {
            if !path.exists() {
                debug!("No installed state at {}", path.display());
                return Ok(None);
            }
            let raw = fs::read(path).map_err(|e| {
                Error::IoError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Ok(Some(decompress(&raw)?))
        };

        Ok(Self {
            packages: read_optional(packages)?,
            files: read_optional(files)?,
        })
    }
}

/// Decides whether a feed may be compiled into the database
pub trait FeedVerifier {
    /// Return an error describing why the feed is not trusted
    fn verify(&self, feed: &Feed) -> Result<()>;
}

/// Accepts every feed
pub struct TrustAll;

impl FeedVerifier for TrustAll {
    fn verify(&self, _feed: &Feed) -> Result<()> {
        Ok(())
    }
}

/// Requires the SHA-256 of the decoded feed to match its detached digest
pub struct Sha256Checksum;

impl FeedVerifier for Sha256Checksum {
    fn verify(&self, feed: &Feed) -> Result<()> {
        let expected = feed
            .digest
            .as_deref()
            .ok_or_else(|| Error::ParseError("no detached digest".to_string()))?;

        let actual = format!("{:x}", Sha256::digest(&feed.content));
        if actual != expected {
            return Err(Error::ChecksumMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        debug!("Checksum verified for {}: {}", feed.label(), expected);
        Ok(())
    }
}

/// Run `verifier` on a feed that requires verification
///
/// Any verifier failure becomes [`Error::UntrustedFeed`].
pub fn verify_feed(feed: &Feed, verifier: &dyn FeedVerifier) -> Result<()> {
    if !feed.verify {
        return Ok(());
    }
    verifier
        .verify(feed)
        .map_err(|e| Error::UntrustedFeed(format!("{}: {}", feed.label(), e)))
}

/// Decompress a feed payload, detected by magic bytes (xz, gzip or zstd).
/// Anything else is returned unchanged.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    if data.starts_with(XZ_MAGIC) {
        XzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| Error::ParseError(format!("Failed to decompress xz feed: {}", e)))?;
        debug!("Decompressed xz feed ({} bytes)", out.len());
    } else if data.starts_with(GZIP_MAGIC) {
        GzDecoder::new(data)
            .read_to_end(&mut out)
            .map_err(|e| Error::ParseError(format!("Failed to decompress gzip feed: {}", e)))?;
        debug!("Decompressed gzip feed ({} bytes)", out.len());
    } else if data.starts_with(ZSTD_MAGIC) {
        out = zstd::decode_all(data)
            .map_err(|e| Error::ParseError(format!("Failed to decompress zstd feed: {}", e)))?;
        debug!("Decompressed zstd feed ({} bytes)", out.len());
    } else {
        out.extend_from_slice(data);
    }

    Ok(out)
}

/// Path of the detached digest for a feed file: `<path>.sha256`
pub fn digest_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Load a feed file from disk
///
/// # Arguments
///
/// * `path` - Feed file, optionally compressed
/// * `kind` - What the feed describes
/// * `source` - Repository name
/// * `distribution` - Distribution the feed belongs to
/// * `arch` - Default architecture for packages that do not declare one
///
/// # Returns
///
/// * `Result<Feed>` - The decoded feed, with its detached digest if present
pub fn load_feed(
    path: &Path,
    kind: FeedKind,
    source: &str,
    distribution: &str,
    arch: &str,
) -> Result<Feed> {
    info!("Loading {:?} feed from {}", kind, path.display());

    let raw = fs::read(path)
        .map_err(|e| Error::IoError(format!("Failed to read feed {}: {}", path.display(), e)))?;
    let content = decompress(&raw)?;

    let mut feed = Feed::new(kind, source, distribution, content).with_arch(arch);

    let sig = digest_path(path);
    if sig.exists() {
        let text = fs::read_to_string(&sig)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {}", sig.display(), e)))?;
        if let Some(hex) = text.split_whitespace().next() {
            feed.digest = Some(hex.to_ascii_lowercase());
        }
    }

    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_decompress_plain_and_gzip() {
        let text = b"[foo]\nVersion=1\n";
        assert_eq!(decompress(text).unwrap(), text);

        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(text).unwrap();
        let gz = enc.finish().unwrap();
        assert_eq!(decompress(&gz).unwrap(), text);

        let zst = zstd::encode_all(&text[..], 3).unwrap();
        assert_eq!(decompress(&zst).unwrap(), text);
    }

    #[test]
    fn test_sha256_verifier() {
        let content = b"[foo]\nVersion=1\n";
        let digest = format!("{:x}", Sha256::digest(content));

        let good = Feed::packages("main", "stable", &content[..]).with_digest(&digest);
        assert!(verify_feed(&good, &Sha256Checksum).is_ok());

        let bad = Feed::packages("main", "stable", &content[..]).with_digest("00ff");
        let err = verify_feed(&bad, &Sha256Checksum).unwrap_err();
        assert!(matches!(err, Error::UntrustedFeed(_)));

        let missing = Feed::packages("main", "stable", &content[..]).require_verification();
        assert!(matches!(
            verify_feed(&missing, &Sha256Checksum),
            Err(Error::UntrustedFeed(_))
        ));

        let unchecked = Feed::packages("main", "stable", &content[..]);
        assert!(verify_feed(&unchecked, &Sha256Checksum).is_ok());
    }

    #[test]
    fn test_load_feed_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("packages.list");
        let content = b"[foo]\nVersion=1\n";
        fs::write(&path, content).unwrap();
        fs::write(
            digest_path(&path),
            format!("{:x}  packages.list\n", Sha256::digest(content)),
        )
        .unwrap();

        let feed = load_feed(&path, FeedKind::Packages, "main", "stable", "x86_64").unwrap();
        assert_eq!(feed.content, content);
        assert_eq!(feed.arch, "x86_64");
        assert!(feed.digest.is_some());
        assert!(Sha256Checksum.verify(&feed).is_ok());
    }

    #[test]
    fn test_installed_state_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let state = InstalledState::load(
            &dir.path().join("installed_packages.list"),
            &dir.path().join("installed_files.list"),
        )
        .unwrap();
        assert!(state.packages.is_none());
        assert!(state.files.is_none());
    }
}
