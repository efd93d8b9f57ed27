// src/db/mod.rs

//! Binary package database
//!
//! This module handles:
//! - Compiling feeds into fixed-layout binary tables ([`writer`])
//! - Memory-mapping those tables for constant-time record access ([`reader`])
//! - Name and version queries over the inverted index ([`query`])
//! - In-place package and file state updates ([`state`])
//!
//! A database is a directory holding one file per table. It is always
//! rebuilt wholesale by [`rebuild`] and swapped in atomically.

pub mod filetree;
pub mod format;
pub mod query;
pub mod reader;
pub mod state;
pub mod strings;
pub mod writer;

pub use format::{file_flags, package_flags, DependKind, Dependency, FileRecord, PackageRecord, NONE};
pub use reader::Database;
pub use writer::{build, BuiltDatabase, DatabaseWriter, PartiallyBuiltDatabase};

use crate::error::Result;
use crate::repository::{Feed, FeedVerifier, InstalledState};
use std::path::Path;
use tracing::info;

/// Rebuild the database in `dir` from feeds and the installed state
///
/// Any error leaves the previous database untouched.
///
/// # Arguments
///
/// * `dir` - Database directory, created if missing
/// * `feeds` - Repository feeds, in priority order
/// * `installed` - Previously installed packages and files
/// * `verifier` - Trust decision for feeds that require verification
///
/// # Returns
///
/// * `Result<Database>` - The freshly written database, opened read-write
pub fn rebuild(
    dir: &Path,
    feeds: &[Feed],
    installed: InstalledState,
    verifier: &dyn FeedVerifier,
) -> Result<Database> {
    info!("Rebuilding database at {} from {} feeds", dir.display(), feeds.len());
    let built = build(feeds, installed, verifier)?;
    built.write_to(dir)?;
    Database::open(dir)
}

/// Open an existing database
pub fn open(dir: &Path) -> Result<Database> {
    Database::open(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::repository::{Sha256Checksum, TrustAll};

    #[test]
    fn test_rebuild_creates_parent_directories() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("nested/path/db");

        let db = rebuild(
            &dir,
            &[Feed::packages("main", "stable", "[foo]\nVersion=1\n")],
            InstalledState::empty(),
            &TrustAll,
        )
        .unwrap();
        assert_eq!(db.package_count(), 1);
        assert!(dir.join(format::PACKAGES_TABLE).exists());
    }

    #[test]
    fn test_untrusted_feed_keeps_previous_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("db");

        rebuild(
            &dir,
            &[Feed::packages("main", "stable", "[foo]\nVersion=1\n")],
            InstalledState::empty(),
            &TrustAll,
        )
        .unwrap();

        let tampered = Feed::packages("main", "stable", "[evil]\nVersion=1\n").with_digest("abcd");
        let err = rebuild(&dir, &[tampered], InstalledState::empty(), &Sha256Checksum)
            .err()
            .unwrap();
        assert!(matches!(err, Error::UntrustedFeed(_)));

        let db = open(&dir).unwrap();
        assert_eq!(db.package_count(), 1);
        assert!(db.find_package("foo", "1").is_some());
    }
}
