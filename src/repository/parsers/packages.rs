// src/repository/parsers/packages.rs

//! Package list parser
//!
//! A package list is a sequence of blocks:
//!
//! ```text
//! [libfoo]
//! Version=1.2
//! Depends=libc (>= 2.30); zlib
//! Provides=foo-compat
//! ```
//!
//! Lines before the first block header are ignored, as are lines without
//! an `=` sign. Values may be wrapped in double quotes.

use super::{content_lines, malformed, unquote};
use crate::db::format::package_flags;
use crate::error::Result;
use crate::version::VersionPattern;
use tracing::{debug, warn};

/// One parsed `[name]` block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
    /// Line of the block header, for diagnostics
    pub line: usize,
    pub source: Option<String>,
    pub maintainer: Option<String>,
    pub distribution: Option<String>,
    pub section: Option<String>,
    pub upstream_url: Option<String>,
    pub license: Option<String>,
    pub pkg_hash: Option<String>,
    pub mtd_hash: Option<String>,
    pub arch: Option<String>,
    pub short_desc: Option<String>,
    pub download_size: u32,
    pub install_size: u32,
    pub flags: u32,
    pub installed_date: u32,
    pub installed_by: u32,
    pub installed_repo: Option<String>,
    pub depends: Vec<VersionPattern>,
    pub suggests: Vec<VersionPattern>,
    pub conflicts: Vec<VersionPattern>,
    pub provides: Vec<VersionPattern>,
    pub replaces: Vec<VersionPattern>,
}

/// Parse a `;`-separated dependency list
///
/// Items look like `name`, `name (>= 1.0)` or `name>=1.0`. Malformed items
/// are skipped with a warning.
pub fn parse_depend_list(value: &str) -> Vec<VersionPattern> {
    value
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .filter_map(|item| {
            let cleaned: String = item.chars().filter(|c| *c != '(' && *c != ')').collect();
            let parsed = VersionPattern::parse(&cleaned);
            if parsed.is_none() {
                warn!("Skipping malformed dependency '{}'", item);
            }
            parsed
        })
        .collect()
}

fn parse_number(feed: &str, line: usize, key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|e| malformed(feed, line, format!("invalid {} '{}': {}", key, value, e)))
}

/// Parse a package list
///
/// # Arguments
///
/// * `feed` - Feed name used in error messages
/// * `text` - Decoded feed content
///
/// # Returns
///
/// * `Result<Vec<PackageEntry>>` - Blocks in feed order
pub fn parse_package_list(feed: &str, text: &str) -> Result<Vec<PackageEntry>> {
    let mut entries: Vec<PackageEntry> = Vec::new();
    let mut current: Option<PackageEntry> = None;

    let finish = |entry: PackageEntry, entries: &mut Vec<PackageEntry>| -> Result<()> {
        if entry.version.is_empty() {
            return Err(malformed(
                feed,
                entry.line,
                format!("package '{}' has no Version", entry.name),
            ));
        }
        entries.push(entry);
        Ok(())
    };

    for (line_no, line) in content_lines(text) {
        if let Some(header) = line.strip_prefix('[') {
            let Some(name) = header.strip_suffix(']') else {
                return Err(malformed(feed, line_no, "unterminated block header"));
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(malformed(feed, line_no, "empty block header"));
            }

            if let Some(done) = current.take() {
                finish(done, &mut entries)?;
            }
            current = Some(PackageEntry {
                name: name.to_string(),
                line: line_no,
                ..Default::default()
            });
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let Some(entry) = current.as_mut() else {
            debug!("{}:{}: ignoring key outside of a block", feed, line_no);
            continue;
        };

        let key = key.trim();
        let value = unquote(value);
        let text_value = || Some(value.to_string());

        match key {
            "Name" => entry.name = value.to_string(),
            "Version" => entry.version = value.to_string(),
            "Source" => entry.source = text_value(),
            "Maintainer" => entry.maintainer = text_value(),
            "Distribution" => entry.distribution = text_value(),
            "Section" => entry.section = text_value(),
            "Url" | "UpstreamUrl" => entry.upstream_url = text_value(),
            "Licence" | "License" => entry.license = text_value(),
            "PackageHash" => entry.pkg_hash = text_value(),
            "MetadataHash" => entry.mtd_hash = text_value(),
            "Arch" => entry.arch = text_value(),
            "ShortDesc" => entry.short_desc = text_value(),
            "InstalledRepo" => entry.installed_repo = text_value(),
            "DownloadSize" => entry.download_size = parse_number(feed, line_no, key, value)?,
            "InstallSize" => entry.install_size = parse_number(feed, line_no, key, value)?,
            "InstalledDate" => entry.installed_date = parse_number(feed, line_no, key, value)?,
            "InstalledBy" => entry.installed_by = parse_number(feed, line_no, key, value)?,
            "Flags" => {
                entry.flags = package_flags::parse(value)
                    .ok_or_else(|| malformed(feed, line_no, format!("invalid Flags '{}'", value)))?
            }
            "Depends" => entry.depends.extend(parse_depend_list(value)),
            "Suggest" | "Suggests" => entry.suggests.extend(parse_depend_list(value)),
            "Conflicts" => entry.conflicts.extend(parse_depend_list(value)),
            "Provides" => entry.provides.extend(parse_depend_list(value)),
            "Replaces" => entry.replaces.extend(parse_depend_list(value)),
            other => debug!("{}:{}: unknown key '{}'", feed, line_no, other),
        }
    }

    if let Some(done) = current.take() {
        finish(done, &mut entries)?;
    }

    Ok(entries)
}
