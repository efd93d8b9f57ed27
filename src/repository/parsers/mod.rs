// src/repository/parsers/mod.rs

//! Parsers for the textual feed formats
//!
//! This module provides parsers for the three feed kinds:
//! - Package lists: `[name]` blocks of `key=value` lines
//! - Translations: `name:short description` lines
//! - File lists: a small stack language describing a directory tree

pub mod files;
pub mod packages;
pub mod translations;

pub use files::{parse_file_list, FileListLine};
pub use packages::{parse_package_list, PackageEntry};
pub use translations::{parse_translations, Translation};

use crate::error::Error;

/// Build a `MalformedFeed` error for `feed` at a 1-based line number
pub(crate) fn malformed(feed: &str, line: usize, reason: impl Into<String>) -> Error {
    Error::MalformedFeed {
        feed: feed.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Strip one pair of surrounding double quotes
pub(crate) fn unquote(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Iterate over `(line_number, trimmed_line)`, skipping blank lines and
/// `#` comments
pub(crate) fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"hello world\""), "hello world");
        assert_eq!(unquote("plain"), "plain");
        assert_eq!(unquote("\""), "\"");
        assert_eq!(unquote("  \"x\"  "), "x");
    }

    #[test]
    fn test_content_lines_skip_comments() {
        let lines: Vec<_> = content_lines("# c\n\n a \nb").collect();
        assert_eq!(lines, vec![(3, "a"), (4, "b")]);
    }
}
