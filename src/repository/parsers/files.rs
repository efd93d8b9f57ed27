// src/repository/parsers/files.rs

//! File list parser
//!
//! File lists describe a directory tree with a tiny stack language:
//!
//! ```text
//! :usr             enter (or create) directory "usr"
//! :bin             enter "usr/bin"
//! coreutils|0|ls   file "usr/bin/ls" owned by coreutils, flags 0
//! ::               leave "usr/bin"
//! ```
//!
//! Installed-file lists also carry an install timestamp:
//! `pkgname|flags|itime|filename`.

use super::{content_lines, malformed};
use crate::error::Result;

/// One instruction of a file list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileListLine {
    EnterDir(String),
    LeaveDir,
    File {
        package: String,
        flags: u32,
        install_time: Option<u32>,
        name: String,
    },
}

/// Parse a file list into `(line_number, instruction)` pairs
///
/// Leaving a directory at the root level is an error; directories still
/// open at the end of the feed are closed implicitly.
pub fn parse_file_list(feed: &str, text: &str) -> Result<Vec<(usize, FileListLine)>> {
    let mut out = Vec::new();
    let mut depth = 0usize;

    for (line_no, line) in content_lines(text) {
        if line == "::" {
            if depth == 0 {
                return Err(malformed(feed, line_no, "'::' at root level"));
            }
            depth -= 1;
            out.push((line_no, FileListLine::LeaveDir));
            continue;
        }

        if let Some(dir) = line.strip_prefix(':') {
            if dir.is_empty() || dir.contains('/') {
                return Err(malformed(feed, line_no, format!("invalid directory name '{}'", dir)));
            }
            depth += 1;
            out.push((line_no, FileListLine::EnterDir(dir.to_string())));
            continue;
        }

        let parts: Vec<&str> = line.split('|').collect();
        let (package, flags, install_time, name) = match parts.as_slice() {
            [package, flags, name] => (*package, *flags, None, name.to_string()),
            [package, flags, itime, rest @ ..] => (*package, *flags, Some(*itime), rest.join("|")),
            _ => return Err(malformed(feed, line_no, "expected pkgname|flags|filename")),
        };

        if package.is_empty() || name.is_empty() || name.contains('/') {
            return Err(malformed(feed, line_no, "empty package or invalid file name"));
        }

        let flags = flags
            .parse::<u32>()
            .map_err(|e| malformed(feed, line_no, format!("invalid flags '{}': {}", flags, e)))?;
        let install_time = install_time
            .map(|t| {
                t.parse::<u32>()
                    .map_err(|e| malformed(feed, line_no, format!("invalid install time '{}': {}", t, e)))
            })
            .transpose()?;

        out.push((
            line_no,
            FileListLine::File {
                package: package.to_string(),
                flags,
                install_time,
                name,
            },
        ));
    }

    Ok(out)
}
