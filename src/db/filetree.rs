// src/db/filetree.rs

//! File tree builder
//!
//! Turns parsed file lists into the intrusive directory tree stored in the
//! `files` table. Each directory keeps its children as a sibling chain and
//! every package keeps its own files as a singly-linked list rooted at
//! `PackageRecord::first_file`.

use super::format::{file_flags, FileRecord, PackageRecord, NONE};
use crate::repository::parsers::FileListLine;
use byteorder::{LittleEndian as LE, WriteBytesExt};
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct FileTreeBuilder {
    records: Vec<FileRecord>,
    names: Vec<String>,
    /// `(parent, name)` → file index; the root level uses `NONE` as parent
    lookup: HashMap<(u32, String), u32>,
    /// Last child of each directory, for O(1) appends
    last_child: HashMap<u32, u32>,
    root_child: u32,
}

impl FileTreeBuilder {
    pub fn new() -> Self {
        Self {
            root_child: NONE,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn root_child(&self) -> u32 {
        self.root_child
    }

    pub fn record(&self, index: u32) -> Option<&FileRecord> {
        self.records.get(index as usize)
    }

    fn append(&mut self, parent: u32, name: &str, record: FileRecord) -> u32 {
        let index = self.records.len() as u32;
        self.records.push(record);
        self.names.push(name.to_string());
        self.lookup.insert((parent, name.to_string()), index);

        match self.last_child.insert(parent, index) {
            Some(prev) => self.records[prev as usize].next_sibling = index,
            None if parent == NONE => self.root_child = index,
            None => self.records[parent as usize].first_child = index,
        }
        index
    }

    fn enter_dir(&mut self, parent: u32, name: &str) -> u32 {
        if let Some(&existing) = self.lookup.get(&(parent, name.to_string())) {
            self.records[existing as usize].flags |= file_flags::DIR;
            return existing;
        }
        self.append(
            parent,
            name,
            FileRecord {
                parent,
                flags: file_flags::DIR,
                ..Default::default()
            },
        )
    }

    /// Apply one parsed file list
    ///
    /// `resolve` maps a package name to its package index; leaves whose
    /// package cannot be resolved are skipped. A leaf that already exists
    /// under the same parent only has its flags (and install time, if the
    /// line carries one) overridden. An entry that already has children
    /// keeps its `DIR` bit.
    pub fn apply<F>(
        &mut self,
        lines: &[(usize, FileListLine)],
        packages: &mut [PackageRecord],
        mut resolve: F,
    ) where
        F: FnMut(&str) -> Option<u32>,
    {
        let mut stack: Vec<u32> = Vec::new();

        for (line_no, line) in lines {
            let parent = stack.last().copied().unwrap_or(NONE);
            match line {
                FileListLine::EnterDir(name) => {
                    let dir = self.enter_dir(parent, name);
                    stack.push(dir);
                }
                FileListLine::LeaveDir => {
                    stack.pop();
                }
                FileListLine::File {
                    package,
                    flags,
                    install_time,
                    name,
                } => {
                    if let Some(&existing) = self.lookup.get(&(parent, name.clone())) {
                        let record = &mut self.records[existing as usize];
                        let dir = if record.first_child != NONE {
                            record.flags & file_flags::DIR
                        } else {
                            0
                        };
                        record.flags = *flags | dir;
                        if let Some(t) = install_time {
                            record.install_time = *t;
                        }
                        continue;
                    }

                    let Some(pkg) = resolve(package.as_str()) else {
                        warn!("Line {}: unknown package '{}' for file '{}'", line_no, package, name);
                        continue;
                    };
                    let Some(owner) = packages.get_mut(pkg as usize) else {
                        continue;
                    };

                    let index = self.append(
                        parent,
                        name,
                        FileRecord {
                            parent,
                            package: pkg,
                            flags: *flags,
                            next_file_pkg: owner.first_file,
                            install_time: install_time.unwrap_or(0),
                            ..Default::default()
                        },
                    );
                    owner.first_file = index;
                }
            }
        }

        if !stack.is_empty() {
            debug!("Closing {} directories left open at end of file list", stack.len());
        }
    }

    /// Serialize as count, root child, records, then the name blob
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.records.len() as u32)?;
        w.write_u32::<LE>(self.root_child)?;

        let mut ptr = 0u32;
        for (record, name) in self.records.iter().zip(&self.names) {
            FileRecord {
                name_ptr: ptr,
                ..*record
            }
            .encode(w)?;
            ptr += name.len() as u32 + 1;
        }

        for name in &self.names {
            w.write_all(name.as_bytes())?;
            w.write_u8(0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::parsers::parse_file_list;

    #[test]
    fn test_tree_and_package_lists() {
        let lines = parse_file_list(
            "files",
            ":usr\n:bin\nfoo|0|a\nbar|0|b\nfoo|0|c\n::\n::\n:etc\nfoo|16|foo.conf\n",
        )
        .unwrap();

        let mut packages = vec![PackageRecord::default(), PackageRecord::default()];
        let mut tree = FileTreeBuilder::new();
        tree.apply(&lines, &mut packages, |name| match name {
            "foo" => Some(0),
            "bar" => Some(1),
            _ => None,
        });

        // usr, bin, a, b, c, etc, foo.conf
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.root_child(), 0);

        let usr = tree.record(0).unwrap();
        assert!(usr.is_dir());
        assert_eq!(usr.next_sibling, 5);
        let bin = tree.record(1).unwrap();
        assert_eq!(bin.first_child, 2);
        assert_eq!(tree.record(2).unwrap().next_sibling, 3);

        // foo owns a, c, foo.conf; newest first
        assert_eq!(packages[0].first_file, 6);
        assert_eq!(tree.record(6).unwrap().next_file_pkg, 4);
        assert_eq!(tree.record(4).unwrap().next_file_pkg, 2);
        assert_eq!(tree.record(2).unwrap().next_file_pkg, NONE);
        assert_eq!(packages[1].first_file, 3);
    }

    #[test]
    fn test_later_leaf_overrides_flags() {
        let first = parse_file_list("repo", ":etc\nfoo|0|foo.conf\n").unwrap();
        let second = parse_file_list("installed", ":etc\nfoo|17|1700000000|foo.conf\n").unwrap();

        let mut packages = vec![PackageRecord::default()];
        let mut tree = FileTreeBuilder::new();
        tree.apply(&first, &mut packages, |_| Some(0));
        tree.apply(&second, &mut packages, |_| Some(0));

        assert_eq!(tree.len(), 2);
        let conf = tree.record(1).unwrap();
        assert_eq!(conf.flags, 17);
        assert_eq!(conf.install_time, 1_700_000_000);
    }

    #[test]
    fn test_leaf_override_keeps_directory() {
        let tree_lines = parse_file_list("repo", ":usr\n:share\nfoo|0|doc\n::\n::\n").unwrap();
        let leaf = parse_file_list("installed", ":usr\nfoo|4|share\n::\n").unwrap();

        let mut packages = vec![PackageRecord::default()];
        let mut tree = FileTreeBuilder::new();
        tree.apply(&tree_lines, &mut packages, |_| Some(0));
        tree.apply(&leaf, &mut packages, |_| Some(0));

        assert_eq!(tree.len(), 3);
        let share = tree.record(1).unwrap();
        assert!(share.is_dir());
        assert_eq!(share.flags, file_flags::DIR | file_flags::DONT_REMOVE);
        assert_eq!(share.first_child, 2);
    }

    #[test]
    fn test_unknown_package_is_skipped() {
        let lines = parse_file_list("files", "ghost|0|x\n").unwrap();
        let mut packages = Vec::new();
        let mut tree = FileTreeBuilder::new();
        tree.apply(&lines, &mut packages, |_| None);
        assert!(tree.is_empty());
        assert_eq!(tree.root_child(), NONE);
    }
}
