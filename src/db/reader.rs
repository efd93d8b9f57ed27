// src/db/reader.rs

//! Database reader
//!
//! Maps the table files and decodes records on access. Every table is
//! validated when the database is opened so that later accessors only
//! need cheap bounds checks.

use super::format::{
    Dependency, FileRecord, PackageRecord, RawDepend, StrPackageRecord, StringRecord, COUNT_SIZE,
    DEPENDS_TABLE, FILES_TABLE, NONE, PACKAGES_TABLE, STRINGS_TABLE, STRPACKAGES_TABLE,
    TRANSLATE_TABLE,
};
use crate::error::{Error, Result};
use crate::version::{match_version, DependOp};
use byteorder::{ByteOrder, LittleEndian as LE};
use memmap2::{Mmap, MmapMut};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A mapped table, writable only for the tables mutated after the build
pub(crate) enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Mapping::ReadOnly(m) => &m[..],
            Mapping::ReadWrite(m) => &m[..],
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> Result<&mut [u8]> {
        match self {
            Mapping::ReadOnly(_) => Err(Error::ReadOnly),
            Mapping::ReadWrite(m) => Ok(&mut m[..]),
        }
    }

    pub(crate) fn flush(&self) -> io::Result<()> {
        match self {
            Mapping::ReadOnly(_) => Ok(()),
            Mapping::ReadWrite(m) => m.flush(),
        }
    }
}

fn corrupt(table: &str, reason: impl Into<String>) -> Error {
    Error::CorruptTable {
        table: table.to_string(),
        reason: reason.into(),
    }
}

fn map_table(dir: &Path, table: &str, writable: bool) -> Result<Mapping> {
    let path = dir.join(table);
    let opened = if writable {
        OpenOptions::new().read(true).write(true).open(&path)
    } else {
        File::open(&path)
    };
    let file = opened.map_err(|e| Error::MapError {
        table: table.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })?;

    let len = file.metadata()?.len();
    if len < COUNT_SIZE as u64 {
        return Err(corrupt(table, format!("file is only {} bytes", len)));
    }

    let map_err = |e: io::Error| Error::MapError {
        table: table.to_string(),
        reason: e.to_string(),
    };
    // SAFETY: table files are only ever replaced by renaming the whole
    // directory, never truncated in place.
    let mapping = if writable {
        Mapping::ReadWrite(unsafe { MmapMut::map_mut(&file) }.map_err(map_err)?)
    } else {
        Mapping::ReadOnly(unsafe { Mmap::map(&file) }.map_err(map_err)?)
    };
    Ok(mapping)
}

fn read_count(bytes: &[u8]) -> u32 {
    LE::read_u32(&bytes[..COUNT_SIZE])
}

/// A string table and its trailing blob
struct StringTable {
    map: Mapping,
    count: u32,
}

impl StringTable {
    fn open(dir: &Path, table: &str) -> Result<Self> {
        let map = map_table(dir, table, false)?;
        let bytes = map.bytes();
        let count = read_count(bytes);
        let blob_start = COUNT_SIZE as u64 + u64::from(count) * StringRecord::SIZE as u64;
        if (bytes.len() as u64) < blob_start {
            return Err(corrupt(table, format!("{} records do not fit", count)));
        }
        Ok(Self { map, count })
    }

    fn blob_start(&self) -> usize {
        COUNT_SIZE + self.count as usize * StringRecord::SIZE
    }

    fn record(&self, idx: u32) -> Option<StringRecord> {
        if idx >= self.count {
            return None;
        }
        let off = COUNT_SIZE + idx as usize * StringRecord::SIZE;
        Some(StringRecord::decode(&self.map.bytes()[off..]))
    }

    fn get(&self, idx: u32) -> Option<&str> {
        let record = self.record(idx)?;
        let bytes = self.map.bytes();
        let start = self.blob_start().checked_add(record.ptr as usize)?;
        let tail = bytes.get(start..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }

    fn find(&self, s: &str) -> Option<u32> {
        (0..self.count).find(|&i| self.get(i) == Some(s))
    }
}

/// A pointer table followed by a flat array of fixed-size entries
struct PointerTable {
    map: Mapping,
    count: u32,
}

impl PointerTable {
    const PTR_SIZE: usize = 8;

    fn open(dir: &Path, table: &str, entry_size: usize) -> Result<Self> {
        let map = map_table(dir, table, false)?;
        let bytes = map.bytes();
        let count = read_count(bytes);
        let base = COUNT_SIZE as u64 + u64::from(count) * Self::PTR_SIZE as u64;
        if (bytes.len() as u64) < base {
            return Err(corrupt(table, format!("{} pointers do not fit", count)));
        }

        for i in 0..count as usize {
            let off = COUNT_SIZE + i * Self::PTR_SIZE;
            let ptr = u64::from(LE::read_u32(&bytes[off..off + 4]));
            let n = u64::from(LE::read_u32(&bytes[off + 4..off + 8]));
            if base + ptr + n * entry_size as u64 > bytes.len() as u64 {
                return Err(corrupt(table, format!("entry list {} overruns the table", i)));
            }
        }
        Ok(Self { map, count })
    }

    /// Byte range start and entry count of list `idx`
    fn list(&self, idx: u32) -> Option<(usize, u32)> {
        if idx >= self.count {
            return None;
        }
        let bytes = self.map.bytes();
        let off = COUNT_SIZE + idx as usize * Self::PTR_SIZE;
        let ptr = LE::read_u32(&bytes[off..off + 4]);
        let count = LE::read_u32(&bytes[off + 4..off + 8]);
        let base = COUNT_SIZE + self.count as usize * Self::PTR_SIZE;
        Some((base + ptr as usize, count))
    }
}

/// An open database
pub struct Database {
    dir: PathBuf,
    pub(crate) packages: Mapping,
    pub(crate) files: Mapping,
    strings: StringTable,
    translate: StringTable,
    depends: PointerTable,
    strpackages: PointerTable,
    package_count: u32,
    file_count: u32,
    root_file: u32,
}

impl Database {
    /// Open the database in `dir` for reading and in-place state updates
    pub fn open(dir: &Path) -> Result<Self> {
        Self::open_with(dir, true)
    }

    /// Open the database in `dir`; every mutation fails with `ReadOnly`
    pub fn open_read_only(dir: &Path) -> Result<Self> {
        Self::open_with(dir, false)
    }

    fn open_with(dir: &Path, writable: bool) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::DatabaseNotFound(dir.display().to_string()));
        }
        debug!("Opening database at {} (writable: {})", dir.display(), writable);

        let packages = map_table(dir, PACKAGES_TABLE, writable)?;
        let package_count = read_count(packages.bytes());
        let needed = COUNT_SIZE as u64 + u64::from(package_count) * PackageRecord::SIZE as u64;
        if (packages.bytes().len() as u64) < needed {
            return Err(corrupt(
                PACKAGES_TABLE,
                format!("{} records do not fit", package_count),
            ));
        }

        let files = map_table(dir, FILES_TABLE, writable)?;
        let file_bytes = files.bytes();
        if file_bytes.len() < FileRecord::HEADER_SIZE {
            return Err(corrupt(FILES_TABLE, "missing root pointer"));
        }
        let file_count = read_count(file_bytes);
        let root_file = LE::read_u32(&file_bytes[4..8]);
        let needed = FileRecord::HEADER_SIZE as u64 + u64::from(file_count) * FileRecord::SIZE as u64;
        if (file_bytes.len() as u64) < needed {
            return Err(corrupt(FILES_TABLE, format!("{} records do not fit", file_count)));
        }

        let db = Self {
            dir: dir.to_path_buf(),
            packages,
            files,
            strings: StringTable::open(dir, STRINGS_TABLE)?,
            translate: StringTable::open(dir, TRANSLATE_TABLE)?,
            depends: PointerTable::open(dir, DEPENDS_TABLE, RawDepend::SIZE)?,
            strpackages: PointerTable::open(dir, STRPACKAGES_TABLE, StrPackageRecord::SIZE)?,
            package_count,
            file_count,
            root_file,
        };

        info!(
            "Opened database at {}: {} packages, {} strings, {} files",
            dir.display(),
            db.package_count,
            db.strings.count,
            db.file_count
        );
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.packages, Mapping::ReadOnly(_))
    }

    pub fn package_count(&self) -> u32 {
        self.package_count
    }

    /// Byte offset of package `idx`, if it exists
    pub(crate) fn package_offset(&self, idx: u32) -> Option<usize> {
        (idx < self.package_count).then(|| COUNT_SIZE + idx as usize * PackageRecord::SIZE)
    }

    pub fn package(&self, idx: u32) -> Option<PackageRecord> {
        let off = self.package_offset(idx)?;
        Some(PackageRecord::decode(&self.packages.bytes()[off..]))
    }

    /// Indices of every package
    pub fn packages(&self) -> std::ops::Range<u32> {
        0..self.package_count
    }

    /// Resolve a string index; `translated` selects the localized table
    pub fn string(&self, translated: bool, idx: u32) -> Option<&str> {
        if translated {
            self.translate.get(idx)
        } else {
            self.strings.get(idx)
        }
    }

    /// Untranslated string, empty when absent
    pub fn str(&self, idx: u32) -> &str {
        self.strings.get(idx).unwrap_or("")
    }

    /// Index of an untranslated string. Linear in the table size.
    pub fn find_string(&self, s: &str) -> Option<u32> {
        self.strings.find(s)
    }

    pub fn string_count(&self) -> u32 {
        self.strings.count
    }

    /// Dependencies of package `pkg`, in stored order
    pub fn dependencies(&self, pkg: u32) -> Dependencies<'_> {
        let list = self
            .package(pkg)
            .and_then(|record| self.depends.list(record.deps));
        match list {
            Some((start, count)) => Dependencies {
                bytes: self.depends.map.bytes(),
                pos: start,
                end: start + count as usize * RawDepend::SIZE,
            },
            None => Dependencies::empty(),
        }
    }

    /// Packages known under string `name` whose version satisfies
    /// `op version`; `version` is ignored when `op` is `None`
    pub fn packages_of_string(&self, version: u32, name: u32, op: DependOp) -> PackagesOfString<'_> {
        let required = if op == DependOp::None || version == NONE {
            ""
        } else {
            self.str(version)
        };
        self.packages_of_name(name, required, op)
    }

    /// Like [`Self::packages_of_string`] with the required version as text
    pub fn packages_of_name<'a>(&'a self, name: u32, required: &'a str, op: DependOp) -> PackagesOfString<'a> {
        let bucket = self.strings.record(name).map(|r| r.owner_bucket);
        let list = bucket.and_then(|b| if b == NONE { None } else { self.strpackages.list(b) });
        match list {
            Some((start, count)) => PackagesOfString {
                db: self,
                pos: start,
                end: start + count as usize * StrPackageRecord::SIZE,
                required,
                op,
            },
            None => PackagesOfString {
                db: self,
                pos: 0,
                end: 0,
                required,
                op,
            },
        }
    }

    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    /// First top-level file or directory
    pub fn root_file(&self) -> Option<u32> {
        (self.root_file != NONE).then_some(self.root_file)
    }

    pub(crate) fn file_offset(&self, idx: u32) -> Option<usize> {
        (idx < self.file_count).then(|| FileRecord::HEADER_SIZE + idx as usize * FileRecord::SIZE)
    }

    pub fn file(&self, idx: u32) -> Option<FileRecord> {
        let off = self.file_offset(idx)?;
        Some(FileRecord::decode(&self.files.bytes()[off..]))
    }

    pub fn file_name(&self, record: &FileRecord) -> Option<&str> {
        let bytes = self.files.bytes();
        let start = FileRecord::HEADER_SIZE
            .checked_add(self.file_count as usize * FileRecord::SIZE)?
            .checked_add(record.name_ptr as usize)?;
        let tail = bytes.get(start..)?;
        let end = tail.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&tail[..end]).ok()
    }

    /// Full path of a file, built by walking parent links
    pub fn file_path(&self, idx: u32) -> Option<String> {
        let mut parts = Vec::new();
        let mut current = idx;
        while current != NONE {
            let record = self.file(current)?;
            parts.push(self.file_name(&record)?);
            if parts.len() > self.file_count as usize {
                return None;
            }
            current = record.parent;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    /// Files owned by `pkg`, newest first
    pub fn files_of_package(&self, pkg: u32) -> FileChain<'_> {
        let first = self.package(pkg).map(|p| p.first_file).unwrap_or(NONE);
        FileChain {
            db: self,
            next: first,
            by_package: true,
            steps: 0,
        }
    }

    /// Children of a directory, or the top level for `None`
    pub fn children(&self, dir: Option<u32>) -> FileChain<'_> {
        let first = match dir {
            None => self.root_file,
            Some(d) => self.file(d).map(|f| f.first_child).unwrap_or(NONE),
        };
        FileChain {
            db: self,
            next: first,
            by_package: false,
            steps: 0,
        }
    }

    /// Flush in-place state changes to disk
    pub fn flush(&self) -> Result<()> {
        self.packages.flush()?;
        self.files.flush()?;
        Ok(())
    }
}

/// Iterator over a package's dependency records
pub struct Dependencies<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
}

impl Dependencies<'_> {
    fn empty() -> Self {
        Dependencies {
            bytes: &[],
            pos: 0,
            end: 0,
        }
    }
}

impl Iterator for Dependencies<'_> {
    type Item = Dependency;

    fn next(&mut self) -> Option<Dependency> {
        while self.pos < self.end {
            let raw = RawDepend::decode(&self.bytes[self.pos..]);
            self.pos += RawDepend::SIZE;
            if let Some(dep) = raw.to_dependency() {
                return Some(dep);
            }
        }
        None
    }
}

/// Iterator over an inverted-index bucket, filtered by version
pub struct PackagesOfString<'a> {
    db: &'a Database,
    pos: usize,
    end: usize,
    required: &'a str,
    op: DependOp,
}

impl Iterator for PackagesOfString<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let bytes = self.db.strpackages.map.bytes();
        while self.pos < self.end {
            let entry = StrPackageRecord::decode(&bytes[self.pos..]);
            self.pos += StrPackageRecord::SIZE;
            if self.op == DependOp::None
                || match_version(self.db.str(entry.version), self.required, self.op)
            {
                return Some(entry.package);
            }
        }
        None
    }
}

/// Iterator over a sibling chain or a package's file list
pub struct FileChain<'a> {
    db: &'a Database,
    next: u32,
    by_package: bool,
    steps: u32,
}

impl Iterator for FileChain<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.next == NONE || self.steps > self.db.file_count {
            return None;
        }
        let current = self.next;
        let record = self.db.file(current)?;
        self.next = if self.by_package {
            record.next_file_pkg
        } else {
            record.next_sibling
        };
        self.steps += 1;
        Some(current)
    }
}
