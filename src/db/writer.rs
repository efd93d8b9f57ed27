// src/db/writer.rs

//! Database writer
//!
//! Compiles feeds into the binary tables in two passes:
//!
//! 1. [`DatabaseWriter::scan`] creates one package record per distinct
//!    `(name, version)` and registers names and provided/replaced aliases in
//!    the inverted index. The installed-state list is scanned first, so a
//!    repository block describing an already installed package reuses that
//!    record instead of creating a second one.
//! 2. [`PartiallyBuiltDatabase::link`] resolves dependencies into records
//!    and reverse edges, attaches translations and builds the file tree.
//!
//! [`BuiltDatabase::write_to`] then publishes the tables atomically.

use super::filetree::FileTreeBuilder;
use super::format::{
    package_flags, DependKind, DependPtr, Dependency, PackageRecord, RawDepend, DEPENDS_TABLE,
    FILES_TABLE, NONE, PACKAGES_TABLE, STRINGS_TABLE, STRPACKAGES_TABLE, TRANSLATE_TABLE,
};
use super::strings::{InvertedIndexBuilder, StringTableBuilder};
use crate::error::{Error, Result};
use crate::repository::parsers::{
    parse_file_list, parse_package_list, parse_translations, FileListLine, PackageEntry,
    Translation,
};
use crate::repository::{verify_feed, Feed, FeedKind, FeedVerifier, InstalledState};
use crate::version::{match_version, DependOp, VersionPattern};
use byteorder::{LittleEndian as LE, WriteBytesExt};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Repository name recorded for the installed-state feeds
const INSTALLED_SOURCE: &str = "installed";

#[derive(Debug)]
enum FeedBody {
    Packages(Vec<PackageEntry>),
    Translations(Vec<Translation>),
    Files(Vec<(usize, FileListLine)>),
}

#[derive(Debug)]
struct ParsedFeed {
    label: String,
    source: String,
    distribution: String,
    arch: String,
    installed: bool,
    body: FeedBody,
}

impl ParsedFeed {
    fn parse(feed: &Feed, installed: bool) -> Result<Self> {
        let label = feed.label();
        let text = feed.text()?;
        let body = match feed.kind {
            FeedKind::Packages => FeedBody::Packages(parse_package_list(&label, text)?),
            FeedKind::Translations => FeedBody::Translations(parse_translations(text)),
            FeedKind::FilesList => FeedBody::Files(parse_file_list(&label, text)?),
        };
        Ok(Self {
            label,
            source: feed.source.clone(),
            distribution: feed.distribution.clone(),
            arch: feed.arch.clone(),
            installed,
            body,
        })
    }
}

/// Real (non-alias) packages by name and by `(name, version)`
#[derive(Debug, Default)]
struct KnownPackages {
    by_name: HashMap<u32, Vec<u32>>,
    exact: HashMap<(u32, u32), u32>,
}

impl KnownPackages {
    fn find(&self, name: u32, version: u32) -> Option<u32> {
        self.exact.get(&(name, version)).copied()
    }

    fn named(&self, name: u32) -> &[u32] {
        self.by_name.get(&name).map(Vec::as_slice).unwrap_or(&[])
    }

    fn insert(&mut self, name: u32, version: u32, package: u32) {
        self.by_name.entry(name).or_default().push(package);
        self.exact.insert((name, version), package);
    }
}

/// Tables shared by both passes
#[derive(Debug, Default)]
struct Tables {
    strings: StringTableBuilder,
    translations: StringTableBuilder,
    index: InvertedIndexBuilder,
    packages: Vec<PackageRecord>,
    known: KnownPackages,
}

impl Tables {
    fn intern_opt(&mut self, value: Option<&str>) -> u32 {
        match value {
            Some(v) if !v.is_empty() => self.strings.intern(v),
            _ => NONE,
        }
    }

    fn intern_or(&mut self, value: Option<&str>, fallback: &str) -> u32 {
        match value {
            Some(v) if !v.is_empty() => self.strings.intern(v),
            _ if !fallback.is_empty() => self.strings.intern(fallback),
            _ => NONE,
        }
    }

    fn string(&self, idx: u32) -> &str {
        self.strings.resolve(idx).unwrap_or("")
    }

    /// Packages registered under `pattern.name` whose version satisfies it
    fn matching(&self, pattern: &VersionPattern) -> Vec<u32> {
        let Some(name) = self.strings.get(&pattern.name) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for entry in self.index.entries(&self.strings, name) {
            if match_version(self.string(entry.version), &pattern.version, pattern.op)
                && !out.contains(&entry.package)
            {
                out.push(entry.package);
            }
        }
        out
    }

    fn ordinary(&mut self, kind: DependKind, pattern: &VersionPattern) -> Dependency {
        let version = if pattern.op == DependOp::None {
            NONE
        } else {
            self.strings.intern(&pattern.version)
        };
        Dependency::Ordinary {
            kind,
            op: pattern.op,
            name: self.strings.intern(&pattern.name),
            version,
        }
    }
}

/// First phase of a build: feeds are verified and parsed
pub struct DatabaseWriter {
    installed_packages: Option<ParsedFeed>,
    installed_files: Option<ParsedFeed>,
    feeds: Vec<ParsedFeed>,
}

impl DatabaseWriter {
    /// Create a writer seeded with the previously installed state
    pub fn new(installed: InstalledState) -> Result<Self> {
        let installed_packages = installed
            .packages
            .map(|content| {
                ParsedFeed::parse(&Feed::packages(INSTALLED_SOURCE, "", content), true)
            })
            .transpose()?;
        let installed_files = installed
            .files
            .map(|content| ParsedFeed::parse(&Feed::files(INSTALLED_SOURCE, "", content), true))
            .transpose()?;

        Ok(Self {
            installed_packages,
            installed_files,
            feeds: Vec::new(),
        })
    }

    /// Verify and parse one feed
    pub fn add_feed(&mut self, feed: &Feed, verifier: &dyn FeedVerifier) -> Result<()> {
        verify_feed(feed, verifier)?;
        let parsed = ParsedFeed::parse(feed, false)?;
        debug!("Parsed feed {}", parsed.label);
        self.feeds.push(parsed);
        Ok(())
    }

    /// Pass 0: create package records and register names
    pub fn scan(self) -> Result<PartiallyBuiltDatabase> {
        let mut feeds: Vec<ParsedFeed> = Vec::new();
        feeds.extend(self.installed_packages);
        feeds.extend(self.feeds);
        feeds.extend(self.installed_files);

        let mut tables = Tables::default();
        let mut block_package: HashMap<(usize, usize), u32> = HashMap::new();
        let mut reused = 0usize;

        for (feed_idx, feed) in feeds.iter().enumerate() {
            let FeedBody::Packages(entries) = &feed.body else {
                continue;
            };

            for (block_idx, entry) in entries.iter().enumerate() {
                let name = tables.strings.intern(&entry.name);
                let version = tables.strings.intern(&entry.version);

                if let Some(existing) = tables.known.find(name, version) {
                    merge_missing_fields(&mut tables, existing, feed, entry);
                    reused += 1;
                    continue;
                }

                let record = package_record(&mut tables, feed, entry, name, version);
                let pkg = tables.packages.len() as u32;
                tables.packages.push(record);
                tables.known.insert(name, version, pkg);
                tables.index.register(&mut tables.strings, name, version, pkg);

                for alias in entry.provides.iter().chain(&entry.replaces) {
                    let alias_name = tables.strings.intern(&alias.name);
                    let alias_version = if alias.op == DependOp::Eq {
                        tables.strings.intern(&alias.version)
                    } else {
                        version
                    };
                    tables
                        .index
                        .register(&mut tables.strings, alias_name, alias_version, pkg);
                }

                block_package.insert((feed_idx, block_idx), pkg);
            }
        }

        info!(
            "Pass 0 complete: {} packages, {} duplicates merged, {} strings",
            tables.packages.len(),
            reused,
            tables.strings.len()
        );

        Ok(PartiallyBuiltDatabase {
            feeds,
            tables,
            block_package,
        })
    }
}

fn package_record(
    tables: &mut Tables,
    feed: &ParsedFeed,
    entry: &PackageEntry,
    name: u32,
    version: u32,
) -> PackageRecord {
    let repo = if feed.installed {
        tables.intern_opt(entry.installed_repo.as_deref())
    } else {
        tables.strings.intern(&feed.source)
    };
    let short_desc = match entry.short_desc.as_deref() {
        Some(desc) if !desc.is_empty() => tables.translations.intern(desc),
        _ => NONE,
    };
    let mut flags = entry.flags;
    if feed.installed {
        flags |= package_flags::INSTALLED;
    }

    PackageRecord {
        name,
        version,
        maintainer: tables.intern_opt(entry.maintainer.as_deref()),
        short_desc,
        source: tables.intern_opt(entry.source.as_deref()),
        upstream_url: tables.intern_opt(entry.upstream_url.as_deref()),
        repo,
        arch: tables.intern_or(entry.arch.as_deref(), &feed.arch),
        section: tables.intern_opt(entry.section.as_deref()),
        distribution: tables.intern_or(entry.distribution.as_deref(), &feed.distribution),
        license: tables.intern_opt(entry.license.as_deref()),
        pkg_hash: tables.intern_opt(entry.pkg_hash.as_deref()),
        mtd_hash: tables.intern_opt(entry.mtd_hash.as_deref()),
        flags,
        deps: NONE,
        install_size: entry.install_size,
        download_size: entry.download_size,
        used: 0,
        first_file: NONE,
        install_date: entry.installed_date,
        installed_by: entry.installed_by,
    }
}

/// Fill metadata the existing record lacks from a duplicate block. State
/// fields (flags, install bookkeeping) always stay with the first record.
fn merge_missing_fields(tables: &mut Tables, pkg: u32, feed: &ParsedFeed, entry: &PackageEntry) {
    let fresh = package_record(tables, feed, entry, NONE, NONE);
    let Some(record) = tables.packages.get_mut(pkg as usize) else {
        return;
    };

    let fill = |slot: &mut u32, value: u32| {
        if *slot == NONE {
            *slot = value;
        }
    };
    fill(&mut record.maintainer, fresh.maintainer);
    fill(&mut record.short_desc, fresh.short_desc);
    fill(&mut record.source, fresh.source);
    fill(&mut record.upstream_url, fresh.upstream_url);
    fill(&mut record.repo, fresh.repo);
    fill(&mut record.arch, fresh.arch);
    fill(&mut record.section, fresh.section);
    fill(&mut record.distribution, fresh.distribution);
    fill(&mut record.license, fresh.license);
    fill(&mut record.pkg_hash, fresh.pkg_hash);
    fill(&mut record.mtd_hash, fresh.mtd_hash);
    if record.download_size == 0 {
        record.download_size = fresh.download_size;
    }
    if record.install_size == 0 {
        record.install_size = fresh.install_size;
    }
}

/// Second phase of a build: every package record exists, dependencies can
/// be resolved
pub struct PartiallyBuiltDatabase {
    feeds: Vec<ParsedFeed>,
    tables: Tables,
    block_package: HashMap<(usize, usize), u32>,
}

impl PartiallyBuiltDatabase {
    pub fn package_count(&self) -> usize {
        self.tables.packages.len()
    }

    /// Index of the package record for `name` at exactly `version`
    pub fn find_package(&self, name: &str, version: &str) -> Option<u32> {
        let name = self.tables.strings.get(name)?;
        let version = self.tables.strings.get(version)?;
        self.tables.known.find(name, version)
    }

    /// Pass 1: dependencies, reverse edges, translations and files
    pub fn link(self) -> Result<BuiltDatabase> {
        let PartiallyBuiltDatabase {
            feeds,
            mut tables,
            block_package,
        } = self;

        let mut deps: Vec<Vec<Dependency>> = vec![Vec::new(); tables.packages.len()];
        let mut files = FileTreeBuilder::new();

        for (feed_idx, feed) in feeds.iter().enumerate() {
            match &feed.body {
                FeedBody::Packages(entries) => {
                    for (block_idx, entry) in entries.iter().enumerate() {
                        let Some(&pkg) = block_package.get(&(feed_idx, block_idx)) else {
                            continue;
                        };
                        link_dependencies(&mut tables, &mut deps, pkg, entry);
                    }
                }
                FeedBody::Translations(lines) => attach_translations(&mut tables, feed, lines),
                FeedBody::Files(lines) => {
                    let repo = tables.strings.get(&feed.source);
                    let distribution = tables.strings.get(&feed.distribution);
                    let mut owners: HashMap<&str, Option<u32>> = HashMap::new();
                    for (_, line) in lines {
                        if let FileListLine::File { package, .. } = line {
                            owners.entry(package.as_str()).or_insert_with(|| {
                                resolve_file_owner(
                                    &tables.strings,
                                    &tables.known,
                                    &tables.packages,
                                    package,
                                    repo,
                                    distribution,
                                )
                            });
                        }
                    }
                    files.apply(lines, &mut tables.packages, |name| {
                        owners.get(name).copied().flatten()
                    });
                    debug!("Applied file list {}", feed.label);
                }
            }
        }

        compute_used_counts(&mut tables, &deps);

        let edge_count: usize = deps.iter().map(Vec::len).sum();
        info!(
            "Pass 1 complete: {} dependency records, {} files",
            edge_count,
            files.len()
        );

        BuiltDatabase::encode(&mut tables, &deps, &files)
    }
}

fn push_unique(list: &mut Vec<Dependency>, dep: Dependency) {
    if !list.contains(&dep) {
        list.push(dep);
    }
}

fn link_dependencies(
    tables: &mut Tables,
    deps: &mut [Vec<Dependency>],
    pkg: u32,
    entry: &PackageEntry,
) {
    let (own_name, own_version) = {
        let record = &tables.packages[pkg as usize];
        (record.name, record.version)
    };
    let conflict_back_edge = Dependency::Ordinary {
        kind: DependKind::Conflict,
        op: DependOp::Eq,
        name: own_name,
        version: own_version,
    };

    for pattern in &entry.depends {
        let dep = tables.ordinary(DependKind::Depend, pattern);
        push_unique(&mut deps[pkg as usize], dep);
        for target in tables.matching(pattern) {
            if target != pkg {
                push_unique(&mut deps[target as usize], Dependency::ReverseOf { dependent: pkg });
            }
        }
    }

    for pattern in &entry.suggests {
        let dep = tables.ordinary(DependKind::Suggest, pattern);
        push_unique(&mut deps[pkg as usize], dep);
    }

    for (kind, patterns) in [
        (DependKind::Conflict, &entry.conflicts),
        (DependKind::Replace, &entry.replaces),
    ] {
        for pattern in patterns {
            let dep = tables.ordinary(kind, pattern);
            push_unique(&mut deps[pkg as usize], dep);
            for target in tables.matching(pattern) {
                if target != pkg {
                    push_unique(&mut deps[target as usize], conflict_back_edge);
                }
            }
        }
    }

    for pattern in &entry.provides {
        let dep = tables.ordinary(DependKind::Provide, pattern);
        push_unique(&mut deps[pkg as usize], dep);
    }
}

fn attach_translations(tables: &mut Tables, feed: &ParsedFeed, lines: &[Translation]) {
    let repo = tables.strings.get(&feed.source);
    let distribution = tables.strings.get(&feed.distribution);
    let mut attached = 0usize;

    for line in lines {
        let Some(name) = tables.strings.get(&line.name) else {
            continue;
        };
        let targets: Vec<u32> = tables
            .known
            .named(name)
            .iter()
            .copied()
            .filter(|&p| {
                let record = &tables.packages[p as usize];
                Some(record.repo) == repo && Some(record.distribution) == distribution
            })
            .collect();

        if targets.is_empty() {
            continue;
        }
        let desc = tables.translations.intern(&line.short_desc);
        for p in targets {
            tables.packages[p as usize].short_desc = desc;
            attached += 1;
        }
    }

    debug!("Attached {} translations from {}", attached, feed.label);
}

/// Pick the package a file-list line refers to: same repository and
/// distribution first, then an installed one, then the first known
fn resolve_file_owner(
    strings: &StringTableBuilder,
    known: &KnownPackages,
    packages: &[PackageRecord],
    name: &str,
    repo: Option<u32>,
    distribution: Option<u32>,
) -> Option<u32> {
    let candidates = known.named(strings.get(name)?);
    candidates
        .iter()
        .copied()
        .find(|&p| {
            let r = &packages[p as usize];
            Some(r.repo) == repo && Some(r.distribution) == distribution
        })
        .or_else(|| {
            candidates
                .iter()
                .copied()
                .find(|&p| packages[p as usize].is_installed())
        })
        .or_else(|| candidates.first().copied())
}

/// `used` of every installed package = number of installed packages with a
/// `Depend` it satisfies, counted once per dependent
fn compute_used_counts(tables: &mut Tables, deps: &[Vec<Dependency>]) {
    let mut used = vec![0u32; tables.packages.len()];

    for (pkg, list) in deps.iter().enumerate() {
        if !tables.packages[pkg].is_installed() {
            continue;
        }
        let mut satisfied: HashSet<u32> = HashSet::new();
        for dep in list {
            let Dependency::Ordinary {
                kind: DependKind::Depend,
                op,
                name,
                version,
            } = *dep
            else {
                continue;
            };
            let required = if version == NONE { "" } else { tables.string(version) };
            for entry in tables.index.entries(&tables.strings, name) {
                let target = entry.package;
                if target as usize != pkg
                    && tables.packages[target as usize].is_installed()
                    && match_version(tables.string(entry.version), required, op)
                {
                    satisfied.insert(target);
                }
            }
        }
        for target in satisfied {
            used[target as usize] += 1;
        }
    }

    for (record, count) in tables.packages.iter_mut().zip(used) {
        record.used = count;
    }
}

/// Encoded tables ready to be published
#[derive(Debug)]
pub struct BuiltDatabase {
    tables: Vec<(&'static str, Vec<u8>)>,
    package_count: usize,
    file_count: usize,
}

impl BuiltDatabase {
    fn encode(tables: &mut Tables, deps: &[Vec<Dependency>], files: &FileTreeBuilder) -> Result<Self> {
        for (idx, record) in tables.packages.iter_mut().enumerate() {
            record.deps = idx as u32;
        }

        let mut packages = Vec::with_capacity(4 + tables.packages.len() * PackageRecord::SIZE);
        packages.write_u32::<LE>(tables.packages.len() as u32)?;
        for record in &tables.packages {
            record.encode(&mut packages)?;
        }

        let mut depends = Vec::new();
        depends.write_u32::<LE>(deps.len() as u32)?;
        let mut ptr = 0u32;
        for list in deps {
            DependPtr {
                ptr,
                count: list.len() as u32,
            }
            .encode(&mut depends)?;
            ptr += (list.len() * RawDepend::SIZE) as u32;
        }
        for dep in deps.iter().flatten() {
            RawDepend::from(*dep).encode(&mut depends)?;
        }

        let mut strings = Vec::new();
        tables.strings.encode(&mut strings)?;
        let mut translate = Vec::new();
        tables.translations.encode(&mut translate)?;
        let mut strpackages = Vec::new();
        tables.index.encode(&mut strpackages)?;
        let mut file_table = Vec::new();
        files.encode(&mut file_table)?;

        Ok(Self {
            tables: vec![
                (PACKAGES_TABLE, packages),
                (FILES_TABLE, file_table),
                (STRINGS_TABLE, strings),
                (TRANSLATE_TABLE, translate),
                (DEPENDS_TABLE, depends),
                (STRPACKAGES_TABLE, strpackages),
            ],
            package_count: tables.packages.len(),
            file_count: files.len(),
        })
    }

    pub fn package_count(&self) -> usize {
        self.package_count
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    /// Encoded bytes of one table
    pub fn table(&self, name: &str) -> Option<&[u8]> {
        self.tables
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Publish the tables into `dir`
    ///
    /// Tables are written to a staging directory next to `dir`, which then
    /// replaces `dir` by rename. The previous database is restored if the
    /// swap fails, so readers never see a partial set of tables.
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        let parent = match dir.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;

        let staging = tempfile::Builder::new()
            .prefix(".hyperpkg-staging-")
            .tempdir_in(&parent)
            .map_err(|e| Error::IoError(format!("Failed to create staging directory: {}", e)))?;

        for (name, bytes) in &self.tables {
            let path = staging.path().join(name);
            let mut file = File::create(&path).map_err(|e| {
                Error::IoError(format!("Failed to create {}: {}", path.display(), e))
            })?;
            file.write_all(bytes)
                .and_then(|_| file.sync_all())
                .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))?;
        }

        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db".to_string());
        let backup = parent.join(format!(".{}.previous", dir_name));

        let had_previous = dir.exists();
        if had_previous {
            if backup.exists() {
                fs::remove_dir_all(&backup)?;
            }
            fs::rename(dir, &backup).map_err(|e| {
                Error::IoError(format!("Failed to move aside {}: {}", dir.display(), e))
            })?;
        }

        if let Err(e) = fs::rename(staging.path(), dir) {
            if had_previous {
                if let Err(restore) = fs::rename(&backup, dir) {
                    warn!("Failed to restore previous database: {}", restore);
                }
            }
            return Err(Error::IoError(format!(
                "Failed to publish database at {}: {}",
                dir.display(),
                e
            )));
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!("Failed to remove {}: {}", backup.display(), e);
            }
        }

        info!(
            "Wrote database with {} packages and {} files to {}",
            self.package_count,
            self.file_count,
            dir.display()
        );
        Ok(())
    }
}

/// Build a database from feeds and the installed state
///
/// # Arguments
///
/// * `feeds` - Repository feeds, in priority order
/// * `installed` - Previously installed packages and files
/// * `verifier` - Trust decision for feeds that require verification
///
/// # Returns
///
/// * `Result<BuiltDatabase>` - Encoded tables, not yet written anywhere
pub fn build(
    feeds: &[Feed],
    installed: InstalledState,
    verifier: &dyn FeedVerifier,
) -> Result<BuiltDatabase> {
    let mut writer = DatabaseWriter::new(installed)?;
    for feed in feeds {
        writer.add_feed(feed, verifier)?;
    }
    writer.scan()?.link()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::format::{DependPtr, StrPackagePtr, StringRecord};
    use crate::repository::TrustAll;
    use byteorder::ByteOrder;

    fn count(bytes: &[u8]) -> u32 {
        LE::read_u32(&bytes[..4])
    }

    fn package(built: &BuiltDatabase, idx: usize) -> PackageRecord {
        let bytes = built.table(PACKAGES_TABLE).unwrap();
        PackageRecord::decode(&bytes[4 + idx * PackageRecord::SIZE..])
    }

    fn string(built: &BuiltDatabase, idx: u32) -> String {
        let bytes = built.table(STRINGS_TABLE).unwrap();
        let n = count(bytes) as usize;
        let rec = StringRecord::decode(&bytes[4 + idx as usize * StringRecord::SIZE..]);
        let blob = &bytes[4 + n * StringRecord::SIZE + rec.ptr as usize..];
        let end = blob.iter().position(|&b| b == 0).unwrap();
        String::from_utf8(blob[..end].to_vec()).unwrap()
    }

    fn dependencies(built: &BuiltDatabase, pkg: usize) -> Vec<Dependency> {
        let bytes = built.table(DEPENDS_TABLE).unwrap();
        let n = count(bytes) as usize;
        let ptr = DependPtr::decode(&bytes[4 + pkg * DependPtr::SIZE..]);
        let base = 4 + n * DependPtr::SIZE + ptr.ptr as usize;
        (0..ptr.count as usize)
            .map(|i| {
                RawDepend::decode(&bytes[base + i * RawDepend::SIZE..])
                    .to_dependency()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_installed_duplicate_is_merged() {
        let installed = InstalledState {
            packages: Some(b"[foo]\nVersion=1.0\n".to_vec()),
            files: None,
        };
        let feed = Feed::packages(
            "main",
            "stable",
            "[foo]\nVersion=1.0\nLicense=MIT\n[foo]\nVersion=2.0\n",
        );
        let built = build(&[feed], installed, &TrustAll).unwrap();

        assert_eq!(built.package_count(), 2);
        let first = package(&built, 0);
        assert!(first.is_installed());
        assert_eq!(string(&built, first.license), "MIT");
        assert!(!package(&built, 1).is_installed());
    }

    #[test]
    fn test_reverse_edges() {
        let feed = Feed::packages(
            "main",
            "stable",
            "[a]\nVersion=1\nDepends=b\n\
             [b]\nVersion=1\n\
             [c]\nVersion=1\nConflicts=b\n\
             [d]\nVersion=1\nReplaces=b (< 2)\nProvides=virt\n",
        );
        let built = build(&[feed], InstalledState::empty(), &TrustAll).unwrap();

        let b_deps = dependencies(&built, 1);
        assert!(b_deps.contains(&Dependency::ReverseOf { dependent: 0 }));

        let conflicts: Vec<_> = b_deps
            .iter()
            .filter(|d| d.kind() == DependKind::Conflict)
            .collect();
        // back-edges from c (conflict) and d (replace)
        assert_eq!(conflicts.len(), 2);

        let d_deps = dependencies(&built, 3);
        assert!(d_deps.iter().any(|d| d.kind() == DependKind::Replace));
        assert!(d_deps.iter().any(|d| d.kind() == DependKind::Provide));
        // d registers itself under "b" but gets no back-edge from itself
        assert!(!d_deps.iter().any(|d| d.kind() == DependKind::Conflict));
    }

    #[test]
    fn test_alias_bucket() {
        let feed = Feed::packages("main", "stable", "[c]\nVersion=3\nProvides=d\n");
        let built = build(&[feed], InstalledState::empty(), &TrustAll).unwrap();

        let bytes = built.table(STRPACKAGES_TABLE).unwrap();
        // one bucket for "c", one for "d"
        assert_eq!(count(bytes), 2);
        let second = StrPackagePtr::decode(&bytes[4 + StrPackagePtr::SIZE..]);
        assert_eq!(second.count, 1);
    }

    #[test]
    fn test_used_counts_installed_dependents() {
        let installed = InstalledState {
            packages: Some(
                b"[lib]\nVersion=1\n[app]\nVersion=1\nDepends=lib; lib>=1\n[tool]\nVersion=1\nDepends=lib\n"
                    .to_vec(),
            ),
            files: None,
        };
        let feed = Feed::packages("main", "stable", "[other]\nVersion=1\nDepends=lib\n");
        let built = build(&[feed], installed, &TrustAll).unwrap();

        assert_eq!(package(&built, 0).used, 2);
        assert_eq!(package(&built, 1).used, 0);
    }

    #[test]
    fn test_translation_matches_repo_and_distribution() {
        let feeds = vec![
            Feed::packages("main", "stable", "[foo]\nVersion=1\n"),
            Feed::packages("extra", "stable", "[foo]\nVersion=2\n"),
            Feed::translations("main", "stable", "foo:Foo tools\n"),
        ];
        let built = build(&feeds, InstalledState::empty(), &TrustAll).unwrap();

        assert_ne!(package(&built, 0).short_desc, NONE);
        assert_eq!(package(&built, 1).short_desc, NONE);
    }

    #[test]
    fn test_file_owner_matches_feed_repo() {
        let feeds = vec![
            Feed::packages("main", "stable", "[foo]\nVersion=1\n"),
            Feed::packages("extra", "unstable", "[foo]\nVersion=2\n"),
            Feed::files("extra", "unstable", "foo|0|new\nghost|0|lost\nfoo|0|newer\n"),
            Feed::files("main", "stable", "foo|0|old\n"),
        ];
        let built = build(&feeds, InstalledState::empty(), &TrustAll).unwrap();

        // new, newer, old; the ghost line is skipped
        assert_eq!(count(built.table(FILES_TABLE).unwrap()), 3);
        assert_eq!(package(&built, 0).first_file, 2);
        assert_eq!(package(&built, 1).first_file, 1);
    }

    #[test]
    fn test_malformed_feed_aborts() {
        let feed = Feed::packages("main", "stable", "[foo]\nArch=x86_64\n");
        let err = build(&[feed], InstalledState::empty(), &TrustAll).unwrap_err();
        assert!(matches!(err, Error::MalformedFeed { .. }));
    }

    #[test]
    fn test_write_to_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("db");

        let first = build(
            &[Feed::packages("main", "stable", "[foo]\nVersion=1\n")],
            InstalledState::empty(),
            &TrustAll,
        )
        .unwrap();
        first.write_to(&target).unwrap();

        let second = build(
            &[Feed::packages("main", "stable", "[foo]\nVersion=1\n[bar]\nVersion=1\n")],
            InstalledState::empty(),
            &TrustAll,
        )
        .unwrap();
        second.write_to(&target).unwrap();

        let bytes = fs::read(target.join(PACKAGES_TABLE)).unwrap();
        assert_eq!(count(&bytes), 2);
        assert!(!dir.path().join(".db.previous").exists());
    }
}
