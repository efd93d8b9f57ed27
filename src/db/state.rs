// src/db/state.rs

//! In-place state updates
//!
//! Only package flags, reference counts and install bookkeeping, plus file
//! flags and install times, may change after a build. Changes go straight
//! into the mapped tables; call [`Database::flush`] to force them to disk.
//!
//! A rebuild starts from the installed package list, not from the tables,
//! so committed changes are also written back there with
//! [`Database::write_installed_state`].

use super::format::{package_flags, Dependency, DependKind, FileRecord, PackageRecord};
use super::reader::Database;
use crate::error::{Error, Result};
use crate::resolver::Action;
use crate::version::{depend_string, DependOp};
use byteorder::{ByteOrder, LittleEndian as LE};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

const FEED_DEPENDS: [(&str, DependKind); 5] = [
    ("Depends", DependKind::Depend),
    ("Suggests", DependKind::Suggest),
    ("Conflicts", DependKind::Conflict),
    ("Provides", DependKind::Provide),
    ("Replaces", DependKind::Replace),
];

fn push_field(out: &mut String, key: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    out.push_str(key);
    out.push('=');
    out.push_str(value);
    out.push('\n');
}

impl Database {
    fn write_package_field(&mut self, pkg: u32, field: usize, value: u32) -> Result<()> {
        let off = self
            .package_offset(pkg)
            .ok_or_else(|| Error::PackageNotFound(format!("package index {}", pkg)))?;
        let bytes = self.packages.bytes_mut()?;
        LE::write_u32(&mut bytes[off + field..off + field + 4], value);
        Ok(())
    }

    fn write_file_field(&mut self, file: u32, field: usize, value: u32) -> Result<()> {
        let off = self
            .file_offset(file)
            .ok_or_else(|| Error::PackageNotFound(format!("file index {}", file)))?;
        let bytes = self.files.bytes_mut()?;
        LE::write_u32(&mut bytes[off + field..off + field + 4], value);
        Ok(())
    }

    pub fn set_flags(&mut self, pkg: u32, flags: u32) -> Result<()> {
        self.write_package_field(pkg, PackageRecord::FLAGS_OFFSET, flags)
    }

    /// Record install bookkeeping together with the new flags
    pub fn set_install_state(&mut self, pkg: u32, timestamp: u32, user: u32, flags: u32) -> Result<()> {
        self.write_package_field(pkg, PackageRecord::INSTALL_DATE_OFFSET, timestamp)?;
        self.write_package_field(pkg, PackageRecord::INSTALLED_BY_OFFSET, user)?;
        self.set_flags(pkg, flags)
    }

    /// Add `delta` to the reference count, saturating at both ends
    pub fn adjust_used_count(&mut self, pkg: u32, delta: i32) -> Result<u32> {
        let record = self
            .package(pkg)
            .ok_or_else(|| Error::PackageNotFound(format!("package index {}", pkg)))?;
        let used = record.used.saturating_add_signed(delta);
        self.write_package_field(pkg, PackageRecord::USED_OFFSET, used)?;
        Ok(used)
    }

    pub fn set_file_flags(&mut self, file: u32, flags: u32) -> Result<()> {
        self.write_file_field(file, FileRecord::FLAGS_OFFSET, flags)
    }

    pub fn set_file_install_time(&mut self, file: u32, timestamp: u32) -> Result<()> {
        self.write_file_field(file, FileRecord::INSTALL_TIME_OFFSET, timestamp)
    }

    /// Installed packages satisfying one of `pkg`'s `Depend` records,
    /// each listed once
    fn installed_dependencies(&self, pkg: u32) -> Vec<u32> {
        let mut seen = HashSet::new();
        for dep in self.dependencies(pkg) {
            let Dependency::Ordinary {
                kind: DependKind::Depend,
                op,
                name,
                version,
            } = dep
            else {
                continue;
            };
            for target in self.packages_of_string(version, name, op) {
                if target != pkg && self.package(target).is_some_and(|p| p.is_installed()) {
                    seen.insert(target);
                }
            }
        }
        let mut out: Vec<u32> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Installed packages that declared a dependency satisfied by `pkg`
    fn installed_dependents(&self, pkg: u32) -> usize {
        let mut seen = HashSet::new();
        for dep in self.dependencies(pkg) {
            if let Dependency::ReverseOf { dependent } = dep {
                if self.package(dependent).is_some_and(|p| p.is_installed()) {
                    seen.insert(dependent);
                }
            }
        }
        seen.len()
    }

    /// Record the outcome of an installer action
    ///
    /// Installing sets `INSTALLED`, clears `REMOVED`, stores the timestamp
    /// and user, sets `WANTED` when the user asked for the package, and
    /// bumps the reference count of every installed dependency. Removing
    /// does the reverse.
    pub fn register_action(
        &mut self,
        pkg: u32,
        action: Action,
        wanted: bool,
        timestamp: u32,
        user: u32,
    ) -> Result<()> {
        let record = self
            .package(pkg)
            .ok_or_else(|| Error::PackageNotFound(format!("package index {}", pkg)))?;

        match action {
            Action::Install | Action::Update => {
                if record.is_installed() {
                    return Ok(());
                }
                let mut flags = (record.flags | package_flags::INSTALLED) & !package_flags::REMOVED;
                if wanted {
                    flags |= package_flags::WANTED;
                }
                self.set_install_state(pkg, timestamp, user, flags)?;
                for target in self.installed_dependencies(pkg) {
                    self.adjust_used_count(target, 1)?;
                }
                let dependents = self.installed_dependents(pkg) as i32;
                self.write_package_field(pkg, PackageRecord::USED_OFFSET, 0)?;
                self.adjust_used_count(pkg, dependents)?;
            }
            Action::Remove | Action::Purge => {
                if !record.is_installed() {
                    return Ok(());
                }
                for target in self.installed_dependencies(pkg) {
                    self.adjust_used_count(target, -1)?;
                }
                let flags = (record.flags & !(package_flags::INSTALLED | package_flags::WANTED))
                    | package_flags::REMOVED;
                self.set_flags(pkg, flags)?;
                self.write_package_field(pkg, PackageRecord::USED_OFFSET, 0)?;
            }
        }

        debug!("Registered {:?} of package {}", action, pkg);
        Ok(())
    }

    /// `Conflict(=owner)` records the build added because `owner` conflicts
    /// with or replaces `pkg`
    fn is_conflict_back_edge(&self, pkg: u32, op: DependOp, name: u32, version: u32) -> bool {
        if op != DependOp::Eq {
            return false;
        }
        let Some(owner) = self.find_package(self.str(name), self.str(version)) else {
            return false;
        };
        owner != pkg
            && self.dependencies(owner).any(|dep| match dep {
                Dependency::Ordinary {
                    kind: DependKind::Conflict | DependKind::Replace,
                    op,
                    name,
                    version,
                } => self.packages_of_string(version, name, op).any(|p| p == pkg),
                _ => false,
            })
    }

    /// Render every installed package as a package list block
    ///
    /// The text parses back as the installed package list, so a rebuild
    /// from it keeps flags, install bookkeeping and dependency records.
    /// `used` counts are recomputed by the build and are not written.
    pub fn installed_feed(&self) -> String {
        let mut out = String::new();

        for pkg in self.packages() {
            let Some(record) = self.package(pkg) else {
                continue;
            };
            if !record.is_installed() {
                continue;
            }

            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[{}]\n", self.str(record.name)));

            for (key, idx) in [
                ("Version", record.version),
                ("Source", record.source),
                ("Maintainer", record.maintainer),
                ("Distribution", record.distribution),
                ("Section", record.section),
                ("UpstreamUrl", record.upstream_url),
                ("License", record.license),
                ("PackageHash", record.pkg_hash),
                ("MetadataHash", record.mtd_hash),
                ("Arch", record.arch),
                ("InstalledRepo", record.repo),
            ] {
                push_field(&mut out, key, self.str(idx));
            }
            push_field(&mut out, "ShortDesc", self.string(true, record.short_desc).unwrap_or(""));

            for (key, value) in [
                ("Flags", record.flags),
                ("DownloadSize", record.download_size),
                ("InstallSize", record.install_size),
                ("InstalledDate", record.install_date),
                ("InstalledBy", record.installed_by),
            ] {
                push_field(&mut out, key, &value.to_string());
            }

            for (key, wanted) in FEED_DEPENDS {
                let items: Vec<String> = self
                    .dependencies(pkg)
                    .filter_map(|dep| match dep {
                        Dependency::Ordinary {
                            kind,
                            op,
                            name,
                            version,
                        } if kind == wanted => {
                            if kind == DependKind::Conflict && self.is_conflict_back_edge(pkg, op, name, version) {
                                return None;
                            }
                            Some(depend_string(self.str(name), op, self.str(version)))
                        }
                        _ => None,
                    })
                    .collect();
                push_field(&mut out, key, &items.join("; "));
            }
        }
        out
    }

    /// Replace the installed package list at `path` with
    /// [`Self::installed_feed`]
    ///
    /// The text goes to a temporary file in the same directory first and is
    /// renamed over `path`, so readers never see a partial list.
    pub fn write_installed_state(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let text = self.installed_feed();
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(text.as_bytes())?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| Error::Io(e.error))?;

        info!("Wrote installed state to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::writer::build;
    use crate::repository::{Feed, InstalledState, TrustAll};
    use tempfile::TempDir;

    fn open(feed: &str, installed: &str) -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("db");
        let state = InstalledState {
            packages: Some(installed.as_bytes().to_vec()),
            files: None,
        };
        build(&[Feed::packages("main", "stable", feed)], state, &TrustAll)
            .unwrap()
            .write_to(&target)
            .unwrap();
        let db = Database::open(&target).unwrap();
        (dir, db)
    }

    #[test]
    fn test_flags_survive_reopen() {
        let (_dir, mut db) = open("[foo]\nVersion=1\n", "");
        db.set_flags(0, package_flags::DONT_UPDATE).unwrap();
        db.set_install_state(0, 1_700_000_000, 1000, package_flags::INSTALLED)
            .unwrap();
        db.flush().unwrap();

        let path = db.path().to_path_buf();
        drop(db);
        let db = Database::open_read_only(&path).unwrap();
        let pkg = db.package(0).unwrap();
        assert_eq!(pkg.flags, package_flags::INSTALLED);
        assert_eq!(pkg.install_date, 1_700_000_000);
        assert_eq!(pkg.installed_by, 1000);
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let (_dir, db) = open("[foo]\nVersion=1\n", "");
        let mut ro = Database::open_read_only(db.path()).unwrap();
        assert!(matches!(ro.set_flags(0, 0), Err(Error::ReadOnly)));
        assert!(matches!(ro.adjust_used_count(0, 1), Err(Error::ReadOnly)));
    }

    #[test]
    fn test_out_of_range_mutation() {
        let (_dir, mut db) = open("[foo]\nVersion=1\n", "");
        assert!(matches!(db.set_flags(5, 0), Err(Error::PackageNotFound(_))));
        assert!(db.set_file_flags(0, 1).is_err());
    }

    #[test]
    fn test_used_count_saturates() {
        let (_dir, mut db) = open("[foo]\nVersion=1\n", "");
        assert_eq!(db.adjust_used_count(0, -3).unwrap(), 0);
        assert_eq!(db.adjust_used_count(0, 2).unwrap(), 2);
    }

    #[test]
    fn test_installed_feed_parses_back() {
        let (_dir, mut db) = open(
            "[app]\nVersion=1\nShortDesc=The app\nDepends=lib>=1; extra\nConflicts=old\n\
             [extra]\nVersion=2\n",
            "[lib]\nVersion=1\nDistribution=stable\nInstalledRepo=main\n\
             [old]\nVersion=0.1\nDistribution=stable\nInstalledRepo=main\n",
        );
        let app = db.find_package("app", "1").unwrap();
        let extra = db.find_package("extra", "2").unwrap();
        db.register_action(extra, Action::Install, false, 1_700_000_000, 1000)
            .unwrap();
        db.register_action(app, Action::Install, true, 1_700_000_100, 1000)
            .unwrap();

        let text = db.installed_feed();
        let entries = crate::repository::parsers::parse_package_list("installed", &text).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["lib", "old", "app", "extra"]);

        let app = &entries[2];
        assert_eq!(app.version, "1");
        assert_eq!(app.short_desc.as_deref(), Some("The app"));
        assert_eq!(app.installed_repo.as_deref(), Some("main"));
        assert_eq!(app.installed_date, 1_700_000_100);
        assert_eq!(app.installed_by, 1000);
        assert!(app.flags & package_flags::WANTED != 0);
        assert!(app.flags & package_flags::INSTALLED != 0);
        let depends: Vec<String> = app.depends.iter().map(|d| d.to_string()).collect();
        assert_eq!(depends, vec!["lib>=1", "extra"]);
        assert_eq!(app.conflicts.len(), 1);
        assert_eq!(app.conflicts[0].name, "old");

        // the Conflict(=app) edge on old comes from app and is not written
        assert!(entries[1].conflicts.is_empty());
        assert!(entries[0].flags & package_flags::WANTED == 0);
    }

    #[test]
    fn test_write_installed_state_replaces_file() {
        let (dir, mut db) = open("[app]\nVersion=1\n", "");
        let path = dir.path().join("state").join("installed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[stale]\nVersion=9\n").unwrap();

        db.register_action(0, Action::Install, true, 1_700_000_000, 0)
            .unwrap();
        db.write_installed_state(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[app]\nVersion=1\n"));
        assert!(!text.contains("stale"));
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_register_install_and_remove() {
        let (_dir, mut db) = open("[app]\nVersion=1\nDepends=lib\n", "[lib]\nVersion=1\n");
        let lib = db.find_package("lib", "1").unwrap();
        let app = db.find_package("app", "1").unwrap();
        assert_eq!(db.package(lib).unwrap().used, 0);

        db.register_action(app, Action::Install, true, 1_700_000_000, 0)
            .unwrap();
        let record = db.package(app).unwrap();
        assert!(record.is_installed());
        assert!(record.has_flag(package_flags::WANTED));
        assert_eq!(db.package(lib).unwrap().used, 1);

        db.register_action(app, Action::Remove, false, 0, 0).unwrap();
        let record = db.package(app).unwrap();
        assert!(!record.is_installed());
        assert!(record.has_flag(package_flags::REMOVED));
        assert_eq!(db.package(lib).unwrap().used, 0);
    }
}
