// src/db/query.rs

//! User-facing queries
//!
//! These scan whole tables and are meant for interactive lookups, not for
//! the resolver's inner loop (which uses `packages_of_string`).

use super::format::{package_flags, NONE};
use super::reader::{Database, PackagesOfString};
use crate::error::{Error, Result};
use crate::version::{compare_versions, DependOp, VersionPattern};
use regex::Regex;
use std::cmp::Ordering;

fn anchored(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| Error::InvalidPattern(e.to_string()))
}

impl Database {
    /// Packages whose whole name matches the regular expression `pattern`
    pub fn packages_by_name(&self, pattern: &str) -> Result<impl Iterator<Item = u32> + '_> {
        let re = anchored(pattern)?;
        Ok(self.packages().filter(move |&idx| {
            self.package(idx)
                .is_some_and(|p| re.is_match(self.str(p.name)))
        }))
    }

    /// Packages matching a `name op version` pattern such as `libfoo>=1.2`
    ///
    /// Aliases registered through `Provides`/`Replaces` match as well.
    pub fn packages_by_version_string<'a>(
        &'a self,
        pattern: &'a VersionPattern,
    ) -> PackagesOfString<'a> {
        let name = self.find_string(&pattern.name).unwrap_or(NONE);
        self.packages_of_name(name, &pattern.version, pattern.op)
    }

    /// Package with exactly this name and version
    pub fn find_package(&self, name: &str, version: &str) -> Option<u32> {
        let name_idx = self.find_string(name)?;
        self.packages_of_name(name_idx, version, DependOp::Eq)
            .find(|&idx| {
                self.package(idx)
                    .is_some_and(|p| p.name == name_idx && self.str(p.version) == version)
            })
    }

    /// Other versions of `pkg`'s name in the same distribution
    pub fn same_name_siblings(&self, pkg: u32) -> impl Iterator<Item = u32> + '_ {
        let record = self.package(pkg);
        let (name, distribution) = record.map(|r| (r.name, r.distribution)).unwrap_or((NONE, NONE));
        self.packages_of_string(NONE, name, DependOp::None)
            .filter(move |&other| {
                other != pkg
                    && self
                        .package(other)
                        .is_some_and(|o| o.name == name && o.distribution == distribution)
            })
    }

    /// `(installed, candidate)` pairs where the candidate is the newest
    /// not-installed version of the same name in the same distribution
    pub fn upgrade_candidates(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();

        for idx in self.packages() {
            let Some(pkg) = self.package(idx) else {
                continue;
            };
            if !pkg.is_installed() || pkg.has_flag(package_flags::DONT_UPDATE) {
                continue;
            }

            let installed_version = self.str(pkg.version);
            let best = self
                .same_name_siblings(idx)
                .filter_map(|other| self.package(other).map(|r| (other, r)))
                .filter(|(_, r)| {
                    !r.is_installed()
                        && compare_versions(installed_version, self.str(r.version)) == Ordering::Less
                })
                .max_by(|(_, a), (_, b)| compare_versions(self.str(a.version), self.str(b.version)));

            if let Some((candidate, _)) = best {
                out.push((idx, candidate));
            }
        }
        out
    }

    /// Names with at least one upgrade candidate, sorted and listed once
    pub fn upgradable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .upgrade_candidates()
            .into_iter()
            .filter_map(|(installed, _)| self.package(installed).map(|r| self.str(r.name).to_string()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Installed packages nobody asked for and nothing depends on
    pub fn orphaned_packages(&self) -> Vec<u32> {
        self.packages()
            .filter(|&idx| {
                self.package(idx).is_some_and(|p| {
                    p.is_installed() && !p.has_flag(package_flags::WANTED) && p.used == 0
                })
            })
            .collect()
    }

    /// File at an absolute path like `/usr/bin/ls`
    pub fn find_file(&self, path: &str) -> Option<u32> {
        let mut dir = None;
        let mut found = None;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let hit = self.children(dir).find(|&idx| {
                self.file(idx)
                    .and_then(|f| self.file_name(&f).map(|n| n == part))
                    .unwrap_or(false)
            })?;
            dir = Some(hit);
            found = Some(hit);
        }
        found
    }

    /// Files whose full path matches the regular expression `pattern`
    pub fn files_matching(&self, pattern: &str) -> Result<Vec<u32>> {
        let re = anchored(pattern)?;
        Ok((0..self.file_count())
            .filter(|&idx| self.file_path(idx).is_some_and(|path| re.is_match(&path)))
            .collect())
    }
}
