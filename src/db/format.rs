// src/db/format.rs

//! On-disk record layouts
//!
//! Every table file starts with a little-endian `u32` record count followed
//! by fixed-size records. All integers are little-endian `u32` except the
//! two one-byte tags of a dependency record. [`NONE`] marks an absent index.
//!
//! | Table         | Header                 | Record          | Size |
//! |---------------|------------------------|-----------------|------|
//! | `packages`    | count                  | [`PackageRecord`] | 84 |
//! | `strings`     | count                  | [`StringRecord`] + NUL-terminated blob | 8 |
//! | `translate`   | count                  | [`StringRecord`] + NUL-terminated blob | 8 |
//! | `depends`     | count                  | [`DependPtr`], then flat [`RawDepend`] array | 8 / 12 |
//! | `strpackages` | count                  | [`StrPackagePtr`], then flat [`StrPackageRecord`] array | 8 / 8 |
//! | `files`       | count, root child      | [`FileRecord`] + NUL-terminated name blob | 32 |

use byteorder::{ByteOrder, LittleEndian as LE, WriteBytesExt};
use std::io::{self, Write};

use crate::version::DependOp;

/// Sentinel for "no index"
pub const NONE: u32 = u32::MAX;

pub const PACKAGES_TABLE: &str = "packages";
pub const STRINGS_TABLE: &str = "strings";
pub const TRANSLATE_TABLE: &str = "translate";
pub const DEPENDS_TABLE: &str = "depends";
pub const STRPACKAGES_TABLE: &str = "strpackages";
pub const FILES_TABLE: &str = "files";

/// All table files, in emission order
pub const TABLES: [&str; 6] = [
    PACKAGES_TABLE,
    FILES_TABLE,
    STRINGS_TABLE,
    TRANSLATE_TABLE,
    DEPENDS_TABLE,
    STRPACKAGES_TABLE,
];

/// Size of the leading count field
pub const COUNT_SIZE: usize = 4;

/// Package state flags
pub mod package_flags {
    pub const GUI: u32 = 0b100;
    pub const DONT_UPDATE: u32 = 0b1000;
    pub const DONT_INSTALL: u32 = 0b1_0000;
    pub const DONT_REMOVE: u32 = 0b10_0000;
    pub const EULA: u32 = 0b100_0000;
    pub const NEEDS_REBOOT: u32 = 0b1000_0000;
    pub const WANTED: u32 = 0b1_0000_0000;
    pub const INSTALLED: u32 = 0b10_0000_0000;
    pub const REMOVED: u32 = 0b100_0000_0000;
    /// Set on packages a user asked for explicitly
    pub const PRIMARY: u32 = 0b1000_0000_0000;

    /// Parse the `Flags` feed value: either a number or a comma separated
    /// list of flag names.
    pub fn parse(value: &str) -> Option<u32> {
        let value = value.trim();
        if value.is_empty() {
            return Some(0);
        }
        if let Ok(n) = value.parse::<u32>() {
            return Some(n);
        }

        let mut flags = 0;
        for word in value.split([',', ' ', '|']).filter(|w| !w.is_empty()) {
            flags |= match word.to_ascii_lowercase().as_str() {
                "gui" => GUI,
                "dontupdate" => DONT_UPDATE,
                "dontinstall" => DONT_INSTALL,
                "dontremove" => DONT_REMOVE,
                "eula" => EULA,
                "needsreboot" => NEEDS_REBOOT,
                "wanted" => WANTED,
                "installed" => INSTALLED,
                "removed" => REMOVED,
                "primary" => PRIMARY,
                _ => return None,
            };
        }
        Some(flags)
    }
}

/// File state flags
pub mod file_flags {
    pub const INSTALLED: u32 = 1;
    pub const DIR: u32 = 2;
    pub const DONT_REMOVE: u32 = 4;
    pub const DONT_PURGE: u32 = 8;
    pub const BACKUP: u32 = 16;
    pub const OVERWRITE: u32 = 32;
    pub const VIRTUAL: u32 = 64;
    pub const CHECK_BACKUP: u32 = 128;
}

fn read_u32_at(buf: &[u8], index: usize) -> u32 {
    LE::read_u32(&buf[index * 4..index * 4 + 4])
}

/// A package record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: u32,
    pub version: u32,
    pub maintainer: u32,
    /// Index into the translated string table
    pub short_desc: u32,
    pub source: u32,
    pub upstream_url: u32,
    pub repo: u32,
    pub arch: u32,
    pub section: u32,
    pub distribution: u32,
    pub license: u32,
    pub pkg_hash: u32,
    pub mtd_hash: u32,
    pub flags: u32,
    /// Index of this package's [`DependPtr`]
    pub deps: u32,
    pub install_size: u32,
    pub download_size: u32,
    pub used: u32,
    pub first_file: u32,
    pub install_date: u32,
    pub installed_by: u32,
}

impl Default for PackageRecord {
    fn default() -> Self {
        Self {
            name: NONE,
            version: NONE,
            maintainer: NONE,
            short_desc: NONE,
            source: NONE,
            upstream_url: NONE,
            repo: NONE,
            arch: NONE,
            section: NONE,
            distribution: NONE,
            license: NONE,
            pkg_hash: NONE,
            mtd_hash: NONE,
            flags: 0,
            deps: NONE,
            install_size: 0,
            download_size: 0,
            used: 0,
            first_file: NONE,
            install_date: 0,
            installed_by: 0,
        }
    }
}

impl PackageRecord {
    pub const SIZE: usize = 84;

    // Byte offsets of the fields mutated in place after the build
    pub const FLAGS_OFFSET: usize = 13 * 4;
    pub const USED_OFFSET: usize = 17 * 4;
    pub const INSTALL_DATE_OFFSET: usize = 19 * 4;
    pub const INSTALLED_BY_OFFSET: usize = 20 * 4;

    fn fields(&self) -> [u32; 21] {
        [
            self.name,
            self.version,
            self.maintainer,
            self.short_desc,
            self.source,
            self.upstream_url,
            self.repo,
            self.arch,
            self.section,
            self.distribution,
            self.license,
            self.pkg_hash,
            self.mtd_hash,
            self.flags,
            self.deps,
            self.install_size,
            self.download_size,
            self.used,
            self.first_file,
            self.install_date,
            self.installed_by,
        ]
    }

    /// Decode from a slice of at least [`Self::SIZE`] bytes
    pub fn decode(buf: &[u8]) -> Self {
        let f = |i| read_u32_at(buf, i);
        Self {
            name: f(0),
            version: f(1),
            maintainer: f(2),
            short_desc: f(3),
            source: f(4),
            upstream_url: f(5),
            repo: f(6),
            arch: f(7),
            section: f(8),
            distribution: f(9),
            license: f(10),
            pkg_hash: f(11),
            mtd_hash: f(12),
            flags: f(13),
            deps: f(14),
            install_size: f(15),
            download_size: f(16),
            used: f(17),
            first_file: f(18),
            install_date: f(19),
            installed_by: f(20),
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for value in self.fields() {
            w.write_u32::<LE>(value)?;
        }
        Ok(())
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_installed(&self) -> bool {
        self.has_flag(package_flags::INSTALLED)
    }
}

/// An interned string: offset into the trailing blob and the inverted-index
/// bucket of packages known under this string, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringRecord {
    pub ptr: u32,
    pub owner_bucket: u32,
}

impl StringRecord {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            ptr: read_u32_at(buf, 0),
            owner_bucket: read_u32_at(buf, 1),
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.ptr)?;
        w.write_u32::<LE>(self.owner_bucket)
    }
}

/// Location of one package's dependencies; `ptr` is a byte offset past the
/// pointer table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependPtr {
    pub ptr: u32,
    pub count: u32,
}

impl DependPtr {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            ptr: read_u32_at(buf, 0),
            count: read_u32_at(buf, 1),
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.ptr)?;
        w.write_u32::<LE>(self.count)
    }
}

/// Kind of a dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependKind {
    Depend,
    Suggest,
    Conflict,
    Provide,
    Replace,
    RevDep,
}

impl DependKind {
    pub fn code(self) -> u8 {
        match self {
            DependKind::Depend => 1,
            DependKind::Suggest => 2,
            DependKind::Conflict => 3,
            DependKind::Provide => 4,
            DependKind::Replace => 5,
            DependKind::RevDep => 6,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => DependKind::Depend,
            2 => DependKind::Suggest,
            3 => DependKind::Conflict,
            4 => DependKind::Provide,
            5 => DependKind::Replace,
            6 => DependKind::RevDep,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DependKind::Depend => "depends",
            DependKind::Suggest => "suggests",
            DependKind::Conflict => "conflicts",
            DependKind::Provide => "provides",
            DependKind::Replace => "replaces",
            DependKind::RevDep => "required by",
        }
    }
}

/// A decoded dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// A named requirement: `name` and `version` are string indices
    Ordinary {
        kind: DependKind,
        op: DependOp,
        name: u32,
        version: u32,
    },
    /// Synthetic reverse edge pointing at the package that depends on the
    /// owner of this record
    ReverseOf { dependent: u32 },
}

impl Dependency {
    pub fn kind(&self) -> DependKind {
        match self {
            Dependency::Ordinary { kind, .. } => *kind,
            Dependency::ReverseOf { .. } => DependKind::RevDep,
        }
    }
}

/// Raw dependency record as stored in the `depends` table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDepend {
    pub kind: u8,
    pub op: u8,
    /// String index, or the dependent package index for reverse edges
    pub name: u32,
    pub version: u32,
}

impl RawDepend {
    pub const SIZE: usize = 12;

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            kind: buf[0],
            op: buf[1],
            name: LE::read_u32(&buf[4..8]),
            version: LE::read_u32(&buf[8..12]),
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(self.kind)?;
        w.write_u8(self.op)?;
        w.write_u16::<LE>(0)?;
        w.write_u32::<LE>(self.name)?;
        w.write_u32::<LE>(self.version)
    }

    /// Interpret the record; `None` for unknown kind or operator codes
    pub fn to_dependency(self) -> Option<Dependency> {
        let kind = DependKind::from_code(self.kind)?;
        if kind == DependKind::RevDep {
            return Some(Dependency::ReverseOf {
                dependent: self.name,
            });
        }
        Some(Dependency::Ordinary {
            kind,
            op: DependOp::from_code(self.op)?,
            name: self.name,
            version: self.version,
        })
    }
}

impl From<Dependency> for RawDepend {
    fn from(dep: Dependency) -> Self {
        match dep {
            Dependency::Ordinary {
                kind,
                op,
                name,
                version,
            } => RawDepend {
                kind: kind.code(),
                op: op.code(),
                name,
                version,
            },
            Dependency::ReverseOf { dependent } => RawDepend {
                kind: DependKind::RevDep.code(),
                op: DependOp::None.code(),
                name: dependent,
                version: NONE,
            },
        }
    }
}

/// Location of one inverted-index bucket; `ptr` is a byte offset past the
/// pointer table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrPackagePtr {
    pub ptr: u32,
    pub count: u32,
}

impl StrPackagePtr {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            ptr: read_u32_at(buf, 0),
            count: read_u32_at(buf, 1),
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.ptr)?;
        w.write_u32::<LE>(self.count)
    }
}

/// One `(version, package)` entry of an inverted-index bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrPackageRecord {
    pub version: u32,
    pub package: u32,
}

impl StrPackageRecord {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Self {
        Self {
            version: read_u32_at(buf, 0),
            package: read_u32_at(buf, 1),
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.version)?;
        w.write_u32::<LE>(self.package)
    }
}

/// A node of the file tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    pub parent: u32,
    pub package: u32,
    pub flags: u32,
    /// Byte offset of the name in the table's blob
    pub name_ptr: u32,
    pub next_sibling: u32,
    pub next_file_pkg: u32,
    pub first_child: u32,
    pub install_time: u32,
}

impl Default for FileRecord {
    fn default() -> Self {
        Self {
            parent: NONE,
            package: NONE,
            flags: 0,
            name_ptr: NONE,
            next_sibling: NONE,
            next_file_pkg: NONE,
            first_child: NONE,
            install_time: 0,
        }
    }
}

impl FileRecord {
    pub const SIZE: usize = 32;
    /// Size of the `files` table header (count + root child)
    pub const HEADER_SIZE: usize = 8;

    pub const FLAGS_OFFSET: usize = 2 * 4;
    pub const INSTALL_TIME_OFFSET: usize = 7 * 4;

    pub fn decode(buf: &[u8]) -> Self {
        let f = |i| read_u32_at(buf, i);
        Self {
            parent: f(0),
            package: f(1),
            flags: f(2),
            name_ptr: f(3),
            next_sibling: f(4),
            next_file_pkg: f(5),
            first_child: f(6),
            install_time: f(7),
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for value in [
            self.parent,
            self.package,
            self.flags,
            self.name_ptr,
            self.next_sibling,
            self.next_file_pkg,
            self.first_child,
            self.install_time,
        ] {
            w.write_u32::<LE>(value)?;
        }
        Ok(())
    }

    pub fn is_dir(&self) -> bool {
        self.flags & file_flags::DIR != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes_match_encoding() {
        let mut buf = Vec::new();
        PackageRecord::default().encode(&mut buf).unwrap();
        assert_eq!(buf.len(), PackageRecord::SIZE);

        buf.clear();
        FileRecord::default().encode(&mut buf).unwrap();
        assert_eq!(buf.len(), FileRecord::SIZE);

        buf.clear();
        RawDepend::from(Dependency::ReverseOf { dependent: 3 })
            .encode(&mut buf)
            .unwrap();
        assert_eq!(buf.len(), RawDepend::SIZE);
    }

    #[test]
    fn test_mutable_field_offsets() {
        let pkg = PackageRecord {
            flags: 0xAABB,
            used: 7,
            install_date: 1_700_000_000,
            installed_by: 1000,
            ..Default::default()
        };
        let mut buf = Vec::new();
        pkg.encode(&mut buf).unwrap();

        let at = |off: usize| LE::read_u32(&buf[off..off + 4]);
        assert_eq!(at(PackageRecord::FLAGS_OFFSET), 0xAABB);
        assert_eq!(at(PackageRecord::USED_OFFSET), 7);
        assert_eq!(at(PackageRecord::INSTALL_DATE_OFFSET), 1_700_000_000);
        assert_eq!(at(PackageRecord::INSTALLED_BY_OFFSET), 1000);
    }

    #[test]
    fn test_revdep_reuses_name_field() {
        let raw = RawDepend::from(Dependency::ReverseOf { dependent: 42 });
        assert_eq!(raw.kind, DependKind::RevDep.code());
        assert_eq!(raw.name, 42);
        assert_eq!(raw.version, NONE);
        assert_eq!(
            raw.to_dependency(),
            Some(Dependency::ReverseOf { dependent: 42 })
        );
    }

    #[test]
    fn test_unknown_codes_are_rejected() {
        let raw = RawDepend {
            kind: 0,
            op: 0,
            name: 0,
            version: 0,
        };
        assert!(raw.to_dependency().is_none());

        let raw = RawDepend {
            kind: DependKind::Depend.code(),
            op: 9,
            name: 0,
            version: 0,
        };
        assert!(raw.to_dependency().is_none());
    }

    #[test]
    fn test_parse_flags() {
        use package_flags::*;
        assert_eq!(parse("512"), Some(INSTALLED));
        assert_eq!(parse("installed,wanted"), Some(INSTALLED | WANTED));
        assert_eq!(parse("DontUpdate"), Some(DONT_UPDATE));
        assert_eq!(parse(""), Some(0));
        assert_eq!(parse("bogus"), None);
    }
}
