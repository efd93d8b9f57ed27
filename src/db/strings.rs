// src/db/strings.rs

//! String interning and the inverted name index, writer side

use super::format::{StrPackagePtr, StrPackageRecord, StringRecord, NONE};
use byteorder::{LittleEndian as LE, WriteBytesExt};
use std::collections::HashMap;
use std::io::{self, Write};

/// Append-only, content-deduplicated string table
#[derive(Debug, Default)]
pub struct StringTableBuilder {
    strings: Vec<String>,
    lookup: HashMap<String, u32>,
    owner_bucket: Vec<u32>,
}

impl StringTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `s`, inserting it if it is new
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&idx) = self.lookup.get(s) {
            return idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), idx);
        self.owner_bucket.push(NONE);
        idx
    }

    pub fn get(&self, s: &str) -> Option<u32> {
        self.lookup.get(s).copied()
    }

    pub fn resolve(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    fn bucket(&self, idx: u32) -> u32 {
        self.owner_bucket.get(idx as usize).copied().unwrap_or(NONE)
    }

    /// Serialize as count, records, then the NUL-terminated blob
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.strings.len() as u32)?;

        let mut ptr = 0u32;
        for (s, bucket) in self.strings.iter().zip(&self.owner_bucket) {
            StringRecord {
                ptr,
                owner_bucket: *bucket,
            }
            .encode(w)?;
            ptr += s.len() as u32 + 1;
        }

        for s in &self.strings {
            w.write_all(s.as_bytes())?;
            w.write_u8(0)?;
        }
        Ok(())
    }
}

/// Name → `(version, package)` buckets
///
/// Buckets are only allocated for strings that actually own a package.
#[derive(Debug, Default)]
pub struct InvertedIndexBuilder {
    buckets: Vec<Vec<StrPackageRecord>>,
}

impl InvertedIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `package` as known under `name` at `version`
    pub fn register(&mut self, strings: &mut StringTableBuilder, name: u32, version: u32, package: u32) {
        let Some(slot) = strings.owner_bucket.get_mut(name as usize) else {
            return;
        };
        if *slot == NONE {
            *slot = self.buckets.len() as u32;
            self.buckets.push(Vec::new());
        }

        let entry = StrPackageRecord { version, package };
        let bucket = &mut self.buckets[*slot as usize];
        if !bucket.contains(&entry) {
            bucket.push(entry);
        }
    }

    /// Entries registered under `name`
    pub fn entries(&self, strings: &StringTableBuilder, name: u32) -> &[StrPackageRecord] {
        match strings.bucket(name) {
            NONE => &[],
            b => self.buckets.get(b as usize).map(Vec::as_slice).unwrap_or(&[]),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Serialize as count, bucket pointers, then the flat entry array
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.buckets.len() as u32)?;

        let mut ptr = 0u32;
        for bucket in &self.buckets {
            StrPackagePtr {
                ptr,
                count: bucket.len() as u32,
            }
            .encode(w)?;
            ptr += (bucket.len() * StrPackageRecord::SIZE) as u32;
        }

        for entry in self.buckets.iter().flatten() {
            entry.encode(w)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_deduplicated() {
        let mut t = StringTableBuilder::new();
        let a = t.intern("libfoo");
        let b = t.intern("1.0");
        let c = t.intern("libfoo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(t.len(), 2);
        assert_eq!(t.resolve(b), Some("1.0"));
    }

    #[test]
    fn test_buckets_are_lazy() {
        let mut strings = StringTableBuilder::new();
        let mut index = InvertedIndexBuilder::new();
        let name = strings.intern("foo");
        let version = strings.intern("1.0");

        assert!(index.entries(&strings, name).is_empty());
        index.register(&mut strings, name, version, 0);
        index.register(&mut strings, name, version, 0);
        index.register(&mut strings, name, version, 1);

        assert_eq!(index.bucket_count(), 1);
        assert_eq!(index.entries(&strings, name).len(), 2);
        assert!(index.entries(&strings, version).is_empty());
    }

    #[test]
    fn test_encoded_layout() {
        let mut strings = StringTableBuilder::new();
        strings.intern("ab");
        strings.intern("c");
        let mut buf = Vec::new();
        strings.encode(&mut buf).unwrap();

        // count + 2 records + "ab\0c\0"
        assert_eq!(buf.len(), 4 + 2 * StringRecord::SIZE + 5);
        let second = StringRecord::decode(&buf[4 + StringRecord::SIZE..]);
        assert_eq!(second.ptr, 3);
        assert_eq!(second.owner_bucket, NONE);
    }
}
