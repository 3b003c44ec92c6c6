//! Builds small ZIP packages for tests, so we don't need binary fixtures.

#![allow(dead_code)]

use std::io::prelude::*;
use std::path::{Path, PathBuf};

use anyhow::Result;
use flate2::write::DeflateEncoder;
use flate2::Compression;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Entry {
    name: String,
    flags: u16,
    method: u16,
    crc32: u32,
    size: u32,
    data: Vec<u8>,
    local_extra: Vec<u8>,
}

/// Writes ZIP archives the boring way: no data descriptors,
/// and Zip64 records only when asked for.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<Entry>,
    comment: Vec<u8>,
    prefix: Vec<u8>,
    zip64: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file stored uncompressed.
    pub fn stored(mut self, name: &str, contents: &[u8]) -> Self {
        self.entries.push(Entry {
            name: name.to_owned(),
            flags: 0,
            method: 0,
            crc32: crc32fast::hash(contents),
            size: contents.len() as u32,
            data: contents.to_vec(),
            local_extra: Vec::new(),
        });
        self
    }

    /// Adds a DEFLATEd file.
    pub fn deflated(mut self, name: &str, contents: &[u8]) -> Self {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(contents).unwrap();
        self.entries.push(Entry {
            name: name.to_owned(),
            flags: 0,
            method: 8,
            crc32: crc32fast::hash(contents),
            size: contents.len() as u32,
            data: encoder.finish().unwrap(),
            local_extra: Vec::new(),
        });
        self
    }

    /// Adds an explicit directory entry. `name` should end in a slash.
    pub fn directory(mut self, name: &str) -> Self {
        self.entries.push(Entry {
            name: name.to_owned(),
            flags: 0,
            method: 0,
            crc32: 0,
            size: 0,
            data: Vec::new(),
            local_extra: Vec::new(),
        });
        self
    }

    fn last(&mut self) -> &mut Entry {
        self.entries.last_mut().expect("No entry to modify")
    }

    /// Gives the last entry a local extra field the central directory doesn't have.
    pub fn local_extra(mut self, extra: &[u8]) -> Self {
        self.last().local_extra = extra.to_vec();
        self
    }

    /// Overrides the last entry's recorded compression method.
    pub fn method(mut self, method: u16) -> Self {
        self.last().method = method;
        self
    }

    /// Overrides the last entry's recorded CRC-32.
    pub fn crc32(mut self, crc32: u32) -> Self {
        self.last().crc32 = crc32;
        self
    }

    /// Sets the general purpose flags of the last entry.
    pub fn flags(mut self, flags: u16) -> Self {
        self.last().flags = flags;
        self
    }

    /// Overrides the last entry's recorded (uncompressed) size.
    pub fn size(mut self, size: u32) -> Self {
        self.last().size = size;
        self
    }

    /// Writes Zip64 end of central directory records, and Zip64 extra fields
    /// in place of every central directory size and offset.
    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Puts junk in front of the archive, like a self-extracting stub.
    /// Offsets in the archive don't account for it.
    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut archive = Vec::new();
        let mut central = Vec::new();

        for entry in &self.entries {
            let header_offset = archive.len() as u32;

            put32(&mut archive, 0x04034b50);
            put16(&mut archive, 20);
            put16(&mut archive, entry.flags);
            put16(&mut archive, entry.method);
            // 12:00, January 1st, 2020
            put16(&mut archive, 12 << 11);
            put16(&mut archive, (40 << 9) | (1 << 5) | 1);
            put32(&mut archive, entry.crc32);
            put32(&mut archive, entry.data.len() as u32);
            put32(&mut archive, entry.size);
            put16(&mut archive, entry.name.len() as u16);
            put16(&mut archive, entry.local_extra.len() as u16);
            archive.extend_from_slice(entry.name.as_bytes());
            archive.extend_from_slice(&entry.local_extra);
            archive.extend_from_slice(&entry.data);

            put32(&mut central, 0x02014b50);
            put16(&mut central, 20);
            put16(&mut central, 20);
            put16(&mut central, entry.flags);
            put16(&mut central, entry.method);
            put16(&mut central, 12 << 11);
            put16(&mut central, (40 << 9) | (1 << 5) | 1);
            put32(&mut central, entry.crc32);
            let mut extra = Vec::new();
            if self.zip64 {
                put32(&mut central, u32::MAX);
                put32(&mut central, u32::MAX);
                // Zip64 extended information: sizes, then the header offset
                put16(&mut extra, 0x0001);
                put16(&mut extra, 24);
                put64(&mut extra, entry.size as u64);
                put64(&mut extra, entry.data.len() as u64);
                put64(&mut extra, header_offset as u64);
            } else {
                put32(&mut central, entry.data.len() as u32);
                put32(&mut central, entry.size);
            }
            put16(&mut central, entry.name.len() as u16);
            put16(&mut central, extra.len() as u16);
            put16(&mut central, 0); // file comment
            put16(&mut central, 0); // disk
            put16(&mut central, 0); // internal attributes
            put32(&mut central, 0); // external attributes
            put32(&mut central, if self.zip64 { u32::MAX } else { header_offset });
            central.extend_from_slice(entry.name.as_bytes());
            central.extend_from_slice(&extra);
        }

        let central_offset = archive.len() as u32;
        archive.extend_from_slice(&central);

        if self.zip64 {
            let zip64_eocdr_offset = archive.len() as u64;
            put32(&mut archive, 0x06064b50);
            put64(&mut archive, 44); // size of the rest of this record
            put16(&mut archive, 45);
            put16(&mut archive, 45);
            put32(&mut archive, 0);
            put32(&mut archive, 0);
            put64(&mut archive, self.entries.len() as u64);
            put64(&mut archive, self.entries.len() as u64);
            put64(&mut archive, central.len() as u64);
            put64(&mut archive, central_offset as u64);

            put32(&mut archive, 0x07064b50);
            put32(&mut archive, 0);
            put64(&mut archive, zip64_eocdr_offset);
            put32(&mut archive, 1);
        }

        let (count, size, offset) = if self.zip64 {
            (u16::MAX, u32::MAX, u32::MAX)
        } else {
            (
                self.entries.len() as u16,
                central.len() as u32,
                central_offset,
            )
        };
        put32(&mut archive, 0x06054b50);
        put16(&mut archive, 0);
        put16(&mut archive, 0);
        put16(&mut archive, count);
        put16(&mut archive, count);
        put32(&mut archive, size);
        put32(&mut archive, offset);
        put16(&mut archive, self.comment.len() as u16);
        archive.extend_from_slice(&self.comment);

        let mut package = self.prefix.clone();
        package.extend_from_slice(&archive);
        package
    }

    /// Writes the archive to `dir/name` and returns its path.
    pub fn write(&self, dir: &Path, name: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, self.build())?;
        Ok(path)
    }
}

fn put16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Deterministic, incompressible-ish bytes
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
