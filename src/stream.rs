//! Reading entry data.
//!
//! Each entry's [`ReadStrategy`] was picked while indexing;
//! here each strategy gets an [`EntryAccess`] implementation
//! so reads dispatch once instead of re-checking compression on every call.

use std::fs::File;
use std::io::{self, prelude::*, SeekFrom};
use std::sync::Arc;

use camino::Utf8PathBuf;
use flate2::read::DeflateDecoder;
use log::*;
use memmap2::Mmap;

use crate::arch::{self, usize};
use crate::bundle::BundleRange;
use crate::config::PackageOptions;
use crate::crc_reader::{self, Crc32Reader};
use crate::index::{ArchiveEntry, CompressionMethod, ReadStrategy};
use crate::package::PackageSource;
use crate::result::*;

/// What a read strategy can do with an entry
pub(crate) trait EntryAccess: Sync {
    /// Returns the entry's full contents.
    fn read_all(
        &self,
        source: &PackageSource,
        entry: &ArchiveEntry,
        options: &PackageOptions,
    ) -> AssetResult<Vec<u8>>;

    /// Opens a reader over the entry's contents.
    fn open(&self, source: &PackageSource, entry: &ArchiveEntry) -> AssetResult<EntryReader>;

    /// Returns the contiguous range of raw bytes holding the entry,
    /// for consumers that parse the package in place.
    fn raw_range<'a>(
        &self,
        source: &'a PackageSource,
        entry: &'a ArchiveEntry,
    ) -> AssetResult<BundleRange<'a>>;
}

impl ReadStrategy {
    pub(crate) fn access(self) -> &'static dyn EntryAccess {
        match self {
            ReadStrategy::StoredDirectRead => &StoredAccess,
            ReadStrategy::DecompressThenRead => &DecompressAccess,
            ReadStrategy::DirectoryPassthrough => &PassthroughAccess,
        }
    }
}

fn archive_mapping<'a>(
    source: &'a PackageSource,
    entry: &ArchiveEntry,
) -> AssetResult<&'a Arc<Mmap>> {
    source.mapping().ok_or_else(|| {
        AssetError::corrupt(format!("{} was indexed from an archive it isn't in", entry.path))
    })
}

/// Returns the slice of `mapping` holding the entry's stored bytes.
fn stored_bytes<'a>(mapping: &'a [u8], entry: &ArchiveEntry) -> AssetResult<&'a [u8]> {
    arch::slice(
        mapping,
        usize(entry.data_offset)?,
        usize(entry.compressed_size)?,
        &entry.path,
    )
}

struct StoredAccess;

impl EntryAccess for StoredAccess {
    fn read_all(
        &self,
        source: &PackageSource,
        entry: &ArchiveEntry,
        options: &PackageOptions,
    ) -> AssetResult<Vec<u8>> {
        let bytes = stored_bytes(archive_mapping(source, entry)?, entry)?;
        if options.verify_checksums {
            crc_reader::verify(bytes, entry.crc32, &entry.path)?;
        }
        Ok(bytes.to_vec())
    }

    fn open(&self, source: &PackageSource, entry: &ArchiveEntry) -> AssetResult<EntryReader> {
        let mapping = archive_mapping(source, entry)?;
        // Validate the range once so reads can't step outside it.
        stored_bytes(mapping, entry)?;
        Ok(EntryReader {
            backing: Backing::Mapped {
                mapping: mapping.clone(),
                start: usize(entry.data_offset)?,
            },
            len: entry.size,
            position: 0,
        })
    }

    fn raw_range<'a>(
        &self,
        source: &'a PackageSource,
        entry: &'a ArchiveEntry,
    ) -> AssetResult<BundleRange<'a>> {
        Ok(BundleRange::new(source, entry))
    }
}

struct DecompressAccess;

impl DecompressAccess {
    fn decompress(source: &PackageSource, entry: &ArchiveEntry) -> AssetResult<Vec<u8>> {
        if entry.encrypted {
            return Err(AssetError::unsupported_entry(&entry.path, "entry is encrypted"));
        }
        if entry.compression_method != CompressionMethod::Deflate {
            return Err(AssetError::unsupported_entry(
                &entry.path,
                format!("can't decompress {:?}", entry.compression_method),
            ));
        }
        let compressed = stored_bytes(archive_mapping(source, entry)?, entry)?;
        debug!(
            "Inflating {} ({} -> {} bytes)",
            entry.path, entry.compressed_size, entry.size
        );

        // Stop one byte past the recorded size; that's enough to tell it was wrong.
        let mut reader = Crc32Reader::new(DeflateDecoder::new(compressed), entry.crc32)
            .take(entry.size.saturating_add(1));
        let mut contents = Vec::with_capacity(usize(entry.size)?);
        match reader.read_to_end(&mut contents) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(AssetError::Checksum(entry.path.clone()))
            }
            Err(e) => return Err(e.into()),
        }
        if contents.len() as u64 != entry.size {
            return Err(AssetError::corrupt(format!(
                "{} inflated to {} bytes, expected {}",
                entry.path,
                contents.len(),
                entry.size
            )));
        }
        Ok(contents)
    }
}

impl EntryAccess for DecompressAccess {
    fn read_all(
        &self,
        source: &PackageSource,
        entry: &ArchiveEntry,
        _options: &PackageOptions,
    ) -> AssetResult<Vec<u8>> {
        Self::decompress(source, entry)
    }

    fn open(&self, source: &PackageSource, entry: &ArchiveEntry) -> AssetResult<EntryReader> {
        let contents = Self::decompress(source, entry)?;
        Ok(EntryReader {
            len: contents.len() as u64,
            backing: Backing::Decoded(contents),
            position: 0,
        })
    }

    fn raw_range<'a>(
        &self,
        _source: &'a PackageSource,
        entry: &'a ArchiveEntry,
    ) -> AssetResult<BundleRange<'a>> {
        Err(AssetError::unsupported_entry(
            &entry.path,
            format!(
                "entry is {:?}, but bundles are loaded from stored bytes",
                entry.compression_method
            ),
        ))
    }
}

struct PassthroughAccess;

impl PassthroughAccess {
    fn file_path(source: &PackageSource, entry: &ArchiveEntry) -> AssetResult<Utf8PathBuf> {
        let root = source.root().ok_or_else(|| {
            AssetError::corrupt(format!("{} was indexed from a directory it isn't in", entry.path))
        })?;
        Ok(root.join(entry.relative_path()))
    }

    fn open_file(source: &PackageSource, entry: &ArchiveEntry) -> AssetResult<File> {
        let path = Self::file_path(source, entry)?;
        trace!("Opening {}", path);
        File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AssetError::FileNotFound(entry.path.clone()),
            _ => AssetError::Io(e),
        })
    }
}

impl EntryAccess for PassthroughAccess {
    fn read_all(
        &self,
        source: &PackageSource,
        entry: &ArchiveEntry,
        _options: &PackageOptions,
    ) -> AssetResult<Vec<u8>> {
        let mut file = Self::open_file(source, entry)?;
        let mut contents = vec![0; usize(entry.size)?];
        file.read_exact(&mut contents)?;
        Ok(contents)
    }

    fn open(&self, source: &PackageSource, entry: &ArchiveEntry) -> AssetResult<EntryReader> {
        Ok(EntryReader {
            backing: Backing::File(Self::open_file(source, entry)?),
            len: entry.size,
            position: 0,
        })
    }

    fn raw_range<'a>(
        &self,
        source: &'a PackageSource,
        entry: &'a ArchiveEntry,
    ) -> AssetResult<BundleRange<'a>> {
        Ok(BundleRange::new(source, entry))
    }
}

enum Backing {
    /// Stored bytes starting at `start` in a shared mapping
    Mapped { mapping: Arc<Mmap>, start: usize },
    /// Bytes decompressed when the reader was opened
    Decoded(Vec<u8>),
    /// A file descriptor of our own
    File(File),
}

/// A seekable, read-only view of one entry.
///
/// Every reader has its own position, so readers over the same entry
/// (or the same package) never disturb each other.
/// Readers are `Send`, so hand them to as many threads as you'd like.
pub struct EntryReader {
    backing: Backing,
    len: u64,
    position: u64,
}

impl EntryReader {
    /// Length of the entry in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The entry's bytes, if they're already in memory
    /// (stored entries in an archive, or decompressed ones).
    pub fn as_slice(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Mapped { mapping, start } => {
                Some(&mapping[*start..*start + self.len as usize])
            }
            Backing::Decoded(contents) => Some(contents),
            Backing::File(_) => None,
        }
    }

    /// Reads from an explicit offset into the entry without moving
    /// the reader's position.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let wanted = self.clamp(offset, buf.len());
        if wanted == 0 {
            return Ok(0);
        }
        match &self.backing {
            Backing::File(file) => read_file_at(file, offset, &mut buf[..wanted]),
            _ => {
                // as_slice() is only None for files.
                let bytes = self.as_slice().unwrap_or_default();
                let start = offset as usize;
                buf[..wanted].copy_from_slice(&bytes[start..start + wanted]);
                Ok(wanted)
            }
        }
    }

    /// How many of `want` bytes starting at `offset` lie inside the entry
    fn clamp(&self, offset: u64, want: usize) -> usize {
        let left = self.len.saturating_sub(offset);
        want.min(usize::try_from(left).unwrap_or(usize::MAX))
    }
}

#[cfg(unix)]
fn read_file_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

// seek_read moves the handle's cursor, but every read here names its offset.
#[cfg(windows)]
fn read_file_at(file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(not(any(unix, windows)))]
fn read_file_at(mut file: &File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let wanted = self.clamp(self.position, buf.len());
        if wanted == 0 {
            return Ok(0);
        }
        let count = self.read_at(self.position, &mut buf[..wanted])?;
        self.position += count as u64;
        Ok(count)
    }
}

impl Seek for EntryReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}
