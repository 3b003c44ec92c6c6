//! Building the entry table for a package.
//!
//! Archives get their central directory walked once, with each file's data
//! offset resolved through its local header up front so reads never have to
//! parse anything. Directories get walked once and their files recorded.

use std::path::Path;
use std::time::SystemTime;

use camino::Utf8Path;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::*;
use walkdir::WalkDir;

use crate::arch::{self, usize};
use crate::config::{CompressedEntryPolicy, PackageOptions};
use crate::format::{self, *};
use crate::path::{self, normalize_entry_name};
use crate::result::*;

/// The compression method used to store a file
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompressionMethod {
    /// The file is uncompressed, so its bytes can be read in place.
    Stored,
    /// The file is [DEFLATE](https://en.wikipedia.org/wiki/DEFLATE)d.
    Deflate,
    /// The file is compressed with a format we don't decode.
    /// (The u16 indicates the internal format code.)
    Unsupported(u16),
}

/// How reads of an entry are served, decided once while indexing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Bytes are copied (or borrowed) straight out of the mapped archive.
    StoredDirectRead,
    /// Bytes are decompressed into a fresh buffer on every read.
    DecompressThenRead,
    /// Bytes live in a real file under a directory root.
    DirectoryPassthrough,
}

/// One file or directory in a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Normalized path inside the package, e.g. `/Bundles/level1.bytes`
    pub path: String,

    /// Which of the package's sources this entry came from
    /// (0 is the highest priority).
    pub source: usize,

    /// Offset of the entry's data from the start of its source.
    /// Always 0 for directory-backed files.
    pub data_offset: u64,

    /// Size of the data as stored in the package
    pub compressed_size: u64,

    /// Uncompressed size of the file in bytes
    pub size: u64,

    /// Compression algorithm used to store the file
    pub compression_method: CompressionMethod,

    /// The CRC-32 of the uncompressed file (0 when unknown)
    pub crc32: u32,

    /// True if the archive claims the file is encrypted
    pub encrypted: bool,

    /// When the file was last modified, if the package recorded a sensible time
    pub last_modified: Option<NaiveDateTime>,

    /// How reads of this entry are served
    pub strategy: ReadStrategy,

    is_dir: bool,
}

impl ArchiveEntry {
    /// Returns true if this entry only marks a directory
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Returns true if the entry is a readable file
    pub fn is_file(&self) -> bool {
        !self.is_dir
    }

    /// The final segment of the entry's path
    pub fn name(&self) -> &str {
        self.path
            .rsplit(path::SEPARATOR)
            .next()
            .unwrap_or(&self.path)
    }

    /// The entry's path without its leading separator,
    /// the way listings report it.
    pub fn relative_path(&self) -> &str {
        self.path.trim_start_matches(path::SEPARATOR)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(path: &str, source: usize, is_dir: bool) -> Self {
        Self {
            path: path.to_owned(),
            source,
            data_offset: 0,
            compressed_size: 0,
            size: 0,
            compression_method: CompressionMethod::Stored,
            crc32: 0,
            encrypted: false,
            last_modified: None,
            strategy: ReadStrategy::StoredDirectRead,
            is_dir,
        }
    }
}

/// Reads the central directory of the archive in `mapping`.
///
/// Returns the package's entries and the number of bytes prepended
/// to the archive (e.g., by a self-extracting stub).
pub fn index_archive(
    mapping: &[u8],
    source: usize,
    options: &PackageOptions,
) -> AssetResult<(Vec<ArchiveEntry>, usize)> {
    let eocdr_posit = format::find_eocdr(mapping)?;
    let eocdr = EndOfCentralDirectory::parse(&mapping[eocdr_posit..])?;
    trace!("{:?}", eocdr);
    if !eocdr.file_comment.is_empty() {
        debug!(
            "Archive comment: {}",
            String::from_utf8_lossy(eocdr.file_comment)
        );
    }

    if eocdr.disk_number != eocdr.disk_with_central_directory {
        return Err(AssetError::UnsupportedArchive(format!(
            "No support for multi-disk archives: disk ({}) != disk with central directory ({})",
            eocdr.disk_number, eocdr.disk_with_central_directory
        )));
    }
    if eocdr.entries != eocdr.entries_on_this_disk {
        return Err(AssetError::UnsupportedArchive(format!(
            "No support for multi-disk archives: entries ({}) != entries this disk ({})",
            eocdr.entries, eocdr.entries_on_this_disk
        )));
    }

    let nominal_central_directory_offset: usize;
    let central_directory_size: usize;
    let entry_count: u64;

    // Zip files can be prepended by arbitrary junk,
    // so all the given positions might be off.
    // Calculate the offset.
    let archive_offset;

    let zip64_locator = eocdr_posit
        .checked_sub(Zip64EndOfCentralDirectoryLocator::SIZE)
        .and_then(|posit| {
            Zip64EndOfCentralDirectoryLocator::parse(&mapping[posit..]).map(|l| (posit, l))
        });
    if let Some((locator_posit, locator)) = zip64_locator {
        trace!("{:?}", locator);

        if eocdr.disk_number as u32 != locator.disk_with_central_directory || locator.disks != 1
        {
            return Err(AssetError::UnsupportedArchive(format!(
                "No support for multi-disk archives: Zip64 locator reports {} disks",
                locator.disks
            )));
        }

        // Search for the zip64 EOCDR, from its nominal starting position
        // to the end of where it could be.
        let search_start = usize(locator.zip64_eocdr_offset)?;
        let search_space = mapping.get(search_start..locator_posit).ok_or_else(|| {
            AssetError::corrupt("Invalid Zip64 End Of Central Directory Record offset")
        })?;

        let zip64_eocdr_posit = format::find_zip64_eocdr(search_space)?;
        // Since we're searching starting at the provided offset,
        // the returned position is the archive offset.
        archive_offset = zip64_eocdr_posit;
        let zip64_eocdr = Zip64EndOfCentralDirectory::parse(&search_space[zip64_eocdr_posit..])?;
        trace!("{:?}", zip64_eocdr);

        if zip64_eocdr.disk_number != zip64_eocdr.disk_with_central_directory
            || zip64_eocdr.entries != zip64_eocdr.entries_on_this_disk
        {
            return Err(AssetError::UnsupportedArchive(String::from(
                "No support for multi-disk archives",
            )));
        }

        nominal_central_directory_offset = usize(zip64_eocdr.central_directory_offset)?;
        central_directory_size = usize(zip64_eocdr.central_directory_size)?;
        entry_count = zip64_eocdr.entries;
    } else {
        // The offset is the actual position versus the stored one.
        central_directory_size = usize(eocdr.central_directory_size)?;
        nominal_central_directory_offset = usize(eocdr.central_directory_offset)?;
        archive_offset = eocdr_posit
            .checked_sub(central_directory_size)
            .and_then(|actual| actual.checked_sub(nominal_central_directory_offset))
            .ok_or_else(|| AssetError::corrupt("Invalid central directory size or offset"))?;
        entry_count = eocdr.entries as u64;
    }

    if archive_offset != 0 && !options.allow_prepended_data {
        return Err(AssetError::PrependedWithUnknownBytes(archive_offset));
    }

    let archive = &mapping[archive_offset..];
    trace!(
        "{} entries at nominal offset {}",
        entry_count,
        nominal_central_directory_offset
    );

    let mut central_directory = arch::slice(
        archive,
        nominal_central_directory_offset,
        central_directory_size,
        "Central directory",
    )?;

    // Don't trust the count for the allocation; every record is at least 46 bytes.
    let mut entries = Vec::with_capacity(usize(entry_count)?.min(central_directory.len() / 46));

    for _ in 0..entry_count {
        let cde = CentralDirectoryEntry::parse_and_consume(&mut central_directory)?;
        trace!("{:?}", cde);

        if let Some(entry) = entry_from_cde(&cde, archive, archive_offset, source, options)? {
            debug!("{:?}", entry);
            entries.push(entry);
        }
    }

    Ok((entries, archive_offset))
}

/// Turns a central directory entry into an [`ArchiveEntry`],
/// resolving its data offset through the local header.
///
/// Returns `None` for the entry naming the root itself.
fn entry_from_cde(
    cde: &CentralDirectoryEntry,
    archive: &[u8],
    archive_offset: usize,
    source: usize,
    options: &PackageOptions,
) -> AssetResult<Option<ArchiveEntry>> {
    let name = format::decode_name(cde.path, cde.flags)?;

    if cde.disk_number != 0 {
        return Err(AssetError::UnsupportedArchive(format!(
            "No support for multi-disk archives: file {} claims to be on disk {}",
            name, cde.disk_number,
        )));
    }

    let wide = WideFields::from_cde(cde)?;
    let is_dir = name.ends_with(path::is_separator);
    if is_dir && wide.uncompressed_size != 0 {
        return Err(AssetError::corrupt(format!(
            "Directory entry {name} has {} bytes of data",
            wide.uncompressed_size
        )));
    }

    let normalized = normalize_entry_name(&name)?;
    if normalized.len() == 1 {
        warn!("Ignoring entry {name:?} naming the package root");
        return Ok(None);
    }
    if !path::is_addressable(&normalized) {
        warn!("Ignoring entry {name:?}; its name can't be looked up");
        return Ok(None);
    }

    let compression_method = CompressionMethod::from_u16(cde.compression_method);
    let encrypted = format::is_encrypted(cde.flags);
    let last_modified = format::parse_msdos(cde.last_modified_time, cde.last_modified_date);

    if is_dir {
        return Ok(Some(ArchiveEntry {
            path: normalized,
            source,
            data_offset: 0,
            compressed_size: 0,
            size: 0,
            compression_method,
            crc32: cde.crc32,
            encrypted,
            last_modified,
            strategy: ReadStrategy::StoredDirectRead,
            is_dir: true,
        }));
    }

    let header_offset = usize(wide.header_offset)?;
    let mut header = archive.get(header_offset..).ok_or_else(|| {
        AssetError::corrupt(format!("Local header for {name} is past the end of the package"))
    })?;
    let local = LocalFileHeader::parse_and_consume(&mut header)?;
    trace!("{:?}", local);

    if cfg!(feature = "check-local-metadata")
        && (local.compression_method != cde.compression_method
            || format::is_encrypted(local.flags) != encrypted)
    {
        return Err(AssetError::corrupt(format!(
            "Central directory entry for {name} doesn't match its local file header"
        )));
    }

    let data_start = header_offset + local.size_in_file();
    arch::slice(
        archive,
        data_start,
        usize(wide.compressed_size)?,
        &format!("Data for {name}"),
    )?;

    let strategy = if compression_method == CompressionMethod::Stored && !encrypted {
        if wide.compressed_size != wide.uncompressed_size {
            return Err(AssetError::corrupt(format!(
                "Stored entry {name} has compressed size {} but size {}",
                wide.compressed_size, wide.uncompressed_size
            )));
        }
        ReadStrategy::StoredDirectRead
    } else {
        match options.compressed_entries {
            CompressedEntryPolicy::Reject => {
                let reason = if encrypted {
                    String::from("entry is encrypted")
                } else {
                    format!("entry is compressed with {compression_method:?}")
                };
                return Err(AssetError::unsupported_entry(&normalized, reason));
            }
            CompressedEntryPolicy::Decompress => {
                debug!(
                    "{} is {:?}; it will be decompressed on every read",
                    normalized, compression_method
                );
                ReadStrategy::DecompressThenRead
            }
        }
    };

    Ok(Some(ArchiveEntry {
        path: normalized,
        source,
        data_offset: (archive_offset + data_start) as u64,
        compressed_size: wide.compressed_size,
        size: wide.uncompressed_size,
        compression_method,
        crc32: cde.crc32,
        encrypted,
        last_modified,
        strategy,
        is_dir: false,
    }))
}

/// Walks the directory at `root`, recording every file and directory below it.
///
/// Symlinks are followed. Children that can't be read (dangling links,
/// loops, permission trouble) or can't be named in a package path are
/// skipped with a warning; only a root we can't list fails the walk.
/// Entries come back in sorted order.
pub fn index_directory(root: &Utf8Path, source: usize) -> AssetResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    let mut walk = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    while let Some(child) = walk.next() {
        let child = match child {
            Ok(c) => c,
            Err(e) if e.depth() == 0 => return Err(AssetError::Io(e.into())),
            Err(e) => {
                warn!("Skipping {}", e);
                continue;
            }
        };
        if child.depth() == 0 {
            continue;
        }

        let entry_path = match virtual_path(root, child.path()) {
            Some(p) => p,
            None => {
                warn!(
                    "Skipping {} (its name can't be used as a package path)",
                    child.path().display()
                );
                if child.file_type().is_dir() {
                    walk.skip_current_dir();
                }
                continue;
            }
        };

        let metadata = match child.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("Skipping {}", e);
                continue;
            }
        };
        let last_modified = metadata.modified().ok().map(system_time_to_naive);

        if metadata.is_dir() {
            entries.push(ArchiveEntry {
                path: entry_path,
                source,
                data_offset: 0,
                compressed_size: 0,
                size: 0,
                compression_method: CompressionMethod::Stored,
                crc32: 0,
                encrypted: false,
                last_modified,
                strategy: ReadStrategy::DirectoryPassthrough,
                is_dir: true,
            });
        } else if metadata.is_file() {
            let entry = ArchiveEntry {
                path: entry_path,
                source,
                data_offset: 0,
                compressed_size: metadata.len(),
                size: metadata.len(),
                compression_method: CompressionMethod::Stored,
                crc32: 0,
                encrypted: false,
                last_modified,
                strategy: ReadStrategy::DirectoryPassthrough,
                is_dir: false,
            };
            debug!("{:?}", entry);
            entries.push(entry);
        } else {
            debug!("Skipping {} (not a file or directory)", child.path().display());
        }
    }
    Ok(entries)
}

/// Turns a path below `root` into a package path (`/a/b.txt`),
/// or `None` if some component isn't UTF-8 or isn't a valid path name.
fn virtual_path(root: &Utf8Path, child: &Path) -> Option<String> {
    let relative = Utf8Path::from_path(child.strip_prefix(root).ok()?)?;
    let mut entry_path = String::with_capacity(relative.as_str().len() + 1);
    for component in relative.iter() {
        if component.contains(path::ALT_SEPARATOR) || !path::is_addressable(component) {
            return None;
        }
        entry_path.push(path::SEPARATOR);
        entry_path.push_str(component);
    }
    Some(entry_path)
}

fn system_time_to_naive(time: SystemTime) -> NaiveDateTime {
    DateTime::<Utc>::from(time).naive_utc()
}
