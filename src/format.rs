//! Code specific to the ZIP file format.
//!
//! We try to keep the nitty gritty here,
//! and the higher-level indexing in the [`index`] module.
//!
//! Most comments quote PKWARE's [`APPNOTE.TXT`].
//!
//! Unlike a general-purpose unzipper, every parser here checks its input
//! length before reading: a package is handed to us by the application
//! at startup, and a truncated one has to surface as
//! [`AssetError::CorruptArchive`] instead of a panic.
//!
//! [`index`]: crate::index
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveDateTime};
use codepage_437::*;
use log::*;
use memchr::memmem;

use crate::arch::usize;
use crate::index::CompressionMethod;
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];
/// Local file header magic number
const LOCAL_FILE_HEADER_MAGIC: [u8; 4] = [b'P', b'K', 3, 4];

/// The archive comment length is a u16, so the EOCDR is never further
/// than this from the end of the file.
const MAX_COMMENT_SIZE: usize = u16::MAX as usize;

impl CompressionMethod {
    pub(crate) fn from_u16(u: u16) -> Self {
        match u {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            v => CompressionMethod::Unsupported(v),
        }
    }
}

/// Splits `n` bytes off the front of `input`,
/// or complains that `what` was truncated.
fn take<'a>(input: &mut &'a [u8], n: usize, what: &str) -> AssetResult<&'a [u8]> {
    if input.len() < n {
        return Err(AssetError::corrupt(format!("Truncated {what}")));
    }
    let (front, rest) = input.split_at(n);
    *input = rest;
    Ok(front)
}

// Callers check the fixed-size portion of each record up front,
// so these can't run short.

/// Reads a little-endian u64 from the front of the provided slice, shrinking it.
fn read_u64(input: &mut &[u8]) -> u64 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u64>());
    *input = rest;
    u64::from_le_bytes(int_bytes.try_into().unwrap())
}

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().unwrap())
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().unwrap())
}

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory.
#[derive(Debug)]
pub struct EndOfCentralDirectory<'a> {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub file_comment: &'a [u8],
}

impl<'a> EndOfCentralDirectory<'a> {
    pub const SIZE: usize = 22;

    pub fn parse(mut eocdr: &'a [u8]) -> AssetResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        let mut fixed = take(&mut eocdr, Self::SIZE, "End Of Central Directory Record")?;
        if fixed[..4] != EOCDR_MAGIC {
            return Err(AssetError::corrupt(
                "Invalid End Of Central Directory Record signature",
            ));
        }
        fixed = &fixed[4..];
        let disk_number = read_u16(&mut fixed);
        let disk_with_central_directory = read_u16(&mut fixed);
        let entries_on_this_disk = read_u16(&mut fixed);
        let entries = read_u16(&mut fixed);
        let central_directory_size = read_u32(&mut fixed);
        let central_directory_offset = read_u32(&mut fixed);
        let comment_length = read_u16(&mut fixed);
        let file_comment = take(&mut eocdr, usize(comment_length)?, "archive comment")?;

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
            file_comment,
        })
    }
}

/// Searches backward through the tail of `mapping` to find the
/// End of central directory record.
///
/// It should be right at the end of the file,
/// but a trailing comment of up to 64 KiB means we can't jump to a known offset.
/// A candidate whose comment length accounts for exactly the remaining
/// bytes wins; failing that, the last candidate that fits is used.
pub fn find_eocdr(mapping: &[u8]) -> AssetResult<usize> {
    let window_start = mapping
        .len()
        .saturating_sub(EndOfCentralDirectory::SIZE + MAX_COMMENT_SIZE);
    let window = &mapping[window_start..];

    let mut fallback = None;
    for candidate in memmem::rfind_iter(window, &EOCDR_MAGIC) {
        let remaining = window.len() - candidate;
        if remaining < EndOfCentralDirectory::SIZE {
            continue;
        }
        let comment_length = usize::from(u16::from_le_bytes([
            window[candidate + 20],
            window[candidate + 21],
        ]));
        let record_length = EndOfCentralDirectory::SIZE + comment_length;
        if record_length == remaining {
            return Ok(window_start + candidate);
        }
        if record_length < remaining && fallback.is_none() {
            fallback = Some(window_start + candidate);
        }
    }

    match fallback {
        Some(posit) => {
            warn!(
                "End Of Central Directory Record at {} is followed by unexpected trailing bytes",
                posit
            );
            Ok(posit)
        }
        None => Err(AssetError::corrupt(
            "Couldn't find End Of Central Directory Record",
        )),
    }
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub const SIZE: usize = 20;

    pub fn parse(mut mapping: &[u8]) -> Option<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        if mapping.len() < Self::SIZE || mapping[..4] != ZIP64_EOCDR_LOCATOR_MAGIC {
            return None;
        }
        mapping = &mapping[4..];
        let disk_with_central_directory = read_u32(&mut mapping);
        let zip64_eocdr_offset = read_u64(&mut mapping);
        let disks = read_u32(&mut mapping);

        Some(Self {
            disk_with_central_directory,
            zip64_eocdr_offset,
            disks,
        })
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    const FIXED_SIZE: usize = 56;

    pub fn parse(mut eocdr: &[u8]) -> AssetResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        let mut fixed = take(
            &mut eocdr,
            Self::FIXED_SIZE,
            "Zip64 End Of Central Directory Record",
        )?;
        if fixed[..4] != ZIP64_EOCDR_MAGIC {
            return Err(AssetError::corrupt(
                "Invalid Zip64 End Of Central Directory Record signature",
            ));
        }
        fixed = &fixed[4..];
        let _eocdr_size = read_u64(&mut fixed);
        let _source_version = read_u16(&mut fixed);
        let _minimum_extract_version = read_u16(&mut fixed);
        let disk_number = read_u32(&mut fixed);
        let disk_with_central_directory = read_u32(&mut fixed);
        let entries_on_this_disk = read_u64(&mut fixed);
        let entries = read_u64(&mut fixed);
        let central_directory_size = read_u64(&mut fixed);
        let central_directory_offset = read_u64(&mut fixed);

        Ok(Self {
            disk_number,
            disk_with_central_directory,
            entries_on_this_disk,
            entries,
            central_directory_size,
            central_directory_offset,
        })
    }
}

/// Finds the Zip64 end of central directory record in the given slice.
///
/// The slice should start at the Zip64 EOCDR's nominal location,
/// but we might have to do some searching if the archive has data prepended.
pub fn find_zip64_eocdr(mapping: &[u8]) -> AssetResult<usize> {
    memmem::find(mapping, &ZIP64_EOCDR_MAGIC).ok_or_else(|| {
        AssetError::corrupt("Couldn't find Zip64 End Of Central Directory Record")
    })
}

/// Data from a central directory entry
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub last_modified_time: u16,
    pub last_modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number: u16,
    pub header_offset: u32,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> CentralDirectoryEntry<'a> {
    const FIXED_SIZE: usize = 46;

    pub fn parse_and_consume(entry: &mut &'a [u8]) -> AssetResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        let mut fixed = take(entry, Self::FIXED_SIZE, "central directory entry")?;
        if fixed[..4] != CENTRAL_DIRECTORY_MAGIC {
            return Err(AssetError::corrupt("Invalid central directory entry"));
        }
        fixed = &fixed[4..];
        let _source_version = read_u16(&mut fixed);
        let _minimum_extract_version = read_u16(&mut fixed);
        let flags = read_u16(&mut fixed);
        let compression_method = read_u16(&mut fixed);
        let last_modified_time = read_u16(&mut fixed);
        let last_modified_date = read_u16(&mut fixed);
        let crc32 = read_u32(&mut fixed);
        let compressed_size = read_u32(&mut fixed);
        let uncompressed_size = read_u32(&mut fixed);
        let path_length = usize(read_u16(&mut fixed))?;
        let extra_field_length = usize(read_u16(&mut fixed))?;
        let file_comment_length = usize(read_u16(&mut fixed))?;
        let disk_number = read_u16(&mut fixed);
        let _internal_file_attributes = read_u16(&mut fixed);
        let _external_file_attributes = read_u32(&mut fixed);
        let header_offset = read_u32(&mut fixed);
        let path = take(entry, path_length, "central directory file name")?;
        let extra_field = take(entry, extra_field_length, "central directory extra field")?;
        let _file_comment = take(entry, file_comment_length, "central directory comment")?;

        Ok(Self {
            flags,
            compression_method,
            last_modified_time,
            last_modified_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number,
            header_offset,
            path,
            extra_field,
        })
    }
}

/// Data from a local file header
///
/// Each file's actual contents is preceded by this header.
/// Its name and extra field can differ in length from the central directory's,
/// so the data offset has to be computed from this header.
#[derive(Debug)]
pub struct LocalFileHeader<'a> {
    pub flags: u16,
    pub compression_method: u16,
    pub path: &'a [u8],
    pub extra_field: &'a [u8],
}

impl<'a> LocalFileHeader<'a> {
    pub const FIXED_SIZE: usize = 30;

    pub fn parse_and_consume(header: &mut &'a [u8]) -> AssetResult<Self> {
        // 4.3.7  Local file header:
        //
        // local file header signature     4 bytes  (0x04034b50)
        // version needed to extract       2 bytes
        // general purpose bit flag        2 bytes
        // compression method              2 bytes
        // last mod file time              2 bytes
        // last mod file date              2 bytes
        // crc-32                          4 bytes
        // compressed size                 4 bytes
        // uncompressed size               4 bytes
        // file name length                2 bytes
        // extra field length              2 bytes
        //
        // file name (variable size)
        // extra field (variable size)
        let mut fixed = take(header, Self::FIXED_SIZE, "local file header")?;
        if fixed[..4] != LOCAL_FILE_HEADER_MAGIC {
            return Err(AssetError::corrupt("Invalid local file header"));
        }
        fixed = &fixed[4..];
        let _minimum_extract_version = read_u16(&mut fixed);
        let flags = read_u16(&mut fixed);
        let compression_method = read_u16(&mut fixed);
        // Sizes and CRC may be zeroed here when a data descriptor follows
        // the file data; the central directory is authoritative for those.
        let _last_modified = read_u32(&mut fixed);
        let _crc32 = read_u32(&mut fixed);
        let _compressed_size = read_u32(&mut fixed);
        let _uncompressed_size = read_u32(&mut fixed);
        let path_length = usize(read_u16(&mut fixed))?;
        let extra_field_length = usize(read_u16(&mut fixed))?;
        let path = take(header, path_length, "local file name")?;
        let extra_field = take(header, extra_field_length, "local extra field")?;

        Ok(Self {
            flags,
            compression_method,
            path,
            extra_field,
        })
    }

    /// Bytes between the start of this header and the file's data.
    pub fn size_in_file(&self) -> usize {
        Self::FIXED_SIZE + self.path.len() + self.extra_field.len()
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be CP437.
pub fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
pub fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// Decodes a file name per its entry's flags.
pub fn decode_name(raw: &[u8], flags: u16) -> AssetResult<Cow<'_, str>> {
    if is_utf8(flags) {
        Ok(Cow::Borrowed(std::str::from_utf8(raw)?))
    } else {
        Ok(Cow::borrow_from_cp437(raw, &CP437_CONTROL))
    }
}

/// Converts an MS-DOS timestamp, returning `None` for nonsense
/// (zeroed fields are common from some archivers).
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (0b0000_0000_0001_1111 & time) as u32 * 2; // MSDOS uses 2-second precision
    let minutes = (0b0000_0111_1110_0000 & time) as u32 >> 5;
    let hours = (0b1111_1000_0000_0000 & time) as u32 >> 11;

    let days = (0b0000_0000_0001_1111 & date) as u32;
    let months = (0b0000_0001_1110_0000 & date) as u32 >> 5;
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = ((0b1111_1110_0000_0000 & date) >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// 64-bit sizes and offsets, widened from the 32-bit central directory
/// fields by a Zip64 extra field when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WideFields {
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub header_offset: u64,
}

impl WideFields {
    pub fn from_cde(cde: &CentralDirectoryEntry) -> AssetResult<Self> {
        let mut fields = Self {
            uncompressed_size: cde.uncompressed_size as u64,
            compressed_size: cde.compressed_size as u64,
            header_offset: cde.header_offset as u64,
        };
        fields.parse_extra_field(cde.extra_field)?;
        Ok(fields)
    }

    /// Parses the "extra fields" found in central directory entries.
    ///
    /// Currently we just look for Zip64 info (64-bit values for files > 2^32 in size)
    fn parse_extra_field(&mut self, mut extra_field: &[u8]) -> AssetResult<()> {
        // 4.5.1 ... the following structure MUST be used for all
        // programs storing data in this field:
        //
        //     header1+data1 + header2+data2 . . .
        //
        // Each header MUST consist of:
        //
        //     Header ID - 2 bytes
        //     Data Size - 2 bytes
        while !extra_field.is_empty() {
            let mut header = take(&mut extra_field, 4, "extra field header")?;
            let kind = read_u16(&mut header);
            let field_len = usize(read_u16(&mut header))?;
            let mut data = take(&mut extra_field, field_len, "extra field")?;

            // Zip64 extended information extra field
            if kind == 0x0001 {
                for value in [
                    &mut self.uncompressed_size,
                    &mut self.compressed_size,
                    &mut self.header_offset,
                ] {
                    if *value == u32::MAX as u64 {
                        let mut wide = take(&mut data, 8, "Zip64 extra field")?;
                        *value = read_u64(&mut wide);
                    }
                }
                // Anything left would be the disk number start,
                // and we only support single-disk archives.
            }
        }
        Ok(())
    }
}
