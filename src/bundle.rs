//! Handing stored entries to loaders that parse them in place.
//!
//! Some consumers (asset bundle formats, for one) want the raw bytes of an
//! entry plus its position in the package so they can read the package
//! themselves instead of going through a stream. [`BundleRange`] is that
//! description, and [`BundleLoader`] is the seam such a consumer plugs into.

use camino::Utf8PathBuf;

use crate::index::ArchiveEntry;
use crate::package::PackageSource;
use crate::result::*;

/// Where a stored entry's bytes live
#[derive(Debug, Clone, Copy)]
pub struct BundleRange<'a> {
    source: &'a PackageSource,
    entry: &'a ArchiveEntry,
}

impl<'a> BundleRange<'a> {
    pub(crate) fn new(source: &'a PackageSource, entry: &'a ArchiveEntry) -> Self {
        Self { source, entry }
    }

    /// The package path of the entry, e.g. `/Bundles/level1.bytes`
    pub fn entry_path(&self) -> &'a str {
        &self.entry.path
    }

    /// Byte offset of the entry's data within its archive (0 for loose files)
    pub fn offset(&self) -> u64 {
        self.entry.data_offset
    }

    /// Length of the entry's data
    pub fn len(&self) -> u64 {
        self.entry.size
    }

    pub fn is_empty(&self) -> bool {
        self.entry.size == 0
    }

    /// The archive (or loose file) holding the bytes on disk.
    /// Loaders that open files themselves should read `len()` bytes
    /// starting at `offset()` of this file.
    pub fn file_path(&self) -> Utf8PathBuf {
        match self.source {
            PackageSource::Archive { path, .. } => path.clone(),
            PackageSource::Directory { root } => root.join(self.entry.relative_path()),
        }
    }

    /// The entry's bytes, borrowed straight from the mapped archive.
    ///
    /// `None` for loose files, which aren't mapped.
    pub fn bytes(&self) -> Option<&'a [u8]> {
        let mapping = self.source.mapping()?;
        let start = usize::try_from(self.entry.data_offset).ok()?;
        let len = usize::try_from(self.entry.size).ok()?;
        mapping.get(start..start.checked_add(len)?)
    }
}

/// Something that turns a stored entry into a loaded bundle.
///
/// ```
/// use streaming_assets::bundle::*;
/// use streaming_assets::result::AssetError;
///
/// /// Counts a bundle's bytes without copying them.
/// struct Measure;
///
/// impl BundleLoader for Measure {
///     type Bundle = u64;
///     type Error = AssetError;
///
///     fn load(&self, range: BundleRange<'_>) -> Result<u64, AssetError> {
///         Ok(range.len())
///     }
/// }
/// ```
pub trait BundleLoader {
    type Bundle;
    type Error: From<AssetError>;

    fn load(&self, range: BundleRange<'_>) -> Result<Self::Bundle, Self::Error>;
}
