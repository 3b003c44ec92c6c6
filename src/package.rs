//! The resources backing a mounted package.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use log::*;
use memmap2::Mmap;

use crate::result::*;

/// Where to find a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLocation {
    /// A ZIP-format package (an APK, a `.zip`, ...)
    Archive(PathBuf),
    /// A plain directory holding the assets as loose files
    Directory(PathBuf),
    /// Look in `primary` first and fall back to `fallback`.
    /// Each may be an archive or a directory.
    Override { primary: PathBuf, fallback: PathBuf },
}

impl PackageLocation {
    /// Picks [`PackageLocation::Directory`] or [`PackageLocation::Archive`]
    /// depending on what's at `path`.
    pub fn detect<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        if path.is_dir() {
            PackageLocation::Directory(path)
        } else {
            PackageLocation::Archive(path)
        }
    }
}

/// How a package was mounted
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PackageMode {
    Archive,
    Directory,
    Override,
}

/// One opened source of entries
#[derive(Debug)]
pub enum PackageSource {
    /// A memory-mapped archive. Readers share the mapping and never
    /// a file cursor, so any number of them can read at once.
    Archive { path: Utf8PathBuf, mapping: Arc<Mmap> },
    /// A directory whose files are opened as they're read
    Directory { root: Utf8PathBuf },
}

impl PackageSource {
    /// Opens whatever is at `path`: a directory is used in place,
    /// anything else is mapped as an archive.
    pub fn open(path: &Path) -> AssetResult<Self> {
        if path.is_dir() {
            Self::directory(path)
        } else {
            Self::map_archive(path)
        }
    }

    pub fn map_archive(path: &Path) -> AssetResult<Self> {
        let path = utf8(path)?;
        info!("Memory mapping {}", path);
        let file = File::open(&path)?;
        if file.metadata()?.len() == 0 {
            return Err(AssetError::corrupt(format!("{path} is empty")));
        }
        // Safety: the package is opened read-only and is expected to stay
        // unmodified while it's mounted, like any installed application file.
        let mapping = unsafe { Mmap::map(&file)? };
        Ok(PackageSource::Archive {
            path,
            mapping: Arc::new(mapping),
        })
    }

    pub fn directory(path: &Path) -> AssetResult<Self> {
        let root = utf8(path)?;
        if !root.is_dir() {
            return Err(AssetError::DirectoryNotFound(root.into_string()));
        }
        info!("Using directory {} as a package", root);
        Ok(PackageSource::Directory { root })
    }

    /// The archive file or directory root this source was opened from
    pub fn path(&self) -> &Utf8Path {
        match self {
            PackageSource::Archive { path, .. } => path,
            PackageSource::Directory { root } => root,
        }
    }

    /// The archive's bytes, if this is an archive
    pub fn mapping(&self) -> Option<&Arc<Mmap>> {
        match self {
            PackageSource::Archive { mapping, .. } => Some(mapping),
            PackageSource::Directory { .. } => None,
        }
    }

    /// The directory root, if this is a directory
    pub fn root(&self) -> Option<&Utf8Path> {
        match self {
            PackageSource::Archive { .. } => None,
            PackageSource::Directory { root } => Some(root),
        }
    }
}

fn utf8(path: &Path) -> AssetResult<Utf8PathBuf> {
    Utf8PathBuf::from_path_buf(path.to_owned())
        .map_err(|p| AssetError::InvalidPath(format!("{} isn't valid UTF-8", p.display())))
}

/// The opened sources of a package, highest priority first
#[derive(Debug)]
pub struct PackageHandle {
    sources: Vec<PackageSource>,
    mode: PackageMode,
}

impl PackageHandle {
    pub(crate) fn new(sources: Vec<PackageSource>, mode: PackageMode) -> Self {
        Self { sources, mode }
    }

    pub fn mode(&self) -> PackageMode {
        self.mode
    }

    pub fn sources(&self) -> &[PackageSource] {
        &self.sources
    }

    pub fn source(&self, index: usize) -> AssetResult<&PackageSource> {
        self.sources
            .get(index)
            .ok_or_else(|| AssetError::corrupt(format!("No package source {index}")))
    }
}
