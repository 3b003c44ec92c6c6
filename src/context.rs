//! A mounted package, ready for queries and reads

use std::path::Path;
use std::sync::Arc;

use log::*;

use crate::bundle::BundleLoader;
use crate::config::PackageOptions;
use crate::index::{self, ArchiveEntry};
use crate::package::{PackageHandle, PackageLocation, PackageMode, PackageSource};
use crate::path::normalize;
use crate::query::{self, SearchOption};
use crate::result::*;
use crate::stream::EntryReader;
use crate::tree::DirectoryNode;

/// A package plus everything learned from indexing it.
///
/// Nothing in a context changes after it's opened,
/// so it can be shared between as many threads as you'd like.
#[derive(Debug)]
pub struct FilesystemContext {
    package: PackageHandle,
    entries: Vec<Arc<ArchiveEntry>>,
    root: DirectoryNode,
    options: PackageOptions,
}

impl FilesystemContext {
    /// Opens and indexes the package at `location`.
    pub fn open(location: PackageLocation, options: PackageOptions) -> AssetResult<Self> {
        match location {
            PackageLocation::Archive(path) => Self::open_archive(path, options),
            PackageLocation::Directory(path) => Self::open_directory(path, options),
            PackageLocation::Override { primary, fallback } => {
                Self::open_with_override(primary, fallback, options)
            }
        }
    }

    /// Memory maps and indexes the archive at `path`.
    pub fn open_archive<P: AsRef<Path>>(path: P, options: PackageOptions) -> AssetResult<Self> {
        let source = PackageSource::map_archive(path.as_ref())?;
        Self::mount(vec![source], PackageMode::Archive, options)
    }

    /// Serves the files under the directory at `path` as a package.
    pub fn open_directory<P: AsRef<Path>>(path: P, options: PackageOptions) -> AssetResult<Self> {
        let source = PackageSource::directory(path.as_ref())?;
        Self::mount(vec![source], PackageMode::Directory, options)
    }

    /// Mounts `base` with `overrides` in front of it:
    /// files in `overrides` shadow files at the same path in `base`.
    ///
    /// Either may be an archive or a directory.
    /// A missing `overrides` is skipped; a missing `base` is an error.
    pub fn open_with_override<O: AsRef<Path>, B: AsRef<Path>>(
        overrides: O,
        base: B,
        options: PackageOptions,
    ) -> AssetResult<Self> {
        let overrides = overrides.as_ref();
        let mut sources = Vec::with_capacity(2);
        if overrides.exists() {
            sources.push(PackageSource::open(overrides)?);
        } else {
            warn!(
                "Override {} doesn't exist; using only {}",
                overrides.display(),
                base.as_ref().display()
            );
        }
        sources.push(PackageSource::open(base.as_ref())?);
        Self::mount(sources, PackageMode::Override, options)
    }

    fn mount(
        sources: Vec<PackageSource>,
        mode: PackageMode,
        options: PackageOptions,
    ) -> AssetResult<Self> {
        let mut all_entries = Vec::new();
        for (priority, source) in sources.iter().enumerate() {
            let mut entries = match source {
                PackageSource::Archive { path, mapping } => {
                    let (entries, prepended) = index::index_archive(mapping, priority, &options)?;
                    if prepended != 0 {
                        info!("{} has {} bytes before the archive", path, prepended);
                    }
                    entries
                }
                PackageSource::Directory { root } => index::index_directory(root, priority)?,
            };
            debug!("{} entries in {}", entries.len(), source.path());
            all_entries.append(&mut entries);
        }

        let (root, entries) = DirectoryNode::build(all_entries)?;
        info!(
            "Mounted {:?} package with {} entries ({} files)",
            mode,
            entries.len(),
            entries.iter().filter(|e| e.is_file()).count()
        );
        Ok(Self {
            package: PackageHandle::new(sources, mode),
            entries,
            root,
            options,
        })
    }

    pub fn package(&self) -> &PackageHandle {
        &self.package
    }

    pub fn options(&self) -> &PackageOptions {
        &self.options
    }

    /// The root of the package's directory tree
    pub fn root(&self) -> &DirectoryNode {
        &self.root
    }

    /// Every file and directory in the package, after shadowing.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.iter().map(|e| &**e)
    }

    /// Looks up a file or directory's metadata.
    pub fn entry(&self, path: &str) -> AssetResult<&ArchiveEntry> {
        let normalized = normalize(Some(path))?;
        if let Some(file) = self.root.lookup_file(&normalized) {
            return Ok(file);
        }
        self.root
            .lookup_directory(&normalized)
            .and_then(|dir| dir.marker())
            .map(|e| &**e)
            .ok_or(AssetError::FileNotFound(normalized))
    }

    pub fn file_exists(&self, path: &str) -> bool {
        query::file_exists(&self.root, path)
    }

    pub fn directory_exists(&self, path: &str) -> bool {
        query::directory_exists(&self.root, path)
    }

    /// See [`query::get_files()`]
    pub fn get_files(
        &self,
        directory: &str,
        pattern: Option<&str>,
        option: SearchOption,
    ) -> AssetResult<Vec<String>> {
        query::get_files(&self.root, directory, pattern, option)
    }

    /// See [`query::get_directories()`]
    pub fn get_directories(
        &self,
        directory: &str,
        pattern: Option<&str>,
        option: SearchOption,
    ) -> AssetResult<Vec<String>> {
        query::get_directories(&self.root, directory, pattern, option)
    }

    /// Resolves `path` to a file entry and the source holding it.
    fn resolve(&self, path: &str) -> AssetResult<(&PackageSource, &ArchiveEntry)> {
        let normalized = normalize(Some(path))?;
        let entry = self
            .root
            .lookup_file(&normalized)
            .ok_or(AssetError::FileNotFound(normalized))?;
        Ok((self.package.source(entry.source)?, entry))
    }

    /// Reads the whole file at `path`.
    ///
    /// The result is always exactly as long as the file.
    pub fn read_all_bytes(&self, path: &str) -> AssetResult<Vec<u8>> {
        let (source, entry) = self.resolve(path)?;
        debug!("Reading {} ({:?})", entry.path, entry.strategy);
        entry
            .strategy
            .access()
            .read_all(source, entry, &self.options)
    }

    /// Opens a reader over the file at `path`.
    ///
    /// Each reader has its own position, so any number of them
    /// can be open at once, across as many threads as you'd like.
    pub fn open_read(&self, path: &str) -> AssetResult<EntryReader> {
        let (source, entry) = self.resolve(path)?;
        trace!("Opening {} ({:?})", entry.path, entry.strategy);
        entry.strategy.access().open(source, entry)
    }

    /// Hands the raw bytes of the file at `path` to `loader` without copying them.
    ///
    /// The file must be stored uncompressed.
    pub fn load_bundle<L: BundleLoader>(
        &self,
        path: &str,
        loader: &L,
    ) -> Result<L::Bundle, L::Error> {
        let (source, entry) = self.resolve(path)?;
        let range = entry.strategy.access().raw_range(source, entry)?;
        debug!(
            "Loading bundle {} ({} bytes at {})",
            range.entry_path(),
            range.len(),
            range.offset()
        );
        loader.load(range)
    }
}
