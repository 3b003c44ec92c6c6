//! A directory tree over a package's entries.
//!
//! ZIP doesn't guarantee that entries are in any particular order,
//! that there aren't duplicates, or that directories are listed at all.
//! Building the tree validates the entry table and gives us cheap
//! path lookups and directory listings afterward.

use std::collections::{btree_map, BTreeMap};
use std::sync::Arc;

use log::*;

use crate::index::ArchiveEntry;
use crate::path::SEPARATOR;
use crate::result::*;

/// Maps a directory's child file names to their entries.
pub type FileMap = BTreeMap<String, Arc<ArchiveEntry>>;

/// Maps a directory's child directory names to their nodes.
pub type DirectoryMap = BTreeMap<String, DirectoryNode>;

/// A directory in the package, including its contents.
#[derive(Debug)]
pub struct DirectoryNode {
    path: String,
    /// The highest-priority source that contributed this directory
    source: usize,
    /// The package's explicit entry for this directory, if it had one
    marker: Option<Arc<ArchiveEntry>>,
    files: FileMap,
    directories: DirectoryMap,
}

impl DirectoryNode {
    /// Creates an empty root.
    pub fn root() -> Self {
        Self::new(SEPARATOR.to_string(), usize::MAX)
    }

    fn new(path: String, source: usize) -> Self {
        Self {
            path,
            source,
            marker: None,
            files: FileMap::new(),
            directories: DirectoryMap::new(),
        }
    }

    /// Organizes the given entries into a tree.
    ///
    /// Entries must be ordered by source priority (highest first).
    /// A later source's entry at a path an earlier source already filled
    /// is shadowed and dropped; two entries at one path from the same
    /// source make the package corrupt.
    ///
    /// Returns the root and the entries that made it into the tree.
    pub fn build(entries: Vec<ArchiveEntry>) -> AssetResult<(Self, Vec<Arc<ArchiveEntry>>)> {
        let mut root = Self::root();
        let mut kept = Vec::with_capacity(entries.len());

        for entry in entries {
            let entry = Arc::new(entry);
            if root.insert(&entry)? {
                kept.push(entry);
            }
        }

        Ok((root, kept))
    }

    /// Places the given entry in the tree, creating parent directories as needed.
    ///
    /// Returns false if the entry was shadowed by a higher-priority source.
    fn insert(&mut self, entry: &Arc<ArchiveEntry>) -> AssetResult<bool> {
        let path = entry.path.as_str();
        let (parent, base) = match path.rsplit_once(SEPARATOR) {
            Some((parent, base)) if !base.is_empty() => (parent, base),
            _ => {
                return Err(AssetError::corrupt(format!(
                    "Entry path {path} has no file name"
                )))
            }
        };

        let mut current = self;
        let mut current_path = String::with_capacity(path.len());
        for component in parent.split(SEPARATOR).filter(|c| !c.is_empty()) {
            current_path.push(SEPARATOR);
            current_path.push_str(component);

            if let Some(file) = current.files.get(component) {
                return shadowed_or_conflict(
                    entry,
                    file.source,
                    format!("{current_path} is a file, expected a directory"),
                );
            }
            current.source = current.source.min(entry.source);
            current = current
                .directories
                .entry(component.to_owned())
                .or_insert_with(|| DirectoryNode::new(current_path.clone(), entry.source));
        }
        current.source = current.source.min(entry.source);

        if entry.is_dir() {
            if let Some(file) = current.files.get(base) {
                return shadowed_or_conflict(
                    entry,
                    file.source,
                    format!("Directory {path} is also a file"),
                );
            }
            let node = current
                .directories
                .entry(base.to_owned())
                .or_insert_with(|| DirectoryNode::new(path.to_owned(), entry.source));
            node.source = node.source.min(entry.source);
            if let Some(existing) = &node.marker {
                if existing.source == entry.source {
                    return Err(AssetError::corrupt(format!("Duplicate entry for {path}")));
                }
                return Ok(false);
            }
            node.marker = Some(entry.clone());
            Ok(true)
        } else {
            if let Some(dir) = current.directories.get(base) {
                return shadowed_or_conflict(
                    entry,
                    dir.source,
                    format!("File {path} is also a directory"),
                );
            }
            match current.files.entry(base.to_owned()) {
                btree_map::Entry::Occupied(existing) => shadowed_or_conflict(
                    entry,
                    existing.get().source,
                    format!("Duplicate entry for {path}"),
                ),
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(entry.clone());
                    Ok(true)
                }
            }
        }
    }

    /// The normalized path of this directory (`/` for the root)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The final segment of this directory's path (empty for the root)
    pub fn name(&self) -> &str {
        self.path.rsplit(SEPARATOR).next().unwrap_or(&self.path)
    }

    /// This directory's path without its leading separator,
    /// the way listings report it.
    pub fn relative_path(&self) -> &str {
        self.path.trim_start_matches(SEPARATOR)
    }

    /// The package's own entry for this directory, if it listed one
    pub fn marker(&self) -> Option<&Arc<ArchiveEntry>> {
        self.marker.as_ref()
    }

    /// Files directly in this directory
    pub fn files(&self) -> &FileMap {
        &self.files
    }

    /// Directories directly in this directory
    pub fn directories(&self) -> &DirectoryMap {
        &self.directories
    }

    /// Looks up a directory by normalized path.
    pub fn lookup_directory(&self, path: &str) -> Option<&DirectoryNode> {
        let mut current = self;
        for component in path.split(SEPARATOR).filter(|c| !c.is_empty()) {
            current = current.directories.get(component)?;
        }
        Some(current)
    }

    /// Looks up a file by normalized path.
    ///
    /// Paths ending in a separator name directories, so they never match.
    pub fn lookup_file(&self, path: &str) -> Option<&Arc<ArchiveEntry>> {
        let (parent, base) = path.rsplit_once(SEPARATOR)?;
        if base.is_empty() {
            return None;
        }
        self.lookup_directory(parent)?.files.get(base)
    }

    /// Returns an iterator over all files below this directory.
    pub fn descendant_files(&self) -> FileTreeIterator<'_> {
        FileTreeIterator::new(self)
    }

    /// Returns an iterator over all directories below this directory.
    pub fn descendant_directories(&self) -> DirectoryTreeIterator<'_> {
        DirectoryTreeIterator::new(self)
    }
}

fn shadowed_or_conflict(
    entry: &ArchiveEntry,
    existing_source: usize,
    conflict: String,
) -> AssetResult<bool> {
    if existing_source < entry.source {
        debug!(
            "{} from source {} is shadowed by source {}",
            entry.path, entry.source, existing_source
        );
        Ok(false)
    } else {
        Err(AssetError::CorruptArchive(conflict))
    }
}

/// Iterates over all files below a [`DirectoryNode`]
pub struct FileTreeIterator<'a> {
    files: btree_map::Values<'a, String, Arc<ArchiveEntry>>,
    stack: Vec<btree_map::Values<'a, String, DirectoryNode>>,
}

impl<'a> FileTreeIterator<'a> {
    fn new(node: &'a DirectoryNode) -> Self {
        Self {
            files: node.files.values(),
            stack: vec![node.directories.values()],
        }
    }
}

impl<'a> Iterator for FileTreeIterator<'a> {
    type Item = &'a Arc<ArchiveEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(file) = self.files.next() {
                return Some(file);
            }
            match self.stack.last_mut()?.next() {
                Some(dir) => {
                    self.files = dir.files.values();
                    self.stack.push(dir.directories.values());
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Iterates over all directories below a [`DirectoryNode`]
pub struct DirectoryTreeIterator<'a> {
    stack: Vec<btree_map::Values<'a, String, DirectoryNode>>,
}

impl<'a> DirectoryTreeIterator<'a> {
    fn new(node: &'a DirectoryNode) -> Self {
        Self {
            stack: vec![node.directories.values()],
        }
    }
}

impl<'a> Iterator for DirectoryTreeIterator<'a> {
    type Item = &'a DirectoryNode;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.stack.last_mut()?.next() {
                Some(dir) => {
                    self.stack.push(dir.directories.values());
                    return Some(dir);
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}
