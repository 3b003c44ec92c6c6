//! Existence checks and directory listings

use log::*;
use regex::Regex;

use crate::path::{self, normalize};
use crate::result::*;
use crate::tree::DirectoryNode;

/// How deep [`get_files()`] looks
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SearchOption {
    /// Only files directly in the given directory
    #[default]
    TopDirectoryOnly,
    /// Files anywhere below the given directory
    AllDirectories,
}

/// Returns true if `path` names a file in the tree.
///
/// Paths that can't be normalized name nothing, so they return false.
pub fn file_exists(root: &DirectoryNode, path: &str) -> bool {
    match normalize(Some(path)) {
        Ok(normalized) => root.lookup_file(&normalized).is_some(),
        Err(e) => {
            trace!("file_exists({path:?}): {e}");
            false
        }
    }
}

/// Returns true if `path` names a directory in the tree,
/// whether the package listed it or only files below it.
pub fn directory_exists(root: &DirectoryNode, path: &str) -> bool {
    match normalize(Some(path)) {
        Ok(normalized) => root.lookup_directory(&normalized).is_some(),
        Err(e) => {
            trace!("directory_exists({path:?}): {e}");
            false
        }
    }
}

/// Finds the directory to list and compiles the wildcard to match names against.
fn listing<'a>(
    root: &'a DirectoryNode,
    directory: &str,
    pattern: Option<&str>,
) -> AssetResult<(&'a DirectoryNode, Regex)> {
    let normalized = normalize(Some(directory))?;
    let node = root
        .lookup_directory(&normalized)
        .ok_or(AssetError::DirectoryNotFound(normalized))?;

    let pattern = pattern.unwrap_or("*");
    if pattern.contains(path::is_separator) {
        return Err(AssetError::InvalidPath(format!(
            "Search pattern {pattern} can't contain a separator"
        )));
    }
    Ok((node, path::wildcard_to_regex(pattern)?))
}

/// Lists the files in `directory` whose names match `pattern`.
///
/// `pattern` is a DOS-style wildcard (`*` and `?`) matched against each
/// file's name, not its path. `None` matches everything.
/// Results are paths relative to the package root (`Bundles/level1.bytes`)
/// in no particular order.
pub fn get_files(
    root: &DirectoryNode,
    directory: &str,
    pattern: Option<&str>,
    option: SearchOption,
) -> AssetResult<Vec<String>> {
    let (node, matcher) = listing(root, directory, pattern)?;

    let files: Vec<String> = match option {
        SearchOption::TopDirectoryOnly => node
            .files()
            .values()
            .filter(|e| matcher.is_match(e.name()))
            .map(|e| e.relative_path().to_owned())
            .collect(),
        SearchOption::AllDirectories => node
            .descendant_files()
            .filter(|e| matcher.is_match(e.name()))
            .map(|e| e.relative_path().to_owned())
            .collect(),
    };
    debug!(
        "{} files in {} match {:?} ({:?})",
        files.len(),
        node.path(),
        pattern,
        option
    );
    Ok(files)
}

/// Like [`get_files()`], but lists directories,
/// including ones the package only implies by the files inside them.
pub fn get_directories(
    root: &DirectoryNode,
    directory: &str,
    pattern: Option<&str>,
    option: SearchOption,
) -> AssetResult<Vec<String>> {
    let (node, matcher) = listing(root, directory, pattern)?;

    let directories: Vec<String> = match option {
        SearchOption::TopDirectoryOnly => node
            .directories()
            .values()
            .filter(|d| matcher.is_match(d.name()))
            .map(|d| d.relative_path().to_owned())
            .collect(),
        SearchOption::AllDirectories => node
            .descendant_directories()
            .filter(|d| matcher.is_match(d.name()))
            .map(|d| d.relative_path().to_owned())
            .collect(),
    };
    debug!(
        "{} directories in {} match {:?} ({:?})",
        directories.len(),
        node.path(),
        pattern,
        option
    );
    Ok(directories)
}
