//! Path normalization and wildcard matching.
//!
//! Every path that reaches the package goes through [`normalize()`] first,
//! so lookups only ever see one spelling of a path:
//! a leading `/`, forward slashes, and no `.` or `..` segments.
//! Nothing here touches the filesystem.

use regex::Regex;

use crate::result::*;

/// The separator used in normalized paths
pub const SEPARATOR: char = '/';

/// The other separator we accept on input
pub const ALT_SEPARATOR: char = '\\';

pub fn is_separator(c: char) -> bool {
    c == SEPARATOR || c == ALT_SEPARATOR
}

/// Characters that can't appear in a file name on at least one
/// platform packages are built on.
const INVALID_CHARACTERS: &[char] = &['"', '<', '>', '|', ':', '*', '?'];

/// Returns false for characters that can't appear in a portable path.
///
/// Both slashes are valid since they separate path segments.
pub fn is_valid_character(c: char) -> bool {
    if is_separator(c) {
        return true;
    }
    !c.is_ascii_control() && !INVALID_CHARACTERS.contains(&c)
}

/// Returns true if [`normalize()`] would accept every character of `name`,
/// so that a path listed from the package can be handed back to look it up.
pub(crate) fn is_addressable(name: &str) -> bool {
    name.chars().all(is_valid_character)
}

/// Returns true if `path` starts with a Windows-style drive prefix (`C:`).
fn has_drive_prefix(path: &str) -> bool {
    let mut chars = path.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(letter), Some(':')) if letter.is_ascii_alphabetic()
    )
}

/// Turns a user-provided path into its canonical form inside the package.
///
/// - `/` and `\` both separate segments, and runs of them collapse.
/// - `.` segments are dropped; `..` pops the previous segment.
///   (`...` and longer are ordinary names.)
/// - The result always starts with `/`. It ends with one if the input did,
///   or if the input ended in `.` or `..`, unless the result is the root itself.
///
/// ```
/// # use streaming_assets::path::normalize;
/// assert_eq!(normalize(Some("AAA/./BBB/../CCC/.")).unwrap(), "/AAA/CCC/");
/// assert_eq!(normalize(Some("AAA\\..")).unwrap(), "/");
/// assert!(normalize(Some("AAA/../..")).is_err());
/// ```
pub fn normalize(path: Option<&str>) -> AssetResult<String> {
    let path = match path {
        Some(p) if !p.is_empty() => p,
        _ => return Err(AssetError::Argument),
    };

    if has_drive_prefix(path) {
        return Err(AssetError::InvalidPath(format!(
            "{path} has a drive prefix"
        )));
    }
    if let Some(bad) = path.chars().find(|c| !is_valid_character(*c)) {
        return Err(AssetError::InvalidPath(format!(
            "{path} contains invalid character {bad:?}"
        )));
    }

    let mut segments: Vec<&str> = Vec::new();
    let mut trailing_separator = false;
    for segment in path.split(is_separator) {
        trailing_separator = true;
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(AssetError::InvalidPath(format!(
                        "{path} escapes the package root"
                    )));
                }
            }
            name => {
                segments.push(name);
                trailing_separator = false;
            }
        }
    }

    let mut normalized = String::with_capacity(path.len() + 2);
    for segment in &segments {
        normalized.push(SEPARATOR);
        normalized.push_str(segment);
    }
    if normalized.is_empty() || trailing_separator {
        normalized.push(SEPARATOR);
    }
    Ok(normalized)
}

/// Like [`normalize()`], but for names read out of a package.
///
/// Only structure is checked here: the name must not climb out of the root.
/// Whether the name can be looked up is [`is_addressable()`]'s call.
pub(crate) fn normalize_entry_name(name: &str) -> AssetResult<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in name.split(is_separator) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(AssetError::corrupt(format!(
                        "Entry {name} escapes the package root"
                    )));
                }
            }
            name => segments.push(name),
        }
    }
    if segments.is_empty() {
        return Ok(SEPARATOR.to_string());
    }
    let mut normalized = String::with_capacity(name.len() + 1);
    for segment in &segments {
        normalized.push(SEPARATOR);
        normalized.push_str(segment);
    }
    Ok(normalized)
}

/// Collapses a trailing run of separators into one,
/// keeping the last separator character of the run.
///
/// Leading and interior runs are left alone.
pub fn fix_trailing_separators(path: &str) -> String {
    let trimmed = path.trim_end_matches(is_separator);
    match path[trimmed.len()..].chars().last() {
        Some(last) => {
            let mut fixed = String::with_capacity(trimmed.len() + 1);
            fixed.push_str(trimmed);
            fixed.push(last);
            fixed
        }
        None => path.to_owned(),
    }
}

/// Joins two paths with a single separator.
///
/// If `b` starts with a separator it's absolute and wins outright.
pub fn combine(a: &str, b: &str) -> String {
    if b.starts_with(is_separator) || a.is_empty() {
        return b.to_owned();
    }
    if b.is_empty() {
        return a.to_owned();
    }
    if a.ends_with(is_separator) {
        format!("{a}{b}")
    } else {
        format!("{a}{SEPARATOR}{b}")
    }
}

/// Returns true if `c` is one of the wildcard characters [`wildcard_to_regex()`] expands.
pub fn is_wildcard(c: char) -> bool {
    c == '*' || c == '?'
}

/// Translates a DOS-style wildcard pattern into a regex matching whole strings.
///
/// `*` matches zero or more characters, `?` matches exactly one,
/// and everything else matches itself.
pub fn wildcard_to_regex(pattern: &str) -> AssetResult<Regex> {
    let mut expression = String::with_capacity(pattern.len() * 2 + 8);
    expression.push_str("(?s)^");
    let mut literal = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => expression.push_str(".*"),
            '?' => expression.push('.'),
            c => expression.push_str(&regex::escape(c.encode_utf8(&mut literal))),
        }
    }
    expression.push('$');
    Ok(Regex::new(&expression)?)
}
