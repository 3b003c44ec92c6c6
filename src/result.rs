//! Error types and the related `Result<T>`

use std::io;

use thiserror::Error;

pub type AssetResult<T> = Result<T, AssetError>;

#[derive(Debug, Error)]
pub enum AssetError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] io::Error),

    /// A required path argument was missing or empty.
    #[error("Path argument was empty")]
    Argument,

    /// A user-provided path could not be used:
    /// it escaped the virtual root, had a drive prefix,
    /// or contained a character that can't appear in a path.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// A directory wasn't found at the provided path
    #[error("No directory in the package with the path {0}")]
    DirectoryNotFound(String),

    /// A file wasn't found at the provided path
    #[error("No file in the package with the path {0}")]
    FileNotFound(String),

    /// The entry exists but can't be accessed the way it was asked for
    /// (compressed where raw bytes are required, encrypted, ...)
    #[error("Unsupported entry {path}: {reason}")]
    UnsupportedEntry { path: String, reason: String },

    /// The package uses an unsupported feature of the ZIP format
    #[error("Unsupported Zip archive: {0}")]
    UnsupportedArchive(String),

    /// The package's ZIP structures are missing or malformed.
    #[error("Corrupt Zip archive: {0}")]
    CorruptArchive(String),

    /// The ZIP archive is prepended with some unknown bytes.
    /// (Set [`PackageOptions::allow_prepended_data`] if this is okay.)
    ///
    /// [`PackageOptions::allow_prepended_data`]: crate::config::PackageOptions::allow_prepended_data
    #[error("Archive prepended with {0} unknown bytes")]
    PrependedWithUnknownBytes(usize),

    /// Data read for an entry didn't match its recorded CRC-32
    #[error("Checksum mismatch for {0}")]
    Checksum(String),

    /// Decoding a UTF-8 name failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// A wildcard pattern couldn't be turned into a matcher
    #[error("Invalid search pattern")]
    Pattern(#[from] regex::Error),

    /// A cast from a 64-bit int to a usize failed while mapping the file,
    /// probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

impl AssetError {
    pub(crate) fn corrupt<S: Into<String>>(what: S) -> Self {
        AssetError::CorruptArchive(what.into())
    }

    pub(crate) fn unsupported_entry<S: Into<String>>(path: &str, reason: S) -> Self {
        AssetError::UnsupportedEntry {
            path: path.to_owned(),
            reason: reason.into(),
        }
    }

    /// Returns true for failures callers should treat like a filesystem
    /// error: bad paths, missing files and directories, and raw I/O.
    pub fn is_io_kind(&self) -> bool {
        matches!(
            self,
            AssetError::Io(_)
                | AssetError::InvalidPath(_)
                | AssetError::DirectoryNotFound(_)
                | AssetError::FileNotFound(_)
        )
    }
}

impl From<AssetError> for io::Error {
    fn from(e: AssetError) -> io::Error {
        let kind = match &e {
            AssetError::Io(inner) => return io::Error::new(inner.kind(), e),
            AssetError::Argument | AssetError::InvalidPath(_) | AssetError::Pattern(_) => {
                io::ErrorKind::InvalidInput
            }
            AssetError::DirectoryNotFound(_) | AssetError::FileNotFound(_) => {
                io::ErrorKind::NotFound
            }
            AssetError::UnsupportedEntry { .. } | AssetError::UnsupportedArchive(_) => {
                io::ErrorKind::Unsupported
            }
            AssetError::CorruptArchive(_)
            | AssetError::PrependedWithUnknownBytes(_)
            | AssetError::Checksum(_)
            | AssetError::Encoding(_) => io::ErrorKind::InvalidData,
            AssetError::InsufficientAddressSpace => io::ErrorKind::OutOfMemory,
        };
        io::Error::new(kind, e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn io_kinds() {
        assert!(AssetError::InvalidPath("..".into()).is_io_kind());
        assert!(AssetError::DirectoryNotFound("/x".into()).is_io_kind());
        assert!(!AssetError::Argument.is_io_kind());
        assert!(!AssetError::corrupt("nope").is_io_kind());

        let e: io::Error = AssetError::FileNotFound("/a".into()).into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);
        let e: io::Error = AssetError::unsupported_entry("/a", "deflated").into();
        assert_eq!(e.kind(), io::ErrorKind::Unsupported);
    }
}
