//! Options fixed when a package is opened.

/// What to do with entries that aren't stored uncompressed.
///
/// Packages are expected to store hot-path assets uncompressed
/// so they can be read in place. Anything else costs a decompression
/// on every read, or can be refused outright.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CompressedEntryPolicy {
    /// Index compressed entries and decompress them on each read.
    #[default]
    Decompress,
    /// Fail to open any package containing a compressed or encrypted entry.
    Reject,
}

/// Options for opening a package
///
/// ```
/// # use streaming_assets::config::*;
/// let options = PackageOptions::default()
///     .with_compressed_entries(CompressedEntryPolicy::Reject)
///     .with_verify_checksums(true);
/// assert!(options.verify_checksums);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageOptions {
    /// See [`CompressedEntryPolicy`]
    pub compressed_entries: CompressedEntryPolicy,

    /// Check the CRC-32 of stored entries on `read_all_bytes()`.
    /// Decompressed entries are always checked.
    pub verify_checksums: bool,

    /// Accept archives with unknown bytes in front of them
    /// (e.g., self-extracting stubs).
    pub allow_prepended_data: bool,
}

impl PackageOptions {
    pub fn with_compressed_entries(mut self, policy: CompressedEntryPolicy) -> Self {
        self.compressed_entries = policy;
        self
    }

    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    pub fn with_prepended_data(mut self, allow: bool) -> Self {
        self.allow_prepended_data = allow;
        self
    }
}
