//! streaming-assets serves an application's packaged assets
//! (an APK, a `.zip`, or a plain directory while developing)
//! as a read-only virtual filesystem:
//!
//! ```no_run
//! # use std::io::prelude::*;
//! # use rayon::prelude::*;
//! # use streaming_assets::*;
//! let assets = FilesystemContext::open_archive("game.apk", PackageOptions::default())?;
//!
//! // Paths are normalized before every lookup, so any of
//! // "Bundles/level1.bytes", "/Bundles/level1.bytes", or "Bundles\\.\\level1.bytes"
//! // name the same file.
//! if assets.file_exists("Bundles/level1.bytes") {
//!     let bytes = assets.read_all_bytes("Bundles/level1.bytes")?;
//!     # drop(bytes);
//! }
//!
//! // Directory listings take DOS-style wildcards.
//! let raw = assets.get_files("Bundles", Some("raw_*"), SearchOption::AllDirectories)?;
//!
//! // The context never changes after it's opened, so read away on as many
//! // threads as you'd like. Each reader has its own position.
//! raw.par_iter().try_for_each(|path| {
//!     let mut reader = assets.open_read(path)?;
//!     let mut header = [0u8; 16];
//!     reader.read_exact(&mut header)?;
//!     Ok::<(), anyhow::Error>(())
//! })?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! Opening a package walks its central directory once.
//! Each file's data offset is resolved up front, so reading a stored
//! (uncompressed) entry is just a bounds-checked slice of the memory-mapped
//! package. Packages are expected to store assets that way.
//! Compressed entries still work, but they're inflated on every read
//! (or refused outright; see [`CompressedEntryPolicy`]).
//!
//! While developing, point [`FilesystemContext::open_directory()`] at the
//! unpacked assets instead, or mount a directory of replacements over a
//! package with [`FilesystemContext::open_with_override()`].

mod arch;
mod crc_reader;
mod format;

pub mod bundle;
pub mod config;
pub mod context;
pub mod index;
pub mod package;
pub mod path;
pub mod query;
pub mod result;
pub mod stream;
pub mod tree;

pub use bundle::{BundleLoader, BundleRange};
pub use config::{CompressedEntryPolicy, PackageOptions};
pub use context::FilesystemContext;
pub use index::{ArchiveEntry, CompressionMethod, ReadStrategy};
pub use package::{PackageLocation, PackageMode};
pub use query::SearchOption;
pub use result::{AssetError, AssetResult};
pub use stream::EntryReader;
