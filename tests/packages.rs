//! Package layouts beyond the happy path: compressed entries, odd archives,
//! loose directories, and overrides.

use std::fs;
use std::io::prelude::*;

use anyhow::{Context, Result};

use streaming_assets::*;

mod common;
use common::*;

#[test]
fn deflated_entries() -> Result<()> {
    init_logging();
    let text = "All work and no play makes Jack a dull boy.\n".repeat(200);
    let dir = tempfile::tempdir()?;
    let path = ZipBuilder::new()
        .deflated("docs/jack.txt", text.as_bytes())
        .stored("docs/raw.bin", b"raw")
        .write(dir.path(), "deflated.zip")?;

    let assets = FilesystemContext::open_archive(&path, PackageOptions::default())?;
    let entry = assets.entry("docs/jack.txt")?;
    assert_eq!(entry.compression_method, CompressionMethod::Deflate);
    assert_eq!(entry.strategy, ReadStrategy::DecompressThenRead);
    assert!(entry.compressed_size < entry.size);

    assert_eq!(assets.read_all_bytes("docs/jack.txt")?, text.as_bytes());

    let mut reader = assets.open_read("docs/jack.txt")?;
    assert_eq!(reader.len(), text.len() as u64);
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    assert_eq!(contents, text);

    // Bundles are read in place, which needs stored bytes.
    struct Length;
    impl BundleLoader for Length {
        type Bundle = u64;
        type Error = AssetError;
        fn load(&self, range: BundleRange<'_>) -> AssetResult<u64> {
            Ok(range.len())
        }
    }
    assert!(matches!(
        assets.load_bundle("docs/jack.txt", &Length),
        Err(AssetError::UnsupportedEntry { .. })
    ));
    assert_eq!(assets.load_bundle("docs/raw.bin", &Length)?, 3);

    // Unless we refuse compressed entries up front.
    let rejecting = PackageOptions::default().with_compressed_entries(CompressedEntryPolicy::Reject);
    match FilesystemContext::open_archive(&path, rejecting) {
        Err(AssetError::UnsupportedEntry { path, .. }) => assert_eq!(path, "/docs/jack.txt"),
        other => panic!("Expected UnsupportedEntry, got {:?}", other),
    }
    Ok(())
}

#[test]
fn undecodable_entries() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = ZipBuilder::new()
        .stored("lzma.bin", b"not really LZMA")
        .method(14)
        .stored("secret.bin", b"not really encrypted")
        .flags(1)
        .stored("fine.bin", b"fine")
        .write(dir.path(), "odd.zip")?;

    // They're indexed (so they show up in listings) but can't be read.
    let assets = FilesystemContext::open_archive(&path, PackageOptions::default())?;
    assert_eq!(assets.get_files("/", Some("*.bin"), SearchOption::TopDirectoryOnly)?.len(), 3);
    assert_eq!(
        assets.entry("lzma.bin")?.compression_method,
        CompressionMethod::Unsupported(14)
    );
    assert!(assets.entry("secret.bin")?.encrypted);
    for path in ["lzma.bin", "secret.bin"] {
        assert!(matches!(
            assets.read_all_bytes(path),
            Err(AssetError::UnsupportedEntry { .. })
        ));
        assert!(assets.open_read(path).is_err());
    }
    assert_eq!(assets.read_all_bytes("fine.bin")?, b"fine");
    Ok(())
}

#[test]
fn checksums() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = ZipBuilder::new()
        .stored("stored.bin", b"stored bytes")
        .crc32(0xdead_beef)
        .deflated("deflated.bin", b"deflated bytes deflated bytes")
        .crc32(0xdead_beef)
        .write(dir.path(), "bad-crc.zip")?;

    let assets = FilesystemContext::open_archive(&path, PackageOptions::default())?;
    // Stored reads skip the check unless asked.
    assert_eq!(assets.read_all_bytes("stored.bin")?, b"stored bytes");
    assert!(matches!(
        assets.read_all_bytes("deflated.bin"),
        Err(AssetError::Checksum(_))
    ));

    let verifying = PackageOptions::default().with_verify_checksums(true);
    let assets = FilesystemContext::open_archive(&path, verifying)?;
    match assets.read_all_bytes("stored.bin") {
        Err(AssetError::Checksum(p)) => assert_eq!(p, "/stored.bin"),
        other => panic!("Expected a checksum error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn archive_quirks() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;

    // Local headers can have extra fields the central directory doesn't.
    let path = ZipBuilder::new()
        .stored("a.bin", b"first")
        .local_extra(&[0xfe, 0xca, 4, 0, 1, 2, 3, 4])
        .stored("b.bin", b"second")
        .comment(b"a comment with a fake PK\x05\x06 signature in it")
        .write(dir.path(), "quirky.zip")?;
    let assets = FilesystemContext::open_archive(&path, PackageOptions::default())?;
    assert_eq!(assets.read_all_bytes("a.bin")?, b"first");
    assert_eq!(assets.read_all_bytes("b.bin")?, b"second");

    // Prepended junk is refused unless asked for.
    let prefix = b"#!/bin/sh\necho 'self-extracting, allegedly'\nexit 0\n";
    let path = ZipBuilder::new()
        .stored("c.bin", b"third")
        .prefix(prefix)
        .write(dir.path(), "prefixed.zip")?;
    match FilesystemContext::open_archive(&path, PackageOptions::default()) {
        Err(AssetError::PrependedWithUnknownBytes(n)) => assert_eq!(n, prefix.len()),
        other => panic!("Expected PrependedWithUnknownBytes, got {:?}", other),
    }
    let assets =
        FilesystemContext::open_archive(&path, PackageOptions::default().with_prepended_data(true))?;
    assert_eq!(assets.read_all_bytes("c.bin")?, b"third");
    assert_eq!(
        assets.entry("c.bin")?.data_offset as usize,
        prefix.len() + 30 + "c.bin".len()
    );
    Ok(())
}

#[test]
fn corrupt_archives() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;

    let garbage = dir.path().join("garbage.zip");
    fs::write(&garbage, noise(4096, 3))?;
    assert!(matches!(
        FilesystemContext::open_archive(&garbage, PackageOptions::default()),
        Err(AssetError::CorruptArchive(_))
    ));

    let duplicates = ZipBuilder::new()
        .stored("same.bin", b"one")
        .stored("same.bin", b"two")
        .write(dir.path(), "duplicates.zip")?;
    assert!(matches!(
        FilesystemContext::open_archive(&duplicates, PackageOptions::default()),
        Err(AssetError::CorruptArchive(_))
    ));

    let escaping = ZipBuilder::new()
        .stored("../../etc/passwd", b"root")
        .write(dir.path(), "escaping.zip")?;
    assert!(matches!(
        FilesystemContext::open_archive(&escaping, PackageOptions::default()),
        Err(AssetError::CorruptArchive(_))
    ));

    // Chop off the data of the last file (and everything after it).
    let mut truncated = ZipBuilder::new().stored("x.bin", &noise(512, 4)).build();
    let eocdr = truncated.len() - 22;
    truncated.drain(100..eocdr);
    let truncated_path = dir.path().join("truncated.zip");
    fs::write(&truncated_path, truncated)?;
    assert!(FilesystemContext::open_archive(&truncated_path, PackageOptions::default()).is_err());

    let err = FilesystemContext::open_archive(dir.path().join("missing.apk"), PackageOptions::default())
        .unwrap_err();
    assert!(err.is_io_kind());
    Ok(())
}

#[test]
fn zip64_archives() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let text = "sixty-four bits of room, four bytes used. ".repeat(100);
    let builder = ZipBuilder::new()
        .directory("wide/")
        .stored("wide/stored.bin", b"stored behind a Zip64 record")
        .deflated("wide/deflated.txt", text.as_bytes())
        .zip64();
    let path = builder.write(dir.path(), "wide.zip")?;

    let assets = FilesystemContext::open_archive(&path, PackageOptions::default())?;
    assert!(assets.directory_exists("wide"));
    assert_eq!(assets.entries().count(), 3);
    assert_eq!(
        assets.read_all_bytes("wide/stored.bin")?,
        b"stored behind a Zip64 record"
    );
    let entry = assets.entry("wide/deflated.txt")?;
    assert_eq!(entry.size, text.len() as u64);
    assert_eq!(entry.strategy, ReadStrategy::DecompressThenRead);
    assert_eq!(assets.read_all_bytes("wide/deflated.txt")?, text.as_bytes());

    // With junk up front, the Zip64 record has to be found past its nominal offset.
    let prefix = b"MZ, or something like it";
    let path = builder.prefix(prefix).write(dir.path(), "wide-prefixed.zip")?;
    match FilesystemContext::open_archive(&path, PackageOptions::default()) {
        Err(AssetError::PrependedWithUnknownBytes(n)) => assert_eq!(n, prefix.len()),
        other => panic!("Expected PrependedWithUnknownBytes, got {:?}", other),
    }
    let assets =
        FilesystemContext::open_archive(&path, PackageOptions::default().with_prepended_data(true))?;
    assert_eq!(
        assets.read_all_bytes("wide/stored.bin")?,
        b"stored behind a Zip64 record"
    );
    assert_eq!(assets.read_all_bytes("wide/deflated.txt")?, text.as_bytes());
    Ok(())
}

#[test]
fn understated_sizes() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let text = "this inflates to far more than the header admits. ".repeat(1000);
    let path = ZipBuilder::new()
        .deflated("liar.txt", text.as_bytes())
        .size(16)
        .write(dir.path(), "liar.zip")?;

    let assets = FilesystemContext::open_archive(&path, PackageOptions::default())?;
    assert_eq!(assets.entry("liar.txt")?.size, 16);
    assert!(matches!(
        assets.read_all_bytes("liar.txt"),
        Err(AssetError::CorruptArchive(_))
    ));
    assert!(matches!(
        assets.open_read("liar.txt"),
        Err(AssetError::CorruptArchive(_))
    ));
    Ok(())
}

#[test]
fn unaddressable_names() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let path = ZipBuilder::new()
        .stored("levels/boss:1.bytes", b"colon")
        .stored("levels/what?.bytes", b"question mark")
        .stored("levels/pipe|.bytes", b"pipe")
        .stored("levels/ok.bytes", b"fine")
        .write(dir.path(), "names.zip")?;

    // Whatever gets listed has to be readable by the name it's listed under.
    let assets = FilesystemContext::open_archive(&path, PackageOptions::default())?;
    let listed = assets.get_files("levels", None, SearchOption::AllDirectories)?;
    assert_eq!(listed, ["levels/ok.bytes"]);
    for file in &listed {
        assert!(assets.file_exists(file));
        assert_eq!(assets.read_all_bytes(file)?, b"fine");
    }
    assert_eq!(assets.entries().count(), 1);
    Ok(())
}

/// Lays out loose asset files under `root`.
fn loose_assets(root: &std::path::Path) -> Result<()> {
    fs::create_dir_all(root.join("BSATest/Nested"))?;
    fs::create_dir_all(root.join("Empty"))?;
    fs::write(root.join("BSATest/raw_x.bytes"), b"loose raw")?;
    fs::write(root.join("BSATest/Nested/deep.bytes"), b"deep")?;
    fs::write(root.join("top.txt"), b"loose top")?;
    Ok(())
}

#[test]
fn directories() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    loose_assets(dir.path())?;

    let assets = FilesystemContext::open_directory(dir.path(), PackageOptions::default())?;
    assert_eq!(assets.package().mode(), PackageMode::Directory);
    assert!(assets.directory_exists("Empty"));
    assert!(assets.file_exists("BSATest/Nested/deep.bytes"));
    let mut all = assets.get_files("BSATest", None, SearchOption::AllDirectories)?;
    all.sort();
    assert_eq!(all, ["BSATest/Nested/deep.bytes", "BSATest/raw_x.bytes"]);
    let mut dirs = assets.get_directories("/", None, SearchOption::AllDirectories)?;
    dirs.sort();
    assert_eq!(dirs, ["BSATest", "BSATest/Nested", "Empty"]);

    assert_eq!(assets.read_all_bytes("BSATest/raw_x.bytes")?, b"loose raw");
    let mut reader = assets.open_read("top.txt")?;
    assert!(reader.as_slice().is_none());
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    assert_eq!(contents, "loose top");

    struct Where;
    impl BundleLoader for Where {
        type Bundle = (Option<usize>, String);
        type Error = AssetError;
        fn load(&self, range: BundleRange<'_>) -> AssetResult<Self::Bundle> {
            Ok((range.bytes().map(|b| b.len()), range.file_path().into_string()))
        }
    }
    let (bytes, file) = assets.load_bundle("BSATest/Nested/deep.bytes", &Where)?;
    assert!(bytes.is_none());
    assert_eq!(fs::read(file)?, b"deep");

    // Opening the same location through `detect()` lands in the same place.
    let detected = FilesystemContext::open(
        PackageLocation::detect(dir.path()),
        PackageOptions::default(),
    )?;
    assert_eq!(detected.entries().count(), assets.entries().count());

    assert!(matches!(
        FilesystemContext::open_directory(dir.path().join("nope"), PackageOptions::default()),
        Err(AssetError::DirectoryNotFound(_))
    ));
    Ok(())
}

#[cfg(unix)]
#[test]
fn awkward_directory_children() -> Result<()> {
    use std::os::unix::fs::symlink;

    init_logging();
    let dir = tempfile::tempdir()?;
    let root = dir.path();
    fs::create_dir_all(root.join("a"))?;
    fs::write(root.join("good.bytes"), b"good")?;
    fs::write(root.join("a/inner.bytes"), b"inner")?;
    fs::write(root.join("boss:1.bytes"), b"colon")?;
    fs::create_dir_all(root.join("what?"))?;
    fs::write(root.join("what?/hidden.bytes"), b"hidden")?;
    symlink(root.join("nowhere"), root.join("broken"))?;
    symlink(".", root.join("a/loop"))?;
    symlink(root.join("good.bytes"), root.join("alias.bytes"))?;

    // Broken links, loops, and names we can't look up don't sink the mount.
    let assets = FilesystemContext::open_directory(root, PackageOptions::default())?;
    let mut listed = assets.get_files("/", None, SearchOption::AllDirectories)?;
    listed.sort();
    assert_eq!(listed, ["a/inner.bytes", "alias.bytes", "good.bytes"]);
    for file in &listed {
        assert!(assets.file_exists(file));
        assets.read_all_bytes(file)?;
    }
    assert_eq!(assets.read_all_bytes("alias.bytes")?, b"good");
    assert_eq!(
        assets.get_directories("/", None, SearchOption::AllDirectories)?,
        ["a"]
    );
    Ok(())
}

#[test]
fn overrides() -> Result<()> {
    init_logging();
    let dir = tempfile::tempdir()?;
    let base = ZipBuilder::new()
        .directory("BSATest/")
        .stored("BSATest/raw_x.bytes", b"packaged raw")
        .stored("BSATest/bundle_x.lz4", b"packaged bundle")
        .write(dir.path(), "base.apk")?;
    let overrides = dir.path().join("overrides");
    loose_assets(&overrides)?;

    let assets = FilesystemContext::open(
        PackageLocation::Override {
            primary: overrides.clone(),
            fallback: base.clone(),
        },
        PackageOptions::default(),
    )
    .context("Couldn't mount with overrides")?;
    assert_eq!(assets.package().mode(), PackageMode::Override);
    assert_eq!(assets.package().sources().len(), 2);

    // Loose files win...
    assert_eq!(assets.read_all_bytes("BSATest/raw_x.bytes")?, b"loose raw");
    assert_eq!(assets.entry("BSATest/raw_x.bytes")?.source, 0);
    // ...but everything else in the package is still there.
    assert_eq!(assets.read_all_bytes("BSATest/bundle_x.lz4")?, b"packaged bundle");
    let mut listed = assets.get_files("BSATest", None, SearchOption::TopDirectoryOnly)?;
    listed.sort();
    assert_eq!(listed, ["BSATest/bundle_x.lz4", "BSATest/raw_x.bytes"]);

    // A missing override just means there's nothing to override.
    let assets = FilesystemContext::open_with_override(
        dir.path().join("no-overrides"),
        &base,
        PackageOptions::default(),
    )?;
    assert_eq!(assets.package().sources().len(), 1);
    assert_eq!(assets.read_all_bytes("BSATest/raw_x.bytes")?, b"packaged raw");

    // A missing base is an error.
    assert!(FilesystemContext::open_with_override(
        &overrides,
        dir.path().join("no-base.apk"),
        PackageOptions::default()
    )
    .is_err());
    Ok(())
}
