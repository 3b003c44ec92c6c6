//! CRC-32 checks for entry data
//!
//! Decompressed entries stream through [`Crc32Reader`];
//! stored entries already sit in memory, so [`verify()`] hashes them in one go.

use std::io;
use std::io::prelude::*;

use crc32fast::Hasher;

use crate::result::*;

/// Reader that validates the CRC32 when it reaches the EOF.
pub struct Crc32Reader<R> {
    inner: R,
    hasher: Hasher,
    expected: u32,
}

impl<R> Crc32Reader<R> {
    pub fn new(inner: R, expected: u32) -> Crc32Reader<R> {
        Crc32Reader {
            inner,
            hasher: Hasher::new(),
            expected,
        }
    }

    /// Returns true if the checksum so far matches the one provided by `new()`
    fn check_matches(&self) -> bool {
        self.expected == self.hasher.clone().finalize()
    }
}

impl<R: Read> Read for Crc32Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = match self.inner.read(buf) {
            Ok(0) if !buf.is_empty() && !self.check_matches() => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "Invalid checksum"))
            }
            Ok(n) => n,
            Err(e) => return Err(e),
        };
        self.hasher.update(&buf[0..count]);
        Ok(count)
    }
}

/// Checks `data` against the CRC-32 recorded for the entry at `path`.
pub fn verify(data: &[u8], expected: u32, path: &str) -> AssetResult<()> {
    if crc32fast::hash(data) == expected {
        Ok(())
    } else {
        Err(AssetError::Checksum(path.to_owned()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;

    #[test]
    fn empty_reader() {
        let data: &[u8] = b"";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);

        let mut reader = Crc32Reader::new(data, 1);
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn byte_by_byte() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 1];

        let mut reader = Crc32Reader::new(data, 0x9be3e0a3);
        for _ in 0..4 {
            assert_eq!(reader.read(&mut buf).unwrap(), 1);
        }
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        // Can keep reading 0 bytes after the end
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn whole_buffers() {
        assert!(verify(b"1234", 0x9be3e0a3, "/a").is_ok());
        assert!(matches!(
            verify(b"1235", 0x9be3e0a3, "/a"),
            Err(AssetError::Checksum(p)) if p == "/a"
        ));
    }
}
