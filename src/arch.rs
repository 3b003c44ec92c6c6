use crate::result::*;

/// A checked cast from u64 to usize
///
/// Offsets in a package are 64-bit (Zip64),
/// but we index into a memory map with usize.
pub fn usize<I: Into<u64>>(i: I) -> AssetResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| AssetError::InsufficientAddressSpace)
}

/// Returns `mapping[start..start + len]`, or an error naming `what`
/// if that range runs off the end.
pub fn slice<'a>(mapping: &'a [u8], start: usize, len: usize, what: &str) -> AssetResult<&'a [u8]> {
    start
        .checked_add(len)
        .and_then(|end| mapping.get(start..end))
        .ok_or_else(|| AssetError::corrupt(format!("{what} runs past the end of the package")))
}
