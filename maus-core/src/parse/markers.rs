//! The four structural markers that delimit the entries and offsets blocks
//! inside a plaintext MAUZ body (FORMATNOTE, section 6).

use winnow::{binary::le_i32, PResult, Parser, Partial};

use crate::error::{Error, FormatError};

/// Precedes the whole block of entry records.
pub const ALL_ENTRIES: i32 = 0x5441_4403u32 as i32;
/// Precedes a single entry record within the `All-Entries` block.
pub const CUR_ENTRY: i32 = 0x7461_6403u32 as i32;
/// Precedes the whole block of offset records.
pub const ALL_OFFSETS: i32 = 0x5245_5603u32 as i32;
/// Precedes a single offset record within the `All-Offsets` block.
pub const CUR_OFFSET: i32 = 0x7265_7603u32 as i32;

/// Parses a 4-byte little-endian marker and checks it matches `expected`.
pub fn expect_marker(expected: i32) -> impl FnMut(&mut Partial<&[u8]>) -> PResult<()> {
    move |i: &mut Partial<&[u8]>| {
        let actual = le_i32.parse_next(i)?;
        if actual != expected {
            use winnow::error::FromExternalError;
            let err = Error::Format(FormatError::UnexpectedMarker { expected, actual });
            return Err(winnow::error::ErrMode::from_external_error(
                &Partial::new(&b""[..]),
                winnow::error::ErrorKind::Verify,
                err,
            ));
        }
        Ok(())
    }
}

/// Encodes a 4-byte little-endian marker.
pub fn encode_marker(marker: i32, out: &mut Vec<u8>) {
    out.extend_from_slice(&marker.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_values_match_formatnote() {
        assert_eq!(ALL_ENTRIES as u32, 0x5441_4403);
        assert_eq!(CUR_ENTRY as u32, 0x7461_6403);
        assert_eq!(ALL_OFFSETS as u32, 0x5245_5603);
        assert_eq!(CUR_OFFSET as u32, 0x7265_7603);
    }

    #[test]
    fn expect_marker_rejects_mismatch() {
        let bytes = CUR_ENTRY.to_le_bytes();
        let mut input = Partial::new(bytes.as_slice());
        assert!(expect_marker(ALL_ENTRIES)(&mut input).is_err());
    }

    #[test]
    fn expect_marker_accepts_match() {
        let bytes = ALL_OFFSETS.to_le_bytes();
        let mut input = Partial::new(bytes.as_slice());
        assert!(expect_marker(ALL_OFFSETS)(&mut input).is_ok());
    }
}
