//! Length-prefixed byte strings, the most basic building block of the wire
//! format (FORMATNOTE, section 4.1).

use winnow::{
    binary::{le_u16, le_u8},
    error::{ErrMode, ErrorKind, FromExternalError, ParserError},
    token::take,
    PResult, Parser, Partial,
};

/// A length-prefixed byte string read from the wire.
///
/// A declared length of `0` means `256` (for the 8-bit prefix) or `65536`
/// (for the 16-bit prefix); it never means the empty string. This mirrors
/// the "declared length of 0" rule in FORMATNOTE, section 4.1 exactly.
#[derive(Clone, PartialEq, Eq)]
pub struct MausBytes(pub Vec<u8>);

impl std::fmt::Debug for MausBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s:?}"),
            Err(_) => write!(f, "<{} non-utf8 byte(s)>", self.0.len()),
        }
    }
}

impl MausBytes {
    /// Parses a string prefixed with an 8-bit length, where `0` means `256`.
    pub fn parser_u8(i: &mut Partial<&[u8]>) -> PResult<Self> {
        let declared = le_u8.parse_next(i)?;
        let count = if declared == 0 { 256 } else { declared as usize };
        take(count).map(|slice: &[u8]| Self(slice.to_vec())).parse_next(i)
    }

    /// Parses a string prefixed with a 16-bit little-endian length, where `0`
    /// means `65536`.
    pub fn parser_u16(i: &mut Partial<&[u8]>) -> PResult<Self> {
        let declared = le_u16.parse_next(i)?;
        let count = if declared == 0 { 65536 } else { declared as usize };
        take(count).map(|slice: &[u8]| Self(slice.to_vec())).parse_next(i)
    }

    /// Decodes this byte string as UTF-8.
    pub fn as_utf8(&self) -> PResult<&str> {
        std::str::from_utf8(&self.0).map_err(|e| {
            ErrMode::from_external_error(&Partial::new(self.0.as_slice()), ErrorKind::Verify, e)
        })
    }

    /// Encodes a `u8`-prefixed byte string, mapping a `0`/`256` length the
    /// same way the parser does on the way in.
    pub fn encode_u8(bytes: &[u8], out: &mut Vec<u8>) {
        assert!(
            !bytes.is_empty() && bytes.len() <= 256,
            "u8-prefixed string must be 1..=256 bytes, got {}",
            bytes.len()
        );
        let declared = if bytes.len() == 256 { 0 } else { bytes.len() as u8 };
        out.push(declared);
        out.extend_from_slice(bytes);
    }

    /// Encodes a `u16`-prefixed byte string.
    pub fn encode_u16(bytes: &[u8], out: &mut Vec<u8>) {
        assert!(
            !bytes.is_empty() && bytes.len() <= 65536,
            "u16-prefixed string must be 1..=65536 bytes, got {}",
            bytes.len()
        );
        let declared = if bytes.len() == 65536 { 0 } else { bytes.len() as u16 };
        out.extend_from_slice(&declared.to_le_bytes());
        out.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u8_length_zero_means_256() {
        let mut data = vec![0u8];
        data.extend(std::iter::repeat(b'x').take(256));
        let mut input = Partial::new(data.as_slice());
        let s = MausBytes::parser_u8(&mut input).unwrap();
        assert_eq!(s.0.len(), 256);
    }

    #[test]
    fn u16_length_zero_means_65536() {
        let mut data = vec![0u8, 0u8];
        data.extend(std::iter::repeat(b'y').take(65536));
        let mut input = Partial::new(data.as_slice());
        let s = MausBytes::parser_u16(&mut input).unwrap();
        assert_eq!(s.0.len(), 65536);
    }

    #[test]
    fn roundtrip_u8() {
        let mut out = Vec::new();
        MausBytes::encode_u8(b"hello.txt", &mut out);
        let mut input = Partial::new(out.as_slice());
        let s = MausBytes::parser_u8(&mut input).unwrap();
        assert_eq!(s.0, b"hello.txt");
    }
}
