//! The MAUS stream header: magic, version, the outer options list, and the
//! length/tag/salt/IV fields that follow it (FORMATNOTE, section 4.5 steps 1-4).

use winnow::{
    binary::{le_i64, le_u16},
    token::literal,
    PResult, Parser, Partial,
};

use crate::error::{Error, FormatError};
use crate::parse::options::Options;

/// `"mAuS"` read as a little-endian `u32`.
pub const MAUS_MAGIC: u32 = 0x5375_416d;
/// Oldest format version this crate will read.
pub const MIN_VERSION: u16 = 1;
/// Newest format version this crate produces and reads.
pub const CURRENT_VERSION: u16 = 3;

/// Either the plaintext `uncompressed_length` field, or the
/// `pbkdf2_cycles` field that takes its place when the entry is encrypted
/// (FORMATNOTE, section 4.5 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthOrCycles {
    /// Unencrypted: declared uncompressed length of the payload.
    UncompressedLength(i64),
    /// Encrypted: the stored cycle count, before adding the 9001 base
    /// (FORMATNOTE, section 6: "PBKDF2 base cycles: 9001").
    Pbkdf2CyclesField(i64),
}

impl LengthOrCycles {
    /// Real PBKDF2 iteration count, or `None` if this is an uncompressed
    /// length.
    pub fn pbkdf2_cycles(&self) -> Option<i64> {
        match self {
            Self::Pbkdf2CyclesField(field) => Some(field + 9001),
            Self::UncompressedLength(_) => None,
        }
    }
}

/// The MAUS stream header, up through the salt/IV (if present); the payload
/// itself follows immediately after.
#[derive(Debug, Clone)]
pub struct MausHeader {
    /// Format version, in `[MIN_VERSION, CURRENT_VERSION]`.
    pub version: u16,
    /// The options list read before decryption.
    pub outer_options: Options,
    /// Length of the payload as stored on the wire.
    pub compressed_length: i64,
    /// Either the uncompressed length, or the PBKDF2 cycle field.
    pub length_or_cycles: LengthOrCycles,
    /// Integrity tag: a plain hash digest (unencrypted) or an HMAC tag
    /// (encrypted); length equals the selected hash function's output.
    pub tag: Vec<u8>,
    /// PBKDF2 salt, present only when encrypted.
    pub salt: Option<Vec<u8>>,
    /// AES IV, present only when encrypted.
    pub iv: Option<Vec<u8>>,
}

impl MausHeader {
    /// Parses a MAUS header.
    ///
    /// `skip_magic` is set when the enclosing MAUZ archive already consumed
    /// the 4-byte magic as part of its own dispatch (FORMATNOTE, section 4.6 step 1).
    pub fn parser(skip_magic: bool) -> impl FnMut(&mut Partial<&[u8]>) -> PResult<Self> {
        move |i: &mut Partial<&[u8]>| {
            if !skip_magic {
                let _ = literal(MAUS_MAGIC.to_le_bytes()).parse_next(i)?;
            }
            let version = le_u16.parse_next(i)?;
            if version < MIN_VERSION || version > CURRENT_VERSION {
                return Err(fail(FormatError::VersionOutOfRange {
                    version,
                    min: MIN_VERSION,
                    max: CURRENT_VERSION,
                }));
            }

            let outer_options = Options::parser(i)?;
            let encrypted = outer_options.encryption.is_some();

            let compressed_length = le_i64.parse_next(i)?;
            if compressed_length < 0 {
                return Err(fail(FormatError::InvalidLength {
                    field: "compressed_length",
                    value: compressed_length,
                }));
            }

            let second_field = le_i64.parse_next(i)?;
            let length_or_cycles = if encrypted {
                if second_field < 0 {
                    return Err(fail(FormatError::InvalidLength {
                        field: "pbkdf2_cycles",
                        value: second_field,
                    }));
                }
                LengthOrCycles::Pbkdf2CyclesField(second_field)
            } else {
                if second_field < 0 {
                    return Err(fail(FormatError::InvalidLength {
                        field: "uncompressed_length",
                        value: second_field,
                    }));
                }
                LengthOrCycles::UncompressedLength(second_field)
            };

            let hash = outer_options.hash.unwrap_or_default();
            let tag_len = hash.output_len();
            let tag = winnow::token::take(tag_len)
                .map(|s: &[u8]| s.to_vec())
                .parse_next(i)?;

            let (salt, iv) = if encrypted {
                let key_len = outer_options
                    .encryption
                    .map(|size| size.key_len())
                    .unwrap_or(32);
                let salt = winnow::token::take(key_len)
                    .map(|s: &[u8]| s.to_vec())
                    .parse_next(i)?;
                let iv = winnow::token::take(16usize)
                    .map(|s: &[u8]| s.to_vec())
                    .parse_next(i)?;
                (Some(salt), Some(iv))
            } else {
                (None, None)
            };

            Ok(MausHeader {
                version,
                outer_options,
                compressed_length,
                length_or_cycles,
                tag,
                salt,
                iv,
            })
        }
    }

    /// Encodes this header, optionally including the `mAuS` magic.
    pub fn encode(&self, include_magic: bool, out: &mut Vec<u8>) {
        if include_magic {
            out.extend_from_slice(&MAUS_MAGIC.to_le_bytes());
        }
        out.extend_from_slice(&self.version.to_le_bytes());
        self.outer_options.encode(out);
        out.extend_from_slice(&self.compressed_length.to_le_bytes());
        let second_field = match self.length_or_cycles {
            LengthOrCycles::UncompressedLength(n) => n,
            LengthOrCycles::Pbkdf2CyclesField(n) => n,
        };
        out.extend_from_slice(&second_field.to_le_bytes());
        out.extend_from_slice(&self.tag);
        if let Some(salt) = &self.salt {
            out.extend_from_slice(salt);
        }
        if let Some(iv) = &self.iv {
            out.extend_from_slice(iv);
        }
    }
}

fn fail(e: FormatError) -> winnow::error::ErrMode<winnow::error::ContextError> {
    use winnow::error::FromExternalError;
    winnow::error::ErrMode::from_external_error(
        &Partial::new(&b""[..]),
        winnow::error::ErrorKind::Verify,
        Error::Format(e),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::options::Compression;

    #[test]
    fn roundtrip_unencrypted_header() {
        let mut opts = Options::default();
        opts.compression = Compression::Deflate;
        opts.filename = Some("hello.txt".into());
        let header = MausHeader {
            version: CURRENT_VERSION,
            outer_options: opts,
            compressed_length: 10,
            length_or_cycles: LengthOrCycles::UncompressedLength(14),
            tag: vec![0u8; 32],
            salt: None,
            iv: None,
        };
        let mut out = Vec::new();
        header.encode(true, &mut out);
        let mut input = Partial::new(out.as_slice());
        let back = MausHeader::parser(false)(&mut input).unwrap();
        assert_eq!(back.version, CURRENT_VERSION);
        assert_eq!(back.compressed_length, 10);
    }

    #[test]
    fn rejects_version_out_of_range() {
        let mut out = Vec::new();
        out.extend_from_slice(&MAUS_MAGIC.to_le_bytes());
        out.extend_from_slice(&(CURRENT_VERSION + 1).to_le_bytes());
        let mut input = Partial::new(out.as_slice());
        assert!(MausHeader::parser(false)(&mut input).is_err());
    }
}
