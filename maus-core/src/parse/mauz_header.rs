//! The MAUZ archive header: magic, version, total size, outer options, and
//! the optional encryption fields that precede the archive body (FORMATNOTE, section 4.6
//! steps 2-3, 5).

use winnow::{
    binary::{le_i64, le_u16},
    token::{literal, take},
    PResult, Parser, Partial,
};

use crate::error::{Error, FormatError};
use crate::parse::options::Options;

/// `"ZuAm"` read as a little-endian `u32`.
pub const MAUZ_MAGIC: u32 = 0x5a75_416d;
/// Oldest format version this crate will read.
pub const MIN_VERSION: u16 = 1;
/// Newest format version this crate produces and reads.
pub const CURRENT_VERSION: u16 = 3;

/// The MAUZ archive header, up through the salt/IV when the archive is
/// encrypted at the outer level.
#[derive(Debug, Clone)]
pub struct MauzHeader {
    /// Format version.
    pub version: u16,
    /// Total byte length of the archive, including this header.
    pub total_size: i64,
    /// Outer options (unencrypted).
    pub outer_options: Options,
    /// Stored PBKDF2 cycle field (add 9001 for the real count).
    pub pbkdf2_cycles_field: Option<i64>,
    /// HMAC tag over the decrypted body, present only when encrypted.
    pub tag: Option<Vec<u8>>,
    /// PBKDF2 salt, present only when encrypted.
    pub salt: Option<Vec<u8>>,
    /// AES IV, present only when encrypted.
    pub iv: Option<Vec<u8>>,
}

impl MauzHeader {
    /// Parses a MAUZ header. The caller is expected to have already peeked
    /// the first 4 bytes to distinguish MAUZ from a bare MAUS single-entry
    /// stream (FORMATNOTE, section 4.6 step 1); this parser still consumes the magic.
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        let _ = literal(MAUZ_MAGIC.to_le_bytes()).parse_next(i)?;
        let version = le_u16.parse_next(i)?;
        if version < MIN_VERSION || version > CURRENT_VERSION {
            return Err(fail(FormatError::VersionOutOfRange {
                version,
                min: MIN_VERSION,
                max: CURRENT_VERSION,
            }));
        }

        let total_size = le_i64.parse_next(i)?;
        if total_size < 0 {
            return Err(fail(FormatError::InvalidLength {
                field: "total_size",
                value: total_size,
            }));
        }

        let outer_options = Options::parser(i)?;
        let encrypted = outer_options.encryption.is_some();

        let (pbkdf2_cycles_field, tag, salt, iv) = if encrypted {
            let cycles = le_i64.parse_next(i)?;
            if cycles < 0 {
                return Err(fail(FormatError::InvalidLength {
                    field: "pbkdf2_cycles",
                    value: cycles,
                }));
            }
            let hash = outer_options.hash.unwrap_or_else(crate::parse::options::HashAlgorithm::mauz_default);
            let tag = take(hash.output_len()).map(|s: &[u8]| s.to_vec()).parse_next(i)?;
            let key_len = outer_options
                .encryption
                .map(|size| size.key_len())
                .unwrap_or(32);
            let salt = take(key_len).map(|s: &[u8]| s.to_vec()).parse_next(i)?;
            let iv = take(16usize).map(|s: &[u8]| s.to_vec()).parse_next(i)?;
            (Some(cycles), Some(tag), Some(salt), Some(iv))
        } else {
            (None, None, None, None)
        };

        Ok(MauzHeader {
            version,
            total_size,
            outer_options,
            pbkdf2_cycles_field,
            tag,
            salt,
            iv,
        })
    }

    /// Encodes this header, including the `ZuAm` magic.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAUZ_MAGIC.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.total_size.to_le_bytes());
        self.outer_options.encode(out);
        if let Some(cycles) = self.pbkdf2_cycles_field {
            out.extend_from_slice(&cycles.to_le_bytes());
        }
        if let Some(tag) = &self.tag {
            out.extend_from_slice(tag);
        }
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
        opts.compression = Compression::None;
        let header = MauzHeader {
            version: CURRENT_VERSION,
            total_size: 128,
            outer_options: opts,
            pbkdf2_cycles_field: None,
            tag: None,
            salt: None,
            iv: None,
        };
        let mut out = Vec::new();
        header.encode(&mut out);
        let mut input = Partial::new(out.as_slice());
        let back = MauzHeader::parser(&mut input).unwrap();
        assert_eq!(back.total_size, 128);
    }
}
