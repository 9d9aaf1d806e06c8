//! Compression adapters: a uniform write/read interface over DEFLATE, LZMA,
//! and the identity ("none") stream (FORMATNOTE, section 4.3).
//!
//! The adapters operate on fully-buffered `Vec<u8>`s rather than streaming
//! `Read`/`Write` pairs, consistent with section 1's non-goal of "streaming
//! encryption without buffering the whole plaintext", which already forces
//! a full in-memory pass for anything encrypted, and with keeping the
//! unencrypted path symmetrical with it.

use std::io::{Read, Write};

use crate::error::{Error, UnsupportedError};
use crate::parse::options::Compression;

/// Smallest LZMA dictionary size this crate will honor on read (FORMATNOTE, section 4.3).
pub const LZMA_DICT_MIN: u32 = 16 * 1024;
/// Largest LZMA dictionary size this crate will honor on read (FORMATNOTE, section 4.3).
pub const LZMA_DICT_MAX: u32 = 64 * 1024 * 1024;
/// Default LZMA dictionary size used when writing, absent an explicit
/// choice (FORMATNOTE, section 4.3).
pub const LZMA_DICT_DEFAULT: u32 = 8 * 1024 * 1024;

/// Write-time compression configuration: the wire-level
/// [`Compression`] tag plus the parameters that only matter while encoding
/// (FORMATNOTE Design Note 9: "Dynamic dispatch over 'compression format'" modeled
/// as a tagged sum).
#[derive(Debug, Clone, Copy)]
pub enum CompressionConfig {
    /// No compression.
    None,
    /// Raw DEFLATE. `level` is a 0..=9 `flate2::Compression` level.
    Deflate {
        /// Compression level, default 6.
        level: u32,
    },
    /// LZMA with an embedded 5-byte properties header.
    Lzma {
        /// Dictionary size in bytes; must lie in
        /// `[LZMA_DICT_MIN, LZMA_DICT_MAX]`.
        dictionary_size: u32,
    },
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::Deflate { level: 6 }
    }
}

impl CompressionConfig {
    /// The wire-level tag this configuration corresponds to.
    pub fn tag(&self) -> Compression {
        match self {
            Self::None => Compression::None,
            Self::Deflate { .. } => Compression::Deflate,
            Self::Lzma { .. } => Compression::Lzma,
        }
    }
}

/// Compresses `plaintext` per `config`, returning the bytes to store as the
/// payload.
pub fn compress(config: CompressionConfig, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
    match config {
        CompressionConfig::None => Ok(plaintext.to_vec()),
        CompressionConfig::Deflate { level } => {
            #[cfg(feature = "deflate")]
            {
                use flate2::write::DeflateEncoder;
                let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::new(level));
                encoder.write_all(plaintext)?;
                Ok(encoder.finish()?)
            }
            #[cfg(not(feature = "deflate"))]
            {
                let _ = level;
                Err(UnsupportedError::CodecNotEnabled(Compression::Deflate).into())
            }
        }
        CompressionConfig::Lzma { dictionary_size } => {
            #[cfg(feature = "lzma")]
            {
                validate_dictionary_size(dictionary_size)?;
                let mut out = Vec::new();
                lzma_rs::lzma_compress(&mut std::io::BufReader::new(plaintext), &mut out)
                    .map_err(|_| UnsupportedError::LzmaProperties)?;
                Ok(out)
            }
            #[cfg(not(feature = "lzma"))]
            {
                let _ = dictionary_size;
                Err(UnsupportedError::CodecNotEnabled(Compression::Lzma).into())
            }
        }
    }
}

/// Decompresses `compressed` (previously produced by [`compress`] or an
/// interoperable encoder) back to its plaintext form, per the wire-level
/// `tag`.
pub fn decompress(tag: Compression, compressed: &[u8]) -> Result<Vec<u8>, Error> {
    match tag {
        Compression::None => Ok(compressed.to_vec()),
        Compression::Deflate => {
            #[cfg(feature = "deflate")]
            {
                use flate2::read::DeflateDecoder;
                let mut decoder = DeflateDecoder::new(compressed);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            #[cfg(not(feature = "deflate"))]
            {
                Err(UnsupportedError::CodecNotEnabled(Compression::Deflate).into())
            }
        }
        Compression::Lzma => {
            #[cfg(feature = "lzma")]
            {
                if compressed.len() < 5 {
                    return Err(UnsupportedError::LzmaProperties.into());
                }
                let props_byte = compressed[0];
                if props_byte > 8 * 9 * 5 {
                    return Err(UnsupportedError::LzmaProperties.into());
                }
                let dict_size =
                    u32::from_le_bytes([compressed[1], compressed[2], compressed[3], compressed[4]]);
                validate_dictionary_size(dict_size)?;

                let mut out = Vec::new();
                lzma_rs::lzma_decompress(&mut std::io::BufReader::new(compressed), &mut out)
                    .map_err(|_| Error::ChecksumMismatch)?;
                Ok(out)
            }
            #[cfg(not(feature = "lzma"))]
            {
                Err(UnsupportedError::CodecNotEnabled(Compression::Lzma).into())
            }
        }
    }
}

#[cfg(feature = "lzma")]
fn validate_dictionary_size(size: u32) -> Result<(), Error> {
    if !(LZMA_DICT_MIN..=LZMA_DICT_MAX).contains(&size) {
        return Err(UnsupportedError::LzmaDictionarySize(size).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_roundtrip() {
        let plaintext = b"hello, world!";
        let compressed = compress(CompressionConfig::None, plaintext).unwrap();
        assert_eq!(compressed, plaintext);
        let back = decompress(Compression::None, &compressed).unwrap();
        assert_eq!(back, plaintext);
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn deflate_roundtrip() {
        let plaintext = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbb";
        let compressed = compress(CompressionConfig::Deflate { level: 6 }, plaintext).unwrap();
        let back = decompress(Compression::Deflate, &compressed).unwrap();
        assert_eq!(back, plaintext);
    }

    #[cfg(feature = "lzma")]
    #[test]
    fn lzma_roundtrip() {
        let plaintext = b"the quick brown fox jumps over the lazy dog, many times over";
        let compressed = compress(
            CompressionConfig::Lzma {
                dictionary_size: LZMA_DICT_DEFAULT,
            },
            plaintext,
        )
        .unwrap();
        let back = decompress(Compression::Lzma, &compressed).unwrap();
        assert_eq!(back, plaintext);
    }
}
