//! The options-list framing shared by MAUS and MAUZ headers (FORMATNOTE, section 4.1,
//! section 4.5 step 2), and the typed option values it carries.
//!
//! An options list is `count:u16` followed by `count` length-prefixed byte
//! strings, each using a 16-bit length prefix throughout (see `DESIGN.md`,
//! "options list entry width"), which comfortably accommodates the `Kom`
//! comment (up to 65536 bytes) and RSA/signature blobs without a second
//! framing rule.

use winnow::{
    binary::le_u16,
    PResult, Parser, Partial,
};

use crate::error::{Error, FormatError, UnsupportedError};
use crate::parse::date_time::GregorianTicks;
use crate::parse::raw::MausBytes;

/// Compression format, selected by the zero-argument `NK`/`DEF`/`LZMA`
/// keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// `NK`: identity stream, no compression.
    #[default]
    None,
    /// `DEF`: raw DEFLATE, no zlib wrapper.
    Deflate,
    /// `LZMA`: LZMA with an embedded 5-byte properties header.
    Lzma,
}

impl Compression {
    const KEYWORD_NONE: &'static [u8] = b"NK";
    const KEYWORD_DEFLATE: &'static [u8] = b"DEF";
    const KEYWORD_LZMA: &'static [u8] = b"LZMA";

    fn keyword(self) -> &'static [u8] {
        match self {
            Self::None => Self::KEYWORD_NONE,
            Self::Deflate => Self::KEYWORD_DEFLATE,
            Self::Lzma => Self::KEYWORD_LZMA,
        }
    }
}

/// AES key size, in bits. The only encryption format this crate supports
/// (FORMATNOTE, section 4.2: "Supported AES key sizes: 128, 192, 256 bits").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesKeySize {
    /// AES-128
    Bits128,
    /// AES-192
    Bits192,
    /// AES-256
    Bits256,
}

impl AesKeySize {
    /// Key size in bytes.
    pub fn key_len(self) -> usize {
        self.bits() as usize / 8
    }

    /// Key size in bits.
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits128 => 128,
            Self::Bits192 => 192,
            Self::Bits256 => 256,
        }
    }

    fn from_bits(bits: u32) -> Result<Self, Error> {
        match bits {
            128 => Ok(Self::Bits128),
            192 => Ok(Self::Bits192),
            256 => Ok(Self::Bits256),
            other => Err(UnsupportedError::AesKeySize(other).into()),
        }
    }

    fn parse_argument(arg: &[u8]) -> Result<Self, Error> {
        match arg.len() {
            3 => {
                let text = std::str::from_utf8(arg)
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .ok_or(FormatError::InvalidLength {
                        field: "AES key size (ascii)",
                        value: 0,
                    })?;
                Self::from_bits(text)
            }
            2 => {
                let bits = u16::from_le_bytes([arg[0], arg[1]]) as u32;
                Self::from_bits(bits)
            }
            _ => Err(FormatError::InvalidLength {
                field: "AES key size argument",
                value: arg.len() as i64,
            }
            .into()),
        }
    }

    fn encode_argument(self) -> Vec<u8> {
        // The 2-byte little-endian form round-trips with the ASCII form
        // (both are accepted on read); we always write the compact one.
        (self.bits() as u16).to_le_bytes().to_vec()
    }
}

/// Hash function used for the unencrypted payload checksum, the encrypted
/// HMAC, and signatures (FORMATNOTE, section 4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
    /// SHA3-256
    Sha3_256,
    /// SHA3-384
    Sha3_384,
    /// SHA3-512
    Sha3_512,
    /// Whirlpool
    Whirlpool,
}

impl HashAlgorithm {
    /// Output size in bytes (the tag/digest length, FORMATNOTE, section 6).
    pub fn output_len(self) -> usize {
        match self {
            Self::Sha256 | Self::Sha3_256 => 32,
            Self::Sha384 | Self::Sha3_384 => 48,
            Self::Sha512 | Self::Sha3_512 | Self::Whirlpool => 64,
        }
    }

    fn identifier(self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Sha384 => "SHA384",
            Self::Sha512 => "SHA512",
            Self::Sha3_256 => "SHA3-256",
            Self::Sha3_384 => "SHA3-384",
            Self::Sha3_512 => "SHA3-512",
            Self::Whirlpool => "WHIRLPOOL",
        }
    }

    fn from_identifier(s: &str) -> Result<Self, Error> {
        match s {
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            "SHA3-256" => Ok(Self::Sha3_256),
            "SHA3-384" => Ok(Self::Sha3_384),
            "SHA3-512" => Ok(Self::Sha3_512),
            "WHIRLPOOL" => Ok(Self::Whirlpool),
            other => Err(UnsupportedError::HashFunction(other.to_string()).into()),
        }
    }

    /// Default hash function for a MAUZ archive when none is specified
    /// (FORMATNOTE, section 4.6 step 3).
    pub fn mauz_default() -> Self {
        Self::Sha512
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::Sha256
    }
}

/// Signature scheme used by `RSAsch`/`DSAsch`/`ECsch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// RSA (PKCS#1 v1.5 or PSS over the plaintext hash).
    Rsa,
    /// DSA.
    Dsa,
    /// ECDSA.
    Ecdsa,
}

impl SignatureAlgorithm {
    fn sig_keyword(self) -> &'static [u8] {
        match self {
            Self::Rsa => b"RSAsch",
            Self::Dsa => b"DSAsch",
            Self::Ecdsa => b"ECsch",
        }
    }

    fn id_keyword(self) -> &'static [u8] {
        match self {
            Self::Rsa => b"RSAid",
            Self::Dsa => b"DSAid",
            Self::Ecdsa => b"ECid",
        }
    }
}

/// A single `(algorithm, signer id, signature blob)` record. FORMATNOTE,
/// section 4.5, Design Note 9(b): more than one signature may appear on the
/// same entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Which scheme produced `blob`.
    pub algorithm: SignatureAlgorithm,
    /// Opaque signer identity, if the paired `*id` keyword was present.
    pub signer_id: Option<Vec<u8>>,
    /// The signature bytes themselves.
    pub blob: Vec<u8>,
}

/// The fully-parsed options list for one MAUS header (outer or inner/
/// encrypted), FORMATNOTE, section 3 "Options carry: ...".
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Compression format (`NK`/`DEF`/`LZMA`).
    pub compression: Compression,
    /// AES key size, if the `AES` keyword was present.
    pub encryption: Option<AesKeySize>,
    /// `Name`: filename.
    pub filename: Option<String>,
    /// `DeL`: uncompressed-length override.
    pub uncompressed_length_override: Option<i64>,
    /// `Ers`: created time.
    pub created: Option<GregorianTicks>,
    /// `Mod`: modified time.
    pub modified: Option<GregorianTicks>,
    /// `Kom`: comment (1..=65536 UTF-8 bytes).
    pub comment: Option<String>,
    /// `Hsh`: hash function identifier.
    pub hash: Option<HashAlgorithm>,
    /// `RSAsch`/`DSAsch`/`ECsch` (+ optional signer id): zero or more.
    pub signatures: Vec<Signature>,
    /// `RSAk`: RSA-wrapped content key.
    pub rsa_wrapped_key: Option<Vec<u8>>,
}

/// Bit set over the recognized option tags, used to track which options were
/// moved into the encrypted inner options block (FORMATNOTE, section 4.5 step 2,
/// Design Note 9: "settable-option sets").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionTags(u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OptionTag {
    Compression = 1 << 0,
    Encryption = 1 << 1,
    Filename = 1 << 2,
    UncompressedLength = 1 << 3,
    Created = 1 << 4,
    Modified = 1 << 5,
    Comment = 1 << 6,
    Hash = 1 << 7,
    Signatures = 1 << 8,
    RsaWrappedKey = 1 << 9,
}

impl OptionTags {
    /// An empty set.
    pub fn empty() -> Self {
        Self(0)
    }

    /// Adds a tag to the set.
    pub fn insert(&mut self, tag: OptionTag) {
        self.0 |= tag as u16;
    }

    /// Returns whether `tag` is in the set.
    pub fn contains(&self, tag: OptionTag) -> bool {
        self.0 & (tag as u16) != 0
    }
}

impl Options {
    /// Parses an options list: `count:u16` followed by `count`
    /// `u16`-prefixed byte strings, folding recognized keywords into the
    /// returned `Options`. Unrecognized keywords fail with
    /// `Unsupported::OptionKeyword` (FORMATNOTE, section 4.1).
    pub fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        let count = le_u16.parse_next(i)?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(MausBytes::parser_u16(i)?.0);
        }
        Ok(Self::from_entries(&entries).map_err(winnow_error)?)
    }

    fn from_entries(entries: &[Vec<u8>]) -> Result<Self, Error> {
        let mut opts = Options::default();
        let mut seen_compression = false;
        let mut seen_encryption = false;
        let mut idx = 0usize;

        macro_rules! next_arg {
            ($keyword:expr) => {{
                idx += 1;
                entries.get(idx - 1).ok_or_else(|| {
                    Error::Format(FormatError::InvalidLength {
                        field: $keyword,
                        value: -1,
                    })
                })?
            }};
        }

        while idx < entries.len() {
            let keyword = &entries[idx];
            idx += 1;
            match keyword.as_slice() {
                b"NK" => set_compression(&mut opts, &mut seen_compression, Compression::None)?,
                b"DEF" => set_compression(&mut opts, &mut seen_compression, Compression::Deflate)?,
                b"LZMA" => set_compression(&mut opts, &mut seen_compression, Compression::Lzma)?,
                b"AES" => {
                    let arg = next_arg!("AES");
                    let size = AesKeySize::parse_argument(arg)?;
                    if seen_encryption && opts.encryption != Some(size) {
                        return Err(FormatError::ContradictoryFormat { keyword: "AES" }.into());
                    }
                    seen_encryption = true;
                    opts.encryption = Some(size);
                }
                b"Name" => {
                    let arg = next_arg!("Name").clone();
                    let name = String::from_utf8(arg).map_err(|_| {
                        FormatError::InvalidLength {
                            field: "Name",
                            value: -1,
                        }
                    })?;
                    agree(&mut opts.filename, name, "Name")?;
                }
                b"DeL" => {
                    let arg = next_arg!("DeL");
                    let value = read_i64_le(arg, "DeL")?;
                    agree(&mut opts.uncompressed_length_override, value, "DeL")?;
                }
                b"Ers" => {
                    let arg = next_arg!("Ers");
                    let value = parse_valid_ticks(arg, "Ers")?;
                    agree(&mut opts.created, value, "Ers")?;
                }
                b"Mod" => {
                    let arg = next_arg!("Mod");
                    let value = parse_valid_ticks(arg, "Mod")?;
                    agree(&mut opts.modified, value, "Mod")?;
                }
                b"Kom" => {
                    let arg = next_arg!("Kom").clone();
                    if arg.is_empty() || arg.len() > 65536 {
                        return Err(FormatError::InvalidLength {
                            field: "Kom",
                            value: arg.len() as i64,
                        }
                        .into());
                    }
                    let comment = String::from_utf8(arg).map_err(|_| FormatError::InvalidLength {
                        field: "Kom",
                        value: -1,
                    })?;
                    agree(&mut opts.comment, comment, "Kom")?;
                }
                b"Hsh" => {
                    let arg = next_arg!("Hsh").clone();
                    let text = String::from_utf8(arg).map_err(|_| FormatError::InvalidLength {
                        field: "Hsh",
                        value: -1,
                    })?;
                    let hash = HashAlgorithm::from_identifier(&text)?;
                    agree(&mut opts.hash, hash, "Hsh")?;
                }
                b"RSAk" => {
                    let arg = next_arg!("RSAk").clone();
                    agree(&mut opts.rsa_wrapped_key, arg, "RSAk")?;
                }
                kw @ (b"RSAsch" | b"DSAsch" | b"ECsch") => {
                    let algorithm = match kw {
                        b"RSAsch" => SignatureAlgorithm::Rsa,
                        b"DSAsch" => SignatureAlgorithm::Dsa,
                        _ => SignatureAlgorithm::Ecdsa,
                    };
                    let blob = next_arg!("signature").clone();
                    let mut signer_id = None;
                    if let Some(next_kw) = entries.get(idx) {
                        if *next_kw == algorithm.id_keyword() {
                            idx += 1;
                            signer_id = Some(next_arg!("signer id").clone());
                        }
                    }
                    opts.signatures.push(Signature {
                        algorithm,
                        signer_id,
                        blob,
                    });
                }
                other => {
                    return Err(Error::unsupported_keyword(
                        String::from_utf8_lossy(other).into_owned(),
                    ));
                }
            }
        }

        Ok(opts)
    }

    /// Encodes this options list back to its wire form (`count:u16` + the
    /// `u16`-prefixed entries).
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut entries: Vec<Vec<u8>> = Vec::new();

        entries.push(self.compression.keyword().to_vec());
        if let Some(size) = self.encryption {
            entries.push(b"AES".to_vec());
            entries.push(size.encode_argument());
        }
        if let Some(name) = &self.filename {
            entries.push(b"Name".to_vec());
            entries.push(name.clone().into_bytes());
        }
        if let Some(len) = self.uncompressed_length_override {
            entries.push(b"DeL".to_vec());
            entries.push(len.to_le_bytes().to_vec());
        }
        if let Some(created) = self.created {
            entries.push(b"Ers".to_vec());
            entries.push(created.0.to_le_bytes().to_vec());
        }
        if let Some(modified) = self.modified {
            entries.push(b"Mod".to_vec());
            entries.push(modified.0.to_le_bytes().to_vec());
        }
        if let Some(comment) = &self.comment {
            entries.push(b"Kom".to_vec());
            entries.push(comment.clone().into_bytes());
        }
        if let Some(hash) = self.hash {
            entries.push(b"Hsh".to_vec());
            entries.push(hash.identifier().as_bytes().to_vec());
        }
        if let Some(key) = &self.rsa_wrapped_key {
            entries.push(b"RSAk".to_vec());
            entries.push(key.clone());
        }
        for sig in &self.signatures {
            entries.push(sig.algorithm.sig_keyword().to_vec());
            entries.push(sig.blob.clone());
            if let Some(id) = &sig.signer_id {
                entries.push(sig.algorithm.id_keyword().to_vec());
                entries.push(id.clone());
            }
        }

        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for entry in entries {
            MausBytes::encode_u16(&entry, out);
        }
    }

    /// Merges `inner` (the post-decryption options block) over `self` (the
    /// outer options), matching FORMATNOTE, section 3: "options flagged as encrypted
    /// appear only in the inner ... block": any field present in `inner`
    /// wins.
    pub fn merge_inner(&self, inner: &Options) -> Options {
        Options {
            compression: if inner.compression != Compression::None || self.compression == Compression::None {
                inner.compression
            } else {
                self.compression
            },
            encryption: inner.encryption.or(self.encryption),
            filename: inner.filename.clone().or_else(|| self.filename.clone()),
            uncompressed_length_override: inner
                .uncompressed_length_override
                .or(self.uncompressed_length_override),
            created: inner.created.or(self.created),
            modified: inner.modified.or(self.modified),
            comment: inner.comment.clone().or_else(|| self.comment.clone()),
            hash: inner.hash.or(self.hash),
            signatures: if inner.signatures.is_empty() {
                self.signatures.clone()
            } else {
                inner.signatures.clone()
            },
            rsa_wrapped_key: inner
                .rsa_wrapped_key
                .clone()
                .or_else(|| self.rsa_wrapped_key.clone()),
        }
    }
}

fn set_compression(
    opts: &mut Options,
    seen: &mut bool,
    value: Compression,
) -> Result<(), Error> {
    if *seen && opts.compression != value {
        return Err(FormatError::ContradictoryFormat {
            keyword: "NK/DEF/LZMA",
        }
        .into());
    }
    *seen = true;
    opts.compression = value;
    Ok(())
}

fn agree<T: PartialEq>(slot: &mut Option<T>, value: T, keyword: &'static str) -> Result<(), Error> {
    match slot {
        Some(existing) if *existing != value => {
            Err(FormatError::ContradictoryFormat { keyword }.into())
        }
        _ => {
            *slot = Some(value);
            Ok(())
        }
    }
}

/// Parses an `Ers`/`Mod` tick count, rejecting one that doesn't fit in a
/// valid date (FORMATNOTE, section 4.5: "must fit in a valid date").
fn parse_valid_ticks(bytes: &[u8], field: &'static str) -> Result<GregorianTicks, Error> {
    let ticks = GregorianTicks(read_i64_le(bytes, field)?);
    if ticks.to_datetime().is_none() {
        return Err(FormatError::InvalidLength {
            field,
            value: ticks.0,
        }
        .into());
    }
    Ok(ticks)
}

fn read_i64_le(bytes: &[u8], field: &'static str) -> Result<i64, Error> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| FormatError::InvalidLength {
        field,
        value: bytes.len() as i64,
    })?;
    Ok(i64::from_le_bytes(arr))
}

fn winnow_error(e: Error) -> winnow::error::ErrMode<winnow::error::ContextError> {
    use winnow::error::{ErrMode, FromExternalError};
    ErrMode::from_external_error(&Partial::new(&b""[..]), winnow::error::ErrorKind::Verify, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_list(entries: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for entry in entries {
            MausBytes::encode_u16(entry, &mut out);
        }
        out
    }

    #[test]
    fn parses_name_and_deflate() {
        let bytes = encode_list(&[b"Name", b"hello.txt", b"DEF"]);
        let mut input = Partial::new(bytes.as_slice());
        let opts = Options::parser(&mut input).unwrap();
        assert_eq!(opts.filename.as_deref(), Some("hello.txt"));
        assert_eq!(opts.compression, Compression::Deflate);
    }

    #[test]
    fn unknown_keyword_is_unsupported() {
        let bytes = encode_list(&[b"ZZZ", b"x"]);
        let mut input = Partial::new(bytes.as_slice());
        let err = Options::parser(&mut input);
        assert!(err.is_err());
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let bytes = encode_list(&[b"Ers", &(-1i64).to_le_bytes()]);
        let mut input = Partial::new(bytes.as_slice());
        assert!(Options::parser(&mut input).is_err());
    }

    #[test]
    fn contradictory_option_fails() {
        let bytes = encode_list(&[b"Name", b"a.txt", b"Name", b"b.txt"]);
        let mut input = Partial::new(bytes.as_slice());
        assert!(Options::parser(&mut input).is_err());
    }

    #[test]
    fn roundtrip_encode_parse() {
        let mut opts = Options::default();
        opts.compression = Compression::Lzma;
        opts.filename = Some("a/b.bin".into());
        opts.comment = Some("hi".into());
        let mut out = Vec::new();
        opts.encode(&mut out);
        let mut input = Partial::new(out.as_slice());
        let back = Options::parser(&mut input).unwrap();
        assert_eq!(back.filename, opts.filename);
        assert_eq!(back.comment, opts.comment);
        assert_eq!(back.compression, Compression::Lzma);
    }
}
