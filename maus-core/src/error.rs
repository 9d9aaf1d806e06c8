//! All error types used in this crate

use crate::parse::HashAlgorithm;

/// Any MAUS/MAUZ-related error, from invalid containers to crypto failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not a valid MAUS/MAUZ container, or a variant that is unsupported.
    #[error("format: {0}")]
    Format(#[from] FormatError),

    /// Something is not supported by this crate.
    #[error("unsupported: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// The container read farther than the bytes available.
    #[error("truncated: expected at least {needed} more byte(s)")]
    Truncated {
        /// Number of additional bytes that would have been required.
        needed: usize,
    },

    /// An unencrypted container's embedded hash didn't match its payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// Decryption succeeded but the HMAC over the plaintext didn't match.
    ///
    /// Recoverable: the caller may call `set_password`/`set_key` again and
    /// retry `decrypt()`.
    #[error("bad key (wrong password, key, or tampered data)")]
    BadKey,

    /// A path-related error raised while mutating an archive in create mode.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// An operation was attempted in a state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A cryptographic primitive failed (RSA unwrap with the wrong key,
    /// signature verification mismatch, and so on).
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// I/O-related error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Self::Format(e) => Self::Format(e.clone()),
            Self::Unsupported(e) => Self::Unsupported(e.clone()),
            Self::Truncated { needed } => Self::Truncated { needed: *needed },
            Self::ChecksumMismatch => Self::ChecksumMismatch,
            Self::BadKey => Self::BadKey,
            Self::Path(e) => Self::Path(e.clone()),
            Self::InvalidState(s) => Self::InvalidState(s),
            Self::Crypto(e) => Self::Crypto(e.clone()),
            // `std::io::Error` isn't `Clone`; a cloned `io` error keeps the
            // same kind and message but loses any OS error code.
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// Recovers an `Error` stashed in a winnow `ContextError`'s cause by one of
/// this crate's parsers (via `ErrMode::from_external_error`), falling back
/// to a generic format error when no such cause is present.
pub(crate) fn from_context(e: winnow::error::ErrMode<winnow::error::ContextError>) -> Error {
    match e {
        winnow::error::ErrMode::Incomplete(winnow::error::Needed::Size(n)) => {
            Error::Truncated { needed: n.get() }
        }
        winnow::error::ErrMode::Incomplete(winnow::error::Needed::Unknown) => {
            Error::Truncated { needed: 1 }
        }
        winnow::error::ErrMode::Backtrack(ctx) | winnow::error::ErrMode::Cut(ctx) => ctx
            .cause()
            .and_then(|c| c.downcast_ref::<Error>())
            .cloned()
            .unwrap_or(Error::Format(FormatError::TrailingDataMismatch)),
    }
}

impl Error {
    /// Shorthand for an unsupported-option-keyword error.
    pub fn unsupported_keyword(keyword: String) -> Self {
        Self::Unsupported(UnsupportedError::OptionKeyword(keyword))
    }
}

/// Specific MAUS/MAUZ format errors: invalid containers, or implementation
/// shortcomings.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FormatError {
    /// The MAUS magic (`mAuS`) was not found where expected.
    #[error("MAUS magic not found")]
    MausMagicMismatch,

    /// The MAUZ magic (`ZuAm`) was not found where expected.
    #[error("MAUZ magic not found")]
    MauzMagicMismatch,

    /// The format version is outside `[MIN_VERSION, CURRENT_VERSION]`.
    #[error("unsupported version: {version} (supported: {min}..={max})")]
    VersionOutOfRange {
        /// version found in the header
        version: u16,
        /// lowest version this crate can read
        min: u16,
        /// highest version this crate can read
        max: u16,
    },

    /// The same option keyword appeared twice in one options list with
    /// different values.
    #[error("contradictory format option: {keyword}")]
    ContradictoryFormat {
        /// the repeated keyword
        keyword: &'static str,
    },

    /// `compressed_length`/`uncompressed_length`/`pbkdf2_cycles` was
    /// non-positive or implausibly large.
    #[error("invalid length field: {field} = {value}")]
    InvalidLength {
        /// name of the offending field
        field: &'static str,
        /// the value that was read
        value: i64,
    },

    /// Duplicate entry index within `[0, count)` in a MAUZ archive.
    #[error("duplicate entry index: {index}")]
    DuplicateEntryIndex {
        /// the repeated index
        index: i64,
    },

    /// The path recorded in the `All-Offsets` block didn't match the one
    /// recorded in the `All-Entries` block for the same index.
    #[error("offsets path mismatch for index {index}")]
    OffsetsPathMismatch {
        /// entry index whose paths disagreed
        index: i64,
    },

    /// The offset recorded in the `All-Offsets` block didn't match the byte
    /// position at which the entry actually began.
    #[error("offset mismatch for index {index}: recorded {recorded}, actual {actual}")]
    OffsetMismatch {
        /// entry index whose offset disagreed
        index: i64,
        /// offset recorded in the `All-Offsets` block
        recorded: i64,
        /// offset at which the entry's bytes actually began
        actual: i64,
    },

    /// The trailing `meta_offset` field didn't equal the byte position at
    /// which `All-Offsets` began.
    #[error("meta-offset mismatch: recorded {recorded}, actual {actual}")]
    MetaOffsetMismatch {
        /// value stored in the trailing field
        recorded: i64,
        /// offset at which `All-Offsets` actually began
        actual: i64,
    },

    /// A structural marker (`All-Entries`, `Cur-Entry`, `All-Offsets`,
    /// `Cur-Offset`) didn't match what was expected at this point in the
    /// stream.
    #[error("unexpected marker: expected {expected:#x}, got {actual:#x}")]
    UnexpectedMarker {
        /// the marker value that should have been there
        expected: i32,
        /// the marker value that was actually read
        actual: i32,
    },

    /// Bytes remained after the last structural element that weren't
    /// exactly the trailing `meta_offset` field.
    #[error("trailing data after All-Offsets block doesn't match declared total size")]
    TrailingDataMismatch,

    /// The salt or IV duplicated at the start of the payload region didn't
    /// byte-match the copy carried in the header (FORMATNOTE, section 4.5: "the
    /// duplication is deliberate and must round-trip bit-exactly").
    #[error("duplicated {field} in payload region doesn't match header copy")]
    DuplicatedFieldMismatch {
        /// which field disagreed (`"salt"` or `"iv"`)
        field: &'static str,
    },
}

/// Some part of the MAUS/MAUZ format is not supported by this crate.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UnsupportedError {
    /// An options-list keyword wasn't recognized.
    #[error("unrecognized option keyword: {0:?}")]
    OptionKeyword(String),

    /// An AES key size other than 128/192/256 was requested.
    #[error("unsupported AES key size: {0} bits")]
    AesKeySize(u32),

    /// A hash function identifier wasn't recognized.
    #[error("unsupported hash function: {0:?}")]
    HashFunction(String),

    /// An LZMA dictionary size fell outside `[MinValue, MaxValue]`.
    #[error("unsupported LZMA dictionary size: {0} bytes")]
    LzmaDictionarySize(u32),

    /// The LZMA properties header wasn't 5 bytes, or reported a version
    /// other than LZMA 2.0.
    #[error("unsupported LZMA properties header")]
    LzmaProperties,

    /// DEFLATE or LZMA support wasn't compiled into this build.
    #[error("{0:?} support not enabled in this build")]
    CodecNotEnabled(crate::parse::Compression),

    /// DSA/ECDSA signature creation or verification was requested, but this
    /// crate only implements the crypto for RSA signatures (see
    /// `DESIGN.md`, "signature schemes"). The keyword itself still parses
    /// and round-trips structurally.
    #[error("{0:?} signature crypto is not implemented, only structurally carried")]
    SignatureSchemeNotImplemented(crate::parse::SignatureAlgorithm),
}

/// Path validation and archive-structure errors raised while mutating an
/// archive in create mode. These are argument errors, not fatal to the
/// archive (see FORMATNOTE, section 7).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path failed `is_valid_path`.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// A path identical to an existing entry's path was inserted.
    #[error("path already exists: {0:?}")]
    AlreadyExists(String),

    /// A new directory path would have a file as a strict ancestor.
    #[error("path covered by file: {0:?}")]
    PathCoveredByFile(String),

    /// A new directory path would have a non-empty subtree under it.
    #[error("non-empty directory: {0:?}")]
    NonEmptyDirectory(String),
}

/// Errors surfaced directly by cryptographic primitives.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    /// RSA-OAEP unwrap failed (wrong private key, or corrupted blob).
    #[error("RSA unwrap failed")]
    RsaUnwrap,

    /// RSA-OAEP wrap failed.
    #[error("RSA wrap failed")]
    RsaWrap,

    /// A requested hash algorithm doesn't match the digest size recorded in
    /// the container.
    #[error("hash algorithm / tag length mismatch for {0:?}")]
    HashLengthMismatch(HashAlgorithm),

    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureMismatch,

    /// No key material (password, direct key, or RSA private key) was
    /// supplied before `decrypt()` was called.
    #[error("no key material supplied")]
    NoKeyMaterial,
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e => std::io::Error::other(e),
        }
    }
}
