//! The manifest: a signed table of `(path, per-entry hash)` pairs used for
//! whole-archive integrity checking, stored as the payload of a reserved
//! `/Manifest.dat` entry (FORMATNOTE, section 3, Design Note 9 "Manifest signing").
//!
//! Building one is a two-pass affair: first every other entry's plaintext
//! hash is collected, then the table is serialized. This mirrors the
//! two-pass nature of a zip central directory (collect local headers, then
//! write the directory), just applied to content hashes instead of offsets.

use winnow::{binary::le_u16, PResult, Parser, Partial};

use crate::error::{Error, FormatError};
use crate::parse::options::HashAlgorithm;
use crate::parse::raw::MausBytes;

/// Reserved path for the manifest entry. Never a legal argument to
/// `add_file`/`add_empty_directory` from the ordinary path arbiter, since
/// user-supplied entries are checked for collisions against it separately.
pub const MANIFEST_PATH: &str = "/Manifest.dat";

/// One row of the manifest: a path and the hash of that entry's plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// Path of the entry this record covers.
    pub path: String,
    /// Hash function used to produce `digest`.
    pub algorithm: HashAlgorithm,
    /// Digest of the entry's plaintext payload.
    pub digest: Vec<u8>,
}

/// The decoded contents of a `/Manifest.dat` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// One record per covered entry, in the order they were added.
    pub records: Vec<ManifestRecord>,
}

impl Manifest {
    /// Starts an empty manifest; call [`Self::push`] once per non-manifest
    /// entry as it's finalized, then [`Self::encode`] just before archive
    /// close (Design Note 9).
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the hash of one entry's plaintext.
    pub fn push(&mut self, path: impl Into<String>, algorithm: HashAlgorithm, plaintext: &[u8]) {
        let digest = crate::crypto::hash(algorithm, plaintext);
        self.records.push(ManifestRecord {
            path: path.into(),
            algorithm,
            digest,
        });
    }

    /// Encodes the manifest table to its on-wire byte form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.records.len() as u16).to_le_bytes());
        for record in &self.records {
            MausBytes::encode_u16(record.path.as_bytes(), &mut out);
            let alg_id = hash_algorithm_id(record.algorithm);
            out.push(alg_id);
            out.push(record.digest.len() as u8);
            out.extend_from_slice(&record.digest);
        }
        out
    }

    /// Parses a manifest payload back into its records.
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let mut input = Partial::new(bytes);
        Self::parser(&mut input).map_err(|_| FormatError::TrailingDataMismatch.into())
    }

    fn parser(i: &mut Partial<&[u8]>) -> PResult<Self> {
        let count = le_u16.parse_next(i)?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let path = MausBytes::parser_u16(i)?;
            let path = path.as_utf8()?.to_string();
            let alg_id = winnow::binary::le_u8.parse_next(i)?;
            let algorithm = hash_algorithm_from_id(alg_id).map_err(winnow_error)?;
            let digest_len = winnow::binary::le_u8.parse_next(i)?;
            let digest = winnow::token::take(digest_len as usize)
                .map(|s: &[u8]| s.to_vec())
                .parse_next(i)?;
            records.push(ManifestRecord {
                path,
                algorithm,
                digest,
            });
        }
        Ok(Manifest { records })
    }

    /// Verifies that `plaintext` matches the recorded hash for `path`.
    pub fn verify(&self, path: &str, plaintext: &[u8]) -> bool {
        self.records
            .iter()
            .find(|r| r.path == path)
            .map(|r| crate::crypto::hash(r.algorithm, plaintext) == r.digest)
            .unwrap_or(false)
    }
}

fn hash_algorithm_id(alg: HashAlgorithm) -> u8 {
    match alg {
        HashAlgorithm::Sha256 => 0,
        HashAlgorithm::Sha384 => 1,
        HashAlgorithm::Sha512 => 2,
        HashAlgorithm::Sha3_256 => 3,
        HashAlgorithm::Sha3_384 => 4,
        HashAlgorithm::Sha3_512 => 5,
        HashAlgorithm::Whirlpool => 6,
    }
}

fn hash_algorithm_from_id(id: u8) -> Result<HashAlgorithm, Error> {
    match id {
        0 => Ok(HashAlgorithm::Sha256),
        1 => Ok(HashAlgorithm::Sha384),
        2 => Ok(HashAlgorithm::Sha512),
        3 => Ok(HashAlgorithm::Sha3_256),
        4 => Ok(HashAlgorithm::Sha3_384),
        5 => Ok(HashAlgorithm::Sha3_512),
        6 => Ok(HashAlgorithm::Whirlpool),
        other => Err(FormatError::InvalidLength {
            field: "manifest hash algorithm id",
            value: other as i64,
        }
        .into()),
    }
}

fn winnow_error(e: Error) -> winnow::error::ErrMode<winnow::error::ContextError> {
    use winnow::error::FromExternalError;
    winnow::error::ErrMode::from_external_error(&Partial::new(&b""[..]), winnow::error::ErrorKind::Verify, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_manifest() {
        let mut manifest = Manifest::new();
        manifest.push("a.txt", HashAlgorithm::Sha256, b"hello");
        manifest.push("dir/b.txt", HashAlgorithm::Sha512, b"world");
        let encoded = manifest.encode();
        let back = Manifest::parse(&encoded).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn verify_detects_tamper() {
        let mut manifest = Manifest::new();
        manifest.push("a.txt", HashAlgorithm::Sha256, b"hello");
        assert!(manifest.verify("a.txt", b"hello"));
        assert!(!manifest.verify("a.txt", b"tampered"));
    }
}
