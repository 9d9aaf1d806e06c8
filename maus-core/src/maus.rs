//! MAUS codec: single-entry container orchestration (FORMATNOTE, section 4.5),
//! covering the encrypt/decrypt pipeline, the compression pipeline, and the
//! read/write state machine sitting on top of the wire-format parsers in
//! `crate::parse`.

use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use tracing::{debug, trace};

use crate::buffer::BufferStream;
use crate::compress::{self, CompressionConfig};
use crate::crypto;
use crate::error::{CryptoError, Error, FormatError};
use crate::parse::{AesKeySize, HashAlgorithm, LengthOrCycles, MausHeader, Options, SignatureAlgorithm};

/// Key material a caller may supply to decrypt (or encrypt) a MAUS stream.
///
/// FORMATNOTE Design Note 9(c): when both an RSA-wrapped key and a password are
/// available, the password takes priority; that ordering is implemented in
/// [`resolve_key`].
#[derive(Default)]
pub struct KeyMaterial {
    /// Set via `set_password`.
    pub password: Option<Zeroizing<Vec<u8>>>,
    /// Set via `set_key`.
    pub direct_key: Option<Zeroizing<Vec<u8>>>,
    /// Set via `set_rsa_key` (decrypt side).
    pub rsa_private_key: Option<Box<RsaPrivateKey>>,
    /// Set via `set_rsa_key` (encrypt side): wraps the randomly generated
    /// content key so the recipient can unwrap it with their private key.
    pub rsa_public_key: Option<Box<RsaPublicKey>>,
}

impl KeyMaterial {
    /// No key material at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether any key source has been supplied.
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.direct_key.is_none() && self.rsa_private_key.is_none()
    }
}

/// A fully decoded MAUS stream: header, effective (merged) options, and
/// decompressed plaintext.
#[derive(Debug, Clone)]
pub struct DecodedMaus {
    /// The parsed header, as read off the wire.
    pub header: MausHeader,
    /// Outer options merged with inner (post-decryption) options, per
    /// FORMATNOTE, section 3: inner shadows outer for any field it sets.
    pub options: Options,
    /// The fully decompressed plaintext payload.
    pub plaintext: Vec<u8>,
}

/// The header of a MAUS stream plus the byte range of its payload within
/// the buffer it was parsed from. Parsing this far requires no key
/// material at all: `compressed_length` is always in the clear, which is
/// what lets a MAUZ archive walk its `All-Entries` block without
/// decrypting anything (FORMATNOTE, section 4.6 step 4).
#[derive(Debug, Clone)]
pub struct MausSpan {
    /// The parsed header.
    pub header: MausHeader,
    /// Offset of the payload region's first byte, relative to the slice
    /// [`parse_header`] was called with.
    pub payload_start: usize,
    /// Offset one past the payload region's last byte (i.e. the total
    /// number of bytes this MAUS stream occupies).
    pub payload_end: usize,
}

/// Parses just the header of a MAUS stream and computes its payload span,
/// without attempting decryption or decompression (FORMATNOTE, section 4.5 steps 1-4).
pub fn parse_header(input: &[u8], skip_magic: bool) -> Result<MausSpan, Error> {
    use winnow::{Parser, Partial};

    let mut cursor = Partial::new(input);
    let header = MausHeader::parser(skip_magic)(&mut cursor).map_err(|e| parse_to_error(e, input))?;
    let payload_start = consumed_len(input, &cursor);
    let payload_len = header.compressed_length as usize;
    let payload_end = payload_start
        .checked_add(payload_len)
        .ok_or(Error::Truncated { needed: payload_len })?;
    if payload_end > input.len() {
        return Err(Error::Truncated {
            needed: payload_end - input.len(),
        });
    }

    Ok(MausSpan {
        header,
        payload_start,
        payload_end,
    })
}

/// Decrypts (if needed), authenticates, and decompresses the payload region
/// of an already-parsed header (FORMATNOTE, section 4.5 steps 5-8).
pub fn decode_payload(
    header: &MausHeader,
    payload_region: &[u8],
    keys: &KeyMaterial,
) -> Result<(Options, Vec<u8>), Error> {
    let encrypted = header.outer_options.encryption.is_some();
    trace!(encrypted, version = header.version, "maus: decoding payload");
    if encrypted {
        decrypt_and_decompress(header, payload_region, keys)
    } else {
        let hash_alg = header.outer_options.hash.unwrap_or_default();
        let digest = crypto::hash(hash_alg, payload_region);
        if digest != header.tag {
            trace!(?hash_alg, "maus: checksum mismatch on unencrypted payload");
            return Err(Error::ChecksumMismatch);
        }
        let plaintext = compress::decompress(header.outer_options.compression, payload_region)?;
        Ok((header.outer_options.clone(), plaintext))
    }
}

/// Parses a MAUS header from the front of `input`, then reads and
/// decodes its payload region in one shot (FORMATNOTE, section 4.5 steps 1-8).
///
/// `skip_magic` is set when the caller (the MAUZ codec) already consumed
/// the 4-byte magic. Returns the decoded stream and the number of bytes of
/// `input` consumed.
pub fn read(input: &[u8], skip_magic: bool, keys: &KeyMaterial) -> Result<(DecodedMaus, usize), Error> {
    let span = parse_header(input, skip_magic)?;
    let payload_region = &input[span.payload_start..span.payload_end];
    let (options, plaintext) = decode_payload(&span.header, payload_region, keys)?;

    Ok((
        DecodedMaus {
            header: span.header,
            options,
            plaintext,
        },
        span.payload_end,
    ))
}

fn decrypt_and_decompress(
    header: &MausHeader,
    payload_region: &[u8],
    keys: &KeyMaterial,
) -> Result<(Options, Vec<u8>), Error> {
    let key_size = header
        .outer_options
        .encryption
        .expect("caller only calls this for encrypted headers");
    let key_len = key_size.key_len();

    if payload_region.len() < key_len + crypto::AES_BLOCK_SIZE {
        return Err(Error::Truncated {
            needed: key_len + crypto::AES_BLOCK_SIZE - payload_region.len(),
        });
    }
    let (salt_dup, rest) = payload_region.split_at(key_len);
    let (iv_dup, ciphertext) = rest.split_at(crypto::AES_BLOCK_SIZE);

    if let Some(header_salt) = &header.salt {
        if header_salt.as_slice() != salt_dup {
            return Err(FormatError::DuplicatedFieldMismatch { field: "salt" }.into());
        }
    }
    if let Some(header_iv) = &header.iv {
        if header_iv.as_slice() != iv_dup {
            return Err(FormatError::DuplicatedFieldMismatch { field: "iv" }.into());
        }
    }

    let content_key = resolve_key(header, keys)?;

    let plaintext = crypto::aes_cbc_decrypt(key_size, &content_key, iv_dup, ciphertext)?;

    let hash_alg = header.outer_options.hash.unwrap_or_default();
    let tag = crypto::hmac(hash_alg, &content_key, &plaintext);
    if !crypto::tags_match(&tag, &header.tag) {
        debug!(key_bits = key_size.bits(), "maus: HMAC mismatch, rejecting key");
        return Err(Error::BadKey);
    }
    debug!(key_bits = key_size.bits(), "maus: key accepted, HMAC verified");

    let mut cursor = winnow::Partial::new(plaintext.as_slice());
    let inner_options =
        Options::parser(&mut cursor).map_err(|_| Error::Format(FormatError::TrailingDataMismatch))?;
    let consumed = consumed_len(&plaintext, &cursor);
    let compressed_payload = &plaintext[consumed..];

    let merged = header.outer_options.merge_inner(&inner_options);
    let decompressed = compress::decompress(merged.compression, compressed_payload)?;

    Ok((merged, decompressed))
}

/// Resolves the AES content key for an encrypted header, preferring
/// password, then direct key, then RSA-wrapped key (FORMATNOTE Design Note 9(c)).
fn resolve_key(header: &MausHeader, keys: &KeyMaterial) -> Result<Zeroizing<Vec<u8>>, Error> {
    let key_size = header.outer_options.encryption.unwrap();

    if let Some(password) = &keys.password {
        let salt = header.salt.as_deref().unwrap_or(&[]);
        let cycles = header
            .length_or_cycles
            .pbkdf2_cycles()
            .unwrap_or(crypto::PBKDF2_BASE_CYCLES);
        return Ok(crypto::derive_key(password, salt, cycles, key_size.key_len()));
    }
    if let Some(key) = &keys.direct_key {
        return Ok(key.clone());
    }
    if let Some(private_key) = &keys.rsa_private_key {
        if let Some(wrapped) = &header.outer_options.rsa_wrapped_key {
            return crypto::rsa_oaep_unwrap(private_key, wrapped);
        }
    }
    Err(CryptoError::NoKeyMaterial.into())
}

/// Write-time parameters for a MAUS stream: compression, optional
/// encryption, hash function, and the typed option fields (FORMATNOTE, section 4.5
/// "Write path").
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Outer-visible metadata fields (filename, timestamps, comment, ...).
    /// `compression`/`encryption` on this struct are overwritten from
    /// `compression_config`/`encryption` before encoding.
    pub metadata: Options,
    /// Which tags should be moved into the encrypted inner options block,
    /// rather than left in the (unencrypted, always-readable) outer block.
    pub encrypted_tags: crate::parse::OptionTags,
    /// Hash function for the integrity tag / HMAC.
    pub hash: HashAlgorithm,
}

/// Encodes `plaintext` as a complete MAUS stream (header + payload),
/// optionally encrypting it under `key_size` using `keys` (FORMATNOTE, section 4.5
/// "Write path").
pub fn write(
    plaintext: &[u8],
    compression: CompressionConfig,
    encryption: Option<AesKeySize>,
    write_opts: &WriteOptions,
    keys: &KeyMaterial,
    include_magic: bool,
) -> Result<Vec<u8>, Error> {
    let compressed = compress::compress(compression, plaintext)?;

    let mut outer_options = write_opts.metadata.clone();
    outer_options.hash = Some(write_opts.hash);

    let (compressed_length, length_or_cycles, tag, salt, iv, body) = match encryption {
        None => {
            outer_options.compression = compression.tag();
            outer_options.encryption = None;
            let tag = crypto::hash(write_opts.hash, &compressed);
            (
                compressed.len() as i64,
                LengthOrCycles::UncompressedLength(plaintext.len() as i64),
                tag,
                None,
                None,
                compressed,
            )
        }
        Some(key_size) => {
            let mut salt = vec![0u8; key_size.key_len()];
            crypto::random_bytes(&mut salt);
            let mut iv = vec![0u8; crypto::AES_BLOCK_SIZE];
            crypto::random_bytes(&mut iv);

            let (content_key, cycles_field, rsa_wrapped_key) =
                derive_write_key(key_size, &salt, keys)?;

            let mut inner_options = Options::default();
            let tags = write_opts.encrypted_tags;
            if tags.contains(crate::parse::OptionTag::Compression) {
                inner_options.compression = compression.tag();
            } else {
                outer_options.compression = compression.tag();
            }
            move_tagged_options(&mut outer_options, &mut inner_options, tags);

            let mut plaintext_region = BufferStream::new();
            let mut inner_opts_bytes = Vec::new();
            inner_options.encode(&mut inner_opts_bytes);
            plaintext_region.append(&inner_opts_bytes);
            let mut body_buf = BufferStream::new();
            body_buf.append(&compressed);
            body_buf.prepend(plaintext_region);
            let framed_plaintext = body_buf.to_vec();

            let tag = crypto::hmac(write_opts.hash, &content_key, &framed_plaintext);
            let ciphertext = crypto::aes_cbc_encrypt(key_size, &content_key, &iv, &framed_plaintext);

            outer_options.encryption = Some(key_size);
            outer_options.rsa_wrapped_key = rsa_wrapped_key;

            let mut region = Vec::with_capacity(salt.len() + iv.len() + ciphertext.len());
            region.extend_from_slice(&salt);
            region.extend_from_slice(&iv);
            region.extend_from_slice(&ciphertext);

            (
                region.len() as i64,
                LengthOrCycles::Pbkdf2CyclesField(cycles_field),
                tag,
                Some(salt),
                Some(iv),
                region,
            )
        }
    };

    let header = MausHeader {
        version: crate::parse::MAUS_CURRENT_VERSION,
        outer_options,
        compressed_length,
        length_or_cycles,
        tag,
        salt,
        iv,
    };

    let mut out = Vec::new();
    header.encode(include_magic, &mut out);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Moves every option field whose [`OptionTag`](crate::parse::OptionTag) is
/// set in `tags` from `outer` into `inner`, leaving everything else in
/// `outer` (FORMATNOTE, section 4.5 step 2: "options flagged as encrypted appear only in
/// the inner ... options block").
///
/// `compression` is handled by the caller before this runs (it isn't a
/// plain `Option` field on [`Options`]); `encryption`, `hash`, and the
/// `RSAk`-wrapped content key are never moved: a reader needs all three in
/// the clear to know the payload's key size, tag length, and (for RSA-wrapped
/// keys) the key to unwrap before it can even attempt decryption. `write`
/// overwrites `outer.rsa_wrapped_key` again after this call regardless.
fn move_tagged_options(outer: &mut Options, inner: &mut Options, tags: crate::parse::OptionTags) {
    use crate::parse::OptionTag;

    macro_rules! move_if_tagged {
        ($tag:expr, $field:ident) => {
            if tags.contains($tag) {
                inner.$field = outer.$field.take();
            }
        };
    }
    move_if_tagged!(OptionTag::Filename, filename);
    move_if_tagged!(OptionTag::UncompressedLength, uncompressed_length_override);
    move_if_tagged!(OptionTag::Created, created);
    move_if_tagged!(OptionTag::Modified, modified);
    move_if_tagged!(OptionTag::Comment, comment);
    if tags.contains(OptionTag::Signatures) && !outer.signatures.is_empty() {
        inner.signatures = std::mem::take(&mut outer.signatures);
    }
}

fn derive_write_key(
    key_size: AesKeySize,
    salt: &[u8],
    keys: &KeyMaterial,
) -> Result<(Zeroizing<Vec<u8>>, i64, Option<Vec<u8>>), Error> {
    if let Some(password) = &keys.password {
        let cycles = crypto::PBKDF2_BASE_CYCLES;
        let key = crypto::derive_key(password, salt, cycles, key_size.key_len());
        Ok((key, crypto::field_from_cycles(cycles)?, None))
    } else if let Some(key) = &keys.direct_key {
        Ok((key.clone(), 0, None))
    } else if let Some(public_key) = &keys.rsa_public_key {
        let mut content_key = vec![0u8; key_size.key_len()];
        crypto::random_bytes(&mut content_key);
        let wrapped = crypto::rsa_oaep_wrap(public_key, &content_key)?;
        Ok((Zeroizing::new(content_key), 0, Some(wrapped)))
    } else {
        Err(CryptoError::NoKeyMaterial.into())
    }
}

/// Verifies an RSA signature over the hash of `plaintext` (FORMATNOTE, section 4.5
/// "Signatures": "computed over the decrypted plaintext hash"). An
/// explicit caller action, independent of decryption.
pub fn verify_signature(
    signature: &crate::parse::Signature,
    hash_alg: HashAlgorithm,
    plaintext: &[u8],
    public_key: &RsaPublicKey,
) -> Result<(), Error> {
    if signature.algorithm != SignatureAlgorithm::Rsa {
        return Err(crate::error::UnsupportedError::SignatureSchemeNotImplemented(signature.algorithm).into());
    }
    let digest = crypto::hash(hash_alg, plaintext);
    let scheme = rsa_signature_scheme(hash_alg);
    public_key
        .verify(scheme, &digest, &signature.blob)
        .map_err(|_| CryptoError::SignatureMismatch.into())
}

fn rsa_signature_scheme(hash_alg: HashAlgorithm) -> rsa::pkcs1v15::Pkcs1v15Sign {
    use rsa::pkcs1v15::Pkcs1v15Sign;
    match hash_alg {
        HashAlgorithm::Sha256 | HashAlgorithm::Sha3_256 | HashAlgorithm::Whirlpool => {
            Pkcs1v15Sign::new::<sha2::Sha256>()
        }
        HashAlgorithm::Sha384 | HashAlgorithm::Sha3_384 => Pkcs1v15Sign::new::<sha2::Sha384>(),
        HashAlgorithm::Sha512 | HashAlgorithm::Sha3_512 => Pkcs1v15Sign::new::<sha2::Sha512>(),
    }
}

fn consumed_len(original: &[u8], cursor: &winnow::Partial<&[u8]>) -> usize {
    use winnow::stream::{AsBytes, Offset};
    cursor.as_bytes().offset_from(&original)
}

fn parse_to_error(e: winnow::error::ErrMode<winnow::error::ContextError>, _input: &[u8]) -> Error {
    crate::error::from_context(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Compression as WireCompression;

    fn write_opts(hash: HashAlgorithm) -> WriteOptions {
        WriteOptions {
            metadata: Options::default(),
            encrypted_tags: crate::parse::OptionTags::empty(),
            hash,
        }
    }

    #[test]
    fn roundtrip_unencrypted_deflate() {
        let plaintext = b"Hello, world!\n";
        let bytes = write(
            plaintext,
            CompressionConfig::Deflate { level: 6 },
            None,
            &write_opts(HashAlgorithm::Sha256),
            &KeyMaterial::none(),
            true,
        )
        .unwrap();
        let (decoded, consumed) = read(&bytes, false, &KeyMaterial::none()).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.plaintext, plaintext);
        assert_eq!(decoded.options.compression, WireCompression::Deflate);
    }

    #[test]
    fn roundtrip_password_encrypted() {
        let plaintext = vec![0u8; 1024];
        let keys = KeyMaterial {
            password: Some(Zeroizing::new(b"correct horse".to_vec())),
            ..KeyMaterial::none()
        };
        let bytes = write(
            &plaintext,
            CompressionConfig::None,
            Some(AesKeySize::Bits256),
            &write_opts(HashAlgorithm::Sha256),
            &keys,
            true,
        )
        .unwrap();

        let wrong_keys = KeyMaterial {
            password: Some(Zeroizing::new(b"battery staple".to_vec())),
            ..KeyMaterial::none()
        };
        assert!(matches!(read(&bytes, false, &wrong_keys), Err(Error::BadKey)));

        let (decoded, _) = read(&bytes, false, &keys).unwrap();
        assert_eq!(decoded.plaintext, plaintext);
    }

    #[test]
    fn roundtrip_rsa_wrapped_key() {
        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = rsa::RsaPublicKey::from(&private_key);

        let plaintext = b"wrapped under a recipient's public key".to_vec();
        let write_keys = KeyMaterial {
            rsa_public_key: Some(Box::new(public_key)),
            ..KeyMaterial::none()
        };
        let bytes = write(
            &plaintext,
            CompressionConfig::None,
            Some(AesKeySize::Bits256),
            &write_opts(HashAlgorithm::Sha256),
            &write_keys,
            true,
        )
        .unwrap();

        let read_keys = KeyMaterial {
            rsa_private_key: Some(Box::new(private_key)),
            ..KeyMaterial::none()
        };
        let (decoded, _) = read(&bytes, false, &read_keys).unwrap();
        assert_eq!(decoded.plaintext, plaintext);
    }

    #[test]
    fn rsa_signature_roundtrip() {
        let mut rng = rand::thread_rng();
        let private_key = rsa::RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = rsa::RsaPublicKey::from(&private_key);

        let plaintext = b"signed payload".to_vec();
        let digest = crypto::hash(HashAlgorithm::Sha256, &plaintext);
        let scheme = rsa_signature_scheme(HashAlgorithm::Sha256);
        let blob = private_key.sign(scheme, &digest).unwrap();

        let signature = crate::parse::Signature {
            algorithm: SignatureAlgorithm::Rsa,
            signer_id: None,
            blob,
        };
        verify_signature(&signature, HashAlgorithm::Sha256, &plaintext, &public_key).unwrap();

        let tampered = crate::parse::Signature {
            blob: vec![0u8; signature.blob.len()],
            ..signature
        };
        assert!(matches!(
            verify_signature(&tampered, HashAlgorithm::Sha256, &plaintext, &public_key),
            Err(Error::Crypto(CryptoError::SignatureMismatch))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_with_correct_key() {
        let plaintext = b"some secret payload".to_vec();
        let keys = KeyMaterial {
            password: Some(Zeroizing::new(b"hunter2".to_vec())),
            ..KeyMaterial::none()
        };
        let mut bytes = write(
            &plaintext,
            CompressionConfig::None,
            Some(AesKeySize::Bits128),
            &write_opts(HashAlgorithm::Sha256),
            &keys,
            true,
        )
        .unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(read(&bytes, false, &keys), Err(Error::BadKey)));
    }

    #[test]
    fn encrypted_filename_is_absent_from_outer_options() {
        let keys = KeyMaterial {
            password: Some(Zeroizing::new(b"correct horse".to_vec())),
            ..KeyMaterial::none()
        };
        let mut opts = write_opts(HashAlgorithm::Sha256);
        opts.metadata.filename = Some("secret-report.pdf".to_string());
        opts.encrypted_tags.insert(crate::parse::OptionTag::Filename);

        let bytes = write(
            b"top secret contents",
            CompressionConfig::None,
            Some(AesKeySize::Bits256),
            &opts,
            &keys,
            true,
        )
        .unwrap();

        let span = parse_header(&bytes, false).unwrap();
        assert!(
            span.header.outer_options.filename.is_none(),
            "filename leaked into the unencrypted outer options block"
        );

        let (decoded, _) = read(&bytes, false, &keys).unwrap();
        assert_eq!(decoded.options.filename.as_deref(), Some("secret-report.pdf"));
        assert_eq!(decoded.plaintext, b"top secret contents");
    }
}
