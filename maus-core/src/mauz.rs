//! MAUZ codec: multi-entry archive orchestration (FORMATNOTE, section 4.6),
//! framing many MAUS streams plus the entries/offsets tables, archive-level
//! encryption, and entry classification.

use tracing::trace;
use winnow::{binary::le_i64, Parser, Partial};

use crate::buffer::BufferStream;
use crate::crypto;
use crate::error::{Error, FormatError};
use crate::maus::{self, KeyMaterial};
use crate::parse::{self, markers, AesKeySize, HashAlgorithm, MausBytes, MauzHeader, Options};
use crate::path::is_directory_path;

/// How a loaded entry was classified (FORMATNOTE, section 3 "Entry", section 4.6 "Entry
/// classification during load").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClassification {
    /// A regular file.
    File,
    /// A directory with no contents of its own (path ends in `/`).
    EmptyDirectory,
    /// An encrypted entry (`//V<i>` filename) whose true classification
    /// can't be determined until it's decrypted.
    Unknown,
}

/// One loaded archive entry: its path (as recorded in the entries/offsets
/// blocks), its classification, its absolute offset, and its raw MAUS
/// bytes (kept around for on-demand decoding, per FORMATNOTE, section 3
/// "Control flow": "lazily loads and ... decrypts payload on demand").
#[derive(Debug, Clone)]
pub struct MauzEntry {
    /// Dense identifier, unique within `[0, entry_count)`.
    pub index: i64,
    /// Path as recorded in the entries/offsets blocks (may be the
    /// `//V<i>` placeholder for an encrypted filename).
    pub path: String,
    /// Absolute offset (relative to the start of the archive body, see
    /// `DESIGN.md` "offset coordinate space") at which this entry's MAUS
    /// bytes begin.
    pub offset: i64,
    /// How this entry was classified at load time.
    pub classification: EntryClassification,
    /// The complete bytes of this entry's nested MAUS stream (header +
    /// payload), owned so the entry can be decoded independently, any
    /// number of times, with different key material.
    pub maus_bytes: Vec<u8>,
}

impl MauzEntry {
    /// Decodes this entry's MAUS stream, decrypting/decompressing its
    /// payload with the given key material.
    pub fn decode(&self, keys: &KeyMaterial) -> Result<maus::DecodedMaus, Error> {
        maus::read(&self.maus_bytes, false, keys).map(|(decoded, _)| decoded)
    }
}

/// A fully loaded MAUZ archive: header plus every entry's span and raw
/// bytes (not yet decoded; decoding is per-entry and on demand).
#[derive(Debug, Clone)]
pub struct LoadedMauz {
    /// Format version.
    pub version: u16,
    /// Effective (merged, if encrypted) options for the archive as a
    /// whole.
    pub options: Options,
    /// Every entry, in the order the `All-Entries` block presented them
    /// (FORMATNOTE, section 5 "Ordering guarantees").
    pub entries: Vec<MauzEntry>,
}

/// Reads a complete MAUZ (or bare single-MAUS) archive from `input`.
pub fn read(input: &[u8], keys: &KeyMaterial) -> Result<LoadedMauz, Error> {
    if input.len() >= 4 && u32::from_le_bytes(input[0..4].try_into().unwrap()) == parse::MAUS_MAGIC {
        return read_bare_maus(input, keys);
    }

    let mut cursor = Partial::new(input);
    let header = MauzHeader::parser(&mut cursor).map_err(crate::error::from_context)?;
    let header_len = consumed_len(input, &cursor);

    let hash_alg = header
        .outer_options
        .hash
        .unwrap_or_else(HashAlgorithm::mauz_default);

    let encrypted = header.outer_options.encryption.is_some();
    let total_size = header.total_size as usize;
    if total_size > input.len() {
        return Err(Error::Truncated {
            needed: total_size - input.len(),
        });
    }
    let (options, body) = if encrypted {
        let key_size = header.outer_options.encryption.unwrap();
        let ciphertext = &input[header_len..total_size];
        let content_key = resolve_archive_key(&header, keys)?;
        let iv = header.iv.as_deref().unwrap_or(&[]);
        let plaintext = crypto::aes_cbc_decrypt(key_size, &content_key, iv, ciphertext)?;

        let tag = crypto::hmac(hash_alg, &content_key, &plaintext);
        if !crypto::tags_match(&tag, header.tag.as_deref().unwrap_or(&[])) {
            return Err(Error::BadKey);
        }

        let mut inner_cursor = Partial::new(plaintext.as_slice());
        let inner_options = Options::parser(&mut inner_cursor).map_err(crate::error::from_context)?;
        let consumed = consumed_len(&plaintext, &inner_cursor);
        let merged = header.outer_options.merge_inner(&inner_options);
        (merged, plaintext[consumed..].to_vec())
    } else {
        (
            header.outer_options.clone(),
            input[header_len..total_size].to_vec(),
        )
    };

    let entries = parse_body(&body)?;
    trace!(version = header.version, entry_count = entries.len(), "mauz: archive loaded");

    Ok(LoadedMauz {
        version: header.version,
        options,
        entries,
    })
}

fn read_bare_maus(input: &[u8], _keys: &KeyMaterial) -> Result<LoadedMauz, Error> {
    let span = maus::parse_header(input, false)?;
    let path = span
        .header
        .outer_options
        .filename
        .clone()
        .unwrap_or_default();
    let entry = MauzEntry {
        index: 0,
        path,
        offset: 0,
        classification: EntryClassification::File,
        maus_bytes: input[..span.payload_end].to_vec(),
    };
    Ok(LoadedMauz {
        version: span.header.version,
        options: span.header.outer_options.clone(),
        entries: vec![entry],
    })
}

fn resolve_archive_key(
    header: &MauzHeader,
    keys: &KeyMaterial,
) -> Result<zeroize::Zeroizing<Vec<u8>>, Error> {
    let key_size = header.outer_options.encryption.unwrap();
    if let Some(password) = &keys.password {
        let salt = header.salt.as_deref().unwrap_or(&[]);
        let cycles = header
            .pbkdf2_cycles_field
            .map(crypto::cycles_from_field)
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
    Err(crate::error::CryptoError::NoKeyMaterial.into())
}

/// Parses the plaintext body: `entry_count`, `All-Entries` block, then
/// `All-Offsets` block, then `meta_offset` (FORMATNOTE, section 4.6 step 4).
///
/// Offsets and `meta_offset` are measured relative to the start of `body`
/// itself (see `DESIGN.md`, "offset coordinate space").
fn parse_body(body: &[u8]) -> Result<Vec<MauzEntry>, Error> {
    let mut cursor = Partial::new(body);

    let count = le_i64.parse_next(&mut cursor).map_err(crate::error::from_context)?;
    if count < 0 {
        return Err(FormatError::InvalidLength {
            field: "entry_count",
            value: count,
        }
        .into());
    }
    let count = count as usize;

    markers::expect_marker(markers::ALL_ENTRIES)(&mut cursor).map_err(crate::error::from_context)?;

    struct RawEntry {
        index: i64,
        path: String,
        offset: i64,
        maus_bytes: Vec<u8>,
    }

    let mut seen_indices = std::collections::HashSet::new();
    let mut raw_entries = Vec::with_capacity(count);
    for _ in 0..count {
        markers::expect_marker(markers::CUR_ENTRY)(&mut cursor).map_err(crate::error::from_context)?;
        let index = le_i64.parse_next(&mut cursor).map_err(crate::error::from_context)?;
        if !seen_indices.insert(index) {
            return Err(FormatError::DuplicateEntryIndex { index }.into());
        }
        let path = MausBytes::parser_u8(&mut cursor)
            .map_err(crate::error::from_context)?
            .as_utf8()
            .map_err(crate::error::from_context)?
            .to_string();

        let offset = consumed_len(body, &cursor);
        trace!(index, %path, offset, "mauz: parsed entry record");
        let span = maus::parse_header(&body[offset..], false)?;
        let maus_bytes = body[offset..offset + span.payload_end].to_vec();
        let _taken: &[u8] = winnow::token::take(span.payload_end)
            .parse_next(&mut cursor)
            .map_err(crate::error::from_context)?;

        raw_entries.push(RawEntry {
            index,
            path,
            offset: offset as i64,
            maus_bytes,
        });
    }

    let all_offsets_position = consumed_len(body, &cursor);
    markers::expect_marker(markers::ALL_OFFSETS)(&mut cursor).map_err(crate::error::from_context)?;

    for expected in &raw_entries {
        markers::expect_marker(markers::CUR_OFFSET)(&mut cursor).map_err(crate::error::from_context)?;
        let index = le_i64.parse_next(&mut cursor).map_err(crate::error::from_context)?;
        let path = MausBytes::parser_u8(&mut cursor)
            .map_err(crate::error::from_context)?
            .as_utf8()
            .map_err(crate::error::from_context)?
            .to_string();
        let offset = le_i64.parse_next(&mut cursor).map_err(crate::error::from_context)?;

        if path != expected.path {
            return Err(FormatError::OffsetsPathMismatch { index }.into());
        }
        if offset != expected.offset {
            return Err(FormatError::OffsetMismatch {
                index,
                recorded: offset,
                actual: expected.offset,
            }
            .into());
        }
        let _ = index;
    }

    let meta_offset = le_i64.parse_next(&mut cursor).map_err(crate::error::from_context)?;
    if meta_offset != all_offsets_position as i64 {
        return Err(FormatError::MetaOffsetMismatch {
            recorded: meta_offset,
            actual: all_offsets_position as i64,
        }
        .into());
    }

    if consumed_len(body, &cursor) != body.len() {
        return Err(FormatError::TrailingDataMismatch.into());
    }

    Ok(raw_entries
        .into_iter()
        .map(|raw| {
            let classification = classify(&raw.path, &raw.maus_bytes);
            MauzEntry {
                index: raw.index,
                path: raw.path,
                offset: raw.offset,
                classification,
                maus_bytes: raw.maus_bytes,
            }
        })
        .collect())
}

fn classify(path: &str, maus_bytes: &[u8]) -> EntryClassification {
    if is_directory_path(path) {
        return EntryClassification::EmptyDirectory;
    }
    if path.starts_with("//V") {
        let compressed_length = maus::parse_header(maus_bytes, false)
            .map(|span| span.payload_end - span.payload_start)
            .unwrap_or(usize::MAX);
        if compressed_length <= crate::path::empty_directory_payload_bound() {
            return EntryClassification::Unknown;
        }
        return EntryClassification::File;
    }
    EntryClassification::File
}

fn consumed_len(original: &[u8], cursor: &Partial<&[u8]>) -> usize {
    use winnow::stream::{AsBytes, Offset};
    cursor.as_bytes().offset_from(&original)
}

/// Write-time description of one entry about to be serialized into a MAUZ
/// archive (FORMATNOTE, section 4.6 "Write path").
pub struct EntryToWrite<'a> {
    /// Path to record in the entries/offsets blocks.
    pub path: &'a str,
    /// Complete, already-serialized MAUS bytes for this entry (see
    /// `crate::maus::write`).
    pub maus_bytes: Vec<u8>,
}

/// Serializes a complete MAUZ archive body (everything after the header:
/// `entry_count`, `All-Entries`, `All-Offsets`, `meta_offset`) given
/// already-framed entries (FORMATNOTE, section 4.6 "Write path").
pub fn encode_body(entries: &[EntryToWrite<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(entries.len() as i64).to_le_bytes());
    markers::encode_marker(markers::ALL_ENTRIES, &mut body);

    let mut offsets = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        markers::encode_marker(markers::CUR_ENTRY, &mut body);
        body.extend_from_slice(&(index as i64).to_le_bytes());
        MausBytes::encode_u8(entry.path.as_bytes(), &mut body);
        let offset = body.len() as i64;
        body.extend_from_slice(&entry.maus_bytes);
        offsets.push(offset);
    }

    let all_offsets_position = body.len() as i64;
    markers::encode_marker(markers::ALL_OFFSETS, &mut body);
    for (index, entry) in entries.iter().enumerate() {
        markers::encode_marker(markers::CUR_OFFSET, &mut body);
        body.extend_from_slice(&(index as i64).to_le_bytes());
        MausBytes::encode_u8(entry.path.as_bytes(), &mut body);
        body.extend_from_slice(&offsets[index].to_le_bytes());
    }

    body.extend_from_slice(&all_offsets_position.to_le_bytes());
    body
}

/// Serializes a complete MAUZ archive, optionally encrypting the body
/// (FORMATNOTE, section 4.6 "Write path").
pub fn write(
    entries: &[EntryToWrite<'_>],
    mut outer_options: Options,
    encryption: Option<AesKeySize>,
    hash_alg: HashAlgorithm,
    keys: &KeyMaterial,
) -> Result<Vec<u8>, Error> {
    let body = encode_body(entries);
    outer_options.hash = Some(hash_alg);

    let (pbkdf2_cycles_field, tag, salt, iv, stored_body) = match encryption {
        None => {
            outer_options.encryption = None;
            (None, None, None, None, body)
        }
        Some(key_size) => {
            let mut salt = vec![0u8; key_size.key_len()];
            crypto::random_bytes(&mut salt);
            let mut iv = vec![0u8; crypto::AES_BLOCK_SIZE];
            crypto::random_bytes(&mut iv);

            let (content_key, cycles_field) = derive_archive_key(key_size, &salt, keys)?;

            let inner_options = Options::default();
            let mut inner_bytes = Vec::new();
            inner_options.encode(&mut inner_bytes);
            let mut framed = BufferStream::new();
            framed.append(&body);
            let mut prefix = BufferStream::new();
            prefix.append(&inner_bytes);
            framed.prepend(prefix);
            let plaintext = framed.to_vec();

            let tag = crypto::hmac(hash_alg, &content_key, &plaintext);
            let ciphertext = crypto::aes_cbc_encrypt(key_size, &content_key, &iv, &plaintext);

            outer_options.encryption = Some(key_size);
            (Some(cycles_field), Some(tag), Some(salt), Some(iv), ciphertext)
        }
    };

    // `total_size` sits at a fixed offset/width regardless of its own value,
    // so the header's length can be measured by encoding it with a
    // placeholder of the right width first.
    let header_len_guess = {
        let mut out = Vec::new();
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0i64.to_le_bytes());
        outer_options.encode(&mut out);
        if let Some(cycles) = pbkdf2_cycles_field {
            out.extend_from_slice(&cycles.to_le_bytes());
        }
        if let Some(tag) = &tag {
            out.extend_from_slice(tag);
        }
        if let Some(salt) = &salt {
            out.extend_from_slice(salt);
        }
        if let Some(iv) = &iv {
            out.extend_from_slice(iv);
        }
        out.len()
    };

    let total_size = (header_len_guess + stored_body.len()) as i64;

    let header = MauzHeader {
        version: parse::MAUZ_CURRENT_VERSION,
        total_size,
        outer_options,
        pbkdf2_cycles_field,
        tag,
        salt,
        iv,
    };

    let mut out = Vec::new();
    header.encode(&mut out);
    out.extend_from_slice(&stored_body);
    Ok(out)
}

fn derive_archive_key(
    key_size: AesKeySize,
    salt: &[u8],
    keys: &KeyMaterial,
) -> Result<(zeroize::Zeroizing<Vec<u8>>, i64), Error> {
    if let Some(password) = &keys.password {
        let cycles = crypto::PBKDF2_BASE_CYCLES;
        let key = crypto::derive_key(password, salt, cycles, key_size.key_len());
        Ok((key, crypto::field_from_cycles(cycles)?))
    } else if let Some(key) = &keys.direct_key {
        Ok((key.clone(), 0))
    } else {
        Err(crate::error::CryptoError::NoKeyMaterial.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::CompressionConfig;
    use crate::maus::WriteOptions;

    fn maus_bytes_for(path: &str, content: &[u8]) -> Vec<u8> {
        let mut opts = WriteOptions::default();
        opts.metadata.filename = Some(path.to_string());
        opts.hash = HashAlgorithm::Sha256;
        maus::write(
            content,
            CompressionConfig::None,
            None,
            &opts,
            &KeyMaterial::none(),
            true,
        )
        .unwrap()
    }

    #[test]
    fn roundtrip_unencrypted_archive() {
        let entries = vec![
            EntryToWrite {
                path: "a.txt",
                maus_bytes: maus_bytes_for("a.txt", b"hello"),
            },
            EntryToWrite {
                path: "dir/b.txt",
                maus_bytes: maus_bytes_for("dir/b.txt", b"world"),
            },
        ];
        let bytes = write(&entries, Options::default(), None, HashAlgorithm::Sha512, &KeyMaterial::none())
            .unwrap();
        let loaded = read(&bytes, &KeyMaterial::none()).unwrap();
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.entries[0].path, "a.txt");
        assert_eq!(loaded.entries[1].path, "dir/b.txt");
        let decoded = loaded.entries[0].decode(&KeyMaterial::none()).unwrap();
        assert_eq!(decoded.plaintext, b"hello");
    }

    #[test]
    fn tampered_meta_offset_is_rejected() {
        let entries = vec![EntryToWrite {
            path: "a.txt",
            maus_bytes: maus_bytes_for("a.txt", b"hello"),
        }];
        let mut bytes =
            write(&entries, Options::default(), None, HashAlgorithm::Sha512, &KeyMaterial::none()).unwrap();
        let len = bytes.len();
        bytes[len - 1] = bytes[len - 1].wrapping_add(1);
        assert!(read(&bytes, &KeyMaterial::none()).is_err());
    }

    #[test]
    fn bare_maus_is_wrapped_as_single_entry() {
        let mut opts = WriteOptions::default();
        opts.metadata.filename = Some("solo.txt".to_string());
        let bytes = maus::write(
            b"just one file",
            CompressionConfig::None,
            None,
            &opts,
            &KeyMaterial::none(),
            true,
        )
        .unwrap();
        let loaded = read(&bytes, &KeyMaterial::none()).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].path, "solo.txt");
    }
}
