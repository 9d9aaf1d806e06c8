//! Read- and write-side entry handles (FORMATNOTE, section 4.6 "Entry", section 6).

use std::io::{self, Write};

use maus_core::compress::CompressionConfig;
use maus_core::maus::DecodedMaus;
use maus_core::parse::AesKeySize;
use maus_core::{EntryClassification, Error, KeyMaterial, MauzEntry};

use crate::container::Container;

/// A read-side handle onto one loaded archive entry.
///
/// Borrows from the [`Container`] it came from: the container stays in its
/// decrypted state for as long as any `Entry` is alive, and the key material
/// used to decode payloads is whatever was current on the container at the
/// time `entries()`/`find()` was called.
#[derive(Clone, Copy)]
pub struct Entry<'a> {
    pub(crate) inner: &'a MauzEntry,
    pub(crate) keys: &'a KeyMaterial,
}

impl<'a> Entry<'a> {
    /// Path as recorded in the archive (may be a `//V<i>` placeholder if the
    /// filename itself is encrypted; see [`Self::decode`]).
    pub fn path(&self) -> &'a str {
        &self.inner.path
    }

    /// How this entry was classified without decrypting it (FORMATNOTE, section 4.6
    /// "Entry classification during load").
    pub fn classification(&self) -> EntryClassification {
        self.inner.classification
    }

    /// Byte offset of this entry's MAUS stream within the archive body.
    pub fn offset(&self) -> i64 {
        self.inner.offset
    }

    /// Decodes this entry: decrypts (if needed) and decompresses its
    /// payload. Cheap to call repeatedly; nothing is cached.
    pub fn decode(&self) -> Result<DecodedMaus, Error> {
        self.inner.decode(self.keys)
    }

    /// Shorthand for `self.decode()?.plaintext`.
    pub fn read_all(&self) -> Result<Vec<u8>, Error> {
        self.decode().map(|d| d.plaintext)
    }
}

/// A write-side handle for staging one entry's plaintext before it's
/// compressed, optionally encrypted, and framed into a MAUS stream.
///
/// Buffer plaintext into it with [`std::io::Write`], then call
/// [`Self::finish`] to hand the finished bytes back to the parent
/// [`Container`]. [`Container::add_file`] already reserves the path in the
/// arbiter before returning the writer, so dropping an `EntryWriter` without
/// calling `finish` leaves that reservation in place with no data behind it;
/// call [`Self::finish`] to actually use an entry you `add_file`'d.
pub struct EntryWriter<'a, S> {
    pub(crate) container: &'a mut Container<S>,
    pub(crate) path: String,
    pub(crate) slot: usize,
    pub(crate) compression: CompressionConfig,
    pub(crate) encryption: Option<AesKeySize>,
    pub(crate) buffer: Vec<u8>,
}

impl<S> Write for EntryWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S> EntryWriter<'_, S> {
    /// Path this entry was opened under.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Compresses, optionally encrypts, and frames the buffered plaintext
    /// into a MAUS stream, then hands it back to the parent container.
    pub fn finish(self) -> Result<(), Error> {
        self.container
            .finish_entry(self.slot, &self.path, self.compression, self.encryption, self.buffer)
    }
}
