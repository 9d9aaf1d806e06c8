//! [`Container`]: the consumer-facing read/write state machine over a MAUS
//! or MAUZ stream (FORMATNOTE, section 4.5 "Read path"/"Write path", sections 5 and 6).

use std::io::{Read, Write};

use tracing::trace;

use maus_core::compress::CompressionConfig;
use maus_core::manifest::{Manifest, MANIFEST_PATH};
use maus_core::maus::{self, WriteOptions};
use maus_core::mauz::{self, EntryToWrite};
use maus_core::parse::{AesKeySize, HashAlgorithm, OptionTag, Options};
use maus_core::path::PathArbiter;
use maus_core::{CryptoError, Error, KeyMaterial, LoadedMauz};

use crate::entry::{Entry, EntryWriter};

/// State specific to a `Container` opened for reading.
struct ReadState {
    /// Complete container bytes, read once at `open_read` time. Kept around
    /// so `decrypt()` can be retried with different key material after a
    /// `BadKey` (FORMATNOTE, section 7: "wrong password ... recoverable").
    raw: Vec<u8>,
    /// `Some` once the body has been successfully parsed, either because
    /// the container wasn't encrypted, or because `decrypt()` succeeded.
    archive: Option<LoadedMauz>,
}

/// One entry queued for writing but not yet assembled into its final MAUS
/// bytes (before [`EntryWriter::finish`]) or already assembled (after).
struct PendingEntry {
    /// User-facing path. Stays the real path even for an entry whose
    /// filename ends up encrypted; the `//V<i>` rewrite is applied only at
    /// `finalize()` time, once final entry order (and thus each entry's
    /// dense index) is known.
    path: String,
    filename_encrypted: bool,
    maus_bytes: Vec<u8>,
    /// Set when a later `add_file`/`add_empty_directory` call displaced this
    /// (empty-directory) entry via the path arbiter's pruning rule
    /// (FORMATNOTE, section 4.7). Kept in place rather than removed so earlier entries' `slot`
    /// indices, captured at `add_file` time, stay valid; filtered out at
    /// `finalize()`.
    pruned: bool,
}

/// State specific to a `Container` opened for writing.
struct WriteState {
    archive_encryption: Option<AesKeySize>,
    hash_alg: HashAlgorithm,
    arbiter: PathArbiter,
    pending: Vec<PendingEntry>,
    manifest: Manifest,
}

enum Mode {
    Read(ReadState),
    Write(WriteState),
    Closed,
}

/// A MAUS/MAUZ container opened over some underlying stream `S`.
///
/// The single read/write entry point over a container's bytes (FORMATNOTE,
/// sections 4.5/4.6 state machines: `Fresh -> HeaderParsed -> (Decrypted) -> PayloadRead -> Closed`
/// for reading, `Fresh -> Writing... -> Finalized -> Closed` for writing).
/// Every operation whose state machine forbids it in the current mode fails
/// with [`Error::InvalidState`] rather than panicking.
pub struct Container<S> {
    stream: Option<S>,
    leave_open: bool,
    keys: KeyMaterial,
    mode: Mode,
}

impl<S: Read> Container<S> {
    /// Opens `stream` for reading: reads it to the end, then parses the
    /// header and (if the container isn't encrypted) the whole entry table
    /// in one pass.
    ///
    /// If the container turns out to be encrypted, this still succeeds:
    /// the container stays in its `HeaderParsed` state until
    /// [`Self::set_password`]/[`Self::set_key`]/[`Self::set_rsa_private_key`]
    /// and [`Self::decrypt`] are called. Any other parse failure (bad magic,
    /// truncated header, unsupported version) fails here, since those are
    /// fatal regardless of key material.
    pub fn open_read(mut stream: S, leave_open: bool) -> Result<Self, Error> {
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        trace!(bytes = raw.len(), "container: read underlying stream to completion");

        let archive = match mauz::read(&raw, &KeyMaterial::none()) {
            Ok(archive) => {
                trace!("container: Fresh -> HeaderParsed -> PayloadRead (unencrypted)");
                Some(archive)
            }
            Err(Error::Crypto(CryptoError::NoKeyMaterial)) => {
                trace!("container: Fresh -> HeaderParsed (encrypted, awaiting key material)");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            stream: Some(stream),
            leave_open,
            keys: KeyMaterial::none(),
            mode: Mode::Read(ReadState { raw, archive }),
        })
    }
}

impl<S: Write> Container<S> {
    /// Builds every queued entry's final archive bytes, writes them to the
    /// underlying stream, and transitions the container to `Closed`.
    ///
    /// Automatically appends the signed manifest entry (`/Manifest.dat`)
    /// covering every other entry, per Design Note 9 "Manifest signing".
    /// Consumes `self`; returns the underlying stream back to the caller
    /// when `leave_open` was set at [`Self::open_create`] time.
    pub fn finalize(mut self) -> Result<Option<S>, Error> {
        let state = match std::mem::replace(&mut self.mode, Mode::Closed) {
            Mode::Write(state) => state,
            Mode::Read(_) => return Err(Error::InvalidState("finalize() called on a container opened for reading")),
            Mode::Closed => return Err(Error::InvalidState("container is already closed")),
        };

        let live: Vec<&PendingEntry> = state.pending.iter().filter(|p| !p.pruned).collect();
        let mut final_paths = Vec::with_capacity(live.len());
        for (index, pending) in live.iter().enumerate() {
            final_paths.push(if pending.filename_encrypted {
                format!("//V{index}")
            } else {
                pending.path.clone()
            });
        }

        let mut entries: Vec<EntryToWrite> = live
            .iter()
            .zip(final_paths.iter())
            .map(|(pending, path)| EntryToWrite {
                path,
                maus_bytes: pending.maus_bytes.clone(),
            })
            .collect();

        let manifest_bytes = state.manifest.encode();
        let mut manifest_opts = WriteOptions {
            hash: state.hash_alg,
            ..WriteOptions::default()
        };
        manifest_opts.metadata.filename = Some(MANIFEST_PATH.to_string());
        let manifest_maus = maus::write(
            &manifest_bytes,
            CompressionConfig::None,
            None,
            &manifest_opts,
            &self.keys,
            true,
        )?;
        entries.push(EntryToWrite {
            path: MANIFEST_PATH,
            maus_bytes: manifest_maus,
        });

        let archive_bytes = mauz::write(
            &entries,
            Options::default(),
            state.archive_encryption,
            state.hash_alg,
            &self.keys,
        )?;

        let mut stream = self.stream.take().expect("stream is present until finalize/close");
        stream.write_all(&archive_bytes)?;
        stream.flush()?;
        trace!(bytes = archive_bytes.len(), entries = entries.len(), "container: Writing -> Finalized");

        if self.leave_open {
            Ok(Some(stream))
        } else {
            Ok(None)
        }
    }
}

impl<S> Container<S> {
    /// Opens `stream` for writing a brand new container.
    ///
    /// `encryption_format` sets archive-level (MAUZ outer) encryption;
    /// individual entries can additionally (or instead) request per-entry
    /// encryption via [`Self::add_file`]. No I/O happens until
    /// [`Self::finalize`].
    pub fn open_create(stream: S, encryption_format: Option<AesKeySize>, leave_open: bool) -> Self {
        Self {
            stream: Some(stream),
            leave_open,
            keys: KeyMaterial::none(),
            mode: Mode::Write(WriteState {
                archive_encryption: encryption_format,
                hash_alg: HashAlgorithm::mauz_default(),
                arbiter: PathArbiter::new(),
                pending: Vec::new(),
                manifest: Manifest::new(),
            }),
        }
    }

    /// Supplies a password for key derivation (FORMATNOTE, section 4.2 "PBKDF2", section 6).
    /// Valid before a successful [`Self::decrypt`] (read mode) or any time
    /// before [`Self::finalize`] (write mode).
    pub fn set_password(&mut self, password: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.check_key_settable()?;
        self.keys.password = Some(zeroize::Zeroizing::new(password.into()));
        Ok(())
    }

    /// Supplies a raw AES content key directly, bypassing PBKDF2.
    pub fn set_key(&mut self, key: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.check_key_settable()?;
        self.keys.direct_key = Some(zeroize::Zeroizing::new(key.into()));
        Ok(())
    }

    /// Supplies the RSA private key used to unwrap an `RSAk`-wrapped content
    /// key (read mode).
    pub fn set_rsa_private_key(&mut self, key: rsa::RsaPrivateKey) -> Result<(), Error> {
        self.check_key_settable()?;
        self.keys.rsa_private_key = Some(Box::new(key));
        Ok(())
    }

    /// Supplies the RSA public key used to wrap a freshly generated content
    /// key (write mode).
    pub fn set_rsa_public_key(&mut self, key: rsa::RsaPublicKey) -> Result<(), Error> {
        self.check_key_settable()?;
        self.keys.rsa_public_key = Some(Box::new(key));
        Ok(())
    }

    fn check_key_settable(&self) -> Result<(), Error> {
        match &self.mode {
            Mode::Read(state) if state.archive.is_some() => {
                Err(Error::InvalidState("key material cannot change after a successful decrypt()"))
            }
            Mode::Closed => Err(Error::InvalidState("container is closed")),
            _ => Ok(()),
        }
    }

    /// Attempts to decrypt and parse the entry table of an encrypted
    /// container, using whatever key material has been supplied so far.
    ///
    /// A wrong password/key surfaces as [`Error::BadKey`] and leaves the
    /// container in its pre-decrypt state: the caller may call
    /// `set_password`/`set_key` again and retry (FORMATNOTE, section 7). Idempotent once
    /// decryption has already succeeded.
    pub fn decrypt(&mut self) -> Result<(), Error> {
        let Mode::Read(state) = &mut self.mode else {
            return Err(Error::InvalidState("decrypt() is only valid on a container opened for reading"));
        };
        if state.archive.is_some() {
            return Ok(());
        }
        let archive = mauz::read(&state.raw, &self.keys)?;
        trace!("container: HeaderParsed -> Decrypted -> PayloadRead");
        state.archive = Some(archive);
        Ok(())
    }

    /// Lists every loaded entry, in archive order (FORMATNOTE, section 5 "Ordering
    /// guarantees"). Fails with `InvalidState` until the container has been
    /// successfully decrypted (or was never encrypted in the first place).
    pub fn entries(&self) -> Result<impl Iterator<Item = Entry<'_>>, Error> {
        match &self.mode {
            Mode::Read(ReadState { archive: Some(archive), .. }) => {
                Ok(archive.entries.iter().map(move |inner| Entry { inner, keys: &self.keys }))
            }
            Mode::Read(_) => Err(Error::InvalidState("call decrypt() before listing entries")),
            _ => Err(Error::InvalidState("entries() is only valid on a container opened for reading")),
        }
    }

    /// Looks up a single entry by its exact recorded path.
    pub fn find(&self, path: &str) -> Result<Option<Entry<'_>>, Error> {
        Ok(self.entries()?.find(|e| e.path() == path))
    }

    /// Opens a new file entry for writing. The returned [`EntryWriter`]
    /// buffers plaintext via [`std::io::Write`]; call
    /// [`EntryWriter::finish`] to compress, optionally encrypt, and queue
    /// it.
    ///
    /// `encryption` requests per-entry AES encryption independent of (and
    /// composable with) the archive-level encryption chosen at
    /// [`Self::open_create`]; when set, the entry's filename is moved into
    /// its encrypted inner options block and the path recorded in the
    /// archive's entry table becomes a `//V<i>` placeholder (FORMATNOTE, section 3
    /// "filename encryption").
    pub fn add_file(
        &mut self,
        path: impl Into<String>,
        compression: CompressionConfig,
        encryption: Option<AesKeySize>,
    ) -> Result<EntryWriter<'_, S>, Error> {
        let path = path.into();
        let state = self.write_state_mut()?;
        let slot = state.pending.len();
        let pruned = state.arbiter.insert(&path, slot, |_| true)?;
        prune_pending(&mut state.pending, &mut state.manifest, &pruned);
        state.pending.push(PendingEntry {
            path: path.clone(),
            filename_encrypted: encryption.is_some(),
            maus_bytes: Vec::new(),
            pruned: false,
        });
        Ok(EntryWriter {
            container: self,
            path,
            slot,
            compression,
            encryption,
            buffer: Vec::new(),
        })
    }

    /// Adds an empty-directory entry directly (no writer needed: there's no
    /// payload beyond the directory marker itself, FORMATNOTE, section 4.7).
    pub fn add_empty_directory(&mut self, path: impl Into<String>) -> Result<(), Error> {
        let path = path.into();
        let dir_path = if path.ends_with('/') { path } else { format!("{path}/") };

        let state = self.write_state_mut()?;
        let slot = state.pending.len();
        let pruned = state.arbiter.insert(&dir_path, slot, |_| true)?;
        prune_pending(&mut state.pending, &mut state.manifest, &pruned);

        let opts = WriteOptions {
            hash: state.hash_alg,
            ..WriteOptions::default()
        };
        let maus_bytes = maus::write(&[], CompressionConfig::None, None, &opts, &KeyMaterial::none(), true)?;
        state.manifest.push(dir_path.clone(), state.hash_alg, &[]);
        state.pending.push(PendingEntry {
            path: dir_path,
            filename_encrypted: false,
            maus_bytes,
            pruned: false,
        });
        Ok(())
    }

    /// Called by [`EntryWriter::finish`]: compresses/encrypts the buffered
    /// plaintext and fills in the pending slot reserved by `add_file`.
    pub(crate) fn finish_entry(
        &mut self,
        slot: usize,
        path: &str,
        compression: CompressionConfig,
        encryption: Option<AesKeySize>,
        plaintext: Vec<u8>,
    ) -> Result<(), Error> {
        let state = self.write_state_mut()?;

        let mut opts = WriteOptions {
            hash: state.hash_alg,
            ..WriteOptions::default()
        };
        opts.metadata.filename = Some(path.to_string());
        if encryption.is_some() {
            opts.encrypted_tags.insert(OptionTag::Filename);
        }

        let maus_bytes = maus::write(&plaintext, compression, encryption, &opts, &self.keys, true)?;
        state.manifest.push(path.to_string(), state.hash_alg, &plaintext);
        state.pending[slot].maus_bytes = maus_bytes;
        Ok(())
    }

    fn write_state_mut(&mut self) -> Result<&mut WriteState, Error> {
        match &mut self.mode {
            Mode::Write(state) => Ok(state),
            Mode::Read(_) => Err(Error::InvalidState("this operation requires a container opened for writing")),
            Mode::Closed => Err(Error::InvalidState("container is closed")),
        }
    }

    /// Releases this container's buffers, transitioning it to `Closed`.
    /// Abandons any queued-but-unfinished entries if called in write mode
    /// without a prior [`Container::finalize`] (use `finalize` to actually
    /// persist a container being written). Returns the underlying stream
    /// when `leave_open` was set.
    pub fn close(mut self) -> Option<S> {
        self.mode = Mode::Closed;
        if self.leave_open {
            self.stream.take()
        } else {
            None
        }
    }
}

fn prune_pending(pending: &mut [PendingEntry], manifest: &mut Manifest, pruned_paths: &[String]) {
    for entry in pending.iter_mut() {
        if pruned_paths.iter().any(|p| p == &entry.path) {
            entry.pruned = true;
        }
    }
    manifest
        .records
        .retain(|record| !pruned_paths.iter().any(|p| p == &record.path));
}
