//! Sans-I/O implementation of the MAUS/MAUZ container formats.
//!
//! Field layouts and encoding rules throughout this crate are cited as
//! `FORMATNOTE, section N`, after FORMATNOTE, the MAUS/MAUZ container format
//! note this implementation follows.
//!
//! This crate parses and encodes the MAUS (single-entry) and MAUZ
//! (multi-entry archive) binary formats entirely in memory: it never touches
//! a file descriptor or a socket. [`maus_sync`](https://docs.rs/maus-sync)
//! builds a blocking `std::io` container API on top of it, the way
//! `rc-zip-sync` builds one on top of `rc-zip`.
//!
//! Start at [`mauz::read`]/[`mauz::write`] for whole archives, or
//! [`maus::read`]/[`maus::write`] to work with a single bare MAUS stream.

pub mod buffer;
pub mod compress;
pub mod crypto;
pub mod error;
pub mod manifest;
pub mod maus;
pub mod mauz;
pub mod parse;
pub mod path;

pub use error::{CryptoError, Error, FormatError, PathError, UnsupportedError};
pub use maus::KeyMaterial;
pub use mauz::{EntryClassification, LoadedMauz, MauzEntry};
