//! Blocking `std::io` reading and writing of MAUS/MAUZ containers, built on
//! top of [maus-core](https://docs.rs/maus-core).
//!
//! [`maus_core`] never touches a file descriptor: its parsers and encoders
//! work on fully-buffered `&[u8]`/`Vec<u8>`. This crate is the consumer-facing
//! layer on top of it, the way `rc-zip-sync` sits on top of `rc-zip`. Where
//! `rc-zip` parses a zip's central directory incrementally against
//! whatever bytes have arrived so far, a MAUS/MAUZ container's integrity tag
//! covers the whole body, so there's no point reading it any other way than
//! in one shot. [`Container::open_read`] does exactly that: read the
//! underlying stream to the end, then hand the bytes to [`maus_core::mauz`].
//!
//! Start at [`Container::open_read`] to read an existing container, or
//! [`Container::open_create`] to build a new one.

#![warn(missing_docs)]

mod container;
mod entry;

pub use container::Container;
pub use entry::{Entry, EntryWriter};

// re-exports
pub use maus_core;
pub use maus_core::compress::CompressionConfig;
pub use maus_core::parse::AesKeySize;
pub use maus_core::{EntryClassification, Error};
