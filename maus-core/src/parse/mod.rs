//! winnow parsers and wire-format structs for MAUS/MAUZ headers, options,
//! timestamps, and structural markers (FORMATNOTE, sections 4.1, 4.5, 4.6).

pub mod date_time;
pub mod markers;
pub mod maus_header;
pub mod mauz_header;
pub mod options;
pub mod raw;

pub use date_time::GregorianTicks;
pub use markers::{expect_marker, ALL_ENTRIES, ALL_OFFSETS, CUR_ENTRY, CUR_OFFSET};
pub use maus_header::{LengthOrCycles, MausHeader, CURRENT_VERSION as MAUS_CURRENT_VERSION, MAUS_MAGIC, MIN_VERSION as MAUS_MIN_VERSION};
pub use mauz_header::{MauzHeader, CURRENT_VERSION as MAUZ_CURRENT_VERSION, MAUZ_MAGIC, MIN_VERSION as MAUZ_MIN_VERSION};
pub use options::{
    AesKeySize, Compression, HashAlgorithm, OptionTag, OptionTags, Options, Signature,
    SignatureAlgorithm,
};
pub use raw::MausBytes;
