//! End-to-end tests driving [`maus_sync::Container`] over an in-memory
//! `Cursor`, plus a couple of scenarios exercised directly against
//! `maus_core` where the failure being tested lives below the `Container`
//! API (a fabricated unknown option, a tampered offset table).

use std::io::{Cursor, Read, Write};

use maus_sync::maus_core::error::PathError;
use maus_sync::maus_core::mauz::{self, EntryToWrite};
use maus_sync::maus_core::parse::{HashAlgorithm, Options};
use maus_sync::maus_core::KeyMaterial;
use maus_sync::{AesKeySize, CompressionConfig, Container, Error};

fn new_container() -> Container<Cursor<Vec<u8>>> {
    Container::open_create(Cursor::new(Vec::new()), None, true)
}

#[test_log::test]
fn roundtrip_single_file_no_encryption_deflate() {
    let mut container = new_container();
    let mut writer = container
        .add_file("hello.txt", CompressionConfig::Deflate { level: 6 }, None)
        .unwrap();
    writer.write_all(b"hello, world").unwrap();
    writer.finish().unwrap();

    let cursor = container.finalize().unwrap().unwrap();
    let bytes = cursor.into_inner();

    // MAUZ magic ("ZuAm" little-endian) at the very start of the stream.
    assert_eq!(bytes[..4].to_vec(), maus_sync::maus_core::parse::MAUZ_MAGIC.to_le_bytes().to_vec());

    let container = Container::open_read(Cursor::new(bytes), false).unwrap();
    let entry = container.find("hello.txt").unwrap().expect("entry present");
    assert_eq!(entry.read_all().unwrap(), b"hello, world");

    // The manifest is appended automatically and covers the one real entry.
    let manifest_entry = container
        .find(maus_sync::maus_core::manifest::MANIFEST_PATH)
        .unwrap()
        .expect("manifest entry present");
    let manifest_bytes = manifest_entry.read_all().unwrap();
    let manifest = maus_sync::maus_core::manifest::Manifest::parse(&manifest_bytes).unwrap();
    assert!(manifest.verify("hello.txt", b"hello, world"));
}

#[test_log::test]
fn wrong_password_then_correct_password() {
    let mut container = Container::open_create(Cursor::new(Vec::new()), Some(AesKeySize::Bits256), true);
    container.set_password("correct horse battery staple").unwrap();
    let mut writer = container
        .add_file("secret.txt", CompressionConfig::None, None)
        .unwrap();
    writer.write_all(b"top secret payload").unwrap();
    writer.finish().unwrap();
    let cursor = container.finalize().unwrap().unwrap();
    let bytes = cursor.into_inner();

    let mut container = Container::open_read(Cursor::new(bytes), false).unwrap();
    container.set_password("wrong password").unwrap();
    let err = container.decrypt().unwrap_err();
    assert!(matches!(err, Error::BadKey));

    // A failed attempt doesn't lock out further attempts.
    container.set_password("correct horse battery staple").unwrap();
    container.decrypt().unwrap();
    let entry = container.find("secret.txt").unwrap().expect("entry present");
    assert_eq!(entry.read_all().unwrap(), b"top secret payload");
}

#[test_log::test]
fn directory_then_file_collision_is_rejected() {
    let mut container = new_container();
    container.add_empty_directory("a/b/").unwrap();
    let err = container.add_file("a/b", CompressionConfig::None, None).unwrap_err();
    assert!(matches!(err, Error::Path(PathError::NonEmptyDirectory(_))));
}

#[test_log::test]
fn file_then_directory_collision_is_rejected() {
    let mut container = new_container();
    let mut writer = container.add_file("a/b", CompressionConfig::None, None).unwrap();
    writer.write_all(b"x").unwrap();
    writer.finish().unwrap();
    let err = container.add_empty_directory("a/b/").unwrap_err();
    assert!(matches!(err, Error::Path(PathError::PathCoveredByFile(_))));
}

#[test_log::test]
fn empty_directory_is_pruned_once_a_descendant_file_is_added() {
    let mut container = new_container();
    container.add_empty_directory("a/b/").unwrap();
    let mut writer = container.add_file("a/b/c", CompressionConfig::None, None).unwrap();
    writer.write_all(b"contents").unwrap();
    writer.finish().unwrap();

    let cursor = container.finalize().unwrap().unwrap();
    let bytes = cursor.into_inner();
    let container = Container::open_read(Cursor::new(bytes), false).unwrap();

    let paths: Vec<&str> = container.entries().unwrap().map(|e| e.path()).collect();
    assert!(paths.contains(&"a/b/c"));
    assert!(!paths.contains(&"a/b/"));
    assert_eq!(
        container.find("a/b/c").unwrap().unwrap().read_all().unwrap(),
        b"contents"
    );
}

fn bare_maus_entry(path: &str, content: &[u8]) -> Vec<u8> {
    let mut opts = maus_sync::maus_core::maus::WriteOptions {
        hash: HashAlgorithm::Sha256,
        ..Default::default()
    };
    opts.metadata.filename = Some(path.to_string());
    maus_sync::maus_core::maus::write(content, CompressionConfig::None, None, &opts, &KeyMaterial::none(), true)
        .unwrap()
}

#[test_log::test]
fn tampered_meta_offset_is_rejected() {
    let entries = vec![EntryToWrite {
        path: "a.txt",
        maus_bytes: bare_maus_entry("a.txt", b"hello"),
    }];
    let mut bytes = mauz::write(&entries, Options::default(), None, HashAlgorithm::Sha512, &KeyMaterial::none())
        .unwrap();
    let last = bytes.len() - 1;
    bytes[last] = bytes[last].wrapping_add(1);
    assert!(mauz::read(&bytes, &KeyMaterial::none()).is_err());
}

#[test_log::test]
fn tampered_offset_record_is_rejected() {
    let entries = vec![
        EntryToWrite {
            path: "a.txt",
            maus_bytes: bare_maus_entry("a.txt", b"hello"),
        },
        EntryToWrite {
            path: "b.txt",
            maus_bytes: bare_maus_entry("b.txt", b"world"),
        },
    ];
    let bytes = mauz::write(&entries, Options::default(), None, HashAlgorithm::Sha512, &KeyMaterial::none())
        .unwrap();

    // Flip a byte inside the All-Offsets block (well before the trailing
    // meta_offset field) so a recorded offset no longer matches the entry
    // it's supposed to describe.
    let mut tampered = bytes.clone();
    let flip_at = tampered.len() - 9;
    tampered[flip_at] = tampered[flip_at].wrapping_add(1);
    assert!(mauz::read(&tampered, &KeyMaterial::none()).is_err());
}

#[test_log::test]
fn unknown_option_keyword_is_rejected() {
    use maus_sync::maus_core::parse::Options as Opts;
    use winnow::Partial;

    let mut bytes = Vec::new();
    let entries: &[&[u8]] = &[b"ZZZ", b"x"];
    bytes.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        bytes.extend_from_slice(&(entry.len() as u16).to_le_bytes());
        bytes.extend_from_slice(entry);
    }

    let mut input = Partial::new(bytes.as_slice());
    let err = Opts::parser(&mut input);
    assert!(err.is_err());
}

#[test_log::test]
fn decoding_without_key_material_reports_no_key() {
    let mut container = Container::open_create(Cursor::new(Vec::new()), Some(AesKeySize::Bits128), true);
    container.set_password("hunter2").unwrap();
    let mut writer = container.add_file("a.txt", CompressionConfig::None, None).unwrap();
    writer.write_all(b"data").unwrap();
    writer.finish().unwrap();
    let mut cursor = container.finalize().unwrap().unwrap();
    cursor.set_position(0);
    let mut bytes = Vec::new();
    cursor.read_to_end(&mut bytes).unwrap();

    // No password/key supplied at all: entries() must refuse rather than
    // silently returning nothing.
    let container = Container::open_read(Cursor::new(bytes), false).unwrap();
    let err = container.entries().unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}
