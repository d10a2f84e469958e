//! Key files on disk combined with passwords into composite keys.

use std::fs;

use base64::Engine;
use kdbxkit::crypto::kdf::Kdf;
use kdbxkit::crypto::{CompositeKey, KeyFile, KeyFileKind};
use kdbxkit::db::{Database, DatabaseSettings, Entry};
use kdbxkit::errors::{ErrorKind, KdbxError, KeySourceError};
use kdbxkit::kdbx;
use tempfile::TempDir;

const KEY: [u8; 32] = [
    0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF,
    0xF0, 0xE1, 0xD2, 0xC3, 0xB4, 0xA5, 0x96, 0x87, 0x78, 0x69, 0x5A, 0x4B, 0x3C, 0x2D, 0x1E, 0x0F,
];

fn database() -> Database {
    let mut db = Database::new(DatabaseSettings {
        kdf: Kdf::aes(50),
        ..DatabaseSettings::default()
    });
    let root = db.root.uuid;
    let mut entry = Entry::new();
    entry.set("Title", "Locked by key file");
    db.add_entry(root, entry).unwrap();
    db
}

/// The same 32-byte key in every layout that stores it verbatim.
fn layouts() -> Vec<(&'static str, Vec<u8>, KeyFileKind)> {
    let v1 = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<KeyFile><Meta><Version>1.00</Version></Meta>\
         <Key><Data>{}</Data></Key></KeyFile>",
        base64::engine::general_purpose::STANDARD.encode(KEY)
    );
    let v2 = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<KeyFile><Meta><Version>2.0</Version></Meta>\
         <Key><Data>\n{}\n</Data></Key></KeyFile>",
        hex::encode_upper(KEY)
    );
    vec![
        ("binary.key", KEY.to_vec(), KeyFileKind::Binary),
        ("hex.key", hex::encode(KEY).into_bytes(), KeyFileKind::Hex),
        ("v1.key", v1.into_bytes(), KeyFileKind::XmlV1),
        ("v2.keyx", v2.into_bytes(), KeyFileKind::XmlV2),
    ]
}

#[test]
fn every_layout_of_the_same_key_opens_the_database() {
    let dir = TempDir::new().unwrap();
    let db = database();
    let mut saved = None;

    for (name, contents, kind) in layouts() {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        let key_file = KeyFile::load(&path).unwrap();
        assert_eq!(key_file.kind(), kind, "{name}");
        assert_eq!(key_file.key(), &KEY, "{name}");
        assert_eq!(key_file.is_legacy(), kind != KeyFileKind::XmlV2, "{name}");

        let key = CompositeKey::from_password("pw").with_key_file(&key_file);
        let bytes = saved.get_or_insert_with(|| kdbx::save(&db, &key).unwrap());
        assert_eq!(kdbx::open(bytes, &key).unwrap(), db, "{name}");
    }
}

#[test]
fn arbitrary_file_is_hashed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("photo.jpg");
    fs::write(&path, b"\xFF\xD8\xFF\xE0 not really a jpeg").unwrap();
    let key_file = KeyFile::load(&path).unwrap();
    assert_eq!(key_file.kind(), KeyFileKind::Hashed);

    let key = CompositeKey::new().with_key_file(&key_file);
    let db = database();
    let bytes = kdbx::save(&db, &key).unwrap();
    assert_eq!(kdbx::open(&bytes, &key).unwrap(), db);
}

#[test]
fn password_and_key_file_are_both_required() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("db.keyx");
    let key_file = KeyFile::generate(&path).unwrap();
    let db = database();
    let bytes = kdbx::save(&db, &CompositeKey::from_password("pw").with_key_file(&key_file)).unwrap();

    let password_only = kdbx::open(&bytes, &CompositeKey::from_password("pw")).unwrap_err();
    assert_eq!(password_only.kind(), ErrorKind::Integrity);

    let file_only = kdbx::open(&bytes, &CompositeKey::new().with_key_file(&key_file)).unwrap_err();
    assert_eq!(file_only.kind(), ErrorKind::Integrity);

    let reloaded = KeyFile::load(&path).unwrap();
    let both = CompositeKey::from_password("pw").with_key_file(&reloaded);
    assert_eq!(kdbx::open(&bytes, &both).unwrap(), db);
}

#[test]
fn missing_key_file_is_a_key_source_error() {
    let dir = TempDir::new().unwrap();
    let err = KeyFile::load(&dir.path().join("absent.key")).unwrap_err();
    assert!(matches!(
        err,
        KdbxError::KeySource(KeySourceError::Unreadable { .. })
    ));
    assert_eq!(err.kind(), ErrorKind::KeySource);
}

#[test]
fn v2_hash_mismatch_is_rejected() {
    let contents = format!(
        "<KeyFile><Meta><Version>2.0</Version></Meta>\
         <Key><Data Hash=\"00000000\">{}</Data></Key></KeyFile>",
        hex::encode_upper(KEY)
    );
    let err = KeyFile::from_bytes(contents.as_bytes()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::KeySource);
}

#[test]
fn empty_composite_key_is_refused() {
    let db = database();
    let err = kdbx::save(&db, &CompositeKey::new()).unwrap_err();
    assert!(matches!(err, KdbxError::KeySource(KeySourceError::NoKeyFactors)));
}
