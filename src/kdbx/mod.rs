//! Container codecs and the open/save pipeline.
//!
//! Opening a KDBX file walks a fixed sequence of states:
//!
//! ```text
//! Unopened -> HeaderRead -> HeaderAuthenticated -> BodyDecrypted -> Open
//!                 \               \                      \
//!                  `---------------`----------------------`--> Failed
//! ```
//!
//! Each state is a value ([`HeaderRead`], [`HeaderAuthenticated`],
//! [`BodyDecrypted`]) that can only be produced by the previous one, so a
//! body is never decrypted with keys that were not checked against the
//! header. KeePass 1 files go through [`kdb`] instead and share only the
//! [`Database`] model.

pub mod blocks;
pub(crate) mod bytes;
pub mod compression;
pub mod header;
pub mod inner_header;
pub mod kdb;
pub mod kdbx3;
pub mod kdbx4;
pub mod variant_map;
pub mod xml;

use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::{CancelToken, CompositeKey, ProtectedStream, ProtectedStreamAlgorithm};
use crate::db::{Database, DatabaseSettings};
use crate::errors::{KdbxError, Result};
use header::{FileKind, OuterHeader};
use inner_header::PoolBinary;

/// Container generation of a KDBX file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    Kdbx3,
    Kdbx4,
}

impl FormatVersion {
    /// Version number written into the header.
    pub fn version(self) -> u32 {
        match self {
            FormatVersion::Kdbx3 => header::VERSION_KDBX3_1,
            FormatVersion::Kdbx4 => header::VERSION_KDBX4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FormatVersion::Kdbx3 => "kdbx3",
            FormatVersion::Kdbx4 => "kdbx4",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "kdbx3" | "kdbx3.1" | "3" | "3.1" => Some(FormatVersion::Kdbx3),
            "kdbx4" | "kdbx4.0" | "4" | "4.0" => Some(FormatVersion::Kdbx4),
            _ => None,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatVersion::Kdbx3 => write!(f, "KDBX 3.1"),
            FormatVersion::Kdbx4 => write!(f, "KDBX 4.0"),
        }
    }
}

// ---------------------------------------------------------------------------
// Open state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    Unopened,
    HeaderRead,
    HeaderAuthenticated,
    BodyDecrypted,
    Open,
    Failed,
}

/// Keys derived from the composite key and the header seeds.
pub(crate) enum DerivedKeys {
    Kdbx3(Zeroizing<[u8; 32]>),
    Kdbx4(kdbx4::Keys),
}

/// Decrypted payload of either KDBX generation.
pub(crate) struct Payload {
    pub xml: Zeroizing<Vec<u8>>,
    pub binaries: Vec<PoolBinary>,
    pub protected_stream: ProtectedStreamAlgorithm,
    pub stream: ProtectedStream,
}

/// A parsed but unauthenticated outer header.
pub struct HeaderRead<'a> {
    data: &'a [u8],
    header: OuterHeader,
    header_len: usize,
}

impl<'a> HeaderRead<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let (header, header_len) = OuterHeader::decode(data)?;
        Ok(Self {
            data,
            header,
            header_len,
        })
    }

    pub fn header(&self) -> &OuterHeader {
        &self.header
    }

    /// Run the key derivation and check the keys against the header.
    pub fn authenticate(
        self,
        key: &CompositeKey,
        cancel: &CancelToken,
    ) -> Result<HeaderAuthenticated<'a>> {
        let (keys, body_offset) = match self.header.format() {
            FormatVersion::Kdbx4 => {
                let (keys, offset) =
                    kdbx4::authenticate(self.data, &self.header, self.header_len, key, cancel)?;
                (DerivedKeys::Kdbx4(keys), offset)
            }
            FormatVersion::Kdbx3 => {
                let final_key = kdbx3::derive_key(&self.header, key, cancel)?;
                (DerivedKeys::Kdbx3(final_key), self.header_len)
            }
        };
        Ok(HeaderAuthenticated {
            data: self.data,
            header: self.header,
            header_len: self.header_len,
            body_offset,
            keys,
        })
    }
}

/// Header whose keys have been derived and verified.
pub struct HeaderAuthenticated<'a> {
    data: &'a [u8],
    header: OuterHeader,
    header_len: usize,
    body_offset: usize,
    keys: DerivedKeys,
}

impl HeaderAuthenticated<'_> {
    pub fn header(&self) -> &OuterHeader {
        &self.header
    }

    pub fn decrypt_body(self) -> Result<BodyDecrypted> {
        let body = &self.data[self.body_offset..];
        let payload = match &self.keys {
            DerivedKeys::Kdbx4(keys) => kdbx4::decrypt_body(&self.header, keys, body)?,
            DerivedKeys::Kdbx3(final_key) => kdbx3::decrypt_body(&self.header, final_key, body)?,
        };
        let mut header_hash = [0u8; 32];
        header_hash.copy_from_slice(&Sha256::digest(&self.data[..self.header_len]));
        Ok(BodyDecrypted {
            header: self.header,
            header_hash,
            payload,
        })
    }
}

/// Verified plaintext, not yet parsed into a tree.
pub struct BodyDecrypted {
    header: OuterHeader,
    header_hash: [u8; 32],
    payload: Payload,
}

impl BodyDecrypted {
    pub fn header(&self) -> &OuterHeader {
        &self.header
    }

    pub fn into_database(self) -> Result<Database> {
        let Self {
            header,
            header_hash,
            mut payload,
        } = self;
        let format = header.format();

        let parsed = xml::read_document(&payload.xml, &mut payload.stream, payload.binaries)?;
        if format == FormatVersion::Kdbx3 {
            if let Some(hash) = &parsed.header_hash {
                if !bool::from(hash.as_slice().ct_eq(&header_hash)) {
                    return Err(KdbxError::WrongKeyOrCorrupt);
                }
            }
        }

        let settings = DatabaseSettings {
            version: format,
            cipher: header.cipher,
            compression: header.compression,
            kdf: header.kdf,
            protected_stream: payload.protected_stream,
            public_custom_data: header.public_custom_data.unwrap_or_default(),
        };
        let db = Database {
            settings,
            meta: parsed.meta,
            root: parsed.root,
            deleted_objects: parsed.deleted_objects,
        };
        db.validate()?;
        Ok(db)
    }
}

fn advance(state: &mut OpenState, next: OpenState) {
    tracing::debug!(from = ?*state, to = ?next, "open state");
    *state = next;
}

/// What a file's header says, without any key.
#[derive(Debug, Clone)]
pub enum HeaderInfo {
    Kdbx(OuterHeader),
    Kdb(kdb::KdbHeader),
}

/// Inspect the unauthenticated header of any supported file.
pub fn read_header(data: &[u8]) -> Result<HeaderInfo> {
    match header::identify(data)? {
        FileKind::Kdb => Ok(HeaderInfo::Kdb(kdb::KdbHeader::decode(data)?)),
        FileKind::Kdbx { .. } => Ok(HeaderInfo::Kdbx(OuterHeader::decode(data)?.0)),
    }
}

pub fn open(data: &[u8], key: &CompositeKey) -> Result<Database> {
    open_with_cancel(data, key, &CancelToken::new())
}

/// Open any supported file. Key derivation stops early once `cancel` is
/// triggered.
pub fn open_with_cancel(data: &[u8], key: &CompositeKey, cancel: &CancelToken) -> Result<Database> {
    let mut state = OpenState::Unopened;
    let result = drive_open(data, key, cancel, &mut state);
    if let Err(e) = &result {
        tracing::debug!(state = ?state, error = %e, "open failed");
        advance(&mut state, OpenState::Failed);
    }
    result
}

fn drive_open(
    data: &[u8],
    key: &CompositeKey,
    cancel: &CancelToken,
    state: &mut OpenState,
) -> Result<Database> {
    if header::identify(data)? == FileKind::Kdb {
        let db = kdb::open(data, key, cancel)?;
        advance(state, OpenState::Open);
        return Ok(db);
    }

    let read = HeaderRead::parse(data)?;
    advance(state, OpenState::HeaderRead);
    let authenticated = read.authenticate(key, cancel)?;
    advance(state, OpenState::HeaderAuthenticated);
    let decrypted = authenticated.decrypt_body()?;
    advance(state, OpenState::BodyDecrypted);
    let db = decrypted.into_database()?;
    advance(state, OpenState::Open);
    Ok(db)
}

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

/// Random values drawn for every save. Passing them explicitly makes the
/// output reproducible.
#[derive(Clone)]
pub struct WriteSeeds {
    pub master_seed: [u8; 32],
    pub iv: Vec<u8>,
    pub protected_stream_key: Vec<u8>,
    /// Only used by KDBX 3.1.
    pub stream_start_bytes: [u8; 32],
}

impl fmt::Debug for WriteSeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSeeds").finish_non_exhaustive()
    }
}

impl WriteSeeds {
    pub fn random(settings: &DatabaseSettings) -> Self {
        let mut rng = rand::rng();
        let mut seeds = Self {
            master_seed: [0u8; 32],
            iv: vec![0u8; settings.cipher.iv_len()],
            protected_stream_key: vec![
                0u8;
                match settings.version {
                    FormatVersion::Kdbx3 => 32,
                    FormatVersion::Kdbx4 => 64,
                }
            ],
            stream_start_bytes: [0u8; 32],
        };
        rng.fill_bytes(&mut seeds.master_seed);
        rng.fill_bytes(&mut seeds.iv);
        rng.fill_bytes(&mut seeds.protected_stream_key);
        rng.fill_bytes(&mut seeds.stream_start_bytes);
        seeds
    }
}

pub fn save(db: &Database, key: &CompositeKey) -> Result<Vec<u8>> {
    save_with_seeds(db, key, &WriteSeeds::random(&db.settings))
}

/// Serialize `db` in the format named by its settings. Nothing is written
/// for a database that breaks the model invariants.
pub fn save_with_seeds(db: &Database, key: &CompositeKey, seeds: &WriteSeeds) -> Result<Vec<u8>> {
    db.settings.validate()?;
    db.validate()?;
    let cancel = CancelToken::new();
    let bytes = match db.settings.version {
        FormatVersion::Kdbx4 => kdbx4::write(db, key, seeds, &cancel)?,
        FormatVersion::Kdbx3 => kdbx3::write(db, key, seeds, &cancel)?,
    };
    tracing::debug!(
        format = db.settings.version.name(),
        bytes = bytes.len(),
        entries = db.entry_count(),
        "database serialized"
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::Kdf;
    use crate::db::entry::PASSWORD;
    use crate::db::{Entry, Group};
    use crate::errors::ErrorKind;

    fn fast_settings(version: FormatVersion) -> DatabaseSettings {
        let mut settings = match version {
            FormatVersion::Kdbx3 => DatabaseSettings::kdbx3(16),
            FormatVersion::Kdbx4 => DatabaseSettings::default(),
        };
        settings.kdf = Kdf::aes(16);
        settings
    }

    fn sample(version: FormatVersion) -> Database {
        let mut db = Database::new(fast_settings(version));
        let root = db.root.uuid;
        let group = db.add_group(root, Group::new("Email")).unwrap();
        let mut entry = Entry::new();
        entry.set("Title", "Mailbox");
        entry.set(PASSWORD, "hunter2");
        db.add_entry(group, entry).unwrap();
        db
    }

    #[test]
    fn roundtrip_both_generations() {
        let key = CompositeKey::from_password("pw");
        for version in [FormatVersion::Kdbx3, FormatVersion::Kdbx4] {
            let db = sample(version);
            let bytes = save(&db, &key).unwrap();
            let opened = open(&bytes, &key).unwrap();
            assert_eq!(opened, db);
        }
    }

    #[test]
    fn explicit_seeds_are_reproducible() {
        let key = CompositeKey::from_password("pw");
        let db = sample(FormatVersion::Kdbx4);
        let seeds = WriteSeeds::random(&db.settings);
        let a = save_with_seeds(&db, &key, &seeds).unwrap();
        let b = save_with_seeds(&db, &key, &seeds).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_key_is_integrity_error() {
        for version in [FormatVersion::Kdbx3, FormatVersion::Kdbx4] {
            let bytes = save(&sample(version), &CompositeKey::from_password("right")).unwrap();
            let err = open(&bytes, &CompositeKey::from_password("wrong")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Integrity);
        }
    }

    #[test]
    fn typestate_exposes_header_before_key() {
        let db = sample(FormatVersion::Kdbx4);
        let key = CompositeKey::from_password("pw");
        let bytes = save(&db, &key).unwrap();

        let read = HeaderRead::parse(&bytes).unwrap();
        assert_eq!(read.header().cipher, db.settings.cipher);
        let body = read
            .authenticate(&key, &CancelToken::new())
            .unwrap()
            .decrypt_body()
            .unwrap();
        assert_eq!(body.into_database().unwrap(), db);
    }

    #[test]
    fn read_header_needs_no_key() {
        let db = sample(FormatVersion::Kdbx3);
        let bytes = save(&db, &CompositeKey::from_password("pw")).unwrap();
        match read_header(&bytes).unwrap() {
            HeaderInfo::Kdbx(header) => {
                assert_eq!(header.format(), FormatVersion::Kdbx3);
                assert_eq!(header.kdf, db.settings.kdf);
            }
            HeaderInfo::Kdb(_) => panic!("expected a KDBX header"),
        }
    }

    #[test]
    fn cancelled_open_reports_cancellation() {
        let key = CompositeKey::from_password("pw");
        let bytes = save(&sample(FormatVersion::Kdbx4), &key).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            open_with_cancel(&bytes, &key, &cancel),
            Err(KdbxError::Cancelled)
        ));
    }

    #[test]
    fn format_names() {
        assert_eq!(FormatVersion::from_name("KDBX3"), Some(FormatVersion::Kdbx3));
        assert_eq!(FormatVersion::from_name("4"), Some(FormatVersion::Kdbx4));
        assert_eq!(FormatVersion::from_name("kdb"), None);
        assert_eq!(FormatVersion::Kdbx4.to_string(), "KDBX 4.0");
    }
}
