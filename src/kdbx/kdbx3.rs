//! KDBX 3.1 pipeline.
//!
//! ```text
//! [outer header][encrypt(start bytes ‖ hashed blocks(compress(xml)))]
//! ```
//!
//! There is no header MAC. A wrong key shows up as bad padding or as
//! mismatching stream start bytes, and `Meta/HeaderHash` ties the header to
//! the payload.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::blocks::{read_hashed_blocks, write_hashed_blocks};
use super::header::{Kdbx3Fields, OuterHeader, VERSION_KDBX3_1};
use super::xml::{write_document, BinaryPool};
use super::{Payload, WriteSeeds};
use crate::crypto::{CancelToken, CompositeKey, ProtectedStream};
use crate::db::Database;
use crate::errors::{FormatError, KdbxError, Result};

const STREAM_START_LEN: usize = 32;
const PROTECTED_STREAM_KEY_LEN: usize = 32;

/// `SHA-256(master_seed ‖ [SHA-256(response)] ‖ transformed)`. The
/// challenge-response factor is asked with the master seed.
pub(crate) fn derive_key(
    header: &OuterHeader,
    key: &CompositeKey,
    cancel: &CancelToken,
) -> Result<Zeroizing<[u8; 32]>> {
    let raw = key.raw_key()?;
    let transformed = Zeroizing::new(header.kdf.transform(&raw, cancel)?);
    let response = key.challenge_hash(&header.master_seed)?;

    let mut hasher = Sha256::new();
    hasher.update(header.master_seed);
    if let Some(response) = &response {
        hasher.update(&response[..]);
    }
    hasher.update(&transformed[..]);
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

fn legacy_fields(header: &OuterHeader) -> Result<&Kdbx3Fields> {
    header
        .kdbx3
        .as_ref()
        .ok_or(FormatError::MissingHeaderField("stream start bytes").into())
}

pub(crate) fn decrypt_body(header: &OuterHeader, final_key: &[u8; 32], body: &[u8]) -> Result<Payload> {
    let fields = legacy_fields(header)?;
    let plain = Zeroizing::new(header.cipher.decrypt(final_key, &header.iv, body)?);

    if plain.len() < STREAM_START_LEN {
        return Err(KdbxError::WrongKeyOrCorrupt);
    }
    let (start, blocks) = plain.split_at(STREAM_START_LEN);
    if !bool::from(start.ct_eq(&fields.stream_start_bytes)) {
        return Err(KdbxError::WrongKeyOrCorrupt);
    }

    let compressed = Zeroizing::new(read_hashed_blocks(blocks)?);
    let xml = Zeroizing::new(header.compression.decompress(&compressed)?);
    let stream = ProtectedStream::new(fields.protected_stream, &fields.protected_stream_key)?;
    Ok(Payload {
        xml,
        // Filled from `Meta/Binaries` while parsing.
        binaries: Vec::new(),
        protected_stream: fields.protected_stream,
        stream,
    })
}

pub(crate) fn write(
    db: &Database,
    key: &CompositeKey,
    seeds: &WriteSeeds,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let settings = &db.settings;
    if seeds.protected_stream_key.len() != PROTECTED_STREAM_KEY_LEN {
        return Err(KdbxError::EncryptionFailed(format!(
            "KDBX 3.1 protected stream key must be {PROTECTED_STREAM_KEY_LEN} bytes"
        )));
    }

    let header = OuterHeader {
        version: VERSION_KDBX3_1,
        cipher: settings.cipher,
        compression: settings.compression,
        master_seed: seeds.master_seed,
        iv: seeds.iv.clone(),
        kdf: settings.kdf.clone(),
        comment: None,
        public_custom_data: None,
        kdbx3: Some(Kdbx3Fields {
            protected_stream_key: seeds.protected_stream_key.clone(),
            stream_start_bytes: seeds.stream_start_bytes,
            protected_stream: settings.protected_stream,
        }),
    };
    let header_bytes = header.encode()?;
    let header_hash = Sha256::digest(&header_bytes);
    let final_key = derive_key(&header, key, cancel)?;

    let pool = BinaryPool::collect(&db.root);
    let mut stream = ProtectedStream::new(settings.protected_stream, &seeds.protected_stream_key)?;
    let xml = Zeroizing::new(write_document(db, &mut stream, &pool, Some(header_hash.as_slice()))?);
    let compressed = Zeroizing::new(settings.compression.compress(&xml)?);

    let mut plain = Zeroizing::new(Vec::with_capacity(compressed.len() + 128));
    plain.extend_from_slice(&seeds.stream_start_bytes);
    plain.extend_from_slice(&write_hashed_blocks(&compressed)?);
    let ciphertext = settings.cipher.encrypt(&final_key[..], &seeds.iv, &plain)?;

    let mut out = header_bytes;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}
