//! KDBX 4 pipeline.
//!
//! ```text
//! [outer header][sha256(header)][hmac(header)][hmac block stream]
//!                                              `- encrypt(compress(inner header ‖ xml))
//! ```

use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::blocks::{header_hmac, write_hmac_blocks, HmacBlockReader};
use super::bytes::ByteReader;
use super::header::{OuterHeader, VERSION_KDBX4};
use super::inner_header::InnerHeader;
use super::xml::{write_document, BinaryPool};
use super::{Payload, WriteSeeds};
use crate::crypto::{CancelToken, CompositeKey, ProtectedStream};
use crate::db::Database;
use crate::errors::{KdbxError, Result};

/// Keys used for the body of a KDBX 4 file.
pub(crate) struct Keys {
    pub final_key: Zeroizing<[u8; 32]>,
    pub hmac_key: Zeroizing<[u8; 64]>,
}

pub(crate) fn derive_keys(
    master_seed: &[u8; 32],
    header: &OuterHeader,
    key: &CompositeKey,
    cancel: &CancelToken,
) -> Result<Keys> {
    let raw = key.raw_key_with_challenge(header.kdf.seed())?;
    let transformed = Zeroizing::new(header.kdf.transform(&raw, cancel)?);

    let mut final_key = Zeroizing::new([0u8; 32]);
    let mut hasher = Sha256::new();
    hasher.update(master_seed);
    hasher.update(&transformed[..]);
    final_key.copy_from_slice(&hasher.finalize());

    let mut hmac_key = Zeroizing::new([0u8; 64]);
    let mut hasher = Sha512::new();
    hasher.update(master_seed);
    hasher.update(&transformed[..]);
    hasher.update([0x01]);
    hmac_key.copy_from_slice(&hasher.finalize());

    Ok(Keys {
        final_key,
        hmac_key,
    })
}

/// Check the header checksum, derive the keys and verify the header MAC.
/// Returns the keys and the offset of the block stream.
pub(crate) fn authenticate(
    data: &[u8],
    header: &OuterHeader,
    header_len: usize,
    key: &CompositeKey,
    cancel: &CancelToken,
) -> Result<(Keys, usize)> {
    let raw_header = &data[..header_len];
    let mut r = ByteReader::at(data, header_len);
    let checksum: [u8; 32] = r.array("header checksum")?;
    let mac: [u8; 32] = r.array("header hmac")?;

    if !bool::from(Sha256::digest(raw_header).as_slice().ct_eq(&checksum)) {
        return Err(KdbxError::WrongKeyOrCorrupt);
    }

    let keys = derive_keys(&header.master_seed, header, key, cancel)?;
    let expected = header_hmac(&keys.hmac_key, raw_header)?;
    if !bool::from(expected.ct_eq(&mac)) {
        return Err(KdbxError::WrongKeyOrCorrupt);
    }
    Ok((keys, r.pos()))
}

pub(crate) fn decrypt_body(header: &OuterHeader, keys: &Keys, body: &[u8]) -> Result<Payload> {
    let ciphertext = HmacBlockReader::new(body, &keys.hmac_key).read_all()?;
    let compressed = Zeroizing::new(header.cipher.decrypt(&keys.final_key[..], &header.iv, &ciphertext)?);
    let plain = Zeroizing::new(header.compression.decompress(&compressed)?);

    let (inner, offset) = InnerHeader::decode(&plain)?;
    let stream = ProtectedStream::new(inner.protected_stream, &inner.protected_stream_key)?;
    Ok(Payload {
        xml: Zeroizing::new(plain[offset..].to_vec()),
        binaries: inner.binaries,
        protected_stream: inner.protected_stream,
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
    let header = OuterHeader {
        version: VERSION_KDBX4,
        cipher: settings.cipher,
        compression: settings.compression,
        master_seed: seeds.master_seed,
        iv: seeds.iv.clone(),
        kdf: settings.kdf.clone(),
        comment: None,
        public_custom_data: Some(settings.public_custom_data.clone()),
        kdbx3: None,
    };
    let header_bytes = header.encode()?;
    let keys = derive_keys(&seeds.master_seed, &header, key, cancel)?;

    let pool = BinaryPool::collect(&db.root);
    let inner = InnerHeader {
        protected_stream: settings.protected_stream,
        protected_stream_key: seeds.protected_stream_key.clone(),
        binaries: pool.binaries.clone(),
    };
    let mut stream = ProtectedStream::new(inner.protected_stream, &inner.protected_stream_key)?;
    let xml = Zeroizing::new(write_document(db, &mut stream, &pool, None)?);

    let mut plain = Zeroizing::new(inner.encode()?);
    plain.extend_from_slice(&xml);
    let compressed = Zeroizing::new(settings.compression.compress(&plain)?);
    let ciphertext = settings
        .cipher
        .encrypt(&keys.final_key[..], &seeds.iv, &compressed)?;

    let mut out = header_bytes;
    let checksum = Sha256::digest(&out);
    let mac = header_hmac(&keys.hmac_key, &out)?;
    out.extend_from_slice(&checksum);
    out.extend_from_slice(&mac);
    out.extend_from_slice(&write_hmac_blocks(&ciphertext, &keys.hmac_key)?);
    Ok(out)
}
