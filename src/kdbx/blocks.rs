//! Block streams that carry the encrypted payload.
//!
//! KDBX 3.1 uses SHA-256 hashed blocks inside the ciphertext:
//!
//! ```text
//! [index: u32][sha256: 32][size: i32][data] ... (size 0, zero hash)
//! ```
//!
//! KDBX 4 uses HMAC-SHA256 authenticated blocks around the ciphertext:
//!
//! ```text
//! [hmac: 32][size: i32][data] ... (size 0)
//! ```
//!
//! Each block is verified before any of its bytes are handed out.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use subtle::ConstantTimeEq;

use super::bytes::ByteReader;
use crate::errors::{FormatError, KdbxError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Payload bytes per block when writing.
pub const BLOCK_SIZE: usize = 1024 * 1024;

/// Block index used to authenticate the KDBX 4 outer header.
pub const HEADER_BLOCK_INDEX: u64 = u64::MAX;

fn block_size(r: &mut ByteReader<'_>) -> Result<usize> {
    let size = r.i32("block size")?;
    usize::try_from(size).map_err(|_| FormatError::InvalidHeaderLength.into())
}

fn i32_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| KdbxError::SerializationError("block too large".into()))
}

// ---------------------------------------------------------------------------
// KDBX 3.1 hashed blocks
// ---------------------------------------------------------------------------

/// Verify and concatenate a hashed block stream.
pub fn read_hashed_blocks(data: &[u8]) -> Result<Vec<u8>> {
    let mut r = ByteReader::new(data);
    let mut out = Vec::with_capacity(data.len());
    let mut expected_index: u32 = 0;

    loop {
        let index = r.u32("block index")?;
        if index != expected_index {
            return Err(KdbxError::WrongKeyOrCorrupt);
        }
        let hash: [u8; 32] = r.array("block hash")?;
        let size = block_size(&mut r)?;

        if size == 0 {
            if hash.iter().any(|&b| b != 0) {
                return Err(KdbxError::WrongKeyOrCorrupt);
            }
            break;
        }

        let block = r.take(size, "block data")?;
        let actual = Sha256::digest(block);
        if !bool::from(actual.as_slice().ct_eq(&hash)) {
            return Err(KdbxError::WrongKeyOrCorrupt);
        }
        out.extend_from_slice(block);
        expected_index = expected_index.wrapping_add(1);
    }

    Ok(out)
}

pub fn write_hashed_blocks(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 64);
    let mut index: u32 = 0;
    for chunk in data.chunks(BLOCK_SIZE) {
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(&Sha256::digest(chunk));
        out.extend_from_slice(&i32_len(chunk.len())?.to_le_bytes());
        out.extend_from_slice(chunk);
        index += 1;
    }
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&[0u8; 32]);
    out.extend_from_slice(&0i32.to_le_bytes());
    Ok(out)
}

// ---------------------------------------------------------------------------
// KDBX 4 HMAC blocks
// ---------------------------------------------------------------------------

/// `SHA-512(index ‖ hmac_key)`: the per-block MAC key.
pub fn block_key(index: u64, hmac_key: &[u8; 64]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(index.to_le_bytes());
    hasher.update(hmac_key);
    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn block_mac(index: u64, hmac_key: &[u8; 64], data: &[u8]) -> Result<HmacSha256> {
    let key = block_key(index, hmac_key);
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
        .map_err(|e| KdbxError::EncryptionFailed(format!("HMAC init: {e}")))?;
    mac.update(&index.to_le_bytes());
    mac.update(&i32_len(data.len())?.to_le_bytes());
    mac.update(data);
    Ok(mac)
}

/// MAC over the raw outer header bytes.
pub fn header_hmac(hmac_key: &[u8; 64], header: &[u8]) -> Result<[u8; 32]> {
    let key = block_key(HEADER_BLOCK_INDEX, hmac_key);
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key)
        .map_err(|e| KdbxError::EncryptionFailed(format!("HMAC init: {e}")))?;
    mac.update(header);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Streaming reader that yields one authenticated block at a time.
pub struct HmacBlockReader<'a> {
    reader: ByteReader<'a>,
    hmac_key: &'a [u8; 64],
    index: u64,
    done: bool,
}

impl<'a> HmacBlockReader<'a> {
    pub fn new(data: &'a [u8], hmac_key: &'a [u8; 64]) -> Self {
        Self {
            reader: ByteReader::new(data),
            hmac_key,
            index: 0,
            done: false,
        }
    }

    /// The next block's data, `None` after the terminal block. A block that
    /// fails authentication yields an integrity error and none of its bytes.
    pub fn next_block(&mut self) -> Result<Option<&'a [u8]>> {
        if self.done {
            return Ok(None);
        }
        let tag: [u8; 32] = self.reader.array("block hmac")?;
        let size = block_size(&mut self.reader)?;
        let data = self.reader.take(size, "block data")?;

        block_mac(self.index, self.hmac_key, data)?
            .verify_slice(&tag)
            .map_err(|_| KdbxError::WrongKeyOrCorrupt)?;

        self.index += 1;
        if size == 0 {
            self.done = true;
            return Ok(None);
        }
        Ok(Some(data))
    }

    /// Read every block. On any failure nothing is returned.
    pub fn read_all(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(block) = self.next_block()? {
            out.extend_from_slice(block);
        }
        Ok(out)
    }
}

pub fn write_hmac_blocks(data: &[u8], hmac_key: &[u8; 64]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() + 64);
    let mut index: u64 = 0;
    for chunk in data.chunks(BLOCK_SIZE).chain(std::iter::once(&[][..])) {
        let tag = block_mac(index, hmac_key, chunk)?.finalize().into_bytes();
        out.extend_from_slice(&tag);
        out.extend_from_slice(&i32_len(chunk.len())?.to_le_bytes());
        out.extend_from_slice(chunk);
        index += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 64] = [0x11; 64];

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn hashed_roundtrip_multi_block() {
        let data = payload(BLOCK_SIZE + 100);
        let stream = write_hashed_blocks(&data).unwrap();
        assert_eq!(read_hashed_blocks(&stream).unwrap(), data);
    }

    #[test]
    fn hashed_tamper_is_integrity_error() {
        let data = payload(300);
        let mut stream = write_hashed_blocks(&data).unwrap();
        stream[50] ^= 1;
        assert!(matches!(
            read_hashed_blocks(&stream),
            Err(KdbxError::WrongKeyOrCorrupt)
        ));
    }

    #[test]
    fn hashed_out_of_order_index_is_rejected() {
        let mut stream = write_hashed_blocks(&payload(10)).unwrap();
        stream[0] = 5;
        assert!(matches!(
            read_hashed_blocks(&stream),
            Err(KdbxError::WrongKeyOrCorrupt)
        ));
    }

    #[test]
    fn hmac_roundtrip_including_empty_payload() {
        for len in [0, 10, BLOCK_SIZE, BLOCK_SIZE * 2 + 1] {
            let data = payload(len);
            let stream = write_hmac_blocks(&data, &KEY).unwrap();
            let read = HmacBlockReader::new(&stream, &KEY).read_all().unwrap();
            assert_eq!(read, data);
        }
    }

    #[test]
    fn hmac_tamper_only_fails_containing_block() {
        let data = payload(BLOCK_SIZE * 2 + 10);
        let mut stream = write_hmac_blocks(&data, &KEY).unwrap();
        // Flip a byte inside the second block's data.
        let second = 32 + 4 + BLOCK_SIZE;
        stream[second + 36 + 5] ^= 0xFF;

        let mut reader = HmacBlockReader::new(&stream, &KEY);
        assert_eq!(reader.next_block().unwrap().unwrap(), &data[..BLOCK_SIZE]);
        assert!(matches!(reader.next_block(), Err(KdbxError::WrongKeyOrCorrupt)));

        let all = HmacBlockReader::new(&stream, &KEY).read_all();
        assert!(matches!(all, Err(KdbxError::WrongKeyOrCorrupt)));
    }

    #[test]
    fn hmac_wrong_key_fails() {
        let stream = write_hmac_blocks(b"secret", &KEY).unwrap();
        let other = [0x22u8; 64];
        assert!(matches!(
            HmacBlockReader::new(&stream, &other).read_all(),
            Err(KdbxError::WrongKeyOrCorrupt)
        ));
    }

    #[test]
    fn header_mac_depends_on_key_and_bytes() {
        let a = header_hmac(&KEY, b"header").unwrap();
        assert_eq!(a, header_hmac(&KEY, b"header").unwrap());
        assert_ne!(a, header_hmac(&KEY, b"headex").unwrap());
        assert_ne!(a, header_hmac(&[0u8; 64], b"header").unwrap());
    }
}
