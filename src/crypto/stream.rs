//! Inner random stream used for protected values inside the payload.
//!
//! The stream is stateful: every protected value consumes keystream bytes,
//! so values must be processed in exactly the order they appear in the
//! document. A single `ProtectedStream` is threaded through the tree walk.

use cbc::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use salsa20::Salsa20;
use sha2::{Digest, Sha256, Sha512};

use crate::errors::{KdbxError, Result, Unsupported};

/// Fixed Salsa20 nonce used by KeePass for protected values.
const SALSA20_NONCE: [u8; 8] = [0xE8, 0x30, 0x09, 0x4B, 0x97, 0x20, 0x5D, 0x2A];

/// Protected-value stream cipher identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectedStreamAlgorithm {
    None,
    Salsa20,
    ChaCha20,
}

impl ProtectedStreamAlgorithm {
    pub fn id(self) -> u32 {
        match self {
            ProtectedStreamAlgorithm::None => 0,
            ProtectedStreamAlgorithm::Salsa20 => 2,
            ProtectedStreamAlgorithm::ChaCha20 => 3,
        }
    }

    /// `1` is ArcFour, which is unsafe and not supported.
    pub fn from_id(id: u32) -> Result<Self> {
        match id {
            0 => Ok(ProtectedStreamAlgorithm::None),
            2 => Ok(ProtectedStreamAlgorithm::Salsa20),
            3 => Ok(ProtectedStreamAlgorithm::ChaCha20),
            other => Err(Unsupported::ProtectedStream(other).into()),
        }
    }
}

/// Running keystream state.
pub enum ProtectedStream {
    None,
    Salsa20(Box<Salsa20>),
    ChaCha20(Box<ChaCha20>),
}

impl ProtectedStream {
    pub fn new(algorithm: ProtectedStreamAlgorithm, key: &[u8]) -> Result<Self> {
        let init_err =
            |e: cbc::cipher::InvalidLength| KdbxError::EncryptionFailed(format!("stream init: {e}"));
        match algorithm {
            ProtectedStreamAlgorithm::None => Ok(ProtectedStream::None),
            ProtectedStreamAlgorithm::Salsa20 => {
                let hashed = Sha256::digest(key);
                let cipher = Salsa20::new_from_slices(&hashed, &SALSA20_NONCE).map_err(init_err)?;
                Ok(ProtectedStream::Salsa20(Box::new(cipher)))
            }
            ProtectedStreamAlgorithm::ChaCha20 => {
                let hashed = Sha512::digest(key);
                let cipher =
                    ChaCha20::new_from_slices(&hashed[..32], &hashed[32..44]).map_err(init_err)?;
                Ok(ProtectedStream::ChaCha20(Box::new(cipher)))
            }
        }
    }

    /// XOR `data` in place with the next keystream bytes.
    pub fn process(&mut self, data: &mut [u8]) {
        match self {
            ProtectedStream::None => {}
            ProtectedStream::Salsa20(c) => c.apply_keystream(data),
            ProtectedStream::ChaCha20(c) => c.apply_keystream(data),
        }
    }
}
