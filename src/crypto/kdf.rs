//! Key derivation: AES-KDF and Argon2 (d / id).
//!
//! Both functions turn the 32-byte composite key into a 32-byte transformed
//! key. Parameters travel in the KDBX 4 header as a `VariantMap`; KDBX 3.1
//! stores AES-KDF seed and rounds in dedicated header fields instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes256;
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::errors::{KdbxError, Result, Unsupported};
use crate::kdbx::variant_map::{Variant, VariantMap};

/// Length of the transformed key (256 bits).
pub const KEY_LEN: usize = 32;

const AES_KDF_UUID: Uuid = Uuid::from_bytes([
    0xc9, 0xd9, 0xf3, 0x9a, 0x62, 0x8a, 0x44, 0x60, 0xbf, 0x74, 0x0d, 0x08, 0xc1, 0x8a, 0x4f, 0xea,
]);
const ARGON2D_UUID: Uuid = Uuid::from_bytes([
    0xef, 0x63, 0x6d, 0xdf, 0x8c, 0x29, 0x44, 0x4b, 0x91, 0xf7, 0xa9, 0xa4, 0x03, 0xe3, 0x0a, 0x0c,
]);
const ARGON2ID_UUID: Uuid = Uuid::from_bytes([
    0x9e, 0x29, 0x8b, 0x19, 0x56, 0xdb, 0x47, 0x73, 0xb2, 0x3d, 0xfc, 0x3e, 0xc6, 0xf0, 0xa1, 0xe6,
]);

// Variant map parameter names.
const PARAM_UUID: &str = "$UUID";
const PARAM_ROUNDS: &str = "R";
const PARAM_SEED: &str = "S";
const PARAM_PARALLELISM: &str = "P";
const PARAM_MEMORY: &str = "M";
const PARAM_ITERATIONS: &str = "I";
const PARAM_VERSION: &str = "V";

/// AES-KDF seed length.
const AES_SEED_LEN: usize = 32;

/// Rounds between two cancellation checks in AES-KDF.
const CANCEL_CHECK_ROUNDS: u64 = 65_536;

const ARGON2_MIN_SALT: usize = 8;
const ARGON2_MAX_SALT: usize = 64;
const ARGON2_MAX_PARALLELISM: u32 = 0x00FF_FFFF;
const ARGON2_MIN_MEMORY_KIB_PER_LANE: u64 = 8;
const ARGON2_VERSION_10: u32 = 0x10;
const ARGON2_VERSION_13: u32 = 0x13;

/// Cooperative cancellation flag shared between a caller and a long
/// running key derivation or benchmark.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(KdbxError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Argon2Variant {
    Argon2d,
    Argon2id,
}

/// Key derivation function with the parameters it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kdf {
    AesKdf {
        rounds: u64,
        seed: [u8; AES_SEED_LEN],
    },
    Argon2 {
        variant: Argon2Variant,
        salt: Vec<u8>,
        /// Memory cost in bytes, as stored on disk.
        memory_bytes: u64,
        iterations: u64,
        parallelism: u32,
        version: u32,
    },
}

impl Kdf {
    /// AES-KDF with a random seed.
    pub fn aes(rounds: u64) -> Self {
        let mut seed = [0u8; AES_SEED_LEN];
        rand::rng().fill_bytes(&mut seed);
        Kdf::AesKdf { rounds, seed }
    }

    /// Argon2 with a random 32-byte salt and version 0x13.
    ///
    /// A memory cost too large for the byte count saturates and is then
    /// rejected by [`Kdf::validate`].
    pub fn argon2(variant: Argon2Variant, memory_kib: u64, iterations: u64, parallelism: u32) -> Self {
        let mut salt = vec![0u8; 32];
        rand::rng().fill_bytes(&mut salt);
        Kdf::Argon2 {
            variant,
            salt,
            memory_bytes: memory_kib.saturating_mul(1024),
            iterations,
            parallelism,
            version: ARGON2_VERSION_13,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Kdf::AesKdf { .. } => AES_KDF_UUID,
            Kdf::Argon2 {
                variant: Argon2Variant::Argon2d,
                ..
            } => ARGON2D_UUID,
            Kdf::Argon2 {
                variant: Argon2Variant::Argon2id,
                ..
            } => ARGON2ID_UUID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kdf::AesKdf { .. } => "AES-KDF",
            Kdf::Argon2 {
                variant: Argon2Variant::Argon2d,
                ..
            } => "Argon2d",
            Kdf::Argon2 {
                variant: Argon2Variant::Argon2id,
                ..
            } => "Argon2id",
        }
    }

    /// The seed handed to a challenge-response token in KDBX 4.
    pub fn seed(&self) -> &[u8] {
        match self {
            Kdf::AesKdf { seed, .. } => seed,
            Kdf::Argon2 { salt, .. } => salt,
        }
    }

    /// Replace the seed/salt with fresh random bytes of the same length.
    pub fn randomize_seed(&mut self) {
        match self {
            Kdf::AesKdf { seed, .. } => rand::rng().fill_bytes(seed),
            Kdf::Argon2 { salt, .. } => rand::rng().fill_bytes(salt),
        }
    }

    /// Build a KDF from header parameters. Absent parameters are reported,
    /// never defaulted.
    pub fn from_variant_map(map: &VariantMap) -> Result<Self> {
        let uuid_bytes = map
            .get_bytes(PARAM_UUID)
            .ok_or(KdbxError::MissingKdfParameter(PARAM_UUID))?;
        let uuid = Uuid::from_slice(uuid_bytes)
            .map_err(|_| KdbxError::MissingKdfParameter(PARAM_UUID))?;

        let kdf = match uuid {
            AES_KDF_UUID => {
                let rounds = map
                    .get_u64(PARAM_ROUNDS)
                    .ok_or(KdbxError::MissingKdfParameter(PARAM_ROUNDS))?;
                let seed_bytes = map
                    .get_bytes(PARAM_SEED)
                    .ok_or(KdbxError::MissingKdfParameter(PARAM_SEED))?;
                let seed: [u8; AES_SEED_LEN] =
                    seed_bytes
                        .try_into()
                        .map_err(|_| KdbxError::KdfParameterOutOfBounds {
                            name: PARAM_SEED,
                            value: seed_bytes.len() as u64,
                            bounds: "exactly 32 bytes",
                        })?;
                Kdf::AesKdf { rounds, seed }
            }
            ARGON2D_UUID | ARGON2ID_UUID => {
                let variant = if uuid == ARGON2D_UUID {
                    Argon2Variant::Argon2d
                } else {
                    Argon2Variant::Argon2id
                };
                Kdf::Argon2 {
                    variant,
                    salt: map
                        .get_bytes(PARAM_SEED)
                        .ok_or(KdbxError::MissingKdfParameter(PARAM_SEED))?
                        .to_vec(),
                    memory_bytes: map
                        .get_u64(PARAM_MEMORY)
                        .ok_or(KdbxError::MissingKdfParameter(PARAM_MEMORY))?,
                    iterations: map
                        .get_u64(PARAM_ITERATIONS)
                        .ok_or(KdbxError::MissingKdfParameter(PARAM_ITERATIONS))?,
                    parallelism: map
                        .get_u32(PARAM_PARALLELISM)
                        .ok_or(KdbxError::MissingKdfParameter(PARAM_PARALLELISM))?,
                    version: map
                        .get_u32(PARAM_VERSION)
                        .ok_or(KdbxError::MissingKdfParameter(PARAM_VERSION))?,
                }
            }
            other => return Err(Unsupported::Kdf(other).into()),
        };

        kdf.validate()?;
        Ok(kdf)
    }

    pub fn to_variant_map(&self) -> VariantMap {
        let mut map = VariantMap::new();
        map.insert(PARAM_UUID, Variant::ByteArray(self.uuid().as_bytes().to_vec()));
        match self {
            Kdf::AesKdf { rounds, seed } => {
                map.insert(PARAM_ROUNDS, Variant::UInt64(*rounds));
                map.insert(PARAM_SEED, Variant::ByteArray(seed.to_vec()));
            }
            Kdf::Argon2 {
                salt,
                memory_bytes,
                iterations,
                parallelism,
                version,
                ..
            } => {
                map.insert(PARAM_SEED, Variant::ByteArray(salt.clone()));
                map.insert(PARAM_MEMORY, Variant::UInt64(*memory_bytes));
                map.insert(PARAM_ITERATIONS, Variant::UInt64(*iterations));
                map.insert(PARAM_PARALLELISM, Variant::UInt32(*parallelism));
                map.insert(PARAM_VERSION, Variant::UInt32(*version));
            }
        }
        map
    }

    /// Check every parameter against the supported bounds.
    pub fn validate(&self) -> Result<()> {
        match self {
            Kdf::AesKdf { rounds, .. } => {
                if *rounds == 0 {
                    return Err(out_of_bounds(PARAM_ROUNDS, 0, "at least 1"));
                }
            }
            Kdf::Argon2 {
                salt,
                memory_bytes,
                iterations,
                parallelism,
                version,
                ..
            } => {
                if *version != ARGON2_VERSION_10 && *version != ARGON2_VERSION_13 {
                    return Err(Unsupported::Argon2Version(*version).into());
                }
                if salt.len() < ARGON2_MIN_SALT || salt.len() > ARGON2_MAX_SALT {
                    return Err(out_of_bounds(PARAM_SEED, salt.len() as u64, "8 to 64 bytes"));
                }
                if *parallelism == 0 || *parallelism > ARGON2_MAX_PARALLELISM {
                    return Err(out_of_bounds(
                        PARAM_PARALLELISM,
                        u64::from(*parallelism),
                        "1 to 16777215",
                    ));
                }
                let memory_kib = memory_bytes / 1024;
                if memory_bytes % 1024 != 0
                    || memory_kib < ARGON2_MIN_MEMORY_KIB_PER_LANE * u64::from(*parallelism)
                    || memory_kib > u64::from(u32::MAX)
                {
                    return Err(out_of_bounds(
                        PARAM_MEMORY,
                        *memory_bytes,
                        "whole KiB, at least 8 KiB per lane, at most 4 TiB",
                    ));
                }
                if *iterations == 0 || *iterations > u64::from(u32::MAX) {
                    return Err(out_of_bounds(PARAM_ITERATIONS, *iterations, "1 to 4294967295"));
                }
            }
        }
        Ok(())
    }

    /// Derive the transformed key. Identical inputs always give identical
    /// output.
    pub fn transform(&self, secret: &[u8; KEY_LEN], cancel: &CancelToken) -> Result<[u8; KEY_LEN]> {
        self.validate()?;
        cancel.check()?;
        let started = Instant::now();

        let key = match self {
            Kdf::AesKdf { rounds, seed } => aes_transform(secret, seed, *rounds, cancel)?,
            Kdf::Argon2 {
                variant,
                salt,
                memory_bytes,
                iterations,
                parallelism,
                version,
            } => {
                let algorithm = match variant {
                    Argon2Variant::Argon2d => Algorithm::Argon2d,
                    Argon2Variant::Argon2id => Algorithm::Argon2id,
                };
                let version = if *version == ARGON2_VERSION_10 {
                    Version::V0x10
                } else {
                    Version::V0x13
                };
                // Bounds were checked by `validate`, so the narrowing is exact.
                let params = Params::new(
                    (memory_bytes / 1024) as u32,
                    *iterations as u32,
                    *parallelism,
                    Some(KEY_LEN),
                )
                .map_err(|e| KdbxError::KeyDerivationFailed(format!("invalid Argon2 params: {e}")))?;

                let mut key = [0u8; KEY_LEN];
                Argon2::new(algorithm, version, params)
                    .hash_password_into(secret, salt, &mut key)
                    .map_err(|e| KdbxError::KeyDerivationFailed(format!("Argon2 hashing failed: {e}")))?;
                cancel.check()?;
                key
            }
        };

        tracing::debug!(
            kdf = self.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "key transformed"
        );
        Ok(key)
    }
}

fn out_of_bounds(name: &'static str, value: u64, bounds: &'static str) -> KdbxError {
    KdbxError::KdfParameterOutOfBounds { name, value, bounds }
}

/// Run `rounds` AES-256-ECB encryptions over both halves of the secret, then
/// hash the result.
pub(crate) fn aes_transform(
    secret: &[u8; KEY_LEN],
    seed: &[u8; AES_SEED_LEN],
    rounds: u64,
    cancel: &CancelToken,
) -> Result<[u8; KEY_LEN]> {
    let cipher = Aes256::new(GenericArray::from_slice(seed));
    let mut blocks = [
        GenericArray::clone_from_slice(&secret[..16]),
        GenericArray::clone_from_slice(&secret[16..]),
    ];

    let mut done = 0u64;
    while done < rounds {
        cancel.check()?;
        let batch = (rounds - done).min(CANCEL_CHECK_ROUNDS);
        for _ in 0..batch {
            cipher.encrypt_blocks(&mut blocks);
        }
        done += batch;
    }

    let mut hasher = Sha256::new();
    hasher.update(blocks[0]);
    hasher.update(blocks[1]);
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&hasher.finalize());
    for block in blocks.iter_mut() {
        block.as_mut_slice().zeroize();
    }
    Ok(out)
}
