//! Cryptographic building blocks.
//!
//! - Body ciphers (`cipher`) and the protected-value stream (`stream`)
//! - Key derivation and calibration (`kdf`, `benchmark`)
//! - Key factors and the composite key (`keyfile`, `keys`)

pub mod benchmark;
pub mod cipher;
pub mod kdf;
pub mod keyfile;
pub mod keys;
pub mod stream;

pub use benchmark::calibrate;
pub use cipher::Cipher;
pub use kdf::{Argon2Variant, CancelToken, Kdf};
pub use keyfile::{KeyFile, KeyFileKind};
pub use keys::{ChallengeError, ChallengeResponse, CompositeKey, KeyFactors};
pub use stream::{ProtectedStream, ProtectedStreamAlgorithm};
