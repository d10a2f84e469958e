//! Composite master key built from password, key file and
//! challenge-response factors.
//!
//! Each factor contributes a 32-byte hash. The factors are always combined
//! in the same order: password, key file, challenge-response.

use std::fmt;

use bitflags::bitflags;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::keyfile::KeyFile;
use crate::errors::{KeySourceError, Result};

/// Length of every key factor hash and of the raw composite key.
pub const KEY_LEN: usize = 32;

/// Default number of attempts for a challenge-response token.
pub const DEFAULT_CHALLENGE_ATTEMPTS: u32 = 3;

bitflags! {
    /// Which factors a composite key holds.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeyFactors: u8 {
        const PASSWORD = 1;
        const KEY_FILE = 2;
        const CHALLENGE_RESPONSE = 4;
    }
}

/// Failure reported by a challenge-response provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    /// Device missing, busy or timed out. Worth retrying.
    Unavailable(String),
    /// The user or device refused. Never retried.
    Declined,
}

/// A hardware token (or anything else) that answers a challenge with a
/// deterministic response.
pub trait ChallengeResponse {
    fn name(&self) -> String;
    fn challenge(&self, challenge: &[u8]) -> std::result::Result<Vec<u8>, ChallengeError>;
}

/// The user's credentials, held as per-factor hashes.
pub struct CompositeKey {
    password: Option<Zeroizing<[u8; KEY_LEN]>>,
    // KeePass 1 hashes Latin-1 bytes when every char fits.
    legacy_password: Option<Zeroizing<[u8; KEY_LEN]>>,
    key_file: Option<Zeroizing<[u8; KEY_LEN]>>,
    challenge: Option<Box<dyn ChallengeResponse>>,
    attempts: u32,
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeKey")
            .field("factors", &self.factors())
            .finish_non_exhaustive()
    }
}

impl Default for CompositeKey {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositeKey {
    /// An empty key. At least one factor must be added before use.
    pub fn new() -> Self {
        Self {
            password: None,
            legacy_password: None,
            key_file: None,
            challenge: None,
            attempts: DEFAULT_CHALLENGE_ATTEMPTS,
        }
    }

    pub fn from_password(password: &str) -> Self {
        Self::new().with_password(password)
    }

    pub fn with_password(mut self, password: &str) -> Self {
        let mut hash = Zeroizing::new([0u8; KEY_LEN]);
        hash.copy_from_slice(&Sha256::digest(password.as_bytes()));
        self.password = Some(hash);

        let mut legacy = Zeroizing::new([0u8; KEY_LEN]);
        match latin1_bytes(password) {
            Some(bytes) => legacy.copy_from_slice(&Sha256::digest(&bytes[..])),
            None => legacy.copy_from_slice(&Sha256::digest(password.as_bytes())),
        }
        self.legacy_password = Some(legacy);
        self
    }

    pub fn with_key_file(mut self, key_file: &KeyFile) -> Self {
        self.key_file = Some(Zeroizing::new(*key_file.key()));
        self
    }

    pub fn with_challenge_response(mut self, provider: Box<dyn ChallengeResponse>) -> Self {
        self.challenge = Some(provider);
        self
    }

    /// How often an unavailable token is asked before giving up.
    pub fn with_challenge_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn factors(&self) -> KeyFactors {
        let mut factors = KeyFactors::empty();
        if self.password.is_some() {
            factors |= KeyFactors::PASSWORD;
        }
        if self.key_file.is_some() {
            factors |= KeyFactors::KEY_FILE;
        }
        if self.challenge.is_some() {
            factors |= KeyFactors::CHALLENGE_RESPONSE;
        }
        factors
    }

    fn ensure_factors(&self) -> Result<()> {
        if self.factors().is_empty() {
            return Err(KeySourceError::NoKeyFactors.into());
        }
        Ok(())
    }

    /// `SHA-256(password_hash ‖ key_file_key)` over the present factors.
    /// KDBX 3.1 folds the challenge-response into the final key instead.
    pub fn raw_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        self.ensure_factors()?;
        Ok(self.hash_factors(None))
    }

    /// KDBX 4 composite: the challenge-response contribution joins the
    /// same hash, with the KDF seed as the challenge.
    pub fn raw_key_with_challenge(&self, kdf_seed: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        self.ensure_factors()?;
        let response = self.challenge_hash(kdf_seed)?;
        Ok(self.hash_factors(response.as_deref()))
    }

    fn hash_factors(&self, challenge: Option<&[u8; KEY_LEN]>) -> Zeroizing<[u8; KEY_LEN]> {
        let mut hasher = Sha256::new();
        if let Some(pw) = &self.password {
            hasher.update(&pw[..]);
        }
        if let Some(kf) = &self.key_file {
            hasher.update(&kf[..]);
        }
        if let Some(cr) = challenge {
            hasher.update(cr);
        }
        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        out.copy_from_slice(&hasher.finalize());
        out
    }

    /// `SHA-256(response)` for the given challenge, or `None` without a
    /// challenge-response factor.
    pub fn challenge_hash(&self, challenge: &[u8]) -> Result<Option<Zeroizing<[u8; KEY_LEN]>>> {
        let Some(provider) = &self.challenge else {
            return Ok(None);
        };

        let name = provider.name();
        let mut last_reason = String::new();
        for attempt in 1..=self.attempts {
            match provider.challenge(challenge) {
                Ok(response) => {
                    let response = Zeroizing::new(response);
                    let mut out = Zeroizing::new([0u8; KEY_LEN]);
                    out.copy_from_slice(&Sha256::digest(&response[..]));
                    return Ok(Some(out));
                }
                Err(ChallengeError::Declined) => {
                    return Err(KeySourceError::HardwareDeclined(name).into());
                }
                Err(ChallengeError::Unavailable(reason)) => {
                    tracing::warn!(token = %name, attempt, %reason, "challenge-response token unavailable");
                    last_reason = reason;
                }
            }
        }

        Err(KeySourceError::HardwareUnavailable {
            name,
            attempts: self.attempts,
            reason: last_reason,
        }
        .into())
    }

    /// Raw key for KeePass 1 files. A single factor is used as is; both
    /// factors are hashed together.
    pub fn legacy_raw_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let mut out = Zeroizing::new([0u8; KEY_LEN]);
        match (&self.legacy_password, &self.key_file) {
            (Some(pw), Some(kf)) => {
                let mut hasher = Sha256::new();
                hasher.update(&pw[..]);
                hasher.update(&kf[..]);
                out.copy_from_slice(&hasher.finalize());
            }
            (Some(pw), None) => out.copy_from_slice(&pw[..]),
            (None, Some(kf)) => out.copy_from_slice(&kf[..]),
            (None, None) => return Err(KeySourceError::NoKeyFactors.into()),
        }
        Ok(out)
    }
}

fn latin1_bytes(s: &str) -> Option<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(Vec::with_capacity(s.len()));
    for c in s.chars() {
        let code = u32::from(c);
        if code > 0xFF {
            return None;
        }
        out.push(code as u8);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KdbxError;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FakeToken {
        calls: Rc<Cell<u32>>,
        fail_times: u32,
        outcome: ChallengeError,
    }

    impl ChallengeResponse for FakeToken {
        fn name(&self) -> String {
            "fake".into()
        }

        fn challenge(&self, challenge: &[u8]) -> std::result::Result<Vec<u8>, ChallengeError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n <= self.fail_times {
                Err(self.outcome.clone())
            } else {
                Ok(challenge.iter().rev().copied().collect())
            }
        }
    }

    fn token(fail_times: u32, outcome: ChallengeError) -> (Box<FakeToken>, Rc<Cell<u32>>) {
        let calls = Rc::new(Cell::new(0));
        (
            Box::new(FakeToken {
                calls: calls.clone(),
                fail_times,
                outcome,
            }),
            calls,
        )
    }

    #[test]
    fn no_factors_is_an_error() {
        let key = CompositeKey::new();
        assert!(matches!(
            key.raw_key(),
            Err(KdbxError::KeySource(KeySourceError::NoKeyFactors))
        ));
    }

    #[test]
    fn password_only_is_hash_of_hash() {
        let key = CompositeKey::from_password("secret");
        let inner = Sha256::digest(b"secret");
        let expected = Sha256::digest(inner);
        assert_eq!(&key.raw_key().unwrap()[..], &expected[..]);
        assert_eq!(key.factors(), KeyFactors::PASSWORD);
    }

    #[test]
    fn factor_order_is_fixed() {
        let kf = KeyFile::from_bytes(&[1u8; 32]).unwrap();
        let key = CompositeKey::from_password("pw").with_key_file(&kf);

        let mut hasher = Sha256::new();
        hasher.update(Sha256::digest(b"pw"));
        hasher.update([1u8; 32]);
        assert_eq!(&key.raw_key().unwrap()[..], &hasher.finalize()[..]);
    }

    #[test]
    fn unavailable_token_is_retried() {
        let (tok, calls) = token(2, ChallengeError::Unavailable("busy".into()));
        let key = CompositeKey::from_password("pw").with_challenge_response(tok);
        assert!(key.raw_key_with_challenge(b"seed").is_ok());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn exhausted_attempts_are_hardware_errors() {
        let (tok, calls) = token(10, ChallengeError::Unavailable("gone".into()));
        let key = CompositeKey::from_password("pw")
            .with_challenge_response(tok)
            .with_challenge_attempts(2);
        let err = key.raw_key_with_challenge(b"seed").unwrap_err();
        assert!(matches!(
            err,
            KdbxError::KeySource(KeySourceError::HardwareUnavailable { attempts: 2, .. })
        ));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn declined_is_not_retried() {
        let (tok, calls) = token(10, ChallengeError::Declined);
        let key = CompositeKey::new().with_challenge_response(tok);
        let err = key.raw_key_with_challenge(b"seed").unwrap_err();
        assert!(matches!(
            err,
            KdbxError::KeySource(KeySourceError::HardwareDeclined(_))
        ));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn challenge_changes_the_key() {
        let (tok, _) = token(0, ChallengeError::Declined);
        let with_cr = CompositeKey::from_password("pw").with_challenge_response(tok);
        let without = CompositeKey::from_password("pw");
        assert_ne!(
            with_cr.raw_key_with_challenge(b"seed").unwrap()[..],
            without.raw_key_with_challenge(b"seed").unwrap()[..]
        );
    }

    #[test]
    fn legacy_key_uses_latin1() {
        let key = CompositeKey::from_password("caf\u{e9}");
        let expected = Sha256::digest([b'c', b'a', b'f', 0xE9]);
        assert_eq!(&key.legacy_raw_key().unwrap()[..], &expected[..]);

        let key = CompositeKey::from_password("\u{4e2d}");
        let expected = Sha256::digest("\u{4e2d}".as_bytes());
        assert_eq!(&key.legacy_raw_key().unwrap()[..], &expected[..]);
    }
}
