//! Outer symmetric ciphers for the container body.
//!
//! AES-256 and Twofish run in CBC mode with PKCS#7 padding; ChaCha20 is the
//! IETF variant (96-bit nonce) applied as a keystream.
//!
//! A padding failure on decrypt is reported as `WrongKeyOrCorrupt`: with a
//! wrong key the last block decrypts to garbage, and callers must not be
//! able to tell that apart from any other integrity failure.

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use twofish::Twofish;
use uuid::Uuid;

use crate::errors::{FormatError, KdbxError, Result, Unsupported};

const AES256_UUID: Uuid = Uuid::from_bytes([
    0x31, 0xc1, 0xf2, 0xe6, 0xbf, 0x71, 0x43, 0x50, 0xbe, 0x58, 0x05, 0x21, 0x6a, 0xfc, 0x5a, 0xff,
]);
const TWOFISH_UUID: Uuid = Uuid::from_bytes([
    0xad, 0x68, 0xf2, 0x9f, 0x57, 0x6f, 0x4b, 0xb9, 0xa3, 0x6a, 0xd4, 0x7a, 0xf9, 0x65, 0x34, 0x6c,
]);
const CHACHA20_UUID: Uuid = Uuid::from_bytes([
    0xd6, 0x03, 0x8a, 0x2b, 0x8b, 0x6f, 0x4c, 0xb5, 0xa5, 0x24, 0x33, 0x9a, 0x31, 0xdb, 0xb5, 0x9a,
]);

/// Block size shared by AES and Twofish.
const BLOCK_LEN: usize = 16;

/// Length of the body key for every supported cipher.
pub const KEY_LEN: usize = 32;

/// Symmetric cipher selected by the header's cipher UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cipher {
    #[default]
    Aes256,
    Twofish,
    ChaCha20,
}

impl Cipher {
    pub fn uuid(self) -> Uuid {
        match self {
            Cipher::Aes256 => AES256_UUID,
            Cipher::Twofish => TWOFISH_UUID,
            Cipher::ChaCha20 => CHACHA20_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Result<Self> {
        match uuid {
            AES256_UUID => Ok(Cipher::Aes256),
            TWOFISH_UUID => Ok(Cipher::Twofish),
            CHACHA20_UUID => Ok(Cipher::ChaCha20),
            other => Err(Unsupported::Cipher(other).into()),
        }
    }

    /// Parse a user-facing cipher name (config files, CLI flags).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "aes" | "aes256" | "aes-256" => Some(Cipher::Aes256),
            "twofish" => Some(Cipher::Twofish),
            "chacha20" => Some(Cipher::ChaCha20),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Cipher::Aes256 => "AES-256",
            Cipher::Twofish => "Twofish-256",
            Cipher::ChaCha20 => "ChaCha20",
        }
    }

    /// Expected length of the header's encryption IV field.
    pub fn iv_len(self) -> usize {
        match self {
            Cipher::Aes256 | Cipher::Twofish => 16,
            Cipher::ChaCha20 => 12,
        }
    }

    pub fn encrypt(self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.check_iv(iv)?;
        match self {
            Cipher::Aes256 => cbc_encrypt::<cbc::Encryptor<Aes256>>(key, iv, plaintext),
            Cipher::Twofish => cbc_encrypt::<cbc::Encryptor<Twofish>>(key, iv, plaintext),
            Cipher::ChaCha20 => chacha20_apply(key, iv, plaintext),
        }
    }

    pub fn decrypt(self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.check_iv(iv)?;
        match self {
            Cipher::Aes256 => cbc_decrypt::<cbc::Decryptor<Aes256>>(key, iv, ciphertext),
            Cipher::Twofish => cbc_decrypt::<cbc::Decryptor<Twofish>>(key, iv, ciphertext),
            Cipher::ChaCha20 => chacha20_apply(key, iv, ciphertext),
        }
    }

    fn check_iv(self, iv: &[u8]) -> Result<()> {
        if iv.len() != self.iv_len() {
            return Err(FormatError::FieldLength {
                field: "encryption IV",
                expected: self.iv_len(),
                actual: iv.len(),
            }
            .into());
        }
        Ok(())
    }
}

fn cbc_encrypt<E: KeyIvInit + BlockEncryptMut>(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let encryptor = E::new_from_slices(key, iv)
        .map_err(|e| KdbxError::EncryptionFailed(format!("invalid key or IV length: {e}")))?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn cbc_decrypt<D: KeyIvInit + BlockDecryptMut>(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(FormatError::BodyLength.into());
    }
    let decryptor = D::new_from_slices(key, iv)
        .map_err(|e| KdbxError::EncryptionFailed(format!("invalid key or IV length: {e}")))?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| KdbxError::WrongKeyOrCorrupt)
}

fn chacha20_apply(key: &[u8], nonce: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = ChaCha20::new_from_slices(key, nonce)
        .map_err(|e| KdbxError::EncryptionFailed(format!("invalid key or nonce length: {e}")))?;
    let mut out = data.to_vec();
    cipher.apply_keystream(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Cipher; 3] = [Cipher::Aes256, Cipher::Twofish, Cipher::ChaCha20];

    #[test]
    fn uuid_roundtrip_for_every_cipher() {
        for cipher in ALL {
            assert_eq!(Cipher::from_uuid(cipher.uuid()).unwrap(), cipher);
        }
    }

    #[test]
    fn unknown_uuid_is_unsupported() {
        let err = Cipher::from_uuid(Uuid::nil()).unwrap_err();
        assert!(matches!(
            err,
            KdbxError::Unsupported(Unsupported::Cipher(_))
        ));
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = [0x42u8; KEY_LEN];
        for cipher in ALL {
            let iv = vec![7u8; cipher.iv_len()];
            let plaintext = b"The quick brown fox jumps over the lazy dog";
            let ct = cipher.encrypt(&key, &iv, plaintext).unwrap();
            assert_ne!(&ct[..], &plaintext[..]);
            assert_eq!(cipher.decrypt(&key, &iv, &ct).unwrap(), plaintext);
        }
    }

    #[test]
    fn cbc_output_is_padded_to_block_size() {
        let key = [1u8; KEY_LEN];
        let iv = [2u8; 16];
        let ct = Cipher::Aes256.encrypt(&key, &iv, &[0u8; 32]).unwrap();
        // Full block of padding is appended when input is block aligned.
        assert_eq!(ct.len(), 48);
    }

    #[test]
    fn wrong_iv_length_is_rejected() {
        let key = [1u8; KEY_LEN];
        let err = Cipher::ChaCha20.encrypt(&key, &[0u8; 16], b"x").unwrap_err();
        assert!(matches!(
            err,
            KdbxError::Format(FormatError::FieldLength { expected: 12, .. })
        ));
    }

    #[test]
    fn names_parse() {
        assert_eq!(Cipher::from_name("AES256"), Some(Cipher::Aes256));
        assert_eq!(Cipher::from_name("twofish"), Some(Cipher::Twofish));
        assert_eq!(Cipher::from_name("chacha20"), Some(Cipher::ChaCha20));
        assert_eq!(Cipher::from_name("rot13"), None);
    }
}
