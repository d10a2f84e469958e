//! In-memory protection for sensitive string values.
//!
//! A `ProtectedValue` keeps its bytes XOR-masked with a random pad of the
//! same length. Both buffers are wiped on drop. The clear text is only
//! produced on request, inside a zeroizing buffer.

use std::fmt;

use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

pub struct ProtectedValue {
    masked: Vec<u8>,
    pad: Vec<u8>,
}

impl ProtectedValue {
    pub fn new(value: &str) -> Self {
        Self::from_bytes(value.as_bytes())
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut pad = vec![0u8; bytes.len()];
        rand::rng().fill_bytes(&mut pad);
        let masked = bytes.iter().zip(&pad).map(|(b, p)| b ^ p).collect();
        Self { masked, pad }
    }

    /// Clear text bytes.
    pub fn reveal_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(
            self.masked
                .iter()
                .zip(&self.pad)
                .map(|(m, p)| m ^ p)
                .collect(),
        )
    }

    /// Clear text. Construction only accepts `&str`, so this is always
    /// valid UTF-8.
    pub fn reveal(&self) -> Zeroizing<String> {
        let bytes = self.reveal_bytes();
        Zeroizing::new(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn len(&self) -> usize {
        self.masked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masked.is_empty()
    }
}

impl Clone for ProtectedValue {
    fn clone(&self) -> Self {
        Self::from_bytes(&self.reveal_bytes())
    }
}

impl PartialEq for ProtectedValue {
    fn eq(&self, other: &Self) -> bool {
        let a = self.reveal_bytes();
        let b = other.reveal_bytes();
        a.len() == b.len() && bool::from(a.as_slice().ct_eq(b.as_slice()))
    }
}

impl Eq for ProtectedValue {}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProtectedValue(***)")
    }
}

impl Drop for ProtectedValue {
    fn drop(&mut self) {
        self.masked.zeroize();
        self.pad.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reveal_returns_original() {
        let value = ProtectedValue::new("hunter2");
        assert_eq!(value.reveal().as_str(), "hunter2");
        assert_eq!(value.len(), 7);
    }

    #[test]
    fn stored_bytes_are_masked() {
        let value = ProtectedValue::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_ne!(value.masked, value.reveal_bytes().to_vec());
    }

    #[test]
    fn clone_and_eq_compare_clear_text() {
        let a = ProtectedValue::new("secret");
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, ProtectedValue::new("other"));
    }

    #[test]
    fn debug_hides_value() {
        let value = ProtectedValue::new("secret");
        assert!(!format!("{value:?}").contains("secret"));
    }
}
