//! Typed key/value binary map used for KDF parameters and public custom data.
//!
//! Layout:
//!
//! ```text
//! [version: u16 LE]
//! { [type: u8][name_len: i32 LE][name][value_len: i32 LE][value] }*
//! [0x00]
//! ```
//!
//! Entries are kept in a `BTreeMap`, so encoding the same map twice always
//! produces the same bytes. The KDBX 4 header is authenticated, which makes
//! that property load-bearing.

use std::collections::BTreeMap;

use crate::errors::{FormatError, Result};

/// Current variant map version written by `encode`.
pub const VERSION: u16 = 0x0100;

/// Mask selecting the critical (major) part of the version.
const VERSION_CRITICAL_MASK: u16 = 0xFF00;

const TYPE_END: u8 = 0x00;
const TYPE_UINT32: u8 = 0x04;
const TYPE_UINT64: u8 = 0x05;
const TYPE_BOOL: u8 = 0x08;
const TYPE_INT32: u8 = 0x0C;
const TYPE_INT64: u8 = 0x0D;
const TYPE_STRING: u8 = 0x18;
const TYPE_BYTE_ARRAY: u8 = 0x42;

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    String(String),
    ByteArray(Vec<u8>),
}

impl Variant {
    /// Build a `String` variant from raw bytes, refusing bytes that would not
    /// decode back to the same value.
    pub fn string_from_bytes(bytes: Vec<u8>) -> Result<Self> {
        String::from_utf8(bytes)
            .map(Variant::String)
            .map_err(|_| FormatError::VariantMapUtf8.into())
    }

    fn type_byte(&self) -> u8 {
        match self {
            Variant::Bool(_) => TYPE_BOOL,
            Variant::Int32(_) => TYPE_INT32,
            Variant::UInt32(_) => TYPE_UINT32,
            Variant::Int64(_) => TYPE_INT64,
            Variant::UInt64(_) => TYPE_UINT64,
            Variant::String(_) => TYPE_STRING,
            Variant::ByteArray(_) => TYPE_BYTE_ARRAY,
        }
    }

    fn value_bytes(&self) -> Vec<u8> {
        match self {
            Variant::Bool(b) => vec![u8::from(*b)],
            Variant::Int32(v) => v.to_le_bytes().to_vec(),
            Variant::UInt32(v) => v.to_le_bytes().to_vec(),
            Variant::Int64(v) => v.to_le_bytes().to_vec(),
            Variant::UInt64(v) => v.to_le_bytes().to_vec(),
            Variant::String(s) => s.as_bytes().to_vec(),
            Variant::ByteArray(b) => b.clone(),
        }
    }
}

/// An ordered map of named variants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantMap {
    entries: BTreeMap<String, Variant>,
}

impl VariantMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Variant) {
        self.entries.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.entries.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Variant> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variant)> {
        self.entries.iter()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            Variant::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            Variant::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u32(&self, name: &str) -> Option<u32> {
        match self.get(name)? {
            Variant::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Variant::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            Variant::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            Variant::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        match self.get(name)? {
            Variant::ByteArray(v) => Some(v),
            _ => None,
        }
    }

    /// Decode a variant map. Every violated constraint maps to its own
    /// `FormatError` variant.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };

        let version = u16::from_le_bytes(
            cursor
                .take_array::<2>()
                .ok_or(FormatError::Truncated("variant map version"))?,
        );
        if (version & VERSION_CRITICAL_MASK) > (VERSION & VERSION_CRITICAL_MASK) {
            return Err(FormatError::VariantMapVersion(version).into());
        }

        let mut map = VariantMap::new();
        loop {
            let type_byte = cursor
                .take(1)
                .ok_or(FormatError::Truncated("variant map field type"))?[0];
            if type_byte == TYPE_END {
                break;
            }

            let name_len = cursor
                .take_len()
                .ok_or(FormatError::VariantMapNameLength)?;
            let name_bytes = cursor
                .take(name_len)
                .ok_or(FormatError::VariantMapNameData)?;
            let name = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| FormatError::VariantMapNameData)?;

            let value_len = cursor
                .take_len()
                .ok_or(FormatError::VariantMapValueLength)?;
            let value = cursor
                .take(value_len)
                .ok_or(FormatError::VariantMapValueData)?;

            let variant = match type_byte {
                TYPE_BOOL => Variant::Bool(fixed::<1>(value, "Bool")?[0] != 0),
                TYPE_INT32 => Variant::Int32(i32::from_le_bytes(fixed(value, "Int32")?)),
                TYPE_UINT32 => Variant::UInt32(u32::from_le_bytes(fixed(value, "UInt32")?)),
                TYPE_INT64 => Variant::Int64(i64::from_le_bytes(fixed(value, "Int64")?)),
                TYPE_UINT64 => Variant::UInt64(u64::from_le_bytes(fixed(value, "UInt64")?)),
                TYPE_STRING => Variant::string_from_bytes(value.to_vec())?,
                TYPE_BYTE_ARRAY => Variant::ByteArray(value.to_vec()),
                other => return Err(FormatError::VariantMapType(other).into()),
            };

            if map.entries.contains_key(&name) {
                return Err(FormatError::VariantMapDuplicateName(name).into());
            }
            map.entries.insert(name, variant);
        }

        Ok(map)
    }

    /// Encode the map in key order.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&VERSION.to_le_bytes());

        for (name, value) in &self.entries {
            let value_bytes = value.value_bytes();
            let name_len = i32::try_from(name.len())
                .map_err(|_| FormatError::VariantMapTooLong("entry name"))?;
            let value_len = i32::try_from(value_bytes.len())
                .map_err(|_| FormatError::VariantMapTooLong("entry value"))?;

            out.push(value.type_byte());
            out.extend_from_slice(&name_len.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&value_len.to_le_bytes());
            out.extend_from_slice(&value_bytes);
        }

        out.push(TYPE_END);
        Ok(out)
    }
}

fn fixed<const N: usize>(value: &[u8], kind: &'static str) -> Result<[u8; N]> {
    value.try_into().map_err(|_| {
        FormatError::VariantMapFixedLength {
            kind,
            actual: value.len(),
        }
        .into()
    })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    /// Read an `i32` length prefix; negative lengths are rejected.
    fn take_len(&mut self) -> Option<usize> {
        let len = i32::from_le_bytes(self.take_array::<4>()?);
        usize::try_from(len).ok()
    }
}
