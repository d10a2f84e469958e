//! KDBX 4 inner header, found at the start of the decrypted payload.
//!
//! ```text
//! { [id: u8][len: u32][data] } ... [id = 0]
//! ```
//!
//! Binaries are stored here as `[flags: u8][content]` and referenced from
//! the XML by their position in the list.

use super::bytes::{fixed, ByteReader};
use crate::crypto::ProtectedStreamAlgorithm;
use crate::errors::{FormatError, Result};

const END_OF_HEADER: u8 = 0;
const INNER_RANDOM_STREAM_ID: u8 = 1;
const INNER_RANDOM_STREAM_KEY: u8 = 2;
const BINARY: u8 = 3;

const BINARY_FLAG_PROTECTED: u8 = 0x01;

/// One entry of the binary pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolBinary {
    pub data: Vec<u8>,
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerHeader {
    pub protected_stream: ProtectedStreamAlgorithm,
    pub protected_stream_key: Vec<u8>,
    pub binaries: Vec<PoolBinary>,
}

impl InnerHeader {
    /// Parse the inner header. Returns it with the offset where the XML
    /// payload starts.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let mut r = ByteReader::new(data);
        let mut stream_id = None;
        let mut stream_key = None;
        let mut binaries = Vec::new();

        loop {
            let id = r.u8("inner header field id")?;
            let len = r.i32("inner header field length")?;
            let len = usize::try_from(len).map_err(|_| FormatError::InvalidHeaderLength)?;
            let field = r.take(len, "inner header field data")?;

            match id {
                END_OF_HEADER => break,
                INNER_RANDOM_STREAM_ID => {
                    let id = u32::from_le_bytes(fixed("inner random stream id", field)?);
                    stream_id = Some(ProtectedStreamAlgorithm::from_id(id)?);
                }
                INNER_RANDOM_STREAM_KEY => stream_key = Some(field.to_vec()),
                BINARY => {
                    let (&flags, content) =
                        field.split_first().ok_or(FormatError::InnerBinarySize)?;
                    binaries.push(PoolBinary {
                        data: content.to_vec(),
                        protected: flags & BINARY_FLAG_PROTECTED != 0,
                    });
                }
                other => tracing::warn!(id = other, len, "skipping unknown inner header field"),
            }
        }

        let header = Self {
            protected_stream: stream_id
                .ok_or(FormatError::MissingHeaderField("inner random stream id"))?,
            protected_stream_key: stream_key
                .ok_or(FormatError::MissingHeaderField("inner random stream key"))?,
            binaries,
        };
        tracing::debug!(binaries = header.binaries.len(), "inner header read");
        Ok((header, r.pos()))
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut field = |id: u8, parts: &[&[u8]]| -> Result<()> {
            let len: usize = parts.iter().map(|p| p.len()).sum();
            let len = i32::try_from(len).map_err(|_| FormatError::InvalidHeaderLength)?;
            out.push(id);
            out.extend_from_slice(&len.to_le_bytes());
            for part in parts {
                out.extend_from_slice(part);
            }
            Ok(())
        };

        field(INNER_RANDOM_STREAM_ID, &[&self.protected_stream.id().to_le_bytes()[..]])?;
        field(INNER_RANDOM_STREAM_KEY, &[self.protected_stream_key.as_slice()])?;
        for binary in &self.binaries {
            let flags = if binary.protected { BINARY_FLAG_PROTECTED } else { 0 };
            field(BINARY, &[&[flags][..], binary.data.as_slice()])?;
        }
        field(END_OF_HEADER, &[])?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{KdbxError, Unsupported};

    fn sample() -> InnerHeader {
        InnerHeader {
            protected_stream: ProtectedStreamAlgorithm::ChaCha20,
            protected_stream_key: vec![7u8; 64],
            binaries: vec![
                PoolBinary {
                    data: b"attachment".to_vec(),
                    protected: true,
                },
                PoolBinary {
                    data: Vec::new(),
                    protected: false,
                },
            ],
        }
    }

    #[test]
    fn roundtrip_with_trailing_payload() {
        let header = sample();
        let mut bytes = header.encode().unwrap();
        let payload_at = bytes.len();
        bytes.extend_from_slice(b"<?xml");
        let (decoded, offset) = InnerHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(offset, payload_at);
    }

    #[test]
    fn empty_binary_field_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[BINARY, 0, 0, 0, 0]);
        assert!(matches!(
            InnerHeader::decode(&bytes),
            Err(KdbxError::Format(FormatError::InnerBinarySize))
        ));
    }

    #[test]
    fn stream_id_length_is_checked() {
        let bytes = [INNER_RANDOM_STREAM_ID, 2, 0, 0, 0, 3, 0];
        assert!(matches!(
            InnerHeader::decode(&bytes),
            Err(KdbxError::Format(FormatError::FieldLength { expected: 4, .. }))
        ));
    }

    #[test]
    fn missing_key_is_reported() {
        let bytes = [INNER_RANDOM_STREAM_ID, 4, 0, 0, 0, 3, 0, 0, 0, END_OF_HEADER, 0, 0, 0, 0];
        assert!(matches!(
            InnerHeader::decode(&bytes),
            Err(KdbxError::Format(FormatError::MissingHeaderField("inner random stream key")))
        ));
    }

    #[test]
    fn arcfour_stream_is_unsupported() {
        let bytes = [INNER_RANDOM_STREAM_ID, 4, 0, 0, 0, 1, 0, 0, 0];
        assert!(matches!(
            InnerHeader::decode(&bytes),
            Err(KdbxError::Unsupported(Unsupported::ProtectedStream(1)))
        ));
    }

    #[test]
    fn truncated_data_is_reported() {
        let bytes = [INNER_RANDOM_STREAM_KEY, 10, 0, 0, 0, 1, 2];
        assert!(matches!(
            InnerHeader::decode(&bytes),
            Err(KdbxError::Format(FormatError::Truncated(_)))
        ));
    }
}
