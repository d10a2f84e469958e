//! Outer header codec: file signatures, version and the TLV field list.
//!
//! ```text
//! [sig1: u32][sig2: u32][version: u32]
//! { [id: u8][len: u16 (KDBX 3.1) | u32 (KDBX 4)][data] } ... [id = 0]
//! ```

use uuid::Uuid;

use super::bytes::{fixed, ByteReader};
use super::compression::Compression;
use super::variant_map::VariantMap;
use super::FormatVersion;
use crate::crypto::kdf::Kdf;
use crate::crypto::{Cipher, ProtectedStreamAlgorithm};
use crate::errors::{FormatError, KdbxError, Result, Unsupported};

// ---------------------------------------------------------------------------
// Signatures and versions
// ---------------------------------------------------------------------------

pub const SIGNATURE_1: u32 = 0x9AA2_D903;
pub const SIGNATURE_2_KDBX: u32 = 0xB54B_FB67;
pub const SIGNATURE_2_KDB: u32 = 0xB54B_FB65;
pub const SIGNATURE_2_PRE_RELEASE: u32 = 0xB54B_FB66;

pub const VERSION_KDBX3_1: u32 = 0x0003_0001;
pub const VERSION_KDBX4: u32 = 0x0004_0000;
const VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;

/// Bytes before the first header field.
pub const PREFIX_LEN: usize = 12;

/// Which pipeline a file belongs to, decided from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Kdb,
    Kdbx { version: u32, format: FormatVersion },
}

pub fn identify(data: &[u8]) -> Result<FileKind> {
    if data.len() < 8 {
        return Err(FormatError::TooShort.into());
    }
    let mut r = ByteReader::new(data);
    if r.u32("signature")? != SIGNATURE_1 {
        return Err(FormatError::BadSignature.into());
    }
    match r.u32("signature")? {
        SIGNATURE_2_KDBX => {}
        SIGNATURE_2_KDB => return Ok(FileKind::Kdb),
        SIGNATURE_2_PRE_RELEASE => return Err(Unsupported::PreRelease.into()),
        _ => return Err(FormatError::BadSignature.into()),
    }

    let version = r.u32("version").map_err(|_| FormatError::TooShort)?;
    let format = match (version & VERSION_CRITICAL_MASK) >> 16 {
        2 | 3 => FormatVersion::Kdbx3,
        4 => FormatVersion::Kdbx4,
        _ => return Err(Unsupported::Version(version).into()),
    };
    Ok(FileKind::Kdbx { version, format })
}

// ---------------------------------------------------------------------------
// Field ids
// ---------------------------------------------------------------------------

const END_OF_HEADER: u8 = 0;
const COMMENT: u8 = 1;
const CIPHER_ID: u8 = 2;
const COMPRESSION_FLAGS: u8 = 3;
const MASTER_SEED: u8 = 4;
const TRANSFORM_SEED: u8 = 5;
const TRANSFORM_ROUNDS: u8 = 6;
const ENCRYPTION_IV: u8 = 7;
const PROTECTED_STREAM_KEY: u8 = 8;
const STREAM_START_BYTES: u8 = 9;
const INNER_RANDOM_STREAM_ID: u8 = 10;
const KDF_PARAMETERS: u8 = 11;
const PUBLIC_CUSTOM_DATA: u8 = 12;

/// Data KeePass writes in the end-of-header field.
const END_OF_HEADER_DATA: &[u8] = b"\r\n\r\n";

// ---------------------------------------------------------------------------
// OuterHeader
// ---------------------------------------------------------------------------

/// Fields that only exist in the KDBX 3.1 outer header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kdbx3Fields {
    pub protected_stream_key: Vec<u8>,
    pub stream_start_bytes: [u8; 32],
    pub protected_stream: ProtectedStreamAlgorithm,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OuterHeader {
    pub version: u32,
    pub cipher: Cipher,
    pub compression: Compression,
    pub master_seed: [u8; 32],
    pub iv: Vec<u8>,
    pub kdf: Kdf,
    pub comment: Option<Vec<u8>>,
    pub public_custom_data: Option<VariantMap>,
    pub kdbx3: Option<Kdbx3Fields>,
}

#[derive(Default)]
struct RawFields<'a> {
    comment: Option<&'a [u8]>,
    cipher: Option<&'a [u8]>,
    compression: Option<&'a [u8]>,
    master_seed: Option<&'a [u8]>,
    transform_seed: Option<&'a [u8]>,
    transform_rounds: Option<&'a [u8]>,
    iv: Option<&'a [u8]>,
    stream_key: Option<&'a [u8]>,
    start_bytes: Option<&'a [u8]>,
    stream_id: Option<&'a [u8]>,
    kdf: Option<&'a [u8]>,
    public_custom_data: Option<&'a [u8]>,
}

impl OuterHeader {
    pub fn format(&self) -> FormatVersion {
        if self.kdbx3.is_some() {
            FormatVersion::Kdbx3
        } else {
            FormatVersion::Kdbx4
        }
    }

    /// Parse the header from the start of `data`. Returns the header and
    /// the number of bytes it occupies (signatures included).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (version, format) = match identify(data)? {
            FileKind::Kdbx { version, format } => (version, format),
            FileKind::Kdb => return Err(Unsupported::Feature("KeePass 1 file in KDBX reader").into()),
        };

        let mut r = ByteReader::at(data, PREFIX_LEN);
        let mut raw = RawFields::default();

        loop {
            let id = r.u8("header field id")?;
            let len = match format {
                FormatVersion::Kdbx3 => usize::from(r.u16("header field length")?),
                FormatVersion::Kdbx4 => r.u32("header field length")? as usize,
            };
            let field = r.take(len, "header field data")?;

            match (id, format) {
                (END_OF_HEADER, _) => break,
                (COMMENT, _) => raw.comment = Some(field),
                (CIPHER_ID, _) => raw.cipher = Some(field),
                (COMPRESSION_FLAGS, _) => raw.compression = Some(field),
                (MASTER_SEED, _) => raw.master_seed = Some(field),
                (ENCRYPTION_IV, _) => raw.iv = Some(field),
                (
                    TRANSFORM_SEED | TRANSFORM_ROUNDS | PROTECTED_STREAM_KEY | STREAM_START_BYTES
                    | INNER_RANDOM_STREAM_ID,
                    FormatVersion::Kdbx4,
                ) => return Err(Unsupported::LegacyHeaderField(id).into()),
                (TRANSFORM_SEED, _) => raw.transform_seed = Some(field),
                (TRANSFORM_ROUNDS, _) => raw.transform_rounds = Some(field),
                (PROTECTED_STREAM_KEY, _) => raw.stream_key = Some(field),
                (STREAM_START_BYTES, _) => raw.start_bytes = Some(field),
                (INNER_RANDOM_STREAM_ID, _) => raw.stream_id = Some(field),
                (KDF_PARAMETERS, FormatVersion::Kdbx4) => raw.kdf = Some(field),
                (PUBLIC_CUSTOM_DATA, FormatVersion::Kdbx4) => raw.public_custom_data = Some(field),
                _ => tracing::warn!(id, len, "skipping unknown header field"),
            }
        }

        let header = Self::assemble(version, format, raw)?;
        tracing::debug!(
            version = format_args!("{version:#010x}"),
            cipher = header.cipher.name(),
            kdf = header.kdf.name(),
            "outer header read"
        );
        Ok((header, r.pos()))
    }

    fn assemble(version: u32, format: FormatVersion, raw: RawFields<'_>) -> Result<Self> {
        let cipher_bytes = raw
            .cipher
            .ok_or(FormatError::MissingHeaderField("cipher id"))?;
        let cipher = Cipher::from_uuid(Uuid::from_bytes(fixed("cipher id", cipher_bytes)?))?;

        let compression_bytes = raw
            .compression
            .ok_or(FormatError::MissingHeaderField("compression flags"))?;
        let compression =
            Compression::from_id(u32::from_le_bytes(fixed("compression flags", compression_bytes)?))?;

        let master_seed = fixed(
            "master seed",
            raw.master_seed
                .ok_or(FormatError::MissingHeaderField("master seed"))?,
        )?;

        let iv = raw.iv.ok_or(FormatError::MissingHeaderField("encryption IV"))?;
        if iv.len() != cipher.iv_len() {
            return Err(FormatError::FieldLength {
                field: "encryption IV",
                expected: cipher.iv_len(),
                actual: iv.len(),
            }
            .into());
        }

        let (kdf, public_custom_data, kdbx3) = match format {
            FormatVersion::Kdbx4 => {
                let params = raw
                    .kdf
                    .ok_or(FormatError::MissingHeaderField("KDF parameters"))?;
                let kdf = Kdf::from_variant_map(&VariantMap::decode(params)?)?;
                let custom = raw.public_custom_data.map(VariantMap::decode).transpose()?;
                (kdf, custom, None)
            }
            FormatVersion::Kdbx3 => {
                let seed = fixed(
                    "transform seed",
                    raw.transform_seed
                        .ok_or(FormatError::MissingHeaderField("transform seed"))?,
                )?;
                let rounds = u64::from_le_bytes(fixed(
                    "transform rounds",
                    raw.transform_rounds
                        .ok_or(FormatError::MissingHeaderField("transform rounds"))?,
                )?);
                let kdf = Kdf::AesKdf { rounds, seed };
                kdf.validate()?;

                let stream_key = raw
                    .stream_key
                    .ok_or(FormatError::MissingHeaderField("protected stream key"))?;
                let stream_key: [u8; 32] = fixed("protected stream key", stream_key)?;
                let start_bytes = fixed(
                    "stream start bytes",
                    raw.start_bytes
                        .ok_or(FormatError::MissingHeaderField("stream start bytes"))?,
                )?;
                let stream_id = u32::from_le_bytes(fixed(
                    "inner random stream id",
                    raw.stream_id
                        .ok_or(FormatError::MissingHeaderField("inner random stream id"))?,
                )?);
                let fields = Kdbx3Fields {
                    protected_stream_key: stream_key.to_vec(),
                    stream_start_bytes: start_bytes,
                    protected_stream: ProtectedStreamAlgorithm::from_id(stream_id)?,
                };
                (kdf, None, Some(fields))
            }
        };

        Ok(Self {
            version,
            cipher,
            compression,
            master_seed,
            iv: iv.to_vec(),
            kdf,
            comment: raw.comment.map(<[u8]>::to_vec),
            public_custom_data,
            kdbx3,
        })
    }

    /// Serialize the header, signatures included. Identical values always
    /// produce identical bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let format = self.format();
        let mut out = Vec::with_capacity(256);
        out.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        out.extend_from_slice(&SIGNATURE_2_KDBX.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());

        let mut field = |id: u8, data: &[u8]| -> Result<()> {
            out.push(id);
            match format {
                FormatVersion::Kdbx3 => {
                    let len = u16::try_from(data.len()).map_err(|_| FormatError::InvalidHeaderLength)?;
                    out.extend_from_slice(&len.to_le_bytes());
                }
                FormatVersion::Kdbx4 => {
                    let len = u32::try_from(data.len()).map_err(|_| FormatError::InvalidHeaderLength)?;
                    out.extend_from_slice(&len.to_le_bytes());
                }
            }
            out.extend_from_slice(data);
            Ok(())
        };

        if self.iv.len() != self.cipher.iv_len() {
            return Err(KdbxError::EncryptionFailed(format!(
                "IV must be {} bytes for {}",
                self.cipher.iv_len(),
                self.cipher.name()
            )));
        }

        if let Some(comment) = &self.comment {
            field(COMMENT, comment)?;
        }
        field(CIPHER_ID, self.cipher.uuid().as_bytes())?;
        field(COMPRESSION_FLAGS, &self.compression.id().to_le_bytes())?;
        field(MASTER_SEED, &self.master_seed)?;

        match &self.kdbx3 {
            Some(legacy) => {
                let Kdf::AesKdf { rounds, seed } = &self.kdf else {
                    return Err(Unsupported::Feature("KDBX 3.1 only supports AES-KDF").into());
                };
                field(TRANSFORM_SEED, seed)?;
                field(TRANSFORM_ROUNDS, &rounds.to_le_bytes())?;
                field(ENCRYPTION_IV, &self.iv)?;
                field(PROTECTED_STREAM_KEY, &legacy.protected_stream_key)?;
                field(STREAM_START_BYTES, &legacy.stream_start_bytes)?;
                field(INNER_RANDOM_STREAM_ID, &legacy.protected_stream.id().to_le_bytes())?;
            }
            None => {
                field(ENCRYPTION_IV, &self.iv)?;
                field(KDF_PARAMETERS, &self.kdf.to_variant_map().encode()?)?;
                if let Some(custom) = self.public_custom_data.as_ref().filter(|m| !m.is_empty()) {
                    field(PUBLIC_CUSTOM_DATA, &custom.encode()?)?;
                }
            }
        }
        field(END_OF_HEADER, END_OF_HEADER_DATA)?;
        Ok(out)
    }
}
