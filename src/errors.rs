use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// All errors that can occur in kdbxkit.
#[derive(Debug, Error)]
pub enum KdbxError {
    // --- Structural errors ---
    #[error("Invalid database format: {0}")]
    Format(#[from] FormatError),

    #[error("Invalid database content: {0}")]
    Payload(#[from] PayloadError),

    // --- Integrity errors ---
    /// Header checksum/HMAC mismatch, block authentication failure, wrong
    /// stream start bytes, bad padding. Deliberately carries no detail.
    #[error("Wrong key or database file is corrupt")]
    WrongKeyOrCorrupt,

    // --- Unsupported features ---
    #[error("Unsupported: {0}")]
    Unsupported(#[from] Unsupported),

    // --- Key derivation errors ---
    #[error("Missing key derivation parameter '{0}'")]
    MissingKdfParameter(&'static str),

    #[error("Key derivation parameter '{name}' = {value} is out of bounds ({bounds})")]
    KdfParameterOutOfBounds {
        name: &'static str,
        value: u64,
        bounds: &'static str,
    },

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    // --- Key source errors ---
    #[error("Key error: {0}")]
    KeySource(#[from] KeySourceError),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    // --- Store errors ---
    #[error("Database not found at {0}")]
    DatabaseNotFound(PathBuf),

    #[error("Database already exists at {0}")]
    DatabaseAlreadyExists(PathBuf),

    #[error("Entry '{0}' not found")]
    EntryNotFound(String),

    #[error("Group '{0}' not found")]
    GroupNotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),
}

/// Malformed or truncated structural bytes in a container.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("file is too small to be a KeePass database")]
    TooShort,

    #[error("not a KeePass database (bad signature)")]
    BadSignature,

    #[error("truncated {0}")]
    Truncated(&'static str),

    #[error("invalid {field} size: expected {expected} bytes, got {actual}")]
    FieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("missing header field: {0}")]
    MissingHeaderField(&'static str),

    #[error("invalid header data length")]
    InvalidHeaderLength,

    #[error("unsupported variant map version {0:#06x}")]
    VariantMapVersion(u16),

    #[error("invalid variant map field type {0:#04x}")]
    VariantMapType(u8),

    #[error("invalid variant map entry name length")]
    VariantMapNameLength,

    #[error("invalid variant map entry name data")]
    VariantMapNameData,

    #[error("invalid variant map entry value length")]
    VariantMapValueLength,

    #[error("invalid variant map entry value data")]
    VariantMapValueData,

    #[error("invalid variant map {kind} entry value length {actual}")]
    VariantMapFixedLength { kind: &'static str, actual: usize },

    #[error("variant map string value is not valid UTF-8")]
    VariantMapUtf8,

    #[error("duplicate variant map entry '{0}'")]
    VariantMapDuplicateName(String),

    #[error("variant map {0} is too long to encode")]
    VariantMapTooLong(&'static str),

    #[error("encrypted body length is not a multiple of the cipher block size")]
    BodyLength,

    #[error("invalid inner header binary size")]
    InnerBinarySize,

    #[error("unable to decompress {0}")]
    Decompression(&'static str),

    #[error("invalid number of {0}")]
    InvalidCount(&'static str),

    #[error("invalid {record} field type {field_type:#06x}")]
    UnknownRecordField { record: &'static str, field_type: u16 },
}

/// Structural violations inside the decrypted tree payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("missing KeePassFile document element")]
    NoDocumentElement,

    #[error("no root group")]
    NoRootGroup,

    #[error("multiple root group elements")]
    MultipleRootGroups,

    #[error("no {0} uuid found")]
    MissingUuid(&'static str),

    #[error("null {0} uuid")]
    NullUuid(&'static str),

    #[error("duplicate uuid {0} in the live tree")]
    DuplicateUuid(Uuid),

    #[error("History element outside of an entry")]
    HistoryOutsideEntry,

    #[error("History element in history entry")]
    NestedHistory,

    #[error("History element with different uuid")]
    HistoryUuidMismatch,

    #[error("missing DeletedObject uuid or time")]
    IncompleteTombstone,

    #[error("invalid bool value '{value}' in {element}")]
    InvalidBool { element: String, value: String },

    #[error("invalid date time value '{value}' in {element}")]
    InvalidDateTime { element: String, value: String },

    #[error("invalid color value '{value}' in {element}")]
    InvalidColor { element: String, value: String },

    #[error("invalid number value '{value}' in {element}")]
    InvalidNumber { element: String, value: String },

    #[error("invalid icon number {value} in {element}")]
    InvalidIcon { element: String, value: i64 },

    #[error("invalid uuid value in {0}")]
    InvalidUuid(String),

    #[error("invalid base64 data in {0}")]
    InvalidBase64(String),

    #[error("protected value in {0} is not valid UTF-8")]
    InvalidProtectedValue(String),

    #[error("entry string key or value missing")]
    IncompleteString,

    #[error("entry binary key or value missing")]
    IncompleteBinary,

    #[error("entry references missing binary #{0}")]
    MissingBinary(usize),

    #[error("missing icon uuid or data")]
    IncompleteCustomIcon,

    #[error("invalid group level {level} after level {previous}")]
    InvalidGroupLevel { level: u16, previous: u16 },

    #[error("first group has level {0}, expected 0")]
    InvalidFirstGroupLevel(u16),

    #[error("missing group id or level")]
    IncompleteGroup,

    #[error("entry references unknown group id {0}")]
    UnknownGroupId(u32),

    #[error("invalid entry field data in {0}")]
    InvalidRecordData(&'static str),
}

/// Identifiers that name a feature this build cannot handle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Unsupported {
    #[error("database version {0:#010x}")]
    Version(u32),

    #[error("pre-release KeePass 2 database")]
    PreRelease,

    #[error("cipher {0}")]
    Cipher(Uuid),

    #[error("legacy cipher flags {0:#x}")]
    LegacyCipher(u32),

    #[error("key derivation function {0}")]
    Kdf(Uuid),

    #[error("argon2 version {0:#x}")]
    Argon2Version(u32),

    #[error("compression algorithm {0}")]
    Compression(u32),

    #[error("inner random stream cipher {0}")]
    ProtectedStream(u32),

    #[error("legacy header field {0} found in KDBX 4 file")]
    LegacyHeaderField(u8),

    #[error("{0}")]
    Feature(&'static str),
}

/// Problems obtaining key material from a key source.
#[derive(Debug, Error)]
pub enum KeySourceError {
    #[error("no key factors configured")]
    NoKeyFactors,

    #[error("cannot read key file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("invalid key file: {0}")]
    InvalidKeyFile(String),

    #[error("legacy or unsupported key file: {0}")]
    UnsupportedKeyFile(String),

    #[error("key file already exists at {0}")]
    KeyFileExists(PathBuf),

    #[error("hardware key {name} unavailable after {attempts} attempt(s): {reason}")]
    HardwareUnavailable {
        name: String,
        attempts: u32,
        reason: String,
    },

    #[error("hardware key {0} declined the challenge")]
    HardwareDeclined(String),
}

/// Coarse classification of every error, for callers that only need to
/// decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Format,
    Integrity,
    Unsupported,
    KeySource,
    Io,
    Other,
}

impl KdbxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) | Self::Payload(_) | Self::MissingKdfParameter(_) => ErrorKind::Format,
            Self::WrongKeyOrCorrupt => ErrorKind::Integrity,
            Self::Unsupported(_) | Self::KdfParameterOutOfBounds { .. } => ErrorKind::Unsupported,
            Self::KeySource(_) => ErrorKind::KeySource,
            Self::Io(_) | Self::DatabaseNotFound(_) | Self::DatabaseAlreadyExists(_) => ErrorKind::Io,
            _ => ErrorKind::Other,
        }
    }
}

/// Convenience type alias for kdbxkit results.
pub type Result<T> = std::result::Result<T, KdbxError>;
