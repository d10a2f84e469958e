use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::kdf::{Argon2Variant, Kdf};
use crate::crypto::Cipher;
use crate::db::DatabaseSettings;
use crate::errors::{KdbxError, Result};
use crate::kdbx::compression::Compression;
use crate::kdbx::FormatVersion;

/// Defaults for new databases, loaded from `.kdbxkit.toml`.
///
/// Every field has a default so the CLI works without any config file.
/// Settings only shape databases created here; opening a file always uses
/// the parameters stored in its header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `kdbx4` or `kdbx3`.
    #[serde(default = "default_format")]
    pub default_format: String,

    /// `aes256`, `twofish` or `chacha20`.
    #[serde(default = "default_cipher")]
    pub default_cipher: String,

    /// `argon2id`, `argon2d` or `aes-kdf`.
    #[serde(default = "default_kdf")]
    pub default_kdf: String,

    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u64,

    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u64,

    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// AES-KDF rounds, also used for every KDBX 3.1 database.
    #[serde(default = "default_aes_kdf_rounds")]
    pub aes_kdf_rounds: u64,

    /// Gzip the payload.
    #[serde(default = "default_compression")]
    pub compression: bool,

    /// Wall time `calibrate` aims for.
    #[serde(default = "default_calibration_target_ms")]
    pub calibration_target_ms: u64,

    /// How often an unavailable hardware token is retried.
    #[serde(default = "default_challenge_attempts")]
    pub challenge_attempts: u32,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_format() -> String {
    "kdbx4".to_string()
}

fn default_cipher() -> String {
    "aes256".to_string()
}

fn default_kdf() -> String {
    "argon2id".to_string()
}

fn default_argon2_memory_kib() -> u64 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u64 {
    3
}

fn default_argon2_parallelism() -> u32 {
    2
}

fn default_aes_kdf_rounds() -> u64 {
    100_000
}

fn default_compression() -> bool {
    true
}

fn default_calibration_target_ms() -> u64 {
    1_000
}

fn default_challenge_attempts() -> u32 {
    3
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_format: default_format(),
            default_cipher: default_cipher(),
            default_kdf: default_kdf(),
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            aes_kdf_rounds: default_aes_kdf_rounds(),
            compression: default_compression(),
            calibration_target_ms: default_calibration_target_ms(),
            challenge_attempts: default_challenge_attempts(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the working directory.
    pub const FILE_NAME: &'static str = ".kdbxkit.toml";

    /// Load settings from `<dir>/.kdbxkit.toml`.
    ///
    /// If the file does not exist, defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            KdbxError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        tracing::debug!(path = %config_path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn format(&self) -> Result<FormatVersion> {
        FormatVersion::from_name(&self.default_format).ok_or_else(|| {
            KdbxError::ConfigError(format!("unknown format '{}'", self.default_format))
        })
    }

    pub fn cipher(&self) -> Result<Cipher> {
        Cipher::from_name(&self.default_cipher).ok_or_else(|| {
            KdbxError::ConfigError(format!("unknown cipher '{}'", self.default_cipher))
        })
    }

    /// The configured KDF with a fresh random seed.
    pub fn kdf(&self) -> Result<Kdf> {
        let variant = match self.default_kdf.to_ascii_lowercase().as_str() {
            "argon2id" => Argon2Variant::Argon2id,
            "argon2d" => Argon2Variant::Argon2d,
            "aes-kdf" | "aeskdf" | "aes" => return Ok(Kdf::aes(self.aes_kdf_rounds)),
            other => return Err(KdbxError::ConfigError(format!("unknown kdf '{other}'"))),
        };
        if self.argon2_memory_kib.checked_mul(1024).is_none() {
            return Err(KdbxError::ConfigError(format!(
                "argon2_memory_kib {} is too large",
                self.argon2_memory_kib
            )));
        }
        let kdf = Kdf::argon2(
            variant,
            self.argon2_memory_kib,
            self.argon2_iterations,
            self.argon2_parallelism,
        );
        kdf.validate()?;
        Ok(kdf)
    }

    pub fn calibration_target(&self) -> Duration {
        Duration::from_millis(self.calibration_target_ms)
    }

    /// Container settings for a new database.
    ///
    /// KDBX 3.1 can only carry AES-KDF, so the configured KDF is ignored
    /// for that format and `aes_kdf_rounds` is used instead.
    pub fn database_settings(&self) -> Result<DatabaseSettings> {
        let compression = if self.compression {
            Compression::Gzip
        } else {
            Compression::None
        };
        let cipher = self.cipher()?;

        let settings = match self.format()? {
            FormatVersion::Kdbx3 => DatabaseSettings {
                cipher,
                compression,
                ..DatabaseSettings::kdbx3(self.aes_kdf_rounds)
            },
            FormatVersion::Kdbx4 => DatabaseSettings {
                cipher,
                compression,
                kdf: self.kdf()?,
                ..DatabaseSettings::default()
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
