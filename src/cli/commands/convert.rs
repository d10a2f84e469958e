//! `kdbxkit convert`: re-encode any readable database as KDBX 3.1 or 4.

use std::path::Path;

use crate::cli::output;
use crate::cli::{load_settings, open_database, Cli};
use crate::config::Settings;
use crate::crypto::kdf::Kdf;
use crate::crypto::ProtectedStreamAlgorithm;
use crate::db::{Database, DatabaseSettings};
use crate::errors::{KdbxError, Result};
use crate::kdbx::variant_map::VariantMap;
use crate::kdbx::FormatVersion;

/// Execute the `convert` command. The output uses the same key.
pub fn execute(cli: &Cli, input: &Path, target: &Path, format: &str) -> Result<()> {
    let format = FormatVersion::from_name(format)
        .ok_or_else(|| KdbxError::ConfigError(format!("unknown format '{format}'")))?;
    let settings = load_settings()?;

    let (mut db, key) = open_database(cli, input)?;
    db.settings = convert_settings(&db.settings, format, &settings);
    crate::store::create(target, &db, &key)?;

    output::success(&format!(
        "Wrote {} ({}) to {}",
        format,
        db.settings.kdf.name(),
        target.display()
    ));
    Ok(())
}

/// Settings for writing `db` in `format`.
///
/// KDBX 3.1 has no room for Argon2 or public custom data, so those are
/// replaced by AES-KDF with the configured rounds and dropped. Going to
/// KDBX 4 keeps the KDF and upgrades the protected stream to ChaCha20.
pub fn convert_settings(
    current: &DatabaseSettings,
    format: FormatVersion,
    config: &Settings,
) -> DatabaseSettings {
    let mut next = current.clone();
    next.version = format;
    match format {
        FormatVersion::Kdbx3 => {
            if !matches!(next.kdf, Kdf::AesKdf { .. }) {
                next.kdf = Kdf::aes(config.aes_kdf_rounds);
            }
            next.protected_stream = ProtectedStreamAlgorithm::Salsa20;
            next.public_custom_data = VariantMap::new();
        }
        FormatVersion::Kdbx4 => {
            next.protected_stream = ProtectedStreamAlgorithm::ChaCha20;
        }
    }
    next
}

/// Convert in memory, for callers that already hold a database.
pub fn convert(db: &mut Database, format: FormatVersion, config: &Settings) {
    db.settings = convert_settings(&db.settings, format, config);
}
