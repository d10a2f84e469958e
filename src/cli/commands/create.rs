//! `kdbxkit create`: write a new, empty database.

use std::path::Path;

use crate::cli::output;
use crate::cli::{composite_key, load_settings, prompt_new_password, Cli};
use crate::db::{times, Database};
use crate::errors::{KdbxError, Result};

/// Execute the `create` command.
pub fn execute(
    cli: &Cli,
    path: &Path,
    format: Option<&str>,
    cipher: Option<&str>,
    name: Option<&str>,
) -> Result<()> {
    if path.exists() {
        output::tip("Use `kdbxkit add` to add entries to the existing database.");
        return Err(KdbxError::DatabaseAlreadyExists(path.to_path_buf()));
    }

    // Command-line choices override the config file.
    let mut settings = load_settings()?;
    if let Some(format) = format {
        settings.default_format = format.to_string();
    }
    if let Some(cipher) = cipher {
        settings.default_cipher = cipher.to_string();
    }
    let db_settings = settings.database_settings()?;

    let password = prompt_new_password()?;
    let key = composite_key(cli, &settings, &password)?;

    let mut db = Database::new(db_settings);
    if let Some(name) = name {
        db.meta.name = name.to_string();
        db.meta.name_changed = Some(times::now());
    }
    crate::store::create(path, &db, &key)?;

    if cli.keyfile.is_some() {
        output::info("Database created with a key file; pass --keyfile on every command.");
    }
    output::success(&format!(
        "{} database created at {} ({}, {})",
        db.settings.version,
        path.display(),
        db.settings.cipher.name(),
        db.settings.kdf.name()
    ));
    output::tip("Run `kdbxkit add <PATH> <TITLE>` to add an entry.");

    Ok(())
}
