//! CLI module: Clap argument parser, output helpers, and command implementations.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use clap::{Parser, ValueHint};
use clap_complete::Shell;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::crypto::{CompositeKey, KeyFile};
use crate::db::{Database, Entry};
use crate::errors::{KdbxError, Result};
use crate::kdbx::{self, HeaderInfo};

/// Environment variable holding the database password for scripted use.
pub const PASSWORD_ENV: &str = "KDBXKIT_PASSWORD";

/// kdbxkit: inspect and maintain KeePass databases.
#[derive(Parser)]
#[command(
    name = "kdbxkit",
    about = "Inspect and maintain KeePass databases (KDBX 3.1 / 4, read-only KDB)",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a key file used as an additional key factor
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub keyfile: Option<PathBuf>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new, empty database
    Create {
        /// Path of the database file to create
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        /// Container format: kdbx4 or kdbx3 (default from .kdbxkit.toml)
        #[arg(long)]
        format: Option<String>,
        /// Body cipher: aes256, twofish or chacha20
        #[arg(long)]
        cipher: Option<String>,
        /// Database name stored in the metadata
        #[arg(long)]
        name: Option<String>,
    },

    /// Show the unencrypted header of a database (no password needed)
    Info {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List all entries
    Ls {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one entry
    Show {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        /// Entry title or UUID
        entry: String,
        /// Print the password in clear text
        #[arg(long)]
        reveal: bool,
    },

    /// Add an entry
    Add {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        /// Entry title
        title: String,
        /// Entry password (omit for interactive prompt)
        password: Option<String>,
        #[arg(short, long)]
        username: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Name of the group to add to (default: root group)
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Move an entry to the recycle bin
    Rm {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
        /// Entry title or UUID
        entry: String,
        /// Delete permanently instead of recycling
        #[arg(long)]
        permanent: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Re-encode a database (including KeePass 1 files) as KDBX
    Convert {
        /// Source database
        #[arg(value_hint = ValueHint::FilePath)]
        input: PathBuf,
        /// Destination file (must not exist)
        #[arg(value_hint = ValueHint::FilePath)]
        output: PathBuf,
        /// Target format: kdbx4 (default) or kdbx3
        #[arg(long, default_value = "kdbx4")]
        format: String,
    },

    /// Measure the KDF and suggest parameters for the target time
    Calibrate {
        /// KDF to calibrate: argon2id, argon2d or aes-kdf (default from .kdbxkit.toml)
        #[arg(long)]
        kdf: Option<String>,
        /// Target time in milliseconds
        #[arg(long)]
        target_ms: Option<u64>,
    },

    /// Generate a new random XML v2.0 key file
    KeyfileGenerate {
        #[arg(value_hint = ValueHint::FilePath)]
        path: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum, ignore_case = true)]
        shell: Shell,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Load `.kdbxkit.toml` from the working directory.
pub fn load_settings() -> Result<Settings> {
    let cwd = std::env::current_dir()?;
    Settings::load(&cwd)
}

/// Get the database password, trying in order:
/// 1. `KDBXKIT_PASSWORD` env var (scripts, CI)
/// 2. Interactive prompt
///
/// Returns `Zeroizing<String>` so the password is wiped from memory on drop.
pub fn prompt_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(Zeroizing::new(pw));
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Enter database password")
        .allow_empty_password(true)
        .interact()
        .map_err(|e| KdbxError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new password with confirmation (used by `create`).
///
/// Also respects `KDBXKIT_PASSWORD` for scripted usage.
pub fn prompt_new_password() -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(Zeroizing::new(pw));
    }

    let pw = dialoguer::Password::new()
        .with_prompt("Choose database password")
        .with_confirmation(
            "Confirm database password",
            "Passwords do not match, try again",
        )
        .interact()
        .map_err(|e| KdbxError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Load the key file named by `--keyfile`, warning about legacy layouts.
pub fn load_keyfile(cli: &Cli) -> Result<Option<KeyFile>> {
    let Some(path) = &cli.keyfile else {
        return Ok(None);
    };
    let key_file = KeyFile::load(path)?;
    if key_file.is_legacy() {
        output::warning(&format!(
            "{} uses a legacy key file layout; consider `kdbxkit keyfile-generate`",
            path.display()
        ));
    }
    Ok(Some(key_file))
}

/// Combine the password, the optional key file and the configured retry
/// count into a composite key.
pub fn composite_key(cli: &Cli, settings: &Settings, password: &str) -> Result<CompositeKey> {
    let mut key = CompositeKey::from_password(password);
    if let Some(key_file) = load_keyfile(cli)? {
        key = key.with_key_file(&key_file);
    }
    Ok(key.with_challenge_attempts(settings.challenge_attempts))
}

/// Ask for the key and open the database at `path`.
pub fn open_database(cli: &Cli, path: &Path) -> Result<(Database, CompositeKey)> {
    let settings = load_settings()?;
    let password = prompt_password()?;
    let key = composite_key(cli, &settings, &password)?;
    let db = crate::store::open(path, &key)?;
    Ok((db, key))
}

/// Like [`open_database`], but refuses KeePass 1 files, which are never
/// written back.
pub fn open_for_update(cli: &Cli, path: &Path) -> Result<(Database, CompositeKey)> {
    let data = crate::store::read_file(path)?;
    if let HeaderInfo::Kdb(_) = kdbx::read_header(&data)? {
        output::tip("Run `kdbxkit convert` to turn it into a KDBX file first.");
        return Err(KdbxError::InvalidOperation(format!(
            "{} is a KeePass 1 database and is read-only",
            path.display()
        )));
    }
    open_database(cli, path)
}

/// Find an entry by UUID or by exact title. Recycled entries are skipped
/// when matching by title.
pub fn find_entry(db: &Database, query: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(query) {
        if db.find_entry(uuid).is_some() {
            return Ok(uuid);
        }
    }

    let matches: Vec<&Entry> = db
        .root
        .all_entries()
        .into_iter()
        .filter(|e| e.title() == query && !db.is_recycled(e.uuid))
        .collect();

    match matches.as_slice() {
        [] => Err(KdbxError::EntryNotFound(query.to_string())),
        [entry] => Ok(entry.uuid),
        _ => Err(KdbxError::InvalidOperation(format!(
            "{} entries are titled '{query}', use the UUID instead",
            matches.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Group;

    fn db() -> (Database, Uuid, Uuid) {
        let mut db = Database::default();
        let root = db.root.uuid;
        let mut a = Entry::new();
        a.set("Title", "mail");
        let a = db.add_entry(root, a).unwrap();
        let sub = db.add_group(root, Group::new("Work")).unwrap();
        let mut b = Entry::new();
        b.set("Title", "vpn");
        let b = db.add_entry(sub, b).unwrap();
        (db, a, b)
    }

    #[test]
    fn find_entry_by_title_or_uuid() {
        let (db, a, b) = db();
        assert_eq!(find_entry(&db, "mail").unwrap(), a);
        assert_eq!(find_entry(&db, "vpn").unwrap(), b);
        assert_eq!(find_entry(&db, &b.to_string()).unwrap(), b);
    }

    #[test]
    fn find_entry_reports_missing_and_ambiguous_titles() {
        let (mut db, _, _) = db();
        assert!(matches!(find_entry(&db, "nope"), Err(KdbxError::EntryNotFound(_))));

        let root = db.root.uuid;
        let mut dup = Entry::new();
        dup.set("Title", "mail");
        db.add_entry(root, dup).unwrap();
        assert!(matches!(find_entry(&db, "mail"), Err(KdbxError::InvalidOperation(_))));
    }

    #[test]
    fn find_entry_skips_recycled_titles() {
        let (mut db, a, _) = db();
        db.recycle(a).unwrap();
        assert!(matches!(find_entry(&db, "mail"), Err(KdbxError::EntryNotFound(_))));
        assert_eq!(find_entry(&db, &a.to_string()).unwrap(), a);
    }
}
