//! Database files on disk.
//!
//! Saving never leaves a half-written database behind: bytes go to a
//! hidden sibling file which is synced, read back, compared and checked
//! for a readable header, and only then renamed over the target. On any
//! failure the sibling is removed and the previous file is left as it was.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::crypto::{CancelToken, CompositeKey};
use crate::db::Database;
use crate::errors::{KdbxError, Result};
use crate::kdbx;

/// Read and decrypt the database at `path`.
pub fn open(path: &Path, key: &CompositeKey) -> Result<Database> {
    open_with_cancel(path, key, &CancelToken::new())
}

pub fn open_with_cancel(path: &Path, key: &CompositeKey, cancel: &CancelToken) -> Result<Database> {
    let data = read_file(path)?;
    let db = kdbx::open_with_cancel(&data, key, cancel)?;
    tracing::debug!(path = %path.display(), entries = db.entry_count(), "database opened");
    Ok(db)
}

/// Raw bytes of a database file.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(KdbxError::DatabaseNotFound(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

/// Write a new database file. Fails if `path` already exists.
pub fn create(path: &Path, db: &Database, key: &CompositeKey) -> Result<()> {
    if path.exists() {
        return Err(KdbxError::DatabaseAlreadyExists(path.to_path_buf()));
    }
    save(path, db, key)
}

/// Serialize `db` and replace the file at `path` atomically.
pub fn save(path: &Path, db: &Database, key: &CompositeKey) -> Result<()> {
    let bytes = kdbx::save(db, key)?;
    write_atomic(path, &bytes, |written| kdbx::read_header(written).map(drop))?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "database saved");
    Ok(())
}

// ---------------------------------------------------------------------------
// Atomic write
// ---------------------------------------------------------------------------

fn temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ))
}

/// Replace `path` with `bytes`. `check` runs on the bytes read back from
/// the temporary file before it is renamed into place.
pub(crate) fn write_atomic<F>(path: &Path, bytes: &[u8], check: F) -> Result<()>
where
    F: FnOnce(&[u8]) -> Result<()>,
{
    let tmp = temp_path(path);
    let result = write_verified(&tmp, bytes, check).and_then(|()| Ok(fs::rename(&tmp, path)?));
    if let Err(e) = &result {
        tracing::warn!(path = %path.display(), error = %e, "save failed, discarding temporary file");
        // Best effort; the write error is what the caller needs to see.
        let _ = fs::remove_file(&tmp);
        return result;
    }
    sync_parent(path);
    Ok(())
}

fn write_verified<F>(tmp: &Path, bytes: &[u8], check: F) -> Result<()>
where
    F: FnOnce(&[u8]) -> Result<()>,
{
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    let written = fs::read(tmp)?;
    if written != bytes {
        return Err(io::Error::other("database read back differs from what was written").into());
    }
    check(&written)
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    let parent = path.parent().unwrap_or(Path::new("."));
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::Kdf;
    use crate::db::{DatabaseSettings, Entry};
    use crate::errors::ErrorKind;
    use tempfile::TempDir;

    fn database() -> Database {
        let mut db = Database::new(DatabaseSettings {
            kdf: Kdf::aes(10),
            ..DatabaseSettings::default()
        });
        let root = db.root.uuid;
        let mut entry = Entry::new();
        entry.set("Title", "Example");
        db.add_entry(root, entry).unwrap();
        db
    }

    #[test]
    fn create_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.kdbx");
        let key = CompositeKey::from_password("pw");
        let db = database();

        create(&path, &db, &key).unwrap();
        assert_eq!(open(&path, &key).unwrap(), db);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.kdbx");
        fs::write(&path, b"keep me").unwrap();
        let err = create(&path, &database(), &CompositeKey::from_password("pw")).unwrap_err();
        assert!(matches!(err, KdbxError::DatabaseAlreadyExists(_)));
        assert_eq!(fs::read(&path).unwrap(), b"keep me");
    }

    #[test]
    fn open_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = open(&dir.path().join("nope.kdbx"), &CompositeKey::from_password("pw")).unwrap_err();
        assert!(matches!(err, KdbxError::DatabaseNotFound(_)));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn failed_save_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.kdbx");
        let key = CompositeKey::from_password("pw");
        let db = database();
        create(&path, &db, &key).unwrap();
        let before = fs::read(&path).unwrap();

        // A history revision with a foreign UUID breaks the model, so
        // nothing may be written.
        let mut broken = db.clone();
        let mut revision = Entry::new();
        revision.set("Title", "stray");
        broken.root.entries[0].history.push(revision);
        assert!(save(&path, &broken, &key).is_err());

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn failed_rename_removes_temporary_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("occupied");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("child"), b"x").unwrap();

        assert!(write_atomic(&path, b"bytes", |_| Ok(())).is_err());
        assert!(!temp_path(&path).exists());
        assert!(path.is_dir());
    }

    #[test]
    fn unreadable_header_is_never_renamed_into_place() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vault.kdbx");
        let key = CompositeKey::from_password("pw");
        create(&path, &database(), &key).unwrap();
        let before = fs::read(&path).unwrap();

        let err = write_atomic(&path, b"not a database", |written| {
            kdbx::read_header(written).map(drop)
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!temp_path(&path).exists());
    }
}
