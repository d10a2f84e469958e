//! `kdbxkit keyfile-generate`: create a new random key file.

use std::path::Path;

use crate::cli::output;
use crate::crypto::KeyFile;
use crate::errors::Result;

/// Execute the `keyfile-generate` command.
pub fn execute(path: &Path) -> Result<()> {
    KeyFile::generate(path)?;

    output::success(&format!("Key file generated at {}", path.display()));
    output::warning("Keep this file secret! Anyone with it can help unlock your database.");
    output::tip("Keep a backup: a database locked with a lost key file cannot be opened.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyFileKind;
    use tempfile::TempDir;

    #[test]
    fn generates_a_loadable_v2_key_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.keyx");
        execute(&path).unwrap();

        let loaded = KeyFile::load(&path).unwrap();
        assert_eq!(loaded.kind(), KeyFileKind::XmlV2);
        assert!(!loaded.is_legacy());
        assert!(execute(&path).is_err(), "existing key file must not be overwritten");
    }
}
