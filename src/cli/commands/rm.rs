//! `kdbxkit rm`: recycle or delete an entry.

use std::path::Path;

use dialoguer::Confirm;

use crate::cli::output;
use crate::cli::{find_entry, open_for_update, Cli};
use crate::errors::{KdbxError, Result};

/// Execute the `rm` command.
pub fn execute(cli: &Cli, path: &Path, query: &str, permanent: bool, force: bool) -> Result<()> {
    let (mut db, key) = open_for_update(cli, path)?;
    let uuid = find_entry(&db, query)?;

    // Unless --force is set, ask for confirmation before deleting.
    if !force {
        let verb = if permanent { "Permanently delete" } else { "Recycle" };
        let confirmed = Confirm::new()
            .with_prompt(format!("{verb} entry '{query}'?"))
            .default(false)
            .interact()
            .map_err(|e| KdbxError::CommandFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    if permanent {
        db.delete(uuid)?;
    } else {
        db.recycle(uuid)?;
    }
    crate::store::save(path, &db, &key)?;

    if permanent || db.find_entry(uuid).is_none() {
        output::success(&format!("Deleted entry '{query}'"));
    } else {
        output::success(&format!("Moved entry '{query}' to the recycle bin"));
    }
    Ok(())
}
