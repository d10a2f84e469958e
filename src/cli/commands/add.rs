//! `kdbxkit add`: add an entry and save.

use std::path::Path;

use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cli::output;
use crate::cli::{open_for_update, Cli};
use crate::db::entry::{PASSWORD, TITLE, URL, USERNAME};
use crate::db::{Database, Entry};
use crate::errors::{KdbxError, Result};

/// Fields of a new entry as given on the command line.
pub struct NewEntry<'a> {
    pub title: &'a str,
    /// Prompted for after the database is unlocked when `None`.
    pub password: Option<&'a str>,
    pub username: Option<&'a str>,
    pub url: Option<&'a str>,
    pub group: Option<&'a str>,
}

/// Execute the `add` command.
pub fn execute(cli: &Cli, path: &Path, new: NewEntry<'_>) -> Result<()> {
    let (mut db, key) = open_for_update(cli, path)?;
    let password = match new.password {
        Some(p) => Zeroizing::new(p.to_string()),
        None => prompt_entry_password()?,
    };
    let uuid = add_entry(&mut db, &new, &password)?;
    crate::store::save(path, &db, &key)?;

    output::success(&format!("Added '{}' ({uuid})", new.title));
    Ok(())
}

fn prompt_entry_password() -> Result<Zeroizing<String>> {
    let pw = dialoguer::Password::new()
        .with_prompt("Entry password")
        .allow_empty_password(true)
        .interact()
        .map_err(|e| KdbxError::CommandFailed(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Insert the entry into the named group (or the root group). String
/// protection follows the database's memory protection flags.
pub fn add_entry(db: &mut Database, new: &NewEntry<'_>, password: &str) -> Result<Uuid> {
    let parent = match new.group {
        None => db.root.uuid,
        Some(name) => db
            .root
            .all_groups()
            .into_iter()
            .find(|g| g.name == name && !db.is_recycled(g.uuid))
            .map(|g| g.uuid)
            .ok_or_else(|| KdbxError::GroupNotFound(name.to_string()))?,
    };

    let mut entry = Entry::new();
    let protection = &db.meta.memory_protection;
    let mut set = |key: &str, value: &str| {
        entry.set_with_protection(key, value, key == PASSWORD || protection.protects(key));
    };
    set(TITLE, new.title);
    set(PASSWORD, password);
    if let Some(username) = new.username {
        set(USERNAME, username);
    }
    if let Some(url) = new.url {
        set(URL, url);
    }
    db.add_entry(parent, entry)
}
