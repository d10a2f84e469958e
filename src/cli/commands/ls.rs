//! `kdbxkit ls`: list every entry with its group path.

use std::path::Path;

use crate::cli::output::{self, EntryRow};
use crate::cli::{open_database, Cli};
use crate::db::{Database, Group};
use crate::errors::Result;

/// Execute the `ls` command.
pub fn execute(cli: &Cli, path: &Path, json: bool) -> Result<()> {
    let (db, _) = open_database(cli, path)?;
    let rows = entry_rows(&db);

    if json {
        return output::print_json(&rows);
    }

    let name = if db.meta.name.is_empty() {
        path.display().to_string()
    } else {
        db.meta.name.clone()
    };
    output::info(&format!("{name}: {} entr(ies)", rows.len()));
    output::print_entries_table(&rows);

    Ok(())
}

/// Rows for every live entry, depth first. The recycle bin is skipped.
pub fn entry_rows(db: &Database) -> Vec<EntryRow> {
    let mut rows = Vec::new();
    collect(db, &db.root, "", &mut rows);
    rows
}

fn collect(db: &Database, group: &Group, prefix: &str, rows: &mut Vec<EntryRow>) {
    if db.meta.recycle_bin_uuid == Some(group.uuid) {
        return;
    }
    let path = if prefix.is_empty() {
        group.name.clone()
    } else {
        format!("{prefix}/{}", group.name)
    };

    for entry in &group.entries {
        rows.push(EntryRow {
            group: path.clone(),
            title: entry.title(),
            username: entry.username(),
            url: entry.url(),
            modified: entry
                .times
                .last_modification
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        });
    }
    for child in &group.groups {
        collect(db, child, &path, rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Entry;

    #[test]
    fn rows_carry_group_paths_and_skip_the_recycle_bin() {
        let mut db = Database::default();
        db.root.name = "Root".into();
        let root = db.root.uuid;
        let work = db.add_group(root, Group::new("Work")).unwrap();
        let vpn = db.add_group(work, Group::new("VPN")).unwrap();

        let mut a = Entry::new();
        a.set("Title", "gateway");
        a.set("UserName", "alice");
        db.add_entry(vpn, a).unwrap();
        let mut b = Entry::new();
        b.set("Title", "old");
        let b = db.add_entry(root, b).unwrap();
        db.recycle(b).unwrap();

        let rows = entry_rows(&db);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].group, "Root/Work/VPN");
        assert_eq!(rows[0].title, "gateway");
        assert_eq!(rows[0].username, "alice");
    }
}
