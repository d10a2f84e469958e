//! `kdbxkit show`: print the fields of one entry.

use std::path::Path;

use crate::cli::output;
use crate::cli::{find_entry, open_database, Cli};
use crate::db::entry::{PASSWORD, TITLE};
use crate::db::Entry;
use crate::errors::{KdbxError, Result};

const MASK: &str = "********";

/// Execute the `show` command.
pub fn execute(cli: &Cli, path: &Path, query: &str, reveal: bool) -> Result<()> {
    let (db, _) = open_database(cli, path)?;
    let uuid = find_entry(&db, query)?;
    let entry = db
        .find_entry(uuid)
        .ok_or_else(|| KdbxError::EntryNotFound(query.to_string()))?;

    output::print_fields(&entry_fields(entry, reveal));
    if !reveal && entry.strings.values().any(|v| v.is_protected()) {
        output::tip("Pass --reveal to print protected values.");
    }
    Ok(())
}

/// Field/value pairs for display. Protected values are masked unless
/// `reveal` is set.
pub fn entry_fields(entry: &Entry, reveal: bool) -> Vec<(String, String)> {
    let mut fields = vec![("UUID".to_string(), entry.uuid.to_string())];

    // Title first, then the rest in key order.
    let mut keys: Vec<&String> = entry.strings.keys().collect();
    keys.sort_by_key(|k| (k.as_str() != TITLE, k.as_str() != PASSWORD));
    for key in keys {
        let value = &entry.strings[key];
        let shown = if value.is_protected() && !reveal {
            MASK.to_string()
        } else {
            value.reveal().to_string()
        };
        fields.push((key.clone(), shown));
    }

    if !entry.tags.is_empty() {
        fields.push(("Tags".into(), entry.tags.join(", ")));
    }
    for (name, attachment) in &entry.attachments {
        fields.push((
            format!("Attachment {name}"),
            format!("{} bytes", attachment.data.len()),
        ));
    }
    fields.push((
        "Modified".into(),
        entry.times.last_modification.format("%Y-%m-%d %H:%M:%S").to_string(),
    ));
    if entry.times.expires {
        fields.push((
            "Expires".into(),
            entry.times.expiry.format("%Y-%m-%d %H:%M:%S").to_string(),
        ));
    }
    fields.push(("History".into(), format!("{} revision(s)", entry.history.len())));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Attachment;

    fn entry() -> Entry {
        let mut e = Entry::new();
        e.set("Title", "mail");
        e.set("UserName", "bob");
        e.set(PASSWORD, "hunter2");
        e.attachments.insert(
            "key.pem".into(),
            Attachment {
                data: vec![0; 12],
                protected: false,
            },
        );
        e
    }

    fn value<'a>(fields: &'a [(String, String)], name: &str) -> &'a str {
        &fields.iter().find(|(n, _)| n == name).unwrap().1
    }

    #[test]
    fn password_is_masked_unless_revealed() {
        let e = entry();
        assert_eq!(value(&entry_fields(&e, false), PASSWORD), MASK);
        assert_eq!(value(&entry_fields(&e, true), PASSWORD), "hunter2");
        assert_eq!(value(&entry_fields(&e, false), "UserName"), "bob");
    }

    #[test]
    fn title_comes_first_and_attachments_are_listed() {
        let fields = entry_fields(&entry(), false);
        assert_eq!(fields[0].0, "UUID");
        assert_eq!(fields[1], ("Title".to_string(), "mail".to_string()));
        assert_eq!(fields[2].0, PASSWORD);
        assert_eq!(value(&fields, "Attachment key.pem"), "12 bytes");
    }
}
