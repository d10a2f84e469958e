//! Colored terminal output helpers.
//!
//! All user-facing output goes through these functions so we get
//! consistent styling across every command.

use comfy_table::{ContentArrangement, Table};
use console::style;
use serde::Serialize;

use crate::errors::{KdbxError, Result};

/// Print a green success message: "check_mark {msg}"
pub fn success(msg: &str) {
    println!("{} {}", style("\u{2713}").green().bold(), msg);
}

/// Print a red error message: "x_mark {msg}"
pub fn error(msg: &str) {
    eprintln!("{} {}", style("\u{2717}").red().bold(), msg);
}

/// Print a yellow warning: "warning_sign {msg}"
pub fn warning(msg: &str) {
    eprintln!("{} {}", style("\u{26a0}").yellow().bold(), msg);
}

/// Print a blue info message: "info_sign {msg}"
pub fn info(msg: &str) {
    println!("{} {}", style("\u{2139}").blue().bold(), msg);
}

/// Print a dim tip/hint: "arrow {msg}"
pub fn tip(msg: &str) {
    println!("{} {}", style("\u{2192}").dim(), style(msg).dim());
}

/// One row of `kdbxkit ls`.
#[derive(Debug, Serialize)]
pub struct EntryRow {
    pub group: String,
    pub title: String,
    pub username: String,
    pub url: String,
    pub modified: String,
}

/// Print a table of entries (Group, Title, User, URL, Modified).
pub fn print_entries_table(rows: &[EntryRow]) {
    if rows.is_empty() {
        info("No entries in this database yet.");
        tip("Run `kdbxkit add <PATH> <TITLE>` to add your first entry.");
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Group", "Title", "User", "URL", "Modified"]);

    for r in rows {
        table.add_row(vec![
            r.group.clone(),
            r.title.clone(),
            r.username.clone(),
            r.url.clone(),
            r.modified.clone(),
        ]);
    }

    println!("{table}");
}

/// Print two-column `field | value` pairs.
pub fn print_fields(fields: &[(String, String)]) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    for (name, value) in fields {
        table.add_row(vec![name.clone(), value.clone()]);
    }

    println!("{table}");
}

/// Print any serializable value as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| KdbxError::SerializationError(e.to_string()))?;
    println!("{text}");
    Ok(())
}
