use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::protected::ProtectedValue;
use super::times::Times;

// ---------------------------------------------------------------------------
// Standard string keys
// ---------------------------------------------------------------------------

pub const TITLE: &str = "Title";
pub const USERNAME: &str = "UserName";
pub const PASSWORD: &str = "Password";
pub const URL: &str = "URL";
pub const NOTES: &str = "Notes";

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A string attribute value, either plain or held protected in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Plain(String),
    Protected(ProtectedValue),
}

impl Value {
    pub fn is_protected(&self) -> bool {
        matches!(self, Value::Protected(_))
    }

    /// Clear text of the value.
    pub fn reveal(&self) -> Zeroizing<String> {
        match self {
            Value::Plain(s) => Zeroizing::new(s.clone()),
            Value::Protected(p) => p.reveal(),
        }
    }
}

/// A file attached to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub data: Vec<u8>,
    /// Kept protected in the KDBX 4 inner header.
    pub protected: bool,
}

/// One key/value pair of plugin-owned custom data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDataItem {
    pub value: String,
    pub last_modified: Option<DateTime<Utc>>,
}

pub type CustomData = BTreeMap<String, CustomDataItem>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoTypeAssociation {
    pub window: String,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoType {
    pub enabled: bool,
    pub obfuscation: u32,
    pub default_sequence: String,
    pub associations: Vec<AutoTypeAssociation>,
}

impl Default for AutoType {
    fn default() -> Self {
        Self {
            enabled: true,
            obfuscation: 0,
            default_sequence: String::new(),
            associations: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub uuid: Uuid,
    pub icon_id: u32,
    pub custom_icon: Option<Uuid>,
    pub foreground_color: Option<String>,
    pub background_color: Option<String>,
    pub override_url: String,
    pub tags: Vec<String>,
    pub quality_check: bool,
    pub previous_parent_group: Option<Uuid>,
    pub times: Times,
    pub strings: BTreeMap<String, Value>,
    pub attachments: BTreeMap<String, Attachment>,
    pub auto_type: AutoType,
    pub custom_data: CustomData,
    /// Prior revisions, oldest first. Revisions never carry history.
    pub history: Vec<Entry>,
}

impl Default for Entry {
    fn default() -> Self {
        Self::with_uuid(Uuid::new_v4())
    }
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            icon_id: 0,
            custom_icon: None,
            foreground_color: None,
            background_color: None,
            override_url: String::new(),
            tags: Vec::new(),
            quality_check: true,
            previous_parent_group: None,
            times: Times::now(),
            strings: BTreeMap::new(),
            attachments: BTreeMap::new(),
            auto_type: AutoType::default(),
            custom_data: CustomData::new(),
            history: Vec::new(),
        }
    }

    /// Set a string attribute. `Password` is always kept protected.
    pub fn set(&mut self, key: &str, value: &str) {
        self.set_with_protection(key, value, key == PASSWORD);
    }

    pub fn set_with_protection(&mut self, key: &str, value: &str, protected: bool) {
        let value = if protected {
            Value::Protected(ProtectedValue::new(value))
        } else {
            Value::Plain(value.to_string())
        };
        self.strings.insert(key.to_string(), value);
    }

    /// Clear text of a string attribute, empty when absent.
    pub fn get(&self, key: &str) -> Zeroizing<String> {
        self.strings
            .get(key)
            .map(Value::reveal)
            .unwrap_or_default()
    }

    pub fn title(&self) -> String {
        self.get(TITLE).to_string()
    }

    pub fn username(&self) -> String {
        self.get(USERNAME).to_string()
    }

    pub fn url(&self) -> String {
        self.get(URL).to_string()
    }

    pub fn password(&self) -> Zeroizing<String> {
        self.get(PASSWORD)
    }

    /// Push a copy of the current state onto the history, ready for an
    /// edit. The copy carries no history of its own.
    pub fn snapshot(&mut self) {
        let mut revision = self.clone();
        revision.history.clear();
        self.history.push(revision);
    }

    /// Drop the oldest revisions until both limits hold. A negative limit
    /// means unlimited.
    pub fn truncate_history(&mut self, max_items: i32, max_size: i64) {
        if max_items >= 0 {
            let max_items = max_items as usize;
            if self.history.len() > max_items {
                let excess = self.history.len() - max_items;
                self.history.drain(..excess);
            }
        }

        if max_size >= 0 {
            let mut total: u64 = 0;
            let mut keep_from = self.history.len();
            for (i, revision) in self.history.iter().enumerate().rev() {
                total += revision.approximate_size();
                if total > max_size as u64 {
                    break;
                }
                keep_from = i;
            }
            self.history.drain(..keep_from);
        }
    }

    /// Rough in-memory footprint used for the history size limit.
    pub fn approximate_size(&self) -> u64 {
        let strings: usize = self
            .strings
            .iter()
            .map(|(k, v)| {
                k.len()
                    + match v {
                        Value::Plain(s) => s.len(),
                        Value::Protected(p) => p.len(),
                    }
            })
            .sum();
        let attachments: usize = self
            .attachments
            .iter()
            .map(|(k, a)| k.len() + a.data.len())
            .sum();
        let tags: usize = self.tags.iter().map(String::len).sum();
        let custom: usize = self
            .custom_data
            .iter()
            .map(|(k, v)| k.len() + v.value.len())
            .sum();
        let auto_type: usize = self.auto_type.default_sequence.len()
            + self
                .auto_type
                .associations
                .iter()
                .map(|a| a.window.len() + a.sequence.len())
                .sum::<usize>();
        (strings + attachments + tags + custom + auto_type + self.override_url.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_is_protected_by_default() {
        let mut entry = Entry::new();
        entry.set(TITLE, "Mail");
        entry.set(PASSWORD, "pw");
        assert!(!entry.strings[TITLE].is_protected());
        assert!(entry.strings[PASSWORD].is_protected());
        assert_eq!(entry.password().as_str(), "pw");
        assert_eq!(entry.get("missing").as_str(), "");
    }

    #[test]
    fn snapshot_keeps_history_flat() {
        let mut entry = Entry::new();
        entry.set(TITLE, "v1");
        entry.snapshot();
        entry.set(TITLE, "v2");
        entry.snapshot();
        entry.set(TITLE, "v3");

        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[0].title(), "v1");
        assert_eq!(entry.history[1].title(), "v2");
        assert!(entry.history.iter().all(|h| h.history.is_empty()));
        assert!(entry.history.iter().all(|h| h.uuid == entry.uuid));
    }

    #[test]
    fn truncate_history_by_count_drops_oldest() {
        let mut entry = Entry::new();
        for i in 0..5 {
            entry.set(TITLE, &format!("v{i}"));
            entry.snapshot();
        }
        entry.truncate_history(2, -1);
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[0].title(), "v3");
        assert_eq!(entry.history[1].title(), "v4");
    }

    #[test]
    fn truncate_history_by_size() {
        let mut entry = Entry::new();
        for i in 0..4 {
            entry.set(NOTES, &"x".repeat(100));
            entry.set(TITLE, &format!("v{i}"));
            entry.snapshot();
        }
        let one = entry.history[0].approximate_size();
        entry.truncate_history(-1, (one * 2) as i64);
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[1].title(), "v3");

        entry.truncate_history(-1, 0);
        assert!(entry.history.is_empty());
    }
}
