use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::entry::{CustomData, NOTES, PASSWORD, TITLE, URL, USERNAME};

/// Generator name written into new databases.
pub const GENERATOR: &str = "kdbxkit";

/// Which standard fields are written protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryProtection {
    pub protect_title: bool,
    pub protect_username: bool,
    pub protect_password: bool,
    pub protect_url: bool,
    pub protect_notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self {
            protect_title: false,
            protect_username: false,
            protect_password: true,
            protect_url: false,
            protect_notes: false,
        }
    }
}

impl MemoryProtection {
    /// Whether the standard field `key` should be stored protected.
    /// Custom keys are never protected by policy.
    pub fn protects(&self, key: &str) -> bool {
        match key {
            TITLE => self.protect_title,
            USERNAME => self.protect_username,
            PASSWORD => self.protect_password,
            URL => self.protect_url,
            NOTES => self.protect_notes,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomIcon {
    pub uuid: Uuid,
    pub data: Vec<u8>,
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Database-wide metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub generator: String,
    pub name: String,
    pub name_changed: Option<DateTime<Utc>>,
    pub description: String,
    pub description_changed: Option<DateTime<Utc>>,
    pub default_username: String,
    pub default_username_changed: Option<DateTime<Utc>>,
    pub maintenance_history_days: u32,
    pub color: Option<String>,
    pub master_key_changed: Option<DateTime<Utc>>,
    /// Days before a key change is recommended, -1 for never.
    pub master_key_change_rec: i64,
    /// Days before a key change is forced, -1 for never.
    pub master_key_change_force: i64,
    pub master_key_change_force_once: bool,
    pub memory_protection: MemoryProtection,
    pub custom_icons: Vec<CustomIcon>,
    pub recycle_bin_enabled: bool,
    pub recycle_bin_uuid: Option<Uuid>,
    pub recycle_bin_changed: Option<DateTime<Utc>>,
    pub entry_templates_group: Option<Uuid>,
    pub entry_templates_group_changed: Option<DateTime<Utc>>,
    /// -1 for unlimited.
    pub history_max_items: i32,
    /// Bytes, -1 for unlimited.
    pub history_max_size: i64,
    pub last_selected_group: Option<Uuid>,
    pub last_top_visible_group: Option<Uuid>,
    pub settings_changed: Option<DateTime<Utc>>,
    pub custom_data: CustomData,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            generator: GENERATOR.to_string(),
            name: String::new(),
            name_changed: None,
            description: String::new(),
            description_changed: None,
            default_username: String::new(),
            default_username_changed: None,
            maintenance_history_days: 365,
            color: None,
            master_key_changed: None,
            master_key_change_rec: -1,
            master_key_change_force: -1,
            master_key_change_force_once: false,
            memory_protection: MemoryProtection::default(),
            custom_icons: Vec::new(),
            recycle_bin_enabled: true,
            recycle_bin_uuid: None,
            recycle_bin_changed: None,
            entry_templates_group: None,
            entry_templates_group_changed: None,
            history_max_items: 10,
            history_max_size: 6 * 1024 * 1024,
            last_selected_group: None,
            last_top_visible_group: None,
            settings_changed: None,
            custom_data: CustomData::new(),
        }
    }
}

impl Metadata {
    pub fn custom_icon(&self, uuid: Uuid) -> Option<&CustomIcon> {
        self.custom_icons.iter().find(|i| i.uuid == uuid)
    }
}
