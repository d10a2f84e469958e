use uuid::Uuid;

use super::entry::{CustomData, Entry};
use super::times::Times;

/// A folder of entries and sub-groups. Children are owned, so the tree is
/// acyclic by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    pub notes: String,
    pub icon_id: u32,
    pub custom_icon: Option<Uuid>,
    pub times: Times,
    pub is_expanded: bool,
    pub default_auto_type_sequence: String,
    /// `None` inherits from the parent group.
    pub enable_auto_type: Option<bool>,
    /// `None` inherits from the parent group.
    pub enable_searching: Option<bool>,
    pub last_top_visible_entry: Option<Uuid>,
    pub previous_parent_group: Option<Uuid>,
    pub tags: Vec<String>,
    pub custom_data: CustomData,
    pub entries: Vec<Entry>,
    pub groups: Vec<Group>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self::with_uuid(Uuid::new_v4(), name)
    }

    pub fn with_uuid(uuid: Uuid, name: &str) -> Self {
        Self {
            uuid,
            name: name.to_string(),
            notes: String::new(),
            icon_id: 48,
            custom_icon: None,
            times: Times::now(),
            is_expanded: true,
            default_auto_type_sequence: String::new(),
            enable_auto_type: None,
            enable_searching: None,
            last_top_visible_entry: None,
            previous_parent_group: None,
            tags: Vec::new(),
            custom_data: CustomData::new(),
            entries: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn find_group(&self, uuid: Uuid) -> Option<&Group> {
        if self.uuid == uuid {
            return Some(self);
        }
        self.groups.iter().find_map(|g| g.find_group(uuid))
    }

    pub fn find_group_mut(&mut self, uuid: Uuid) -> Option<&mut Group> {
        if self.uuid == uuid {
            return Some(self);
        }
        self.groups.iter_mut().find_map(|g| g.find_group_mut(uuid))
    }

    pub fn find_entry(&self, uuid: Uuid) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.uuid == uuid)
            .or_else(|| self.groups.iter().find_map(|g| g.find_entry(uuid)))
    }

    pub fn find_entry_mut(&mut self, uuid: Uuid) -> Option<&mut Entry> {
        if let Some(pos) = self.entries.iter().position(|e| e.uuid == uuid) {
            return self.entries.get_mut(pos);
        }
        self.groups.iter_mut().find_map(|g| g.find_entry_mut(uuid))
    }

    /// The group that directly contains the group or entry `uuid`.
    pub fn parent_of(&self, uuid: Uuid) -> Option<&Group> {
        if self.entries.iter().any(|e| e.uuid == uuid) || self.groups.iter().any(|g| g.uuid == uuid) {
            return Some(self);
        }
        self.groups.iter().find_map(|g| g.parent_of(uuid))
    }

    /// Every entry below this group, depth first.
    pub fn all_entries(&self) -> Vec<&Entry> {
        let mut out = Vec::new();
        self.collect_entries(&mut out);
        out
    }

    fn collect_entries<'a>(&'a self, out: &mut Vec<&'a Entry>) {
        out.extend(self.entries.iter());
        for group in &self.groups {
            group.collect_entries(out);
        }
    }

    /// This group and every group below it, depth first.
    pub fn all_groups(&self) -> Vec<&Group> {
        let mut out = vec![self];
        for group in &self.groups {
            out.extend(group.all_groups());
        }
        out
    }

    /// Detach the direct child entry `uuid`.
    pub(crate) fn take_entry(&mut self, uuid: Uuid) -> Option<Entry> {
        if let Some(pos) = self.entries.iter().position(|e| e.uuid == uuid) {
            return Some(self.entries.remove(pos));
        }
        self.groups.iter_mut().find_map(|g| g.take_entry(uuid))
    }

    /// Detach the descendant group `uuid`.
    pub(crate) fn take_group(&mut self, uuid: Uuid) -> Option<Group> {
        if let Some(pos) = self.groups.iter().position(|g| g.uuid == uuid) {
            return Some(self.groups.remove(pos));
        }
        self.groups.iter_mut().find_map(|g| g.take_group(uuid))
    }
}
