//! The in-memory database: settings, metadata, the group tree and the
//! deletion log.
//!
//! The container codecs only ever produce and consume this model. All
//! application-side edits go through the helpers here so the invariants
//! hold: live UUIDs are unique, history revisions share their owner's UUID
//! and carry no history, tombstones are only added by deletion.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::entry::Entry;
use super::group::Group;
use super::meta::Metadata;
use super::times;
use crate::crypto::kdf::{Argon2Variant, Kdf};
use crate::crypto::{Cipher, ProtectedStreamAlgorithm};
use crate::errors::{KdbxError, PayloadError, Result, Unsupported};
use crate::kdbx::compression::Compression;
use crate::kdbx::variant_map::VariantMap;
use crate::kdbx::FormatVersion;

/// Name given to a recycle bin created on demand.
const RECYCLE_BIN_NAME: &str = "Recycle Bin";
const RECYCLE_BIN_ICON: u32 = 43;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Container-level settings: everything that lives in the outer header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub version: FormatVersion,
    pub cipher: Cipher,
    pub compression: Compression,
    pub kdf: Kdf,
    pub protected_stream: ProtectedStreamAlgorithm,
    /// KDBX 4 only; plugins store unencrypted data here.
    pub public_custom_data: VariantMap,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            version: FormatVersion::Kdbx4,
            cipher: Cipher::Aes256,
            compression: Compression::Gzip,
            kdf: Kdf::argon2(Argon2Variant::Argon2id, 64 * 1024, 3, 2),
            protected_stream: ProtectedStreamAlgorithm::ChaCha20,
            public_custom_data: VariantMap::new(),
        }
    }
}

impl DatabaseSettings {
    /// Settings for a KDBX 3.1 file: AES-KDF and Salsa20 protection.
    pub fn kdbx3(rounds: u64) -> Self {
        Self {
            version: FormatVersion::Kdbx3,
            kdf: Kdf::aes(rounds),
            protected_stream: ProtectedStreamAlgorithm::Salsa20,
            ..Self::default()
        }
    }

    /// Reject combinations the target format cannot express.
    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        if self.version == FormatVersion::Kdbx3 {
            if !matches!(self.kdf, Kdf::AesKdf { .. }) {
                return Err(Unsupported::Feature("KDBX 3.1 only supports AES-KDF").into());
            }
            if !self.public_custom_data.is_empty() {
                return Err(Unsupported::Feature("KDBX 3.1 has no public custom data").into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// A deletion record, kept so synchronisation does not resurrect the item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedObject {
    pub uuid: Uuid,
    pub deletion_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub settings: DatabaseSettings,
    pub meta: Metadata,
    pub root: Group,
    pub deleted_objects: Vec<DeletedObject>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DatabaseSettings::default())
    }
}

impl Database {
    /// An empty database with a root group and default metadata.
    pub fn new(settings: DatabaseSettings) -> Self {
        let now = times::now();
        let meta = Metadata {
            name_changed: Some(now),
            description_changed: Some(now),
            default_username_changed: Some(now),
            master_key_changed: Some(now),
            recycle_bin_changed: Some(now),
            entry_templates_group_changed: Some(now),
            settings_changed: Some(now),
            ..Metadata::default()
        };
        Self {
            settings,
            meta,
            root: Group::new("Root"),
            deleted_objects: Vec::new(),
        }
    }

    // --- Lookup -------------------------------------------------------------

    pub fn find_entry(&self, uuid: Uuid) -> Option<&Entry> {
        self.root.find_entry(uuid)
    }

    pub fn find_entry_mut(&mut self, uuid: Uuid) -> Option<&mut Entry> {
        self.root.find_entry_mut(uuid)
    }

    pub fn find_group(&self, uuid: Uuid) -> Option<&Group> {
        self.root.find_group(uuid)
    }

    pub fn find_group_mut(&mut self, uuid: Uuid) -> Option<&mut Group> {
        self.root.find_group_mut(uuid)
    }

    /// The group containing the entry or group `uuid`. `None` for the root
    /// and for unknown UUIDs.
    pub fn parent_of(&self, uuid: Uuid) -> Option<&Group> {
        self.root.parent_of(uuid)
    }

    fn contains(&self, uuid: Uuid) -> bool {
        self.find_group(uuid).is_some() || self.find_entry(uuid).is_some()
    }

    pub fn recycle_bin(&self) -> Option<&Group> {
        self.meta.recycle_bin_uuid.and_then(|id| self.find_group(id))
    }

    /// True when `uuid` is the recycle bin or lies below it.
    pub fn is_recycled(&self, uuid: Uuid) -> bool {
        match self.meta.recycle_bin_uuid {
            Some(bin) => self.is_within(uuid, bin),
            None => false,
        }
    }

    /// True when `uuid` is `ancestor` or one of its descendants.
    pub fn is_within(&self, uuid: Uuid, ancestor: Uuid) -> bool {
        let mut current = uuid;
        loop {
            if current == ancestor {
                return true;
            }
            match self.parent_of(current) {
                Some(parent) => current = parent.uuid,
                None => return false,
            }
        }
    }

    // --- Editing ------------------------------------------------------------

    pub fn add_group(&mut self, parent: Uuid, group: Group) -> Result<Uuid> {
        let uuid = group.uuid;
        if uuid.is_nil() || self.contains(uuid) {
            return Err(PayloadError::DuplicateUuid(uuid).into());
        }
        let parent_group = self
            .find_group_mut(parent)
            .ok_or_else(|| KdbxError::GroupNotFound(parent.to_string()))?;
        parent_group.groups.push(group);
        Ok(uuid)
    }

    pub fn add_entry(&mut self, parent: Uuid, entry: Entry) -> Result<Uuid> {
        let uuid = entry.uuid;
        if uuid.is_nil() || self.contains(uuid) {
            return Err(PayloadError::DuplicateUuid(uuid).into());
        }
        let parent_group = self
            .find_group_mut(parent)
            .ok_or_else(|| KdbxError::GroupNotFound(parent.to_string()))?;
        parent_group.entries.push(entry);
        Ok(uuid)
    }

    /// Edit an entry, keeping its previous state in the history and
    /// trimming the history to the configured limits.
    pub fn update_entry<F>(&mut self, uuid: Uuid, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Entry),
    {
        let max_items = self.meta.history_max_items;
        let max_size = self.meta.history_max_size;
        let entry = self
            .find_entry_mut(uuid)
            .ok_or_else(|| KdbxError::EntryNotFound(uuid.to_string()))?;
        entry.snapshot();
        edit(entry);
        entry.uuid = uuid;
        entry.times.touch();
        entry.truncate_history(max_items, max_size);
        Ok(())
    }

    /// Move an entry or group into the recycle bin, creating the bin if
    /// needed. Items already in the bin, or any item when the bin is
    /// disabled, are deleted permanently.
    pub fn recycle(&mut self, uuid: Uuid) -> Result<()> {
        if uuid == self.root.uuid {
            return Err(KdbxError::InvalidOperation("cannot recycle the root group".into()));
        }
        if !self.meta.recycle_bin_enabled || self.is_recycled(uuid) {
            return self.delete(uuid);
        }

        let old_parent = self
            .parent_of(uuid)
            .map(|g| g.uuid)
            .ok_or_else(|| KdbxError::EntryNotFound(uuid.to_string()))?;
        if let Some(bin) = self.recycle_bin().map(|g| g.uuid) {
            if self.is_within(bin, uuid) {
                return Err(KdbxError::InvalidOperation(
                    "cannot recycle a group that contains the recycle bin".into(),
                ));
            }
        }
        let bin = self.ensure_recycle_bin()?;
        let now = times::now();

        if let Some(mut entry) = self.root.take_entry(uuid) {
            entry.previous_parent_group = Some(old_parent);
            entry.times.location_changed = now;
            self.push_into(bin, |g| g.entries.push(entry))?;
        } else if let Some(mut group) = self.root.take_group(uuid) {
            group.previous_parent_group = Some(old_parent);
            group.times.location_changed = now;
            self.push_into(bin, |g| g.groups.push(group))?;
        }
        tracing::debug!(%uuid, "moved to recycle bin");
        Ok(())
    }

    fn push_into<F: FnOnce(&mut Group)>(&mut self, target: Uuid, push: F) -> Result<()> {
        let group = self
            .find_group_mut(target)
            .ok_or_else(|| KdbxError::GroupNotFound(target.to_string()))?;
        push(group);
        Ok(())
    }

    fn ensure_recycle_bin(&mut self) -> Result<Uuid> {
        if let Some(bin) = self.recycle_bin() {
            return Ok(bin.uuid);
        }
        let mut bin = Group::new(RECYCLE_BIN_NAME);
        bin.icon_id = RECYCLE_BIN_ICON;
        bin.enable_auto_type = Some(false);
        bin.enable_searching = Some(false);
        let root = self.root.uuid;
        let uuid = self.add_group(root, bin)?;
        self.meta.recycle_bin_uuid = Some(uuid);
        self.meta.recycle_bin_changed = Some(times::now());
        Ok(uuid)
    }

    /// Remove an entry or group (with everything below it) and record a
    /// tombstone for each removed item.
    pub fn delete(&mut self, uuid: Uuid) -> Result<()> {
        if uuid == self.root.uuid {
            return Err(KdbxError::InvalidOperation("cannot delete the root group".into()));
        }
        let now = times::now();
        let mut removed = Vec::new();

        if let Some(entry) = self.root.take_entry(uuid) {
            removed.push(entry.uuid);
        } else if let Some(group) = self.root.take_group(uuid) {
            removed.extend(group.all_groups().iter().map(|g| g.uuid));
            removed.extend(group.all_entries().iter().map(|e| e.uuid));
            if self.meta.recycle_bin_uuid == Some(group.uuid) {
                self.meta.recycle_bin_uuid = None;
                self.meta.recycle_bin_changed = Some(now);
            }
        } else {
            return Err(KdbxError::EntryNotFound(uuid.to_string()));
        }

        self.deleted_objects.extend(removed.into_iter().map(|uuid| DeletedObject {
            uuid,
            deletion_time: now,
        }));
        tracing::debug!(%uuid, "deleted permanently");
        Ok(())
    }

    // --- Invariants ---------------------------------------------------------

    /// Check the tree invariants: unique live UUIDs and flat, UUID-consistent
    /// history.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for group in self.root.all_groups() {
            if group.uuid.is_nil() {
                return Err(PayloadError::NullUuid("group").into());
            }
            if !seen.insert(group.uuid) {
                return Err(PayloadError::DuplicateUuid(group.uuid).into());
            }
            for entry in &group.entries {
                if entry.uuid.is_nil() {
                    return Err(PayloadError::NullUuid("entry").into());
                }
                if !seen.insert(entry.uuid) {
                    return Err(PayloadError::DuplicateUuid(entry.uuid).into());
                }
                for revision in &entry.history {
                    if revision.uuid != entry.uuid {
                        return Err(PayloadError::HistoryUuidMismatch.into());
                    }
                    if !revision.history.is_empty() {
                        return Err(PayloadError::NestedHistory.into());
                    }
                }
            }
        }
        Ok(())
    }

    pub fn entry_count(&self) -> usize {
        self.root.all_entries().len()
    }

    pub fn group_count(&self) -> usize {
        self.root.all_groups().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::entry::TITLE;

    fn db_with_entry() -> (Database, Uuid, Uuid) {
        let mut db = Database::default();
        let root = db.root.uuid;
        let group = db.add_group(root, Group::new("Mail")).unwrap();
        let mut entry = Entry::new();
        entry.set(TITLE, "Inbox");
        let entry = db.add_entry(group, entry).unwrap();
        (db, group, entry)
    }

    #[test]
    fn add_and_find() {
        let (db, group, entry) = db_with_entry();
        assert_eq!(db.find_entry(entry).unwrap().title(), "Inbox");
        assert_eq!(db.parent_of(entry).unwrap().uuid, group);
        assert_eq!(db.parent_of(group).unwrap().uuid, db.root.uuid);
        assert!(db.validate().is_ok());
    }

    #[test]
    fn duplicate_uuid_is_rejected() {
        let (mut db, group, entry) = db_with_entry();
        let dup = Entry::with_uuid(entry);
        assert!(matches!(
            db.add_entry(group, dup),
            Err(KdbxError::Payload(PayloadError::DuplicateUuid(_)))
        ));
    }

    #[test]
    fn add_to_unknown_group_fails() {
        let mut db = Database::default();
        assert!(matches!(
            db.add_entry(Uuid::new_v4(), Entry::new()),
            Err(KdbxError::GroupNotFound(_))
        ));
    }

    #[test]
    fn recycle_creates_bin_and_moves_entry() {
        let (mut db, group, entry) = db_with_entry();
        db.recycle(entry).unwrap();

        let bin = db.recycle_bin().expect("bin created");
        assert_eq!(bin.name, RECYCLE_BIN_NAME);
        assert_eq!(db.parent_of(entry).unwrap().uuid, bin.uuid);
        assert_eq!(db.find_entry(entry).unwrap().previous_parent_group, Some(group));
        assert!(db.is_recycled(entry));
        assert!(db.deleted_objects.is_empty());

        // Recycling again deletes for good.
        db.recycle(entry).unwrap();
        assert!(db.find_entry(entry).is_none());
        assert_eq!(db.deleted_objects.len(), 1);
        assert_eq!(db.deleted_objects[0].uuid, entry);
    }

    #[test]
    fn recycle_refuses_group_holding_the_bin() {
        let mut db = Database::default();
        let root = db.root.uuid;
        let outer = db.add_group(root, Group::new("Outer")).unwrap();
        let bin = db.add_group(outer, Group::new(RECYCLE_BIN_NAME)).unwrap();
        db.meta.recycle_bin_uuid = Some(bin);
        let mut entry = Entry::new();
        entry.set(TITLE, "keep me");
        let entry = db.add_entry(outer, entry).unwrap();

        assert!(matches!(db.recycle(outer), Err(KdbxError::InvalidOperation(_))));
        assert_eq!(db.parent_of(outer).unwrap().uuid, root);
        assert_eq!(db.parent_of(bin).unwrap().uuid, outer);
        assert_eq!(db.find_entry(entry).unwrap().title(), "keep me");
        assert!(db.deleted_objects.is_empty());
        assert!(db.validate().is_ok());
    }

    #[test]
    fn recycle_with_disabled_bin_deletes() {
        let (mut db, _, entry) = db_with_entry();
        db.meta.recycle_bin_enabled = false;
        db.recycle(entry).unwrap();
        assert!(db.recycle_bin().is_none());
        assert_eq!(db.deleted_objects.len(), 1);
    }

    #[test]
    fn deleting_group_tombstones_descendants() {
        let (mut db, group, entry) = db_with_entry();
        db.delete(group).unwrap();
        let ids: Vec<Uuid> = db.deleted_objects.iter().map(|d| d.uuid).collect();
        assert!(ids.contains(&group));
        assert!(ids.contains(&entry));
        assert!(db.delete(group).is_err());
    }

    #[test]
    fn root_cannot_be_deleted() {
        let mut db = Database::default();
        let root = db.root.uuid;
        assert!(matches!(db.delete(root), Err(KdbxError::InvalidOperation(_))));
        assert!(matches!(db.recycle(root), Err(KdbxError::InvalidOperation(_))));
    }

    #[test]
    fn update_entry_records_history() {
        let (mut db, _, entry) = db_with_entry();
        db.meta.history_max_items = 2;
        for i in 0..4 {
            db.update_entry(entry, |e| e.set(TITLE, &format!("v{i}"))).unwrap();
        }
        let e = db.find_entry(entry).unwrap();
        assert_eq!(e.title(), "v3");
        assert_eq!(e.history.len(), 2);
        assert_eq!(e.history[0].title(), "v1");
        assert!(db.validate().is_ok());
    }

    #[test]
    fn validate_rejects_nested_history() {
        let (mut db, _, entry) = db_with_entry();
        let e = db.find_entry_mut(entry).unwrap();
        e.snapshot();
        let inner = e.clone();
        e.history[0].history.push(inner);
        assert!(matches!(
            db.validate(),
            Err(KdbxError::Payload(PayloadError::NestedHistory))
        ));
    }

    #[test]
    fn kdbx3_settings_require_aes_kdf() {
        let mut settings = DatabaseSettings::kdbx3(10);
        assert!(settings.validate().is_ok());
        settings.kdf = Kdf::argon2(Argon2Variant::Argon2d, 64, 1, 1);
        assert!(matches!(
            settings.validate(),
            Err(KdbxError::Unsupported(Unsupported::Feature(_)))
        ));
    }
}
