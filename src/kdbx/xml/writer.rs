use std::collections::HashMap;
use std::fmt::Display;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use uuid::Uuid;

use super::{format_bool, format_time, format_tri_state, format_uuid};
use crate::crypto::ProtectedStream;
use crate::db::{
    AutoType, CustomData, Database, Entry, Group, MemoryProtection, Metadata, Times, Value,
};
use crate::errors::{KdbxError, Result};
use crate::kdbx::compression::{gzip, Compression};
use crate::kdbx::inner_header::PoolBinary;
use crate::kdbx::FormatVersion;

// ---------------------------------------------------------------------------
// Binary pool
// ---------------------------------------------------------------------------

/// Attachments of every entry and revision, with identical contents
/// stored once.
#[derive(Debug, Default)]
pub struct BinaryPool {
    pub binaries: Vec<PoolBinary>,
    index: HashMap<Vec<u8>, usize>,
}

impl BinaryPool {
    pub fn collect(root: &Group) -> Self {
        let mut pool = Self::default();
        pool.add_group(root);
        pool
    }

    fn add_group(&mut self, group: &Group) {
        for entry in &group.entries {
            self.add_entry(entry);
            for revision in &entry.history {
                self.add_entry(revision);
            }
        }
        for child in &group.groups {
            self.add_group(child);
        }
    }

    fn add_entry(&mut self, entry: &Entry) {
        for attachment in entry.attachments.values() {
            match self.index.get(&attachment.data) {
                Some(&i) => self.binaries[i].protected |= attachment.protected,
                None => {
                    self.index.insert(attachment.data.clone(), self.binaries.len());
                    self.binaries.push(PoolBinary {
                        data: attachment.data.clone(),
                        protected: attachment.protected,
                    });
                }
            }
        }
    }

    fn index_of(&self, data: &[u8]) -> Option<usize> {
        self.index.get(data).copied()
    }
}

// ---------------------------------------------------------------------------
// Document writer
// ---------------------------------------------------------------------------

/// Serialize the database payload. `header_hash` is only written for
/// KDBX 3.1, which also carries the binary pool inside `Meta`.
pub fn write_document(
    db: &Database,
    stream: &mut ProtectedStream,
    pool: &BinaryPool,
    header_hash: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let format = db.settings.version;
    let mut out = XmlOut {
        writer: Writer::new_with_indent(Vec::new(), b'\t', 1),
        binary_times: format == FormatVersion::Kdbx4,
        stream,
        pool,
    };

    out.event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;
    out.start("KeePassFile")?;
    out.meta(&db.meta, header_hash, format, db.settings.compression)?;
    out.start("Root")?;
    out.group(&db.root)?;
    out.start("DeletedObjects")?;
    for object in &db.deleted_objects {
        out.start("DeletedObject")?;
        out.uuid("UUID", Some(object.uuid))?;
        out.time("DeletionTime", &object.deletion_time)?;
        out.end("DeletedObject")?;
    }
    out.end("DeletedObjects")?;
    out.end("Root")?;
    out.end("KeePassFile")?;

    Ok(out.writer.into_inner())
}

struct XmlOut<'a> {
    writer: Writer<Vec<u8>>,
    binary_times: bool,
    stream: &'a mut ProtectedStream,
    pool: &'a BinaryPool,
}

impl XmlOut<'_> {
    fn event(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| KdbxError::SerializationError(format!("xml: {e}")))
    }

    fn start(&mut self, name: &str) -> Result<()> {
        self.event(Event::Start(BytesStart::new(name)))
    }

    fn end(&mut self, name: &str) -> Result<()> {
        self.event(Event::End(BytesEnd::new(name)))
    }

    fn text_with(&mut self, name: &str, attributes: &[(&str, &str)], value: &str) -> Result<()> {
        let mut start = BytesStart::new(name);
        for &attribute in attributes {
            start.push_attribute(attribute);
        }
        if value.is_empty() {
            return self.event(Event::Empty(start));
        }
        self.event(Event::Start(start))?;
        self.event(Event::Text(BytesText::new(value)))?;
        self.end(name)
    }

    fn text(&mut self, name: &str, value: &str) -> Result<()> {
        self.text_with(name, &[], value)
    }

    fn number(&mut self, name: &str, value: impl Display) -> Result<()> {
        self.text(name, &value.to_string())
    }

    fn bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.text(name, format_bool(value))
    }

    fn uuid(&mut self, name: &str, value: Option<Uuid>) -> Result<()> {
        self.text(name, &format_uuid(value))
    }

    fn time(&mut self, name: &str, value: &DateTime<Utc>) -> Result<()> {
        let text = format_time(value, self.binary_times);
        self.text(name, &text)
    }

    fn optional_time(&mut self, name: &str, value: Option<&DateTime<Utc>>) -> Result<()> {
        match value {
            Some(t) => self.time(name, t),
            None => Ok(()),
        }
    }

    // --- Meta ---------------------------------------------------------------

    fn meta(
        &mut self,
        meta: &Metadata,
        header_hash: Option<&[u8]>,
        format: FormatVersion,
        compression: Compression,
    ) -> Result<()> {
        self.start("Meta")?;
        self.text("Generator", &meta.generator)?;
        if let Some(hash) = header_hash {
            self.text("HeaderHash", &BASE64.encode(hash))?;
        }
        self.optional_time("SettingsChanged", meta.settings_changed.as_ref())?;
        self.text("DatabaseName", &meta.name)?;
        self.optional_time("DatabaseNameChanged", meta.name_changed.as_ref())?;
        self.text("DatabaseDescription", &meta.description)?;
        self.optional_time("DatabaseDescriptionChanged", meta.description_changed.as_ref())?;
        self.text("DefaultUserName", &meta.default_username)?;
        self.optional_time("DefaultUserNameChanged", meta.default_username_changed.as_ref())?;
        self.number("MaintenanceHistoryDays", meta.maintenance_history_days)?;
        self.text("Color", meta.color.as_deref().unwrap_or_default())?;
        self.optional_time("MasterKeyChanged", meta.master_key_changed.as_ref())?;
        self.number("MasterKeyChangeRec", meta.master_key_change_rec)?;
        self.number("MasterKeyChangeForce", meta.master_key_change_force)?;
        if meta.master_key_change_force_once {
            self.bool("MasterKeyChangeForceOnce", true)?;
        }
        self.memory_protection(&meta.memory_protection)?;

        self.start("CustomIcons")?;
        for icon in &meta.custom_icons {
            self.start("Icon")?;
            self.uuid("UUID", Some(icon.uuid))?;
            self.text("Data", &BASE64.encode(&icon.data))?;
            if !icon.name.is_empty() {
                self.text("Name", &icon.name)?;
            }
            self.optional_time("LastModificationTime", icon.last_modified.as_ref())?;
            self.end("Icon")?;
        }
        self.end("CustomIcons")?;

        self.bool("RecycleBinEnabled", meta.recycle_bin_enabled)?;
        self.uuid("RecycleBinUUID", meta.recycle_bin_uuid)?;
        self.optional_time("RecycleBinChanged", meta.recycle_bin_changed.as_ref())?;
        self.uuid("EntryTemplatesGroup", meta.entry_templates_group)?;
        self.optional_time(
            "EntryTemplatesGroupChanged",
            meta.entry_templates_group_changed.as_ref(),
        )?;
        self.number("HistoryMaxItems", meta.history_max_items)?;
        self.number("HistoryMaxSize", meta.history_max_size)?;
        self.uuid("LastSelectedGroup", meta.last_selected_group)?;
        self.uuid("LastTopVisibleGroup", meta.last_top_visible_group)?;

        if format == FormatVersion::Kdbx3 {
            self.pool_binaries(compression)?;
        }
        self.custom_data(&meta.custom_data)?;
        self.end("Meta")
    }

    fn memory_protection(&mut self, mp: &MemoryProtection) -> Result<()> {
        self.start("MemoryProtection")?;
        self.bool("ProtectTitle", mp.protect_title)?;
        self.bool("ProtectUserName", mp.protect_username)?;
        self.bool("ProtectPassword", mp.protect_password)?;
        self.bool("ProtectURL", mp.protect_url)?;
        self.bool("ProtectNotes", mp.protect_notes)?;
        self.end("MemoryProtection")
    }

    /// KDBX 3.1 keeps the pool in `Meta/Binaries`. Content is compressed
    /// first, then masked with the protected stream.
    fn pool_binaries(&mut self, compression: Compression) -> Result<()> {
        self.start("Binaries")?;
        let pool = self.pool;
        for (id, binary) in pool.binaries.iter().enumerate() {
            let id = id.to_string();
            let mut attributes = vec![("ID", id.as_str())];
            let mut data = if compression == Compression::Gzip {
                attributes.push(("Compressed", "True"));
                gzip(&binary.data)?
            } else {
                binary.data.clone()
            };
            if binary.protected {
                attributes.push(("Protected", "True"));
                self.stream.process(&mut data);
            }
            self.text_with("Binary", &attributes, &BASE64.encode(&data))?;
        }
        self.end("Binaries")
    }

    fn custom_data(&mut self, data: &CustomData) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.start("CustomData")?;
        for (key, item) in data {
            self.start("Item")?;
            self.text("Key", key)?;
            self.text("Value", &item.value)?;
            self.optional_time("LastModificationTime", item.last_modified.as_ref())?;
            self.end("Item")?;
        }
        self.end("CustomData")
    }

    // --- Tree ---------------------------------------------------------------

    fn times(&mut self, times: &Times) -> Result<()> {
        self.start("Times")?;
        self.time("CreationTime", &times.creation)?;
        self.time("LastModificationTime", &times.last_modification)?;
        self.time("LastAccessTime", &times.last_access)?;
        self.time("ExpiryTime", &times.expiry)?;
        self.bool("Expires", times.expires)?;
        self.number("UsageCount", times.usage_count)?;
        self.time("LocationChanged", &times.location_changed)?;
        self.end("Times")
    }

    fn group(&mut self, group: &Group) -> Result<()> {
        self.start("Group")?;
        self.uuid("UUID", Some(group.uuid))?;
        self.text("Name", &group.name)?;
        self.text("Notes", &group.notes)?;
        self.number("IconID", group.icon_id)?;
        if group.custom_icon.is_some() {
            self.uuid("CustomIconUUID", group.custom_icon)?;
        }
        self.times(&group.times)?;
        self.bool("IsExpanded", group.is_expanded)?;
        self.text("DefaultAutoTypeSequence", &group.default_auto_type_sequence)?;
        self.text("EnableAutoType", format_tri_state(group.enable_auto_type))?;
        self.text("EnableSearching", format_tri_state(group.enable_searching))?;
        self.uuid("LastTopVisibleEntry", group.last_top_visible_entry)?;
        if group.previous_parent_group.is_some() {
            self.uuid("PreviousParentGroup", group.previous_parent_group)?;
        }
        if !group.tags.is_empty() {
            self.text("Tags", &group.tags.join(";"))?;
        }
        self.custom_data(&group.custom_data)?;

        for entry in &group.entries {
            self.entry(entry, true)?;
        }
        for child in &group.groups {
            self.group(child)?;
        }
        self.end("Group")
    }

    fn entry(&mut self, entry: &Entry, with_history: bool) -> Result<()> {
        self.start("Entry")?;
        self.uuid("UUID", Some(entry.uuid))?;
        self.number("IconID", entry.icon_id)?;
        if entry.custom_icon.is_some() {
            self.uuid("CustomIconUUID", entry.custom_icon)?;
        }
        self.text("ForegroundColor", entry.foreground_color.as_deref().unwrap_or_default())?;
        self.text("BackgroundColor", entry.background_color.as_deref().unwrap_or_default())?;
        self.text("OverrideURL", &entry.override_url)?;
        self.text("Tags", &entry.tags.join(";"))?;
        if !entry.quality_check {
            self.bool("QualityCheck", false)?;
        }
        if entry.previous_parent_group.is_some() {
            self.uuid("PreviousParentGroup", entry.previous_parent_group)?;
        }
        self.times(&entry.times)?;
        self.custom_data(&entry.custom_data)?;

        for (key, value) in &entry.strings {
            self.string(key, value)?;
        }

        let pool = self.pool;
        for (key, attachment) in &entry.attachments {
            let index = pool
                .index_of(&attachment.data)
                .ok_or_else(|| KdbxError::SerializationError(format!("attachment {key} missing from pool")))?;
            self.start("Binary")?;
            self.text("Key", key)?;
            let reference = index.to_string();
            self.event(Event::Empty(
                BytesStart::new("Value").with_attributes([("Ref", reference.as_str())]),
            ))?;
            self.end("Binary")?;
        }

        self.auto_type(&entry.auto_type)?;

        if with_history {
            self.start("History")?;
            for revision in &entry.history {
                self.entry(revision, false)?;
            }
            self.end("History")?;
        }
        self.end("Entry")
    }

    fn string(&mut self, key: &str, value: &Value) -> Result<()> {
        self.start("String")?;
        self.text("Key", key)?;
        match value {
            Value::Plain(text) => self.text("Value", text)?,
            Value::Protected(protected) => {
                let mut bytes = protected.reveal_bytes();
                self.stream.process(&mut bytes[..]);
                let encoded = BASE64.encode(&bytes[..]);
                self.text_with("Value", &[("Protected", "True")], &encoded)?;
            }
        }
        self.end("String")
    }

    fn auto_type(&mut self, auto_type: &AutoType) -> Result<()> {
        self.start("AutoType")?;
        self.bool("Enabled", auto_type.enabled)?;
        self.number("DataTransferObfuscation", auto_type.obfuscation)?;
        if !auto_type.default_sequence.is_empty() {
            self.text("DefaultSequence", &auto_type.default_sequence)?;
        }
        for association in &auto_type.associations {
            self.start("Association")?;
            self.text("Window", &association.window)?;
            self.text("KeystrokeSequence", &association.sequence)?;
            self.end("Association")?;
        }
        self.end("AutoType")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ProtectedStreamAlgorithm;
    use crate::db::entry::{AutoTypeAssociation, CustomDataItem, NOTES, PASSWORD, TITLE};
    use crate::db::{Attachment, CustomIcon, DatabaseSettings, DeletedObject};
    use crate::errors::PayloadError;
    use crate::kdbx::xml::read_document;

    fn stream() -> ProtectedStream {
        ProtectedStream::new(ProtectedStreamAlgorithm::ChaCha20, &[5u8; 64]).unwrap()
    }

    fn sample(settings: DatabaseSettings) -> Database {
        let mut db = Database::new(settings);
        db.meta.name = "Sample & <Co>".into();
        db.meta.color = Some("#112233".into());
        db.meta.custom_icons.push(CustomIcon {
            uuid: Uuid::new_v4(),
            data: vec![0x89, b'P', b'N', b'G'],
            name: "icon".into(),
            last_modified: None,
        });
        db.meta.custom_data.insert(
            "plugin".into(),
            CustomDataItem {
                value: "on".into(),
                last_modified: None,
            },
        );

        let root = db.root.uuid;
        let mut group = Group::new("Internet");
        group.enable_searching = Some(false);
        let group = db.add_group(root, group).unwrap();

        let mut entry = Entry::new();
        entry.set(TITLE, "Mail");
        entry.set(PASSWORD, "old password");
        entry.set(NOTES, "  leading and trailing  ");
        entry.foreground_color = Some("#FF0000".into());
        entry.tags = vec!["work".into(), "mail".into()];
        entry.auto_type.associations.push(AutoTypeAssociation {
            window: "Firefox*".into(),
            sequence: "{USERNAME}{TAB}{PASSWORD}{ENTER}".into(),
        });
        entry.attachments.insert(
            "a.txt".into(),
            Attachment {
                data: b"shared".to_vec(),
                protected: false,
            },
        );
        entry.snapshot();
        entry.set(PASSWORD, "new password");
        entry.attachments.insert(
            "b.txt".into(),
            Attachment {
                data: b"shared".to_vec(),
                protected: false,
            },
        );
        entry.attachments.insert(
            "c.key".into(),
            Attachment {
                data: b"private key".to_vec(),
                protected: true,
            },
        );
        db.add_entry(group, entry).unwrap();

        db.deleted_objects.push(DeletedObject {
            uuid: Uuid::new_v4(),
            deletion_time: crate::db::times::now(),
        });
        db
    }

    fn roundtrip(db: &Database) -> Database {
        let pool = BinaryPool::collect(&db.root);
        let xml = write_document(db, &mut stream(), &pool, None).unwrap();
        let kdbx4_pool = if db.settings.version == FormatVersion::Kdbx4 {
            pool.binaries.clone()
        } else {
            Vec::new()
        };
        let parsed = read_document(&xml, &mut stream(), kdbx4_pool).unwrap();
        Database {
            settings: db.settings.clone(),
            meta: parsed.meta,
            root: parsed.root,
            deleted_objects: parsed.deleted_objects,
        }
    }

    #[test]
    fn document_roundtrip_kdbx4() {
        let db = sample(DatabaseSettings::default());
        assert_eq!(roundtrip(&db), db);
    }

    #[test]
    fn document_roundtrip_kdbx3() {
        let db = sample(DatabaseSettings::kdbx3(10));
        assert_eq!(roundtrip(&db), db);
    }

    #[test]
    fn identical_attachments_share_one_pool_slot() {
        let db = sample(DatabaseSettings::default());
        let pool = BinaryPool::collect(&db.root);
        assert_eq!(pool.binaries.len(), 2);
        assert!(!pool.binaries[0].protected);
        assert!(pool.binaries[1].protected);
    }

    #[test]
    fn protected_values_are_not_written_in_clear() {
        let db = sample(DatabaseSettings::default());
        let pool = BinaryPool::collect(&db.root);
        let xml = write_document(&db, &mut stream(), &pool, None).unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert!(!text.contains("new password"));
        assert!(text.contains("Protected=\"True\""));
    }

    #[test]
    fn wrong_stream_key_garbles_protected_values() {
        let db = sample(DatabaseSettings::default());
        let pool = BinaryPool::collect(&db.root);
        let xml = write_document(&db, &mut stream(), &pool, None).unwrap();
        let mut other =
            ProtectedStream::new(ProtectedStreamAlgorithm::ChaCha20, &[6u8; 64]).unwrap();
        match read_document(&xml, &mut other, pool.binaries.clone()) {
            Ok(parsed) => {
                let entry = &parsed.root.groups[0].entries[0];
                assert_ne!(entry.password().as_str(), "new password");
            }
            Err(e) => assert!(matches!(
                e,
                KdbxError::Payload(PayloadError::InvalidProtectedValue(_))
            )),
        }
    }
}
