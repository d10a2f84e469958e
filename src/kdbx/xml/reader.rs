use std::collections::BTreeMap;

use uuid::Uuid;
use zeroize::Zeroizing;

use super::{
    parse_base64, parse_bool, parse_color, parse_document, parse_icon, parse_number, parse_time,
    parse_tri_state, parse_uuid, Element,
};
use crate::crypto::ProtectedStream;
use crate::db::entry::{AutoTypeAssociation, CustomDataItem};
use crate::db::meta::CustomIcon;
use crate::db::{
    Attachment, AutoType, CustomData, DeletedObject, Entry, Group, MemoryProtection, Metadata,
    ProtectedValue, Times, Value,
};
use crate::errors::{PayloadError, Result};
use crate::kdbx::compression::gunzip;
use crate::kdbx::inner_header::PoolBinary;

/// Everything the XML document carries.
#[derive(Debug)]
pub struct ParsedDocument {
    pub meta: Metadata,
    pub root: Group,
    pub deleted_objects: Vec<DeletedObject>,
    /// `Meta/HeaderHash`, written by KDBX 3.1 producers.
    pub header_hash: Option<Vec<u8>>,
}

/// Parse the payload. `pool` is the KDBX 4 inner-header binary pool; for
/// KDBX 3.1 pass an empty pool and `Meta/Binaries` fills it.
pub fn read_document(
    xml: &[u8],
    stream: &mut ProtectedStream,
    pool: Vec<PoolBinary>,
) -> Result<ParsedDocument> {
    let document = parse_document(xml)?;
    let mut walker = Walker {
        stream,
        pool: pool.into_iter().enumerate().collect(),
    };
    walker.document(&document)
}

struct Walker<'s> {
    stream: &'s mut ProtectedStream,
    pool: BTreeMap<usize, PoolBinary>,
}

fn is_true(element: &Element, attr: &str) -> bool {
    element
        .attr(attr)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

fn split_tags(text: &str) -> Vec<String> {
    text.split([';', ','])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Required UUID of a group, entry or tombstone.
fn required_uuid(element: Option<&Element>, what: &'static str) -> Result<Uuid> {
    let element = element.ok_or(PayloadError::MissingUuid(what))?;
    parse_uuid(element)?.ok_or_else(|| PayloadError::NullUuid(what).into())
}

impl Walker<'_> {
    fn document(&mut self, document: &Element) -> Result<ParsedDocument> {
        if document.name != "KeePassFile" {
            return Err(PayloadError::NoDocumentElement.into());
        }

        let mut meta = Metadata::default();
        let mut header_hash = None;
        let mut root = None;

        for child in &document.children {
            match child.name.as_str() {
                "Meta" => header_hash = self.meta(child, &mut meta)?,
                "Root" => root = Some(self.root(child)?),
                other => tracing::debug!(element = other, "skipping unknown element"),
            }
        }

        let (root, deleted_objects) = root.ok_or(PayloadError::NoRootGroup)?;
        Ok(ParsedDocument {
            meta,
            root,
            deleted_objects,
            header_hash,
        })
    }

    // --- Meta ---------------------------------------------------------------

    fn meta(&mut self, element: &Element, meta: &mut Metadata) -> Result<Option<Vec<u8>>> {
        let mut header_hash = None;
        for child in &element.children {
            match child.name.as_str() {
                "Generator" => meta.generator = child.text.clone(),
                "HeaderHash" => header_hash = Some(parse_base64(child)?),
                "SettingsChanged" => meta.settings_changed = Some(parse_time(child)?),
                "DatabaseName" => meta.name = child.text.clone(),
                "DatabaseNameChanged" => meta.name_changed = Some(parse_time(child)?),
                "DatabaseDescription" => meta.description = child.text.clone(),
                "DatabaseDescriptionChanged" => meta.description_changed = Some(parse_time(child)?),
                "DefaultUserName" => meta.default_username = child.text.clone(),
                "DefaultUserNameChanged" => {
                    meta.default_username_changed = Some(parse_time(child)?)
                }
                "MaintenanceHistoryDays" => meta.maintenance_history_days = parse_number(child)?,
                "Color" => meta.color = parse_color(child)?,
                "MasterKeyChanged" => meta.master_key_changed = Some(parse_time(child)?),
                "MasterKeyChangeRec" => meta.master_key_change_rec = parse_number(child)?,
                "MasterKeyChangeForce" => meta.master_key_change_force = parse_number(child)?,
                "MasterKeyChangeForceOnce" => {
                    meta.master_key_change_force_once = parse_bool(child)?
                }
                "MemoryProtection" => meta.memory_protection = memory_protection(child)?,
                "CustomIcons" => meta.custom_icons = custom_icons(child)?,
                "RecycleBinEnabled" => meta.recycle_bin_enabled = parse_bool(child)?,
                "RecycleBinUUID" => meta.recycle_bin_uuid = parse_uuid(child)?,
                "RecycleBinChanged" => meta.recycle_bin_changed = Some(parse_time(child)?),
                "EntryTemplatesGroup" => meta.entry_templates_group = parse_uuid(child)?,
                "EntryTemplatesGroupChanged" => {
                    meta.entry_templates_group_changed = Some(parse_time(child)?)
                }
                "HistoryMaxItems" => meta.history_max_items = parse_number(child)?,
                "HistoryMaxSize" => meta.history_max_size = parse_number(child)?,
                "LastSelectedGroup" => meta.last_selected_group = parse_uuid(child)?,
                "LastTopVisibleGroup" => meta.last_top_visible_group = parse_uuid(child)?,
                "Binaries" => self.binaries(child)?,
                "CustomData" => meta.custom_data = custom_data(child)?,
                other => tracing::debug!(element = other, "skipping unknown meta element"),
            }
        }
        Ok(header_hash)
    }

    /// KDBX 3.1 binary pool in `Meta/Binaries`.
    fn binaries(&mut self, element: &Element) -> Result<()> {
        for binary in element.children_named("Binary") {
            let id: usize = binary
                .attr("ID")
                .and_then(|v| v.trim().parse().ok())
                .ok_or(PayloadError::IncompleteBinary)?;
            let data = self.binary_value(binary)?;
            self.pool.insert(
                id,
                PoolBinary {
                    data,
                    protected: is_true(binary, "Protected"),
                },
            );
        }
        Ok(())
    }

    /// Inline binary content: base64, optionally protected, optionally gzip
    /// compressed (in that order of decoding).
    fn binary_value(&mut self, element: &Element) -> Result<Vec<u8>> {
        let mut data = parse_base64(element)?;
        if is_true(element, "Protected") {
            self.stream.process(&mut data);
        }
        if is_true(element, "Compressed") {
            data = gunzip(&data, "binary")?;
        }
        Ok(data)
    }

    // --- Root ---------------------------------------------------------------

    fn root(&mut self, element: &Element) -> Result<(Group, Vec<DeletedObject>)> {
        let mut root = None;
        let mut deleted = Vec::new();
        for child in &element.children {
            match child.name.as_str() {
                "Group" => {
                    if root.is_some() {
                        return Err(PayloadError::MultipleRootGroups.into());
                    }
                    root = Some(self.group(child)?);
                }
                "DeletedObjects" => deleted = deleted_objects(child)?,
                "History" => return Err(PayloadError::HistoryOutsideEntry.into()),
                other => tracing::debug!(element = other, "skipping unknown root element"),
            }
        }
        Ok((root.ok_or(PayloadError::NoRootGroup)?, deleted))
    }

    fn group(&mut self, element: &Element) -> Result<Group> {
        let uuid = required_uuid(element.child("UUID"), "group")?;
        let mut group = Group::with_uuid(uuid, "");

        for child in &element.children {
            match child.name.as_str() {
                "UUID" => {}
                "Name" => group.name = child.text.clone(),
                "Notes" => group.notes = child.text.clone(),
                "IconID" => group.icon_id = parse_icon(child)?,
                "CustomIconUUID" => group.custom_icon = parse_uuid(child)?,
                "Times" => group.times = times(child)?,
                "IsExpanded" => group.is_expanded = parse_bool(child)?,
                "DefaultAutoTypeSequence" => group.default_auto_type_sequence = child.text.clone(),
                "EnableAutoType" => group.enable_auto_type = parse_tri_state(child)?,
                "EnableSearching" => group.enable_searching = parse_tri_state(child)?,
                "LastTopVisibleEntry" => group.last_top_visible_entry = parse_uuid(child)?,
                "PreviousParentGroup" => group.previous_parent_group = parse_uuid(child)?,
                "Tags" => group.tags = split_tags(&child.text),
                "CustomData" => group.custom_data = custom_data(child)?,
                "Group" => group.groups.push(self.group(child)?),
                "Entry" => group.entries.push(self.entry(child, false)?),
                "History" => return Err(PayloadError::HistoryOutsideEntry.into()),
                other => tracing::debug!(element = other, "skipping unknown group element"),
            }
        }
        Ok(group)
    }

    fn entry(&mut self, element: &Element, in_history: bool) -> Result<Entry> {
        let uuid = required_uuid(element.child("UUID"), "entry")?;
        let mut entry = Entry::with_uuid(uuid);

        for child in &element.children {
            match child.name.as_str() {
                "UUID" => {}
                "IconID" => entry.icon_id = parse_icon(child)?,
                "CustomIconUUID" => entry.custom_icon = parse_uuid(child)?,
                "ForegroundColor" => entry.foreground_color = parse_color(child)?,
                "BackgroundColor" => entry.background_color = parse_color(child)?,
                "OverrideURL" => entry.override_url = child.text.clone(),
                "Tags" => entry.tags = split_tags(&child.text),
                "QualityCheck" => entry.quality_check = parse_bool(child)?,
                "PreviousParentGroup" => entry.previous_parent_group = parse_uuid(child)?,
                "Times" => entry.times = times(child)?,
                "CustomData" => entry.custom_data = custom_data(child)?,
                "String" => {
                    let (key, value) = self.string(child)?;
                    entry.strings.insert(key, value);
                }
                "Binary" => {
                    let (key, attachment) = self.attachment(child)?;
                    entry.attachments.insert(key, attachment);
                }
                "AutoType" => entry.auto_type = auto_type(child)?,
                "History" => {
                    if in_history {
                        return Err(PayloadError::NestedHistory.into());
                    }
                    for revision in child.children_named("Entry") {
                        let revision = self.entry(revision, true)?;
                        if revision.uuid != uuid {
                            return Err(PayloadError::HistoryUuidMismatch.into());
                        }
                        entry.history.push(revision);
                    }
                }
                other => tracing::debug!(element = other, "skipping unknown entry element"),
            }
        }
        Ok(entry)
    }

    fn string(&mut self, element: &Element) -> Result<(String, Value)> {
        let key = element
            .child("Key")
            .map(|k| k.text.clone())
            .ok_or(PayloadError::IncompleteString)?;

        let value = match element.child("Value") {
            None => Value::Plain(String::new()),
            Some(v) if is_true(v, "Protected") => {
                let mut data = parse_base64(v)?;
                self.stream.process(&mut data);
                let text = Zeroizing::new(
                    String::from_utf8(data)
                        .map_err(|_| PayloadError::InvalidProtectedValue(key.clone()))?,
                );
                Value::Protected(ProtectedValue::new(&text))
            }
            Some(v) if is_true(v, "ProtectInMemory") => Value::Protected(ProtectedValue::new(&v.text)),
            Some(v) => Value::Plain(v.text.clone()),
        };
        Ok((key, value))
    }

    fn attachment(&mut self, element: &Element) -> Result<(String, Attachment)> {
        let key = element
            .child("Key")
            .map(|k| k.text.clone())
            .ok_or(PayloadError::IncompleteBinary)?;
        let value = element.child("Value").ok_or(PayloadError::IncompleteBinary)?;

        let attachment = match value.attr("Ref") {
            Some(reference) => {
                let index: usize = reference
                    .trim()
                    .parse()
                    .map_err(|_| PayloadError::IncompleteBinary)?;
                let binary = self
                    .pool
                    .get(&index)
                    .ok_or(PayloadError::MissingBinary(index))?;
                Attachment {
                    data: binary.data.clone(),
                    protected: binary.protected,
                }
            }
            None => Attachment {
                protected: is_true(value, "Protected"),
                data: self.binary_value(value)?,
            },
        };
        Ok((key, attachment))
    }
}

// ---------------------------------------------------------------------------
// Stream-free sections
// ---------------------------------------------------------------------------

fn times(element: &Element) -> Result<Times> {
    let mut times = Times::now();
    for child in &element.children {
        match child.name.as_str() {
            "CreationTime" => times.creation = parse_time(child)?,
            "LastModificationTime" => times.last_modification = parse_time(child)?,
            "LastAccessTime" => times.last_access = parse_time(child)?,
            "ExpiryTime" => times.expiry = parse_time(child)?,
            "Expires" => times.expires = parse_bool(child)?,
            "UsageCount" => times.usage_count = parse_number(child)?,
            "LocationChanged" => times.location_changed = parse_time(child)?,
            _ => {}
        }
    }
    Ok(times)
}

fn memory_protection(element: &Element) -> Result<MemoryProtection> {
    let mut mp = MemoryProtection::default();
    for child in &element.children {
        match child.name.as_str() {
            "ProtectTitle" => mp.protect_title = parse_bool(child)?,
            "ProtectUserName" => mp.protect_username = parse_bool(child)?,
            "ProtectPassword" => mp.protect_password = parse_bool(child)?,
            "ProtectURL" => mp.protect_url = parse_bool(child)?,
            "ProtectNotes" => mp.protect_notes = parse_bool(child)?,
            _ => {}
        }
    }
    Ok(mp)
}

fn custom_icons(element: &Element) -> Result<Vec<CustomIcon>> {
    element
        .children_named("Icon")
        .map(|icon| -> Result<CustomIcon> {
            let uuid = icon
                .child("UUID")
                .map(parse_uuid)
                .transpose()?
                .flatten()
                .ok_or(PayloadError::IncompleteCustomIcon)?;
            let data = icon
                .child("Data")
                .map(parse_base64)
                .transpose()?
                .ok_or(PayloadError::IncompleteCustomIcon)?;
            Ok(CustomIcon {
                uuid,
                data,
                name: icon.child("Name").map(|n| n.text.clone()).unwrap_or_default(),
                last_modified: icon
                    .child("LastModificationTime")
                    .map(parse_time)
                    .transpose()?,
            })
        })
        .collect()
}

fn custom_data(element: &Element) -> Result<CustomData> {
    let mut data = CustomData::new();
    for item in element.children_named("Item") {
        let (Some(key), Some(value)) = (item.child("Key"), item.child("Value")) else {
            tracing::warn!("skipping custom data item without key or value");
            continue;
        };
        data.insert(
            key.text.clone(),
            CustomDataItem {
                value: value.text.clone(),
                last_modified: item
                    .child("LastModificationTime")
                    .map(parse_time)
                    .transpose()?,
            },
        );
    }
    Ok(data)
}

fn auto_type(element: &Element) -> Result<AutoType> {
    let mut auto_type = AutoType::default();
    for child in &element.children {
        match child.name.as_str() {
            "Enabled" => auto_type.enabled = parse_bool(child)?,
            "DataTransferObfuscation" => auto_type.obfuscation = parse_number(child)?,
            "DefaultSequence" => auto_type.default_sequence = child.text.clone(),
            "Association" => auto_type.associations.push(AutoTypeAssociation {
                window: child.child("Window").map(|w| w.text.clone()).unwrap_or_default(),
                sequence: child
                    .child("KeystrokeSequence")
                    .map(|s| s.text.clone())
                    .unwrap_or_default(),
            }),
            _ => {}
        }
    }
    Ok(auto_type)
}

fn deleted_objects(element: &Element) -> Result<Vec<DeletedObject>> {
    element
        .children_named("DeletedObject")
        .map(|object| -> Result<DeletedObject> {
            let uuid = object
                .child("UUID")
                .map(parse_uuid)
                .transpose()?
                .flatten()
                .ok_or(PayloadError::IncompleteTombstone)?;
            let deletion_time = object
                .child("DeletionTime")
                .map(parse_time)
                .transpose()?
                .ok_or(PayloadError::IncompleteTombstone)?;
            Ok(DeletedObject {
                uuid,
                deletion_time,
            })
        })
        .collect()
}
