//! Read-only KeePass 1.x (`.kdb`) reader.
//!
//! ```text
//! [header: 124 bytes][encrypt(group records ‖ entry records)]
//! record = { [type: u16][size: u32][data] } ... [type = 0xFFFF]
//! ```
//!
//! Groups are stored flat with a nesting level; entries point at their
//! group by a numeric id. The result is converted to the KDBX model and
//! saving it always produces a KDBX 4 file.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::Zeroizing;

use super::bytes::{fixed, ByteReader};
use super::header::{SIGNATURE_1, SIGNATURE_2_KDB};
use crate::crypto::kdf::Kdf;
use crate::crypto::{CancelToken, Cipher, CompositeKey};
use crate::db::entry::{NOTES, PASSWORD, TITLE, URL, USERNAME};
use crate::db::{Attachment, Database, DatabaseSettings, Entry, Group, Times};
use crate::errors::{FormatError, KdbxError, PayloadError, Result, Unsupported};

pub const HEADER_LEN: usize = 124;

const FLAG_RIJNDAEL: u32 = 0x02;
const FLAG_TWOFISH: u32 = 0x08;

const VERSION: u32 = 0x0003_0000;
const VERSION_MASK: u32 = 0xFFFF_FFF0;

const END_OF_RECORD: u16 = 0xFFFF;
/// Smallest possible record: just the terminator field.
const MIN_RECORD_LEN: usize = 6;

/// Group flag bit for an expanded tree node.
const GROUP_FLAG_EXPANDED: u32 = 0x01;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdbHeader {
    pub flags: u32,
    pub version: u32,
    pub master_seed: [u8; 16],
    pub iv: [u8; 16],
    pub group_count: u32,
    pub entry_count: u32,
    pub contents_hash: [u8; 32],
    pub transform_seed: [u8; 32],
    pub transform_rounds: u32,
}

impl KdbHeader {
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::Truncated("KeePass 1 header").into());
        }
        let mut r = ByteReader::new(data);
        if r.u32("signature")? != SIGNATURE_1 || r.u32("signature")? != SIGNATURE_2_KDB {
            return Err(FormatError::BadSignature.into());
        }
        let header = Self {
            flags: r.u32("flags")?,
            version: r.u32("version")?,
            master_seed: r.array("master seed")?,
            iv: r.array("encryption IV")?,
            group_count: r.u32("group count")?,
            entry_count: r.u32("entry count")?,
            contents_hash: r.array("contents hash")?,
            transform_seed: r.array("transform seed")?,
            transform_rounds: r.u32("transform rounds")?,
        };
        if header.version & VERSION_MASK != VERSION {
            return Err(Unsupported::Version(header.version).into());
        }
        Ok(header)
    }

    pub fn cipher(&self) -> Result<Cipher> {
        if self.flags & FLAG_RIJNDAEL != 0 {
            Ok(Cipher::Aes256)
        } else if self.flags & FLAG_TWOFISH != 0 {
            Ok(Cipher::Twofish)
        } else {
            Err(Unsupported::LegacyCipher(self.flags).into())
        }
    }

    pub fn kdf(&self) -> Kdf {
        Kdf::AesKdf {
            rounds: u64::from(self.transform_rounds),
            seed: self.transform_seed,
        }
    }
}

fn derive_key(
    header: &KdbHeader,
    key: &CompositeKey,
    cancel: &CancelToken,
) -> Result<Zeroizing<[u8; 32]>> {
    let raw = key.legacy_raw_key()?;
    let transformed = Zeroizing::new(header.kdf().transform(&raw, cancel)?);
    let mut hasher = Sha256::new();
    hasher.update(header.master_seed);
    hasher.update(&transformed[..]);
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

/// Decrypt and convert a KeePass 1 file.
pub fn open(data: &[u8], key: &CompositeKey, cancel: &CancelToken) -> Result<Database> {
    let header = KdbHeader::decode(data)?;
    let cipher = header.cipher()?;
    tracing::debug!(
        cipher = cipher.name(),
        groups = header.group_count,
        entries = header.entry_count,
        "KeePass 1 header read"
    );

    let final_key = derive_key(&header, key, cancel)?;
    let plain = Zeroizing::new(cipher.decrypt(&final_key[..], &header.iv, &data[HEADER_LEN..])?);
    if !bool::from(Sha256::digest(&plain[..]).as_slice().ct_eq(&header.contents_hash)) {
        return Err(KdbxError::WrongKeyOrCorrupt);
    }

    let settings = DatabaseSettings {
        cipher,
        kdf: header.kdf(),
        ..DatabaseSettings::default()
    };
    let mut db = Database::new(settings);
    let mut r = ByteReader::new(&plain);

    let groups = read_groups(&mut r, header.group_count)?;
    let entries = read_entries(&mut r, header.entry_count)?;
    db.root.groups = build_tree(groups, entries)?;
    db.validate()?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

fn check_count(r: &ByteReader<'_>, count: u32, what: &'static str) -> Result<usize> {
    let count = count as usize;
    if count.saturating_mul(MIN_RECORD_LEN) > r.remaining() {
        return Err(FormatError::InvalidCount(what).into());
    }
    Ok(count)
}

/// Visit every field of one record up to its terminator.
fn read_record<'a>(
    r: &mut ByteReader<'a>,
    mut field: impl FnMut(u16, &'a [u8]) -> Result<()>,
) -> Result<()> {
    loop {
        let field_type = r.u16("record field type")?;
        let size = r.u32("record field size")? as usize;
        let data = r.take(size, "record field data")?;
        if field_type == END_OF_RECORD {
            return Ok(());
        }
        field(field_type, data)?;
    }
}

fn string(field: &'static str, data: &[u8]) -> Result<String> {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8(data[..end].to_vec()).map_err(|_| PayloadError::InvalidRecordData(field).into())
}

fn u32_field(field: &'static str, data: &[u8]) -> Result<u32> {
    Ok(u32::from_le_bytes(fixed(field, data)?))
}

/// 5-byte packed date. `None` when the fields do not form a valid date.
fn packed_time(field: &'static str, data: &[u8]) -> Result<Option<DateTime<Utc>>> {
    let d: [u8; 5] = fixed(field, data)?;
    let d = d.map(u32::from);
    let year = (d[0] << 6) | (d[1] >> 2);
    let month = ((d[1] & 0x03) << 2) | (d[2] >> 6);
    let day = (d[2] >> 1) & 0x1F;
    let hour = ((d[2] & 0x01) << 4) | (d[3] >> 4);
    let minute = ((d[3] & 0x0F) << 2) | (d[4] >> 6);
    let second = d[4] & 0x3F;

    let time = NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .map(|naive| naive.and_utc());
    if time.is_none() {
        tracing::warn!(field, "ignoring invalid packed date");
    }
    Ok(time)
}

/// Expiry value KeePass 1 uses for "never expires".
fn is_never(time: &DateTime<Utc>) -> bool {
    NaiveDate::from_ymd_opt(2999, 12, 28)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .is_some_and(|never| never.and_utc() == *time)
}

fn set_time(times: &mut Times, field_type: u16, field: &'static str, data: &[u8]) -> Result<()> {
    let Some(time) = packed_time(field, data)? else {
        return Ok(());
    };
    match field_type {
        0 => times.creation = time,
        1 => times.last_modification = time,
        2 => times.last_access = time,
        _ => {
            times.expires = !is_never(&time);
            if times.expires {
                times.expiry = time;
            }
        }
    }
    Ok(())
}

struct FlatGroup {
    id: u32,
    level: u16,
    group: Group,
}

fn read_groups(r: &mut ByteReader<'_>, count: u32) -> Result<Vec<FlatGroup>> {
    let count = check_count(r, count, "groups")?;
    let mut groups = Vec::with_capacity(count);
    for _ in 0..count {
        let mut id = None;
        let mut level = None;
        let mut group = Group::new("");
        read_record(r, |field_type, data| {
            match field_type {
                0x0000 => {}
                0x0001 => id = Some(u32_field("group id", data)?),
                0x0002 => group.name = string("group name", data)?,
                0x0003..=0x0006 => {
                    set_time(&mut group.times, field_type - 0x0003, "group time", data)?
                }
                0x0007 => group.icon_id = u32_field("group icon", data)?,
                0x0008 => level = Some(u16::from_le_bytes(fixed("group level", data)?)),
                0x0009 => {
                    group.is_expanded = u32_field("group flags", data)? & GROUP_FLAG_EXPANDED != 0
                }
                other => {
                    return Err(FormatError::UnknownRecordField {
                        record: "group",
                        field_type: other,
                    }
                    .into())
                }
            }
            Ok(())
        })?;
        let (Some(id), Some(level)) = (id, level) else {
            return Err(PayloadError::IncompleteGroup.into());
        };
        groups.push(FlatGroup { id, level, group });
    }
    Ok(groups)
}

struct FlatEntry {
    group_id: u32,
    entry: Entry,
}

fn read_entries(r: &mut ByteReader<'_>, count: u32) -> Result<Vec<FlatEntry>> {
    let count = check_count(r, count, "entries")?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let mut uuid = None;
        let mut group_id = None;
        let mut entry = Entry::new();
        let mut binary_name = String::new();
        let mut binary_data = Vec::new();
        read_record(r, |field_type, data| {
            match field_type {
                0x0000 => {}
                0x0001 => uuid = Some(Uuid::from_bytes(fixed("entry uuid", data)?)),
                0x0002 => group_id = Some(u32_field("entry group id", data)?),
                0x0003 => entry.icon_id = u32_field("entry icon", data)?,
                0x0004 => entry.set(TITLE, &string("entry title", data)?),
                0x0005 => entry.set(URL, &string("entry url", data)?),
                0x0006 => entry.set(USERNAME, &string("entry username", data)?),
                0x0007 => {
                    let password = Zeroizing::new(string("entry password", data)?);
                    entry.set(PASSWORD, &password);
                }
                0x0008 => entry.set(NOTES, &string("entry notes", data)?),
                0x0009..=0x000C => {
                    set_time(&mut entry.times, field_type - 0x0009, "entry time", data)?
                }
                0x000D => binary_name = string("entry binary description", data)?,
                0x000E => binary_data = data.to_vec(),
                other => {
                    return Err(FormatError::UnknownRecordField {
                        record: "entry",
                        field_type: other,
                    }
                    .into())
                }
            }
            Ok(())
        })?;

        let uuid = uuid.ok_or(PayloadError::MissingUuid("entry"))?;
        if uuid.is_nil() {
            return Err(PayloadError::NullUuid("entry").into());
        }
        let group_id = group_id.ok_or(PayloadError::InvalidRecordData("entry group id"))?;

        if is_meta_stream(&entry, &binary_name) {
            tracing::debug!(kind = %entry.get(NOTES).as_str(), "dropping KeePass 1 meta stream");
            continue;
        }

        entry.uuid = uuid;
        if !binary_data.is_empty() || !binary_name.is_empty() {
            if binary_name.is_empty() {
                binary_name = "attachment".to_string();
            }
            entry.attachments.insert(
                binary_name,
                Attachment {
                    data: binary_data,
                    protected: false,
                },
            );
        }
        entries.push(FlatEntry { group_id, entry });
    }
    Ok(entries)
}

/// KeePass 1 stores application state as specially named entries.
fn is_meta_stream(entry: &Entry, binary_name: &str) -> bool {
    binary_name == "bin-stream"
        && entry.title() == "Meta-Info"
        && entry.username() == "SYSTEM"
        && entry.url() == "$"
        && !entry.get(NOTES).is_empty()
}

// ---------------------------------------------------------------------------
// Tree reconstruction
// ---------------------------------------------------------------------------

/// Nest the flat group list by level. A group at level L is a child of the
/// most recent group at level L-1.
fn build_tree(groups: Vec<FlatGroup>, entries: Vec<FlatEntry>) -> Result<Vec<Group>> {
    let mut parents: Vec<Option<usize>> = Vec::with_capacity(groups.len());
    let mut by_id: HashMap<u32, usize> = HashMap::with_capacity(groups.len());
    // Index of the most recent group at each level.
    let mut last_at_level: Vec<usize> = Vec::new();
    let mut previous: Option<u16> = None;

    for (index, flat) in groups.iter().enumerate() {
        let level = flat.level;
        match previous {
            None if level != 0 => return Err(PayloadError::InvalidFirstGroupLevel(level).into()),
            Some(prev) if u32::from(level) > u32::from(prev) + 1 => {
                return Err(PayloadError::InvalidGroupLevel {
                    level,
                    previous: prev,
                }
                .into())
            }
            _ => {}
        }
        let level = usize::from(level);
        parents.push(if level == 0 {
            None
        } else {
            Some(last_at_level[level - 1])
        });
        last_at_level.truncate(level);
        last_at_level.push(index);
        previous = Some(flat.level);

        if by_id.insert(flat.id, index).is_some() {
            return Err(PayloadError::InvalidRecordData("duplicate group id").into());
        }
    }

    let mut slots: Vec<Option<Group>> = groups.into_iter().map(|g| Some(g.group)).collect();
    for FlatEntry { group_id, entry } in entries {
        let index = *by_id
            .get(&group_id)
            .ok_or(PayloadError::UnknownGroupId(group_id))?;
        if let Some(group) = slots[index].as_mut() {
            group.entries.push(entry);
        }
    }

    // Parents always precede their children, so folding from the back
    // moves every group before its parent is taken.
    let mut top_level = Vec::new();
    for index in (0..slots.len()).rev() {
        let Some(group) = slots[index].take() else {
            continue;
        };
        match parents[index] {
            Some(parent) => {
                if let Some(parent) = slots[parent].as_mut() {
                    parent.groups.insert(0, group);
                }
            }
            None => top_level.insert(0, group),
        }
    }
    Ok(top_level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyFile;
    use crate::errors::ErrorKind;
    use chrono::{Datelike, Timelike};

    const ROUNDS: u32 = 50;

    fn field(out: &mut Vec<u8>, field_type: u16, data: &[u8]) {
        out.extend_from_slice(&field_type.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }

    fn cstr(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.push(0);
        v
    }

    fn pack(y: u32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> [u8; 5] {
        [
            (y >> 6) as u8,
            (((y & 0x3F) << 2) | (mo >> 2)) as u8,
            (((mo & 0x03) << 6) | (d << 1) | (h >> 4)) as u8,
            (((h & 0x0F) << 4) | (mi >> 2)) as u8,
            (((mi & 0x03) << 6) | s) as u8,
        ]
    }

    fn group(out: &mut Vec<u8>, id: u32, name: &str, level: u16) {
        field(out, 0x0001, &id.to_le_bytes());
        field(out, 0x0002, &cstr(name));
        field(out, 0x0003, &pack(2010, 3, 14, 15, 9, 26));
        field(out, 0x0006, &pack(2999, 12, 28, 23, 59, 59));
        field(out, 0x0007, &1u32.to_le_bytes());
        field(out, 0x0008, &level.to_le_bytes());
        field(out, 0xFFFF, &[]);
    }

    fn entry(out: &mut Vec<u8>, uuid: [u8; 16], group_id: u32, title: &str, password: &str) {
        field(out, 0x0001, &uuid);
        field(out, 0x0002, &group_id.to_le_bytes());
        field(out, 0x0004, &cstr(title));
        field(out, 0x0006, &cstr("alice"));
        field(out, 0x0007, &cstr(password));
        field(out, 0x000C, &pack(2030, 1, 2, 3, 4, 5));
        field(out, 0xFFFF, &[]);
    }

    fn meta_stream(out: &mut Vec<u8>, group_id: u32) {
        field(out, 0x0001, &[0xEE; 16]);
        field(out, 0x0002, &group_id.to_le_bytes());
        field(out, 0x0004, &cstr("Meta-Info"));
        field(out, 0x0005, &cstr("$"));
        field(out, 0x0006, &cstr("SYSTEM"));
        field(out, 0x0008, &cstr("KPX_GROUP_TREE_STATE"));
        field(out, 0x000D, &cstr("bin-stream"));
        field(out, 0x000E, &[1, 2, 3]);
        field(out, 0xFFFF, &[]);
    }

    /// Assemble an encrypted file around `records`.
    fn build(
        flags: u32,
        groups: u32,
        entries: u32,
        records: &[u8],
        key: &CompositeKey,
    ) -> Vec<u8> {
        let mut contents_hash = [0u8; 32];
        contents_hash.copy_from_slice(&Sha256::digest(records));
        let header = KdbHeader {
            flags,
            version: 0x0003_0004,
            master_seed: [3u8; 16],
            iv: [4u8; 16],
            group_count: groups,
            entry_count: entries,
            contents_hash,
            transform_seed: [5u8; 32],
            transform_rounds: ROUNDS,
        };
        let final_key = derive_key(&header, key, &CancelToken::new()).unwrap();
        let cipher = header.cipher().unwrap();
        let body = cipher.encrypt(&final_key[..], &header.iv, records).unwrap();

        let mut out = Vec::new();
        out.extend_from_slice(&SIGNATURE_1.to_le_bytes());
        out.extend_from_slice(&SIGNATURE_2_KDB.to_le_bytes());
        out.extend_from_slice(&header.flags.to_le_bytes());
        out.extend_from_slice(&header.version.to_le_bytes());
        out.extend_from_slice(&header.master_seed);
        out.extend_from_slice(&header.iv);
        out.extend_from_slice(&header.group_count.to_le_bytes());
        out.extend_from_slice(&header.entry_count.to_le_bytes());
        out.extend_from_slice(&header.contents_hash);
        out.extend_from_slice(&header.transform_seed);
        out.extend_from_slice(&header.transform_rounds.to_le_bytes());
        assert_eq!(out.len(), HEADER_LEN);
        out.extend_from_slice(&body);
        out
    }

    fn levels_file(levels: &[u16], key: &CompositeKey) -> Vec<u8> {
        let mut records = Vec::new();
        for (i, &level) in levels.iter().enumerate() {
            group(&mut records, i as u32 + 1, &format!("g{}", i + 1), level);
        }
        entry(&mut records, [1u8; 16], 4, "Router", "admin123");
        meta_stream(&mut records, 1);
        build(FLAG_RIJNDAEL, levels.len() as u32, 2, &records, key)
    }

    fn names(groups: &[Group]) -> Vec<&str> {
        groups.iter().map(|g| g.name.as_str()).collect()
    }

    fn open_file(data: &[u8], key: &CompositeKey) -> Result<Database> {
        open(data, key, &CancelToken::new())
    }

    #[test]
    fn levels_follow_the_most_recent_parent() {
        let key = CompositeKey::from_password("legacy");
        let db = open_file(&levels_file(&[0, 1, 1, 2, 1], &key), &key).unwrap();

        assert_eq!(names(&db.root.groups), ["g1"]);
        let g1 = &db.root.groups[0];
        assert_eq!(names(&g1.groups), ["g2", "g3", "g5"]);
        assert!(g1.groups[0].groups.is_empty());
        assert_eq!(names(&g1.groups[1].groups), ["g4"]);
        assert!(g1.groups[2].groups.is_empty());
    }

    #[test]
    fn entries_attach_by_group_id_and_meta_streams_are_dropped() {
        let key = CompositeKey::from_password("legacy");
        let db = open_file(&levels_file(&[0, 1, 1, 2, 1], &key), &key).unwrap();

        assert_eq!(db.entry_count(), 1);
        let g4 = &db.root.groups[0].groups[1].groups[0];
        let router = &g4.entries[0];
        assert_eq!(router.title(), "Router");
        assert_eq!(router.username(), "alice");
        assert_eq!(router.password().as_str(), "admin123");
        assert!(router.times.expires);
        assert_eq!(router.times.expiry.year(), 2030);
        assert_eq!(router.times.expiry.second(), 5);

        let g1 = &db.root.groups[0];
        assert!(!g1.times.expires);
        assert_eq!(g1.times.creation.year(), 2010);
        assert_eq!(g1.icon_id, 1);
    }

    #[test]
    fn settings_convert_to_kdbx4_with_the_file_cipher() {
        let key = CompositeKey::from_password("legacy");
        let db = open_file(&levels_file(&[0], &key)[..], &key);
        // The only entry points at group 4, which does not exist here.
        assert!(matches!(
            db,
            Err(KdbxError::Payload(PayloadError::UnknownGroupId(4)))
        ));

        let mut records = Vec::new();
        group(&mut records, 1, "only", 0);
        let data = build(FLAG_TWOFISH, 1, 0, &records, &key);
        let db = open_file(&data, &key).unwrap();
        assert_eq!(db.settings.version, crate::kdbx::FormatVersion::Kdbx4);
        assert_eq!(db.settings.cipher, Cipher::Twofish);
        assert_eq!(
            db.settings.kdf,
            Kdf::AesKdf {
                rounds: u64::from(ROUNDS),
                seed: [5u8; 32]
            }
        );
    }

    #[test]
    fn first_level_above_zero_is_rejected() {
        let key = CompositeKey::from_password("legacy");
        assert!(matches!(
            open_file(&levels_file(&[1, 2], &key), &key),
            Err(KdbxError::Payload(PayloadError::InvalidFirstGroupLevel(1)))
        ));
    }

    #[test]
    fn level_jump_is_rejected() {
        let key = CompositeKey::from_password("legacy");
        assert!(matches!(
            open_file(&levels_file(&[0, 2], &key), &key),
            Err(KdbxError::Payload(PayloadError::InvalidGroupLevel {
                level: 2,
                previous: 0
            }))
        ));
    }

    #[test]
    fn wrong_password_is_integrity_error() {
        let data = levels_file(&[0, 1, 1, 2, 1], &CompositeKey::from_password("right"));
        let err = open_file(&data, &CompositeKey::from_password("wrong")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn key_file_and_password_together() {
        let kf = KeyFile::from_bytes(&[9u8; 32]).unwrap();
        let key = CompositeKey::from_password("legacy").with_key_file(&kf);
        let data = levels_file(&[0, 1, 1, 2, 1], &key);
        assert!(open_file(&data, &key).is_ok());
        let password_only = CompositeKey::from_password("legacy");
        assert!(open_file(&data, &password_only).is_err());
    }

    #[test]
    fn wrong_field_size_names_the_field() {
        let key = CompositeKey::from_password("legacy");
        let mut records = Vec::new();
        field(&mut records, 0x0001, &[1, 0, 0]);
        field(&mut records, 0xFFFF, &[]);
        let data = build(FLAG_RIJNDAEL, 1, 0, &records, &key);
        assert!(matches!(
            open_file(&data, &key),
            Err(KdbxError::Format(FormatError::FieldLength {
                field: "group id",
                expected: 4,
                actual: 3
            }))
        ));
    }

    #[test]
    fn unknown_cipher_and_version_are_unsupported() {
        let key = CompositeKey::from_password("legacy");
        let mut data = levels_file(&[0], &key);
        data[8..12].copy_from_slice(&0x04u32.to_le_bytes());
        assert!(matches!(
            open_file(&data, &key),
            Err(KdbxError::Unsupported(Unsupported::LegacyCipher(4)))
        ));

        let mut data = levels_file(&[0], &key);
        data[12..16].copy_from_slice(&0x0002_0001u32.to_le_bytes());
        assert!(matches!(
            KdbHeader::decode(&data),
            Err(KdbxError::Unsupported(Unsupported::Version(0x0002_0001)))
        ));
    }

    #[test]
    fn absurd_counts_are_rejected() {
        let key = CompositeKey::from_password("legacy");
        let mut records = Vec::new();
        group(&mut records, 1, "only", 0);
        let data = build(FLAG_RIJNDAEL, 1000, 0, &records, &key);
        assert!(matches!(
            open_file(&data, &key),
            Err(KdbxError::Format(FormatError::InvalidCount("groups")))
        ));
    }

    #[test]
    fn packed_dates_decode() {
        let t = packed_time("t", &pack(2024, 2, 29, 13, 45, 59)).unwrap().unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2024, 2, 29));
        assert_eq!((t.hour(), t.minute(), t.second()), (13, 45, 59));
        assert!(packed_time("t", &pack(2024, 13, 1, 0, 0, 0)).unwrap().is_none());
        assert!(packed_time("t", &[0u8; 4]).is_err());
    }
}
