//! Key files: the second authentication factor.
//!
//! Every supported layout reduces to a 32-byte key. The current layout is
//! the XML v2.0 file with hex data and a truncated SHA-256 checksum; the
//! older layouts are still read, and `KeyFile::is_legacy` tells callers
//! when to suggest regenerating.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::errors::{KdbxError, KeySourceError, Result};

/// Length of the key a key file reduces to (256 bits).
pub const KEY_LEN: usize = 32;

/// Bytes of the SHA-256 digest stored in the v2.0 `Hash` attribute.
const HASH_PREFIX_LEN: usize = 4;

/// Which on-disk layout a key file used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFileKind {
    XmlV2,
    XmlV1,
    Binary,
    Hex,
    Hashed,
}

/// A loaded key file, reduced to its 32-byte key.
pub struct KeyFile {
    key: Zeroizing<[u8; KEY_LEN]>,
    kind: KeyFileKind,
}

impl std::fmt::Debug for KeyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyFile").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl KeyFile {
    /// Read and parse a key file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = Zeroizing::new(fs::read(path).map_err(|e| KeySourceError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?);
        let key_file = Self::from_bytes(&data)?;
        if key_file.is_legacy() {
            tracing::warn!(
                path = %path.display(),
                kind = ?key_file.kind,
                "legacy key file format, consider generating a new key file"
            );
        }
        Ok(key_file)
    }

    /// Parse key file contents. XML key files are tried first, then the raw
    /// 32-byte and 64-hex-character layouts, then any other content is
    /// hashed.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(KeySourceError::InvalidKeyFile("key file is empty".into()).into());
        }

        if let Some(key_file) = parse_xml(data)? {
            return Ok(key_file);
        }

        if data.len() == KEY_LEN {
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            key.copy_from_slice(data);
            return Ok(Self {
                key,
                kind: KeyFileKind::Binary,
            });
        }

        if data.len() == KEY_LEN * 2 && data.iter().all(u8::is_ascii_hexdigit) {
            let mut key = Zeroizing::new([0u8; KEY_LEN]);
            if hex::decode_to_slice(data, &mut key[..]).is_ok() {
                return Ok(Self {
                    key,
                    kind: KeyFileKind::Hex,
                });
            }
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&Sha256::digest(data));
        Ok(Self {
            key,
            kind: KeyFileKind::Hashed,
        })
    }

    /// Generate a new v2.0 XML key file at `path`.
    ///
    /// Refuses to overwrite an existing file. The file is owner-only on Unix.
    pub fn generate(path: &Path) -> Result<Self> {
        if path.exists() {
            return Err(KeySourceError::KeyFileExists(path.to_path_buf()).into());
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut key[..]);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                KdbxError::from(KeySourceError::KeyFileExists(path.to_path_buf()))
            }
            _ => KdbxError::from(e),
        })?;

        let contents = Zeroizing::new(render_v2(&key));
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), "generated key file");
        Ok(Self {
            key,
            kind: KeyFileKind::XmlV2,
        })
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn kind(&self) -> KeyFileKind {
        self.kind
    }

    /// True for layouts that should be migrated to XML v2.0.
    pub fn is_legacy(&self) -> bool {
        matches!(
            self.kind,
            KeyFileKind::XmlV1 | KeyFileKind::Binary | KeyFileKind::Hex
        )
    }
}

fn unsupported(reason: impl Into<String>) -> KeySourceError {
    KeySourceError::UnsupportedKeyFile(reason.into())
}

/// Render the v2.0 XML layout with hex data grouped in 8-character words.
fn render_v2(key: &[u8; KEY_LEN]) -> String {
    let hash = Sha256::digest(key);
    let encoded = hex::encode_upper(key);
    let words: Vec<&str> = encoded
        .as_bytes()
        .chunks(8)
        .filter_map(|c| std::str::from_utf8(c).ok())
        .collect();

    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <KeyFile>\n\
         \t<Meta>\n\
         \t\t<Version>2.0</Version>\n\
         \t</Meta>\n\
         \t<Key>\n\
         \t\t<Data Hash=\"{}\">\n\
         \t\t\t{}\n\
         \t\t\t{}\n\
         \t\t</Data>\n\
         \t</Key>\n\
         </KeyFile>\n",
        hex::encode_upper(&hash[..HASH_PREFIX_LEN]),
        words[..4].join(" "),
        words[4..].join(" "),
    )
}

/// Parse an XML key file. Returns `Ok(None)` when the content is not an XML
/// document rooted at `KeyFile`, so other layouts can be tried.
fn parse_xml(data: &[u8]) -> Result<Option<KeyFile>> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut version: Option<String> = None;
    let mut hash_attr: Option<String> = None;
    let mut key_data = Zeroizing::new(String::new());

    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(event) => event,
            Err(e) if path.is_empty() => {
                tracing::trace!(error = %e, "key file is not XML");
                return Ok(None);
            }
            Err(e) => return Err(unsupported(format!("malformed XML: {e}")).into()),
        };

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if path.is_empty() && name != "KeyFile" {
                    return Ok(None);
                }
                if name == "Data" && path.last().map(String::as_str) == Some("Key") {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"Hash" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| unsupported(format!("bad Hash attribute: {e}")))?;
                            hash_attr = Some(value.into_owned());
                        }
                    }
                }
                path.push(name);
            }
            Event::End(_) => {
                path.pop();
                if path.is_empty() {
                    break;
                }
            }
            Event::Empty(_) if path.is_empty() => return Ok(None),
            Event::Text(t) => {
                if path.is_empty() {
                    continue;
                }
                let text = t
                    .unescape()
                    .map_err(|e| unsupported(format!("bad text: {e}")))?;
                match path_str(&path).as_str() {
                    "KeyFile/Meta/Version" => version = Some(text.trim().to_string()),
                    "KeyFile/Key/Data" => key_data.push_str(&text),
                    _ => {}
                }
            }
            Event::Eof => {
                if path.is_empty() {
                    return Ok(None);
                }
                return Err(unsupported("unexpected end of XML").into());
            }
            _ => {}
        }
        buf.clear();
    }

    let version = version.ok_or_else(|| unsupported("missing key file version"))?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);

    let kind = match version.as_str() {
        "1.0" | "1.00" => {
            let decoded = Zeroizing::new(
                BASE64
                    .decode(key_data.trim())
                    .map_err(|_| unsupported("key data is not valid base64"))?,
            );
            if decoded.len() != KEY_LEN {
                return Err(unsupported(format!(
                    "key data must be {KEY_LEN} bytes, got {}",
                    decoded.len()
                ))
                .into());
            }
            key.copy_from_slice(&decoded);
            KeyFileKind::XmlV1
        }
        "2.0" | "2.00" => {
            let compact: Zeroizing<String> = Zeroizing::new(
                key_data.chars().filter(|c| !c.is_whitespace()).collect(),
            );
            let decoded = Zeroizing::new(
                hex::decode(compact.as_bytes())
                    .map_err(|_| unsupported("key data is not valid hex"))?,
            );
            if decoded.len() != KEY_LEN {
                return Err(unsupported(format!(
                    "key data must be {KEY_LEN} bytes, got {}",
                    decoded.len()
                ))
                .into());
            }
            if let Some(expected) = hash_attr {
                let expected = hex::decode(expected.trim())
                    .map_err(|_| unsupported("Hash attribute is not valid hex"))?;
                let actual = Sha256::digest(&decoded[..]);
                if expected.as_slice() != &actual[..HASH_PREFIX_LEN] {
                    return Err(unsupported("key data does not match its hash").into());
                }
            }
            key.copy_from_slice(&decoded);
            KeyFileKind::XmlV2
        }
        other => return Err(unsupported(format!("unknown key file version {other}")).into()),
    };

    Ok(Some(KeyFile { key, kind }))
}

fn path_str(path: &[String]) -> String {
    path.join("/")
}
