//! `kdbxkit info`: print the unauthenticated outer header.

use std::path::Path;

use crate::cli::output;
use crate::crypto::kdf::Kdf;
use crate::errors::Result;
use crate::kdbx::compression::Compression;
use crate::kdbx::{read_header, FormatVersion, HeaderInfo};

/// Execute the `info` command.
pub fn execute(path: &Path, json: bool) -> Result<()> {
    let data = crate::store::read_file(path)?;
    let fields = describe(&read_header(&data)?);

    if json {
        let map: serde_json::Map<String, serde_json::Value> = fields
            .into_iter()
            .map(|(name, value)| (name, serde_json::Value::String(value)))
            .collect();
        return output::print_json(&map);
    }

    output::info(&format!("{} ({} bytes)", path.display(), data.len()));
    output::print_fields(&fields);
    Ok(())
}

/// Human-readable header fields.
pub fn describe(header: &HeaderInfo) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let mut push = |name: &str, value: String| fields.push((name.to_string(), value));

    match header {
        HeaderInfo::Kdbx(h) => {
            let format = if h.version >> 16 >= 4 {
                FormatVersion::Kdbx4
            } else {
                FormatVersion::Kdbx3
            };
            push("Format", format.to_string());
            push("Version", format!("{}.{}", h.version >> 16, h.version & 0xFFFF));
            push("Cipher", h.cipher.name().to_string());
            push(
                "Compression",
                match h.compression {
                    Compression::None => "none".to_string(),
                    Compression::Gzip => "gzip".to_string(),
                },
            );
            push("KDF", describe_kdf(&h.kdf));
        }
        HeaderInfo::Kdb(h) => {
            push("Format", "KeePass 1 (read-only)".to_string());
            push("Version", format!("{:#010x}", h.version));
            push(
                "Cipher",
                match h.cipher() {
                    Ok(cipher) => cipher.name().to_string(),
                    Err(e) => e.to_string(),
                },
            );
            push("KDF", describe_kdf(&h.kdf()));
            push("Groups", h.group_count.to_string());
            push("Entries", h.entry_count.to_string());
        }
    }
    fields
}

fn describe_kdf(kdf: &Kdf) -> String {
    match kdf {
        Kdf::AesKdf { rounds, .. } => format!("AES-KDF, {rounds} rounds"),
        Kdf::Argon2 {
            memory_bytes,
            iterations,
            parallelism,
            ..
        } => format!(
            "{}, {} KiB, {iterations} iterations, {parallelism} lanes",
            kdf.name(),
            memory_bytes / 1024
        ),
    }
}
