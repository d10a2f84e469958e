//! `kdbxkit calibrate`: time the KDF on this machine.

use std::time::Duration;

use crate::cli::load_settings;
use crate::cli::output;
use crate::crypto::kdf::Kdf;
use crate::crypto::{calibrate, CancelToken};
use crate::errors::Result;

/// Execute the `calibrate` command.
pub fn execute(kdf: Option<&str>, target_ms: Option<u64>) -> Result<()> {
    let mut settings = load_settings()?;
    if let Some(kdf) = kdf {
        settings.default_kdf = kdf.to_string();
    }
    let target = target_ms.map_or_else(|| settings.calibration_target(), Duration::from_millis);

    output::info(&format!("Timing {} for {} ms...", settings.default_kdf, target.as_millis()));
    let tuned = calibrate(&settings.kdf()?, target, &CancelToken::new())?;

    match tuned {
        Kdf::AesKdf { rounds, .. } => {
            output::success(&format!("AES-KDF: {rounds} rounds"));
            output::tip(&format!("Set `aes_kdf_rounds = {rounds}` in .kdbxkit.toml to use it."));
        }
        Kdf::Argon2 { iterations, .. } => {
            output::success(&format!(
                "{}: {iterations} iterations at {} KiB, {} lanes",
                tuned.name(),
                settings.argon2_memory_kib,
                settings.argon2_parallelism
            ));
            output::tip(&format!(
                "Set `argon2_iterations = {iterations}` in .kdbxkit.toml to use it."
            ));
        }
    }
    Ok(())
}
