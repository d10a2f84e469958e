//! KDF calibration: pick the work factor that takes a target wall time on
//! this machine.

use std::time::{Duration, Instant};

use crate::crypto::kdf::{CancelToken, Kdf};
use crate::errors::Result;

/// AES-KDF rounds used for the timing probe.
const AES_PROBE_ROUNDS: u64 = 100_000;

/// Never suggest fewer than this many Argon2 iterations.
const MIN_ARGON2_ITERATIONS: u64 = 1;

/// Measure `kdf` and return a copy whose rounds (AES-KDF) or iterations
/// (Argon2) take roughly `target` to compute. Memory and parallelism are
/// kept. The input is not modified.
pub fn calibrate(kdf: &Kdf, target: Duration, cancel: &CancelToken) -> Result<Kdf> {
    let secret = [0u8; 32];
    let mut calibrated = kdf.clone();

    match &mut calibrated {
        Kdf::AesKdf { rounds, .. } => {
            let probe = Kdf::AesKdf {
                rounds: AES_PROBE_ROUNDS,
                seed: [0u8; 32],
            };
            let elapsed = time(&probe, &secret, cancel)?;
            *rounds = scale(AES_PROBE_ROUNDS, elapsed, target).max(1);
        }
        Kdf::Argon2 { iterations, .. } => {
            let mut probe = kdf.clone();
            if let Kdf::Argon2 { iterations: i, .. } = &mut probe {
                *i = 1;
            }
            let elapsed = time(&probe, &secret, cancel)?;
            *iterations = scale(1, elapsed, target)
                .clamp(MIN_ARGON2_ITERATIONS, u64::from(u32::MAX));
        }
    }

    tracing::debug!(kdf = calibrated.name(), target_ms = target.as_millis() as u64, "calibrated");
    Ok(calibrated)
}

fn time(kdf: &Kdf, secret: &[u8; 32], cancel: &CancelToken) -> Result<Duration> {
    let start = Instant::now();
    kdf.transform(secret, cancel)?;
    Ok(start.elapsed().max(Duration::from_micros(1)))
}

fn scale(work: u64, elapsed: Duration, target: Duration) -> u64 {
    let factor = target.as_secs_f64() / elapsed.as_secs_f64();
    let scaled = work as f64 * factor;
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}
