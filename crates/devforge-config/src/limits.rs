//! Human-readable resource limit parsing
//!
//! The container engine wants memory in bytes and CPU in nano-CPU units,
//! operators write "512m" and "0.5".

use crate::{ConfigError, Result};

/// Memory limit used when the configured value cannot be parsed (512 MiB)
pub const DEFAULT_MEMORY_BYTES: i64 = 512 * 1024 * 1024;

const NANO_CPUS_PER_CPU: f64 = 1e9;

/// Parse a memory limit such as `512m`, `2g`, `1024k` or `1048576` into bytes.
///
/// Suffixes are binary (`k` = 1024) and case-insensitive. A value that does
/// not match `<digits>[kmg]` falls back to [`DEFAULT_MEMORY_BYTES`].
pub fn parse_memory_limit(limit: &str) -> i64 {
    let limit = limit.trim();
    let (digits, unit) = match limit.char_indices().last() {
        Some((idx, c)) if c.is_ascii_alphabetic() => (&limit[..idx], Some(c.to_ascii_lowercase())),
        _ => (limit, None),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        tracing::warn!("Unparseable memory limit {:?}, using 512m", limit);
        return DEFAULT_MEMORY_BYTES;
    }

    let value: i64 = match digits.parse() {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("Memory limit {:?} out of range, using 512m", limit);
            return DEFAULT_MEMORY_BYTES;
        }
    };

    let multiplier: i64 = match unit {
        None => 1,
        Some('k') => 1024,
        Some('m') => 1024 * 1024,
        Some('g') => 1024 * 1024 * 1024,
        Some(_) => {
            tracing::warn!("Unknown memory unit in {:?}, using 512m", limit);
            return DEFAULT_MEMORY_BYTES;
        }
    };

    value.saturating_mul(multiplier)
}

/// Parse a fractional CPU count such as `0.5` or `2` into nano-CPU units.
pub fn parse_cpu_limit(limit: &str) -> Result<i64> {
    let cpus: f64 = limit
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: "cpus".to_string(),
            value: limit.to_string(),
        })?;

    if !cpus.is_finite() || cpus <= 0.0 {
        return Err(ConfigError::InvalidValue {
            key: "cpus".to_string(),
            value: limit.to_string(),
        });
    }

    Ok((cpus * NANO_CPUS_PER_CPU).round() as i64)
}
