//! ID generation utilities for linkflow
//!
//! Provides functions for generating run identifiers and history entry ids.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Generate a server-side run ID, used when the client did not supply one
///
/// Format: `run-{timestamp_ms}-{random_hex}`
/// Example: `run-1738300800123-a1b2`
pub fn generate_run_id() -> String {
    let timestamp = now_ms();
    let random: u16 = rand::rng().random();
    format!("run-{}-{:04x}", timestamp, random)
}

/// Generate an ID for a history entry
///
/// Format: `{run_id}-{seq:05}`
pub fn entry_id(run_id: &str, seq: u64) -> String {
    format!("{}-{:05}", run_id, seq)
}

/// Check that a client-supplied run ID is usable as an idempotency key
pub fn is_valid_run_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}
