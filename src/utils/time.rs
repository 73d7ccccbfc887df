//! Protocol time helpers.
//!
//! Init packets and license validity windows store timestamps as seconds since
//! 2013-01-01T00:00:00Z rather than the Unix epoch.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds between the Unix epoch and the protocol epoch.
pub const PROTOCOL_EPOCH_OFFSET: u32 = 1_356_998_400;

/// Convert a Unix timestamp to the protocol's relative form.
#[inline]
pub fn to_protocol_time(unix_secs: u32) -> u32 {
    unix_secs.wrapping_sub(PROTOCOL_EPOCH_OFFSET)
}

/// Convert a protocol-relative timestamp back to Unix seconds.
#[inline]
pub fn from_protocol_time(protocol_secs: u32) -> u32 {
    protocol_secs.wrapping_add(PROTOCOL_EPOCH_OFFSET)
}

/// Current Unix time in whole seconds, saturating to 0 if the clock is before the epoch.
pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
