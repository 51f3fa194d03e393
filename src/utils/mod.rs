pub mod crypto;
pub mod error;

use std::time::{SystemTime, UNIX_EPOCH};

pub use crypto::{constant_time_eq, generate_hex_token, generate_secret};
pub use error::{BuildError, ReloadError, StoreError, SyncError, TokenError, WriteError};

/// 当前 Unix 时间 (秒)
pub fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// 当前 Unix 时间 (毫秒)
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
