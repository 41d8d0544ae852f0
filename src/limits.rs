/// Minimum characters in a room name or `reservedBy`.
pub const MIN_NAME_LEN: usize = 2;

/// Maximum characters in a room name, `reservedBy` or `reservedByEmail`.
pub const MAX_NAME_LEN: usize = 255;

/// Default bound of the notification queue.
pub const DEFAULT_NOTIFY_CAPACITY: usize = 1024;

/// Default handler attempts per notification before it is dropped.
pub const DEFAULT_NOTIFY_MAX_ATTEMPTS: u32 = 3;

/// Default WAL appends between compactions.
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// Default seconds between compactor checks.
pub const DEFAULT_COMPACT_INTERVAL_SECS: u64 = 30;
