/// Key prefix for host records in the inventory cache database.
pub const HOST_KEY_PREFIX: &str = "host";

/// Interface name excluded from node traffic accounting.
pub const LOOPBACK_INTERFACE: &str = "lo";

/// Backend state value meaning the backend is enabled and serving.
pub const BACKEND_STATE_ENABLED: u64 = 1;

/// stat_commit error code attributed to a read-only filesystem.
pub const ROFS_ERROR_CODE: u64 = 30;
