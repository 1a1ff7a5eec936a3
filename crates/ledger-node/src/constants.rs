pub(crate) const DEFAULT_PORT: u16 = 8080;
pub(crate) const DEFAULT_DATA_DIR: &str = "./data";
pub(crate) const DEFAULT_DIFFICULTY: u32 = 2;
pub(crate) const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;
pub(crate) const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
pub(crate) const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub(crate) const SLED_DIR: &str = "sled";
