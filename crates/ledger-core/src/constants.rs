pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Upper bound on required leading zero hex digits.
pub const MAX_DIFFICULTY: u32 = 5;
pub const GENESIS_PREV_HASH: &str = "0";
pub const GENESIS_DATA: &str = "Genesis Block";
pub const PROGRESS_LOG_INTERVAL: u64 = 100_000;
