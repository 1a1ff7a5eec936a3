pub mod api;
pub mod config;
pub(crate) mod constants;
pub mod sync;

pub use api::{router, ApiError, AppState};
pub use config::{self_address, Args, StoreKind};
pub use sync::{SyncConfig, SyncError, SyncReport, Synchronizer};
