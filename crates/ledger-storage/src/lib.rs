pub mod json_store;
pub mod peers;
pub mod sled_store;

pub use json_store::JsonChainStore;
pub use peers::JsonPeerStore;
pub use sled_store::SledStore;

use ledger_core::StoreError;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Serializes `value` as indented JSON next to `path` and renames it into
/// place, so readers only ever see a complete file.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads and decodes `path`; a missing file is `Ok(None)`.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
