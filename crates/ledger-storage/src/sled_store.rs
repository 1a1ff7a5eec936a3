use ledger_core::{Block, ChainStore, StoreError};
use sled::{Batch, Db, IVec, Tree};
use std::path::Path;
use tracing::{info, warn};

const TREE_BLOCKS: &str = "blocks";
const KEY_TIP_HEIGHT: &[u8] = b"tip_height";
const KEY_TIP_HASH: &[u8] = b"tip_hash";

/// Alternative chain backend: one bincode entry per block, keyed by the
/// big-endian index so iteration order is chain order.
#[derive(Clone)]
pub struct SledStore {
  db: Db,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
    let db = sled::open(path).map_err(StoreError::backend)?;
    info!("sled store opened");
    Ok(Self { db })
  }

  fn blocks(&self) -> Result<Tree, StoreError> {
    self.db.open_tree(TREE_BLOCKS).map_err(StoreError::backend)
  }

  pub fn get_block(&self, index: u64) -> Result<Option<Block>, StoreError> {
    let tree = self.blocks()?;
    let opt = tree.get(index.to_be_bytes()).map_err(StoreError::backend)?;
    opt.map(|ivec: IVec| bincode::deserialize(&ivec).map_err(StoreError::backend))
      .transpose()
  }

  pub fn tip_height(&self) -> Result<Option<u64>, StoreError> {
    Ok(
      self
        .db
        .get(KEY_TIP_HEIGHT)
        .map_err(StoreError::backend)?
        .and_then(|v| {
          let arr: [u8; 8] = v.as_ref().try_into().ok()?;
          Some(u64::from_be_bytes(arr))
        }),
    )
  }

  pub fn tip_hash(&self) -> Result<Option<String>, StoreError> {
    Ok(
      self
        .db
        .get(KEY_TIP_HASH)
        .map_err(StoreError::backend)?
        .map(|v| String::from_utf8_lossy(&v).into_owned()),
    )
  }

  /// Drops every stored block and the tip metadata.
  pub fn clear(&self) -> Result<(), StoreError> {
    self.blocks()?.clear().map_err(StoreError::backend)?;
    self.db.remove(KEY_TIP_HEIGHT).map_err(StoreError::backend)?;
    self.db.remove(KEY_TIP_HASH).map_err(StoreError::backend)?;
    self.db.flush().map_err(StoreError::backend)?;
    Ok(())
  }
}

impl ChainStore for SledStore {
  /// Stops at the first entry that fails to decode; the ledger validates and
  /// repairs whatever prefix comes back.
  fn load_chain(&self) -> Result<Option<Vec<Block>>, StoreError> {
    let tree = self.blocks()?;
    if tree.is_empty() {
      return Ok(None);
    }
    let mut blocks = Vec::with_capacity(tree.len());
    for entry in tree.iter() {
      let (key, value) = entry.map_err(StoreError::backend)?;
      match bincode::deserialize::<Block>(&value) {
        Ok(block) => blocks.push(block),
        Err(e) => {
          warn!(key = ?key, error = %e, kept = blocks.len(), "undecodable block entry, ignoring the rest");
          break;
        }
      }
    }
    Ok(Some(blocks))
  }

  fn save_chain(&self, blocks: &[Block]) -> Result<(), StoreError> {
    let tree = self.blocks()?;
    let mut batch = Batch::default();
    for block in blocks {
      let bytes = bincode::serialize(block).map_err(StoreError::backend)?;
      batch.insert(block.index.to_be_bytes().to_vec(), bytes);
    }
    // truncate anything past the new tip
    let first_stale = (blocks.len() as u64).to_be_bytes();
    for key in tree.range(first_stale..).keys() {
      batch.remove(key.map_err(StoreError::backend)?);
    }
    tree.apply_batch(batch).map_err(StoreError::backend)?;

    // update tip
    match blocks.last() {
      Some(tip) => {
        self
          .db
          .insert(KEY_TIP_HEIGHT, &tip.index.to_be_bytes())
          .map_err(StoreError::backend)?;
        self
          .db
          .insert(KEY_TIP_HASH, tip.hash.as_bytes())
          .map_err(StoreError::backend)?;
      }
      None => {
        self.db.remove(KEY_TIP_HEIGHT).map_err(StoreError::backend)?;
        self.db.remove(KEY_TIP_HASH).map_err(StoreError::backend)?;
      }
    }

    self.db.flush().map_err(StoreError::backend)?;
    Ok(())
  }

  fn close(&self) -> Result<(), StoreError> {
    self.db.flush().map_err(StoreError::backend)?;
    Ok(())
  }
}
