//! Deterministic in-memory block store.
//!
//! Mirrors the behavior of a remote block store without network or disk
//! I/O, for tests and single-process deployments. Diff records are held as
//! encoded bytes so that a replay through [`BlockStore::list_diff`] decodes
//! exactly what a remote round trip would.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use pfs_core::BlockHash;
use pfs_core::BlockRef;
use pfs_core::ByteRange;
use pfs_core::Diff;
use pfs_core::DiffInfo;
use pfs_core::Shard;
use tracing::debug;

use crate::store::BlockStore;
use crate::store::BlockStoreError;
use crate::store::DiffStream;

/// Largest block produced by a single put; longer inputs are split.
pub const MAX_BLOCK_SIZE: usize = 8 * 1024 * 1024;

#[derive(Default)]
struct MemState {
    /// Content-addressed blocks.
    blocks: HashMap<BlockHash, Bytes>,
    /// shard → (repo, commit id) → encoded DiffInfo.
    diffs: HashMap<Shard, BTreeMap<(String, String), Vec<u8>>>,
}

/// In-memory [`BlockStore`].
pub struct MemBlockStore {
    state: Mutex<MemState>,
    max_block_size: usize,
}

impl Default for MemBlockStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemState::default()),
            max_block_size: MAX_BLOCK_SIZE,
        }
    }
}

impl MemBlockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Override the block split threshold. Useful for exercising
    /// multi-block puts without multi-megabyte fixtures.
    pub fn with_max_block_size(max_block_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MemState::default()),
            max_block_size,
        })
    }

    /// Number of distinct blocks currently stored.
    pub fn block_count(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }

    /// Number of diff records currently stored for `shard`.
    pub fn diff_count(&self, shard: Shard) -> usize {
        self.state.lock().unwrap().diffs.get(&shard).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl BlockStore for MemBlockStore {
    async fn create_diff(&self, diff_info: &DiffInfo) -> Result<(), BlockStoreError> {
        let encoded = bincode::serialize(diff_info).map_err(|e| BlockStoreError::Codec { message: e.to_string() })?;
        let commit = &diff_info.diff.commit;
        let mut state = self.state.lock().unwrap();
        state
            .diffs
            .entry(diff_info.diff.shard)
            .or_default()
            .insert((commit.repo.clone(), commit.id.clone()), encoded);
        Ok(())
    }

    async fn delete_diff(&self, diff: &Diff) -> Result<(), BlockStoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(shard_diffs) = state.diffs.get_mut(&diff.shard) {
            shard_diffs.remove(&(diff.commit.repo.clone(), diff.commit.id.clone()));
        }
        Ok(())
    }

    fn list_diff(&self, shard: Shard) -> DiffStream {
        let encoded: Vec<Vec<u8>> = {
            let state = self.state.lock().unwrap();
            state.diffs.get(&shard).map(|diffs| diffs.values().cloned().collect()).unwrap_or_default()
        };
        debug!(shard, count = encoded.len(), "replaying diffs");
        stream::iter(encoded)
            .map(|bytes| {
                bincode::deserialize::<DiffInfo>(&bytes).map_err(|e| BlockStoreError::Codec { message: e.to_string() })
            })
            .boxed()
    }

    async fn put_block(&self, data: Bytes) -> Result<Vec<BlockRef>, BlockStoreError> {
        let mut refs = Vec::new();
        let mut state = self.state.lock().unwrap();
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.max_block_size).min(data.len());
            let chunk = data.slice(offset..end);
            let hash = BlockHash::of(&chunk);
            state.blocks.entry(hash).or_insert_with(|| chunk.clone());
            refs.push(BlockRef {
                hash,
                range: ByteRange::new(0, chunk.len() as u64),
            });
            offset = end;
        }
        Ok(refs)
    }

    async fn get_block(&self, hash: &BlockHash, offset: u64, size: Option<u64>) -> Result<Bytes, BlockStoreError> {
        let block = {
            let state = self.state.lock().unwrap();
            state.blocks.get(hash).cloned()
        };
        let block = block.ok_or(BlockStoreError::BlockNotFound { hash: *hash })?;
        let start = (offset as usize).min(block.len());
        let end = match size {
            Some(size) => (start + size as usize).min(block.len()),
            None => block.len(),
        };
        Ok(block.slice(start..end))
    }
}
