//! The `BlockStore` trait and its error type.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use pfs_core::BlockHash;
use pfs_core::BlockRef;
use pfs_core::Diff;
use pfs_core::DiffInfo;
use pfs_core::Shard;
use snafu::Snafu;

/// Errors from block store operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BlockStoreError {
    /// No block with the given hash.
    #[snafu(display("block not found: {hash}"))]
    BlockNotFound {
        /// Hash of the missing block.
        hash: BlockHash,
    },

    /// No recorded diff for the given commit and shard.
    #[snafu(display("diff not found: {repo}/{commit} shard {shard}"))]
    DiffNotFound {
        repo: String,
        commit: String,
        shard: Shard,
    },

    /// A stored record failed to encode or decode.
    #[snafu(display("codec error: {message}"))]
    Codec {
        /// Human-readable description of the codec failure.
        message: String,
    },

    /// Dialing the store failed.
    #[snafu(display("connect error: {message}"))]
    Connect {
        /// Human-readable description of the connect failure.
        message: String,
    },
}

/// Stream of replayed diff records for one shard.
pub type DiffStream = BoxStream<'static, Result<DiffInfo, BlockStoreError>>;

/// Durable store for immutable blocks and committed diff records.
///
/// The driver is the only writer; it mirrors a diff here when the commit
/// finishes and replays the full per-shard history on shard assignment.
/// No retry or backoff happens at this layer: errors surface verbatim.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Record a finished diff. Idempotent: re-recording replaces the
    /// previous record for the same (commit, shard).
    async fn create_diff(&self, diff_info: &DiffInfo) -> Result<(), BlockStoreError>;

    /// Remove the record for one diff.
    async fn delete_diff(&self, diff: &Diff) -> Result<(), BlockStoreError>;

    /// Replay every recorded diff for `shard`, in unspecified order.
    fn list_diff(&self, shard: Shard) -> DiffStream;

    /// Store `data` as one or more immutable blocks, returning a ref per
    /// block in input order.
    async fn put_block(&self, data: Bytes) -> Result<Vec<BlockRef>, BlockStoreError>;

    /// Read back block bytes starting at `offset`, at most `size` bytes
    /// when given. An offset at or past the end of the block yields empty
    /// bytes.
    async fn get_block(&self, hash: &BlockHash, offset: u64, size: Option<u64>) -> Result<Bytes, BlockStoreError>;
}
