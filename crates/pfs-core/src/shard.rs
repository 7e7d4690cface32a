//! Shard filters for files and blocks.
//!
//! A filter restricts a read to the paths and block refs owned by one
//! partition of a modulus-sharded keyspace. A modulus of zero means
//! "match everything" and is the default. Hashing is BLAKE3 over the raw
//! key bytes, truncated to 64 bits; what matters is only that it is
//! deterministic and agreed on by every caller.

use serde::Deserialize;
use serde::Serialize;

use crate::types::BlockHash;

/// Partition selector applied to file paths and block hashes during reads.
///
/// File and block dimensions are independent: a read can be restricted to
/// the paths of one file shard, the blocks of one block shard, both, or
/// neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardFilter {
    pub file_number: u64,
    /// Zero matches every file path.
    pub file_modulus: u64,
    pub block_number: u64,
    /// Zero matches every block.
    pub block_modulus: u64,
}

impl ShardFilter {
    /// A filter that matches every path and every block.
    pub const fn any() -> Self {
        Self {
            file_number: 0,
            file_modulus: 0,
            block_number: 0,
            block_modulus: 0,
        }
    }

    /// Restrict file paths to partition `number` of `modulus`.
    pub const fn for_files(number: u64, modulus: u64) -> Self {
        Self {
            file_number: number,
            file_modulus: modulus,
            block_number: 0,
            block_modulus: 0,
        }
    }

    /// Restrict block refs to partition `number` of `modulus`.
    pub const fn for_blocks(number: u64, modulus: u64) -> Self {
        Self {
            file_number: 0,
            file_modulus: 0,
            block_number: number,
            block_modulus: modulus,
        }
    }
}

/// The partition a path falls into under `modulus`. `modulus` must be
/// non-zero.
pub fn shard_for_path(path: &str, modulus: u64) -> u64 {
    hash64(path.as_bytes()) % modulus
}

/// Whether `path` is visible under `filter`'s file dimension.
pub fn file_in_shard(filter: &ShardFilter, path: &str) -> bool {
    if filter.file_modulus == 0 {
        return true;
    }
    shard_for_path(path, filter.file_modulus) == filter.file_number
}

/// Whether `block` is visible under `filter`'s block dimension.
pub fn block_in_shard(filter: &ShardFilter, block: &BlockHash) -> bool {
    if filter.block_modulus == 0 {
        return true;
    }
    hash64(block.as_bytes()) % filter.block_modulus == filter.block_number
}

fn hash64(data: &[u8]) -> u64 {
    let digest = blake3::hash(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_matches_everything() {
        let filter = ShardFilter::any();
        assert!(file_in_shard(&filter, "some/path"));
        assert!(block_in_shard(&filter, &BlockHash::of(b"data")));
    }

    #[test]
    fn file_partitions_are_exhaustive_and_disjoint() {
        let modulus = 4;
        for path in ["a", "b/c", "deep/nested/file.txt", "x"] {
            let matching: Vec<u64> = (0..modulus)
                .filter(|&n| file_in_shard(&ShardFilter::for_files(n, modulus), path))
                .collect();
            assert_eq!(matching.len(), 1, "path {path} must land in exactly one partition");
            assert_eq!(matching[0], shard_for_path(path, modulus));
        }
    }

    #[test]
    fn block_partitions_are_exhaustive_and_disjoint() {
        let modulus = 3;
        for data in [b"one".as_slice(), b"two", b"three"] {
            let hash = BlockHash::of(data);
            let matching: Vec<u64> = (0..modulus)
                .filter(|&n| block_in_shard(&ShardFilter::for_blocks(n, modulus), &hash))
                .collect();
            assert_eq!(matching.len(), 1);
        }
    }

    #[test]
    fn hashing_is_stable() {
        assert_eq!(shard_for_path("a/b", 16), shard_for_path("a/b", 16));
    }
}
