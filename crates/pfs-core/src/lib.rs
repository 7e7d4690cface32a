//! Core types for the PFS metadata driver.
//!
//! This crate defines the wire-level data model shared by the driver and the
//! block store: repos, commits, diffs and their payloads, file metadata, and
//! the shard filters used to partition paths and blocks. It also carries the
//! path canonicalization rules (`"."` is the directory root) and the
//! commit-info reducer used to collapse per-shard views into one record.
//!
//! Everything here is plain data: no I/O, no locking. Stateful behavior
//! lives in `pfs-driver`; durable block storage behind `pfs-block`.

pub mod path;
pub mod reduce;
pub mod shard;
pub mod types;

pub use reduce::reduce_commit_infos;
pub use shard::ShardFilter;
pub use types::Append;
pub use types::BlockHash;
pub use types::BlockRef;
pub use types::ByteRange;
pub use types::Commit;
pub use types::CommitInfo;
pub use types::CommitType;
pub use types::Diff;
pub use types::DiffInfo;
pub use types::File;
pub use types::FileInfo;
pub use types::FileType;
pub use types::RepoInfo;
pub use types::Shard;
