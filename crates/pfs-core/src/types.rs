//! Data model for repos, commits, diffs, and files.
//!
//! A commit's metadata is sharded: for every shard a driver owns there is
//! one [`Diff`] per commit, whose payload is a [`DiffInfo`]. File content is
//! never stored here — regular files are described by ordered [`BlockRef`]s
//! into the block store, directories by their immediate child paths.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Integer partition key. Every path maps to exactly one shard; a driver
/// instance owns a subset of shards.
pub type Shard = u64;

/// A (repo, id) pair naming one commit.
///
/// Commit ids are opaque strings assigned by the caller. A branch name can
/// stand in for an id anywhere a commit handle is accepted; resolution to
/// the concrete tip happens in the driver (see `canonical commit` in the
/// driver crate).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commit {
    /// Name of the repo this commit belongs to.
    pub repo: String,
    /// Caller-assigned commit id.
    pub id: String,
}

impl Commit {
    pub fn new(repo: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.repo, self.id)
    }
}

/// Identity of a per-shard slice of a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Diff {
    pub commit: Commit,
    pub shard: Shard,
}

impl Diff {
    pub fn new(repo: impl Into<String>, id: impl Into<String>, shard: Shard) -> Self {
        Self {
            commit: Commit::new(repo, id),
            shard,
        }
    }
}

/// Content hash of an immutable block: a 32-byte BLAKE3 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash the given block contents.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Digest a sequence of hashes into one, preserving order.
    pub fn combine<'a>(hashes: impl IntoIterator<Item = &'a BlockHash>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for hash in hashes {
            hasher.update(hash.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_hex())
    }
}

/// Half-open byte range `[lower, upper)` within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub lower: u64,
    pub upper: u64,
}

impl ByteRange {
    pub const fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// Number of bytes covered by the range.
    pub const fn len(&self) -> u64 {
        self.upper - self.lower
    }

    pub const fn is_empty(&self) -> bool {
        self.upper == self.lower
    }
}

/// A byte slice of an immutable block held by the block store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub hash: BlockHash,
    pub range: ByteRange,
}

/// Per-path record within a diff.
///
/// Exactly one of `block_refs` (regular file) or `children` (directory) is
/// populated; a path that appears as both along one lineage is a bug and is
/// reported by the resolver. `last_ref` points at the nearest ancestor
/// commit that previously touched the same path, letting history walks skip
/// commits that did not modify it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Append {
    /// Ordered block refs appended to the path in this commit.
    pub block_refs: Vec<BlockRef>,
    /// Immediate child paths, when the path is a directory.
    pub children: BTreeSet<String>,
    /// Nearest ancestor commit whose diff also contains this path, if any.
    pub last_ref: Option<Commit>,
}

/// Payload of a [`Diff`].
///
/// Created open by `start_commit`, mutated by `put_file` while open, sealed
/// by `finish_commit` (which stamps `finished`). An absent `finished` means
/// the diff is still open. The repo-creation placeholder diff carries an
/// empty commit id and only a `finished` stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffInfo {
    pub diff: Diff,
    /// When the commit was started; absent on the repo placeholder.
    pub started: Option<DateTime<Utc>>,
    /// When the commit was finished; absent while open.
    pub finished: Option<DateTime<Utc>>,
    /// Parent commit in the per-repo forest, if any.
    pub parent_commit: Option<Commit>,
    /// Branch this commit was started on, if any.
    pub branch: Option<String>,
    /// Total bytes appended under this diff.
    pub size_bytes: u64,
    /// Path → append record, keyed by cleaned path.
    pub appends: BTreeMap<String, Append>,
}

impl DiffInfo {
    /// A fresh open diff for `commit` on `shard`.
    pub fn open(commit: Commit, shard: Shard, started: DateTime<Utc>, branch: Option<String>) -> Self {
        Self {
            diff: Diff { commit, shard },
            started: Some(started),
            finished: None,
            parent_commit: None,
            branch,
            size_bytes: 0,
            appends: BTreeMap::new(),
        }
    }

    /// The repo-creation placeholder: empty commit id, finished at `created`.
    pub fn placeholder(repo: impl Into<String>, shard: Shard, created: DateTime<Utc>) -> Self {
        Self {
            diff: Diff::new(repo, "", shard),
            started: None,
            finished: Some(created),
            parent_commit: None,
            branch: None,
            size_bytes: 0,
            appends: BTreeMap::new(),
        }
    }

    /// Whether this is a repo-creation placeholder rather than a real commit.
    pub fn is_placeholder(&self) -> bool {
        self.diff.commit.id.is_empty()
    }
}

/// Lifecycle state of an inspected commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitType {
    /// Finished; contents are immutable.
    Read,
    /// Still open for writes.
    Write,
}

/// Aggregated view of one commit across the inspected shards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub commit: Commit,
    pub commit_type: CommitType,
    pub branch: Option<String>,
    pub parent_commit: Option<Commit>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub size_bytes: u64,
}

/// Aggregated view of one repo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub repo: String,
    /// Creation time, recorded on the repo placeholder diff.
    pub created: Option<DateTime<Utc>>,
    /// Sum of `size_bytes` over all finished diffs.
    pub size_bytes: u64,
}

/// A path within a commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct File {
    pub commit: Commit,
    pub path: String,
}

impl File {
    pub fn new(repo: impl Into<String>, commit_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            commit: Commit::new(repo, commit_id),
            path: path.into(),
        }
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.commit, self.path)
    }
}

/// What kind of entry a path resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Not yet determined; a walk ending here means the file does not exist.
    #[default]
    None,
    Regular,
    Dir,
}

/// Result of resolving a path against a commit's ancestry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file: File,
    pub file_type: FileType,
    /// Total bytes across the file's block refs visible to the filter.
    pub size_bytes: u64,
    /// Finish time of the most recent commit that touched the path.
    pub modified: Option<DateTime<Utc>>,
    /// Most recent commit that touched the path.
    pub commit_modified: Option<Commit>,
    /// Immediate children, for directories. Each child carries the commit
    /// on which it was most recently recorded.
    pub children: Vec<File>,
    /// Content hash over the file's block hashes in resolver order;
    /// absent for directories.
    pub hash: Option<BlockHash>,
}

impl Default for File {
    fn default() -> Self {
        Self {
            commit: Commit::new("", ""),
            path: String::new(),
        }
    }
}
