//! Driver error type.

use pfs_block::BlockStoreError;
use snafu::Snafu;

/// Errors from driver operations.
///
/// The driver never retries internally and never rolls back in-memory
/// state on a block-store failure; every error surfaces synchronously to
/// the caller.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DriverError {
    /// The repo is unknown to this driver.
    #[snafu(display("repo {repo} not found"))]
    RepoNotFound { repo: String },

    /// A repo with this name already exists.
    #[snafu(display("repo {repo} exists"))]
    RepoExists { repo: String },

    /// The commit is not in started or finished.
    #[snafu(display("commit {repo}/{commit} not found"))]
    CommitNotFound { repo: String, commit: String },

    /// A diff for this commit already exists in the target view.
    #[snafu(display("commit {repo}/{commit} already exists"))]
    CommitExists { repo: String, commit: String },

    /// An ancestry walk hit a commit with no diff on the inspected shard.
    #[snafu(display("diff {repo}/{commit} not found"))]
    DiffNotFound { repo: String, commit: String },

    /// The branch tip disagrees with the requested parent.
    #[snafu(display("branch {branch} already exists as {tip}, can't create with {parent} as parent"))]
    BranchParentMismatch {
        branch: String,
        tip: String,
        parent: String,
    },

    /// The branch tip is still open; it must finish before a new commit
    /// starts on the branch.
    #[snafu(display("branch {branch} already has a started (but unfinished) commit {commit}"))]
    BranchUnfinished { branch: String, commit: String },

    /// One lineage records the path both as a directory and as a regular
    /// file.
    #[snafu(display("mixed dir and regular file {repo}/{commit}/{path}, (this is likely a bug)"))]
    MixedFileType {
        repo: String,
        commit: String,
        path: String,
    },

    /// No ancestor of the commit touched the path, or its blocks all live
    /// on other shards.
    #[snafu(display("file {repo}/{commit}/{path} not found"))]
    FileNotFound {
        repo: String,
        commit: String,
        path: String,
    },

    /// The path resolves to a directory where a regular file is required.
    #[snafu(display("file {repo}/{commit}/{path} is directory"))]
    IsDirectory {
        repo: String,
        commit: String,
        path: String,
    },

    /// A `from` bound names a commit outside the listed repos.
    #[snafu(display("commit {repo}/{commit} is from a repo that isn't being listed"))]
    CommitNotInListedRepos { repo: String, commit: String },

    /// A shard replay referenced a parent that never arrived.
    #[snafu(display("diff infos reference a parent that doesn't exist {repo}/{commit}"))]
    DanglingParent { repo: String, commit: String },

    /// Per-shard views of one commit reduced to more than one record.
    #[snafu(display("multiple commit infos after reduction, (this is likely a bug)"))]
    AmbiguousCommitInfo,

    /// A block store call failed.
    #[snafu(display("block store: {source}"))]
    #[snafu(context(false))]
    BlockStore { source: BlockStoreError },
}

impl DriverError {
    /// Whether this is the file-not-found case that directory listings
    /// swallow for children with no blocks on the inspected shard.
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, DriverError::FileNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings() {
        let err = DriverError::RepoNotFound { repo: "images".into() };
        assert_eq!(err.to_string(), "repo images not found");

        let err = DriverError::BranchParentMismatch {
            branch: "main".into(),
            tip: "c2".into(),
            parent: "c1".into(),
        };
        assert_eq!(err.to_string(), "branch main already exists as c2, can't create with c1 as parent");

        let err = DriverError::MixedFileType {
            repo: "r".into(),
            commit: "c".into(),
            path: "a".into(),
        };
        assert_eq!(err.to_string(), "mixed dir and regular file r/c/a, (this is likely a bug)");
    }

    #[test]
    fn file_not_found_predicate() {
        let err = DriverError::FileNotFound {
            repo: "r".into(),
            commit: "c".into(),
            path: "a".into(),
        };
        assert!(err.is_file_not_found());
        assert!(!DriverError::AmbiguousCommitInfo.is_file_not_found());
    }
}
