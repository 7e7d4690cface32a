//! The driver: repo, commit, file, and shard operations.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use futures::future;
use pfs_block::BlockStore;
use pfs_block::BlockStoreError;
use pfs_core::Commit;
use pfs_core::CommitInfo;
use pfs_core::CommitType;
use pfs_core::Diff;
use pfs_core::DiffInfo;
use pfs_core::File;
use pfs_core::FileInfo;
use pfs_core::FileType;
use pfs_core::RepoInfo;
use pfs_core::Shard;
use pfs_core::ShardFilter;
use pfs_core::path;
use pfs_core::reduce_commit_infos;
use tokio::sync::RwLock;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::client::BlockClient;
use crate::error::DriverError;
use crate::index::DriverState;
use crate::reader::FileReader;
use crate::resolve;

/// The in-memory metadata driver.
///
/// All four index views live behind one reader/writer lock; block-store
/// I/O always runs with the lock released. Operations spanning multiple
/// shards are atomic with respect to readers.
pub struct Driver {
    state: RwLock<DriverState>,
    block: BlockClient,
}

/// Classification of a commit while a shard replay is in flight:
/// `Awaited` means it has only been seen as someone's parent so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisionalLeaf {
    Awaited,
    Leaf,
}

impl Driver {
    pub fn new(block: BlockClient) -> Self {
        Self {
            state: RwLock::new(DriverState::default()),
            block,
        }
    }

    /// A driver over an already-connected block store.
    pub fn with_store(store: Arc<dyn BlockStore>) -> Self {
        Self::new(BlockClient::connected(store))
    }

    // ------------------------------------------------------------------
    // Repos
    // ------------------------------------------------------------------

    #[instrument(skip(self, created))]
    pub async fn create_repo(&self, repo: &str, created: DateTime<Utc>, shards: &BTreeSet<Shard>) -> Result<(), DriverError> {
        let placeholders = {
            let mut state = self.state.write().await;
            if state.finished.contains_repo(repo) {
                return Err(DriverError::RepoExists { repo: repo.to_string() });
            }
            state.create_repo_maps(repo);
            let mut placeholders = Vec::new();
            for &shard in shards {
                let placeholder = DiffInfo::placeholder(repo, shard, created);
                state.finished.insert(placeholder.clone())?;
                placeholders.push(placeholder);
            }
            placeholders
        };
        self.mirror_create_diffs(placeholders).await
    }

    pub async fn inspect_repo(&self, repo: &str, shards: &BTreeSet<Shard>) -> Result<RepoInfo, DriverError> {
        let state = self.state.read().await;
        inspect_repo_locked(&state, repo, shards)
    }

    pub async fn list_repo(&self, shards: &BTreeSet<Shard>) -> Result<Vec<RepoInfo>, DriverError> {
        let state = self.state.read().await;
        let mut result = Vec::new();
        for repo in state.finished.repos() {
            result.push(inspect_repo_locked(&state, &repo, shards)?);
        }
        Ok(result)
    }

    /// Remove a repo from every view except branches, whose tips are left
    /// in place (they may dangle; see the crate docs on reconciliation).
    #[instrument(skip(self))]
    pub async fn delete_repo(&self, repo: &str, shards: &BTreeSet<Shard>) -> Result<(), DriverError> {
        let diffs = {
            let mut state = self.state.write().await;
            let mut diffs = Vec::new();
            for &shard in shards {
                if let Some(commits) = state.started.shard_commits(repo, shard) {
                    diffs.extend(commits.values().map(|diff_info| diff_info.diff.clone()));
                }
            }
            state.started.remove_repo(repo);
            state.finished.remove_repo(repo);
            state.leaves.remove_repo(repo);
            diffs
        };
        self.mirror_delete_diffs(diffs).await
    }

    // ------------------------------------------------------------------
    // Commits
    // ------------------------------------------------------------------

    /// Open a new commit on every given shard.
    ///
    /// With a branch name, the branch pointer advances to the new commit;
    /// the previous tip becomes its parent and must already be finished.
    /// An explicit `parent_id` that disagrees with the branch tip fails.
    #[instrument(skip(self, started))]
    pub async fn start_commit(
        &self,
        repo: &str,
        commit_id: &str,
        parent_id: Option<&str>,
        branch: Option<&str>,
        started: DateTime<Utc>,
        shards: &BTreeSet<Shard>,
    ) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        for &shard in shards {
            let mut diff_info =
                DiffInfo::open(Commit::new(repo, commit_id), shard, started, branch.map(str::to_string));
            if let Some(branch) = branch {
                if let Some(tip) = state.branches.tip(repo, shard, branch).cloned() {
                    if let Some(parent_id) = parent_id {
                        if tip.id != parent_id {
                            return Err(DriverError::BranchParentMismatch {
                                branch: branch.to_string(),
                                tip: tip.id,
                                parent: parent_id.to_string(),
                            });
                        }
                    }
                    let tip_diff = Diff {
                        commit: tip.clone(),
                        shard,
                    };
                    if state.finished.get(&tip_diff).is_none() {
                        return Err(DriverError::BranchUnfinished {
                            branch: branch.to_string(),
                            commit: tip.id,
                        });
                    }
                    diff_info.parent_commit = Some(tip);
                    state.branches.pop(repo, shard, branch);
                }
            }
            if diff_info.parent_commit.is_none() {
                if let Some(parent_id) = parent_id {
                    diff_info.parent_commit = Some(Commit::new(repo, parent_id));
                }
            }
            if let Some(branch) = branch {
                state.branches.insert(repo, shard, branch, diff_info.diff.commit.clone())?;
            }
            let parent = diff_info.parent_commit.clone();
            state.started.insert(diff_info)?;
            state.insert_leaf(repo, shard, commit_id, parent.as_ref())?;
        }
        Ok(())
    }

    /// Seal a commit on every given shard and mirror the sealed diffs to
    /// the block store.
    ///
    /// Success is reported from the in-memory move; the mirror fan-out
    /// runs afterwards and a failure there means the block store lacks a
    /// record the driver already considers finished.
    #[instrument(skip(self, commit, finished), fields(commit = %commit))]
    pub async fn finish_commit(&self, commit: &Commit, finished: DateTime<Utc>, shards: &BTreeSet<Shard>) -> Result<(), DriverError> {
        let diff_infos = {
            let mut state = self.state.write().await;
            let mut canonical = commit.clone();
            let mut diff_infos = Vec::new();
            for &shard in shards {
                canonical = state.canonical_commit(&canonical, shard);
                let diff = Diff {
                    commit: canonical.clone(),
                    shard,
                };
                let Some(mut diff_info) = state.started.pop(&diff) else {
                    return Err(DriverError::CommitNotFound {
                        repo: canonical.repo.clone(),
                        commit: canonical.id.clone(),
                    });
                };
                diff_info.finished = Some(finished);
                diff_infos.push(diff_info.clone());
                state.finished.insert(diff_info)?;
            }
            diff_infos
        };
        self.mirror_create_diffs(diff_infos).await
    }

    pub async fn inspect_commit(&self, commit: &Commit, shards: &BTreeSet<Shard>) -> Result<CommitInfo, DriverError> {
        let state = self.state.read().await;
        inspect_commit_locked(&state, commit, shards)
    }

    /// Walk each repo backward from its leaves, emitting every commit not
    /// reachable from `from_commits`, newest first along each lineage.
    pub async fn list_commit(
        &self,
        repos: &[String],
        from_commits: &[Commit],
        shards: &BTreeSet<Shard>,
    ) -> Result<Vec<CommitInfo>, DriverError> {
        let repo_set: HashSet<&str> = repos.iter().map(String::as_str).collect();
        let mut visited: HashSet<String> = HashSet::new();
        for from in from_commits {
            if !repo_set.contains(from.repo.as_str()) {
                return Err(DriverError::CommitNotInListedRepos {
                    repo: from.repo.clone(),
                    commit: from.id.clone(),
                });
            }
            visited.insert(from.id.clone());
        }

        let state = self.state.read().await;
        let mut result = Vec::new();
        for repo in repos {
            // one shard's leaves suffice: inspect aggregates across shards
            let Some(&shard) = shards.iter().next() else { continue };
            if !state.finished.contains_repo(repo) {
                return Err(DriverError::RepoNotFound { repo: repo.clone() });
            }
            for leaf in state.leaves.ids(repo, shard) {
                let mut commit = Some(Commit::new(repo.clone(), leaf));
                while let Some(current) = commit {
                    if !visited.insert(current.id.clone()) {
                        break;
                    }
                    let commit_info = inspect_commit_locked(&state, &current, shards)?;
                    commit = commit_info.parent_commit.clone();
                    result.push(commit_info);
                }
            }
        }
        Ok(result)
    }

    pub async fn list_branch(&self, repo: &str, shards: &BTreeSet<Shard>) -> Result<Vec<CommitInfo>, DriverError> {
        let state = self.state.read().await;
        let mut result = Vec::new();
        if let Some(&shard) = shards.iter().next() {
            for tip in state.branches.tips(repo, shard) {
                result.push(inspect_commit_locked(&state, &tip, shards)?);
            }
        }
        Ok(result)
    }

    pub async fn delete_commit(&self, _commit: &Commit, _shards: &BTreeSet<Shard>) -> Result<(), DriverError> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    /// Append `data` to a file in an open commit.
    ///
    /// The block upload runs with the lock released; the open check is
    /// re-done afterwards since the commit can disappear in the gap. The
    /// `offset` parameter is accepted for interface compatibility and
    /// ignored: the surface is append-only.
    #[instrument(skip(self, file, data), fields(file = %file, bytes = data.len()))]
    pub async fn put_file(&self, file: &File, shard: Shard, _offset: u64, data: Bytes) -> Result<(), DriverError> {
        let canonical = {
            let state = self.state.read().await;
            let canonical = state.canonical_commit(&file.commit, shard);
            let diff = Diff {
                commit: canonical.clone(),
                shard,
            };
            if state.started.get(&diff).is_none() {
                return Err(DriverError::CommitNotFound {
                    repo: canonical.repo,
                    commit: canonical.id,
                });
            }
            canonical
        };

        let store = self.block.get().await?;
        let block_refs = store.put_block(data).await?;

        let mut state = self.state.write().await;
        let diff = Diff {
            commit: canonical.clone(),
            shard,
        };
        let not_found = || DriverError::CommitNotFound {
            repo: canonical.repo.clone(),
            commit: canonical.id.clone(),
        };
        let cleaned = path::clean(&file.path);
        let (append_exists, parent) = {
            let diff_info = state.started.get(&diff).ok_or_else(not_found)?;
            (diff_info.appends.contains_key(&cleaned), diff_info.parent_commit.clone())
        };
        let last_ref = if append_exists {
            None
        } else {
            parent.and_then(|parent| {
                resolve::last_ref(
                    &state,
                    &File {
                        commit: parent,
                        path: file.path.clone(),
                    },
                    shard,
                )
            })
        };
        let diff_info = state.started.get_mut(&diff).ok_or_else(not_found)?;
        resolve::add_dirs(diff_info, &file.path);
        let append = diff_info.appends.entry(cleaned).or_default();
        if append.last_ref.is_none() {
            append.last_ref = last_ref;
        }
        append.block_refs.extend(block_refs.iter().cloned());
        diff_info.size_bytes += block_refs.iter().map(|block_ref| block_ref.range.len()).sum::<u64>();
        Ok(())
    }

    pub async fn make_directory(&self, _file: &File, _shards: &BTreeSet<Shard>) -> Result<(), DriverError> {
        Ok(())
    }

    /// A reader over the file's content, honoring `offset` and `size`.
    pub async fn get_file(
        &self,
        file: &File,
        filter: &ShardFilter,
        offset: u64,
        size: Option<u64>,
        from: Option<&Commit>,
        shard: Shard,
    ) -> Result<FileReader, DriverError> {
        let (file_info, block_refs) = {
            let state = self.state.read().await;
            let file = File {
                commit: state.canonical_commit(&file.commit, shard),
                path: file.path.clone(),
            };
            resolve::inspect_file(&state, &file, filter, shard, from)?
        };
        if file_info.file_type == FileType::Dir {
            return Err(DriverError::IsDirectory {
                repo: file_info.file.commit.repo,
                commit: file_info.file.commit.id,
                path: file_info.file.path,
            });
        }
        let store = self.block.get().await?;
        Ok(FileReader::new(store, block_refs, offset, size))
    }

    pub async fn inspect_file(
        &self,
        file: &File,
        filter: &ShardFilter,
        from: Option<&Commit>,
        shard: Shard,
    ) -> Result<FileInfo, DriverError> {
        let state = self.state.read().await;
        let file = File {
            commit: state.canonical_commit(&file.commit, shard),
            path: file.path.clone(),
        };
        let (file_info, _) = resolve::inspect_file(&state, &file, filter, shard, from)?;
        Ok(file_info)
    }

    /// List a directory's children, or return the file itself when the
    /// path is regular. Children whose blocks all live on other shards
    /// read as absent and are skipped.
    pub async fn list_file(
        &self,
        file: &File,
        filter: &ShardFilter,
        from: Option<&Commit>,
        shard: Shard,
    ) -> Result<Vec<FileInfo>, DriverError> {
        let state = self.state.read().await;
        let file = File {
            commit: state.canonical_commit(&file.commit, shard),
            path: file.path.clone(),
        };
        let (file_info, _) = resolve::inspect_file(&state, &file, filter, shard, from)?;
        if file_info.file_type == FileType::Regular {
            return Ok(vec![file_info]);
        }
        let mut result = Vec::new();
        for child in &file_info.children {
            match resolve::inspect_file(&state, child, filter, shard, from) {
                Ok((child_info, _)) => result.push(child_info),
                Err(err) if err.is_file_not_found() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }

    pub async fn delete_file(&self, _file: &File, _shard: Shard) -> Result<(), DriverError> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shards
    // ------------------------------------------------------------------

    /// Take ownership of a shard by replaying its full diff history from
    /// the block store and deriving the leaf set.
    ///
    /// A commit may arrive after a child has already named it as a parent;
    /// classification is provisional until the stream ends. A parent that
    /// never arrives fails the replay.
    #[instrument(skip(self))]
    pub async fn add_shard(&self, shard: Shard) -> Result<(), DriverError> {
        let store = self.block.get().await?;
        let mut stream = store.list_diff(shard);
        let mut provisional: HashMap<(String, String), ProvisionalLeaf> = HashMap::new();
        let mut replayed = 0usize;
        while let Some(diff_info) = stream.next().await {
            let diff_info = diff_info?;
            let repo = diff_info.diff.commit.repo.clone();
            let commit_id = diff_info.diff.commit.id.clone();
            let parent = diff_info.parent_commit.clone();
            let placeholder = diff_info.is_placeholder();

            let mut state = self.state.write().await;
            if !state.finished.contains_repo(&repo) {
                state.create_repo_maps(&repo);
            }
            state.finished.insert(diff_info)?;
            drop(state);
            replayed += 1;
            if placeholder {
                // repo-creation marker: carries the created-at stamp but
                // never participates in the commit graph
                continue;
            }
            if let Some(parent) = &parent {
                let parent_key = (repo.clone(), parent.id.clone());
                if provisional.remove(&parent_key).is_none() {
                    provisional.insert(parent_key, ProvisionalLeaf::Awaited);
                }
            }
            let key = (repo, commit_id);
            if provisional.remove(&key).is_none() {
                provisional.insert(key, ProvisionalLeaf::Leaf);
            }
        }

        let mut entries: Vec<_> = provisional.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let mut state = self.state.write().await;
        for ((repo, commit_id), classification) in entries {
            match classification {
                ProvisionalLeaf::Awaited => {
                    return Err(DriverError::DanglingParent {
                        repo,
                        commit: commit_id,
                    });
                }
                ProvisionalLeaf::Leaf => state.leaves.insert(&repo, shard, &commit_id)?,
            }
        }
        info!(shard, replayed, "shard replayed");
        Ok(())
    }

    /// Drop the shard's layer from the started and finished views.
    #[instrument(skip(self))]
    pub async fn delete_shard(&self, shard: Shard) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        state.finished.remove_shard(shard);
        state.started.remove_shard(shard);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Block store fan-out
    // ------------------------------------------------------------------

    async fn mirror_create_diffs(&self, diff_infos: Vec<DiffInfo>) -> Result<(), DriverError> {
        if diff_infos.is_empty() {
            return Ok(());
        }
        let store = self.block.get().await?;
        let results = future::join_all(diff_infos.into_iter().map(|diff_info| {
            let store = store.clone();
            async move { store.create_diff(&diff_info).await }
        }))
        .await;
        first_error(results)
    }

    async fn mirror_delete_diffs(&self, diffs: Vec<Diff>) -> Result<(), DriverError> {
        if diffs.is_empty() {
            return Ok(());
        }
        let store = self.block.get().await?;
        let results = future::join_all(diffs.into_iter().map(|diff| {
            let store = store.clone();
            async move { store.delete_diff(&diff).await }
        }))
        .await;
        first_error(results)
    }
}

/// Collapse fan-out results: the first error wins, the rest are logged.
fn first_error(results: Vec<Result<(), BlockStoreError>>) -> Result<(), DriverError> {
    let mut first: Option<BlockStoreError> = None;
    for result in results {
        if let Err(err) = result {
            if first.is_none() {
                first = Some(err);
            } else {
                warn!(error = %err, "additional block store failure in fan-out");
            }
        }
    }
    match first {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn inspect_repo_locked(state: &DriverState, repo: &str, shards: &BTreeSet<Shard>) -> Result<RepoInfo, DriverError> {
    if !state.finished.contains_repo(repo) {
        return Err(DriverError::RepoNotFound { repo: repo.to_string() });
    }
    let mut repo_info = RepoInfo {
        repo: repo.to_string(),
        created: None,
        size_bytes: 0,
    };
    for &shard in shards {
        let Some(commits) = state.finished.shard_commits(repo, shard) else {
            return Err(DriverError::RepoNotFound { repo: repo.to_string() });
        };
        for diff_info in commits.values() {
            if diff_info.is_placeholder() {
                repo_info.created = diff_info.finished;
            }
            repo_info.size_bytes += diff_info.size_bytes;
        }
    }
    Ok(repo_info)
}

fn inspect_commit_locked(state: &DriverState, commit: &Commit, shards: &BTreeSet<Shard>) -> Result<CommitInfo, DriverError> {
    let mut infos = Vec::new();
    let mut commit = commit.clone();
    for &shard in shards {
        commit = state.canonical_commit(&commit, shard);
        let diff = Diff {
            commit: commit.clone(),
            shard,
        };
        let Some((diff_info, finished)) = state.get_diff_info(&diff) else {
            return Err(DriverError::CommitNotFound {
                repo: commit.repo.clone(),
                commit: commit.id.clone(),
            });
        };
        infos.push(CommitInfo {
            commit: commit.clone(),
            commit_type: if finished { CommitType::Read } else { CommitType::Write },
            branch: diff_info.branch.clone(),
            parent_commit: diff_info.parent_commit.clone(),
            started: diff_info.started,
            finished: diff_info.finished,
            size_bytes: diff_info.size_bytes,
        });
    }
    let mut reduced = reduce_commit_infos(infos);
    match reduced.pop() {
        Some(commit_info) if reduced.is_empty() => Ok(commit_info),
        Some(_) => Err(DriverError::AmbiguousCommitInfo),
        None => Err(DriverError::CommitNotFound {
            repo: commit.repo.clone(),
            commit: commit.id.clone(),
        }),
    }
}
