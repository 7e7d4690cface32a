//! The diff index: the primitive maps behind the driver's four views.
//!
//! `started` and `finished` are [`DiffMap`]s that own their records
//! exclusively; a diff moves between them by pop+insert, so a diff is in
//! exactly one of the two at any instant. The `leaves` and `branches`
//! views only need identity — [`LeafMap`] holds commit ids, [`BranchMap`]
//! holds tip commits keyed by branch name — rather than sharing the
//! records themselves.
//!
//! Inserting into a view requires its repo layer to exist; the layers for
//! all four views are created together when a repo is created or first
//! seen during a shard replay.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use pfs_core::Commit;
use pfs_core::Diff;
use pfs_core::DiffInfo;
use pfs_core::Shard;

use crate::error::DriverError;

/// repo → shard → commit id → diff payload.
#[derive(Debug, Default)]
pub(crate) struct DiffMap(HashMap<String, HashMap<Shard, HashMap<String, DiffInfo>>>);

impl DiffMap {
    pub fn contains_repo(&self, repo: &str) -> bool {
        self.0.contains_key(repo)
    }

    pub fn create_repo(&mut self, repo: &str) {
        self.0.entry(repo.to_string()).or_default();
    }

    pub fn remove_repo(&mut self, repo: &str) {
        self.0.remove(repo);
    }

    /// Repo names, sorted so iteration is deterministic.
    pub fn repos(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.keys().cloned().collect();
        names.sort();
        names
    }

    /// The commit map for one (repo, shard), if that layer exists.
    pub fn shard_commits(&self, repo: &str, shard: Shard) -> Option<&HashMap<String, DiffInfo>> {
        self.0.get(repo)?.get(&shard)
    }

    pub fn get(&self, diff: &Diff) -> Option<&DiffInfo> {
        self.0.get(&diff.commit.repo)?.get(&diff.shard)?.get(&diff.commit.id)
    }

    pub fn get_mut(&mut self, diff: &Diff) -> Option<&mut DiffInfo> {
        self.0.get_mut(&diff.commit.repo)?.get_mut(&diff.shard)?.get_mut(&diff.commit.id)
    }

    /// Insert a diff keyed by its commit id. Fails if the repo layer is
    /// absent or the key is taken.
    pub fn insert(&mut self, diff_info: DiffInfo) -> Result<(), DriverError> {
        let commit = diff_info.diff.commit.clone();
        let shard_map = self.0.get_mut(&commit.repo).ok_or_else(|| DriverError::RepoNotFound {
            repo: commit.repo.clone(),
        })?;
        let commit_map = shard_map.entry(diff_info.diff.shard).or_default();
        if commit_map.contains_key(&commit.id) {
            return Err(DriverError::CommitExists {
                repo: commit.repo,
                commit: commit.id,
            });
        }
        commit_map.insert(commit.id, diff_info);
        Ok(())
    }

    /// Remove and return the diff keyed by its commit id.
    pub fn pop(&mut self, diff: &Diff) -> Option<DiffInfo> {
        self.0.get_mut(&diff.commit.repo)?.get_mut(&diff.shard)?.remove(&diff.commit.id)
    }

    /// Drop the shard layer from every repo.
    pub fn remove_shard(&mut self, shard: Shard) {
        for shard_map in self.0.values_mut() {
            shard_map.remove(&shard);
        }
    }
}

/// repo → shard → commit ids of diffs with no child on that shard.
#[derive(Debug, Default)]
pub(crate) struct LeafMap(HashMap<String, HashMap<Shard, BTreeSet<String>>>);

impl LeafMap {
    pub fn create_repo(&mut self, repo: &str) {
        self.0.entry(repo.to_string()).or_default();
    }

    pub fn remove_repo(&mut self, repo: &str) {
        self.0.remove(repo);
    }

    pub fn insert(&mut self, repo: &str, shard: Shard, commit_id: &str) -> Result<(), DriverError> {
        let shard_map = self.0.get_mut(repo).ok_or_else(|| DriverError::RepoNotFound { repo: repo.to_string() })?;
        let ids = shard_map.entry(shard).or_default();
        if !ids.insert(commit_id.to_string()) {
            return Err(DriverError::CommitExists {
                repo: repo.to_string(),
                commit: commit_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn remove(&mut self, repo: &str, shard: Shard, commit_id: &str) {
        if let Some(ids) = self.0.get_mut(repo).and_then(|shard_map| shard_map.get_mut(&shard)) {
            ids.remove(commit_id);
        }
    }

    /// Leaf commit ids for one (repo, shard), in id order.
    pub fn ids(&self, repo: &str, shard: Shard) -> Vec<String> {
        self.0
            .get(repo)
            .and_then(|shard_map| shard_map.get(&shard))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// repo → shard → branch name → tip commit.
#[derive(Debug, Default)]
pub(crate) struct BranchMap(HashMap<String, HashMap<Shard, BTreeMap<String, Commit>>>);

impl BranchMap {
    pub fn create_repo(&mut self, repo: &str) {
        self.0.entry(repo.to_string()).or_default();
    }

    pub fn tip(&self, repo: &str, shard: Shard, branch: &str) -> Option<&Commit> {
        self.0.get(repo)?.get(&shard)?.get(branch)
    }

    pub fn insert(&mut self, repo: &str, shard: Shard, branch: &str, tip: Commit) -> Result<(), DriverError> {
        let shard_map = self.0.get_mut(repo).ok_or_else(|| DriverError::RepoNotFound { repo: repo.to_string() })?;
        let branches = shard_map.entry(shard).or_default();
        if branches.contains_key(branch) {
            return Err(DriverError::CommitExists {
                repo: repo.to_string(),
                commit: tip.id,
            });
        }
        branches.insert(branch.to_string(), tip);
        Ok(())
    }

    pub fn pop(&mut self, repo: &str, shard: Shard, branch: &str) -> Option<Commit> {
        self.0.get_mut(repo)?.get_mut(&shard)?.remove(branch)
    }

    /// Branch tips for one (repo, shard), in branch-name order.
    pub fn tips(&self, repo: &str, shard: Shard) -> Vec<Commit> {
        self.0
            .get(repo)
            .and_then(|shard_map| shard_map.get(&shard))
            .map(|branches| branches.values().cloned().collect())
            .unwrap_or_default()
    }
}

/// The four views, guarded together by the driver lock.
#[derive(Debug, Default)]
pub(crate) struct DriverState {
    pub started: DiffMap,
    pub finished: DiffMap,
    pub leaves: LeafMap,
    pub branches: BranchMap,
}

impl DriverState {
    /// Create the repo layer in all four views.
    pub fn create_repo_maps(&mut self, repo: &str) {
        self.started.create_repo(repo);
        self.finished.create_repo(repo);
        self.leaves.create_repo(repo);
        self.branches.create_repo(repo);
    }

    /// Resolve a commit handle through the branches view: a branch name
    /// becomes the concrete tip commit, anything else passes through.
    pub fn canonical_commit(&self, commit: &Commit, shard: Shard) -> Commit {
        match self.branches.tip(&commit.repo, shard, &commit.id) {
            Some(tip) => tip.clone(),
            None => commit.clone(),
        }
    }

    /// Look up a diff in finished, then started. The flag is true when the
    /// diff came from finished.
    pub fn get_diff_info(&self, diff: &Diff) -> Option<(&DiffInfo, bool)> {
        if let Some(diff_info) = self.finished.get(diff) {
            return Some((diff_info, true));
        }
        self.started.get(diff).map(|diff_info| (diff_info, false))
    }

    /// Record a freshly started diff as a leaf, unseating its parent.
    pub fn insert_leaf(&mut self, repo: &str, shard: Shard, commit_id: &str, parent: Option<&Commit>) -> Result<(), DriverError> {
        self.leaves.insert(repo, shard, commit_id)?;
        if let Some(parent) = parent {
            self.leaves.remove(repo, shard, &parent.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;

    use super::*;

    fn open_diff(repo: &str, id: &str, shard: Shard) -> DiffInfo {
        DiffInfo::open(Commit::new(repo, id), shard, Utc.timestamp_opt(1, 0).unwrap(), None)
    }

    #[test]
    fn insert_requires_repo_layer() {
        let mut map = DiffMap::default();
        let err = map.insert(open_diff("repo", "c1", 0)).unwrap_err();
        assert!(matches!(err, DriverError::RepoNotFound { .. }));

        map.create_repo("repo");
        map.insert(open_diff("repo", "c1", 0)).unwrap();
        assert!(map.get(&Diff::new("repo", "c1", 0)).is_some());
    }

    #[test]
    fn duplicate_insert_fails() {
        let mut map = DiffMap::default();
        map.create_repo("repo");
        map.insert(open_diff("repo", "c1", 0)).unwrap();
        let err = map.insert(open_diff("repo", "c1", 0)).unwrap_err();
        assert!(matches!(err, DriverError::CommitExists { .. }));
        // same commit on another shard is a distinct diff
        map.insert(open_diff("repo", "c1", 1)).unwrap();
    }

    #[test]
    fn pop_removes_exactly_one_entry() {
        let mut map = DiffMap::default();
        map.create_repo("repo");
        map.insert(open_diff("repo", "c1", 0)).unwrap();
        map.insert(open_diff("repo", "c2", 0)).unwrap();

        let popped = map.pop(&Diff::new("repo", "c1", 0)).unwrap();
        assert_eq!(popped.diff.commit.id, "c1");
        assert!(map.get(&Diff::new("repo", "c1", 0)).is_none());
        assert!(map.get(&Diff::new("repo", "c2", 0)).is_some());
        assert!(map.pop(&Diff::new("repo", "c1", 0)).is_none());
    }

    #[test]
    fn remove_shard_drops_the_layer_everywhere() {
        let mut map = DiffMap::default();
        map.create_repo("a");
        map.create_repo("b");
        map.insert(open_diff("a", "c1", 0)).unwrap();
        map.insert(open_diff("b", "c1", 0)).unwrap();
        map.insert(open_diff("b", "c1", 1)).unwrap();

        map.remove_shard(0);
        assert!(map.get(&Diff::new("a", "c1", 0)).is_none());
        assert!(map.get(&Diff::new("b", "c1", 0)).is_none());
        assert!(map.get(&Diff::new("b", "c1", 1)).is_some());
    }

    #[test]
    fn leaf_insert_and_unseat() {
        let mut state = DriverState::default();
        state.create_repo_maps("repo");
        state.insert_leaf("repo", 0, "c1", None).unwrap();
        assert_eq!(state.leaves.ids("repo", 0), vec!["c1"]);

        let parent = Commit::new("repo", "c1");
        state.insert_leaf("repo", 0, "c2", Some(&parent)).unwrap();
        assert_eq!(state.leaves.ids("repo", 0), vec!["c2"]);
    }

    #[test]
    fn branch_tip_replacement_goes_through_pop() {
        let mut map = BranchMap::default();
        map.create_repo("repo");
        map.insert("repo", 0, "main", Commit::new("repo", "c1")).unwrap();
        let err = map.insert("repo", 0, "main", Commit::new("repo", "c2")).unwrap_err();
        assert!(matches!(err, DriverError::CommitExists { .. }));

        assert_eq!(map.pop("repo", 0, "main").unwrap().id, "c1");
        map.insert("repo", 0, "main", Commit::new("repo", "c2")).unwrap();
        assert_eq!(map.tip("repo", 0, "main").unwrap().id, "c2");
    }

    #[test]
    fn canonical_commit_resolves_branch_names() {
        let mut state = DriverState::default();
        state.create_repo_maps("repo");
        state.branches.insert("repo", 0, "main", Commit::new("repo", "c9")).unwrap();

        let resolved = state.canonical_commit(&Commit::new("repo", "main"), 0);
        assert_eq!(resolved.id, "c9");
        let passthrough = state.canonical_commit(&Commit::new("repo", "c1"), 0);
        assert_eq!(passthrough.id, "c1");
    }
}
