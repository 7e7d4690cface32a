//! Reduction of per-shard commit views.
//!
//! `inspect_commit` collects one [`CommitInfo`] per shard; this reducer
//! collapses them into one record per commit id. Sizes add up across
//! shards. A commit still open on any shard reduces to an open (`Write`)
//! record. Timestamps, parent, and branch are written under one driver
//! lock and therefore agree across shards; the reducer asserts as much in
//! debug builds.

use std::collections::HashMap;

use crate::types::CommitInfo;
use crate::types::CommitType;

/// Merge per-shard commit infos by commit id, preserving first-seen order.
pub fn reduce_commit_infos(infos: Vec<CommitInfo>) -> Vec<CommitInfo> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, CommitInfo> = HashMap::new();
    for info in infos {
        match merged.get_mut(&info.commit.id) {
            None => {
                order.push(info.commit.id.clone());
                merged.insert(info.commit.id.clone(), info);
            }
            Some(acc) => {
                debug_assert_eq!(acc.started, info.started);
                debug_assert_eq!(acc.parent_commit, info.parent_commit);
                debug_assert_eq!(acc.branch, info.branch);
                acc.size_bytes += info.size_bytes;
                if info.commit_type == CommitType::Write {
                    acc.commit_type = CommitType::Write;
                }
                if info.finished.is_none() {
                    acc.finished = None;
                }
            }
        }
    }
    order.into_iter().filter_map(|id| merged.remove(&id)).collect()
}
