//! Ancestry resolution.
//!
//! A file read walks parent pointers starting at the requested commit,
//! collecting block refs (regular files) or union-ing children
//! (directories) from every append that names the path. Once a matching
//! append is found the walk jumps through `last_ref` instead of the plain
//! parent pointer, so the cost is proportional to the number of commits
//! that touched the path, not the length of the history.

use std::collections::BTreeSet;

use pfs_core::BlockHash;
use pfs_core::BlockRef;
use pfs_core::Commit;
use pfs_core::Diff;
use pfs_core::DiffInfo;
use pfs_core::File;
use pfs_core::FileInfo;
use pfs_core::FileType;
use pfs_core::Shard;
use pfs_core::ShardFilter;
use pfs_core::path;
use pfs_core::shard;

use crate::error::DriverError;
use crate::index::DriverState;

/// Resolve `file` against the ancestry of its commit.
///
/// Returns the file info together with the full ordered block ref list
/// (parent-to-child in write order). The walk stops at a missing parent or
/// at `from` (exclusive). A path no ancestor touched — or a regular file
/// whose path is outside `filter` — resolves to `FileNotFound`.
pub(crate) fn inspect_file(
    state: &DriverState,
    file: &File,
    filter: &ShardFilter,
    shard: Shard,
    from: Option<&Commit>,
) -> Result<(FileInfo, Vec<BlockRef>), DriverError> {
    let cleaned = path::clean(&file.path);
    let mut info = FileInfo {
        file: file.clone(),
        ..FileInfo::default()
    };
    let mut block_refs: Vec<BlockRef> = Vec::new();
    let mut seen_children: BTreeSet<String> = BTreeSet::new();
    let mut commit = Some(file.commit.clone());

    while let Some(current) = commit {
        if from.is_some_and(|from| from.id == current.id) {
            break;
        }
        let diff = Diff {
            commit: current.clone(),
            shard,
        };
        let Some((diff_info, _)) = state.get_diff_info(&diff) else {
            return Err(DriverError::DiffNotFound {
                repo: current.repo,
                commit: current.id,
            });
        };
        let Some(append) = diff_info.appends.get(&cleaned) else {
            commit = diff_info.parent_commit.clone();
            continue;
        };

        if !append.block_refs.is_empty() {
            if info.file_type == FileType::Dir {
                return Err(mixed_file_type(file));
            }
            if info.file_type == FileType::None && !shard::file_in_shard(filter, &cleaned) {
                // dirs are returned regardless of sharding since their
                // children may come from any shard; regular files are not
                return Err(file_not_found(file));
            }
            info.file_type = FileType::Regular;
            let filtered = filter_block_refs(filter, &append.block_refs);
            for block_ref in &filtered {
                info.size_bytes += block_ref.range.len();
            }
            // older appends end up earlier: final order is parent-to-child
            let mut combined = filtered;
            combined.extend(block_refs);
            block_refs = combined;
        } else if !append.children.is_empty() {
            if info.file_type == FileType::Regular {
                return Err(mixed_file_type(file));
            }
            info.file_type = FileType::Dir;
            for child in &append.children {
                if seen_children.insert(child.clone()) {
                    info.children.push(File {
                        commit: current.clone(),
                        path: child.clone(),
                    });
                }
            }
        }

        // most recent appending commit wins
        if info.commit_modified.is_none() {
            info.commit_modified = Some(current.clone());
            info.modified = diff_info.finished;
        }
        commit = append.last_ref.clone();
    }

    if info.file_type == FileType::None {
        return Err(file_not_found(file));
    }
    if info.file_type == FileType::Regular {
        info.hash = Some(BlockHash::combine(block_refs.iter().map(|block_ref| &block_ref.hash)));
    }
    Ok((info, block_refs))
}

/// The nearest ancestor of `file.commit` (inclusive) whose finished diff
/// contains the path, if any.
pub(crate) fn last_ref(state: &DriverState, file: &File, shard: Shard) -> Option<Commit> {
    let cleaned = path::clean(&file.path);
    let mut commit = Some(file.commit.clone());
    while let Some(current) = commit {
        let diff = Diff {
            commit: current.clone(),
            shard,
        };
        let diff_info = state.finished.get(&diff)?;
        if diff_info.appends.contains_key(&cleaned) {
            return Some(current);
        }
        commit = diff_info.parent_commit.clone();
    }
    None
}

/// Record `path` as a child of every directory above it, up to the root.
pub(crate) fn add_dirs(diff_info: &mut DiffInfo, raw_path: &str) {
    let mut child = path::clean(raw_path);
    loop {
        let parent = path::dir(&child);
        diff_info.appends.entry(parent.clone()).or_default().children.insert(child);
        if parent == "." {
            break;
        }
        child = parent;
    }
}

fn filter_block_refs(filter: &ShardFilter, refs: &[BlockRef]) -> Vec<BlockRef> {
    refs.iter().filter(|block_ref| shard::block_in_shard(filter, &block_ref.hash)).cloned().collect()
}

fn mixed_file_type(file: &File) -> DriverError {
    DriverError::MixedFileType {
        repo: file.commit.repo.clone(),
        commit: file.commit.id.clone(),
        path: file.path.clone(),
    }
}

fn file_not_found(file: &File) -> DriverError {
    DriverError::FileNotFound {
        repo: file.commit.repo.clone(),
        commit: file.commit.id.clone(),
        path: file.path.clone(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono::Utc;
    use pfs_core::Append;
    use pfs_core::ByteRange;

    use super::*;

    fn block_ref(data: &[u8]) -> BlockRef {
        BlockRef {
            hash: BlockHash::of(data),
            range: ByteRange::new(0, data.len() as u64),
        }
    }

    fn finished_diff<'a>(state: &'a mut DriverState, id: &str, parent: Option<&str>) -> &'a mut DiffInfo {
        let mut diff_info =
            DiffInfo::open(Commit::new("repo", id), 0, Utc.timestamp_opt(1, 0).unwrap(), None);
        diff_info.finished = Some(Utc.timestamp_opt(2, 0).unwrap());
        diff_info.parent_commit = parent.map(|p| Commit::new("repo", p));
        state.finished.insert(diff_info).unwrap();
        state.finished.get_mut(&Diff::new("repo", id, 0)).unwrap()
    }

    #[test]
    fn add_dirs_walks_to_root() {
        let mut diff_info = DiffInfo::open(Commit::new("repo", "c1"), 0, Utc.timestamp_opt(1, 0).unwrap(), None);
        add_dirs(&mut diff_info, "/a/b/c");

        assert!(diff_info.appends["a/b"].children.contains("a/b/c"));
        assert!(diff_info.appends["a"].children.contains("a/b"));
        assert!(diff_info.appends["."].children.contains("a"));
        assert!(!diff_info.appends.contains_key("a/b/c"));
    }

    #[test]
    fn last_ref_skips_untouching_commits() {
        let mut state = DriverState::default();
        state.create_repo_maps("repo");

        let diff_info = finished_diff(&mut state, "c1", None);
        diff_info.appends.insert("a".into(), Append {
            block_refs: vec![block_ref(b"x")],
            ..Append::default()
        });
        finished_diff(&mut state, "c2", Some("c1"));

        let found = last_ref(&state, &File::new("repo", "c2", "a"), 0);
        assert_eq!(found, Some(Commit::new("repo", "c1")));
        assert_eq!(last_ref(&state, &File::new("repo", "c2", "missing"), 0), None);
    }

    #[test]
    fn last_ref_stops_at_unfinished_ancestor() {
        let mut state = DriverState::default();
        state.create_repo_maps("repo");
        // c1 exists only in started; the finished-only walk cannot see it
        state
            .started
            .insert(DiffInfo::open(Commit::new("repo", "c1"), 0, Utc.timestamp_opt(1, 0).unwrap(), None))
            .unwrap();
        assert_eq!(last_ref(&state, &File::new("repo", "c1", "a"), 0), None);
    }

    #[test]
    fn walk_on_missing_diff_is_an_error() {
        let state = DriverState::default();
        let err = inspect_file(&state, &File::new("repo", "c1", "a"), &ShardFilter::any(), 0, None).unwrap_err();
        assert!(matches!(err, DriverError::DiffNotFound { .. }));
    }

    #[test]
    fn mixed_lineage_is_reported() {
        let mut state = DriverState::default();
        state.create_repo_maps("repo");

        let diff_info = finished_diff(&mut state, "c1", None);
        let mut dir_append = Append::default();
        dir_append.children.insert("a/b".into());
        diff_info.appends.insert("a".into(), dir_append);

        let diff_info = finished_diff(&mut state, "c2", Some("c1"));
        diff_info.appends.insert("a".into(), Append {
            block_refs: vec![block_ref(b"x")],
            last_ref: Some(Commit::new("repo", "c1")),
            ..Append::default()
        });

        let err = inspect_file(&state, &File::new("repo", "c2", "a"), &ShardFilter::any(), 0, None).unwrap_err();
        assert!(matches!(err, DriverError::MixedFileType { .. }));
    }

    #[test]
    fn children_union_across_commits() {
        let mut state = DriverState::default();
        state.create_repo_maps("repo");

        let diff_info = finished_diff(&mut state, "c1", None);
        let mut append = Append::default();
        append.children.insert("d/one".into());
        diff_info.appends.insert("d".into(), append);

        let diff_info = finished_diff(&mut state, "c2", Some("c1"));
        let mut append = Append {
            last_ref: Some(Commit::new("repo", "c1")),
            ..Append::default()
        };
        append.children.insert("d/one".into());
        append.children.insert("d/two".into());
        diff_info.appends.insert("d".into(), append);

        let (info, refs) =
            inspect_file(&state, &File::new("repo", "c2", "d"), &ShardFilter::any(), 0, None).unwrap();
        assert_eq!(info.file_type, FileType::Dir);
        assert!(refs.is_empty());
        let mut paths: Vec<&str> = info.children.iter().map(|child| child.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["d/one", "d/two"]);
        // first-seen child is attributed to the newest commit
        assert!(info.children.iter().all(|child| child.commit.id == "c2"));
        assert_eq!(info.commit_modified, Some(Commit::new("repo", "c2")));
    }
}
