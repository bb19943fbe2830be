// Copyright 2024 The Ugit Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! History commands: log, ancestry queries, merge, and merge abort.

use bstr::BString;

use super::CommandResult;
use super::ErrorKind;
use super::ResultExt as _;
use super::command_err;
use super::resolve_commit;
use crate::backend::RefValue;
use crate::index::IndexEntry;
use crate::index::Stage;
use crate::index::StatCache;
use crate::merge::MergeLabels;
use crate::merge::MergeStrategy;
use crate::object::Commit;
use crate::object::FileMode;
use crate::object::Object;
use crate::object::Signature;
use crate::object_id::Oid;
use crate::refs::Expect;
use crate::repo::Repository;
use crate::repo_path::RepoPathBuf;
use crate::revwalk;
use crate::worktree::WalkEntry;

/// One `log` row.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub oid: Oid,
    pub commit: Commit,
}

/// Commits reachable from `revision` in topological order; with
/// `filepath`, only commits where that path's blob changed against at
/// least one parent. `depth` caps the number of rows.
pub fn log(
    repo: &Repository,
    revision: &str,
    filepath: Option<&str>,
    depth: Option<usize>,
) -> CommandResult<Vec<LogEntry>> {
    const CALLER: &str = "git.log";
    let tip = resolve_commit(repo, revision).ctx(CALLER)?;
    let shallow = repo.shallow_set().ctx(CALLER)?;
    let oids = revwalk::rev_list(repo.store(), &shallow, &[tip], &[]).ctx(CALLER)?;
    let path = filepath
        .map(RepoPathBuf::from_relative_string)
        .transpose()
        .ctx(CALLER)?;
    let mut out = vec![];
    for oid in oids {
        let commit = repo.store().read_commit(&oid).ctx(CALLER)?;
        if let Some(path) = &path {
            if !touches_path(repo, &commit, &shallow, &oid, path).ctx(CALLER)? {
                continue;
            }
        }
        out.push(LogEntry { oid, commit });
        if depth.is_some_and(|depth| out.len() >= depth) {
            break;
        }
    }
    Ok(out)
}

/// True when the blob at `path` differs from at least one parent (or the
/// commit introduces or has no parents and the path exists).
fn touches_path(
    repo: &Repository,
    commit: &Commit,
    shallow: &std::collections::HashSet<Oid>,
    oid: &Oid,
    path: &RepoPathBuf,
) -> Result<bool, ErrorKind> {
    let own = repo
        .store()
        .tree_path_entry(&commit.tree, path)?
        .map(|entry| entry.oid);
    if shallow.contains(oid) || commit.parents.is_empty() {
        return Ok(own.is_some());
    }
    for parent_oid in &commit.parents {
        let parent = repo.store().read_commit(parent_oid)?;
        let theirs = repo
            .store()
            .tree_path_entry(&parent.tree, path)?
            .map(|entry| entry.oid);
        if theirs != own {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The public three-tree walk over HEAD, index, and worktree.
pub fn walk(repo: &Repository) -> CommandResult<Vec<WalkEntry>> {
    const CALLER: &str = "git.walk";
    let worktree = repo.worktree().ok_or_else(|| {
        command_err(
            CALLER,
            ErrorKind::Storage {
                message: "this repository has no worktree".to_owned(),
            },
        )
    })?;
    let head = match repo.refs().resolve_leaf("HEAD").ctx(CALLER)?.1 {
        None => None,
        Some(oid) => Some(repo.store().read_commit(&oid).ctx(CALLER)?.tree),
    };
    worktree.walk(head.as_ref()).ctx(CALLER)
}

/// Best common ancestors of two revisions (zero, one, or several).
pub fn find_merge_base(repo: &Repository, a: &str, b: &str) -> CommandResult<Vec<Oid>> {
    const CALLER: &str = "git.findMergeBase";
    let a = resolve_commit(repo, a).ctx(CALLER)?;
    let b = resolve_commit(repo, b).ctx(CALLER)?;
    let shallow = repo.shallow_set().ctx(CALLER)?;
    crate::merge::merge_bases(repo.store(), &shallow, &a, &b).ctx(CALLER)
}

/// Whether `ancestor` is an ancestor of `oid`, within `depth` parent
/// hops (`-1` for unlimited).
pub fn is_descendent(
    repo: &Repository,
    oid: &str,
    ancestor: &str,
    depth: i64,
) -> CommandResult<bool> {
    const CALLER: &str = "git.isDescendent";
    let oid = resolve_commit(repo, oid).ctx(CALLER)?;
    let ancestor = resolve_commit(repo, ancestor).ctx(CALLER)?;
    let shallow = repo.shallow_set().ctx(CALLER)?;
    revwalk::is_descendent(repo.store(), &shallow, &oid, &ancestor, depth).ctx(CALLER)
}

/// The structured result of `merge`.
#[derive(Clone, Debug)]
pub struct MergeReport {
    /// The resulting commit, when one was created or fast-forwarded to.
    pub oid: Option<Oid>,
    pub already_merged: bool,
    pub fast_forward: bool,
    /// Paths left with conflict stages; empty on a clean merge.
    pub conflicts: Vec<RepoPathBuf>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn actor_for(repo: &Repository, caller: &'static str) -> CommandResult<Signature> {
    Ok(repo
        .default_signature()
        .ctx(caller)?
        .unwrap_or_else(|| Signature::now("ugit", "ugit@localhost")))
}

/// Merges `theirs` into the current branch.
///
/// Conflicts are not an error: they materialize as stage-1/2/3 index
/// entries plus marker blobs in the worktree, `MERGE_HEAD` is recorded,
/// and the report lists the paths. `abort_merge` or a later `commit`
/// concludes the merge.
pub fn merge(
    repo: &Repository,
    theirs: &str,
    strategy: MergeStrategy,
    fast_forward_only: bool,
    author: Option<Signature>,
    message: Option<&str>,
) -> CommandResult<MergeReport> {
    const CALLER: &str = "git.merge";
    merge_inner(repo, CALLER, theirs, strategy, fast_forward_only, author, message)
}

/// `merge` restricted to the fast-forward path.
pub fn fast_forward_merge(repo: &Repository, theirs: &str) -> CommandResult<MergeReport> {
    merge_inner(
        repo,
        "git.fastForward",
        theirs,
        MergeStrategy::Recursive,
        true,
        None,
        None,
    )
}

fn merge_inner(
    repo: &Repository,
    caller: &'static str,
    theirs: &str,
    strategy: MergeStrategy,
    fast_forward_only: bool,
    author: Option<Signature>,
    message: Option<&str>,
) -> CommandResult<MergeReport> {
    if theirs.is_empty() {
        return Err(command_err(caller, ErrorKind::MissingParameter("theirs")));
    }
    let their_oid = resolve_commit(repo, theirs).ctx(caller)?;
    let (head_leaf, our_target) = repo.refs().resolve_leaf("HEAD").ctx(caller)?;
    let actor = match author.clone() {
        Some(author) => author,
        None => actor_for(repo, caller)?,
    };

    let Some(our_oid) = our_target else {
        // Unborn branch: adopt their history outright.
        repo.refs()
            .update(
                &head_leaf,
                &their_oid,
                &Expect::Absent,
                &actor,
                &format!("merge {theirs}: fast-forward"),
            )
            .ctx(caller)?;
        checkout_merged_tree(repo, &their_oid, caller)?;
        return Ok(MergeReport {
            oid: Some(their_oid),
            already_merged: false,
            fast_forward: true,
            conflicts: vec![],
        });
    };

    let shallow = repo.shallow_set().ctx(caller)?;
    if our_oid == their_oid
        || revwalk::is_descendent(repo.store(), &shallow, &our_oid, &their_oid, -1).ctx(caller)?
    {
        return Ok(MergeReport {
            oid: Some(our_oid),
            already_merged: true,
            fast_forward: false,
            conflicts: vec![],
        });
    }
    if revwalk::is_descendent(repo.store(), &shallow, &their_oid, &our_oid, -1).ctx(caller)? {
        // Ours is behind: materialize first, then move the ref.
        checkout_merged_tree(repo, &their_oid, caller)?;
        repo.refs()
            .update(
                &head_leaf,
                &their_oid,
                &Expect::Value(our_oid),
                &actor,
                &format!("merge {theirs}: fast-forward"),
            )
            .ctx(caller)?;
        return Ok(MergeReport {
            oid: Some(their_oid),
            already_merged: false,
            fast_forward: true,
            conflicts: vec![],
        });
    }
    if fast_forward_only {
        return Err(command_err(caller, ErrorKind::NotFastForward));
    }

    let labels = MergeLabels {
        ours: head_leaf
            .strip_prefix("refs/heads/")
            .unwrap_or("ours")
            .to_owned(),
        theirs: theirs.to_owned(),
    };
    let outcome = crate::merge::merge_commit_trees(
        repo.store(),
        &shallow,
        &our_oid,
        &their_oid,
        strategy,
        &labels,
    )
    .ctx(caller)?;

    if !outcome.conflicts.is_empty() {
        materialize_conflicts(repo, &outcome, caller)?;
        repo.store()
            .backend()
            .write_ref("MERGE_HEAD", &RefValue::Direct(their_oid))
            .ctx(caller)?;
        return Ok(MergeReport {
            oid: None,
            already_merged: false,
            fast_forward: false,
            conflicts: outcome
                .conflicts
                .iter()
                .map(|conflict| conflict.path.clone())
                .collect(),
        });
    }

    let message = message
        .map(str::to_owned)
        .unwrap_or_else(|| format!("Merge {theirs} into {}", labels.ours));
    let commit = Commit {
        tree: outcome.tree.clone(),
        parents: vec![our_oid.clone(), their_oid],
        author: actor.clone(),
        committer: actor.clone(),
        gpgsig: None,
        extra_headers: vec![],
        message: BString::from(message.clone()),
    };
    let merge_oid = repo
        .store()
        .write_object(&Object::Commit(commit))
        .ctx(caller)?;
    checkout_merged_tree(repo, &merge_oid, caller)?;
    repo.refs()
        .update(
            &head_leaf,
            &merge_oid,
            &Expect::Value(our_oid),
            &actor,
            &format!("merge {theirs}: Merge made by the recursive strategy"),
        )
        .ctx(caller)?;
    Ok(MergeReport {
        oid: Some(merge_oid),
        already_merged: false,
        fast_forward: false,
        conflicts: vec![],
    })
}

fn checkout_merged_tree(
    repo: &Repository,
    commit_oid: &Oid,
    caller: &'static str,
) -> CommandResult<()> {
    if let Some(worktree) = repo.worktree() {
        let tree = repo.store().read_commit(commit_oid).ctx(caller)?.tree;
        worktree.checkout_tree(&tree, false).ctx(caller)?;
    }
    Ok(())
}

/// Writes conflict stages into the index and the merged (marker) tree
/// into the worktree.
fn materialize_conflicts(
    repo: &Repository,
    outcome: &crate::merge::MergeTreeOutcome,
    caller: &'static str,
) -> CommandResult<()> {
    let Some(worktree) = repo.worktree() else {
        return Ok(());
    };
    worktree.checkout_tree(&outcome.tree, false).ctx(caller)?;
    let mut index = worktree.read_index().ctx(caller)?;
    for conflict in &outcome.conflicts {
        let mut stage_entry = |stage: Stage, value: &Option<(FileMode, Oid)>| {
            if let Some((mode, oid)) = value {
                index.set(IndexEntry {
                    path: conflict.path.clone(),
                    oid: oid.clone(),
                    mode: mode.as_u32(),
                    stage,
                    stat: StatCache::default(),
                });
            }
        };
        stage_entry(Stage::Base, &conflict.base);
        stage_entry(Stage::Ours, &conflict.ours);
        stage_entry(Stage::Theirs, &conflict.theirs);
    }
    worktree.write_index(&index).ctx(caller)
}

/// Abandons an in-progress merge: conflict stages are cleared back to
/// HEAD's tree, and worktree files are restored to HEAD content unless
/// their content was edited after the merge materialized them.
pub fn abort_merge(repo: &Repository) -> CommandResult<()> {
    const CALLER: &str = "git.abortMerge";
    let worktree = repo.worktree().ok_or_else(|| {
        command_err(
            CALLER,
            ErrorKind::Storage {
                message: "this repository has no worktree".to_owned(),
            },
        )
    })?;
    let merge_head = repo
        .refs()
        .read("MERGE_HEAD")
        .ctx(CALLER)?
        .and_then(|value| value.as_direct().cloned())
        .ok_or_else(|| {
            command_err(
                CALLER,
                ErrorKind::NotFound {
                    what: "merge in progress (MERGE_HEAD)".to_owned(),
                },
            )
        })?;
    let our_oid = repo
        .refs()
        .resolve_leaf("HEAD")
        .ctx(CALLER)?
        .1
        .ok_or_else(|| {
            command_err(
                CALLER,
                ErrorKind::NotFound {
                    what: "HEAD commit".to_owned(),
                },
            )
        })?;

    // Re-derive what the merge wrote; content identity decides whether a
    // file counts as locally edited since.
    let shallow = repo.shallow_set().ctx(CALLER)?;
    let merged = crate::merge::merge_commit_trees(
        repo.store(),
        &shallow,
        &our_oid,
        &merge_head,
        MergeStrategy::Recursive,
        &MergeLabels::default(),
    )
    .ctx(CALLER)?;
    let merged_files: std::collections::BTreeMap<RepoPathBuf, (FileMode, Oid)> =
        crate::diff::flatten_tree(repo.store(), &merged.tree)
            .ctx(CALLER)?
            .into_iter()
            .map(|(path, mode, oid)| (path, (mode, oid)))
            .collect();

    let head_tree = repo.store().read_commit(&our_oid).ctx(CALLER)?.tree;
    let head_files = crate::diff::flatten_tree(repo.store(), &head_tree).ctx(CALLER)?;
    let head_map: std::collections::BTreeMap<&RepoPathBuf, (FileMode, &Oid)> = head_files
        .iter()
        .map(|(path, mode, oid)| (path, (*mode, oid)))
        .collect();

    let mut index = worktree.read_index().ctx(CALLER)?;
    let mut paths: Vec<RepoPathBuf> = merged_files.keys().cloned().collect();
    paths.extend(head_files.iter().map(|(path, ..)| path.clone()));
    paths.sort();
    paths.dedup();

    for path in &paths {
        let workdir = worktree.workdir_blob_oid(path, None).ctx(CALLER)?;
        let merged_oid = merged_files.get(path).map(|(_, oid)| oid);
        let locally_edited = match (&workdir, merged_oid) {
            (Some(current), Some(merged)) => current != merged,
            (None, Some(_)) => true,
            // The merge removed it; a file on disk now is the user's.
            (Some(_), None) => true,
            (None, None) => false,
        };
        match head_map.get(path) {
            Some((mode, head_oid)) => {
                let restored = workdir.as_ref() == Some(*head_oid);
                if !locally_edited && !restored {
                    let content = repo.store().read_blob(head_oid).ctx(CALLER)?;
                    match mode {
                        FileMode::Link => worktree
                            .fs()
                            .write_symlink(path, &content)
                            .map_err(|err| io_to_command(CALLER, path, err))?,
                        _ => worktree
                            .fs()
                            .write(path, &content, *mode == FileMode::BlobExecutable)
                            .map_err(|err| io_to_command(CALLER, path, err))?,
                    }
                }
                index.set(IndexEntry {
                    path: path.clone(),
                    oid: (*head_oid).clone(),
                    mode: mode.as_u32(),
                    stage: Stage::Normal,
                    stat: StatCache::default(),
                });
            }
            None => {
                // Not in HEAD: drop the staged entry; remove the file
                // only if the merge itself put it there.
                index.remove_path(path);
                if !locally_edited && workdir.is_some() {
                    worktree
                        .fs()
                        .remove(path)
                        .map_err(|err| io_to_command(CALLER, path, err))?;
                }
            }
        }
    }
    worktree.write_index(&index).ctx(CALLER)?;
    repo.refs().delete("MERGE_HEAD").ctx(CALLER)?;
    let _ = repo.refs().delete("MERGE_MSG");
    Ok(())
}

fn io_to_command(caller: &'static str, path: &RepoPathBuf, err: std::io::Error) -> super::CommandError {
    command_err(
        caller,
        ErrorKind::Storage {
            message: format!("{path}: {err}"),
        },
    )
}
