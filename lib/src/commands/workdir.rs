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

//! Worktree and index commands: staging, status, checkout, and commit.

use bstr::BString;

use super::CommandResult;
use super::ErrorKind;
use super::ResultExt as _;
use super::command_err;
use super::resolve_commit;
use crate::diff::DiffEntry;
use crate::index::IndexEntry;
use crate::index::Stage;
use crate::index::StatCache;
use crate::object::Commit;
use crate::object::FileMode;
use crate::object::Object;
use crate::object::Signature;
use crate::object_id::Oid;
use crate::refs::Expect;
use crate::repo::Repository;
use crate::repo_path::RepoPathBuf;
use crate::worktree::FileStatus;
use crate::worktree::Worktree;

fn worktree_of<'a>(repo: &'a Repository, caller: &'static str) -> CommandResult<&'a Worktree> {
    repo.worktree().ok_or_else(|| {
        command_err(
            caller,
            ErrorKind::Storage {
                message: "this repository has no worktree".to_owned(),
            },
        )
    })
}

fn repo_path(filepath: &str, caller: &'static str) -> CommandResult<RepoPathBuf> {
    if filepath.is_empty() {
        return Err(command_err(caller, ErrorKind::MissingParameter("filepath")));
    }
    RepoPathBuf::from_relative_string(filepath).ctx(caller)
}

/// The tree `HEAD` currently points at, if any commit exists.
fn head_tree(repo: &Repository) -> Result<Option<Oid>, ErrorKind> {
    let (_, target) = repo.refs().resolve_leaf("HEAD")?;
    match target {
        None => Ok(None),
        Some(oid) => Ok(Some(repo.store().read_commit(&oid)?.tree)),
    }
}

/// Stages files: blobs written, stage-0 entries upserted, conflict
/// stages cleared.
pub fn add(repo: &Repository, filepaths: &[&str]) -> CommandResult<()> {
    const CALLER: &str = "git.add";
    if filepaths.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("filepath")));
    }
    let worktree = worktree_of(repo, CALLER)?;
    let mut index = worktree.read_index().ctx(CALLER)?;
    for filepath in filepaths {
        let path = repo_path(filepath, CALLER)?;
        worktree.add(&mut index, &path).ctx(CALLER)?;
    }
    worktree.write_index(&index).ctx(CALLER)
}

/// Unstages a path. See the worktree mediator for the force rules.
pub fn remove(repo: &Repository, filepath: &str, force: bool) -> CommandResult<()> {
    const CALLER: &str = "git.remove";
    let worktree = worktree_of(repo, CALLER)?;
    let path = repo_path(filepath, CALLER)?;
    let mut index = worktree.read_index().ctx(CALLER)?;
    worktree.remove(&mut index, &path, force).ctx(CALLER)?;
    worktree.write_index(&index).ctx(CALLER)
}

/// Arguments for the combined index-edit command.
#[derive(Debug, Default)]
pub struct UpdateIndexArgs<'a> {
    pub filepath: &'a str,
    /// Stage the file (from the worktree, or from `oid` if given).
    pub add: bool,
    /// Remove the path from the index.
    pub remove: bool,
    pub force: bool,
    /// Stage this existing object instead of reading the worktree.
    pub oid: Option<Oid>,
    /// File mode for an `oid`-based add; defaults to a regular file.
    pub mode: Option<u32>,
}

/// Edits one index entry; returns the staged blob id for adds.
pub fn update_index(repo: &Repository, args: UpdateIndexArgs<'_>) -> CommandResult<Option<Oid>> {
    const CALLER: &str = "git.updateIndex";
    let worktree = worktree_of(repo, CALLER)?;
    let path = repo_path(args.filepath, CALLER)?;
    let mut index = worktree.read_index().ctx(CALLER)?;
    if args.remove {
        if args.force {
            if !index.remove_path(&path) && !index.remove_dir(&path) {
                return Err(command_err(
                    CALLER,
                    ErrorKind::NotFound {
                        what: format!("index entry {}", args.filepath),
                    },
                ));
            }
        } else {
            worktree.remove(&mut index, &path, false).ctx(CALLER)?;
        }
        worktree.write_index(&index).ctx(CALLER)?;
        return Ok(None);
    }
    if !args.add {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("add")));
    }
    let staged = match args.oid {
        None => {
            worktree.add(&mut index, &path).ctx(CALLER)?;
            index.get(&path, Stage::Normal).map(|entry| entry.oid.clone())
        }
        Some(oid) => {
            // Stage straight from the object store.
            repo.store().read_blob(&oid).ctx(CALLER)?;
            index.set(IndexEntry {
                path,
                oid: oid.clone(),
                mode: args.mode.unwrap_or(FileMode::Blob.as_u32()),
                stage: Stage::Normal,
                stat: StatCache::default(),
            });
            Some(oid)
        }
    };
    worktree.write_index(&index).ctx(CALLER)?;
    Ok(staged)
}

/// Classifies one path across HEAD, index, and worktree.
pub fn status(repo: &Repository, filepath: &str) -> CommandResult<FileStatus> {
    const CALLER: &str = "git.status";
    let worktree = worktree_of(repo, CALLER)?;
    let path = repo_path(filepath, CALLER)?;
    let head = head_tree(repo).ctx(CALLER)?;
    worktree.status(head.as_ref(), &path).ctx(CALLER)
}

/// Classifies every known path.
pub fn status_all(repo: &Repository) -> CommandResult<Vec<(RepoPathBuf, FileStatus)>> {
    const CALLER: &str = "git.statusAll";
    let worktree = worktree_of(repo, CALLER)?;
    let head = head_tree(repo).ctx(CALLER)?;
    worktree.status_all(head.as_ref()).ctx(CALLER)
}

/// Tracked paths from the index, or the paths of a revision's tree.
pub fn list_files(repo: &Repository, revision: Option<&str>) -> CommandResult<Vec<RepoPathBuf>> {
    const CALLER: &str = "git.listFiles";
    match revision {
        None => {
            let worktree = worktree_of(repo, CALLER)?;
            let index = worktree.read_index().ctx(CALLER)?;
            Ok(index.paths().into_iter().cloned().collect())
        }
        Some(revision) => {
            let commit_oid = resolve_commit(repo, revision).ctx(CALLER)?;
            let tree = repo.store().read_commit(&commit_oid).ctx(CALLER)?.tree;
            let flat = crate::diff::flatten_tree(repo.store(), &tree).ctx(CALLER)?;
            Ok(flat.into_iter().map(|(path, ..)| path).collect())
        }
    }
}

/// Switches to a branch or revision: updates `HEAD` and materializes
/// the target tree. Safe-checkout refuses to clobber local edits unless
/// forced.
pub fn checkout(repo: &Repository, refish: &str, force: bool) -> CommandResult<()> {
    const CALLER: &str = "git.checkout";
    if refish.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    let worktree = worktree_of(repo, CALLER)?;
    let commit_oid = resolve_commit(repo, refish).ctx(CALLER)?;
    let tree = repo.store().read_commit(&commit_oid).ctx(CALLER)?.tree;
    worktree.checkout_tree(&tree, force).ctx(CALLER)?;
    // A branch name moves HEAD symbolically; anything else detaches.
    let branch_ref = format!("refs/heads/{refish}");
    if repo.refs().read(&branch_ref).ctx(CALLER)?.is_some() {
        repo.refs().write_symbolic("HEAD", &branch_ref).ctx(CALLER)?;
    } else if refish.starts_with("refs/") && repo.refs().read(refish).ctx(CALLER)?.is_some() {
        repo.refs().write_symbolic("HEAD", refish).ctx(CALLER)?;
    } else {
        let actor = repo
            .default_signature()
            .ctx(CALLER)?
            .unwrap_or_else(|| Signature::now("ugit", "ugit@localhost"));
        repo.refs()
            .update(
                "HEAD",
                &commit_oid,
                &Expect::Any,
                &actor,
                &format!("checkout: moving to {refish}"),
            )
            .ctx(CALLER)?;
    }
    Ok(())
}

/// Arguments for `commit`.
#[derive(Debug, Default)]
pub struct CommitArgs {
    pub message: String,
    pub author: Option<Signature>,
    pub committer: Option<Signature>,
    /// Permit a commit that leaves the tree identical to its parent.
    pub allow_empty: bool,
    /// Derive the id without writing the commit or moving the ref.
    pub dry_run: bool,
}

/// Writes the staged tree as a commit and advances the current branch.
/// An in-progress merge (a recorded `MERGE_HEAD`) contributes a second
/// parent and is concluded by the commit.
pub fn commit(repo: &Repository, args: CommitArgs) -> CommandResult<Oid> {
    const CALLER: &str = "git.commit";
    if args.message.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("message")));
    }
    let author = match args.author.clone().or(repo.default_signature().ctx(CALLER)?) {
        Some(author) => author,
        None => return Err(command_err(CALLER, ErrorKind::MissingParameter("author"))),
    };
    let committer = args.committer.clone().unwrap_or_else(|| author.clone());

    let worktree = worktree_of(repo, CALLER)?;
    let index = worktree.read_index().ctx(CALLER)?;
    if index.has_conflicts() {
        let paths = index
            .conflict_paths()
            .into_iter()
            .map(|path| path.as_str().to_owned())
            .collect();
        return Err(command_err(CALLER, ErrorKind::MergeConflict { paths }));
    }
    let tree = write_index_tree(repo, &index).ctx(CALLER)?;

    let (_, head_target) = repo.refs().resolve_leaf("HEAD").ctx(CALLER)?;
    let mut parents: Vec<Oid> = head_target.clone().into_iter().collect();
    let merge_head = repo.refs().read("MERGE_HEAD").ctx(CALLER)?;
    if let Some(value) = &merge_head {
        if let Some(oid) = value.as_direct() {
            parents.push(oid.clone());
        }
    }
    if let Some(head_oid) = &head_target {
        let head_commit = repo.store().read_commit(head_oid).ctx(CALLER)?;
        if head_commit.tree == tree && !args.allow_empty && merge_head.is_none() {
            return Err(command_err(
                CALLER,
                ErrorKind::NotFound {
                    what: "staged changes (nothing to commit)".to_owned(),
                },
            ));
        }
    }

    let commit = Commit {
        tree,
        parents,
        author,
        committer: committer.clone(),
        gpgsig: None,
        extra_headers: vec![],
        message: BString::from(args.message.clone()),
    };
    let object = Object::Commit(commit);
    if args.dry_run {
        return Ok(object.id(repo.store().hash_kind()));
    }
    let oid = repo.store().write_object(&object).ctx(CALLER)?;
    let expect = match head_target {
        Some(old) => Expect::Value(old),
        None => Expect::Absent,
    };
    let summary = args.message.lines().next().unwrap_or("").to_owned();
    repo.refs()
        .update(
            "HEAD",
            &oid,
            &expect,
            &committer,
            &format!("commit: {summary}"),
        )
        .ctx(CALLER)?;
    if merge_head.is_some() {
        repo.refs().delete("MERGE_HEAD").ctx(CALLER)?;
        let _ = repo.refs().delete("MERGE_MSG");
    }
    Ok(oid)
}

/// Builds tree objects from the index's stage-0 entries.
pub(super) fn write_index_tree(
    repo: &Repository,
    index: &crate::index::Index,
) -> Result<Oid, ErrorKind> {
    let mut files = std::collections::BTreeMap::new();
    for entry in index.entries() {
        if entry.stage != Stage::Normal {
            continue;
        }
        let mode = FileMode::from_u32(entry.mode).unwrap_or(FileMode::Blob);
        files.insert(entry.path.clone(), (mode, entry.oid.clone()));
    }
    crate::merge::write_tree_from_flat(repo.store(), &files).map_err(ErrorKind::from)
}

/// The merged `.gitattributes` map for a path.
pub fn attributes(
    repo: &Repository,
    filepath: &str,
) -> CommandResult<std::collections::BTreeMap<String, crate::attributes::AttrState>> {
    const CALLER: &str = "git.attributes";
    let worktree = worktree_of(repo, CALLER)?;
    let path = repo_path(filepath, CALLER)?;
    let index = worktree.attributes_index().ctx(CALLER)?;
    Ok(index.lookup(&path))
}

/// Tree-level diff of two revisions; `after = None` compares `before`
/// against the staged index tree.
pub fn diff(
    repo: &Repository,
    before: &str,
    after: Option<&str>,
) -> CommandResult<Vec<DiffEntry>> {
    const CALLER: &str = "git.diff";
    let before_commit = resolve_commit(repo, before).ctx(CALLER)?;
    let before_tree = repo.store().read_commit(&before_commit).ctx(CALLER)?.tree;
    let after_tree = match after {
        Some(after) => {
            let commit = resolve_commit(repo, after).ctx(CALLER)?;
            repo.store().read_commit(&commit).ctx(CALLER)?.tree
        }
        None => {
            let worktree = worktree_of(repo, CALLER)?;
            let index = worktree.read_index().ctx(CALLER)?;
            write_index_tree(repo, &index).ctx(CALLER)?
        }
    };
    crate::diff::diff_trees(repo.store(), Some(&before_tree), Some(&after_tree)).ctx(CALLER)
}
