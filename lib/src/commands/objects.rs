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

//! Object-level commands: reading and writing blobs, trees, commits,
//! and tags, plus pack maintenance.

use bstr::BString;

use super::CommandResult;
use super::ErrorKind;
use super::ResultExt as _;
use super::command_err;
use super::resolve_commit;
use super::resolve_revision;
use crate::fs_backend::FsBackend;
use crate::object::Commit;
use crate::object::Object;
use crate::object::Tag;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object::hash_object;
use crate::object_id::HexPrefix;
use crate::object_id::Oid;
use crate::object_id::PrefixResolution;
use crate::pack;
use crate::pack::PackIndex;
use crate::repo::Repository;
use crate::repo_path::RepoPathBuf;
use crate::revwalk;
use crate::store::StoreError;

/// Derives a blob id without touching the store.
pub fn hash_blob(repo: &Repository, content: &[u8]) -> Oid {
    hash_object(
        repo.store().hash_kind(),
        crate::object::ObjectType::Blob,
        content,
    )
}

pub fn write_blob(repo: &Repository, content: &[u8]) -> CommandResult<Oid> {
    repo.store().write_blob(content).ctx("git.writeBlob")
}

/// Reads a blob by revision; with `filepath`, resolves through the
/// revision's tree.
pub fn read_blob(
    repo: &Repository,
    revision: &str,
    filepath: Option<&str>,
) -> CommandResult<(Oid, BString)> {
    const CALLER: &str = "git.readBlob";
    let oid = resolve_at_path(repo, revision, filepath).ctx(CALLER)?;
    let content = repo.store().read_blob(&oid).ctx(CALLER)?;
    Ok((oid, content))
}

/// Resolves `revision`, then optionally a path inside its tree.
fn resolve_at_path(
    repo: &Repository,
    revision: &str,
    filepath: Option<&str>,
) -> Result<Oid, ErrorKind> {
    let oid = resolve_revision(repo, revision)?;
    let Some(filepath) = filepath else {
        return Ok(oid);
    };
    let path = RepoPathBuf::from_relative_string(filepath).map_err(ErrorKind::from)?;
    let (_, commit) = repo.store().peel_to_commit(&oid)?;
    let entry = repo
        .store()
        .tree_path_entry(&commit.tree, &path)?
        .ok_or_else(|| ErrorKind::NotFound {
            what: format!("{filepath} in {revision}"),
        })?;
    Ok(entry.oid)
}

pub fn write_tree(repo: &Repository, entries: Vec<TreeEntry>) -> CommandResult<Oid> {
    const CALLER: &str = "git.writeTree";
    let tree = Tree::from_entries(entries).ctx(CALLER)?;
    repo.store().write_object(&Object::Tree(tree)).ctx(CALLER)
}

/// Reads a tree by revision: commits and tags peel to their root tree;
/// with `filepath`, descends to a subtree.
pub fn read_tree(
    repo: &Repository,
    revision: &str,
    filepath: Option<&str>,
) -> CommandResult<(Oid, Tree)> {
    const CALLER: &str = "git.readTree";
    let oid = resolve_revision(repo, revision).ctx(CALLER)?;
    let (peeled, object) = repo.store().peel_tag(&oid).ctx(CALLER)?;
    let mut tree_oid = match object {
        Object::Commit(commit) => commit.tree,
        Object::Tree(_) => peeled,
        other => {
            return Err(command_err(
                CALLER,
                ErrorKind::ObjectType {
                    expected: crate::object::ObjectType::Tree,
                    actual: other.object_type(),
                },
            ));
        }
    };
    if let Some(filepath) = filepath {
        let path = RepoPathBuf::from_relative_string(filepath).ctx(CALLER)?;
        let entry = repo
            .store()
            .tree_path_entry(&tree_oid, &path)
            .ctx(CALLER)?
            .filter(|entry| entry.mode.is_tree())
            .ok_or_else(|| {
                command_err(
                    CALLER,
                    ErrorKind::NotFound {
                        what: format!("tree {filepath} in {revision}"),
                    },
                )
            })?;
        tree_oid = entry.oid;
    }
    let tree = repo.store().read_tree(&tree_oid).ctx(CALLER)?;
    Ok((tree_oid, tree))
}

pub fn write_commit(repo: &Repository, commit: Commit) -> CommandResult<Oid> {
    repo.store()
        .write_object(&Object::Commit(commit))
        .ctx("git.writeCommit")
}

pub fn read_commit(repo: &Repository, revision: &str) -> CommandResult<(Oid, Commit)> {
    const CALLER: &str = "git.readCommit";
    let oid = resolve_commit(repo, revision).ctx(CALLER)?;
    let commit = repo.store().read_commit(&oid).ctx(CALLER)?;
    Ok((oid, commit))
}

/// Writes an annotated tag object. With `dry_run`, derives the id
/// without storing.
pub fn write_tag(repo: &Repository, tag: Tag, dry_run: bool) -> CommandResult<Oid> {
    const CALLER: &str = "git.writeTag";
    if tag.name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("tag")));
    }
    let object = Object::Tag(tag);
    if dry_run {
        return Ok(object.id(repo.store().hash_kind()));
    }
    repo.store().write_object(&object).ctx(CALLER)
}

pub fn read_tag(repo: &Repository, revision: &str) -> CommandResult<(Oid, Tag)> {
    const CALLER: &str = "git.readTag";
    let oid = resolve_revision(repo, revision).ctx(CALLER)?;
    let tag = repo.store().read_tag(&oid).ctx(CALLER)?;
    Ok((oid, tag))
}

/// Expands a unique object id prefix.
pub fn expand_oid(repo: &Repository, prefix: &str) -> CommandResult<Oid> {
    const CALLER: &str = "git.expandOid";
    let parsed = HexPrefix::try_from_hex(prefix).ok_or_else(|| {
        command_err(
            CALLER,
            ErrorKind::NotFound {
                what: format!("object prefix {prefix}"),
            },
        )
    })?;
    match repo.store().resolve_prefix(&parsed).ctx(CALLER)? {
        PrefixResolution::SingleMatch(oid) => Ok(oid),
        PrefixResolution::NoMatch => Err(command_err(
            CALLER,
            ErrorKind::NotFound {
                what: format!("object prefix {prefix}"),
            },
        )),
        PrefixResolution::AmbiguousMatch => Err(command_err(
            CALLER,
            ErrorKind::AmbiguousOid {
                prefix: prefix.to_owned(),
            },
        )),
    }
}

/// What `show` found, after peeling tags.
#[derive(Clone, Debug)]
pub enum ShowOutput {
    Commit { oid: Oid, commit: Commit },
    Tree { oid: Oid, tree: Tree },
    Blob { oid: Oid, content: BString },
}

/// Dispatches on the object type behind a revision; with `filepath`,
/// resolves through the commit's tree first.
pub fn show(
    repo: &Repository,
    revision: &str,
    filepath: Option<&str>,
) -> CommandResult<ShowOutput> {
    const CALLER: &str = "git.show";
    let oid = resolve_at_path(repo, revision, filepath).ctx(CALLER)?;
    let (peeled, object) = repo.store().peel_tag(&oid).ctx(CALLER)?;
    Ok(match object {
        Object::Commit(commit) => ShowOutput::Commit {
            oid: peeled,
            commit,
        },
        Object::Tree(tree) => ShowOutput::Tree { oid: peeled, tree },
        Object::Blob(content) => ShowOutput::Blob {
            oid: peeled,
            content,
        },
        Object::Tag(_) => unreachable!("peel_tag returned a tag"),
    })
}

/// Builds the `.idx` for a pack file stored under the git directory and
/// returns the ids it contains. Filesystem storage only.
pub fn index_pack(repo: &Repository, filepath: &str) -> CommandResult<Vec<Oid>> {
    const CALLER: &str = "git.indexPack";
    if filepath.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("filepath")));
    }
    let backend = repo.store().backend().clone();
    let Some(fs_backend) = backend.as_ref().downcast_ref::<FsBackend>() else {
        return Err(command_err(
            CALLER,
            ErrorKind::Storage {
                message: format!("indexPack requires file storage, not {}", backend.name()),
            },
        ));
    };
    let rel = filepath.replace('\\', "/");
    let pack_path = fs_backend.path().join(&rel);
    let data = std::fs::read(&pack_path).map_err(|_| {
        command_err(
            CALLER,
            ErrorKind::NotFound {
                what: format!("pack file {filepath}"),
            },
        )
    })?;
    let hash_kind = repo.store().hash_kind();
    let lookup = |oid: &Oid| backend.read_object(oid).ok();
    let parsed = pack::parse_pack(&data, hash_kind, &lookup).ctx(CALLER)?;
    let entries: Vec<(Oid, u64, u32)> = parsed
        .entries
        .iter()
        .map(|entry| (entry.oid.clone(), entry.offset, entry.crc32))
        .collect();
    let idx_data = PackIndex::build(&entries, &parsed.trailer, hash_kind);
    let idx_path = pack_path.with_extension("idx");
    std::fs::write(&idx_path, idx_data).map_err(|err| {
        command_err(
            CALLER,
            ErrorKind::Storage {
                message: format!("{}: {err}", idx_path.display()),
            },
        )
    })?;
    fs_backend.refresh_packs();
    Ok(parsed.entries.into_iter().map(|entry| entry.oid).collect())
}

/// Builds a pack containing the full closure of the given commits and
/// returns its bytes.
pub fn pack_objects(repo: &Repository, revisions: &[&str]) -> CommandResult<Vec<u8>> {
    const CALLER: &str = "git.packObjects";
    if revisions.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("oids")));
    }
    let mut tips = vec![];
    for revision in revisions {
        tips.push(resolve_commit(repo, revision).ctx(CALLER)?);
    }
    let shallow = repo.shallow_set().ctx(CALLER)?;
    let commits = revwalk::rev_list(repo.store(), &shallow, &tips, &[]).ctx(CALLER)?;
    let objects = collect_closure(repo, &commits, &Default::default()).ctx(CALLER)?;
    let built = pack::build_pack(
        &objects,
        repo.store().hash_kind(),
        pack::DEFAULT_DELTA_WINDOW,
    );
    Ok(built.data)
}

/// Loads `(oid, type, payload)` for the commits plus every tree and
/// blob they reference, skipping anything in `known`.
pub(super) fn collect_closure(
    repo: &Repository,
    commits: &[Oid],
    known: &std::collections::HashSet<Oid>,
) -> Result<Vec<(Oid, crate::object::ObjectType, Vec<u8>)>, StoreError> {
    let store = repo.store();
    let mut seen = known.clone();
    let mut out = vec![];
    let mut push = |oid: &Oid, out: &mut Vec<_>, seen: &mut std::collections::HashSet<Oid>| {
        if !seen.insert(oid.clone()) {
            return Ok::<bool, StoreError>(false);
        }
        let (object_type, payload) = store.backend().read_object(oid)?;
        out.push((oid.clone(), object_type, payload));
        Ok(true)
    };
    for commit_oid in commits {
        if !push(commit_oid, &mut out, &mut seen)? {
            continue;
        }
        let commit = store.read_commit(commit_oid)?;
        let mut tree_stack = vec![commit.tree];
        while let Some(tree_oid) = tree_stack.pop() {
            if !push(&tree_oid, &mut out, &mut seen)? {
                continue;
            }
            for entry in store.read_tree(&tree_oid)?.entries() {
                match entry.mode {
                    crate::object::FileMode::Tree => tree_stack.push(entry.oid.clone()),
                    // Gitlinks point outside this store.
                    crate::object::FileMode::Commit => {}
                    _ => {
                        push(&entry.oid, &mut out, &mut seen)?;
                    }
                }
            }
        }
    }
    Ok(out)
}
