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

//! Ref-level commands: branches, tags, and raw ref access.

use super::CommandResult;
use super::ErrorKind;
use super::ResultExt as _;
use super::command_err;
use super::resolve_commit;
use super::resolve_revision;
use crate::backend::RefValue;
use crate::backend::ReflogEntry;
use crate::object::Object;
use crate::object::Signature;
use crate::object::Tag;
use crate::object_id::Oid;
use crate::refs::Expect;
use crate::repo::Repository;

fn actor_for(repo: &Repository, caller: &'static str) -> CommandResult<Signature> {
    Ok(repo
        .default_signature()
        .ctx(caller)?
        .unwrap_or_else(|| Signature::now("ugit", "ugit@localhost")))
}

fn full_branch_name(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_owned()
    } else {
        format!("refs/heads/{name}")
    }
}

/// Creates a branch at `HEAD` (or at `start_point`); optionally checks
/// it out by retargeting `HEAD`.
pub fn branch(
    repo: &Repository,
    name: &str,
    start_point: Option<&str>,
    checkout: bool,
) -> CommandResult<()> {
    const CALLER: &str = "git.branch";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    let full = full_branch_name(name);
    if repo.refs().read(&full).ctx(CALLER)?.is_some() {
        return Err(command_err(
            CALLER,
            ErrorKind::AlreadyExists {
                what: format!("ref {full}"),
            },
        ));
    }
    let target = match start_point {
        Some(revision) => resolve_commit(repo, revision).ctx(CALLER)?,
        None => match repo.refs().resolve_leaf("HEAD").ctx(CALLER)?.1 {
            Some(oid) => oid,
            None => {
                // Unborn HEAD: just move the symref.
                if checkout {
                    repo.refs().write_symbolic("HEAD", &full).ctx(CALLER)?;
                }
                return Ok(());
            }
        },
    };
    let actor = actor_for(repo, CALLER)?;
    repo.refs()
        .update(
            &full,
            &target,
            &Expect::Absent,
            &actor,
            &format!("branch: Created from {}", start_point.unwrap_or("HEAD")),
        )
        .ctx(CALLER)?;
    if checkout {
        repo.refs().write_symbolic("HEAD", &full).ctx(CALLER)?;
    }
    Ok(())
}

/// Renames a branch. With `checkout`, `HEAD` moves to the new name even
/// if it pointed elsewhere; the current branch always follows its
/// rename.
pub fn rename_branch(
    repo: &Repository,
    old_name: &str,
    new_name: &str,
    checkout: bool,
) -> CommandResult<()> {
    const CALLER: &str = "git.renameBranch";
    if old_name.is_empty() || new_name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    let old_full = full_branch_name(old_name);
    let new_full = full_branch_name(new_name);
    let actor = actor_for(repo, CALLER)?;
    repo.refs()
        .rename_branch(&old_full, &new_full, &actor)
        .ctx(CALLER)?;
    if checkout {
        repo.refs().write_symbolic("HEAD", &new_full).ctx(CALLER)?;
    }
    Ok(())
}

pub fn delete_branch(repo: &Repository, name: &str) -> CommandResult<()> {
    const CALLER: &str = "git.deleteBranch";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    repo.refs()
        .delete_branch(&full_branch_name(name))
        .ctx(CALLER)
}

/// Branch short names; with `remote`, the remote-tracking branches of
/// that remote.
pub fn list_branches(repo: &Repository, remote: Option<&str>) -> CommandResult<Vec<String>> {
    const CALLER: &str = "git.listBranches";
    let prefix = match remote {
        None => "refs/heads/".to_owned(),
        Some(remote) => format!("refs/remotes/{remote}/"),
    };
    let listed = repo.refs().list(&prefix).ctx(CALLER)?;
    Ok(listed
        .into_iter()
        .map(|(name, _)| name[prefix.len()..].to_owned())
        .collect())
}

pub fn list_tags(repo: &Repository) -> CommandResult<Vec<String>> {
    let listed = repo.refs().list("refs/tags/").ctx("git.listTags")?;
    Ok(listed
        .into_iter()
        .map(|(name, _)| name["refs/tags/".len()..].to_owned())
        .collect())
}

/// Creates a lightweight tag pointing at a commit-ish.
pub fn tag(repo: &Repository, name: &str, revision: Option<&str>, force: bool) -> CommandResult<()> {
    const CALLER: &str = "git.tag";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    let full = format!("refs/tags/{name}");
    if !force && repo.refs().read(&full).ctx(CALLER)?.is_some() {
        return Err(command_err(
            CALLER,
            ErrorKind::AlreadyExists {
                what: format!("tag {name}"),
            },
        ));
    }
    let target = resolve_revision(repo, revision.unwrap_or("HEAD")).ctx(CALLER)?;
    let actor = actor_for(repo, CALLER)?;
    repo.refs()
        .update(&full, &target, &Expect::Any, &actor, "tag: created")
        .ctx(CALLER)
}

/// Creates an annotated tag object and points `refs/tags/<name>` at it.
pub fn annotated_tag(
    repo: &Repository,
    name: &str,
    message: &str,
    revision: Option<&str>,
    tagger: Option<Signature>,
    force: bool,
) -> CommandResult<Oid> {
    const CALLER: &str = "git.annotatedTag";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    let full = format!("refs/tags/{name}");
    if !force && repo.refs().read(&full).ctx(CALLER)?.is_some() {
        return Err(command_err(
            CALLER,
            ErrorKind::AlreadyExists {
                what: format!("tag {name}"),
            },
        ));
    }
    let object = resolve_revision(repo, revision.unwrap_or("HEAD")).ctx(CALLER)?;
    let object_type = repo.store().object_type(&object).ctx(CALLER)?;
    let tagger = match tagger {
        Some(tagger) => tagger,
        None => actor_for(repo, CALLER)?,
    };
    let tag_oid = repo
        .store()
        .write_object(&Object::Tag(Tag {
            object: object.clone(),
            object_type,
            name: name.to_owned(),
            tagger: Some(tagger.clone()),
            message: message.into(),
        }))
        .ctx(CALLER)?;
    repo.refs()
        .update(&full, &tag_oid, &Expect::Any, &tagger, "tag: annotated")
        .ctx(CALLER)?;
    Ok(tag_oid)
}

pub fn delete_tag(repo: &Repository, name: &str) -> CommandResult<()> {
    const CALLER: &str = "git.deleteTag";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    repo.refs().delete(&format!("refs/tags/{name}")).ctx(CALLER)
}

/// Resolves a ref (or revision string) to an object id.
pub fn resolve_ref(repo: &Repository, refish: &str) -> CommandResult<Oid> {
    const CALLER: &str = "git.resolveRef";
    if refish.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    resolve_revision(repo, refish).ctx(CALLER)
}

/// Expands a short ref name using the standard lookup order.
pub fn expand_ref(repo: &Repository, short: &str) -> CommandResult<String> {
    repo.refs().expand(short).ctx("git.expandRef")
}

/// The raw stored value of a ref: a direct id or a symbolic target.
pub fn read_ref(repo: &Repository, name: &str) -> CommandResult<Option<RefValue>> {
    repo.refs().read(name).ctx("git.readRef")
}

/// Points a ref at a revision, validating the name.
pub fn write_ref(repo: &Repository, name: &str, revision: &str, force: bool) -> CommandResult<()> {
    const CALLER: &str = "git.writeRef";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    if !force && repo.refs().read(name).ctx(CALLER)?.is_some() {
        return Err(command_err(
            CALLER,
            ErrorKind::AlreadyExists {
                what: format!("ref {name}"),
            },
        ));
    }
    let target = resolve_revision(repo, revision).ctx(CALLER)?;
    let actor = actor_for(repo, CALLER)?;
    repo.refs()
        .update(name, &target, &Expect::Any, &actor, "update by writeRef")
        .ctx(CALLER)
}

/// Points a symbolic ref (e.g. `HEAD`) at another ref.
pub fn write_symbolic_ref(repo: &Repository, name: &str, target: &str) -> CommandResult<()> {
    repo.refs()
        .write_symbolic(name, target)
        .ctx("git.writeSymbolicRef")
}

pub fn delete_ref(repo: &Repository, name: &str) -> CommandResult<()> {
    const CALLER: &str = "git.deleteRef";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("ref")));
    }
    repo.refs().delete(name).ctx(CALLER)
}

pub fn read_reflog(repo: &Repository, name: &str) -> CommandResult<Vec<ReflogEntry>> {
    repo.refs().reflog(name).ctx("git.readReflog")
}

/// Folds loose refs into the packed representation; with `prune`, the
/// loose files are removed.
pub fn pack_refs(repo: &Repository, prune: bool) -> CommandResult<()> {
    repo.store().backend().pack_refs(prune).ctx("git.packRefs")
}
