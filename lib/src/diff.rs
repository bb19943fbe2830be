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

//! Recursive comparison of two trees.

use bstr::ByteSlice as _;
use itertools::EitherOrBoth;
use itertools::Itertools as _;

use crate::object::FileMode;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object_id::Oid;
use crate::repo_path::RepoPathBuf;
use crate::store::Store;
use crate::store::StoreResult;

/// What happened to a path between two trees.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffKind {
    Added,
    Deleted,
    Modified,
    ModeChanged,
    TypeChanged,
}

/// One changed path. `before`/`after` carry `(mode, oid)` when the side
/// has the path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: RepoPathBuf,
    pub kind: DiffKind,
    pub before: Option<(FileMode, Oid)>,
    pub after: Option<(FileMode, Oid)>,
}

/// A `(path, mode, oid)` row of a flattened tree.
pub type FlatTreeEntry = (RepoPathBuf, FileMode, Oid);

fn entry_path(prefix: Option<&RepoPathBuf>, entry: &TreeEntry) -> StoreResult<Option<RepoPathBuf>> {
    let Ok(name) = entry.name.to_str() else {
        // Worktrees address files by UTF-8 path; anything else stays
        // inside the object store.
        return Ok(None);
    };
    Ok(Some(match prefix {
        None => RepoPathBuf::from_internal_string(name),
        Some(prefix) => prefix.join(name),
    }))
}

/// Flattens a tree into `(path, mode, oid)` rows for every non-tree
/// entry, sorted by path.
pub fn flatten_tree(store: &Store, tree_oid: &Oid) -> StoreResult<Vec<FlatTreeEntry>> {
    let mut out = vec![];
    flatten_into(store, tree_oid, None, &mut out)?;
    out.sort_by(|(a, ..), (b, ..)| a.cmp(b));
    Ok(out)
}

fn flatten_into(
    store: &Store,
    tree_oid: &Oid,
    prefix: Option<&RepoPathBuf>,
    out: &mut Vec<FlatTreeEntry>,
) -> StoreResult<()> {
    let tree = store.read_tree(tree_oid)?;
    for entry in tree.entries() {
        let Some(path) = entry_path(prefix, entry)? else {
            continue;
        };
        if entry.mode.is_tree() {
            flatten_into(store, &entry.oid, Some(&path), out)?;
        } else {
            out.push((path, entry.mode, entry.oid.clone()));
        }
    }
    Ok(())
}

/// Compares two trees (either may be absent, meaning empty) and returns
/// changed paths sorted by path.
pub fn diff_trees(
    store: &Store,
    before: Option<&Oid>,
    after: Option<&Oid>,
) -> StoreResult<Vec<DiffEntry>> {
    let mut out = vec![];
    let before_tree = before.map(|oid| store.read_tree(oid)).transpose()?;
    let after_tree = after.map(|oid| store.read_tree(oid)).transpose()?;
    diff_tree_level(
        store,
        before_tree.as_ref(),
        after_tree.as_ref(),
        None,
        &mut out,
    )?;
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn file_kind(mode: FileMode) -> u8 {
    match mode {
        FileMode::Blob | FileMode::BlobExecutable => 0,
        FileMode::Link => 1,
        FileMode::Commit => 2,
        FileMode::Tree => 3,
    }
}

fn emit_side(
    store: &Store,
    entry: &TreeEntry,
    prefix: Option<&RepoPathBuf>,
    deleted: bool,
    out: &mut Vec<DiffEntry>,
) -> StoreResult<()> {
    let Some(path) = entry_path(prefix, entry)? else {
        return Ok(());
    };
    if entry.mode.is_tree() {
        let tree = store.read_tree(&entry.oid)?;
        for child in tree.entries() {
            emit_side(store, child, Some(&path), deleted, out)?;
        }
        return Ok(());
    }
    let value = Some((entry.mode, entry.oid.clone()));
    out.push(if deleted {
        DiffEntry {
            path,
            kind: DiffKind::Deleted,
            before: value,
            after: None,
        }
    } else {
        DiffEntry {
            path,
            kind: DiffKind::Added,
            before: None,
            after: value,
        }
    });
    Ok(())
}

fn diff_tree_level(
    store: &Store,
    before: Option<&Tree>,
    after: Option<&Tree>,
    prefix: Option<&RepoPathBuf>,
    out: &mut Vec<DiffEntry>,
) -> StoreResult<()> {
    let empty = Tree::default();
    let before = before.unwrap_or(&empty);
    let after = after.unwrap_or(&empty);

    // Join in the canonical entry order both sides are stored in. A
    // same-named file/directory pair compares unequal here and falls out
    // as a deletion plus an addition.
    let pairs = before.entries().iter().merge_join_by(after.entries(), |b, a| {
        crate::object::tree_entry_cmp(
            b.name.as_bstr(),
            b.mode.is_tree(),
            a.name.as_bstr(),
            a.mode.is_tree(),
        )
    });
    for pair in pairs {
        match pair {
            EitherOrBoth::Left(b) => emit_side(store, b, prefix, true, out)?,
            EitherOrBoth::Right(a) => emit_side(store, a, prefix, false, out)?,
            EitherOrBoth::Both(b, a) => diff_matched(store, b, a, prefix, out)?,
        }
    }
    Ok(())
}

fn diff_matched(
    store: &Store,
    b: &TreeEntry,
    a: &TreeEntry,
    prefix: Option<&RepoPathBuf>,
    out: &mut Vec<DiffEntry>,
) -> StoreResult<()> {
    if b.mode == a.mode && b.oid == a.oid {
        return Ok(());
    }
    match (b.mode.is_tree(), a.mode.is_tree()) {
        (true, true) => {
            let Some(path) = entry_path(prefix, b)? else {
                return Ok(());
            };
            let before_tree = store.read_tree(&b.oid)?;
            let after_tree = store.read_tree(&a.oid)?;
            diff_tree_level(store, Some(&before_tree), Some(&after_tree), Some(&path), out)
        }
        // A directory became a file or vice versa: decompose into
        // deletions of one side and additions of the other.
        (true, false) | (false, true) => {
            emit_side(store, b, prefix, true, out)?;
            emit_side(store, a, prefix, false, out)
        }
        (false, false) => {
            let Some(path) = entry_path(prefix, b)? else {
                return Ok(());
            };
            let kind = if file_kind(b.mode) != file_kind(a.mode) {
                DiffKind::TypeChanged
            } else if b.oid == a.oid {
                DiffKind::ModeChanged
            } else {
                DiffKind::Modified
            };
            out.push(DiffEntry {
                path,
                kind,
                before: Some((b.mode, b.oid.clone())),
                after: Some((a.mode, a.oid.clone())),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bstr::BString;

    use super::*;
    use crate::mem_backend::MemBackend;
    use crate::object::Object;
    use crate::object_id::HashKind;

    fn new_store() -> Store {
        Store::new(Arc::new(MemBackend::init(HashKind::Sha1)))
    }

    /// Writes a tree of `(path, content)` files, creating subtrees.
    fn write_tree(store: &Store, files: &[(&str, &str)]) -> Oid {
        write_tree_mode(
            store,
            &files
                .iter()
                .map(|(path, content)| (*path, *content, FileMode::Blob))
                .collect::<Vec<_>>(),
        )
    }

    fn write_tree_mode(store: &Store, files: &[(&str, &str, FileMode)]) -> Oid {
        let mut by_child: std::collections::BTreeMap<String, Vec<(String, String, FileMode)>> =
            Default::default();
        let mut entries = vec![];
        for (path, content, mode) in files {
            match path.split_once('/') {
                None => {
                    let oid = store.write_blob(content.as_bytes()).unwrap();
                    entries.push(TreeEntry {
                        mode: *mode,
                        name: BString::from(*path),
                        oid,
                    });
                }
                Some((dir, rest)) => by_child.entry(dir.to_owned()).or_default().push((
                    rest.to_owned(),
                    (*content).to_owned(),
                    *mode,
                )),
            }
        }
        for (dir, children) in by_child {
            let children: Vec<(&str, &str, FileMode)> = children
                .iter()
                .map(|(p, c, m)| (p.as_str(), c.as_str(), *m))
                .collect();
            let oid = write_tree_mode(store, &children);
            entries.push(TreeEntry {
                mode: FileMode::Tree,
                name: BString::from(dir),
                oid,
            });
        }
        store
            .write_object(&Object::Tree(Tree::from_entries(entries).unwrap()))
            .unwrap()
    }

    #[test]
    fn test_diff_add_delete_modify() {
        let store = new_store();
        let before = write_tree(&store, &[("a.txt", "a"), ("b.txt", "b"), ("d/c.txt", "c")]);
        let after = write_tree(&store, &[("a.txt", "a2"), ("d/c.txt", "c"), ("e.txt", "e")]);
        let diff = diff_trees(&store, Some(&before), Some(&after)).unwrap();
        let summary: Vec<_> = diff
            .iter()
            .map(|entry| (entry.path.as_str(), entry.kind))
            .collect();
        assert_eq!(
            summary,
            [
                ("a.txt", DiffKind::Modified),
                ("b.txt", DiffKind::Deleted),
                ("e.txt", DiffKind::Added),
            ]
        );
    }

    #[test]
    fn test_diff_against_absent_tree() {
        let store = new_store();
        let after = write_tree(&store, &[("a.txt", "a")]);
        let diff = diff_trees(&store, None, Some(&after)).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].kind, DiffKind::Added);
    }

    #[test]
    fn test_mode_and_type_changes() {
        let store = new_store();
        let before = write_tree_mode(&store, &[("run.sh", "#!/bin/sh", FileMode::Blob)]);
        let exec = write_tree_mode(&store, &[("run.sh", "#!/bin/sh", FileMode::BlobExecutable)]);
        let link = write_tree_mode(&store, &[("run.sh", "target", FileMode::Link)]);

        let diff = diff_trees(&store, Some(&before), Some(&exec)).unwrap();
        assert_eq!(diff[0].kind, DiffKind::ModeChanged);

        let diff = diff_trees(&store, Some(&before), Some(&link)).unwrap();
        assert_eq!(diff[0].kind, DiffKind::TypeChanged);
    }

    #[test]
    fn test_file_to_directory_decomposes() {
        let store = new_store();
        let before = write_tree(&store, &[("x", "file")]);
        let after = write_tree(&store, &[("x/inner", "nested")]);
        let diff = diff_trees(&store, Some(&before), Some(&after)).unwrap();
        let summary: Vec<_> = diff
            .iter()
            .map(|entry| (entry.path.as_str(), entry.kind))
            .collect();
        assert_eq!(
            summary,
            [("x", DiffKind::Deleted), ("x/inner", DiffKind::Added)]
        );
    }

    #[test]
    fn test_flatten_tree() {
        let store = new_store();
        let tree = write_tree(&store, &[("b.txt", "b"), ("a/x.txt", "x"), ("a/y.txt", "y")]);
        let flat = flatten_tree(&store, &tree).unwrap();
        let paths: Vec<_> = flat.iter().map(|(path, ..)| path.as_str()).collect();
        assert_eq!(paths, ["a/x.txt", "a/y.txt", "b.txt"]);
    }
}
