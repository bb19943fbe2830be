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

//! Three-way merging: merge-base search, hunk-level text merge with
//! conflict markers, and recursive tree merge.

use std::collections::BTreeMap;
use std::collections::HashSet;

use bstr::BString;
use thiserror::Error;

use crate::object::FileMode;
use crate::object::Object;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object_id::Oid;
use crate::repo_path::RepoPathBuf;
use crate::revwalk;
use crate::revwalk::WalkError;
use crate::store::Store;
use crate::store::StoreError;

/// How far virtual-base recursion may nest before falling back to the
/// first base.
const MAX_VIRTUAL_BASE_DEPTH: usize = 10;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error("Merged tree is invalid: {0}")]
    InvalidTree(String),
}

pub type MergeResult<T> = Result<T, MergeError>;

/// Conflict-resolution policy for the recursive strategy family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Keep conflicts for the caller to resolve.
    Recursive,
    /// Auto-resolve every conflict by taking our side.
    RecursiveOurs,
    /// Auto-resolve every conflict by taking their side.
    RecursiveTheirs,
}

/// Labels written into conflict markers.
#[derive(Clone, Debug)]
pub struct MergeLabels {
    pub ours: String,
    pub theirs: String,
}

impl Default for MergeLabels {
    fn default() -> Self {
        Self {
            ours: "ours".to_owned(),
            theirs: "theirs".to_owned(),
        }
    }
}

/// An unresolved path after a tree merge, with the `(mode, oid)` of each
/// side that has one. These become stages 1/2/3 in the index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConflictEntry {
    pub path: RepoPathBuf,
    pub base: Option<(FileMode, Oid)>,
    pub ours: Option<(FileMode, Oid)>,
    pub theirs: Option<(FileMode, Oid)>,
}

/// The outcome of a tree-level merge. `tree` always names a valid tree;
/// conflicted text files appear in it with conflict markers.
#[derive(Clone, Debug)]
pub struct MergeTreeOutcome {
    pub tree: Oid,
    pub conflicts: Vec<ConflictEntry>,
}

// ---------------------------------------------------------------------
// Merge-base search

/// Finds the best common ancestors of `a` and `b`: commits reachable
/// from both that are not ancestors of any other such commit. Empty for
/// unrelated histories; more than one for criss-cross merges.
pub fn merge_bases(
    store: &Store,
    shallow: &HashSet<Oid>,
    a: &Oid,
    b: &Oid,
) -> MergeResult<Vec<Oid>> {
    if a == b {
        return Ok(vec![a.clone()]);
    }
    let reach_a = revwalk::reachable(store, shallow, std::slice::from_ref(a))?;
    if reach_a.contains(b) {
        return Ok(vec![b.clone()]);
    }
    // Walk down from b, collecting the frontier where the two histories
    // meet; do not look past a common commit.
    let mut candidates: Vec<Oid> = vec![];
    let mut seen: HashSet<Oid> = HashSet::new();
    let mut queue: Vec<Oid> = vec![b.clone()];
    while let Some(oid) = queue.pop() {
        if !seen.insert(oid.clone()) {
            continue;
        }
        if reach_a.contains(&oid) {
            if !candidates.contains(&oid) {
                candidates.push(oid);
            }
            continue;
        }
        if shallow.contains(&oid) {
            continue;
        }
        queue.extend(store.read_commit(&oid)?.parents);
    }
    // Drop candidates dominated by another candidate.
    let mut best: Vec<Oid> = vec![];
    for candidate in &candidates {
        let mut dominated = false;
        for other in &candidates {
            if other != candidate {
                let other_ancestors =
                    revwalk::reachable(store, shallow, std::slice::from_ref(other))?;
                if other_ancestors.contains(candidate) {
                    dominated = true;
                    break;
                }
            }
        }
        if !dominated {
            best.push(candidate.clone());
        }
    }
    best.sort();
    Ok(best)
}

// ---------------------------------------------------------------------
// Text merge

/// Result of merging file contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextMerge {
    Clean(BString),
    /// Contains `<<<<<<<`/`=======`/`>>>>>>>` marker blocks.
    Conflicted(BString),
}

fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|&b| b == b'\n').collect()
}

/// A changed region: base lines `[base_start, base_end)` were replaced
/// by side lines `[side_start, side_end)`.
#[derive(Clone, Copy, Debug)]
struct Hunk {
    base_start: usize,
    base_end: usize,
    side_start: usize,
    side_end: usize,
}

/// Longest-common-subsequence match pairs between two line slices.
fn lcs_matches(base: &[&[u8]], side: &[&[u8]]) -> Vec<(usize, usize)> {
    // Trim the common prefix and suffix first; the quadratic table only
    // covers the differing middle.
    let prefix = std::iter::zip(base, side).take_while(|(a, b)| a == b).count();
    let suffix = std::iter::zip(base.iter().rev(), side.iter().rev())
        .take(base.len().min(side.len()) - prefix)
        .take_while(|(a, b)| a == b)
        .count();
    let b_mid = &base[prefix..base.len() - suffix];
    let s_mid = &side[prefix..side.len() - suffix];

    let mut matches: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();
    if !b_mid.is_empty() && !s_mid.is_empty() {
        let rows = b_mid.len() + 1;
        let cols = s_mid.len() + 1;
        let mut table = vec![0u32; rows * cols];
        for i in (0..b_mid.len()).rev() {
            for j in (0..s_mid.len()).rev() {
                table[i * cols + j] = if b_mid[i] == s_mid[j] {
                    table[(i + 1) * cols + j + 1] + 1
                } else {
                    table[(i + 1) * cols + j].max(table[i * cols + j + 1])
                };
            }
        }
        let (mut i, mut j) = (0, 0);
        while i < b_mid.len() && j < s_mid.len() {
            if b_mid[i] == s_mid[j] {
                matches.push((prefix + i, prefix + j));
                i += 1;
                j += 1;
            } else if table[(i + 1) * cols + j] >= table[i * cols + j + 1] {
                i += 1;
            } else {
                j += 1;
            }
        }
    }
    for k in 0..suffix {
        matches.push((base.len() - suffix + k, side.len() - suffix + k));
    }
    matches
}

/// Changed regions between base and side, from the LCS alignment.
fn two_way_hunks(base: &[&[u8]], side: &[&[u8]]) -> Vec<Hunk> {
    let matches = lcs_matches(base, side);
    let mut hunks = vec![];
    let (mut base_pos, mut side_pos) = (0, 0);
    for (b, s) in matches.into_iter().chain([(base.len(), side.len())]) {
        if b > base_pos || s > side_pos {
            hunks.push(Hunk {
                base_start: base_pos,
                base_end: b,
                side_start: side_pos,
                side_end: s,
            });
        }
        base_pos = b + 1;
        side_pos = s + 1;
    }
    // The final sentinel advanced one past the end.
    hunks
}

fn push_lines(out: &mut Vec<u8>, lines: &[&[u8]]) {
    for line in lines {
        out.extend_from_slice(line);
    }
}

fn push_marker(out: &mut Vec<u8>, marker: &str) {
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(marker.as_bytes());
    out.push(b'\n');
}

/// Per-side walk state: where the lockstep cursors stand and which hunk
/// comes next.
struct SideCursor {
    hunks: Vec<Hunk>,
    base_pos: usize,
    side_pos: usize,
    next_hunk: usize,
}

impl SideCursor {
    fn peek_start(&self) -> Option<usize> {
        self.hunks.get(self.next_hunk).map(|h| h.base_start)
    }

    /// Consumes hunks starting inside `[region_start, region_end]` and
    /// returns the largest base_end seen, if any was taken.
    fn take_overlapping(
        &mut self,
        region_start: usize,
        region_end: usize,
        took: &mut Vec<Hunk>,
    ) -> Option<usize> {
        let mut max_end = None;
        while let Some(&hunk) = self.hunks.get(self.next_hunk) {
            if hunk.base_start < region_start || hunk.base_start > region_end {
                break;
            }
            took.push(hunk);
            max_end = Some(max_end.map_or(hunk.base_end, |end: usize| end.max(hunk.base_end)));
            self.next_hunk += 1;
        }
        max_end
    }

    /// Maps the combined base region onto this side's lines and advances
    /// the cursors past it.
    fn slice_region<'a>(
        &mut self,
        lines: &[&'a [u8]],
        region_start: usize,
        region_end: usize,
        took: &[Hunk],
    ) -> Vec<&'a [u8]> {
        // Lines between the cursor and the region start are unchanged on
        // this side.
        let lead = region_start - self.base_pos;
        let mut take = region_end - region_start;
        for hunk in took {
            take = take + (hunk.side_end - hunk.side_start) - (hunk.base_end - hunk.base_start);
        }
        let start = self.side_pos + lead;
        self.base_pos = region_end;
        self.side_pos = start + take;
        lines[start..start + take].to_vec()
    }
}

/// Three-way line merge. Regions changed on one side take that side;
/// regions changed identically take either; overlapping different
/// changes produce a marker block and flip the result to conflicted.
pub fn merge_text(base: &[u8], ours: &[u8], theirs: &[u8], labels: &MergeLabels) -> TextMerge {
    let base_lines = split_lines(base);
    let our_lines = split_lines(ours);
    let their_lines = split_lines(theirs);

    let mut our_cursor = SideCursor {
        hunks: two_way_hunks(&base_lines, &our_lines),
        base_pos: 0,
        side_pos: 0,
        next_hunk: 0,
    };
    let mut their_cursor = SideCursor {
        hunks: two_way_hunks(&base_lines, &their_lines),
        base_pos: 0,
        side_pos: 0,
        next_hunk: 0,
    };

    let mut out: Vec<u8> = vec![];
    let mut conflicted = false;
    let mut base_pos = 0;
    loop {
        let region_start = match (our_cursor.peek_start(), their_cursor.peek_start()) {
            (None, None) => {
                push_lines(&mut out, &base_lines[base_pos..]);
                break;
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (Some(a), Some(b)) => a.min(b),
        };
        push_lines(&mut out, &base_lines[base_pos..region_start]);

        // Grow the combined region until no hunk on either side starts
        // inside it.
        let mut region_end = region_start;
        let mut our_took = vec![];
        let mut their_took = vec![];
        loop {
            let mut grew = false;
            for (cursor, took) in [
                (&mut our_cursor, &mut our_took),
                (&mut their_cursor, &mut their_took),
            ] {
                if let Some(end) = cursor.take_overlapping(region_start, region_end, took) {
                    if end > region_end {
                        region_end = end;
                        grew = true;
                    }
                }
            }
            if !grew {
                break;
            }
        }

        let our_slice = our_cursor.slice_region(&our_lines, region_start, region_end, &our_took);
        let their_slice =
            their_cursor.slice_region(&their_lines, region_start, region_end, &their_took);
        let base_slice = &base_lines[region_start..region_end];

        if our_slice == their_slice {
            push_lines(&mut out, &our_slice);
        } else if our_slice == base_slice {
            push_lines(&mut out, &their_slice);
        } else if their_slice == base_slice {
            push_lines(&mut out, &our_slice);
        } else {
            conflicted = true;
            push_marker(&mut out, &format!("<<<<<<< {}", labels.ours));
            push_lines(&mut out, &our_slice);
            push_marker(&mut out, "=======");
            push_lines(&mut out, &their_slice);
            push_marker(&mut out, &format!(">>>>>>> {}", labels.theirs));
        }
        base_pos = region_end;
    }

    if conflicted {
        TextMerge::Conflicted(BString::from(out))
    } else {
        TextMerge::Clean(BString::from(out))
    }
}

// ---------------------------------------------------------------------
// Tree merge

fn is_text_mode(mode: FileMode) -> bool {
    matches!(mode, FileMode::Blob | FileMode::BlobExecutable)
}

fn flatten(store: &Store, tree: Option<&Oid>) -> MergeResult<BTreeMap<RepoPathBuf, (FileMode, Oid)>> {
    let mut map = BTreeMap::new();
    if let Some(oid) = tree {
        for (path, mode, oid) in crate::diff::flatten_tree(store, oid)? {
            map.insert(path, (mode, oid));
        }
    }
    Ok(map)
}

/// Builds a tree object from flat `(path, mode, oid)` rows, creating
/// subtrees bottom-up.
pub fn write_tree_from_flat(
    store: &Store,
    files: &BTreeMap<RepoPathBuf, (FileMode, Oid)>,
) -> MergeResult<Oid> {
    #[derive(Default)]
    struct Dir {
        files: Vec<(String, FileMode, Oid)>,
        dirs: BTreeMap<String, Dir>,
    }
    let mut root = Dir::default();
    for (path, (mode, oid)) in files {
        let mut dir = &mut root;
        let components: Vec<&str> = path.components().collect();
        for component in &components[..components.len() - 1] {
            dir = dir.dirs.entry((*component).to_owned()).or_default();
        }
        dir.files
            .push(((*components.last().unwrap()).to_owned(), *mode, oid.clone()));
    }
    fn write_dir(store: &Store, dir: &Dir) -> MergeResult<Oid> {
        let mut entries = vec![];
        for (name, child) in &dir.dirs {
            let oid = write_dir(store, child)?;
            entries.push(TreeEntry {
                mode: FileMode::Tree,
                name: name.clone().into(),
                oid,
            });
        }
        for (name, mode, oid) in &dir.files {
            entries.push(TreeEntry {
                mode: *mode,
                name: name.clone().into(),
                oid: oid.clone(),
            });
        }
        let tree = Tree::from_entries(entries)
            .map_err(|err| MergeError::InvalidTree(err.to_string()))?;
        Ok(store.write_object(&Object::Tree(tree)).map_err(StoreError::from)?)
    }
    write_dir(store, &root)
}

/// Merges `ours` and `theirs` against a base tree. Strategy `Recursive`
/// reports conflicts; the `-ours`/`-theirs` variants resolve them.
pub fn merge_trees(
    store: &Store,
    base: Option<&Oid>,
    ours: &Oid,
    theirs: &Oid,
    strategy: MergeStrategy,
    labels: &MergeLabels,
) -> MergeResult<MergeTreeOutcome> {
    let base_map = flatten(store, base)?;
    let our_map = flatten(store, Some(ours))?;
    let their_map = flatten(store, Some(theirs))?;

    let mut paths: Vec<&RepoPathBuf> = base_map
        .keys()
        .chain(our_map.keys())
        .chain(their_map.keys())
        .collect();
    paths.sort();
    paths.dedup();

    let mut result: BTreeMap<RepoPathBuf, (FileMode, Oid)> = BTreeMap::new();
    let mut conflicts: Vec<ConflictEntry> = vec![];
    for path in paths {
        let b = base_map.get(path).cloned();
        let o = our_map.get(path).cloned();
        let t = their_map.get(path).cloned();

        let resolved = if o == t {
            o.clone()
        } else if b == o {
            t.clone()
        } else if b == t {
            o.clone()
        } else {
            // Both sides changed, differently.
            match strategy {
                MergeStrategy::RecursiveOurs => o.clone(),
                MergeStrategy::RecursiveTheirs => t.clone(),
                MergeStrategy::Recursive => {
                    let merged = match (&o, &t) {
                        (Some((our_mode, our_oid)), Some((their_mode, their_oid)))
                            if is_text_mode(*our_mode) && is_text_mode(*their_mode) =>
                        {
                            let base_content = match &b {
                                Some((mode, oid)) if is_text_mode(*mode) => {
                                    store.read_blob(oid)?
                                }
                                _ => BString::from(""),
                            };
                            let our_content = store.read_blob(our_oid)?;
                            let their_content = store.read_blob(their_oid)?;
                            let mode = if b.as_ref().map(|(m, _)| *m) == Some(*our_mode) {
                                *their_mode
                            } else {
                                *our_mode
                            };
                            match merge_text(&base_content, &our_content, &their_content, labels)
                            {
                                TextMerge::Clean(content) => {
                                    let oid =
                                        store.write_blob(&content).map_err(StoreError::from)?;
                                    Some(Some((mode, oid)))
                                }
                                TextMerge::Conflicted(content) => {
                                    let oid =
                                        store.write_blob(&content).map_err(StoreError::from)?;
                                    conflicts.push(ConflictEntry {
                                        path: path.clone(),
                                        base: b.clone(),
                                        ours: o.clone(),
                                        theirs: t.clone(),
                                    });
                                    Some(Some((mode, oid)))
                                }
                            }
                        }
                        _ => None,
                    };
                    match merged {
                        Some(value) => value,
                        None => {
                            // Modify/delete or non-text clash: keep the
                            // side that still has content (ours when both
                            // do) and record the conflict.
                            conflicts.push(ConflictEntry {
                                path: path.clone(),
                                base: b.clone(),
                                ours: o.clone(),
                                theirs: t.clone(),
                            });
                            o.clone().or_else(|| t.clone())
                        }
                    }
                }
            }
        };
        if let Some(value) = resolved {
            result.insert(path.clone(), value);
        }
    }

    // A file on one side may collide with a directory of files from the
    // other. Materialize the file variant under a suffixed name and keep
    // the conflict on the original path.
    let colliding: Vec<RepoPathBuf> = result
        .keys()
        .filter(|path| {
            result
                .range::<RepoPathBuf, _>((
                    std::ops::Bound::Excluded(*path),
                    std::ops::Bound::Unbounded,
                ))
                .take_while(|(other, _)| other.starts_with_dir(*path))
                .next()
                .is_some()
        })
        .cloned()
        .collect::<Vec<_>>();
    for path in colliding {
        let value = result.remove(&path).unwrap();
        let b = base_map.get(&path).cloned();
        let o = our_map.get(&path).cloned();
        let t = their_map.get(&path).cloned();
        let label = if o.is_some() { "ours" } else { "theirs" };
        let renamed = RepoPathBuf::from_internal_string(format!("{path}~{label}"));
        result.insert(renamed, value);
        if !conflicts.iter().any(|c| c.path == path) {
            conflicts.push(ConflictEntry {
                path,
                base: b,
                ours: o,
                theirs: t,
            });
        }
    }
    conflicts.sort_by(|a, b| a.path.cmp(&b.path));

    let tree = write_tree_from_flat(store, &result)?;
    Ok(MergeTreeOutcome { tree, conflicts })
}

/// Merges the trees of two commits, computing (and if necessary
/// recursively constructing) the base.
pub fn merge_commit_trees(
    store: &Store,
    shallow: &HashSet<Oid>,
    ours: &Oid,
    theirs: &Oid,
    strategy: MergeStrategy,
    labels: &MergeLabels,
) -> MergeResult<MergeTreeOutcome> {
    let base_tree = virtual_base_tree(store, shallow, ours, theirs, 0)?;
    let our_tree = store.read_commit(ours)?.tree;
    let their_tree = store.read_commit(theirs)?.tree;
    merge_trees(
        store,
        base_tree.as_ref(),
        &our_tree,
        &their_tree,
        strategy,
        labels,
    )
}

/// The base tree for merging two commits. With several merge bases they
/// are merged recursively into a virtual base, conflict markers left in
/// place, exactly so that repeated criss-cross merges stay stable.
fn virtual_base_tree(
    store: &Store,
    shallow: &HashSet<Oid>,
    a: &Oid,
    b: &Oid,
    depth: usize,
) -> MergeResult<Option<Oid>> {
    let bases = merge_bases(store, shallow, a, b)?;
    match bases.as_slice() {
        [] => Ok(None),
        [single] => Ok(Some(store.read_commit(single)?.tree)),
        multiple => {
            if depth >= MAX_VIRTUAL_BASE_DEPTH {
                return Ok(Some(store.read_commit(&multiple[0])?.tree));
            }
            let mut current = multiple[0].clone();
            let mut current_tree = store.read_commit(&current)?.tree;
            for next in &multiple[1..] {
                let base = virtual_base_tree(store, shallow, &current, next, depth + 1)?;
                let next_tree = store.read_commit(next)?.tree;
                let outcome = merge_trees(
                    store,
                    base.as_ref(),
                    &current_tree,
                    &next_tree,
                    MergeStrategy::Recursive,
                    &MergeLabels::default(),
                )?;
                current_tree = outcome.tree;
                current = next.clone();
            }
            Ok(Some(current_tree))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bstr::ByteSlice as _;

    use super::*;
    use crate::mem_backend::MemBackend;
    use crate::object::Commit;
    use crate::object::Signature;
    use crate::object_id::HashKind;

    fn new_store() -> Store {
        Store::new(Arc::new(MemBackend::init(HashKind::Sha1)))
    }

    fn labels() -> MergeLabels {
        MergeLabels::default()
    }

    #[test]
    fn test_text_merge_disjoint_edits() {
        let base = b"one\ntwo\nthree\nfour\nfive\n";
        let ours = b"ONE\ntwo\nthree\nfour\nfive\n";
        let theirs = b"one\ntwo\nthree\nfour\nFIVE\n";
        let merged = merge_text(base, ours, theirs, &labels());
        assert_eq!(
            merged,
            TextMerge::Clean("ONE\ntwo\nthree\nfour\nFIVE\n".into())
        );
    }

    #[test]
    fn test_text_merge_same_change() {
        let base = b"one\ntwo\n";
        let both = b"one\nTWO\n";
        assert_eq!(
            merge_text(base, both, both, &labels()),
            TextMerge::Clean("one\nTWO\n".into())
        );
    }

    #[test]
    fn test_text_merge_conflict_markers() {
        let base = b"line\n";
        let ours = b"ours line\n";
        let theirs = b"theirs line\n";
        let TextMerge::Conflicted(content) = merge_text(base, ours, theirs, &labels()) else {
            panic!("expected a conflict");
        };
        assert_eq!(
            content,
            "<<<<<<< ours\nours line\n=======\ntheirs line\n>>>>>>> theirs\n"
        );
    }

    #[test]
    fn test_text_merge_one_side_deletion() {
        let base = b"a\nb\nc\n";
        let ours = b"a\nc\n";
        let theirs = b"a\nb\nc\n";
        assert_eq!(
            merge_text(base, ours, theirs, &labels()),
            TextMerge::Clean("a\nc\n".into())
        );
    }

    fn write_files(store: &Store, files: &[(&str, &str)]) -> Oid {
        let mut map = BTreeMap::new();
        for (path, content) in files {
            let oid = store.write_blob(content.as_bytes()).unwrap();
            map.insert(
                RepoPathBuf::from_relative_string(*path).unwrap(),
                (FileMode::Blob, oid),
            );
        }
        write_tree_from_flat(store, &map).unwrap()
    }

    #[test]
    fn test_tree_merge_take_each_side() {
        let store = new_store();
        let base = write_files(&store, &[("a.txt", "a\n"), ("b.txt", "b\n")]);
        let ours = write_files(&store, &[("a.txt", "a2\n"), ("b.txt", "b\n")]);
        let theirs = write_files(&store, &[("a.txt", "a\n"), ("b.txt", "b2\n")]);
        let outcome = merge_trees(
            &store,
            Some(&base),
            &ours,
            &theirs,
            MergeStrategy::Recursive,
            &labels(),
        )
        .unwrap();
        assert!(outcome.conflicts.is_empty());
        let merged = flatten(&store, Some(&outcome.tree)).unwrap();
        let a = &merged[&RepoPathBuf::from_relative_string("a.txt").unwrap()];
        let b = &merged[&RepoPathBuf::from_relative_string("b.txt").unwrap()];
        assert_eq!(store.read_blob(&a.1).unwrap(), "a2\n");
        assert_eq!(store.read_blob(&b.1).unwrap(), "b2\n");
    }

    #[test]
    fn test_tree_merge_conflict_records_all_stages() {
        let store = new_store();
        let base = write_files(&store, &[("o.txt", "base\n")]);
        let ours = write_files(&store, &[("o.txt", "ours\n")]);
        let theirs = write_files(&store, &[("o.txt", "theirs\n")]);
        let outcome = merge_trees(
            &store,
            Some(&base),
            &ours,
            &theirs,
            MergeStrategy::Recursive,
            &labels(),
        )
        .unwrap();
        assert_eq!(outcome.conflicts.len(), 1);
        let conflict = &outcome.conflicts[0];
        assert_eq!(conflict.path.as_str(), "o.txt");
        let base_blob = store.read_blob(&conflict.base.as_ref().unwrap().1).unwrap();
        let our_blob = store.read_blob(&conflict.ours.as_ref().unwrap().1).unwrap();
        let their_blob = store.read_blob(&conflict.theirs.as_ref().unwrap().1).unwrap();
        assert_eq!((base_blob.as_bstr(), our_blob.as_bstr(), their_blob.as_bstr()),
            ("base\n".into(), "ours\n".into(), "theirs\n".into()));
        // The materialized blob carries markers.
        let merged = flatten(&store, Some(&outcome.tree)).unwrap();
        let merged_blob = store
            .read_blob(&merged[&RepoPathBuf::from_relative_string("o.txt").unwrap()].1)
            .unwrap();
        assert!(merged_blob.contains_str("<<<<<<< ours"));
        assert!(merged_blob.contains_str(">>>>>>> theirs"));
    }

    #[test]
    fn test_tree_merge_ours_strategy_resolves() {
        let store = new_store();
        let base = write_files(&store, &[("o.txt", "base\n")]);
        let ours = write_files(&store, &[("o.txt", "ours\n")]);
        let theirs = write_files(&store, &[("o.txt", "theirs\n")]);
        let outcome = merge_trees(
            &store,
            Some(&base),
            &ours,
            &theirs,
            MergeStrategy::RecursiveOurs,
            &labels(),
        )
        .unwrap();
        assert!(outcome.conflicts.is_empty());
        let merged = flatten(&store, Some(&outcome.tree)).unwrap();
        let blob = store
            .read_blob(&merged[&RepoPathBuf::from_relative_string("o.txt").unwrap()].1)
            .unwrap();
        assert_eq!(blob, "ours\n");
    }

    #[test]
    fn test_tree_merge_modify_delete() {
        let store = new_store();
        let base = write_files(&store, &[("o.txt", "base\n")]);
        let ours = write_files(&store, &[("o.txt", "changed\n")]);
        let theirs = write_files(&store, &[]);
        let outcome = merge_trees(
            &store,
            Some(&base),
            &ours,
            &theirs,
            MergeStrategy::Recursive,
            &labels(),
        )
        .unwrap();
        assert_eq!(outcome.conflicts.len(), 1);
        let conflict = &outcome.conflicts[0];
        assert!(conflict.base.is_some());
        assert!(conflict.ours.is_some());
        assert!(conflict.theirs.is_none());
        // The modified side is preserved in the merged tree.
        let merged = flatten(&store, Some(&outcome.tree)).unwrap();
        assert!(merged.contains_key(&RepoPathBuf::from_relative_string("o.txt").unwrap()));
    }

    #[test]
    fn test_merge_bases() {
        let store = new_store();
        let sig = |ts| Signature::new("A", "a@example.com", ts, 0);
        let tree = store.empty_tree_id().unwrap();
        let commit = |parents: &[&Oid], ts: i64| {
            store
                .write_object(&Object::Commit(Commit {
                    tree: tree.clone(),
                    parents: parents.iter().map(|&p| p.clone()).collect(),
                    author: sig(ts),
                    committer: sig(ts),
                    gpgsig: None,
                    extra_headers: vec![],
                    message: format!("c{ts}\n").into(),
                }))
                .unwrap()
        };
        let shallow = HashSet::new();
        let root = commit(&[], 1);
        let a = commit(&[&root], 2);
        let b = commit(&[&root], 3);
        assert_eq!(
            merge_bases(&store, &shallow, &a, &b).unwrap(),
            vec![root.clone()]
        );
        // Fast-forward shape: one side is the base.
        assert_eq!(
            merge_bases(&store, &shallow, &root, &a).unwrap(),
            vec![root.clone()]
        );
        // Criss-cross: two equally good bases.
        let x = commit(&[&a, &b], 4);
        let y = commit(&[&b, &a], 5);
        let mut expected = vec![a.clone(), b.clone()];
        expected.sort();
        assert_eq!(merge_bases(&store, &shallow, &x, &y).unwrap(), expected);
        // Unrelated histories share nothing.
        let lone = commit(&[], 9);
        assert_eq!(merge_bases(&store, &shallow, &a, &lone).unwrap(), vec![]);
    }

    #[test]
    fn test_recursive_merge_with_criss_cross() {
        let store = new_store();
        let sig = |ts| Signature::new("A", "a@example.com", ts, 0);
        let mut commit = |tree: &Oid, parents: &[&Oid], ts: i64| {
            store
                .write_object(&Object::Commit(Commit {
                    tree: tree.clone(),
                    parents: parents.iter().map(|&p| p.clone()).collect(),
                    author: sig(ts),
                    committer: sig(ts),
                    gpgsig: None,
                    extra_headers: vec![],
                    message: format!("c{ts}\n").into(),
                }))
                .unwrap()
        };
        let t_root = write_files(&store, &[("f", "0\n")]);
        let t_a = write_files(&store, &[("f", "a\n")]);
        let t_b = write_files(&store, &[("f", "0\n"), ("g", "g\n")]);
        let root = commit(&t_root, &[], 1);
        let a = commit(&t_a, &[&root], 2);
        let b = commit(&t_b, &[&root], 3);
        // Criss-cross pair both containing both changes.
        let t_merged = write_files(&store, &[("f", "a\n"), ("g", "g\n")]);
        let x = commit(&t_merged, &[&a, &b], 4);
        let y = commit(&t_merged, &[&b, &a], 5);
        let shallow = HashSet::new();
        let outcome = merge_commit_trees(
            &store,
            &shallow,
            &x,
            &y,
            MergeStrategy::Recursive,
            &labels(),
        )
        .unwrap();
        assert!(outcome.conflicts.is_empty());
        assert_eq!(outcome.tree, t_merged);
    }
}
