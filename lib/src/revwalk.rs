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

//! Commit-graph traversal: rev-list, ancestry tests, and the shallow
//! boundary rule.

use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;

use thiserror::Error;

use crate::object_id::Oid;
use crate::store::Store;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Traversal exceeded its depth bound of {depth}")]
    MaxDepth { depth: i64 },
}

pub type WalkResult<T> = Result<T, WalkError>;

/// Parent ids of a commit, with the shallow graft rule applied: a commit
/// on the shallow list has no parents.
fn parents(store: &Store, shallow: &HashSet<Oid>, oid: &Oid) -> WalkResult<Vec<Oid>> {
    if shallow.contains(oid) {
        return Ok(vec![]);
    }
    Ok(store.read_commit(oid)?.parents)
}

/// Every commit reachable from `tips` (inclusive), bounded by the
/// shallow list.
pub fn reachable(store: &Store, shallow: &HashSet<Oid>, tips: &[Oid]) -> WalkResult<HashSet<Oid>> {
    let mut seen: HashSet<Oid> = HashSet::new();
    let mut queue: VecDeque<Oid> = tips.iter().cloned().collect();
    while let Some(oid) = queue.pop_front() {
        if !seen.insert(oid.clone()) {
            continue;
        }
        for parent in parents(store, shallow, &oid)? {
            if !seen.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(seen)
}

/// Commits reachable from `from` but not from `not`, in topological
/// order (children before parents), ties broken by committer timestamp
/// descending.
pub fn rev_list(
    store: &Store,
    shallow: &HashSet<Oid>,
    from: &[Oid],
    not: &[Oid],
) -> WalkResult<Vec<Oid>> {
    let excluded = reachable(store, shallow, not)?;
    let mut included: HashSet<Oid> = HashSet::new();
    let mut queue: VecDeque<Oid> = from
        .iter()
        .filter(|oid| !excluded.contains(oid))
        .cloned()
        .collect();
    while let Some(oid) = queue.pop_front() {
        if !included.insert(oid.clone()) {
            continue;
        }
        for parent in parents(store, shallow, &oid)? {
            if !excluded.contains(&parent) && !included.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }

    // Kahn's scheme over child -> parent edges. A commit is ready once
    // every included child has been emitted.
    let mut child_count: HashMap<&Oid, usize> = included.iter().map(|oid| (oid, 0)).collect();
    let mut edges: HashMap<&Oid, Vec<Oid>> = HashMap::new();
    for oid in &included {
        for parent in parents(store, shallow, oid)? {
            if included.contains(&parent) {
                *child_count.entry(included.get(&parent).unwrap()).or_insert(0) += 1;
                edges.entry(oid).or_default().push(parent);
            }
        }
    }
    let mut ready: BinaryHeap<(i64, Oid)> = BinaryHeap::new();
    for (&oid, &count) in &child_count {
        if count == 0 {
            ready.push((store.read_commit(oid)?.committer.timestamp, oid.clone()));
        }
    }
    let mut out = Vec::with_capacity(included.len());
    while let Some((_, oid)) = ready.pop() {
        for parent in edges.get(&oid).cloned().unwrap_or_default() {
            let count = child_count.get_mut(included.get(&parent).unwrap()).unwrap();
            *count -= 1;
            if *count == 0 {
                ready.push((store.read_commit(&parent)?.committer.timestamp, parent));
            }
        }
        out.push(oid);
    }
    Ok(out)
}

/// True iff `ancestor` is reachable from `oid` via parent edges within
/// `depth` hops (`-1` for unlimited). A commit is not its own
/// descendent.
pub fn is_descendent(
    store: &Store,
    shallow: &HashSet<Oid>,
    oid: &Oid,
    ancestor: &Oid,
    depth: i64,
) -> WalkResult<bool> {
    let mut seen: HashSet<Oid> = HashSet::new();
    let mut frontier = vec![oid.clone()];
    let mut hops = 0i64;
    loop {
        let mut next = vec![];
        for current in frontier {
            for parent in parents(store, shallow, &current)? {
                if parent == *ancestor {
                    return Ok(true);
                }
                if seen.insert(parent.clone()) {
                    next.push(parent);
                }
            }
        }
        if next.is_empty() {
            return Ok(false);
        }
        hops += 1;
        if depth >= 0 && hops >= depth {
            return Err(WalkError::MaxDepth { depth });
        }
        frontier = next;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;

    use super::*;
    use crate::mem_backend::MemBackend;
    use crate::object::Commit;
    use crate::object::Object;
    use crate::object::Signature;
    use crate::object_id::HashKind;

    fn new_store() -> Store {
        Store::new(Arc::new(MemBackend::init(HashKind::Sha1)))
    }

    fn commit(store: &Store, parents: &[&Oid], timestamp: i64, message: &str) -> Oid {
        let tree = store.empty_tree_id().unwrap();
        store
            .write_object(&Object::Commit(Commit {
                tree,
                parents: parents.iter().map(|&oid| oid.clone()).collect(),
                author: Signature::new("A", "a@example.com", timestamp, 0),
                committer: Signature::new("A", "a@example.com", timestamp, 0),
                gpgsig: None,
                extra_headers: vec![],
                message: message.into(),
            }))
            .unwrap()
    }

    #[test]
    fn test_rev_list_linear() {
        let store = new_store();
        let a = commit(&store, &[], 1, "a");
        let b = commit(&store, &[&a], 2, "b");
        let c = commit(&store, &[&b], 3, "c");
        let shallow = HashSet::new();
        let list = rev_list(&store, &shallow, &[c.clone()], &[]).unwrap();
        assert_eq!(list, [c.clone(), b.clone(), a.clone()]);
        let list = rev_list(&store, &shallow, &[c.clone()], &[b]).unwrap();
        assert_eq!(list, [c]);
    }

    #[test]
    fn test_rev_list_merge_topology() {
        let store = new_store();
        let root = commit(&store, &[], 1, "root");
        let left = commit(&store, &[&root], 3, "left");
        let right = commit(&store, &[&root], 2, "right");
        let merge = commit(&store, &[&left, &right], 4, "merge");
        let shallow = HashSet::new();
        let list = rev_list(&store, &shallow, &[merge.clone()], &[]).unwrap();
        // Children always precede parents; the newer side comes first.
        assert_eq!(list, [merge, left, right, root]);
    }

    #[test]
    fn test_shallow_truncates_traversal() {
        let store = new_store();
        let a = commit(&store, &[], 1, "a");
        let b = commit(&store, &[&a], 2, "b");
        let c = commit(&store, &[&b], 3, "c");
        let shallow: HashSet<Oid> = [b.clone()].into_iter().collect();
        let list = rev_list(&store, &shallow, &[c.clone()], &[]).unwrap();
        assert_eq!(list, [c.clone(), b.clone()]);
        // The graft also hides ancestry checks below the boundary.
        assert_eq!(is_descendent(&store, &shallow, &c, &a, -1).unwrap(), false);
    }

    #[test]
    fn test_is_descendent() {
        let store = new_store();
        let a = commit(&store, &[], 1, "a");
        let b = commit(&store, &[&a], 2, "b");
        let c = commit(&store, &[&b], 3, "c");
        let shallow = HashSet::new();
        assert!(is_descendent(&store, &shallow, &c, &a, -1).unwrap());
        assert!(is_descendent(&store, &shallow, &c, &b, -1).unwrap());
        assert!(!is_descendent(&store, &shallow, &a, &c, -1).unwrap());
        // Irreflexive.
        assert!(!is_descendent(&store, &shallow, &b, &b, -1).unwrap());
        // Antisymmetric.
        assert!(!is_descendent(&store, &shallow, &a, &b, -1).unwrap());
        // Depth bound: a is two hops from c.
        assert!(is_descendent(&store, &shallow, &c, &a, 2).unwrap());
        assert_matches!(
            is_descendent(&store, &shallow, &c, &a, 1),
            Err(WalkError::MaxDepth { .. })
        );
    }
}
