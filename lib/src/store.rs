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

//! Typed object access over a storage backend, with per-session decode
//! memoization.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use bstr::BString;
use thiserror::Error;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::object::Commit;
use crate::object::Object;
use crate::object::ObjectParseError;
use crate::object::ObjectType;
use crate::object::Tag;
use crate::object::Tree;
use crate::object::TreeEntry;
use crate::object_id::HashKind;
use crate::object_id::HexPrefix;
use crate::object_id::Oid;
use crate::object_id::PrefixResolution;
use crate::repo_path::RepoPathBuf;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Object {hash} could not be decoded")]
    Parse {
        hash: String,
        source: ObjectParseError,
    },
    #[error("Object {hash} is a {actual}, expected a {expected}")]
    ObjectType {
        hash: String,
        expected: ObjectType,
        actual: ObjectType,
    },
    #[error("Tag chain at {hash} is too deep")]
    TagChainTooDeep { hash: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Wraps a backend with object decode caching. Cheap to clone; clones
/// share the cache.
#[derive(Clone)]
pub struct Store {
    backend: Arc<dyn Backend>,
    cache: Arc<Mutex<HashMap<Oid, Object>>>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn hash_kind(&self) -> HashKind {
        self.backend.hash_kind()
    }

    pub fn gitdir(&self) -> &str {
        self.backend.gitdir()
    }

    pub fn has_object(&self, oid: &Oid) -> BackendResult<bool> {
        if self.cache.lock().unwrap().contains_key(oid) {
            return Ok(true);
        }
        self.backend.has_object(oid)
    }

    pub fn write_object(&self, object: &Object) -> BackendResult<Oid> {
        let oid = self
            .backend
            .write_object(object.object_type(), &object.serialize())?;
        self.cache
            .lock()
            .unwrap()
            .entry(oid.clone())
            .or_insert_with(|| object.clone());
        Ok(oid)
    }

    pub fn write_blob(&self, content: &[u8]) -> BackendResult<Oid> {
        self.backend.write_object(ObjectType::Blob, content)
    }

    pub fn read_object(&self, oid: &Oid) -> StoreResult<Object> {
        if let Some(object) = self.cache.lock().unwrap().get(oid) {
            return Ok(object.clone());
        }
        let (object_type, payload) = self.backend.read_object(oid)?;
        let object = Object::parse(object_type, &payload, self.hash_kind()).map_err(|source| {
            StoreError::Parse {
                hash: oid.hex(),
                source,
            }
        })?;
        self.cache
            .lock()
            .unwrap()
            .insert(oid.clone(), object.clone());
        Ok(object)
    }

    pub fn object_type(&self, oid: &Oid) -> StoreResult<ObjectType> {
        if let Some(object) = self.cache.lock().unwrap().get(oid) {
            return Ok(object.object_type());
        }
        let (object_type, _) = self.backend.read_object(oid)?;
        Ok(object_type)
    }

    fn expect<T>(
        &self,
        oid: &Oid,
        expected: ObjectType,
        convert: impl FnOnce(Object) -> Option<T>,
    ) -> StoreResult<T> {
        let object = self.read_object(oid)?;
        let actual = object.object_type();
        convert(object).ok_or(StoreError::ObjectType {
            hash: oid.hex(),
            expected,
            actual,
        })
    }

    pub fn read_commit(&self, oid: &Oid) -> StoreResult<Commit> {
        self.expect(oid, ObjectType::Commit, Object::into_commit)
    }

    pub fn read_tree(&self, oid: &Oid) -> StoreResult<Tree> {
        self.expect(oid, ObjectType::Tree, Object::into_tree)
    }

    pub fn read_blob(&self, oid: &Oid) -> StoreResult<BString> {
        self.expect(oid, ObjectType::Blob, Object::into_blob)
    }

    pub fn read_tag(&self, oid: &Oid) -> StoreResult<Tag> {
        self.expect(oid, ObjectType::Tag, Object::into_tag)
    }

    /// Follows a tag chain until a non-tag object.
    pub fn peel_tag(&self, oid: &Oid) -> StoreResult<(Oid, Object)> {
        let mut current = oid.clone();
        for _ in 0..10 {
            let object = self.read_object(&current)?;
            match object {
                Object::Tag(tag) => current = tag.object,
                other => return Ok((current, other)),
            }
        }
        Err(StoreError::TagChainTooDeep { hash: oid.hex() })
    }

    /// Peels tags until a commit; anything else is an `ObjectType` error.
    pub fn peel_to_commit(&self, oid: &Oid) -> StoreResult<(Oid, Commit)> {
        let (peeled, object) = self.peel_tag(oid)?;
        let actual = object.object_type();
        match object.into_commit() {
            Some(commit) => Ok((peeled, commit)),
            None => Err(StoreError::ObjectType {
                hash: peeled.hex(),
                expected: ObjectType::Commit,
                actual,
            }),
        }
    }

    /// Resolves the tree entry at `path` below `tree_oid`, descending
    /// through subtrees.
    pub fn tree_path_entry(
        &self,
        tree_oid: &Oid,
        path: &RepoPathBuf,
    ) -> StoreResult<Option<TreeEntry>> {
        let tree = self.read_tree(tree_oid)?;
        let (head, rest) = path.split_first();
        let Some(entry) = tree.entry(head.as_bytes().into()) else {
            return Ok(None);
        };
        match rest {
            None => Ok(Some(entry.clone())),
            Some(rest) => {
                if !entry.mode.is_tree() {
                    return Ok(None);
                }
                self.tree_path_entry(&entry.oid.clone(), &rest)
            }
        }
    }

    /// Expands a unique hex prefix to a stored object id.
    pub fn resolve_prefix(&self, prefix: &HexPrefix) -> BackendResult<PrefixResolution<Oid>> {
        if let Some(bytes) = (prefix.hex().len() == self.hash_kind().hex_len())
            .then(|| prefix.min_prefix_bytes().to_vec())
        {
            let oid = Oid::new(bytes);
            return Ok(if self.backend.has_object(&oid)? {
                PrefixResolution::SingleMatch(oid)
            } else {
                PrefixResolution::NoMatch
            });
        }
        let mut matched = None;
        for oid in self.backend.list_object_oids()? {
            if prefix.matches(&oid) {
                if matched.is_some() {
                    return Ok(PrefixResolution::AmbiguousMatch);
                }
                matched = Some(oid);
            }
        }
        Ok(match matched {
            Some(oid) => PrefixResolution::SingleMatch(oid),
            None => PrefixResolution::NoMatch,
        })
    }

    /// The shortest unique prefix of `oid` among stored objects, at least
    /// `min_len` hex digits.
    pub fn abbreviate(&self, oid: &Oid, min_len: usize) -> BackendResult<String> {
        let mut longest_common = 0;
        for other in self.backend.list_object_oids()? {
            if other != *oid {
                longest_common = longest_common
                    .max(crate::hex_util::common_hex_len(oid.as_bytes(), other.as_bytes()));
            }
        }
        let hex = oid.hex();
        let len = (longest_common + 1).max(min_len).min(hex.len());
        Ok(hex[..len].to_owned())
    }

    /// Writes the empty tree and returns its id.
    pub fn empty_tree_id(&self) -> BackendResult<Oid> {
        self.backend.write_object(ObjectType::Tree, b"")
    }
}
