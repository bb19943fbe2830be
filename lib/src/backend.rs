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

#![allow(missing_docs)]

use std::any::Any;
use std::fmt::Debug;

use thiserror::Error;

use crate::object::ObjectType;
use crate::object::Signature;
use crate::object_id::HashKind;
use crate::object_id::Oid;

/// What a reference file points at: an object directly, or another ref.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefValue {
    Direct(Oid),
    Symbolic(String),
}

impl RefValue {
    pub fn as_direct(&self) -> Option<&Oid> {
        match self {
            Self::Direct(oid) => Some(oid),
            Self::Symbolic(_) => None,
        }
    }

    pub fn as_symbolic(&self) -> Option<&str> {
        match self {
            Self::Direct(_) => None,
            Self::Symbolic(target) => Some(target),
        }
    }
}

/// One appended line of a ref's log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_oid: Oid,
    pub new_oid: Oid,
    pub actor: Signature,
    pub message: String,
}

/// A `packed-refs` row: a direct ref, plus the peeled commit when the
/// target is an annotated tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackedRef {
    pub name: String,
    pub oid: Oid,
    pub peeled: Option<Oid>,
}

/// Storage error that may occur after the backend is loaded.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Object {hash} not found")]
    ObjectNotFound { hash: String },
    #[error("Error when reading object {hash}")]
    ReadObject {
        hash: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Could not write object of type {object_type}")]
    WriteObject {
        object_type: &'static str,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Error when reading {what}")]
    ReadKey {
        what: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Could not write {what}")]
    WriteKey {
        what: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Object {hash} payload does not match its id")]
    ChecksumMismatch { hash: String },
    #[error("Stored data for {what} is corrupt: {reason}")]
    Corrupt { what: String, reason: String },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// The capability set every storage substrate provides: content-addressed
/// object rows plus named keys for refs, index, config, the shallow list,
/// and reflogs.
///
/// Implementations must give read-your-writes consistency for a single
/// writer, and each named-key write must be atomic on its own: a
/// concurrent reader observes either the old or the new value, never a
/// torn state. Compare-and-set and locking live a layer up.
pub trait Backend: Any + Send + Sync + Debug {
    /// A short name identifying the substrate ("files", "memory", "sqlite").
    fn name(&self) -> &str;

    /// The hash family all object ids in this store are derived with.
    fn hash_kind(&self) -> HashKind;

    /// A human-readable location for events and error messages. For the
    /// filesystem backend this is the `.git` directory path.
    fn gitdir(&self) -> &str;

    /// Stores an object payload and returns its content-derived id.
    /// Writing bytes that already exist is a no-op.
    fn write_object(&self, object_type: ObjectType, payload: &[u8]) -> BackendResult<Oid>;

    /// Loads an object's type and payload bytes.
    fn read_object(&self, oid: &Oid) -> BackendResult<(ObjectType, Vec<u8>)>;

    fn has_object(&self, oid: &Oid) -> BackendResult<bool>;

    /// All object ids currently stored, in unspecified order.
    fn list_object_oids(&self) -> BackendResult<Vec<Oid>>;

    /// Reads a ref. For layered stores this is the merged view; a loose
    /// entry shadows a packed one.
    fn read_ref(&self, name: &str) -> BackendResult<Option<RefValue>>;

    fn write_ref(&self, name: &str, value: &RefValue) -> BackendResult<()>;

    fn delete_ref(&self, name: &str) -> BackendResult<()>;

    /// Refs whose full name starts with `prefix`, sorted by name. `HEAD`
    /// and other gitdir-level symrefs are not listed.
    fn list_refs(&self, prefix: &str) -> BackendResult<Vec<(String, RefValue)>>;

    /// Folds currently-loose direct refs into the packed representation.
    /// Stores without a loose/packed split may treat this as a no-op.
    fn pack_refs(&self, prune: bool) -> BackendResult<()>;

    /// The peeled tag ids recorded alongside packed refs, if any.
    fn packed_ref_peel(&self, name: &str) -> BackendResult<Option<Oid>>;

    fn read_index(&self) -> BackendResult<Option<Vec<u8>>>;

    fn write_index(&self, data: &[u8]) -> BackendResult<()>;

    /// The shallow graft list; empty when the store is not shallow.
    fn read_shallow(&self) -> BackendResult<Vec<Oid>>;

    /// Replaces the shallow graft list; an empty list removes it.
    fn write_shallow(&self, oids: &[Oid]) -> BackendResult<()>;

    fn append_reflog(&self, name: &str, entry: &ReflogEntry) -> BackendResult<()>;

    fn read_reflog(&self, name: &str) -> BackendResult<Vec<ReflogEntry>>;

    /// The raw serialized config (INI text for the standard layout).
    fn read_config(&self) -> BackendResult<Vec<u8>>;

    fn write_config(&self, data: &[u8]) -> BackendResult<()>;
}

impl dyn Backend {
    /// Returns reference of the implementation type.
    pub fn downcast_ref<T: Backend>(&self) -> Option<&T> {
        (self as &dyn Any).downcast_ref()
    }
}
