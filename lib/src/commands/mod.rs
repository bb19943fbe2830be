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

//! The public command surface. Each command validates its parameters,
//! orchestrates the subsystems, and tags any failure with its own name.

mod history;
mod objects;
mod refs;
mod remote;
mod repo_ops;
mod workdir;

use std::fmt;

pub use history::LogEntry;
pub use history::MergeReport;
pub use history::abort_merge;
pub use history::fast_forward_merge;
pub use history::find_merge_base;
pub use history::is_descendent;
pub use history::log;
pub use history::merge;
pub use history::walk;
pub use objects::ShowOutput;
pub use objects::expand_oid;
pub use objects::hash_blob;
pub use objects::index_pack;
pub use objects::pack_objects;
pub use objects::read_blob;
pub use objects::read_commit;
pub use objects::read_tag;
pub use objects::read_tree;
pub use objects::show;
pub use objects::write_blob;
pub use objects::write_commit;
pub use objects::write_tag;
pub use objects::write_tree;
pub use refs::annotated_tag;
pub use refs::branch;
pub use refs::delete_branch;
pub use refs::delete_ref;
pub use refs::delete_tag;
pub use refs::expand_ref;
pub use refs::list_branches;
pub use refs::list_tags;
pub use refs::pack_refs;
pub use refs::read_ref;
pub use refs::read_reflog;
pub use refs::rename_branch;
pub use refs::resolve_ref;
pub use refs::tag;
pub use refs::write_ref;
pub use refs::write_symbolic_ref;
pub use remote::CloneArgs;
pub use remote::FetchArgs;
pub use remote::FetchReport;
pub use remote::PushArgs;
pub use remote::clone;
pub use remote::fast_forward;
pub use remote::fetch;
pub use remote::get_remote_info;
pub use remote::pull;
pub use remote::push;
pub use repo_ops::add_remote;
pub use repo_ops::current_branch;
pub use repo_ops::delete_remote;
pub use repo_ops::find_root;
pub use repo_ops::get_config;
pub use repo_ops::get_config_all;
pub use repo_ops::init;
pub use repo_ops::list_remotes;
pub use repo_ops::set_config;
use thiserror::Error;
pub use workdir::CommitArgs;
pub use workdir::UpdateIndexArgs;
pub use workdir::add;
pub use workdir::attributes;
pub use workdir::checkout;
pub use workdir::commit;
pub use workdir::diff;
pub use workdir::list_files;
pub use workdir::remove;
pub use workdir::status;
pub use workdir::status_all;
pub use workdir::update_index;

use crate::backend::BackendError;
use crate::config::ConfigError;
use crate::index::IndexError;
use crate::merge::MergeError;
use crate::object::ObjectParseError;
use crate::object::ObjectType;
use crate::object_id::HexPrefix;
use crate::object_id::Oid;
use crate::object_id::PrefixResolution;
use crate::pack::PackError;
use crate::protocol::ProtocolError;
use crate::protocol::TransportError;
use crate::refs::RefError;
use crate::repo::Repository;
use crate::repo_path::InvalidRepoPathError;
use crate::revwalk::WalkError;
use crate::store::StoreError;
use crate::worktree::WorktreeError;

/// The failure category a command reports, independent of which
/// subsystem produced it.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("Missing required parameter {0}")]
    MissingParameter(&'static str),
    #[error("{name:?} is not a valid ref name")]
    InvalidRefName { name: String },
    #[error("{what} not found")]
    NotFound { what: String },
    #[error("{what} already exists")]
    AlreadyExists { what: String },
    #[error("Expected a {expected}, found a {actual}")]
    ObjectType {
        expected: ObjectType,
        actual: ObjectType,
    },
    #[error("Malformed object: {reason}")]
    MalformedObject { reason: String },
    #[error("Content does not match its checksum")]
    ChecksumMismatch,
    #[error("Delta base {hash} is not available")]
    MissingBaseObject { hash: String },
    #[error("Merge left unresolved conflicts in {paths:?}")]
    MergeConflict { paths: Vec<String> },
    #[error("Not a fast-forward")]
    NotFastForward,
    #[error("Ref {name} changed concurrently")]
    RefChanged { name: String },
    #[error("Traversal depth exceeded")]
    MaxDepth,
    #[error("Invalid filepath: {reason}")]
    InvalidFilepath { reason: String },
    #[error("Checkout would overwrite local changes: {paths:?}")]
    CheckoutConflict { paths: Vec<String> },
    #[error("Branch {name} is checked out")]
    BranchCheckedOut { name: String },
    #[error("Object id prefix {prefix} is ambiguous")]
    AmbiguousOid { prefix: String },
    #[error("Network error: {message}")]
    Network { message: String },
    #[error("Request deadline expired")]
    Timeout,
    #[error("Authentication required")]
    AuthRequired,
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Operation canceled")]
    UserCanceled,
    #[error("Server does not support {capability}")]
    UnsupportedProtocol { capability: String },
    #[error("Storage error: {message}")]
    Storage { message: String },
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// A command failure: the error kind plus the `git.<name>` caller that
/// raised it.
#[derive(Debug)]
pub struct CommandError {
    pub caller: &'static str,
    pub kind: ErrorKind,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.caller, self.kind)
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

impl From<BackendError> for ErrorKind {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::ObjectNotFound { hash } => Self::NotFound {
                what: format!("object {hash}"),
            },
            BackendError::ChecksumMismatch { .. } => Self::ChecksumMismatch,
            BackendError::Corrupt { what, reason } => Self::MalformedObject {
                reason: format!("{what}: {reason}"),
            },
            other => Self::Storage {
                message: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for ErrorKind {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(err) => err.into(),
            StoreError::Parse { source, .. } => source.into(),
            StoreError::ObjectType {
                expected, actual, ..
            } => Self::ObjectType { expected, actual },
            StoreError::TagChainTooDeep { .. } => Self::MaxDepth,
        }
    }
}

impl From<ObjectParseError> for ErrorKind {
    fn from(err: ObjectParseError) -> Self {
        Self::MalformedObject {
            reason: err.to_string(),
        }
    }
}

impl From<IndexError> for ErrorKind {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::ChecksumMismatch => Self::ChecksumMismatch,
            other => Self::MalformedObject {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ConfigError> for ErrorKind {
    fn from(err: ConfigError) -> Self {
        Self::MalformedObject {
            reason: err.to_string(),
        }
    }
}

impl From<InvalidRepoPathError> for ErrorKind {
    fn from(err: InvalidRepoPathError) -> Self {
        Self::InvalidFilepath {
            reason: err.to_string(),
        }
    }
}

impl From<RefError> for ErrorKind {
    fn from(err: RefError) -> Self {
        match err {
            RefError::InvalidRefName { name } => Self::InvalidRefName { name },
            RefError::NotFound { name } => Self::NotFound {
                what: format!("ref {name}"),
            },
            RefError::AlreadyExists { name } => Self::AlreadyExists {
                what: format!("ref {name}"),
            },
            RefError::RefChanged { name } => Self::RefChanged { name },
            RefError::MaxDepth { .. } => Self::MaxDepth,
            RefError::BranchCheckedOut { name } => Self::BranchCheckedOut { name },
            RefError::Backend(err) => err.into(),
        }
    }
}

impl From<WalkError> for ErrorKind {
    fn from(err: WalkError) -> Self {
        match err {
            WalkError::Store(err) => err.into(),
            WalkError::MaxDepth { .. } => Self::MaxDepth,
        }
    }
}

impl From<MergeError> for ErrorKind {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::Store(err) => err.into(),
            MergeError::Walk(err) => err.into(),
            MergeError::InvalidTree(reason) => Self::MalformedObject { reason },
        }
    }
}

impl From<PackError> for ErrorKind {
    fn from(err: PackError) -> Self {
        match err {
            PackError::ChecksumMismatch => Self::ChecksumMismatch,
            PackError::MissingBaseObject { hash } => Self::MissingBaseObject { hash },
            other => Self::MalformedObject {
                reason: other.to_string(),
            },
        }
    }
}

impl From<WorktreeError> for ErrorKind {
    fn from(err: WorktreeError) -> Self {
        match err {
            WorktreeError::Store(err) => err.into(),
            WorktreeError::Backend(err) => err.into(),
            WorktreeError::Index(err) => err.into(),
            WorktreeError::Path(err) => err.into(),
            WorktreeError::Io { path, source } => Self::Storage {
                message: format!("{path}: {source}"),
            },
            WorktreeError::NotFound { path } => Self::NotFound {
                what: format!("file {path}"),
            },
            WorktreeError::DirectoryRequiresForce { path } | WorktreeError::WorktreeFilePresent { path } => {
                Self::InvalidFilepath {
                    reason: format!("{path} requires force"),
                }
            }
            WorktreeError::CheckoutConflict { paths } => Self::CheckoutConflict { paths },
            WorktreeError::Ignore { message } => Self::Internal { message },
        }
    }
}

impl From<TransportError> for ErrorKind {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network { message } => Self::Network { message },
            TransportError::Timeout => Self::Timeout,
        }
    }
}

impl From<ProtocolError> for ErrorKind {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Transport(err) => err.into(),
            ProtocolError::Malformed(message) | ProtocolError::Remote(message) => {
                Self::Network { message }
            }
            ProtocolError::AuthRequired { .. } => Self::AuthRequired,
            ProtocolError::AuthFailed { .. } => Self::AuthFailed,
            ProtocolError::Unsupported(capability) => Self::UnsupportedProtocol { capability },
            ProtocolError::Canceled | ProtocolError::HookDeclined => Self::UserCanceled,
            ProtocolError::Pack(err) => err.into(),
            ProtocolError::Store(err) => err.into(),
            ProtocolError::Backend(err) => err.into(),
            ProtocolError::Walk(err) => err.into(),
        }
    }
}

/// Maps any subsystem error into a tagged command failure.
pub(crate) trait ResultExt<T> {
    fn ctx(self, caller: &'static str) -> CommandResult<T>;
}

impl<T, E: Into<ErrorKind>> ResultExt<T> for Result<T, E> {
    fn ctx(self, caller: &'static str) -> CommandResult<T> {
        self.map_err(|err| CommandError {
            caller,
            kind: err.into(),
        })
    }
}

pub(crate) fn command_err(caller: &'static str, kind: ErrorKind) -> CommandError {
    CommandError { caller, kind }
}

/// Resolves a revision-ish string: a full or short ref name, a full hex
/// id, or a unique hex prefix.
pub(crate) fn resolve_revision(repo: &Repository, revision: &str) -> Result<Oid, ErrorKind> {
    if let Ok(name) = repo.refs().expand(revision) {
        return repo.refs().resolve(&name).map_err(ErrorKind::from);
    }
    if revision.len() == repo.store().hash_kind().hex_len() {
        if let Some(oid) = Oid::try_from_hex(revision) {
            if repo.store().has_object(&oid).map_err(ErrorKind::from)? {
                return Ok(oid);
            }
            return Err(ErrorKind::NotFound {
                what: format!("object {revision}"),
            });
        }
    }
    if let Some(prefix) = HexPrefix::try_from_hex(revision) {
        match repo
            .store()
            .resolve_prefix(&prefix)
            .map_err(ErrorKind::from)?
        {
            PrefixResolution::SingleMatch(oid) => return Ok(oid),
            PrefixResolution::AmbiguousMatch => {
                return Err(ErrorKind::AmbiguousOid {
                    prefix: revision.to_owned(),
                });
            }
            PrefixResolution::NoMatch => {}
        }
    }
    Err(ErrorKind::NotFound {
        what: format!("revision {revision}"),
    })
}

/// Resolves a revision to a commit id, peeling annotated tags.
pub(crate) fn resolve_commit(repo: &Repository, revision: &str) -> Result<Oid, ErrorKind> {
    let oid = resolve_revision(repo, revision)?;
    let (peeled, _) = repo.store().peel_to_commit(&oid)?;
    Ok(peeled)
}
