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

//! Reference reads and writes: symbolic resolution, compare-and-set
//! updates, reflog appends, and branch maintenance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::RefValue;
use crate::backend::ReflogEntry;
use crate::object::Signature;
use crate::object_id::Oid;

/// How deep a symbolic ref chain may go before we assume a cycle.
pub const MAX_SYMLINK_DEPTH: usize = 10;

/// Gitdir-level names that are valid outside the `refs/` namespace.
const SPECIAL_REFS: &[&str] = &["HEAD", "FETCH_HEAD", "ORIG_HEAD", "MERGE_HEAD", "CHERRY_PICK_HEAD"];

#[derive(Debug, Error)]
pub enum RefError {
    #[error("{name:?} is not a valid ref name")]
    InvalidRefName { name: String },
    #[error("Ref {name} not found")]
    NotFound { name: String },
    #[error("Ref {name} already exists")]
    AlreadyExists { name: String },
    #[error("Ref {name} changed concurrently")]
    RefChanged { name: String },
    #[error("Symbolic ref chain starting at {name} exceeds depth {MAX_SYMLINK_DEPTH}")]
    MaxDepth { name: String },
    #[error("Branch {name} is checked out")]
    BranchCheckedOut { name: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RefResult<T> = Result<T, RefError>;

/// What the current ref value must be for a compare-and-set to commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expect {
    /// The ref must not exist.
    Absent,
    /// The ref must be a direct ref at exactly this id.
    Value(Oid),
    /// No expectation; last writer wins.
    Any,
}

/// Checks a full ref name against Git's naming rules.
pub fn validate_ref_name(name: &str) -> RefResult<()> {
    let invalid = || RefError::InvalidRefName {
        name: name.to_owned(),
    };
    if SPECIAL_REFS.contains(&name) {
        return Ok(());
    }
    if !name.starts_with("refs/") {
        return Err(invalid());
    }
    if name.ends_with('/') || name.contains("//") || name.contains("@{") || name.contains("..") {
        return Err(invalid());
    }
    if name == "refs/" {
        return Err(invalid());
    }
    for component in name.split('/') {
        if component.is_empty()
            || component == "@"
            || component.starts_with('.')
            || component.ends_with('.')
            || component.ends_with(".lock")
        {
            return Err(invalid());
        }
        for byte in component.bytes() {
            if byte < 0x20
                || byte == 0x7f
                || b" ~^:?*[\\".contains(&byte)
            {
                return Err(invalid());
            }
        }
    }
    Ok(())
}

/// The reference store: a thin policy layer over the backend's ref keys.
///
/// Writes serialize through per-name locks so compare-and-set observes a
/// stable value; reads are lock-free.
#[derive(Debug, Clone)]
pub struct RefStore {
    backend: Arc<dyn Backend>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl RefStore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Reflogs default on for non-bare repositories and follow
    /// `core.logAllRefUpdates` when set.
    fn reflog_enabled(&self) -> bool {
        let Ok(data) = self.backend.read_config() else {
            return true;
        };
        let Ok(config) = crate::config::Config::parse(&data) else {
            return true;
        };
        match config.get_bool("core.logallrefupdates") {
            Ok(Some(enabled)) => enabled,
            _ => !matches!(config.get_bool("core.bare"), Ok(Some(true))),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    pub fn read(&self, name: &str) -> RefResult<Option<RefValue>> {
        Ok(self.backend.read_ref(name)?)
    }

    /// Follows symbolic refs to the final (leaf) ref. Returns the leaf
    /// name and its target, which is `None` for an unborn branch.
    pub fn resolve_leaf(&self, name: &str) -> RefResult<(String, Option<Oid>)> {
        let mut current = name.to_owned();
        for _ in 0..MAX_SYMLINK_DEPTH {
            match self.backend.read_ref(&current)? {
                Some(RefValue::Direct(oid)) => return Ok((current, Some(oid))),
                Some(RefValue::Symbolic(target)) => current = target,
                None => return Ok((current, None)),
            }
        }
        Err(RefError::MaxDepth {
            name: name.to_owned(),
        })
    }

    /// Resolves a ref name to an object id.
    pub fn resolve(&self, name: &str) -> RefResult<Oid> {
        let (leaf, oid) = self.resolve_leaf(name)?;
        oid.ok_or(RefError::NotFound { name: leaf })
    }

    /// Expands a short name using Git's lookup order.
    pub fn expand(&self, short: &str) -> RefResult<String> {
        let candidates = [
            short.to_owned(),
            format!("refs/{short}"),
            format!("refs/heads/{short}"),
            format!("refs/tags/{short}"),
            format!("refs/remotes/{short}"),
            format!("refs/remotes/{short}/HEAD"),
        ];
        for candidate in candidates {
            if self.backend.read_ref(&candidate)?.is_some() {
                return Ok(candidate);
            }
        }
        Err(RefError::NotFound {
            name: short.to_owned(),
        })
    }

    pub fn list(&self, prefix: &str) -> RefResult<Vec<(String, RefValue)>> {
        Ok(self.backend.list_refs(prefix)?)
    }

    /// Compare-and-set write of a direct ref, with a reflog append on
    /// success.
    pub fn update(
        &self,
        name: &str,
        new_oid: &Oid,
        expect: &Expect,
        actor: &Signature,
        message: &str,
    ) -> RefResult<()> {
        validate_ref_name(name)?;
        let lock = self.lock_for(name);
        let _guard = lock.lock().unwrap();
        let current = self.backend.read_ref(name)?;
        let current_oid = match &current {
            Some(RefValue::Direct(oid)) => Some(oid.clone()),
            Some(RefValue::Symbolic(target)) => {
                // Writing through a symbolic ref updates its leaf.
                drop(_guard);
                return self.update(&target.clone(), new_oid, expect, actor, message);
            }
            None => None,
        };
        match expect {
            Expect::Any => {}
            Expect::Absent => {
                if current.is_some() {
                    return Err(RefError::RefChanged {
                        name: name.to_owned(),
                    });
                }
            }
            Expect::Value(expected) => {
                if current_oid.as_ref() != Some(expected) {
                    return Err(RefError::RefChanged {
                        name: name.to_owned(),
                    });
                }
            }
        }
        self.backend
            .write_ref(name, &RefValue::Direct(new_oid.clone()))?;
        let old_oid = current_oid.unwrap_or_else(|| Oid::zero(self.backend.hash_kind()));
        self.log_update(name, &old_oid, new_oid, actor, message);
        Ok(())
    }

    /// Points a symbolic ref (usually `HEAD`) at another ref.
    pub fn write_symbolic(&self, name: &str, target: &str) -> RefResult<()> {
        validate_ref_name(target)?;
        self.backend
            .write_ref(name, &RefValue::Symbolic(target.to_owned()))?;
        Ok(())
    }

    pub fn delete(&self, name: &str) -> RefResult<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().unwrap();
        if self.backend.read_ref(name)?.is_none() {
            return Err(RefError::NotFound {
                name: name.to_owned(),
            });
        }
        Ok(self.backend.delete_ref(name)?)
    }

    /// Appends to the ref's log, and to `HEAD`'s when `HEAD` currently
    /// points at the ref. A no-op move appends nothing. Log failures are
    /// reported but never fail the ref update that triggered them.
    fn log_update(&self, name: &str, old_oid: &Oid, new_oid: &Oid, actor: &Signature, message: &str) {
        if old_oid == new_oid || !self.reflog_enabled() {
            return;
        }
        let entry = ReflogEntry {
            old_oid: old_oid.clone(),
            new_oid: new_oid.clone(),
            actor: actor.clone(),
            message: message.to_owned(),
        };
        if let Err(err) = self.backend.append_reflog(name, &entry) {
            warn!(ref_name = name, error = %err, "reflog append failed");
        }
        if name != "HEAD" {
            match self.backend.read_ref("HEAD") {
                Ok(Some(RefValue::Symbolic(target))) if target == name => {
                    if let Err(err) = self.backend.append_reflog("HEAD", &entry) {
                        warn!(error = %err, "HEAD reflog append failed");
                    }
                }
                _ => {}
            }
        }
    }

    pub fn reflog(&self, name: &str) -> RefResult<Vec<ReflogEntry>> {
        Ok(self.backend.read_reflog(name)?)
    }

    /// Moves a branch to a new name. When the renamed branch is checked
    /// out, `HEAD` is retargeted to follow it.
    pub fn rename_branch(
        &self,
        old_name: &str,
        new_name: &str,
        actor: &Signature,
    ) -> RefResult<()> {
        validate_ref_name(new_name)?;
        if self.backend.read_ref(new_name)?.is_some() {
            return Err(RefError::AlreadyExists {
                name: new_name.to_owned(),
            });
        }
        let oid = self.resolve(old_name)?;
        self.update(
            new_name,
            &oid,
            &Expect::Absent,
            actor,
            &format!("branch: renamed {old_name} to {new_name}"),
        )?;
        let head = self.backend.read_ref("HEAD")?;
        self.backend.delete_ref(old_name)?;
        if head == Some(RefValue::Symbolic(old_name.to_owned())) {
            self.write_symbolic("HEAD", new_name)?;
        }
        Ok(())
    }

    /// Refuses to delete the branch `HEAD` points at.
    pub fn delete_branch(&self, name: &str) -> RefResult<()> {
        if let Some(RefValue::Symbolic(target)) = self.backend.read_ref("HEAD")? {
            if target == name {
                return Err(RefError::BranchCheckedOut {
                    name: name.to_owned(),
                });
            }
        }
        self.delete(name)
    }

    /// The branch `HEAD` points at, or `None` when detached.
    pub fn current_branch(&self) -> RefResult<Option<String>> {
        match self.backend.read_ref("HEAD")? {
            Some(RefValue::Symbolic(target)) => Ok(Some(target)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use test_case::test_case;

    use super::*;
    use crate::mem_backend::MemBackend;
    use crate::object_id::HashKind;

    fn new_ref_store() -> RefStore {
        RefStore::new(Arc::new(MemBackend::init(HashKind::Sha1)))
    }

    fn actor() -> Signature {
        Signature::new("Mr. Test", "mrtest@example.com", 1262356920, 0)
    }

    fn oid(byte: u8) -> Oid {
        Oid::from_bytes(&[byte; 20])
    }

    #[test_case("refs/heads/main", true)]
    #[test_case("refs/heads/feature/x", true)]
    #[test_case("HEAD", true)]
    #[test_case("refs/heads/ok.then", true)]
    #[test_case("main", false ; "short name")]
    #[test_case("refs/heads/", false ; "trailing slash")]
    #[test_case("refs/heads//x", false ; "double slash")]
    #[test_case("refs/heads/a..b", false ; "dotdot")]
    #[test_case("refs/heads/x.lock", false ; "lock suffix")]
    #[test_case("refs/heads/@{upstream}", false ; "at brace")]
    #[test_case("refs/heads/.hidden", false ; "dot component")]
    #[test_case("refs/heads/sp ace", false ; "space")]
    #[test_case("refs/heads/caret^", false ; "caret")]
    fn test_validate_ref_name(name: &str, valid: bool) {
        assert_eq!(validate_ref_name(name).is_ok(), valid);
    }

    #[test]
    fn test_cas_semantics() {
        let refs = new_ref_store();
        refs.update("refs/heads/main", &oid(1), &Expect::Absent, &actor(), "created")
            .unwrap();
        // Absent expectation now fails.
        assert_matches!(
            refs.update("refs/heads/main", &oid(2), &Expect::Absent, &actor(), "again"),
            Err(RefError::RefChanged { .. })
        );
        // Wrong expected value fails and leaves the ref untouched.
        assert_matches!(
            refs.update(
                "refs/heads/main",
                &oid(3),
                &Expect::Value(oid(9)),
                &actor(),
                "stale"
            ),
            Err(RefError::RefChanged { .. })
        );
        assert_eq!(refs.resolve("refs/heads/main").unwrap(), oid(1));
        // Correct expectation succeeds.
        refs.update(
            "refs/heads/main",
            &oid(2),
            &Expect::Value(oid(1)),
            &actor(),
            "moved",
        )
        .unwrap();
        assert_eq!(refs.resolve("refs/heads/main").unwrap(), oid(2));
    }

    #[test]
    fn test_symbolic_resolution_and_head_log() {
        let refs = new_ref_store();
        refs.write_symbolic("HEAD", "refs/heads/main").unwrap();
        let (leaf, target) = refs.resolve_leaf("HEAD").unwrap();
        assert_eq!(leaf, "refs/heads/main");
        assert_eq!(target, None);

        refs.update("HEAD", &oid(1), &Expect::Any, &actor(), "commit (initial)")
            .unwrap();
        // The write went to the leaf, and both logs got the entry.
        assert_eq!(refs.resolve("refs/heads/main").unwrap(), oid(1));
        assert_eq!(refs.reflog("refs/heads/main").unwrap().len(), 1);
        assert_eq!(refs.reflog("HEAD").unwrap().len(), 1);
    }

    #[test]
    fn test_symbolic_cycle_hits_max_depth() {
        let refs = new_ref_store();
        refs.write_symbolic("refs/heads/a", "refs/heads/b").unwrap();
        refs.write_symbolic("refs/heads/b", "refs/heads/a").unwrap();
        assert_matches!(
            refs.resolve_leaf("refs/heads/a"),
            Err(RefError::MaxDepth { .. })
        );
    }

    #[test]
    fn test_noop_update_skips_reflog() {
        let refs = new_ref_store();
        refs.update("refs/heads/main", &oid(1), &Expect::Any, &actor(), "created")
            .unwrap();
        refs.update("refs/heads/main", &oid(1), &Expect::Any, &actor(), "noop")
            .unwrap();
        assert_eq!(refs.reflog("refs/heads/main").unwrap().len(), 1);
    }

    #[test]
    fn test_rename_checked_out_branch_retargets_head() {
        let refs = new_ref_store();
        refs.write_symbolic("HEAD", "refs/heads/main").unwrap();
        refs.update("refs/heads/main", &oid(1), &Expect::Any, &actor(), "created")
            .unwrap();
        refs.rename_branch("refs/heads/main", "refs/heads/trunk", &actor())
            .unwrap();
        assert_eq!(refs.current_branch().unwrap().as_deref(), Some("refs/heads/trunk"));
        assert_eq!(refs.resolve("refs/heads/trunk").unwrap(), oid(1));
        assert_matches!(
            refs.resolve("refs/heads/main"),
            Err(RefError::NotFound { .. })
        );
    }

    #[test]
    fn test_delete_checked_out_branch_is_refused() {
        let refs = new_ref_store();
        refs.write_symbolic("HEAD", "refs/heads/main").unwrap();
        refs.update("refs/heads/main", &oid(1), &Expect::Any, &actor(), "created")
            .unwrap();
        assert_matches!(
            refs.delete_branch("refs/heads/main"),
            Err(RefError::BranchCheckedOut { .. })
        );
        refs.update("refs/heads/other", &oid(2), &Expect::Any, &actor(), "created")
            .unwrap();
        refs.delete_branch("refs/heads/other").unwrap();
    }
}
