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

//! The repository handle commands operate on: a storage backend, the
//! ref layer over it, and optionally a worktree. Components hold the
//! shared store, never each other.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::backend::Backend;
use crate::backend::BackendResult;
use crate::config::Config;
use crate::fs_backend::FsBackend;
use crate::mutation;
use crate::mutation::MutationObserver;
use crate::object::Signature;
use crate::object_id::HashKind;
use crate::object_id::Oid;
use crate::refs::RefStore;
use crate::store::Store;
use crate::worktree::HostFs;
use crate::worktree::Worktree;
use crate::worktree::WorktreeFs;

#[derive(Clone, Debug)]
pub struct Repository {
    store: Store,
    refs: RefStore,
    worktree: Option<Worktree>,
    observer: Arc<dyn MutationObserver>,
}

impl Repository {
    /// Opens a repository over an existing backend.
    pub fn open(backend: Arc<dyn Backend>, worktree_fs: Option<Arc<dyn WorktreeFs>>) -> Self {
        Self::open_with_observer(backend, worktree_fs, mutation::default_observer())
    }

    pub fn open_with_observer(
        backend: Arc<dyn Backend>,
        worktree_fs: Option<Arc<dyn WorktreeFs>>,
        observer: Arc<dyn MutationObserver>,
    ) -> Self {
        let store = Store::new(backend);
        let refs = RefStore::new(store.backend().clone());
        let worktree = worktree_fs
            .map(|fs| Worktree::new(store.clone(), fs, observer.clone()));
        Self {
            store,
            refs,
            worktree,
            observer,
        }
    }

    /// Initializes a fresh repository on a backend: config skeleton plus
    /// a symbolic `HEAD`.
    pub fn init(
        backend: Arc<dyn Backend>,
        worktree_fs: Option<Arc<dyn WorktreeFs>>,
        default_branch: &str,
    ) -> BackendResult<Self> {
        let bare = worktree_fs.is_none();
        let repo = Self::open(backend, worktree_fs);
        let mut config = repo.config()?;
        if config.get("core.repositoryformatversion").is_none() {
            config.set("core.repositoryformatversion", Some("0"));
            config.set("core.filemode", Some(if cfg!(unix) { "true" } else { "false" }));
            config.set("core.bare", Some(if bare { "true" } else { "false" }));
            if repo.store.hash_kind() == HashKind::Sha256 {
                config.set("extensions.objectformat", Some("sha256"));
            }
            repo.write_config(&config)?;
        }
        if repo.store.backend().read_ref("HEAD")?.is_none() {
            repo.store.backend().write_ref(
                "HEAD",
                &crate::backend::RefValue::Symbolic(format!("refs/heads/{default_branch}")),
            )?;
        }
        Ok(repo)
    }

    /// Convenience constructor for the standard on-disk layout: `.git`
    /// under `dir`, worktree at `dir`.
    pub fn init_at(dir: &Path) -> BackendResult<Self> {
        let backend = Arc::new(FsBackend::init(&dir.join(".git"), HashKind::Sha1)?);
        Self::init(backend, Some(Arc::new(HostFs::new(dir))), "main")
    }

    pub fn open_at(dir: &Path) -> BackendResult<Self> {
        let backend = Arc::new(FsBackend::load(&dir.join(".git"), HashKind::Sha1)?);
        Ok(Self::open(backend, Some(Arc::new(HostFs::new(dir)))))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn observer(&self) -> &Arc<dyn MutationObserver> {
        &self.observer
    }

    /// The worktree mediator, absent for bare repositories.
    pub fn worktree(&self) -> Option<&Worktree> {
        self.worktree.as_ref()
    }

    /// The current config snapshot.
    pub fn config(&self) -> BackendResult<Config> {
        let data = self.store.backend().read_config()?;
        Config::parse(&data).map_err(|err| crate::backend::BackendError::Corrupt {
            what: "config".to_owned(),
            reason: err.to_string(),
        })
    }

    pub fn write_config(&self, config: &Config) -> BackendResult<()> {
        self.store.backend().write_config(&config.serialize())
    }

    /// The identity used for commits and reflog entries when the caller
    /// doesn't pass one: `user.name`/`user.email` from config.
    pub fn default_signature(&self) -> BackendResult<Option<Signature>> {
        let config = self.config()?;
        match (config.get("user.name"), config.get("user.email")) {
            (Some(name), Some(email)) => Ok(Some(Signature::now(name, email))),
            _ => Ok(None),
        }
    }

    /// The shallow graft list as a set for traversal.
    pub fn shallow_set(&self) -> BackendResult<HashSet<Oid>> {
        Ok(self.store.backend().read_shallow()?.into_iter().collect())
    }
}
