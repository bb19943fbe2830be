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

//! Repository-level commands: init, root discovery, config access, and
//! remote bookkeeping.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use super::CommandResult;
use super::ErrorKind;
use super::ResultExt as _;
use super::command_err;
use crate::backend::Backend;
use crate::repo::Repository;
use crate::worktree::WorktreeFs;

/// Initializes a repository over `backend`: config skeleton and a
/// symbolic `HEAD` at the default branch.
pub fn init(
    backend: Arc<dyn Backend>,
    worktree_fs: Option<Arc<dyn WorktreeFs>>,
    default_branch: Option<&str>,
) -> CommandResult<Repository> {
    Repository::init(backend, worktree_fs, default_branch.unwrap_or("main")).ctx("git.init")
}

/// Walks up from `start` to the closest directory containing `.git`.
pub fn find_root(start: &Path) -> CommandResult<PathBuf> {
    const CALLER: &str = "git.findRoot";
    let mut current = Some(start.to_path_buf());
    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return Ok(dir);
        }
        current = dir.parent().map(Path::to_path_buf);
    }
    Err(command_err(
        CALLER,
        ErrorKind::NotFound {
            what: format!("git root above {}", start.display()),
        },
    ))
}

pub fn get_config(repo: &Repository, key: &str) -> CommandResult<Option<String>> {
    const CALLER: &str = "git.getConfig";
    if key.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("path")));
    }
    let config = repo.config().ctx(CALLER)?;
    Ok(config.get(key).map(str::to_owned))
}

/// Every value recorded for a multi-valued key, in order.
pub fn get_config_all(repo: &Repository, key: &str) -> CommandResult<Vec<String>> {
    let config = repo.config().ctx("git.getConfigAll")?;
    Ok(config.get_all(key).into_iter().map(str::to_owned).collect())
}

/// Sets (or with `None` removes) a config value.
pub fn set_config(repo: &Repository, key: &str, value: Option<&str>) -> CommandResult<()> {
    const CALLER: &str = "git.setConfig";
    if key.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("path")));
    }
    let mut config = repo.config().ctx(CALLER)?;
    config.set(key, value);
    repo.write_config(&config).ctx(CALLER)
}

/// Registers a remote. Refuses to overwrite an existing one unless
/// `force` is set.
pub fn add_remote(repo: &Repository, name: &str, url: &str, force: bool) -> CommandResult<()> {
    const CALLER: &str = "git.addRemote";
    if name.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("remote")));
    }
    if url.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("url")));
    }
    let mut config = repo.config().ctx(CALLER)?;
    if !force && config.get(&format!("remote.{name}.url")).is_some() {
        return Err(command_err(
            CALLER,
            ErrorKind::AlreadyExists {
                what: format!("remote {name}"),
            },
        ));
    }
    config.set(&format!("remote.{name}.url"), Some(url));
    config.set(
        &format!("remote.{name}.fetch"),
        Some(&format!("+refs/heads/*:refs/remotes/{name}/*")),
    );
    repo.write_config(&config).ctx(CALLER)
}

pub fn delete_remote(repo: &Repository, name: &str) -> CommandResult<()> {
    const CALLER: &str = "git.deleteRemote";
    let mut config = repo.config().ctx(CALLER)?;
    config.remove_section("remote", Some(name));
    repo.write_config(&config).ctx(CALLER)
}

/// `(name, url)` for every configured remote.
pub fn list_remotes(repo: &Repository) -> CommandResult<Vec<(String, String)>> {
    const CALLER: &str = "git.listRemotes";
    let config = repo.config().ctx(CALLER)?;
    Ok(config
        .subsections("remote")
        .into_iter()
        .map(|name| {
            let url = config
                .get(&format!("remote.{name}.url"))
                .unwrap_or_default()
                .to_owned();
            (name.to_owned(), url)
        })
        .collect())
}

/// The branch `HEAD` points at, or `None` when detached. Returns the
/// short name unless `full_name` is set.
pub fn current_branch(repo: &Repository, full_name: bool) -> CommandResult<Option<String>> {
    let target = repo.refs().current_branch().ctx("git.currentBranch")?;
    Ok(target.map(|name| {
        if full_name {
            name
        } else {
            name.strip_prefix("refs/heads/").map_or(name.clone(), str::to_owned)
        }
    }))
}
