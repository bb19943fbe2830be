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

//! Remote commands: clone, fetch, push, pull, and their plumbing.

use std::collections::HashSet;
use std::time::Duration;

use tracing::debug;

use super::CommandResult;
use super::ErrorKind;
use super::ResultExt as _;
use super::command_err;
use super::history::MergeReport;
use super::objects::collect_closure;
use crate::backend::RefValue;
use crate::fs_backend::FsBackend;
use crate::merge::MergeStrategy;
use crate::object::Signature;
use crate::object_id::Oid;
use crate::pack;
use crate::pack::PackIndex;
use crate::protocol;
use crate::protocol::CancelToken;
use crate::protocol::FetchOptions;
use crate::protocol::PrePushInfo;
use crate::protocol::PushCommand;
use crate::protocol::PushOptions;
use crate::protocol::PushOutcome;
use crate::protocol::RemoteCallbacks;
use crate::protocol::RemoteInfo;
use crate::protocol::Transport;
use crate::refs::Expect;
use crate::repo::Repository;
use crate::revwalk;

const UPLOAD_PACK_SERVICE: &str = "git-upload-pack";
const RECEIVE_PACK_SERVICE: &str = "git-receive-pack";

/// Arguments shared by `fetch` and (via conversion) `clone`.
#[derive(Default)]
pub struct FetchArgs<'a> {
    pub transport: Option<&'a dyn Transport>,
    /// Remote name; defaults to `origin`.
    pub remote: Option<&'a str>,
    /// Explicit URL, overriding `remote.<name>.url`.
    pub url: Option<&'a str>,
    /// Fetch only this branch.
    pub single_branch: Option<String>,
    pub depth: Option<u32>,
    pub since: Option<i64>,
    pub exclude: Vec<String>,
    /// Also create local tags from the advertisement.
    pub tags: bool,
    /// Drop remote-tracking refs the server no longer advertises.
    pub prune: bool,
    pub callbacks: RemoteCallbacks<'a>,
    pub cancel: Option<CancelToken>,
    pub timeout: Option<Duration>,
    pub cors_proxy: Option<&'a str>,
    pub headers: Vec<(String, String)>,
}

/// What a fetch accomplished.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// The branch the remote's `HEAD` points at.
    pub default_branch: Option<String>,
    /// Tip of the branch recorded in `FETCH_HEAD`.
    pub fetch_head: Option<Oid>,
    /// Remote-tracking refs written, `(full name, id)`.
    pub updated_refs: Vec<(String, Oid)>,
    pub objects_received: usize,
}

fn transport_of<'a>(
    transport: Option<&'a dyn Transport>,
    caller: &'static str,
) -> CommandResult<&'a dyn Transport> {
    transport.ok_or_else(|| command_err(caller, ErrorKind::MissingParameter("http")))
}

/// Builds the effective URL: explicit, else remote config; CORS proxy
/// prepended when configured.
fn remote_url(
    repo: &Repository,
    remote: &str,
    url: Option<&str>,
    cors_proxy: Option<&str>,
    caller: &'static str,
    push: bool,
) -> CommandResult<String> {
    let config = repo.config().ctx(caller)?;
    let configured = if push {
        config
            .get(&format!("remote.{remote}.pushurl"))
            .or_else(|| config.get(&format!("remote.{remote}.url")))
    } else {
        config.get(&format!("remote.{remote}.url"))
    };
    let url = match url.or(configured) {
        Some(url) => url.trim_end_matches('/').to_owned(),
        None => return Err(command_err(caller, ErrorKind::MissingParameter("url"))),
    };
    let proxy = cors_proxy
        .map(str::to_owned)
        .or_else(|| config.get("http.corsproxy").map(str::to_owned));
    Ok(match proxy {
        Some(proxy) => format!("{}/{url}", proxy.trim_end_matches('/')),
        None => url,
    })
}

fn check_object_format(
    repo: &Repository,
    info: &RemoteInfo,
    caller: &'static str,
) -> CommandResult<()> {
    if let Some(format) = info.object_format {
        if format != repo.store().hash_kind() {
            return Err(command_err(
                caller,
                ErrorKind::UnsupportedProtocol {
                    capability: format!("object-format={}", format.name()),
                },
            ));
        }
    }
    Ok(())
}

/// Surfaces a remote's parsed capability advertisement.
pub fn get_remote_info(
    transport: &dyn Transport,
    url: &str,
    callbacks: &mut RemoteCallbacks<'_>,
    headers: &[(String, String)],
    timeout: Option<Duration>,
) -> CommandResult<RemoteInfo> {
    protocol::discover(transport, callbacks, url, UPLOAD_PACK_SERVICE, headers, timeout)
        .ctx("git.getRemoteInfo")
}

/// Stores a received pack: as a pack+idx pair on filesystem storage,
/// loose elsewhere. Returns the object count.
fn ingest_pack(
    repo: &Repository,
    pack_data: &[u8],
    cancel: Option<&CancelToken>,
    caller: &'static str,
) -> CommandResult<usize> {
    if pack_data.is_empty() {
        return Ok(0);
    }
    let backend = repo.store().backend().clone();
    let hash_kind = repo.store().hash_kind();
    let lookup = |oid: &Oid| backend.read_object(oid).ok();
    let parsed = pack::parse_pack(pack_data, hash_kind, &lookup).ctx(caller)?;
    if cancel.is_some_and(CancelToken::is_canceled) {
        return Err(command_err(caller, ErrorKind::UserCanceled));
    }
    let count = parsed.entries.len();
    if let Some(fs_backend) = backend.as_ref().downcast_ref::<FsBackend>() {
        let entries: Vec<(Oid, u64, u32)> = parsed
            .entries
            .iter()
            .map(|entry| (entry.oid.clone(), entry.offset, entry.crc32))
            .collect();
        let idx_data = PackIndex::build(&entries, &parsed.trailer, hash_kind);
        let trailer_hex = crate::hex_util::encode_hex(&parsed.trailer);
        fs_backend
            .add_pack(pack_data, &idx_data, &trailer_hex)
            .ctx(caller)?;
    } else {
        for entry in &parsed.entries {
            if cancel.is_some_and(CancelToken::is_canceled) {
                return Err(command_err(caller, ErrorKind::UserCanceled));
            }
            backend
                .write_object(entry.object_type, &entry.payload)
                .ctx(caller)?;
        }
    }
    debug!(objects = count, "ingested pack");
    Ok(count)
}

fn fetch_actor(repo: &Repository, caller: &'static str) -> CommandResult<Signature> {
    Ok(repo
        .default_signature()
        .ctx(caller)?
        .unwrap_or_else(|| Signature::now("ugit", "ugit@localhost")))
}

/// Downloads missing history from a remote and updates remote-tracking
/// refs, the shallow list, and `FETCH_HEAD`.
pub fn fetch(repo: &Repository, args: FetchArgs<'_>) -> CommandResult<FetchReport> {
    fetch_inner(repo, args, "git.fetch")
}

fn fetch_inner(
    repo: &Repository,
    mut args: FetchArgs<'_>,
    caller: &'static str,
) -> CommandResult<FetchReport> {
    let transport = transport_of(args.transport, caller)?;
    let remote = args.remote.unwrap_or("origin");
    let url = remote_url(repo, remote, args.url, args.cors_proxy, caller, false)?;

    let info = protocol::discover(
        transport,
        &mut args.callbacks,
        &url,
        UPLOAD_PACK_SERVICE,
        &args.headers,
        args.timeout,
    )
    .ctx(caller)?;
    check_object_format(repo, &info, caller)?;

    // Which advertised refs this fetch cares about.
    let default_branch = info.head().map(str::to_owned);
    let mut selected: Vec<(String, Oid)> = vec![];
    match args.single_branch.as_deref() {
        Some(branch) => {
            let full = if branch.starts_with("refs/") {
                branch.to_owned()
            } else {
                format!("refs/heads/{branch}")
            };
            let oid = info.refs.get(&full).cloned().ok_or_else(|| {
                command_err(
                    caller,
                    ErrorKind::NotFound {
                        what: format!("remote ref {full}"),
                    },
                )
            })?;
            selected.push((full, oid));
        }
        None => {
            for (name, oid) in info.branches() {
                selected.push((format!("refs/heads/{name}"), oid.clone()));
            }
        }
    }

    let mut wants: Vec<Oid> = vec![];
    for (_, oid) in &selected {
        if !repo.store().has_object(oid).ctx(caller)? && !wants.contains(oid) {
            wants.push(oid.clone());
        }
    }
    if args.tags {
        for (_, oid) in info.tags() {
            if !repo.store().has_object(oid).ctx(caller)? && !wants.contains(oid) {
                wants.push(oid.clone());
            }
        }
    }
    // Depth-changing requests must renegotiate even without new tips.
    let force_negotiation = args.depth.is_some() || args.since.is_some() || !args.exclude.is_empty();
    if force_negotiation {
        for (_, oid) in &selected {
            if !wants.contains(oid) {
                wants.push(oid.clone());
            }
        }
    }

    let mut haves: Vec<Oid> = vec![];
    for (_, value) in repo.refs().list("").ctx(caller)? {
        if let RefValue::Direct(oid) = value {
            if repo.store().has_object(&oid).ctx(caller)? && !haves.contains(&oid) {
                haves.push(oid);
            }
        }
    }

    let client_shallow = repo.store().backend().read_shallow().ctx(caller)?;
    let options = FetchOptions {
        wants,
        haves,
        depth: args.depth,
        since: args.since,
        exclude: args.exclude.clone(),
        client_shallow: client_shallow.clone(),
        timeout: args.timeout,
        cancel: args.cancel.clone(),
    };
    let outcome = protocol::fetch_pack(transport, &mut args.callbacks, &url, &info, &options)
        .ctx(caller)?;
    let objects_received = ingest_pack(repo, &outcome.pack_data, args.cancel.as_ref(), caller)?;

    // Shallow list: additions from this response, removals for commits
    // the server unshallowed.
    if !outcome.shallow.is_empty() || !outcome.unshallow.is_empty() {
        let mut shallow = client_shallow;
        for oid in &outcome.shallow {
            if !shallow.contains(oid) {
                shallow.push(oid.clone());
            }
        }
        shallow.retain(|oid| !outcome.unshallow.contains(oid));
        repo.store()
            .backend()
            .write_shallow(&shallow)
            .ctx(caller)?;
    }

    let actor = fetch_actor(repo, caller)?;
    let mut report = FetchReport {
        default_branch,
        ..FetchReport::default()
    };
    report.objects_received = objects_received;
    for (full, oid) in &selected {
        let short = full.strip_prefix("refs/heads/").unwrap_or(full);
        let tracking = format!("refs/remotes/{remote}/{short}");
        repo.refs()
            .update(&tracking, oid, &Expect::Any, &actor, &format!("fetch {remote}"))
            .ctx(caller)?;
        report.updated_refs.push((tracking, oid.clone()));
    }
    if args.tags {
        for (name, oid) in info.tags() {
            let full = format!("refs/tags/{name}");
            if repo.refs().read(&full).ctx(caller)?.is_none() {
                repo.refs()
                    .update(&full, oid, &Expect::Absent, &actor, "fetch: new tag")
                    .ctx(caller)?;
                report.updated_refs.push((full, oid.clone()));
            }
        }
    }
    if args.prune {
        let prefix = format!("refs/remotes/{remote}/");
        for (name, _) in repo.refs().list(&prefix).ctx(caller)? {
            let short = &name[prefix.len()..];
            let advertised = short == "HEAD"
                || info.refs.contains_key(&format!("refs/heads/{short}"));
            if !advertised {
                repo.refs().delete(&name).ctx(caller)?;
            }
        }
    }

    report.fetch_head = match args.single_branch {
        Some(_) => selected.first().map(|(_, oid)| oid.clone()),
        None => report
            .default_branch
            .as_ref()
            .and_then(|head| info.refs.get(head))
            .cloned()
            .or_else(|| selected.first().map(|(_, oid)| oid.clone())),
    };
    if let Some(oid) = &report.fetch_head {
        repo.store()
            .backend()
            .write_ref("FETCH_HEAD", &RefValue::Direct(oid.clone()))
            .ctx(caller)?;
    }
    Ok(report)
}

/// Arguments for `clone`.
#[derive(Default)]
pub struct CloneArgs<'a> {
    pub transport: Option<&'a dyn Transport>,
    pub url: &'a str,
    /// Remote name to register; defaults to `origin`.
    pub remote: Option<&'a str>,
    /// Branch to check out; defaults to the remote's `HEAD`.
    pub branch: Option<&'a str>,
    pub single_branch: bool,
    pub depth: Option<u32>,
    pub since: Option<i64>,
    pub exclude: Vec<String>,
    /// Skip the worktree materialization.
    pub no_checkout: bool,
    pub callbacks: RemoteCallbacks<'a>,
    pub cancel: Option<CancelToken>,
    pub timeout: Option<Duration>,
    pub cors_proxy: Option<&'a str>,
    pub headers: Vec<(String, String)>,
}

/// Populates a freshly initialized repository from a remote.
pub fn clone(repo: &Repository, args: CloneArgs<'_>) -> CommandResult<FetchReport> {
    const CALLER: &str = "git.clone";
    if args.url.is_empty() {
        return Err(command_err(CALLER, ErrorKind::MissingParameter("url")));
    }
    let remote = args.remote.unwrap_or("origin");
    super::repo_ops::add_remote(repo, remote, args.url, true)?;

    // A targeted clone only negotiates the requested branch.
    let single_branch = args
        .single_branch
        .then_some(args.branch)
        .flatten()
        .map(str::to_owned);
    let report = fetch_inner(
        repo,
        FetchArgs {
            transport: args.transport,
            remote: Some(remote),
            url: Some(args.url),
            single_branch,
            depth: args.depth,
            since: args.since,
            exclude: args.exclude,
            tags: true,
            prune: false,
            callbacks: args.callbacks,
            cancel: args.cancel,
            timeout: args.timeout,
            cors_proxy: args.cors_proxy,
            headers: args.headers,
        },
        CALLER,
    )?;

    let default_short = report
        .default_branch
        .as_deref()
        .and_then(|head| head.strip_prefix("refs/heads/"))
        .unwrap_or("main");
    let branch = args.branch.unwrap_or(default_short);
    let local_ref = format!("refs/heads/{branch}");
    repo.refs().write_symbolic("HEAD", &local_ref).ctx(CALLER)?;

    let tracking = format!("refs/remotes/{remote}/{branch}");
    if let Ok(tip) = repo.refs().resolve(&tracking) {
        let actor = fetch_actor(repo, CALLER)?;
        repo.refs()
            .update(
                &local_ref,
                &tip,
                &Expect::Any,
                &actor,
                &format!("clone: from {}", args.url),
            )
            .ctx(CALLER)?;
        let mut config = repo.config().ctx(CALLER)?;
        config.set(&format!("branch.{branch}.remote"), Some(remote));
        config.set(&format!("branch.{branch}.merge"), Some(&local_ref));
        repo.write_config(&config).ctx(CALLER)?;

        if !args.no_checkout {
            if let Some(worktree) = repo.worktree() {
                let tree = repo.store().read_commit(&tip).ctx(CALLER)?.tree;
                worktree.checkout_tree(&tree, true).ctx(CALLER)?;
            }
        }
    }
    Ok(report)
}

/// Arguments for `push`.
#[derive(Default)]
pub struct PushArgs<'a> {
    pub transport: Option<&'a dyn Transport>,
    pub remote: Option<&'a str>,
    pub url: Option<&'a str>,
    /// Local ref to push; defaults to the current branch.
    pub local_ref: Option<&'a str>,
    /// Destination ref; defaults per the tracking configuration.
    pub remote_ref: Option<&'a str>,
    pub force: bool,
    /// Delete the remote ref instead of updating it.
    pub delete: bool,
    pub callbacks: RemoteCallbacks<'a>,
    pub cancel: Option<CancelToken>,
    pub timeout: Option<Duration>,
    pub cors_proxy: Option<&'a str>,
    pub headers: Vec<(String, String)>,
}

/// All tree/blob/commit ids reachable from the given commit tips, so far
/// as they exist locally.
fn local_object_closure(
    repo: &Repository,
    tips: &[Oid],
) -> Result<HashSet<Oid>, ErrorKind> {
    let store = repo.store();
    let shallow = repo.shallow_set()?;
    let local_tips: Vec<Oid> = {
        let mut out = vec![];
        for tip in tips {
            if store.has_object(tip)? {
                out.push(tip.clone());
            }
        }
        out
    };
    let commits = revwalk::reachable(store, &shallow, &local_tips)?;
    let mut seen: HashSet<Oid> = HashSet::new();
    for commit_oid in &commits {
        seen.insert(commit_oid.clone());
        let commit = store.read_commit(commit_oid)?;
        let mut stack = vec![commit.tree];
        while let Some(tree_oid) = stack.pop() {
            if !seen.insert(tree_oid.clone()) {
                continue;
            }
            for entry in store.read_tree(&tree_oid)?.entries() {
                match entry.mode {
                    crate::object::FileMode::Tree => stack.push(entry.oid.clone()),
                    crate::object::FileMode::Commit => {}
                    _ => {
                        seen.insert(entry.oid.clone());
                    }
                }
            }
        }
    }
    Ok(seen)
}

/// Sends local history to a remote and updates one ref there.
pub fn push(repo: &Repository, mut args: PushArgs<'_>) -> CommandResult<PushOutcome> {
    const CALLER: &str = "git.push";
    let transport = transport_of(args.transport, CALLER)?;

    // Which local ref, and where it goes on the remote.
    let local_full = match args.local_ref {
        Some(name) => {
            if name.starts_with("refs/") {
                name.to_owned()
            } else {
                format!("refs/heads/{name}")
            }
        }
        None => repo
            .refs()
            .current_branch()
            .ctx(CALLER)?
            .ok_or_else(|| command_err(CALLER, ErrorKind::MissingParameter("ref")))?,
    };
    let short = local_full.strip_prefix("refs/heads/").unwrap_or(&local_full);
    let config = repo.config().ctx(CALLER)?;

    // Remote selection: explicit, then the branch's push remote, then
    // the repository-wide push default.
    let remote = args
        .remote
        .or_else(|| config.get(&format!("branch.{short}.pushremote")))
        .or_else(|| config.get("remote.pushdefault"))
        .unwrap_or("origin")
        .to_owned();
    let url = remote_url(repo, &remote, args.url, args.cors_proxy, CALLER, true)?;
    let remote_full = match args.remote_ref {
        Some(name) => {
            if name.starts_with("refs/") {
                name.to_owned()
            } else {
                format!("refs/heads/{name}")
            }
        }
        None => match config.get(&format!("branch.{short}.merge")) {
            Some(merge) => merge.to_owned(),
            None if args.delete => {
                return Err(command_err(CALLER, ErrorKind::MissingParameter("remoteRef")));
            }
            None => local_full.clone(),
        },
    };

    let mut info = protocol::discover(
        transport,
        &mut args.callbacks,
        &url,
        RECEIVE_PACK_SERVICE,
        &args.headers,
        args.timeout,
    )
    .ctx(CALLER)?;
    check_object_format(repo, &info, CALLER)?;

    let zero = Oid::zero(repo.store().hash_kind());
    let new_oid = if args.delete {
        zero.clone()
    } else {
        repo.refs().resolve(&local_full).ctx(CALLER)?
    };

    let mut attempt = 0;
    loop {
        attempt += 1;
        let old_oid = info.refs.get(&remote_full).cloned().unwrap_or(zero.clone());

        if !args.force && !args.delete && !old_oid.is_zero() && old_oid != new_oid {
            let shallow = repo.shallow_set().ctx(CALLER)?;
            let fast_forward = repo.store().has_object(&old_oid).ctx(CALLER)?
                && revwalk::is_descendent(repo.store(), &shallow, &new_oid, &old_oid, -1)
                    .ctx(CALLER)?;
            if !fast_forward {
                return Err(command_err(CALLER, ErrorKind::NotFastForward));
            }
        }

        if let Some(hook) = args.callbacks.on_pre_push.as_mut() {
            let infos = [PrePushInfo {
                remote_url: url.clone(),
                local_ref: local_full.clone(),
                remote_ref: remote_full.clone(),
                old_oid: old_oid.clone(),
                new_oid: new_oid.clone(),
            }];
            if !hook(&infos) {
                return Err(command_err(CALLER, ErrorKind::UserCanceled));
            }
        }

        let pack_data = if args.delete || old_oid == new_oid {
            vec![]
        } else {
            let shallow = repo.shallow_set().ctx(CALLER)?;
            let known_tips: Vec<Oid> = info.refs.values().cloned().collect();
            let known = local_object_closure(repo, &known_tips).ctx(CALLER)?;
            let commits =
                revwalk::rev_list(repo.store(), &shallow, &[new_oid.clone()], &known_tips)
                    .ctx(CALLER)?;
            let objects = collect_closure(repo, &commits, &known).ctx(CALLER)?;
            pack::build_pack(
                &objects,
                repo.store().hash_kind(),
                pack::DEFAULT_DELTA_WINDOW,
            )
            .data
        };

        let commands = [PushCommand {
            old_oid: old_oid.clone(),
            new_oid: new_oid.clone(),
            ref_name: remote_full.clone(),
        }];
        let outcome = protocol::push_pack(
            transport,
            &mut args.callbacks,
            &url,
            &info,
            &commands,
            &pack_data,
            &PushOptions {
                timeout: args.timeout,
                cancel: args.cancel.clone(),
            },
        )
        .ctx(CALLER)?;

        // A forced push that lost the compare-and-set race replays once
        // with a fresh advertisement.
        let rejected = outcome.statuses.iter().any(|status| !status.ok);
        if rejected && args.force && attempt == 1 {
            info = protocol::discover(
                transport,
                &mut args.callbacks,
                &url,
                RECEIVE_PACK_SERVICE,
                &args.headers,
                args.timeout,
            )
            .ctx(CALLER)?;
            continue;
        }

        if outcome.all_ok() {
            let tracking = format!("refs/remotes/{remote}/{short}");
            if args.delete {
                let _ = repo.refs().delete(&tracking);
            } else if local_full.starts_with("refs/heads/") {
                let actor = fetch_actor(repo, CALLER)?;
                repo.refs()
                    .update(&tracking, &new_oid, &Expect::Any, &actor, "push: updated")
                    .ctx(CALLER)?;
            }
        } else if let Some(status) = outcome.statuses.iter().find(|status| !status.ok) {
            let reason = status.message.clone().unwrap_or_default();
            if reason.contains("non-fast-forward") {
                return Err(command_err(CALLER, ErrorKind::NotFastForward));
            }
            return Err(command_err(
                CALLER,
                ErrorKind::RefChanged {
                    name: status.ref_name.clone(),
                },
            ));
        }
        return Ok(outcome);
    }
}

/// Fetches the current branch's upstream and merges it.
pub fn pull(
    repo: &Repository,
    args: FetchArgs<'_>,
    fast_forward_only: bool,
) -> CommandResult<MergeReport> {
    const CALLER: &str = "git.pull";
    pull_inner(repo, args, fast_forward_only, CALLER)
}

/// Fetches and fast-forwards the current branch; fails rather than
/// create a merge commit.
pub fn fast_forward(repo: &Repository, args: FetchArgs<'_>) -> CommandResult<MergeReport> {
    pull_inner(repo, args, true, "git.fastForward")
}

fn pull_inner(
    repo: &Repository,
    mut args: FetchArgs<'_>,
    fast_forward_only: bool,
    caller: &'static str,
) -> CommandResult<MergeReport> {
    let current = repo
        .refs()
        .current_branch()
        .ctx(caller)?
        .ok_or_else(|| command_err(caller, ErrorKind::MissingParameter("ref")))?;
    let short = current.strip_prefix("refs/heads/").unwrap_or(&current);

    // The upstream branch name defaults to the same short name.
    let config = repo.config().ctx(caller)?;
    let upstream = config
        .get(&format!("branch.{short}.merge"))
        .map(str::to_owned)
        .unwrap_or_else(|| current.clone());
    if args.single_branch.is_none() {
        args.single_branch = Some(upstream);
    }

    let report = fetch_inner(repo, args, caller)?;
    let Some(fetch_head) = report.fetch_head else {
        return Ok(MergeReport {
            oid: repo.refs().resolve_leaf("HEAD").ctx(caller)?.1,
            already_merged: true,
            fast_forward: false,
            conflicts: vec![],
        });
    };
    super::history::merge(
        repo,
        &fetch_head.hex(),
        MergeStrategy::Recursive,
        fast_forward_only,
        None,
        None,
    )
    .map_err(|err| command_err(caller, err.kind))
}
