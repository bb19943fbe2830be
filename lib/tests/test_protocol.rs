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

//! End-to-end wire-protocol scenarios against the in-memory remote:
//! clone, fetch, shallow histories, and push.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use testutils::FakeRemote;
use testutils::TestRepo;
use ugit_lib::commands;
use ugit_lib::commands::CloneArgs;
use ugit_lib::commands::ErrorKind;
use ugit_lib::commands::FetchArgs;
use ugit_lib::commands::PushArgs;
use ugit_lib::protocol::AuthRetry;
use ugit_lib::protocol::Credentials;
use ugit_lib::protocol::RemoteCallbacks;

#[test]
fn test_get_remote_info() {
    let remote = FakeRemote::new();
    let tip = remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);

    let info = commands::get_remote_info(
        &remote,
        &remote.url(),
        &mut RemoteCallbacks::default(),
        &[],
        None,
    )
    .unwrap();
    assert_eq!(info.protocol_version, 1);
    assert!(info.capable("side-band-64k"));
    assert!(info.capable("shallow"));
    assert_eq!(info.head(), Some("refs/heads/main"));
    assert_eq!(info.refs.get("refs/heads/main"), Some(&tip));
}

#[test]
fn test_clone_end_to_end() {
    let remote = FakeRemote::new();
    let first = remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);
    let second = remote.seed_commit(
        "refs/heads/main",
        &[("a.txt", "a2\n"), ("dir/b.txt", "b\n")],
        &[&first],
        1262356930,
    );

    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let report = commands::clone(
        repo,
        CloneArgs {
            transport: Some(&remote),
            url: &remote.url(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(report.default_branch.as_deref(), Some("refs/heads/main"));
    assert_eq!(report.fetch_head, Some(second.clone()));

    // Refs: local branch, remote-tracking ref, HEAD.
    assert_eq!(commands::resolve_ref(repo, "main").unwrap(), second);
    assert_eq!(
        commands::resolve_ref(repo, "refs/remotes/origin/main").unwrap(),
        second
    );
    assert_eq!(
        commands::current_branch(repo, true).unwrap().as_deref(),
        Some("refs/heads/main")
    );
    // Tracking configuration.
    assert_eq!(
        commands::get_config(repo, "branch.main.remote").unwrap().as_deref(),
        Some("origin")
    );
    // The worktree was materialized.
    assert_eq!(test_repo.read_file("a.txt").as_deref(), Some("a2\n"));
    assert_eq!(test_repo.read_file("dir/b.txt").as_deref(), Some("b\n"));
    // Full history came over.
    assert_eq!(commands::log(repo, "HEAD", None, None).unwrap().len(), 2);
}

#[test]
fn test_fetch_updates_tracking_ref_only() {
    let remote = FakeRemote::new();
    let first = remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);

    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    commands::clone(
        repo,
        CloneArgs {
            transport: Some(&remote),
            url: &remote.url(),
            ..Default::default()
        },
    )
    .unwrap();

    // The remote advances.
    let second = remote.seed_commit(
        "refs/heads/main",
        &[("a.txt", "a2\n")],
        &[&first],
        1262356930,
    );
    let report = commands::fetch(
        repo,
        FetchArgs {
            transport: Some(&remote),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(report.fetch_head, Some(second.clone()));
    assert_eq!(
        commands::resolve_ref(repo, "refs/remotes/origin/main").unwrap(),
        second
    );
    // The local branch stays put until a merge.
    assert_eq!(commands::resolve_ref(repo, "main").unwrap(), first);

    let merge = commands::fast_forward_merge(repo, "refs/remotes/origin/main").unwrap();
    assert!(merge.fast_forward);
    assert_eq!(commands::resolve_ref(repo, "main").unwrap(), second);
    assert_eq!(test_repo.read_file("a.txt").as_deref(), Some("a2\n"));
}

/// Shallow clone then deepen: the graft list tracks the boundary and
/// log length follows it.
#[test]
fn test_shallow_clone_and_deepen() {
    let remote = FakeRemote::new();
    let mut parent: Option<ugit_lib::object_id::Oid> = None;
    for i in 0..6i64 {
        let parents: Vec<&ugit_lib::object_id::Oid> = parent.iter().collect();
        let oid = remote.seed_commit(
            "refs/heads/main",
            &[("counter.txt", &format!("{i}\n"))],
            &parents,
            1262356920 + i,
        );
        parent = Some(oid);
    }
    let tip = parent.unwrap();

    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    commands::clone(
        repo,
        CloneArgs {
            transport: Some(&remote),
            url: &remote.url(),
            depth: Some(1),
            single_branch: true,
            branch: Some("main"),
            ..Default::default()
        },
    )
    .unwrap();

    // The tip is the shallow boundary and history stops there.
    assert_eq!(repo.store().backend().read_shallow().unwrap(), vec![tip.clone()]);
    assert_eq!(commands::log(repo, "HEAD", None, None).unwrap().len(), 1);

    // Deepening moves the boundary and extends the log.
    commands::fetch(
        repo,
        FetchArgs {
            transport: Some(&remote),
            single_branch: Some("main".to_owned()),
            depth: Some(5),
            ..Default::default()
        },
    )
    .unwrap();
    let shallow = repo.store().backend().read_shallow().unwrap();
    assert!(!shallow.contains(&tip));
    assert_eq!(shallow.len(), 1);
    assert_eq!(commands::log(repo, "HEAD", None, None).unwrap().len(), 5);
}

#[test]
fn test_push_new_branch_and_delete() {
    let remote = FakeRemote::new();
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let tip = test_repo.commit_files(&[("a.txt", "a\n")], "first", 1262356920);
    commands::add_remote(repo, "origin", &remote.url(), false).unwrap();

    let outcome = commands::push(
        repo,
        PushArgs {
            transport: Some(&remote),
            ..Default::default()
        },
    )
    .unwrap();
    assert!(outcome.all_ok());
    assert_eq!(remote.ref_target("refs/heads/main"), Some(tip.clone()));
    // The server received the whole closure.
    assert!(remote.repo.store().has_object(&tip).unwrap());
    // Remote-tracking ref reflects the push.
    assert_eq!(
        commands::resolve_ref(repo, "refs/remotes/origin/main").unwrap(),
        tip
    );

    // Delete the remote branch.
    let outcome = commands::push(
        repo,
        PushArgs {
            transport: Some(&remote),
            remote_ref: Some("main"),
            delete: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(outcome.all_ok());
    assert_eq!(remote.ref_target("refs/heads/main"), None);
}

#[test]
fn test_push_rejects_non_fast_forward_without_force() {
    let remote = FakeRemote::new();
    let base = remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);
    remote.seed_commit("refs/heads/main", &[("a.txt", "server\n")], &[&base], 1262356930);

    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    commands::clone(
        repo,
        CloneArgs {
            transport: Some(&remote),
            url: &remote.url(),
            ..Default::default()
        },
    )
    .unwrap();
    // Rewrite local history from the base: a diverged tip.
    commands::checkout(repo, &base.hex(), false).unwrap();
    commands::branch(repo, "rewrite", None, true).unwrap();
    let local = test_repo.commit_files(&[("a.txt", "local\n")], "diverge", 1262356940);

    let err = commands::push(
        repo,
        PushArgs {
            transport: Some(&remote),
            local_ref: Some("rewrite"),
            remote_ref: Some("main"),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_matches!(err.kind, ErrorKind::NotFastForward);

    // Forced push wins.
    let outcome = commands::push(
        repo,
        PushArgs {
            transport: Some(&remote),
            local_ref: Some("rewrite"),
            remote_ref: Some("main"),
            force: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(outcome.all_ok());
    assert_eq!(remote.ref_target("refs/heads/main"), Some(local));
}

#[test]
fn test_pre_push_hook_can_cancel() {
    let remote = FakeRemote::new();
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_files(&[("a.txt", "a\n")], "first", 1262356920);
    commands::add_remote(repo, "origin", &remote.url(), false).unwrap();

    let mut seen = vec![];
    let callbacks = RemoteCallbacks {
        on_pre_push: Some(Box::new(|infos: &[ugit_lib::protocol::PrePushInfo]| {
            seen.push(infos[0].remote_ref.clone());
            false
        })),
        ..RemoteCallbacks::default()
    };
    let err = commands::push(
        repo,
        PushArgs {
            transport: Some(&remote),
            callbacks,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_matches!(err.kind, ErrorKind::UserCanceled);
    assert_eq!(seen, ["refs/heads/main"]);
    // Nothing landed on the server.
    assert_eq!(remote.ref_target("refs/heads/main"), None);
}

#[test]
fn test_auth_flow() {
    let remote = FakeRemote::with_auth("mrtest", "s3cret");
    remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);

    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;

    // No credentials at all: AuthRequired.
    let err = commands::fetch(
        repo,
        FetchArgs {
            transport: Some(&remote),
            url: Some(&remote.url()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_matches!(err.kind, ErrorKind::AuthRequired);

    // Wrong credentials, hook gives up: AuthFailed.
    let mut failures = 0;
    let callbacks = RemoteCallbacks {
        on_auth: Some(Box::new(|_url: &str| {
            Some(Credentials {
                username: "mrtest".to_owned(),
                password: "wrong".to_owned(),
            })
        })),
        on_auth_failure: Some(Box::new(|_url: &str| {
            failures += 1;
            AuthRetry::GiveUp
        })),
        ..RemoteCallbacks::default()
    };
    let err = commands::fetch(
        repo,
        FetchArgs {
            transport: Some(&remote),
            url: Some(&remote.url()),
            callbacks,
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_matches!(err.kind, ErrorKind::AuthFailed);
    assert_eq!(failures, 1);

    // Correct credentials succeed and report success.
    let mut success = false;
    let callbacks = RemoteCallbacks {
        on_auth: Some(Box::new(|_url: &str| {
            Some(Credentials {
                username: "mrtest".to_owned(),
                password: "s3cret".to_owned(),
            })
        })),
        on_auth_success: Some(Box::new(|_url: &str| success = true)),
        ..RemoteCallbacks::default()
    };
    commands::fetch(
        repo,
        FetchArgs {
            transport: Some(&remote),
            url: Some(&remote.url()),
            single_branch: Some("main".to_owned()),
            callbacks,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(success);
}

#[test]
fn test_fetch_progress_messages_surface() {
    let remote = FakeRemote::new();
    remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);

    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let mut progress = vec![];
    let callbacks = RemoteCallbacks {
        on_progress: Some(Box::new(|line: &str| progress.push(line.to_owned()))),
        ..RemoteCallbacks::default()
    };
    commands::fetch(
        repo,
        FetchArgs {
            transport: Some(&remote),
            url: Some(&remote.url()),
            single_branch: Some("main".to_owned()),
            callbacks,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(progress, ["counting objects done\n"]);
}

#[test]
fn test_pull_fast_forwards_current_branch() {
    let remote = FakeRemote::new();
    let first = remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);

    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    commands::clone(
        repo,
        CloneArgs {
            transport: Some(&remote),
            url: &remote.url(),
            ..Default::default()
        },
    )
    .unwrap();

    let second = remote.seed_commit(
        "refs/heads/main",
        &[("a.txt", "a2\n")],
        &[&first],
        1262356930,
    );
    let report = commands::pull(
        repo,
        FetchArgs {
            transport: Some(&remote),
            ..Default::default()
        },
        false,
    )
    .unwrap();
    assert!(report.fast_forward);
    assert_eq!(commands::resolve_ref(repo, "main").unwrap(), second);
    assert_eq!(test_repo.read_file("a.txt").as_deref(), Some("a2\n"));
}

#[test]
fn test_cancellation_aborts_fetch() {
    use ugit_lib::protocol::CancelToken;

    let remote = FakeRemote::new();
    remote.seed_commit("refs/heads/main", &[("a.txt", "a\n")], &[], 1262356920);

    let test_repo = TestRepo::init();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = commands::fetch(
        &test_repo.repo,
        FetchArgs {
            transport: Some(&remote),
            url: Some(&remote.url()),
            single_branch: Some("main".to_owned()),
            cancel: Some(cancel),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert_matches!(err.kind, ErrorKind::UserCanceled);
}
