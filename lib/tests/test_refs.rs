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

//! Ref behavior over the real on-disk layout: loose files, packed-refs,
//! and reflog lines.

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use testutils::BackendKind;
use testutils::TestRepo;
use ugit_lib::backend::RefValue;
use ugit_lib::commands;
use ugit_lib::commands::CommandError;
use ugit_lib::commands::ErrorKind;

#[test]
fn test_head_file_and_loose_ref_layout() {
    let test_repo = TestRepo::init_with_backend(BackendKind::Files);
    let repo = &test_repo.repo;
    let commit_oid = test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);

    let gitdir = test_repo.gitdir();
    assert_eq!(
        std::fs::read_to_string(gitdir.join("HEAD")).unwrap(),
        "ref: refs/heads/main\n"
    );
    assert_eq!(
        std::fs::read_to_string(gitdir.join("refs/heads/main")).unwrap(),
        format!("{}\n", commit_oid.hex())
    );
}

#[test]
fn test_reflog_line_format() {
    let test_repo = TestRepo::init_with_backend(BackendKind::Files);
    let commit_oid = test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);

    let gitdir = test_repo.gitdir();
    let log = std::fs::read_to_string(gitdir.join("logs/refs/heads/main")).unwrap();
    let expected = format!(
        "{} {} Mr. Test <mrtest@example.com> 1262356920 +0000\tcommit: first\n",
        "0".repeat(40),
        commit_oid.hex(),
    );
    assert_eq!(log, expected);
    // HEAD gets the same entry because it points at the branch.
    assert_eq!(
        std::fs::read_to_string(gitdir.join("logs/HEAD")).unwrap(),
        expected
    );
}

#[test]
fn test_reflog_disabled_by_config() {
    let test_repo = TestRepo::init_with_backend(BackendKind::Files);
    let repo = &test_repo.repo;
    commands::set_config(repo, "core.logAllRefUpdates", Some("false")).unwrap();
    test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);
    assert_eq!(commands::read_reflog(repo, "refs/heads/main").unwrap(), vec![]);
}

#[test]
fn test_pack_refs_then_read_through() {
    let test_repo = TestRepo::init_with_backend(BackendKind::Files);
    let repo = &test_repo.repo;
    let commit_oid = test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);
    commands::tag(repo, "v1", None, false).unwrap();

    commands::pack_refs(repo, true).unwrap();
    let gitdir = test_repo.gitdir();
    assert!(!gitdir.join("refs/heads/main").exists());
    let packed = std::fs::read_to_string(gitdir.join("packed-refs")).unwrap();
    assert!(packed.contains("refs/heads/main"));
    assert!(packed.contains("refs/tags/v1"));

    // Reads keep working through the packed table.
    assert_eq!(commands::resolve_ref(repo, "main").unwrap(), commit_oid);
    assert_eq!(commands::list_branches(repo, None).unwrap(), ["main"]);

    // A new write shadows the packed row.
    let second = test_repo.commit_files(&[("a.txt", "a2")], "second", 1262356930);
    assert_eq!(commands::resolve_ref(repo, "main").unwrap(), second);
}

#[test]
fn test_packed_refs_peel_annotated_tags() {
    let test_repo = TestRepo::init_with_backend(BackendKind::Files);
    let repo = &test_repo.repo;
    let commit_oid = test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);
    let tag_oid = commands::annotated_tag(
        repo,
        "v1",
        "release",
        None,
        Some(testutils::test_signature()),
        false,
    )
    .unwrap();

    commands::pack_refs(repo, true).unwrap();
    let packed = std::fs::read_to_string(test_repo.gitdir().join("packed-refs")).unwrap();
    assert!(packed.contains(&format!("{} refs/tags/v1", tag_oid.hex())));
    assert!(packed.contains(&format!("^{}", commit_oid.hex())));
    assert_eq!(
        repo.store()
            .backend()
            .packed_ref_peel("refs/tags/v1")
            .unwrap(),
        Some(commit_oid)
    );
}

#[test]
fn test_write_and_delete_ref_commands() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    let commit_oid = test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);

    commands::write_ref(repo, "refs/custom/pin", &commit_oid.hex(), false).unwrap();
    assert_eq!(commands::resolve_ref(repo, "refs/custom/pin").unwrap(), commit_oid);
    assert_matches!(
        commands::write_ref(repo, "refs/custom/pin", &commit_oid.hex(), false),
        Err(CommandError {
            kind: ErrorKind::AlreadyExists { .. },
            ..
        })
    );
    commands::delete_ref(repo, "refs/custom/pin").unwrap();
    assert_matches!(
        commands::resolve_ref(repo, "refs/custom/pin"),
        Err(CommandError {
            kind: ErrorKind::NotFound { .. },
            ..
        })
    );

    // Invalid names are rejected before touching storage.
    assert_matches!(
        commands::write_ref(repo, "refs/heads/bad..name", &commit_oid.hex(), false),
        Err(CommandError {
            kind: ErrorKind::InvalidRefName { .. },
            ..
        })
    );
}

#[test]
fn test_expand_ref_lookup_order() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);
    commands::tag(repo, "v1", None, false).unwrap();

    assert_eq!(commands::expand_ref(repo, "main").unwrap(), "refs/heads/main");
    assert_eq!(commands::expand_ref(repo, "v1").unwrap(), "refs/tags/v1");
    assert_eq!(commands::expand_ref(repo, "HEAD").unwrap(), "HEAD");
    assert_eq!(
        commands::expand_ref(repo, "refs/heads/main").unwrap(),
        "refs/heads/main"
    );
    assert_matches!(
        commands::expand_ref(repo, "nope"),
        Err(CommandError {
            kind: ErrorKind::NotFound { .. },
            ..
        })
    );
}

#[test]
fn test_read_ref_returns_symbolic_values() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    assert_eq!(
        commands::read_ref(repo, "HEAD").unwrap(),
        Some(RefValue::Symbolic("refs/heads/main".to_owned()))
    );
    assert_eq!(commands::read_ref(repo, "refs/heads/main").unwrap(), None);
}

#[test]
fn test_rename_branch_command_moves_head() {
    let test_repo = TestRepo::init();
    let repo = &test_repo.repo;
    test_repo.commit_files(&[("a.txt", "a")], "first", 1262356920);
    commands::rename_branch(repo, "main", "trunk", false).unwrap();
    assert_eq!(
        commands::current_branch(repo, true).unwrap().as_deref(),
        Some("refs/heads/trunk")
    );
    assert_eq!(commands::list_branches(repo, None).unwrap(), ["trunk"]);
}
