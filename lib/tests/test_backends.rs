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

//! The same storage contract exercised against every backend variant.

use assert_matches::assert_matches;
use test_case::test_case;
use testutils::BackendKind;
use testutils::TestRepo;
use testutils::test_signature;
use ugit_lib::backend::BackendError;
use ugit_lib::backend::RefValue;
use ugit_lib::backend::ReflogEntry;
use ugit_lib::object::ObjectType;
use ugit_lib::object_id::HashKind;
use ugit_lib::object_id::Oid;

#[test_case(BackendKind::Memory ; "memory")]
#[test_case(BackendKind::Files ; "files")]
#[test_case(BackendKind::Sqlite ; "sqlite")]
fn test_object_store_contract(kind: BackendKind) {
    let test_repo = TestRepo::init_with_backend(kind);
    let backend = test_repo.repo.store().backend();

    let oid = backend.write_object(ObjectType::Blob, b"Hello, World!").unwrap();
    assert_eq!(oid.hex(), "b45ef6fec89518d314f546fd6c3025367b721684");
    // Idempotent rewrite.
    let again = backend.write_object(ObjectType::Blob, b"Hello, World!").unwrap();
    assert_eq!(again, oid);

    assert!(backend.has_object(&oid).unwrap());
    let (object_type, payload) = backend.read_object(&oid).unwrap();
    assert_eq!(object_type, ObjectType::Blob);
    assert_eq!(payload, b"Hello, World!");
    assert!(backend.list_object_oids().unwrap().contains(&oid));

    let missing = Oid::from_hex("00000000000000000000000000000000000000aa");
    assert!(!backend.has_object(&missing).unwrap());
    assert_matches!(
        backend.read_object(&missing),
        Err(BackendError::ObjectNotFound { .. })
    );
}

#[test_case(BackendKind::Memory ; "memory")]
#[test_case(BackendKind::Files ; "files")]
#[test_case(BackendKind::Sqlite ; "sqlite")]
fn test_ref_store_contract(kind: BackendKind) {
    let test_repo = TestRepo::init_with_backend(kind);
    let backend = test_repo.repo.store().backend();
    let oid = Oid::from_hex("1111111111111111111111111111111111111111");

    backend
        .write_ref("refs/heads/main", &RefValue::Direct(oid.clone()))
        .unwrap();
    backend
        .write_ref("refs/tags/v1", &RefValue::Direct(oid.clone()))
        .unwrap();
    assert_eq!(
        backend.read_ref("refs/heads/main").unwrap(),
        Some(RefValue::Direct(oid.clone()))
    );

    let heads: Vec<String> = backend
        .list_refs("refs/heads/")
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(heads, ["refs/heads/main"]);

    // HEAD exists (written by init) but never shows up in listings.
    assert!(backend.read_ref("HEAD").unwrap().is_some());
    let all: Vec<String> = backend
        .list_refs("")
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(all, ["refs/heads/main", "refs/tags/v1"]);

    backend.delete_ref("refs/tags/v1").unwrap();
    assert_eq!(backend.read_ref("refs/tags/v1").unwrap(), None);
}

#[test_case(BackendKind::Memory ; "memory")]
#[test_case(BackendKind::Files ; "files")]
#[test_case(BackendKind::Sqlite ; "sqlite")]
fn test_shallow_and_reflog_contract(kind: BackendKind) {
    let test_repo = TestRepo::init_with_backend(kind);
    let backend = test_repo.repo.store().backend();

    assert_eq!(backend.read_shallow().unwrap(), vec![]);
    let tip = Oid::from_hex("2222222222222222222222222222222222222222");
    backend.write_shallow(std::slice::from_ref(&tip)).unwrap();
    assert_eq!(backend.read_shallow().unwrap(), vec![tip.clone()]);
    backend.write_shallow(&[]).unwrap();
    assert_eq!(backend.read_shallow().unwrap(), vec![]);

    let entry = ReflogEntry {
        old_oid: Oid::zero(HashKind::Sha1),
        new_oid: tip,
        actor: test_signature(),
        message: "commit (initial): seeded".to_owned(),
    };
    backend.append_reflog("refs/heads/main", &entry).unwrap();
    assert_eq!(
        backend.read_reflog("refs/heads/main").unwrap(),
        vec![entry]
    );
    assert_eq!(backend.read_reflog("refs/heads/other").unwrap(), vec![]);
}

#[test_case(BackendKind::Memory ; "memory")]
#[test_case(BackendKind::Files ; "files")]
#[test_case(BackendKind::Sqlite ; "sqlite")]
fn test_index_and_config_round_trip(kind: BackendKind) {
    let test_repo = TestRepo::init_with_backend(kind);
    let backend = test_repo.repo.store().backend();

    assert!(backend.read_config().unwrap().len() > 0);
    backend.write_config(b"[user]\n\tname = Mr. Test\n").unwrap();
    assert_eq!(
        backend.read_config().unwrap(),
        b"[user]\n\tname = Mr. Test\n"
    );

    assert_eq!(backend.read_index().unwrap(), None);
    backend.write_index(b"DIRC-not-really").unwrap();
    assert_eq!(backend.read_index().unwrap(), Some(b"DIRC-not-really".to_vec()));
}

/// Packs stored under `objects/pack` are readable through the normal
/// object API, and `index_pack` builds the `.idx` for a bare pack file.
#[test]
fn test_filesystem_pack_storage() {
    use ugit_lib::commands;
    use ugit_lib::object::hash_object;
    use ugit_lib::pack;

    let test_repo = TestRepo::init_with_backend(BackendKind::Files);
    let backend = test_repo.repo.store().backend().clone();

    let payloads: Vec<Vec<u8>> = (0..3)
        .map(|i| format!("packed payload {i}").into_bytes())
        .collect();
    let objects: Vec<_> = payloads
        .iter()
        .map(|payload| {
            (
                hash_object(HashKind::Sha1, ObjectType::Blob, payload),
                ObjectType::Blob,
                payload.clone(),
            )
        })
        .collect();
    let built = pack::build_pack(&objects, HashKind::Sha1, pack::DEFAULT_DELTA_WINDOW);

    // Store only the .pack and let the indexPack command derive the idx.
    let pack_rel = format!("objects/pack/pack-{}.pack", built.trailer_hex);
    std::fs::write(test_repo.gitdir().join(&pack_rel), &built.data).unwrap();
    let indexed = commands::index_pack(&test_repo.repo, &pack_rel).unwrap();
    assert_eq!(indexed.len(), objects.len());
    assert!(test_repo
        .gitdir()
        .join(format!("objects/pack/pack-{}.idx", built.trailer_hex))
        .exists());

    // No loose copies exist, so reads go through the pack.
    for (oid, _, payload) in &objects {
        let (object_type, read_back) = backend.read_object(oid).unwrap();
        assert_eq!(object_type, ObjectType::Blob);
        assert_eq!(&read_back, payload);
    }
    let listed = backend.list_object_oids().unwrap();
    for (oid, ..) in &objects {
        assert!(listed.contains(oid));
    }
}
