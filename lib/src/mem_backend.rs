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

//! A map-backed storage substrate. The natural choice for tests and for
//! hosts without a filesystem.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::backend::Backend;
use crate::backend::BackendResult;
use crate::backend::RefValue;
use crate::backend::ReflogEntry;
use crate::object::ObjectType;
use crate::object::hash_object;
use crate::object_id::HashKind;
use crate::object_id::Oid;

#[derive(Debug, Default)]
struct Tables {
    objects: HashMap<Oid, (ObjectType, Vec<u8>)>,
    refs: BTreeMap<String, RefValue>,
    index: Option<Vec<u8>>,
    shallow: Vec<Oid>,
    reflogs: HashMap<String, Vec<ReflogEntry>>,
    config: Vec<u8>,
}

#[derive(Debug)]
pub struct MemBackend {
    hash_kind: HashKind,
    label: String,
    tables: Mutex<Tables>,
}

impl MemBackend {
    pub fn init(hash_kind: HashKind) -> Self {
        Self {
            hash_kind,
            label: "(in-memory)".to_owned(),
            tables: Mutex::new(Tables::default()),
        }
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }
}

impl Backend for MemBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn hash_kind(&self) -> HashKind {
        self.hash_kind
    }

    fn gitdir(&self) -> &str {
        &self.label
    }

    fn write_object(&self, object_type: ObjectType, payload: &[u8]) -> BackendResult<Oid> {
        let oid = hash_object(self.hash_kind, object_type, payload);
        self.tables()
            .objects
            .entry(oid.clone())
            .or_insert_with(|| (object_type, payload.to_vec()));
        Ok(oid)
    }

    fn read_object(&self, oid: &Oid) -> BackendResult<(ObjectType, Vec<u8>)> {
        self.tables()
            .objects
            .get(oid)
            .cloned()
            .ok_or_else(|| crate::backend::BackendError::ObjectNotFound { hash: oid.hex() })
    }

    fn has_object(&self, oid: &Oid) -> BackendResult<bool> {
        Ok(self.tables().objects.contains_key(oid))
    }

    fn list_object_oids(&self) -> BackendResult<Vec<Oid>> {
        Ok(self.tables().objects.keys().cloned().collect())
    }

    fn read_ref(&self, name: &str) -> BackendResult<Option<RefValue>> {
        Ok(self.tables().refs.get(name).cloned())
    }

    fn write_ref(&self, name: &str, value: &RefValue) -> BackendResult<()> {
        self.tables().refs.insert(name.to_owned(), value.clone());
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> BackendResult<()> {
        self.tables().refs.remove(name);
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> BackendResult<Vec<(String, RefValue)>> {
        Ok(self
            .tables()
            .refs
            .range(prefix.to_owned()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .filter(|(name, _)| name.starts_with("refs/"))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    fn pack_refs(&self, _prune: bool) -> BackendResult<()> {
        // The map is the only representation; nothing to fold.
        Ok(())
    }

    fn packed_ref_peel(&self, _name: &str) -> BackendResult<Option<Oid>> {
        Ok(None)
    }

    fn read_index(&self) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.tables().index.clone())
    }

    fn write_index(&self, data: &[u8]) -> BackendResult<()> {
        self.tables().index = Some(data.to_vec());
        Ok(())
    }

    fn read_shallow(&self) -> BackendResult<Vec<Oid>> {
        Ok(self.tables().shallow.clone())
    }

    fn write_shallow(&self, oids: &[Oid]) -> BackendResult<()> {
        self.tables().shallow = oids.to_vec();
        Ok(())
    }

    fn append_reflog(&self, name: &str, entry: &ReflogEntry) -> BackendResult<()> {
        self.tables()
            .reflogs
            .entry(name.to_owned())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn read_reflog(&self, name: &str) -> BackendResult<Vec<ReflogEntry>> {
        Ok(self.tables().reflogs.get(name).cloned().unwrap_or_default())
    }

    fn read_config(&self) -> BackendResult<Vec<u8>> {
        Ok(self.tables().config.clone())
    }

    fn write_config(&self, data: &[u8]) -> BackendResult<()> {
        self.tables().config = data.to_vec();
        Ok(())
    }
}
