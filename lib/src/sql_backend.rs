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

//! A SQLite-backed storage substrate.
//!
//! Object payloads are authoritative in the `objects` table; `tree_entries`
//! and `commit_parents` are maintained as queryable projections of the
//! same payloads.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use rusqlite::OptionalExtension as _;
use rusqlite::params;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::RefValue;
use crate::backend::ReflogEntry;
use crate::object::Object;
use crate::object::ObjectType;
use crate::object::Signature;
use crate::object::hash_object;
use crate::object_id::HashKind;
use crate::object_id::Oid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS objects (
    oid TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    data BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS tree_entries (
    tree_oid TEXT NOT NULL,
    pos INTEGER NOT NULL,
    mode INTEGER NOT NULL,
    name BLOB NOT NULL,
    target_oid TEXT NOT NULL,
    PRIMARY KEY (tree_oid, pos)
);
CREATE TABLE IF NOT EXISTS commit_parents (
    commit_oid TEXT NOT NULL,
    pos INTEGER NOT NULL,
    parent_oid TEXT NOT NULL,
    PRIMARY KEY (commit_oid, pos)
);
CREATE TABLE IF NOT EXISTS refs (
    name TEXT PRIMARY KEY,
    target_oid TEXT,
    symbolic_target TEXT
);
CREATE TABLE IF NOT EXISTS shallow (oid TEXT PRIMARY KEY);
CREATE TABLE IF NOT EXISTS reflog (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    ref_name TEXT NOT NULL,
    old_oid TEXT NOT NULL,
    new_oid TEXT NOT NULL,
    actor_name TEXT NOT NULL,
    actor_email TEXT NOT NULL,
    actor_timestamp INTEGER NOT NULL,
    actor_tz_offset INTEGER NOT NULL,
    message TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value BLOB NOT NULL);
";

fn to_backend_err(err: rusqlite::Error) -> BackendError {
    BackendError::Other(err.into())
}

#[derive(Debug)]
pub struct SqlBackend {
    hash_kind: HashKind,
    label: String,
    conn: Mutex<Connection>,
}

impl SqlBackend {
    pub fn init(db_path: &Path, hash_kind: HashKind) -> BackendResult<Self> {
        let conn = Connection::open(db_path).map_err(to_backend_err)?;
        Self::init_with_connection(conn, db_path.to_string_lossy().into_owned(), hash_kind)
    }

    pub fn init_in_memory(hash_kind: HashKind) -> BackendResult<Self> {
        let conn = Connection::open_in_memory().map_err(to_backend_err)?;
        Self::init_with_connection(conn, "(sqlite-memory)".to_owned(), hash_kind)
    }

    fn init_with_connection(
        conn: Connection,
        label: String,
        hash_kind: HashKind,
    ) -> BackendResult<Self> {
        conn.execute_batch(SCHEMA).map_err(to_backend_err)?;
        Ok(Self {
            hash_kind,
            label,
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Refreshes the relational projections for a newly stored object.
    fn project_object(
        &self,
        conn: &Connection,
        oid: &Oid,
        object_type: ObjectType,
        payload: &[u8],
    ) -> BackendResult<()> {
        let parsed = match Object::parse(object_type, payload, self.hash_kind) {
            Ok(parsed) => parsed,
            // Projections are best-effort; the payload row stays
            // authoritative.
            Err(_) => return Ok(()),
        };
        match parsed {
            Object::Tree(tree) => {
                for (pos, entry) in tree.entries().iter().enumerate() {
                    conn.execute(
                        "INSERT OR REPLACE INTO tree_entries \
                         (tree_oid, pos, mode, name, target_oid) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            oid.hex(),
                            pos as i64,
                            i64::from(entry.mode.as_u32()),
                            entry.name.as_slice(),
                            entry.oid.hex(),
                        ],
                    )
                    .map_err(to_backend_err)?;
                }
            }
            Object::Commit(commit) => {
                for (pos, parent) in commit.parents.iter().enumerate() {
                    conn.execute(
                        "INSERT OR REPLACE INTO commit_parents \
                         (commit_oid, pos, parent_oid) VALUES (?1, ?2, ?3)",
                        params![oid.hex(), pos as i64, parent.hex()],
                    )
                    .map_err(to_backend_err)?;
                }
            }
            Object::Blob(_) | Object::Tag(_) => {}
        }
        Ok(())
    }
}

impl Backend for SqlBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn hash_kind(&self) -> HashKind {
        self.hash_kind
    }

    fn gitdir(&self) -> &str {
        &self.label
    }

    fn write_object(&self, object_type: ObjectType, payload: &[u8]) -> BackendResult<Oid> {
        let oid = hash_object(self.hash_kind, object_type, payload);
        let conn = self.conn();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO objects (oid, type, data) VALUES (?1, ?2, ?3)",
                params![oid.hex(), object_type.name(), payload],
            )
            .map_err(to_backend_err)?;
        if inserted > 0 {
            self.project_object(&conn, &oid, object_type, payload)?;
        }
        Ok(oid)
    }

    fn read_object(&self, oid: &Oid) -> BackendResult<(ObjectType, Vec<u8>)> {
        let row: Option<(String, Vec<u8>)> = self
            .conn()
            .query_row(
                "SELECT type, data FROM objects WHERE oid = ?1",
                params![oid.hex()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(to_backend_err)?;
        let (type_name, data) =
            row.ok_or_else(|| BackendError::ObjectNotFound { hash: oid.hex() })?;
        let object_type = ObjectType::from_name(&type_name).ok_or_else(|| BackendError::Corrupt {
            what: format!("object {}", oid.hex()),
            reason: format!("unknown type {type_name:?}"),
        })?;
        Ok((object_type, data))
    }

    fn has_object(&self, oid: &Oid) -> BackendResult<bool> {
        let count: i64 = self
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM objects WHERE oid = ?1",
                params![oid.hex()],
                |row| row.get(0),
            )
            .map_err(to_backend_err)?;
        Ok(count > 0)
    }

    fn list_object_oids(&self) -> BackendResult<Vec<Oid>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT oid FROM objects ORDER BY oid")
            .map_err(to_backend_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(to_backend_err)?;
        let mut oids = vec![];
        for row in rows {
            let hex = row.map_err(to_backend_err)?;
            oids.push(Oid::try_from_hex(&hex).ok_or_else(|| BackendError::Corrupt {
                what: "objects table".to_owned(),
                reason: format!("bad oid {hex:?}"),
            })?);
        }
        Ok(oids)
    }

    fn read_ref(&self, name: &str) -> BackendResult<Option<RefValue>> {
        let row: Option<(Option<String>, Option<String>)> = self
            .conn()
            .query_row(
                "SELECT target_oid, symbolic_target FROM refs WHERE name = ?1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(to_backend_err)?;
        match row {
            None => Ok(None),
            Some((Some(hex), _)) => {
                let oid = Oid::try_from_hex(&hex).ok_or_else(|| BackendError::Corrupt {
                    what: format!("ref {name}"),
                    reason: "bad object id".to_owned(),
                })?;
                Ok(Some(RefValue::Direct(oid)))
            }
            Some((None, Some(target))) => Ok(Some(RefValue::Symbolic(target))),
            Some((None, None)) => Err(BackendError::Corrupt {
                what: format!("ref {name}"),
                reason: "row has neither target".to_owned(),
            }),
        }
    }

    fn write_ref(&self, name: &str, value: &RefValue) -> BackendResult<()> {
        let (target_oid, symbolic) = match value {
            RefValue::Direct(oid) => (Some(oid.hex()), None),
            RefValue::Symbolic(target) => (None, Some(target.clone())),
        };
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO refs (name, target_oid, symbolic_target) \
                 VALUES (?1, ?2, ?3)",
                params![name, target_oid, symbolic],
            )
            .map_err(to_backend_err)?;
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> BackendResult<()> {
        self.conn()
            .execute("DELETE FROM refs WHERE name = ?1", params![name])
            .map_err(to_backend_err)?;
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> BackendResult<Vec<(String, RefValue)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT name, target_oid, symbolic_target FROM refs \
                 WHERE name LIKE ?1 || '%' AND name LIKE 'refs/%' ORDER BY name",
            )
            .map_err(to_backend_err)?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(to_backend_err)?;
        let mut out = vec![];
        for row in rows {
            let (name, target_oid, symbolic) = row.map_err(to_backend_err)?;
            let value = match (target_oid, symbolic) {
                (Some(hex), _) => {
                    RefValue::Direct(Oid::try_from_hex(&hex).ok_or_else(|| {
                        BackendError::Corrupt {
                            what: format!("ref {name}"),
                            reason: "bad object id".to_owned(),
                        }
                    })?)
                }
                (None, Some(target)) => RefValue::Symbolic(target),
                (None, None) => continue,
            };
            out.push((name, value));
        }
        Ok(out)
    }

    fn pack_refs(&self, _prune: bool) -> BackendResult<()> {
        // A table has no loose/packed split.
        Ok(())
    }

    fn packed_ref_peel(&self, _name: &str) -> BackendResult<Option<Oid>> {
        Ok(None)
    }

    fn read_index(&self) -> BackendResult<Option<Vec<u8>>> {
        self.conn()
            .query_row(
                "SELECT value FROM meta WHERE key = 'index'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_backend_err)
    }

    fn write_index(&self, data: &[u8]) -> BackendResult<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('index', ?1)",
                params![data],
            )
            .map_err(to_backend_err)?;
        Ok(())
    }

    fn read_shallow(&self) -> BackendResult<Vec<Oid>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT oid FROM shallow ORDER BY oid")
            .map_err(to_backend_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(to_backend_err)?;
        let mut oids = vec![];
        for row in rows {
            let hex = row.map_err(to_backend_err)?;
            oids.push(Oid::try_from_hex(&hex).ok_or_else(|| BackendError::Corrupt {
                what: "shallow table".to_owned(),
                reason: format!("bad oid {hex:?}"),
            })?);
        }
        Ok(oids)
    }

    fn write_shallow(&self, oids: &[Oid]) -> BackendResult<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM shallow", [])
            .map_err(to_backend_err)?;
        for oid in oids {
            conn.execute(
                "INSERT OR IGNORE INTO shallow (oid) VALUES (?1)",
                params![oid.hex()],
            )
            .map_err(to_backend_err)?;
        }
        Ok(())
    }

    fn append_reflog(&self, name: &str, entry: &ReflogEntry) -> BackendResult<()> {
        self.conn()
            .execute(
                "INSERT INTO reflog (ref_name, old_oid, new_oid, actor_name, actor_email, \
                 actor_timestamp, actor_tz_offset, message) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    name,
                    entry.old_oid.hex(),
                    entry.new_oid.hex(),
                    entry.actor.name,
                    entry.actor.email,
                    entry.actor.timestamp,
                    i64::from(entry.actor.tz_offset_minutes),
                    entry.message,
                ],
            )
            .map_err(to_backend_err)?;
        Ok(())
    }

    fn read_reflog(&self, name: &str) -> BackendResult<Vec<ReflogEntry>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT old_oid, new_oid, actor_name, actor_email, actor_timestamp, \
                 actor_tz_offset, message FROM reflog WHERE ref_name = ?1 ORDER BY seq",
            )
            .map_err(to_backend_err)?;
        let rows = stmt
            .query_map(params![name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(to_backend_err)?;
        let mut entries = vec![];
        for row in rows {
            let (old_hex, new_hex, actor_name, actor_email, timestamp, tz, message) =
                row.map_err(to_backend_err)?;
            let corrupt = || BackendError::Corrupt {
                what: format!("reflog for {name}"),
                reason: "bad object id".to_owned(),
            };
            entries.push(ReflogEntry {
                old_oid: Oid::try_from_hex(&old_hex).ok_or_else(corrupt)?,
                new_oid: Oid::try_from_hex(&new_hex).ok_or_else(corrupt)?,
                actor: Signature::new(actor_name, actor_email, timestamp, tz as i32),
                message,
            });
        }
        Ok(entries)
    }

    fn read_config(&self) -> BackendResult<Vec<u8>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM meta WHERE key = 'config'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(to_backend_err)?
            .unwrap_or_default())
    }

    fn write_config(&self, data: &[u8]) -> BackendResult<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('config', ?1)",
                params![data],
            )
            .map_err(to_backend_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_round_trip_and_projection() {
        let backend = SqlBackend::init_in_memory(HashKind::Sha1).unwrap();
        let blob_oid = backend.write_object(ObjectType::Blob, b"Hello, World!").unwrap();
        assert_eq!(blob_oid.hex(), "b45ef6fec89518d314f546fd6c3025367b721684");

        let tree_payload = {
            let mut data = b"100644 hello.md\0".to_vec();
            data.extend_from_slice(blob_oid.as_bytes());
            data
        };
        let tree_oid = backend.write_object(ObjectType::Tree, &tree_payload).unwrap();
        let (object_type, payload) = backend.read_object(&tree_oid).unwrap();
        assert_eq!(object_type, ObjectType::Tree);
        assert_eq!(payload, tree_payload);

        let count: i64 = backend
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM tree_entries WHERE tree_oid = ?1",
                params![tree_oid.hex()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_refs_and_reflog() {
        let backend = SqlBackend::init_in_memory(HashKind::Sha1).unwrap();
        let oid = Oid::from_hex("1111111111111111111111111111111111111111");
        backend
            .write_ref("refs/heads/main", &RefValue::Direct(oid.clone()))
            .unwrap();
        backend
            .write_ref("HEAD", &RefValue::Symbolic("refs/heads/main".to_owned()))
            .unwrap();
        assert_eq!(
            backend.read_ref("refs/heads/main").unwrap(),
            Some(RefValue::Direct(oid.clone()))
        );
        // HEAD is addressable but not listed.
        let listed = backend.list_refs("").unwrap();
        assert_eq!(listed.len(), 1);

        let entry = ReflogEntry {
            old_oid: Oid::zero(HashKind::Sha1),
            new_oid: oid,
            actor: Signature::new("Mr. Test", "mrtest@example.com", 1262356920, 0),
            message: "branch: created".to_owned(),
        };
        backend.append_reflog("refs/heads/main", &entry).unwrap();
        assert_eq!(backend.read_reflog("refs/heads/main").unwrap(), vec![entry]);
    }
}
