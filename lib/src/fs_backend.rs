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

//! The standard on-disk `.git` layout: loose and packed objects, loose
//! refs shadowing `packed-refs`, reflogs under `logs/`, and the usual
//! single-file keys (`index`, `config`, `shallow`).

use std::fs;
use std::io::Read as _;
use std::io::Write as _;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tempfile::NamedTempFile;

use crate::backend::Backend;
use crate::backend::BackendError;
use crate::backend::BackendResult;
use crate::backend::PackedRef;
use crate::backend::RefValue;
use crate::backend::ReflogEntry;
use crate::file_util::create_or_reuse_dir;
use crate::file_util::persist_content_addressed_temp_file;
use crate::file_util::persist_temp_file;
use crate::object::ObjectType;
use crate::object::Signature;
use crate::object::hash_object;
use crate::object_id::HashKind;
use crate::object_id::Oid;
use crate::pack;
use crate::pack::PackIndex;

fn to_other_err(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> BackendError {
    BackendError::Other(err.into())
}

fn read_key_err(what: impl Into<String>) -> impl FnOnce(std::io::Error) -> BackendError {
    let what = what.into();
    move |err| BackendError::ReadKey {
        what,
        source: err.into(),
    }
}

fn write_key_err(what: impl Into<String>) -> impl FnOnce(std::io::Error) -> BackendError {
    let what = what.into();
    move |err| BackendError::WriteKey {
        what,
        source: err.into(),
    }
}

struct PackHandle {
    index: PackIndex,
    pack_path: PathBuf,
}

impl std::fmt::Debug for PackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackHandle")
            .field("pack_path", &self.pack_path)
            .finish()
    }
}

#[derive(Debug)]
pub struct FsBackend {
    gitdir: PathBuf,
    gitdir_str: String,
    hash_kind: HashKind,
    // Parsed .idx files; rebuilt after a new pack lands. Handles are
    // shared out under an Arc so object reads can recurse into delta
    // bases without holding the cache lock.
    packs: Mutex<Option<Arc<Vec<PackHandle>>>>,
}

impl FsBackend {
    /// Creates the `.git` skeleton and returns a backend over it.
    pub fn init(gitdir: &Path, hash_kind: HashKind) -> BackendResult<Self> {
        fs::create_dir_all(gitdir).map_err(to_other_err)?;
        for dir in [
            "objects",
            "objects/pack",
            "objects/info",
            "refs",
            "refs/heads",
            "refs/tags",
            "logs",
            "logs/refs",
        ] {
            create_or_reuse_dir(&gitdir.join(dir)).map_err(to_other_err)?;
        }
        Self::load(gitdir, hash_kind)
    }

    pub fn load(gitdir: &Path, hash_kind: HashKind) -> BackendResult<Self> {
        let gitdir_str = gitdir.to_string_lossy().replace('\\', "/");
        Ok(Self {
            gitdir: gitdir.to_path_buf(),
            gitdir_str,
            hash_kind,
            packs: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.gitdir
    }

    fn loose_object_path(&self, oid: &Oid) -> PathBuf {
        let hex = oid.hex();
        self.gitdir
            .join("objects")
            .join(&hex[..2])
            .join(&hex[2..])
    }

    fn read_loose_object(&self, oid: &Oid) -> BackendResult<Option<(ObjectType, Vec<u8>)>> {
        let path = self.loose_object_path(oid);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(BackendError::ReadObject {
                    hash: oid.hex(),
                    source: err.into(),
                });
            }
        };
        let mut data = vec![];
        ZlibDecoder::new(&compressed[..])
            .read_to_end(&mut data)
            .map_err(|err| BackendError::ReadObject {
                hash: oid.hex(),
                source: err.into(),
            })?;
        let corrupt = |reason: &str| BackendError::Corrupt {
            what: format!("object {}", oid.hex()),
            reason: reason.to_owned(),
        };
        let nul = data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| corrupt("missing header terminator"))?;
        let header =
            std::str::from_utf8(&data[..nul]).map_err(|_| corrupt("header is not ASCII"))?;
        let (type_name, len) = header
            .split_once(' ')
            .ok_or_else(|| corrupt("header has no length"))?;
        let object_type =
            ObjectType::from_name(type_name).ok_or_else(|| corrupt("unknown object type"))?;
        let payload = data[nul + 1..].to_vec();
        if len.parse::<usize>().ok() != Some(payload.len()) {
            return Err(corrupt("header length does not match payload"));
        }
        if hash_object(self.hash_kind, object_type, &payload) != *oid {
            return Err(BackendError::ChecksumMismatch { hash: oid.hex() });
        }
        Ok(Some((object_type, payload)))
    }

    fn pack_handles(&self) -> BackendResult<Arc<Vec<PackHandle>>> {
        let mut guard = self.packs.lock().unwrap();
        if guard.is_none() {
            let mut handles = vec![];
            let pack_dir = self.gitdir.join("objects/pack");
            let entries = match fs::read_dir(&pack_dir) {
                Ok(entries) => entries.collect::<Result<Vec<_>, _>>().map_err(to_other_err)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => vec![],
                Err(err) => return Err(to_other_err(err)),
            };
            for entry in entries {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("idx") {
                    continue;
                }
                let idx_data = fs::read(&path).map_err(to_other_err)?;
                let index = PackIndex::parse(&idx_data, self.hash_kind)
                    .map_err(|err| BackendError::Corrupt {
                        what: path.to_string_lossy().into_owned(),
                        reason: err.to_string(),
                    })?;
                handles.push(PackHandle {
                    index,
                    pack_path: path.with_extension("pack"),
                });
            }
            *guard = Some(Arc::new(handles));
        }
        Ok(guard.as_ref().unwrap().clone())
    }

    fn read_packed_object(&self, oid: &Oid) -> BackendResult<Option<(ObjectType, Vec<u8>)>> {
        for pack in self.pack_handles()?.iter() {
            let Some(offset) = pack.index.offset_of(oid) else {
                continue;
            };
            let data = fs::read(&pack.pack_path).map_err(|err| BackendError::ReadObject {
                hash: oid.hex(),
                source: err.into(),
            })?;
            let lookup = |base: &Oid| self.read_object_inner(base).ok().flatten();
            let (object_type, payload) = pack::read_object_at(&data, offset, self.hash_kind, &lookup)
                .map_err(|err| BackendError::Corrupt {
                    what: pack.pack_path.to_string_lossy().into_owned(),
                    reason: err.to_string(),
                })?;
            return Ok(Some((object_type, payload)));
        }
        Ok(None)
    }

    fn read_object_inner(&self, oid: &Oid) -> BackendResult<Option<(ObjectType, Vec<u8>)>> {
        if let Some(found) = self.read_loose_object(oid)? {
            return Ok(Some(found));
        }
        self.read_packed_object(oid)
    }

    /// Drops the cached pack list so the next read rescans
    /// `objects/pack`. Needed after a pack or index file is written
    /// outside `add_pack`.
    pub fn refresh_packs(&self) {
        *self.packs.lock().unwrap() = None;
    }

    /// Stores a packfile and its index under `objects/pack` and refreshes
    /// the pack list and `objects/info/packs`.
    pub fn add_pack(&self, pack_data: &[u8], idx_data: &[u8], pack_hash: &str) -> BackendResult<()> {
        let pack_dir = self.gitdir.join("objects/pack");
        let base = format!("pack-{pack_hash}");
        for (ext, data) in [("pack", pack_data), ("idx", idx_data)] {
            let mut temp = NamedTempFile::new_in(&pack_dir).map_err(to_other_err)?;
            temp.write_all(data).map_err(to_other_err)?;
            persist_content_addressed_temp_file(temp, pack_dir.join(format!("{base}.{ext}")))
                .map_err(to_other_err)?;
        }
        *self.packs.lock().unwrap() = None;
        let mut listing = String::new();
        for pack in self.pack_handles()?.iter() {
            if let Some(file_name) = pack.pack_path.file_name() {
                listing.push_str(&format!("P {}\n", file_name.to_string_lossy()));
            }
        }
        listing.push('\n');
        fs::write(self.gitdir.join("objects/info/packs"), listing)
            .map_err(write_key_err("objects/info/packs"))?;
        Ok(())
    }

    fn packed_refs_path(&self) -> PathBuf {
        self.gitdir.join("packed-refs")
    }

    fn read_packed_refs(&self) -> BackendResult<Vec<PackedRef>> {
        let text = match fs::read_to_string(self.packed_refs_path()) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(read_key_err("packed-refs")(err)),
        };
        let mut refs: Vec<PackedRef> = vec![];
        for line in text.lines() {
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            if let Some(peeled) = line.strip_prefix('^') {
                let oid = Oid::try_from_hex(peeled).ok_or_else(|| BackendError::Corrupt {
                    what: "packed-refs".to_owned(),
                    reason: "bad peeled line".to_owned(),
                })?;
                if let Some(last) = refs.last_mut() {
                    last.peeled = Some(oid);
                }
                continue;
            }
            let (hex, name) = line.split_once(' ').ok_or_else(|| BackendError::Corrupt {
                what: "packed-refs".to_owned(),
                reason: "line has no ref name".to_owned(),
            })?;
            let oid = Oid::try_from_hex(hex).ok_or_else(|| BackendError::Corrupt {
                what: "packed-refs".to_owned(),
                reason: "bad object id".to_owned(),
            })?;
            refs.push(PackedRef {
                name: name.to_owned(),
                oid,
                peeled: None,
            });
        }
        Ok(refs)
    }

    fn write_packed_refs(&self, refs: &[PackedRef]) -> BackendResult<()> {
        let mut text = String::from("# pack-refs with: peeled fully-peeled sorted \n");
        for packed in refs {
            text.push_str(&format!("{} {}\n", packed.oid.hex(), packed.name));
            if let Some(peeled) = &packed.peeled {
                text.push_str(&format!("^{}\n", peeled.hex()));
            }
        }
        let mut temp = NamedTempFile::new_in(&self.gitdir).map_err(to_other_err)?;
        temp.write_all(text.as_bytes()).map_err(to_other_err)?;
        persist_temp_file(temp, self.packed_refs_path()).map_err(to_other_err)?;
        Ok(())
    }

    fn ref_path(&self, name: &str) -> PathBuf {
        self.gitdir.join(name)
    }

    fn read_loose_ref(&self, name: &str) -> BackendResult<Option<RefValue>> {
        let text = match fs::read_to_string(self.ref_path(name)) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(read_key_err(format!("ref {name}"))(err)),
        };
        let text = text.trim_end();
        if let Some(target) = text.strip_prefix("ref: ") {
            return Ok(Some(RefValue::Symbolic(target.to_owned())));
        }
        let oid = Oid::try_from_hex(text).ok_or_else(|| BackendError::Corrupt {
            what: format!("ref {name}"),
            reason: "not a hex object id".to_owned(),
        })?;
        Ok(Some(RefValue::Direct(oid)))
    }

    fn collect_loose_refs(
        &self,
        dir: &Path,
        prefix: &str,
        out: &mut Vec<String>,
    ) -> BackendResult<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(read_key_err(format!("refs under {prefix}"))(err)),
        };
        for entry in entries {
            let entry = entry.map_err(to_other_err)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let full = format!("{prefix}{name}");
            let file_type = entry.file_type().map_err(to_other_err)?;
            if file_type.is_dir() {
                self.collect_loose_refs(&entry.path(), &format!("{full}/"), out)?;
            } else if !name.ends_with(".lock") {
                out.push(full);
            }
        }
        Ok(())
    }

    fn reflog_path(&self, name: &str) -> PathBuf {
        self.gitdir.join("logs").join(name)
    }
}

impl Backend for FsBackend {
    fn name(&self) -> &str {
        "files"
    }

    fn hash_kind(&self) -> HashKind {
        self.hash_kind
    }

    fn gitdir(&self) -> &str {
        &self.gitdir_str
    }

    fn write_object(&self, object_type: ObjectType, payload: &[u8]) -> BackendResult<Oid> {
        let oid = hash_object(self.hash_kind, object_type, payload);
        let path = self.loose_object_path(&oid);
        if path.exists() || self.has_object(&oid)? {
            return Ok(oid);
        }
        let write_err = |err: std::io::Error| BackendError::WriteObject {
            object_type: object_type.name(),
            source: err.into(),
        };
        create_or_reuse_dir(path.parent().unwrap()).map_err(write_err)?;
        let temp =
            NamedTempFile::new_in(self.gitdir.join("objects")).map_err(write_err)?;
        let mut encoder = ZlibEncoder::new(temp, Compression::default());
        encoder
            .write_all(&crate::object::object_header(object_type, payload.len()))
            .map_err(write_err)?;
        encoder.write_all(payload).map_err(write_err)?;
        let temp = encoder.finish().map_err(write_err)?;
        persist_content_addressed_temp_file(temp, path).map_err(write_err)?;
        Ok(oid)
    }

    fn read_object(&self, oid: &Oid) -> BackendResult<(ObjectType, Vec<u8>)> {
        self.read_object_inner(oid)?
            .ok_or_else(|| BackendError::ObjectNotFound { hash: oid.hex() })
    }

    fn has_object(&self, oid: &Oid) -> BackendResult<bool> {
        if self.loose_object_path(oid).exists() {
            return Ok(true);
        }
        let packs = self.pack_handles()?;
        Ok(packs.iter().any(|p| p.index.offset_of(oid).is_some()))
    }

    fn list_object_oids(&self) -> BackendResult<Vec<Oid>> {
        let mut oids = vec![];
        let objects_dir = self.gitdir.join("objects");
        for entry in fs::read_dir(&objects_dir).map_err(to_other_err)? {
            let entry = entry.map_err(to_other_err)?;
            let fan = entry.file_name().to_string_lossy().into_owned();
            if fan.len() != 2 || !entry.file_type().map_err(to_other_err)?.is_dir() {
                continue;
            }
            for object in fs::read_dir(entry.path()).map_err(to_other_err)? {
                let object = object.map_err(to_other_err)?;
                let rest = object.file_name().to_string_lossy().into_owned();
                if let Some(oid) = Oid::try_from_hex(format!("{fan}{rest}")) {
                    oids.push(oid);
                }
            }
        }
        for pack in self.pack_handles()?.iter() {
            oids.extend(pack.index.oids().iter().cloned());
        }
        oids.sort();
        oids.dedup();
        Ok(oids)
    }

    fn read_ref(&self, name: &str) -> BackendResult<Option<RefValue>> {
        if let Some(value) = self.read_loose_ref(name)? {
            return Ok(Some(value));
        }
        Ok(self
            .read_packed_refs()?
            .into_iter()
            .find(|packed| packed.name == name)
            .map(|packed| RefValue::Direct(packed.oid)))
    }

    fn write_ref(&self, name: &str, value: &RefValue) -> BackendResult<()> {
        let path = self.ref_path(name);
        fs::create_dir_all(path.parent().unwrap()).map_err(write_key_err(format!("ref {name}")))?;
        let text = match value {
            RefValue::Direct(oid) => format!("{}\n", oid.hex()),
            RefValue::Symbolic(target) => format!("ref: {target}\n"),
        };
        let mut temp = NamedTempFile::new_in(path.parent().unwrap()).map_err(to_other_err)?;
        temp.write_all(text.as_bytes()).map_err(to_other_err)?;
        persist_temp_file(temp, path).map_err(to_other_err)?;
        Ok(())
    }

    fn delete_ref(&self, name: &str) -> BackendResult<()> {
        match fs::remove_file(self.ref_path(name)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(write_key_err(format!("ref {name}"))(err)),
        }
        let mut packed = self.read_packed_refs()?;
        let before = packed.len();
        packed.retain(|p| p.name != name);
        if packed.len() != before {
            self.write_packed_refs(&packed)?;
        }
        let _ = fs::remove_file(self.reflog_path(name));
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> BackendResult<Vec<(String, RefValue)>> {
        let mut names = vec![];
        self.collect_loose_refs(&self.gitdir.join("refs"), "refs/", &mut names)?;
        let mut out: Vec<(String, RefValue)> = vec![];
        for name in names {
            if !name.starts_with(prefix) {
                continue;
            }
            if let Some(value) = self.read_loose_ref(&name)? {
                out.push((name, value));
            }
        }
        for packed in self.read_packed_refs()? {
            if packed.name.starts_with(prefix)
                && !out.iter().any(|(name, _)| *name == packed.name)
            {
                out.push((packed.name, RefValue::Direct(packed.oid)));
            }
        }
        out.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(out)
    }

    fn pack_refs(&self, prune: bool) -> BackendResult<()> {
        let mut names = vec![];
        self.collect_loose_refs(&self.gitdir.join("refs"), "refs/", &mut names)?;
        let mut packed = self.read_packed_refs()?;
        for name in &names {
            let Some(RefValue::Direct(oid)) = self.read_loose_ref(name)? else {
                // Symbolic refs stay loose.
                continue;
            };
            let peeled = self.peel_for_packing(&oid)?;
            match packed.iter_mut().find(|p| p.name == *name) {
                Some(row) => {
                    row.oid = oid;
                    row.peeled = peeled;
                }
                None => packed.push(PackedRef {
                    name: name.clone(),
                    oid,
                    peeled,
                }),
            }
            if prune {
                fs::remove_file(self.ref_path(name))
                    .map_err(write_key_err(format!("ref {name}")))?;
            }
        }
        packed.sort_by(|a, b| a.name.cmp(&b.name));
        self.write_packed_refs(&packed)
    }

    fn packed_ref_peel(&self, name: &str) -> BackendResult<Option<Oid>> {
        Ok(self
            .read_packed_refs()?
            .into_iter()
            .find(|packed| packed.name == name)
            .and_then(|packed| packed.peeled))
    }

    fn read_index(&self) -> BackendResult<Option<Vec<u8>>> {
        match fs::read(self.gitdir.join("index")) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(read_key_err("index")(err)),
        }
    }

    fn write_index(&self, data: &[u8]) -> BackendResult<()> {
        let mut temp = NamedTempFile::new_in(&self.gitdir).map_err(to_other_err)?;
        temp.write_all(data).map_err(to_other_err)?;
        persist_temp_file(temp, self.gitdir.join("index")).map_err(to_other_err)?;
        Ok(())
    }

    fn read_shallow(&self) -> BackendResult<Vec<Oid>> {
        let text = match fs::read_to_string(self.gitdir.join("shallow")) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(read_key_err("shallow")(err)),
        };
        let mut oids = vec![];
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            oids.push(Oid::try_from_hex(line).ok_or_else(|| BackendError::Corrupt {
                what: "shallow".to_owned(),
                reason: "bad object id".to_owned(),
            })?);
        }
        Ok(oids)
    }

    fn write_shallow(&self, oids: &[Oid]) -> BackendResult<()> {
        let path = self.gitdir.join("shallow");
        if oids.is_empty() {
            match fs::remove_file(&path) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(write_key_err("shallow")(err)),
            }
        }
        let mut text = String::new();
        for oid in oids {
            text.push_str(&oid.hex());
            text.push('\n');
        }
        let mut temp = NamedTempFile::new_in(&self.gitdir).map_err(to_other_err)?;
        temp.write_all(text.as_bytes()).map_err(to_other_err)?;
        persist_temp_file(temp, path).map_err(to_other_err)?;
        Ok(())
    }

    fn append_reflog(&self, name: &str, entry: &ReflogEntry) -> BackendResult<()> {
        let path = self.reflog_path(name);
        fs::create_dir_all(path.parent().unwrap())
            .map_err(write_key_err(format!("reflog for {name}")))?;
        let actor = &entry.actor;
        // Reflog messages are single-line by construction.
        let message = entry.message.replace('\n', " ");
        let line = format!(
            "{} {} {} <{}> {} {}\t{}\n",
            entry.old_oid.hex(),
            entry.new_oid.hex(),
            actor.name,
            actor.email,
            actor.timestamp,
            actor.tz_string(),
            message,
        );
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_key_err(format!("reflog for {name}")))?;
        file.write_all(line.as_bytes())
            .map_err(write_key_err(format!("reflog for {name}")))?;
        Ok(())
    }

    fn read_reflog(&self, name: &str) -> BackendResult<Vec<ReflogEntry>> {
        let text = match fs::read_to_string(self.reflog_path(name)) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(read_key_err(format!("reflog for {name}"))(err)),
        };
        let corrupt = |reason: &str| BackendError::Corrupt {
            what: format!("reflog for {name}"),
            reason: reason.to_owned(),
        };
        let mut entries = vec![];
        for line in text.lines() {
            let (stamp, message) = line.split_once('\t').unwrap_or((line, ""));
            let mut fields = stamp.splitn(3, ' ');
            let old_oid = fields
                .next()
                .and_then(Oid::try_from_hex)
                .ok_or_else(|| corrupt("bad old id"))?;
            let new_oid = fields
                .next()
                .and_then(Oid::try_from_hex)
                .ok_or_else(|| corrupt("bad new id"))?;
            let identity = fields.next().ok_or_else(|| corrupt("missing identity"))?;
            let actor = parse_reflog_identity(identity).ok_or_else(|| corrupt("bad identity"))?;
            entries.push(ReflogEntry {
                old_oid,
                new_oid,
                actor,
                message: message.to_owned(),
            });
        }
        Ok(entries)
    }

    fn read_config(&self) -> BackendResult<Vec<u8>> {
        match fs::read(self.gitdir.join("config")) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
            Err(err) => Err(read_key_err("config")(err)),
        }
    }

    fn write_config(&self, data: &[u8]) -> BackendResult<()> {
        let mut temp = NamedTempFile::new_in(&self.gitdir).map_err(to_other_err)?;
        temp.write_all(data).map_err(to_other_err)?;
        persist_temp_file(temp, self.gitdir.join("config")).map_err(to_other_err)?;
        Ok(())
    }
}

impl FsBackend {
    /// Peels an annotated tag chain for a `^` line; non-tags pack without
    /// one.
    fn peel_for_packing(&self, oid: &Oid) -> BackendResult<Option<Oid>> {
        let mut current = oid.clone();
        let mut peeled = None;
        for _ in 0..10 {
            let Some((object_type, payload)) = self.read_object_inner(&current)? else {
                break;
            };
            if object_type != ObjectType::Tag {
                break;
            }
            let tag = crate::object::Object::parse(object_type, &payload, self.hash_kind)
                .map_err(|err| BackendError::Corrupt {
                    what: format!("object {}", current.hex()),
                    reason: err.to_string(),
                })?
                .into_tag()
                .unwrap();
            peeled = Some(tag.object.clone());
            current = tag.object;
        }
        Ok(peeled)
    }
}

/// Parses `Name <email> ts ±HHMM` from a reflog line.
fn parse_reflog_identity(identity: &str) -> Option<Signature> {
    let open = identity.find('<')?;
    let close = identity.find('>')?;
    let name = identity[..open].trim_end().to_owned();
    let email = identity[open + 1..close].to_owned();
    let mut rest = identity[close + 1..].split_whitespace();
    let timestamp: i64 = rest.next()?.parse().ok()?;
    let tz = rest.next()?;
    let sign = match tz.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let hours: i32 = tz.get(1..3)?.parse().ok()?;
    let minutes: i32 = tz.get(3..5)?.parse().ok()?;
    Some(Signature::new(
        name,
        email,
        timestamp,
        sign * (hours * 60 + minutes),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_backend() -> (tempfile::TempDir, FsBackend) {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::init(&temp_dir.path().join(".git"), HashKind::Sha1).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_loose_object_round_trip() {
        let (_temp, backend) = new_backend();
        let oid = backend.write_object(ObjectType::Blob, b"Hello, World!").unwrap();
        assert_eq!(oid.hex(), "b45ef6fec89518d314f546fd6c3025367b721684");
        assert!(backend.has_object(&oid).unwrap());
        let (object_type, payload) = backend.read_object(&oid).unwrap();
        assert_eq!(object_type, ObjectType::Blob);
        assert_eq!(payload, b"Hello, World!");
        // Loose file lands at objects/b4/5ef6...
        assert!(backend.path().join("objects/b4").exists());
    }

    #[test]
    fn test_loose_shadows_packed_ref() {
        let (_temp, backend) = new_backend();
        let loose = Oid::from_hex("1111111111111111111111111111111111111111");
        let stale = Oid::from_hex("2222222222222222222222222222222222222222");
        fs::write(
            backend.path().join("packed-refs"),
            format!("{} refs/heads/main\n", stale.hex()),
        )
        .unwrap();
        assert_eq!(
            backend.read_ref("refs/heads/main").unwrap(),
            Some(RefValue::Direct(stale.clone()))
        );
        backend
            .write_ref("refs/heads/main", &RefValue::Direct(loose.clone()))
            .unwrap();
        assert_eq!(
            backend.read_ref("refs/heads/main").unwrap(),
            Some(RefValue::Direct(loose))
        );
        let listed = backend.list_refs("refs/").unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn test_delete_ref_also_drops_packed_row() {
        let (_temp, backend) = new_backend();
        let oid = Oid::from_hex("1111111111111111111111111111111111111111");
        backend
            .write_ref("refs/heads/main", &RefValue::Direct(oid.clone()))
            .unwrap();
        backend.pack_refs(true).unwrap();
        assert_eq!(
            backend.read_ref("refs/heads/main").unwrap(),
            Some(RefValue::Direct(oid))
        );
        backend.delete_ref("refs/heads/main").unwrap();
        assert_eq!(backend.read_ref("refs/heads/main").unwrap(), None);
    }

    #[test]
    fn test_reflog_round_trip() {
        let (_temp, backend) = new_backend();
        let entry = ReflogEntry {
            old_oid: Oid::zero(HashKind::Sha1),
            new_oid: Oid::from_hex("1111111111111111111111111111111111111111"),
            actor: Signature::new("Mr. Test", "mrtest@example.com", 1262356920, -300),
            message: "commit (initial): first".to_owned(),
        };
        backend.append_reflog("HEAD", &entry).unwrap();
        backend.append_reflog("refs/heads/main", &entry).unwrap();
        assert_eq!(backend.read_reflog("HEAD").unwrap(), vec![entry.clone()]);
        assert_eq!(backend.read_reflog("refs/heads/main").unwrap(), vec![entry]);
    }

    #[test]
    fn test_shallow_round_trip() {
        let (_temp, backend) = new_backend();
        assert_eq!(backend.read_shallow().unwrap(), vec![]);
        let tip = Oid::from_hex("1111111111111111111111111111111111111111");
        backend.write_shallow(std::slice::from_ref(&tip)).unwrap();
        assert_eq!(backend.read_shallow().unwrap(), vec![tip]);
        backend.write_shallow(&[]).unwrap();
        assert_eq!(backend.read_shallow().unwrap(), vec![]);
        assert!(!backend.path().join("shallow").exists());
    }
}
