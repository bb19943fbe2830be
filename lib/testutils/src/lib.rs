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

//! Test fixtures: repositories over every backend variant, an in-memory
//! worktree filesystem, and a fake smart-HTTP remote good enough to
//! exercise the full wire client.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use bstr::BString;
use ugit_lib::backend::RefValue;
use ugit_lib::fs_backend::FsBackend;
use ugit_lib::mem_backend::MemBackend;
use ugit_lib::merge::write_tree_from_flat;
use ugit_lib::object::Commit;
use ugit_lib::object::FileMode;
use ugit_lib::object::Object;
use ugit_lib::object::ObjectType;
use ugit_lib::object_id::HashKind;
use ugit_lib::object_id::Oid;
use ugit_lib::pack;
use ugit_lib::protocol::HttpRequest;
use ugit_lib::protocol::HttpResponse;
use ugit_lib::protocol::Pkt;
use ugit_lib::protocol::PktReader;
use ugit_lib::protocol::PktWriter;
use ugit_lib::protocol::Transport;
use ugit_lib::protocol::TransportError;
use ugit_lib::repo::Repository;
use ugit_lib::repo_path::RepoPathBuf;
use ugit_lib::revwalk;
use ugit_lib::sql_backend::SqlBackend;
use ugit_lib::store::Store;
use ugit_lib::worktree::FileKind;
use ugit_lib::worktree::FileStat;
use ugit_lib::worktree::WorktreeFs;

pub use ugit_lib::object::Signature;

/// The fixed identity used in scenario tests.
pub fn test_signature() -> Signature {
    Signature::new("Mr. Test", "mrtest@example.com", 1262356920, 0)
}

pub fn signature_at(timestamp: i64) -> Signature {
    Signature::new("Mr. Test", "mrtest@example.com", timestamp, 0)
}

pub fn repo_path(path: &str) -> RepoPathBuf {
    RepoPathBuf::from_relative_string(path).unwrap()
}

// ---------------------------------------------------------------------
// In-memory worktree filesystem

/// A `WorktreeFs` over maps. Stat mtimes are a monotonically increasing
/// counter so the index's freshness shortcut behaves like a real clock.
#[derive(Debug, Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<RepoPathBuf, MemFile>>,
    clock: AtomicU32,
}

#[derive(Clone, Debug)]
struct MemFile {
    data: Vec<u8>,
    kind: FileKind,
    mtime: u32,
}

impl MemFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&self) -> u32 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl WorktreeFs for MemFs {
    fn read(&self, path: &RepoPathBuf) -> io::Result<Option<Vec<u8>>> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .get(path)
            .map(|file| file.data.clone()))
    }

    fn write(&self, path: &RepoPathBuf, data: &[u8], executable: bool) -> io::Result<()> {
        let kind = if executable {
            FileKind::Executable
        } else {
            FileKind::File
        };
        self.files.lock().unwrap().insert(
            path.clone(),
            MemFile {
                data: data.to_vec(),
                kind,
                mtime: self.tick(),
            },
        );
        Ok(())
    }

    fn write_symlink(&self, path: &RepoPathBuf, target: &[u8]) -> io::Result<()> {
        self.files.lock().unwrap().insert(
            path.clone(),
            MemFile {
                data: target.to_vec(),
                kind: FileKind::Symlink,
                mtime: self.tick(),
            },
        );
        Ok(())
    }

    fn remove(&self, path: &RepoPathBuf) -> io::Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn stat(&self, path: &RepoPathBuf) -> io::Result<FileStat> {
        Ok(match self.files.lock().unwrap().get(path) {
            None => FileStat::default(),
            Some(file) => FileStat {
                kind: Some(file.kind),
                size: file.data.len() as u64,
                mtime_secs: file.mtime,
                ..FileStat::default()
            },
        })
    }

    fn list_files(&self) -> io::Result<Vec<RepoPathBuf>> {
        Ok(self.files.lock().unwrap().keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------
// Test repositories

/// Which storage substrate a test repository uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Files,
    Sqlite,
}

pub struct TestRepo {
    pub repo: Repository,
    /// The worktree filesystem, shared with the repository.
    pub fs: Arc<dyn WorktreeFs>,
    _temp_dir: Option<tempfile::TempDir>,
}

impl TestRepo {
    /// An in-memory repository with an in-memory worktree.
    pub fn init() -> Self {
        Self::init_with_backend(BackendKind::Memory)
    }

    pub fn init_with_backend(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Memory => {
                let fs: Arc<dyn WorktreeFs> = Arc::new(MemFs::new());
                let backend = Arc::new(MemBackend::init(HashKind::Sha1));
                let repo = Repository::init(backend, Some(fs.clone()), "main").unwrap();
                Self {
                    repo,
                    fs,
                    _temp_dir: None,
                }
            }
            BackendKind::Files => {
                let temp_dir = tempfile::tempdir().unwrap();
                let repo = Repository::init_at(temp_dir.path()).unwrap();
                let fs = repo.worktree().unwrap().fs().clone();
                Self {
                    repo,
                    fs,
                    _temp_dir: Some(temp_dir),
                }
            }
            BackendKind::Sqlite => {
                let fs: Arc<dyn WorktreeFs> = Arc::new(MemFs::new());
                let backend = Arc::new(SqlBackend::init_in_memory(HashKind::Sha1).unwrap());
                let repo = Repository::init(backend, Some(fs.clone()), "main").unwrap();
                Self {
                    repo,
                    fs,
                    _temp_dir: None,
                }
            }
        }
    }

    /// The filesystem backend path, for tests that inspect the layout.
    pub fn gitdir(&self) -> std::path::PathBuf {
        let backend = self.repo.store().backend().clone();
        backend
            .as_ref()
            .downcast_ref::<FsBackend>()
            .expect("not a filesystem repository")
            .path()
            .to_path_buf()
    }

    pub fn write_file(&self, path: &str, content: &str) {
        self.fs
            .write(&repo_path(path), content.as_bytes(), false)
            .unwrap();
    }

    pub fn read_file(&self, path: &str) -> Option<String> {
        self.fs
            .read(&repo_path(path))
            .unwrap()
            .map(|data| String::from_utf8_lossy(&data).into_owned())
    }

    pub fn remove_file(&self, path: &str) {
        self.fs.remove(&repo_path(path)).unwrap();
    }

    /// Stages `files` and commits them with a deterministic identity.
    pub fn commit_files(&self, files: &[(&str, &str)], message: &str, timestamp: i64) -> Oid {
        for (path, content) in files {
            self.write_file(path, content);
        }
        let paths: Vec<&str> = files.iter().map(|(path, _)| *path).collect();
        if !paths.is_empty() {
            ugit_lib::commands::add(&self.repo, &paths).unwrap();
        }
        ugit_lib::commands::commit(
            &self.repo,
            ugit_lib::commands::CommitArgs {
                message: message.to_owned(),
                author: Some(signature_at(timestamp)),
                committer: Some(signature_at(timestamp)),
                ..Default::default()
            },
        )
        .unwrap()
    }
}

/// Writes a commit with the given files straight into a store, without
/// touching any index or worktree. Returns the commit id.
pub fn store_commit(
    store: &Store,
    files: &[(&str, &str)],
    parents: &[&Oid],
    timestamp: i64,
    message: &str,
) -> Oid {
    let mut flat = BTreeMap::new();
    for (path, content) in files {
        let oid = store.write_blob(content.as_bytes()).unwrap();
        flat.insert(repo_path(path), (FileMode::Blob, oid));
    }
    let tree = write_tree_from_flat(store, &flat).unwrap();
    store
        .write_object(&Object::Commit(Commit {
            tree,
            parents: parents.iter().map(|&oid| oid.clone()).collect(),
            author: signature_at(timestamp),
            committer: signature_at(timestamp),
            gpgsig: None,
            extra_headers: vec![],
            message: BString::from(format!("{message}\n")),
        }))
        .unwrap()
}

// ---------------------------------------------------------------------
// Fake smart-HTTP remote

/// An in-memory remote speaking protocol v1 smart HTTP: `info/refs`
/// advertisement, upload-pack with shallow/deepen and sideband, and
/// receive-pack with report-status.
pub struct FakeRemote {
    pub repo: Repository,
    auth: Option<(String, String)>,
    /// URLs of every request served, for assertions.
    pub requests: Mutex<Vec<String>>,
}

const REMOTE_URL: &str = "https://remote.example/repo.git";

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        let backend = Arc::new(MemBackend::init(HashKind::Sha1));
        let repo = Repository::init(backend, None, "main").unwrap();
        let mut config = repo.config().unwrap();
        config.set("core.bare", Some("true"));
        repo.write_config(&config).unwrap();
        Self {
            repo,
            auth: None,
            requests: Mutex::new(vec![]),
        }
    }

    pub fn with_auth(username: &str, password: &str) -> Self {
        let mut remote = Self::new();
        remote.auth = Some((username.to_owned(), password.to_owned()));
        remote
    }

    pub fn url(&self) -> String {
        REMOTE_URL.to_owned()
    }

    /// Seeds a server-side commit and points `ref_name` at it.
    pub fn seed_commit(
        &self,
        ref_name: &str,
        files: &[(&str, &str)],
        parents: &[&Oid],
        timestamp: i64,
    ) -> Oid {
        let oid = store_commit(self.repo.store(), files, parents, timestamp, "seeded");
        self.repo
            .store()
            .backend()
            .write_ref(ref_name, &RefValue::Direct(oid.clone()))
            .unwrap();
        oid
    }

    pub fn ref_target(&self, name: &str) -> Option<Oid> {
        match self.repo.store().backend().read_ref(name).unwrap() {
            Some(RefValue::Direct(oid)) => Some(oid),
            _ => None,
        }
    }

    fn refs_for_advertisement(&self) -> Vec<(String, Oid)> {
        let mut out = vec![];
        for (name, value) in self.repo.store().backend().list_refs("").unwrap() {
            if let RefValue::Direct(oid) = value {
                out.push((name, oid));
            }
        }
        out
    }

    fn advertisement(&self, service: &str) -> Vec<u8> {
        let caps = match service {
            "git-upload-pack" => {
                "multi_ack side-band-64k ofs-delta shallow deepen-since deepen-not \
                 symref=HEAD:refs/heads/main agent=fake/1"
            }
            _ => "report-status side-band-64k agent=fake/1",
        };
        let mut writer = PktWriter::new();
        writer.text(&format!("# service={service}"));
        writer.flush();
        let refs = self.refs_for_advertisement();
        match refs.first() {
            None => {
                writer.data(
                    format!("{} capabilities^{{}}\0{caps}\n", "0".repeat(40)).as_bytes(),
                );
            }
            Some((name, oid)) => {
                writer.data(format!("{} {name}\0{caps}\n", oid.hex()).as_bytes());
                for (name, oid) in &refs[1..] {
                    writer.text(&format!("{} {name}", oid.hex()));
                }
            }
        }
        writer.flush();
        writer.finish()
    }

    /// Object closure (commits, trees, blobs) of the given commits.
    fn closure(&self, commits: &HashSet<Oid>) -> Vec<(Oid, ObjectType, Vec<u8>)> {
        let store = self.repo.store();
        let mut seen = HashSet::new();
        let mut out = vec![];
        let mut push = |oid: &Oid, seen: &mut HashSet<Oid>, out: &mut Vec<_>| {
            if seen.insert(oid.clone()) {
                let (object_type, payload) = store.backend().read_object(oid).unwrap();
                out.push((oid.clone(), object_type, payload));
                true
            } else {
                false
            }
        };
        for commit_oid in commits {
            if !push(commit_oid, &mut seen, &mut out) {
                continue;
            }
            let commit = store.read_commit(commit_oid).unwrap();
            let mut stack = vec![commit.tree];
            while let Some(tree_oid) = stack.pop() {
                if !push(&tree_oid, &mut seen, &mut out) {
                    continue;
                }
                for entry in store.read_tree(&tree_oid).unwrap().entries() {
                    if entry.mode.is_tree() {
                        stack.push(entry.oid.clone());
                    } else {
                        push(&entry.oid, &mut seen, &mut out);
                    }
                }
            }
        }
        out.sort_by(|(a, ..), (b, ..)| a.cmp(b));
        out
    }

    fn sideband_pack(&self, writer: &mut PktWriter, pack_data: &[u8]) {
        for chunk in pack_data.chunks(65000) {
            let mut frame = vec![1u8];
            frame.extend_from_slice(chunk);
            writer.data(&frame);
        }
        let mut progress = vec![2u8];
        progress.extend_from_slice(b"counting objects done\n");
        writer.data(&progress);
        writer.flush();
    }

    fn upload_pack(&self, body: &[u8]) -> Vec<u8> {
        let mut wants: Vec<Oid> = vec![];
        let mut haves: Vec<Oid> = vec![];
        let mut client_shallow: Vec<Oid> = vec![];
        let mut depth: Option<u32> = None;
        let mut since: Option<i64> = None;
        let mut reader = PktReader::new(body);
        while let Some(pkt) = reader.next_pkt().unwrap() {
            let Pkt::Data(_) = pkt else { continue };
            let text = pkt.text().unwrap();
            if let Some(rest) = text.strip_prefix("want ") {
                let hex = rest.split(' ').next().unwrap();
                wants.push(Oid::try_from_hex(hex).unwrap());
            } else if let Some(hex) = text.strip_prefix("have ") {
                haves.push(Oid::try_from_hex(hex).unwrap());
            } else if let Some(hex) = text.strip_prefix("shallow ") {
                client_shallow.push(Oid::try_from_hex(hex).unwrap());
            } else if let Some(n) = text.strip_prefix("deepen ") {
                depth = Some(n.parse().unwrap());
            } else if let Some(ts) = text.strip_prefix("deepen-since ") {
                since = Some(ts.parse().unwrap());
            } else if text == "done" {
                break;
            }
        }

        let store = self.repo.store();
        let no_grafts = HashSet::new();
        let shallow_request = depth.is_some() || since.is_some() || !client_shallow.is_empty();

        // Which commits this response covers.
        let mut include: HashSet<Oid> = HashSet::new();
        if let Some(depth) = depth {
            let mut frontier: Vec<Oid> = wants.clone();
            for _ in 0..depth {
                let mut next = vec![];
                for oid in frontier {
                    if include.insert(oid.clone()) {
                        next.extend(store.read_commit(&oid).unwrap().parents);
                    }
                }
                frontier = next;
            }
        } else {
            let common = revwalk::reachable(store, &no_grafts, &haves).unwrap();
            for oid in revwalk::reachable(store, &no_grafts, &wants).unwrap() {
                let keep = match since {
                    None => !common.contains(&oid),
                    Some(since) => {
                        store.read_commit(&oid).unwrap().committer.timestamp >= since
                    }
                };
                if keep {
                    include.insert(oid);
                }
            }
        }

        let mut writer = PktWriter::new();
        if shallow_request {
            let new_shallow: Vec<&Oid> = include
                .iter()
                .filter(|oid| {
                    store
                        .read_commit(oid)
                        .unwrap()
                        .parents
                        .iter()
                        .any(|parent| !include.contains(parent))
                })
                .collect();
            for oid in &new_shallow {
                writer.text(&format!("shallow {}", oid.hex()));
            }
            for oid in &client_shallow {
                if include.contains(oid) && !new_shallow.contains(&oid) {
                    writer.text(&format!("unshallow {}", oid.hex()));
                }
            }
            writer.flush();
        }
        writer.text("NAK");
        let objects = self.closure(&include);
        let built = pack::build_pack(&objects, HashKind::Sha1, pack::DEFAULT_DELTA_WINDOW);
        self.sideband_pack(&mut writer, &built.data);
        writer.finish()
    }

    fn receive_pack(&self, body: &[u8]) -> Vec<u8> {
        let mut commands: Vec<(Oid, Oid, String)> = vec![];
        let mut reader = PktReader::new(body);
        loop {
            match reader.next_pkt().unwrap() {
                None | Some(Pkt::Flush) => break,
                Some(Pkt::Delim) => {}
                Some(pkt @ Pkt::Data(_)) => {
                    let text = pkt.text().unwrap();
                    let line = text.split('\0').next().unwrap();
                    let mut fields = line.splitn(3, ' ');
                    let old = Oid::try_from_hex(fields.next().unwrap()).unwrap();
                    let new = Oid::try_from_hex(fields.next().unwrap()).unwrap();
                    let name = fields.next().unwrap().to_owned();
                    commands.push((old, new, name));
                }
            }
        }
        let pack_data = &body[reader.position()..];

        let backend = self.repo.store().backend().clone();
        let mut unpack_ok = true;
        if !pack_data.is_empty() {
            let lookup = |oid: &Oid| backend.read_object(oid).ok();
            match pack::parse_pack(pack_data, HashKind::Sha1, &lookup) {
                Ok(parsed) => {
                    for entry in &parsed.entries {
                        backend
                            .write_object(entry.object_type, &entry.payload)
                            .unwrap();
                    }
                }
                Err(_) => unpack_ok = false,
            }
        }

        let mut report = PktWriter::new();
        report.text(if unpack_ok { "unpack ok" } else { "unpack failed" });
        for (old, new, name) in &commands {
            let current = match backend.read_ref(name).unwrap() {
                Some(RefValue::Direct(oid)) => oid,
                _ => Oid::zero(HashKind::Sha1),
            };
            if current != *old {
                report.text(&format!("ng {name} non-fast-forward"));
                continue;
            }
            if new.is_zero() {
                backend.delete_ref(name).unwrap();
            } else {
                backend
                    .write_ref(name, &RefValue::Direct(new.clone()))
                    .unwrap();
            }
            report.text(&format!("ok {name}"));
        }
        report.flush();

        // The client negotiated side-band-64k, so wrap the report.
        let inner = report.finish();
        let mut writer = PktWriter::new();
        for chunk in inner.chunks(65000) {
            let mut frame = vec![1u8];
            frame.extend_from_slice(chunk);
            writer.data(&frame);
        }
        writer.flush();
        writer.finish()
    }
}

impl std::fmt::Debug for FakeRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeRemote").finish_non_exhaustive()
    }
}

impl Transport for FakeRemote {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.url.clone());
        if let Some((username, password)) = &self.auth {
            let expected = ugit_lib::protocol::Credentials {
                username: username.clone(),
                password: password.clone(),
            }
            .basic_header();
            let authorized = request
                .headers
                .iter()
                .any(|(name, value)| name.eq_ignore_ascii_case("authorization") && *value == expected);
            if !authorized {
                return Ok(HttpResponse {
                    status: 401,
                    headers: vec![],
                    body: vec![],
                });
            }
        }
        let Some(path) = request.url.strip_prefix(REMOTE_URL) else {
            return Ok(HttpResponse {
                status: 404,
                headers: vec![],
                body: vec![],
            });
        };
        let body = if path.starts_with("/info/refs?service=") {
            let service = path.rsplit('=').next().unwrap();
            self.advertisement(service)
        } else if path == "/git-upload-pack" {
            self.upload_pack(&request.body)
        } else if path == "/git-receive-pack" {
            self.receive_pack(&request.body)
        } else {
            return Ok(HttpResponse {
                status: 404,
                headers: vec![],
                body: vec![],
            });
        };
        Ok(HttpResponse {
            status: 200,
            headers: vec![("Content-Type".to_owned(), "application/octet-stream".to_owned())],
            body,
        })
    }
}
