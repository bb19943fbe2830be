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

//! The mediator between HEAD, the index, and the files on disk: status
//! classification, staging, and checkout.

use std::fmt;
use std::fmt::Debug;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use ignore::Match;
use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;
use thiserror::Error;
use tracing::debug;

use crate::backend::BackendError;
use crate::index::Index;
use crate::index::IndexEntry;
use crate::index::IndexError;
use crate::index::Stage;
use crate::index::StatCache;
use crate::mutation;
use crate::mutation::MutationKind;
use crate::mutation::MutationObserver;
use crate::object::FileMode;
use crate::object_id::Oid;
use crate::repo_path::InvalidRepoPathError;
use crate::repo_path::RepoPathBuf;
use crate::store::Store;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Path(#[from] InvalidRepoPathError),
    #[error("Cannot access {path}")]
    Io { path: String, source: io::Error },
    #[error("File {path} does not exist")]
    NotFound { path: String },
    #[error("{path} is a directory; pass force to remove a directory")]
    DirectoryRequiresForce { path: String },
    #[error("File {path} still exists in the worktree; pass force to remove it from the index")]
    WorktreeFilePresent { path: String },
    #[error("Checkout would overwrite local changes: {paths:?}")]
    CheckoutConflict { paths: Vec<String> },
    #[error("Bad ignore pattern: {message}")]
    Ignore { message: String },
}

pub type WorktreeResult<T> = Result<T, WorktreeError>;

/// What kind of filesystem entry a stat saw.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    File,
    Executable,
    Symlink,
    Dir,
}

/// The lstat fields the index caches, plus the entry kind.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileStat {
    pub kind: Option<FileKind>,
    pub size: u64,
    pub mtime_secs: u32,
    pub mtime_nanos: u32,
    pub ctime_secs: u32,
    pub ctime_nanos: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
}

impl FileStat {
    fn of_kind(kind: FileKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }
}

/// The host filesystem surface the mediator needs: plain byte files
/// addressed by repo-relative slash-separated paths. Hosts without a
/// real filesystem supply their own implementation.
pub trait WorktreeFs: Send + Sync + Debug {
    /// File content, or the link target for a symlink. `None` when the
    /// path doesn't exist.
    fn read(&self, path: &RepoPathBuf) -> io::Result<Option<Vec<u8>>>;

    /// Writes a regular file, creating parent directories.
    fn write(&self, path: &RepoPathBuf, data: &[u8], executable: bool) -> io::Result<()>;

    fn write_symlink(&self, path: &RepoPathBuf, target: &[u8]) -> io::Result<()>;

    /// Removes a file and any parent directories left empty.
    fn remove(&self, path: &RepoPathBuf) -> io::Result<()>;

    fn stat(&self, path: &RepoPathBuf) -> io::Result<FileStat>;

    /// Every regular file and symlink, recursively, excluding the git
    /// directory.
    fn list_files(&self) -> io::Result<Vec<RepoPathBuf>>;
}

/// `WorktreeFs` over a real directory.
pub struct HostFs {
    root: PathBuf,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn host_path(&self, path: &RepoPathBuf) -> PathBuf {
        let mut out = self.root.clone();
        for component in path.components() {
            out.push(component);
        }
        out
    }
}

impl Debug for HostFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFs").field("root", &self.root).finish()
    }
}

#[cfg(unix)]
fn stat_of_metadata(metadata: &std::fs::Metadata) -> FileStat {
    use std::os::unix::fs::MetadataExt as _;
    use std::os::unix::fs::PermissionsExt as _;
    let kind = if metadata.file_type().is_symlink() {
        FileKind::Symlink
    } else if metadata.is_dir() {
        FileKind::Dir
    } else if metadata.permissions().mode() & 0o111 != 0 {
        FileKind::Executable
    } else {
        FileKind::File
    };
    FileStat {
        kind: Some(kind),
        size: metadata.len(),
        mtime_secs: metadata.mtime() as u32,
        mtime_nanos: metadata.mtime_nsec() as u32,
        ctime_secs: metadata.ctime() as u32,
        ctime_nanos: metadata.ctime_nsec() as u32,
        dev: metadata.dev() as u32,
        ino: metadata.ino() as u32,
        uid: metadata.uid(),
        gid: metadata.gid(),
    }
}

#[cfg(not(unix))]
fn stat_of_metadata(metadata: &std::fs::Metadata) -> FileStat {
    let kind = if metadata.file_type().is_symlink() {
        FileKind::Symlink
    } else if metadata.is_dir() {
        FileKind::Dir
    } else {
        FileKind::File
    };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok());
    FileStat {
        kind: Some(kind),
        size: metadata.len(),
        mtime_secs: mtime.map_or(0, |d| d.as_secs() as u32),
        mtime_nanos: mtime.map_or(0, |d| d.subsec_nanos()),
        ..FileStat::default()
    }
}

impl WorktreeFs for HostFs {
    fn read(&self, path: &RepoPathBuf) -> io::Result<Option<Vec<u8>>> {
        let host = self.host_path(path);
        let metadata = match std::fs::symlink_metadata(&host) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if metadata.file_type().is_symlink() {
            let target = std::fs::read_link(&host)?;
            return Ok(Some(
                target.to_string_lossy().replace('\\', "/").into_bytes(),
            ));
        }
        if metadata.is_dir() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(&host)?))
    }

    fn write(&self, path: &RepoPathBuf, data: &[u8], executable: bool) -> io::Result<()> {
        let host = self.host_path(path);
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Replace symlinks rather than writing through them.
        if std::fs::symlink_metadata(&host).is_ok_and(|m| m.file_type().is_symlink()) {
            std::fs::remove_file(&host)?;
        }
        std::fs::write(&host, data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            let mode = if executable { 0o755 } else { 0o644 };
            std::fs::set_permissions(&host, std::fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = executable;
        Ok(())
    }

    fn write_symlink(&self, path: &RepoPathBuf, target: &[u8]) -> io::Result<()> {
        let host = self.host_path(path);
        if let Some(parent) = host.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::symlink_metadata(&host) {
            Ok(_) => std::fs::remove_file(&host)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        #[cfg(unix)]
        {
            let target = String::from_utf8_lossy(target).into_owned();
            std::os::unix::fs::symlink(target, &host)
        }
        #[cfg(not(unix))]
        {
            // Fall back to a plain file holding the target, matching
            // core.symlinks=false behavior.
            std::fs::write(&host, target)
        }
    }

    fn remove(&self, path: &RepoPathBuf) -> io::Result<()> {
        let host = self.host_path(path);
        match std::fs::remove_file(&host) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err),
        }
        // Prune directories the removal emptied.
        let mut dir = host.parent().map(PathBuf::from);
        while let Some(current) = dir {
            if current == self.root || std::fs::remove_dir(&current).is_err() {
                break;
            }
            dir = current.parent().map(PathBuf::from);
        }
        Ok(())
    }

    fn stat(&self, path: &RepoPathBuf) -> io::Result<FileStat> {
        match std::fs::symlink_metadata(self.host_path(path)) {
            Ok(metadata) => Ok(stat_of_metadata(&metadata)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(FileStat::default()),
            Err(err) => Err(err),
        }
    }

    fn list_files(&self) -> io::Result<Vec<RepoPathBuf>> {
        fn visit(
            root: &PathBuf,
            dir: &PathBuf,
            prefix: &str,
            out: &mut Vec<RepoPathBuf>,
        ) -> io::Result<()> {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name == ".git" {
                    continue;
                }
                let rel = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}/{name}")
                };
                let file_type = entry.file_type()?;
                if file_type.is_dir() {
                    visit(root, &entry.path(), &rel, out)?;
                } else {
                    out.push(RepoPathBuf::from_internal_string(rel));
                }
            }
            Ok(())
        }
        let mut out = vec![];
        visit(&self.root, &self.root, "", &mut out)?;
        out.sort();
        Ok(out)
    }
}

/// Classification of one path across HEAD, the index, and the worktree.
/// The `*`-prefixed display forms mean the index and worktree disagree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileStatus {
    Absent,
    Ignored,
    Untracked,
    Unmodified,
    Modified,
    ModifiedUnstaged,
    Added,
    AddedUnstaged,
    Deleted,
    DeletedUnstaged,
    AbsentStaged,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Absent => "absent",
            Self::Ignored => "ignored",
            Self::Untracked => "untracked",
            Self::Unmodified => "unmodified",
            Self::Modified => "modified",
            Self::ModifiedUnstaged => "*modified",
            Self::Added => "added",
            Self::AddedUnstaged => "*added",
            Self::Deleted => "deleted",
            Self::DeletedUnstaged => "*deleted",
            Self::AbsentStaged => "*absent",
        };
        f.pad(label)
    }
}

/// Pure classification over the three blob ids.
pub fn classify(
    head: Option<&Oid>,
    index: Option<&Oid>,
    workdir: Option<&Oid>,
    ignored: bool,
) -> FileStatus {
    match (head, index, workdir) {
        (None, None, None) => FileStatus::Absent,
        (None, None, Some(_)) => {
            if ignored {
                FileStatus::Ignored
            } else {
                FileStatus::Untracked
            }
        }
        (None, Some(i), Some(w)) => {
            if i == w {
                FileStatus::Added
            } else {
                FileStatus::AddedUnstaged
            }
        }
        (None, Some(_), None) => FileStatus::AbsentStaged,
        (Some(h), Some(i), Some(w)) => {
            if i == w {
                if h == i {
                    FileStatus::Unmodified
                } else {
                    FileStatus::Modified
                }
            } else {
                FileStatus::ModifiedUnstaged
            }
        }
        (Some(_), Some(_), None) => FileStatus::DeletedUnstaged,
        (Some(_), None, None) => FileStatus::Deleted,
        // Deletion staged but the file is still (or again) on disk: the
        // index disagrees with the worktree, so the starred form.
        (Some(_), None, Some(_)) => FileStatus::DeletedUnstaged,
    }
}

/// Merged view of every `.gitignore` in the worktree; deeper files
/// override shallower ones.
pub struct IgnoreIndex {
    // (directory, matcher), sorted shallow to deep. `None` is the root.
    matchers: Vec<(Option<RepoPathBuf>, Gitignore)>,
}

impl IgnoreIndex {
    fn build(fs: &dyn WorktreeFs) -> WorktreeResult<Self> {
        let mut matchers = vec![];
        let mut files: Vec<RepoPathBuf> = fs
            .list_files()
            .map_err(|err| WorktreeError::Io {
                path: ".".to_owned(),
                source: err,
            })?
            .into_iter()
            .filter(|path| path.file_name() == ".gitignore")
            .collect();
        files.sort_by_key(|path| path.components().count());
        for path in files {
            let Some(content) = fs.read(&path).map_err(|err| WorktreeError::Io {
                path: path.as_str().to_owned(),
                source: err,
            })?
            else {
                continue;
            };
            let mut builder = GitignoreBuilder::new("");
            for line in String::from_utf8_lossy(&content).lines() {
                builder
                    .add_line(None, line)
                    .map_err(|err| WorktreeError::Ignore {
                        message: err.to_string(),
                    })?;
            }
            let matcher = builder.build().map_err(|err| WorktreeError::Ignore {
                message: err.to_string(),
            })?;
            matchers.push((path.parent(), matcher));
        }
        Ok(Self { matchers })
    }

    pub fn is_ignored(&self, path: &RepoPathBuf, is_dir: bool) -> bool {
        let mut ignored = false;
        for (dir, matcher) in &self.matchers {
            let rel = match dir {
                None => path.as_str(),
                Some(dir) => {
                    if !path.starts_with_dir(dir) || path == dir {
                        continue;
                    }
                    &path.as_str()[dir.as_str().len() + 1..]
                }
            };
            match matcher.matched_path_or_any_parents(rel, is_dir) {
                Match::Ignore(_) => ignored = true,
                Match::Whitelist(_) => ignored = false,
                Match::None => {}
            }
        }
        ignored
    }
}

/// One row of the three-tree walk.
#[derive(Clone, Debug)]
pub struct WalkEntry {
    pub path: RepoPathBuf,
    pub head: Option<(FileMode, Oid)>,
    pub index: Option<IndexEntry>,
    /// The blob id the worktree content hashes to.
    pub workdir: Option<Oid>,
}

/// The mediator itself: object store + host files + observer.
#[derive(Clone)]
pub struct Worktree {
    store: Store,
    fs: Arc<dyn WorktreeFs>,
    observer: Arc<dyn MutationObserver>,
}

impl Debug for Worktree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worktree").field("fs", &self.fs).finish_non_exhaustive()
    }
}

fn io_err(path: &RepoPathBuf) -> impl FnOnce(io::Error) -> WorktreeError + '_ {
    move |source| WorktreeError::Io {
        path: path.as_str().to_owned(),
        source,
    }
}

impl Worktree {
    pub fn new(
        store: Store,
        fs: Arc<dyn WorktreeFs>,
        observer: Arc<dyn MutationObserver>,
    ) -> Self {
        Self {
            store,
            fs,
            observer,
        }
    }

    pub fn fs(&self) -> &Arc<dyn WorktreeFs> {
        &self.fs
    }

    pub fn read_index(&self) -> WorktreeResult<Index> {
        let index = match self.store.backend().read_index()? {
            None => Index::default(),
            Some(data) => Index::parse(&data, self.store.hash_kind())?,
        };
        mutation::emit(
            &self.observer,
            self.store.gitdir(),
            MutationKind::IndexRead,
            format!("{} entries", index.len()),
        );
        Ok(index)
    }

    pub fn write_index(&self, index: &Index) -> WorktreeResult<()> {
        self.store
            .backend()
            .write_index(&index.serialize(self.store.hash_kind()))?;
        mutation::emit(
            &self.observer,
            self.store.gitdir(),
            MutationKind::IndexWrite,
            format!("{} entries", index.len()),
        );
        Ok(())
    }

    pub fn ignore_index(&self) -> WorktreeResult<IgnoreIndex> {
        IgnoreIndex::build(self.fs.as_ref())
    }

    /// The layered `.gitattributes` view of this worktree.
    pub fn attributes_index(&self) -> WorktreeResult<crate::attributes::AttributesIndex> {
        let mut index = crate::attributes::AttributesIndex::default();
        let mut files: Vec<RepoPathBuf> = self
            .fs
            .list_files()
            .map_err(|err| WorktreeError::Io {
                path: ".".to_owned(),
                source: err,
            })?
            .into_iter()
            .filter(|path| path.file_name() == ".gitattributes")
            .collect();
        files.sort_by_key(|path| path.components().count());
        for path in files {
            if let Some(content) = self.fs.read(&path).map_err(io_err(&path))? {
                index.add_file(path.parent(), &String::from_utf8_lossy(&content));
            }
        }
        Ok(index)
    }

    /// The blob id of the file at `path`, or `None` if absent. Reuses the
    /// index's cached id when the cached stat still matches.
    pub fn workdir_blob_oid(
        &self,
        path: &RepoPathBuf,
        index_entry: Option<&IndexEntry>,
    ) -> WorktreeResult<Option<Oid>> {
        let stat = self.fs.stat(path).map_err(io_err(path))?;
        match stat.kind {
            None | Some(FileKind::Dir) => return Ok(None),
            Some(_) => {}
        }
        if let Some(entry) = index_entry {
            if entry.stat.mtime_secs != 0
                && entry.stat.mtime_secs == stat.mtime_secs
                && entry.stat.mtime_nanos == stat.mtime_nanos
                && u64::from(entry.stat.size) == stat.size
            {
                return Ok(Some(entry.oid.clone()));
            }
        }
        let Some(content) = self.fs.read(path).map_err(io_err(path))? else {
            return Ok(None);
        };
        Ok(Some(crate::object::hash_object(
            self.store.hash_kind(),
            crate::object::ObjectType::Blob,
            &content,
        )))
    }

    fn stat_cache(stat: &FileStat) -> StatCache {
        StatCache {
            ctime_secs: stat.ctime_secs,
            ctime_nanos: stat.ctime_nanos,
            mtime_secs: stat.mtime_secs,
            mtime_nanos: stat.mtime_nanos,
            dev: stat.dev,
            ino: stat.ino,
            uid: stat.uid,
            gid: stat.gid,
            size: stat.size as u32,
        }
    }

    fn mode_for_kind(kind: FileKind) -> FileMode {
        match kind {
            FileKind::Executable => FileMode::BlobExecutable,
            FileKind::Symlink => FileMode::Link,
            FileKind::File | FileKind::Dir => FileMode::Blob,
        }
    }

    /// Stages worktree content at `path` (a file, or every non-ignored
    /// file below a directory).
    pub fn add(&self, index: &mut Index, path: &RepoPathBuf) -> WorktreeResult<()> {
        let stat = self.fs.stat(path).map_err(io_err(path))?;
        match stat.kind {
            None => Err(WorktreeError::NotFound {
                path: path.as_str().to_owned(),
            }),
            Some(FileKind::Dir) => {
                let ignore = self.ignore_index()?;
                let files = self.fs.list_files().map_err(io_err(path))?;
                for file in files {
                    if file.starts_with_dir(path) && !ignore.is_ignored(&file, false) {
                        self.add_file(index, &file)?;
                    }
                }
                Ok(())
            }
            Some(_) => self.add_file(index, path),
        }
    }

    fn add_file(&self, index: &mut Index, path: &RepoPathBuf) -> WorktreeResult<()> {
        let stat = self.fs.stat(path).map_err(io_err(path))?;
        let Some(kind) = stat.kind else {
            return Err(WorktreeError::NotFound {
                path: path.as_str().to_owned(),
            });
        };
        let content = self
            .fs
            .read(path)
            .map_err(io_err(path))?
            .ok_or_else(|| WorktreeError::NotFound {
                path: path.as_str().to_owned(),
            })?;
        let oid = self.store.write_blob(&content)?;
        debug!(path = path.as_str(), oid = %oid, "staged file");
        index.set(IndexEntry {
            path: path.clone(),
            oid,
            mode: Self::mode_for_kind(kind).as_u32(),
            stage: Stage::Normal,
            stat: Self::stat_cache(&stat),
        });
        Ok(())
    }

    /// Removes `path` from the index. Without `force`, refuses while the
    /// worktree still has the file, and refuses directories outright.
    pub fn remove(&self, index: &mut Index, path: &RepoPathBuf, force: bool) -> WorktreeResult<()> {
        let stat = self.fs.stat(path).map_err(io_err(path))?;
        if stat.kind == Some(FileKind::Dir) || index.tracks_dir(path) {
            if !force {
                return Err(WorktreeError::DirectoryRequiresForce {
                    path: path.as_str().to_owned(),
                });
            }
            if !index.remove_dir(path) {
                return Err(WorktreeError::NotFound {
                    path: path.as_str().to_owned(),
                });
            }
            return Ok(());
        }
        if stat.kind.is_some() && !force {
            return Err(WorktreeError::WorktreeFilePresent {
                path: path.as_str().to_owned(),
            });
        }
        if !index.remove_path(path) {
            return Err(WorktreeError::NotFound {
                path: path.as_str().to_owned(),
            });
        }
        Ok(())
    }

    /// Classifies a single path.
    pub fn status(
        &self,
        head_tree: Option<&Oid>,
        path: &RepoPathBuf,
    ) -> WorktreeResult<FileStatus> {
        let index = self.read_index()?;
        let head = match head_tree {
            None => None,
            Some(tree) => self
                .store
                .tree_path_entry(tree, path)?
                .filter(|entry| !entry.mode.is_tree())
                .map(|entry| entry.oid),
        };
        let index_entry = index.get(path, Stage::Normal);
        let workdir = self.workdir_blob_oid(path, index_entry)?;
        let ignored = self.ignore_index()?.is_ignored(path, false);
        Ok(classify(
            head.as_ref(),
            index_entry.map(|entry| &entry.oid),
            workdir.as_ref(),
            ignored,
        ))
    }

    /// The three-tree walk: every path present in HEAD, the index, or
    /// the worktree, in path order. Ignored untracked files are skipped.
    pub fn walk(&self, head_tree: Option<&Oid>) -> WorktreeResult<Vec<WalkEntry>> {
        let index = self.read_index()?;
        let ignore = self.ignore_index()?;
        let head_entries = match head_tree {
            None => vec![],
            Some(tree) => crate::diff::flatten_tree(&self.store, tree)?,
        };
        let workdir_files = self.fs.list_files().map_err(|err| WorktreeError::Io {
            path: ".".to_owned(),
            source: err,
        })?;

        let mut paths: Vec<RepoPathBuf> = head_entries
            .iter()
            .map(|(path, ..)| path.clone())
            .chain(index.paths().into_iter().cloned())
            .collect();
        let tracked: std::collections::HashSet<&RepoPathBuf> = paths.iter().collect();
        let untracked: Vec<RepoPathBuf> = workdir_files
            .into_iter()
            .filter(|path| !tracked.contains(path) && !ignore.is_ignored(path, false))
            .collect();
        paths.extend(untracked);
        paths.sort();
        paths.dedup();

        let head_map: std::collections::BTreeMap<&RepoPathBuf, (FileMode, Oid)> = head_entries
            .iter()
            .map(|(path, mode, oid)| (path, (*mode, oid.clone())))
            .collect();
        let mut out = vec![];
        for path in &paths {
            let index_entry = index.get(path, Stage::Normal).cloned();
            let workdir = self.workdir_blob_oid(path, index_entry.as_ref())?;
            out.push(WalkEntry {
                path: path.clone(),
                head: head_map.get(path).cloned(),
                index: index_entry,
                workdir,
            });
        }
        Ok(out)
    }

    /// Status for every known path.
    pub fn status_all(
        &self,
        head_tree: Option<&Oid>,
    ) -> WorktreeResult<Vec<(RepoPathBuf, FileStatus)>> {
        Ok(self
            .walk(head_tree)?
            .into_iter()
            .map(|entry| {
                let status = classify(
                    entry.head.as_ref().map(|(_, oid)| oid),
                    entry.index.as_ref().map(|e| &e.oid),
                    entry.workdir.as_ref(),
                    false,
                );
                (entry.path, status)
            })
            .collect())
    }

    /// Materializes `tree` into the worktree and resets the index to it.
    ///
    /// Without `force`, refuses when that would clobber local
    /// modifications (a dirty tracked file, or an untracked file in the
    /// way).
    pub fn checkout_tree(&self, tree: &Oid, force: bool) -> WorktreeResult<()> {
        let target: Vec<(RepoPathBuf, FileMode, Oid)> =
            crate::diff::flatten_tree(&self.store, tree)?;
        let target_map: std::collections::BTreeMap<&RepoPathBuf, (FileMode, &Oid)> = target
            .iter()
            .map(|(path, mode, oid)| (path, (*mode, oid)))
            .collect();
        let index = self.read_index()?;

        if !force {
            let mut dirty = vec![];
            for (path, _, oid) in &target {
                let index_entry = index.get(path, Stage::Normal);
                let workdir = self.workdir_blob_oid(path, index_entry)?;
                match (index_entry, &workdir) {
                    // Untracked file in the way of different content.
                    (None, Some(w)) if w != oid => dirty.push(path.as_str().to_owned()),
                    // Local edits would be overwritten.
                    (Some(entry), Some(w)) if *w != entry.oid && w != oid => {
                        dirty.push(path.as_str().to_owned());
                    }
                    _ => {}
                }
            }
            for entry in index.entries() {
                if target_map.contains_key(&entry.path) || entry.stage != Stage::Normal {
                    continue;
                }
                let workdir = self.workdir_blob_oid(&entry.path, Some(entry))?;
                if workdir.is_some_and(|w| w != entry.oid) {
                    dirty.push(entry.path.as_str().to_owned());
                }
            }
            if !dirty.is_empty() {
                dirty.sort();
                dirty.dedup();
                return Err(WorktreeError::CheckoutConflict { paths: dirty });
            }
        }

        // Delete tracked files that the target no longer has.
        for entry in index.entries() {
            if !target_map.contains_key(&entry.path) {
                self.fs.remove(&entry.path).map_err(io_err(&entry.path))?;
            }
        }
        // Write changed and new files, then rebuild the index.
        let mut new_index = Index::default();
        for (path, mode, oid) in &target {
            let index_entry = index.get(path, Stage::Normal);
            let current = self.workdir_blob_oid(path, index_entry)?;
            if current.as_ref() != Some(oid) {
                let content = self.store.read_blob(oid)?;
                match mode {
                    FileMode::Link => self
                        .fs
                        .write_symlink(path, &content)
                        .map_err(io_err(path))?,
                    FileMode::Commit => {
                        // Submodule pointer: record it in the index only.
                    }
                    _ => self
                        .fs
                        .write(path, &content, *mode == FileMode::BlobExecutable)
                        .map_err(io_err(path))?,
                }
            }
            let stat = self.fs.stat(path).map_err(io_err(path))?;
            new_index.set(IndexEntry {
                path: path.clone(),
                oid: (*oid).clone(),
                mode: mode.as_u32(),
                stage: Stage::Normal,
                stat: Self::stat_cache(&stat),
            });
        }
        self.write_index(&new_index)?;
        Ok(())
    }
}
