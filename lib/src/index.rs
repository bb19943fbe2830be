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

//! The staged snapshot of the next commit, in index format v2.
//!
//! Entries are sorted by path bytes, then stage. A path holds either a
//! single stage-0 entry or, while a merge is unresolved, some subset of
//! stages 1 (base), 2 (ours), 3 (theirs).

use thiserror::Error;

use crate::object_id::HashKind;
use crate::object_id::Oid;
use crate::repo_path::RepoPathBuf;

const INDEX_SIGNATURE: &[u8; 4] = b"DIRC";
const INDEX_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index file has a bad signature")]
    BadSignature,
    #[error("Index version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("Index file is truncated")]
    Truncated,
    #[error("Index checksum does not match its contents")]
    ChecksumMismatch,
    #[error("Index entry for {path:?} is invalid: {reason}")]
    BadEntry { path: String, reason: &'static str },
}

/// Merge slot of an index entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// The single slot of a conflict-free entry.
    Normal,
    /// Common ancestor during an unresolved merge.
    Base,
    /// Our side during an unresolved merge.
    Ours,
    /// Their side during an unresolved merge.
    Theirs,
}

impl Stage {
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 0,
            Self::Base => 1,
            Self::Ours => 2,
            Self::Theirs => 3,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Normal),
            1 => Some(Self::Base),
            2 => Some(Self::Ours),
            3 => Some(Self::Theirs),
            _ => None,
        }
    }
}

/// Cached lstat fields used to cheaply detect worktree changes. All
/// zeros when the entry didn't come from a worktree file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatCache {
    pub ctime_secs: u32,
    pub ctime_nanos: u32,
    pub mtime_secs: u32,
    pub mtime_nanos: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub path: RepoPathBuf,
    pub oid: Oid,
    pub mode: u32,
    pub stage: Stage,
    pub stat: StatCache,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<IndexEntry>,
}

impl Index {
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn position(&self, path: &RepoPathBuf, stage: Stage) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| (&entry.path, entry.stage).cmp(&(path, stage)))
    }

    pub fn get(&self, path: &RepoPathBuf, stage: Stage) -> Option<&IndexEntry> {
        self.position(path, stage).ok().map(|i| &self.entries[i])
    }

    /// All stages present for a path, in stage order.
    pub fn entries_for_path(&self, path: &RepoPathBuf) -> Vec<&IndexEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.path == *path)
            .collect()
    }

    /// Inserts or replaces an entry. A stage-0 insert clears conflict
    /// stages for the path; a conflict-stage insert clears stage 0.
    pub fn set(&mut self, entry: IndexEntry) {
        match entry.stage {
            Stage::Normal => {
                self.remove_path(&entry.path);
            }
            _ => {
                if let Ok(i) = self.position(&entry.path, Stage::Normal) {
                    self.entries.remove(i);
                }
            }
        }
        match self.position(&entry.path, entry.stage) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// Removes every stage for a path. Returns true if anything was
    /// removed.
    pub fn remove_path(&mut self, path: &RepoPathBuf) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.path != *path);
        self.entries.len() != before
    }

    /// Removes every entry at or below a directory path.
    pub fn remove_dir(&mut self, dir: &RepoPathBuf) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| !entry.path.starts_with_dir(dir));
        self.entries.len() != before
    }

    /// Tracked paths, deduplicated across stages.
    pub fn paths(&self) -> Vec<&RepoPathBuf> {
        let mut paths: Vec<&RepoPathBuf> = self.entries.iter().map(|entry| &entry.path).collect();
        paths.dedup();
        paths
    }

    /// True if the path is tracked as a file or as a directory prefix.
    pub fn tracks_dir(&self, dir: &RepoPathBuf) -> bool {
        self.entries.iter().any(|entry| {
            entry.path != *dir && entry.path.starts_with_dir(dir)
        })
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|entry| entry.stage != Stage::Normal)
    }

    pub fn conflict_paths(&self) -> Vec<&RepoPathBuf> {
        let mut paths: Vec<&RepoPathBuf> = self
            .entries
            .iter()
            .filter(|entry| entry.stage != Stage::Normal)
            .map(|entry| &entry.path)
            .collect();
        paths.dedup();
        paths
    }

    pub fn parse(data: &[u8], hash_kind: HashKind) -> Result<Self, IndexError> {
        let oid_len = hash_kind.oid_len();
        if data.len() < 12 + oid_len {
            return Err(IndexError::Truncated);
        }
        let (body, checksum) = data.split_at(data.len() - oid_len);
        if hash_kind.digest(body) != checksum {
            return Err(IndexError::ChecksumMismatch);
        }
        if &body[..4] != INDEX_SIGNATURE {
            return Err(IndexError::BadSignature);
        }
        let version = u32::from_be_bytes(body[4..8].try_into().unwrap());
        if version != INDEX_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes(body[8..12].try_into().unwrap()) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut rest = &body[12..];
        for _ in 0..count {
            let fixed_len = 40 + oid_len + 2;
            if rest.len() < fixed_len {
                return Err(IndexError::Truncated);
            }
            let word = |i: usize| u32::from_be_bytes(rest[i * 4..i * 4 + 4].try_into().unwrap());
            let stat = StatCache {
                ctime_secs: word(0),
                ctime_nanos: word(1),
                mtime_secs: word(2),
                mtime_nanos: word(3),
                dev: word(4),
                ino: word(5),
                uid: word(7),
                gid: word(8),
                size: word(9),
            };
            let mode = word(6);
            let oid = Oid::from_bytes(&rest[40..40 + oid_len]);
            let flags =
                u16::from_be_bytes(rest[40 + oid_len..40 + oid_len + 2].try_into().unwrap());
            let stage = Stage::from_u16((flags >> 12) & 0x3).unwrap();
            let name_len = (flags & 0xFFF) as usize;
            let name_field = &rest[fixed_len..];
            let name = if name_len < 0xFFF {
                name_field.get(..name_len).ok_or(IndexError::Truncated)?
            } else {
                // Overlong names are NUL-terminated instead.
                let end = name_field
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(IndexError::Truncated)?;
                &name_field[..end]
            };
            let path = std::str::from_utf8(name)
                .map_err(|_| IndexError::BadEntry {
                    path: String::from_utf8_lossy(name).into_owned(),
                    reason: "path is not UTF-8",
                })
                .map(RepoPathBuf::from_internal_string)?;
            let entry_len = entry_len_on_disk(fixed_len, name.len());
            if rest.len() < entry_len {
                return Err(IndexError::Truncated);
            }
            rest = &rest[entry_len..];
            entries.push(IndexEntry {
                path,
                oid,
                mode,
                stage,
                stat,
            });
        }
        // Anything left before the checksum is extension data (cache
        // trees and the like), which this implementation doesn't retain.
        Ok(Self { entries })
    }

    pub fn serialize(&self, hash_kind: HashKind) -> Vec<u8> {
        let mut out = vec![];
        out.extend_from_slice(INDEX_SIGNATURE);
        out.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            let start = out.len();
            let stat = &entry.stat;
            for word in [
                stat.ctime_secs,
                stat.ctime_nanos,
                stat.mtime_secs,
                stat.mtime_nanos,
                stat.dev,
                stat.ino,
                entry.mode,
                stat.uid,
                stat.gid,
                stat.size,
            ] {
                out.extend_from_slice(&word.to_be_bytes());
            }
            out.extend_from_slice(entry.oid.as_bytes());
            let name = entry.path.as_str().as_bytes();
            let name_len = name.len().min(0xFFF) as u16;
            let flags = (entry.stage.as_u16() << 12) | name_len;
            out.extend_from_slice(&flags.to_be_bytes());
            out.extend_from_slice(name);
            // NUL-pad so the entry length is a multiple of 8.
            let written = out.len() - start;
            let padded = (written / 8 + 1) * 8;
            out.resize(start + padded.max(written + 1), 0);
        }
        let checksum = hash_kind.digest(&out);
        out.extend_from_slice(&checksum);
        out
    }
}

/// On-disk length of an entry: fixed part + name, NUL-padded to a
/// multiple of 8 with at least one NUL.
fn entry_len_on_disk(fixed_len: usize, name_len: usize) -> usize {
    let unpadded = fixed_len + name_len;
    (unpadded / 8 + 1) * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> RepoPathBuf {
        RepoPathBuf::from_relative_string(s).unwrap()
    }

    fn entry(p: &str, stage: Stage) -> IndexEntry {
        IndexEntry {
            path: path(p),
            oid: Oid::from_hex("b45ef6fec89518d314f546fd6c3025367b721684"),
            mode: 0o100644,
            stage,
            stat: StatCache::default(),
        }
    }

    #[test]
    fn test_round_trip() {
        let mut index = Index::default();
        index.set(entry("hello.md", Stage::Normal));
        index.set(entry("dir/nested.txt", Stage::Normal));
        let data = index.serialize(HashKind::Sha1);
        let parsed = Index::parse(&data, HashKind::Sha1).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_entries_are_sorted() {
        let mut index = Index::default();
        index.set(entry("b", Stage::Normal));
        index.set(entry("a", Stage::Normal));
        index.set(entry("a/b", Stage::Normal));
        let paths: Vec<_> = index.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["a", "a/b", "b"]);
    }

    #[test]
    fn test_stage_zero_excludes_conflict_stages() {
        let mut index = Index::default();
        index.set(entry("o.txt", Stage::Base));
        index.set(entry("o.txt", Stage::Ours));
        index.set(entry("o.txt", Stage::Theirs));
        assert!(index.has_conflicts());
        assert_eq!(index.entries_for_path(&path("o.txt")).len(), 3);

        index.set(entry("o.txt", Stage::Normal));
        assert!(!index.has_conflicts());
        assert_eq!(index.entries_for_path(&path("o.txt")).len(), 1);

        index.set(entry("o.txt", Stage::Theirs));
        assert_eq!(
            index
                .entries_for_path(&path("o.txt"))
                .iter()
                .map(|e| e.stage)
                .collect::<Vec<_>>(),
            [Stage::Theirs]
        );
    }

    #[test]
    fn test_remove_dir() {
        let mut index = Index::default();
        index.set(entry("dir/a", Stage::Normal));
        index.set(entry("dir/b", Stage::Normal));
        index.set(entry("dirx", Stage::Normal));
        assert!(index.tracks_dir(&path("dir")));
        assert!(index.remove_dir(&path("dir")));
        let paths: Vec<_> = index.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["dirx"]);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut index = Index::default();
        index.set(entry("a", Stage::Normal));
        let mut data = index.serialize(HashKind::Sha1);
        let mid = data.len() / 2;
        data[mid] ^= 0xff;
        assert!(matches!(
            Index::parse(&data, HashKind::Sha1),
            Err(IndexError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_conflict_stage_ordering_round_trips() {
        let mut index = Index::default();
        index.set(entry("o.txt", Stage::Base));
        index.set(entry("o.txt", Stage::Ours));
        index.set(entry("o.txt", Stage::Theirs));
        index.set(entry("a.txt", Stage::Normal));
        let data = index.serialize(HashKind::Sha1);
        let parsed = Index::parse(&data, HashKind::Sha1).unwrap();
        assert_eq!(parsed, index);
        let stages: Vec<_> = parsed
            .entries()
            .iter()
            .map(|e| (e.path.as_str(), e.stage))
            .collect();
        assert_eq!(
            stages,
            [
                ("a.txt", Stage::Normal),
                ("o.txt", Stage::Base),
                ("o.txt", Stage::Ours),
                ("o.txt", Stage::Theirs),
            ]
        );
    }
}
