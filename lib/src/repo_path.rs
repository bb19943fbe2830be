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

//! Worktree-relative, slash-separated file paths.

use std::fmt;

use thiserror::Error;

/// Error returned when a caller-provided path cannot be interpreted as a
/// repo-relative path.
#[derive(Debug, Error)]
#[error("Invalid repo path {input:?}: {reason}")]
pub struct InvalidRepoPathError {
    pub input: String,
    pub reason: &'static str,
}

/// A file path relative to the worktree root.
///
/// Always slash-separated regardless of host conventions, never empty,
/// never absolute, and contains no `.`/`..` components. Ordering is plain
/// byte-wise comparison, which is the order index entries are stored in.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepoPathBuf {
    value: String,
}

impl RepoPathBuf {
    /// Parses and normalizes a caller-provided relative path. Backslashes
    /// are converted to forward slashes on entry, and a leading `./` is
    /// dropped.
    pub fn from_relative_string(input: impl Into<String>) -> Result<Self, InvalidRepoPathError> {
        let original: String = input.into();
        let err = |reason| InvalidRepoPathError {
            input: original.clone(),
            reason,
        };
        let mut value = original.replace('\\', "/");
        if let Some(rest) = value.strip_prefix("./") {
            value = rest.to_owned();
        }
        if value.is_empty() {
            return Err(err("path is empty"));
        }
        if value.starts_with('/') || looks_like_drive_path(&value) {
            return Err(err("path is absolute"));
        }
        if value.ends_with('/') {
            value.pop();
        }
        for component in value.split('/') {
            match component {
                "" => return Err(err("path has an empty component")),
                "." | ".." => return Err(err("path has a relative component")),
                ".git" => return Err(err("path enters the git directory")),
                _ => {}
            }
        }
        Ok(Self { value })
    }

    /// Wraps an already-normalized path (e.g. read back from the index).
    pub(crate) fn from_internal_string(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.value.split('/')
    }

    /// Splits into the first component and the remainder, if any.
    pub fn split_first(&self) -> (&str, Option<Self>) {
        match self.value.split_once('/') {
            Some((head, rest)) => (head, Some(Self::from_internal_string(rest))),
            None => (&self.value, None),
        }
    }

    pub fn parent(&self) -> Option<Self> {
        self.value
            .rsplit_once('/')
            .map(|(dir, _)| Self::from_internal_string(dir))
    }

    pub fn file_name(&self) -> &str {
        self.value.rsplit_once('/').map_or(&self.value, |(_, f)| f)
    }

    pub fn join(&self, name: &str) -> Self {
        Self::from_internal_string(format!("{}/{name}", self.value))
    }

    /// True if `self` is `prefix` or lies below the directory `prefix`.
    pub fn starts_with_dir(&self, prefix: &Self) -> bool {
        self.value == prefix.value
            || (self.value.len() > prefix.value.len()
                && self.value.starts_with(&prefix.value)
                && self.value.as_bytes()[prefix.value.len()] == b'/')
    }
}

fn looks_like_drive_path(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

impl fmt::Debug for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.value)
    }
}

impl fmt::Display for RepoPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        let path = RepoPathBuf::from_relative_string("./a\\b/c/").unwrap();
        assert_eq!(path.as_str(), "a/b/c");
    }

    #[test]
    fn test_rejects_bad_paths() {
        assert!(RepoPathBuf::from_relative_string("").is_err());
        assert!(RepoPathBuf::from_relative_string("/abs").is_err());
        assert!(RepoPathBuf::from_relative_string("C:/abs").is_err());
        assert!(RepoPathBuf::from_relative_string("a//b").is_err());
        assert!(RepoPathBuf::from_relative_string("a/../b").is_err());
        assert!(RepoPathBuf::from_relative_string(".git/config").is_err());
    }

    #[test]
    fn test_split_and_join() {
        let path = RepoPathBuf::from_relative_string("a/b/c").unwrap();
        let (head, rest) = path.split_first();
        assert_eq!(head, "a");
        assert_eq!(rest.unwrap().as_str(), "b/c");
        assert_eq!(path.parent().unwrap().as_str(), "a/b");
        assert_eq!(path.file_name(), "c");
        assert_eq!(path.parent().unwrap().join("d").as_str(), "a/b/d");
    }

    #[test]
    fn test_starts_with_dir() {
        let dir = RepoPathBuf::from_relative_string("a/b").unwrap();
        let inside = RepoPathBuf::from_relative_string("a/b/c").unwrap();
        let sibling = RepoPathBuf::from_relative_string("a/bc").unwrap();
        assert!(inside.starts_with_dir(&dir));
        assert!(dir.starts_with_dir(&dir));
        assert!(!sibling.starts_with_dir(&dir));
    }
}
