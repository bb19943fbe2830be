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

//! `.gitattributes` parsing and merged attribute lookup.
//!
//! Files are layered per directory; a later (deeper) file overrides an
//! earlier one attribute-by-attribute.

use std::collections::BTreeMap;

use crate::repo_path::RepoPathBuf;

/// State of one attribute for a path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrState {
    /// `attr`
    Set,
    /// `-attr`
    Unset,
    /// `attr=value`
    Value(String),
}

#[derive(Clone, Debug)]
struct AttrLine {
    pattern: String,
    attrs: Vec<(String, AttrState)>,
}

/// The parsed `.gitattributes` files of a worktree, shallow to deep.
#[derive(Clone, Debug, Default)]
pub struct AttributesIndex {
    // (directory the file sits in, its lines); `None` is the root.
    files: Vec<(Option<RepoPathBuf>, Vec<AttrLine>)>,
}

fn parse_lines(content: &str) -> Vec<AttrLine> {
    let mut lines = vec![];
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let Some(pattern) = fields.next() else {
            continue;
        };
        let attrs = fields
            .map(|field| match field.split_once('=') {
                Some((name, value)) => (name.to_owned(), AttrState::Value(value.to_owned())),
                None => match field.strip_prefix('-') {
                    Some(name) => (name.to_owned(), AttrState::Unset),
                    None => (field.to_owned(), AttrState::Set),
                },
            })
            .collect();
        lines.push(AttrLine {
            pattern: pattern.to_owned(),
            attrs,
        });
    }
    lines
}

/// Matches one path segment against one pattern segment (`*`, `?`,
/// literal).
fn segment_matches(pattern: &str, segment: &str) -> bool {
    fn inner(p: &[u8], s: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&p[1..], s) || (!s.is_empty() && inner(p, &s[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&p[1..], &s[1..]),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &s[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), segment.as_bytes())
}

/// Gitattributes-style pattern match of `pattern` against a relative
/// slash path. A pattern without a slash matches the basename anywhere;
/// `**` crosses directories.
fn pattern_matches(pattern: &str, rel_path: &str) -> bool {
    if !pattern.contains('/') {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
        return segment_matches(pattern, basename);
    }
    let pattern = pattern.strip_prefix('/').unwrap_or(pattern);
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let path_parts: Vec<&str> = rel_path.split('/').collect();
    fn inner(pattern: &[&str], path: &[&str]) -> bool {
        match pattern.first() {
            None => path.is_empty(),
            Some(&"**") => {
                (0..=path.len()).any(|skip| inner(&pattern[1..], &path[skip..]))
            }
            Some(part) => match path.first() {
                Some(segment) if segment_matches(part, segment) => {
                    inner(&pattern[1..], &path[1..])
                }
                _ => false,
            },
        }
    }
    inner(&pattern_parts, &path_parts)
}

impl AttributesIndex {
    /// Adds the content of a `.gitattributes` file found in `dir`
    /// (`None` for the worktree root). Call shallow-first.
    pub fn add_file(&mut self, dir: Option<RepoPathBuf>, content: &str) {
        self.files.push((dir, parse_lines(content)));
    }

    /// The merged attribute map for a path: every matching line applies
    /// in file order, deeper files and later lines overriding.
    pub fn lookup(&self, path: &RepoPathBuf) -> BTreeMap<String, AttrState> {
        let mut merged = BTreeMap::new();
        for (dir, lines) in &self.files {
            let rel = match dir {
                None => path.as_str(),
                Some(dir) => {
                    if !path.starts_with_dir(dir) || path == dir {
                        continue;
                    }
                    &path.as_str()[dir.as_str().len() + 1..]
                }
            };
            for line in lines {
                if pattern_matches(&line.pattern, rel) {
                    for (name, state) in &line.attrs {
                        merged.insert(name.clone(), state.clone());
                    }
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> RepoPathBuf {
        RepoPathBuf::from_relative_string(s).unwrap()
    }

    #[test]
    fn test_basic_lookup() {
        let mut index = AttributesIndex::default();
        index.add_file(None, "*.txt text\n*.bin -text binary\n");
        let attrs = index.lookup(&path("notes/readme.txt"));
        assert_eq!(attrs.get("text"), Some(&AttrState::Set));
        let attrs = index.lookup(&path("blob.bin"));
        assert_eq!(attrs.get("text"), Some(&AttrState::Unset));
        assert_eq!(attrs.get("binary"), Some(&AttrState::Set));
    }

    #[test]
    fn test_value_attributes_and_override() {
        let mut index = AttributesIndex::default();
        index.add_file(None, "*.c eol=lf\n");
        index.add_file(Some(path("win")), "*.c eol=crlf\n");
        assert_eq!(
            index.lookup(&path("src/a.c")).get("eol"),
            Some(&AttrState::Value("lf".to_owned()))
        );
        // The deeper file wins inside its directory.
        assert_eq!(
            index.lookup(&path("win/b.c")).get("eol"),
            Some(&AttrState::Value("crlf".to_owned()))
        );
    }

    #[test]
    fn test_anchored_and_recursive_patterns() {
        let mut index = AttributesIndex::default();
        index.add_file(None, "/docs/*.md toc\nvendor/** generated\n");
        assert_eq!(
            index.lookup(&path("docs/guide.md")).get("toc"),
            Some(&AttrState::Set)
        );
        assert_eq!(index.lookup(&path("other/docs/guide.md")).get("toc"), None);
        assert_eq!(
            index.lookup(&path("vendor/lib/deep/file.js")).get("generated"),
            Some(&AttrState::Set)
        );
    }

    #[test]
    fn test_later_line_overrides() {
        let mut index = AttributesIndex::default();
        index.add_file(None, "*.dat binary\nkeep.dat -binary\n");
        assert_eq!(
            index.lookup(&path("keep.dat")).get("binary"),
            Some(&AttrState::Unset)
        );
    }
}
