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

//! The typed object records (blob, tree, commit, tag) and their canonical
//! byte representations.

use std::cmp::Ordering;
use std::fmt;

use bstr::BStr;
use bstr::BString;
use bstr::ByteSlice as _;
use thiserror::Error;

use crate::object_id::HashKind;
use crate::object_id::Oid;

/// The four storable object kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Error raised when object bytes violate a serialization invariant.
#[derive(Debug, Error)]
#[error("Malformed {object_type} object: {reason}")]
pub struct ObjectParseError {
    pub object_type: ObjectType,
    pub reason: String,
}

impl ObjectParseError {
    fn new(object_type: ObjectType, reason: impl Into<String>) -> Self {
        Self {
            object_type,
            reason: reason.into(),
        }
    }
}

/// Builds the `"<type> <decimal-length>\0"` header that prefixes every
/// object payload, both for hashing and for loose storage.
pub fn object_header(object_type: ObjectType, payload_len: usize) -> Vec<u8> {
    format!("{} {payload_len}\0", object_type.name()).into_bytes()
}

/// Derives the object id of `payload` under the given hash family.
pub fn hash_object(kind: HashKind, object_type: ObjectType, payload: &[u8]) -> Oid {
    let mut data = object_header(object_type, payload.len());
    data.extend_from_slice(payload);
    Oid::new(kind.digest(&data))
}

/// An author/committer/tagger stamp: identity plus a wall-clock time in
/// whole seconds and a timezone offset in minutes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub tz_offset_minutes: i32,
}

impl Signature {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        tz_offset_minutes: i32,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz_offset_minutes,
        }
    }

    /// A stamp for the current wall-clock time in the local timezone.
    pub fn now(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = chrono::Local::now();
        Self {
            name: name.into(),
            email: email.into(),
            timestamp: now.timestamp(),
            tz_offset_minutes: now.offset().local_minus_utc() / 60,
        }
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(b" <");
        out.extend_from_slice(self.email.as_bytes());
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.timestamp.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.tz_string().as_bytes());
    }

    /// Formats the timezone offset as `±HHMM`.
    pub fn tz_string(&self) -> String {
        let sign = if self.tz_offset_minutes < 0 { '-' } else { '+' };
        let abs = self.tz_offset_minutes.unsigned_abs();
        format!("{sign}{:02}{:02}", abs / 60, abs % 60)
    }

    fn parse(line: &[u8], object_type: ObjectType) -> Result<Self, ObjectParseError> {
        let err = |reason: &str| ObjectParseError::new(object_type, reason);
        let open = line
            .find_byte(b'<')
            .ok_or_else(|| err("identity is missing '<'"))?;
        let close = line[open..]
            .find_byte(b'>')
            .map(|i| i + open)
            .ok_or_else(|| err("identity is missing '>'"))?;
        let name = line[..open]
            .strip_suffix(b" ")
            .unwrap_or(&line[..open])
            .to_str()
            .map_err(|_| err("identity name is not UTF-8"))?
            .to_owned();
        let email = line[open + 1..close]
            .to_str()
            .map_err(|_| err("identity email is not UTF-8"))?
            .to_owned();
        let rest = line[close + 1..].trim_start();
        let mut fields = rest.split_str(b" ");
        let timestamp = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| err("identity has no timestamp"))?;
        let tz = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .ok_or_else(|| err("identity has no timezone"))?;
        let tz_offset_minutes = parse_tz_offset(tz).ok_or_else(|| err("bad timezone offset"))?;
        Ok(Self {
            name,
            email,
            timestamp,
            tz_offset_minutes,
        })
    }
}

fn parse_tz_offset(tz: &str) -> Option<i32> {
    let (sign, digits) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

/// The file kind and permission bits of a tree entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// A subdirectory (`40000`).
    Tree,
    /// A regular file (`100644`).
    Blob,
    /// A regular file with the executable bit (`100755`).
    BlobExecutable,
    /// A symlink whose blob holds the target (`120000`).
    Link,
    /// A gitlink recording a submodule commit (`160000`).
    Commit,
}

impl FileMode {
    pub fn as_octal_str(self) -> &'static str {
        match self {
            Self::Tree => "40000",
            Self::Blob => "100644",
            Self::BlobExecutable => "100755",
            Self::Link => "120000",
            Self::Commit => "160000",
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Tree => 0o40000,
            Self::Blob => 0o100644,
            Self::BlobExecutable => 0o100755,
            Self::Link => 0o120000,
            Self::Commit => 0o160000,
        }
    }

    pub fn from_u32(mode: u32) -> Option<Self> {
        match mode {
            0o40000 => Some(Self::Tree),
            // Historical packs contain group-writable file modes.
            0o100644 | 0o100664 => Some(Self::Blob),
            0o100755 => Some(Self::BlobExecutable),
            0o120000 => Some(Self::Link),
            0o160000 => Some(Self::Commit),
            _ => None,
        }
    }

    fn from_octal(digits: &[u8]) -> Option<Self> {
        let mut mode = 0u32;
        for &b in digits {
            if !(b'0'..=b'7').contains(&b) {
                return None;
            }
            mode = mode * 8 + u32::from(b - b'0');
        }
        Self::from_u32(mode)
    }

    pub fn is_tree(self) -> bool {
        self == Self::Tree
    }
}

/// One `(mode, name, target)` row of a tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: BString,
    pub oid: Oid,
}

/// Git's tree-entry comparison: byte-wise on names, with directory names
/// compared as if they had a trailing `/`.
pub fn tree_entry_cmp(a_name: &BStr, a_is_tree: bool, b_name: &BStr, b_is_tree: bool) -> Ordering {
    let a = a_name.as_bytes();
    let b = b_name.as_bytes();
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Equal => {}
        ord => return ord,
    }
    let a_next = a.get(common).copied().or(a_is_tree.then_some(b'/'));
    let b_next = b.get(common).copied().or(b_is_tree.then_some(b'/'));
    a_next.cmp(&b_next)
}

/// An ordered sequence of tree entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree from entries in any order. The canonical sort is
    /// applied here; duplicate names are rejected.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> Result<Self, ObjectParseError> {
        entries.sort_by(|a, b| {
            tree_entry_cmp(
                a.name.as_ref(),
                a.mode.is_tree(),
                b.name.as_ref(),
                b.mode.is_tree(),
            )
        });
        for window in entries.windows(2) {
            if window[0].name == window[1].name {
                return Err(ObjectParseError::new(
                    ObjectType::Tree,
                    format!("duplicate entry name {:?}", window[0].name),
                ));
            }
        }
        Ok(Self { entries })
    }

    /// Wraps entries already known to be in canonical order.
    pub(crate) fn from_sorted_entries(entries: Vec<TreeEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &BStr) -> Option<&TreeEntry> {
        self.entries.iter().find(|entry| entry.name.as_bstr() == name)
    }

    fn serialize_into(&self, out: &mut Vec<u8>) {
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.as_octal_str().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
    }

    fn parse(data: &[u8], oid_len: usize) -> Result<Self, ObjectParseError> {
        let err = |reason: &str| ObjectParseError::new(ObjectType::Tree, reason);
        let mut entries = vec![];
        let mut rest = data;
        while !rest.is_empty() {
            let space = rest.find_byte(b' ').ok_or_else(|| err("entry has no mode"))?;
            let mode = FileMode::from_octal(&rest[..space])
                .ok_or_else(|| err("entry has an unrecognized mode"))?;
            rest = &rest[space + 1..];
            let nul = rest
                .find_byte(0)
                .ok_or_else(|| err("entry name is unterminated"))?;
            let name = BString::from(&rest[..nul]);
            if name.is_empty() {
                return Err(err("entry name is empty"));
            }
            rest = &rest[nul + 1..];
            if rest.len() < oid_len {
                return Err(err("entry id is truncated"));
            }
            let oid = Oid::from_bytes(&rest[..oid_len]);
            rest = &rest[oid_len..];
            entries.push(TreeEntry { mode, name, oid });
        }
        Ok(Self { entries })
    }
}

/// A snapshot of the tree with ancestry, authorship, and a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub tree: Oid,
    pub parents: Vec<Oid>,
    pub author: Signature,
    pub committer: Signature,
    /// Raw signature block, preserved but never verified.
    pub gpgsig: Option<BString>,
    /// Headers this implementation doesn't interpret (e.g. `mergetag`,
    /// `encoding`), preserved in order for byte-identical round-trips.
    pub extra_headers: Vec<(BString, BString)>,
    pub message: BString,
}

/// An annotated tag: a named, stamped pointer to another object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub object: Oid,
    pub object_type: ObjectType,
    pub name: String,
    pub tagger: Option<Signature>,
    pub message: BString,
}

/// A parsed object of any kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(BString),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Blob(_) => ObjectType::Blob,
            Self::Tree(_) => ObjectType::Tree,
            Self::Commit(_) => ObjectType::Commit,
            Self::Tag(_) => ObjectType::Tag,
        }
    }

    /// Canonical byte representation, the exact bytes that get hashed and
    /// stored.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![];
        match self {
            Self::Blob(content) => out.extend_from_slice(content),
            Self::Tree(tree) => tree.serialize_into(&mut out),
            Self::Commit(commit) => serialize_commit(commit, &mut out),
            Self::Tag(tag) => serialize_tag(tag, &mut out),
        }
        out
    }

    /// Derives this object's id under the given hash family.
    pub fn id(&self, kind: HashKind) -> Oid {
        hash_object(kind, self.object_type(), &self.serialize())
    }

    pub fn parse(
        object_type: ObjectType,
        data: &[u8],
        kind: HashKind,
    ) -> Result<Self, ObjectParseError> {
        match object_type {
            ObjectType::Blob => Ok(Self::Blob(BString::from(data))),
            ObjectType::Tree => Ok(Self::Tree(Tree::parse(data, kind.oid_len())?)),
            ObjectType::Commit => Ok(Self::Commit(parse_commit(data)?)),
            ObjectType::Tag => Ok(Self::Tag(parse_tag(data)?)),
        }
    }

    pub fn into_commit(self) -> Option<Commit> {
        match self {
            Self::Commit(commit) => Some(commit),
            _ => None,
        }
    }

    pub fn into_tree(self) -> Option<Tree> {
        match self {
            Self::Tree(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn into_blob(self) -> Option<BString> {
        match self {
            Self::Blob(content) => Some(content),
            _ => None,
        }
    }

    pub fn into_tag(self) -> Option<Tag> {
        match self {
            Self::Tag(tag) => Some(tag),
            _ => None,
        }
    }
}

/// A single trailing newline after the message is canonical.
fn normalize_message(message: &BStr) -> BString {
    let trimmed = message.trim_end_with(|c| c == '\n');
    let mut out = BString::from(trimmed);
    out.push(b'\n');
    out
}

fn write_folded_header(out: &mut Vec<u8>, key: &[u8], value: &BStr) {
    out.extend_from_slice(key);
    out.push(b' ');
    let mut lines = value.split_str(b"\n");
    if let Some(first) = lines.next() {
        out.extend_from_slice(first);
    }
    out.push(b'\n');
    for line in lines {
        // Continuation lines carry a leading space.
        out.push(b' ');
        out.extend_from_slice(line);
        out.push(b'\n');
    }
}

fn serialize_commit(commit: &Commit, out: &mut Vec<u8>) {
    out.extend_from_slice(b"tree ");
    out.extend_from_slice(commit.tree.hex().as_bytes());
    out.push(b'\n');
    for parent in &commit.parents {
        out.extend_from_slice(b"parent ");
        out.extend_from_slice(parent.hex().as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(b"author ");
    commit.author.serialize_into(out);
    out.push(b'\n');
    out.extend_from_slice(b"committer ");
    commit.committer.serialize_into(out);
    out.push(b'\n');
    for (key, value) in &commit.extra_headers {
        write_folded_header(out, key, value.as_bstr());
    }
    if let Some(gpgsig) = &commit.gpgsig {
        write_folded_header(out, b"gpgsig", gpgsig.as_bstr());
    }
    out.push(b'\n');
    out.extend_from_slice(&normalize_message(commit.message.as_bstr()));
}

fn serialize_tag(tag: &Tag, out: &mut Vec<u8>) {
    out.extend_from_slice(b"object ");
    out.extend_from_slice(tag.object.hex().as_bytes());
    out.push(b'\n');
    out.extend_from_slice(b"type ");
    out.extend_from_slice(tag.object_type.name().as_bytes());
    out.push(b'\n');
    out.extend_from_slice(b"tag ");
    out.extend_from_slice(tag.name.as_bytes());
    out.push(b'\n');
    if let Some(tagger) = &tag.tagger {
        out.extend_from_slice(b"tagger ");
        tagger.serialize_into(out);
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(&normalize_message(tag.message.as_bstr()));
}

/// Splits header bytes into `(key, value)` pairs, unfolding continuation
/// lines, and returns the message remainder.
fn split_headers(data: &[u8]) -> (Vec<(BString, BString)>, BString) {
    let mut headers: Vec<(BString, BString)> = vec![];
    let mut rest = data;
    loop {
        match rest.find_byte(b'\n') {
            None => {
                // Header section was unterminated; treat the remainder as
                // the final header line.
                if !rest.is_empty() {
                    push_header_line(&mut headers, rest);
                }
                return (headers, BString::from(""));
            }
            Some(0) => return (headers, BString::from(&rest[1..])),
            Some(nl) => {
                push_header_line(&mut headers, &rest[..nl]);
                rest = &rest[nl + 1..];
            }
        }
    }
}

fn push_header_line(headers: &mut Vec<(BString, BString)>, line: &[u8]) {
    if let Some(continuation) = line.strip_prefix(b" ") {
        if let Some((_, value)) = headers.last_mut() {
            value.push(b'\n');
            value.extend_from_slice(continuation);
            return;
        }
    }
    match line.find_byte(b' ') {
        Some(space) => headers.push((
            BString::from(&line[..space]),
            BString::from(&line[space + 1..]),
        )),
        None => headers.push((BString::from(line), BString::from(""))),
    }
}

fn parse_commit(data: &[u8]) -> Result<Commit, ObjectParseError> {
    let err = |reason: &str| ObjectParseError::new(ObjectType::Commit, reason);
    let (headers, message) = split_headers(data);
    let mut tree = None;
    let mut parents = vec![];
    let mut author = None;
    let mut committer = None;
    let mut gpgsig = None;
    let mut extra_headers = vec![];
    for (key, value) in headers {
        match key.as_slice() {
            b"tree" => {
                tree = Some(
                    Oid::try_from_hex(value.as_slice()).ok_or_else(|| err("bad tree id"))?,
                );
            }
            b"parent" => {
                parents.push(
                    Oid::try_from_hex(value.as_slice()).ok_or_else(|| err("bad parent id"))?,
                );
            }
            b"author" => author = Some(Signature::parse(&value, ObjectType::Commit)?),
            b"committer" => committer = Some(Signature::parse(&value, ObjectType::Commit)?),
            b"gpgsig" => gpgsig = Some(value),
            _ => extra_headers.push((key, value)),
        }
    }
    Ok(Commit {
        tree: tree.ok_or_else(|| err("missing tree header"))?,
        parents,
        author: author.ok_or_else(|| err("missing author header"))?,
        committer: committer.ok_or_else(|| err("missing committer header"))?,
        gpgsig,
        extra_headers,
        message,
    })
}

fn parse_tag(data: &[u8]) -> Result<Tag, ObjectParseError> {
    let err = |reason: &str| ObjectParseError::new(ObjectType::Tag, reason);
    let (headers, message) = split_headers(data);
    let mut object = None;
    let mut object_type = None;
    let mut name = None;
    let mut tagger = None;
    for (key, value) in headers {
        match key.as_slice() {
            b"object" => {
                object = Some(
                    Oid::try_from_hex(value.as_slice()).ok_or_else(|| err("bad object id"))?,
                );
            }
            b"type" => {
                let type_name = value.to_str().map_err(|_| err("bad type header"))?;
                object_type =
                    Some(ObjectType::from_name(type_name).ok_or_else(|| err("bad type header"))?);
            }
            b"tag" => {
                name = Some(
                    value
                        .to_str()
                        .map_err(|_| err("tag name is not UTF-8"))?
                        .to_owned(),
                );
            }
            b"tagger" => tagger = Some(Signature::parse(&value, ObjectType::Tag)?),
            _ => {}
        }
    }
    Ok(Tag {
        object: object.ok_or_else(|| err("missing object header"))?,
        object_type: object_type.ok_or_else(|| err("missing type header"))?,
        name: name.ok_or_else(|| err("missing tag header"))?,
        tagger,
        message,
    })
}
