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

//! Deterministic packfile construction with sliding-window deltification.

use std::io::Write as _;

use flate2::Compression;
use flate2::Crc;
use flate2::write::ZlibEncoder;

use super::delta::build_delta;
use super::delta::write_ofs_distance;
use super::parse::PACK_SIGNATURE;
use crate::hex_util;
use crate::object::ObjectType;
use crate::object_id::HashKind;
use crate::object_id::Oid;

/// A finished pack stream plus the bookkeeping an index needs.
#[derive(Debug)]
pub struct BuiltPack {
    pub data: Vec<u8>,
    /// `(oid, offset, crc32)` per object, in pack order.
    pub index_entries: Vec<(Oid, u64, u32)>,
    /// Hex of the trailing checksum; names the pack file.
    pub trailer_hex: String,
}

fn type_code(object_type: ObjectType) -> u8 {
    match object_type {
        ObjectType::Commit => 1,
        ObjectType::Tree => 2,
        ObjectType::Blob => 3,
        ObjectType::Tag => 4,
    }
}

fn emission_rank(object_type: ObjectType) -> u8 {
    match object_type {
        ObjectType::Commit => 0,
        ObjectType::Tag => 1,
        ObjectType::Tree => 2,
        ObjectType::Blob => 3,
    }
}

fn write_entry_header(out: &mut Vec<u8>, type_code: u8, size: u64) {
    let mut byte = (type_code << 4) | (size & 0xf) as u8;
    let mut rest = size >> 4;
    while rest > 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
}

fn deflate(payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(vec![], Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}

/// Emits the given objects as a pack stream.
///
/// Objects are ordered commits, tags, trees, then blobs, preserving the
/// caller's order within each group (callers pass reachability order, so
/// the whole stream is deterministic for a given input). Each object may
/// be stored as an ofs-delta against one of the last `window` same-type
/// objects when that shrinks the payload enough to matter.
pub fn build_pack(
    objects: &[(Oid, ObjectType, Vec<u8>)],
    hash_kind: HashKind,
    window: usize,
) -> BuiltPack {
    let mut order: Vec<usize> = (0..objects.len()).collect();
    order.sort_by_key(|&i| emission_rank(objects[i].1));

    let mut data = vec![];
    data.extend_from_slice(PACK_SIGNATURE);
    data.extend_from_slice(&2u32.to_be_bytes());
    data.extend_from_slice(&(objects.len() as u32).to_be_bytes());

    // (object index, offset) of recently emitted objects, per the window.
    let mut recent: Vec<(usize, u64)> = vec![];
    let mut index_entries = vec![];
    for &i in &order {
        let (oid, object_type, payload) = &objects[i];
        let offset = data.len() as u64;

        let mut chosen: Option<(u64, Vec<u8>)> = None;
        for &(j, base_offset) in recent.iter().rev() {
            if objects[j].1 != *object_type {
                continue;
            }
            let delta = build_delta(&objects[j].2, payload);
            // Worth a delta only when clearly smaller than the object.
            if delta.len() * 10 < payload.len() * 7 {
                chosen = Some((base_offset, delta));
                break;
            }
        }

        match chosen {
            Some((base_offset, delta)) => {
                write_entry_header(&mut data, 6, delta.len() as u64);
                write_ofs_distance(&mut data, offset - base_offset);
                data.extend_from_slice(&deflate(&delta));
            }
            None => {
                write_entry_header(&mut data, type_code(*object_type), payload.len() as u64);
                data.extend_from_slice(&deflate(payload));
            }
        }

        let mut crc = Crc::new();
        crc.update(&data[offset as usize..]);
        index_entries.push((oid.clone(), offset, crc.sum()));

        recent.push((i, offset));
        if recent.len() > window {
            recent.remove(0);
        }
    }

    let trailer = hash_kind.digest(&data);
    data.extend_from_slice(&trailer);
    BuiltPack {
        data,
        index_entries,
        trailer_hex: hex_util::encode_hex(&trailer),
    }
}

#[cfg(test)]
mod tests {
    use super::super::DEFAULT_DELTA_WINDOW;
    use super::super::parse_pack;
    use super::*;
    use crate::object::hash_object;

    fn blob(content: &[u8]) -> (Oid, ObjectType, Vec<u8>) {
        (
            hash_object(HashKind::Sha1, ObjectType::Blob, content),
            ObjectType::Blob,
            content.to_vec(),
        )
    }

    #[test]
    fn test_round_trip_plain() {
        let objects = vec![blob(b"alpha"), blob(b"beta"), blob(b"gamma")];
        let built = build_pack(&objects, HashKind::Sha1, DEFAULT_DELTA_WINDOW);
        let parsed = parse_pack(&built.data, HashKind::Sha1, &|_| None).unwrap();
        assert_eq!(parsed.entries.len(), 3);
        let mut expected: Vec<_> = objects.iter().map(|(oid, ..)| oid.clone()).collect();
        let mut actual: Vec<_> = parsed.entries.iter().map(|e| e.oid.clone()).collect();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
        assert_eq!(hex_util::encode_hex(&parsed.trailer), built.trailer_hex);
    }

    #[test]
    fn test_round_trip_with_deltas() {
        // Large, similar payloads so the window actually deltifies.
        let big: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut second = big.clone();
        second.extend_from_slice(b"tail change");
        let objects = vec![blob(&big), blob(&second)];
        let built = build_pack(&objects, HashKind::Sha1, DEFAULT_DELTA_WINDOW);
        // The second object came out as a delta, so the pack is far
        // smaller than two full copies.
        assert!(built.data.len() < big.len() * 2);
        let parsed = parse_pack(&built.data, HashKind::Sha1, &|_| None).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        for (entry, (oid, _, payload)) in parsed.entries.iter().zip(&objects) {
            assert_eq!(&entry.oid, oid);
            assert_eq!(&entry.payload, payload);
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let objects = vec![blob(b"alpha"), blob(b"beta")];
        let first = build_pack(&objects, HashKind::Sha1, DEFAULT_DELTA_WINDOW);
        let second = build_pack(&objects, HashKind::Sha1, DEFAULT_DELTA_WINDOW);
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn test_commits_precede_trees_and_blobs() {
        let tree = (
            hash_object(HashKind::Sha1, ObjectType::Tree, b""),
            ObjectType::Tree,
            vec![],
        );
        let objects = vec![blob(b"content"), tree];
        let built = build_pack(&objects, HashKind::Sha1, DEFAULT_DELTA_WINDOW);
        let parsed = parse_pack(&built.data, HashKind::Sha1, &|_| None).unwrap();
        assert_eq!(parsed.entries[0].object_type, ObjectType::Tree);
        assert_eq!(parsed.entries[1].object_type, ObjectType::Blob);
    }
}
