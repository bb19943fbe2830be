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

//! The `.idx` (version 2) companion of a stored pack: sorted object ids
//! with their pack offsets, for O(log n) random reads.

use super::PackError;
use crate::object_id::HashKind;
use crate::object_id::Oid;

const IDX_SIGNATURE: [u8; 4] = [0xff, 0x74, 0x4f, 0x63];
const IDX_VERSION: u32 = 2;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// A parsed `.idx` file.
#[derive(Debug)]
pub struct PackIndex {
    oids: Vec<Oid>,
    offsets: Vec<u64>,
}

impl PackIndex {
    /// Serializes an index for a pack whose objects sit at the given
    /// offsets. `pack_trailer` is the pack's trailing checksum.
    pub fn build(
        entries: &[(Oid, u64, u32)],
        pack_trailer: &[u8],
        hash_kind: HashKind,
    ) -> Vec<u8> {
        let mut sorted: Vec<&(Oid, u64, u32)> = entries.iter().collect();
        sorted.sort_by_key(|(oid, ..)| oid.clone());

        let mut out = vec![];
        out.extend_from_slice(&IDX_SIGNATURE);
        out.extend_from_slice(&IDX_VERSION.to_be_bytes());
        let mut fanout = [0u32; 256];
        for (oid, ..) in &sorted {
            fanout[usize::from(oid.as_bytes()[0])] += 1;
        }
        let mut running = 0u32;
        for count in fanout {
            running += count;
            out.extend_from_slice(&running.to_be_bytes());
        }
        for (oid, ..) in &sorted {
            out.extend_from_slice(oid.as_bytes());
        }
        for (_, _, crc) in &sorted {
            out.extend_from_slice(&crc.to_be_bytes());
        }
        let mut large_offsets: Vec<u64> = vec![];
        for (_, offset, _) in &sorted {
            if *offset < u64::from(LARGE_OFFSET_FLAG) {
                out.extend_from_slice(&(*offset as u32).to_be_bytes());
            } else {
                let slot = LARGE_OFFSET_FLAG | large_offsets.len() as u32;
                large_offsets.push(*offset);
                out.extend_from_slice(&slot.to_be_bytes());
            }
        }
        for offset in large_offsets {
            out.extend_from_slice(&offset.to_be_bytes());
        }
        out.extend_from_slice(pack_trailer);
        let checksum = hash_kind.digest(&out);
        out.extend_from_slice(&checksum);
        out
    }

    pub fn parse(data: &[u8], hash_kind: HashKind) -> Result<Self, PackError> {
        let oid_len = hash_kind.oid_len();
        let malformed = |reason: &str| PackError::Malformed(format!("idx: {reason}"));
        if data.len() < 8 + 1024 + 2 * oid_len {
            return Err(malformed("file is truncated"));
        }
        if data[..4] != IDX_SIGNATURE {
            return Err(malformed("bad signature"));
        }
        let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
        if version != IDX_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }
        let (body, checksum) = data.split_at(data.len() - oid_len);
        if hash_kind.digest(body) != checksum {
            return Err(PackError::ChecksumMismatch);
        }

        let fanout_end = 8 + 1024;
        let count =
            u32::from_be_bytes(data[fanout_end - 4..fanout_end].try_into().unwrap()) as usize;
        let oids_end = fanout_end + count * oid_len;
        let crcs_end = oids_end + count * 4;
        let offsets_end = crcs_end + count * 4;
        if body.len() < offsets_end + oid_len {
            return Err(malformed("tables are truncated"));
        }

        let mut oids = Vec::with_capacity(count);
        for i in 0..count {
            let start = fanout_end + i * oid_len;
            oids.push(Oid::from_bytes(&data[start..start + oid_len]));
        }
        let large_table = &body[offsets_end..body.len() - oid_len];
        let mut offsets = Vec::with_capacity(count);
        for i in 0..count {
            let start = crcs_end + i * 4;
            let raw = u32::from_be_bytes(data[start..start + 4].try_into().unwrap());
            if raw & LARGE_OFFSET_FLAG == 0 {
                offsets.push(u64::from(raw));
            } else {
                let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
                let entry = large_table
                    .get(slot * 8..slot * 8 + 8)
                    .ok_or_else(|| malformed("large offset out of range"))?;
                offsets.push(u64::from_be_bytes(entry.try_into().unwrap()));
            }
        }
        Ok(Self { oids, offsets })
    }

    pub fn offset_of(&self, oid: &Oid) -> Option<u64> {
        let i = self.oids.binary_search(oid).ok()?;
        Some(self.offsets[i])
    }

    pub fn oids(&self) -> &[Oid] {
        &self.oids
    }

    pub fn len(&self) -> usize {
        self.oids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::super::DEFAULT_DELTA_WINDOW;
    use super::super::build_pack;
    use super::*;
    use crate::object::ObjectType;
    use crate::object::hash_object;

    #[test]
    fn test_build_and_lookup() {
        let objects: Vec<_> = [b"alpha".as_slice(), b"beta", b"gamma", b"delta"]
            .iter()
            .map(|content| {
                (
                    hash_object(HashKind::Sha1, ObjectType::Blob, content),
                    ObjectType::Blob,
                    content.to_vec(),
                )
            })
            .collect();
        let built = build_pack(&objects, HashKind::Sha1, DEFAULT_DELTA_WINDOW);
        let trailer = &built.data[built.data.len() - 20..];
        let idx_data = PackIndex::build(&built.index_entries, trailer, HashKind::Sha1);
        let index = PackIndex::parse(&idx_data, HashKind::Sha1).unwrap();
        assert_eq!(index.len(), objects.len());
        for (oid, offset, _) in &built.index_entries {
            assert_eq!(index.offset_of(oid), Some(*offset));
        }
        let absent = Oid::from_hex("0000000000000000000000000000000000000001");
        assert_eq!(index.offset_of(&absent), None);
        // Ids come back sorted.
        let mut sorted = index.oids().to_vec();
        sorted.sort();
        assert_eq!(sorted, index.oids());
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let idx_data = PackIndex::build(&[], &[0u8; 20], HashKind::Sha1);
        let mut corrupted = idx_data.clone();
        corrupted[10] ^= 0x01;
        assert!(matches!(
            PackIndex::parse(&corrupted, HashKind::Sha1),
            Err(PackError::ChecksumMismatch)
        ));
        assert!(PackIndex::parse(&idx_data, HashKind::Sha1).is_ok());
    }
}
