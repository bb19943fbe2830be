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

//! Packfile stream decoding: header, per-object varint headers, zlib
//! payloads, ofs/ref delta resolution, and the trailing checksum.

use std::collections::HashMap;

use flate2::Crc;
use flate2::Decompress;
use flate2::FlushDecompress;
use flate2::Status;

use super::PackError;
use super::delta::apply_delta;
use super::delta::read_ofs_distance;
use crate::object::ObjectType;
use crate::object::hash_object;
use crate::object_id::HashKind;
use crate::object_id::Oid;

pub(crate) const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// A fully resolved object from a pack, positioned at `offset`.
#[derive(Clone, Debug)]
pub struct PackEntry {
    pub offset: u64,
    pub crc32: u32,
    pub object_type: ObjectType,
    pub payload: Vec<u8>,
    pub oid: Oid,
}

/// The outcome of decoding a complete pack stream.
#[derive(Debug)]
pub struct ParsedPack {
    /// Entries in pack order, every delta resolved.
    pub entries: Vec<PackEntry>,
    /// The trailing checksum bytes (also the pack's name).
    pub trailer: Vec<u8>,
}

fn malformed(reason: impl Into<String>) -> PackError {
    PackError::Malformed(reason.into())
}

fn byte_at(data: &[u8], pos: &mut usize) -> Result<u8, PackError> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| malformed("pack data is truncated"))?;
    *pos += 1;
    Ok(byte)
}

/// Reads the per-object header: 3-bit type code and varint inflated size.
fn read_entry_header(data: &[u8], pos: &mut usize) -> Result<(u8, u64), PackError> {
    let mut byte = byte_at(data, pos)?;
    let type_code = (byte >> 4) & 0x7;
    let mut size = u64::from(byte & 0xf);
    let mut shift = 4;
    while byte & 0x80 != 0 {
        byte = byte_at(data, pos)?;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if shift > 63 {
            return Err(malformed("object size varint is too large"));
        }
    }
    Ok((type_code, size))
}

/// Inflates one zlib stream starting at `*pos`, advancing past it.
fn inflate_at(data: &[u8], pos: &mut usize, expected_size: u64) -> Result<Vec<u8>, PackError> {
    let mut decompress = Decompress::new(true);
    let mut out = Vec::with_capacity(expected_size as usize);
    let mut buf = [0u8; 16384];
    loop {
        let before_in = decompress.total_in();
        let before_out = decompress.total_out();
        let status = decompress
            .decompress(&data[*pos..], &mut buf, FlushDecompress::None)
            .map_err(|err| malformed(format!("zlib error: {err}")))?;
        let consumed = (decompress.total_in() - before_in) as usize;
        let produced = (decompress.total_out() - before_out) as usize;
        *pos += consumed;
        out.extend_from_slice(&buf[..produced]);
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if consumed == 0 && produced == 0 {
                    return Err(malformed("zlib stream stalled"));
                }
            }
        }
    }
    if out.len() as u64 != expected_size {
        return Err(malformed(format!(
            "object inflated to {} bytes, header said {expected_size}",
            out.len()
        )));
    }
    Ok(out)
}

fn object_type_from_code(code: u8) -> Result<ObjectType, PackError> {
    match code {
        1 => Ok(ObjectType::Commit),
        2 => Ok(ObjectType::Tree),
        3 => Ok(ObjectType::Blob),
        4 => Ok(ObjectType::Tag),
        _ => Err(malformed(format!("unknown object type code {code}"))),
    }
}

enum PendingBody {
    Plain(ObjectType, Vec<u8>),
    Ofs { base_offset: u64, delta: Vec<u8> },
    Ref { base: Oid, delta: Vec<u8> },
}

struct Pending {
    offset: u64,
    crc32: u32,
    body: PendingBody,
}

fn read_pending(
    data: &[u8],
    pos: &mut usize,
    hash_kind: HashKind,
) -> Result<Pending, PackError> {
    let offset = *pos as u64;
    let (type_code, size) = read_entry_header(data, pos)?;
    let body = match type_code {
        6 => {
            let distance = read_ofs_distance(data, pos)?;
            let base_offset = offset
                .checked_sub(distance)
                .ok_or_else(|| malformed("ofs-delta points before the pack start"))?;
            let delta = inflate_at(data, pos, size)?;
            PendingBody::Ofs { base_offset, delta }
        }
        7 => {
            let oid_len = hash_kind.oid_len();
            let base = data
                .get(*pos..*pos + oid_len)
                .map(Oid::from_bytes)
                .ok_or_else(|| malformed("ref-delta base id is truncated"))?;
            *pos += oid_len;
            let delta = inflate_at(data, pos, size)?;
            PendingBody::Ref { base, delta }
        }
        code => {
            let object_type = object_type_from_code(code)?;
            let payload = inflate_at(data, pos, size)?;
            PendingBody::Plain(object_type, payload)
        }
    };
    let mut crc = Crc::new();
    crc.update(&data[offset as usize..*pos]);
    Ok(Pending {
        offset,
        crc32: crc.sum(),
        body,
    })
}

/// Decodes a whole pack stream. Ref-delta bases may come from earlier in
/// the stream or from `base_lookup` (the pre-existing store); unresolved
/// deltas are re-driven until a pass makes no progress.
pub fn parse_pack(
    data: &[u8],
    hash_kind: HashKind,
    base_lookup: &dyn Fn(&Oid) -> Option<(ObjectType, Vec<u8>)>,
) -> Result<ParsedPack, PackError> {
    let oid_len = hash_kind.oid_len();
    if data.len() < 12 + oid_len {
        return Err(malformed("pack is shorter than its framing"));
    }
    if &data[..4] != PACK_SIGNATURE {
        return Err(malformed("bad pack signature"));
    }
    let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
    if version != 2 && version != 3 {
        return Err(PackError::UnsupportedVersion(version));
    }
    let count = u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;

    let body_len = data.len() - oid_len;
    let trailer = data[body_len..].to_vec();
    if hash_kind.digest(&data[..body_len]) != trailer {
        return Err(PackError::ChecksumMismatch);
    }

    let mut pos = 12;
    let mut pending = Vec::with_capacity(count);
    for _ in 0..count {
        if pos >= body_len {
            return Err(malformed("pack object count overruns the data"));
        }
        pending.push(read_pending(&data[..body_len], &mut pos, hash_kind)?);
    }

    // Resolve plain objects first, then re-drive deltas until the
    // dependency order settles.
    let mut resolved: Vec<Option<(ObjectType, Vec<u8>)>> = vec![None; pending.len()];
    let mut by_offset: HashMap<u64, usize> = HashMap::new();
    let mut by_oid: HashMap<Oid, usize> = HashMap::new();
    let mut oids: Vec<Option<Oid>> = vec![None; pending.len()];

    let mut settle =
        |i: usize,
         object_type: ObjectType,
         payload: Vec<u8>,
         resolved: &mut Vec<Option<(ObjectType, Vec<u8>)>>,
         oids: &mut Vec<Option<Oid>>,
         by_offset: &mut HashMap<u64, usize>,
         by_oid: &mut HashMap<Oid, usize>| {
            let oid = hash_object(hash_kind, object_type, &payload);
            by_offset.insert(pending[i].offset, i);
            by_oid.insert(oid.clone(), i);
            oids[i] = Some(oid);
            resolved[i] = Some((object_type, payload));
        };

    for i in 0..pending.len() {
        if let PendingBody::Plain(object_type, payload) = &pending[i].body {
            let (object_type, payload) = (*object_type, payload.clone());
            settle(
                i,
                object_type,
                payload,
                &mut resolved,
                &mut oids,
                &mut by_offset,
                &mut by_oid,
            );
        }
    }

    loop {
        let mut progressed = false;
        for i in 0..pending.len() {
            if resolved[i].is_some() {
                continue;
            }
            let base = match &pending[i].body {
                PendingBody::Plain(..) => unreachable!(),
                PendingBody::Ofs { base_offset, .. } => by_offset
                    .get(base_offset)
                    .and_then(|&j| resolved[j].clone()),
                PendingBody::Ref { base, .. } => by_oid
                    .get(base)
                    .and_then(|&j| resolved[j].clone())
                    .or_else(|| base_lookup(base)),
            };
            let Some((base_type, base_payload)) = base else {
                continue;
            };
            let delta = match &pending[i].body {
                PendingBody::Ofs { delta, .. } | PendingBody::Ref { delta, .. } => delta,
                PendingBody::Plain(..) => unreachable!(),
            };
            let payload = apply_delta(&base_payload, delta)?;
            settle(
                i,
                base_type,
                payload,
                &mut resolved,
                &mut oids,
                &mut by_offset,
                &mut by_oid,
            );
            progressed = true;
        }
        if !progressed {
            break;
        }
    }

    if let Some(i) = resolved.iter().position(|r| r.is_none()) {
        let hash = match &pending[i].body {
            PendingBody::Ref { base, .. } => base.hex(),
            PendingBody::Ofs { base_offset, .. } => format!("at pack offset {base_offset}"),
            PendingBody::Plain(..) => unreachable!(),
        };
        return Err(PackError::MissingBaseObject { hash });
    }

    let entries = pending
        .iter()
        .zip(resolved)
        .zip(oids)
        .map(|((pending, resolved), oid)| {
            let (object_type, payload) = resolved.unwrap();
            PackEntry {
                offset: pending.offset,
                crc32: pending.crc32,
                object_type,
                payload,
                oid: oid.unwrap(),
            }
        })
        .collect();
    Ok(ParsedPack { entries, trailer })
}

/// Random access: decodes the single object at `offset`, chasing delta
/// chains through the same pack (ofs) or the store (ref).
pub fn read_object_at(
    data: &[u8],
    offset: u64,
    hash_kind: HashKind,
    base_lookup: &dyn Fn(&Oid) -> Option<(ObjectType, Vec<u8>)>,
) -> Result<(ObjectType, Vec<u8>), PackError> {
    let mut pos = offset as usize;
    if pos >= data.len() {
        return Err(malformed("offset is outside the pack"));
    }
    let body_len = data.len().saturating_sub(hash_kind.oid_len());
    let pending = read_pending(&data[..body_len], &mut pos, hash_kind)?;
    match pending.body {
        PendingBody::Plain(object_type, payload) => Ok((object_type, payload)),
        PendingBody::Ofs { base_offset, delta } => {
            let (base_type, base_payload) =
                read_object_at(data, base_offset, hash_kind, base_lookup)?;
            Ok((base_type, apply_delta(&base_payload, &delta)?))
        }
        PendingBody::Ref { base, delta } => {
            let (base_type, base_payload) =
                base_lookup(&base).ok_or(PackError::MissingBaseObject { hash: base.hex() })?;
            Ok((base_type, apply_delta(&base_payload, &delta)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::build_pack;
    use super::*;

    fn no_store(_oid: &Oid) -> Option<(ObjectType, Vec<u8>)> {
        None
    }

    #[test]
    fn test_rejects_bad_signature() {
        let data = vec![0u8; 40];
        assert!(matches!(
            parse_pack(&data, HashKind::Sha1, &no_store),
            Err(PackError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_corrupted_trailer() {
        let objects = vec![(
            Oid::from_hex("b45ef6fec89518d314f546fd6c3025367b721684"),
            ObjectType::Blob,
            b"Hello, World!".to_vec(),
        )];
        let built = build_pack(&objects, HashKind::Sha1, super::super::DEFAULT_DELTA_WINDOW);
        let mut data = built.data;
        let last = data.len() - 1;
        data[last] ^= 0xff;
        assert!(matches!(
            parse_pack(&data, HashKind::Sha1, &no_store),
            Err(PackError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_ref_delta_from_store() {
        // A hand-assembled pack with one ref-delta whose base lives only
        // in the "store".
        let base_payload = b"the quick brown fox".to_vec();
        let base_oid = hash_object(HashKind::Sha1, ObjectType::Blob, &base_payload);
        let target_payload = b"the quick red fox".to_vec();
        let delta = super::super::build_delta(&base_payload, &target_payload);

        let mut data = vec![];
        data.extend_from_slice(b"PACK");
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        // type 7 (ref-delta), size = delta.len() (small enough for one byte)
        assert!(delta.len() < 16);
        data.push(0x70 | delta.len() as u8);
        data.extend_from_slice(base_oid.as_bytes());
        let mut encoder =
            flate2::write::ZlibEncoder::new(vec![], flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &delta).unwrap();
        data.extend_from_slice(&encoder.finish().unwrap());
        let trailer = HashKind::Sha1.digest(&data);
        data.extend_from_slice(&trailer);

        let lookup = |oid: &Oid| {
            (*oid == base_oid).then(|| (ObjectType::Blob, base_payload.clone()))
        };
        let parsed = parse_pack(&data, HashKind::Sha1, &lookup).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].payload, target_payload);
        assert_eq!(
            parsed.entries[0].oid,
            hash_object(HashKind::Sha1, ObjectType::Blob, &target_payload)
        );

        // Without the store the base is missing.
        assert!(matches!(
            parse_pack(&data, HashKind::Sha1, &no_store),
            Err(PackError::MissingBaseObject { .. })
        ));
    }
}
