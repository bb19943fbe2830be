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

//! The copy/insert delta instruction stream and the variable-length
//! integer encodings packfiles use.

use super::PackError;

/// Reads a little-endian base-128 varint (delta header sizes).
pub(crate) fn read_size_varint(data: &[u8], pos: &mut usize) -> Result<u64, PackError> {
    let mut value: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| PackError::Malformed("varint is truncated".to_owned()))?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(PackError::Malformed("varint is too large".to_owned()));
        }
    }
}

pub(crate) fn write_size_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Reads the backward distance of an ofs-delta: big-endian 7-bit groups
/// with an off-by-one per continuation.
pub(crate) fn read_ofs_distance(data: &[u8], pos: &mut usize) -> Result<u64, PackError> {
    let mut byte = *data
        .get(*pos)
        .ok_or_else(|| PackError::Malformed("ofs-delta distance is truncated".to_owned()))?;
    *pos += 1;
    let mut value = u64::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = *data
            .get(*pos)
            .ok_or_else(|| PackError::Malformed("ofs-delta distance is truncated".to_owned()))?;
        *pos += 1;
        value = ((value + 1) << 7) | u64::from(byte & 0x7f);
    }
    Ok(value)
}

pub(crate) fn write_ofs_distance(out: &mut Vec<u8>, value: u64) {
    let mut bytes = vec![(value & 0x7f) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        rest -= 1;
        bytes.push((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    bytes.reverse();
    out.extend_from_slice(&bytes);
}

/// Reconstructs target bytes from a base and a delta instruction stream.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut pos = 0;
    let base_size = read_size_varint(delta, &mut pos)?;
    if base_size != base.len() as u64 {
        return Err(PackError::Malformed(format!(
            "delta expects a {base_size}-byte base, got {}",
            base.len()
        )));
    }
    let result_size = read_size_varint(delta, &mut pos)?;
    let mut result = Vec::with_capacity(result_size as usize);
    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;
        if cmd & 0x80 != 0 {
            // Copy from base: low bits select which offset/size bytes follow.
            let mut offset: u64 = 0;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| {
                        PackError::Malformed("copy instruction is truncated".to_owned())
                    })?;
                    pos += 1;
                    offset |= u64::from(byte) << (8 * i);
                }
            }
            let mut size: u64 = 0;
            for i in 0..3 {
                if cmd & (1 << (4 + i)) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| {
                        PackError::Malformed("copy instruction is truncated".to_owned())
                    })?;
                    pos += 1;
                    size |= u64::from(byte) << (8 * i);
                }
            }
            if size == 0 {
                size = 0x10000;
            }
            let start = offset as usize;
            let end = start
                .checked_add(size as usize)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| {
                    PackError::Malformed("copy instruction reads past the base".to_owned())
                })?;
            result.extend_from_slice(&base[start..end]);
        } else if cmd != 0 {
            // Insert the next `cmd` literal bytes.
            let len = cmd as usize;
            let chunk = delta
                .get(pos..pos + len)
                .ok_or_else(|| PackError::Malformed("insert instruction is truncated".to_owned()))?;
            pos += len;
            result.extend_from_slice(chunk);
        } else {
            return Err(PackError::Malformed(
                "delta instruction byte is zero".to_owned(),
            ));
        }
    }
    if result.len() as u64 != result_size {
        return Err(PackError::Malformed(format!(
            "delta produced {} bytes, expected {result_size}",
            result.len()
        )));
    }
    Ok(result)
}

fn push_copy(out: &mut Vec<u8>, offset: u64, size: u64) {
    debug_assert!(size > 0 && size <= 0xFFFF);
    let mut cmd: u8 = 0x80;
    let mut operands = vec![];
    for i in 0..4 {
        let byte = ((offset >> (8 * i)) & 0xff) as u8;
        if byte != 0 {
            cmd |= 1 << i;
            operands.push(byte);
        }
    }
    for i in 0..2 {
        let byte = ((size >> (8 * i)) & 0xff) as u8;
        if byte != 0 {
            cmd |= 1 << (4 + i);
            operands.push(byte);
        }
    }
    out.push(cmd);
    out.extend_from_slice(&operands);
}

fn push_insert(out: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(0x7f) {
        out.push(chunk.len() as u8);
        out.extend_from_slice(chunk);
    }
}

/// Builds a delta turning `base` into `target`.
///
/// Shared prefix and suffix become copy instructions, the differing middle
/// is inserted literally. Deterministic for a given input pair; no
/// similarity search.
pub fn build_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = vec![];
    write_size_varint(&mut out, base.len() as u64);
    write_size_varint(&mut out, target.len() as u64);

    let limit = base.len().min(target.len());
    let prefix = std::iter::zip(base, target).take_while(|(a, b)| a == b).count();
    let suffix = std::iter::zip(base.iter().rev(), target.iter().rev())
        .take(limit - prefix)
        .take_while(|(a, b)| a == b)
        .count();

    let mut emitted = 0;
    while emitted < prefix {
        let size = (prefix - emitted).min(0xFFFF);
        push_copy(&mut out, emitted as u64, size as u64);
        emitted += size;
    }
    push_insert(&mut out, &target[prefix..target.len() - suffix]);
    let mut suffix_emitted = 0;
    while suffix_emitted < suffix {
        let offset = base.len() - suffix + suffix_emitted;
        let size = (suffix - suffix_emitted).min(0xFFFF);
        push_copy(&mut out, offset as u64, size as u64);
        suffix_emitted += size;
    }
    out
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn test_size_varint_round_trip() {
        for value in [0u64, 1, 0x7f, 0x80, 0x3fff, 0x4000, u64::from(u32::MAX)] {
            let mut out = vec![];
            write_size_varint(&mut out, value);
            let mut pos = 0;
            assert_eq!(read_size_varint(&out, &mut pos).unwrap(), value);
            assert_eq!(pos, out.len());
        }
    }

    #[test]
    fn test_ofs_distance_round_trip() {
        for value in [0u64, 1, 0x7f, 0x80, 0x4000, 123_456_789] {
            let mut out = vec![];
            write_ofs_distance(&mut out, value);
            let mut pos = 0;
            assert_eq!(read_ofs_distance(&out, &mut pos).unwrap(), value);
            assert_eq!(pos, out.len());
        }
    }

    #[test_case(b"the quick brown fox", b"the quick red fox" ; "middle edit")]
    #[test_case(b"", b"entirely new" ; "empty base")]
    #[test_case(b"to be deleted", b"" ; "empty target")]
    #[test_case(b"same", b"same" ; "identical")]
    #[test_case(b"abc", b"xyzabc" ; "prepend")]
    fn test_delta_round_trip(base: &[u8], target: &[u8]) {
        let delta = build_delta(base, target);
        assert_eq!(apply_delta(base, &delta).unwrap(), target);
    }

    #[test]
    fn test_delta_round_trip_large() {
        let base: Vec<u8> = (0..100_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut target = base.clone();
        target[50_000] ^= 0xff;
        let delta = build_delta(&base, &target);
        assert_eq!(apply_delta(&base, &delta).unwrap(), target);
        assert!(delta.len() < 1000);
    }

    #[test]
    fn test_apply_rejects_bad_base_size() {
        let delta = build_delta(b"abc", b"abcd");
        assert!(matches!(
            apply_delta(b"abcdef", &delta),
            Err(PackError::Malformed(_))
        ));
    }

    #[test]
    fn test_apply_rejects_zero_instruction() {
        // base size 0, result size 1, then a zero instruction byte.
        let delta = [0x00, 0x01, 0x00];
        assert!(matches!(
            apply_delta(b"", &delta),
            Err(PackError::Malformed(_))
        ));
    }
}
