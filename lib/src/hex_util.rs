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

//! Hex string helpers.

const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Decodes `hex` as a lowercase hex string into bytes.
pub fn decode_hex(hex: impl AsRef<[u8]>) -> Option<Vec<u8>> {
    let hex = hex.as_ref();
    if hex.len() % 2 != 0 {
        return None;
    }
    let (decoded, _) = decode_hex_prefix(hex)?;
    Some(decoded)
}

/// Decodes `hex` as a hex string prefix. The output may have an odd-length
/// byte whose lower 4 bits are zero-filled. Returns `(bytes, has_odd_byte)`.
pub fn decode_hex_prefix(hex: impl AsRef<[u8]>) -> Option<(Vec<u8>, bool)> {
    let hex = hex.as_ref();
    let mut decoded = Vec::with_capacity(usize::div_ceil(hex.len(), 2));
    let mut chunks = hex.chunks_exact(2);
    for chunk in &mut chunks {
        let [hi, lo] = chunk.try_into().unwrap();
        decoded.push(hex_value(hi)? << 4 | hex_value(lo)?);
    }
    if let &[hi] = chunks.remainder() {
        decoded.push(hex_value(hi)? << 4);
        Some((decoded, true))
    } else {
        Some((decoded, false))
    }
}

/// Encodes `data` as a lowercase hex string.
pub fn encode_hex(data: &[u8]) -> String {
    let encoded = data
        .iter()
        .flat_map(|b| [HEX_CHARS[usize::from(b >> 4)], HEX_CHARS[usize::from(b & 0xf)]])
        .collect();
    String::from_utf8(encoded).unwrap()
}

/// Calculates common prefix length of two byte sequences. The length
/// to be returned is a number of hexadecimal digits.
pub fn common_hex_len(bytes_a: &[u8], bytes_b: &[u8]) -> usize {
    std::iter::zip(bytes_a, bytes_b)
        .enumerate()
        .find_map(|(i, (a, b))| match a ^ b {
            0 => None,
            d if d & 0xf0 == 0 => Some(i * 2 + 1),
            _ => Some(i * 2),
        })
        .unwrap_or_else(|| bytes_a.len().min(bytes_b.len()) * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex(""), Some(vec![]));
        assert_eq!(decode_hex("1"), None);
        assert_eq!(decode_hex("0x12"), None);
        assert_eq!(decode_hex("DEAD"), None);
        assert_eq!(
            decode_hex("0123456789abcdef"),
            Some(b"\x01\x23\x45\x67\x89\xab\xcd\xef".to_vec())
        );
    }

    #[test]
    fn test_decode_hex_prefix() {
        assert_eq!(decode_hex_prefix(""), Some((vec![], false)));
        assert_eq!(decode_hex_prefix("a"), Some((vec![0xa0], true)));
        assert_eq!(decode_hex_prefix("ab"), Some((vec![0xab], false)));
        assert_eq!(decode_hex_prefix("abc"), Some((vec![0xab, 0xc0], true)));
        assert_eq!(decode_hex_prefix("zz"), None);
    }

    #[test]
    fn test_encode_hex() {
        assert_eq!(encode_hex(b""), "");
        assert_eq!(
            encode_hex(b"\x01\x23\x45\x67\x89\xab\xcd\xef"),
            "0123456789abcdef"
        );
    }

    #[test]
    fn test_common_hex_len() {
        assert_eq!(common_hex_len(b"", b""), 0);
        assert_eq!(common_hex_len(b"\x12\x34", b"\x12\x34"), 4);
        assert_eq!(common_hex_len(b"\x12\x34", b"\x12\x35"), 3);
        assert_eq!(common_hex_len(b"\x12\x34", b"\x12\x44"), 2);
        assert_eq!(common_hex_len(b"\x12\x34", b"\x13\x34"), 2);
        assert_eq!(common_hex_len(b"\x12\x34", b"\x22\x34"), 0);
        assert_eq!(common_hex_len(b"\x12\x34", b"\x12"), 2);
    }
}
