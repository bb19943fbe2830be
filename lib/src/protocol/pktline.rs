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

//! pkt-line framing: a 4-hex-digit length prefix that includes itself,
//! with `0000` as flush and `0001` as the v2 delimiter.

use super::ProtocolError;
use super::ProtocolResult;

/// Longest payload a single pkt-line may carry.
const MAX_PAYLOAD: usize = 65516;

/// One decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pkt {
    Data(Vec<u8>),
    Flush,
    Delim,
}

impl Pkt {
    /// The payload with a single trailing newline removed, as text.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Data(data) => {
                let data = data.strip_suffix(b"\n").unwrap_or(data);
                Some(String::from_utf8_lossy(data).into_owned())
            }
            Self::Flush | Self::Delim => None,
        }
    }
}

/// Iterates frames out of a byte buffer.
pub struct PktReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PktReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Byte offset of the next unread frame.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The next frame, or `None` at end of input.
    pub fn next_pkt(&mut self) -> ProtocolResult<Option<Pkt>> {
        if self.is_at_end() {
            return Ok(None);
        }
        let header = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or_else(|| ProtocolError::Malformed("truncated pkt-line length".to_owned()))?;
        let header = std::str::from_utf8(header)
            .ok()
            .and_then(|h| usize::from_str_radix(h, 16).ok())
            .ok_or_else(|| ProtocolError::Malformed("bad pkt-line length".to_owned()))?;
        self.pos += 4;
        match header {
            0 => Ok(Some(Pkt::Flush)),
            1 => Ok(Some(Pkt::Delim)),
            2 | 3 => Err(ProtocolError::Malformed(format!(
                "reserved pkt-line length {header}"
            ))),
            len => {
                let payload_len = len - 4;
                let payload = self
                    .data
                    .get(self.pos..self.pos + payload_len)
                    .ok_or_else(|| {
                        ProtocolError::Malformed("pkt-line payload is truncated".to_owned())
                    })?;
                self.pos += payload_len;
                Ok(Some(Pkt::Data(payload.to_vec())))
            }
        }
    }

    /// Consumes data frames until a flush, returning their payloads.
    pub fn until_flush(&mut self) -> ProtocolResult<Vec<Vec<u8>>> {
        let mut out = vec![];
        loop {
            match self.next_pkt()? {
                None | Some(Pkt::Flush) => return Ok(out),
                Some(Pkt::Delim) => {}
                Some(Pkt::Data(data)) => out.push(data),
            }
        }
    }
}

/// Builds a pkt-line stream.
#[derive(Debug, Default)]
pub struct PktWriter {
    out: Vec<u8>,
}

impl PktWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&mut self, payload: &[u8]) -> &mut Self {
        for chunk in payload.chunks(MAX_PAYLOAD).collect::<Vec<_>>() {
            self.out
                .extend_from_slice(format!("{:04x}", chunk.len() + 4).as_bytes());
            self.out.extend_from_slice(chunk);
        }
        if payload.is_empty() {
            self.out.extend_from_slice(b"0004");
        }
        self
    }

    /// A text line; the trailing newline is added here.
    pub fn text(&mut self, line: &str) -> &mut Self {
        self.data(format!("{line}\n").as_bytes())
    }

    pub fn flush(&mut self) -> &mut Self {
        self.out.extend_from_slice(b"0000");
        self
    }

    pub fn delim(&mut self) -> &mut Self {
        self.out.extend_from_slice(b"0001");
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_shapes() {
        let mut writer = PktWriter::new();
        writer.text("hello").flush();
        assert_eq!(writer.finish(), b"000ahello\n0000");
    }

    #[test]
    fn test_round_trip() {
        let mut writer = PktWriter::new();
        writer
            .text("want aaaa")
            .delim()
            .data(b"raw")
            .flush();
        let encoded = writer.finish();
        let mut reader = PktReader::new(&encoded);
        assert_eq!(
            reader.next_pkt().unwrap(),
            Some(Pkt::Data(b"want aaaa\n".to_vec()))
        );
        assert_eq!(reader.next_pkt().unwrap(), Some(Pkt::Delim));
        assert_eq!(reader.next_pkt().unwrap(), Some(Pkt::Data(b"raw".to_vec())));
        assert_eq!(reader.next_pkt().unwrap(), Some(Pkt::Flush));
        assert_eq!(reader.next_pkt().unwrap(), None);
    }

    #[test]
    fn test_text_strips_newline() {
        let pkt = Pkt::Data(b"line\n".to_vec());
        assert_eq!(pkt.text().as_deref(), Some("line"));
        let pkt = Pkt::Data(b"line".to_vec());
        assert_eq!(pkt.text().as_deref(), Some("line"));
    }

    #[test]
    fn test_rejects_garbage() {
        let mut reader = PktReader::new(b"zzzz");
        assert!(reader.next_pkt().is_err());
        let mut reader = PktReader::new(b"0009ab");
        assert!(reader.next_pkt().is_err());
    }
}
