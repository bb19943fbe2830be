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

//! The upload-pack client: want/have negotiation, shallow controls, and
//! sideband-demuxed packfile download.

use std::time::Duration;

use tracing::debug;

use super::Pkt;
use super::PktReader;
use super::PktWriter;
use super::ProtocolError;
use super::ProtocolResult;
use super::discovery::RemoteInfo;
use super::discovery::exchange;
use super::transport::CancelToken;
use super::transport::HttpRequest;
use super::transport::RemoteCallbacks;
use super::transport::Transport;
use crate::object_id::Oid;

const UPLOAD_PACK: &str = "git-upload-pack";

/// Parameters of one fetch negotiation.
#[derive(Clone, Debug, Default)]
pub struct FetchOptions {
    /// Tips the client wants.
    pub wants: Vec<Oid>,
    /// Tips the client already has.
    pub haves: Vec<Oid>,
    /// Limit history to this many commits from each want.
    pub depth: Option<u32>,
    /// `deepen-since`: cut history before this unix time.
    pub since: Option<i64>,
    /// `deepen-not`: cut history reachable from these refs.
    pub exclude: Vec<String>,
    /// The client's current shallow boundary.
    pub client_shallow: Vec<Oid>,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl FetchOptions {
    fn is_shallow_request(&self) -> bool {
        self.depth.is_some() || self.since.is_some() || !self.exclude.is_empty()
    }
}

/// What the server sent back.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// The raw packfile bytes (empty when the server had nothing to
    /// send).
    pub pack_data: Vec<u8>,
    /// Commits that became shallow boundaries.
    pub shallow: Vec<Oid>,
    /// Commits that are no longer shallow boundaries.
    pub unshallow: Vec<Oid>,
    /// Ids the server acknowledged as common.
    pub common: Vec<Oid>,
}

fn check_cancel(options: &FetchOptions) -> ProtocolResult<()> {
    if options.cancel.as_ref().is_some_and(CancelToken::is_canceled) {
        return Err(ProtocolError::Canceled);
    }
    Ok(())
}

fn parse_shallow_line(outcome: &mut FetchOutcome, text: &str) -> ProtocolResult<bool> {
    if let Some(hex) = text.strip_prefix("shallow ") {
        let oid = Oid::try_from_hex(hex)
            .ok_or_else(|| ProtocolError::Malformed(format!("bad shallow id {hex:?}")))?;
        outcome.shallow.push(oid);
        return Ok(true);
    }
    if let Some(hex) = text.strip_prefix("unshallow ") {
        let oid = Oid::try_from_hex(hex)
            .ok_or_else(|| ProtocolError::Malformed(format!("bad unshallow id {hex:?}")))?;
        outcome.unshallow.push(oid);
        return Ok(true);
    }
    Ok(false)
}

fn parse_ack_line(outcome: &mut FetchOutcome, text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    if lower == "nak" {
        return true;
    }
    if let Some(rest) = lower.strip_prefix("ack ") {
        let hex = rest.split(' ').next().unwrap_or(rest);
        if let Some(oid) = Oid::try_from_hex(hex) {
            outcome.common.push(oid);
        }
        return true;
    }
    false
}

/// Demuxes sideband frames into `outcome.pack_data`, forwarding progress
/// and turning channel 3 into a remote error.
fn demux_sideband(
    outcome: &mut FetchOutcome,
    callbacks: &mut RemoteCallbacks<'_>,
    options: &FetchOptions,
    reader: &mut PktReader<'_>,
) -> ProtocolResult<()> {
    while let Some(pkt) = reader.next_pkt()? {
        check_cancel(options)?;
        let Pkt::Data(frame) = pkt else {
            continue;
        };
        let Some((&channel, payload)) = frame.split_first() else {
            continue;
        };
        match channel {
            1 => outcome.pack_data.extend_from_slice(payload),
            2 => callbacks.progress(&String::from_utf8_lossy(payload)),
            3 => {
                return Err(ProtocolError::Remote(
                    String::from_utf8_lossy(payload).trim_end().to_owned(),
                ));
            }
            _ => {
                return Err(ProtocolError::Malformed(format!(
                    "unknown sideband channel {channel}"
                )));
            }
        }
    }
    Ok(())
}

fn build_request_v1(info: &RemoteInfo, options: &FetchOptions) -> ProtocolResult<Vec<u8>> {
    let mut caps = vec![];
    if info.capable("side-band-64k") {
        caps.push("side-band-64k");
    }
    if info.capable("ofs-delta") {
        caps.push("ofs-delta");
    }
    if options.is_shallow_request() && !info.capable("shallow") {
        return Err(ProtocolError::Unsupported("shallow".to_owned()));
    }
    if info.capable("shallow") {
        caps.push("shallow");
    }
    caps.push("agent=ugit/0.4");

    let mut writer = PktWriter::new();
    for (i, want) in options.wants.iter().enumerate() {
        if i == 0 {
            writer.text(&format!("want {} {}", want.hex(), caps.join(" ")));
        } else {
            writer.text(&format!("want {}", want.hex()));
        }
    }
    for oid in &options.client_shallow {
        writer.text(&format!("shallow {}", oid.hex()));
    }
    if let Some(depth) = options.depth {
        writer.text(&format!("deepen {depth}"));
    }
    if let Some(since) = options.since {
        writer.text(&format!("deepen-since {since}"));
    }
    for exclude in &options.exclude {
        writer.text(&format!("deepen-not {exclude}"));
    }
    writer.flush();
    for have in &options.haves {
        writer.text(&format!("have {}", have.hex()));
    }
    writer.text("done");
    Ok(writer.finish())
}

fn build_request_v2(info: &RemoteInfo, options: &FetchOptions) -> ProtocolResult<Vec<u8>> {
    if options.is_shallow_request() && !info.capable("fetch=shallow") && !fetch_arg(info, "shallow")
    {
        return Err(ProtocolError::Unsupported("shallow".to_owned()));
    }
    let mut writer = PktWriter::new();
    writer.text("command=fetch");
    writer.delim();
    writer.text("ofs-delta");
    for want in &options.wants {
        writer.text(&format!("want {}", want.hex()));
    }
    for have in &options.haves {
        writer.text(&format!("have {}", have.hex()));
    }
    for oid in &options.client_shallow {
        writer.text(&format!("shallow {}", oid.hex()));
    }
    if let Some(depth) = options.depth {
        writer.text(&format!("deepen {depth}"));
    }
    if let Some(since) = options.since {
        writer.text(&format!("deepen-since {since}"));
    }
    for exclude in &options.exclude {
        writer.text(&format!("deepen-not {exclude}"));
    }
    writer.text("done");
    writer.flush();
    Ok(writer.finish())
}

fn fetch_arg(info: &RemoteInfo, arg: &str) -> bool {
    info.capabilities.iter().any(|cap| {
        cap.strip_prefix("fetch=")
            .is_some_and(|args| args.split(' ').any(|a| a == arg))
    })
}

/// Parses a v1 upload-pack response body.
fn parse_response_v1(
    body: &[u8],
    info: &RemoteInfo,
    callbacks: &mut RemoteCallbacks<'_>,
    options: &FetchOptions,
) -> ProtocolResult<FetchOutcome> {
    let mut outcome = FetchOutcome::default();
    let mut reader = PktReader::new(body);
    // Header part: shallow updates, then a single ACK or NAK (this
    // client never negotiates multi_ack), then the pack.
    loop {
        check_cancel(options)?;
        match reader.next_pkt()? {
            None => return Ok(outcome),
            Some(Pkt::Flush | Pkt::Delim) => continue,
            Some(pkt @ Pkt::Data(_)) => {
                let text = pkt.text().unwrap();
                if parse_shallow_line(&mut outcome, &text)? {
                    continue;
                }
                if let Some(message) = text.strip_prefix("ERR ") {
                    return Err(ProtocolError::Remote(message.to_owned()));
                }
                if !parse_ack_line(&mut outcome, &text) {
                    return Err(ProtocolError::Malformed(format!(
                        "unexpected upload-pack line {text:?}"
                    )));
                }
                // The pack follows: sideband frames when negotiated,
                // raw bytes otherwise.
                if info.capable("side-band-64k") {
                    demux_sideband(&mut outcome, callbacks, options, &mut reader)?;
                } else {
                    outcome.pack_data.extend_from_slice(&body[reader.position()..]);
                }
                return Ok(outcome);
            }
        }
    }
}

/// Parses a v2 fetch response body (sectioned).
fn parse_response_v2(
    body: &[u8],
    callbacks: &mut RemoteCallbacks<'_>,
    options: &FetchOptions,
) -> ProtocolResult<FetchOutcome> {
    let mut outcome = FetchOutcome::default();
    let mut reader = PktReader::new(body);
    while let Some(pkt) = reader.next_pkt()? {
        check_cancel(options)?;
        let Pkt::Data(_) = pkt else {
            continue;
        };
        let text = pkt.text().unwrap();
        match text.as_str() {
            "shallow-info" | "unshallow-info" => {
                // Lines until a delimiter or the next section.
            }
            "acknowledgments" => {}
            "packfile" => {
                demux_sideband(&mut outcome, callbacks, options, &mut reader)?;
                return Ok(outcome);
            }
            other => {
                if parse_shallow_line(&mut outcome, other)? || parse_ack_line(&mut outcome, other)
                {
                    continue;
                }
                if let Some(message) = other.strip_prefix("ERR ") {
                    return Err(ProtocolError::Remote(message.to_owned()));
                }
                return Err(ProtocolError::Malformed(format!(
                    "unexpected fetch section line {other:?}"
                )));
            }
        }
    }
    Ok(outcome)
}

/// Runs a fetch against a discovered remote and returns the packfile
/// plus shallow updates. The caller ingests the pack and moves refs.
pub fn fetch_pack(
    transport: &dyn Transport,
    callbacks: &mut RemoteCallbacks<'_>,
    url: &str,
    info: &RemoteInfo,
    options: &FetchOptions,
) -> ProtocolResult<FetchOutcome> {
    if options.wants.is_empty() {
        return Ok(FetchOutcome::default());
    }
    check_cancel(options)?;
    let body = if info.protocol_version >= 2 {
        build_request_v2(info, options)?
    } else {
        build_request_v1(info, options)?
    };
    let mut headers = vec![(
        "Content-Type".to_owned(),
        format!("application/x-{UPLOAD_PACK}-request"),
    )];
    if info.protocol_version >= 2 {
        headers.push(("Git-Protocol".to_owned(), "version=2".to_owned()));
    }
    let response = exchange(
        transport,
        callbacks,
        HttpRequest {
            url: format!("{url}/{UPLOAD_PACK}"),
            method: "POST",
            headers,
            body,
            timeout: options.timeout,
        },
    )?;
    let outcome = if info.protocol_version >= 2 {
        parse_response_v2(&response.body, callbacks, options)?
    } else {
        parse_response_v1(&response.body, info, callbacks, options)?
    };
    debug!(
        pack_bytes = outcome.pack_data.len(),
        shallow = outcome.shallow.len(),
        unshallow = outcome.unshallow.len(),
        "fetch response parsed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_v1() -> RemoteInfo {
        RemoteInfo {
            protocol_version: 1,
            capabilities: vec![
                "side-band-64k".to_owned(),
                "shallow".to_owned(),
                "ofs-delta".to_owned(),
            ],
            ..RemoteInfo::default()
        }
    }

    #[test]
    fn test_build_request_v1_shape() {
        let options = FetchOptions {
            wants: vec![Oid::from_hex("1111111111111111111111111111111111111111")],
            haves: vec![Oid::from_hex("2222222222222222222222222222222222222222")],
            depth: Some(1),
            ..FetchOptions::default()
        };
        let body = build_request_v1(&info_v1(), &options).unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.contains("want 1111111111111111111111111111111111111111 side-band-64k"));
        assert!(text.contains("deepen 1"));
        assert!(text.contains("have 2222222222222222222222222222222222222222"));
        assert!(text.ends_with("done\n"));
    }

    #[test]
    fn test_shallow_without_capability_is_unsupported() {
        let mut info = info_v1();
        info.capabilities.retain(|cap| cap != "shallow");
        let options = FetchOptions {
            wants: vec![Oid::from_hex("1111111111111111111111111111111111111111")],
            depth: Some(1),
            ..FetchOptions::default()
        };
        assert!(matches!(
            build_request_v1(&info, &options),
            Err(ProtocolError::Unsupported(_))
        ));
    }

    #[test]
    fn test_parse_v1_response_with_sideband() {
        let mut writer = PktWriter::new();
        writer.text("shallow 1111111111111111111111111111111111111111");
        writer.flush();
        writer.text("NAK");
        let mut frame = vec![1u8];
        frame.extend_from_slice(b"PACKDATA");
        writer.data(&frame);
        let mut progress = vec![2u8];
        progress.extend_from_slice(b"Counting objects: done\n");
        writer.data(&progress);
        writer.flush();
        let body = writer.finish();

        let mut seen = vec![];
        let mut callbacks = RemoteCallbacks {
            on_progress: Some(Box::new(|line: &str| seen.push(line.to_owned()))),
            ..RemoteCallbacks::default()
        };
        let outcome =
            parse_response_v1(&body, &info_v1(), &mut callbacks, &FetchOptions::default())
                .unwrap();
        drop(callbacks);
        assert_eq!(outcome.pack_data, b"PACKDATA");
        assert_eq!(outcome.shallow.len(), 1);
        assert_eq!(seen, ["Counting objects: done\n"]);
    }

    #[test]
    fn test_sideband_error_channel() {
        let mut writer = PktWriter::new();
        writer.text("NAK");
        let mut frame = vec![3u8];
        frame.extend_from_slice(b"access denied");
        writer.data(&frame);
        let body = writer.finish();
        let err = parse_response_v1(
            &body,
            &info_v1(),
            &mut RemoteCallbacks::default(),
            &FetchOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Remote(message) if message == "access denied"));
    }

    #[test]
    fn test_parse_v2_sections() {
        let mut writer = PktWriter::new();
        writer.text("shallow-info");
        writer.text("shallow 1111111111111111111111111111111111111111");
        writer.delim();
        writer.text("acknowledgments");
        writer.text("ack 2222222222222222222222222222222222222222 common");
        writer.delim();
        writer.text("packfile");
        let mut frame = vec![1u8];
        frame.extend_from_slice(b"PACKDATA");
        writer.data(&frame);
        writer.flush();
        let outcome = parse_response_v2(
            &writer.finish(),
            &mut RemoteCallbacks::default(),
            &FetchOptions::default(),
        )
        .unwrap();
        assert_eq!(outcome.shallow.len(), 1);
        assert_eq!(outcome.common.len(), 1);
        assert_eq!(outcome.pack_data, b"PACKDATA");
    }

    #[test]
    fn test_empty_wants_short_circuits() {
        #[derive(Debug)]
        struct PanicTransport;
        impl Transport for PanicTransport {
            fn request(
                &self,
                _request: HttpRequest,
            ) -> Result<super::super::HttpResponse, super::super::TransportError> {
                panic!("no request expected");
            }
        }
        let outcome = fetch_pack(
            &PanicTransport,
            &mut RemoteCallbacks::default(),
            "https://example.com/repo.git",
            &info_v1(),
            &FetchOptions::default(),
        )
        .unwrap();
        assert!(outcome.pack_data.is_empty());
    }
}
