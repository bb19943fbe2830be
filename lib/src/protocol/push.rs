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

//! The receive-pack client: update commands, pack upload, and
//! report-status parsing.

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

const RECEIVE_PACK: &str = "git-receive-pack";

/// One ref update command. All-zero `old` creates; all-zero `new`
/// deletes.
#[derive(Clone, Debug)]
pub struct PushCommand {
    pub old_oid: Oid,
    pub new_oid: Oid,
    pub ref_name: String,
}

#[derive(Clone, Debug, Default)]
pub struct PushOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

/// Per-ref outcome from the server's report-status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefStatus {
    pub ref_name: String,
    pub ok: bool,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct PushOutcome {
    pub unpack_ok: bool,
    pub unpack_error: Option<String>,
    pub statuses: Vec<RefStatus>,
}

impl PushOutcome {
    pub fn all_ok(&self) -> bool {
        self.unpack_ok && self.statuses.iter().all(|status| status.ok)
    }
}

fn parse_report_status(data: &[u8]) -> ProtocolResult<PushOutcome> {
    let mut outcome = PushOutcome::default();
    let mut reader = PktReader::new(data);
    while let Some(pkt) = reader.next_pkt()? {
        let Pkt::Data(_) = pkt else { continue };
        let text = pkt.text().unwrap();
        if let Some(result) = text.strip_prefix("unpack ") {
            if result == "ok" {
                outcome.unpack_ok = true;
            } else {
                outcome.unpack_error = Some(result.to_owned());
            }
        } else if let Some(ref_name) = text.strip_prefix("ok ") {
            outcome.statuses.push(RefStatus {
                ref_name: ref_name.to_owned(),
                ok: true,
                message: None,
            });
        } else if let Some(rest) = text.strip_prefix("ng ") {
            let (ref_name, reason) = rest.split_once(' ').unwrap_or((rest, "rejected"));
            outcome.statuses.push(RefStatus {
                ref_name: ref_name.to_owned(),
                ok: false,
                message: Some(reason.to_owned()),
            });
        }
    }
    Ok(outcome)
}

/// Sends update commands plus the packfile of missing objects and
/// returns the server's per-ref verdicts.
pub fn push_pack(
    transport: &dyn Transport,
    callbacks: &mut RemoteCallbacks<'_>,
    url: &str,
    info: &RemoteInfo,
    commands: &[PushCommand],
    pack_data: &[u8],
    options: &PushOptions,
) -> ProtocolResult<PushOutcome> {
    if commands.is_empty() {
        return Ok(PushOutcome {
            unpack_ok: true,
            ..PushOutcome::default()
        });
    }
    if options.cancel.as_ref().is_some_and(CancelToken::is_canceled) {
        return Err(ProtocolError::Canceled);
    }
    if !info.capable("report-status") {
        return Err(ProtocolError::Unsupported("report-status".to_owned()));
    }
    let use_sideband = info.capable("side-band-64k");

    let mut writer = PktWriter::new();
    for (i, command) in commands.iter().enumerate() {
        let line = format!(
            "{} {} {}",
            command.old_oid.hex(),
            command.new_oid.hex(),
            command.ref_name
        );
        if i == 0 {
            let mut caps = vec!["report-status"];
            if use_sideband {
                caps.push("side-band-64k");
            }
            caps.push("agent=ugit/0.4");
            writer.data(format!("{line}\0{}\n", caps.join(" ")).as_bytes());
        } else {
            writer.text(&line);
        }
    }
    writer.flush();
    let mut body = writer.finish();
    body.extend_from_slice(pack_data);

    let response = exchange(
        transport,
        callbacks,
        HttpRequest {
            url: format!("{url}/{RECEIVE_PACK}"),
            method: "POST",
            headers: vec![(
                "Content-Type".to_owned(),
                format!("application/x-{RECEIVE_PACK}-request"),
            )],
            body,
            timeout: options.timeout,
        },
    )?;

    let report = if use_sideband {
        // Channel 1 carries the report-status stream.
        let mut inner = vec![];
        let mut reader = PktReader::new(&response.body);
        while let Some(pkt) = reader.next_pkt()? {
            let Pkt::Data(frame) = pkt else { continue };
            let Some((&channel, payload)) = frame.split_first() else {
                continue;
            };
            match channel {
                1 => inner.extend_from_slice(payload),
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
        parse_report_status(&inner)?
    } else {
        parse_report_status(&response.body)?
    };
    debug!(
        unpack_ok = report.unpack_ok,
        refs = report.statuses.len(),
        "push report parsed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_report_status() {
        let mut writer = PktWriter::new();
        writer.text("unpack ok");
        writer.text("ok refs/heads/main");
        writer.text("ng refs/heads/protected non-fast-forward");
        writer.flush();
        let outcome = parse_report_status(&writer.finish()).unwrap();
        assert!(outcome.unpack_ok);
        assert!(!outcome.all_ok());
        assert_eq!(outcome.statuses.len(), 2);
        assert_eq!(
            outcome.statuses[1],
            RefStatus {
                ref_name: "refs/heads/protected".to_owned(),
                ok: false,
                message: Some("non-fast-forward".to_owned()),
            }
        );
    }

    #[test]
    fn test_parse_unpack_failure() {
        let mut writer = PktWriter::new();
        writer.text("unpack index-pack failed");
        writer.flush();
        let outcome = parse_report_status(&writer.finish()).unwrap();
        assert!(!outcome.unpack_ok);
        assert_eq!(outcome.unpack_error.as_deref(), Some("index-pack failed"));
    }

    #[test]
    fn test_push_requires_report_status() {
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
        let info = RemoteInfo::default();
        let commands = [PushCommand {
            old_oid: Oid::from_hex("1111111111111111111111111111111111111111"),
            new_oid: Oid::from_hex("2222222222222222222222222222222222222222"),
            ref_name: "refs/heads/main".to_owned(),
        }];
        let err = push_pack(
            &PanicTransport,
            &mut RemoteCallbacks::default(),
            "https://example.com/repo.git",
            &info,
            &commands,
            b"",
            &PushOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ProtocolError::Unsupported(_)));
    }
}
