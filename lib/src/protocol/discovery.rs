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

//! Capability discovery: `GET /info/refs` for protocol v1, the
//! capability advertisement plus `ls-refs` for protocol v2.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use super::Pkt;
use super::PktReader;
use super::PktWriter;
use super::ProtocolError;
use super::ProtocolResult;
use super::transport::AuthRetry;
use super::transport::Credentials;
use super::transport::HttpRequest;
use super::transport::HttpResponse;
use super::transport::RemoteCallbacks;
use super::transport::Transport;
use crate::object_id::HashKind;
use crate::object_id::Oid;

/// The normalized result of discovery, independent of protocol version.
#[derive(Clone, Debug, Default)]
pub struct RemoteInfo {
    pub protocol_version: u8,
    pub object_format: Option<HashKind>,
    pub capabilities: Vec<String>,
    /// Full ref name to advertised id.
    pub refs: BTreeMap<String, Oid>,
    /// Symref targets, e.g. `HEAD` -> `refs/heads/main`.
    pub symrefs: BTreeMap<String, String>,
    /// Peeled ids of annotated tag refs.
    pub peeled: BTreeMap<String, Oid>,
}

impl RemoteInfo {
    pub fn capable(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap == name || cap.starts_with(&format!("{name}=")))
    }

    /// The advertised default branch.
    pub fn head(&self) -> Option<&str> {
        self.symrefs.get("HEAD").map(String::as_str)
    }

    pub fn branches(&self) -> impl Iterator<Item = (&str, &Oid)> {
        self.refs
            .iter()
            .filter_map(|(name, oid)| Some((name.strip_prefix("refs/heads/")?, oid)))
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &Oid)> {
        self.refs
            .iter()
            .filter_map(|(name, oid)| Some((name.strip_prefix("refs/tags/")?, oid)))
    }
}

/// Issues one request, driving the credential hooks through 401
/// responses until the server accepts, the hook gives up, or no hook
/// exists.
pub(super) fn exchange(
    transport: &dyn Transport,
    callbacks: &mut RemoteCallbacks<'_>,
    request: HttpRequest,
) -> ProtocolResult<HttpResponse> {
    let url = request.url.clone();
    let mut credentials: Option<Credentials> = None;
    loop {
        let mut attempt = request.clone();
        if let Some(creds) = &credentials {
            attempt
                .headers
                .push(("Authorization".to_owned(), creds.basic_header()));
        }
        let response = transport.request(attempt)?;
        if response.status == 401 {
            if credentials.is_some() {
                match callbacks.on_auth_failure.as_mut().map(|hook| hook(&url)) {
                    Some(AuthRetry::Retry) => {}
                    _ => return Err(ProtocolError::AuthFailed { url }),
                }
            }
            credentials = callbacks.on_auth.as_mut().and_then(|hook| hook(&url));
            if credentials.is_none() {
                return Err(ProtocolError::AuthRequired { url });
            }
            continue;
        }
        if !(200..300).contains(&response.status) {
            return Err(ProtocolError::Remote(format!(
                "{url} answered HTTP {}",
                response.status
            )));
        }
        if credentials.is_some() {
            if let Some(hook) = callbacks.on_auth_success.as_mut() {
                hook(&url);
            }
        }
        return Ok(response);
    }
}

fn parse_v1_first_line(line: &str) -> (String, Vec<String>) {
    match line.split_once('\0') {
        None => (line.to_owned(), vec![]),
        Some((head, caps)) => (
            head.to_owned(),
            caps.split(' ')
                .filter(|cap| !cap.is_empty())
                .map(str::to_owned)
                .collect(),
        ),
    }
}

fn parse_ref_line(info: &mut RemoteInfo, line: &str) -> ProtocolResult<()> {
    let (hex, name) = line
        .split_once(' ')
        .ok_or_else(|| ProtocolError::Malformed(format!("bad ref line {line:?}")))?;
    let oid = Oid::try_from_hex(hex)
        .ok_or_else(|| ProtocolError::Malformed(format!("bad ref id {hex:?}")))?;
    if let Some(base) = name.strip_suffix("^{}") {
        info.peeled.insert(base.to_owned(), oid);
    } else if name != "capabilities^{}" {
        info.refs.insert(name.to_owned(), oid);
    }
    Ok(())
}

fn apply_capability_symrefs(info: &mut RemoteInfo) {
    for cap in &info.capabilities {
        if let Some(mapping) = cap.strip_prefix("symref=") {
            if let Some((from, to)) = mapping.split_once(':') {
                info.symrefs.insert(from.to_owned(), to.to_owned());
            }
        }
        if let Some(format) = cap.strip_prefix("object-format=") {
            info.object_format = HashKind::from_name(format);
        }
    }
}

/// Parses a v1 `info/refs` advertisement (with or without the smart-HTTP
/// `# service=` banner).
pub fn parse_info_refs_v1(body: &[u8], service: &str) -> ProtocolResult<RemoteInfo> {
    let mut info = RemoteInfo {
        protocol_version: 1,
        ..RemoteInfo::default()
    };
    let mut reader = PktReader::new(body);
    let mut first_payload: Option<String> = None;
    while let Some(pkt) = reader.next_pkt()? {
        match pkt {
            Pkt::Flush | Pkt::Delim => continue,
            Pkt::Data(_) => {
                let text = pkt.text().unwrap();
                if text == format!("# service={service}") {
                    continue;
                }
                first_payload = Some(text);
                break;
            }
        }
    }
    let Some(first) = first_payload else {
        return Ok(info);
    };
    if let Some(message) = first.strip_prefix("ERR ") {
        return Err(ProtocolError::Remote(message.to_owned()));
    }
    let (head, caps) = parse_v1_first_line(&first);
    info.capabilities = caps;
    apply_capability_symrefs(&mut info);
    parse_ref_line(&mut info, &head)?;
    while let Some(pkt) = reader.next_pkt()? {
        match pkt {
            Pkt::Flush => break,
            Pkt::Delim => continue,
            Pkt::Data(_) => parse_ref_line(&mut info, &pkt.text().unwrap())?,
        }
    }
    debug!(
        refs = info.refs.len(),
        caps = info.capabilities.len(),
        "parsed v1 advertisement"
    );
    Ok(info)
}

/// Parses the v2 capability advertisement (`version 2` then capability
/// lines until flush).
pub fn parse_capabilities_v2(body: &[u8]) -> ProtocolResult<RemoteInfo> {
    let mut info = RemoteInfo {
        protocol_version: 2,
        ..RemoteInfo::default()
    };
    let mut reader = PktReader::new(body);
    for line in reader.until_flush()? {
        let text = Pkt::Data(line).text().unwrap();
        if text == "version 2" {
            continue;
        }
        if let Some(format) = text.strip_prefix("object-format=") {
            info.object_format = HashKind::from_name(format);
        }
        info.capabilities.push(text);
    }
    Ok(info)
}

/// Parses an `ls-refs` response into the info's ref tables.
pub fn parse_ls_refs(info: &mut RemoteInfo, body: &[u8]) -> ProtocolResult<()> {
    let mut reader = PktReader::new(body);
    for line in reader.until_flush()? {
        let text = Pkt::Data(line).text().unwrap();
        let mut fields = text.split(' ');
        let (Some(hex), Some(name)) = (fields.next(), fields.next()) else {
            return Err(ProtocolError::Malformed(format!("bad ls-refs row {text:?}")));
        };
        for extra in fields {
            if let Some(target) = extra.strip_prefix("symref-target:") {
                info.symrefs.insert(name.to_owned(), target.to_owned());
            } else if let Some(peeled) = extra.strip_prefix("peeled:") {
                if let Some(oid) = Oid::try_from_hex(peeled) {
                    info.peeled.insert(name.to_owned(), oid);
                }
            }
        }
        if hex == "unborn" {
            continue;
        }
        let oid = Oid::try_from_hex(hex)
            .ok_or_else(|| ProtocolError::Malformed(format!("bad ls-refs id {hex:?}")))?;
        info.refs.insert(name.to_owned(), oid);
    }
    Ok(())
}

/// Runs capability discovery against `url`, preferring protocol v2 and
/// normalizing either version's advertisement.
pub fn discover(
    transport: &dyn Transport,
    callbacks: &mut RemoteCallbacks<'_>,
    url: &str,
    service: &str,
    extra_headers: &[(String, String)],
    timeout: Option<Duration>,
) -> ProtocolResult<RemoteInfo> {
    let mut headers = vec![("Git-Protocol".to_owned(), "version=2".to_owned())];
    headers.extend_from_slice(extra_headers);
    let response = exchange(
        transport,
        callbacks,
        HttpRequest {
            url: format!("{url}/info/refs?service={service}"),
            method: "GET",
            headers: headers.clone(),
            body: vec![],
            timeout,
        },
    )?;

    let mut probe = PktReader::new(&response.body);
    let is_v2 = matches!(
        probe.next_pkt()?,
        Some(Pkt::Data(ref data)) if data.starts_with(b"version 2")
    ) || {
        // Smart-HTTP servers prefix a service banner even on v2.
        let mut reader = PktReader::new(&response.body);
        let first = reader.next_pkt()?;
        matches!(first, Some(Pkt::Data(ref data)) if data.starts_with(b"# service="))
            && matches!(
                (reader.next_pkt()?, reader.next_pkt()?),
                (Some(Pkt::Flush), Some(Pkt::Data(ref data))) if data.starts_with(b"version 2")
            )
    };

    if !is_v2 {
        return parse_info_refs_v1(&response.body, service);
    }

    let after_banner = {
        // Skip the optional banner + flush before the v2 payload.
        let mut reader = PktReader::new(&response.body);
        match reader.next_pkt()? {
            Some(Pkt::Data(ref data)) if data.starts_with(b"# service=") => {
                reader.next_pkt()?;
                reader
            }
            _ => PktReader::new(&response.body),
        }
    };
    let mut info = parse_capabilities_v2(remaining(&response.body, after_banner))?;
    if !info.capable("ls-refs") {
        return Err(ProtocolError::Unsupported("ls-refs".to_owned()));
    }

    let mut writer = PktWriter::new();
    writer.text("command=ls-refs");
    writer.delim();
    writer.text("peel");
    writer.text("symrefs");
    writer.text("ref-prefix HEAD");
    writer.text("ref-prefix refs/");
    writer.flush();
    let mut post_headers = headers;
    post_headers.push((
        "Content-Type".to_owned(),
        format!("application/x-{service}-request"),
    ));
    let response = exchange(
        transport,
        callbacks,
        HttpRequest {
            url: format!("{url}/{service}"),
            method: "POST",
            headers: post_headers,
            body: writer.finish(),
            timeout,
        },
    )?;
    parse_ls_refs(&mut info, &response.body)?;
    debug!(refs = info.refs.len(), "parsed v2 ls-refs");
    Ok(info)
}

fn remaining<'a>(body: &'a [u8], reader: PktReader<'a>) -> &'a [u8] {
    &body[reader.position()..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_body() -> Vec<u8> {
        let mut writer = PktWriter::new();
        writer.text("# service=git-upload-pack");
        writer.flush();
        writer.data(
            b"95cb5a06d9a86e44a4c4ac0521d5b6b1d6d1e4a4 HEAD\0multi_ack side-band-64k shallow \
              symref=HEAD:refs/heads/main object-format=sha1 agent=git/2.43.0\n",
        );
        writer.text("95cb5a06d9a86e44a4c4ac0521d5b6b1d6d1e4a4 refs/heads/main");
        writer.text("1111111111111111111111111111111111111111 refs/tags/v1");
        writer.text("2222222222222222222222222222222222222222 refs/tags/v1^{}");
        writer.flush();
        writer.finish()
    }

    #[test]
    fn test_parse_v1_advertisement() {
        let info = parse_info_refs_v1(&v1_body(), "git-upload-pack").unwrap();
        assert_eq!(info.protocol_version, 1);
        assert!(info.capable("side-band-64k"));
        assert!(info.capable("shallow"));
        assert!(!info.capable("side-band"));
        assert_eq!(info.head(), Some("refs/heads/main"));
        assert_eq!(info.object_format, Some(HashKind::Sha1));
        assert_eq!(info.refs.len(), 3);
        assert_eq!(
            info.peeled["refs/tags/v1"].hex(),
            "2222222222222222222222222222222222222222"
        );
        assert_eq!(info.branches().count(), 1);
        assert_eq!(info.tags().count(), 1);
    }

    #[test]
    fn test_parse_v1_error_frame() {
        let mut writer = PktWriter::new();
        writer.text("ERR access denied");
        let err = parse_info_refs_v1(&writer.finish(), "git-upload-pack").unwrap_err();
        assert!(matches!(err, ProtocolError::Remote(message) if message == "access denied"));
    }

    #[test]
    fn test_parse_v2_capabilities_and_ls_refs() {
        let mut writer = PktWriter::new();
        writer.text("version 2");
        writer.text("agent=git/2.43.0");
        writer.text("ls-refs=unborn");
        writer.text("fetch=shallow wait-for-done");
        writer.text("object-format=sha1");
        writer.flush();
        let mut info = parse_capabilities_v2(&writer.finish()).unwrap();
        assert_eq!(info.protocol_version, 2);
        assert!(info.capable("ls-refs"));
        assert!(info.capable("fetch"));

        let mut writer = PktWriter::new();
        writer.text(
            "95cb5a06d9a86e44a4c4ac0521d5b6b1d6d1e4a4 HEAD symref-target:refs/heads/main",
        );
        writer.text("95cb5a06d9a86e44a4c4ac0521d5b6b1d6d1e4a4 refs/heads/main");
        writer.flush();
        parse_ls_refs(&mut info, &writer.finish()).unwrap();
        assert_eq!(info.head(), Some("refs/heads/main"));
        assert_eq!(info.refs.len(), 2);
    }

    #[test]
    fn test_parse_empty_advertisement() {
        let mut writer = PktWriter::new();
        writer.text("# service=git-upload-pack");
        writer.flush();
        writer.data(b"0000000000000000000000000000000000000000 capabilities^{}\0multi_ack\n");
        writer.flush();
        let info = parse_info_refs_v1(&writer.finish(), "git-upload-pack").unwrap();
        assert!(info.refs.is_empty());
        assert!(info.capable("multi_ack"));
    }
}
