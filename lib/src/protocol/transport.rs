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

//! The byte-transport seam the host supplies, plus the caller hooks
//! that ride along with remote operations.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use base64::Engine as _;
use thiserror::Error;

use crate::object_id::Oid;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error: {message}")]
    Network { message: String },
    #[error("Request deadline expired")]
    Timeout,
}

/// One HTTP exchange. The transport implementation owns connection
/// handling, TLS, proxies; this layer only shapes bytes.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    pub url: String,
    pub method: &'static str,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Per-request deadline the transport must honor.
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub trait Transport: Send + Sync + Debug {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Username/password pair for HTTP basic auth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn basic_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

/// What to do after a rejected credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthRetry {
    Retry,
    GiveUp,
}

/// A ref update about to be sent by push, surfaced to the pre-push hook.
#[derive(Clone, Debug)]
pub struct PrePushInfo {
    pub remote_url: String,
    pub local_ref: String,
    pub remote_ref: String,
    pub old_oid: Oid,
    pub new_oid: Oid,
}

/// Caller-provided hooks for remote operations. All optional.
#[derive(Default)]
pub struct RemoteCallbacks<'a> {
    /// Sideband channel 2 (progress) lines.
    pub on_progress: Option<Box<dyn FnMut(&str) + 'a>>,
    /// Non-sideband informational messages.
    pub on_message: Option<Box<dyn FnMut(&str) + 'a>>,
    /// Asked for credentials when the server demands auth.
    pub on_auth: Option<Box<dyn FnMut(&str) -> Option<Credentials> + 'a>>,
    pub on_auth_success: Option<Box<dyn FnMut(&str) + 'a>>,
    /// Decides whether to re-prompt after a 401 with credentials.
    pub on_auth_failure: Option<Box<dyn FnMut(&str) -> AuthRetry + 'a>>,
    /// Runs after discovery, before any bytes are sent; `false` aborts.
    pub on_pre_push: Option<Box<dyn FnMut(&[PrePushInfo]) -> bool + 'a>>,
}

impl Debug for RemoteCallbacks<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCallbacks").finish_non_exhaustive()
    }
}

impl RemoteCallbacks<'_> {
    pub fn progress(&mut self, line: &str) {
        if let Some(hook) = &mut self.on_progress {
            hook(line);
        }
    }

    pub fn message(&mut self, line: &str) {
        if let Some(hook) = &mut self.on_message {
            hook(line);
        }
    }
}

/// Cooperative cancellation checked at I/O suspension points and pack
/// object boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header() {
        let creds = Credentials {
            username: "user".to_owned(),
            password: "pass".to_owned(),
        };
        assert_eq!(creds.basic_header(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_canceled());
    }
}
