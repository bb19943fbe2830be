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

//! The smart-HTTP wire protocol client: capability discovery, fetch
//! negotiation, and push.

mod discovery;
mod fetch;
mod pktline;
mod push;
mod transport;

pub use discovery::RemoteInfo;
pub use discovery::discover;
pub use fetch::FetchOptions;
pub use fetch::FetchOutcome;
pub use fetch::fetch_pack;
pub use pktline::Pkt;
pub use pktline::PktReader;
pub use pktline::PktWriter;
pub use push::PushCommand;
pub use push::PushOptions;
pub use push::PushOutcome;
pub use push::RefStatus;
pub use push::push_pack;
use thiserror::Error;
pub use transport::AuthRetry;
pub use transport::CancelToken;
pub use transport::Credentials;
pub use transport::HttpRequest;
pub use transport::HttpResponse;
pub use transport::PrePushInfo;
pub use transport::RemoteCallbacks;
pub use transport::Transport;
pub use transport::TransportError;

use crate::backend::BackendError;
use crate::pack::PackError;
use crate::revwalk::WalkError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Protocol data is malformed: {0}")]
    Malformed(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Authentication required for {url}")]
    AuthRequired { url: String },
    #[error("Authentication failed for {url}")]
    AuthFailed { url: String },
    #[error("Server does not support {0}")]
    Unsupported(String),
    #[error("Operation canceled")]
    Canceled,
    #[error("Hook declined the operation")]
    HookDeclined,
    #[error(transparent)]
    Pack(#[from] PackError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Walk(#[from] WalkError),
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
