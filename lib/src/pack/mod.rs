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

//! Packfile parsing, construction, and `.idx` indexing.

mod build;
mod delta;
mod index;
mod parse;

pub use build::BuiltPack;
pub use build::build_pack;
pub use delta::apply_delta;
pub use delta::build_delta;
pub use index::PackIndex;
pub use parse::ParsedPack;
pub use parse::parse_pack;
pub use parse::read_object_at;
use thiserror::Error;

/// Number of same-type candidates a new object may be deltified against.
pub const DEFAULT_DELTA_WINDOW: usize = 10;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("Pack data is malformed: {0}")]
    Malformed(String),
    #[error("Pack version {0} is not supported")]
    UnsupportedVersion(u32),
    #[error("Pack checksum does not match its contents")]
    ChecksumMismatch,
    #[error("Delta base {hash} is not available")]
    MissingBaseObject { hash: String },
}
