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

//! A host-agnostic Git core: content-addressed object storage, packfile
//! codec, reference store with reflogs, index/worktree mediation, a
//! three-way merge engine, and a smart-HTTP wire protocol client, all
//! over a pluggable storage substrate.
//!
//! The crate has no opinion about argument parsing, the event loop, or
//! the byte transport; hosts supply a [`protocol::Transport`] and
//! (optionally) a [`worktree::WorktreeFs`] and drive the functions in
//! [`commands`].

#![deny(unused_must_use)]

pub mod attributes;
pub mod backend;
pub mod commands;
pub mod config;
pub mod diff;
pub mod file_util;
pub mod fs_backend;
pub mod hex_util;
pub mod index;
pub mod mem_backend;
pub mod merge;
pub mod mutation;
pub mod object;
pub mod object_id;
pub mod pack;
pub mod protocol;
pub mod refs;
pub mod repo;
pub mod repo_path;
pub mod revwalk;
pub mod sql_backend;
pub mod store;
pub mod worktree;
