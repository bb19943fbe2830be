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

//! An observable stream of state mutations, mainly index reads and
//! writes. The observer is injected per repository; a process-wide
//! default exists but tests swap in their own recorder.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;

/// What was touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    IndexRead,
    IndexWrite,
}

/// One observed mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationEvent {
    /// Unix seconds at which the mutation was observed.
    pub timestamp: i64,
    /// The location of the repository the mutation applies to.
    pub gitdir: String,
    pub kind: MutationKind,
    /// Free-form detail, e.g. the entry count of a written index.
    pub detail: String,
}

pub trait MutationObserver: Send + Sync + Debug {
    fn observe(&self, event: MutationEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullObserver;

impl MutationObserver for NullObserver {
    fn observe(&self, _event: MutationEvent) {}
}

/// Keeps every event; inspection hook for tests.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<MutationEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<MutationEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MutationObserver for RecordingObserver {
    fn observe(&self, event: MutationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// The observer used when a repository is opened without an explicit one.
pub fn default_observer() -> Arc<dyn MutationObserver> {
    static DEFAULT: OnceLock<Arc<dyn MutationObserver>> = OnceLock::new();
    DEFAULT.get_or_init(|| Arc::new(NullObserver)).clone()
}

pub(crate) fn emit(
    observer: &Arc<dyn MutationObserver>,
    gitdir: &str,
    kind: MutationKind,
    detail: impl Into<String>,
) {
    observer.observe(MutationEvent {
        timestamp: chrono::Utc::now().timestamp(),
        gitdir: gitdir.to_owned(),
        kind,
        detail: detail.into(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer() {
        let recorder = RecordingObserver::default();
        recorder.observe(MutationEvent {
            timestamp: 1,
            gitdir: "/tmp/x/.git".to_owned(),
            kind: MutationKind::IndexWrite,
            detail: "3 entries".to_owned(),
        });
        let events = recorder.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, MutationKind::IndexWrite);
    }
}
