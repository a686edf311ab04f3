// ── Known reader persistence ──
//
// Remembers the last reader the merchant connected to so discovery can
// auto-advance when it sees that device again. Read/write only, no
// business logic; failures are logged and never break a flow.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use tapdeck_hw::ReaderId;

/// Storage for the merchant's previously-paired reader.
pub trait KnownReaderStore: Send + Sync {
    fn known_reader(&self) -> Option<ReaderId>;
    fn remember(&self, reader_id: &ReaderId);
    fn forget(&self);
}

// ── In-memory implementation ─────────────────────────────────────────

/// Process-lifetime store; the default for tests and one-shot flows.
#[derive(Default)]
pub struct InMemoryKnownReaderStore {
    reader_id: RwLock<Option<ReaderId>>,
}

impl InMemoryKnownReaderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KnownReaderStore for InMemoryKnownReaderStore {
    fn known_reader(&self) -> Option<ReaderId> {
        match self.reader_id.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn remember(&self, reader_id: &ReaderId) {
        if let Ok(mut guard) = self.reader_id.write() {
            *guard = Some(reader_id.clone());
        }
    }

    fn forget(&self) {
        if let Ok(mut guard) = self.reader_id.write() {
            *guard = None;
        }
    }
}

// ── File-backed implementation ───────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct KnownReaderFile {
    reader_id: Option<String>,
}

/// JSON-file store for persistence across processes. Best-effort: a
/// missing or unreadable file is an empty store.
pub struct JsonFileKnownReaderStore {
    path: PathBuf,
}

impl JsonFileKnownReaderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_file(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        let file: KnownReaderFile = serde_json::from_str(&contents).ok()?;
        file.reader_id
    }

    fn write_file(&self, reader_id: Option<&ReaderId>) {
        let file = KnownReaderFile {
            reader_id: reader_id.map(|id| id.as_str().to_owned()),
        };
        let json = match serde_json::to_string_pretty(&file) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize known reader");
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, json) {
            warn!(error = %e, path = %self.path.display(), "failed to persist known reader");
        }
    }
}

impl KnownReaderStore for JsonFileKnownReaderStore {
    fn known_reader(&self) -> Option<ReaderId> {
        self.read_file().map(ReaderId::new)
    }

    fn remember(&self, reader_id: &ReaderId) {
        self.write_file(Some(reader_id));
    }

    fn forget(&self) {
        self.write_file(None);
    }
}
