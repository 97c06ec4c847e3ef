//! Mock construction helpers

use robolog_rs::error::{LoggerError, Result};
use robolog_rs::session::CommandRunner;
use robolog_rs::storage::{Artifact, PersistenceBackend, Snapshot};
use robolog_rs::types::RotationReason;
use robolog_rs::JsonFileBackend;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Status commands that never produce output
pub struct SilentRunner;

impl CommandRunner for SilentRunner {
    fn run(&self, _command: &str) -> Option<String> {
        None
    }
}

pub fn silent_runner() -> Arc<dyn CommandRunner> {
    Arc::new(SilentRunner)
}

/// JSON backend whose writes can be made to fail on demand
#[derive(Default)]
pub struct FlakyBackend {
    inner: JsonFileBackend,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl FlakyBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PersistenceBackend for FlakyBackend {
    fn persist(&self, snapshot: &Snapshot, artifact: &Artifact, reason: RotationReason) -> Result<PathBuf> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LoggerError::Persistence("disk unavailable".to_string()));
        }
        self.inner.persist(snapshot, artifact, reason)
    }

    fn rename_artifact(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.rename_artifact(from, to)
    }
}
