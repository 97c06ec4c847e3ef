//! Save orchestrator
//!
//! Hooked into the buffer store as its [`SaveCallback`]. On every rotation
//! it finalizes each camera stream under that stream's lock, then writes the
//! provenance record. A failing stream does not stop the others from being
//! finalized; failures are collected and reported together. A provenance
//! failure is only logged.

use super::provenance::ProvenanceWriter;
use crate::camera::SharedStream;
use crate::error::{LoggerError, Result};
use crate::storage::{Artifact, PersistenceBackend, SaveCallback};
use crate::sync::lock;
use crate::types::RotationReason;
use std::sync::Arc;

pub struct SaveOrchestrator {
    streams: Vec<SharedStream>,
    backend: Arc<dyn PersistenceBackend>,
    provenance: Option<ProvenanceWriter>,
}

impl SaveOrchestrator {
    pub fn new(
        streams: Vec<SharedStream>,
        backend: Arc<dyn PersistenceBackend>,
        provenance: Option<ProvenanceWriter>,
    ) -> Self {
        Self {
            streams,
            backend,
            provenance,
        }
    }
}

impl SaveCallback for SaveOrchestrator {
    fn on_save(&self, artifact: &Artifact, reason: RotationReason) -> Result<()> {
        let mut failures = Vec::new();
        for stream in &self.streams {
            let mut stream = lock(stream);
            if let Err(e) = stream.finalize(artifact, reason, self.backend.as_ref()) {
                tracing::error!("Unable to finalize camera stream {}: {}", stream.label(), e);
                failures.push(format!("{}: {}", stream.label(), e));
            }
        }

        if let Some(provenance) = &self.provenance {
            match provenance.write(artifact) {
                Ok(path) => tracing::debug!("Provenance record written to {}", path.display()),
                Err(e) => tracing::warn!("Provenance record for '{}' not written: {}", artifact.name, e),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(LoggerError::Persistence(format!(
                "{} camera stream(s) failed to finalize: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }
}
