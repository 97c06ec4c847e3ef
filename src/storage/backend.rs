//! Persistence backends
//!
//! A backend turns a rotation [`Snapshot`] into an on-disk artifact and
//! renames companion artifacts (camera videos, frame folders) when the save
//! orchestrator finalizes them.
//!
//! [`JsonFileBackend`] writes one JSON document per rotation. The document is
//! first written to a temporary file next to the target and then renamed, so
//! a crash never leaves a half-written artifact under the final name.

use super::{Artifact, Snapshot};
use crate::error::{Result, ResultExt};
use crate::types::{ChannelKind, Payload, Record, RotationReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Storage contract consumed by the buffer store and the save orchestrator
#[cfg_attr(test, mockall::automock)]
pub trait PersistenceBackend: Send + Sync {
    /// Write `snapshot` as the artifact and return the written path
    fn persist(&self, snapshot: &Snapshot, artifact: &Artifact, reason: RotationReason) -> Result<PathBuf>;

    /// Move an artifact from `from` to `to`
    fn rename_artifact(&self, from: &Path, to: &Path) -> Result<()>;
}

/// One channel as stored in a JSON artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedChannel {
    pub kind: ChannelKind,
    pub size: usize,
    #[serde(default)]
    pub elements_names: Vec<String>,
    pub timestamps: Vec<f64>,
    /// Producer-side timestamps; `None` entries where the source had none
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_timestamps: Vec<Option<f64>>,
    pub data: Vec<Payload>,
}

impl PersistedChannel {
    /// Rebuild the stored records
    pub fn records(&self) -> Vec<Record> {
        self.timestamps
            .iter()
            .zip(self.data.iter())
            .enumerate()
            .map(|(i, (t, payload))| Record {
                timestamp: *t,
                source_timestamp: self.source_timestamps.get(i).copied().flatten(),
                payload: payload.clone(),
            })
            .collect()
    }
}

/// Top-level JSON artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedArtifact {
    pub artifact: String,
    pub reason: RotationReason,
    pub robot_name: String,
    #[serde(default)]
    pub description_list: Vec<String>,
    pub channels: BTreeMap<String, PersistedChannel>,
}

impl PersistedArtifact {
    fn from_snapshot(snapshot: &Snapshot, artifact: &Artifact, reason: RotationReason) -> Self {
        let channels = snapshot
            .channels
            .iter()
            .map(|(name, channel)| {
                let has_source_ts = channel.records.iter().any(|r| r.source_timestamp.is_some());
                let persisted = PersistedChannel {
                    kind: channel.descriptor.kind,
                    size: channel.descriptor.size,
                    elements_names: channel.descriptor.labels.clone(),
                    timestamps: channel.records.iter().map(|r| r.timestamp).collect(),
                    source_timestamps: if has_source_ts {
                        channel.records.iter().map(|r| r.source_timestamp).collect()
                    } else {
                        Vec::new()
                    },
                    data: channel.records.iter().map(|r| r.payload.clone()).collect(),
                };
                (name.clone(), persisted)
            })
            .collect();

        Self {
            artifact: artifact.name.clone(),
            reason,
            robot_name: snapshot.robot_name.clone(),
            description_list: snapshot.description_list.clone(),
            channels,
        }
    }

    /// Load an artifact written by [`JsonFileBackend`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Writes each rotation as `<dir>/<artifact>.json`
#[derive(Debug, Clone, Default)]
pub struct JsonFileBackend {
    pretty: bool,
}

impl JsonFileBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indent the JSON output
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// File extension of the written artifacts
    pub const EXTENSION: &'static str = ".json";
}

impl PersistenceBackend for JsonFileBackend {
    fn persist(&self, snapshot: &Snapshot, artifact: &Artifact, reason: RotationReason) -> Result<PathBuf> {
        fs::create_dir_all(artifact.dir())
            .with_context(|| format!("Failed to create {}", artifact.dir().display()))?;

        let document = PersistedArtifact::from_snapshot(snapshot, artifact, reason);
        let content = if self.pretty {
            serde_json::to_vec_pretty(&document)?
        } else {
            serde_json::to_vec(&document)?
        };

        let path = artifact.path_with_suffix(Self::EXTENSION);
        let tmp = artifact.path_with_suffix(".json.tmp");
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            file.write_all(&content)
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            file.sync_all().context("Failed to flush artifact")?;
        }
        fs::rename(&tmp, &path).with_context(|| format!("Failed to finalize {}", path.display()))?;

        tracing::debug!(
            "Persisted {} channels ({} records) to {}",
            document.channels.len(),
            snapshot.record_count(),
            path.display()
        );
        Ok(path)
    }

    fn rename_artifact(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)
            .with_context(|| format!("Failed to rename {} to {}", from.display(), to.display()))
    }
}
