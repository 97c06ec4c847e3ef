//! In-memory buffering and rotation to persistent storage
//!
//! The [`BufferStore`] owns every channel queue of a session and is the only
//! write path to storage. A [`RotationTimer`] periodically asks the store to
//! rotate: the queues are swapped out under the store lock, handed to a
//! [`PersistenceBackend`] outside the lock, and the registered
//! [`SaveCallback`] is notified with the new artifact.
//!
//! # Capacity
//!
//! Each queue holds `ceil((1 + margin) * save_period / sampling_period)`
//! records, with a margin of at least 10%, so a full rotation period fits
//! under normal jitter. When a queue is full the oldest record is evicted
//! and counted.

pub mod backend;
pub mod buffer;
pub mod rotation;

pub use backend::{JsonFileBackend, PersistedArtifact, PersistenceBackend};
pub use buffer::{BufferStore, StoreStats};
pub use rotation::{ArtifactNamer, RotationTimer};

use crate::error::{LoggerError, Result};
use chrono::format::{Item, StrftimeItems};
use crate::types::{ChannelDescriptor, Record, RotationReason};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Smallest accepted capacity margin
pub const MIN_CAPACITY_MARGIN: f64 = 0.1;

/// Rotation and capacity settings of a buffer store
#[derive(Debug, Clone, PartialEq)]
pub struct BufferConfig {
    /// Acquisition period in seconds
    pub sampling_period_s: f64,
    /// Rotation period in seconds
    pub save_period_s: f64,
    /// Extra queue room relative to one rotation period
    pub capacity_margin: f64,
    /// Artifact name prefix
    pub file_prefix: String,
    /// chrono format string appended to the prefix
    pub file_indexing: String,
    /// Directory receiving artifacts
    pub output_dir: PathBuf,
}

impl BufferConfig {
    /// Settings for the given periods, with default naming
    pub fn for_periods(sampling_period_s: f64, save_period_s: f64) -> Self {
        Self {
            sampling_period_s,
            save_period_s,
            capacity_margin: MIN_CAPACITY_MARGIN,
            file_prefix: "robot_logger_device".to_string(),
            file_indexing: "%Y_%m_%d_%H_%M_%S".to_string(),
            output_dir: PathBuf::from("."),
        }
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.sampling_period_s > 0.0) {
            return Err(LoggerError::Configuration(
                "sampling_period_s must be positive".to_string(),
            ));
        }
        if !(self.save_period_s > 0.0) {
            return Err(LoggerError::Configuration(
                "save_period_s must be positive".to_string(),
            ));
        }
        if self.capacity_margin < MIN_CAPACITY_MARGIN {
            return Err(LoggerError::Configuration(format!(
                "capacity_margin must be at least {}",
                MIN_CAPACITY_MARGIN
            )));
        }
        if self.file_prefix.is_empty() {
            return Err(LoggerError::Configuration(
                "file_prefix cannot be empty".to_string(),
            ));
        }
        if self.file_indexing.is_empty()
            || StrftimeItems::new(&self.file_indexing).any(|item| matches!(item, Item::Error))
        {
            return Err(LoggerError::Configuration(format!(
                "file_indexing '{}' is not a valid time format",
                self.file_indexing
            )));
        }
        Ok(())
    }

    /// Number of records each channel queue holds
    pub fn capacity(&self) -> usize {
        let samples = (1.0 + self.capacity_margin) * self.save_period_s / self.sampling_period_s;
        samples.ceil().max(1.0) as usize
    }
}

/// Name and location of one rotation's artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Base name without extension
    pub name: String,
    /// Directory holding the artifact and its companions
    pub dir: PathBuf,
}

impl Artifact {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    /// Path of a companion file, `<dir>/<name><suffix>`
    pub fn path_with_suffix(&self, suffix: &str) -> PathBuf {
        self.dir.join(format!("{}{}", self.name, suffix))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Buffered records of one channel at rotation time
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSnapshot {
    pub descriptor: ChannelDescriptor,
    pub records: Vec<Record>,
}

/// Everything handed to the persistence backend by one rotation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub robot_name: String,
    pub description_list: Vec<String>,
    pub channels: BTreeMap<String, ChannelSnapshot>,
}

impl Snapshot {
    /// Total number of records across channels
    pub fn record_count(&self) -> usize {
        self.channels.values().map(|c| c.records.len()).sum()
    }

    /// Append `newer` after the records already held
    ///
    /// Used to carry a snapshot whose persistence failed into the next
    /// rotation. Per-channel order is preserved.
    pub fn merge(&mut self, newer: Snapshot) {
        self.robot_name = newer.robot_name;
        self.description_list = newer.description_list;
        for (name, channel) in newer.channels {
            match self.channels.get_mut(&name) {
                Some(existing) => existing.records.extend(channel.records),
                None => {
                    self.channels.insert(name, channel);
                }
            }
        }
    }
}

/// Hook invoked after every rotation
#[cfg_attr(test, mockall::automock)]
pub trait SaveCallback: Send + Sync {
    /// Called with the artifact that was just written and the reason
    fn on_save(&self, artifact: &Artifact, reason: RotationReason) -> Result<()>;
}
