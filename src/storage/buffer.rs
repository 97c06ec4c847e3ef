//! Buffer store
//!
//! All channel queues live behind one coarse lock. The lock is held for a
//! single append (or one batch of appends for a tick) and for the rotation
//! hand-off, which swaps the queues for empty ones. Persistence I/O always
//! happens after the lock has been released.
//!
//! # Rotation protocol
//!
//! 1. Swap every queue out under the lock and build a [`Snapshot`]. A
//!    snapshot left over from a failed rotation is merged in front of it.
//! 2. Persist the snapshot through the backend, outside the lock.
//! 3. On success, notify the save callback. On failure, keep the snapshot as
//!    pending so the next rotation writes it again, and log a warning.
//!
//! A final rotation notifies the callback even when persistence failed, so
//! camera streams are always finalized at shutdown.

use super::rotation::ArtifactNamer;
use super::{Artifact, BufferConfig, ChannelSnapshot, PersistenceBackend, SaveCallback, Snapshot};
use crate::channels::{ChannelRegistry, Registration};
use crate::error::{LoggerError, Result};
use crate::sync::lock;
use crate::types::{ChannelDescriptor, Record, RotationReason, Sample};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Counters reported by the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    /// Rotations whose snapshot was persisted
    pub rotations: u64,
    /// Rotations whose persistence failed
    pub failed_rotations: u64,
    /// Records evicted from full queues
    pub dropped_samples: u64,
    /// Samples rejected by a shape mismatch or a poisoned channel
    pub rejected_samples: u64,
    /// Records waiting in a failed snapshot
    pub pending_records: usize,
}

#[derive(Default)]
struct StoreState {
    registry: ChannelRegistry,
    queues: BTreeMap<String, VecDeque<Record>>,
    pending: Option<Snapshot>,
    robot_name: String,
    description_list: Vec<String>,
    stats: StoreStats,
}

/// Per-channel append buffers with periodic rotation
pub struct BufferStore {
    config: BufferConfig,
    capacity: usize,
    state: Mutex<StoreState>,
    backend: Arc<dyn PersistenceBackend>,
    callback: Mutex<Option<Arc<dyn SaveCallback>>>,
    /// Serializes rotations and owns artifact naming
    namer: Mutex<ArtifactNamer>,
}

impl BufferStore {
    /// Create a store after validating its configuration
    pub fn new(config: BufferConfig, backend: Arc<dyn PersistenceBackend>) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity();
        let namer = ArtifactNamer::new(&config.file_prefix, &config.file_indexing);
        tracing::debug!(
            "Buffer store configured: {} records per channel, rotation every {}s",
            capacity,
            config.save_period_s
        );
        Ok(Self {
            config,
            capacity,
            state: Mutex::new(StoreState::default()),
            backend,
            callback: Mutex::new(None),
            namer: Mutex::new(namer),
        })
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Records each channel queue can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn backend(&self) -> Arc<dyn PersistenceBackend> {
        Arc::clone(&self.backend)
    }

    /// Register the hook notified after each rotation
    pub fn set_save_callback(&self, callback: Arc<dyn SaveCallback>) {
        *lock(&self.callback) = Some(callback);
    }

    pub fn set_robot_name(&self, name: impl Into<String>) {
        lock(&self.state).robot_name = name.into();
    }

    /// Robot description (e.g. joint names) stored with every artifact
    pub fn set_description_list(&self, list: Vec<String>) {
        lock(&self.state).description_list = list;
    }

    /// Create a channel, or do nothing if it exists with the same shape
    pub fn add_channel(&self, descriptor: ChannelDescriptor) -> Result<Registration> {
        let mut state = lock(&self.state);
        let name = descriptor.name.clone();
        let registration = state.registry.register(descriptor)?;
        if registration == Registration::Created {
            state
                .queues
                .insert(name, VecDeque::with_capacity(self.capacity));
        }
        Ok(registration)
    }

    pub fn has_channel(&self, name: &str) -> bool {
        lock(&self.state).registry.contains(name)
    }

    pub fn channel(&self, name: &str) -> Option<ChannelDescriptor> {
        lock(&self.state).registry.get(name).cloned()
    }

    pub fn channel_names(&self) -> Vec<String> {
        lock(&self.state)
            .registry
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    /// Number of records buffered for a channel since the last rotation
    pub fn buffered_len(&self, name: &str) -> usize {
        lock(&self.state).queues.get(name).map_or(0, VecDeque::len)
    }

    /// Append one sample to its channel
    pub fn append(&self, sample: Sample) -> Result<()> {
        let mut state = lock(&self.state);
        Self::append_locked(&mut state, self.capacity, sample)
    }

    /// Append the samples of one tick under a single lock acquisition
    ///
    /// Rejected samples are logged and counted; returns the number stored.
    pub fn append_batch(&self, samples: Vec<Sample>) -> usize {
        let mut state = lock(&self.state);
        let mut stored = 0;
        for sample in samples {
            match Self::append_locked(&mut state, self.capacity, sample) {
                Ok(()) => stored += 1,
                Err(LoggerError::SchemaMismatch { .. }) | Err(LoggerError::UnknownChannel(_)) => {}
                Err(e) => tracing::debug!("Append failed: {}", e),
            }
        }
        stored
    }

    fn append_locked(state: &mut StoreState, capacity: usize, sample: Sample) -> Result<()> {
        match state.registry.check(&sample.channel, &sample.payload) {
            Ok(true) => {}
            Ok(false) => {
                state.stats.rejected_samples += 1;
                return Ok(());
            }
            Err(e) => {
                if matches!(e, LoggerError::SchemaMismatch { .. }) {
                    state.stats.rejected_samples += 1;
                    tracing::warn!("{}; further samples for this channel are discarded", e);
                } else {
                    tracing::debug!("{}", e);
                }
                return Err(e);
            }
        }

        let (channel, record) = sample.into_record();
        if let Some(queue) = state.queues.get_mut(&channel) {
            if queue.len() >= capacity {
                queue.pop_front();
                state.stats.dropped_samples += 1;
            }
            queue.push_back(record);
        }
        Ok(())
    }

    /// Swap out every queue and merge any pending snapshot in front
    fn take_snapshot(&self) -> Snapshot {
        let mut state = lock(&self.state);
        let capacity = self.capacity;
        let mut channels = BTreeMap::new();
        for descriptor in state.registry.iter().cloned().collect::<Vec<_>>() {
            let records = state
                .queues
                .get_mut(&descriptor.name)
                .map(|q| std::mem::replace(q, VecDeque::with_capacity(capacity)))
                .unwrap_or_default();
            channels.insert(
                descriptor.name.clone(),
                ChannelSnapshot {
                    descriptor,
                    records: records.into(),
                },
            );
        }

        let current = Snapshot {
            robot_name: state.robot_name.clone(),
            description_list: state.description_list.clone(),
            channels,
        };
        match state.pending.take() {
            Some(mut pending) => {
                pending.merge(current);
                pending
            }
            None => current,
        }
    }

    /// Rotate: hand the buffered data to the backend and start a new window
    ///
    /// Returns the path written by the backend. Errors are already logged;
    /// the data stays buffered for the next rotation.
    pub fn rotate(&self, reason: RotationReason) -> Result<PathBuf> {
        let mut namer = lock(&self.namer);
        let snapshot = self.take_snapshot();
        let artifact = Artifact::new(
            self.config.output_dir.clone(),
            namer.next(chrono::Local::now()),
        );

        let result = self.backend.persist(&snapshot, &artifact, reason);
        match &result {
            Ok(path) => {
                let mut state = lock(&self.state);
                state.stats.rotations += 1;
                state.stats.pending_records = 0;
                drop(state);
                tracing::info!(
                    "Rotation ({}) wrote {} records to {}",
                    reason,
                    snapshot.record_count(),
                    path.display()
                );
            }
            Err(e) => {
                let records = snapshot.record_count();
                let mut state = lock(&self.state);
                state.stats.failed_rotations += 1;
                state.stats.pending_records = records;
                state.pending = Some(snapshot);
                drop(state);
                tracing::warn!(
                    "Rotation ({}) failed, keeping {} records for the next rotation: {}",
                    reason,
                    records,
                    e
                );
            }
        }

        if result.is_ok() || reason == RotationReason::Final {
            self.notify(&artifact, reason);
        }
        drop(namer);
        result
    }

    fn notify(&self, artifact: &Artifact, reason: RotationReason) {
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            if let Err(e) = callback.on_save(artifact, reason) {
                tracing::warn!("Save callback for '{}' failed: {}", artifact.name, e);
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        lock(&self.state).stats.clone()
    }
}
