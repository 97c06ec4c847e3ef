//! Acquisition loop
//!
//! One call to [`AcquisitionLoop::tick`] is one tick: read every source,
//! create channels on first sight, append the samples of the tick to the
//! buffer store in one batch, publish them and flush the publisher.
//!
//! A source that produces nothing is skipped for that tick only. Channels
//! are created lazily from the first value a source produces, so a source
//! that never produces never creates a channel.
//!
//! Channels without labels of their own take the default labels of their
//! group, and 9-element `imus::<sensor>` readings are split into one
//! orientation, accelerometer and gyro channel each.

use crate::channels::names::{
    default_labels_for, imu_sensor, join, sensor_name, unpack_imu, ACCELEROMETERS_NAME, GYROS_NAME,
    ORIENTATIONS_NAME, TIMESTAMPS_NAME,
};
use crate::clock::Clock;
use crate::discovery::BindingTable;
use crate::publisher::RealTimePublisher;
use crate::sources::{DataSource, ExogenousData, ExogenousTransport, Reading, TextLogReceiver};
use crate::storage::BufferStore;
use crate::sync::lock;
use crate::types::{CaptureStats, ChannelDescriptor, ChannelKind, Sample};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

struct ExogenousInput {
    transport: Arc<dyn ExogenousTransport>,
    bindings: BindingTable,
}

/// A numeric value observed this tick
struct Observation {
    channel: String,
    labels: Vec<String>,
    reading: Reading,
}

/// Per-tick driver state
pub struct AcquisitionLoop {
    clock: Arc<dyn Clock>,
    store: Arc<BufferStore>,
    period: f64,
    publisher: Option<RealTimePublisher>,
    sources: Vec<Box<dyn DataSource>>,
    text_logs: Option<Box<dyn TextLogReceiver>>,
    exogenous: Option<ExogenousInput>,
    /// Channels seen by this loop; `false` when creation failed
    channels: HashMap<String, bool>,
    unlabeled: HashSet<String>,
    last_now: Option<f64>,
    clock_resets: u64,
    stats: CaptureStats,
}

impl AcquisitionLoop {
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<BufferStore>,
        period: f64,
        publisher: Option<RealTimePublisher>,
    ) -> Self {
        Self {
            clock,
            store,
            period,
            publisher,
            sources: Vec::new(),
            text_logs: None,
            exogenous: None,
            channels: HashMap::new(),
            unlabeled: HashSet::new(),
            last_now: None,
            clock_resets: 0,
            stats: CaptureStats::default(),
        }
    }

    pub fn add_source(&mut self, source: Box<dyn DataSource>) {
        self.sources.push(source);
    }

    pub fn set_text_logs(&mut self, receiver: Box<dyn TextLogReceiver>) {
        self.text_logs = Some(receiver);
    }

    pub fn set_exogenous(&mut self, transport: Arc<dyn ExogenousTransport>, bindings: BindingTable) {
        self.exogenous = Some(ExogenousInput {
            transport,
            bindings,
        });
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn publisher(&self) -> Option<&RealTimePublisher> {
        self.publisher.as_ref()
    }

    pub fn publisher_mut(&mut self) -> Option<&mut RealTimePublisher> {
        self.publisher.as_mut()
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Backward clock jumps observed between ticks
    pub fn clock_resets(&self) -> u64 {
        self.clock_resets
    }

    /// Run one tick, returning the number of samples stored
    pub fn tick(&mut self) -> usize {
        let started = Instant::now();
        let now = self.clock.now();
        if let Some(last) = self.last_now {
            if now < last {
                self.clock_resets += 1;
                tracing::warn!("Clock reset detected ({:.6}s -> {:.6}s)", last, now);
            }
        }
        self.last_now = Some(now);

        if let Some(publisher) = self.publisher.as_mut() {
            publisher.clear();
        }

        let observations = self.read_sources();
        let exogenous = self.read_exogenous();

        let mut samples = Vec::with_capacity(observations.len() + exogenous.len());
        let mut published = Vec::with_capacity(samples.capacity());
        for obs in observations.into_iter().chain(exogenous) {
            let size = obs.reading.values.len();
            let labels = if obs.labels.len() == size {
                obs.labels
            } else {
                default_labels_for(&obs.channel, size)
            };
            let descriptor = ChannelDescriptor::numeric(&obs.channel, size)
                .with_labels(labels)
                .created_at(now);
            if !self.ensure_channel(descriptor) {
                continue;
            }
            published.push((obs.channel.clone(), obs.reading.values.clone()));
            samples.push(
                Sample::numeric(obs.channel, obs.reading.values, now)
                    .with_source_timestamp(obs.reading.capture_time),
            );
        }

        samples.extend(self.drain_text_logs(now));

        let stored = self.store.append_batch(samples);

        if let Some(publisher) = self.publisher.as_mut() {
            for (channel, values) in &published {
                if let Err(e) = publisher.publish(channel, values) {
                    tracing::trace!("Not published: {}", e);
                }
            }
            if let Err(e) = publisher.publish(TIMESTAMPS_NAME, &[now]) {
                tracing::trace!("Not published: {}", e);
            }
            publisher.flush(now);
        }

        let elapsed = started.elapsed();
        let overrun = elapsed.as_secs_f64() > self.period;
        if overrun {
            tracing::info!(
                "Tick took {:.3}ms, longer than the {:.3}ms period",
                elapsed.as_secs_f64() * 1e3,
                self.period * 1e3
            );
        }
        self.stats
            .record_tick(elapsed.as_micros().min(u64::MAX as u128) as u64, overrun);
        stored
    }

    fn read_sources(&mut self) -> Vec<Observation> {
        let mut observations = Vec::with_capacity(self.sources.len());
        for source in &mut self.sources {
            match source.try_read() {
                Some(reading) if !reading.values.is_empty() => {
                    let channel = source.channel();
                    let split = imu_sensor(&channel)
                        .zip(<&[f64; 9]>::try_from(reading.values.as_slice()).ok())
                        .map(|(sensor, imu)| split_imu(sensor, imu, reading.capture_time));
                    match split {
                        Some(parts) => observations.extend(parts),
                        None => observations.push(Observation {
                            channel,
                            labels: source.labels(),
                            reading,
                        }),
                    }
                }
                _ => {
                    self.stats.skipped_reads += 1;
                    tracing::trace!("Source '{}' produced no value this tick", source.channel());
                }
            }
        }
        observations
    }

    fn read_exogenous(&mut self) -> Vec<Observation> {
        let Some(input) = self.exogenous.as_ref() else {
            return Vec::new();
        };
        let connected: Vec<_> = lock(&input.bindings)
            .values()
            .filter(|b| b.state.is_connected())
            .cloned()
            .collect();

        let mut observations = Vec::new();
        for binding in connected {
            match input.transport.read(&binding.spec) {
                Some(ExogenousData::Collection(vectors)) => {
                    for (key, values) in vectors {
                        let channel = join([binding.spec.signal_name.as_str(), key.as_str()]);
                        let labels = binding.labels_for(&key);
                        if labels.is_empty() && !self.channels.contains_key(&channel) && self.unlabeled.insert(channel.clone()) {
                            tracing::warn!("No metadata for '{}'; its elements will have no labels", channel);
                        }
                        observations.push(Observation {
                            channel,
                            labels,
                            reading: Reading::new(values),
                        });
                    }
                }
                Some(ExogenousData::Vector(values)) if !values.is_empty() => {
                    observations.push(Observation {
                        channel: binding.spec.signal_name.clone(),
                        labels: Vec::new(),
                        reading: Reading::new(values),
                    });
                }
                _ => {
                    tracing::trace!("Exogenous signal '{}' had no data this tick", binding.spec.signal_name);
                }
            }
        }
        observations
    }

    fn drain_text_logs(&mut self, now: f64) -> Vec<Sample> {
        let entries = match self.text_logs.as_mut() {
            Some(receiver) => receiver.drain(),
            None => return Vec::new(),
        };

        let mut samples = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.is_valid() {
                tracing::debug!("Dropping text-log entry without a producer identity");
                continue;
            }
            let channel = entry.channel_name();
            if !self.ensure_channel(ChannelDescriptor::text(&channel).created_at(now)) {
                continue;
            }
            match serde_json::to_string(&entry) {
                Ok(text) => samples.push(Sample::text(channel, text, now)),
                Err(e) => tracing::debug!("Unable to serialize text-log entry: {}", e),
            }
        }
        samples
    }

    /// Create a channel on first sight; returns whether it can take samples
    fn ensure_channel(&mut self, descriptor: ChannelDescriptor) -> bool {
        if let Some(usable) = self.channels.get(&descriptor.name) {
            return *usable;
        }

        let name = descriptor.name.clone();
        let kind = descriptor.kind;
        let usable = match self.store.add_channel(descriptor) {
            Ok(registration) => {
                tracing::debug!("Channel '{}' ready ({:?})", name, registration);
                true
            }
            Err(e) => {
                tracing::warn!("Channel '{}' cannot be created: {}", name, e);
                false
            }
        };

        if usable && kind == ChannelKind::Numeric {
            if let Some(publisher) = self.publisher.as_mut() {
                let labels = self
                    .store
                    .channel(&name)
                    .map(|d| d.labels)
                    .unwrap_or_default();
                if let Err(e) = publisher.add_metadata(&name, &labels) {
                    tracing::warn!("Publisher metadata for '{}' rejected: {}", name, e);
                }
            }
        }

        self.channels.insert(name, usable);
        usable
    }
}

/// Orientation, accelerometer and gyro observations of one IMU reading
fn split_imu(sensor: &str, imu: &[f64; 9], capture_time: Option<f64>) -> [Observation; 3] {
    let (orientation, accelerometer, gyro) = unpack_imu(imu);
    [
        (ORIENTATIONS_NAME, orientation),
        (ACCELEROMETERS_NAME, accelerometer),
        (GYROS_NAME, gyro),
    ]
    .map(|(group, values)| Observation {
        channel: sensor_name(group, sensor),
        labels: Vec::new(),
        reading: Reading {
            values: values.to_vec(),
            capture_time,
        },
    })
}
