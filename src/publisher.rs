//! Real-time publisher
//!
//! Pushes the latest value of every channel to live subscribers once per
//! tick, independently of the buffer store's rotation cadence.
//!
//! Each channel has one metadata entry (its element labels) published under
//! the `robot_realtime` root. Metadata is write-once after
//! [`RealTimePublisher::finalize_metadata`]: new channels may still be added,
//! but the labels of an established channel can no longer change.
//!
//! Subscribers receive messages through bounded channels. A slow subscriber
//! never blocks the acquisition loop: frames that do not fit are dropped and
//! counted.

use crate::channels::names::rt_name;
use crate::error::{LoggerError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a flushed frame carries for channels without a value this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingValuePolicy {
    /// Leave the channel out of the frame
    #[default]
    Omit,
    /// Repeat the previously broadcast value
    KeepLast,
}

/// One flushed tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedFrame {
    pub timestamp: f64,
    /// Values keyed by real-time name
    pub values: BTreeMap<String, Vec<f64>>,
}

/// Messages delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum PublisherMessage {
    /// Full metadata table, sent on subscribe and whenever it grows
    Metadata(BTreeMap<String, Vec<String>>),
    /// Values of one tick
    Frame(PublishedFrame),
}

/// Latest-value broadcaster for live consumers
pub struct RealTimePublisher {
    policy: MissingValuePolicy,
    queue_size: usize,
    metadata: BTreeMap<String, Vec<String>>,
    finalized: bool,
    metadata_dirty: bool,
    current: BTreeMap<String, Vec<f64>>,
    last: BTreeMap<String, Vec<f64>>,
    last_broadcast: Option<PublishedFrame>,
    subscribers: Vec<Sender<PublisherMessage>>,
    dropped: u64,
}

impl RealTimePublisher {
    pub fn new(policy: MissingValuePolicy, queue_size: usize) -> Self {
        Self {
            policy,
            queue_size: queue_size.max(1),
            metadata: BTreeMap::new(),
            finalized: false,
            metadata_dirty: false,
            current: BTreeMap::new(),
            last: BTreeMap::new(),
            last_broadcast: None,
            subscribers: Vec::new(),
            dropped: 0,
        }
    }

    /// Declare a channel's metadata
    ///
    /// Re-declaring with identical labels is a no-op. Changing the labels of
    /// an existing channel fails once metadata has been finalized.
    pub fn add_metadata(&mut self, channel: &str, labels: &[String]) -> Result<()> {
        let key = rt_name(channel);
        match self.metadata.get(&key) {
            Some(existing) if existing.as_slice() == labels => return Ok(()),
            Some(_) if self.finalized => {
                return Err(LoggerError::MetadataFinalized(key));
            }
            _ => {}
        }
        self.metadata.insert(key, labels.to_vec());
        self.metadata_dirty = true;
        Ok(())
    }

    pub fn has_metadata(&self, channel: &str) -> bool {
        self.metadata.contains_key(&rt_name(channel))
    }

    pub fn metadata(&self) -> &BTreeMap<String, Vec<String>> {
        &self.metadata
    }

    /// Freeze the labels of every declared channel
    pub fn finalize_metadata(&mut self) {
        if !self.finalized {
            tracing::debug!("Publisher metadata finalized with {} entries", self.metadata.len());
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Register a live consumer; the current metadata is sent first
    pub fn subscribe(&mut self) -> Receiver<PublisherMessage> {
        let (tx, rx) = bounded(self.queue_size);
        if tx
            .try_send(PublisherMessage::Metadata(self.metadata.clone()))
            .is_err()
        {
            self.dropped += 1;
        }
        self.subscribers.push(tx);
        rx
    }

    /// Start a new tick
    pub fn clear(&mut self) {
        self.current.clear();
    }

    /// Overwrite the value of a channel for the current tick
    pub fn publish(&mut self, channel: &str, values: &[f64]) -> Result<()> {
        let key = rt_name(channel);
        if !self.metadata.contains_key(&key) {
            return Err(LoggerError::UnknownChannel(key));
        }
        match self.current.get_mut(&key) {
            Some(slot) => {
                slot.clear();
                slot.extend_from_slice(values);
            }
            None => {
                self.current.insert(key, values.to_vec());
            }
        }
        Ok(())
    }

    /// Broadcast the current tick to every subscriber
    ///
    /// Call once per tick after every channel has been published.
    pub fn flush(&mut self, timestamp: f64) {
        if self.metadata_dirty {
            self.metadata_dirty = false;
            let metadata = PublisherMessage::Metadata(self.metadata.clone());
            self.broadcast(metadata);
        }

        for (key, values) in &self.current {
            self.last.insert(key.clone(), values.clone());
        }
        let values = match self.policy {
            MissingValuePolicy::Omit => std::mem::take(&mut self.current),
            MissingValuePolicy::KeepLast => {
                self.current.clear();
                self.last.clone()
            }
        };

        let frame = PublishedFrame { timestamp, values };
        self.broadcast(PublisherMessage::Frame(frame.clone()));
        self.last_broadcast = Some(frame);
    }

    fn broadcast(&mut self, message: PublisherMessage) {
        let mut dropped = 0;
        self.subscribers.retain(|tx| match tx.try_send(message.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
        if dropped > 0 {
            self.dropped += dropped;
            tracing::trace!("Publisher dropped {} messages due to backpressure", dropped);
        }
    }

    /// Last frame handed to subscribers
    pub fn last_broadcast(&self) -> Option<&PublishedFrame> {
        self.last_broadcast.as_ref()
    }

    /// Last broadcast value of a channel
    pub fn last_value(&self, channel: &str) -> Option<&[f64]> {
        self.last.get(&rt_name(channel)).map(Vec::as_slice)
    }

    /// Messages dropped because a subscriber queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
