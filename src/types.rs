//! Core data types for the robot logger
//!
//! This module contains the fundamental data structures shared by the
//! acquisition loop, the buffer store, the discovery workers and the camera
//! workers.
//!
//! # Main Types
//!
//! - [`ChannelDescriptor`] - Fixed-shape description of a named time series
//! - [`Sample`] - One timestamped value destined for a channel
//! - [`Record`] - A sample as stored inside a channel buffer
//! - [`Frame`] - A camera image (8-bit RGB or floating point depth)
//! - [`CaptureStats`] - Counters describing the health of a running session
//!
//! # Timestamps
//!
//! All timestamps are seconds as `f64`, measured on the session clock. The
//! optional secondary timestamp of a sample carries the time at which the
//! producer captured the value, so source-side latency can be recovered
//! offline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of payload a channel stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Fixed-size numeric vectors
    #[default]
    Numeric,
    /// Free-form text records (one element per record)
    Text,
}

/// Description of a channel inside a capture session
///
/// The shape is fixed once the channel is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Hierarchical name, segments joined by `::`
    pub name: String,
    /// Number of elements per sample
    pub size: usize,
    /// Optional per-element labels (empty or exactly `size` entries)
    #[serde(default)]
    pub labels: Vec<String>,
    /// Payload kind
    #[serde(default)]
    pub kind: ChannelKind,
    /// Session time at which the channel was created
    #[serde(default)]
    pub created_at: f64,
}

impl ChannelDescriptor {
    /// Create a numeric channel descriptor
    pub fn numeric(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            labels: Vec::new(),
            kind: ChannelKind::Numeric,
            created_at: 0.0,
        }
    }

    /// Create a text channel descriptor
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 1,
            labels: Vec::new(),
            kind: ChannelKind::Text,
            created_at: 0.0,
        }
    }

    /// Attach per-element labels
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the creation time
    pub fn created_at(mut self, time: f64) -> Self {
        self.created_at = time;
        self
    }

    /// Two descriptors describe the same shape
    pub fn same_shape(&self, other: &ChannelDescriptor) -> bool {
        self.size == other.size && self.kind == other.kind
    }
}

/// Payload of a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Numeric vector
    Numeric(#[serde(with = "json_floats")] Vec<f64>),
    /// Text entry
    Text(String),
}

/// JSON has no non-finite numbers; they are stored as `"NaN"`, `"inf"` and
/// `"-inf"`. `null` reads back as NaN.
mod json_floats {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Element {
        Number(f64),
        Special(String),
        Null(()),
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| match *v {
            v if v.is_finite() => Element::Number(v),
            v if v.is_nan() => Element::Special("NaN".to_string()),
            v if v > 0.0 => Element::Special("inf".to_string()),
            _ => Element::Special("-inf".to_string()),
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Element>::deserialize(deserializer)?
            .into_iter()
            .map(|element| match element {
                Element::Number(v) => Ok(v),
                Element::Null(()) => Ok(f64::NAN),
                Element::Special(s) => match s.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(D::Error::custom(format!("invalid number '{}'", other))),
                },
            })
            .collect()
    }
}

impl Payload {
    /// Number of elements carried by the payload
    pub fn len(&self) -> usize {
        match self {
            Payload::Numeric(v) => v.len(),
            Payload::Text(_) => 1,
        }
    }

    /// Whether the payload carries no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The channel kind this payload belongs to
    pub fn kind(&self) -> ChannelKind {
        match self {
            Payload::Numeric(_) => ChannelKind::Numeric,
            Payload::Text(_) => ChannelKind::Text,
        }
    }

    /// Numeric values, if this is a numeric payload
    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            Payload::Numeric(v) => Some(v),
            Payload::Text(_) => None,
        }
    }
}

/// A stored record inside a channel buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Capture time on the session clock (seconds)
    pub timestamp: f64,
    /// Producer-side capture time, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timestamp: Option<f64>,
    /// Stored value
    pub payload: Payload,
}

/// One timestamped value produced for a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Channel identity
    pub channel: String,
    /// Value, sized to the channel shape
    pub payload: Payload,
    /// Capture time on the session clock (seconds)
    pub timestamp: f64,
    /// Producer-side capture time, when known
    pub source_timestamp: Option<f64>,
}

impl Sample {
    /// Create a numeric sample
    pub fn numeric(channel: impl Into<String>, values: Vec<f64>, timestamp: f64) -> Self {
        Self {
            channel: channel.into(),
            payload: Payload::Numeric(values),
            timestamp,
            source_timestamp: None,
        }
    }

    /// Create a text sample
    pub fn text(channel: impl Into<String>, text: impl Into<String>, timestamp: f64) -> Self {
        Self {
            channel: channel.into(),
            payload: Payload::Text(text.into()),
            timestamp,
            source_timestamp: None,
        }
    }

    /// Attach the producer-side capture time
    pub fn with_source_timestamp(mut self, source_timestamp: Option<f64>) -> Self {
        self.source_timestamp = source_timestamp;
        self
    }

    /// Convert into a stored record
    pub fn into_record(self) -> (String, Record) {
        (
            self.channel,
            Record {
                timestamp: self.timestamp,
                source_timestamp: self.source_timestamp,
                payload: self.payload,
            },
        )
    }
}

/// Why a rotation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    /// The rotation timer elapsed
    Periodic,
    /// The session is ending
    Final,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationReason::Periodic => write!(f, "periodic"),
            RotationReason::Final => write!(f, "final"),
        }
    }
}

/// How a camera stream is persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// One image file per frame, plus a timestamp sample per frame
    Frame,
    /// A continuous video artifact
    #[default]
    Video,
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveMode::Frame => write!(f, "frame"),
            SaveMode::Video => write!(f, "video"),
        }
    }
}

/// Image stream of a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    /// 8-bit color image
    Rgb,
    /// Depth image
    Depth,
}

impl ImageKind {
    /// Suffix used in channel and artifact names
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Rgb => "rgb",
            ImageKind::Depth => "depth",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pixel storage of a frame
#[derive(Debug, Clone, PartialEq)]
pub enum FramePixels {
    /// Interleaved 8-bit RGB, `width * height * 3` bytes
    Rgb8(Vec<u8>),
    /// Depth values, `width * height` entries
    Depth(Vec<f32>),
}

/// A camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: FramePixels,
}

impl Frame {
    /// Create an RGB frame
    pub fn rgb(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels: FramePixels::Rgb8(data),
        }
    }

    /// Create a depth frame
    pub fn depth(width: u32, height: u32, data: Vec<f32>) -> Self {
        Self {
            width,
            height,
            pixels: FramePixels::Depth(data),
        }
    }

    /// Whether the pixel buffer matches the declared dimensions
    pub fn is_consistent(&self) -> bool {
        let pixels = self.width as usize * self.height as usize;
        match &self.pixels {
            FramePixels::Rgb8(data) => data.len() == pixels * 3,
            FramePixels::Depth(data) => data.len() == pixels,
        }
    }

    /// Multiply every depth value by `scale` (no-op on color frames)
    pub fn scale_depth(&mut self, scale: f32) {
        if let FramePixels::Depth(data) = &mut self.pixels {
            for v in data.iter_mut() {
                *v *= scale;
            }
        }
    }

    /// Depth converted to saturated 8-bit grayscale
    pub fn depth_to_u8(&self) -> Option<Vec<u8>> {
        match &self.pixels {
            FramePixels::Depth(data) => {
                Some(data.iter().map(|v| v.clamp(0.0, 255.0) as u8).collect())
            }
            FramePixels::Rgb8(_) => None,
        }
    }

    /// Depth converted to saturated 16-bit grayscale
    pub fn depth_to_u16(&self) -> Option<Vec<u16>> {
        match &self.pixels {
            FramePixels::Depth(data) => Some(
                data.iter()
                    .map(|v| v.clamp(0.0, u16::MAX as f32) as u16)
                    .collect(),
            ),
            FramePixels::Rgb8(_) => None,
        }
    }
}

/// Connection state of an exogenous signal binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BindingState {
    /// Configured, not yet attached
    #[default]
    Pending,
    /// Attached, no schema metadata
    Connected,
    /// Attached and schema metadata negotiated
    SchemaKnown,
}

impl BindingState {
    /// Whether data can be read from the binding
    pub fn is_connected(&self) -> bool {
        !matches!(self, BindingState::Pending)
    }
}

/// Health counters of a capture session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CaptureStats {
    /// Number of completed acquisition ticks
    pub ticks: u64,
    /// Ticks that took longer than the sampling period
    pub overruns: u64,
    /// Source reads that produced nothing
    pub skipped_reads: u64,
    /// Samples rejected because their shape did not match the channel
    pub rejected_samples: u64,
    /// Duration of the last tick in microseconds
    pub last_tick_duration_us: u64,
    /// Longest tick observed in microseconds
    pub max_tick_duration_us: u64,
    /// Frames the publisher could not deliver due to backpressure
    pub dropped_publications: u64,
    /// Completed rotations
    pub rotations: u64,
    /// Rotations whose persistence failed
    pub failed_rotations: u64,
    /// Samples evicted from full channel queues
    pub dropped_samples: u64,
}

impl CaptureStats {
    /// Record the duration of a tick
    pub fn record_tick(&mut self, duration_us: u64, overrun: bool) {
        self.ticks += 1;
        self.last_tick_duration_us = duration_us;
        self.max_tick_duration_us = self.max_tick_duration_us.max(duration_us);
        if overrun {
            self.overruns += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_shape_comparison() {
        let a = ChannelDescriptor::numeric("a", 3);
        let b = ChannelDescriptor::numeric("a", 3).with_labels(["x", "y", "z"]);
        let c = ChannelDescriptor::numeric("a", 4);
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&c));
        assert!(!ChannelDescriptor::text("a").same_shape(&ChannelDescriptor::numeric("a", 1)));
    }

    #[test]
    fn test_sample_into_record() {
        let sample = Sample::numeric("imu", vec![1.0, 2.0], 0.5).with_source_timestamp(Some(0.4));
        let (channel, record) = sample.into_record();
        assert_eq!(channel, "imu");
        assert_eq!(record.timestamp, 0.5);
        assert_eq!(record.source_timestamp, Some(0.4));
        assert_eq!(record.payload.len(), 2);
    }

    #[test]
    fn test_payload_serializes_untagged() {
        let json = serde_json::to_string(&Payload::Numeric(vec![1.0, 2.0])).unwrap();
        assert_eq!(json, "[1.0,2.0]");
        let json = serde_json::to_string(&Payload::Text("hello".into())).unwrap();
        assert_eq!(json, "\"hello\"");
    }

    #[test]
    fn test_non_finite_values_survive_json() {
        let payload = Payload::Numeric(vec![f64::NAN, 1.5, f64::INFINITY, f64::NEG_INFINITY]);
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"["NaN",1.5,"inf","-inf"]"#);

        let back: Payload = serde_json::from_str(&json).unwrap();
        let values = back.as_numeric().unwrap();
        assert!(values[0].is_nan());
        assert_eq!(&values[1..], &[1.5, f64::INFINITY, f64::NEG_INFINITY]);

        let legacy: Payload = serde_json::from_str("[null,2]").unwrap();
        assert!(legacy.as_numeric().unwrap()[0].is_nan());
        assert!(serde_json::from_str::<Payload>(r#"["fast"]"#).is_err());
    }

    #[test]
    fn test_frame_depth_conversion() {
        let mut frame = Frame::depth(2, 1, vec![0.5, 300.0]);
        frame.scale_depth(2.0);
        assert_eq!(frame.depth_to_u8(), Some(vec![1, 255]));
        assert_eq!(frame.depth_to_u16(), Some(vec![1, 600]));
        assert!(frame.is_consistent());
    }

    #[test]
    fn test_rgb_frame_consistency() {
        assert!(Frame::rgb(2, 2, vec![0; 12]).is_consistent());
        assert!(!Frame::rgb(2, 2, vec![0; 11]).is_consistent());
    }

    #[test]
    fn test_stats_record_tick() {
        let mut stats = CaptureStats::default();
        stats.record_tick(100, false);
        stats.record_tick(250, true);
        stats.record_tick(50, false);
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.max_tick_duration_us, 250);
        assert_eq!(stats.last_tick_duration_us, 50);
    }
}
