//! Collaborator contracts consumed by the capture engine
//!
//! The engine never talks to hardware, middleware ports or codecs directly.
//! Everything it reads or writes goes through the traits in this module:
//!
//! - [`DataSource`] - a sensor producing a numeric vector per read
//! - [`ProducerTransport`] - enumerates and connects text-log producers
//! - [`TextLogReceiver`] - delivers text-log entries from connected producers
//! - [`ExogenousTransport`] - attaches to and reads exogenous signals
//! - [`FrameSource`] - yields the newest image of a camera stream
//! - [`EncoderFactory`] / [`VideoEncoder`] - continuous video artifacts
//!
//! Simulated implementations live in [`mock`] behind the `mock-sources`
//! feature.

pub mod encoder;
#[cfg(feature = "mock-sources")]
pub mod mock;
pub mod text_log;

pub use encoder::{write_frame_png, MjpegEncoder, MjpegEncoderFactory};
pub use text_log::TextLogEntry;

use crate::error::Result;
use crate::types::{Frame, ImageKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// One successful read of a data source
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub values: Vec<f64>,
    /// Producer-side capture time, when the source provides one
    pub capture_time: Option<f64>,
}

impl Reading {
    pub fn new(values: Vec<f64>) -> Self {
        Self {
            values,
            capture_time: None,
        }
    }

    pub fn at(mut self, capture_time: f64) -> Self {
        self.capture_time = Some(capture_time);
        self
    }
}

/// A sensor polled by the acquisition loop
///
/// `try_read` must not block beyond a bounded timeout. `None` means the
/// source produced nothing this tick.
#[cfg_attr(test, mockall::automock)]
pub trait DataSource: Send {
    /// Channel the readings are stored under
    fn channel(&self) -> String;

    /// Element labels, empty when unknown
    fn labels(&self) -> Vec<String>;

    /// Latest value, if any
    fn try_read(&mut self) -> Option<Reading>;
}

/// Discovery transport for text-log producers
#[cfg_attr(test, mockall::automock)]
pub trait ProducerTransport: Send + Sync {
    /// Names of producers currently visible
    fn list_active_producers(&self) -> BTreeSet<String>;

    /// Attach `producer` to the local receiving port
    fn connect(&self, producer: &str, local_port: &str) -> bool;

    /// Whether `producer` is still reachable
    fn exists(&self, producer: &str) -> bool;
}

/// Inbox of text-log entries from connected producers
#[cfg_attr(test, mockall::automock)]
pub trait TextLogReceiver: Send {
    /// Take every entry received since the last call
    fn drain(&mut self) -> Vec<TextLogEntry>;
}

/// Shape of an exogenous signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExogenousKind {
    /// A map of named vectors, with negotiable per-key labels
    VectorsCollection,
    /// A single vector
    Vector,
}

/// Static description of an exogenous binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub kind: ExogenousKind,
    /// Remote producer identifier
    pub remote: String,
    /// Local port name
    pub local: String,
    /// Prefix of the channels created from this signal
    pub signal_name: String,
    /// Transport carrier hint
    pub carrier: String,
}

/// Data read from an exogenous binding
#[derive(Debug, Clone, PartialEq)]
pub enum ExogenousData {
    Collection(BTreeMap<String, Vec<f64>>),
    Vector(Vec<f64>),
}

/// Transport for exogenous signals
#[cfg_attr(test, mockall::automock)]
pub trait ExogenousTransport: Send + Sync {
    /// Attach to the remote producer
    fn connect(&self, binding: &BindingSpec) -> bool;

    /// Ask a connected producer for its per-key element labels
    fn negotiate_schema(&self, binding: &BindingSpec) -> Option<BTreeMap<String, Vec<String>>>;

    /// Latest data without blocking
    fn read(&self, binding: &BindingSpec) -> Option<ExogenousData>;
}

/// Source of camera frames
#[cfg_attr(test, mockall::automock)]
pub trait FrameSource: Send + Sync {
    /// Newest frame of the stream, `None` if the grab failed
    fn grab(&self, camera: &str, kind: ImageKind) -> Option<Frame>;
}

/// Handle to an open video artifact
#[cfg_attr(test, mockall::automock)]
pub trait VideoEncoder: Send {
    fn write(&mut self, frame: &Frame) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Opens video encoders
#[cfg_attr(test, mockall::automock)]
pub trait EncoderFactory: Send + Sync {
    fn open(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        is_color: bool,
    ) -> Result<Box<dyn VideoEncoder>>;
}
