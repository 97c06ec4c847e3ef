//! # robolog-rs: Real-time telemetry capture for robots
//!
//! A periodic sampler that pulls sensor, camera, text-log and exogenous data
//! at a fixed rate, files it into a dynamically discovered channel namespace,
//! buffers it in memory and rotates it to disk on a timer without stalling
//! acquisition.
//!
//! ## Architecture
//!
//! - **Acquisition**: The fixed-period tick that reads every source, creates
//!   channels on first sight, appends to the buffer store and publishes
//! - **Storage**: Per-channel queues behind one coarse lock, rotated to a
//!   persistence backend by a timer thread
//! - **Publisher**: Latest-value broadcast to live subscribers over bounded
//!   crossbeam channels
//! - **Discovery**: Background workers attaching text-log producers and
//!   exogenous signals
//! - **Cameras**: One worker per camera encoding frames at the camera's own
//!   rate, finalized by the save orchestrator at each rotation
//!
//! Hardware, middleware ports and codecs are reached only through the
//! collaborator traits in [`sources`].
//!
//! ## Configuration
//!
//! Sessions are described by a TOML file, see [`config`]. Without an
//! explicit path the binary reads `robolog.toml` from the platform
//! configuration directory under `robolog-rs`:
//!
//! - **Linux**: `~/.config/robolog-rs/`
//! - **macOS**: `~/Library/Application Support/robolog-rs/`
//! - **Windows**: `%APPDATA%\robolog-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use robolog_rs::{CaptureSession, Collaborators, LoggerConfig, SystemClock};
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! fn main() -> robolog_rs::Result<()> {
//!     let config = LoggerConfig::load("robolog.toml")?;
//!     let clock = Arc::new(SystemClock::new());
//!     let collaborators = Collaborators::new(clock).with_source(my_imu_source());
//!
//!     let session = CaptureSession::configure(config, collaborators)?;
//!     session.start()?;
//!
//!     let running = AtomicBool::new(true);
//!     session.run(&running);
//!     session.stop()
//! }
//! ```

pub mod camera;
pub mod channels;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod publisher;
pub mod session;
pub mod sources;
pub mod storage;
mod sync;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LoggerConfig;
pub use error::{LoggerError, Result};
pub use publisher::{RealTimePublisher, PublisherMessage};
pub use session::{CaptureSession, Collaborators, SessionState};
pub use storage::{BufferStore, JsonFileBackend, PersistedArtifact};
pub use types::{CaptureStats, ChannelDescriptor, Payload, RotationReason, Sample};
