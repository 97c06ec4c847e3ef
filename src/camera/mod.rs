//! Camera streams
//!
//! Every configured camera has one stream per image kind (`rgb`, and `depth`
//! for RGBD cameras). A stream owns either an open video encoder or a frame
//! folder, depending on its [`SaveMode`]. The stream state sits behind a
//! per-stream mutex shared only by the camera's worker thread and the save
//! orchestrator.
//!
//! # Artifact Layout
//!
//! While a rotation period is in progress a stream writes to
//! `output_<camera>_<kind>.mjpeg` (video) or `output_<camera>_<kind>/img_<i>.png`
//! (frames). At rotation these are renamed to
//! `<artifact>_<camera>_<kind>.mjpeg` or `<artifact>_<camera>_<kind>/`.

pub mod worker;

pub use worker::CameraWorker;

use crate::error::{LoggerError, Result};
use crate::sources::{write_frame_png, EncoderFactory, VideoEncoder};
use crate::storage::{Artifact, PersistenceBackend};
use crate::types::{Frame, ImageKind, RotationReason, SaveMode};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Extension of video artifacts
pub const VIDEO_EXTENSION: &str = ".mjpeg";

/// Stream state shared between a worker and the save orchestrator
pub type SharedStream = Arc<Mutex<CameraStream>>;

/// Static settings of one stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub camera: String,
    pub kind: ImageKind,
    pub mode: SaveMode,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    /// Directory holding in-progress and finalized artifacts
    pub output_dir: PathBuf,
}

/// Encoder or frame folder of one camera stream
pub struct CameraStream {
    settings: StreamSettings,
    factory: Arc<dyn EncoderFactory>,
    encoder: Option<Box<dyn VideoEncoder>>,
    frame_index: u64,
    open: bool,
    failed: bool,
}

impl CameraStream {
    pub fn new(settings: StreamSettings, factory: Arc<dyn EncoderFactory>) -> Self {
        Self {
            settings,
            factory,
            encoder: None,
            frame_index: 0,
            open: false,
            failed: false,
        }
    }

    pub fn shared(self) -> SharedStream {
        Arc::new(Mutex::new(self))
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    /// `<camera>_<kind>` suffix of this stream's artifacts
    pub fn label(&self) -> String {
        format!("{}_{}", self.settings.camera, self.settings.kind)
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Frames in the in-progress artifact
    pub fn frames_written(&self) -> u64 {
        self.frame_index
    }

    fn extension(&self) -> &'static str {
        match self.settings.mode {
            SaveMode::Video => VIDEO_EXTENSION,
            SaveMode::Frame => "",
        }
    }

    /// Path of the in-progress artifact
    pub fn temp_path(&self) -> PathBuf {
        self.settings
            .output_dir
            .join(format!("output_{}{}", self.label(), self.extension()))
    }

    /// Path the in-progress artifact is renamed to for `artifact`
    pub fn final_path(&self, artifact: &Artifact) -> PathBuf {
        artifact.path_with_suffix(&format!("_{}{}", self.label(), self.extension()))
    }

    /// Open a fresh encoder or frame folder
    pub fn open(&mut self) -> Result<()> {
        if self.failed {
            return Err(LoggerError::encoder(self.label(), "stream has failed"));
        }
        let path = self.temp_path();
        let result = match self.settings.mode {
            SaveMode::Video => self
                .factory
                .open(
                    &path,
                    self.settings.fps,
                    self.settings.width,
                    self.settings.height,
                    self.settings.kind == ImageKind::Rgb,
                )
                .map(|encoder| self.encoder = Some(encoder)),
            SaveMode::Frame => std::fs::create_dir_all(&path).map_err(LoggerError::from),
        };
        match result {
            Ok(()) => {
                self.open = true;
                self.frame_index = 0;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Write one frame
    ///
    /// Returns `true` when the frame was stored as an individual image, in
    /// which case the caller records its timestamp.
    pub fn write(&mut self, frame: &Frame) -> Result<bool> {
        if self.failed || !self.open {
            return Ok(false);
        }
        let result = match self.settings.mode {
            SaveMode::Video => match self.encoder.as_mut() {
                Some(encoder) => encoder.write(frame).map(|()| false),
                None => Err(LoggerError::encoder(self.label(), "no open encoder")),
            },
            SaveMode::Frame => {
                let path = self
                    .temp_path()
                    .join(format!("img_{}.png", self.frame_index));
                write_frame_png(frame, &path).map(|()| true)
            }
        };
        match result {
            Ok(stored) => {
                self.frame_index += 1;
                Ok(stored)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Close the encoder, if any
    pub fn close(&mut self) -> Result<()> {
        self.open = false;
        if let Some(mut encoder) = self.encoder.take() {
            if let Err(e) = encoder.close() {
                return Err(self.fail(e));
            }
        }
        Ok(())
    }

    /// Close, rename to the artifact name and, on a periodic rotation, reopen
    pub fn finalize(
        &mut self,
        artifact: &Artifact,
        reason: RotationReason,
        backend: &dyn PersistenceBackend,
    ) -> Result<()> {
        let close_result = self.close();

        let temp = self.temp_path();
        let rename_result = if temp.exists() {
            backend.rename_artifact(&temp, &self.final_path(artifact))
        } else {
            Ok(())
        };
        if let Err(e) = &rename_result {
            tracing::warn!(
                "Camera stream {} keeps its in-progress artifact until the next rotation: {}",
                self.label(),
                e
            );
        }

        let reopen_result = if reason == RotationReason::Periodic && !self.failed {
            let written = self.frame_index;
            let result = self.open();
            if rename_result.is_err() {
                // Keep numbering so retained images are not overwritten
                self.frame_index = written;
            }
            result
        } else {
            Ok(())
        };

        close_result?;
        rename_result?;
        reopen_result
    }

    fn fail(&mut self, error: LoggerError) -> LoggerError {
        if !self.failed {
            tracing::error!(
                "Camera stream {} failed and is disabled for this session: {}",
                self.label(),
                error
            );
        }
        self.failed = true;
        self.open = false;
        self.encoder = None;
        match error {
            e @ LoggerError::Encoder { .. } => e,
            other => LoggerError::encoder(self.label(), other),
        }
    }
}
