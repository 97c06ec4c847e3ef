//! Camera frame encoders
//!
//! Video artifacts are Motion-JPEG streams: every frame is JPEG-encoded and
//! appended to the same file. Depth frames are stored as 8-bit grayscale in
//! video mode. Frame mode writes one PNG per frame, 16-bit grayscale for depth
//! and 8-bit RGB for color.

use super::{EncoderFactory, VideoEncoder};
use crate::error::{LoggerError, Result, ResultExt};
use crate::types::{Frame, FramePixels};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageBuffer, ImageFormat, Luma, RgbImage};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Default JPEG quality of video frames
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Motion-JPEG writer for one stream
pub struct MjpegEncoder {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    width: u32,
    height: u32,
    is_color: bool,
    quality: u8,
    frames: u64,
}

impl MjpegEncoder {
    /// Open `path` for writing; frames are appended to an existing stream
    pub fn create(path: &Path, width: u32, height: u32, is_color: bool, quality: u8) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to create video {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            width,
            height,
            is_color,
            quality,
            frames: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    fn stream_name(&self) -> String {
        self.path.display().to_string()
    }
}

impl VideoEncoder for MjpegEncoder {
    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(LoggerError::encoder(
                self.stream_name(),
                format!(
                    "frame is {}x{}, stream was opened as {}x{}",
                    frame.width, frame.height, self.width, self.height
                ),
            ));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| LoggerError::encoder(self.path.display().to_string(), "stream is closed"))?;

        let (data, color) = match (&frame.pixels, self.is_color) {
            (FramePixels::Rgb8(data), true) => (data.clone(), ExtendedColorType::Rgb8),
            (FramePixels::Depth(_), false) => (
                frame.depth_to_u8().unwrap_or_default(),
                ExtendedColorType::L8,
            ),
            _ => {
                return Err(LoggerError::encoder(
                    self.path.display().to_string(),
                    "frame kind does not match the stream",
                ))
            }
        };

        {
            let mut encoder = JpegEncoder::new_with_quality(&mut *writer, self.quality);
            encoder.encode(&data, frame.width, frame.height, color)?;
        }
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .with_context(|| format!("Failed to flush video {}", self.path.display()))?;
            tracing::debug!("Closed {} after {} frames", self.path.display(), self.frames);
        }
        Ok(())
    }
}

impl Drop for MjpegEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("{}", e);
        }
    }
}

/// Opens [`MjpegEncoder`]s
#[derive(Debug, Clone)]
pub struct MjpegEncoderFactory {
    quality: u8,
}

impl Default for MjpegEncoderFactory {
    fn default() -> Self {
        Self {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl MjpegEncoderFactory {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl EncoderFactory for MjpegEncoderFactory {
    fn open(
        &self,
        path: &Path,
        fps: f64,
        width: u32,
        height: u32,
        is_color: bool,
    ) -> Result<Box<dyn VideoEncoder>> {
        tracing::debug!(
            "Opening {} ({}x{} @ {} fps, color: {})",
            path.display(),
            width,
            height,
            fps,
            is_color
        );
        Ok(Box::new(MjpegEncoder::create(
            path,
            width,
            height,
            is_color,
            self.quality,
        )?))
    }
}

/// Write one frame as a PNG image
pub fn write_frame_png(frame: &Frame, path: &Path) -> Result<()> {
    match &frame.pixels {
        FramePixels::Rgb8(data) => {
            let img: RgbImage = ImageBuffer::from_raw(frame.width, frame.height, data.clone())
                .ok_or_else(|| {
                    LoggerError::encoder(path.display().to_string(), "pixel buffer too small")
                })?;
            img.save_with_format(path, ImageFormat::Png)?;
        }
        FramePixels::Depth(_) => {
            let data = frame.depth_to_u16().unwrap_or_default();
            let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(frame.width, frame.height, data).ok_or_else(|| {
                    LoggerError::encoder(path.display().to_string(), "depth buffer too small")
                })?;
            img.save_with_format(path, ImageFormat::Png)?;
        }
    }
    Ok(())
}
