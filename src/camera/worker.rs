//! Camera worker thread
//!
//! One worker per configured camera runs at the camera's own frame rate. On
//! each cycle it grabs the newest frame of every stream and hands it to the
//! stream's encoder or frame folder under the per-stream lock.
//!
//! A failed grab reuses the previous frame. A cycle that overruns its period
//! is logged and the worker re-arms from `wake += period`, falling behind
//! rather than skipping frames. When every stream of the camera has failed
//! the worker exits.

use super::SharedStream;
use crate::channels::names::camera_channel_name;
use crate::clock::{sleep_until_or_stopped, Clock, PeriodicSchedule};
use crate::sources::FrameSource;
use crate::storage::BufferStore;
use crate::sync::lock;
use crate::types::{Frame, ImageKind, Sample};
use crate::worker::WorkerHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Grabs and stores the frames of one camera
pub struct CameraWorker {
    camera: String,
    fps: f64,
    depth_scale: f32,
    streams: Vec<(ImageKind, SharedStream)>,
    source: Arc<dyn FrameSource>,
    store: Arc<BufferStore>,
    clock: Arc<dyn Clock>,
    last_frames: HashMap<ImageKind, Frame>,
    cycles: u64,
}

impl CameraWorker {
    pub fn new(
        camera: impl Into<String>,
        fps: f64,
        depth_scale: f32,
        streams: Vec<(ImageKind, SharedStream)>,
        source: Arc<dyn FrameSource>,
        store: Arc<BufferStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            camera: camera.into(),
            fps,
            depth_scale,
            streams,
            source,
            store,
            clock,
            last_frames: HashMap::new(),
            cycles: 0,
        }
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Grab and store one frame per stream at session time `time`
    ///
    /// Returns `false` once every stream has failed.
    pub fn run_cycle(&mut self, time: f64) -> bool {
        self.cycles += 1;
        let mut alive = false;

        for (kind, stream) in &self.streams {
            if lock(stream).is_failed() {
                continue;
            }
            alive = true;

            match self.source.grab(&self.camera, *kind) {
                Some(mut frame) => {
                    if *kind == ImageKind::Depth {
                        frame.scale_depth(self.depth_scale);
                    }
                    self.last_frames.insert(*kind, frame);
                }
                None => {
                    tracing::info!(
                        "Unable to get the {} frame of camera '{}', the previous frame will be used",
                        kind,
                        self.camera
                    );
                }
            }

            let Some(frame) = self.last_frames.get(kind) else {
                continue;
            };

            // Write errors are reported by the stream when it disables itself
            let stored = lock(stream).write(frame);
            if let Ok(true) = stored {
                let sample = Sample::numeric(camera_channel_name(&self.camera, *kind), vec![time], time)
                    .with_source_timestamp(Some(time));
                if let Err(e) = self.store.append(sample) {
                    tracing::debug!("Camera '{}' timestamp not stored: {}", self.camera, e);
                }
            }
        }

        alive && self.streams.iter().any(|(_, s)| !lock(s).is_failed())
    }

    /// Run at the camera frame rate until `running` is cleared
    pub fn run(&mut self, running: &AtomicBool) {
        let period = 1.0 / self.fps;
        let mut schedule = PeriodicSchedule::new(period, self.clock.now());
        tracing::info!("Camera worker '{}' started at {} fps", self.camera, self.fps);

        while running.load(Ordering::SeqCst) {
            let now = self.clock.now();
            let step = schedule.advance(now);
            if step.reset {
                tracing::warn!("Camera '{}': clock reset detected", self.camera);
            }

            if !self.run_cycle(now) {
                tracing::error!("Every stream of camera '{}' has failed, stopping its worker", self.camera);
                break;
            }

            self.clock.yield_now();
            if step.wake < self.clock.now() {
                tracing::info!(
                    "Camera worker '{}' spent more time than its period to save a frame",
                    self.camera
                );
            }

            if !sleep_until_or_stopped(self.clock.as_ref(), step.wake, running) {
                break;
            }
        }

        tracing::info!("Camera worker '{}' stopped", self.camera);
    }

    /// Move the worker onto its own thread
    pub fn spawn(mut self) -> std::io::Result<WorkerHandle> {
        WorkerHandle::spawn(format!("camera-{}", self.camera), move |running| {
            self.run(&running)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraStream, StreamSettings};
    use crate::clock::ManualClock;
    use crate::sources::{MjpegEncoderFactory, MockFrameSource};
    use crate::storage::{BufferConfig, JsonFileBackend};
    use crate::types::{ChannelDescriptor, SaveMode};
    use std::path::Path;
    use tempfile::TempDir;

    fn stream(dir: &Path, kind: ImageKind, mode: SaveMode) -> SharedStream {
        let mut stream = CameraStream::new(
            StreamSettings {
                camera: "head".into(),
                kind,
                mode,
                fps: 10.0,
                width: 2,
                height: 2,
                output_dir: dir.to_path_buf(),
            },
            Arc::new(MjpegEncoderFactory::default()),
        );
        stream.open().unwrap();
        stream.shared()
    }

    fn store(dir: &Path) -> Arc<BufferStore> {
        let config = BufferConfig::for_periods(0.01, 10.0).with_output_dir(dir);
        let store = BufferStore::new(config, Arc::new(JsonFileBackend::new())).unwrap();
        for kind in ["rgb", "depth"] {
            store
                .add_channel(
                    ChannelDescriptor::numeric(format!("camera::head::{}", kind), 1)
                        .with_labels(["timestamp"]),
                )
                .unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_failed_grab_reuses_previous_frame() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let rgb = stream(dir.path(), ImageKind::Rgb, SaveMode::Frame);

        let mut source = MockFrameSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_grab()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Some(Frame::rgb(2, 2, vec![1; 12])));
        source
            .expect_grab()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| None);

        let mut worker = CameraWorker::new(
            "head",
            10.0,
            1.0,
            vec![(ImageKind::Rgb, rgb.clone())],
            Arc::new(source),
            store.clone(),
            Arc::new(ManualClock::new(0.0)),
        );
        assert!(worker.run_cycle(0.0));
        assert!(worker.run_cycle(0.1));

        assert_eq!(lock(&rgb).frames_written(), 2);
        assert_eq!(store.buffered_len("camera::head::rgb"), 2);
    }

    #[test]
    fn test_no_frame_yet_skips_write() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let rgb = stream(dir.path(), ImageKind::Rgb, SaveMode::Frame);
        let mut source = MockFrameSource::new();
        source.expect_grab().returning(|_, _| None);

        let mut worker = CameraWorker::new(
            "head",
            10.0,
            1.0,
            vec![(ImageKind::Rgb, rgb.clone())],
            Arc::new(source),
            store.clone(),
            Arc::new(ManualClock::new(0.0)),
        );
        assert!(worker.run_cycle(0.0));
        assert_eq!(lock(&rgb).frames_written(), 0);
        assert_eq!(store.buffered_len("camera::head::rgb"), 0);
    }

    #[test]
    fn test_depth_video_does_not_record_timestamps() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let depth = stream(dir.path(), ImageKind::Depth, SaveMode::Video);
        let mut source = MockFrameSource::new();
        source
            .expect_grab()
            .withf(|camera, kind| camera == "head" && *kind == ImageKind::Depth)
            .returning(|_, _| Some(Frame::depth(2, 2, vec![0.1, 0.2, 0.3, 0.4])));

        let mut worker = CameraWorker::new(
            "head",
            10.0,
            1000.0,
            vec![(ImageKind::Depth, depth.clone())],
            Arc::new(source),
            store.clone(),
            Arc::new(ManualClock::new(0.0)),
        );
        assert!(worker.run_cycle(0.0));
        assert_eq!(lock(&depth).frames_written(), 1);
        assert_eq!(store.buffered_len("camera::head::depth"), 0);
    }

    #[test]
    fn test_worker_exits_when_all_streams_fail() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let rgb = stream(dir.path(), ImageKind::Rgb, SaveMode::Video);
        let mut source = MockFrameSource::new();
        // Wrong dimensions make the encoder fail
        source
            .expect_grab()
            .returning(|_, _| Some(Frame::rgb(3, 3, vec![0; 27])));

        let clock = Arc::new(ManualClock::new(0.0));
        let mut worker = CameraWorker::new(
            "head",
            10.0,
            1.0,
            vec![(ImageKind::Rgb, rgb.clone())],
            Arc::new(source),
            store,
            clock,
        );
        let running = AtomicBool::new(true);
        worker.run(&running);
        assert!(lock(&rgb).is_failed());
        assert_eq!(worker.cycles(), 1);
    }

    #[test]
    #[cfg(feature = "mock-sources")]
    fn test_worker_stops_on_flag() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        let rgb = stream(dir.path(), ImageKind::Rgb, SaveMode::Frame);
        let source = crate::sources::mock::SyntheticFrameSource::new(2, 2);

        let worker = CameraWorker::new(
            "head",
            50.0,
            1.0,
            vec![(ImageKind::Rgb, rgb.clone())],
            Arc::new(source),
            store.clone(),
            Arc::new(crate::clock::SystemClock::new()),
        );
        let mut handle = worker.spawn().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(200));
        handle.stop();

        let written = lock(&rgb).frames_written();
        assert!(written >= 2, "expected frames, got {}", written);
        assert_eq!(store.buffered_len("camera::head::rgb") as u64, written);
    }
}
