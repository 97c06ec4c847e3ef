//! Capture session
//!
//! A [`CaptureSession`] owns everything that lives for one capture: the
//! buffer store, the acquisition loop, the camera streams and the discovery
//! tables. Workers receive their share of that state at construction; there
//! is no process-wide registry.
//!
//! # Lifecycle
//!
//! 1. [`CaptureSession::configure`] validates the configuration, creates the
//!    store, the pre-declared and camera channels and the publisher. Any
//!    error here is fatal.
//! 2. [`CaptureSession::start`] opens the camera streams and spawns the
//!    camera workers, the discovery workers and the rotation timer.
//! 3. An external periodic driver calls [`CaptureSession::on_tick`] once per
//!    sampling period, or [`CaptureSession::run`] drives it in place.
//! 4. [`CaptureSession::stop`] joins every worker and performs the final
//!    rotation. It is idempotent and also runs on drop.
//!
//! ```no_run
//! use robolog_rs::{CaptureSession, Collaborators, LoggerConfig, SystemClock};
//! use std::sync::Arc;
//!
//! let config = LoggerConfig::load("robolog.toml")?;
//! let session = CaptureSession::configure(config, Collaborators::new(Arc::new(SystemClock::new())))?;
//! session.start()?;
//! for _ in 0..100 {
//!     session.on_tick();
//! }
//! session.stop()?;
//! # Ok::<(), robolog_rs::LoggerError>(())
//! ```

pub mod acquisition;
pub mod orchestrator;
pub mod provenance;
pub mod types;

pub use acquisition::AcquisitionLoop;
pub use orchestrator::SaveOrchestrator;
pub use provenance::{CommandRunner, ProvenanceWriter, ShellRunner};
pub use types::SessionState;

use crate::camera::{CameraStream, CameraWorker, SharedStream, StreamSettings};
use crate::channels::names::{
    camera_channel_name, CAMERA_ELEMENTS_NAMES, DESCRIPTION_LIST_NAME, ROBOT_NAME, TIMESTAMPS_NAME,
};
use crate::clock::{run_periodic, Clock};
use crate::config::{CameraConfig, LoggerConfig};
use crate::discovery::{binding_table, BindingTable, ExogenousDiscoveryWorker, LogDiscoveryWorker, PortSet};
use crate::error::{LoggerError, Result, ResultExt};
use crate::publisher::{PublisherMessage, RealTimePublisher};
use crate::sources::{
    DataSource, EncoderFactory, ExogenousTransport, FrameSource, MjpegEncoderFactory, ProducerTransport,
    TextLogReceiver,
};
use crate::storage::{BufferStore, JsonFileBackend, PersistenceBackend, RotationTimer};
use crate::sync::lock;
use crate::types::{CaptureStats, ChannelDescriptor, ImageKind, RotationReason, SaveMode};
use crate::worker::WorkerHandle;
use crossbeam_channel::Receiver;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// External collaborators a session is built from
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub backend: Arc<dyn PersistenceBackend>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub sources: Vec<Box<dyn DataSource>>,
    pub producers: Option<Arc<dyn ProducerTransport>>,
    pub text_logs: Option<Box<dyn TextLogReceiver>>,
    pub exogenous: Option<Arc<dyn ExogenousTransport>>,
    pub frames: Option<Arc<dyn FrameSource>>,
    pub status_runner: Arc<dyn CommandRunner>,
}

impl Collaborators {
    /// JSON persistence, Motion-JPEG encoding and shell status commands
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            backend: Arc::new(JsonFileBackend::new()),
            encoders: Arc::new(MjpegEncoderFactory::default()),
            sources: Vec::new(),
            producers: None,
            text_logs: None,
            exogenous: None,
            frames: None,
            status_runner: Arc::new(ShellRunner),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn PersistenceBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_encoders(mut self, encoders: Arc<dyn EncoderFactory>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn with_source(mut self, source: Box<dyn DataSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_text_logs(mut self, producers: Arc<dyn ProducerTransport>, receiver: Box<dyn TextLogReceiver>) -> Self {
        self.producers = Some(producers);
        self.text_logs = Some(receiver);
        self
    }

    pub fn with_exogenous(mut self, transport: Arc<dyn ExogenousTransport>) -> Self {
        self.exogenous = Some(transport);
        self
    }

    pub fn with_frames(mut self, frames: Arc<dyn FrameSource>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_status_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.status_runner = runner;
        self
    }
}

struct CameraSetup {
    config: CameraConfig,
    streams: Vec<(ImageKind, SharedStream)>,
}

#[derive(Default)]
struct Runtime {
    state: SessionState,
    workers: Vec<WorkerHandle>,
    rotation: Option<RotationTimer>,
    log_discovery: Option<LogDiscoveryWorker>,
    exogenous_discovery: Option<ExogenousDiscoveryWorker>,
}

/// One capture session
pub struct CaptureSession {
    config: LoggerConfig,
    clock: Arc<dyn Clock>,
    store: Arc<BufferStore>,
    acquisition: Mutex<AcquisitionLoop>,
    cameras: Vec<CameraSetup>,
    frames: Option<Arc<dyn FrameSource>>,
    log_ports: Option<PortSet>,
    bindings: BindingTable,
    runtime: Mutex<Runtime>,
    accepting: AtomicBool,
}

impl CaptureSession {
    /// Validate `config` and build every piece of session state
    pub fn configure(config: LoggerConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            clock,
            backend,
            encoders,
            sources,
            producers,
            text_logs,
            exogenous,
            frames,
            status_runner,
        } = collaborators;

        let output_dir = config.telemetry.output_dir.clone();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

        let robot_name = config.resolved_robot_name();
        let store = Arc::new(BufferStore::new(config.buffer_config(), backend)?);
        store.set_robot_name(robot_name.clone());
        store.set_description_list(config.description_list.clone());

        for channel in &config.channels {
            store.add_channel(
                ChannelDescriptor::numeric(&channel.name, channel.size)
                    .with_labels(channel.labels.iter().cloned())
                    .created_at(clock.now()),
            )?;
        }

        if !config.cameras.is_empty() && frames.is_none() {
            return Err(LoggerError::Configuration(
                "cameras are configured but no frame source is available".to_string(),
            ));
        }
        let cameras = Self::configure_cameras(&config, &store, &encoders, output_dir)?;

        let publisher = if config.publisher.enabled {
            let mut publisher =
                RealTimePublisher::new(config.publisher.missing_value_policy, config.publisher.subscriber_queue);
            publisher.add_metadata(TIMESTAMPS_NAME, &[])?;
            publisher.add_metadata(ROBOT_NAME, &[robot_name.clone()])?;
            publisher.add_metadata(DESCRIPTION_LIST_NAME, &config.description_list)?;
            Some(publisher)
        } else {
            None
        };

        let mut acquisition = AcquisitionLoop::new(
            Arc::clone(&clock),
            Arc::clone(&store),
            config.sampling_period_s,
            publisher,
        );
        for source in sources {
            acquisition.add_source(source);
        }
        if let Some(receiver) = text_logs {
            acquisition.set_text_logs(receiver);
        }

        let log_discovery = producers.map(|transport| {
            LogDiscoveryWorker::new(
                transport,
                config.text_logging_port_prefix.clone(),
                config.text_logging_subnames.clone(),
                config.text_logging_port_name.clone(),
            )
        });
        let log_ports = log_discovery.as_ref().map(LogDiscoveryWorker::port_set);

        let bindings = binding_table(config.exogenous.iter().map(|e| e.binding_spec()));
        let exogenous_discovery = match exogenous {
            Some(transport) => {
                acquisition.set_exogenous(Arc::clone(&transport), Arc::clone(&bindings));
                Some(ExogenousDiscoveryWorker::new(transport, Arc::clone(&bindings)))
            }
            None if !config.exogenous.is_empty() => {
                return Err(LoggerError::Configuration(
                    "exogenous signals are configured but no exogenous transport is available".to_string(),
                ));
            }
            None => None,
        };

        let streams: Vec<SharedStream> = cameras
            .iter()
            .flat_map(|c| c.streams.iter().map(|(_, s)| Arc::clone(s)))
            .collect();
        let provenance = ProvenanceWriter::new(
            robot_name.clone(),
            config.code_status_cmd_prefixes.clone(),
            status_runner,
        );
        store.set_save_callback(Arc::new(SaveOrchestrator::new(
            streams,
            store.backend(),
            Some(provenance),
        )));

        tracing::info!(
            "Capture session configured for robot '{}': {} sources, {} cameras, {} exogenous signals, \
             sampling every {}s, rotating every {}s into {}",
            robot_name,
            acquisition.source_count(),
            cameras.len(),
            config.exogenous.len(),
            config.sampling_period_s,
            config.telemetry.save_period_s,
            config.telemetry.output_dir.display()
        );

        Ok(Self {
            clock,
            store,
            acquisition: Mutex::new(acquisition),
            cameras,
            frames,
            log_ports,
            bindings,
            runtime: Mutex::new(Runtime {
                log_discovery,
                exogenous_discovery,
                ..Runtime::default()
            }),
            accepting: AtomicBool::new(true),
            config,
        })
    }

    fn configure_cameras(
        config: &LoggerConfig,
        store: &BufferStore,
        encoders: &Arc<dyn EncoderFactory>,
        output_dir: PathBuf,
    ) -> Result<Vec<CameraSetup>> {
        let mut cameras = Vec::with_capacity(config.cameras.len());
        for camera in &config.cameras {
            let mut streams = Vec::new();
            for (kind, mode) in camera.streams() {
                if kind == ImageKind::Depth && mode == SaveMode::Video {
                    tracing::warn!(
                        "Camera '{}' saves depth as video; depth is stored as 8-bit grayscale and loses precision",
                        camera.name
                    );
                }
                let settings = StreamSettings {
                    camera: camera.name.clone(),
                    kind,
                    mode,
                    fps: camera.fps,
                    width: camera.width,
                    height: camera.height,
                    output_dir: output_dir.clone(),
                };
                streams.push((kind, CameraStream::new(settings, Arc::clone(encoders)).shared()));
                store.add_channel(
                    ChannelDescriptor::numeric(camera_channel_name(&camera.name, kind), 1)
                        .with_labels(CAMERA_ELEMENTS_NAMES),
                )?;
            }
            cameras.push(CameraSetup {
                config: camera.clone(),
                streams,
            });
        }
        Ok(cameras)
    }

    /// Open the camera streams and spawn every worker
    ///
    /// Starting a running session does nothing; a stopped session cannot be
    /// restarted.
    pub fn start(&self) -> Result<()> {
        let mut runtime = lock(&self.runtime);
        match runtime.state {
            SessionState::Running => return Ok(()),
            SessionState::Stopped => {
                return Err(LoggerError::Configuration(
                    "a stopped capture session cannot be restarted".to_string(),
                ))
            }
            SessionState::Configured => {}
        }

        if let Some(publisher) = lock(&self.acquisition).publisher_mut() {
            publisher.finalize_metadata();
        }

        for camera in &self.cameras {
            for (_, stream) in &camera.streams {
                // A failed open disables only this stream
                let _ = lock(stream).open();
            }
            if let Some(frames) = &self.frames {
                let worker = CameraWorker::new(
                    camera.config.name.clone(),
                    camera.config.fps,
                    camera.config.depth_scale,
                    camera.streams.clone(),
                    Arc::clone(frames),
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                );
                runtime
                    .workers
                    .push(worker.spawn().context(format!("camera '{}'", camera.config.name))?);
            }
        }

        if let Some(worker) = runtime.log_discovery.take() {
            let handle = worker
                .spawn(Arc::clone(&self.clock), self.config.discovery.log_period_s)
                .context("log discovery")?;
            runtime.workers.push(handle);
        }
        if let Some(worker) = runtime.exogenous_discovery.take() {
            let handle = worker
                .spawn(Arc::clone(&self.clock), self.config.discovery.exogenous_period_s)
                .context("exogenous discovery")?;
            runtime.workers.push(handle);
        }

        runtime.rotation = Some(
            RotationTimer::spawn(Arc::clone(&self.store), Arc::clone(&self.clock))
                .context("rotation timer")?,
        );
        runtime.state = SessionState::Running;
        tracing::info!("Capture session started with {} workers", runtime.workers.len() + 1);
        Ok(())
    }

    /// Join every worker and perform the final rotation
    ///
    /// Calling `stop` again after it has completed does nothing.
    pub fn stop(&self) -> Result<()> {
        let mut runtime = lock(&self.runtime);
        if runtime.state.is_stopped() {
            return Ok(());
        }
        self.accepting.store(false, Ordering::SeqCst);

        for worker in &runtime.workers {
            worker.request_stop();
        }
        for mut worker in runtime.workers.drain(..) {
            worker.stop();
        }
        if let Some(mut timer) = runtime.rotation.take() {
            timer.stop();
        }
        runtime.state = SessionState::Stopped;
        drop(runtime);

        let result = self.store.rotate(RotationReason::Final);
        tracing::info!("Capture session stopped");
        result.map(|_| ())
    }

    /// Run one acquisition tick
    ///
    /// Returns the number of samples stored. Ticks after `stop` are ignored.
    pub fn on_tick(&self) -> usize {
        if !self.accepting.load(Ordering::SeqCst) {
            return 0;
        }
        lock(&self.acquisition).tick()
    }

    /// Rotate the buffer store now
    pub fn on_rotation_due(&self, reason: RotationReason) -> Result<PathBuf> {
        self.store.rotate(reason)
    }

    /// Drive [`on_tick`](Self::on_tick) at the sampling period until
    /// `running` is cleared
    pub fn run(&self, running: &AtomicBool) {
        run_periodic(
            self.clock.as_ref(),
            self.config.sampling_period_s,
            running,
            "Acquisition loop",
            || {
                self.on_tick();
            },
        );
    }

    pub fn state(&self) -> SessionState {
        lock(&self.runtime).state
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<BufferStore> {
        &self.store
    }

    /// Exogenous bindings and their connection state
    pub fn bindings(&self) -> BindingTable {
        Arc::clone(&self.bindings)
    }

    /// Text-log producers attached so far
    pub fn log_producers(&self) -> BTreeSet<String> {
        self.log_ports
            .as_ref()
            .map(|ports| lock(ports).clone())
            .unwrap_or_default()
    }

    /// Every camera stream of the session
    pub fn camera_streams(&self) -> Vec<SharedStream> {
        self.cameras
            .iter()
            .flat_map(|c| c.streams.iter().map(|(_, s)| Arc::clone(s)))
            .collect()
    }

    /// Live feed of the real-time publisher, `None` when it is disabled
    pub fn subscribe(&self) -> Option<Receiver<PublisherMessage>> {
        lock(&self.acquisition).publisher_mut().map(RealTimePublisher::subscribe)
    }

    /// Last value broadcast for `channel`
    pub fn last_published(&self, channel: &str) -> Option<Vec<f64>> {
        lock(&self.acquisition)
            .publisher()
            .and_then(|p| p.last_value(channel).map(<[f64]>::to_vec))
    }

    /// Health counters of the session
    pub fn stats(&self) -> CaptureStats {
        let acquisition = lock(&self.acquisition);
        let mut stats = acquisition.stats().clone();
        stats.dropped_publications = acquisition.publisher().map_or(0, RealTimePublisher::dropped);
        drop(acquisition);

        let store = self.store.stats();
        stats.rotations = store.rotations;
        stats.failed_rotations = store.failed_rotations;
        stats.dropped_samples = store.dropped_samples;
        stats.rejected_samples = store.rejected_samples;
        stats
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        // A session that never started or ticked has nothing to save
        if self.state() == SessionState::Configured && lock(&self.acquisition).stats().ticks == 0 {
            return;
        }
        if let Err(e) = self.stop() {
            tracing::warn!("Capture session shutdown incomplete: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};
    use crate::session::provenance::MockCommandRunner;
    use crate::sources::{MockDataSource, Reading};
    use crate::storage::PersistedArtifact;
    use crate::types::Payload;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> LoggerConfig {
        let mut config = LoggerConfig::default();
        config.telemetry.save_period_s = 60.0;
        config.telemetry.output_dir = dir.path().to_path_buf();
        config.robot_name = Some("ergoCubSN000".to_string());
        config
    }

    fn quiet_runner() -> Arc<dyn CommandRunner> {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| None);
        Arc::new(runner)
    }

    fn constant_source() -> Box<dyn DataSource> {
        let mut source = MockDataSource::new();
        source.expect_channel().return_const("joints_state::positions".to_string());
        source.expect_labels().returning(Vec::new);
        source
            .expect_try_read()
            .returning(|| Some(Reading::new(vec![1.0, 2.0, 3.0])));
        Box::new(source)
    }

    #[test]
    fn test_configure_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.telemetry.save_period_s = 0.0;
        let clock = Arc::new(ManualClock::new(0.0));
        let result = CaptureSession::configure(config, Collaborators::new(clock));
        assert!(matches!(result, Err(LoggerError::Configuration(_))));
    }

    #[test]
    fn test_configure_rejects_bad_time_format() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.telemetry.file_indexing = "%Q".to_string();
        let clock = Arc::new(ManualClock::new(0.0));
        let result = CaptureSession::configure(config, Collaborators::new(clock));
        assert!(matches!(result, Err(LoggerError::Configuration(_))));
    }

    #[test]
    fn test_dropping_unstarted_session_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();
        let collaborators = Collaborators::new(Arc::new(ManualClock::new(0.0)))
            .with_status_runner(Arc::new(runner))
            .with_source(constant_source());
        let session = CaptureSession::configure(config(&dir), collaborators).unwrap();
        drop(session);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_dropping_ticked_session_saves_its_data() {
        let dir = TempDir::new().unwrap();
        let collaborators = Collaborators::new(Arc::new(ManualClock::new(0.0)))
            .with_status_runner(quiet_runner())
            .with_source(constant_source());
        let session = CaptureSession::configure(config(&dir), collaborators).unwrap();
        session.on_tick();
        drop(session);
        let json = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .count();
        assert_eq!(json, 1);
    }

    #[test]
    fn test_cameras_without_frame_source_are_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.cameras.push(CameraConfig::rgb("head", 30.0));
        let clock = Arc::new(ManualClock::new(0.0));
        assert!(CaptureSession::configure(config, Collaborators::new(clock)).is_err());
    }

    #[test]
    fn test_ticks_then_stop_persists_everything() {
        let dir = TempDir::new().unwrap();
        let collaborators = Collaborators::new(Arc::new(SystemClock::new()))
            .with_status_runner(quiet_runner())
            .with_source(constant_source());
        let session = CaptureSession::configure(config(&dir), collaborators).unwrap();
        session.start().unwrap();
        assert!(session.state().is_running());

        for _ in 0..20 {
            session.on_tick();
        }
        session.stop().unwrap();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.on_tick(), 0);
        // Second stop is a no-op
        session.stop().unwrap();

        let stats = session.stats();
        assert_eq!(stats.ticks, 20);
        assert_eq!(stats.rotations, 1);

        let json = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok().map(|e| e.path()))
            .find(|p| p.extension().is_some_and(|e| e == "json"))
            .unwrap();
        let artifact = PersistedArtifact::load(&json).unwrap();
        assert_eq!(artifact.robot_name, "ergoCubSN000");
        let records = artifact.channels["joints_state::positions"].records();
        assert_eq!(records.len(), 20);
        assert!(records
            .iter()
            .all(|r| r.payload == Payload::Numeric(vec![1.0, 2.0, 3.0])));
        assert_eq!(
            session.last_published("joints_state::positions"),
            Some(vec![1.0, 2.0, 3.0])
        );
    }

    #[test]
    fn test_stopped_session_cannot_restart() {
        let dir = TempDir::new().unwrap();
        let session = CaptureSession::configure(
            config(&dir),
            Collaborators::new(Arc::new(SystemClock::new())).with_status_runner(quiet_runner()),
        )
        .unwrap();
        session.start().unwrap();
        session.start().unwrap();
        session.stop().unwrap();
        assert!(session.start().is_err());
    }

    #[test]
    fn test_predeclared_channels_and_publisher_metadata() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.channels.push(crate::config::ChannelConfig {
            name: "motors_state::currents".to_string(),
            size: 2,
            labels: vec!["m1".to_string(), "m2".to_string()],
        });
        config.description_list = vec!["torso_pitch".to_string(), "torso_roll".to_string()];
        let clock = Arc::new(ManualClock::new(0.0));
        let session = CaptureSession::configure(
            config,
            Collaborators::new(clock).with_status_runner(quiet_runner()),
        )
        .unwrap();
        assert!(session.store().has_channel("motors_state::currents"));

        let rx = session.subscribe().unwrap();
        match rx.try_recv().unwrap() {
            PublisherMessage::Metadata(metadata) => {
                assert_eq!(
                    metadata["robot_realtime::yarp_robot_name"],
                    vec!["ergoCubSN000".to_string()]
                );
                assert!(metadata.contains_key("robot_realtime::timestamps"));
                assert_eq!(
                    metadata["robot_realtime::description_list"],
                    vec!["torso_pitch", "torso_roll"]
                );
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
