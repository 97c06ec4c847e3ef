//! Artifact naming and the rotation timer thread

use super::BufferStore;
use crate::clock::{run_periodic, Clock};
use crate::types::RotationReason;
use chrono::{DateTime, TimeZone};
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Time format used when the configured one cannot be rendered
pub const DEFAULT_FILE_INDEXING: &str = "%Y_%m_%d_%H_%M_%S";

/// Builds `<prefix>_<time>` artifact names, unique within a session
#[derive(Debug, Clone)]
pub struct ArtifactNamer {
    prefix: String,
    format: String,
    used: HashSet<String>,
}

impl ArtifactNamer {
    pub fn new(prefix: &str, format: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            format: format.to_string(),
            used: HashSet::new(),
        }
    }

    /// Name for a rotation happening at `time`
    ///
    /// Two rotations within the same formatted instant get `_1`, `_2`, ...
    /// appended to the later names.
    pub fn next<Tz>(&mut self, time: DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let mut base = format!("{}_", self.prefix);
        if write!(base, "{}", time.format(&self.format)).is_err() {
            tracing::warn!("Time format '{}' failed, using the default naming", self.format);
            base = format!("{}_{}", self.prefix, time.format(DEFAULT_FILE_INDEXING));
        }
        let mut name = base.clone();
        let mut n = 1;
        while self.used.contains(&name) {
            name = format!("{}_{}", base, n);
            n += 1;
        }
        self.used.insert(name.clone());
        name
    }
}

/// Background thread that rotates a [`BufferStore`] every save period
///
/// The first rotation happens one full period after start.
pub struct RotationTimer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RotationTimer {
    pub fn spawn(store: Arc<BufferStore>, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let period = store.config().save_period_s;

        let handle = std::thread::Builder::new()
            .name("rotation-timer".to_string())
            .spawn(move || {
                let mut first = true;
                run_periodic(clock.as_ref(), period, &flag, "Rotation timer", || {
                    if std::mem::take(&mut first) {
                        return;
                    }
                    // Failures are logged by the store and retried next period
                    let _ = store.rotate(RotationReason::Periodic);
                });
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the running flag and join the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Rotation timer thread panicked");
            }
        }
    }
}

impl Drop for RotationTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::storage::{BufferConfig, JsonFileBackend};
    use chrono::{Local, Utc};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_namer_formats_time() {
        let mut namer = ArtifactNamer::new("robot_logger_device", "%Y_%m_%d_%H_%M_%S");
        let time = Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(namer.next(time), "robot_logger_device_2024_03_07_14_05_09");
    }

    #[test]
    fn test_namer_suffixes_collisions() {
        let mut namer = ArtifactNamer::new("log", "%Y");
        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(namer.next(time), "log_2024");
        assert_eq!(namer.next(time), "log_2024_1");
        assert_eq!(namer.next(time), "log_2024_2");
        assert!(namer.next(Local::now()).starts_with("log_"));
    }

    #[test]
    fn test_namer_falls_back_on_bad_format() {
        let mut namer = ArtifactNamer::new("log", "%Q");
        let time = Utc.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(namer.next(time), "log_2024_03_07_14_05_09");
    }

    #[test]
    fn test_timer_rotates_periodically_and_stops() {
        let dir = TempDir::new().unwrap();
        let config = BufferConfig::for_periods(0.01, 0.05).with_output_dir(dir.path());
        let store = Arc::new(BufferStore::new(config, Arc::new(JsonFileBackend::new())).unwrap());

        let mut timer = RotationTimer::spawn(Arc::clone(&store), Arc::new(SystemClock::new())).unwrap();
        assert!(timer.is_running());
        std::thread::sleep(Duration::from_millis(300));
        timer.stop();
        assert!(!timer.is_running());

        let rotations = store.stats().rotations;
        assert!(rotations >= 2, "expected at least two rotations, got {}", rotations);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(store.stats().rotations, rotations);
    }
}
