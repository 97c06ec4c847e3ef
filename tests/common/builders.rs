//! Test data builders for creating test configurations

use robolog_rs::config::{CameraConfig, ChannelConfig, ExogenousConfig, LoggerConfig};
use std::path::Path;

/// Builder for session configurations writing into a test directory
pub struct ConfigBuilder {
    config: LoggerConfig,
}

impl ConfigBuilder {
    pub fn new(output_dir: &Path) -> Self {
        let mut config = LoggerConfig::default();
        config.telemetry.output_dir = output_dir.to_path_buf();
        config.telemetry.save_period_s = 60.0;
        config.robot_name = Some("test_robot".to_string());
        Self { config }
    }

    pub fn sampling_period(mut self, period: f64) -> Self {
        self.config.sampling_period_s = period;
        self
    }

    pub fn save_period(mut self, period: f64) -> Self {
        self.config.telemetry.save_period_s = period;
        self
    }

    pub fn capacity_margin(mut self, margin: f64) -> Self {
        self.config.telemetry.capacity_margin = margin;
        self
    }

    pub fn camera(mut self, camera: CameraConfig) -> Self {
        self.config.cameras.push(camera);
        self
    }

    pub fn exogenous(mut self, signal: ExogenousConfig) -> Self {
        self.config.exogenous.push(signal);
        self
    }

    pub fn channel(mut self, name: &str, labels: &[&str]) -> Self {
        self.config.channels.push(ChannelConfig {
            name: name.to_string(),
            size: labels.len(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new(Path::new("/tmp/out"))
            .sampling_period(0.1)
            .save_period(1.0)
            .channel("motors_state::currents", &["m1", "m2"])
            .build();

        assert_eq!(config.sampling_period_s, 0.1);
        assert_eq!(config.telemetry.save_period_s, 1.0);
        assert_eq!(config.channels[0].size, 2);
        assert!(config.validate().is_ok());
    }
}
