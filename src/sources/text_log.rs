//! Text-log entries

use crate::channels::names::log_channel_name;
use serde::{Deserialize, Serialize};

/// Severity of a text-log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Fatal,
}

/// One message emitted by a remote process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLogEntry {
    pub level: LogLevel,
    pub text: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub function: String,
    #[serde(default)]
    pub hostname: String,
    /// Middleware the producer runs on, e.g. `yarp`
    pub port_system: String,
    /// Port prefix, e.g. `log`
    pub port_prefix: String,
    pub process_name: String,
    pub process_pid: String,
}

impl TextLogEntry {
    pub fn new(
        port_system: &str,
        port_prefix: &str,
        process_name: &str,
        process_pid: &str,
        text: &str,
    ) -> Self {
        Self {
            level: LogLevel::Info,
            text: text.to_string(),
            filename: String::new(),
            line: 0,
            function: String::new(),
            hostname: String::new(),
            port_system: port_system.to_string(),
            port_prefix: port_prefix.to_string(),
            process_name: process_name.to_string(),
            process_pid: process_pid.to_string(),
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Entries without a producer identity cannot be routed
    pub fn is_valid(&self) -> bool {
        !self.port_system.is_empty() && !self.process_name.is_empty()
    }

    /// Channel holding this producer's messages
    pub fn channel_name(&self) -> String {
        log_channel_name(
            &self.port_system,
            &self.port_prefix,
            &self.process_name,
            &self.process_pid,
        )
    }
}
