//! Error handling for the robot logger
//!
//! This module defines the error taxonomy of the capture engine and a Result
//! alias for use throughout the crate. Only configuration errors are surfaced
//! as hard failures; everything raised while a session is running is
//! recovered locally by the component that hit it and logged.

use thiserror::Error;

/// Main error type for logger operations
#[derive(Error, Debug)]
pub enum LoggerError {
    /// Missing or malformed configuration parameter
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A data source produced nothing on this tick
    #[error("Source '{0}' unavailable")]
    SourceUnavailable(String),

    /// A channel was added twice with different shapes
    #[error("Channel '{name}' already exists with {existing} elements, requested {requested}")]
    DuplicateChannel {
        name: String,
        existing: usize,
        requested: usize,
    },

    /// A sample does not match the shape its channel was created with
    #[error("Channel '{name}' expects {expected} elements, got {got}")]
    SchemaMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// Unknown channel name
    #[error("Unknown channel '{0}'")]
    UnknownChannel(String),

    /// Connection or metadata negotiation with a remote producer failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Rotation snapshot, write or rename failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Camera encoder open/write/close failed
    #[error("Encoder error for '{stream}': {message}")]
    Encoder { stream: String, message: String },

    /// Publisher metadata is write-once after finalization
    #[error("Metadata for '{0}' is finalized and cannot change")]
    MetadataFinalized(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Image encoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<LoggerError>,
    },
}

impl LoggerError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        LoggerError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an encoder error for a stream
    pub fn encoder(stream: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LoggerError::Encoder {
            stream: stream.into(),
            message: message.to_string(),
        }
    }

    /// Strip context wrappers and return the underlying error
    pub fn root(&self) -> &LoggerError {
        match self {
            LoggerError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error must abort session configuration
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.root(),
            LoggerError::Configuration(_) | LoggerError::ConfigParse(_)
        )
    }
}

/// Result type alias for logger operations
pub type Result<T> = std::result::Result<T, LoggerError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| LoggerError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| LoggerError::Io(e).with_context(f()))
    }
}
