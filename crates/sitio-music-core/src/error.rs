//! Error types for the music engine.
//!
//! None of these reach the game host: engine operations are best-effort and
//! report degradation through [`crate::engine::EngineEvent`] and
//! [`crate::instruments::SetupReport`] instead.

use thiserror::Error;

/// Errors raised by a [`crate::backend::ToneBackend`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// The audio context could not be resumed (e.g. waiting for a user gesture).
    #[error("Audio context unavailable: {0}")]
    ContextBlocked(String),

    /// The backend has not been set up yet or was shut down.
    #[error("Backend not ready")]
    NotReady,

    /// A sampled instrument could not be loaded.
    #[error("Failed to load samples for {instrument}: {reason}")]
    SampleLoad { instrument: String, reason: String },

    /// OSC encoding or transmission error.
    #[error("OSC error: {0}")]
    Osc(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while loading or saving an [`crate::config::EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Invalid(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
