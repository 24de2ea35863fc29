//! Unified error handling for hpdstorm
//!
//! This crate provides a single error type used across all hpdstorm components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.
//!
//! The hot-plug core itself never fails: interrupt dispatch and deferred
//! processing degrade to logging. Errors only come from the edges around it
//! (settings files, operator knobs, runtime setup, simulator scenarios).

use std::io;
use std::path::PathBuf;

/// Result type alias using HotplugError
pub type Result<T> = std::result::Result<T, HotplugError>;

/// Unified error type for all hpdstorm operations
#[derive(thiserror::Error, Debug)]
pub enum HotplugError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration and Settings Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Storm Control Errors
    // ============================================================================
    #[error("Invalid storm control value: {0:?}")]
    InvalidStormCtl(String),

    // ============================================================================
    // Worker Runtime Errors
    // ============================================================================
    #[error("No async runtime available to run hotplug work")]
    NoRuntime,

    #[error("Hotplug workers already started")]
    AlreadyStarted,

    // ============================================================================
    // Simulator Errors
    // ============================================================================
    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Unknown connector: {0}")]
    UnknownConnector(String),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl HotplugError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a scenario error from a string
    pub fn scenario(msg: impl Into<String>) -> Self {
        Self::Scenario(msg.into())
    }
}

// Allow converting from String to HotplugError
impl From<String> for HotplugError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to HotplugError
impl From<&str> for HotplugError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
