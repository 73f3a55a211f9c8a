//! Error types for the xsec universe engine

use thiserror::Error;

/// Engine error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or inconsistent configuration table
    #[error("Configuration error: {0}")]
    Config(String),

    /// Systematic knob missing from the knob table
    #[error("Unknown systematic knob: '{0}'")]
    UnknownKnob(String),

    /// Detector-variation label missing from the detVar table
    #[error("Unknown detector variation: '{0}'")]
    UnknownDetVar(String),

    /// Malformed or incomplete input (file list, ntuple, stored scalar)
    #[error("Input error: {0}")]
    Input(String),

    /// Validation error (binning or throw-count invariants)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
