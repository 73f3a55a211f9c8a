//! # xs-core
//!
//! Shared types for the xsec universe engine: the error type, the per-event
//! record handed to the engine by the read layer, and the [`EventSource`]
//! trait that decouples the engine from any concrete ntuple format.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::EventSource;
pub use types::{EventRecord, FillEntry};

/// Crate version, recorded in every output artifact.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
