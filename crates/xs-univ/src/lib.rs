//! # xs-univ
//!
//! Systematic-universe histogramming and covariance derivation for
//! neutrino cross-section analyses.
//!
//! Samples are read one at a time through [`xs_core::EventSource`], folded
//! into per-variable [`Accumulator`]s, normalized to the on-beam exposure and
//! merged. [`CovarianceBuilder`] then turns the universe and detector-variation
//! histograms into covariance matrices, and [`persist`] writes everything to a
//! JSON artifact.
//!
//! ```no_run
//! use std::path::Path;
//! use xs_univ::{CombineEngine, ExposureTable, JsonEventSource, PersistOptions, UnivConfig};
//!
//! let samples = xs_univ::samples::read_file_list(Path::new("files.list"), None).unwrap();
//! let mut engine = CombineEngine::new(UnivConfig::default())
//!     .unwrap()
//!     .with_exposures(ExposureTable::from_samples(&samples));
//! for s in &samples {
//!     let mut src = JsonEventSource::open(&s.path).unwrap();
//!     engine.process_sample(s, &mut src).unwrap();
//! }
//! engine
//!     .finalize(PersistOptions::default())
//!     .unwrap()
//!     .write_json(Path::new("out.json"))
//!     .unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulator;
pub mod binned;
pub mod combine;
pub mod config;
pub mod covariance;
pub mod persist;
pub mod samples;
pub mod source;
pub mod weights;

pub use accumulator::{Accumulator, KnobRecord, UniverseKey};
pub use binned::{Binning, Hist1D, Hist2D};
pub use combine::{CombineEngine, SampleSummary};
pub use config::{CategoryKind, CvCorrection, DetVarId, KnobId, Tables, UnivConfig, VariableSpec};
pub use covariance::{CovarianceBuilder, CovarianceMatrix, CovarianceSet};
pub use persist::{PersistOptions, UnivArtifact};
pub use samples::{ExposureTable, SampleInfo, SampleKind};
pub use source::JsonEventSource;
pub use weights::{SanitizeStats, WeightSet, sanitize};
