//! Per-event input record supplied by the read layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One object (track, shower, ...) that passed the external selection and
/// should be histogrammed in `variable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEntry {
    /// Name of the analysis variable (must match a configured variable).
    pub variable: String,
    /// Value of the analysis variable for this object.
    pub value: f64,
    /// Backtracked truth PDG code. Required for simulated events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdg: Option<i32>,
}

/// Everything the engine needs from a single event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Whether the event is simulated.
    #[serde(default)]
    pub is_mc: bool,
    /// Tuned central-value weight (ignored for data).
    #[serde(default = "unit_weight")]
    pub tuned_cv_weight: f64,
    /// Spline weight (ignored for data).
    #[serde(default = "unit_weight")]
    pub spline_weight: f64,
    /// Raw systematic weight vectors keyed by knob name. Only read for
    /// reweightable MC samples.
    #[serde(default)]
    pub weights: BTreeMap<String, Vec<f64>>,
    /// Selected objects to histogram.
    #[serde(default)]
    pub entries: Vec<FillEntry>,
}

fn unit_weight() -> f64 {
    1.0
}

impl EventRecord {
    /// Nominal event weight: `tuned_cv_weight * spline_weight` for simulated
    /// events, 1.0 otherwise.
    pub fn nominal_weight(&self) -> f64 {
        if self.is_mc { self.tuned_cv_weight * self.spline_weight } else { 1.0 }
    }
}
