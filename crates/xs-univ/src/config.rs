//! Configuration tables for the universe engine.
//!
//! The knob table, the detVar → CV-baseline table, the category table, and
//! the analysis-variable binnings are plain data. They are deserialized from
//! JSON (or taken from [`UnivConfig::default`]), validated once, and frozen
//! into [`Tables`], which every accumulator shares.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use xs_core::{Error, Result};

use crate::binned::Binning;

/// Covariance name reserved for the MC statistical matrix.
pub const MC_STAT_NAME: &str = "MCstat";
/// Covariance name reserved for the summed matrix.
pub const TOTAL_NAME: &str = "total";

/// How the per-event CV correction of a knob is formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvCorrection {
    /// No correction.
    None,
    /// Spline weight only (GENIE knobs already include the tune).
    Spline,
    /// Tuned CV weight times spline weight.
    TunedCvSpline,
}

/// One systematic knob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnobConfig {
    /// Knob name (weight vector name without the `weight_` prefix).
    pub name: String,
    /// CV correction rule.
    pub cv_correction: CvCorrection,
    /// Multisim (`true`) or unisim (`false`).
    pub averaged: bool,
}

impl KnobConfig {
    /// Create a knob entry.
    pub fn new(name: impl Into<String>, cv_correction: CvCorrection, averaged: bool) -> Self {
        Self { name: name.into(), cv_correction, averaged }
    }
}

/// A detector-variation sample and the CV sample it is compared against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetVarPair {
    /// Variation label (the sample type in the file list).
    pub label: String,
    /// CV baseline label.
    pub cv_label: String,
}

/// Role of a category in the covariance reference projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    /// Cosmic-ray induced object in simulation.
    Cosmic,
    /// Simulated object matched to a true particle species.
    Particle,
    /// Off-beam (EXT) data.
    ExternalBackground,
    /// On-beam data.
    RealData,
}

impl CategoryKind {
    /// Whether the category contributes to the nominal MC prediction.
    pub fn is_mc(self) -> bool {
        matches!(self, CategoryKind::Cosmic | CategoryKind::Particle)
    }
}

/// One row of the category axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    /// Axis label.
    pub label: String,
    /// Category role.
    pub kind: CategoryKind,
    /// Truth PDG codes mapped to this category.
    #[serde(default)]
    pub pdg: Vec<i32>,
}

impl CategoryDef {
    fn new(label: &str, kind: CategoryKind, pdg: &[i32]) -> Self {
        Self { label: label.into(), kind, pdg: pdg.to_vec() }
    }
}

/// One analysis variable and its binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    /// Variable name used in event records.
    pub name: String,
    /// Output group the variable is persisted under.
    pub directory: String,
    /// Axis title.
    #[serde(default)]
    pub title: String,
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge.
    pub x_min: f64,
    /// Upper edge.
    pub x_max: f64,
}

impl VariableSpec {
    /// Create a variable entry.
    pub fn new(
        name: impl Into<String>,
        directory: impl Into<String>,
        title: impl Into<String>,
        n_bins: usize,
        x_min: f64,
        x_max: f64,
    ) -> Self {
        Self {
            name: name.into(),
            directory: directory.into(),
            title: title.into(),
            n_bins,
            x_min,
            x_max,
        }
    }

    /// Validated binning for this variable.
    pub fn binning(&self) -> Result<Binning> {
        Binning::new(self.n_bins, self.x_min, self.x_max)
            .map_err(|e| Error::Config(format!("variable '{}': {}", self.name, e)))
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnivConfig {
    /// Systematic knobs.
    pub knobs: Vec<KnobConfig>,
    /// Detector-variation pairs.
    pub detvars: Vec<DetVarPair>,
    /// Category axis.
    pub categories: Vec<CategoryDef>,
    /// Analysis variables.
    pub variables: Vec<VariableSpec>,
}

impl Default for UnivConfig {
    fn default() -> Self {
        use CvCorrection::{Spline, TunedCvSpline};

        let knobs = vec![
            KnobConfig::new("flux_all", TunedCvSpline, true),
            KnobConfig::new("reint_all", TunedCvSpline, true),
            KnobConfig::new("All_UBGenie", Spline, true),
            KnobConfig::new("AxFFCCQEshape_UBGenie", Spline, false),
            KnobConfig::new("DecayAngMEC_UBGenie", Spline, false),
            KnobConfig::new("NormCCCOH_UBGenie", Spline, false),
            KnobConfig::new("NormNCCOH_UBGenie", Spline, false),
            KnobConfig::new("RPA_CCQE_UBGenie", Spline, true),
            KnobConfig::new("ThetaDelta2NRad_UBGenie", Spline, false),
            KnobConfig::new("Theta_Delta2Npi_UBGenie", Spline, false),
            KnobConfig::new("VecFFCCQEshape_UBGenie", Spline, false),
            KnobConfig::new("XSecShape_CCMEC_UBGenie", Spline, false),
            KnobConfig::new("xsr_scc_Fa3_SCC", TunedCvSpline, true),
            KnobConfig::new("xsr_scc_Fv3_SCC", TunedCvSpline, true),
        ];

        let detvars = [
            ("detVarLYrayl", "detVarCV"),
            ("detVarLYatten", "detVarCV"),
            ("detVarLYdown", "detVarCVLYDown"),
            ("detVarWMAngleXZ", "detVarCV"),
            ("detVarWMAngleYZ", "detVarCV"),
            ("detVarWMX", "detVarCV"),
            ("detVarWMYZ", "detVarCV"),
            ("detVarWMdEdx", "detVarCVdEdx"),
            ("detVarSCE", "detVarCVExtra"),
            ("detVarRecomb2", "detVarCVExtra"),
        ]
        .into_iter()
        .map(|(label, cv)| DetVarPair { label: label.into(), cv_label: cv.into() })
        .collect();

        use CategoryKind::{Cosmic, ExternalBackground, Particle, RealData};
        let categories = vec![
            CategoryDef::new("Cosmic", Cosmic, &[0]),
            CategoryDef::new("e", Particle, &[11, -11]),
            CategoryDef::new("#mu", Particle, &[13, -13]),
            CategoryDef::new("#gamma", Particle, &[22]),
            CategoryDef::new("#pi^{#pm}", Particle, &[211, -211]),
            CategoryDef::new("K^{#pm}", Particle, &[321, -321]),
            CategoryDef::new("n", Particle, &[2112]),
            CategoryDef::new("p", Particle, &[2212]),
            CategoryDef::new("EXT", ExternalBackground, &[]),
            CategoryDef::new("Data", RealData, &[]),
        ];

        let variables = vec![
            VariableSpec::new("trk_score", "TrackScoreMuon", "Track Score", 50, 0.0, 1.0),
            VariableSpec::new("trk_distance", "TrackDistMuon", "Track Distance", 50, 0.0, 15.0),
            VariableSpec::new("trk_len", "TrackLenMuon", "Track Length", 50, 0.0, 100.0),
            VariableSpec::new(
                "trk_llr_pid_score",
                "TrackPIDMuon",
                "Track PID Score",
                50,
                -1.0,
                1.0,
            ),
            VariableSpec::new(
                "proton_llr_pid_score",
                "TrackPIDProton",
                "Track PID Score",
                50,
                -1.0,
                1.0,
            ),
        ];

        Self { knobs, detvars, categories, variables }
    }
}

impl UnivConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let cfg: UnivConfig = serde_json::from_slice(&bytes)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check table consistency.
    pub fn validate(&self) -> Result<()> {
        let reserved = [MC_STAT_NAME, TOTAL_NAME];

        let mut knob_names = HashSet::new();
        for k in &self.knobs {
            if k.name.is_empty() {
                return Err(Error::Config("empty knob name".into()));
            }
            if reserved.contains(&k.name.as_str()) {
                return Err(Error::Config(format!("knob name '{}' is reserved", k.name)));
            }
            if !knob_names.insert(k.name.as_str()) {
                return Err(Error::Config(format!("duplicate knob '{}'", k.name)));
            }
        }

        let mut detvar_labels = HashSet::new();
        for d in &self.detvars {
            for label in [&d.label, &d.cv_label] {
                if label.is_empty() || reserved.contains(&label.as_str()) {
                    return Err(Error::Config(format!("invalid detVar label '{label}'")));
                }
                if knob_names.contains(label.as_str()) {
                    return Err(Error::Config(format!(
                        "detVar label '{label}' clashes with a knob"
                    )));
                }
            }
            if d.label == d.cv_label {
                return Err(Error::Config(format!("detVar '{}' is its own baseline", d.label)));
            }
            if !detvar_labels.insert(d.label.as_str()) {
                return Err(Error::Config(format!("duplicate detVar '{}'", d.label)));
            }
        }

        let count = |kind: CategoryKind| self.categories.iter().filter(|c| c.kind == kind).count();
        if !self.categories.iter().any(|c| c.kind.is_mc()) {
            return Err(Error::Config("no MC (cosmic/particle) category".into()));
        }
        if count(CategoryKind::ExternalBackground) != 1 || count(CategoryKind::RealData) != 1 {
            return Err(Error::Config(
                "exactly one external_background and one real_data category required".into(),
            ));
        }
        let mut seen_pdg = HashSet::new();
        for c in &self.categories {
            for code in &c.pdg {
                if !seen_pdg.insert(*code) {
                    return Err(Error::Config(format!("PDG code {code} mapped twice")));
                }
            }
        }

        let mut var_names = HashSet::new();
        for v in &self.variables {
            if !var_names.insert(v.name.as_str()) {
                return Err(Error::Config(format!("duplicate variable '{}'", v.name)));
            }
            v.binning()?;
        }
        Ok(())
    }
}

/// Index of a knob in the validated knob table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KnobId(pub u32);

/// Index of a detVar or CV-baseline label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DetVarId(pub u32);

/// Validated, interned lookup tables shared by all accumulators of a run.
#[derive(Debug, Clone)]
pub struct Tables {
    knobs: Vec<KnobConfig>,
    knob_index: HashMap<String, KnobId>,
    detvar_labels: Vec<String>,
    detvar_index: HashMap<String, DetVarId>,
    detvar_pairs: Vec<(DetVarId, DetVarId)>,
    categories: Vec<CategoryDef>,
    pdg_index: HashMap<i32, usize>,
    ext_category: usize,
    data_category: usize,
}

impl Tables {
    /// Validate `cfg` and intern its labels.
    pub fn new(cfg: &UnivConfig) -> Result<Self> {
        cfg.validate()?;

        let knob_index = cfg
            .knobs
            .iter()
            .enumerate()
            .map(|(i, k)| (k.name.clone(), KnobId(i as u32)))
            .collect();

        let mut detvar_labels: Vec<String> = Vec::new();
        let mut detvar_index: HashMap<String, DetVarId> = HashMap::new();
        let mut intern = |label: &str| -> DetVarId {
            if let Some(&id) = detvar_index.get(label) {
                return id;
            }
            let id = DetVarId(detvar_labels.len() as u32);
            detvar_labels.push(label.to_string());
            detvar_index.insert(label.to_string(), id);
            id
        };
        let detvar_pairs =
            cfg.detvars.iter().map(|d| (intern(&d.label), intern(&d.cv_label))).collect();

        let mut pdg_index = HashMap::new();
        for (i, c) in cfg.categories.iter().enumerate() {
            for &code in &c.pdg {
                pdg_index.insert(code, i);
            }
        }
        let position = |kind: CategoryKind| {
            cfg.categories.iter().position(|c| c.kind == kind).ok_or_else(|| {
                Error::Config(format!("missing category of kind {kind:?}"))
            })
        };

        Ok(Self {
            knobs: cfg.knobs.clone(),
            knob_index,
            detvar_labels,
            detvar_index,
            detvar_pairs,
            categories: cfg.categories.clone(),
            pdg_index,
            ext_category: position(CategoryKind::ExternalBackground)?,
            data_category: position(CategoryKind::RealData)?,
        })
    }

    /// Look up a knob by name.
    pub fn knob_id(&self, name: &str) -> Option<KnobId> {
        self.knob_index.get(name).copied()
    }

    /// Knob entry for `id`.
    pub fn knob(&self, id: KnobId) -> &KnobConfig {
        &self.knobs[id.0 as usize]
    }

    /// All knobs in table order.
    pub fn knobs(&self) -> impl Iterator<Item = (KnobId, &KnobConfig)> {
        self.knobs.iter().enumerate().map(|(i, k)| (KnobId(i as u32), k))
    }

    /// Look up a detVar or CV label; unknown labels are a configuration error.
    pub fn detvar_id(&self, label: &str) -> Result<DetVarId> {
        self.detvar_index.get(label).copied().ok_or_else(|| Error::UnknownDetVar(label.to_string()))
    }

    /// Label for `id`.
    pub fn detvar_label(&self, id: DetVarId) -> &str {
        &self.detvar_labels[id.0 as usize]
    }

    /// `(variation, baseline)` pairs in table order.
    pub fn detvar_pairs(&self) -> &[(DetVarId, DetVarId)] {
        &self.detvar_pairs
    }

    /// Category axis.
    pub fn categories(&self) -> &[CategoryDef] {
        &self.categories
    }

    /// Category row for a truth PDG code.
    pub fn category_for_pdg(&self, pdg: i32) -> Option<usize> {
        self.pdg_index.get(&pdg).copied()
    }

    /// Row of the off-beam category.
    pub fn ext_category(&self) -> usize {
        self.ext_category
    }

    /// Row of the on-beam data category.
    pub fn data_category(&self) -> usize {
        self.data_category
    }
}
