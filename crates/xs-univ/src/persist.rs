//! Output store: one JSON artifact with a group per analysis variable.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use xs_core::{Error, Result};

use crate::accumulator::Accumulator;
use crate::binned::{Binning, Hist1D, Hist2D};
use crate::covariance::{CovarianceBuilder, CovarianceMatrix};

/// Schema tag written into every artifact.
pub const SCHEMA_VERSION: &str = "xsec_univ_histograms_v0";

/// Top-level artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnivArtifact {
    /// Schema tag.
    pub schema_version: String,
    /// Provenance.
    pub meta: UnivMeta,
    /// Per-variable groups keyed by output directory.
    pub groups: BTreeMap<String, GroupArtifact>,
}

/// Provenance block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnivMeta {
    /// Producing tool.
    pub tool: String,
    /// Tool version.
    pub tool_version: String,
    /// Creation time.
    pub created_unix_ms: u128,
}

/// Everything written for one analysis variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupArtifact {
    /// Variable name.
    pub variable: String,
    /// Axis title.
    pub title: String,
    /// Variable × category table.
    pub unweighted_histogram_2d: Hist2DArtifact,
    /// Nominal MC projection.
    pub unweighted_histogram_mc_1d: Hist1DArtifact,
    /// Universe histograms keyed by `"<knob>_<throw>"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universes: Option<BTreeMap<String, Hist1DArtifact>>,
    /// DetVar histograms keyed by label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detvars: Option<BTreeMap<String, Hist1DArtifact>>,
    /// Covariance matrices keyed by `CovMat_<name>`.
    pub covariances: BTreeMap<String, CovMatArtifact>,
}

/// Serialized [`Hist1D`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist1DArtifact {
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge of first bin.
    pub x_min: f64,
    /// Upper edge of last bin.
    pub x_max: f64,
    /// Sum of weights per bin.
    pub bin_content: Vec<f64>,
    /// Sum of squared weights per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights.
    pub underflow: f64,
    /// Overflow sum of weights.
    pub overflow: f64,
    /// Number of fills.
    pub entries: u64,
}

impl From<&Hist1D> for Hist1DArtifact {
    fn from(h: &Hist1D) -> Self {
        let Binning { n_bins, x_min, x_max } = h.binning;
        Self {
            n_bins,
            x_min,
            x_max,
            bin_content: h.bin_content.clone(),
            sumw2: h.sumw2.clone(),
            underflow: h.underflow,
            overflow: h.overflow,
            entries: h.entries,
        }
    }
}

/// Serialized [`Hist2D`]; `bin_content` is row-major by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hist2DArtifact {
    /// Number of bins.
    pub n_bins: usize,
    /// Lower edge of first bin.
    pub x_min: f64,
    /// Upper edge of last bin.
    pub x_max: f64,
    /// Category labels, one per row.
    pub categories: Vec<String>,
    /// Row-major sums, `[category * n_bins + bin]`.
    pub bin_content: Vec<f64>,
    /// Row-major sums of squared weights.
    pub sumw2: Vec<f64>,
    /// Underflow per category.
    pub underflow: Vec<f64>,
    /// Overflow per category.
    pub overflow: Vec<f64>,
    /// Total weight in the unmatched category.
    pub unmatched: f64,
    /// Number of fills.
    pub entries: u64,
}

impl Hist2DArtifact {
    fn new(h: &Hist2D, categories: Vec<String>) -> Self {
        let Binning { n_bins, x_min, x_max } = h.binning;
        Self {
            n_bins,
            x_min,
            x_max,
            categories,
            bin_content: h.bin_content.clone(),
            sumw2: h.sumw2.clone(),
            underflow: h.underflow.clone(),
            overflow: h.overflow.clone(),
            unmatched: h.unmatched,
            entries: h.entries,
        }
    }
}

/// Serialized covariance matrix, row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovMatArtifact {
    /// Matrix dimension.
    pub n_bins: usize,
    /// Row-major elements.
    pub data: Vec<f64>,
}

impl From<&CovarianceMatrix> for CovMatArtifact {
    fn from(m: &CovarianceMatrix) -> Self {
        Self { n_bins: m.n_bins(), data: m.to_row_major() }
    }
}

/// Which optional histogram families to write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOptions {
    /// Write every universe histogram.
    pub write_universes: bool,
    /// Write every detVar histogram.
    pub write_detvars: bool,
}

fn now_unix_ms() -> Result<u128> {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Computation(format!("system time error: {}", e)))?;
    Ok(d.as_millis())
}

/// Output key of a covariance matrix.
pub fn covmat_key(name: &str) -> String {
    format!("CovMat_{name}")
}

/// Build one group: histograms plus every derived covariance matrix.
pub fn group_artifact(acc: &Accumulator, opts: PersistOptions) -> Result<GroupArtifact> {
    let tables = acc.tables();
    let covariances = CovarianceBuilder::new(acc)
        .build_all()?
        .iter()
        .map(|(name, m)| (covmat_key(name), CovMatArtifact::from(m)))
        .collect();

    let universes = opts.write_universes.then(|| {
        acc.universes()
            .into_iter()
            .map(|(key, h)| (key.label(tables), Hist1DArtifact::from(h)))
            .collect::<BTreeMap<_, _>>()
    });
    let detvars = opts.write_detvars.then(|| {
        acc.detvars()
            .into_iter()
            .map(|(id, h)| (tables.detvar_label(id).to_string(), Hist1DArtifact::from(h)))
            .collect::<BTreeMap<_, _>>()
    });

    let categories = tables.categories().iter().map(|c| c.label.clone()).collect();
    Ok(GroupArtifact {
        variable: acc.name().to_string(),
        title: acc.title().to_string(),
        unweighted_histogram_2d: Hist2DArtifact::new(acc.unweighted(), categories),
        unweighted_histogram_mc_1d: Hist1DArtifact::from(&acc.nominal_mc()),
        universes,
        detvars,
        covariances,
    })
}

/// Build the full artifact from every accumulator.
pub fn univ_artifact<'a>(
    accumulators: impl IntoIterator<Item = &'a Accumulator>,
    opts: PersistOptions,
) -> Result<UnivArtifact> {
    let mut groups = BTreeMap::new();
    for acc in accumulators {
        if groups.insert(acc.directory().to_string(), group_artifact(acc, opts)?).is_some() {
            return Err(Error::Validation(format!(
                "duplicate output directory '{}'",
                acc.directory()
            )));
        }
    }
    Ok(UnivArtifact {
        schema_version: SCHEMA_VERSION.to_string(),
        meta: UnivMeta {
            tool: "xsec".to_string(),
            tool_version: xs_core::VERSION.to_string(),
            created_unix_ms: now_unix_ms()?,
        },
        groups,
    })
}

impl UnivArtifact {
    /// Write pretty-printed JSON to `path`.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut w, self)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(())
    }
}
