//! Input sample bookkeeping: the file list and per-run exposures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use xs_core::{Error, Result};

/// Kind of input sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleKind {
    /// On-beam data (`onBNB`).
    OnBeam,
    /// Off-beam data (`extBNB`).
    OffBeam,
    /// Generic MC (any type containing `MC`).
    Mc,
    /// Detector-variation MC; carries the variation label.
    DetVar(String),
}

impl SampleKind {
    /// Parse the type column of the file list. Unknown types yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        if s == "onBNB" {
            Some(SampleKind::OnBeam)
        } else if s == "extBNB" {
            Some(SampleKind::OffBeam)
        } else if s.contains("MC") {
            Some(SampleKind::Mc)
        } else if s.contains("detVar") {
            Some(SampleKind::DetVar(s.to_string()))
        } else {
            None
        }
    }

    /// Short name for logs.
    pub fn as_str(&self) -> &str {
        match self {
            SampleKind::OnBeam => "onBNB",
            SampleKind::OffBeam => "extBNB",
            SampleKind::Mc => "MC",
            SampleKind::DetVar(label) => label,
        }
    }
}

/// One line of the file list.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInfo {
    /// Ntuple path.
    pub path: PathBuf,
    /// Run number.
    pub run: u32,
    /// Sample kind.
    pub kind: SampleKind,
    /// Trigger count (on/off-beam only).
    pub triggers: f64,
    /// POT (on-beam only).
    pub pot: f64,
}

fn parse_field<T: std::str::FromStr>(
    field: Option<&str>,
    what: &str,
    line_no: usize,
) -> Result<T> {
    let raw = field.ok_or_else(|| Error::Input(format!("line {line_no}: missing {what}")))?;
    raw.parse::<T>().map_err(|_| Error::Input(format!("line {line_no}: invalid {what} '{raw}'")))
}

/// Parse file-list text.
///
/// Blank lines and lines starting with `#` are ignored, as are lines with an
/// unrecognized sample type. Relative paths are joined onto `base_dir`.
pub fn parse_file_list(text: &str, base_dir: Option<&Path>) -> Result<Vec<SampleInfo>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut fields = trimmed.split_whitespace();
        let path = PathBuf::from(fields.next().unwrap_or_default());
        let run: u32 = parse_field(fields.next(), "run number", line_no)?;
        let type_str: String = parse_field(fields.next(), "sample type", line_no)?;

        let Some(kind) = SampleKind::parse(&type_str) else {
            log::warn!("line {line_no}: unknown sample type '{type_str}', ignoring");
            continue;
        };

        let (triggers, pot) = match kind {
            SampleKind::OnBeam => (
                parse_field::<f64>(fields.next(), "trigger count", line_no)?,
                parse_field::<f64>(fields.next(), "POT", line_no)?,
            ),
            SampleKind::OffBeam => {
                (parse_field::<f64>(fields.next(), "trigger count", line_no)?, 0.0)
            }
            _ => (0.0, 0.0),
        };

        let path = match base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path,
        };
        out.push(SampleInfo { path, run, kind, triggers, pot });
    }
    Ok(out)
}

/// Read and parse a file list from disk.
pub fn read_file_list(path: &Path, base_dir: Option<&Path>) -> Result<Vec<SampleInfo>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Input(format!("cannot open file list {}: {e}", path.display())))?;
    parse_file_list(&text, base_dir)
}

/// On-beam exposure per run, used as the normalization target.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExposureTable {
    run_pot: BTreeMap<u32, f64>,
    run_triggers: BTreeMap<u32, f64>,
    total_pot: f64,
}

impl ExposureTable {
    /// Sum on-beam POT and triggers per run.
    pub fn from_samples(samples: &[SampleInfo]) -> Self {
        let mut t = ExposureTable::default();
        for s in samples.iter().filter(|s| s.kind == SampleKind::OnBeam) {
            *t.run_pot.entry(s.run).or_default() += s.pot;
            *t.run_triggers.entry(s.run).or_default() += s.triggers;
            t.total_pot += s.pot;
        }
        t
    }

    /// On-beam POT recorded for `run`.
    pub fn run_pot(&self, run: u32) -> Result<f64> {
        self.run_pot
            .get(&run)
            .copied()
            .ok_or_else(|| Error::Input(format!("no on-beam POT recorded for run {run}")))
    }

    /// On-beam triggers recorded for `run`.
    pub fn run_triggers(&self, run: u32) -> Result<f64> {
        self.run_triggers
            .get(&run)
            .copied()
            .ok_or_else(|| Error::Input(format!("no on-beam triggers recorded for run {run}")))
    }

    /// POT summed over every on-beam sample.
    pub fn total_pot(&self) -> f64 {
        self.total_pot
    }

    /// Normalization factor for a sample.
    ///
    /// `summed_pot` is the scalar stored in MC and detVar files.
    pub fn scale_factor(&self, sample: &SampleInfo, summed_pot: Option<f64>) -> Result<f64> {
        let stored_pot = || -> Result<f64> {
            let pot = summed_pot.ok_or_else(|| {
                Error::Input(format!("{}: missing stored summed_pot", sample.path.display()))
            })?;
            positive(pot, "summed_pot", sample)
        };
        match &sample.kind {
            SampleKind::OnBeam => Ok(1.0),
            SampleKind::Mc => {
                let target = positive(self.run_pot(sample.run)?, "on-beam run POT", sample)?;
                Ok(target / stored_pot()?)
            }
            SampleKind::OffBeam => {
                let target =
                    positive(self.run_triggers(sample.run)?, "on-beam run triggers", sample)?;
                let own = positive(sample.triggers, "trigger count", sample)?;
                Ok(target / own)
            }
            SampleKind::DetVar(_) => {
                let target = positive(self.total_pot, "total on-beam POT", sample)?;
                Ok(target / stored_pot()?)
            }
        }
    }
}

fn positive(v: f64, what: &str, sample: &SampleInfo) -> Result<f64> {
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err(Error::Input(format!("{}: {what} must be positive, got {v}", sample.path.display())))
    }
}
