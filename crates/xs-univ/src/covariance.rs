//! Covariance matrices derived from an [`Accumulator`].
//!
//! Knob matrices compare every universe of a knob against the nominal MC
//! projection; detVar matrices compare one variation against its CV
//! baseline. Matrices are indexed by analysis-variable bin (0-based).

use nalgebra::{DMatrix, DVector};
use xs_core::{Error, Result};

use crate::accumulator::Accumulator;
use crate::binned::Hist1D;
use crate::config::{KnobId, MC_STAT_NAME, TOTAL_NAME};

/// Square covariance matrix over the analysis-variable bins.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    matrix: DMatrix<f64>,
}

impl CovarianceMatrix {
    /// Zero matrix of dimension `n_bins`.
    pub fn zeros(n_bins: usize) -> Self {
        Self { matrix: DMatrix::zeros(n_bins, n_bins) }
    }

    /// Diagonal matrix.
    pub fn diagonal(values: &[f64]) -> Self {
        Self { matrix: DMatrix::from_diagonal(&DVector::from_column_slice(values)) }
    }

    /// Dimension.
    pub fn n_bins(&self) -> usize {
        self.matrix.nrows()
    }

    /// Element `(i, j)`.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix[(i, j)]
    }

    /// Underlying matrix.
    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Row-major copy of the elements.
    pub fn to_row_major(&self) -> Vec<f64> {
        let n = self.n_bins();
        let mut out = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                out.push(self.matrix[(i, j)]);
            }
        }
        out
    }

    /// Square root of the diagonal.
    pub fn sigmas(&self) -> Vec<f64> {
        self.matrix.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect()
    }

    /// `cov[i][j] += (a[i] - b[i]) * (a[j] - b[j])`.
    pub fn accumulate_outer(&mut self, a: &Hist1D, b: &Hist1D) -> Result<()> {
        let n = self.n_bins();
        if a.bin_content.len() != n || b.bin_content.len() != n {
            return Err(Error::Validation(format!(
                "covariance dimension {n} does not match histograms ({}, {})",
                a.bin_content.len(),
                b.bin_content.len()
            )));
        }
        let d: Vec<f64> = a.bin_content.iter().zip(&b.bin_content).map(|(x, y)| x - y).collect();
        for i in 0..n {
            for j in 0..n {
                self.matrix[(i, j)] += d[i] * d[j];
            }
        }
        Ok(())
    }

    /// Divide every element by `n`.
    pub fn average_over(&mut self, n: usize) {
        if n > 0 {
            self.matrix /= n as f64;
        }
    }

    /// Element-wise `self += other`.
    pub fn add_assign(&mut self, other: &CovarianceMatrix) -> Result<()> {
        if self.n_bins() != other.n_bins() {
            return Err(Error::Validation(format!(
                "covariance dimension mismatch: {} vs {}",
                self.n_bins(),
                other.n_bins()
            )));
        }
        self.matrix += &other.matrix;
        Ok(())
    }

    /// Whether `cov[i][j] == cov[j][i]` exactly.
    pub fn is_symmetric(&self) -> bool {
        self.matrix == self.matrix.transpose()
    }
}

/// Named covariance matrices for one accumulator, in output order: knobs,
/// detVars, MC statistics, total.
#[derive(Debug, Clone, Default)]
pub struct CovarianceSet {
    entries: Vec<(String, CovarianceMatrix)>,
}

impl CovarianceSet {
    /// Matrix by name.
    pub fn get(&self, name: &str) -> Option<&CovarianceMatrix> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    /// All matrices in output order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CovarianceMatrix)> {
        self.entries.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Number of matrices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No matrices.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Derives covariance matrices from one accumulator.
pub struct CovarianceBuilder<'a> {
    acc: &'a Accumulator,
    reference: Hist1D,
}

impl<'a> CovarianceBuilder<'a> {
    /// Builder using the accumulator's nominal MC projection as reference.
    pub fn new(acc: &'a Accumulator) -> Self {
        Self { acc, reference: acc.nominal_mc() }
    }

    /// Reference (nominal MC) histogram.
    pub fn reference(&self) -> &Hist1D {
        &self.reference
    }

    /// Universe covariance of one knob, or `None` if the knob was never seen.
    ///
    /// Multisim knobs are averaged over the number of universes found;
    /// unisim knobs keep the raw sum.
    pub fn knob_matrix(&self, knob: KnobId) -> Result<Option<CovarianceMatrix>> {
        let Some(record) = self.acc.known_knobs().get(&knob) else {
            return Ok(None);
        };
        let mut cov = CovarianceMatrix::zeros(self.acc.binning().n_bins);
        let universes = self.acc.universes_for(knob);
        for (_, hist) in &universes {
            cov.accumulate_outer(&self.reference, hist)?;
        }
        if record.is_averaged {
            cov.average_over(universes.len());
        }
        Ok(Some(cov))
    }

    /// Matrix for every knob seen, keyed by knob name, in table order.
    pub fn knob_matrices(&self) -> Result<Vec<(String, CovarianceMatrix)>> {
        let tables = self.acc.tables();
        let mut out = Vec::new();
        for &knob in self.acc.known_knobs().keys() {
            if let Some(cov) = self.knob_matrix(knob)? {
                out.push((tables.knob(knob).name.clone(), cov));
            }
        }
        Ok(out)
    }

    /// Matrix for every detVar pair whose variation was filled.
    ///
    /// A filled variation without its CV baseline is an input error.
    pub fn detvar_matrices(&self) -> Result<Vec<(String, CovarianceMatrix)>> {
        let tables = self.acc.tables();
        let mut out = Vec::new();
        for &(var, cv) in tables.detvar_pairs() {
            let Some(var_hist) = self.acc.detvar(var) else {
                log::debug!(
                    "{}: no '{}' sample, skipping detVar covariance",
                    self.acc.name(),
                    tables.detvar_label(var)
                );
                continue;
            };
            let cv_hist = self.acc.detvar(cv).ok_or_else(|| {
                Error::Input(format!(
                    "detVar '{}' was filled but its baseline '{}' was not",
                    tables.detvar_label(var),
                    tables.detvar_label(cv)
                ))
            })?;
            let mut cov = CovarianceMatrix::zeros(self.acc.binning().n_bins);
            cov.accumulate_outer(cv_hist, var_hist)?;
            out.push((tables.detvar_label(var).to_string(), cov));
        }
        Ok(out)
    }

    /// Diagonal MC statistical covariance from the reference `sumw2`.
    pub fn mc_stat_matrix(&self) -> CovarianceMatrix {
        CovarianceMatrix::diagonal(&self.reference.sumw2)
    }

    /// Every matrix, plus `MCstat` and their sum `total`.
    pub fn build_all(&self) -> Result<CovarianceSet> {
        let mut entries = self.knob_matrices()?;
        entries.extend(self.detvar_matrices()?);
        entries.push((MC_STAT_NAME.to_string(), self.mc_stat_matrix()));

        let mut total = CovarianceMatrix::zeros(self.acc.binning().n_bins);
        for (_, m) in &entries {
            total.add_assign(m)?;
        }
        entries.push((TOTAL_NAME.to_string(), total));
        Ok(CovarianceSet { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::UniverseKey;
    use crate::config::{Tables, UnivConfig, VariableSpec};
    use crate::weights::{WeightMap, WeightSet};
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn acc(n_bins: usize) -> Accumulator {
        let tables = Arc::new(Tables::new(&UnivConfig::default()).unwrap());
        let spec = VariableSpec::new("x", "X", "x", n_bins, 0.0, n_bins as f64);
        Accumulator::new(&spec, tables).unwrap()
    }

    fn knob(acc: &Accumulator, name: &str) -> KnobId {
        acc.tables().knob_id(name).unwrap()
    }

    /// Fill the nominal MC with `w` in bin `b` and every throw of `name` with
    /// `throws[k]` in the same bin.
    fn fill_bin(acc: &mut Accumulator, name: &str, b: usize, w: f64, throws: &[f64]) {
        let x = b as f64 + 0.5;
        acc.fill_unweighted(x, Some(2), w).unwrap();
        let id = knob(acc, name);
        let averaged = acc.tables().knob(id).averaged;
        let mut m = WeightMap::new();
        let set = WeightSet { weights: throws.to_vec(), cv_correction: 1.0, is_averaged: averaged };
        m.insert(id, set);
        acc.fill_universes_from_map(&m, x).unwrap();
    }

    #[test]
    fn multisim_identical_throws_give_zero() {
        let mut a = acc(3);
        for b in 0..3 {
            fill_bin(&mut a, "flux_all", b, 2.0, &[2.0; 10]);
        }
        let cov = CovarianceBuilder::new(&a).knob_matrix(knob(&a, "flux_all")).unwrap().unwrap();
        assert_eq!(cov.as_matrix(), &DMatrix::<f64>::zeros(3, 3));
    }

    #[test]
    fn multisim_is_averaged_over_throws() {
        let mut a = acc(1);
        // reference 4; throws 2 and 6 -> deviations ±2 -> mean square 4
        fill_bin(&mut a, "flux_all", 0, 4.0, &[2.0, 6.0]);
        let cov = CovarianceBuilder::new(&a).knob_matrix(knob(&a, "flux_all")).unwrap().unwrap();
        assert_relative_eq!(cov.get(0, 0), 4.0);
    }

    #[test]
    fn unisim_is_not_averaged() {
        let mut a = acc(3);
        let delta = 1.5;
        for b in 0..3 {
            fill_bin(&mut a, "NormCCCOH_UBGenie", b, 3.0, &[3.0 + delta]);
        }
        let cov =
            CovarianceBuilder::new(&a).knob_matrix(knob(&a, "NormCCCOH_UBGenie")).unwrap().unwrap();
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(cov.get(i, j), delta * delta);
            }
        }
    }

    #[test]
    fn knob_selection_is_by_identity() {
        let mut a = acc(1);
        fill_bin(&mut a, "flux_all", 0, 1.0, &[3.0]);
        fill_bin(&mut a, "reint_all", 0, 0.0, &[1.0]);
        let flux = knob(&a, "flux_all");
        assert_eq!(a.universes_for(flux).len(), 1);
        assert!(a.universe(&UniverseKey { knob: flux, throw: 0 }).is_some());
        // reference = 1 + 0 = 1
        let cov = CovarianceBuilder::new(&a).knob_matrix(flux).unwrap().unwrap();
        assert_relative_eq!(cov.get(0, 0), 4.0);
        assert!(CovarianceBuilder::new(&a).knob_matrix(knob(&a, "All_UBGenie")).unwrap().is_none());
    }

    #[test]
    fn detvar_pair_uses_designated_baseline() {
        let mut a = acc(3);
        a.fill_detvar_label("detVarLYrayl", 0.5, 10.0).unwrap();
        a.fill_detvar_label("detVarCV", 0.5, 7.0).unwrap();
        let mats = CovarianceBuilder::new(&a).detvar_matrices().unwrap();
        assert_eq!(mats.len(), 1);
        let (name, cov) = &mats[0];
        assert_eq!(name, "detVarLYrayl");
        assert_eq!(cov.get(0, 0), 9.0);
        for (i, j) in [(0, 1), (1, 1), (2, 2), (2, 0)] {
            assert_eq!(cov.get(i, j), 0.0);
        }
    }

    #[test]
    fn detvar_without_baseline_is_an_error() {
        let mut a = acc(2);
        a.fill_detvar_label("detVarSCE", 0.5, 1.0).unwrap();
        let err = CovarianceBuilder::new(&a).detvar_matrices().unwrap_err();
        assert!(err.to_string().contains("detVarCVExtra"));
    }

    #[test]
    fn build_all_adds_stat_and_total() {
        let mut a = acc(2);
        fill_bin(&mut a, "NormCCCOH_UBGenie", 0, 2.0, &[3.0]);
        a.fill_detvar_label("detVarWMX", 1.5, 5.0).unwrap();
        a.fill_detvar_label("detVarCV", 1.5, 3.0).unwrap();

        let set = CovarianceBuilder::new(&a).build_all().unwrap();
        let names: Vec<&str> = set.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["NormCCCOH_UBGenie", "detVarWMX", MC_STAT_NAME, TOTAL_NAME]);

        let stat = set.get(MC_STAT_NAME).unwrap();
        assert_eq!(stat.get(0, 0), 4.0);
        assert_eq!(stat.get(0, 1), 0.0);

        let total = set.get(TOTAL_NAME).unwrap();
        // knob d = (-1, 0), detVar d = (0, -2), stat diag (4, 0)
        assert_relative_eq!(total.get(0, 0), 1.0 + 4.0);
        assert_relative_eq!(total.get(0, 1), 0.0);
        assert_relative_eq!(total.get(1, 1), 4.0);
        assert_eq!(total.sigmas().len(), 2);
    }

    proptest! {
        #[test]
        fn prop_covariances_are_symmetric(
            fills in proptest::collection::vec(
                (0usize..4, 0.0f64..30.0, proptest::collection::vec(0.0f64..30.0, 5)),
                1..25,
            ),
        ) {
            let mut a = acc(4);
            for (b, w, throws) in &fills {
                fill_bin(&mut a, "All_UBGenie", *b, *w, throws);
                fill_bin(&mut a, "DecayAngMEC_UBGenie", *b, 0.0, &throws[..1]);
            }
            let set = CovarianceBuilder::new(&a).build_all().unwrap();
            for (name, m) in set.iter() {
                prop_assert!(m.is_symmetric(), "{} not symmetric", name);
                prop_assert_eq!(m.n_bins(), 4);
            }
        }
    }
}
