//! Plain binned counters.
//!
//! These are value types: a uniform binning and arrays of per-bin sums.
//! Serialization is done separately by [`crate::persist`].

use serde::{Deserialize, Serialize};
use xs_core::{Error, Result};

/// Uniform binning of an analysis variable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Binning {
    /// Number of bins (excluding under/overflow).
    pub n_bins: usize,
    /// Lower edge of first bin.
    pub x_min: f64,
    /// Upper edge of last bin.
    pub x_max: f64,
}

/// Where a value lands on a [`Binning`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinSlot {
    /// Below `x_min`.
    Underflow,
    /// In-range bin index.
    Bin(usize),
    /// At or above `x_max`, or NaN.
    Overflow,
}

impl Binning {
    /// Create a binning; requires `n_bins > 0` and finite `x_min < x_max`.
    pub fn new(n_bins: usize, x_min: f64, x_max: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Validation("binning needs at least one bin".into()));
        }
        if !(x_min.is_finite() && x_max.is_finite() && x_min < x_max) {
            return Err(Error::Validation(format!("invalid range [{x_min}, {x_max})")));
        }
        Ok(Self { n_bins, x_min, x_max })
    }

    /// Locate `x`.
    pub fn find_bin(&self, x: f64) -> BinSlot {
        if x < self.x_min {
            return BinSlot::Underflow;
        }
        if x >= self.x_max || x.is_nan() {
            return BinSlot::Overflow;
        }
        let frac = (x - self.x_min) / (self.x_max - self.x_min);
        let bin = (frac * self.n_bins as f64) as usize;
        // Rounding can push values just below x_max into n_bins.
        BinSlot::Bin(bin.min(self.n_bins - 1))
    }

    /// Bin edges (length `n_bins + 1`).
    pub fn edges(&self) -> Vec<f64> {
        let width = (self.x_max - self.x_min) / self.n_bins as f64;
        (0..=self.n_bins)
            .map(|i| if i == self.n_bins { self.x_max } else { self.x_min + width * i as f64 })
            .collect()
    }

    fn ensure_same(&self, other: &Binning) -> Result<()> {
        if self != other {
            return Err(Error::Validation(format!(
                "binning mismatch: ({}, {}, {}) vs ({}, {}, {})",
                self.n_bins, self.x_min, self.x_max, other.n_bins, other.x_min, other.x_max
            )));
        }
        Ok(())
    }
}

/// A 1D weighted counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Hist1D {
    /// Binning.
    pub binning: Binning,
    /// Sum of weights per bin.
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights.
    pub underflow: f64,
    /// Overflow sum of weights.
    pub overflow: f64,
    /// Number of fills (including under/overflow).
    pub entries: u64,
}

impl Hist1D {
    /// Empty histogram.
    pub fn new(binning: Binning) -> Self {
        Self {
            binning,
            bin_content: vec![0.0; binning.n_bins],
            sumw2: vec![0.0; binning.n_bins],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0,
        }
    }

    /// Add weight `w` at `x`.
    pub fn fill(&mut self, x: f64, w: f64) {
        self.entries += 1;
        match self.binning.find_bin(x) {
            BinSlot::Underflow => self.underflow += w,
            BinSlot::Overflow => self.overflow += w,
            BinSlot::Bin(b) => {
                self.bin_content[b] += w;
                self.sumw2[b] += w * w;
            }
        }
    }

    /// Multiply every sum by `c` (and `sumw2` by `c²`).
    pub fn scale(&mut self, c: f64) {
        let c2 = c * c;
        self.bin_content.iter_mut().for_each(|v| *v *= c);
        self.sumw2.iter_mut().for_each(|v| *v *= c2);
        self.underflow *= c;
        self.overflow *= c;
    }

    /// Bin-wise `self += c * other`.
    pub fn add(&mut self, other: &Hist1D, c: f64) -> Result<()> {
        self.binning.ensure_same(&other.binning)?;
        let c2 = c * c;
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += c * b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += c2 * b;
        }
        self.underflow += c * other.underflow;
        self.overflow += c * other.overflow;
        self.entries += other.entries;
        Ok(())
    }

    /// Zero every sum, keeping the binning.
    pub fn reset(&mut self) {
        *self = Hist1D::new(self.binning);
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }
}

/// A 2D counter over (analysis variable × category).
///
/// Rows are categories; fills into the unmatched sentinel category only
/// reach [`Hist2D::unmatched`].
#[derive(Debug, Clone, PartialEq)]
pub struct Hist2D {
    /// Binning of the analysis variable.
    pub binning: Binning,
    /// Number of category rows.
    pub n_categories: usize,
    /// Row-major sums, `[category * n_bins + bin]`.
    pub bin_content: Vec<f64>,
    /// Row-major sums of squared weights.
    pub sumw2: Vec<f64>,
    /// Underflow per category.
    pub underflow: Vec<f64>,
    /// Overflow per category.
    pub overflow: Vec<f64>,
    /// Total weight filled into the unmatched category.
    pub unmatched: f64,
    /// Number of fills.
    pub entries: u64,
}

impl Hist2D {
    /// Empty table.
    pub fn new(binning: Binning, n_categories: usize) -> Self {
        let n = binning.n_bins * n_categories;
        Self {
            binning,
            n_categories,
            bin_content: vec![0.0; n],
            sumw2: vec![0.0; n],
            underflow: vec![0.0; n_categories],
            overflow: vec![0.0; n_categories],
            unmatched: 0.0,
            entries: 0,
        }
    }

    /// Add weight `w` at `x` in `category` (`None` = unmatched).
    pub fn fill(&mut self, x: f64, category: Option<usize>, w: f64) -> Result<()> {
        let Some(cat) = category else {
            self.entries += 1;
            self.unmatched += w;
            return Ok(());
        };
        if cat >= self.n_categories {
            return Err(Error::Validation(format!(
                "category {cat} out of range (n_categories={})",
                self.n_categories
            )));
        }
        self.entries += 1;
        match self.binning.find_bin(x) {
            BinSlot::Underflow => self.underflow[cat] += w,
            BinSlot::Overflow => self.overflow[cat] += w,
            BinSlot::Bin(b) => {
                let i = cat * self.binning.n_bins + b;
                self.bin_content[i] += w;
                self.sumw2[i] += w * w;
            }
        }
        Ok(())
    }

    /// Content of `(bin, category)`.
    pub fn content(&self, bin: usize, category: usize) -> f64 {
        self.bin_content[category * self.binning.n_bins + bin]
    }

    /// Multiply every sum by `c` (and `sumw2` by `c²`).
    pub fn scale(&mut self, c: f64) {
        let c2 = c * c;
        self.bin_content.iter_mut().for_each(|v| *v *= c);
        self.sumw2.iter_mut().for_each(|v| *v *= c2);
        self.underflow.iter_mut().for_each(|v| *v *= c);
        self.overflow.iter_mut().for_each(|v| *v *= c);
        self.unmatched *= c;
    }

    /// Bin-wise `self += c * other`.
    pub fn add(&mut self, other: &Hist2D, c: f64) -> Result<()> {
        self.binning.ensure_same(&other.binning)?;
        if self.n_categories != other.n_categories {
            return Err(Error::Validation(format!(
                "category count mismatch: {} vs {}",
                self.n_categories, other.n_categories
            )));
        }
        let c2 = c * c;
        for (a, b) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *a += c * b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += c2 * b;
        }
        for (a, b) in self.underflow.iter_mut().zip(&other.underflow) {
            *a += c * b;
        }
        for (a, b) in self.overflow.iter_mut().zip(&other.overflow) {
            *a += c * b;
        }
        self.unmatched += c * other.unmatched;
        self.entries += other.entries;
        Ok(())
    }

    /// Zero every sum, keeping binning and category count.
    pub fn reset(&mut self) {
        *self = Hist2D::new(self.binning, self.n_categories);
    }

    /// Sum the rows selected by `keep` into a 1D histogram.
    pub fn project_x(&self, keep: impl Fn(usize) -> bool) -> Hist1D {
        let n = self.binning.n_bins;
        let mut out = Hist1D::new(self.binning);
        for cat in (0..self.n_categories).filter(|&c| keep(c)) {
            let row = cat * n..(cat + 1) * n;
            for (a, b) in out.bin_content.iter_mut().zip(&self.bin_content[row.clone()]) {
                *a += b;
            }
            for (a, b) in out.sumw2.iter_mut().zip(&self.sumw2[row]) {
                *a += b;
            }
            out.underflow += self.underflow[cat];
            out.overflow += self.overflow[cat];
        }
        out
    }
}
