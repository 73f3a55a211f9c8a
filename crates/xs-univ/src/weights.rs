//! Systematic weight sets and the weight sanitizer.

use std::collections::BTreeMap;

use xs_core::{Error, EventRecord, Result};

use crate::config::{CvCorrection, KnobId, Tables};

/// Smallest accepted event weight.
pub const MIN_WEIGHT: f64 = 0.0;
/// Largest accepted event weight.
pub const MAX_WEIGHT: f64 = 30.0;
/// Weight substituted for anything outside `[MIN_WEIGHT, MAX_WEIGHT]`.
pub const NEUTRAL_WEIGHT: f64 = 1.0;

#[inline]
fn is_acceptable(w: f64) -> bool {
    w.is_finite() && (MIN_WEIGHT..=MAX_WEIGHT).contains(&w)
}

/// Replace NaN, infinite, negative, or very large weights by 1.0.
#[inline]
pub fn sanitize(w: f64) -> f64 {
    if is_acceptable(w) { w } else { NEUTRAL_WEIGHT }
}

/// Audit counters for [`sanitize`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeStats {
    /// Weights used as-is.
    pub accepted: u64,
    /// Weights replaced by [`NEUTRAL_WEIGHT`].
    pub replaced: u64,
}

impl SanitizeStats {
    /// Sanitize `w`, recording whether it was replaced.
    #[inline]
    pub fn apply(&mut self, w: f64) -> f64 {
        if is_acceptable(w) {
            self.accepted += 1;
            w
        } else {
            self.replaced += 1;
            NEUTRAL_WEIGHT
        }
    }

    /// Accumulate another set of counters.
    pub fn merge(&mut self, other: &SanitizeStats) {
        self.accepted += other.accepted;
        self.replaced += other.replaced;
    }
}

/// One systematic knob for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSet {
    /// One reweighted value per universe throw.
    pub weights: Vec<f64>,
    /// Multiplicative correction applied to every throw.
    pub cv_correction: f64,
    /// Multisim (averaged) or unisim knob.
    pub is_averaged: bool,
}

impl WeightSet {
    /// Final (unsanitized) weight of throw `k`.
    #[inline]
    pub fn throw_weight(&self, k: usize) -> f64 {
        self.weights[k] * self.cv_correction
    }

    /// Number of throws.
    pub fn n_throws(&self) -> usize {
        self.weights.len()
    }
}

/// Per-event weight sets keyed by knob.
pub type WeightMap = BTreeMap<KnobId, WeightSet>;

impl CvCorrection {
    /// Evaluate the correction for one event.
    pub fn eval(self, tuned_cv_weight: f64, spline_weight: f64) -> f64 {
        match self {
            CvCorrection::None => 1.0,
            CvCorrection::Spline => spline_weight,
            CvCorrection::TunedCvSpline => tuned_cv_weight * spline_weight,
        }
    }
}

/// Build every configured knob's [`WeightSet`] for one event.
///
/// The event must name only configured knobs and must carry a vector for
/// each of them.
pub fn build_weight_map(tables: &Tables, event: &EventRecord) -> Result<WeightMap> {
    for name in event.weights.keys() {
        if tables.knob_id(name).is_none() {
            return Err(Error::UnknownKnob(name.clone()));
        }
    }

    let mut map = WeightMap::new();
    for (id, knob) in tables.knobs() {
        let raw = event.weights.get(&knob.name).ok_or_else(|| {
            Error::Input(format!("event is missing weight vector for knob '{}'", knob.name))
        })?;
        map.insert(
            id,
            WeightSet {
                weights: raw.clone(),
                cv_correction: knob.cv_correction.eval(event.tuned_cv_weight, event.spline_weight),
                is_averaged: knob.averaged,
            },
        );
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KnobConfig, UnivConfig};
    use proptest::prelude::*;

    #[test]
    fn sanitize_rejects_pathological_weights() {
        for w in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -5.0, 31.0] {
            assert_eq!(sanitize(w), 1.0, "w={w}");
        }
        for w in [0.0, 15.0, 30.0] {
            assert_eq!(sanitize(w), w);
        }
    }

    #[test]
    fn stats_count_replacements() {
        let mut st = SanitizeStats::default();
        assert_eq!(st.apply(f64::NAN), 1.0);
        assert_eq!(st.apply(2.0), 2.0);
        assert_eq!(st.apply(-0.1), 1.0);
        assert_eq!(st, SanitizeStats { accepted: 1, replaced: 2 });
    }

    proptest! {
        #[test]
        fn prop_sanitize_idempotent(w in -100.0f64..100.0) {
            prop_assert_eq!(sanitize(sanitize(w)), sanitize(w));
            let s = sanitize(w);
            prop_assert!((MIN_WEIGHT..=MAX_WEIGHT).contains(&s));
        }
    }

    fn two_knob_tables() -> Tables {
        let mut cfg = UnivConfig::default();
        cfg.knobs = vec![
            KnobConfig::new("flux_all", CvCorrection::TunedCvSpline, true),
            KnobConfig::new("NormCCCOH_UBGenie", CvCorrection::Spline, false),
        ];
        Tables::new(&cfg).unwrap()
    }

    fn event(weights: &[(&str, Vec<f64>)]) -> EventRecord {
        EventRecord {
            is_mc: true,
            tuned_cv_weight: 2.0,
            spline_weight: 0.5,
            weights: weights.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            entries: Vec::new(),
        }
    }

    #[test]
    fn weight_map_applies_cv_corrections() {
        let tables = two_knob_tables();
        let ev = event(&[("flux_all", vec![1.0, 3.0]), ("NormCCCOH_UBGenie", vec![4.0])]);
        let map = build_weight_map(&tables, &ev).unwrap();

        let flux = &map[&tables.knob_id("flux_all").unwrap()];
        assert_eq!(flux.cv_correction, 1.0);
        assert!(flux.is_averaged);
        assert_eq!(flux.throw_weight(1), 3.0);

        let coh = &map[&tables.knob_id("NormCCCOH_UBGenie").unwrap()];
        assert_eq!(coh.cv_correction, 0.5);
        assert!(!coh.is_averaged);
        assert_eq!(coh.throw_weight(0), 2.0);
    }

    #[test]
    fn weight_map_rejects_unknown_knob() {
        let tables = two_knob_tables();
        let ev = event(&[
            ("flux_all", vec![1.0]),
            ("NormCCCOH_UBGenie", vec![1.0]),
            ("bogus", vec![1.0]),
        ]);
        let err = build_weight_map(&tables, &ev).unwrap_err();
        assert!(matches!(err, Error::UnknownKnob(ref k) if k == "bogus"));
    }

    #[test]
    fn weight_map_requires_every_knob() {
        let tables = two_knob_tables();
        let ev = event(&[("flux_all", vec![1.0])]);
        let err = build_weight_map(&tables, &ev).unwrap_err();
        assert!(err.to_string().contains("NormCCCOH_UBGenie"));
    }
}
