//! Per-variable accumulator: the nominal (variable × category) table plus the
//! lazily created universe and detector-variation histograms.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use xs_core::{Error, Result};

use crate::binned::{Binning, Hist1D, Hist2D};
use crate::config::{DetVarId, KnobId, Tables, VariableSpec};
use crate::weights::{SanitizeStats, WeightMap};

/// Identity of one universe histogram: a knob and a throw index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniverseKey {
    /// Systematic knob.
    pub knob: KnobId,
    /// Throw index within the knob.
    pub throw: u32,
}

impl UniverseKey {
    /// Persisted label, `"<knob>_<throw>"`.
    pub fn label(&self, tables: &Tables) -> String {
        format!("{}_{}", tables.knob(self.knob).name, self.throw)
    }
}

/// What has been seen of a knob so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnobRecord {
    /// Multisim (averaged) knob.
    pub is_averaged: bool,
    /// Number of throws per event.
    pub n_throws: usize,
}

/// Histograms stored contiguously and addressed through a key index.
#[derive(Debug, Clone)]
struct HistArena<K> {
    index: HashMap<K, usize>,
    hists: Vec<Hist1D>,
}

impl<K: Copy + Eq + Hash + Ord> HistArena<K> {
    fn new() -> Self {
        Self { index: HashMap::new(), hists: Vec::new() }
    }

    fn get(&self, key: &K) -> Option<&Hist1D> {
        self.index.get(key).map(|&slot| &self.hists[slot])
    }

    fn get_or_create(&mut self, key: K, binning: Binning) -> &mut Hist1D {
        let slot = match self.index.get(&key) {
            Some(&slot) => slot,
            None => {
                self.hists.push(Hist1D::new(binning));
                let slot = self.hists.len() - 1;
                self.index.insert(key, slot);
                slot
            }
        };
        &mut self.hists[slot]
    }

    fn insert(&mut self, key: K, hist: Hist1D) {
        match self.index.get(&key) {
            Some(&slot) => self.hists[slot] = hist,
            None => {
                self.hists.push(hist);
                self.index.insert(key, self.hists.len() - 1);
            }
        }
    }

    fn len(&self) -> usize {
        self.hists.len()
    }

    /// Entries in key order.
    fn sorted(&self) -> Vec<(K, &Hist1D)> {
        let mut out: Vec<(K, &Hist1D)> =
            self.index.iter().map(|(&k, &slot)| (k, &self.hists[slot])).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn hists_mut(&mut self) -> impl Iterator<Item = &mut Hist1D> {
        self.hists.iter_mut()
    }
}

/// Accumulated histograms for one analysis variable.
///
/// One long-lived accumulator exists per variable for the whole run; each
/// input file is filled into a [`Accumulator::clone_and_reset`] copy which is
/// then scaled and merged back with [`Accumulator::add`].
#[derive(Debug, Clone)]
pub struct Accumulator {
    name: String,
    directory: String,
    title: String,
    tables: Arc<Tables>,
    binning: Binning,
    unweighted: Hist2D,
    universes: HistArena<UniverseKey>,
    detvars: HistArena<DetVarId>,
    known_knobs: BTreeMap<KnobId, KnobRecord>,
    sanitize: SanitizeStats,
}

impl Accumulator {
    /// Empty accumulator for `spec`.
    pub fn new(spec: &VariableSpec, tables: Arc<Tables>) -> Result<Self> {
        let binning = spec.binning()?;
        let n_categories = tables.categories().len();
        Ok(Self {
            name: spec.name.clone(),
            directory: spec.directory.clone(),
            title: spec.title.clone(),
            tables,
            binning,
            unweighted: Hist2D::new(binning, n_categories),
            universes: HistArena::new(),
            detvars: HistArena::new(),
            known_knobs: BTreeMap::new(),
            sanitize: SanitizeStats::default(),
        })
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output group name.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Axis title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Shared configuration tables.
    pub fn tables(&self) -> &Arc<Tables> {
        &self.tables
    }

    /// Binning of the analysis variable.
    pub fn binning(&self) -> Binning {
        self.binning
    }

    /// Nominal (variable × category) table.
    pub fn unweighted(&self) -> &Hist2D {
        &self.unweighted
    }

    /// Knobs seen so far.
    pub fn known_knobs(&self) -> &BTreeMap<KnobId, KnobRecord> {
        &self.known_knobs
    }

    /// Sanitizer counters.
    pub fn sanitize_stats(&self) -> SanitizeStats {
        self.sanitize
    }

    /// Universe histogram for `key`, if it was ever filled.
    pub fn universe(&self, key: &UniverseKey) -> Option<&Hist1D> {
        self.universes.get(key)
    }

    /// All universe histograms in `(knob, throw)` order.
    pub fn universes(&self) -> Vec<(UniverseKey, &Hist1D)> {
        self.universes.sorted()
    }

    /// Universe histograms of one knob, in throw order.
    pub fn universes_for(&self, knob: KnobId) -> Vec<(UniverseKey, &Hist1D)> {
        self.universes.sorted().into_iter().filter(|(k, _)| k.knob == knob).collect()
    }

    /// Number of universe histograms.
    pub fn n_universes(&self) -> usize {
        self.universes.len()
    }

    /// DetVar histogram for `id`, if it was ever filled.
    pub fn detvar(&self, id: DetVarId) -> Option<&Hist1D> {
        self.detvars.get(&id)
    }

    /// All detVar histograms in table order.
    pub fn detvars(&self) -> Vec<(DetVarId, &Hist1D)> {
        self.detvars.sorted()
    }

    /// Increment `(x, category)` by the sanitized weight; `None` is the
    /// unmatched category.
    pub fn fill_unweighted(&mut self, x: f64, category: Option<usize>, w: f64) -> Result<()> {
        let w = self.sanitize.apply(w);
        self.unweighted.fill(x, category, w)
    }

    /// Increment universe `key` at `x` by the sanitized weight.
    pub fn fill_universe(&mut self, key: UniverseKey, x: f64, w: f64) {
        let w = self.sanitize.apply(w);
        self.universes.get_or_create(key, self.binning).fill(x, w);
    }

    /// Fill every throw of every knob in `weights` at `x`.
    ///
    /// The first event that carries a knob fixes its averaging flag and
    /// throw count; a later event with a different (non-zero) throw count is
    /// rejected.
    pub fn fill_universes_from_map(&mut self, weights: &WeightMap, x: f64) -> Result<()> {
        for (&knob, set) in weights {
            let n = set.n_throws();
            if n == 0 {
                continue;
            }
            let record = self
                .known_knobs
                .entry(knob)
                .or_insert(KnobRecord { is_averaged: set.is_averaged, n_throws: n });
            if record.n_throws != n {
                return Err(Error::Validation(format!(
                    "knob '{}' has {} throws, previously {}",
                    self.tables.knob(knob).name,
                    n,
                    record.n_throws
                )));
            }
            for k in 0..n {
                let key = UniverseKey { knob, throw: k as u32 };
                self.fill_universe(key, x, set.throw_weight(k));
            }
        }
        Ok(())
    }

    /// Increment detVar histogram `id` at `x` by the sanitized weight.
    pub fn fill_detvar(&mut self, id: DetVarId, x: f64, w: f64) {
        let w = self.sanitize.apply(w);
        self.detvars.get_or_create(id, self.binning).fill(x, w);
    }

    /// Same as [`Accumulator::fill_detvar`], looking the label up first.
    pub fn fill_detvar_label(&mut self, label: &str, x: f64, w: f64) -> Result<()> {
        let id = self.tables.detvar_id(label)?;
        self.fill_detvar(id, x, w);
        Ok(())
    }

    /// Same configuration and binning, no contents.
    pub fn clone_and_reset(&self) -> Self {
        let mut unweighted = self.unweighted.clone();
        unweighted.reset();
        Self {
            name: self.name.clone(),
            directory: self.directory.clone(),
            title: self.title.clone(),
            tables: Arc::clone(&self.tables),
            binning: self.binning,
            unweighted,
            universes: HistArena::new(),
            detvars: HistArena::new(),
            known_knobs: BTreeMap::new(),
            sanitize: SanitizeStats::default(),
        }
    }

    /// Multiply every histogram by `factor`.
    pub fn scale(&mut self, factor: f64) {
        self.unweighted.scale(factor);
        self.universes.hists_mut().for_each(|h| h.scale(factor));
        self.detvars.hists_mut().for_each(|h| h.scale(factor));
    }

    /// Check that `other` can be merged into `self`: same tables, same
    /// binning and category axis, and matching throw counts for every knob
    /// both have seen.
    pub fn check_compatible(&self, other: &Accumulator) -> Result<()> {
        if !Arc::ptr_eq(&self.tables, &other.tables) {
            return Err(Error::Validation(format!(
                "cannot merge '{}' and '{}': built from different configuration tables",
                self.name, other.name
            )));
        }
        if self.binning != other.binning
            || self.unweighted.n_categories != other.unweighted.n_categories
        {
            return Err(Error::Validation(format!(
                "cannot merge '{}' and '{}': incompatible binning",
                self.name, other.name
            )));
        }
        for (knob, theirs) in &other.known_knobs {
            if let Some(mine) = self.known_knobs.get(knob)
                && mine.n_throws != theirs.n_throws
            {
                return Err(Error::Validation(format!(
                    "knob '{}' has {} throws in one input and {} in another",
                    self.tables.knob(*knob).name,
                    mine.n_throws,
                    theirs.n_throws
                )));
            }
        }
        Ok(())
    }

    /// Add `factor * other` into `self`.
    ///
    /// Universe and detVar histograms are matched by key; keys only present
    /// in `other` are cloned in. Fails without modifying `self` if
    /// [`Accumulator::check_compatible`] fails.
    pub fn add(&mut self, other: &Accumulator, factor: f64) -> Result<()> {
        self.check_compatible(other)?;
        self.unweighted.add(&other.unweighted, factor)?;
        for (&knob, &record) in &other.known_knobs {
            self.known_knobs.insert(knob, record);
        }
        for (key, hist) in other.universes.sorted() {
            merge_into(&mut self.universes, key, hist, factor)?;
        }
        for (key, hist) in other.detvars.sorted() {
            merge_into(&mut self.detvars, key, hist, factor)?;
        }
        self.sanitize.merge(&other.sanitize);
        Ok(())
    }

    /// Nominal MC prediction: the unweighted table summed over the cosmic and
    /// particle categories.
    pub fn nominal_mc(&self) -> Hist1D {
        let cats = self.tables.categories();
        self.unweighted.project_x(|c| cats[c].kind.is_mc())
    }
}

fn merge_into<K: Copy + Eq + Hash + Ord>(
    arena: &mut HistArena<K>,
    key: K,
    hist: &Hist1D,
    factor: f64,
) -> Result<()> {
    if let Some(&slot) = arena.index.get(&key) {
        return arena.hists[slot].add(hist, factor);
    }
    let mut h = hist.clone();
    h.scale(factor);
    arena.insert(key, h);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnivConfig;
    use crate::weights::WeightSet;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn setup() -> (Arc<Tables>, VariableSpec) {
        let tables = Arc::new(Tables::new(&UnivConfig::default()).unwrap());
        let spec = VariableSpec::new("x", "X", "x", 4, 0.0, 4.0);
        (tables, spec)
    }

    fn weights(tables: &Tables, knob: &str, w: &[f64], averaged: bool) -> WeightMap {
        let mut m = WeightMap::new();
        m.insert(
            tables.knob_id(knob).unwrap(),
            WeightSet { weights: w.to_vec(), cv_correction: 1.0, is_averaged: averaged },
        );
        m
    }

    #[test]
    fn fill_unweighted_sanitizes() {
        let (tables, spec) = setup();
        let mut acc = Accumulator::new(&spec, tables).unwrap();
        acc.fill_unweighted(0.5, Some(2), f64::NAN).unwrap();
        acc.fill_unweighted(0.5, Some(2), 5.0).unwrap();
        assert_eq!(acc.unweighted().content(0, 2), 6.0);
        assert_eq!(acc.sanitize_stats().replaced, 1);
    }

    #[test]
    fn universes_created_lazily_per_throw() {
        let (tables, spec) = setup();
        let mut acc = Accumulator::new(&spec, Arc::clone(&tables)).unwrap();
        let w = weights(&tables, "flux_all", &[1.0, 2.0, 50.0], true);
        acc.fill_universes_from_map(&w, 1.5).unwrap();

        assert_eq!(acc.n_universes(), 3);
        let knob = tables.knob_id("flux_all").unwrap();
        let u = acc.universes_for(knob);
        assert_eq!(u[0].1.bin_content[1], 1.0);
        assert_eq!(u[1].1.bin_content[1], 2.0);
        // out-of-range weight replaced by 1.0
        assert_eq!(u[2].1.bin_content[1], 1.0);
        assert_eq!(u[2].0.label(&tables), "flux_all_2");
        assert_eq!(acc.known_knobs()[&knob], KnobRecord { is_averaged: true, n_throws: 3 });
    }

    #[test]
    fn throw_count_change_is_rejected() {
        let (tables, spec) = setup();
        let mut acc = Accumulator::new(&spec, Arc::clone(&tables)).unwrap();
        acc.fill_universes_from_map(&weights(&tables, "flux_all", &[1.0, 1.0], true), 0.5)
            .unwrap();
        // empty vectors are skipped
        acc.fill_universes_from_map(&weights(&tables, "flux_all", &[], true), 0.5).unwrap();
        let err = acc
            .fill_universes_from_map(&weights(&tables, "flux_all", &[1.0], true), 0.5)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn detvar_fill_by_label() {
        let (tables, spec) = setup();
        let mut acc = Accumulator::new(&spec, Arc::clone(&tables)).unwrap();
        acc.fill_detvar_label("detVarSCE", 3.5, 2.0).unwrap();
        let id = tables.detvar_id("detVarSCE").unwrap();
        assert_eq!(acc.detvar(id).unwrap().bin_content[3], 2.0);
        assert!(matches!(acc.fill_detvar_label("nope", 0.0, 1.0), Err(Error::UnknownDetVar(_))));
    }

    #[test]
    fn clone_and_reset_clears_everything() {
        let (tables, spec) = setup();
        let mut acc = Accumulator::new(&spec, Arc::clone(&tables)).unwrap();
        acc.fill_unweighted(0.5, Some(1), 1.0).unwrap();
        acc.fill_universes_from_map(&weights(&tables, "reint_all", &[1.0], true), 0.5).unwrap();
        acc.fill_detvar_label("detVarCV", 0.5, 1.0).unwrap();

        let fresh = acc.clone_and_reset();
        assert_eq!(fresh.binning(), acc.binning());
        assert!(fresh.unweighted().bin_content.iter().all(|&v| v == 0.0));
        assert_eq!(fresh.n_universes(), 0);
        assert!(fresh.detvars().is_empty());
        assert!(fresh.known_knobs().is_empty());
        assert!(Arc::ptr_eq(fresh.tables(), acc.tables()));
    }

    #[test]
    fn add_unions_universe_sets() {
        let (tables, spec) = setup();
        let base = Accumulator::new(&spec, Arc::clone(&tables)).unwrap();
        let mut a = base.clone_and_reset();
        let mut b = base.clone_and_reset();
        a.fill_universes_from_map(&weights(&tables, "flux_all", &[2.0], true), 0.5).unwrap();
        b.fill_universes_from_map(&weights(&tables, "flux_all", &[3.0], true), 0.5).unwrap();
        b.fill_universes_from_map(&weights(&tables, "RPA_CCQE_UBGenie", &[4.0], true), 2.5)
            .unwrap();

        a.add(&b, 2.0).unwrap();
        let flux = UniverseKey { knob: tables.knob_id("flux_all").unwrap(), throw: 0 };
        let rpa = UniverseKey { knob: tables.knob_id("RPA_CCQE_UBGenie").unwrap(), throw: 0 };
        assert_eq!(a.universe(&flux).unwrap().bin_content[0], 8.0);
        assert_eq!(a.universe(&rpa).unwrap().bin_content[2], 8.0);
        assert_eq!(a.known_knobs().len(), 2);
    }

    #[test]
    fn add_rejects_throw_count_mismatch() {
        let (tables, spec) = setup();
        let base = Accumulator::new(&spec, Arc::clone(&tables)).unwrap();
        let mut a = base.clone_and_reset();
        let mut b = base.clone_and_reset();
        a.fill_universes_from_map(&weights(&tables, "flux_all", &[1.0, 1.0], true), 0.5).unwrap();
        b.fill_universes_from_map(&weights(&tables, "flux_all", &[1.0], true), 0.5).unwrap();
        a.fill_unweighted(0.5, Some(0), 1.0).unwrap();
        let before = a.unweighted().clone();
        assert!(a.add(&b, 1.0).is_err());
        assert_eq!(a.unweighted(), &before);
    }

    #[test]
    fn add_rejects_foreign_tables() {
        let (tables, spec) = setup();
        let mut a = Accumulator::new(&spec, tables).unwrap();
        let other_tables = Arc::new(Tables::new(&UnivConfig::default()).unwrap());
        let b = Accumulator::new(&spec, other_tables).unwrap();
        assert!(a.add(&b, 1.0).is_err());
    }

    #[test]
    fn nominal_mc_excludes_ext_and_data() {
        let (tables, spec) = setup();
        let mut acc = Accumulator::new(&spec, Arc::clone(&tables)).unwrap();
        acc.fill_unweighted(0.5, Some(0), 1.0).unwrap();
        acc.fill_unweighted(0.5, Some(7), 2.0).unwrap();
        acc.fill_unweighted(0.5, Some(tables.ext_category()), 4.0).unwrap();
        acc.fill_unweighted(0.5, Some(tables.data_category()), 8.0).unwrap();
        acc.fill_unweighted(0.5, None, 16.0).unwrap();
        assert_eq!(acc.nominal_mc().bin_content, vec![3.0, 0.0, 0.0, 0.0]);
    }

    fn filled(
        tables: &Arc<Tables>,
        spec: &VariableSpec,
        xs: &[(f64, f64)],
        knob: &str,
    ) -> Accumulator {
        let mut acc = Accumulator::new(spec, Arc::clone(tables)).unwrap();
        for &(x, w) in xs {
            acc.fill_unweighted(x, Some(1), w).unwrap();
            acc.fill_universes_from_map(&weights(tables, knob, &[w, 0.5 * w], true), x).unwrap();
            acc.fill_detvar_label("detVarCV", x, w).unwrap();
        }
        acc
    }

    fn contents(acc: &Accumulator) -> Vec<Vec<f64>> {
        let mut out = vec![acc.unweighted().bin_content.clone()];
        out.extend(acc.universes().into_iter().map(|(_, h)| h.bin_content.clone()));
        out.extend(acc.detvars().into_iter().map(|(_, h)| h.bin_content.clone()));
        out
    }

    proptest! {
        #[test]
        fn prop_merge_commutes(
            xs_a in proptest::collection::vec((0.0f64..4.0, 0.0f64..30.0), 0..20),
            xs_b in proptest::collection::vec((0.0f64..4.0, 0.0f64..30.0), 0..20),
        ) {
            let (tables, spec) = setup();
            let a = filled(&tables, &spec, &xs_a, "flux_all");
            let b = filled(&tables, &spec, &xs_b, "reint_all");

            let mut ab = a.clone();
            ab.add(&b, 1.0).unwrap();
            let mut ba = b.clone();
            ba.add(&a, 1.0).unwrap();

            let lhs = contents(&ab);
            let rhs = contents(&ba);
            prop_assert_eq!(lhs.len(), rhs.len());
            for (l, r) in lhs.iter().zip(&rhs) {
                for (x, y) in l.iter().zip(r) {
                    prop_assert_eq!(x.to_bits(), y.to_bits());
                }
            }
        }

        #[test]
        fn prop_scale_is_linear(
            xs in proptest::collection::vec((0.0f64..4.0, 0.0f64..30.0), 1..20),
            c1 in 0.01f64..10.0,
            c2 in 0.01f64..10.0,
        ) {
            let (tables, spec) = setup();
            let orig = filled(&tables, &spec, &xs, "flux_all");
            let mut twice = orig.clone();
            twice.scale(c1);
            twice.scale(c2);
            let mut once = orig.clone();
            once.scale(c1 * c2);
            for (l, r) in contents(&twice).iter().zip(&contents(&once)) {
                for (x, y) in l.iter().zip(r) {
                    assert_relative_eq!(*x, *y, max_relative = 1e-12, epsilon = 1e-12);
                }
            }
        }
    }
}
