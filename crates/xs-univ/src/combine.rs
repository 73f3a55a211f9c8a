//! Sequential combination of input samples into long-lived accumulators.
//!
//! Each sample is folded into fresh per-file accumulators, scaled to the
//! common exposure, then merged. Files are processed one at a time.

use std::collections::HashMap;
use std::sync::Arc;

use xs_core::{Error, EventRecord, EventSource, Result};

use crate::accumulator::Accumulator;
use crate::config::{DetVarId, Tables, UnivConfig};
use crate::persist::{PersistOptions, UnivArtifact, univ_artifact};
use crate::samples::{ExposureTable, SampleInfo, SampleKind};
use crate::weights::{SanitizeStats, build_weight_map};

/// What one call to [`CombineEngine::process_sample`] did.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleSummary {
    /// Events read.
    pub events: u64,
    /// Selected objects filled.
    pub entries: u64,
    /// Normalization applied before merging.
    pub scale_factor: f64,
    /// Sanitizer counts over every fill of this sample.
    pub sanitize: SanitizeStats,
}

/// How one sample's objects are filled.
#[derive(Debug, Clone, Copy)]
enum Route {
    Nominal,
    DetVar(DetVarId),
}

/// Owns one accumulator per configured variable.
pub struct CombineEngine {
    tables: Arc<Tables>,
    accumulators: Vec<Accumulator>,
    by_variable: HashMap<String, usize>,
    exposures: ExposureTable,
}

impl CombineEngine {
    /// Validate `config` and build empty accumulators.
    pub fn new(config: UnivConfig) -> Result<Self> {
        let tables = Arc::new(Tables::new(&config)?);
        let mut accumulators = Vec::with_capacity(config.variables.len());
        let mut by_variable = HashMap::new();
        for (i, spec) in config.variables.iter().enumerate() {
            accumulators.push(Accumulator::new(spec, Arc::clone(&tables))?);
            by_variable.insert(spec.name.clone(), i);
        }
        Ok(Self { tables, accumulators, by_variable, exposures: ExposureTable::default() })
    }

    /// Set the normalization targets, usually
    /// [`ExposureTable::from_samples`] over the whole file list.
    pub fn with_exposures(mut self, exposures: ExposureTable) -> Self {
        self.exposures = exposures;
        self
    }

    /// Normalization targets in use.
    pub fn exposures(&self) -> &ExposureTable {
        &self.exposures
    }

    /// Shared configuration tables.
    pub fn tables(&self) -> &Arc<Tables> {
        &self.tables
    }

    /// Combined accumulators in configuration order.
    pub fn accumulators(&self) -> &[Accumulator] {
        &self.accumulators
    }

    /// Combined accumulator for `variable`.
    pub fn accumulator(&self, variable: &str) -> Option<&Accumulator> {
        self.by_variable.get(variable).map(|&i| &self.accumulators[i])
    }

    /// Read `source` to exhaustion and merge it into the combined state.
    ///
    /// Nothing is merged if any event fails or if any variable's per-file
    /// accumulator is incompatible with its combined one.
    pub fn process_sample(
        &mut self,
        sample: &SampleInfo,
        source: &mut dyn EventSource,
    ) -> Result<SampleSummary> {
        let route = match &sample.kind {
            SampleKind::DetVar(label) => Route::DetVar(self.tables.detvar_id(label)?),
            _ => Route::Nominal,
        };
        let reweightable = source.is_reweightable();
        let scale_factor = self.exposures.scale_factor(sample, source.summed_pot())?;

        let mut per_file: Vec<Accumulator> =
            self.accumulators.iter().map(Accumulator::clone_and_reset).collect();
        let mut summary = SampleSummary { scale_factor, ..SampleSummary::default() };

        while let Some(event) = source.next_event()? {
            summary.events += 1;
            summary.entries +=
                self.fill_event(&mut per_file, sample, route, reweightable, &event)?;
        }

        for (combined, file_acc) in self.accumulators.iter().zip(&per_file) {
            combined.check_compatible(file_acc)?;
        }
        for (combined, mut file_acc) in self.accumulators.iter_mut().zip(per_file) {
            summary.sanitize.merge(&file_acc.sanitize_stats());
            file_acc.scale(scale_factor);
            combined.add(&file_acc, 1.0)?;
        }

        log::info!(
            "{} (run {}, {}): {} events, {} entries, scale factor {:.6e}",
            sample.path.display(),
            sample.run,
            sample.kind.as_str(),
            summary.events,
            summary.entries,
            scale_factor
        );
        if summary.sanitize.replaced > 0 {
            log::warn!(
                "{}: replaced {} of {} weights with {}",
                sample.path.display(),
                summary.sanitize.replaced,
                summary.sanitize.replaced + summary.sanitize.accepted,
                crate::weights::NEUTRAL_WEIGHT
            );
        }
        Ok(summary)
    }

    fn fill_event(
        &self,
        per_file: &mut [Accumulator],
        sample: &SampleInfo,
        route: Route,
        reweightable: bool,
        event: &EventRecord,
    ) -> Result<u64> {
        let weight_map =
            if reweightable { Some(build_weight_map(&self.tables, event)?) } else { None };
        let w = event.nominal_weight();

        let mut filled = 0;
        for entry in &event.entries {
            let &idx = self.by_variable.get(&entry.variable).ok_or_else(|| {
                Error::Config(format!("event fills unknown variable '{}'", entry.variable))
            })?;
            let acc = &mut per_file[idx];
            match route {
                Route::DetVar(id) => acc.fill_detvar(id, entry.value, w),
                Route::Nominal => {
                    let category = self.classify(sample, event, entry.pdg)?;
                    acc.fill_unweighted(entry.value, category, w)?;
                }
            }
            if let Some(map) = &weight_map {
                acc.fill_universes_from_map(map, entry.value)?;
            }
            filled += 1;
        }
        Ok(filled)
    }

    /// Category row of one object; `None` is the unmatched sentinel.
    fn classify(
        &self,
        sample: &SampleInfo,
        event: &EventRecord,
        pdg: Option<i32>,
    ) -> Result<Option<usize>> {
        if event.is_mc {
            let pdg = pdg.ok_or_else(|| {
                Error::Input(format!(
                    "{}: simulated object without a truth PDG code",
                    sample.path.display()
                ))
            })?;
            return Ok(self.tables.category_for_pdg(pdg));
        }
        match sample.kind {
            SampleKind::OffBeam => Ok(Some(self.tables.ext_category())),
            _ => Ok(Some(self.tables.data_category())),
        }
    }

    /// Derive every covariance and build the output artifact.
    pub fn finalize(&self, opts: PersistOptions) -> Result<UnivArtifact> {
        univ_artifact(&self.accumulators, opts)
    }
}
