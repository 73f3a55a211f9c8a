//! JSON ntuple dump implementing [`EventSource`].

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xs_core::{Error, EventRecord, EventSource, Result};

/// On-disk layout of one sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleFile {
    /// Summed POT of the simulation (MC and detVar samples).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summed_pot: Option<f64>,
    /// Whether events carry systematic weight vectors.
    #[serde(default)]
    pub reweightable: bool,
    /// Events in file order.
    #[serde(default)]
    pub events: Vec<EventRecord>,
}

/// Event source backed by a fully loaded [`SampleFile`].
#[derive(Debug, Clone)]
pub struct JsonEventSource {
    summed_pot: Option<f64>,
    reweightable: bool,
    events: VecDeque<EventRecord>,
}

impl JsonEventSource {
    /// Open and parse a sample file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Input(format!("cannot open sample {}: {e}", path.display())))?;
        let sample: SampleFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Input(format!("malformed sample {}: {e}", path.display())))?;
        Ok(Self::from(sample))
    }

    /// Events not yet read.
    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl From<SampleFile> for JsonEventSource {
    fn from(sample: SampleFile) -> Self {
        Self {
            summed_pot: sample.summed_pot,
            reweightable: sample.reweightable,
            events: sample.events.into(),
        }
    }
}

impl EventSource for JsonEventSource {
    fn summed_pot(&self) -> Option<f64> {
        self.summed_pot
    }

    fn is_reweightable(&self) -> bool {
        self.reweightable
    }

    fn next_event(&mut self) -> Result<Option<EventRecord>> {
        Ok(self.events.pop_front())
    }
}
