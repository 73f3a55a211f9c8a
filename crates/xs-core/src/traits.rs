//! Core traits
//!
//! The engine consumes events through [`EventSource`] so that it never
//! depends on a concrete ntuple reader.

use crate::Result;
use crate::types::EventRecord;

/// A single opened input sample, read sequentially.
pub trait EventSource {
    /// Summed POT stored in the file, if present. Required for MC and
    /// detector-variation samples.
    fn summed_pot(&self) -> Option<f64>;

    /// Whether the sample carries systematic weight vectors.
    fn is_reweightable(&self) -> bool;

    /// Next event, or `None` once the sample is exhausted.
    fn next_event(&mut self) -> Result<Option<EventRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource(Vec<EventRecord>);

    impl EventSource for VecSource {
        fn summed_pot(&self) -> Option<f64> {
            None
        }

        fn is_reweightable(&self) -> bool {
            false
        }

        fn next_event(&mut self) -> Result<Option<EventRecord>> {
            Ok(self.0.pop())
        }
    }

    #[test]
    fn drains_to_none() {
        let mut src = VecSource(vec![EventRecord {
            is_mc: false,
            tuned_cv_weight: 1.0,
            spline_weight: 1.0,
            weights: Default::default(),
            entries: Vec::new(),
        }]);
        assert!(src.next_event().unwrap().is_some());
        assert!(src.next_event().unwrap().is_none());
    }
}
