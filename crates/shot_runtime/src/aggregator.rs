// =============================================================================
// QMesh Distributed QPU - Shot Aggregator
// =============================================================================
// Table of Contents:
//   1. ShotHistogram - Bitstring counts
//   2. ResultDocument - Per-batch result wire form
// =============================================================================
// Purpose: Accumulates one bitstring per shot into a histogram and carries
//          the wall-clock time of the shot loop. The result document is the
//          exact wire form returned to peers: counts plus time_taken on
//          success, a single ERROR key on batch-fatal failure.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// 1. ShotHistogram - Bitstring counts
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct ShotHistogram {
    counts: BTreeMap<String, u64>,
    recorded_shots: u64,
}

impl ShotHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, bitstring: String) {
        *self.counts.entry(bitstring).or_insert(0) += 1;
        self.recorded_shots += 1;
    }

    pub fn counts(&self) -> &BTreeMap<String, u64> {
        &self.counts
    }

    pub fn recorded_shots(&self) -> u64 {
        self.recorded_shots
    }

    pub fn into_counts(self) -> BTreeMap<String, u64> {
        self.counts
    }
}

// =============================================================================
// 2. ResultDocument - Per-batch result wire form
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultDocument {
    Failure {
        #[serde(rename = "ERROR")]
        error: String,
    },
    Success {
        counts: BTreeMap<String, u64>,
        time_taken: f64,
    },
}

impl ResultDocument {
    pub fn success(counts: BTreeMap<String, u64>, time_taken: f64) -> Self {
        ResultDocument::Success { counts, time_taken }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ResultDocument::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultDocument::Success { .. })
    }

    pub fn counts(&self) -> Option<&BTreeMap<String, u64>> {
        match self {
            ResultDocument::Success { counts, .. } => Some(counts),
            ResultDocument::Failure { .. } => None,
        }
    }

    pub fn to_wire(&self) -> String {
        // Both variants are plain maps of plain values; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_wire(document: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_counts_shots() {
        let mut histogram = ShotHistogram::new();
        histogram.record("00".to_string());
        histogram.record("11".to_string());
        histogram.record("00".to_string());

        assert_eq!(histogram.recorded_shots(), 3);
        assert_eq!(histogram.counts().get("00"), Some(&2));
        assert_eq!(histogram.counts().get("11"), Some(&1));
    }

    #[test]
    fn test_success_document_wire_form() {
        let mut counts = BTreeMap::new();
        counts.insert("01".to_string(), 12u64);
        let document = ResultDocument::success(counts, 0.25);

        let wire = document.to_wire();
        assert!(wire.contains("\"counts\""));
        assert!(wire.contains("\"time_taken\""));

        let decoded = ResultDocument::from_wire(&wire).unwrap();
        assert_eq!(decoded, document);
    }

    #[test]
    fn test_failure_document_wire_form() {
        let document = ResultDocument::failure("Instruction error: measure without destination");
        let wire = document.to_wire();
        assert!(wire.starts_with("{\"ERROR\""));

        let decoded = ResultDocument::from_wire(&wire).unwrap();
        assert!(!decoded.is_success());
    }
}
