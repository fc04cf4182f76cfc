//! Result ledger
//!
//! Ordered collection of the latest [`ProbeResult`] per probe name for one run.

use std::collections::HashMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::result::{ProbeResult, ProbeStatus};

/// Insertion-ordered mapping from probe name to its latest result
#[derive(Debug, Clone, Default)]
pub struct ResultLedger {
    results: Vec<ProbeResult>,
    index: HashMap<String, usize>,
}

impl ResultLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result, overwriting an earlier one with the same name in place
    pub fn record(&mut self, result: ProbeResult) {
        match self.index.get(&result.name) {
            Some(&position) => self.results[position] = result,
            None => {
                self.index.insert(result.name.clone(), self.results.len());
                self.results.push(result);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ProbeResult> {
        self.index.get(name).map(|&position| &self.results[position])
    }

    /// Iterate results in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &ProbeResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Number of results with the given status
    pub fn count(&self, status: ProbeStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Whether any recorded result failed
    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| r.status.is_failure())
    }
}

impl<'a> IntoIterator for &'a ResultLedger {
    type Item = &'a ProbeResult;
    type IntoIter = std::slice::Iter<'a, ProbeResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

impl Serialize for ResultLedger {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.results.len()))?;
        for result in &self.results {
            map.serialize_entry(&result.name, result)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_insertion_order() {
        let mut ledger = ResultLedger::new();
        ledger.record(ProbeResult::passed("oc_connection", "ok"));
        ledger.record(ProbeResult::failed("gpu_operator", "missing"));
        ledger.record(ProbeResult::passed("driver_daemonset", "ok"));

        let names: Vec<&str> = ledger.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["oc_connection", "gpu_operator", "driver_daemonset"]);
        assert!(ledger.has_failures());
        assert_eq!(ledger.count(ProbeStatus::Passed), 2);
    }

    #[test]
    fn test_record_overwrites_in_place() {
        let mut ledger = ResultLedger::new();
        ledger.record(ProbeResult::failed("gpu_operator", "missing"));
        ledger.record(ProbeResult::passed("node_gpu_status", "ok"));
        ledger.record(ProbeResult::passed("gpu_operator", "found"));

        assert_eq!(ledger.len(), 2);
        let first = ledger.iter().next().unwrap();
        assert_eq!(first.name, "gpu_operator");
        assert_eq!(first.status, ProbeStatus::Passed);
        assert!(!ledger.has_failures());
    }

    #[test]
    fn test_serialize_as_ordered_object() {
        let mut ledger = ResultLedger::new();
        ledger.record(ProbeResult::passed("b", "x"));
        ledger.record(ProbeResult::warning("a", "y"));

        let json = serde_json::to_string(&ledger).unwrap();
        assert!(json.find("\"b\"").unwrap() < json.find("\"a\"").unwrap());
        assert!(json.contains(r#""status":"warning""#));
    }
}
