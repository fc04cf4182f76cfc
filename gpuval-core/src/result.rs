//! Probe result vocabulary
//!
//! Every check in a validation run produces exactly one [`ProbeResult`]. The
//! `detail` payload is an open tree whose shape depends on the probe.

use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Check succeeded
    Passed,
    /// Check failed
    Failed,
    /// Check succeeded with caveats an operator should look at
    Warning,
    /// No determination could be made
    Unknown,
}

impl ProbeStatus {
    /// Whether this status counts against overall cluster health
    pub fn is_failure(&self) -> bool {
        matches!(self, ProbeStatus::Failed)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeStatus::Passed => write!(f, "PASSED"),
            ProbeStatus::Failed => write!(f, "FAILED"),
            ProbeStatus::Warning => write!(f, "WARNING"),
            ProbeStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Semi-structured payload attached to a result
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Detail {
    /// No payload
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<Detail>),
    Map(DetailMap),
}

impl Detail {
    /// Start building a map payload
    pub fn map() -> DetailMap {
        DetailMap::default()
    }

    /// Look up a key when this payload is a map
    pub fn get(&self, key: &str) -> Option<&Detail> {
        match self {
            Detail::Map(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Detail::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Detail::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Detail::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Detail]> {
        match self {
            Detail::List(items) => Some(items),
            _ => None,
        }
    }

    /// Whether there is nothing to show
    pub fn is_empty(&self) -> bool {
        match self {
            Detail::Empty => true,
            Detail::List(items) => items.is_empty(),
            Detail::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            Detail::Empty => Ok(()),
            Detail::Bool(b) => writeln!(f, "{}{}", pad, b),
            Detail::Int(i) => writeln!(f, "{}{}", pad, i),
            Detail::Text(s) => {
                for line in s.lines() {
                    writeln!(f, "{}{}", pad, line)?;
                }
                Ok(())
            }
            Detail::List(items) => {
                for item in items {
                    match item {
                        Detail::Map(_) | Detail::List(_) => {
                            writeln!(f, "{}-", pad)?;
                            item.render(f, indent + 1)?;
                        }
                        _ => {
                            write!(f, "{}- ", pad)?;
                            item.render_inline(f)?;
                        }
                    }
                }
                Ok(())
            }
            Detail::Map(map) => {
                for (key, value) in map.iter() {
                    match value {
                        Detail::Map(_) | Detail::List(_) if !value.is_empty() => {
                            writeln!(f, "{}{}:", pad, key)?;
                            value.render(f, indent + 1)?;
                        }
                        Detail::Text(s) if s.contains('\n') => {
                            writeln!(f, "{}{}:", pad, key)?;
                            value.render(f, indent + 1)?;
                        }
                        _ => {
                            write!(f, "{}{}: ", pad, key)?;
                            value.render_inline(f)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn render_inline(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detail::Empty => writeln!(f, "-"),
            Detail::Bool(b) => writeln!(f, "{}", b),
            Detail::Int(i) => writeln!(f, "{}", i),
            Detail::Text(s) => writeln!(f, "{}", s),
            Detail::List(_) | Detail::Map(_) => writeln!(f, "[]"),
        }
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

impl From<bool> for Detail {
    fn from(value: bool) -> Self {
        Detail::Bool(value)
    }
}

impl From<i64> for Detail {
    fn from(value: i64) -> Self {
        Detail::Int(value)
    }
}

impl From<u32> for Detail {
    fn from(value: u32) -> Self {
        Detail::Int(i64::from(value))
    }
}

impl From<i32> for Detail {
    fn from(value: i32) -> Self {
        Detail::Int(i64::from(value))
    }
}

impl From<usize> for Detail {
    fn from(value: usize) -> Self {
        Detail::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<&str> for Detail {
    fn from(value: &str) -> Self {
        Detail::Text(value.to_string())
    }
}

impl From<String> for Detail {
    fn from(value: String) -> Self {
        Detail::Text(value)
    }
}

impl From<&String> for Detail {
    fn from(value: &String) -> Self {
        Detail::Text(value.clone())
    }
}

impl<T: Into<Detail>> From<Vec<T>> for Detail {
    fn from(items: Vec<T>) -> Self {
        Detail::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Detail>> From<Option<T>> for Detail {
    fn from(value: Option<T>) -> Self {
        value.map_or(Detail::Empty, Into::into)
    }
}

impl From<DetailMap> for Detail {
    fn from(map: DetailMap) -> Self {
        Detail::Map(map)
    }
}

/// Insertion-ordered string-keyed map
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetailMap {
    entries: Vec<(String, Detail)>,
}

impl DetailMap {
    /// Add an entry, replacing any existing value for the key
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Detail>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Detail>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Detail> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Detail)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for DetailMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Result of one probe execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    /// Probe identifier, unique within a run
    pub name: String,
    /// Outcome
    pub status: ProbeStatus,
    /// Human-readable summary
    pub message: String,
    /// Probe-specific payload
    #[serde(skip_serializing_if = "Detail::is_empty")]
    pub detail: Detail,
}

impl ProbeResult {
    fn new(name: impl Into<String>, status: ProbeStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            detail: Detail::Empty,
        }
    }

    /// Create a passing result
    pub fn passed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, ProbeStatus::Passed, message)
    }

    /// Create a failing result
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, ProbeStatus::Failed, message)
    }

    /// Create a warning result
    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, ProbeStatus::Warning, message)
    }

    /// Create a result with undetermined outcome
    pub fn unknown(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, ProbeStatus::Unknown, message)
    }

    /// Attach a detail payload
    pub fn with_detail(mut self, detail: impl Into<Detail>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn is_passed(&self) -> bool {
        self.status == ProbeStatus::Passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_map_preserves_order_and_overwrites() {
        let map = Detail::map()
            .with("zeta", "1")
            .with("alpha", 2u32)
            .with("zeta", "3");

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(map.get("zeta").and_then(Detail::as_str), Some("3"));
    }

    #[test]
    fn test_detail_serializes_as_plain_json() {
        let detail: Detail = Detail::map()
            .with("version", "24.3.0")
            .with("nodes", vec!["a", "b"])
            .with("ready", true)
            .into();

        let json = serde_json::to_string(&detail).unwrap();
        assert_eq!(json, r#"{"version":"24.3.0","nodes":["a","b"],"ready":true}"#);
    }

    #[test]
    fn test_detail_render() {
        let detail: Detail = Detail::map()
            .with("name", "nvidia-driver-daemonset")
            .with("missing", vec!["nvidia.com/gpu.count"])
            .into();

        let rendered = detail.to_string();
        assert!(rendered.contains("name: nvidia-driver-daemonset"));
        assert!(rendered.contains("missing:\n  - nvidia.com/gpu.count"));
    }

    #[test]
    fn test_probe_result_builders() {
        let result = ProbeResult::failed("driver_daemonset", "not found")
            .with_detail(Detail::map().with("desired", 0u32));
        assert_eq!(result.status, ProbeStatus::Failed);
        assert!(result.status.is_failure());
        assert_eq!(
            result.detail.get("desired").and_then(Detail::as_int),
            Some(0)
        );

        let json = serde_json::to_value(ProbeResult::passed("oc_connection", "ok")).unwrap();
        assert_eq!(json["status"], "passed");
        assert!(json.get("detail").is_none());
    }
}
