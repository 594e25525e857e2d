//! Forbidden port policy built from the `port1` / `port2` rule parameters.

use std::fmt;

use serde_json::Value;

use crate::error::ConfigError;

/// Rule parameter keys, in the order they are read.
pub const PORT_PARAMS: [&str; 2] = ["port1", "port2"];

/// Inclusive port range. A single port is a range of length one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl PortRange {
    pub fn new(low: u16, high: u16) -> Option<Self> {
        (low <= high).then_some(Self { low, high })
    }

    pub fn single(port: u16) -> Self {
        Self { low: port, high: port }
    }

    pub fn overlaps(&self, from: u16, to: u16) -> bool {
        from <= self.high && self.low <= to
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.low == self.high {
            write!(f, "{}", self.low)
        } else {
            write!(f, "{}-{}", self.low, self.high)
        }
    }
}

/// Ordered set of forbidden ranges. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPolicy {
    ranges: Vec<PortRange>,
}

impl PortPolicy {
    pub fn new(ranges: Vec<PortRange>) -> Result<Self, ConfigError> {
        if ranges.is_empty() {
            return Err(ConfigError::EmptyPolicy);
        }
        Ok(Self { ranges })
    }

    /// Parse `"22"` or `"3389-3390"`.
    pub fn parse_entry(entry: &str) -> Result<PortRange, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPort {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = entry.trim();
        let (low, high) = match trimmed.split_once('-') {
            Some((low, high)) => (low.trim(), high.trim()),
            None => (trimmed, trimmed),
        };

        let low = parse_port(low).ok_or_else(|| invalid("not a port number (0-65535)"))?;
        let high = parse_port(high).ok_or_else(|| invalid("not a port number (0-65535)"))?;

        PortRange::new(low, high).ok_or_else(|| invalid("low port is greater than high port"))
    }

    /// Build from the two optional entries. Blank entries count as absent.
    pub fn from_params(port1: Option<&str>, port2: Option<&str>) -> Result<Self, ConfigError> {
        let ranges = [port1, port2]
            .into_iter()
            .flatten()
            .filter(|entry| !entry.trim().is_empty())
            .map(Self::parse_entry)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ranges)
    }

    /// Build from an AWS Config `ruleParameters` object. Values may be
    /// strings or bare integers.
    pub fn from_rule_parameters(params: &Value) -> Result<Self, ConfigError> {
        let Some(map) = params.as_object() else {
            return Err(ConfigError::InvalidParameters(
                "ruleParameters is not a JSON object".to_string(),
            ));
        };

        let mut entries: Vec<Option<String>> = Vec::with_capacity(PORT_PARAMS.len());
        for key in PORT_PARAMS {
            let entry = match map.get(key) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                Some(other) => {
                    return Err(ConfigError::InvalidParameters(format!(
                        "{} must be a port or range, got {}",
                        key, other
                    )))
                }
            };
            entries.push(entry);
        }

        Self::from_params(entries[0].as_deref(), entries[1].as_deref())
    }

    pub fn ranges(&self) -> &[PortRange] {
        &self.ranges
    }

    /// True if `[from, to]` overlaps any configured range.
    pub fn intersects(&self, from: u16, to: u16) -> bool {
        let (from, to) = if from <= to { (from, to) } else { (to, from) };
        self.ranges.iter().any(|range| range.overlaps(from, to))
    }
}

impl fmt::Display for PortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.ranges.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join(", "))
    }
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
