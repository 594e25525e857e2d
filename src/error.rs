//! Error taxonomy for a single rule invocation.
//!
//! Fatal errors (`ConfigError`, `NetworkError`) abort the run before anything
//! is submitted. `RuleParseError` and `StaleReferenceError` degrade one rule or
//! one instance and never turn into a false compliant verdict.

use std::collections::BTreeSet;

use thiserror::Error;

/// Port policy could not be built from the rule parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid port entry '{entry}': {reason}")]
    InvalidPort { entry: String, reason: String },

    #[error("No port configured: set at least one of port1 / port2")]
    EmptyPolicy,

    #[error("Invalid rule parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid setting {key}='{value}'")]
    InvalidSetting { key: String, value: String },
}

/// Inventory fetch failed. Never retried inside the core.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to run aws cli: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("aws {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unexpected response from aws {command}: {reason}")]
    BadResponse { command: String, reason: String },

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Snapshot unavailable: {0}")]
    Snapshot(String),
}

/// One ingress rule's source range could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("Invalid CIDR '{0}'")]
    InvalidCidr(String),
}

/// An instance references security groups that no longer exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Instance {instance_id} references missing security group(s) {}", join(.missing))]
pub struct StaleReferenceError {
    pub instance_id: String,
    pub missing: BTreeSet<String>,
}

/// A single verdict could not be delivered.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to run aws cli: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("put-evaluations for {instance_id} failed: {stderr}")]
    Rejected { instance_id: String, stderr: String },

    #[error("Failed to encode evaluation: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The invoking event could not be turned into a trigger.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Malformed event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("The rule doesn't apply to resources of type {0}.")]
    NotApplicable(String),
}

/// Fatal outcome of a router run.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Inventory fetch failed: {0}")]
    Network(#[from] NetworkError),
}

fn join(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_reference_lists_every_missing_group() {
        let err = StaleReferenceError {
            instance_id: "i-1".to_string(),
            missing: ["sg-b".to_string(), "sg-a".to_string()].into_iter().collect(),
        };
        assert_eq!(
            err.to_string(),
            "Instance i-1 references missing security group(s) sg-a,sg-b"
        );
    }

    #[test]
    fn not_applicable_matches_config_annotation() {
        let err = EventError::NotApplicable("AWS::S3::Bucket".to_string());
        assert_eq!(
            err.to_string(),
            "The rule doesn't apply to resources of type AWS::S3::Bucket."
        );
    }
}
