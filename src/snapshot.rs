//! Offline inventory loaded from saved `describe-*` output, and an in-memory
//! sink for dry runs.

use std::path::Path;

use serde_json::Value;

use crate::aws::{parse_instances, parse_security_groups};
use crate::error::{NetworkError, SinkError};
use crate::model::{Instance, InstanceVerdict, SecurityGroup};
use crate::router::{InventorySource, VerdictSink};

/// A fixed view of the inventory.
///
/// The file format is the merge of `aws ec2 describe-security-groups` and
/// `aws ec2 describe-instances`: `{"SecurityGroups": [...], "Reservations": [...]}`.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub security_groups: Vec<SecurityGroup>,
    pub instances: Vec<Instance>,
}

impl Snapshot {
    pub fn new(security_groups: Vec<SecurityGroup>, instances: Vec<Instance>) -> Self {
        Self {
            security_groups,
            instances,
        }
    }

    pub fn from_value(json: &Value) -> Result<Self, NetworkError> {
        let security_groups = parse_security_groups(json).map_err(NetworkError::Snapshot)?;
        let instances = parse_instances(json).map_err(NetworkError::Snapshot)?;
        Ok(Self::new(security_groups, instances))
    }

    pub fn load(path: &Path) -> Result<Self, NetworkError> {
        let raw = std::fs::read(path)
            .map_err(|e| NetworkError::Snapshot(format!("{}: {}", path.display(), e)))?;
        let json: Value = serde_json::from_slice(&raw)
            .map_err(|e| NetworkError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Self::from_value(&json)
    }
}

impl InventorySource for Snapshot {
    fn list_security_groups(&self) -> Result<Vec<SecurityGroup>, NetworkError> {
        Ok(self.security_groups.clone())
    }

    fn list_instances(&self) -> Result<Vec<Instance>, NetworkError> {
        Ok(self.instances.clone())
    }

    fn get_instance(&self, id: &str) -> Result<Instance, NetworkError> {
        self.instances
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| NetworkError::InstanceNotFound(id.to_string()))
    }
}

/// Keeps every submitted verdict in submission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub verdicts: Vec<InstanceVerdict>,
}

impl VerdictSink for CollectingSink {
    fn submit(&mut self, verdict: &InstanceVerdict) -> Result<(), SinkError> {
        self.verdicts.push(verdict.clone());
        Ok(())
    }
}
