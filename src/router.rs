//! Change router: decides which instances a trigger affects, evaluates them
//! against fresh inventory and submits one verdict per instance.
//!
//! An instance change only affects that instance. A security group change
//! affects every instance that references the group, even though none of
//! those instances changed, so the router scans the whole instance inventory
//! and re-evaluates all of their groups. An instance that is deleted, or no
//! longer found, gets a single NOT_APPLICABLE verdict so its last result is
//! cleared.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{NetworkError, RouterError, SinkError};
use crate::evaluator::{evaluate_instance, resolve_groups, GroupVerdictCache};
use crate::model::{GroupVerdict, Instance, InstanceVerdict, SecurityGroup};
use crate::policy::PortPolicy;
use crate::rules::UnparsableCidr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id")]
pub enum Trigger {
    InstanceChanged(String),
    InstanceDeleted(String),
    SecurityGroupChanged(String),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::InstanceChanged(id) => write!(f, "instance {}", id),
            Trigger::InstanceDeleted(id) => write!(f, "deleted instance {}", id),
            Trigger::SecurityGroupChanged(id) => write!(f, "security group {}", id),
        }
    }
}

/// Read-only view of the provider's current inventory.
pub trait InventorySource: Send + Sync {
    fn list_security_groups(&self) -> Result<Vec<SecurityGroup>, NetworkError>;

    fn list_instances(&self) -> Result<Vec<Instance>, NetworkError>;

    fn get_instance(&self, id: &str) -> Result<Instance, NetworkError>;
}

/// Receives one verdict per evaluated instance.
pub trait VerdictSink {
    fn submit(&mut self, verdict: &InstanceVerdict) -> Result<(), SinkError>;
}

/// Instance → groups as fetched, plus the inverted group → instances map.
/// Rebuilt for every run.
#[derive(Debug, Default)]
pub struct GroupIndex {
    instances: BTreeMap<String, Instance>,
    by_group: HashMap<String, BTreeSet<String>>,
}

impl GroupIndex {
    pub fn build(instances: impl IntoIterator<Item = Instance>) -> Self {
        let mut index = Self::default();
        for instance in instances {
            for group_id in &instance.security_group_ids {
                index
                    .by_group
                    .entry(group_id.clone())
                    .or_default()
                    .insert(instance.id.clone());
            }
            index.instances.insert(instance.id.clone(), instance);
        }
        index
    }

    pub fn instances_for(&self, group_id: &str) -> BTreeSet<String> {
        self.by_group.get(group_id).cloned().unwrap_or_default()
    }

    pub fn instance(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }
}

/// Outcome of a full run, including delivery.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub trigger: Trigger,
    pub verdicts: Vec<InstanceVerdict>,
    pub group_verdicts: Vec<GroupVerdict>,
    pub submitted: usize,
    pub failed_submissions: Vec<String>,
}

impl RunReport {
    pub fn non_compliant(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_failing()).count()
    }
}

/// What a trigger resolves to against fresh inventory.
enum Scope {
    /// The instance is gone; nothing to fetch or evaluate.
    Gone(String),
    Affected {
        instances: Vec<Instance>,
        groups: HashMap<String, SecurityGroup>,
    },
}

/// Verdicts computed for a trigger, before submission.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub verdicts: Vec<InstanceVerdict>,
    pub group_verdicts: Vec<GroupVerdict>,
}

pub struct ChangeRouter {
    policy: PortPolicy,
    mode: UnparsableCidr,
    parallel: bool,
}

impl ChangeRouter {
    pub fn new(policy: PortPolicy, mode: UnparsableCidr) -> Self {
        Self {
            policy,
            mode,
            parallel: true,
        }
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn policy(&self) -> &PortPolicy {
        &self.policy
    }

    /// Fetch, scope and evaluate. Fails without partial results if the
    /// inventory cannot be fetched.
    pub fn evaluate(
        &self,
        trigger: &Trigger,
        source: &dyn InventorySource,
    ) -> Result<Evaluation, RouterError> {
        let (affected, groups) = match self.fetch_scope(trigger, source)? {
            Scope::Gone(id) => {
                info!(trigger = %trigger, instance_id = %id, "Instance is gone, clearing its result");
                return Ok(Evaluation {
                    verdicts: vec![InstanceVerdict::not_applicable(id)],
                    group_verdicts: vec![],
                });
            }
            Scope::Affected { instances, groups } => (instances, groups),
        };
        info!(trigger = %trigger, affected = affected.len(), "Resolved evaluation scope");

        let cache = GroupVerdictCache::new(self.policy.clone(), self.mode);

        let referenced: BTreeSet<&str> = affected
            .iter()
            .flat_map(|i| i.security_group_ids.iter().map(String::as_str))
            .collect();
        let to_check: Vec<&SecurityGroup> = referenced
            .iter()
            .filter_map(|id| groups.get(*id))
            .collect();

        if self.parallel {
            to_check.par_iter().for_each(|g| {
                cache.get_or_evaluate(g);
            });
        } else {
            for g in &to_check {
                cache.get_or_evaluate(g);
            }
        }
        debug!(groups = to_check.len(), evaluations = cache.evaluations(), "Evaluated referenced groups");

        let evaluate_one = |instance: &Instance| -> InstanceVerdict {
            match resolve_groups(instance, &groups) {
                Ok(attached) => {
                    let verdicts: Vec<GroupVerdict> =
                        attached.iter().map(|g| cache.get_or_evaluate(g)).collect();
                    let refs: Vec<&GroupVerdict> = verdicts.iter().collect();
                    evaluate_instance(instance, &refs)
                }
                Err(stale) => {
                    warn!(instance_id = %instance.id, "{}", stale);
                    InstanceVerdict::insufficient(instance.id.clone(), stale.missing)
                }
            }
        };

        let verdicts: Vec<InstanceVerdict> = if self.parallel {
            affected.par_iter().map(evaluate_one).collect()
        } else {
            affected.iter().map(evaluate_one).collect()
        };

        let group_verdicts = to_check
            .iter()
            .filter_map(|g| cache.get(&g.id))
            .collect();

        Ok(Evaluation {
            verdicts,
            group_verdicts,
        })
    }

    /// Evaluate and submit each verdict on its own. A failed submission is
    /// logged and does not stop the others.
    pub fn run(
        &self,
        trigger: &Trigger,
        source: &dyn InventorySource,
        sink: &mut dyn VerdictSink,
    ) -> Result<RunReport, RouterError> {
        let evaluation = self.evaluate(trigger, source)?;

        let mut submitted = 0;
        let mut failed_submissions = Vec::new();
        for verdict in &evaluation.verdicts {
            match sink.submit(verdict) {
                Ok(()) => {
                    submitted += 1;
                    debug!(instance_id = %verdict.instance_id, compliance = %verdict.compliance, "Submitted verdict");
                }
                Err(err) => {
                    warn!(instance_id = %verdict.instance_id, error = %err, "Failed to submit verdict");
                    failed_submissions.push(verdict.instance_id.clone());
                }
            }
        }

        info!(
            trigger = %trigger,
            verdicts = evaluation.verdicts.len(),
            submitted,
            failed = failed_submissions.len(),
            "Run complete"
        );

        Ok(RunReport {
            trigger: trigger.clone(),
            verdicts: evaluation.verdicts,
            group_verdicts: evaluation.group_verdicts,
            submitted,
            failed_submissions,
        })
    }

    /// Affected instances (sorted by id) and the group inventory by id.
    fn fetch_scope(
        &self,
        trigger: &Trigger,
        source: &dyn InventorySource,
    ) -> Result<Scope, NetworkError> {
        let instances = match trigger {
            Trigger::InstanceDeleted(id) => return Ok(Scope::Gone(id.clone())),
            Trigger::InstanceChanged(id) => match source.get_instance(id) {
                Ok(instance) => vec![instance],
                Err(NetworkError::InstanceNotFound(_)) => {
                    warn!(instance_id = %id, "Instance no longer exists");
                    return Ok(Scope::Gone(id.clone()));
                }
                Err(e) => return Err(e),
            },
            Trigger::SecurityGroupChanged(group_id) => {
                let index = GroupIndex::build(source.list_instances()?);
                index
                    .instances_for(group_id)
                    .iter()
                    .filter_map(|id| index.instance(id).cloned())
                    .collect()
            }
        };

        let groups = source
            .list_security_groups()?
            .into_iter()
            .map(|g| (g.id.clone(), g))
            .collect();

        Ok(Scope::Affected { instances, groups })
    }
}
