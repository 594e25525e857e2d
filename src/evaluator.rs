//! Group and instance evaluation.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, warn};

use crate::error::StaleReferenceError;
use crate::model::{Compliance, GroupVerdict, Instance, InstanceVerdict, SecurityGroup};
use crate::policy::PortPolicy;
use crate::rules::{match_rule, UnparsableCidr};

/// Evaluate every rule of a group. The group is non-compliant iff at least
/// one rule violates.
pub fn evaluate_group(
    group: &SecurityGroup,
    policy: &PortPolicy,
    mode: UnparsableCidr,
) -> GroupVerdict {
    let mut violating_rules = Vec::new();
    let mut diagnostics = Vec::new();

    for rule in &group.rules {
        let m = match_rule(rule, policy, mode);
        if let Some(err) = m.parse_error {
            warn!(group_id = %group.id, rule = %rule, mode = %mode, "Unparsable rule source: {}", err);
            diagnostics.push(format!("{} ({}, treated as {})", err, rule, mode));
        }
        if m.violation {
            violating_rules.push(rule.clone());
        }
    }

    GroupVerdict {
        group_id: group.id.clone(),
        compliant: violating_rules.is_empty(),
        violating_rules,
        diagnostics,
    }
}

/// Per-run memo of group verdicts. Each group id is evaluated at most once,
/// including when several threads ask for it at the same time.
pub struct GroupVerdictCache {
    policy: PortPolicy,
    mode: UnparsableCidr,
    slots: Mutex<HashMap<String, Arc<OnceLock<GroupVerdict>>>>,
    evaluations: AtomicUsize,
}

impl GroupVerdictCache {
    pub fn new(policy: PortPolicy, mode: UnparsableCidr) -> Self {
        Self {
            policy,
            mode,
            slots: Mutex::new(HashMap::new()),
            evaluations: AtomicUsize::new(0),
        }
    }

    pub fn get_or_evaluate(&self, group: &SecurityGroup) -> GroupVerdict {
        let slot = {
            // Poisoning only means another evaluation panicked; the map itself is intact.
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(group.id.clone()).or_default())
        };

        slot.get_or_init(|| {
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            let verdict = evaluate_group(group, &self.policy, self.mode);
            debug!(group_id = %verdict.group_id, compliant = verdict.compliant, "Evaluated security group");
            verdict
        })
        .clone()
    }

    pub fn get(&self, group_id: &str) -> Option<GroupVerdict> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(group_id).and_then(|slot| slot.get().cloned())
    }

    /// Number of group evaluations actually performed.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::Relaxed)
    }
}

/// Look up every group attached to `instance`.
pub fn resolve_groups<'a>(
    instance: &Instance,
    groups: &'a HashMap<String, SecurityGroup>,
) -> Result<Vec<&'a SecurityGroup>, StaleReferenceError> {
    let mut resolved = Vec::with_capacity(instance.security_group_ids.len());
    let mut missing = BTreeSet::new();

    for id in &instance.security_group_ids {
        match groups.get(id) {
            Some(group) => resolved.push(group),
            None => {
                missing.insert(id.clone());
            }
        }
    }

    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(StaleReferenceError {
            instance_id: instance.id.clone(),
            missing,
        })
    }
}

/// Combine the verdicts of an instance's groups. No groups means compliant.
pub fn evaluate_instance(instance: &Instance, verdicts: &[&GroupVerdict]) -> InstanceVerdict {
    let reason_group_ids: BTreeSet<String> = verdicts
        .iter()
        .filter(|v| !v.compliant)
        .map(|v| v.group_id.clone())
        .collect();

    let compliance = if reason_group_ids.is_empty() {
        Compliance::Compliant
    } else {
        Compliance::NonCompliant
    };

    InstanceVerdict {
        instance_id: instance.id.clone(),
        compliance,
        reason_group_ids,
        missing_group_ids: BTreeSet::new(),
    }
}
