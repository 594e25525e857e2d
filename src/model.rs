//! Inventory entities and the verdicts derived from them.
//!
//! Everything here is rebuilt from a fresh provider snapshot on each
//! invocation and dropped when it ends.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::rules::IngressRule;

/// AWS Config rejects longer annotations.
pub const MAX_ANNOTATION_CHARS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub rules: Vec<IngressRule>,
}

impl SecurityGroup {
    pub fn new(id: impl Into<String>, rules: Vec<IngressRule>) -> Self {
        Self {
            id: id.into(),
            name: None,
            rules,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub security_group_ids: BTreeSet<String>,
}

impl Instance {
    pub fn new<I, S>(id: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            security_group_ids: groups.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupVerdict {
    pub group_id: String,
    pub compliant: bool,
    /// In rule order.
    pub violating_rules: Vec<IngressRule>,
    /// Rules that could not be fully evaluated.
    pub diagnostics: Vec<String>,
}

/// AWS Config compliance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compliance {
    Compliant,
    NonCompliant,
    InsufficientData,
    NotApplicable,
}

impl Compliance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compliance::Compliant => "COMPLIANT",
            Compliance::NonCompliant => "NON_COMPLIANT",
            Compliance::InsufficientData => "INSUFFICIENT_DATA",
            Compliance::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

impl fmt::Display for Compliance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceVerdict {
    pub instance_id: String,
    pub compliance: Compliance,
    pub reason_group_ids: BTreeSet<String>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub missing_group_ids: BTreeSet<String>,
}

impl InstanceVerdict {
    /// Verdict for an instance whose groups could not all be found.
    pub fn insufficient(instance_id: impl Into<String>, missing: BTreeSet<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            compliance: Compliance::InsufficientData,
            reason_group_ids: BTreeSet::new(),
            missing_group_ids: missing,
        }
    }

    /// Verdict that clears the last result of an instance that no longer exists.
    pub fn not_applicable(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            compliance: Compliance::NotApplicable,
            reason_group_ids: BTreeSet::new(),
            missing_group_ids: BTreeSet::new(),
        }
    }

    pub fn is_compliant(&self) -> bool {
        self.compliance == Compliance::Compliant
    }

    /// Non-compliant or undecided. A NOT_APPLICABLE verdict does not fail.
    pub fn is_failing(&self) -> bool {
        matches!(
            self.compliance,
            Compliance::NonCompliant | Compliance::InsufficientData
        )
    }

    /// Annotation shown next to the evaluation in AWS Config, cut to
    /// [`MAX_ANNOTATION_CHARS`].
    pub fn annotation(&self) -> String {
        let text = match self.compliance {
            Compliance::Compliant => "This resource is compliant with the rule.".to_string(),
            Compliance::NonCompliant => format!(
                "Instance has non compliant groups {}",
                join_ids(&self.reason_group_ids)
            ),
            Compliance::InsufficientData => format!(
                "Instance references missing security groups {}",
                join_ids(&self.missing_group_ids)
            ),
            Compliance::NotApplicable => "Instance no longer exists.".to_string(),
        };
        fit_annotation(text)
    }
}

/// Cut after the last whole id that fits and mark the cut with `…`.
fn fit_annotation(text: String) -> String {
    if text.chars().count() <= MAX_ANNOTATION_CHARS {
        return text;
    }

    let mut cut: String = text.chars().take(MAX_ANNOTATION_CHARS - 1).collect();
    if let Some(comma) = cut.rfind(',') {
        cut.truncate(comma + 1);
    }
    cut.push('…');
    cut
}

fn join_ids(ids: &BTreeSet<String>) -> String {
    ids.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
