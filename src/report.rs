//! Terminal and JSON output for a run.

use colored::*;
use serde_json::{json, Value};

use crate::model::{Compliance, GroupVerdict};
use crate::policy::PortPolicy;
use crate::router::RunReport;

pub fn render_json(report: &RunReport, policy: &PortPolicy, region: &str, dry_run: bool) -> Value {
    json!({
        "region": region,
        "trigger": report.trigger,
        "forbidden_ports": policy.to_string(),
        "dry_run": dry_run,
        "total_instances": report.verdicts.len(),
        "non_compliant": report.non_compliant(),
        "submitted": report.submitted,
        "failed_submissions": report.failed_submissions,
        "verdicts": report.verdicts,
        "security_groups": report.group_verdicts,
    })
}

pub fn print_summary(report: &RunReport, policy: &PortPolicy, region: &str, dry_run: bool) {
    println!("{}", "EC2 Open Port Compliance".cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!("Region: {}", region.yellow());
    println!("Trigger: {}", report.trigger.to_string().yellow());
    println!("Forbidden ports: {}", policy.to_string().yellow());
    println!();

    if report.verdicts.is_empty() {
        println!("{}", "No instances affected".green().bold());
    }

    for verdict in &report.verdicts {
        let status = match verdict.compliance {
            Compliance::Compliant => verdict.compliance.as_str().green().bold(),
            Compliance::NonCompliant => verdict.compliance.as_str().red().bold(),
            Compliance::InsufficientData => verdict.compliance.as_str().yellow().bold(),
            Compliance::NotApplicable => verdict.compliance.as_str().bright_black().bold(),
        };
        println!("[{}] {}", status, verdict.instance_id.cyan());

        for group_id in &verdict.reason_group_ids {
            if let Some(group) = report.group_verdicts.iter().find(|g| &g.group_id == group_id) {
                print_group(group);
            }
        }
        for group_id in &verdict.missing_group_ids {
            println!("  {} {} (missing)", "?".yellow(), group_id.bright_black());
        }
    }

    let diagnostics: Vec<&String> = report
        .group_verdicts
        .iter()
        .flat_map(|g| g.diagnostics.iter())
        .collect();
    if !diagnostics.is_empty() {
        println!();
        println!("{}", "Diagnostics:".yellow().bold());
        for d in diagnostics {
            println!("  {} {}", "!".yellow(), d.bright_black());
        }
    }

    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!(
        "Summary: {} instance(s), {} non-compliant",
        report.verdicts.len().to_string().cyan(),
        report.non_compliant().to_string().red().bold()
    );

    if dry_run {
        println!("{}", "Dry run: nothing submitted".bright_black());
    } else {
        println!(
            "Submitted {} verdict(s), {} failed",
            report.submitted.to_string().green(),
            report.failed_submissions.len().to_string().red()
        );
    }
}

fn print_group(group: &GroupVerdict) {
    println!("  {} {}", "✗".red(), group.group_id.bright_black());
    for rule in &group.violating_rules {
        println!("      • {}", rule.to_string().red());
    }
}

pub fn print_not_applicable(reason: &str, json_output: bool) {
    if json_output {
        let out = json!({
            "compliance_type": "NOT_APPLICABLE",
            "annotation": reason,
        });
        println!("{}", out);
    } else {
        println!("{} {}", "NOT_APPLICABLE".bright_black().bold(), reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceVerdict;
    use crate::router::Trigger;

    #[test]
    fn json_report_shape() {
        let policy = PortPolicy::from_params(Some("22"), None).unwrap();
        let report = RunReport {
            trigger: Trigger::InstanceChanged("i-1".into()),
            verdicts: vec![InstanceVerdict {
                instance_id: "i-1".into(),
                compliance: Compliance::NonCompliant,
                reason_group_ids: ["sg-1".to_string()].into(),
                missing_group_ids: Default::default(),
            }],
            group_verdicts: vec![],
            submitted: 0,
            failed_submissions: vec![],
        };

        let out = render_json(&report, &policy, "us-east-1", true);
        assert_eq!(out["trigger"], json!({"kind": "InstanceChanged", "id": "i-1"}));
        assert_eq!(out["forbidden_ports"], "22");
        assert_eq!(out["non_compliant"], 1);
        assert_eq!(out["verdicts"][0]["compliance"], "NON_COMPLIANT");
        assert_eq!(out["verdicts"][0]["reason_group_ids"], json!(["sg-1"]));
        assert!(out["verdicts"][0].get("missing_group_ids").is_none());
    }
}
