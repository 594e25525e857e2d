//! AWS access through the `aws` CLI: EC2 inventory in, Config evaluations out.

use std::collections::BTreeSet;
use std::process::{Command, Output};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{NetworkError, SinkError};
use crate::model::{Instance, InstanceVerdict, SecurityGroup};
use crate::router::{InventorySource, VerdictSink};
use crate::rules::{IngressRule, Protocol};

pub const INSTANCE_RESOURCE_TYPE: &str = "AWS::EC2::Instance";
pub const SECURITY_GROUP_RESOURCE_TYPE: &str = "AWS::EC2::SecurityGroup";

/// EC2 error codes for an instance id that does not (or no longer) exist.
const MISSING_INSTANCE_CODES: &[&str] = &["InvalidInstanceID.NotFound", "InvalidInstanceID.Malformed"];

/// Runs `aws` with an optional named profile in one region.
#[derive(Debug, Clone)]
pub struct AwsCli {
    pub region: String,
    pub profile: Option<String>,
}

impl AwsCli {
    pub fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        Self {
            region: region.into(),
            profile,
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("aws");
        cmd.args(args)
            .args(["--region", self.region.as_str(), "--output", "json"]);
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile.as_str()]);
        }
        cmd
    }

    fn run_json(&self, args: &[&str]) -> Result<Value, NetworkError> {
        let label = args.join(" ");
        debug!(command = %label, region = %self.region, "Calling aws cli");

        let output = self.command(args).output()?;
        json_from_output(label, &output)
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn json_from_output(label: String, output: &Output) -> Result<Value, NetworkError> {
    if !output.status.success() {
        return Err(NetworkError::CommandFailed {
            command: label,
            stderr: stderr_of(output),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|e| NetworkError::BadResponse {
        command: label,
        reason: e.to_string(),
    })
}

/// `describe-instances --instance-ids` fails outright for an unknown id
/// instead of returning an empty list.
fn instance_lookup_error(id: &str, err: NetworkError) -> NetworkError {
    match err {
        NetworkError::CommandFailed { stderr, .. }
            if MISSING_INSTANCE_CODES.iter().any(|code| stderr.contains(code)) =>
        {
            NetworkError::InstanceNotFound(id.to_string())
        }
        other => other,
    }
}

fn submission_result(instance_id: &str, output: &Output) -> Result<(), SinkError> {
    if output.status.success() {
        return Ok(());
    }
    Err(SinkError::Rejected {
        instance_id: instance_id.to_string(),
        stderr: stderr_of(output),
    })
}

impl InventorySource for AwsCli {
    fn list_security_groups(&self) -> Result<Vec<SecurityGroup>, NetworkError> {
        let json = self.run_json(&["ec2", "describe-security-groups"])?;
        parse_security_groups(&json).map_err(|reason| NetworkError::BadResponse {
            command: "ec2 describe-security-groups".to_string(),
            reason,
        })
    }

    fn list_instances(&self) -> Result<Vec<Instance>, NetworkError> {
        let json = self.run_json(&["ec2", "describe-instances"])?;
        parse_instances(&json).map_err(|reason| NetworkError::BadResponse {
            command: "ec2 describe-instances".to_string(),
            reason,
        })
    }

    fn get_instance(&self, id: &str) -> Result<Instance, NetworkError> {
        let json = self
            .run_json(&["ec2", "describe-instances", "--instance-ids", id])
            .map_err(|e| instance_lookup_error(id, e))?;
        let instances = parse_instances(&json).map_err(|reason| NetworkError::BadResponse {
            command: "ec2 describe-instances".to_string(),
            reason,
        })?;
        instances
            .into_iter()
            .find(|i| i.id == id)
            .ok_or_else(|| NetworkError::InstanceNotFound(id.to_string()))
    }
}

/// Turn a `describe-security-groups` document into groups with one ingress
/// rule per address range.
pub fn parse_security_groups(json: &Value) -> Result<Vec<SecurityGroup>, String> {
    let Some(sgs) = json["SecurityGroups"].as_array() else {
        return Err("missing SecurityGroups array".to_string());
    };

    let mut groups = Vec::with_capacity(sgs.len());
    for sg in sgs {
        let id = sg["GroupId"]
            .as_str()
            .ok_or_else(|| "security group without GroupId".to_string())?;

        let mut rules = Vec::new();
        for permission in sg["IpPermissions"].as_array().into_iter().flatten() {
            rules.extend(permission_rules(permission)?);
        }

        groups.push(SecurityGroup {
            id: id.to_string(),
            name: sg["GroupName"].as_str().map(str::to_string),
            rules,
        });
    }

    Ok(groups)
}

fn permission_rules(permission: &Value) -> Result<Vec<IngressRule>, String> {
    let protocol = Protocol::from_ip_protocol(permission["IpProtocol"].as_str().unwrap_or("-1"));

    // All-traffic rules carry no ports; ICMP uses -1 as a wildcard.
    let (from_port, to_port) = match (
        permission["FromPort"].as_i64(),
        permission["ToPort"].as_i64(),
    ) {
        (Some(f), Some(t)) if protocol != Protocol::All => (port(f)?, port(t)?),
        _ => (0, u16::MAX),
    };

    let v4 = permission["IpRanges"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|r| r["CidrIp"].as_str());
    let v6 = permission["Ipv6Ranges"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|r| r["CidrIpv6"].as_str());

    Ok(v4
        .chain(v6)
        .map(|cidr| IngressRule::new(cidr, protocol.clone(), from_port, to_port))
        .collect())
}

fn port(raw: i64) -> Result<u16, String> {
    match raw {
        -1 => Ok(0),
        p => u16::try_from(p).map_err(|_| format!("port out of range: {}", p)),
    }
}

/// Turn a `describe-instances` document into instances. Terminated
/// instances are dropped.
pub fn parse_instances(json: &Value) -> Result<Vec<Instance>, String> {
    let Some(reservations) = json["Reservations"].as_array() else {
        return Err("missing Reservations array".to_string());
    };

    let mut instances = vec![];
    for reservation in reservations {
        for inst in reservation["Instances"].as_array().into_iter().flatten() {
            let id = inst["InstanceId"]
                .as_str()
                .ok_or_else(|| "instance without InstanceId".to_string())?;
            if inst["State"]["Name"].as_str() == Some("terminated") {
                continue;
            }

            let security_group_ids: BTreeSet<String> = inst["SecurityGroups"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|g| g["GroupId"].as_str())
                .map(str::to_string)
                .collect();

            instances.push(Instance {
                id: id.to_string(),
                security_group_ids,
            });
        }
    }

    Ok(instances)
}

/// One entry of a `put-evaluations` call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Evaluation<'a> {
    pub compliance_resource_type: &'static str,
    pub compliance_resource_id: &'a str,
    pub compliance_type: &'static str,
    pub annotation: String,
    pub ordering_timestamp: &'a str,
}

impl<'a> Evaluation<'a> {
    pub fn for_verdict(verdict: &'a InstanceVerdict, ordering_timestamp: &'a str) -> Self {
        Self {
            compliance_resource_type: INSTANCE_RESOURCE_TYPE,
            compliance_resource_id: &verdict.instance_id,
            compliance_type: verdict.compliance.as_str(),
            annotation: verdict.annotation(),
            ordering_timestamp,
        }
    }
}

/// Submits each verdict with its own `aws configservice put-evaluations` call.
pub struct ConfigServiceSink {
    cli: AwsCli,
    result_token: String,
    ordering_timestamp: String,
}

impl ConfigServiceSink {
    pub fn new(cli: AwsCli, result_token: impl Into<String>, ordering_timestamp: impl Into<String>) -> Self {
        Self {
            cli,
            result_token: result_token.into(),
            ordering_timestamp: ordering_timestamp.into(),
        }
    }
}

impl VerdictSink for ConfigServiceSink {
    fn submit(&mut self, verdict: &InstanceVerdict) -> Result<(), SinkError> {
        let evaluations = serde_json::to_string(&[Evaluation::for_verdict(
            verdict,
            &self.ordering_timestamp,
        )])?;

        let output = self
            .cli
            .command(&[
                "configservice",
                "put-evaluations",
                "--evaluations",
                &evaluations,
                "--result-token",
                &self.result_token,
            ])
            .output()?;

        submission_result(&verdict.instance_id, &output)
    }
}
