use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use std::io::Read;
use std::path::{Path, PathBuf};

use portguard::aws::{AwsCli, ConfigServiceSink};
use portguard::config::Settings;
use portguard::error::EventError;
use portguard::event::ConfigEvent;
use portguard::observability;
use portguard::report;
use portguard::router::{ChangeRouter, InventorySource, Trigger, VerdictSink};
use portguard::snapshot::{CollectingSink, Snapshot};
use portguard::{PortPolicy, UnparsableCidr};

#[derive(Parser)]
#[command(name = "portguard")]
#[command(about = "EC2 open port compliance rule for AWS Config", long_about = None)]
struct Cli {
    /// AWS Region (defaults to AWS_REGION / AWS_DEFAULT_REGION, then us-east-1)
    #[arg(short, long, global = true)]
    region: Option<String>,

    /// AWS CLI profile
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one instance (instance changed)
    Instance {
        /// Instance ID
        id: String,

        #[command(flatten)]
        ports: PortArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Re-evaluate every instance attached to a security group (group changed)
    Group {
        /// Security group ID
        id: String,

        #[command(flatten)]
        ports: PortArgs,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Handle an AWS Config invoking event (ports come from ruleParameters)
    Event {
        /// Event JSON file, or - for stdin
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct PortArgs {
    /// Forbidden port or range, e.g. 22 or 3389-3390
    #[arg(long)]
    port1: Option<String>,

    /// Second forbidden port or range
    #[arg(long)]
    port2: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    /// Read inventory from a saved describe-security-groups + describe-instances JSON
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print verdicts without submitting them
    #[arg(long)]
    dry_run: bool,

    /// Result token for put-evaluations (instance/group commands)
    #[arg(long)]
    result_token: Option<String>,

    /// How to treat a rule whose CIDR cannot be parsed: fail-open or fail-closed
    #[arg(long)]
    unparsable_cidr: Option<UnparsableCidr>,

    /// Evaluate groups on one thread
    #[arg(long)]
    sequential: bool,

    /// Exit with error code if any instance is not compliant
    #[arg(long)]
    strict: bool,
}

struct Submission {
    result_token: String,
    ordering_timestamp: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing(cli.verbose);

    let settings = Settings::from_env()?;
    let region = cli.region.clone().unwrap_or_else(|| settings.region.clone());
    let profile = cli.profile.clone().or_else(|| settings.profile.clone());
    let aws = AwsCli::new(&region, profile);

    let exit_code = match cli.command {
        Commands::Instance { id, ports, run } => {
            let policy = PortPolicy::from_params(ports.port1.as_deref(), ports.port2.as_deref())?;
            let submission = direct_submission(&run);
            execute(Trigger::InstanceChanged(id), policy, &run, &settings, &aws, submission, cli.json)?
        }

        Commands::Group { id, ports, run } => {
            let policy = PortPolicy::from_params(ports.port1.as_deref(), ports.port2.as_deref())?;
            let submission = direct_submission(&run);
            execute(Trigger::SecurityGroupChanged(id), policy, &run, &settings, &aws, submission, cli.json)?
        }

        Commands::Event { file, run } => {
            let raw = read_event(&file)?;
            let event = ConfigEvent::from_json(&raw).context("Failed to parse invoking event")?;

            match event.trigger() {
                Ok(trigger) => {
                    let policy = PortPolicy::from_rule_parameters(&event.rule_parameters)?;
                    let submission = Submission {
                        result_token: event.result_token.clone(),
                        ordering_timestamp: event
                            .ordering_timestamp()
                            .map(str::to_string)
                            .unwrap_or_else(now_timestamp),
                    };
                    execute(trigger, policy, &run, &settings, &aws, Some(submission), cli.json)?
                }
                Err(e @ EventError::NotApplicable(_)) => {
                    report::print_not_applicable(&e.to_string(), cli.json);
                    0
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }

    Ok(())
}

fn execute(
    trigger: Trigger,
    policy: PortPolicy,
    run: &RunArgs,
    settings: &Settings,
    aws: &AwsCli,
    submission: Option<Submission>,
    json_output: bool,
) -> Result<i32> {
    let source: Box<dyn InventorySource> = match &run.snapshot {
        Some(path) => Box::new(Snapshot::load(path)?),
        None => Box::new(aws.clone()),
    };

    let mode = run.unparsable_cidr.unwrap_or(settings.unparsable_cidr);
    let router = ChangeRouter::new(policy, mode).with_parallelism(settings.parallel && !run.sequential);

    let dry_run = run.dry_run || submission.is_none();
    let mut sink: Box<dyn VerdictSink> = match submission {
        Some(s) if !run.dry_run => Box::new(ConfigServiceSink::new(
            aws.clone(),
            s.result_token,
            s.ordering_timestamp,
        )),
        _ => Box::new(CollectingSink::default()),
    };

    let run_report = router.run(&trigger, source.as_ref(), sink.as_mut())?;

    if json_output {
        let out = report::render_json(&run_report, router.policy(), &aws.region, dry_run);
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        report::print_summary(&run_report, router.policy(), &aws.region, dry_run);
    }

    if !run_report.failed_submissions.is_empty() {
        if !json_output {
            println!("{}", "Some verdicts were not submitted".red().bold());
        }
        return Ok(2);
    }

    if run.strict && run_report.non_compliant() > 0 {
        return Ok(1);
    }

    Ok(0)
}

/// Instance and group commands only submit when given a result token.
fn direct_submission(run: &RunArgs) -> Option<Submission> {
    run.result_token.as_ref().map(|token| Submission {
        result_token: token.clone(),
        ordering_timestamp: now_timestamp(),
    })
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn read_event(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
    }
}
