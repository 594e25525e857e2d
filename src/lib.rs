//! EC2 open port compliance.
//!
//! Security groups carry the rules but compliance is reported per instance.
//! An instance change re-evaluates that instance; a security group change
//! re-evaluates every instance attached to the group.

pub mod aws;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod model;
pub mod observability;
pub mod policy;
pub mod report;
pub mod router;
pub mod rules;
pub mod snapshot;

pub use error::{ConfigError, NetworkError, RouterError, RuleParseError, SinkError, StaleReferenceError};
pub use model::{Compliance, GroupVerdict, Instance, InstanceVerdict, SecurityGroup};
pub use policy::{PortPolicy, PortRange};
pub use router::{ChangeRouter, InventorySource, Trigger, VerdictSink};
pub use rules::{IngressRule, Protocol, UnparsableCidr};
