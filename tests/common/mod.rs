#![allow(dead_code)]

use std::path::PathBuf;

use portguard::snapshot::Snapshot;
use portguard::PortPolicy;

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn inventory() -> Snapshot {
    Snapshot::load(&fixture("inventory.json")).expect("load inventory fixture")
}

pub fn ssh_rdp_policy() -> PortPolicy {
    PortPolicy::from_params(Some("22"), Some("3389-3390")).expect("valid policy")
}
