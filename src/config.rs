//! Environment settings.
//!
//! CLI flags win; these only fill in what the command line leaves unset.
//! Empty values count as unset.

use std::env;

use crate::error::ConfigError;
use crate::rules::UnparsableCidr;

pub mod keys {
    pub const AWS_REGION: &str = "AWS_REGION";
    pub const AWS_REGION_ALIASES: &[&str] = &["AWS_DEFAULT_REGION"];
    pub const AWS_PROFILE: &str = "AWS_PROFILE";

    pub const PORTGUARD_UNPARSABLE_CIDR: &str = "PORTGUARD_UNPARSABLE_CIDR";
    pub const PORTGUARD_SEQUENTIAL: &str = "PORTGUARD_SEQUENTIAL";

    pub const PORTGUARD_LOG_LEVEL: &str = "PORTGUARD_LOG_LEVEL";
    pub const PORTGUARD_LOG_JSON: &str = "PORTGUARD_LOG_JSON";
    pub const PORTGUARD_QUIET: &str = "PORTGUARD_QUIET";
}

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_LOG_LEVEL: &str = "portguard=info";

/// Read the first non-empty value from `primary` or its aliases.
pub fn lookup_optional<F>(lookup: &F, primary: &str, aliases: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    std::iter::once(primary)
        .chain(aliases.iter().copied())
        .find_map(|key| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
}

/// 1/true/yes/on are true, 0/false/no/off are false.
pub fn lookup_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match lookup_optional(lookup, key, &[]) {
        Some(v) => !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"),
        None => default,
    }
}

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Where and how to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub region: String,
    pub profile: Option<String>,
    pub unparsable_cidr: UnparsableCidr,
    pub parallel: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let region = lookup_optional(&lookup, keys::AWS_REGION, keys::AWS_REGION_ALIASES)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let profile = lookup_optional(&lookup, keys::AWS_PROFILE, &[]);
        let unparsable_cidr = match lookup_optional(&lookup, keys::PORTGUARD_UNPARSABLE_CIDR, &[]) {
            Some(v) => v.parse()?,
            None => UnparsableCidr::default(),
        };
        let parallel = !lookup_bool(&lookup, keys::PORTGUARD_SEQUENTIAL, false);

        Ok(Self {
            region,
            profile,
            unparsable_cidr,
            parallel,
        })
    }
}

/// Logging switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(process_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            quiet: lookup_bool(&lookup, keys::PORTGUARD_QUIET, false),
            log_level: lookup_optional(&lookup, keys::PORTGUARD_LOG_LEVEL, &[])
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_json: lookup_bool(&lookup, keys::PORTGUARD_LOG_JSON, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let s = Settings::from_lookup(env_of(&[])).unwrap();
        assert_eq!(s.region, "us-east-1");
        assert_eq!(s.profile, None);
        assert_eq!(s.unparsable_cidr, UnparsableCidr::FailOpen);
        assert!(s.parallel);
    }

    #[test]
    fn region_alias_and_blank_values() {
        let s = Settings::from_lookup(env_of(&[
            ("AWS_REGION", "  "),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
            ("AWS_PROFILE", "audit"),
            ("PORTGUARD_UNPARSABLE_CIDR", "fail-closed"),
            ("PORTGUARD_SEQUENTIAL", "yes"),
        ]))
        .unwrap();
        assert_eq!(s.region, "eu-west-1");
        assert_eq!(s.profile.as_deref(), Some("audit"));
        assert_eq!(s.unparsable_cidr, UnparsableCidr::FailClosed);
        assert!(!s.parallel);
    }

    #[test]
    fn bad_cidr_mode_is_a_config_error() {
        let err = Settings::from_lookup(env_of(&[("PORTGUARD_UNPARSABLE_CIDR", "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));
    }

    #[test]
    fn observability_switches() {
        let cfg = ObservabilityConfig::from_lookup(env_of(&[
            ("PORTGUARD_QUIET", "1"),
            ("PORTGUARD_LOG_JSON", "off"),
        ]));
        assert!(cfg.quiet);
        assert!(!cfg.log_json);
        assert_eq!(cfg.log_level, "portguard=info");
    }
}
