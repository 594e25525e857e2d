//! Ingress rules and the single-rule violation check.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RuleParseError};
use crate::policy::PortPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    All,
    Other(String),
}

impl Protocol {
    /// Parse an EC2 `IpProtocol` value (name or IANA number).
    pub fn from_ip_protocol(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tcp" | "6" => Protocol::Tcp,
            "udp" | "17" => Protocol::Udp,
            "-1" | "all" => Protocol::All,
            other => Protocol::Other(other.to_string()),
        }
    }

    /// Forbidden ports are treated as TCP services.
    pub fn carries_tcp(&self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::All)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::All => write!(f, "all"),
            Protocol::Other(p) => write!(f, "{}", p),
        }
    }
}

/// One allow rule inside a security group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IngressRule {
    pub cidr: String,
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
}

impl IngressRule {
    pub fn new(cidr: impl Into<String>, protocol: Protocol, from_port: u16, to_port: u16) -> Self {
        Self {
            cidr: cidr.into(),
            protocol,
            from_port,
            to_port,
        }
    }

    pub fn tcp(cidr: impl Into<String>, from_port: u16, to_port: u16) -> Self {
        Self::new(cidr, Protocol::Tcp, from_port, to_port)
    }
}

impl fmt::Display for IngressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_port == self.to_port {
            write!(f, "{} :{} from {}", self.protocol, self.from_port, self.cidr)
        } else {
            write!(
                f,
                "{} :{}-{} from {}",
                self.protocol, self.from_port, self.to_port, self.cidr
            )
        }
    }
}

/// IPv4 or IPv6 source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    pub addr: IpAddr,
    pub prefix: u8,
}

impl Cidr {
    /// The range covers the whole address space of its family.
    pub fn is_public(&self) -> bool {
        self.prefix == 0
    }
}

impl FromStr for Cidr {
    type Err = RuleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuleParseError::InvalidCidr(s.to_string());
        let trimmed = s.trim();

        let (addr, prefix) = match trimmed.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (trimmed, None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };

        let prefix = match prefix {
            Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                p.parse::<u8>().map_err(|_| invalid())?
            }
            Some(_) => return Err(invalid()),
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }

        Ok(Self { addr, prefix })
    }
}

/// What to assume about a rule whose CIDR cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnparsableCidr {
    /// Treat the source as non-public.
    #[default]
    FailOpen,
    /// Treat the source as world-open.
    FailClosed,
}

impl FromStr for UnparsableCidr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-open" | "open" => Ok(UnparsableCidr::FailOpen),
            "fail-closed" | "closed" => Ok(UnparsableCidr::FailClosed),
            other => Err(ConfigError::InvalidSetting {
                key: "unparsable-cidr".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for UnparsableCidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnparsableCidr::FailOpen => write!(f, "fail-open"),
            UnparsableCidr::FailClosed => write!(f, "fail-closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub violation: bool,
    pub parse_error: Option<RuleParseError>,
}

/// Does this rule alone expose a forbidden port to the world?
pub fn match_rule(rule: &IngressRule, policy: &PortPolicy, mode: UnparsableCidr) -> RuleMatch {
    let (public, parse_error) = match rule.cidr.parse::<Cidr>() {
        Ok(cidr) => (cidr.is_public(), None),
        Err(err) => (mode == UnparsableCidr::FailClosed, Some(err)),
    };

    let violation = public
        && rule.protocol.carries_tcp()
        && policy.intersects(rule.from_port, rule.to_port);

    RuleMatch {
        violation,
        parse_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PortPolicy {
        PortPolicy::from_params(Some("22"), Some("3389-3390")).unwrap()
    }

    #[test]
    fn parses_cidrs() {
        let c: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(c.is_public());
        let c: Cidr = "::/0".parse().unwrap();
        assert!(c.is_public());
        let c: Cidr = "10.0.0.0/8".parse().unwrap();
        assert!(!c.is_public());
        let c: Cidr = "203.0.113.7".parse().unwrap();
        assert_eq!(c.prefix, 32);

        for bad in ["0.0.0.0/33", "::/129", "not-an-ip/0", "1.2.3.4/", "1.2.3.4/x", ""] {
            assert!(bad.parse::<Cidr>().is_err(), "{bad} should not parse");
        }
    }

    #[test]
    fn protocol_names_and_numbers() {
        assert_eq!(Protocol::from_ip_protocol("TCP"), Protocol::Tcp);
        assert_eq!(Protocol::from_ip_protocol("6"), Protocol::Tcp);
        assert_eq!(Protocol::from_ip_protocol("17"), Protocol::Udp);
        assert_eq!(Protocol::from_ip_protocol("-1"), Protocol::All);
        assert_eq!(
            Protocol::from_ip_protocol("icmp"),
            Protocol::Other("icmp".to_string())
        );
    }

    #[test]
    fn world_open_forbidden_tcp_port_violates() {
        let rule = IngressRule::tcp("0.0.0.0/0", 22, 22);
        let m = match_rule(&rule, &policy(), UnparsableCidr::FailOpen);
        assert!(m.violation);
        assert!(m.parse_error.is_none());
    }

    #[test]
    fn all_traffic_counts_as_tcp() {
        let rule = IngressRule::new("::/0", Protocol::All, 0, 65535);
        assert!(match_rule(&rule, &policy(), UnparsableCidr::FailOpen).violation);
    }

    #[test]
    fn private_source_never_violates() {
        for cidr in ["10.0.0.0/8", "192.168.1.0/24", "172.16.0.0/12", "1.2.3.4/32"] {
            let rule = IngressRule::new(cidr, Protocol::All, 0, 65535);
            assert!(!match_rule(&rule, &policy(), UnparsableCidr::FailOpen).violation);
        }
    }

    #[test]
    fn udp_and_other_protocols_never_violate() {
        let udp = IngressRule::new("0.0.0.0/0", Protocol::Udp, 22, 22);
        assert!(!match_rule(&udp, &policy(), UnparsableCidr::FailOpen).violation);
        let icmp = IngressRule::new("0.0.0.0/0", Protocol::Other("icmp".into()), 0, 65535);
        assert!(!match_rule(&icmp, &policy(), UnparsableCidr::FailOpen).violation);
    }

    #[test]
    fn allowed_port_does_not_violate() {
        let rule = IngressRule::tcp("0.0.0.0/0", 8080, 8080);
        assert!(!match_rule(&rule, &policy(), UnparsableCidr::FailOpen).violation);
    }

    #[test]
    fn unparsable_cidr_follows_mode() {
        let rule = IngressRule::tcp("garbage", 22, 22);

        let open = match_rule(&rule, &policy(), UnparsableCidr::FailOpen);
        assert!(!open.violation);
        assert_eq!(
            open.parse_error,
            Some(RuleParseError::InvalidCidr("garbage".to_string()))
        );

        let closed = match_rule(&rule, &policy(), UnparsableCidr::FailClosed);
        assert!(closed.violation);
        assert!(closed.parse_error.is_some());
    }

    #[test]
    fn unparsable_cidr_mode_from_str() {
        assert_eq!("fail-open".parse::<UnparsableCidr>().unwrap(), UnparsableCidr::FailOpen);
        assert_eq!("Closed".parse::<UnparsableCidr>().unwrap(), UnparsableCidr::FailClosed);
        assert!("maybe".parse::<UnparsableCidr>().is_err());
    }
}
