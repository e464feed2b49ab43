//! Declarative rule description
//!
//! A [`Rule`] is the human-oriented form of one nftables rule: protocol
//! family, address and port descriptors, conntrack states and a terminal
//! action. Address and port descriptors use the textual grammar
//!
//! - address: `addr` | `addr1-addr2` | `addr/prefixlen` | `setname`
//! - port: `port` | `port1-port2` | `setname`
//!
//! where a set name contains none of `./-: `.
//!
//! # Example
//!
//! ```
//! use nftcodec::core::rule::{Direction, L4Proto, Rule};
//!
//! let mut rule = Rule::default();
//! rule.set_l3_ip("10.0.0.1".parse().unwrap(), Direction::Src)
//!     .set_l4_proto(L4Proto::Tcp)
//!     .set_l4_port(22, Direction::Dst)
//!     .accept();
//!
//! assert_eq!(rule.src_ip.as_deref(), Some("10.0.0.1"));
//! assert_eq!(rule.dst_port.as_deref(), Some("22"));
//! ```

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// L3 protocol family of the rule's address matches
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum L3Proto {
    #[serde(rename = "ipv4")]
    #[strum(serialize = "ipv4")]
    Ipv4,
    #[serde(rename = "ipv6")]
    #[strum(serialize = "ipv6")]
    Ipv6,
}

impl L3Proto {
    /// Length in bytes of an address of this family
    pub const fn addr_len(self) -> usize {
        match self {
            L3Proto::Ipv4 => 4,
            L3Proto::Ipv6 => 16,
        }
    }

    pub const fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => L3Proto::Ipv4,
            IpAddr::V6(_) => L3Proto::Ipv6,
        }
    }
}

/// L4 protocol of the rule
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum L4Proto {
    #[serde(rename = "tcp")]
    #[strum(serialize = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    #[strum(serialize = "udp")]
    Udp,
    #[serde(rename = "icmp", alias = "icmp4")]
    #[strum(to_string = "icmp", serialize = "icmp4")]
    Icmp,
    #[serde(rename = "icmp6")]
    #[strum(serialize = "icmp6")]
    Icmp6,
}

impl L4Proto {
    /// Only TCP and UDP carry ports
    pub const fn has_ports(self) -> bool {
        matches!(self, L4Proto::Tcp | L4Proto::Udp)
    }
}

/// Connection-tracking states recognized by the codec
///
/// Declaration order is the canonical order used when decoding.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CtState {
    Invalid,
    Established,
    Related,
    New,
    Untracked,
}

impl CtState {
    /// Kernel state bit (`NF_CT_STATE_*`)
    pub const fn bit(self) -> u32 {
        match self {
            CtState::Invalid => 1,
            CtState::Established => 2,
            CtState::Related => 4,
            CtState::New => 8,
            CtState::Untracked => 64,
        }
    }
}

/// Terminal action of a rule
///
/// Jump and goto carry the destination chain, so a jump without a target
/// cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Accept,
    Drop,
    Jump(String),
    Goto(String),
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Drop => "drop",
            Action::Jump(_) => "jump",
            Action::Goto(_) => "goto",
        }
    }

    /// Destination chain of jump/goto
    pub fn chain(&self) -> Option<&str> {
        match self {
            Action::Jump(chain) | Action::Goto(chain) => Some(chain),
            Action::Accept | Action::Drop => None,
        }
    }

    /// Builds an action from its name and optional destination chain.
    ///
    /// # Errors
    ///
    /// Returns `Err` for an unknown name or a jump/goto without a chain.
    pub fn parse(name: &str, chain: Option<&str>) -> Result<Self> {
        let target = || {
            chain
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .ok_or_else(|| Error::format("action", format!("{name} without destination chain")))
        };
        match name {
            "accept" => Ok(Action::Accept),
            "drop" => Ok(Action::Drop),
            "jump" => Ok(Action::Jump(target()?)),
            "goto" => Ok(Action::Goto(target()?)),
            other => Err(Error::format("action", other)),
        }
    }
}

/// Which end of the flow a match applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Src,
    Dst,
}

/// Declarative description of one rule
///
/// Serializes with the flat field layout of the listing API: the action is
/// split into `action` and `dst_chain`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleRepr", into = "RuleRepr")]
pub struct Rule {
    /// Position within the chain, assigned by the transport
    pub index: Option<u64>,
    /// Kernel handle, assigned by the transport
    pub handle: Option<u64>,
    pub l3proto: Option<L3Proto>,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub l4proto: Option<L4Proto>,
    pub src_port: Option<String>,
    pub dst_port: Option<String>,
    pub ct_states: Vec<CtState>,
    pub action: Option<Action>,
}

impl Rule {
    pub fn set_l3_proto(&mut self, proto: L3Proto) -> &mut Self {
        self.l3proto = Some(proto);
        self
    }

    fn l3_slot(&mut self, dir: Direction) -> &mut Option<String> {
        match dir {
            Direction::Src => &mut self.src_ip,
            Direction::Dst => &mut self.dst_ip,
        }
    }

    fn l4_slot(&mut self, dir: Direction) -> &mut Option<String> {
        match dir {
            Direction::Src => &mut self.src_port,
            Direction::Dst => &mut self.dst_port,
        }
    }

    /// Matches a single address; the family follows the address.
    pub fn set_l3_ip(&mut self, ip: IpAddr, dir: Direction) -> &mut Self {
        self.l3proto = Some(L3Proto::of(&ip));
        *self.l3_slot(dir) = Some(ip.to_string());
        self
    }

    /// Matches an inclusive address range. Mixed families are written as
    /// given and rejected when the rule is compiled.
    pub fn set_l3_ip_range(&mut self, start: IpAddr, end: IpAddr, dir: Direction) -> &mut Self {
        self.l3proto = Some(if start.is_ipv4() && end.is_ipv4() {
            L3Proto::Ipv4
        } else {
            L3Proto::Ipv6
        });
        *self.l3_slot(dir) = Some(format!("{start}-{end}"));
        self
    }

    /// Matches a network. A prefix longer than the family allows leaves the
    /// family unset, so compiling the rule fails.
    pub fn set_l3_ip_cidr(&mut self, ip: IpAddr, prefix_len: u8, dir: Direction) -> &mut Self {
        let proto = L3Proto::of(&ip);
        if usize::from(prefix_len) <= proto.addr_len() * 8 {
            self.l3proto = Some(proto);
        }
        *self.l3_slot(dir) = Some(format!("{ip}/{prefix_len}"));
        self
    }

    /// Matches membership in a named address set.
    pub fn set_l3_set(&mut self, name: &str, dir: Direction) -> &mut Self {
        *self.l3_slot(dir) = Some(name.to_string());
        self
    }

    pub fn set_l4_proto(&mut self, proto: L4Proto) -> &mut Self {
        self.l4proto = Some(proto);
        self
    }

    /// Matches a single port. Ignored until an L4 protocol is set.
    pub fn set_l4_port(&mut self, port: u16, dir: Direction) -> &mut Self {
        if self.l4proto.is_some() {
            *self.l4_slot(dir) = Some(port.to_string());
        }
        self
    }

    /// Matches an inclusive port range. Ignored until an L4 protocol is set
    /// or when `end <= start`.
    pub fn set_l4_port_range(&mut self, start: u16, end: u16, dir: Direction) -> &mut Self {
        if self.l4proto.is_some() && end > start {
            *self.l4_slot(dir) = Some(format!("{start}-{end}"));
        }
        self
    }

    /// Matches membership in a named port set.
    pub fn set_l4_set(&mut self, name: &str, dir: Direction) -> &mut Self {
        *self.l4_slot(dir) = Some(name.to_string());
        self
    }

    /// Sets the conntrack states from their names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnrecognizedState`] for a name outside
    /// `invalid, established, related, new, untracked`.
    pub fn set_ct_states<S: AsRef<str>>(&mut self, names: &[S]) -> Result<&mut Self> {
        self.ct_states = names
            .iter()
            .map(|n| {
                n.as_ref()
                    .parse::<CtState>()
                    .map_err(|_| Error::UnrecognizedState(n.as_ref().to_string()))
            })
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn accept(&mut self) -> &mut Self {
        self.action = Some(Action::Accept);
        self
    }

    pub fn drop(&mut self) -> &mut Self {
        self.action = Some(Action::Drop);
        self
    }

    pub fn jump(&mut self, chain: &str) -> &mut Self {
        self.action = Some(Action::Jump(chain.to_string()));
        self
    }

    pub fn goto(&mut self, chain: &str) -> &mut Self {
        self.action = Some(Action::Goto(chain.to_string()));
        self
    }

    /// Same rule without the transport-assigned identity
    pub fn without_identity(&self) -> Self {
        Self {
            index: None,
            handle: None,
            ..self.clone()
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RuleRepr {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handle: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    l3proto: Option<L3Proto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    src_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dst_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    l4proto: Option<L4Proto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    src_port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dst_port: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ct_states: Vec<CtState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dst_chain: Option<String>,
}

impl TryFrom<RuleRepr> for Rule {
    type Error = Error;

    fn try_from(repr: RuleRepr) -> Result<Self> {
        let action = repr
            .action
            .as_deref()
            .map(|name| Action::parse(name, repr.dst_chain.as_deref()))
            .transpose()?;
        Ok(Rule {
            index: repr.index,
            handle: repr.handle,
            l3proto: repr.l3proto,
            src_ip: repr.src_ip,
            dst_ip: repr.dst_ip,
            l4proto: repr.l4proto,
            src_port: repr.src_port,
            dst_port: repr.dst_port,
            ct_states: repr.ct_states,
            action,
        })
    }
}

impl From<Rule> for RuleRepr {
    fn from(rule: Rule) -> Self {
        RuleRepr {
            index: rule.index,
            handle: rule.handle,
            l3proto: rule.l3proto,
            src_ip: rule.src_ip,
            dst_ip: rule.dst_ip,
            l4proto: rule.l4proto,
            src_port: rule.src_port,
            dst_port: rule.dst_port,
            ct_states: rule.ct_states,
            dst_chain: rule
                .action
                .as_ref()
                .and_then(Action::chain)
                .map(str::to_string),
            action: rule.action.as_ref().map(|a| a.as_str().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_l3_ip_infers_family() {
        let mut rule = Rule::default();
        rule.set_l3_ip("ffee::1".parse().unwrap(), Direction::Dst);
        assert_eq!(rule.l3proto, Some(L3Proto::Ipv6));
        assert_eq!(rule.dst_ip.as_deref(), Some("ffee::1"));
        assert!(rule.src_ip.is_none());
    }

    #[test]
    fn test_set_l3_ip_cidr_rejects_long_prefix() {
        let mut rule = Rule::default();
        rule.set_l3_ip_cidr("10.0.0.0".parse().unwrap(), 40, Direction::Src);
        assert_eq!(rule.l3proto, None);

        rule.set_l3_ip_cidr("10.0.0.0".parse().unwrap(), 8, Direction::Src);
        assert_eq!(rule.l3proto, Some(L3Proto::Ipv4));
        assert_eq!(rule.src_ip.as_deref(), Some("10.0.0.0/8"));
    }

    #[test]
    fn test_port_setters_need_l4_proto() {
        let mut rule = Rule::default();
        rule.set_l4_port(80, Direction::Dst);
        assert!(rule.dst_port.is_none());

        rule.set_l4_proto(L4Proto::Udp)
            .set_l4_port_range(53, 53, Direction::Dst);
        assert!(rule.dst_port.is_none());

        rule.set_l4_port_range(1000, 2000, Direction::Src);
        assert_eq!(rule.src_port.as_deref(), Some("1000-2000"));
    }

    #[test]
    fn test_set_ct_states() {
        let mut rule = Rule::default();
        rule.set_ct_states(&["established", "related"]).unwrap();
        assert_eq!(rule.ct_states, vec![CtState::Established, CtState::Related]);

        let err = rule.set_ct_states(&["bogus"]).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedState(name) if name == "bogus"));
    }

    #[test]
    fn test_icmp4_alias() {
        assert_eq!("icmp4".parse::<L4Proto>().unwrap(), L4Proto::Icmp);
        assert_eq!(L4Proto::Icmp.to_string(), "icmp");
        let proto: L4Proto = serde_json::from_str("\"icmp4\"").unwrap();
        assert_eq!(proto, L4Proto::Icmp);
    }

    #[test]
    fn test_json_layout() {
        let mut rule = Rule::default();
        rule.set_l3_proto(L3Proto::Ipv4).jump("other");
        rule.handle = Some(7);
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["l3proto"], "ipv4");
        assert_eq!(json["action"], "jump");
        assert_eq!(json["dst_chain"], "other");
        assert_eq!(json["handle"], 7);
        assert!(json.get("src_ip").is_none());

        let back: Rule = serde_json::from_value(json).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn test_json_jump_without_chain_rejected() {
        let result: std::result::Result<Rule, _> =
            serde_json::from_str(r#"{"l3proto":"ipv4","action":"goto"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(Action::parse("drop", None).unwrap(), Action::Drop);
        assert_eq!(
            Action::parse("goto", Some("c1")).unwrap(),
            Action::Goto("c1".into())
        );
        assert!(Action::parse("reject", None).is_err());
        assert!(Action::parse("jump", Some("")).is_err());
    }
}
