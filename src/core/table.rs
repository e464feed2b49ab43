//! Table and chain descriptors

use serde::{Deserialize, Serialize};

/// Address family a table is registered under
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
pub enum TableFamily {
    #[default]
    #[serde(rename = "inet")]
    #[strum(serialize = "inet")]
    Inet,
    #[serde(rename = "ip", alias = "ipv4")]
    #[strum(to_string = "ip", serialize = "ipv4")]
    Ip,
    #[serde(rename = "ip6", alias = "ipv6")]
    #[strum(to_string = "ip6", serialize = "ipv6")]
    Ip6,
    #[serde(rename = "bridge")]
    #[strum(serialize = "bridge")]
    Bridge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub family: TableFamily,
}

impl Table {
    pub fn new(name: impl Into<String>, family: TableFamily) -> Self {
        Self {
            name: name.into(),
            family,
        }
    }
}

/// Netfilter hook a base chain is attached to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChainHook {
    Input,
    Output,
    Forward,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChainType {
    Filter,
    Route,
    Nat,
}

/// Default verdict of a base chain
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChainPolicy {
    Accept,
    Drop,
}

/// A chain within a table
///
/// Base chains carry a hook, type and policy. A chain without them is a
/// regular chain, reachable only through jump/goto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub table: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook: Option<ChainHook>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub chain_type: Option<ChainType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ChainPolicy>,
}

impl Chain {
    pub fn regular(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            hook: None,
            chain_type: None,
            policy: None,
        }
    }

    pub fn base(
        table: impl Into<String>,
        name: impl Into<String>,
        hook: ChainHook,
        chain_type: ChainType,
        policy: ChainPolicy,
    ) -> Self {
        Self {
            hook: Some(hook),
            chain_type: Some(chain_type),
            policy: Some(policy),
            ..Self::regular(table, name)
        }
    }

    pub fn is_base(&self) -> bool {
        self.hook.is_some()
    }
}
