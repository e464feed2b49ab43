//! Low-level match primitives
//!
//! A compiled rule is an ordered `Vec<Primitive>`. Each primitive is one
//! instruction of the kernel classification engine: select a field, test it,
//! or emit a verdict. Register plumbing is left to the transport, so the
//! primitives here only carry the data that distinguishes one match from
//! another.
//!
//! Field selectors ([`Primitive::FamilySelect`], [`Primitive::TransportProtoSelect`],
//! [`Primitive::PayloadField`], [`Primitive::ConnState`]) load a value; the value
//! primitives that follow ([`Primitive::Compare`], [`Primitive::Mask`],
//! [`Primitive::Range`], [`Primitive::Lookup`]) test it.

use serde::{Deserialize, Serialize};

/// Netfilter protocol family numbers (`meta nfproto`)
pub const NFPROTO_IPV4: u8 = 2;
pub const NFPROTO_IPV6: u8 = 10;

/// IP protocol numbers (`meta l4proto`)
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ICMPV6: u8 = 58;

/// `(offset, len)` of the address fields within the network header
pub const IPV4_SADDR: (u32, u32) = (12, 4);
pub const IPV4_DADDR: (u32, u32) = (16, 4);
pub const IPV6_SADDR: (u32, u32) = (8, 16);
pub const IPV6_DADDR: (u32, u32) = (24, 16);

/// `(offset, len)` of the port fields within the transport header
pub const L4_SPORT: (u32, u32) = (0, 2);
pub const L4_DPORT: (u32, u32) = (2, 2);

/// Header a payload field is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadBase {
    LinkHeader,
    NetworkHeader,
    TransportHeader,
}

/// Comparison operator of a [`Primitive::Compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Terminal verdict kinds understood by the engine
///
/// Only accept/drop/jump/goto map onto a rule action; the rest are listed so
/// that rules written by other tools still decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictKind {
    Accept,
    Drop,
    Jump,
    Goto,
    Return,
    Continue,
    Break,
}

/// One instruction of a compiled rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Primitive {
    /// Load the packet's protocol family (`meta nfproto`)
    FamilySelect,
    /// Load the packet's transport protocol (`meta l4proto`)
    TransportProtoSelect,
    /// Load `len` bytes at `offset` within `base`
    PayloadField {
        base: PayloadBase,
        offset: u32,
        len: u32,
    },
    /// Compare the loaded value against `data`
    Compare { cmp: CmpOp, data: Vec<u8> },
    /// `value = (value & mask) ^ xor`
    Mask { mask: Vec<u8>, xor: Vec<u8> },
    /// Inclusive range test `from <= value <= to`
    Range { from: Vec<u8>, to: Vec<u8> },
    /// Membership test against a named set
    Lookup { set: String },
    /// Load the connection-tracking state bits
    ConnState,
    /// Terminal action, with the target chain for jump/goto
    Verdict {
        kind: VerdictKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain: Option<String>,
    },
    /// Anything the codec does not model (counters, logging, nat, ...)
    Unknown { name: String },
}

impl Primitive {
    pub fn payload(base: PayloadBase, (offset, len): (u32, u32)) -> Self {
        Self::PayloadField { base, offset, len }
    }

    pub fn equals(data: impl Into<Vec<u8>>) -> Self {
        Self::Compare {
            cmp: CmpOp::Eq,
            data: data.into(),
        }
    }

    /// Short name used in logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FamilySelect => "meta nfproto",
            Self::TransportProtoSelect => "meta l4proto",
            Self::PayloadField { .. } => "payload",
            Self::Compare { .. } => "cmp",
            Self::Mask { .. } => "bitwise",
            Self::Range { .. } => "range",
            Self::Lookup { .. } => "lookup",
            Self::ConnState => "ct state",
            Self::Verdict { .. } => "verdict",
            Self::Unknown { .. } => "unknown",
        }
    }
}
