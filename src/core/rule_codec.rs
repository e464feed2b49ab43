//! Rule compilation and decompilation
//!
//! [`compile`] walks the rule's fields in a fixed order and concatenates the
//! primitives of each present field:
//!
//! 1. L3 family (`meta nfproto == ipv4|ipv6`)
//! 2. L3 source address
//! 3. L3 destination address
//! 4. L4 protocol (`meta l4proto == tcp|udp|icmp|icmp6`)
//! 5. L4 source port
//! 6. L4 destination port
//! 7. conntrack state
//! 8. verdict
//!
//! [`decompile`] scans a primitive sequence once, left to right. Field
//! selecting primitives move a [`Selector`]; value primitives are read
//! according to the current selector:
//!
//! | primitive                         | effect                                   |
//! |-----------------------------------|------------------------------------------|
//! | `FamilySelect`                    | selector = `L3Proto`                     |
//! | `TransportProtoSelect`            | selector = `L4Proto`                     |
//! | `PayloadField` network 12/4, 16/4 | selector = `L3SAddr` / `L3DAddr`         |
//! | `PayloadField` network 8/16, 24/16| selector = `L3SAddr6` / `L3DAddr6`       |
//! | `PayloadField` transport 0/2, 2/2 | selector = `L4SPort` / `L4DPort`         |
//! | other `PayloadField`              | selector = `None`                        |
//! | `ConnState`                       | selector = `CtState`                     |
//! | `Compare ==` under proto selector | set family / L4 protocol                 |
//! | `Mask` under address selector     | remember mask for the next `==`          |
//! | `Compare ==` under address/port   | literal, or CIDR when a mask is pending  |
//! | `Compare >=` / `<=`               | collect bounds, emit range once both set |
//! | `Range` under address/port        | range                                    |
//! | `Lookup` under address/port       | set name                                 |
//! | `Mask` under `CtState`            | state names from the mask bits           |
//! | `Verdict`                         | action                                   |
//!
//! Any other combination is skipped, so rules carrying primitives this codec
//! does not model (counters, logging, ...) still decode. Data that cannot be
//! read under a recognized selector is reported as [`Error::Malformed`].

use crate::core::addr::bytes_to_ip;
use crate::core::error::{Error, Result};
use crate::core::expr::{
    CmpOp, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP, IPV4_DADDR, IPV4_SADDR,
    IPV6_DADDR, IPV6_SADDR, L4_DPORT, L4_SPORT, NFPROTO_IPV4, NFPROTO_IPV6, PayloadBase,
    Primitive,
};
use crate::core::rule::{L3Proto, L4Proto, Rule};
use crate::core::rule_expr::{
    decode_ct_mask, decode_verdict, encode_address, encode_ct_states, encode_port, encode_verdict,
};
use std::net::IpAddr;
use tracing::{debug, trace};

const fn nfproto(family: L3Proto) -> u8 {
    match family {
        L3Proto::Ipv4 => NFPROTO_IPV4,
        L3Proto::Ipv6 => NFPROTO_IPV6,
    }
}

const fn ipproto(proto: L4Proto) -> u8 {
    match proto {
        L4Proto::Tcp => IPPROTO_TCP,
        L4Proto::Udp => IPPROTO_UDP,
        L4Proto::Icmp => IPPROTO_ICMP,
        L4Proto::Icmp6 => IPPROTO_ICMPV6,
    }
}

/// Compiles a rule into its ordered primitive sequence.
///
/// # Errors
///
/// Fails on the first field that cannot be encoded; nothing is emitted for a
/// rule that fails. An address without `l3proto`, or a port without a TCP or
/// UDP `l4proto`, is [`Error::MissingProtocol`].
pub fn compile(rule: &Rule) -> Result<Vec<Primitive>> {
    let mut out = Vec::with_capacity(16);

    if let Some(family) = rule.l3proto {
        out.push(Primitive::FamilySelect);
        out.push(Primitive::equals([nfproto(family)]));
    }

    let addresses = [
        (&rule.src_ip, "source address", IPV4_SADDR, IPV6_SADDR),
        (&rule.dst_ip, "destination address", IPV4_DADDR, IPV6_DADDR),
    ];
    for (descriptor, name, v4_field, v6_field) in addresses {
        let Some(descriptor) = descriptor else {
            continue;
        };
        let family = rule.l3proto.ok_or(Error::MissingProtocol {
            field: name,
            requires: "l3proto",
        })?;
        let field = match family {
            L3Proto::Ipv4 => v4_field,
            L3Proto::Ipv6 => v6_field,
        };
        out.extend(encode_address(descriptor, family, field, name)?);
    }

    if let Some(proto) = rule.l4proto {
        out.push(Primitive::TransportProtoSelect);
        out.push(Primitive::equals([ipproto(proto)]));
    }

    let ports = [
        (&rule.src_port, "source port", L4_SPORT),
        (&rule.dst_port, "destination port", L4_DPORT),
    ];
    for (descriptor, name, field) in ports {
        let Some(descriptor) = descriptor else {
            continue;
        };
        if !rule.l4proto.is_some_and(L4Proto::has_ports) {
            return Err(Error::MissingProtocol {
                field: name,
                requires: "tcp or udp",
            });
        }
        out.extend(encode_port(descriptor, field, name)?);
    }

    if !rule.ct_states.is_empty() {
        out.extend(encode_ct_states(&rule.ct_states)?);
    }

    if let Some(action) = &rule.action {
        out.push(encode_verdict(action));
    }

    debug!("Compiled rule into {} primitives", out.len());
    Ok(out)
}

/// Which rule field the next value primitive refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    None,
    L3Proto,
    L4Proto,
    L3SAddr,
    L3DAddr,
    L3SAddr6,
    L3DAddr6,
    L4SPort,
    L4DPort,
    CtState,
}

impl Selector {
    fn from_payload(base: PayloadBase, offset: u32, len: u32) -> Self {
        match (base, (offset, len)) {
            (PayloadBase::NetworkHeader, IPV4_SADDR) => Selector::L3SAddr,
            (PayloadBase::NetworkHeader, IPV4_DADDR) => Selector::L3DAddr,
            (PayloadBase::NetworkHeader, IPV6_SADDR) => Selector::L3SAddr6,
            (PayloadBase::NetworkHeader, IPV6_DADDR) => Selector::L3DAddr6,
            (PayloadBase::TransportHeader, L4_SPORT) => Selector::L4SPort,
            (PayloadBase::TransportHeader, L4_DPORT) => Selector::L4DPort,
            _ => Selector::None,
        }
    }

    /// Family of an address selector
    const fn address_family(self) -> Option<L3Proto> {
        match self {
            Selector::L3SAddr | Selector::L3DAddr => Some(L3Proto::Ipv4),
            Selector::L3SAddr6 | Selector::L3DAddr6 => Some(L3Proto::Ipv6),
            _ => None,
        }
    }

    const fn is_port(self) -> bool {
        matches!(self, Selector::L4SPort | Selector::L4DPort)
    }
}

/// Decoder state carried across primitives
struct Decoder {
    rule: Rule,
    selector: Selector,
    pending_mask: Option<Vec<u8>>,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
}

impl Decoder {
    fn new() -> Self {
        Self {
            rule: Rule::default(),
            selector: Selector::None,
            pending_mask: None,
            lower: None,
            upper: None,
        }
    }

    fn select(&mut self, selector: Selector) {
        self.selector = selector;
        self.pending_mask = None;
        self.lower = None;
        self.upper = None;
    }

    /// Field the current selector writes to
    fn slot(&mut self) -> Option<&mut Option<String>> {
        match self.selector {
            Selector::L3SAddr | Selector::L3SAddr6 => Some(&mut self.rule.src_ip),
            Selector::L3DAddr | Selector::L3DAddr6 => Some(&mut self.rule.dst_ip),
            Selector::L4SPort => Some(&mut self.rule.src_port),
            Selector::L4DPort => Some(&mut self.rule.dst_port),
            _ => None,
        }
    }

    fn assign(&mut self, value: String) {
        if let Some(family) = self.selector.address_family() {
            self.rule.l3proto.get_or_insert(family);
        }
        if let Some(slot) = self.slot() {
            *slot = Some(value);
        }
    }

    /// Renders a value under an address or port selector, checking its length.
    fn render(&self, data: &[u8]) -> Result<String> {
        if let Some(family) = self.selector.address_family() {
            if data.len() != family.addr_len() {
                return Err(Error::Malformed(format!(
                    "{} bytes under {:?}",
                    data.len(),
                    self.selector
                )));
            }
            return Ok(bytes_to_ip(data)?.to_string());
        }
        let port: [u8; 2] = data.try_into().map_err(|_| {
            Error::Malformed(format!("{} bytes under {:?}", data.len(), self.selector))
        })?;
        Ok(u16::from_be_bytes(port).to_string())
    }

    fn step(&mut self, primitive: &Primitive) -> Result<()> {
        let sel = self.selector;
        let is_value_field = sel.address_family().is_some() || sel.is_port();

        match primitive {
            Primitive::FamilySelect => self.select(Selector::L3Proto),
            Primitive::TransportProtoSelect => self.select(Selector::L4Proto),
            Primitive::PayloadField { base, offset, len } => {
                self.select(Selector::from_payload(*base, *offset, *len));
            }
            Primitive::ConnState => self.select(Selector::CtState),

            Primitive::Compare { cmp: CmpOp::Eq, data } if sel == Selector::L3Proto => {
                self.rule.l3proto = Some(match data.as_slice() {
                    [NFPROTO_IPV4] => L3Proto::Ipv4,
                    [NFPROTO_IPV6] => L3Proto::Ipv6,
                    other => {
                        return Err(Error::Malformed(format!("unsupported family {other:?}")));
                    }
                });
            }
            Primitive::Compare { cmp: CmpOp::Eq, data } if sel == Selector::L4Proto => {
                self.rule.l4proto = Some(match data.as_slice() {
                    [IPPROTO_TCP] => L4Proto::Tcp,
                    [IPPROTO_UDP] => L4Proto::Udp,
                    [IPPROTO_ICMP] => L4Proto::Icmp,
                    [IPPROTO_ICMPV6] => L4Proto::Icmp6,
                    other => {
                        return Err(Error::Malformed(format!(
                            "unsupported l4 protocol {other:?}"
                        )));
                    }
                });
            }
            Primitive::Compare { cmp, data } if is_value_field => match cmp {
                CmpOp::Eq => {
                    let value = self.render(data)?;
                    let value = match self.pending_mask.take() {
                        Some(mask) => format!("{value}/{}", mask_prefix_len(&mask)?),
                        None => value,
                    };
                    self.assign(value);
                }
                CmpOp::Gte => self.lower = Some(data.clone()),
                CmpOp::Lte => self.upper = Some(data.clone()),
                CmpOp::Neq | CmpOp::Lt | CmpOp::Gt => {
                    trace!("Skipping {cmp:?} comparison under {sel:?}");
                }
            },
            Primitive::Mask { mask, .. } if sel.address_family().is_some() => {
                self.pending_mask = Some(mask.clone());
            }
            Primitive::Mask { mask, .. } if sel == Selector::CtState => {
                let bits: [u8; 4] = mask.as_slice().try_into().map_err(|_| {
                    Error::Malformed(format!("conntrack mask of {} bytes", mask.len()))
                })?;
                self.rule.ct_states = decode_ct_mask(u32::from_ne_bytes(bits));
            }
            Primitive::Range { from, to } if is_value_field => {
                let value = format!("{}-{}", self.render(from)?, self.render(to)?);
                self.assign(value);
            }
            Primitive::Lookup { set } if is_value_field => self.assign(set.clone()),
            Primitive::Verdict { kind, chain } => {
                if let Some(action) = decode_verdict(*kind, chain.as_deref())? {
                    self.rule.action = Some(action);
                }
            }
            other => trace!("Skipping {} under {sel:?}", other.kind()),
        }

        if let (Some(lo), Some(hi)) = (&self.lower, &self.upper) {
            let value = format!("{}-{}", self.render(lo)?, self.render(hi)?);
            self.lower = None;
            self.upper = None;
            self.assign(value);
        }
        Ok(())
    }
}

/// Recovers the prefix length of a contiguous network mask.
fn mask_prefix_len(mask: &[u8]) -> Result<u8> {
    let prefix = match bytes_to_ip(mask)? {
        IpAddr::V4(m) => ipnetwork::ipv4_mask_to_prefix(m),
        IpAddr::V6(m) => ipnetwork::ipv6_mask_to_prefix(m),
    };
    prefix.map_err(|e| Error::Malformed(format!("address mask {mask:?}: {e}")))
}

/// Decompiles a primitive sequence back into a rule.
///
/// The returned rule has no index or handle; those come from the transport.
///
/// # Errors
///
/// Returns [`Error::Malformed`] when a recognized field carries data that
/// cannot be interpreted (wrong length, unknown family byte, non-contiguous
/// mask, jump without a chain). Unrecognized primitives are skipped.
pub fn decompile(primitives: &[Primitive]) -> Result<Rule> {
    let mut decoder = Decoder::new();
    for primitive in primitives {
        decoder.step(primitive)?;
    }
    debug!("Decompiled {} primitives", primitives.len());
    Ok(decoder.rule)
}

impl Rule {
    /// See [`compile`].
    pub fn to_primitives(&self) -> Result<Vec<Primitive>> {
        compile(self)
    }

    /// See [`decompile`].
    pub fn from_primitives(primitives: &[Primitive]) -> Result<Self> {
        decompile(primitives)
    }
}
