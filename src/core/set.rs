//! Named sets and their wire elements
//!
//! A [`Set`] holds element descriptors in the rule grammar (minus the set
//! name form). On the wire every element becomes one or two [`SetElement`]
//! keys:
//!
//! - **plain sets** carry one key per element, in reverse input order;
//! - **interval sets** carry half-open `[start, next)` pairs, emitted as
//!   `(next, end) (start, !end)` in reverse input order. A freshly created,
//!   non-empty interval set is preceded by a zero-valued end sentinel.
//!
//! # Example
//!
//! ```
//! use nftcodec::core::set::{Set, SetDatatype};
//!
//! let set = Set::new("blocked", SetDatatype::Ipv4)
//!     .with_interval(true)
//!     .with_elements(["192.168.1.0/24", "10.0.0.1-10.0.0.5"]);
//!
//! let wire = set.to_wire().unwrap();
//! assert_eq!(wire.len(), 5);
//!
//! let decoded = Set::from_wire("blocked", SetDatatype::Ipv4, true, &wire).unwrap();
//! assert_eq!(decoded.elements, set.elements);
//! ```

use crate::core::addr::{
    bytes_to_ip, decrement, increment, infer_prefix_len, ip_bytes, network_bounds,
};
use crate::core::error::{Error, Result};
use crate::core::rule::L3Proto;
use crate::core::rule_expr::{parse_port, parse_port_range};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, trace};

const FIELD: &str = "set element";

/// Key type of a set's elements
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SetDatatype {
    Ipv4,
    Ipv6,
    Port,
}

impl SetDatatype {
    /// Kernel key type identifiers (`TYPE_IPADDR`, `TYPE_IP6ADDR`, `TYPE_INET_SERVICE`)
    const MAGIC_IPV4: u32 = 7;
    const MAGIC_IPV6: u32 = 8;
    const MAGIC_PORT: u32 = 13;

    pub const fn key_len(self) -> usize {
        match self {
            SetDatatype::Ipv4 => 4,
            SetDatatype::Ipv6 => 16,
            SetDatatype::Port => 2,
        }
    }

    pub const fn magic(self) -> u32 {
        match self {
            SetDatatype::Ipv4 => Self::MAGIC_IPV4,
            SetDatatype::Ipv6 => Self::MAGIC_IPV6,
            SetDatatype::Port => Self::MAGIC_PORT,
        }
    }

    /// Maps a kernel key type back to a datatype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDatatype`] for any other key type.
    pub fn from_magic(magic: u32) -> Result<Self> {
        match magic {
            Self::MAGIC_IPV4 => Ok(SetDatatype::Ipv4),
            Self::MAGIC_IPV6 => Ok(SetDatatype::Ipv6),
            Self::MAGIC_PORT => Ok(SetDatatype::Port),
            other => Err(Error::UnsupportedDatatype(format!("key type {other}"))),
        }
    }

    /// Parses a datatype name, reporting unknown names as unsupported.
    pub fn parse(name: &str) -> Result<Self> {
        name.parse()
            .map_err(|_| Error::UnsupportedDatatype(name.to_string()))
    }

    /// Address family of address datatypes
    pub const fn family(self) -> Option<L3Proto> {
        match self {
            SetDatatype::Ipv4 => Some(L3Proto::Ipv4),
            SetDatatype::Ipv6 => Some(L3Proto::Ipv6),
            SetDatatype::Port => None,
        }
    }
}

/// One wire entry of a set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetElement {
    /// Big-endian key bytes
    pub key: Vec<u8>,
    /// Marks the exclusive end of an interval
    #[serde(default)]
    pub interval_end: bool,
}

impl SetElement {
    pub fn start(key: Vec<u8>) -> Self {
        Self {
            key,
            interval_end: false,
        }
    }

    pub fn end(key: Vec<u8>) -> Self {
        Self {
            key,
            interval_end: true,
        }
    }

    /// Zero-valued end marker that leads a newly created interval set
    pub fn sentinel(datatype: SetDatatype) -> Self {
        Self::end(vec![0; datatype.key_len()])
    }

    /// Matches the sentinel's value. The end of an interval reaching the top
    /// of the key space has the same bytes, so position decides which it is.
    pub(crate) fn is_sentinel(&self) -> bool {
        self.interval_end && self.key.iter().all(|b| *b == 0)
    }
}

/// Whether `entries` is a run of `(end, start)` pairs.
pub(crate) fn pairs_cleanly(entries: &[SetElement]) -> bool {
    entries.len() % 2 == 0
        && entries
            .chunks_exact(2)
            .all(|pair| pair[0].interval_end && !pair[1].interval_end)
}

/// Declarative description of a named set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Set {
    pub name: String,
    pub datatype: SetDatatype,
    #[serde(default)]
    pub interval: bool,
    #[serde(default)]
    pub elements: Vec<String>,
}

impl Set {
    pub fn new(name: impl Into<String>, datatype: SetDatatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            interval: false,
            elements: Vec::new(),
        }
    }

    pub fn with_interval(mut self, interval: bool) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.elements = elements.into_iter().map(Into::into).collect();
        self
    }

    /// Wire elements for creating the set. A non-empty interval set is led
    /// by the sentinel.
    pub fn to_wire(&self) -> Result<Vec<SetElement>> {
        let mut wire = Vec::with_capacity(self.elements.len() * 2 + 1);
        if self.interval && !self.elements.is_empty() {
            wire.push(SetElement::sentinel(self.datatype));
        }
        wire.extend(encode_elements(self.datatype, self.interval, &self.elements)?);
        Ok(wire)
    }

    /// Rebuilds a set from listed wire elements.
    pub fn from_wire(
        name: impl Into<String>,
        datatype: SetDatatype,
        interval: bool,
        wire: &[SetElement],
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            datatype,
            interval,
            elements: decode_elements(datatype, interval, wire)?,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Encoding
// ═══════════════════════════════════════════════════════════════════════════

fn parse_address(s: &str, family: L3Proto) -> Result<IpAddr> {
    s.parse::<IpAddr>()
        .ok()
        .filter(|ip| L3Proto::of(ip) == family)
        .ok_or_else(|| Error::format(FIELD, s))
}

/// Resolves an address descriptor to its half-open `[start, next)` bounds.
fn address_bounds(descriptor: &str, family: L3Proto) -> Result<(Vec<u8>, Vec<u8>)> {
    if descriptor.contains('/') {
        let network: IpNetwork = descriptor
            .parse()
            .map_err(|_| Error::format(FIELD, descriptor))?;
        if L3Proto::of(&network.ip()) != family {
            return Err(Error::format(FIELD, descriptor));
        }
        return Ok(network_bounds(&ip_bytes(network.ip()), network.prefix()));
    }

    if let Some((a, b)) = descriptor.split_once('-') {
        let start = parse_address(a, family).map_err(|_| Error::format(FIELD, descriptor))?;
        let end = parse_address(b, family).map_err(|_| Error::format(FIELD, descriptor))?;
        if end < start {
            return Err(Error::InvertedRange {
                value: descriptor.to_string(),
            });
        }
        return Ok((ip_bytes(start), increment(&ip_bytes(end))));
    }

    let addr = ip_bytes(parse_address(descriptor, family)?);
    let next = increment(&addr);
    Ok((addr, next))
}

/// Resolves a port descriptor to its half-open `[start, next)` bounds.
fn port_bounds(descriptor: &str) -> Result<(u16, u16)> {
    if descriptor.contains('-') {
        let (start, end) = parse_port_range(descriptor, FIELD)?;
        return Ok((start, end.wrapping_add(1)));
    }
    let port = parse_port(descriptor).ok_or_else(|| Error::format(FIELD, descriptor))?;
    Ok((port, port.wrapping_add(1)))
}

/// Key of a plain (non-interval) element. Ranges and networks are rejected.
fn literal_key(descriptor: &str, datatype: SetDatatype) -> Result<Vec<u8>> {
    match datatype.family() {
        Some(family) => Ok(ip_bytes(parse_address(descriptor, family)?)),
        None => parse_port(descriptor)
            .map(|p| p.to_be_bytes().to_vec())
            .ok_or_else(|| Error::format(FIELD, descriptor)),
    }
}

/// Encodes element descriptors without the creation sentinel.
///
/// This is the form used when adding to or removing from an existing set.
///
/// # Errors
///
/// Fails on the first descriptor that does not fit the datatype; no elements
/// are returned in that case.
pub fn encode_elements<S: AsRef<str>>(
    datatype: SetDatatype,
    interval: bool,
    elements: &[S],
) -> Result<Vec<SetElement>> {
    let mut wire = Vec::with_capacity(elements.len() * if interval { 2 } else { 1 });

    for descriptor in elements.iter().rev() {
        let descriptor = descriptor.as_ref();
        if !interval {
            wire.push(SetElement::start(literal_key(descriptor, datatype)?));
            continue;
        }
        let (start, next) = match datatype.family() {
            Some(family) => address_bounds(descriptor, family)?,
            None => {
                let (start, next) = port_bounds(descriptor)?;
                (start.to_be_bytes().to_vec(), next.to_be_bytes().to_vec())
            }
        };
        trace!("{descriptor} -> [{start:?}, {next:?})");
        wire.push(SetElement::end(next));
        wire.push(SetElement::start(start));
    }

    debug!(
        "Encoded {} {datatype} elements into {} entries",
        elements.len(),
        wire.len()
    );
    Ok(wire)
}

// ═══════════════════════════════════════════════════════════════════════════
// Decoding
// ═══════════════════════════════════════════════════════════════════════════

fn check_key(element: &SetElement, datatype: SetDatatype) -> Result<()> {
    if element.key.len() == datatype.key_len() {
        Ok(())
    } else {
        Err(Error::Malformed(format!(
            "{datatype} set key of {} bytes",
            element.key.len()
        )))
    }
}

fn render_key(key: &[u8], datatype: SetDatatype) -> Result<String> {
    match datatype.family() {
        Some(_) => Ok(bytes_to_ip(key)?.to_string()),
        None => {
            let port: [u8; 2] = key
                .try_into()
                .map_err(|_| Error::Malformed(format!("port key of {} bytes", key.len())))?;
            Ok(u16::from_be_bytes(port).to_string())
        }
    }
}

/// Renders one `[start, next)` pair as a literal, CIDR or inclusive range.
fn render_interval(start: &[u8], next: &[u8], datatype: SetDatatype) -> Result<String> {
    let last = decrement(next);
    if start == last.as_slice() {
        return render_key(start, datatype);
    }
    if datatype.family().is_some()
        && let Some(prefix) = infer_prefix_len(start, next)
    {
        return Ok(format!("{}/{prefix}", render_key(start, datatype)?));
    }
    // Same-length big-endian keys compare like the numbers they encode.
    if start > last.as_slice() {
        return Err(Error::Malformed(format!(
            "interval [{}, {}) is empty",
            render_key(start, datatype)?,
            render_key(next, datatype)?
        )));
    }
    Ok(format!(
        "{}-{}",
        render_key(start, datatype)?,
        render_key(&last, datatype)?
    ))
}

/// Drops the sentinel from an odd-length interval list, returning the index
/// of the first remaining entry and the entries themselves.
///
/// The leading position is tried first. A wrapped end key looks like the
/// sentinel, so a candidate only wins if the rest pairs up.
fn strip_sentinel(wire: &[SetElement]) -> Result<(usize, &[SetElement])> {
    if wire.len() % 2 == 0 {
        return Ok((0, wire));
    }
    let leading = match wire {
        [first, rest @ ..] if first.is_sentinel() => Some(rest),
        _ => None,
    };
    let trailing = match wire {
        [rest @ .., last] if last.is_sentinel() => Some(rest),
        _ => None,
    };
    match (leading, trailing) {
        (Some(rest), _) if pairs_cleanly(rest) => Ok((1, rest)),
        (_, Some(rest)) if pairs_cleanly(rest) => Ok((0, rest)),
        // Neither pairs up; the pairing loop reports the offending entry.
        (Some(rest), _) => Ok((1, rest)),
        (None, Some(rest)) => Ok((0, rest)),
        (None, None) => Err(Error::BoundaryParity {
            index: wire.len() - 1,
        }),
    }
}

/// Decodes listed wire elements back into descriptors, in input order.
///
/// Interval lists may carry the creation sentinel at either end; it is
/// dropped before pairing.
///
/// # Errors
///
/// Returns [`Error::BoundaryParity`] when interval entries are not
/// `(end, start)` pairs, and [`Error::Malformed`] for keys of the wrong length
/// or empty intervals.
pub fn decode_elements(
    datatype: SetDatatype,
    interval: bool,
    wire: &[SetElement],
) -> Result<Vec<String>> {
    for element in wire {
        check_key(element, datatype)?;
    }

    if !interval {
        return wire
            .iter()
            .rev()
            .map(|e| render_key(&e.key, datatype))
            .collect();
    }

    let (offset, entries) = strip_sentinel(wire)?;
    let mut elements = Vec::with_capacity(entries.len() / 2);
    for (pair_index, pair) in entries.chunks_exact(2).enumerate().rev() {
        let (next, start) = (&pair[0], &pair[1]);
        if !next.interval_end {
            return Err(Error::BoundaryParity {
                index: offset + pair_index * 2,
            });
        }
        if start.interval_end {
            return Err(Error::BoundaryParity {
                index: offset + pair_index * 2 + 1,
            });
        }
        elements.push(render_interval(&start.key, &next.key, datatype)?);
    }

    debug!(
        "Decoded {} {datatype} entries into {} elements",
        wire.len(),
        elements.len()
    );
    Ok(elements)
}
