//! Field encoders for rule compilation
//!
//! Each function turns one rule field into the primitives that match it.
//! The decoding half lives in the rule codec's state machine, which needs to
//! see the whole primitive sequence.

use crate::core::addr::ip_bytes;
use crate::core::error::{Error, Result};
use crate::core::expr::{CmpOp, PayloadBase, Primitive, VerdictKind};
use crate::core::rule::{Action, CtState, L3Proto};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use tracing::trace;

/// Characters that can never appear in a set name
const NON_NAME_CHARS: &[char] = &['.', '/', '-', ':', ' '];

/// Returns `true` if `s` can only be read as a set name.
pub fn is_set_name(s: &str) -> bool {
    !s.is_empty() && !s.contains(NON_NAME_CHARS)
}

fn parse_family_ip(s: &str, family: L3Proto) -> Option<IpAddr> {
    s.parse::<IpAddr>()
        .ok()
        .filter(|ip| L3Proto::of(ip) == family)
}

/// Encodes an address descriptor matched at `(offset, len)` of the network
/// header.
///
/// # Errors
///
/// Returns [`Error::FormatMismatch`] when the descriptor is not a valid
/// address, range, CIDR or set name of `family`, and
/// [`Error::InvertedRange`] for a range ending before it starts.
pub fn encode_address(
    descriptor: &str,
    family: L3Proto,
    field: (u32, u32),
    field_name: &'static str,
) -> Result<Vec<Primitive>> {
    let load = Primitive::payload(PayloadBase::NetworkHeader, field);

    if descriptor.contains('/') {
        let network: IpNetwork = descriptor
            .parse()
            .map_err(|_| Error::format(field_name, descriptor))?;
        if L3Proto::of(&network.ip()) != family {
            return Err(Error::format(field_name, descriptor));
        }
        trace!("{field_name}: cidr {network}");
        return Ok(vec![
            load,
            Primitive::Mask {
                mask: ip_bytes(network.mask()),
                xor: vec![0; family.addr_len()],
            },
            Primitive::equals(ip_bytes(network.network())),
        ]);
    }

    if descriptor.contains('-') {
        let (start, end) = descriptor
            .split_once('-')
            .and_then(|(a, b)| Some((parse_family_ip(a, family)?, parse_family_ip(b, family)?)))
            .ok_or_else(|| Error::format(field_name, descriptor))?;
        if end < start {
            return Err(Error::InvertedRange {
                value: descriptor.to_string(),
            });
        }
        trace!("{field_name}: range {start}-{end}");
        return Ok(vec![
            load,
            Primitive::Range {
                from: ip_bytes(start),
                to: ip_bytes(end),
            },
        ]);
    }

    if let Ok(ip) = descriptor.parse::<IpAddr>() {
        if L3Proto::of(&ip) != family {
            return Err(Error::format(field_name, descriptor));
        }
        return Ok(vec![load, Primitive::equals(ip_bytes(ip))]);
    }

    if is_set_name(descriptor) {
        return Ok(vec![
            load,
            Primitive::Lookup {
                set: descriptor.to_string(),
            },
        ]);
    }

    Err(Error::format(field_name, descriptor))
}

/// Parses a port number, rejecting anything that is not a bare decimal u16.
pub(crate) fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parses `start-end` with `end > start`.
pub(crate) fn parse_port_range(descriptor: &str, field_name: &'static str) -> Result<(u16, u16)> {
    let (start, end) = descriptor
        .split_once('-')
        .and_then(|(a, b)| Some((parse_port(a)?, parse_port(b)?)))
        .ok_or_else(|| Error::format(field_name, descriptor))?;
    if end <= start {
        return Err(Error::InvertedRange {
            value: descriptor.to_string(),
        });
    }
    Ok((start, end))
}

/// Encodes a port descriptor matched at `(offset, 2)` of the transport
/// header.
///
/// # Errors
///
/// Returns [`Error::FormatMismatch`] for anything that is neither a port,
/// a range nor a set name, and [`Error::InvertedRange`] when `end <= start`.
pub fn encode_port(
    descriptor: &str,
    field: (u32, u32),
    field_name: &'static str,
) -> Result<Vec<Primitive>> {
    let load = Primitive::payload(PayloadBase::TransportHeader, field);

    if descriptor.contains('-') {
        let (start, end) = parse_port_range(descriptor, field_name)?;
        return Ok(vec![
            load,
            Primitive::Range {
                from: start.to_be_bytes().to_vec(),
                to: end.to_be_bytes().to_vec(),
            },
        ]);
    }

    if let Some(port) = parse_port(descriptor) {
        return Ok(vec![load, Primitive::equals(port.to_be_bytes())]);
    }

    // A number that does not fit in 16 bits is a bad port, not a set name.
    if descriptor.parse::<i128>().is_err() && is_set_name(descriptor) {
        return Ok(vec![
            load,
            Primitive::Lookup {
                set: descriptor.to_string(),
            },
        ]);
    }

    Err(Error::format(field_name, descriptor))
}

/// ORs the state bits together.
pub fn ct_state_mask(states: &[CtState]) -> u32 {
    states.iter().fold(0, |mask, s| mask | s.bit())
}

/// Encodes a conntrack state match: load the state, mask it, test non-zero.
///
/// # Errors
///
/// Returns [`Error::UnrecognizedState`] when the states produce an empty mask.
pub fn encode_ct_states(states: &[CtState]) -> Result<Vec<Primitive>> {
    let mask = ct_state_mask(states);
    if mask == 0 {
        return Err(Error::UnrecognizedState(format!("{states:?}")));
    }
    Ok(vec![
        Primitive::ConnState,
        Primitive::Mask {
            mask: mask.to_ne_bytes().to_vec(),
            xor: 0u32.to_ne_bytes().to_vec(),
        },
        Primitive::Compare {
            cmp: CmpOp::Neq,
            data: vec![0; 4],
        },
    ])
}

/// Decodes a state mask into names in canonical order. Unknown bits are
/// ignored.
pub fn decode_ct_mask(mask: u32) -> Vec<CtState> {
    use strum::IntoEnumIterator;
    CtState::iter().filter(|s| mask & s.bit() != 0).collect()
}

pub fn encode_verdict(action: &Action) -> Primitive {
    let (kind, chain) = match action {
        Action::Accept => (VerdictKind::Accept, None),
        Action::Drop => (VerdictKind::Drop, None),
        Action::Jump(chain) => (VerdictKind::Jump, Some(chain.clone())),
        Action::Goto(chain) => (VerdictKind::Goto, Some(chain.clone())),
    };
    Primitive::Verdict { kind, chain }
}

/// Maps a verdict back onto a rule action.
///
/// Verdict kinds without a rule action (return, continue, ...) yield
/// `Ok(None)`.
///
/// # Errors
///
/// Returns [`Error::Malformed`] for jump/goto without a destination chain.
pub fn decode_verdict(kind: VerdictKind, chain: Option<&str>) -> Result<Option<Action>> {
    let target = || {
        chain
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Malformed(format!("{kind:?} verdict without chain")))
    };
    Ok(match kind {
        VerdictKind::Accept => Some(Action::Accept),
        VerdictKind::Drop => Some(Action::Drop),
        VerdictKind::Jump => Some(Action::Jump(target()?)),
        VerdictKind::Goto => Some(Action::Goto(target()?)),
        VerdictKind::Return | VerdictKind::Continue | VerdictKind::Break => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expr::{IPV4_DADDR, IPV4_SADDR, IPV6_SADDR, L4_DPORT, L4_SPORT};

    #[test]
    fn test_is_set_name() {
        assert!(is_set_name("blocklist"));
        assert!(is_set_name("set_1"));
        assert!(!is_set_name("a.b"));
        assert!(!is_set_name("a-b"));
        assert!(!is_set_name("a b"));
        assert!(!is_set_name(""));
    }

    #[test]
    fn test_encode_ipv4_literal() {
        let p = encode_address("1.1.1.1", L3Proto::Ipv4, IPV4_DADDR, "dst").unwrap();
        assert_eq!(
            p,
            vec![
                Primitive::payload(PayloadBase::NetworkHeader, IPV4_DADDR),
                Primitive::equals(vec![1, 1, 1, 1]),
            ]
        );
    }

    #[test]
    fn test_encode_ipv4_cidr_uses_network_address() {
        let p = encode_address("192.168.1.77/24", L3Proto::Ipv4, IPV4_SADDR, "src").unwrap();
        assert_eq!(p.len(), 3);
        assert_eq!(
            p[1],
            Primitive::Mask {
                mask: vec![255, 255, 255, 0],
                xor: vec![0; 4]
            }
        );
        assert_eq!(p[2], Primitive::equals(vec![192, 168, 1, 0]));
    }

    #[test]
    fn test_encode_ipv6_range() {
        let p = encode_address("ff01::-ff01:efef::", L3Proto::Ipv6, IPV6_SADDR, "src").unwrap();
        match &p[1] {
            Primitive::Range { from, to } => {
                assert_eq!(from.len(), 16);
                assert_eq!(to[2..4], [0xef, 0xef]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_encode_address_family_mismatch() {
        assert!(matches!(
            encode_address("ffee::1", L3Proto::Ipv4, IPV4_SADDR, "src"),
            Err(Error::FormatMismatch { .. })
        ));
        assert!(matches!(
            encode_address("1.1.1.1-ffee::1", L3Proto::Ipv4, IPV4_SADDR, "src"),
            Err(Error::FormatMismatch { .. })
        ));
        assert!(matches!(
            encode_address("10.0.0.0/8", L3Proto::Ipv6, IPV6_SADDR, "src"),
            Err(Error::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_encode_address_rejects_garbage() {
        for bad in ["1.2.3", "1.1.1.1-", "1.1.1.1/33", "a b", "x-y-z"] {
            assert!(
                encode_address(bad, L3Proto::Ipv4, IPV4_SADDR, "src").is_err(),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn test_encode_address_inverted_range() {
        assert!(matches!(
            encode_address("10.0.0.9-10.0.0.1", L3Proto::Ipv4, IPV4_SADDR, "src"),
            Err(Error::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_encode_address_set_name() {
        let p = encode_address("blocked", L3Proto::Ipv4, IPV4_SADDR, "src").unwrap();
        assert_eq!(
            p[1],
            Primitive::Lookup {
                set: "blocked".into()
            }
        );
    }

    #[test]
    fn test_encode_port_forms() {
        let p = encode_port("3306", L4_DPORT, "dport").unwrap();
        assert_eq!(p[1], Primitive::equals(vec![0x0c, 0xea]));

        let p = encode_port("1000-2000", L4_SPORT, "sport").unwrap();
        assert_eq!(
            p[1],
            Primitive::Range {
                from: vec![0x03, 0xe8],
                to: vec![0x07, 0xd0]
            }
        );

        let p = encode_port("webports", L4_DPORT, "dport").unwrap();
        assert_eq!(
            p[1],
            Primitive::Lookup {
                set: "webports".into()
            }
        );
    }

    #[test]
    fn test_encode_port_errors() {
        assert!(matches!(
            encode_port("2000-1000", L4_DPORT, "dport"),
            Err(Error::InvertedRange { .. })
        ));
        assert!(matches!(
            encode_port("80-80", L4_DPORT, "dport"),
            Err(Error::InvertedRange { .. })
        ));
        assert!(matches!(
            encode_port("70000", L4_DPORT, "dport"),
            Err(Error::FormatMismatch { .. })
        ));
        assert!(matches!(
            encode_port("8.8", L4_DPORT, "dport"),
            Err(Error::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_ct_states_mask() {
        let p = encode_ct_states(&[CtState::Established, CtState::Related]).unwrap();
        assert_eq!(p[0], Primitive::ConnState);
        assert_eq!(
            p[1],
            Primitive::Mask {
                mask: 6u32.to_ne_bytes().to_vec(),
                xor: vec![0; 4]
            }
        );
        assert_eq!(
            p[2],
            Primitive::Compare {
                cmp: CmpOp::Neq,
                data: vec![0; 4]
            }
        );
        assert!(matches!(
            encode_ct_states(&[]),
            Err(Error::UnrecognizedState(_))
        ));
    }

    #[test]
    fn test_decode_ct_mask_canonical_order_ignores_unknown_bits() {
        assert_eq!(
            decode_ct_mask(4 | 2 | 16 | 32),
            vec![CtState::Established, CtState::Related]
        );
        assert_eq!(decode_ct_mask(64 | 1), vec![CtState::Invalid, CtState::Untracked]);
    }

    #[test]
    fn test_verdict_mapping() {
        assert_eq!(
            encode_verdict(&Action::Jump("next".into())),
            Primitive::Verdict {
                kind: VerdictKind::Jump,
                chain: Some("next".into())
            }
        );
        assert_eq!(
            decode_verdict(VerdictKind::Goto, Some("c")).unwrap(),
            Some(Action::Goto("c".into()))
        );
        assert_eq!(decode_verdict(VerdictKind::Return, None).unwrap(), None);
        assert!(decode_verdict(VerdictKind::Jump, None).is_err());
    }
}
