//! Byte-level address arithmetic
//!
//! Addresses are handled as big-endian byte strings of their native length
//! (4 bytes for IPv4, 16 for IPv6). Every operation wraps instead of growing
//! the address, so the all-ones address increments to all-zeros.
//!
//! These helpers turn CIDR networks into half-open `[start, next)` intervals
//! for interval sets and recover CIDR notation from such intervals when
//! listing.

use crate::core::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Adds `value` to `addr[index]`, carrying into the more significant bytes.
fn add_at(addr: &mut [u8], index: usize, value: u8) {
    let mut carry = value;
    for byte in addr[..=index].iter_mut().rev() {
        let (sum, overflow) = byte.overflowing_add(carry);
        *byte = sum;
        if !overflow {
            return;
        }
        carry = 1;
    }
}

/// Returns `addr + 1`, wrapping at the all-ones address.
///
/// ```
/// use nftcodec::core::addr::increment;
///
/// assert_eq!(increment(&[10, 0, 0, 255]), vec![10, 0, 1, 0]);
/// assert_eq!(increment(&[255; 4]), vec![0; 4]);
/// ```
pub fn increment(addr: &[u8]) -> Vec<u8> {
    let mut next = addr.to_vec();
    if let Some(last) = next.len().checked_sub(1) {
        add_at(&mut next, last, 1);
    }
    next
}

/// Returns `addr - 1`, wrapping at the all-zeros address.
pub fn decrement(addr: &[u8]) -> Vec<u8> {
    let mut prev = addr.to_vec();
    for byte in prev.iter_mut().rev() {
        let (diff, borrow) = byte.overflowing_sub(1);
        *byte = diff;
        if !borrow {
            break;
        }
    }
    prev
}

/// Splits a network into its first address and the first address of the
/// next network of the same size.
///
/// `network` is masked to `prefix_len` first, so host bits in the input are
/// ignored. A `/0` network spans the whole space and its successor wraps to
/// all-zeros.
///
/// ```
/// use nftcodec::core::addr::network_bounds;
///
/// let (start, next) = network_bounds(&[192, 168, 1, 0], 22);
/// assert_eq!(start, vec![192, 168, 0, 0]);
/// assert_eq!(next, vec![192, 168, 4, 0]);
/// ```
pub fn network_bounds(network: &[u8], prefix_len: u8) -> (Vec<u8>, Vec<u8>) {
    let prefix = usize::from(prefix_len).min(network.len() * 8);
    let mut start = network.to_vec();
    for (i, byte) in start.iter_mut().enumerate() {
        let bits_before = i * 8;
        if bits_before >= prefix {
            *byte = 0;
        } else if prefix - bits_before < 8 {
            *byte &= !(0xffu8 >> (prefix - bits_before));
        }
    }

    let mut next = start.clone();
    if prefix > 0 {
        // Byte holding the last prefix bit; a byte-aligned prefix lands on
        // the preceding byte with an increment of 1.
        let index = (prefix - 1) / 8;
        let bit_in_byte = (prefix - 1) % 8;
        add_at(&mut next, index, 1u8 << (7 - bit_in_byte));
    }
    (start, next)
}

/// Infers the prefix length of the network `[start, end)`.
///
/// `end` is the successor of the last address in the block. Returns `None`
/// when the pair is not a single power-of-two sized, aligned network, in
/// which case it has to be written as an explicit range.
///
/// ```
/// use nftcodec::core::addr::infer_prefix_len;
///
/// assert_eq!(infer_prefix_len(&[192, 168, 1, 0], &[192, 168, 2, 0]), Some(24));
/// assert_eq!(infer_prefix_len(&[10, 0, 0, 5], &[10, 0, 0, 9]), None);
/// ```
pub fn infer_prefix_len(start: &[u8], end: &[u8]) -> Option<u8> {
    if start.len() != end.len() || start.is_empty() || start.len() > 16 {
        return None;
    }
    let bits = start.len() as u32 * 8;
    let start_n = to_u128(start);
    let end_n = to_u128(end);
    let space_mask = if bits == 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    };
    let size = end_n.wrapping_sub(start_n) & space_mask;

    if size == 0 {
        // Wrapped all the way round: only the whole space qualifies.
        return (start_n == 0).then_some(0);
    }
    if !size.is_power_of_two() || start_n & (size - 1) != 0 {
        return None;
    }
    Some((bits - size.trailing_zeros()) as u8)
}

fn to_u128(bytes: &[u8]) -> u128 {
    bytes
        .iter()
        .fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

/// Returns the raw big-endian bytes of an address.
pub fn ip_bytes(ip: IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Interprets 4 or 16 raw bytes as an address.
pub fn bytes_to_ip(bytes: &[u8]) -> Result<IpAddr> {
    if let Ok(octets) = <[u8; 4]>::try_from(bytes) {
        return Ok(IpAddr::V4(Ipv4Addr::from(octets)));
    }
    if let Ok(octets) = <[u8; 16]>::try_from(bytes) {
        return Ok(IpAddr::V6(Ipv6Addr::from(octets)));
    }
    Err(Error::Malformed(format!(
        "address data of {} bytes",
        bytes.len()
    )))
}
