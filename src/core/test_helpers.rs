//! Shared test utilities for core module tests
//!
//! Provides common test helpers to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::conn::Conn;
use crate::core::rule::{Direction, L3Proto, Rule};
use crate::core::set::{Set, SetDatatype};
use crate::core::table::{Chain, Table, TableFamily};
use crate::core::transport::MemoryTransport;

pub const TEST_TABLE: &str = "filter";
pub const TEST_CHAIN: &str = "input";

/// Creates a connection whose committed state holds [`TEST_TABLE`] with an
/// empty [`TEST_CHAIN`].
pub fn create_test_conn() -> Conn<MemoryTransport> {
    let mut conn = Conn::new(MemoryTransport::new());
    conn.add_table(&Table::new(TEST_TABLE, TableFamily::Inet))
        .expect("add table");
    conn.add_chain(&Chain::regular(TEST_TABLE, TEST_CHAIN))
        .expect("add chain");
    conn.commit().expect("commit");
    conn
}

/// Creates an IPv4 rule matching `src` with the given action applied.
///
/// # Arguments
///
/// * `src` - Source address descriptor
/// * `accept` - `true` for accept, `false` for drop
pub fn create_ipv4_rule(src: &str, accept: bool) -> Rule {
    let mut rule = Rule::default();
    rule.set_l3_proto(L3Proto::Ipv4);
    rule.src_ip = Some(src.to_string());
    if accept {
        rule.accept();
    } else {
        rule.drop();
    }
    rule
}

/// Creates an IPv6 rule matching destination `ip` that jumps to `chain`.
pub fn create_ipv6_jump_rule(ip: &str, chain: &str) -> Rule {
    let mut rule = Rule::default();
    rule.set_l3_ip(ip.parse().expect("ipv6 literal"), Direction::Dst)
        .jump(chain);
    rule
}

/// Creates an interval set of the given datatype.
pub fn create_interval_set(name: &str, datatype: SetDatatype, elements: &[&str]) -> Set {
    Set::new(name, datatype)
        .with_interval(true)
        .with_elements(elements.iter().copied())
}
