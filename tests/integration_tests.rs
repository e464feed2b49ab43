//! Integration tests for nftcodec
//!
//! These tests drive the public API end to end: rules and sets are compiled,
//! submitted to the in-memory transport, committed, listed back and decoded.
//! No kernel access or privileges are needed.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use nftcodec::core::conn::Conn;
use nftcodec::core::expr::{CmpOp, PayloadBase, Primitive, VerdictKind};
use nftcodec::core::rule::{Action, CtState, Direction, L3Proto, L4Proto};
use nftcodec::core::set::{SetDatatype, SetElement, decode_elements};
use nftcodec::core::table::{Chain, ChainHook, ChainPolicy, ChainType, Table, TableFamily};
use nftcodec::core::transport::{MemoryTransport, Transport};
use nftcodec::{Error, Rule, Set};

const TABLE: &str = "nftcodec_test";
const CHAIN: &str = "input";

fn setup() -> Conn<MemoryTransport> {
    let mut conn = Conn::new(MemoryTransport::new());
    conn.add_table(&Table::new(TABLE, TableFamily::Inet))
        .expect("add table");
    conn.add_chain(&Chain::base(
        TABLE,
        CHAIN,
        ChainHook::Input,
        ChainType::Filter,
        ChainPolicy::Accept,
    ))
    .expect("add chain");
    conn.commit().expect("commit");
    conn
}

fn ipv4_rule(src: &str) -> Rule {
    let mut rule = Rule::default();
    rule.set_l3_ip(src.parse().unwrap(), Direction::Src);
    rule
}

#[test]
fn test_ipv4_destination_accept_scenario() {
    let mut rule = Rule::default();
    rule.set_l3_proto(L3Proto::Ipv4);
    rule.dst_ip = Some("1.1.1.1".to_string());
    rule.accept();

    let exprs = rule.to_primitives().unwrap();
    assert_eq!(
        exprs,
        vec![
            Primitive::FamilySelect,
            Primitive::Compare {
                cmp: CmpOp::Eq,
                data: vec![2]
            },
            Primitive::PayloadField {
                base: PayloadBase::NetworkHeader,
                offset: 16,
                len: 4
            },
            Primitive::Compare {
                cmp: CmpOp::Eq,
                data: vec![1, 1, 1, 1]
            },
            Primitive::Verdict {
                kind: VerdictKind::Accept,
                chain: None
            },
        ]
    );
    assert_eq!(Rule::from_primitives(&exprs).unwrap(), rule);
}

#[test]
fn test_listing_preserves_submission_order() {
    let mut conn = setup();
    let mut accept = ipv4_rule("172.21.194.11");
    accept.accept();
    let mut drop = ipv4_rule("172.21.194.11");
    drop.drop();

    conn.add_rule(TABLE, CHAIN, &accept).unwrap();
    conn.add_rule(TABLE, CHAIN, &drop).unwrap();
    conn.commit().unwrap();

    let listed = conn.list_rules(TABLE, CHAIN).unwrap();
    let actions: Vec<_> = listed.iter().map(|r| r.action.clone()).collect();
    assert_eq!(actions, vec![Some(Action::Accept), Some(Action::Drop)]);
    assert_eq!(listed[0].without_identity(), accept);
    assert_eq!(listed[1].without_identity(), drop);
}

#[test]
fn test_full_rule_through_transport() {
    let mut conn = setup();
    let mut rule = Rule::default();
    rule.set_l3_ip_range(
        "ff01::".parse().unwrap(),
        "ff01:efef::".parse().unwrap(),
        Direction::Src,
    )
    .set_l3_ip_cidr("2001:db8:1::".parse().unwrap(), 48, Direction::Dst)
    .set_l4_proto(L4Proto::Tcp)
    .set_l4_port_range(1024, 65535, Direction::Src)
    .set_l4_port(22, Direction::Dst)
    .jump("ssh_in");
    rule.set_ct_states(&["new", "untracked"]).unwrap();

    conn.add_chain(&Chain::regular(TABLE, "ssh_in")).unwrap();
    conn.add_rule(TABLE, CHAIN, &rule).unwrap();
    conn.commit().unwrap();

    let listed = conn.list_rules(TABLE, CHAIN).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].without_identity(), rule);
    assert_eq!(listed[0].ct_states, vec![CtState::New, CtState::Untracked]);
}

#[test]
fn test_port_set_scenario() {
    let mut conn = setup();
    let set = Set::new("ports", SetDatatype::Port)
        .with_interval(true)
        .with_elements(["3306-3309", "8080-18080", "30001"]);
    conn.add_set(TABLE, &set).unwrap();
    conn.commit().unwrap();

    let mut listed = conn.get_set(TABLE, "ports").unwrap().elements;
    listed.sort();
    assert_eq!(listed, vec!["30001", "3306-3309", "8080-18080"]);
}

#[test]
fn test_set_reaching_top_of_port_range() {
    let mut conn = setup();
    let set = Set::new("high", SetDatatype::Port)
        .with_interval(true)
        .with_elements(["65000-65535"]);
    conn.add_set(TABLE, &set).unwrap();
    conn.commit().unwrap();

    conn.add_elements(TABLE, &set, &["443", "60000-60010"]).unwrap();
    conn.commit().unwrap();
    assert_eq!(
        conn.get_set(TABLE, "high").unwrap().elements,
        vec!["65000-65535", "443", "60000-60010"]
    );

    conn.delete_elements(TABLE, &set, &["65000-65535"]).unwrap();
    conn.commit().unwrap();
    conn.add_elements(TABLE, &set, &["65535"]).unwrap();
    conn.commit().unwrap();
    assert_eq!(
        conn.get_set(TABLE, "high").unwrap().elements,
        vec!["443", "60000-60010", "65535"]
    );

    // Same elements with the sentinel trailing instead of leading
    let mut wire = set.to_wire().unwrap();
    wire.rotate_left(1);
    assert_eq!(
        Set::from_wire("high", SetDatatype::Port, true, &wire).unwrap(),
        set
    );
}

#[test]
fn test_cidr_set_recovered_exactly() {
    let mut conn = setup();
    let set = Set::new("lan", SetDatatype::Ipv4)
        .with_interval(true)
        .with_elements(["192.168.1.0/24"]);
    conn.add_set(TABLE, &set).unwrap();
    conn.commit().unwrap();

    assert_eq!(
        conn.get_set(TABLE, "lan").unwrap().elements,
        vec!["192.168.1.0/24".to_string()]
    );
}

#[test]
fn test_rule_referencing_set() {
    let mut conn = setup();
    let set = Set::new("blocked", SetDatatype::Ipv6).with_elements(["ffee::1", "ffee::2"]);
    conn.add_set(TABLE, &set).unwrap();

    let mut rule = Rule::default();
    rule.set_l3_proto(L3Proto::Ipv6)
        .set_l3_set("blocked", Direction::Src)
        .drop();
    conn.add_rule(TABLE, CHAIN, &rule).unwrap();
    conn.commit().unwrap();

    let listed = conn.list_rules(TABLE, CHAIN).unwrap();
    assert_eq!(listed[0].src_ip.as_deref(), Some("blocked"));
    assert_eq!(conn.get_set(TABLE, "blocked").unwrap(), set);

    // The rule still references the set
    conn.delete_set(TABLE, "blocked").unwrap();
    assert!(matches!(conn.commit(), Err(Error::Transport(_))));
}

#[test]
fn test_failed_compile_leaves_batch_untouched() {
    let mut conn = setup();
    let mut good = ipv4_rule("10.0.0.1");
    good.accept();
    conn.add_rule(TABLE, CHAIN, &good).unwrap();

    let mut bad = Rule::default();
    bad.set_l4_proto(L4Proto::Udp);
    bad.dst_port = Some("53-53".to_string());
    assert!(matches!(
        conn.add_rule(TABLE, CHAIN, &bad),
        Err(Error::InvertedRange { .. })
    ));

    conn.commit().unwrap();
    assert_eq!(conn.list_rules(TABLE, CHAIN).unwrap().len(), 1);
}

#[test]
fn test_unknown_primitives_survive_listing() {
    let mut transport = MemoryTransport::new();
    transport
        .submit(nftcodec::core::transport::Op::AddTable(Table::new(
            TABLE,
            TableFamily::Ip,
        )))
        .unwrap();
    transport
        .submit(nftcodec::core::transport::Op::AddChain(Chain::regular(
            TABLE, CHAIN,
        )))
        .unwrap();
    transport
        .submit(nftcodec::core::transport::Op::AddRule {
            table: TABLE.to_string(),
            chain: CHAIN.to_string(),
            exprs: vec![
                Primitive::Unknown {
                    name: "counter".to_string(),
                },
                Primitive::TransportProtoSelect,
                Primitive::Compare {
                    cmp: CmpOp::Eq,
                    data: vec![17],
                },
                Primitive::Unknown {
                    name: "log".to_string(),
                },
                Primitive::Verdict {
                    kind: VerdictKind::Drop,
                    chain: None,
                },
            ],
        })
        .unwrap();
    transport.commit().unwrap();

    let conn = Conn::new(transport);
    let listed = conn.list_rules(TABLE, CHAIN).unwrap();
    assert_eq!(listed[0].l4proto, Some(L4Proto::Udp));
    assert_eq!(listed[0].action, Some(Action::Drop));
}

#[test]
fn test_boundary_parity_reported() {
    let wire = vec![
        SetElement {
            key: vec![0, 80],
            interval_end: false,
        },
        SetElement {
            key: vec![0, 81],
            interval_end: true,
        },
    ];
    let err = decode_elements(SetDatatype::Port, true, &wire).unwrap_err();
    assert!(matches!(err, Error::BoundaryParity { .. }));
    assert!(err.is_decode_error());
}

#[test]
fn test_table_and_chain_management() {
    let mut conn = setup();
    assert!(matches!(
        conn.add_table(&Table::new(TABLE, TableFamily::Inet)),
        Err(Error::AlreadyExists(_))
    ));
    assert_eq!(conn.get_table(TABLE).unwrap().family, TableFamily::Inet);

    let chain = conn.get_chain(TABLE, CHAIN).unwrap();
    assert_eq!(chain.policy, Some(ChainPolicy::Accept));
    assert!(chain.is_base());

    conn.add_chain(&Chain::regular(TABLE, "extra")).unwrap();
    conn.commit().unwrap();
    assert_eq!(conn.list_chains(TABLE).unwrap().len(), 2);

    conn.delete_chain(TABLE, "extra").unwrap();
    conn.commit().unwrap();
    assert!(matches!(
        conn.get_chain(TABLE, "extra"),
        Err(Error::NotFound(_))
    ));

    conn.flush_ruleset().unwrap();
    conn.commit().unwrap();
    assert!(conn.list_tables().unwrap().is_empty());
}

#[test]
fn test_discard_drops_queued_changes() {
    let mut conn = setup();
    let mut rule = ipv4_rule("10.0.0.1");
    rule.accept();
    conn.add_rule(TABLE, CHAIN, &rule).unwrap();
    conn.discard();
    conn.commit().unwrap();
    assert!(conn.list_rules(TABLE, CHAIN).unwrap().is_empty());

    conn.delete_table(TABLE).unwrap();
    conn.commit().unwrap();
    assert!(matches!(conn.get_table(TABLE), Err(Error::NotFound(_))));
}
