//! Object-level API over a [`Transport`]
//!
//! [`Conn`] speaks in [`Rule`]s and [`Set`]s. Mutations are compiled and
//! queued on the transport; nothing takes effect until [`Conn::commit`].
//! Listings read committed state and decode it, so a rule or set that
//! cannot be decoded surfaces as an error instead of disappearing.
//!
//! # Example
//!
//! ```
//! use nftcodec::core::conn::Conn;
//! use nftcodec::core::rule::{L3Proto, Rule};
//! use nftcodec::core::table::{Chain, Table, TableFamily};
//! use nftcodec::core::transport::MemoryTransport;
//!
//! let mut conn = Conn::new(MemoryTransport::new());
//! conn.add_table(&Table::new("filter", TableFamily::Inet)).unwrap();
//! conn.add_chain(&Chain::regular("filter", "input")).unwrap();
//!
//! let mut rule = Rule::default();
//! rule.set_l3_proto(L3Proto::Ipv4).accept();
//! conn.add_rule("filter", "input", &rule).unwrap();
//! conn.commit().unwrap();
//!
//! let listed = conn.list_rules("filter", "input").unwrap();
//! assert_eq!(listed[0].without_identity(), rule);
//! ```

use crate::core::error::{Error, Result};
use crate::core::rule::Rule;
use crate::core::rule_codec::{compile, decompile};
use crate::core::set::{Set, SetDatatype, encode_elements};
use crate::core::table::{Chain, Table};
use crate::core::transport::{Op, RawRule, RawSet, Transport};
use tracing::{debug, warn};

pub struct Conn<T: Transport> {
    transport: T,
}

impl<T: Transport> Conn<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Applies everything queued since the last commit or discard.
    pub fn commit(&mut self) -> Result<()> {
        self.transport.commit()
    }

    pub fn discard(&mut self) {
        self.transport.discard();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tables and chains
    // ═══════════════════════════════════════════════════════════════════════

    /// Creates a table and commits immediately, together with anything
    /// already queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if a table with that name is listed.
    pub fn add_table(&mut self, table: &Table) -> Result<()> {
        if self.get_table(&table.name).is_ok() {
            return Err(Error::AlreadyExists(format!("table {}", table.name)));
        }
        self.transport.submit(Op::AddTable(table.clone()))?;
        self.transport.commit()
    }

    pub fn get_table(&self, name: &str) -> Result<Table> {
        self.transport
            .list_tables()?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::NotFound(format!("table {name}")))
    }

    pub fn list_tables(&self) -> Result<Vec<Table>> {
        self.transport.list_tables()
    }

    pub fn delete_table(&mut self, name: &str) -> Result<()> {
        self.transport.submit(Op::DeleteTable {
            name: name.to_string(),
        })
    }

    /// Queues a chain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the table already lists a chain
    /// with that name.
    pub fn add_chain(&mut self, chain: &Chain) -> Result<()> {
        if self.get_chain(&chain.table, &chain.name).is_ok() {
            return Err(Error::AlreadyExists(format!(
                "chain {} {}",
                chain.table, chain.name
            )));
        }
        self.transport.submit(Op::AddChain(chain.clone()))
    }

    pub fn get_chain(&self, table: &str, name: &str) -> Result<Chain> {
        self.transport
            .list_chains(table)?
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::NotFound(format!("chain {table} {name}")))
    }

    pub fn list_chains(&self, table: &str) -> Result<Vec<Chain>> {
        self.transport.list_chains(table)
    }

    pub fn delete_chain(&mut self, table: &str, name: &str) -> Result<()> {
        self.transport.submit(Op::DeleteChain {
            table: table.to_string(),
            name: name.to_string(),
        })
    }

    /// Removes every table, chain, rule and set.
    pub fn flush_ruleset(&mut self) -> Result<()> {
        self.transport.submit(Op::FlushRuleset)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Rules
    // ═══════════════════════════════════════════════════════════════════════

    /// Compiles and queues a rule at the end of the chain.
    pub fn add_rule(&mut self, table: &str, chain: &str, rule: &Rule) -> Result<()> {
        let exprs = compile(rule)?;
        self.transport.submit(Op::AddRule {
            table: table.to_string(),
            chain: chain.to_string(),
            exprs,
        })
    }

    /// Replaces the rule with the same handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a rule without a handle, i.e. one that
    /// was never listed.
    pub fn replace_rule(&mut self, table: &str, chain: &str, rule: &Rule) -> Result<()> {
        let handle = rule_handle(rule)?;
        let exprs = compile(rule)?;
        self.transport.submit(Op::ReplaceRule {
            table: table.to_string(),
            chain: chain.to_string(),
            handle,
            exprs,
        })
    }

    pub fn delete_rule(&mut self, table: &str, chain: &str, rule: &Rule) -> Result<()> {
        let handle = rule_handle(rule)?;
        self.transport.submit(Op::DeleteRule {
            table: table.to_string(),
            chain: chain.to_string(),
            handle,
        })
    }

    /// Lists and decodes the chain's rules in chain order.
    pub fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<Rule>> {
        self.transport
            .list_rules(table, chain)?
            .iter()
            .map(decode_rule)
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Sets
    // ═══════════════════════════════════════════════════════════════════════

    /// Queues a set together with its initial elements.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExists`] if the table already lists the set,
    /// or the first element encoding error.
    pub fn add_set(&mut self, table: &str, set: &Set) -> Result<()> {
        let listed = match self.transport.list_sets(table) {
            Ok(listed) => listed,
            // Table still queued; the transport checks it on commit.
            Err(Error::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        // Compare raw names so a set that no longer decodes still counts.
        if listed.iter().any(|raw| raw.name == set.name) {
            return Err(Error::AlreadyExists(format!("set {table} {}", set.name)));
        }
        let elements = set.to_wire()?;
        self.transport.submit(Op::AddSet {
            table: table.to_string(),
            set: RawSet {
                name: set.name.clone(),
                key_type: set.datatype.magic(),
                interval: set.interval,
                elements,
            },
        })
    }

    pub fn get_set(&self, table: &str, name: &str) -> Result<Set> {
        let raw = self
            .transport
            .list_sets(table)?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("set {table} {name}")))?;
        decode_set(&raw)
    }

    pub fn list_sets(&self, table: &str) -> Result<Vec<Set>> {
        self.transport
            .list_sets(table)?
            .iter()
            .map(decode_set)
            .collect()
    }

    pub fn delete_set(&mut self, table: &str, name: &str) -> Result<()> {
        self.transport.submit(Op::DeleteSet {
            table: table.to_string(),
            name: name.to_string(),
        })
    }

    /// Queues deletion of every set listed in the table.
    pub fn clear_sets(&mut self, table: &str) -> Result<()> {
        for raw in self.transport.list_sets(table)? {
            self.delete_set(table, &raw.name)?;
        }
        Ok(())
    }

    /// Queues elements for addition to `set`, encoded per its datatype.
    pub fn add_elements<S: AsRef<str>>(
        &mut self,
        table: &str,
        set: &Set,
        elements: &[S],
    ) -> Result<()> {
        let elements = encode_elements(set.datatype, set.interval, elements)?;
        self.transport.submit(Op::AddElements {
            table: table.to_string(),
            set: set.name.clone(),
            elements,
        })
    }

    pub fn delete_elements<S: AsRef<str>>(
        &mut self,
        table: &str,
        set: &Set,
        elements: &[S],
    ) -> Result<()> {
        let elements = encode_elements(set.datatype, set.interval, elements)?;
        self.transport.submit(Op::DeleteElements {
            table: table.to_string(),
            set: set.name.clone(),
            elements,
        })
    }

    pub fn flush_set(&mut self, table: &str, name: &str) -> Result<()> {
        self.transport.submit(Op::FlushSet {
            table: table.to_string(),
            set: name.to_string(),
        })
    }
}

fn rule_handle(rule: &Rule) -> Result<u64> {
    rule.handle
        .ok_or_else(|| Error::NotFound("rule has no handle".to_string()))
}

fn decode_rule(raw: &RawRule) -> Result<Rule> {
    let mut rule = decompile(&raw.exprs).inspect_err(|e| {
        warn!("Failed to decode rule handle {}: {e}", raw.handle);
    })?;
    rule.handle = Some(raw.handle);
    rule.index = Some(raw.position);
    Ok(rule)
}

fn decode_set(raw: &RawSet) -> Result<Set> {
    let datatype = SetDatatype::from_magic(raw.key_type)?;
    debug!("Decoding set {} ({datatype})", raw.name);
    Set::from_wire(raw.name.clone(), datatype, raw.interval, &raw.elements).inspect_err(|e| {
        warn!("Failed to decode set {}: {e}", raw.name);
    })
}
