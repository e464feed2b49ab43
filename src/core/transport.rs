//! Batch transport boundary
//!
//! The codec never talks to the kernel itself. Everything it produces is
//! handed to a [`Transport`] as an [`Op`]; queued operations take effect
//! together on [`Transport::commit`] or are dropped by
//! [`Transport::discard`]. Listing returns raw primitive sequences and wire
//! set elements for the codec to decode.
//!
//! [`MemoryTransport`] keeps the ruleset in process. It applies a batch to a
//! copy of the committed state and swaps it in only when every operation
//! succeeded, so a failed commit leaves nothing half-applied.

use crate::core::error::{Error, Result};
use crate::core::expr::Primitive;
use crate::core::set::{SetElement, pairs_cleanly};
use crate::core::table::{Chain, Table};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A rule as stored by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRule {
    pub handle: u64,
    /// Zero-based position within the chain
    pub position: u64,
    pub exprs: Vec<Primitive>,
}

/// A set as stored by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSet {
    pub name: String,
    /// Kernel key type, see [`SetDatatype::magic`](crate::core::set::SetDatatype::magic)
    pub key_type: u32,
    pub interval: bool,
    pub elements: Vec<SetElement>,
}

/// One queued change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    AddTable(Table),
    DeleteTable {
        name: String,
    },
    AddChain(Chain),
    DeleteChain {
        table: String,
        name: String,
    },
    AddRule {
        table: String,
        chain: String,
        exprs: Vec<Primitive>,
    },
    ReplaceRule {
        table: String,
        chain: String,
        handle: u64,
        exprs: Vec<Primitive>,
    },
    DeleteRule {
        table: String,
        chain: String,
        handle: u64,
    },
    AddSet {
        table: String,
        set: RawSet,
    },
    DeleteSet {
        table: String,
        name: String,
    },
    AddElements {
        table: String,
        set: String,
        elements: Vec<SetElement>,
    },
    DeleteElements {
        table: String,
        set: String,
        elements: Vec<SetElement>,
    },
    FlushSet {
        table: String,
        set: String,
    },
    FlushRuleset,
}

impl Op {
    /// Short description used in logs
    pub fn description(&self) -> String {
        match self {
            Op::AddTable(t) => format!("add table {} {}", t.family, t.name),
            Op::DeleteTable { name } => format!("delete table {name}"),
            Op::AddChain(c) => format!("add chain {} {}", c.table, c.name),
            Op::DeleteChain { table, name } => format!("delete chain {table} {name}"),
            Op::AddRule { table, chain, exprs } => {
                format!("add rule {table} {chain} ({} exprs)", exprs.len())
            }
            Op::ReplaceRule {
                table,
                chain,
                handle,
                ..
            } => format!("replace rule {table} {chain} handle {handle}"),
            Op::DeleteRule {
                table,
                chain,
                handle,
            } => format!("delete rule {table} {chain} handle {handle}"),
            Op::AddSet { table, set } => format!("add set {table} {}", set.name),
            Op::DeleteSet { table, name } => format!("delete set {table} {name}"),
            Op::AddElements {
                table,
                set,
                elements,
            } => format!("add {} elements to {table} {set}", elements.len()),
            Op::DeleteElements {
                table,
                set,
                elements,
            } => format!("delete {} elements from {table} {set}", elements.len()),
            Op::FlushSet { table, set } => format!("flush set {table} {set}"),
            Op::FlushRuleset => "flush ruleset".to_string(),
        }
    }
}

/// Submission and listing interface of the packet-filtering engine
pub trait Transport {
    /// Queues an operation for the next commit.
    fn submit(&mut self, op: Op) -> Result<()>;

    /// Applies every queued operation as one unit.
    fn commit(&mut self) -> Result<()>;

    /// Drops every queued operation.
    fn discard(&mut self);

    fn list_tables(&self) -> Result<Vec<Table>>;

    fn list_chains(&self, table: &str) -> Result<Vec<Chain>>;

    /// Rules of a chain in chain order
    fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<RawRule>>;

    fn list_sets(&self, table: &str) -> Result<Vec<RawSet>>;
}

// ═══════════════════════════════════════════════════════════════════════════
// In-memory transport
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct StoredRule {
    handle: u64,
    exprs: Vec<Primitive>,
}

#[derive(Debug, Clone)]
struct ChainState {
    chain: Chain,
    rules: Vec<StoredRule>,
}

#[derive(Debug, Clone)]
struct SetState {
    raw: RawSet,
    /// Whether `raw.elements[0]` is the creation sentinel. Tracked here
    /// because a real end key is all zeros once its successor wraps.
    sentinel_leads: bool,
}

impl SetState {
    fn new(raw: RawSet) -> Self {
        let sentinel_leads = raw.interval
            && raw.elements.len() % 2 == 1
            && raw
                .elements
                .split_first()
                .is_some_and(|(first, rest)| first.is_sentinel() && pairs_cleanly(rest));
        Self {
            raw,
            sentinel_leads,
        }
    }

    /// Index of the first real entry
    fn first_element(&self) -> usize {
        usize::from(self.sentinel_leads)
    }

    fn add(&mut self, elements: Vec<SetElement>) {
        // Newest elements lead, after the sentinel if there is one.
        let older = self.raw.elements.split_off(self.first_element());
        self.raw.elements.extend(elements);
        self.raw.elements.extend(older);
    }

    fn remove(&mut self, elements: &[SetElement]) -> Result<()> {
        // Interval entries are matched as whole (end, start) pairs.
        let step = if self.raw.interval { 2 } else { 1 };
        for group in elements.chunks(step) {
            let index = (self.first_element()..self.raw.elements.len())
                .step_by(step)
                .find(|&i| self.raw.elements[i..].starts_with(group))
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "element {:?} in set {}",
                        group[0].key, self.raw.name
                    ))
                })?;
            self.raw.elements.drain(index..index + group.len());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TableState {
    table: Table,
    chains: Vec<ChainState>,
    sets: Vec<SetState>,
}

#[derive(Debug, Clone, Default)]
struct Ruleset {
    tables: Vec<TableState>,
    last_handle: u64,
}

impl Ruleset {
    fn table(&self, name: &str) -> Result<&TableState> {
        self.tables
            .iter()
            .find(|t| t.table.name == name)
            .ok_or_else(|| Error::NotFound(format!("table {name}")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut TableState> {
        self.tables
            .iter_mut()
            .find(|t| t.table.name == name)
            .ok_or_else(|| Error::NotFound(format!("table {name}")))
    }

    fn chain_mut(&mut self, table: &str, chain: &str) -> Result<&mut ChainState> {
        self.table_mut(table)?
            .chains
            .iter_mut()
            .find(|c| c.chain.name == chain)
            .ok_or_else(|| Error::NotFound(format!("chain {table} {chain}")))
    }

    fn set_mut(&mut self, table: &str, set: &str) -> Result<&mut SetState> {
        self.table_mut(table)?
            .sets
            .iter_mut()
            .find(|s| s.raw.name == set)
            .ok_or_else(|| Error::NotFound(format!("set {table} {set}")))
    }

    fn rule_mut(&mut self, table: &str, chain: &str, handle: u64) -> Result<&mut StoredRule> {
        self.chain_mut(table, chain)?
            .rules
            .iter_mut()
            .find(|r| r.handle == handle)
            .ok_or_else(|| Error::NotFound(format!("rule {table} {chain} handle {handle}")))
    }

    fn apply(&mut self, op: Op) -> Result<()> {
        match op {
            Op::AddTable(table) => {
                // Adding an existing table is a no-op, as in the kernel.
                if self.table(&table.name).is_err() {
                    self.tables.push(TableState {
                        table,
                        chains: Vec::new(),
                        sets: Vec::new(),
                    });
                }
            }
            Op::DeleteTable { name } => {
                self.table(&name)?;
                self.tables.retain(|t| t.table.name != name);
            }
            Op::AddChain(chain) => {
                let state = self.table_mut(&chain.table)?;
                if !state.chains.iter().any(|c| c.chain.name == chain.name) {
                    state.chains.push(ChainState {
                        chain,
                        rules: Vec::new(),
                    });
                }
            }
            Op::DeleteChain { table, name } => {
                let chain = self.chain_mut(&table, &name)?;
                if !chain.rules.is_empty() {
                    return Err(Error::Transport(format!(
                        "chain {table} {name} is not empty"
                    )));
                }
                self.table_mut(&table)?.chains.retain(|c| c.chain.name != name);
            }
            Op::AddRule {
                table,
                chain,
                exprs,
            } => {
                let handle = self.last_handle + 1;
                self.chain_mut(&table, &chain)?
                    .rules
                    .push(StoredRule { handle, exprs });
                self.last_handle = handle;
            }
            Op::ReplaceRule {
                table,
                chain,
                handle,
                exprs,
            } => {
                self.rule_mut(&table, &chain, handle)?.exprs = exprs;
            }
            Op::DeleteRule {
                table,
                chain,
                handle,
            } => {
                self.rule_mut(&table, &chain, handle)?;
                self.chain_mut(&table, &chain)?
                    .rules
                    .retain(|r| r.handle != handle);
            }
            Op::AddSet { table, set } => {
                let state = self.table_mut(&table)?;
                if state.sets.iter().any(|s| s.raw.name == set.name) {
                    return Err(Error::AlreadyExists(format!("set {table} {}", set.name)));
                }
                state.sets.push(SetState::new(set));
            }
            Op::DeleteSet { table, name } => {
                let state = self.table_mut(&table)?;
                if !state.sets.iter().any(|s| s.raw.name == name) {
                    return Err(Error::NotFound(format!("set {table} {name}")));
                }
                let in_use = state.chains.iter().flat_map(|c| &c.rules).any(|r| {
                    r.exprs
                        .iter()
                        .any(|e| matches!(e, Primitive::Lookup { set } if *set == name))
                });
                if in_use {
                    return Err(Error::Transport(format!("set {table} {name} is in use")));
                }
                state.sets.retain(|s| s.raw.name != name);
            }
            Op::AddElements {
                table,
                set,
                elements,
            } => {
                self.set_mut(&table, &set)?.add(elements);
            }
            Op::DeleteElements {
                table,
                set,
                elements,
            } => {
                self.set_mut(&table, &set)?.remove(&elements)?;
            }
            Op::FlushSet { table, set } => {
                let set = self.set_mut(&table, &set)?;
                set.raw.elements.clear();
                set.sentinel_leads = false;
            }
            Op::FlushRuleset => self.tables.clear(),
        }
        Ok(())
    }
}

/// In-process transport with all-or-nothing commits
///
/// Used by the CLI's dry run and by tests. Rule handles are allocated from a
/// counter that starts at 1 and never reuses a value.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    committed: Ruleset,
    pending: Vec<Op>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations waiting for commit
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for MemoryTransport {
    fn submit(&mut self, op: Op) -> Result<()> {
        debug!("Queued: {}", op.description());
        self.pending.push(op);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let ops = std::mem::take(&mut self.pending);
        let count = ops.len();
        let mut next = self.committed.clone();
        for op in ops {
            let description = op.description();
            if let Err(e) = next.apply(op) {
                warn!("Commit rejected at '{description}': {e}");
                return Err(e);
            }
        }
        self.committed = next;
        info!("Committed {count} operations");
        Ok(())
    }

    fn discard(&mut self) {
        info!("Discarded {} queued operations", self.pending.len());
        self.pending.clear();
    }

    fn list_tables(&self) -> Result<Vec<Table>> {
        Ok(self
            .committed
            .tables
            .iter()
            .map(|t| t.table.clone())
            .collect())
    }

    fn list_chains(&self, table: &str) -> Result<Vec<Chain>> {
        Ok(self
            .committed
            .table(table)?
            .chains
            .iter()
            .map(|c| c.chain.clone())
            .collect())
    }

    fn list_rules(&self, table: &str, chain: &str) -> Result<Vec<RawRule>> {
        let state = self
            .committed
            .table(table)?
            .chains
            .iter()
            .find(|c| c.chain.name == chain)
            .ok_or_else(|| Error::NotFound(format!("chain {table} {chain}")))?;
        Ok(state
            .rules
            .iter()
            .zip(0u64..)
            .map(|(r, position)| RawRule {
                handle: r.handle,
                position,
                exprs: r.exprs.clone(),
            })
            .collect())
    }

    fn list_sets(&self, table: &str) -> Result<Vec<RawSet>> {
        Ok(self
            .committed
            .table(table)?
            .sets
            .iter()
            .map(|s| s.raw.clone())
            .collect())
    }
}
