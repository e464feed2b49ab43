//! Core codec functionality
//!
//! Leaves first:
//!
//! - [`addr`]: Byte-level address arithmetic and CIDR bounds
//! - [`expr`]: The closed set of match primitives
//! - [`rule`]: Declarative rule model and builders
//! - [`rule_expr`]: Per-field encoders (address, port, conntrack, verdict)
//! - [`rule_codec`]: Rule compilation and the decoding state machine
//! - [`set`]: Set model and interval element codec
//! - [`table`]: Table and chain descriptors
//! - [`transport`]: Batch submission boundary and the in-memory transport
//! - [`conn`]: Object-level API tying the codecs to a transport
//! - [`error`]: Error types

pub mod addr;
pub mod conn;
pub mod error;
pub mod expr;
pub mod rule;
pub mod rule_codec;
pub mod rule_expr;
pub mod set;
pub mod table;
pub mod transport;

#[cfg(test)]
pub mod test_helpers;
