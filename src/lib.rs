//! nftcodec - nftables rule and set codec
//!
//! Translates declarative packet-filter rules and address/port sets into the
//! ordered match primitives a kernel classification engine executes, and
//! back again when listing.
//!
//! # Architecture
//!
//! - [`core`] - Primitives, rule/set models, the codecs and the transport boundary
//! - [`config`] - Configuration persistence for the CLI
//!
//! # Example
//!
//! ```
//! use nftcodec::Rule;
//! use nftcodec::core::rule::{Direction, L4Proto};
//!
//! let mut rule = Rule::default();
//! rule.set_l3_ip("192.0.2.1".parse().unwrap(), Direction::Dst)
//!     .set_l4_proto(L4Proto::Tcp)
//!     .set_l4_port(443, Direction::Dst)
//!     .accept();
//!
//! let primitives = rule.to_primitives().unwrap();
//! assert_eq!(Rule::from_primitives(&primitives).unwrap(), rule);
//! ```

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-export commonly used types
pub use core::conn::Conn;
pub use core::error::{Error, Result};
pub use core::expr::Primitive;
pub use core::rule::Rule;
pub use core::set::Set;
