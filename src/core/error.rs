use thiserror::Error;

/// Core error types for the rule/set codec and its transport layer
#[derive(Debug, Error)]
pub enum Error {
    /// An address, port, range or CIDR descriptor failed to parse, or its
    /// address family disagrees with the rule/set it belongs to
    #[error("{field} format mismatch: {value:?}")]
    FormatMismatch { field: &'static str, value: String },

    /// Range whose end does not come after its start
    #[error("inverted range: {value:?}")]
    InvertedRange { value: String },

    /// Set element datatype the codec does not understand
    #[error("unsupported set datatype: {0}")]
    UnsupportedDatatype(String),

    /// Connection-tracking state name (or set of names) that maps to no state bit
    #[error("unrecognized conntrack state: {0}")]
    UnrecognizedState(String),

    /// Descriptor present without the protocol field that gives it meaning
    #[error("{field} requires {requires} to be set")]
    MissingProtocol {
        field: &'static str,
        requires: &'static str,
    },

    /// Interval set entries are not paired as (end, start)
    #[error("interval boundary parity violated at entry {index}")]
    BoundaryParity { index: usize },

    /// Recognized primitive carrying data that cannot be interpreted
    #[error("malformed primitive sequence: {0}")]
    Malformed(String),

    /// Object not present in the transport
    #[error("not found: {0}")]
    NotFound(String),

    /// Object with the same identity already present in the transport
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Transport rejected the operation
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn format(field: &'static str, value: impl Into<String>) -> Self {
        Self::FormatMismatch {
            field,
            value: value.into(),
        }
    }

    /// Returns `true` for errors raised while decompiling listed rules or sets.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::BoundaryParity { .. } | Self::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
