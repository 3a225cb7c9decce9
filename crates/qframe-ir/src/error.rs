//! Error types for the IR crate.

use thiserror::Error;

/// Errors raised while resolving gates, building noise channels or
/// encoding qubit addresses.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum IrError {
    /// Gate id is not present in the catalog.
    #[error("Unknown gate id {0}")]
    UnknownGate(u16),

    /// Gate requires a different number of qubits.
    #[error("Gate '{gate_name}' requires {expected} qubits, got {got}")]
    QubitCountMismatch {
        /// Name of the gate.
        gate_name: String,
        /// Declared arity.
        expected: u32,
        /// Number of qubits supplied.
        got: u32,
    },

    /// Gate constructor was given too few arguments.
    #[error("Gate '{gate_name}' requires {expected} arguments, got {got}")]
    MissingArgument {
        /// Name of the gate.
        gate_name: String,
        /// Number of arguments the gate takes.
        expected: usize,
        /// Number of arguments supplied.
        got: usize,
    },

    /// Operation is not defined for the requested dimension.
    #[error("'{what}' is not defined for dimension {dim}")]
    UnsupportedDimension {
        /// What was requested (gate or channel name).
        what: String,
        /// The offending dimension.
        dim: u32,
    },

    /// A probability is outside [0, 1] or probabilities sum above 1.
    #[error("Invalid probability: {0}")]
    InvalidProbability(String),

    /// Channel parameters do not fit the channel kind.
    #[error("Invalid channel parameters: {0}")]
    InvalidChannelParams(String),

    /// A field does not fit into its fixed address width.
    #[error("Address field '{field}' value {value} exceeds maximum {max}")]
    AddressOverflow {
        /// Field name (owner, dim, chunk, local).
        field: &'static str,
        /// Value that was to be encoded.
        value: u64,
        /// Largest encodable value.
        max: u64,
    },

    /// Handle token cannot be decoded under the layout.
    #[error("Malformed qubit handle '{0}'")]
    MalformedHandle(String),
}

/// Result type for IR operations.
pub type IrResult<T> = Result<T, IrError>;
