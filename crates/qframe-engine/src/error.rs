//! Error types for the engine crate.

use qframe_ir::IrError;
use thiserror::Error;

/// Errors raised by engines, chunks and chunk pools.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Gate catalog, noise or addressing error.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// Engine cannot execute this gate.
    #[error("Engine '{engine}' does not support gate '{gate}'")]
    UnsupportedGate {
        /// Engine name.
        engine: &'static str,
        /// Gate name.
        gate: String,
    },

    /// Engine cannot simulate qudits of this dimension.
    #[error("Engine '{engine}' does not support dimension {dim}")]
    UnsupportedDimension {
        /// Engine name.
        engine: &'static str,
        /// Requested dimension.
        dim: u32,
    },

    /// Qubit index is outside the register.
    #[error("Qubit {qubit} out of range for register of {num_qudits} qudits")]
    QubitOutOfRange {
        /// Offending local index.
        qubit: usize,
        /// Register size.
        num_qudits: usize,
    },

    /// Register would exceed what the engine can hold.
    #[error("Engine '{engine}' holds at most {max} qudits of dimension {dim}, requested {requested}")]
    RegisterTooLarge {
        /// Engine name.
        engine: &'static str,
        /// Qudit dimension.
        dim: u32,
        /// Requested register size.
        requested: usize,
        /// Largest supported register size.
        max: usize,
    },

    /// The same qubit appears twice in one operation.
    #[error("Duplicate qubit {0} in operation")]
    DuplicateQubit(usize),

    /// Operation on a chunk that is not allocated.
    #[error("Chunk {0} is not allocated")]
    NotAllocated(u32),

    /// Allocation of a chunk that is already allocated.
    #[error("Chunk {0} is already allocated")]
    AlreadyAllocated(u32),

    /// Chunk base size does not match the requested frame size.
    #[error("Chunk {chunk} holds {expected} qudits, requested frame size {got}")]
    SizeMismatch {
        /// Chunk index.
        chunk: u32,
        /// Base size of the chunk.
        expected: usize,
        /// Requested frame size.
        got: usize,
    },

    /// Not enough free chunks or slots of the requested class.
    #[error(
        "Not enough free frames of size {size} (dim {dim}): requested {requested}, available {available}"
    )]
    Overflow {
        /// Qudit dimension.
        dim: u32,
        /// Frame size.
        size: usize,
        /// Requested frame count.
        requested: usize,
        /// Free frames.
        available: usize,
    },

    /// Operation spans qubits of independently simulated chunks.
    #[error("Operation spans multiple chunks: {0}")]
    CrossChunk(String),

    /// Operation names no qubits.
    #[error("Operation names no qubits")]
    NoQubits,

    /// Handle belongs to another owner.
    #[error("Handle {handle} is owned by {owner}, not by {expected}")]
    ForeignHandle {
        /// The handle token.
        handle: String,
        /// Owner encoded in the handle.
        owner: u32,
        /// Owner that received it.
        expected: u32,
    },

    /// Handle points past the last chunk.
    #[error("Chunk index {chunk} out of range ({num_chunks} chunks)")]
    ChunkOutOfRange {
        /// Decoded chunk index.
        chunk: u32,
        /// Number of chunks in the pool.
        num_chunks: usize,
    },

    /// Handle dimension disagrees with the chunk's dimension.
    #[error("Chunk {chunk} has dimension {expected}, handle says {got}")]
    DimensionMismatch {
        /// Chunk index.
        chunk: u32,
        /// Dimension of the chunk.
        expected: u32,
        /// Dimension encoded in the handle.
        got: u32,
    },
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
