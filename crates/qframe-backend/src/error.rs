//! Error types for the backend crate.

use qframe_engine::EngineError;
use qframe_ir::IrError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced to callers of a [`crate::QuantumBackend`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Not enough free frames of the requested class across all workers.
    #[error(
        "Capacity exhausted: requested {requested} frames of size {size} (dim {dim}), {available} free"
    )]
    CapacityExhausted {
        /// Qudit dimension.
        dim: u32,
        /// Frame size.
        size: usize,
        /// Requested frame count.
        requested: usize,
        /// Free frames of the class.
        available: usize,
    },

    /// Handle could not be decoded or routed.
    #[error("Addressing error: {0}")]
    Addressing(String),

    /// Gate spans qubits of independently simulated chunks.
    #[error("Cross-chunk operation: {0}")]
    CrossChunk(String),

    /// Engine cannot execute this gate.
    #[error("Engine '{engine}' does not support gate '{gate}'")]
    UnsupportedGate {
        /// Engine name.
        engine: &'static str,
        /// Gate name.
        gate: String,
    },

    /// Other engine failure.
    #[error("Engine error: {0}")]
    Engine(EngineError),

    /// Gate catalog or noise error.
    #[error(transparent)]
    Ir(IrError),

    /// A worker answered with the wrong response.
    #[error("Protocol desync with worker {worker}: {detail}")]
    ProtocolDesync {
        /// Worker id.
        worker: u32,
        /// What was expected and what arrived.
        detail: String,
    },

    /// A worker queue closed while a reply was outstanding.
    #[error("Worker {0} disconnected")]
    WorkerDisconnected(u32),

    /// Worker thread could not be started.
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Blocking simulation task panicked or was cancelled.
    #[error("Simulation task failed: {0}")]
    Task(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Coordinator refuses work after a protocol failure.
    #[error("Coordinator is poisoned after an earlier protocol failure")]
    Poisoned,

    /// Backend was shut down.
    #[error("Backend has been shut down")]
    ShutDown,
}

impl From<IrError> for BackendError {
    fn from(err: IrError) -> Self {
        match err {
            IrError::MalformedHandle(_) | IrError::AddressOverflow { .. } => {
                BackendError::Addressing(err.to_string())
            }
            other => BackendError::Ir(other),
        }
    }
}

impl From<EngineError> for BackendError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Overflow {
                dim,
                size,
                requested,
                available,
            } => BackendError::CapacityExhausted {
                dim,
                size,
                requested,
                available,
            },
            EngineError::CrossChunk(detail) => BackendError::CrossChunk(detail),
            EngineError::UnsupportedGate { engine, gate } => {
                BackendError::UnsupportedGate { engine, gate }
            }
            EngineError::Ir(ir) => ir.into(),
            EngineError::ForeignHandle { .. }
            | EngineError::ChunkOutOfRange { .. }
            | EngineError::DimensionMismatch { .. }
            | EngineError::NotAllocated(_) => BackendError::Addressing(err.to_string()),
            other => BackendError::Engine(other),
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
