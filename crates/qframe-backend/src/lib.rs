//! Simulation backends for qframe.
//!
//! A backend hands out qubit handles grouped into frames and runs gates,
//! measurements and noise on them. Three topologies share the
//! [`QuantumBackend`] interface:
//!
//! - [`LocalBackend`]: a chunk pool in the calling process,
//! - [`ParallelBackend`]: a coordinator fanning commands out to worker threads,
//!   each owning a partition of the chunks,
//! - [`FlatBackend`]: one shared register addressed by slot.
//!
//! [`Backend::from_config`] picks one from a [`BackendConfig`].
//!
//! # Example
//!
//! ```rust,no_run
//! use qframe_backend::{Backend, BackendConfig, BackendKind, QuantumBackend};
//! use qframe_engine::FrameConfig;
//!
//! # async fn run() -> qframe_backend::BackendResult<()> {
//! let config = BackendConfig {
//!     kind: BackendKind::ParallelDense,
//!     process_count: 2,
//!     frames: FrameConfig::new().with(2, 3, 4),
//!     ..BackendConfig::default()
//! };
//! let backend = Backend::from_config(&config).await?;
//!
//! let frames = backend.generate_ghz_pair(3, 2).await?;
//! let bits = backend.measure_qubits(&frames[0], false, None).await?;
//! assert!(bits.iter().all(|b| *b == bits[0]));
//!
//! backend.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod local;
pub mod protocol;
pub mod worker;

pub use backend::{Backend, QuantumBackend, generate_ghz_pair};
pub use config::{BackendConfig, BackendKind, ConfigError};
pub use coordinator::ParallelBackend;
pub use error::{BackendError, BackendResult};
pub use ledger::{CapacityLedger, Reservation};
pub use local::{FlatBackend, LocalBackend};
pub use protocol::{Command, Response, ResponseKind, WorkerReply};
pub use worker::Worker;
