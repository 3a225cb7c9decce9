//! qframe state engines
//!
//! This crate turns the leaf types of `qframe-ir` into registers that can be
//! allocated, evolved and measured:
//!
//! - **Engines**: the [`Engine`] trait with three implementations,
//!   [`DenseEngine`] (eager qudit statevector), [`CircuitEngine`] (buffered
//!   qubit statevector) and [`StabilizerEngine`] (Clifford tableau)
//! - **Chunks**: [`Chunk`] wraps an engine with an allocation life cycle and
//!   schedules noise from a shared [`qframe_ir::NoisePattern`]
//! - **Pools**: [`ChunkPool`] owns the chunks of one worker and speaks in
//!   [`qframe_ir::QubitHandle`]s; [`FlatRegister`] keeps every qubit in one
//!   slot-addressed register
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use qframe_engine::{ChunkPool, DenseEngine, FrameConfig};
//! use qframe_ir::{AddressLayout, GateId, NoisePattern};
//!
//! let frames = FrameConfig::new().with(2, 2, 4);
//! let mut pool: ChunkPool<DenseEngine> = ChunkPool::new(
//!     0,
//!     AddressLayout::segmented(),
//!     &frames,
//!     Arc::new(NoisePattern::noiseless()),
//!     Some(7),
//! )
//! .unwrap();
//!
//! let frame = pool.allocate_frames(2, 1, 2).unwrap().remove(0);
//! pool.apply_gate(GateId::H, &[], &frame[..1]).unwrap();
//! pool.apply_gate(GateId::CX, &[], &frame).unwrap();
//! let bits = pool.measure(&frame, false, None).unwrap();
//! assert_eq!(bits[0], bits[1]);
//! ```

pub mod chunk;
pub mod circuit;
pub mod dense;
pub mod engine;
pub mod error;
pub mod flat;
pub mod frames;
pub mod pool;
pub mod stabilizer;

pub use chunk::Chunk;
pub use circuit::{CircuitEngine, PendingOp};
pub use dense::DenseEngine;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use flat::FlatRegister;
pub use frames::FrameConfig;
pub use pool::{ChunkPool, Deallocation, GateOp, validate_layout};
pub use stabilizer::StabilizerEngine;
