//! Engine strategy trait.
//!
//! An [`Engine`] is the state of one simulated register together with the
//! primitives the chunk layer needs. Engines only differ in how they store the
//! state and execute gates; allocation, addressing and noise scheduling live in
//! [`crate::chunk`] and [`crate::pool`].

use std::fmt;

use qframe_ir::{Channel, ResolvedGate};
use rand::rngs::StdRng;

use crate::error::{EngineError, EngineResult};

/// Largest statevector the amplitude-based engines allocate (1 GiB).
pub const MAX_AMPLITUDES: usize = 1 << 26;

/// Quantum-state engine for one register.
pub trait Engine: Clone + Send + fmt::Debug + 'static {
    /// Engine name used in logs and errors.
    const NAME: &'static str;

    /// Whether the engine can simulate qudits of dimension `dim`.
    fn supports_dimension(dim: u32) -> bool;

    /// Largest register of dimension `dim` the engine will build.
    fn max_qudits(dim: u32) -> usize;

    /// Create a register of `num_qudits` qudits in `|0…0⟩`.
    fn new(num_qudits: usize, dim: u32) -> EngineResult<Self>;

    /// Number of qudits in the register.
    fn num_qudits(&self) -> usize;

    /// Qudit dimension.
    fn dim(&self) -> u32;

    /// Apply a resolved gate to the given local qudits.
    ///
    /// Implementations must reject the gate before mutating any state.
    fn apply_gate(&mut self, gate: &ResolvedGate, qudits: &[usize]) -> EngineResult<()>;

    /// Check that [`Engine::apply_gate`] would accept the gate, without
    /// touching the state.
    fn validate_gate(&self, gate: &ResolvedGate, qudits: &[usize]) -> EngineResult<()> {
        check_qudits(qudits, self.num_qudits())?;
        check_gate(Self::NAME, gate, self.dim(), qudits)
    }

    /// Apply a single-qudit noise channel to one qudit.
    fn apply_channel(
        &mut self,
        channel: &Channel,
        qudit: usize,
        rng: &mut StdRng,
    ) -> EngineResult<()>;

    /// Projectively measure the qudits, collapsing the state.
    fn measure(&mut self, qudits: &[usize], rng: &mut StdRng) -> EngineResult<Vec<u32>>;

    /// Reset one qudit to `|0⟩`.
    fn reset(&mut self, qudit: usize, rng: &mut StdRng) -> EngineResult<()>;

    /// Append `n` fresh `|0⟩` qudits at the end of the register.
    fn extend(&mut self, n: usize) -> EngineResult<()>;

    /// Apply any buffered operations.
    fn flush(&mut self, _rng: &mut StdRng) -> EngineResult<()> {
        Ok(())
    }

    /// Copy of the current state.
    fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Put back a state previously taken with [`Engine::snapshot`].
    fn restore(&mut self, snapshot: Self) {
        *self = snapshot;
    }

    /// Whether two registers hold the same state within `tolerance`.
    fn approx_eq(&self, other: &Self, tolerance: f64) -> bool;
}

/// Check that qudit indices are in range and pairwise distinct.
pub fn check_qudits(qudits: &[usize], num_qudits: usize) -> EngineResult<()> {
    for (i, &q) in qudits.iter().enumerate() {
        if q >= num_qudits {
            return Err(EngineError::QubitOutOfRange {
                qubit: q,
                num_qudits,
            });
        }
        if qudits[..i].contains(&q) {
            return Err(EngineError::DuplicateQubit(q));
        }
    }
    Ok(())
}

/// Reject registers larger than `E::max_qudits(dim)`.
pub fn check_register_size<E: Engine>(dim: u32, requested: usize) -> EngineResult<()> {
    let max = E::max_qudits(dim);
    if requested > max {
        return Err(EngineError::RegisterTooLarge {
            engine: E::NAME,
            dim,
            requested,
            max,
        });
    }
    Ok(())
}

/// Check that a gate resolved for `gate.dim` matches the register.
pub fn check_gate(
    engine: &'static str,
    gate: &ResolvedGate,
    dim: u32,
    qudits: &[usize],
) -> EngineResult<()> {
    if gate.dim != dim {
        return Err(EngineError::UnsupportedDimension {
            engine,
            dim: gate.dim,
        });
    }
    if gate.arity as usize != qudits.len() {
        return Err(qframe_ir::IrError::QubitCountMismatch {
            gate_name: gate.name.to_string(),
            expected: gate.arity,
            got: qudits.len() as u32,
        }
        .into());
    }
    Ok(())
}
